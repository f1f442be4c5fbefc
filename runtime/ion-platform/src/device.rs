//! Linux ION device backend
//!
//! Talks to the legacy ION ioctl interface:
//! - `ION_IOC_ALLOC` reserves memory and returns a per-client handle
//! - `ION_IOC_SHARE` exports the handle as a dma-buf file descriptor
//! - `ION_IOC_FREE` drops the client handle; the fd keeps the memory alive
//!
//! Releasing a resource closes its fd. Views are plain shared `mmap`s of
//! the fd.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::ptr;

use libc::{c_int, c_uint, c_ulong, c_void, size_t};

use crate::{
    HeapMask, IonFlags, MappedView, PoolError, PoolService, ResourceRef, Result, ViewMapper,
};

/// Default ION device node
pub const ION_DEVICE_PATH: &str = "/dev/ion";

const ION_IOC_MAGIC: u8 = b'I';

const IOC_NRBITS: c_ulong = 8;
const IOC_TYPEBITS: c_ulong = 8;
const IOC_SIZEBITS: c_ulong = 14;
const IOC_NRSHIFT: c_ulong = 0;
const IOC_TYPESHIFT: c_ulong = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: c_ulong = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: c_ulong = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_READ_WRITE: c_ulong = 3;

const fn iowr(nr: u8, size: usize) -> c_ulong {
    (IOC_READ_WRITE << IOC_DIRSHIFT)
        | ((ION_IOC_MAGIC as c_ulong) << IOC_TYPESHIFT)
        | ((nr as c_ulong) << IOC_NRSHIFT)
        | ((size as c_ulong) << IOC_SIZESHIFT)
}

#[repr(C)]
struct IonAllocationData {
    len: size_t,
    align: size_t,
    heap_id_mask: c_uint,
    flags: c_uint,
    handle: c_int,
}

#[repr(C)]
struct IonFdData {
    handle: c_int,
    fd: c_int,
}

#[repr(C)]
struct IonHandleData {
    handle: c_int,
}

const ION_IOC_ALLOC: c_ulong = iowr(0, core::mem::size_of::<IonAllocationData>());
const ION_IOC_FREE: c_ulong = iowr(1, core::mem::size_of::<IonHandleData>());
const ION_IOC_SHARE: c_ulong = iowr(4, core::mem::size_of::<IonFdData>());

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

/// Open connection to the ION device
///
/// Shared by all callers of the allocator; the kernel serializes requests
/// on one client, so `&self` methods are safe to call concurrently.
pub struct IonDevice {
    file: File,
}

impl IonDevice {
    /// Open the default ION device
    pub fn open() -> Result<Self> {
        Self::open_path(ION_DEVICE_PATH)
    }

    /// Open an ION device node at `path`
    pub fn open_path(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| PoolError::Device {
                path: path.to_string(),
                errno: e.raw_os_error().unwrap_or(libc::ENODEV),
            })?;

        log::debug!("opened ION device {} (fd {})", path, file.as_raw_fd());
        Ok(Self { file })
    }

    fn ioctl<T>(&self, request: c_ulong, name: &'static str, arg: &mut T) -> Result<()> {
        // SAFETY: `arg` is a live, correctly sized repr(C) argument block for `request`
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg as *mut T) };
        if ret < 0 {
            return Err(PoolError::Ioctl {
                request: name,
                errno: last_errno(),
            });
        }
        Ok(())
    }

    fn free_handle(&self, handle: c_int) {
        let mut data = IonHandleData { handle };
        if let Err(e) = self.ioctl(ION_IOC_FREE, "ION_IOC_FREE", &mut data) {
            log::warn!("dropping ION handle {} failed: {}", handle, e);
        }
    }
}

impl PoolService for IonDevice {
    fn allocate(
        &self,
        len: usize,
        align: usize,
        heap_mask: HeapMask,
        flags: IonFlags,
    ) -> Result<ResourceRef> {
        let mut alloc = IonAllocationData {
            len,
            align,
            heap_id_mask: heap_mask.bits(),
            flags: flags.bits(),
            handle: 0,
        };
        self.ioctl(ION_IOC_ALLOC, "ION_IOC_ALLOC", &mut alloc)
            .map_err(|e| match e {
                PoolError::Ioctl { errno, .. } if errno == libc::ENOMEM => PoolError::Exhausted {
                    requested: len,
                    heap_mask: heap_mask.bits(),
                },
                other => other,
            })?;

        let mut share = IonFdData {
            handle: alloc.handle,
            fd: -1,
        };
        let shared = self.ioctl(ION_IOC_SHARE, "ION_IOC_SHARE", &mut share);

        // The exported fd holds its own reference to the buffer
        self.free_handle(alloc.handle);
        shared?;

        Ok(ResourceRef::from_raw(share.fd))
    }

    fn release(&self, resource: ResourceRef) -> Result<()> {
        close_resource(resource)
    }
}

fn close_resource(resource: ResourceRef) -> Result<()> {
    // SAFETY: the fd was exported by ION_IOC_SHARE and is owned by the caller
    let ret = unsafe { libc::close(resource.as_raw()) };
    if ret < 0 {
        return Err(PoolError::Release {
            resource: resource.as_raw(),
            errno: last_errno(),
        });
    }
    Ok(())
}

/// Maps dma-buf descriptors into the calling process
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapMapper;

impl ViewMapper for MmapMapper {
    fn attach(&self, resource: ResourceRef, len: usize) -> Result<MappedView> {
        // SAFETY: a fresh shared mapping of a caller-owned fd; no existing memory is touched
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                resource.as_raw(),
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(PoolError::Map {
                resource: resource.as_raw(),
                errno: last_errno(),
            });
        }

        Ok(MappedView {
            base: addr as usize,
            len,
        })
    }

    fn detach(&self, view: MappedView) {
        // SAFETY: `view` came from `attach` and is detached exactly once
        let ret = unsafe { libc::munmap(view.base as *mut c_void, view.len) };
        if ret < 0 {
            log::warn!("munmap({:#x}, {}) failed: errno {}", view.base, view.len, last_errno());
        }
    }
}
