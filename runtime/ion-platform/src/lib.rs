//! # ION Platform Abstraction Layer
//!
//! This crate is the boundary between the graphics buffer allocator and the
//! kernel memory pool service. It provides a unified API across backends:
//! - **Mock Mode**: in-process recording pool, used by every test
//! - **Runtime Mode**: Linux ION device (`/dev/ion`) plus `mmap` views
//!
//! ## Usage
//!
//! ```rust
//! # #[cfg(feature = "mock")]
//! # {
//! use ion_platform::{HeapMask, IonFlags, PoolService, mock::MockIon};
//!
//! let ion = MockIon::new();
//! let fd = ion.allocate(4096, 0, HeapMask::SYSTEM, IonFlags::CACHED).unwrap();
//! ion.release(fd).unwrap();
//! assert_eq!(ion.live_resources(), 0);
//! # }
//! ```
//!
//! ## Build Modes
//!
//! ```bash
//! # Mock (default - testing)
//! cargo build
//!
//! # Runtime (real ION device)
//! cargo build --no-default-features --features runtime
//! ```

use core::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(all(feature = "runtime", target_os = "linux"))]
pub mod device;

/// Errors reported by the pool service and the view mapper
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Pool exhausted (requested: {requested} bytes, heap mask: {heap_mask:#x})")]
    Exhausted { requested: usize, heap_mask: u32 },

    #[error("Resource {0} is not live")]
    UnknownResource(RawResource),

    #[error("{request} ioctl failed (errno {errno})")]
    Ioctl { request: &'static str, errno: i32 },

    #[error("Failed to map resource {resource} (errno {errno})")]
    Map { resource: RawResource, errno: i32 },

    #[error("Failed to release resource {resource} (errno {errno})")]
    Release { resource: RawResource, errno: i32 },

    #[error("Cannot open {path} (errno {errno})")]
    Device { path: String, errno: i32 },
}

pub type Result<T> = core::result::Result<T, PoolError>;

/// Raw descriptor value backing a [`ResourceRef`]
pub type RawResource = i32;

/// One independently releasable unit of backing memory
///
/// For the ION backend this is a shareable dma-buf file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef(RawResource);

impl ResourceRef {
    pub const fn from_raw(raw: RawResource) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> RawResource {
        self.0
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

bitflags! {
    /// Pool selector: which ION heaps may satisfy a request
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeapMask: u32 {
        /// General purpose, page-backed system heap
        const SYSTEM         = 1 << 0;
        /// Physically contiguous system heap
        const SYSTEM_CONTIG  = 1 << 1;
        /// Reserved carveout region
        const CARVEOUT       = 1 << 2;
        /// Restricted contiguous heap used for protected content
        const EXYNOS_CONTIG  = 1 << 4;
    }
}

bitflags! {
    /// Per-allocation flags forwarded to the pool service
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IonFlags: u32 {
        /// CPU mappings are cached
        const CACHED            = 1 << 0;
        /// Cache maintenance is done explicitly by the client
        const CACHED_NEEDS_SYNC = 1 << 1;
        /// Protected video content marker
        const EXYNOS_VIDEO      = 1 << 29;
    }
}

/// CPU-addressable view of a backing resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedView {
    /// Base virtual address of the mapping
    pub base: usize,

    /// Mapped length in bytes
    pub len: usize,
}

/// Kernel pool allocation service
///
/// Implementations must be safe to call concurrently: one connection is
/// shared by every allocate and free issued by the host process.
pub trait PoolService: Send + Sync {
    /// Allocate `len` bytes from one of the heaps in `heap_mask`
    ///
    /// # Errors
    /// Returns the service's error unchanged; callers do not retry.
    fn allocate(&self, len: usize, align: usize, heap_mask: HeapMask, flags: IonFlags)
        -> Result<ResourceRef>;

    /// Release a resource previously returned by [`PoolService::allocate`]
    fn release(&self, resource: ResourceRef) -> Result<()>;
}

/// Attaches and detaches the CPU view of a buffer
pub trait ViewMapper: Send + Sync {
    /// Map `len` bytes of `resource`
    fn attach(&self, resource: ResourceRef, len: usize) -> Result<MappedView>;

    /// Drop a view returned by [`ViewMapper::attach`]
    fn detach(&self, view: MappedView);
}

impl<T: PoolService + ?Sized> PoolService for Arc<T> {
    fn allocate(
        &self,
        len: usize,
        align: usize,
        heap_mask: HeapMask,
        flags: IonFlags,
    ) -> Result<ResourceRef> {
        (**self).allocate(len, align, heap_mask, flags)
    }

    fn release(&self, resource: ResourceRef) -> Result<()> {
        (**self).release(resource)
    }
}

impl<T: ViewMapper + ?Sized> ViewMapper for Arc<T> {
    fn attach(&self, resource: ResourceRef, len: usize) -> Result<MappedView> {
        (**self).attach(resource, len)
    }

    fn detach(&self, view: MappedView) {
        (**self).detach(view)
    }
}

/// Page size of the host, used to round packed allocations
pub fn host_page_size() -> usize {
    #[cfg(all(feature = "runtime", target_os = "linux"))]
    {
        // SAFETY: sysconf has no preconditions
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
    }

    DEFAULT_PAGE_SIZE
}

/// Page size assumed when the host cannot be queried
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Platform configuration and detection
pub mod config {
    /// Backends compiled into this build, in order of preference
    pub fn platform_modes() -> &'static [&'static str] {
        match (cfg!(feature = "runtime"), cfg!(feature = "mock")) {
            (true, true) => &["runtime", "mock"],
            (true, false) => &["runtime"],
            (false, true) => &["mock"],
            (false, false) => &[],
        }
    }

    /// Check if the mock backend is available
    pub const fn is_mock() -> bool {
        cfg!(feature = "mock")
    }

    /// Check if the ION device backend is available
    pub const fn is_runtime() -> bool {
        cfg!(all(feature = "runtime", target_os = "linux"))
    }
}
