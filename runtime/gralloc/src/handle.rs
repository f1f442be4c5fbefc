//! Buffer handle - the only state that outlives an allocate call
//!
//! A handle bundles the backing resources of one buffer with its geometry.
//! It can only be created by the allocator and only destroyed by
//! [`Gralloc::free`](crate::Gralloc::free), which takes it by value: a freed
//! handle cannot be used or freed again.
//!
//! ```compile_fail
//! use gralloc::{AllocRequest, Gralloc, GrallocConfig, PixelFormat, UsageFlags};
//! use ion_platform::mock::MockIon;
//! use std::sync::Arc;
//!
//! let ion = Arc::new(MockIon::new());
//! let gralloc = Gralloc::new(ion.clone(), ion, GrallocConfig::default()).unwrap();
//! let request = AllocRequest::new(64, 64, PixelFormat::RGBA_8888, UsageFlags::empty());
//! let allocation = gralloc.allocate(&request).unwrap();
//!
//! gralloc.free(allocation.handle).unwrap();
//! gralloc.free(allocation.handle).unwrap(); // use of moved value
//! ```

use ion_platform::{MappedView, ResourceRef};

use crate::format::PixelFormat;
use crate::usage::UsageFlags;

/// Identity of the allocator context that created a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct AllocatorId(pub(crate) u64);

/// Backing resources of a buffer, primary plane first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Planes {
    /// Packed formats and framework-native YUV
    Single(ResourceRef),

    /// Semi-planar YUV: luma, chroma
    Dual(ResourceRef, ResourceRef),

    /// Fully-planar YUV: luma, chroma 1, chroma 2
    Triple(ResourceRef, ResourceRef, ResourceRef),
}

impl Planes {
    pub fn count(&self) -> usize {
        match self {
            Planes::Single(..) => 1,
            Planes::Dual(..) => 2,
            Planes::Triple(..) => 3,
        }
    }

    pub fn primary(&self) -> ResourceRef {
        match *self {
            Planes::Single(a) | Planes::Dual(a, _) | Planes::Triple(a, _, _) => a,
        }
    }

    /// Resources in plane order
    pub fn iter(&self) -> impl Iterator<Item = ResourceRef> {
        let (slots, count) = match *self {
            Planes::Single(a) => ([a, a, a], 1),
            Planes::Dual(a, b) => ([a, b, b], 2),
            Planes::Triple(a, b, c) => ([a, b, c], 3),
        };
        slots.into_iter().take(count)
    }
}

/// Opaque handle to an allocated graphics buffer
#[derive(Debug)]
#[must_use = "dropping a handle leaks its backing resources; pass it to `free`"]
pub struct BufferHandle {
    pub(crate) owner: AllocatorId,
    pub(crate) planes: Planes,
    pub(crate) view: Option<MappedView>,

    size: usize,
    usage: UsageFlags,
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: usize,
    vstride: usize,
}

/// Geometry recorded in a handle
pub(crate) struct HandleGeometry {
    pub size: usize,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: UsageFlags,
    pub stride: usize,
    pub vstride: usize,
}

impl BufferHandle {
    pub(crate) fn new(owner: AllocatorId, planes: Planes, geometry: HandleGeometry) -> Self {
        Self {
            owner,
            planes,
            view: None,
            size: geometry.size,
            usage: geometry.usage,
            width: geometry.width,
            height: geometry.height,
            format: geometry.format,
            stride: geometry.stride,
            vstride: geometry.vstride,
        }
    }

    /// Size of the primary allocation in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn usage(&self) -> UsageFlags {
        self.usage
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Row pitch in pixels
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Row count after alignment
    pub fn vstride(&self) -> usize {
        self.vstride
    }

    pub fn planes(&self) -> Planes {
        self.planes
    }

    pub fn plane_count(&self) -> usize {
        self.planes.count()
    }

    /// CPU view attached at allocation time
    pub fn view(&self) -> Option<MappedView> {
        self.view
    }
}
