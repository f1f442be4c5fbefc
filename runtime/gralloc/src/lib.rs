//! Gralloc - Graphics buffer allocation for the display/GPU stack
//!
//! # Purpose
//! Given a width, height, pixel format and usage intent, computes the memory
//! layout of a buffer, picks a backing pool, requests one backing resource
//! per plane from the kernel pool service, and returns an opaque handle plus
//! the row stride in pixels.
//!
//! # Integration Points
//! - Depends on: a [`PoolService`] (kernel allocation) and a [`ViewMapper`]
//!   (CPU view attach/detach), both injected by the host
//! - Provides to: display composer, camera, video and GPU clients
//!
//! # Architecture
//! ```text
//!   allocate(request)
//!     ├── format::classify ──► Packed | Planar | Unsupported
//!     ├── usage::{select_heap, ion_flags}
//!     ├── packed::allocate / planar::allocate   (PlaneTransaction rollback)
//!     └── ViewMapper::attach                     (release all on failure)
//!
//!   free(handle)
//!     └── ownership check ─► detach ─► release every plane ─► drop
//! ```
//!
//! # Concurrency
//! `Gralloc` takes `&self` everywhere and holds no lock. Concurrent callers
//! share the pool service connection, which must itself be thread-safe.

mod config;
pub mod format;
pub mod geometry;
mod guard;
mod handle;
mod packed;
mod planar;
pub mod usage;

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub use config::GrallocConfig;
pub use format::{FormatClass, PackedLayout, ParseFormatError, PixelFormat, PlanarLayout};
pub use geometry::BufferLayout;
pub use handle::{BufferHandle, Planes};
pub use ion_platform::{
    HeapMask, IonFlags, MappedView, PoolError, PoolService, ResourceRef, ViewMapper,
};
pub use usage::UsageFlags;

use handle::AllocatorId;
use thiserror::Error;

/// Error types for buffer allocation
#[derive(Debug, Error)]
pub enum GrallocError {
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: &'static str },

    #[error("Unsupported pixel format {format}")]
    UnsupportedFormat { format: PixelFormat },

    #[error("Backing allocation failed: {0}")]
    Allocation(#[from] PoolError),

    #[error("Failed to attach buffer view: {0}")]
    MappingFailed(#[source] PoolError),

    /// The handle was created by another allocator; it is handed back untouched
    #[error("Handle was not allocated by this allocator")]
    InvalidHandle(Box<BufferHandle>),
}

pub type Result<T> = core::result::Result<T, GrallocError>;

/// Buffer allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequest {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: UsageFlags,
}

impl AllocRequest {
    pub fn new(width: u32, height: u32, format: PixelFormat, usage: UsageFlags) -> Self {
        Self {
            width,
            height,
            format,
            usage,
        }
    }
}

/// Successful allocation
#[derive(Debug)]
#[must_use = "dropping an allocation leaks its backing resources; pass the handle to `free`"]
pub struct Allocation {
    pub handle: BufferHandle,

    /// Row pitch of the primary plane in pixels
    pub stride: usize,
}

/// Snapshot of outstanding allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocatorStats {
    pub live_handles: usize,
    pub live_resources: usize,
}

/// Compute the layout an allocation of `format` would use
///
/// # Errors
/// `InvalidArgument` for zero or overflowing dimensions or a config that does
/// not validate, `UnsupportedFormat` for tags outside the catalog.
pub fn buffer_layout(
    config: &GrallocConfig,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<BufferLayout> {
    config.validate()?;
    check_dimensions(width, height)?;

    match format::classify(format) {
        FormatClass::Packed(layout) => geometry::packed(width, height, layout, config.page_size),
        FormatClass::Planar(layout) => geometry::planar(width, height, layout),
        FormatClass::Unsupported => Err(GrallocError::UnsupportedFormat { format }),
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(GrallocError::InvalidArgument {
            reason: "width and height must be positive",
        });
    }
    Ok(())
}

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Allocator context
///
/// Owns the connection to the pool service and the view mapper for its
/// whole lifetime. Create one per process (or per device) and share it by
/// reference or `Arc`.
pub struct Gralloc<P, M> {
    id: AllocatorId,
    pool: P,
    mapper: M,
    config: GrallocConfig,
    live_handles: AtomicUsize,
    live_resources: AtomicUsize,
}

impl<P: PoolService, M: ViewMapper> Gralloc<P, M> {
    /// Create an allocator context
    ///
    /// # Errors
    /// `InvalidArgument` if `config` does not validate
    pub fn new(pool: P, mapper: M, config: GrallocConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            id: AllocatorId(NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed)),
            pool,
            mapper,
            config,
            live_handles: AtomicUsize::new(0),
            live_resources: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &GrallocConfig {
        &self.config
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            live_handles: self.live_handles.load(Ordering::Relaxed),
            live_resources: self.live_resources.load(Ordering::Relaxed),
        }
    }

    /// Allocate a buffer and attach its CPU view
    ///
    /// # Returns
    /// The handle and the primary plane's stride in pixels
    ///
    /// # Errors
    /// - `InvalidArgument` for zero or overflowing dimensions
    /// - `UnsupportedFormat` if the format is not in the catalog
    /// - `Allocation` with the pool service's error, unchanged
    /// - `MappingFailed` if the view could not be attached
    ///
    /// On error nothing stays allocated.
    pub fn allocate(&self, request: &AllocRequest) -> Result<Allocation> {
        check_dimensions(request.width, request.height)?;

        let flags = usage::ion_flags(request.usage);

        let mut handle = match format::classify(request.format) {
            FormatClass::Packed(layout) => {
                packed::allocate(&self.pool, &self.config, self.id, request, layout, flags)?
            }
            FormatClass::Planar(layout) => {
                planar::allocate(&self.pool, &self.config, self.id, request, layout, flags)?
            }
            FormatClass::Unsupported => {
                return Err(GrallocError::UnsupportedFormat {
                    format: request.format,
                })
            }
        };

        match self.mapper.attach(handle.planes.primary(), handle.size()) {
            Ok(view) => handle.view = Some(view),
            Err(e) => {
                log::error!(
                    "attaching view of {}x{} {} failed: {}",
                    request.width,
                    request.height,
                    request.format,
                    e
                );
                self.release_planes(&handle.planes);
                return Err(GrallocError::MappingFailed(e));
            }
        }

        self.live_handles.fetch_add(1, Ordering::Relaxed);
        self.live_resources
            .fetch_add(handle.plane_count(), Ordering::Relaxed);

        log::debug!(
            "allocated {}x{} {} usage {:#x}: stride {} vstride {} size {} planes {}",
            request.width,
            request.height,
            request.format,
            request.usage.bits(),
            handle.stride(),
            handle.vstride(),
            handle.size(),
            handle.plane_count()
        );

        let stride = handle.stride();
        Ok(Allocation { handle, stride })
    }

    /// Release a buffer
    ///
    /// Detaches the view, releases every backing resource and destroys the
    /// handle. Release failures are logged and otherwise ignored.
    ///
    /// # Errors
    /// `InvalidHandle` if `handle` belongs to another allocator context; the
    /// handle is returned inside the error.
    pub fn free(&self, mut handle: BufferHandle) -> Result<()> {
        if handle.owner != self.id {
            return Err(GrallocError::InvalidHandle(Box::new(handle)));
        }

        if let Some(view) = handle.view.take() {
            self.mapper.detach(view);
        }
        self.release_planes(&handle.planes);

        self.live_handles.fetch_sub(1, Ordering::Relaxed);
        self.live_resources
            .fetch_sub(handle.plane_count(), Ordering::Relaxed);

        log::debug!(
            "freed {}x{} {} ({} planes)",
            handle.width(),
            handle.height(),
            handle.format(),
            handle.plane_count()
        );

        Ok(())
    }

    fn release_planes(&self, planes: &Planes) {
        for resource in planes.iter() {
            if let Err(e) = self.pool.release(resource) {
                log::warn!("release of {} failed: {}", resource, e);
            }
        }
    }
}
