//! Allocator configuration

use ion_platform::{host_page_size, HeapMask};

use crate::{GrallocError, Result};

/// Configuration of a [`Gralloc`](crate::Gralloc) context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrallocConfig {
    /// Packed allocations are rounded up to this size
    pub page_size: usize,

    /// Pool for ordinary buffers
    pub general_heap: HeapMask,

    /// Pool for buffers carrying protected content
    pub protected_heap: HeapMask,

    /// Pool for framework-native YUV buffers, whatever their usage
    pub framework_heap: HeapMask,

    /// Alignment passed with every pool request (0 = service default)
    pub plane_align: usize,
}

impl Default for GrallocConfig {
    fn default() -> Self {
        Self {
            page_size: host_page_size(),
            general_heap: HeapMask::SYSTEM,
            protected_heap: HeapMask::EXYNOS_CONTIG,
            framework_heap: HeapMask::SYSTEM,
            plane_align: 0,
        }
    }
}

impl GrallocConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Check that the configuration can drive the geometry rules
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() {
            return Err(GrallocError::InvalidArgument {
                reason: "page size must be a non-zero power of two",
            });
        }
        if self.plane_align != 0 && !self.plane_align.is_power_of_two() {
            return Err(GrallocError::InvalidArgument {
                reason: "plane alignment must be zero or a power of two",
            });
        }
        Ok(())
    }
}
