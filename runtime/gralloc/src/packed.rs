//! Packed (RGB family) allocation
//!
//! One pool request sized by [`geometry::packed`]; the resulting handle owns
//! a single backing resource.

use ion_platform::{IonFlags, PoolService};

use crate::config::GrallocConfig;
use crate::format::{FormatClass, PackedLayout};
use crate::geometry;
use crate::guard::PlaneTransaction;
use crate::handle::{AllocatorId, BufferHandle, HandleGeometry};
use crate::usage::select_heap;
use crate::{AllocRequest, Result};

pub(crate) fn allocate<P: PoolService + ?Sized>(
    pool: &P,
    config: &GrallocConfig,
    owner: AllocatorId,
    request: &AllocRequest,
    layout: PackedLayout,
    flags: IonFlags,
) -> Result<BufferHandle> {
    let geometry = geometry::packed(request.width, request.height, layout, config.page_size)?;
    let heap_mask = select_heap(config, FormatClass::Packed(layout), request.usage);

    let primary = geometry.primary_size();
    let tx = PlaneTransaction::begin(pool, config.plane_align, heap_mask, flags, primary)?;
    let planes = tx.commit();

    Ok(BufferHandle::new(
        owner,
        planes,
        HandleGeometry {
            size: geometry.primary_size(),
            width: request.width,
            height: request.height,
            format: request.format,
            usage: request.usage,
            stride: geometry.stride,
            vstride: geometry.vstride,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;
    use crate::handle::Planes;
    use crate::usage::UsageFlags;
    use crate::GrallocError;
    use ion_platform::mock::MockIon;
    use ion_platform::{HeapMask, PoolError};

    fn request(width: u32, height: u32, usage: UsageFlags) -> AllocRequest {
        AllocRequest::new(width, height, PixelFormat::RGBA_8888, usage)
    }

    #[test]
    fn test_packed_single_request() {
        let ion = MockIon::new();
        let config = GrallocConfig::default().with_page_size(4096);
        let rgba = PackedLayout { bytes_per_pixel: 4 };

        let handle = allocate(
            &ion,
            &config,
            AllocatorId(1),
            &request(100, 100, UsageFlags::empty()),
            rgba,
            IonFlags::empty(),
        )
        .unwrap();

        let calls = ion.allocations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len, 45056);
        assert_eq!(calls[0].heap_mask, HeapMask::SYSTEM);
        assert_eq!(handle.planes(), Planes::Single(calls[0].resource));
        assert_eq!(handle.size(), 45056);
        assert_eq!(handle.stride(), 100);
        assert_eq!(handle.vstride(), 112);
    }

    #[test]
    fn test_packed_protected_pool() {
        let ion = MockIon::new();
        let config = GrallocConfig::default();

        let _handle = allocate(
            &ion,
            &config,
            AllocatorId(1),
            &request(64, 64, UsageFlags::PROTECTED),
            PackedLayout { bytes_per_pixel: 4 },
            IonFlags::EXYNOS_VIDEO,
        )
        .unwrap();

        let calls = ion.allocations();
        assert_eq!(calls[0].heap_mask, HeapMask::EXYNOS_CONTIG);
        assert_eq!(calls[0].flags, IonFlags::EXYNOS_VIDEO);
    }

    #[test]
    fn test_packed_failure_has_no_side_effects() {
        let ion = MockIon::new();
        ion.fail_allocation_at(1);

        let result = allocate(
            &ion,
            &GrallocConfig::default(),
            AllocatorId(1),
            &request(64, 64, UsageFlags::empty()),
            PackedLayout { bytes_per_pixel: 2 },
            IonFlags::empty(),
        );

        assert!(matches!(
            result,
            Err(GrallocError::Allocation(PoolError::Exhausted { .. }))
        ));
        assert_eq!(ion.release_calls(), 0);
        assert_eq!(ion.live_resources(), 0);
    }
}
