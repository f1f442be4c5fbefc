//! Integration tests for the complete allocate/free lifecycle
//!
//! These tests drive the public API against the mock pool service and cover:
//! - Geometry of concrete allocations
//! - Rollback when a plane allocation fails
//! - Rollback when the view cannot be attached
//! - Free of one, two and three plane buffers
//! - Concurrent callers sharing one pool connection

use std::sync::Arc;
use std::thread;

use gralloc::*;
use ion_platform::mock::MockIon;

fn setup() -> (Arc<MockIon>, Gralloc<Arc<MockIon>, Arc<MockIon>>) {
    let ion = Arc::new(MockIon::new());
    let config = GrallocConfig::default().with_page_size(4096);
    let gralloc =
        Gralloc::new(ion.clone(), ion.clone(), config).expect("Failed to create allocator");
    (ion, gralloc)
}

fn request(width: u32, height: u32, format: PixelFormat) -> AllocRequest {
    AllocRequest::new(width, height, format, UsageFlags::empty())
}

/// RGBA 100x100 with no usage: stride 100, vstride 112, page-rounded size
#[test]
fn test_rgba_100x100_scenario() {
    let (ion, gralloc) = setup();

    let allocation = gralloc
        .allocate(&request(100, 100, PixelFormat::RGBA_8888))
        .expect("Failed to allocate");

    assert_eq!(allocation.stride, 100);
    assert_eq!(allocation.handle.vstride(), 112);
    assert_eq!(allocation.handle.size(), geometry::align_up(400 * 112, 4096));
    assert_eq!(allocation.handle.plane_count(), 1);

    let calls = ion.allocations();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].heap_mask, HeapMask::SYSTEM);
    assert_eq!(calls[0].flags, IonFlags::empty());
}

/// Unknown format: no pool traffic at all
#[test]
fn test_unrecognized_format_scenario() {
    let (ion, gralloc) = setup();

    let result = gralloc.allocate(&request(64, 64, PixelFormat::from_raw(999)));

    assert!(matches!(result, Err(GrallocError::UnsupportedFormat { .. })));
    assert_eq!(ion.allocate_calls(), 0);
    assert_eq!(ion.attach_calls(), 0);
    assert_eq!(gralloc.stats(), AllocatorStats::default());
}

/// Failure at plane k releases exactly the k-1 planes already held
#[test]
fn test_plane_failure_rollback() {
    let cases = [
        (PixelFormat::EXYNOS_YV12, 3),
        (PixelFormat::YCBCR_420_SP, 2),
        (PixelFormat::EXYNOS_YCRCB_420_SP, 2),
        (PixelFormat::YCBCR_420_SP_TILED, 2),
    ];

    for (format, planes) in cases {
        for failing in 1..=planes {
            let (ion, gralloc) = setup();
            ion.fail_allocation_at(failing);

            let result = gralloc.allocate(&request(640, 480, format));

            assert!(
                matches!(result, Err(GrallocError::Allocation(PoolError::Exhausted { .. }))),
                "{} plane {}",
                format,
                failing
            );
            assert_eq!(ion.allocate_calls(), failing);
            assert_eq!(ion.release_calls(), failing - 1);
            assert_eq!(ion.live_resources(), 0);
            assert_eq!(ion.attach_calls(), 0);
            assert_eq!(gralloc.stats().live_handles, 0);
        }
    }
}

/// Attach failure after N planes releases all N
#[test]
fn test_mapping_failure_rollback() {
    let cases = [
        (PixelFormat::RGB_888, 1),
        (PixelFormat::YV12, 1),
        (PixelFormat::YCBCR_420_SP, 2),
        (PixelFormat::EXYNOS_YV12, 3),
    ];

    for (format, planes) in cases {
        let (ion, gralloc) = setup();
        ion.fail_next_attach();

        let result = gralloc.allocate(&request(320, 240, format));

        assert!(matches!(result, Err(GrallocError::MappingFailed(_))), "{}", format);
        assert_eq!(ion.allocate_calls(), planes);
        assert_eq!(ion.release_calls(), planes);
        assert_eq!(ion.live_resources(), 0);
        assert_eq!(ion.detach_calls(), 0);
        assert_eq!(gralloc.stats(), AllocatorStats::default());
    }
}

/// Free detaches once and releases exactly the handle's planes
#[test]
fn test_free_releases_every_plane() {
    let cases = [
        (PixelFormat::BGRA_8888, 1),
        (PixelFormat::YCRCB_420_SP, 1),
        (PixelFormat::YCBCR_420_SP, 2),
        (PixelFormat::EXYNOS_YV12, 3),
    ];

    for (format, planes) in cases {
        let (ion, gralloc) = setup();

        let allocation = gralloc.allocate(&request(176, 144, format)).unwrap();
        let owned: Vec<ResourceRef> = allocation.handle.planes().iter().collect();
        assert_eq!(owned.len(), planes);
        assert_eq!(gralloc.stats().live_resources, planes);

        gralloc.free(allocation.handle).unwrap();

        assert_eq!(ion.detach_calls(), 1, "{}", format);
        assert_eq!(ion.released(), owned, "{}", format);
        assert_eq!(ion.live_resources(), 0);
        assert_eq!(gralloc.stats(), AllocatorStats::default());
    }
}

/// Release errors during free are swallowed; the handle is still torn down
#[test]
fn test_free_ignores_release_errors() {
    let (ion, gralloc) = setup();

    let allocation = gralloc
        .allocate(&request(64, 64, PixelFormat::EXYNOS_YV12))
        .unwrap();

    // Release one plane behind the allocator's back
    let chroma = allocation.handle.planes().iter().nth(1).unwrap();
    ion.release(chroma).unwrap();

    assert!(gralloc.free(allocation.handle).is_ok());
    assert_eq!(ion.live_resources(), 0);
    assert_eq!(ion.release_calls(), 4);
}

/// Protected content goes to the restricted pool with the video marker
#[test]
fn test_protected_allocation() {
    let (ion, gralloc) = setup();

    let usage = UsageFlags::PROTECTED | UsageFlags::HW_COMPOSER;
    let request = AllocRequest::new(1920, 1080, PixelFormat::EXYNOS_YCRCB_420_SP, usage);
    let allocation = gralloc.allocate(&request).unwrap();

    for call in ion.allocations() {
        assert_eq!(call.heap_mask, HeapMask::EXYNOS_CONTIG);
        assert_eq!(call.flags, IonFlags::EXYNOS_VIDEO);
    }
    assert_eq!(allocation.handle.usage(), usage);

    gralloc.free(allocation.handle).unwrap();
}

/// The pool reported by `select_heap` is the pool every plane comes from
#[test]
fn test_reported_heap_matches_allocation() {
    for usage in [UsageFlags::empty(), UsageFlags::PROTECTED] {
        for (format, _) in PixelFormat::catalog() {
            let (ion, gralloc) = setup();
            let reported = usage::select_heap(gralloc.config(), format::classify(format), usage);

            let allocation = gralloc.allocate(&AllocRequest::new(64, 64, format, usage)).unwrap();

            for call in ion.allocations() {
                assert_eq!(call.heap_mask, reported, "{} usage {:#x}", format, usage.bits());
            }
            gralloc.free(allocation.handle).unwrap();
        }
    }
}

/// Protected framework-native 4:2:0 still comes from the framework heap
#[test]
fn test_protected_framework_native_scenario() {
    let (ion, gralloc) = setup();

    for format in [PixelFormat::YV12, PixelFormat::YCRCB_420_SP] {
        let request = AllocRequest::new(64, 64, format, UsageFlags::PROTECTED);
        let allocation = gralloc.allocate(&request).unwrap();
        gralloc.free(allocation.handle).unwrap();
    }

    let calls = ion.allocations();
    assert_eq!(calls.len(), 2);
    for call in calls {
        assert_eq!(call.heap_mask, HeapMask::SYSTEM);
        assert_eq!(call.flags, IonFlags::EXYNOS_VIDEO);
    }
}

/// A bounded pool surfaces exhaustion verbatim and recovers after free
#[test]
fn test_pool_exhaustion() {
    let ion = Arc::new(MockIon::with_capacity(64 * 1024));
    let config = GrallocConfig::default().with_page_size(4096);
    let gralloc = Gralloc::new(ion.clone(), ion.clone(), config).unwrap();

    let first = gralloc
        .allocate(&request(64, 64, PixelFormat::RGBA_8888))
        .unwrap();
    let result = gralloc.allocate(&request(256, 256, PixelFormat::RGBA_8888));
    assert!(matches!(
        result,
        Err(GrallocError::Allocation(PoolError::Exhausted { requested: 262144, .. }))
    ));

    gralloc.free(first.handle).unwrap();
    assert_eq!(ion.live_resources(), 0);
}

/// Many threads allocate and free through one shared context
#[test]
fn test_concurrent_allocate_free() {
    let (ion, gralloc) = setup();
    let gralloc = Arc::new(gralloc);

    let formats = [
        PixelFormat::RGBA_8888,
        PixelFormat::RGB_565,
        PixelFormat::YCBCR_420_SP,
        PixelFormat::EXYNOS_YV12,
    ];

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let gralloc = Arc::clone(&gralloc);
            let format = formats[i % formats.len()];
            thread::spawn(move || {
                let mut handles = Vec::new();
                for n in 1..=16 {
                    let allocation = gralloc
                        .allocate(&request(32 * n, 16 * n, format))
                        .expect("Failed to allocate");
                    handles.push(allocation.handle);
                }
                for handle in handles {
                    gralloc.free(handle).expect("Failed to free");
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(ion.live_resources(), 0);
    assert_eq!(ion.attach_calls(), ion.detach_calls());
    assert_eq!(gralloc.stats(), AllocatorStats::default());
}

/// Handles are unique resources: two allocations never share a plane
#[test]
fn test_handles_do_not_share_resources() {
    let (_ion, gralloc) = setup();

    let a = gralloc.allocate(&request(64, 64, PixelFormat::EXYNOS_YV12)).unwrap();
    let b = gralloc.allocate(&request(64, 64, PixelFormat::EXYNOS_YV12)).unwrap();

    let a_planes: Vec<_> = a.handle.planes().iter().collect();
    assert!(b.handle.planes().iter().all(|r| !a_planes.contains(&r)));
    assert_ne!(a.handle.view(), b.handle.view());

    gralloc.free(a.handle).unwrap();
    gralloc.free(b.handle).unwrap();
}
