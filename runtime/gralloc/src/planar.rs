//! Planar (YUV family) allocation
//!
//! Fully-planar and semi-planar buffers get one pool request per plane, in
//! plane order, all from the usage-selected pool. A failure at plane k
//! releases planes 1..k-1 before the error is returned.
//!
//! Framework-native formats are one contiguous request from the framework
//! heap, whatever the usage.

use ion_platform::{IonFlags, PoolService};

use crate::config::GrallocConfig;
use crate::format::{FormatClass, PlanarLayout};
use crate::geometry;
use crate::guard::PlaneTransaction;
use crate::handle::{AllocatorId, BufferHandle, HandleGeometry};
use crate::usage::select_heap;
use crate::{AllocRequest, GrallocError, Result};

pub(crate) fn allocate<P: PoolService + ?Sized>(
    pool: &P,
    config: &GrallocConfig,
    owner: AllocatorId,
    request: &AllocRequest,
    layout: PlanarLayout,
    flags: IonFlags,
) -> Result<BufferHandle> {
    let geometry = geometry::planar(request.width, request.height, layout)?;

    let heap_mask = select_heap(config, FormatClass::Planar(layout), request.usage);

    let plane_failed = |index: usize, size: usize, e: &GrallocError| {
        log::warn!(
            "{} plane {} of {} ({} bytes) failed: {}",
            request.format,
            index + 1,
            geometry.plane_count(),
            size,
            e
        );
    };

    let primary = geometry.primary_size();
    let mut tx = PlaneTransaction::begin(pool, config.plane_align, heap_mask, flags, primary)
        .inspect_err(|e| plane_failed(0, primary, e))?;
    for (index, &size) in geometry.plane_sizes().iter().enumerate().skip(1) {
        tx.acquire(size).inspect_err(|e| plane_failed(index, size, e))?;
    }
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
