//! Buffer geometry - stride, vertical stride and plane sizes
//!
//! Pure functions of (width, height, layout rule, page size). The allocators
//! call these and nothing else to size their pool requests, so a layout
//! query and a real allocation always agree.
//!
//! All arithmetic is checked; dimensions whose geometry does not fit in
//! `usize` are rejected with `InvalidArgument`.

use crate::format::{PackedLayout, PlanarLayout, CHROMA_ROW_ALIGN, ROW_ALIGN, VERTICAL_ALIGN};
use crate::{GrallocError, Result};

/// Maximum number of backing resources per buffer
pub const MAX_PLANES: usize = 3;

/// Round `value` up to a multiple of `align` (a power of two)
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

fn checked_align_up(value: usize, align: usize) -> Result<usize> {
    if !align.is_power_of_two() {
        return Err(GrallocError::InvalidArgument {
            reason: "alignment must be a power of two",
        });
    }

    value
        .checked_add(align - 1)
        .map(|v| v & !(align - 1))
        .ok_or_else(overflow)
}

fn checked_mul(a: usize, b: usize) -> Result<usize> {
    a.checked_mul(b).ok_or_else(overflow)
}

fn overflow() -> GrallocError {
    GrallocError::InvalidArgument {
        reason: "buffer dimensions overflow",
    }
}

/// Memory layout of one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Bytes between the starts of consecutive primary-plane rows
    pub bytes_per_row: usize,

    /// Row pitch of the primary plane, in pixels
    pub stride: usize,

    /// Row count of the primary plane after alignment
    pub vstride: usize,

    plane_sizes: [usize; MAX_PLANES],
    plane_count: usize,
}

impl BufferLayout {
    /// Size of each backing resource, primary plane first
    pub fn plane_sizes(&self) -> &[usize] {
        &self.plane_sizes[..self.plane_count]
    }

    pub fn plane_count(&self) -> usize {
        self.plane_count
    }

    /// Size of the primary allocation
    pub fn primary_size(&self) -> usize {
        self.plane_sizes[0]
    }

    /// Bytes requested from the pool across all planes
    pub fn total_size(&self) -> usize {
        self.plane_sizes().iter().sum()
    }
}

/// Geometry of a packed buffer
///
/// Rows are padded to 16 bytes, the row count to 16, and the total to a
/// whole number of pages.
pub fn packed(
    width: u32,
    height: u32,
    layout: PackedLayout,
    page_size: usize,
) -> Result<BufferLayout> {
    let bpp = layout.bytes_per_pixel;

    let bytes_per_row = checked_align_up(checked_mul(width as usize, bpp)?, ROW_ALIGN)?;
    let vstride = checked_align_up(height as usize, VERTICAL_ALIGN)?;
    let size = checked_align_up(checked_mul(bytes_per_row, vstride)?, page_size)?;

    Ok(BufferLayout {
        bytes_per_row,
        stride: bytes_per_row / bpp,
        vstride,
        plane_sizes: [size, 0, 0],
        plane_count: 1,
    })
}

/// Geometry of a planar buffer
pub fn planar(width: u32, height: u32, layout: PlanarLayout) -> Result<BufferLayout> {
    let (w, h) = (width as usize, height as usize);

    match layout {
        PlanarLayout::FullyPlanar => {
            let stride = checked_align_up(w, layout.row_align())?;
            let vstride = checked_align_up(h, layout.luma_vertical_align())?;
            let luma = checked_mul(stride, vstride)?;
            let chroma = checked_mul(vstride / 2, align_up(stride / 2, CHROMA_ROW_ALIGN))?;

            Ok(BufferLayout {
                bytes_per_row: stride,
                stride,
                vstride,
                plane_sizes: [luma, chroma, chroma],
                plane_count: 3,
            })
        }

        PlanarLayout::SemiPlanar => {
            let stride = checked_align_up(w, layout.row_align())?;
            let vstride = checked_align_up(h, layout.luma_vertical_align())?;
            let chroma_align = layout
                .chroma_vertical_align()
                .unwrap_or(layout.luma_vertical_align());
            let chroma_vstride = checked_align_up(h / 2, chroma_align)?;

            Ok(BufferLayout {
                bytes_per_row: stride,
                stride,
                vstride,
                plane_sizes: [
                    checked_mul(stride, vstride)?,
                    checked_mul(stride, chroma_vstride)?,
                    0,
                ],
                plane_count: 2,
            })
        }

        PlanarLayout::FrameworkNative { row_align } => {
            let stride = checked_align_up(w, row_align)?;
            let size = checked_mul(checked_mul(stride, h)?, 3)? / 2;

            Ok(BufferLayout {
                bytes_per_row: stride,
                stride,
                vstride: h,
                plane_sizes: [size, 0, 0],
                plane_count: 1,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 4096;

    fn rgba() -> PackedLayout {
        PackedLayout { bytes_per_pixel: 4 }
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
        assert_eq!(align_up(7, 1), 7);
    }

    #[test]
    fn test_packed_rgba_100x100() {
        let layout = packed(100, 100, rgba(), PAGE).unwrap();

        assert_eq!(layout.bytes_per_row, 400);
        assert_eq!(layout.stride, 100);
        assert_eq!(layout.vstride, 112);
        assert_eq!(layout.primary_size(), align_up(400 * 112, PAGE));
        assert_eq!(layout.plane_count(), 1);
    }

    #[test]
    fn test_packed_rgb888_pads_rows() {
        let layout = packed(100, 10, PackedLayout { bytes_per_pixel: 3 }, PAGE).unwrap();

        assert_eq!(layout.bytes_per_row, 304);
        assert_eq!(layout.stride, 101);
        assert_eq!(layout.vstride, 16);
        assert_eq!(layout.primary_size(), PAGE * 2);
    }

    #[test]
    fn test_packed_blob() {
        let layout = packed(1000, 1, PackedLayout { bytes_per_pixel: 1 }, PAGE).unwrap();
        assert_eq!(layout.stride, 1008);
        assert_eq!(layout.vstride, 16);
        assert_eq!(layout.primary_size(), 16384);
    }

    #[test]
    fn test_fully_planar_1920x1080() {
        let layout = planar(1920, 1080, PlanarLayout::FullyPlanar).unwrap();

        assert_eq!(layout.stride, 1920);
        assert_eq!(layout.vstride, 1088);
        assert_eq!(layout.plane_sizes(), &[1920 * 1088, 544 * 960, 544 * 960]);
    }

    #[test]
    fn test_fully_planar_chroma_row_padding() {
        // stride 48 -> chroma rows of 24 pad to 32
        let layout = planar(40, 20, PlanarLayout::FullyPlanar).unwrap();
        assert_eq!(layout.stride, 48);
        assert_eq!(layout.vstride, 32);
        assert_eq!(layout.plane_sizes(), &[48 * 32, 16 * 32, 16 * 32]);
    }

    #[test]
    fn test_semi_planar_1280x720() {
        let layout = planar(1280, 720, PlanarLayout::SemiPlanar).unwrap();

        assert_eq!(layout.stride, 1280);
        assert_eq!(layout.vstride, 736);
        assert_eq!(layout.plane_sizes(), &[1280 * 736, 1280 * 384]);
    }

    #[test]
    fn test_framework_native() {
        let yv12 = planar(100, 50, PlanarLayout::FrameworkNative { row_align: 16 }).unwrap();
        assert_eq!(yv12.stride, 112);
        assert_eq!(yv12.vstride, 50);
        assert_eq!(yv12.plane_sizes(), &[112 * 50 * 3 / 2]);

        let nv21 = planar(100, 50, PlanarLayout::FrameworkNative { row_align: 1 }).unwrap();
        assert_eq!(nv21.stride, 100);
        assert_eq!(nv21.plane_sizes(), &[7500]);
    }

    #[test]
    fn test_packed_rejects_bad_page_size() {
        for page_size in [0, 3, 4097] {
            assert!(matches!(
                packed(100, 100, rgba(), page_size),
                Err(GrallocError::InvalidArgument { .. })
            ));
        }
    }

    #[test]
    fn test_framework_native_rejects_zero_row_align() {
        let result = planar(100, 50, PlanarLayout::FrameworkNative { row_align: 0 });
        assert!(matches!(result, Err(GrallocError::InvalidArgument { .. })));
    }

    /// A single-row semi-planar buffer has no chroma rows: h / 2 == 0 aligns to 0
    #[test]
    fn test_semi_planar_single_row_has_empty_chroma() {
        let layout = planar(64, 1, PlanarLayout::SemiPlanar).unwrap();

        assert_eq!(layout.vstride, 32);
        assert_eq!(layout.plane_sizes(), &[64 * 32, 0]);
        assert_eq!(layout.total_size(), 2048);
    }

    #[test]
    fn test_overflow_is_invalid_argument() {
        let result = packed(u32::MAX, u32::MAX, rgba(), PAGE);
        if usize::BITS <= 64 {
            assert!(matches!(result, Err(GrallocError::InvalidArgument { .. })));
        }
    }
}
