//! Format catalog - per-format plane layout rules
//!
//! Every known pixel format tag maps to exactly one [`FormatClass`]. Packed
//! formats carry their bytes per pixel; planar formats carry their plane
//! topology and the alignment rules of its planes. Dispatch on the class is
//! explicit, so a tag can never be read as both packed and planar.

use core::fmt;
use core::str::FromStr;

use static_assertions::const_assert;
use thiserror::Error;

/// Row alignment (in bytes) of packed formats and of every luma plane
pub const ROW_ALIGN: usize = 16;

/// Vertical alignment of packed formats and of fully-planar luma
pub const VERTICAL_ALIGN: usize = 16;

/// Vertical alignment of semi-planar luma and chroma planes
pub const SEMI_PLANAR_VERTICAL_ALIGN: usize = 32;

/// Row alignment of each fully-planar chroma plane
pub const CHROMA_ROW_ALIGN: usize = 16;

const_assert!(ROW_ALIGN.is_power_of_two());
const_assert!(VERTICAL_ALIGN.is_power_of_two());
const_assert!(SEMI_PLANAR_VERTICAL_ALIGN.is_power_of_two());
const_assert!(CHROMA_ROW_ALIGN.is_power_of_two());

/// Pixel format tag as used by the host graphics framework
///
/// The tag space is open: values outside the catalog are representable and
/// are rejected at allocation time with `UnsupportedFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixelFormat(u32);

impl PixelFormat {
    pub const RGBA_8888: Self = Self(0x1);
    pub const RGBX_8888: Self = Self(0x2);
    pub const RGB_888: Self = Self(0x3);
    pub const RGB_565: Self = Self(0x4);
    pub const BGRA_8888: Self = Self(0x5);
    pub const RGBA_5551: Self = Self(0x6);
    pub const RGBA_4444: Self = Self(0x7);
    pub const RAW_SENSOR: Self = Self(0x20);
    pub const BLOB: Self = Self(0x21);

    /// Framework NV21 (no vertical padding)
    pub const YCRCB_420_SP: Self = Self(0x11);
    /// Framework YV12 (no vertical padding)
    pub const YV12: Self = Self(0x3231_5659);

    /// Vendor NV12
    pub const YCBCR_420_SP: Self = Self(0x105);
    /// Vendor NV12, macroblock tiled
    pub const YCBCR_420_SP_TILED: Self = Self(0x107);
    /// Vendor NV21 with padded planes
    pub const EXYNOS_YCRCB_420_SP: Self = Self(0x110);
    /// Vendor YV12 with three separately allocated planes
    pub const EXYNOS_YV12: Self = Self(0x11C);

    const NAMES: [(Self, &'static str); 15] = [
        (Self::RGBA_8888, "RGBA_8888"),
        (Self::RGBX_8888, "RGBX_8888"),
        (Self::RGB_888, "RGB_888"),
        (Self::RGB_565, "RGB_565"),
        (Self::BGRA_8888, "BGRA_8888"),
        (Self::RGBA_5551, "RGBA_5551"),
        (Self::RGBA_4444, "RGBA_4444"),
        (Self::RAW_SENSOR, "RAW_SENSOR"),
        (Self::BLOB, "BLOB"),
        (Self::YCRCB_420_SP, "YCrCb_420_SP"),
        (Self::YV12, "YV12"),
        (Self::YCBCR_420_SP, "YCbCr_420_SP"),
        (Self::YCBCR_420_SP_TILED, "YCbCr_420_SP_TILED"),
        (Self::EXYNOS_YCRCB_420_SP, "EXYNOS_YCrCb_420_SP"),
        (Self::EXYNOS_YV12, "EXYNOS_YV12"),
    ];

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Catalog name of this format, if known
    pub fn name(self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|(format, _)| *format == self)
            .map(|(_, name)| *name)
    }

    /// All formats in the catalog with their names
    pub fn catalog() -> impl Iterator<Item = (PixelFormat, &'static str)> {
        Self::NAMES.iter().copied()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#x})", name, self.0),
            None => write!(f, "{:#x}", self.0),
        }
    }
}

/// Error parsing a pixel format name or number
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown pixel format `{0}`")]
pub struct ParseFormatError(pub String);

impl FromStr for PixelFormat {
    type Err = ParseFormatError;

    /// Accepts a catalog name (case-insensitive), a decimal tag, or a `0x` hex tag
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some((format, _)) = Self::NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
        {
            return Ok(*format);
        }

        let raw = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => s.parse::<u32>(),
        };

        raw.map(Self).map_err(|_| ParseFormatError(s.to_string()))
    }
}

/// Layout rule of a packed (interleaved) format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedLayout {
    pub bytes_per_pixel: usize,
}

/// Plane topology of a planar (YUV) format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanarLayout {
    /// Luma, Cr and Cb in three separate allocations
    FullyPlanar,

    /// Luma and interleaved chroma in two separate allocations
    SemiPlanar,

    /// Framework 4:2:0 format stored in one contiguous allocation
    ///
    /// `row_align` is 1 when the stride is the plain width.
    FrameworkNative { row_align: usize },
}

impl PlanarLayout {
    /// Number of backing resources a buffer of this layout owns
    pub fn plane_count(self) -> usize {
        match self {
            PlanarLayout::FullyPlanar => 3,
            PlanarLayout::SemiPlanar => 2,
            PlanarLayout::FrameworkNative { .. } => 1,
        }
    }

    /// Row alignment of the luma plane, in pixels
    pub fn row_align(self) -> usize {
        match self {
            PlanarLayout::FullyPlanar | PlanarLayout::SemiPlanar => ROW_ALIGN,
            PlanarLayout::FrameworkNative { row_align } => row_align,
        }
    }

    /// Vertical alignment of the luma plane, in rows
    pub fn luma_vertical_align(self) -> usize {
        match self {
            PlanarLayout::FullyPlanar => VERTICAL_ALIGN,
            PlanarLayout::SemiPlanar => SEMI_PLANAR_VERTICAL_ALIGN,
            PlanarLayout::FrameworkNative { .. } => 1,
        }
    }

    /// Vertical alignment of the chroma plane, when it is aligned on its own
    pub fn chroma_vertical_align(self) -> Option<usize> {
        match self {
            PlanarLayout::SemiPlanar => Some(SEMI_PLANAR_VERTICAL_ALIGN),
            _ => None,
        }
    }
}

/// Result of looking a format up in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    Packed(PackedLayout),
    Planar(PlanarLayout),
    Unsupported,
}

/// Classify a format tag
pub fn classify(format: PixelFormat) -> FormatClass {
    let packed = |bytes_per_pixel| FormatClass::Packed(PackedLayout { bytes_per_pixel });

    match format {
        PixelFormat::RGBA_8888 | PixelFormat::RGBX_8888 | PixelFormat::BGRA_8888 => packed(4),
        PixelFormat::RGB_888 => packed(3),
        PixelFormat::RGB_565
        | PixelFormat::RGBA_5551
        | PixelFormat::RGBA_4444
        | PixelFormat::RAW_SENSOR => packed(2),
        PixelFormat::BLOB => packed(1),

        PixelFormat::EXYNOS_YV12 => FormatClass::Planar(PlanarLayout::FullyPlanar),
        PixelFormat::EXYNOS_YCRCB_420_SP
        | PixelFormat::YCBCR_420_SP
        | PixelFormat::YCBCR_420_SP_TILED => FormatClass::Planar(PlanarLayout::SemiPlanar),
        PixelFormat::YV12 => {
            FormatClass::Planar(PlanarLayout::FrameworkNative { row_align: ROW_ALIGN })
        }
        PixelFormat::YCRCB_420_SP => {
            FormatClass::Planar(PlanarLayout::FrameworkNative { row_align: 1 })
        }

        _ => FormatClass::Unsupported,
    }
}

/// Packed layout of `format`, or `None` if it is not a packed format
pub fn packed_layout(format: PixelFormat) -> Option<PackedLayout> {
    match classify(format) {
        FormatClass::Packed(layout) => Some(layout),
        _ => None,
    }
}

/// Planar layout of `format`, or `None` if it is not a planar format
pub fn planar_layout(format: PixelFormat) -> Option<PlanarLayout> {
    match classify(format) {
        FormatClass::Planar(layout) => Some(layout),
        _ => None,
    }
}
