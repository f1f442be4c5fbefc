//! Usage flags and heap selection
//!
//! Callers describe how a buffer will be used; this module turns that into
//! the pool selector and the per-allocation flags sent to the pool service.

use bitflags::bitflags;
use ion_platform::{HeapMask, IonFlags};

use crate::config::GrallocConfig;
use crate::format::{FormatClass, PlanarLayout};

bitflags! {
    /// Usage intent of a buffer, in the host framework's bit layout
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UsageFlags: u32 {
        const SW_READ_RARELY   = 0x0000_0002;
        const SW_READ_OFTEN    = 0x0000_0003;
        const SW_READ_MASK     = 0x0000_000F;

        const SW_WRITE_RARELY  = 0x0000_0020;
        const SW_WRITE_OFTEN   = 0x0000_0030;
        const SW_WRITE_MASK    = 0x0000_00F0;

        const HW_TEXTURE       = 0x0000_0100;
        const HW_RENDER        = 0x0000_0200;
        const HW_2D            = 0x0000_0400;
        const HW_COMPOSER      = 0x0000_0800;
        const HW_FB            = 0x0000_1000;

        /// Buffer holds protected content; must come from the restricted pool
        const PROTECTED        = 0x0000_4000;

        const HW_VIDEO_ENCODER = 0x0001_0000;
        const HW_CAMERA_WRITE  = 0x0002_0000;
        const HW_CAMERA_READ   = 0x0004_0000;
    }
}

impl UsageFlags {
    /// Software reads are frequent enough to warrant cached mappings
    pub fn reads_often(self) -> bool {
        self.intersection(UsageFlags::SW_READ_MASK) == UsageFlags::SW_READ_OFTEN
    }
}

/// Pool selector for a buffer of `class` with `usage`
///
/// Framework-native 4:2:0 always comes from the framework heap. Everything
/// else uses the restricted pool for protected content and the general pool
/// otherwise.
pub fn select_heap(config: &GrallocConfig, class: FormatClass, usage: UsageFlags) -> HeapMask {
    match class {
        FormatClass::Planar(PlanarLayout::FrameworkNative { .. }) => config.framework_heap,
        _ if usage.contains(UsageFlags::PROTECTED) => config.protected_heap,
        _ => config.general_heap,
    }
}

/// Allocation flags derived from `usage`
pub fn ion_flags(usage: UsageFlags) -> IonFlags {
    let mut flags = IonFlags::empty();

    if usage.reads_often() {
        flags |= IonFlags::CACHED;
    }
    if usage.contains(UsageFlags::PROTECTED) {
        flags |= IonFlags::EXYNOS_VIDEO;
    }

    flags
}
