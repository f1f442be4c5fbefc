//! Allocation plan files
//!
//! A plan is a TOML file listing the buffers a pipeline needs:
//!
//! ```toml
//! [allocator]
//! page_size = 4096
//!
//! [[buffer]]
//! name = "preview"
//! width = 1920
//! height = 1080
//! format = "YCbCr_420_SP"
//! usage = ["HW_CAMERA_WRITE", "HW_TEXTURE"]
//! count = 4
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use gralloc::{AllocRequest, GrallocConfig, PixelFormat, UsageFlags};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    #[serde(default)]
    pub allocator: AllocatorSection,

    #[serde(default, rename = "buffer")]
    pub buffers: Vec<BufferSpec>,
}

/// Overrides applied on top of the default allocator configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocatorSection {
    pub page_size: Option<usize>,
    pub plane_align: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: String,

    #[serde(default)]
    pub usage: Vec<String>,

    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid plan {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn config(&self) -> GrallocConfig {
        let mut config = GrallocConfig::default();
        if let Some(page_size) = self.allocator.page_size {
            config.page_size = page_size;
        }
        if let Some(plane_align) = self.allocator.plane_align {
            config.plane_align = plane_align;
        }
        config
    }
}

impl BufferSpec {
    pub fn request(&self) -> Result<AllocRequest> {
        let format: PixelFormat = self
            .format
            .parse()
            .with_context(|| format!("Buffer '{}'", self.name))?;

        let mut usage = UsageFlags::empty();
        for name in &self.usage {
            usage |= parse_usage(name).with_context(|| format!("Buffer '{}'", self.name))?;
        }

        Ok(AllocRequest::new(self.width, self.height, format, usage))
    }
}

/// Parse usage flags: names joined by `|`, or a decimal / `0x` hex value
pub fn parse_usage(s: &str) -> Result<UsageFlags> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let bits = u32::from_str_radix(hex, 16).context("Invalid hex usage")?;
        return Ok(UsageFlags::from_bits_retain(bits));
    }
    if let Ok(bits) = s.parse::<u32>() {
        return Ok(UsageFlags::from_bits_retain(bits));
    }

    let mut usage = UsageFlags::empty();
    for name in s.split('|').map(str::trim).filter(|n| !n.is_empty()) {
        usage |= UsageFlags::from_name(&name.to_ascii_uppercase())
            .with_context(|| format!("Unknown usage flag `{}`", name))?;
    }
    Ok(usage)
}
