//! gralloc-probe - inspect and exercise the graphics buffer allocator
//!
//! Commands:
//! - `gralloc-probe formats` - List the format catalog
//! - `gralloc-probe layout` - Print the layout of one buffer
//! - `gralloc-probe alloc` - Allocate (and free) buffers
//! - `gralloc-probe plan <file>` - Run every allocation in a TOML plan
//!
//! Allocations use the in-process mock pool unless `--device` is given
//! (requires the `runtime` feature).

mod plan;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use gralloc::format::{classify, FormatClass, PlanarLayout};
use gralloc::{
    buffer_layout, AllocRequest, BufferHandle, Gralloc, GrallocConfig, PixelFormat, PoolService,
    ViewMapper,
};
use ion_platform::mock::MockIon;

use crate::plan::{parse_usage, Plan};

#[derive(Parser)]
#[command(name = "gralloc-probe")]
#[command(version)]
#[command(about = "Inspect buffer layouts and exercise the gralloc allocator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct BufferArgs {
    /// Width in pixels
    #[arg(short = 'W', long)]
    width: u32,

    /// Height in pixels
    #[arg(short = 'H', long)]
    height: u32,

    /// Format name (e.g. RGBA_8888, EXYNOS_YV12) or numeric tag
    #[arg(short, long)]
    format: String,

    /// Usage flags: names joined by `|`, or a numeric value
    #[arg(short, long, default_value = "0")]
    usage: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List known pixel formats
    Formats,

    /// Print the layout a buffer would get
    Layout {
        #[command(flatten)]
        buffer: BufferArgs,

        /// Page size used to round packed buffers
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Allocate buffers, print their handles, then free them
    Alloc {
        #[command(flatten)]
        buffer: BufferArgs,

        /// Number of buffers
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        /// ION device node (default: mock pool)
        #[arg(long)]
        device: Option<PathBuf>,
    },

    /// Run every allocation in a plan file
    Plan {
        /// Plan file (TOML)
        path: PathBuf,

        /// ION device node (default: mock pool)
        #[arg(long)]
        device: Option<PathBuf>,
    },
}

impl BufferArgs {
    fn request(&self) -> Result<AllocRequest> {
        let format: PixelFormat = self.format.parse()?;
        let usage = parse_usage(&self.usage)?;
        Ok(AllocRequest::new(self.width, self.height, format, usage))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Formats => show_formats(),

        Commands::Layout { buffer, page_size } => {
            let mut config = GrallocConfig::default();
            if let Some(page_size) = page_size {
                config.page_size = page_size;
            }
            config.validate()?;
            show_layout(&config, &buffer.request()?)?;
        }

        Commands::Alloc {
            buffer,
            count,
            device,
        } => {
            let request = buffer.request()?;
            let batch = vec![("cli".to_string(), request, count)];
            with_backend(device, GrallocConfig::default(), |gralloc| run_batch(gralloc, &batch))?;
        }

        Commands::Plan { path, device } => {
            let plan = Plan::load(&path)?;
            let mut batch = Vec::with_capacity(plan.buffers.len());
            for buffer in &plan.buffers {
                batch.push((buffer.name.clone(), buffer.request()?, buffer.count));
            }

            log::info!("Plan {}: {} buffer kinds", path.display(), batch.len());
            with_backend(device, plan.config(), |gralloc| run_batch(gralloc, &batch))?;
        }
    }

    Ok(())
}

/// Named request repeated `count` times
type Batch = [(String, AllocRequest, usize)];

/// Object-safe view of a `Gralloc` context used by the commands
trait BatchRunner {
    fn allocate(&self, request: &AllocRequest) -> gralloc::Result<gralloc::Allocation>;
    fn free(&self, handle: BufferHandle) -> gralloc::Result<()>;
    fn live(&self) -> gralloc::AllocatorStats;
}

impl<P: PoolService, M: ViewMapper> BatchRunner for Gralloc<P, M> {
    fn allocate(&self, request: &AllocRequest) -> gralloc::Result<gralloc::Allocation> {
        Gralloc::allocate(self, request)
    }

    fn free(&self, handle: BufferHandle) -> gralloc::Result<()> {
        Gralloc::free(self, handle)
    }

    fn live(&self) -> gralloc::AllocatorStats {
        self.stats()
    }
}

fn with_backend<F>(device: Option<PathBuf>, config: GrallocConfig, f: F) -> Result<()>
where
    F: FnOnce(&dyn BatchRunner) -> Result<()>,
{
    match device {
        None => {
            println!("{} Using mock pool", "ℹ".blue());
            let ion = Arc::new(MockIon::new());
            let gralloc = Gralloc::new(ion.clone(), ion.clone(), config)?;
            f(&gralloc)?;
            println!(
                "  Pool traffic: {} allocations, {} releases, {} live",
                ion.allocate_calls(),
                ion.release_calls(),
                ion.live_resources()
            );
            Ok(())
        }

        #[cfg(all(feature = "runtime", target_os = "linux"))]
        Some(path) => {
            use ion_platform::device::{IonDevice, MmapMapper};

            let path = path.to_string_lossy();
            println!("{} Using ION device {}", "ℹ".blue(), path);
            let ion = IonDevice::open_path(&path)?;
            let gralloc = Gralloc::new(ion, MmapMapper, config)?;
            f(&gralloc)
        }

        #[cfg(not(all(feature = "runtime", target_os = "linux")))]
        Some(path) => {
            anyhow::bail!(
                "Cannot use {}: built without ION device support (enable the `runtime` feature)",
                path.display()
            )
        }
    }
}

fn run_batch(gralloc: &dyn BatchRunner, batch: &Batch) -> Result<()> {
    let mut held = Vec::new();
    let allocated = allocate_batch(gralloc, batch, &mut held);

    if allocated.is_ok() {
        let stats = gralloc.live();
        println!(
            "\n{} {} buffers live, {} backing resources",
            "✓".green(),
            stats.live_handles,
            stats.live_resources
        );
    }

    // Handles from before a failed allocation are freed too
    let freed = free_all(gralloc, held);
    allocated.and(freed)
}

fn allocate_batch(
    gralloc: &dyn BatchRunner,
    batch: &Batch,
    held: &mut Vec<BufferHandle>,
) -> Result<()> {
    for (name, request, count) in batch {
        for i in 0..*count {
            let allocation = gralloc
                .allocate(request)
                .with_context(|| format!("Allocating {} #{}", name, i))?;

            print_handle(name, i, &allocation.handle);
            held.push(allocation.handle);
        }
    }

    Ok(())
}

/// Free every handle, reporting the first failure
fn free_all(gralloc: &dyn BatchRunner, held: Vec<BufferHandle>) -> Result<()> {
    let mut first_error = None;

    for handle in held {
        if let Err(e) = gralloc.free(handle) {
            log::error!("Freeing buffer failed: {}", e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(anyhow::Error::new(e).context("Freeing buffer")),
        None => Ok(()),
    }
}

fn print_handle(name: &str, index: usize, handle: &BufferHandle) {
    let planes: Vec<String> = handle.planes().iter().map(|r| r.to_string()).collect();
    let view = handle
        .view()
        .map(|v| format!("{:#x}", v.base))
        .unwrap_or_else(|| "-".to_string());

    println!(
        "{} {}#{}: {}x{} {}  stride {}  vstride {}  size {}  planes [{}]  view {}",
        "▸".cyan(),
        name.bold(),
        index,
        handle.width(),
        handle.height(),
        handle.format(),
        handle.stride(),
        handle.vstride(),
        handle.size(),
        planes.join(", "),
        view
    );
}

fn show_formats() {
    println!("{}", "Format catalog".bold().green());

    for (format, name) in PixelFormat::catalog() {
        let class = match classify(format) {
            FormatClass::Packed(layout) => {
                format!("packed, {} bytes/pixel", layout.bytes_per_pixel)
            }
            FormatClass::Planar(PlanarLayout::FullyPlanar) => "planar, 3 planes".to_string(),
            FormatClass::Planar(PlanarLayout::SemiPlanar) => "semi-planar, 2 planes".to_string(),
            FormatClass::Planar(PlanarLayout::FrameworkNative { row_align }) => {
                format!("framework 4:2:0, contiguous, row align {}", row_align)
            }
            FormatClass::Unsupported => "unsupported".to_string(),
        };
        println!("  {:<22} {:#010x}  {}", name, format.raw(), class);
    }
}

fn show_layout(config: &GrallocConfig, request: &AllocRequest) -> Result<()> {
    let layout = buffer_layout(config, request.width, request.height, request.format)?;

    println!(
        "{} {}x{} {}",
        "Layout".bold().green(),
        request.width,
        request.height,
        request.format
    );
    println!("  Bytes per row: {}", layout.bytes_per_row);
    println!("  Stride:        {} px", layout.stride);
    println!("  Vstride:       {} rows", layout.vstride);
    for (i, size) in layout.plane_sizes().iter().enumerate() {
        println!("  Plane {}:       {} bytes", i, size);
    }
    println!("  Total:         {} bytes", layout.total_size());

    let class = classify(request.format);
    let heap = gralloc::usage::select_heap(config, class, request.usage);
    let flags = gralloc::usage::ion_flags(request.usage);
    println!("  Heap mask:     {:#x}", heap.bits());
    println!("  Pool flags:    {:#x}", flags.bits());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_gralloc(ion: &Arc<MockIon>) -> Gralloc<Arc<MockIon>, Arc<MockIon>> {
        Gralloc::new(ion.clone(), ion.clone(), GrallocConfig::default()).unwrap()
    }

    fn batch(entries: &[(&str, PixelFormat, usize)]) -> Vec<(String, AllocRequest, usize)> {
        entries
            .iter()
            .map(|&(name, format, count)| {
                let request = AllocRequest::new(64, 64, format, gralloc::UsageFlags::empty());
                (name.to_string(), request, count)
            })
            .collect()
    }

    #[test]
    fn test_run_batch_frees_everything() {
        let ion = Arc::new(MockIon::new());
        let gralloc = mock_gralloc(&ion);
        let batch = batch(&[
            ("preview", PixelFormat::YCBCR_420_SP, 4),
            ("still", PixelFormat::EXYNOS_YV12, 1),
        ]);

        run_batch(&gralloc, &batch).unwrap();

        assert_eq!(ion.allocate_calls(), 4 * 2 + 3);
        assert_eq!(ion.live_resources(), 0);
        assert_eq!(gralloc.stats(), gralloc::AllocatorStats::default());
    }

    #[test]
    fn test_failed_allocation_frees_earlier_buffers() {
        let ion = Arc::new(MockIon::new());
        let gralloc = mock_gralloc(&ion);
        let batch = batch(&[
            ("preview", PixelFormat::YCBCR_420_SP, 4),
            ("record", PixelFormat::RGBA_8888, 2),
        ]);

        // Preview takes two pool requests per buffer; refuse the first record buffer
        ion.fail_allocation_at(4 * 2 + 1);

        let err = run_batch(&gralloc, &batch).unwrap_err();

        assert!(err.to_string().contains("record #0"), "{}", err);
        assert_eq!(ion.live_resources(), 0);
        assert_eq!(ion.attach_calls(), ion.detach_calls());
        assert_eq!(gralloc.stats(), gralloc::AllocatorStats::default());
    }
}
