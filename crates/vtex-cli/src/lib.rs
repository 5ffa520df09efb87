//! # vtex CLI
//!
//! Command-line driver for the virtual texture streamer.
//!
//! ## Commands
//! - `simulate` - Stream a scrolling scene with synthetic feedback
//! - `config` - Write the default configuration as JSON

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::IVec2;
use vtex_core::{FrameClock, FrameIndex, Stopwatch};
use vtex_renderer::{
    FeedbackBuffer, FeedbackSample, FrameEvents, PageId, StreamingStats, TileRenderJob,
    TileRenderStatus, TileRenderer, VirtualTextureConfig, VirtualTextureSystem,
};

/// vtex virtual texture CLI
#[derive(Parser)]
#[command(name = "vtex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Stream a scrolling scene with synthetic feedback
    Simulate {
        /// Number of frames to run
        #[arg(short, long, default_value = "240")]
        frames: u64,

        /// Scroll the view to follow the camera every N frames (0 = never)
        #[arg(short, long, default_value = "16")]
        scroll_every: u64,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Frames between a capture request and its readback
        #[arg(short, long, default_value = "1")]
        latency: u64,
    },

    /// Write the default configuration as JSON
    Config {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match cli.command {
        Commands::Simulate {
            frames,
            scroll_every,
            config,
            latency,
        } => {
            let config = load_config(config.as_deref())?;
            log::info!("Simulating {} frames...", frames);
            log::info!("  Table: {} pages, atlas: {} tiles", config.table_size, config.tile_capacity());
            log::info!("  Scroll every: {} frames, feedback latency: {} frames", scroll_every, latency);

            let summary = Simulation::new(config, scroll_every, latency)?.run(frames)?;

            let stats = &summary.stats;
            log::info!(
                "Simulation complete in {:.2} ms ({:.3} ms/frame)",
                summary.elapsed_ms,
                summary.average_frame_ms
            );
            log::info!("  Feedback consumed: {}", stats.feedback_consumed);
            log::info!("  Activations: {} ({} fallbacks)", stats.pages_activated, stats.fallbacks);
            log::info!("  Tiles rendered: {} ({} texels)", stats.tiles_completed, summary.texels_rendered);
            log::info!("  Evictions: {}", stats.evictions);
            log::info!("  Lookup rebuilds: {}", stats.lookup_rebuilds);
            log::info!("  Resident pages: {}", summary.resident_pages);
        }

        Commands::Config { output } => {
            let json = serde_json::to_string_pretty(&VirtualTextureConfig::default())?;
            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    log::info!("Default configuration written to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
    }

    Ok(())
}

/// Load a configuration file, or the defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<VirtualTextureConfig> {
    let config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => VirtualTextureConfig::default(),
    };
    config.validate().context("invalid virtual texture configuration")?;
    Ok(config)
}

/// Tile renderer that records what it was asked to draw
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub rendered: Vec<PageId>,
    pub texels: u64,
}

impl TileRenderer for RecordingRenderer {
    fn render_tile(&mut self, job: &TileRenderJob) -> TileRenderStatus {
        log::trace!("Rendering {} into slot {}", job.page, job.slot.0);
        self.rendered.push(job.page);
        self.texels += job.atlas_rect.area() as u64;
        TileRenderStatus::Completed
    }
}

/// Result of a simulation run
#[derive(Debug, Clone)]
pub struct SimulationSummary {
    pub frames: u64,
    pub stats: StreamingStats,
    pub resident_pages: usize,
    pub texels_rendered: u64,
    pub elapsed_ms: f64,
    /// Rolling average over the last frames
    pub average_frame_ms: f64,
}

/// A camera drifting across the table, seen through synthetic feedback
pub struct Simulation {
    system: VirtualTextureSystem,
    renderer: RecordingRenderer,
    /// Readbacks waiting to be delivered, with the frame they land on
    readbacks: VecDeque<(FrameIndex, FeedbackBuffer)>,
    latency: u64,
    scroll_every: u64,
    /// Camera position in absolute table units
    camera: IVec2,
}

impl Simulation {
    /// Side of the visible window in mip-0 pages
    const WINDOW: i32 = 24;

    pub fn new(config: VirtualTextureConfig, scroll_every: u64, latency: u64) -> Result<Self> {
        let center = (config.table_size / 2) as i32;
        Ok(Self {
            system: VirtualTextureSystem::new(config).context("failed to create virtual texture")?,
            renderer: RecordingRenderer::default(),
            readbacks: VecDeque::new(),
            latency,
            scroll_every,
            camera: IVec2::splat(center),
        })
    }

    pub fn system(&self) -> &VirtualTextureSystem {
        &self.system
    }

    /// Run `frames` updates
    pub fn run(mut self, frames: u64) -> Result<SimulationSummary> {
        let stopwatch = Stopwatch::new();
        let mut clock = FrameClock::new();
        for _ in 0..frames {
            let frame_time = Stopwatch::new();
            self.step()?;
            clock.tick(frame_time.elapsed().as_secs_f64());
        }

        Ok(SimulationSummary {
            frames,
            stats: self.system.stats().clone(),
            resident_pages: self.system.page_table().resident_count(),
            texels_rendered: self.renderer.texels,
            elapsed_ms: stopwatch.elapsed_ms(),
            average_frame_ms: clock.average_frame_time_ms(),
        })
    }

    /// Advance one frame
    pub fn step(&mut self) -> Result<()> {
        let frame = self.system.frame() + 1;
        while self.readbacks.front().is_some_and(|(due, _)| *due <= frame) {
            if let Some((_, buffer)) = self.readbacks.pop_front() {
                self.system.feedback_sender().complete(buffer);
            }
        }

        let report = self.system.update(&mut self.renderer);
        if report.events.contains(FrameEvents::CAPTURE_REQUESTED) {
            let buffer = self.capture()?;
            self.readbacks.push_back((frame + self.latency.max(1), buffer));
        }

        if frame % 4 == 0 {
            self.camera.x += 1;
        }
        if self.scroll_every > 0 && frame % self.scroll_every == 0 {
            let delta = self.camera - self.view_center();
            self.system.change_view_rect(delta);
        }

        log::debug!(
            "Frame {}: {} activated, {} dispatched, {} queued",
            frame,
            report.activated,
            report.dispatched,
            self.system.page_table().requests().len()
        );
        Ok(())
    }

    /// Absolute table position at the middle of the view
    fn view_center(&self) -> IVec2 {
        self.system.view_origin() + IVec2::splat((self.system.config().table_size / 2) as i32)
    }

    /// Feedback for the current camera: pages near the camera at mip 0,
    /// coarser with distance.
    fn capture(&self) -> Result<FeedbackBuffer> {
        let config = self.system.config();
        let table_size = config.table_size as i32;
        let max_mip = config.max_mip() as i32;
        let camera = self.camera - self.system.view_origin();

        let mut samples = Vec::new();
        let half = Self::WINDOW / 2;
        for dy in (-half..half).step_by(2) {
            for dx in (-half..half).step_by(2) {
                let page = camera + IVec2::new(dx, dy);
                if page.x < 0 || page.y < 0 || page.x >= table_size || page.y >= table_size {
                    continue;
                }
                let distance = dx.abs().max(dy.abs()).max(1);
                let mip = (distance.ilog2() as i32 - 1).clamp(0, max_mip);
                samples.push(FeedbackSample::new(page.x as u32, page.y as u32, mip as u32));
            }
        }

        FeedbackBuffer::encode(config.feedback_format, &samples).context("failed to encode feedback")
    }
}
