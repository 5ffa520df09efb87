//! # vtex Renderer
//!
//! Virtual texture streaming for large, scrollable texture tables.
//!
//! ## Features
//! - LRU-managed physical tile atlas with padded tiles
//! - Per-mip page tables with toroidal (clipmap) scrolling
//! - Coarse-to-fine mip fallback with a pinned root page
//! - De-duplicated, rate-limited page request queue
//! - Asynchronous GPU feedback hand-off
//! - Lookup (indirection) texture generation, CPU rasterized and uploaded with wgpu

pub mod feedback;
pub mod gpu;
pub mod lookup;
pub mod lru;
pub mod page;
pub mod page_level_table;
pub mod page_table;
pub mod request_queue;
pub mod system;
pub mod texture;

pub use feedback::{FeedbackBuffer, FeedbackFormat, FeedbackReceiver, FeedbackSample, FeedbackSender};
pub use gpu::GpuLookupTexture;
pub use lookup::{LookupDraw, LookupInstance, LookupTexture, ShaderParams};
pub use lru::LruCache;
pub use page::{CellRef, PageEntry, PageId, RequestId, Residency};
pub use page_level_table::PageLevelTable;
pub use page_table::PageTable;
pub use request_queue::{LoadRequest, PageRequestQueue, RequestState};
pub use system::{FrameEvents, FrameReport, TileRenderJob, TileRenderStatus, TileRenderer, VirtualTextureSystem};
pub use texture::{TileSlot, TiledTexture};

use glam::UVec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Virtual texture errors
#[derive(Error, Debug)]
pub enum VtError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Feedback buffer length {len} is not a multiple of the {stride}-byte sample stride")]
    FeedbackLength { len: usize, stride: usize },

    #[error("Feedback coordinate {value} does not fit the {format:?} encoding")]
    FeedbackRange { value: u32, format: FeedbackFormat },

    #[error("GPU resource error: {0}")]
    Gpu(String),
}

/// Result type for virtual texture operations
pub type VtResult<T> = Result<T, VtError>;

/// Virtual texture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualTextureConfig {
    /// Page table size in mip-0 pages per axis (power of two)
    pub table_size: u32,
    /// Page/tile content size in texels
    pub tile_size: u32,
    /// Border texels on each side of a tile for bilinear filtering
    pub padding_size: u32,
    /// Physical atlas size in tiles
    pub region_size: UVec2,
    /// Maximum tile renders dispatched per frame
    pub requests_per_frame: usize,
    /// Encoding of the GPU feedback buffer
    pub feedback_format: FeedbackFormat,
}

impl VirtualTextureConfig {
    /// Coarsest mip level; it holds the single root page
    pub fn max_mip(&self) -> u8 {
        self.table_size.max(1).ilog2() as u8
    }

    /// Number of physical tile slots
    pub fn tile_capacity(&self) -> u32 {
        self.region_size.x * self.region_size.y
    }

    /// Size of one tile including padding
    pub fn padded_tile_size(&self) -> u32 {
        self.tile_size + 2 * self.padding_size
    }

    /// Check the configuration for values the streamer cannot work with
    pub fn validate(&self) -> VtResult<()> {
        if !self.table_size.is_power_of_two() {
            return Err(VtError::InvalidConfig(format!(
                "table_size {} is not a power of two",
                self.table_size
            )));
        }
        if self.table_size > 1 << 15 {
            return Err(VtError::InvalidConfig(format!(
                "table_size {} exceeds 32768",
                self.table_size
            )));
        }
        if self.tile_size == 0 {
            return Err(VtError::InvalidConfig("tile_size must be non-zero".into()));
        }
        if self.tile_capacity() < 2 {
            return Err(VtError::InvalidConfig(format!(
                "atlas of {}x{} tiles is too small, need at least 2 slots",
                self.region_size.x, self.region_size.y
            )));
        }
        // Lookup texels store tile coordinates in 8-bit channels.
        if self.region_size.x > 256 || self.region_size.y > 256 {
            return Err(VtError::InvalidConfig(format!(
                "atlas of {}x{} tiles exceeds 256 tiles per axis",
                self.region_size.x, self.region_size.y
            )));
        }
        if self.requests_per_frame == 0 {
            return Err(VtError::InvalidConfig("requests_per_frame must be non-zero".into()));
        }
        if self.table_size - 1 > self.feedback_format.max_coordinate() {
            return Err(VtError::InvalidConfig(format!(
                "{:?} feedback cannot address a {} page table",
                self.feedback_format, self.table_size
            )));
        }
        Ok(())
    }
}

impl Default for VirtualTextureConfig {
    fn default() -> Self {
        Self {
            table_size: 256,
            tile_size: 256,
            padding_size: 4,
            region_size: UVec2::new(8, 8),
            requests_per_frame: 2,
            feedback_format: FeedbackFormat::Rgba8,
        }
    }
}

/// Streaming statistics accumulated since construction or the last reset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingStats {
    /// Updates processed
    pub frames: u64,
    /// Feedback buffers consumed
    pub feedback_consumed: u64,
    /// Feedback buffers dropped as malformed
    pub feedback_dropped: u64,
    /// Page activations that found a resident page (exact or fallback)
    pub pages_activated: u64,
    /// Activations that had to fall back to a coarser mip
    pub fallbacks: u64,
    /// Tile renders handed to the tile renderer
    pub tiles_dispatched: u64,
    /// Tile renders that became resident
    pub tiles_completed: u64,
    /// Resident pages evicted to make room
    pub evictions: u64,
    /// Completions ignored because their request was cancelled
    pub stale_completions: u64,
    /// Lookup texture rebuilds
    pub lookup_rebuilds: u64,
}
