//! Virtual Texture System
//!
//! Owning facade over the streaming pieces. Once per frame [`update`]
//! consumes the latest feedback readback, dispatches tile renders and
//! rebuilds the lookup texture when the visible page set changed.
//!
//! [`update`]: VirtualTextureSystem::update

use bitflags::bitflags;
use glam::IVec2;
use vtex_core::{FrameClock, FrameIndex, IRect, UvTransform};

use crate::feedback::{feedback_channel, FeedbackReceiver, FeedbackSample, FeedbackSender};
use crate::lookup::{LookupDraw, LookupInstance, LookupTexture, ShaderParams};
use crate::page::{PageEntry, PageId, RequestId};
use crate::page_table::PageTable;
use crate::texture::{TileSlot, TiledTexture};
use crate::{StreamingStats, VirtualTextureConfig, VtResult};

/// Everything a tile renderer needs to fill one atlas slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRenderJob {
    /// Pass back to [`VirtualTextureSystem::complete_tile`] for deferred renders
    pub request: RequestId,
    /// View-relative page address
    pub page: PageId,
    pub slot: TileSlot,
    /// Page rect in table units, relative to the view window
    pub page_rect: IRect,
    /// Page rect in table units, in absolute (scrolled) coordinates
    pub world_rect: IRect,
    /// Atlas texel rect including padding
    pub atlas_rect: IRect,
    /// Maps `[0, 1]²` onto the slot's content area in atlas UV
    pub uv: UvTransform,
}

/// Outcome of a tile render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileRenderStatus {
    /// Tile content is written
    Completed,
    /// Rendering continues; report with [`VirtualTextureSystem::complete_tile`]
    Deferred,
}

/// Renders page content into atlas slots
pub trait TileRenderer {
    fn render_tile(&mut self, job: &TileRenderJob) -> TileRenderStatus;
}

impl<F> TileRenderer for F
where
    F: FnMut(&TileRenderJob) -> TileRenderStatus,
{
    fn render_tile(&mut self, job: &TileRenderJob) -> TileRenderStatus {
        self(job)
    }
}

bitflags! {
    /// What happened during one update
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameEvents: u8 {
        /// A feedback readback was consumed
        const FEEDBACK_CONSUMED = 0b0001;
        /// The caller should capture and read back a new feedback buffer
        const CAPTURE_REQUESTED = 0b0010;
        /// At least one tile render was dispatched
        const TILES_DISPATCHED = 0b0100;
        /// The lookup texture changed and needs uploading
        const LOOKUP_UPDATED = 0b1000;
    }
}

/// Summary of one update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: FrameIndex,
    pub events: FrameEvents,
    /// Feedback samples that resolved to a resident page
    pub activated: usize,
    /// Of those, samples served by a coarser ancestor
    pub fallbacks: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub evicted: usize,
}

/// Virtual texture streaming context
pub struct VirtualTextureSystem {
    config: VirtualTextureConfig,
    tiles: TiledTexture,
    page_table: PageTable,
    lookup: LookupTexture,
    draws: Vec<LookupDraw>,
    feedback: FeedbackReceiver,
    sender: FeedbackSender,
    /// A capture was requested and its readback has not been consumed
    capture_in_flight: bool,
    /// View origin when the in-flight capture was requested
    capture_origin: IVec2,
    /// The in-flight capture predates a reset
    discard_capture: bool,
    lookup_dirty: bool,
    /// Accumulated scroll in table units
    view_origin: IVec2,
    clock: FrameClock,
    stats: StreamingStats,
}

impl VirtualTextureSystem {
    /// Create a streaming context; the root page is pinned immediately.
    pub fn new(config: VirtualTextureConfig) -> VtResult<Self> {
        config.validate()?;

        let mut tiles = TiledTexture::from_config(&config);
        let page_table = PageTable::new(config.table_size, config.requests_per_frame, &mut tiles);
        let (sender, feedback) = feedback_channel();

        log::info!(
            "Virtual texture: {}x{} page table ({} mips), {}x{} atlas of {}px tiles",
            config.table_size,
            config.table_size,
            config.max_mip() + 1,
            config.region_size.x,
            config.region_size.y,
            config.tile_size
        );

        Ok(Self {
            lookup: LookupTexture::new(config.table_size),
            draws: Vec::new(),
            feedback,
            sender,
            capture_in_flight: false,
            capture_origin: IVec2::ZERO,
            discard_capture: false,
            lookup_dirty: true,
            view_origin: IVec2::ZERO,
            clock: FrameClock::new(),
            stats: StreamingStats::default(),
            config,
            tiles,
            page_table,
        })
    }

    /// Run one frame of streaming.
    pub fn update<R>(&mut self, renderer: &mut R) -> FrameReport
    where
        R: TileRenderer + ?Sized,
    {
        let frame = self.clock.advance();
        let _span = tracing::debug_span!("vt_update", frame).entered();
        self.stats.frames += 1;

        let mut report = FrameReport {
            frame,
            ..Default::default()
        };

        if let Some(buffer) = self.feedback.try_take() {
            self.capture_in_flight = false;
            if std::mem::take(&mut self.discard_capture) {
                log::debug!("Discarding feedback captured before reset");
            } else {
                match buffer.unique_samples() {
                    Ok(samples) => {
                        self.load_pages(frame, &samples, &mut report);
                        report.events |= FrameEvents::FEEDBACK_CONSUMED;
                    }
                    Err(err) => {
                        log::warn!("Dropping feedback buffer: {err}");
                        self.stats.feedback_dropped += 1;
                    }
                }
            }
        }

        if !self.capture_in_flight {
            self.capture_in_flight = true;
            self.capture_origin = self.view_origin;
            report.events |= FrameEvents::CAPTURE_REQUESTED;
        }

        self.dispatch_tiles(renderer, &mut report);

        if self.lookup_dirty {
            self.rebuild_lookup();
            report.events |= FrameEvents::LOOKUP_UPDATED;
        }

        tracing::debug!(
            target: "vtex",
            frame,
            activated = report.activated,
            dispatched = report.dispatched,
            completed = report.completed,
            queued = self.page_table.requests().len(),
            "Streaming update"
        );
        report
    }

    /// Activate every page named by the feedback samples
    fn load_pages(&mut self, frame: FrameIndex, samples: &[FeedbackSample], report: &mut FrameReport) {
        self.page_table.begin_activation(frame);
        self.stats.feedback_consumed += 1;

        // Samples address the view as it was when the capture was requested.
        let shift = self.view_origin.as_i64vec2() - self.capture_origin.as_i64vec2();

        for sample in samples {
            let (Ok(x), Ok(y), Ok(mip)) = (
                u32::try_from(sample.x as i64 - shift.x),
                u32::try_from(sample.y as i64 - shift.y),
                u8::try_from(sample.mip),
            ) else {
                continue;
            };

            if let Some(entry) = self.page_table.activate_page(x, y, mip, &mut self.tiles) {
                report.activated += 1;
                if entry.mip() != mip {
                    report.fallbacks += 1;
                }
            }
        }

        self.stats.pages_activated += report.activated as u64;
        self.stats.fallbacks += report.fallbacks as u64;
        self.lookup_dirty = true;
    }

    fn dispatch_tiles<R>(&mut self, renderer: &mut R, report: &mut FrameReport)
    where
        R: TileRenderer + ?Sized,
    {
        for id in self.page_table.requests_mut().update() {
            let Some(dispatch) = self.page_table.dispatch(id, &mut self.tiles) else {
                log::debug!("No free tile slot for request {}", id.0);
                continue;
            };

            report.dispatched += 1;
            report.events |= FrameEvents::TILES_DISPATCHED;
            self.stats.tiles_dispatched += 1;
            if let Some(evicted) = dispatch.evicted {
                log::debug!(
                    "Evicted {} from slot {}",
                    self.page_table.page_id(evicted),
                    dispatch.slot.0
                );
                report.evicted += 1;
                self.stats.evictions += 1;
                self.lookup_dirty = true;
            }

            let page_rect = dispatch.request.page.table_rect();
            let job = TileRenderJob {
                request: id,
                page: dispatch.request.page,
                slot: dispatch.slot,
                page_rect,
                world_rect: page_rect.translate(self.view_origin),
                atlas_rect: self.tiles.padded_rect(dispatch.slot),
                uv: self.tiles.uv_transform(dispatch.slot),
            };

            if renderer.render_tile(&job) == TileRenderStatus::Completed && self.complete_tile(id) {
                report.completed += 1;
            }
        }
    }

    /// Report a finished tile render. Returns `false` for stale requests,
    /// which are ignored.
    pub fn complete_tile(&mut self, request: RequestId) -> bool {
        match self.page_table.complete(request, &mut self.tiles) {
            Some(cell) => {
                log::trace!("Tile resident: {}", self.page_table.page_id(cell));
                self.stats.tiles_completed += 1;
                self.lookup_dirty = true;
                true
            }
            None => {
                log::debug!("Ignoring stale completion for request {}", request.0);
                self.stats.stale_completions += 1;
                false
            }
        }
    }

    /// Activate one page directly, outside the feedback path
    pub fn activate_page(&mut self, x: u32, y: u32, mip: u8) -> Option<&PageEntry> {
        self.page_table.activate_page(x, y, mip, &mut self.tiles)
    }

    /// Scroll the view by `delta` table units
    pub fn change_view_rect(&mut self, delta: IVec2) {
        if delta == IVec2::ZERO {
            return;
        }
        self.view_origin = self.view_origin.saturating_add(delta);
        let invalidated = self.page_table.change_view_rect(delta, &mut self.tiles);
        log::debug!("View origin now {} ({invalidated} pages invalidated)", self.view_origin);
        self.lookup_dirty = true;
    }

    /// Drop every page and request and start over from the root
    pub fn reset(&mut self) {
        self.page_table.reset(&mut self.tiles);
        self.view_origin = IVec2::ZERO;
        self.discard_capture = self.capture_in_flight;
        self.stats = StreamingStats::default();
        self.lookup_dirty = true;
        log::info!("Virtual texture reset");
    }

    /// Rasterize the lookup texture now instead of at the next update
    pub fn rebuild_lookup(&mut self) {
        let _span = tracing::trace_span!("vt_lookup").entered();
        self.page_table.update_lookup(&self.tiles, &mut self.draws);
        self.lookup.rasterize(&self.draws);
        self.stats.lookup_rebuilds += 1;
        self.lookup_dirty = false;
    }

    /// Handle for the feedback readback to publish into
    pub fn feedback_sender(&self) -> FeedbackSender {
        self.sender.clone()
    }

    pub fn capture_in_flight(&self) -> bool {
        self.capture_in_flight
    }

    pub fn lookup(&self) -> &LookupTexture {
        &self.lookup
    }

    /// Pages drawn into the current lookup texture, coarse to fine
    pub fn lookup_draws(&self) -> &[LookupDraw] {
        &self.draws
    }

    /// Instance batch for rasterizing the lookup texture on the GPU
    pub fn lookup_instances(&self) -> Vec<LookupInstance> {
        self.draws
            .iter()
            .map(|draw| LookupInstance::new(draw, self.config.table_size))
            .collect()
    }

    pub fn shader_params(&self) -> ShaderParams {
        ShaderParams::from_config(&self.config)
    }

    pub fn tiles(&self) -> &TiledTexture {
        &self.tiles
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn stats(&self) -> &StreamingStats {
        &self.stats
    }

    pub fn config(&self) -> &VirtualTextureConfig {
        &self.config
    }

    /// Frames updated so far
    pub fn frame(&self) -> FrameIndex {
        self.clock.frame()
    }

    pub fn view_origin(&self) -> IVec2 {
        self.view_origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{FeedbackBuffer, FeedbackFormat};
    use glam::UVec2;

    fn small_config() -> VirtualTextureConfig {
        VirtualTextureConfig {
            table_size: 16,
            tile_size: 32,
            padding_size: 2,
            region_size: UVec2::new(4, 4),
            requests_per_frame: 4,
            ..Default::default()
        }
    }

    fn send(system: &VirtualTextureSystem, samples: &[FeedbackSample]) {
        let buffer = FeedbackBuffer::encode(FeedbackFormat::Rgba8, samples).unwrap();
        system.feedback_sender().complete(buffer);
    }

    fn immediate(_: &TileRenderJob) -> TileRenderStatus {
        TileRenderStatus::Completed
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = VirtualTextureConfig {
            table_size: 12,
            ..Default::default()
        };
        assert!(VirtualTextureSystem::new(config).is_err());
    }

    #[test]
    fn test_first_update_requests_capture_and_renders_root() {
        let mut system = VirtualTextureSystem::new(small_config()).unwrap();
        let mut renderer = immediate;
        let report = system.update(&mut renderer);

        assert!(report.events.contains(FrameEvents::CAPTURE_REQUESTED));
        assert!(report.events.contains(FrameEvents::LOOKUP_UPDATED));
        assert_eq!(report.completed, 1);
        assert_eq!(system.lookup().texel(15, 15)[2], 4);
        assert_eq!(system.lookup().texel(15, 15)[3], 255);
    }

    #[test]
    fn test_capture_is_gated() {
        let mut system = VirtualTextureSystem::new(small_config()).unwrap();
        let mut renderer = immediate;
        system.update(&mut renderer);
        let report = system.update(&mut renderer);
        assert!(!report.events.contains(FrameEvents::CAPTURE_REQUESTED));
        assert!(system.capture_in_flight());

        send(&system, &[FeedbackSample::new(3, 3, 0)]);
        let report = system.update(&mut renderer);
        assert!(report.events.contains(FrameEvents::FEEDBACK_CONSUMED));
        assert!(report.events.contains(FrameEvents::CAPTURE_REQUESTED));
    }

    #[test]
    fn test_feedback_streams_exact_page() {
        let mut system = VirtualTextureSystem::new(small_config()).unwrap();
        let mut renderer = immediate;
        system.update(&mut renderer);

        send(&system, &[FeedbackSample::new(5, 6, 0)]);
        let report = system.update(&mut renderer);
        assert_eq!(report.activated, 1);
        assert_eq!(report.fallbacks, 1);
        assert_eq!(report.completed, 1);

        // Completed this frame, so it is already in the lookup.
        let texel = system.lookup().texel(5, 6);
        assert_eq!(texel[2], 0);
        assert_ne!(system.lookup().texel(4, 6), texel);
    }

    #[test]
    fn test_deferred_renders_complete_later() {
        let mut system = VirtualTextureSystem::new(small_config()).unwrap();
        let mut jobs = Vec::new();
        let mut renderer = |job: &TileRenderJob| {
            jobs.push(job.request);
            TileRenderStatus::Deferred
        };
        system.update(&mut renderer);
        assert_eq!(jobs.len(), 1);
        assert_eq!(system.page_table().requests().rendering_len(), 1);

        assert!(system.complete_tile(jobs[0]));
        assert!(!system.complete_tile(jobs[0]));
        assert_eq!(system.stats().stale_completions, 1);
        assert!(system.page_table().requests().is_empty());
    }

    #[test]
    fn test_lookup_waits_for_root_content() {
        let mut system = VirtualTextureSystem::new(small_config()).unwrap();
        let jobs = std::cell::RefCell::new(Vec::new());
        let mut renderer = |job: &TileRenderJob| {
            jobs.borrow_mut().push(job.request);
            TileRenderStatus::Deferred
        };
        let report = system.update(&mut renderer);
        assert_eq!(report.completed, 0);
        assert!(system.page_table().root().is_resident());
        assert_eq!(system.lookup().texel(0, 0), [0; 4]);

        let first = jobs.borrow()[0];
        assert!(system.complete_tile(first));
        let report = system.update(&mut renderer);
        assert!(report.events.contains(FrameEvents::LOOKUP_UPDATED));
        assert_eq!(system.lookup().texel(0, 0)[3], 255);
    }

    #[test]
    fn test_malformed_feedback_is_dropped() {
        let mut system = VirtualTextureSystem::new(small_config()).unwrap();
        let mut renderer = immediate;
        system.update(&mut renderer);

        system
            .feedback_sender()
            .complete(FeedbackBuffer::from_bytes(FeedbackFormat::Rgba8, vec![1, 2, 3]));
        let report = system.update(&mut renderer);
        assert!(!report.events.contains(FrameEvents::FEEDBACK_CONSUMED));
        assert_eq!(system.stats().feedback_dropped, 1);
        // The capture slot frees up anyway.
        assert!(report.events.contains(FrameEvents::CAPTURE_REQUESTED));
    }

    #[test]
    fn test_feedback_follows_scroll() {
        let mut system = VirtualTextureSystem::new(small_config()).unwrap();
        let mut renderer = immediate;
        system.update(&mut renderer);

        // Captured at origin 0, consumed after scrolling right by 2.
        system.change_view_rect(IVec2::new(2, 0));
        send(&system, &[FeedbackSample::new(6, 1, 0), FeedbackSample::new(1, 1, 0)]);
        let report = system.update(&mut renderer);

        assert_eq!(report.activated, 1);
        assert!(system.page_table().level(0).unwrap().get(4, 1).is_resident());
    }

    #[test]
    fn test_extreme_scroll_resets_instead_of_overflowing() {
        let mut system = VirtualTextureSystem::new(small_config()).unwrap();
        let mut renderer = immediate;
        system.update(&mut renderer);

        system.change_view_rect(IVec2::new(i32::MIN, 0));
        assert_eq!(system.view_origin(), IVec2::new(i32::MIN, 0));
        system.change_view_rect(IVec2::new(i32::MIN, i32::MAX));
        assert_eq!(system.view_origin(), IVec2::new(i32::MIN, i32::MAX));
        assert_eq!(system.page_table().resident_count(), 1);
        assert!(system.page_table().root().is_resident());
    }

    #[test]
    fn test_job_geometry() {
        let mut system = VirtualTextureSystem::new(small_config()).unwrap();
        system.change_view_rect(IVec2::new(4, 0));
        let mut jobs = Vec::new();
        let mut renderer = |job: &TileRenderJob| {
            jobs.push(*job);
            TileRenderStatus::Completed
        };
        system.update(&mut renderer);

        let root = jobs[0];
        assert_eq!(root.page, PageId::new(0, 0, 4));
        assert_eq!(root.page_rect, IRect::square(0, 0, 16));
        assert_eq!(root.world_rect, IRect::square(4, 0, 16));
        assert_eq!(root.atlas_rect.width, 36);
    }

    #[test]
    fn test_reset_discards_in_flight_capture() {
        let mut system = VirtualTextureSystem::new(small_config()).unwrap();
        let mut renderer = immediate;
        system.update(&mut renderer);
        system.reset();

        send(&system, &[FeedbackSample::new(1, 1, 0)]);
        let report = system.update(&mut renderer);
        assert_eq!(report.activated, 0);
        assert!(report.events.contains(FrameEvents::CAPTURE_REQUESTED));
        assert!(system.page_table().root().is_resident());
    }
}
