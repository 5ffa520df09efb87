//! Page Table
//!
//! Owns one [`PageLevelTable`] per mip (0 = finest, `max_mip` = the single
//! root page) and the request queue feeding the tile renderer.
//!
//! Activation never fails for a valid address while the root is resident:
//! a missing page is requested and the nearest resident ancestor is used
//! until it streams in.

use std::cmp::Reverse;

use glam::IVec2;
use vtex_core::FrameIndex;

use crate::lookup::LookupDraw;
use crate::page::{CellRef, PageEntry, PageId, RequestId, Residency};
use crate::page_level_table::{LevelShift, PageLevelTable};
use crate::request_queue::{LoadRequest, PageRequestQueue, RequestState};
use crate::texture::{TileSlot, TiledTexture};

/// Slot handed out for a new tile render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGrant {
    pub slot: TileSlot,
    /// Page that previously occupied the slot, already invalidated
    pub evicted: Option<CellRef>,
}

/// A request handed to the tile renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub request: LoadRequest,
    /// Slot the renderer writes into
    pub slot: TileSlot,
    pub evicted: Option<CellRef>,
}

/// Hierarchical page table over all mip levels
#[derive(Debug, Clone)]
pub struct PageTable {
    table_size: u32,
    max_mip: u8,
    levels: Vec<PageLevelTable>,
    requests: PageRequestQueue,
    /// Frame stamped onto pages activated by the current feedback pass
    activation_frame: FrameIndex,
    /// Whether the pinned root's slot holds rendered content
    root_rendered: bool,
}

impl PageTable {
    /// Create a table `table_size` pages wide and pin its root page into `tiles`.
    pub fn new(table_size: u32, requests_per_frame: usize, tiles: &mut TiledTexture) -> Self {
        let max_mip = table_size.max(1).ilog2() as u8;
        let levels = (0..=max_mip)
            .map(|mip| PageLevelTable::new(mip, table_size))
            .collect();

        let mut table = Self {
            table_size,
            max_mip,
            levels,
            requests: PageRequestQueue::new(requests_per_frame),
            activation_frame: 0,
            root_rendered: false,
        };
        table.pin_root(tiles);
        table
    }

    pub fn table_size(&self) -> u32 {
        self.table_size
    }

    pub fn max_mip(&self) -> u8 {
        self.max_mip
    }

    pub fn levels(&self) -> &[PageLevelTable] {
        &self.levels
    }

    pub fn level(&self, mip: u8) -> Option<&PageLevelTable> {
        self.levels.get(mip as usize)
    }

    pub fn requests(&self) -> &PageRequestQueue {
        &self.requests
    }

    pub fn requests_mut(&mut self) -> &mut PageRequestQueue {
        &mut self.requests
    }

    pub fn entry(&self, cell: CellRef) -> &PageEntry {
        self.levels[cell.mip as usize].entry(cell.index as usize)
    }

    /// Reference to the root cell
    pub fn root_ref(&self) -> CellRef {
        CellRef {
            mip: self.max_mip,
            index: 0,
        }
    }

    pub fn root(&self) -> &PageEntry {
        self.entry(self.root_ref())
    }

    /// Whether the root's atlas slot has been written since it was pinned.
    ///
    /// The root is resident from construction so activation always has a
    /// fallback, but it is left out of the lookup until this is set.
    pub fn root_rendered(&self) -> bool {
        self.root_rendered
    }

    /// Number of resident pages across all levels
    pub fn resident_count(&self) -> usize {
        self.levels.iter().map(|l| l.resident_count()).sum()
    }

    pub fn activation_frame(&self) -> FrameIndex {
        self.activation_frame
    }

    /// Start a feedback pass; activations are stamped with `frame`
    pub fn begin_activation(&mut self, frame: FrameIndex) {
        self.activation_frame = frame;
    }

    /// Activate the page covering mip-0 table coordinate `(x, y)` at `mip`.
    ///
    /// Returns the resident page to sample: the requested one, or the nearest
    /// resident ancestor while the requested page loads. `None` for
    /// out-of-range addresses, or when not even the root is resident.
    pub fn activate_page(
        &mut self,
        x: u32,
        y: u32,
        mip: u8,
        tiles: &mut TiledTexture,
    ) -> Option<&PageEntry> {
        if x >= self.table_size || y >= self.table_size || mip > self.max_mip {
            return None;
        }
        let (x, y) = (x as i32, y as i32);

        let mut level = mip as usize;
        let mut index = self.levels[level].index_of(x, y);
        if !self.levels[level].entry(index).is_resident() {
            self.load_page(level, index);

            while level < self.max_mip as usize {
                level += 1;
                index = self.levels[level].index_of(x, y);
                if self.levels[level].entry(index).is_resident() {
                    break;
                }
            }
        }

        let entry = self.levels[level].entry_mut(index);
        let slot = entry.slot()?;
        entry.stamp(self.activation_frame);
        tiles.set_active(slot);

        Some(self.levels[level].entry(index))
    }

    fn load_page(&mut self, level: usize, index: usize) {
        let table = &self.levels[level];
        if table.entry(index).pending().is_some() {
            return;
        }
        let id = self.requests.request(table.page_id(index), table.cell_ref(index));
        self.levels[level]
            .entry_mut(index)
            .set_residency(Residency::Pending(id));
    }

    /// Pick a slot for new content, evicting its occupant first.
    ///
    /// The root's slot and slots still being rendered into are skipped.
    /// `None` only if every slot is protected.
    pub fn acquire_slot(&mut self, tiles: &mut TiledTexture) -> Option<SlotGrant> {
        let root_slot = self.root().slot();
        let slot = tiles
            .lru_order()
            .find(|&slot| Some(slot) != root_slot && !self.requests.is_slot_reserved(slot))?;

        let evicted = tiles.release(slot).map(|occupant| {
            self.levels[occupant.mip as usize]
                .entry_mut(occupant.index as usize)
                .invalidate();
            occupant
        });
        Some(SlotGrant { slot, evicted })
    }

    /// Hand a queued request to the renderer, reserving its target slot.
    ///
    /// A page that is already resident is re-rendered in place.
    pub fn dispatch(&mut self, id: RequestId, tiles: &mut TiledTexture) -> Option<Dispatch> {
        let request = *self.requests.get(id)?;
        if request.state != RequestState::Queued {
            return None;
        }
        let (slot, evicted) = match self.entry(request.cell).slot() {
            Some(slot) => (slot, None),
            None => {
                let grant = self.acquire_slot(tiles)?;
                (grant.slot, grant.evicted)
            }
        };

        let request = self.requests.begin_render(id, slot)?;
        tiles.set_active(slot);
        Some(Dispatch {
            request,
            slot,
            evicted,
        })
    }

    /// Make a rendered request's page resident. Returns the page cell, or
    /// `None` if the request was cancelled in the meantime.
    pub fn complete(&mut self, id: RequestId, tiles: &mut TiledTexture) -> Option<CellRef> {
        let request = self.requests.complete(id)?;
        let slot = request.slot()?;
        let cell = request.cell;

        let entry = self.levels[cell.mip as usize].entry_mut(cell.index as usize);
        let current = match entry.residency() {
            Residency::Pending(pending) => pending == id,
            Residency::Resident(resident) => resident == slot,
            Residency::Empty => false,
        };
        if !current {
            Self::release_request(tiles, request);
            return None;
        }

        entry.set_residency(Residency::Resident(slot));
        entry.stamp(self.activation_frame);
        tiles.assign(slot, cell);
        tiles.set_active(slot);
        if cell == self.root_ref() {
            self.root_rendered = true;
        }
        Some(cell)
    }

    /// Scroll the view by `delta` table units.
    ///
    /// Every level drops the cells that leave the view; the root stays pinned
    /// to its slot and is queued for a refresh. Returns the number of cells
    /// invalidated.
    pub fn change_view_rect(&mut self, delta: IVec2, tiles: &mut TiledTexture) -> usize {
        if delta == IVec2::ZERO {
            return 0;
        }

        let root = self.root_ref();
        let mut root_slot = None;
        let mut invalidated = 0;

        let Self { levels, requests, .. } = self;
        for level in levels.iter_mut() {
            let mip = level.mip();
            let count = level.node_cell_count();
            let shift = level.change_view_rect(delta, |cell, previous| {
                invalidated += 1;
                if let (true, Residency::Resident(slot)) = (cell == root, previous) {
                    root_slot = Some(slot);
                    return;
                }
                Self::release_cell(requests, tiles, cell, previous);
            });
            if let LevelShift::Shifted(cells) = shift {
                requests.rebase(mip, cells, count, |r| Self::release_request(tiles, r));
            }
        }

        if let Some(slot) = root_slot {
            self.repin_root(slot, tiles);
        }
        self.activate_page(0, 0, self.max_mip, tiles);

        log::debug!("View moved by {delta}: {invalidated} cells invalidated");
        invalidated
    }

    /// Invalidate every page and cancel every request, then pin the root again.
    pub fn reset(&mut self, tiles: &mut TiledTexture) {
        let Self { levels, requests, .. } = self;
        for level in levels.iter_mut() {
            level.reset(|cell, previous| Self::release_cell(requests, tiles, cell, previous));
        }
        requests.clear_job(|r| Self::release_request(tiles, r));

        self.pin_root(tiles);
    }

    /// Make the root resident and queue its content for rendering
    pub fn pin_root(&mut self, tiles: &mut TiledTexture) -> Option<TileSlot> {
        if let Some(slot) = self.root().slot() {
            tiles.set_active(slot);
            return Some(slot);
        }

        let grant = self.acquire_slot(tiles)?;
        self.root_rendered = false;
        tiles.assign(grant.slot, self.root_ref());
        self.repin_root(grant.slot, tiles);
        Some(grant.slot)
    }

    fn repin_root(&mut self, slot: TileSlot, tiles: &mut TiledTexture) {
        let root = self.root_ref();
        self.requests
            .cancel_cell(root, |r| Self::release_request(tiles, r));
        let id = self.requests.request(self.levels[root.mip as usize].page_id(0), root);
        log::trace!("Root page pinned to slot {} with refresh {:?}", slot.0, id);

        let entry = self.levels[root.mip as usize].entry_mut(0);
        entry.set_residency(Residency::Resident(slot));
        tiles.set_active(slot);
    }

    fn release_cell(
        requests: &mut PageRequestQueue,
        tiles: &mut TiledTexture,
        cell: CellRef,
        previous: Residency,
    ) {
        match previous {
            Residency::Resident(slot) => {
                tiles.release(slot);
                requests.cancel_cell(cell, |r| Self::release_request(tiles, r));
            }
            Residency::Pending(id) => {
                if let Some(request) = requests.cancel(id) {
                    Self::release_request(tiles, request);
                }
            }
            Residency::Empty => {}
        }
    }

    /// Free the reserved slot of a cancelled request unless a page lives there
    fn release_request(tiles: &mut TiledTexture, request: LoadRequest) {
        if let Some(slot) = request.slot() {
            if tiles.occupant(slot).is_none() {
                tiles.release(slot);
            }
        }
    }

    /// Collect the pages to rasterize into the lookup texture, coarse to fine:
    /// the root once its content is rendered, plus every resident page active
    /// in the current activation frame.
    pub fn update_lookup(&self, tiles: &TiledTexture, draws: &mut Vec<LookupDraw>) {
        draws.clear();

        let mut active: Vec<(CellRef, TileSlot)> = (0..tiles.capacity())
            .map(TileSlot)
            .filter_map(|slot| Some((tiles.occupant(slot)?, slot)))
            .filter(|(cell, _)| {
                if cell.mip == self.max_mip {
                    return self.root_rendered;
                }
                self.activation_frame != 0
                    && self.entry(*cell).active_frame() == self.activation_frame
            })
            .collect();
        active.sort_by_key(|(cell, _)| Reverse(cell.mip));

        draws.extend(active.into_iter().map(|(cell, slot)| LookupDraw {
            rect: self.levels[cell.mip as usize].unwrapped_rect(cell.index as usize),
            tile: tiles.tile_coord(slot),
            mip: cell.mip,
        }));
    }

    /// View-relative page address of `cell`
    pub fn page_id(&self, cell: CellRef) -> PageId {
        self.levels[cell.mip as usize].page_id(cell.index as usize)
    }
}
