//! Page Level Table
//!
//! One mip level's grid of page cells. Cell rects are fixed at construction;
//! scrolling only moves a toroidal offset, so a scroll step invalidates the
//! row or column that leaves the view instead of the whole grid.

use glam::IVec2;
use vtex_core::{IRect, wrap, wrap_ivec2};

use crate::page::{CellRef, PageEntry, PageId, Residency};

/// What a view change did to a level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelShift {
    /// Offset advanced by this many cells; only the swept border was invalidated
    Shifted(IVec2),
    /// Every cell was invalidated and the offset returned to zero
    Reset,
}

/// Grid of page cells for one mip level
#[derive(Debug, Clone)]
pub struct PageLevelTable {
    mip: u8,
    /// Table units covered by one cell (`2^mip`)
    per_cell_size: i32,
    /// Cells per grid side
    node_cell_count: i32,
    /// Toroidal offset in cells
    offset: IVec2,
    /// Row-major cells, indexed by grid position
    cells: Vec<PageEntry>,
}

impl PageLevelTable {
    /// Create the level for `mip` of a table `table_size` pages wide
    pub fn new(mip: u8, table_size: u32) -> Self {
        let per_cell_size = 1i32 << mip;
        let node_cell_count = (table_size as i32 / per_cell_size).max(1);

        let mut cells = Vec::with_capacity((node_cell_count * node_cell_count) as usize);
        for y in 0..node_cell_count {
            for x in 0..node_cell_count {
                let rect = IRect::square(x * per_cell_size, y * per_cell_size, per_cell_size);
                cells.push(PageEntry::new(rect, mip));
            }
        }

        Self {
            mip,
            per_cell_size,
            node_cell_count,
            offset: IVec2::ZERO,
            cells,
        }
    }

    pub fn mip(&self) -> u8 {
        self.mip
    }

    pub fn per_cell_size(&self) -> i32 {
        self.per_cell_size
    }

    pub fn node_cell_count(&self) -> i32 {
        self.node_cell_count
    }

    /// Current toroidal offset in cells
    pub fn offset(&self) -> IVec2 {
        self.offset
    }

    /// Table units covered by the whole grid
    pub fn extent(&self) -> i32 {
        self.node_cell_count * self.per_cell_size
    }

    pub fn cells(&self) -> &[PageEntry] {
        &self.cells
    }

    /// Grid index of the cell covering mip-0 table coordinate `(x, y)`
    pub fn index_of(&self, x: i32, y: i32) -> usize {
        let cell = IVec2::new(
            x.div_euclid(self.per_cell_size),
            y.div_euclid(self.per_cell_size),
        );
        let grid = wrap_ivec2(cell + self.offset, self.node_cell_count);
        (grid.y * self.node_cell_count + grid.x) as usize
    }

    /// Cell covering mip-0 table coordinate `(x, y)`
    pub fn get(&self, x: i32, y: i32) -> &PageEntry {
        &self.cells[self.index_of(x, y)]
    }

    pub fn get_mut(&mut self, x: i32, y: i32) -> &mut PageEntry {
        let index = self.index_of(x, y);
        &mut self.cells[index]
    }

    pub fn entry(&self, index: usize) -> &PageEntry {
        &self.cells[index]
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        &mut self.cells[index]
    }

    pub fn cell_ref(&self, index: usize) -> CellRef {
        CellRef {
            mip: self.mip,
            index: index as u32,
        }
    }

    /// Cell coordinates of grid `index` relative to the view window
    pub fn view_coords(&self, index: usize) -> IVec2 {
        let grid = IVec2::new(
            index as i32 % self.node_cell_count,
            index as i32 / self.node_cell_count,
        );
        wrap_ivec2(grid - self.offset, self.node_cell_count)
    }

    /// View-relative page address of grid `index`
    pub fn page_id(&self, index: usize) -> PageId {
        let coords = self.view_coords(index);
        PageId::new(coords.x as u32, coords.y as u32, self.mip)
    }

    /// Grid index of a view-relative page address at this level
    pub fn index_of_page(&self, page: PageId) -> Option<usize> {
        let count = self.node_cell_count as u32;
        if page.mip != self.mip || page.x >= count || page.y >= count {
            return None;
        }
        let per = self.per_cell_size;
        Some(self.index_of(page.x as i32 * per, page.y as i32 * per))
    }

    /// True table-space rect of grid `index`, with the toroidal offset undone
    pub fn unwrapped_rect(&self, index: usize) -> IRect {
        self.cells[index]
            .rect()
            .translate(-self.offset * self.per_cell_size)
            .wrapped(self.extent())
    }

    /// Number of resident cells
    pub fn resident_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_resident()).count()
    }

    /// Scroll the view by `delta` table units.
    ///
    /// `on_invalidate` receives every swept cell that was resident or pending,
    /// together with its state before invalidation.
    pub fn change_view_rect<F>(&mut self, delta: IVec2, mut on_invalidate: F) -> LevelShift
    where
        F: FnMut(CellRef, Residency),
    {
        let per = self.per_cell_size;
        let extent = self.extent();
        if delta.x.unsigned_abs() >= extent.unsigned_abs()
            || delta.y.unsigned_abs() >= extent.unsigned_abs()
            || delta.x % per != 0
            || delta.y % per != 0
        {
            self.reset(on_invalidate);
            return LevelShift::Reset;
        }

        let cells = delta / per;
        let count = self.node_cell_count;

        let step = cells.x.signum();
        for _ in 0..cells.x.abs() {
            // The column leaving the view is the one the new edge reuses.
            let column = wrap(if step > 0 { self.offset.x } else { self.offset.x - 1 }, count);
            for row in 0..count {
                self.invalidate_cell((row * count + column) as usize, &mut on_invalidate);
            }
            self.offset.x = wrap(self.offset.x + step, count);
        }

        let step = cells.y.signum();
        for _ in 0..cells.y.abs() {
            let row = wrap(if step > 0 { self.offset.y } else { self.offset.y - 1 }, count);
            for column in 0..count {
                self.invalidate_cell((row * count + column) as usize, &mut on_invalidate);
            }
            self.offset.y = wrap(self.offset.y + step, count);
        }

        LevelShift::Shifted(cells)
    }

    /// Invalidate every occupied cell and zero the offset
    pub fn reset<F>(&mut self, mut on_invalidate: F)
    where
        F: FnMut(CellRef, Residency),
    {
        for index in 0..self.cells.len() {
            self.invalidate_cell(index, &mut on_invalidate);
        }
        self.offset = IVec2::ZERO;
    }

    fn invalidate_cell<F>(&mut self, index: usize, on_invalidate: &mut F)
    where
        F: FnMut(CellRef, Residency),
    {
        let previous = self.cells[index].invalidate();
        if previous != Residency::Empty {
            on_invalidate(self.cell_ref(index), previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::TileSlot;

    fn fill_resident(level: &mut PageLevelTable) {
        for (i, cell) in level.cells.iter_mut().enumerate() {
            cell.set_residency(Residency::Resident(TileSlot(i as u32)));
        }
    }

    #[test]
    fn test_level_dimensions() {
        let level = PageLevelTable::new(3, 64);
        assert_eq!(level.per_cell_size(), 8);
        assert_eq!(level.node_cell_count(), 8);
        assert_eq!(level.cells().len(), 64);
        assert_eq!(level.entry(9).rect(), IRect::square(8, 8, 8));

        let root = PageLevelTable::new(6, 64);
        assert_eq!(root.node_cell_count(), 1);
    }

    #[test]
    fn test_get_maps_coordinates() {
        let level = PageLevelTable::new(1, 16);
        assert_eq!(level.index_of(0, 0), 0);
        assert_eq!(level.index_of(3, 0), 1);
        assert_eq!(level.index_of(5, 3), 8 + 2);
        assert_eq!(level.get(5, 3).rect(), IRect::square(4, 2, 2));
    }

    #[test]
    fn test_single_column_shift() {
        let mut level = PageLevelTable::new(3, 64);
        fill_resident(&mut level);

        let mut invalidated = Vec::new();
        let shift = level.change_view_rect(IVec2::new(8, 0), |cell, _| invalidated.push(cell.index));

        assert_eq!(shift, LevelShift::Shifted(IVec2::new(1, 0)));
        assert_eq!(level.offset(), IVec2::new(1, 0));
        assert_eq!(invalidated.len(), 8);
        assert!(invalidated.iter().all(|i| i % 8 == 0));
        assert_eq!(level.resident_count(), 56);
    }

    #[test]
    fn test_shift_keeps_content_under_view() {
        let mut level = PageLevelTable::new(0, 8);
        fill_resident(&mut level);
        let before = level.get(3, 2).slot();

        level.change_view_rect(IVec2::new(1, 0), |_, _| {});
        // What was at view x = 3 is now at view x = 2.
        assert_eq!(level.get(2, 2).slot(), before);
        // The new right edge reuses the evicted column and starts empty.
        assert!(!level.get(7, 2).is_resident());
    }

    #[test]
    fn test_negative_shift() {
        let mut level = PageLevelTable::new(0, 8);
        fill_resident(&mut level);

        let mut invalidated = Vec::new();
        level.change_view_rect(IVec2::new(0, -2), |cell, _| invalidated.push(cell.index));

        assert_eq!(level.offset(), IVec2::new(0, 6));
        assert_eq!(invalidated.len(), 16);
        // Rows 7 and 6 leave the view when scrolling up.
        assert!(invalidated.iter().all(|i| i / 8 >= 6));
        assert!(!level.get(0, 0).is_resident());
        assert!(level.get(0, 2).is_resident());
    }

    #[test]
    fn test_large_delta_resets() {
        let mut level = PageLevelTable::new(0, 8);
        fill_resident(&mut level);
        level.change_view_rect(IVec2::new(1, 0), |_, _| {});

        let mut count = 0;
        let shift = level.change_view_rect(IVec2::new(8, 0), |_, _| count += 1);
        assert_eq!(shift, LevelShift::Reset);
        assert_eq!(count, 56);
        assert_eq!(level.offset(), IVec2::ZERO);
        assert_eq!(level.resident_count(), 0);
    }

    #[test]
    fn test_unaligned_delta_resets() {
        let mut level = PageLevelTable::new(2, 32);
        fill_resident(&mut level);
        let shift = level.change_view_rect(IVec2::new(2, 0), |_, _| {});
        assert_eq!(shift, LevelShift::Reset);
        assert_eq!(level.resident_count(), 0);
    }

    #[test]
    fn test_extreme_delta_resets() {
        let mut level = PageLevelTable::new(0, 8);
        let shift = level.change_view_rect(IVec2::new(i32::MIN, 0), |_, _| {});
        assert_eq!(shift, LevelShift::Reset);
        assert_eq!(level.offset(), IVec2::ZERO);
    }

    #[test]
    fn test_empty_cells_do_not_fire() {
        let mut level = PageLevelTable::new(0, 8);
        let mut count = 0;
        level.change_view_rect(IVec2::new(1, 1), |_, _| count += 1);
        assert_eq!(count, 0);
        assert_eq!(level.offset(), IVec2::new(1, 1));
    }

    #[test]
    fn test_unwrapped_rect_and_view_coords() {
        let mut level = PageLevelTable::new(1, 16);
        level.change_view_rect(IVec2::new(2, 4), |_, _| {});

        let index = level.index_of(0, 0);
        assert_eq!(level.view_coords(index), IVec2::ZERO);
        assert_eq!(level.unwrapped_rect(index), IRect::square(0, 0, 2));
        assert_eq!(level.page_id(index), PageId::new(0, 0, 1));
        assert_eq!(level.index_of_page(PageId::new(0, 0, 1)), Some(index));
        assert_eq!(level.index_of_page(PageId::new(8, 0, 1)), None);

        let far = level.index_of(14, 10);
        assert_eq!(level.unwrapped_rect(far), IRect::square(14, 10, 2));
    }
}
