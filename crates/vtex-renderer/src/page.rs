//! Page addressing and residency types

use std::fmt;

use vtex_core::{FrameIndex, IRect};

use crate::texture::TileSlot;

/// Address of a page in the mip pyramid.
///
/// `x` and `y` are cell coordinates at `mip`, relative to the current view
/// window of the page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub x: u32,
    pub y: u32,
    pub mip: u8,
}

impl PageId {
    pub const fn new(x: u32, y: u32, mip: u8) -> Self {
        Self { x, y, mip }
    }

    /// Page at `mip` covering mip-0 table coordinate `(x, y)`
    pub fn containing(x: u32, y: u32, mip: u8) -> Self {
        Self::new(x >> mip, y >> mip, mip)
    }

    /// Rect of the page in mip-0 table units, relative to the view window
    pub fn table_rect(&self) -> IRect {
        let size = 1i32 << self.mip;
        IRect::square(self.x as i32 * size, self.y as i32 * size, size)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) @ mip {}", self.x, self.y, self.mip)
    }
}

/// Identifier of a load request. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Stable reference to a page cell: mip level plus index into that level's grid.
///
/// Unlike [`PageId`] this does not change when the view scrolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub mip: u8,
    pub index: u32,
}

/// Residency state of a page cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Residency {
    /// No content and no request in flight
    #[default]
    Empty,
    /// Waiting for a tile render
    Pending(RequestId),
    /// Content lives in the given atlas slot
    Resident(TileSlot),
}

/// One cell of a page level table
#[derive(Debug, Clone)]
pub struct PageEntry {
    rect: IRect,
    mip: u8,
    residency: Residency,
    active_frame: FrameIndex,
}

impl PageEntry {
    pub(crate) fn new(rect: IRect, mip: u8) -> Self {
        Self {
            rect,
            mip,
            residency: Residency::Empty,
            active_frame: 0,
        }
    }

    /// Fixed rect of the cell in table units (before the toroidal offset is undone)
    pub fn rect(&self) -> IRect {
        self.rect
    }

    pub fn mip(&self) -> u8 {
        self.mip
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Last frame this page was activated (0 = never)
    pub fn active_frame(&self) -> FrameIndex {
        self.active_frame
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.residency, Residency::Resident(_))
    }

    /// Atlas slot holding this page, if resident
    pub fn slot(&self) -> Option<TileSlot> {
        match self.residency {
            Residency::Resident(slot) => Some(slot),
            _ => None,
        }
    }

    /// Request this page is waiting on, if any
    pub fn pending(&self) -> Option<RequestId> {
        match self.residency {
            Residency::Pending(id) => Some(id),
            _ => None,
        }
    }

    pub(crate) fn set_residency(&mut self, residency: Residency) {
        self.residency = residency;
    }

    pub(crate) fn stamp(&mut self, frame: FrameIndex) {
        self.active_frame = frame;
    }

    /// Drop residency and activity, returning the previous state
    pub(crate) fn invalidate(&mut self) -> Residency {
        self.active_frame = 0;
        std::mem::take(&mut self.residency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_containing() {
        assert_eq!(PageId::containing(13, 6, 2), PageId::new(3, 1, 2));
        assert_eq!(PageId::containing(255, 255, 8), PageId::new(0, 0, 8));
    }

    #[test]
    fn test_page_table_rect() {
        assert_eq!(PageId::new(3, 1, 2).table_rect(), IRect::square(12, 4, 4));
    }

    #[test]
    fn test_entry_invalidate() {
        let mut entry = PageEntry::new(IRect::square(0, 0, 1), 0);
        entry.set_residency(Residency::Resident(TileSlot(4)));
        entry.stamp(7);
        assert_eq!(entry.slot(), Some(TileSlot(4)));

        assert_eq!(entry.invalidate(), Residency::Resident(TileSlot(4)));
        assert_eq!(entry.residency(), Residency::Empty);
        assert_eq!(entry.active_frame(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(PageId::new(1, 2, 3).to_string(), "(1, 2) @ mip 3");
    }
}
