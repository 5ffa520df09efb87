//! Tiled Texture
//!
//! Physical atlas of padded square tiles. Slots are recycled through an LRU
//! cache and each slot remembers which page cell currently occupies it.

use glam::UVec2;
use vtex_core::{IRect, UvTransform};

use crate::lru::LruCache;
use crate::page::CellRef;
use crate::VirtualTextureConfig;

/// Physical atlas cell id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileSlot(pub u32);

impl TileSlot {
    /// Slot index into the atlas
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Physical tile atlas with LRU slot recycling
#[derive(Debug, Clone)]
pub struct TiledTexture {
    /// Atlas size in tiles
    region_size: UVec2,
    /// Content texels per tile side
    tile_size: u32,
    /// Border texels per tile side
    padding_size: u32,
    /// Recency of slot use
    lru: LruCache,
    /// Reverse map: slot -> occupying page cell
    occupants: Vec<Option<CellRef>>,
}

impl TiledTexture {
    /// Create an atlas of `region_size` tiles
    pub fn new(region_size: UVec2, tile_size: u32, padding_size: u32) -> Self {
        let capacity = region_size.x * region_size.y;
        Self {
            region_size,
            tile_size,
            padding_size,
            lru: LruCache::new(capacity),
            occupants: vec![None; capacity as usize],
        }
    }

    /// Create the atlas described by `config`
    pub fn from_config(config: &VirtualTextureConfig) -> Self {
        Self::new(config.region_size, config.tile_size, config.padding_size)
    }

    /// Number of slots
    pub fn capacity(&self) -> u32 {
        self.lru.capacity()
    }

    /// Atlas size in tiles
    pub fn region_size(&self) -> UVec2 {
        self.region_size
    }

    /// Content size of one tile
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Padding on each tile side
    pub fn padding_size(&self) -> u32 {
        self.padding_size
    }

    /// Size of one tile including padding
    pub fn padded_tile_size(&self) -> u32 {
        self.tile_size + 2 * self.padding_size
    }

    /// Atlas size in texels
    pub fn atlas_size(&self) -> UVec2 {
        self.region_size * self.padded_tile_size()
    }

    /// Eviction candidate: the least recently used slot.
    ///
    /// The slot may still be occupied; the caller must invalidate the
    /// occupant before writing new content into it.
    pub fn request_tile(&self) -> TileSlot {
        TileSlot(self.lru.oldest())
    }

    /// Protect a slot from eviction by marking it most recently used
    pub fn set_active(&mut self, slot: TileSlot) {
        self.lru.touch(slot.0);
    }

    /// Page cell currently stored in `slot`
    pub fn occupant(&self, slot: TileSlot) -> Option<CellRef> {
        self.occupants.get(slot.index()).copied().flatten()
    }

    /// Record `cell` as the occupant of `slot`, returning the previous one
    pub(crate) fn assign(&mut self, slot: TileSlot, cell: CellRef) -> Option<CellRef> {
        self.occupants[slot.index()].replace(cell)
    }

    /// Forget the occupant of `slot` and queue the slot for reuse first
    pub(crate) fn release(&mut self, slot: TileSlot) -> Option<CellRef> {
        let previous = self.occupants.get_mut(slot.index())?.take();
        self.lru.demote(slot.0);
        previous
    }

    /// Number of occupied slots
    pub fn occupied_count(&self) -> usize {
        self.occupants.iter().filter(|o| o.is_some()).count()
    }

    /// Slots from least to most recently used
    pub fn lru_order(&self) -> impl Iterator<Item = TileSlot> + '_ {
        self.lru.iter().map(TileSlot)
    }

    /// Tile coordinate of `slot` inside the atlas
    pub fn tile_coord(&self, slot: TileSlot) -> UVec2 {
        UVec2::new(slot.0 % self.region_size.x, slot.0 / self.region_size.x)
    }

    /// Slot at tile coordinate `coord`
    pub fn slot_at(&self, coord: UVec2) -> Option<TileSlot> {
        if coord.x >= self.region_size.x || coord.y >= self.region_size.y {
            return None;
        }
        Some(TileSlot(coord.y * self.region_size.x + coord.x))
    }

    /// Texel rect of `slot` including padding
    pub fn padded_rect(&self, slot: TileSlot) -> IRect {
        let stride = self.padded_tile_size() as i32;
        let coord = self.tile_coord(slot).as_ivec2();
        IRect::square(coord.x * stride, coord.y * stride, stride)
    }

    /// Texel rect of the content area of `slot`
    pub fn content_rect(&self, slot: TileSlot) -> IRect {
        let padded = self.padded_rect(slot);
        let pad = self.padding_size as i32;
        IRect::square(padded.x + pad, padded.y + pad, self.tile_size as i32)
    }

    /// UV transform mapping `[0, 1]²` onto the content area of `slot`
    pub fn uv_transform(&self, slot: TileSlot) -> UvTransform {
        UvTransform::from_rect(&self.content_rect(slot), self.atlas_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(index: u32) -> CellRef {
        CellRef { mip: 0, index }
    }

    #[test]
    fn test_geometry() {
        let tiles = TiledTexture::new(UVec2::new(4, 2), 128, 4);
        assert_eq!(tiles.capacity(), 8);
        assert_eq!(tiles.padded_tile_size(), 136);
        assert_eq!(tiles.atlas_size(), UVec2::new(544, 272));
        assert_eq!(tiles.tile_coord(TileSlot(5)), UVec2::new(1, 1));
        assert_eq!(tiles.slot_at(UVec2::new(1, 1)), Some(TileSlot(5)));
        assert_eq!(tiles.slot_at(UVec2::new(4, 0)), None);
        assert_eq!(tiles.padded_rect(TileSlot(5)), IRect::square(136, 136, 136));
        assert_eq!(tiles.content_rect(TileSlot(5)), IRect::square(140, 140, 128));
    }

    #[test]
    fn test_uv_transform_excludes_padding() {
        let tiles = TiledTexture::new(UVec2::new(2, 2), 120, 4);
        let uv = tiles.uv_transform(TileSlot(3));
        assert!((uv.offset.x - 132.0 / 256.0).abs() < 1e-6);
        assert!((uv.scale.x - 120.0 / 256.0).abs() < 1e-6);
    }

    #[test]
    fn test_request_cycles_without_set_active_interleaving() {
        let mut tiles = TiledTexture::new(UVec2::new(2, 2), 64, 0);
        let mut visited = Vec::new();
        for n in 0..4 {
            let slot = tiles.request_tile();
            tiles.assign(slot, cell(n));
            tiles.set_active(slot);
            visited.push(slot.0);
        }
        assert_eq!(visited, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_set_active_protects_slot() {
        let mut tiles = TiledTexture::new(UVec2::new(2, 2), 64, 0);
        tiles.set_active(TileSlot(0));
        assert_eq!(tiles.request_tile(), TileSlot(1));
    }

    #[test]
    fn test_release_recycles_first() {
        let mut tiles = TiledTexture::new(UVec2::new(2, 2), 64, 0);
        tiles.assign(TileSlot(3), cell(9));
        assert_eq!(tiles.occupied_count(), 1);
        assert_eq!(tiles.release(TileSlot(3)), Some(cell(9)));
        assert_eq!(tiles.occupant(TileSlot(3)), None);
        assert_eq!(tiles.request_tile(), TileSlot(3));
    }
}
