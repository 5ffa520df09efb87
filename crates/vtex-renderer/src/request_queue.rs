//! Page Request Queue
//!
//! De-duplicating, rate-limited queue of page loads. Coarse pages are served
//! first: they are cheap and every finer page falls back on them.
//!
//! A request stays in the queue from [`PageRequestQueue::request`] until it
//! is completed or cancelled, so a page that is already being rendered is
//! never requested twice.

use glam::IVec2;
use smallvec::SmallVec;

use crate::page::{CellRef, PageId, RequestId};
use crate::texture::TileSlot;

/// Where a request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting to be dispatched
    Queued,
    /// Handed to the tile renderer, writing into `slot`
    Rendering { slot: TileSlot },
}

/// A pending page load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRequest {
    pub id: RequestId,
    /// View-relative page address, kept current across scrolls
    pub page: PageId,
    /// Cell the content belongs to
    pub cell: CellRef,
    pub state: RequestState,
}

impl LoadRequest {
    /// Target slot once dispatched
    pub fn slot(&self) -> Option<TileSlot> {
        match self.state {
            RequestState::Rendering { slot } => Some(slot),
            RequestState::Queued => None,
        }
    }
}

/// Queue of page load requests
#[derive(Debug, Clone)]
pub struct PageRequestQueue {
    requests: Vec<LoadRequest>,
    /// Maximum dispatches per update
    limit: usize,
    next_id: u64,
}

impl PageRequestQueue {
    /// Create a queue dispatching at most `limit` requests per update
    pub fn new(limit: usize) -> Self {
        Self {
            requests: Vec::new(),
            limit: limit.max(1),
            next_id: 1,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
    }

    /// Requests queued or rendering
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Requests waiting for dispatch
    pub fn queued_len(&self) -> usize {
        self.requests
            .iter()
            .filter(|r| r.state == RequestState::Queued)
            .count()
    }

    /// Requests handed to the tile renderer
    pub fn rendering_len(&self) -> usize {
        self.len() - self.queued_len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadRequest> {
        self.requests.iter()
    }

    /// Request for `page`, if one is queued or rendering
    pub fn find(&self, page: PageId) -> Option<&LoadRequest> {
        self.requests.iter().find(|r| r.page == page)
    }

    pub fn get(&self, id: RequestId) -> Option<&LoadRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    /// Request a load of `page` into `cell`. Idempotent: an existing request
    /// for the same page is returned instead of queueing a duplicate.
    pub fn request(&mut self, page: PageId, cell: CellRef) -> RequestId {
        if let Some(existing) = self.find(page) {
            return existing.id;
        }

        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.requests.push(LoadRequest {
            id,
            page,
            cell,
            state: RequestState::Queued,
        });
        id
    }

    /// Pick at most `limit` queued requests to dispatch this frame,
    /// coarsest mip first.
    pub fn update(&mut self) -> SmallVec<[RequestId; 4]> {
        // Stable ascending sort; serving from the tail takes the coarsest first.
        self.requests.sort_by_key(|r| r.page.mip);

        self.requests
            .iter()
            .rev()
            .filter(|r| r.state == RequestState::Queued)
            .take(self.limit)
            .map(|r| r.id)
            .collect()
    }

    /// Mark a queued request as rendering into `slot`
    pub fn begin_render(&mut self, id: RequestId, slot: TileSlot) -> Option<LoadRequest> {
        let request = self
            .requests
            .iter_mut()
            .find(|r| r.id == id && r.state == RequestState::Queued)?;
        request.state = RequestState::Rendering { slot };
        Some(*request)
    }

    /// Remove a rendering request whose tile has been written
    pub fn complete(&mut self, id: RequestId) -> Option<LoadRequest> {
        let position = self
            .requests
            .iter()
            .position(|r| r.id == id && matches!(r.state, RequestState::Rendering { .. }))?;
        Some(self.requests.remove(position))
    }

    /// Remove a request in any state
    pub fn cancel(&mut self, id: RequestId) -> Option<LoadRequest> {
        let position = self.requests.iter().position(|r| r.id == id)?;
        Some(self.requests.remove(position))
    }

    /// Cancel every request targeting `cell`
    pub fn cancel_cell<F>(&mut self, cell: CellRef, mut on_cancel: F)
    where
        F: FnMut(LoadRequest),
    {
        self.requests.retain(|r| {
            if r.cell == cell {
                on_cancel(*r);
                false
            } else {
                true
            }
        });
    }

    /// Cancel all requests, firing `on_cancel` for each
    pub fn clear_job<F>(&mut self, mut on_cancel: F)
    where
        F: FnMut(LoadRequest),
    {
        for request in self.requests.drain(..) {
            on_cancel(request);
        }
    }

    /// Shift the view-relative addresses of requests at `mip` after the view
    /// scrolled by `delta_cells`. Requests that end up outside the
    /// `extent`-cell grid are cancelled.
    pub fn rebase<F>(&mut self, mip: u8, delta_cells: IVec2, extent: i32, mut on_cancel: F)
    where
        F: FnMut(LoadRequest),
    {
        if delta_cells == IVec2::ZERO {
            return;
        }
        self.requests.retain_mut(|r| {
            if r.page.mip != mip {
                return true;
            }
            let moved = IVec2::new(r.page.x as i32, r.page.y as i32) - delta_cells;
            if moved.x < 0 || moved.y < 0 || moved.x >= extent || moved.y >= extent {
                on_cancel(*r);
                return false;
            }
            r.page.x = moved.x as u32;
            r.page.y = moved.y as u32;
            true
        });
    }

    /// Whether a rendering request is writing into `slot`
    pub fn is_slot_reserved(&self, slot: TileSlot) -> bool {
        self.requests.iter().any(|r| r.slot() == Some(slot))
    }
}
