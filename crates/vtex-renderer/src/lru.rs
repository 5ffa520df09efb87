//! LRU Cache
//!
//! Fixed-capacity recency list over slot ids `0..capacity`. Nodes live in a
//! preallocated array and link to each other by index, so touching a slot is
//! O(1) and nothing is allocated after construction.

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Node {
    prev: u32,
    next: u32,
}

/// Recency-ordered set of slot ids
///
/// The head is the least recently used id, the tail the most recently used.
/// Every id in `0..capacity` is always a member.
#[derive(Debug, Clone)]
pub struct LruCache {
    nodes: Vec<Node>,
    head: u32,
    tail: u32,
}

impl LruCache {
    /// Create a cache ordered `0` (oldest) through `capacity - 1` (newest)
    pub fn new(capacity: u32) -> Self {
        assert!(capacity > 0 && capacity < NIL, "LRU capacity out of range");

        let nodes = (0..capacity)
            .map(|id| Node {
                prev: if id == 0 { NIL } else { id - 1 },
                next: if id + 1 == capacity { NIL } else { id + 1 },
            })
            .collect();

        Self {
            nodes,
            head: 0,
            tail: capacity - 1,
        }
    }

    /// Number of ids tracked
    pub fn capacity(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Least recently used id. Advisory: the id is not removed.
    pub fn oldest(&self) -> u32 {
        self.head
    }

    /// Most recently used id
    pub fn newest(&self) -> u32 {
        self.tail
    }

    /// Mark `id` as most recently used
    pub fn touch(&mut self, id: u32) {
        if id >= self.capacity() || id == self.tail {
            return;
        }
        self.unlink(id);
        self.push_back(id);
    }

    /// Mark `id` as least recently used so it is recycled first
    pub fn demote(&mut self, id: u32) {
        if id >= self.capacity() || id == self.head {
            return;
        }
        self.unlink(id);
        self.push_front(id);
    }

    /// Iterate ids from least to most recently used
    pub fn iter(&self) -> LruIter<'_> {
        LruIter {
            cache: self,
            cursor: self.head,
        }
    }

    fn unlink(&mut self, id: u32) {
        let Node { prev, next } = self.nodes[id as usize];
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev as usize].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next as usize].prev = prev;
        }
    }

    fn push_back(&mut self, id: u32) {
        self.nodes[id as usize] = Node {
            prev: self.tail,
            next: NIL,
        };
        if self.tail == NIL {
            self.head = id;
        } else {
            self.nodes[self.tail as usize].next = id;
        }
        self.tail = id;
    }

    fn push_front(&mut self, id: u32) {
        self.nodes[id as usize] = Node {
            prev: NIL,
            next: self.head,
        };
        if self.head == NIL {
            self.tail = id;
        } else {
            self.nodes[self.head as usize].prev = id;
        }
        self.head = id;
    }
}

/// Iterator over ids from least to most recently used
pub struct LruIter<'a> {
    cache: &'a LruCache,
    cursor: u32,
}

impl Iterator for LruIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cursor == NIL {
            return None;
        }
        let id = self.cursor;
        self.cursor = self.cache.nodes[id as usize].next;
        Some(id)
    }
}
