//! Indexed min-heap of workers ordered by outstanding load.
//!
//! Workers live in an arena addressed by [`WorkerId`]; the heap itself is a
//! sequence of ids. Every arena slot records its current index in that
//! sequence, so removing an arbitrary worker is O(log n) with no search.
//!
//! Ordering is by `(load, id)`: equal loads resolve to the lowest id. This
//! keeps selection deterministic for any sequence of operations.

/// Identifier of a worker slot inside a [`PriorityPool`].
pub type WorkerId = usize;

/// Anything the pool can order by load.
pub trait Loaded {
    /// Count of tasks assigned but not yet completed.
    fn load(&self) -> usize;
}

impl Loaded for usize {
    fn load(&self) -> usize {
        *self
    }
}

#[derive(Debug)]
struct Slot<W> {
    entry: W,
    /// Index in `heap`, `None` while detached.
    position: Option<usize>,
}

/// Min-heap of workers keyed by [`Loaded::load`].
///
/// Workers are never dropped from the arena. A worker taken out with
/// [`extract_min`](Self::extract_min) or [`remove_at`](Self::remove_at) is
/// *detached*: it keeps its id and is the only kind of worker that can be
/// mutated, through [`detached_mut`](Self::detached_mut). Reattach it with
/// [`insert`](Self::insert).
#[derive(Debug)]
pub struct PriorityPool<W> {
    slots: Vec<Slot<W>>,
    heap: Vec<WorkerId>,
}

impl<W> Default for PriorityPool<W> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            heap: Vec::new(),
        }
    }
}

impl<W: Loaded> PriorityPool<W> {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty pool with room for `capacity` workers.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            heap: Vec::with_capacity(capacity),
        }
    }

    /// Add a new worker to the arena and insert it into the heap.
    pub fn add(&mut self, entry: W) -> WorkerId {
        let id = self.slots.len();
        self.slots.push(Slot {
            entry,
            position: None,
        });
        self.insert(id);
        id
    }

    /// Insert a detached worker; O(log n).
    ///
    /// # Panics
    ///
    /// Panics if `id` is unknown or the worker is already in the heap.
    pub fn insert(&mut self, id: WorkerId) {
        assert!(id < self.slots.len(), "unknown worker {id}");
        assert!(
            self.slots[id].position.is_none(),
            "worker {id} is already in the pool"
        );
        let position = self.heap.len();
        self.heap.push(id);
        self.slots[id].position = Some(position);
        self.up(position);
    }

    /// Remove and return the least-loaded worker; O(log n).
    ///
    /// # Panics
    ///
    /// Panics if the heap is empty.
    pub fn extract_min(&mut self) -> WorkerId {
        assert!(!self.heap.is_empty(), "extract_min on an empty pool");
        let last = self.heap.len() - 1;
        self.swap(0, last);
        self.down(0, last);
        self.pop()
    }

    /// Remove and return the worker at heap index `position`; O(log n).
    ///
    /// # Panics
    ///
    /// Panics if `position` is out of range.
    pub fn remove_at(&mut self, position: usize) -> WorkerId {
        assert!(
            position < self.heap.len(),
            "remove_at({position}) on a pool of {}",
            self.heap.len()
        );
        let last = self.heap.len() - 1;
        if position != last {
            self.swap(position, last);
            if !self.down(position, last) {
                self.up(position);
            }
        }
        self.pop()
    }

    /// Least-loaded worker without removing it.
    #[must_use]
    pub fn peek_min(&self) -> Option<WorkerId> {
        self.heap.first().copied()
    }

    /// Heap index of a worker, `None` if detached or unknown.
    #[must_use]
    pub fn position(&self, id: WorkerId) -> Option<usize> {
        self.slots.get(id).and_then(|s| s.position)
    }

    /// Borrow a worker by id.
    #[must_use]
    pub fn get(&self, id: WorkerId) -> Option<&W> {
        self.slots.get(id).map(|s| &s.entry)
    }

    /// Mutably borrow a worker, only while it is detached.
    pub fn detached_mut(&mut self, id: WorkerId) -> Option<&mut W> {
        self.slots
            .get_mut(id)
            .filter(|s| s.position.is_none())
            .map(|s| &mut s.entry)
    }

    /// Swap in a new worker for a detached slot, returning the old one.
    ///
    /// # Panics
    ///
    /// Panics if `id` is unknown or the worker is in the heap.
    pub fn replace(&mut self, id: WorkerId, entry: W) -> W {
        assert!(id < self.slots.len(), "unknown worker {id}");
        let slot = &mut self.slots[id];
        assert!(slot.position.is_none(), "worker {id} is still in the pool");
        std::mem::replace(&mut slot.entry, entry)
    }

    /// Workers currently in the heap.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when no worker is in the heap.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Workers in the arena, attached or not.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Attached workers in heap order (not sorted order).
    pub fn iter(&self) -> impl Iterator<Item = (WorkerId, &W)> + '_ {
        self.heap.iter().map(|&id| (id, &self.slots[id].entry))
    }

    /// All arena entries with their heap index.
    pub fn slots(&self) -> impl Iterator<Item = (WorkerId, Option<usize>, &W)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(id, s)| (id, s.position, &s.entry))
    }

    /// Consume the pool, returning every worker in id order.
    #[must_use]
    pub fn into_entries(self) -> Vec<W> {
        self.slots.into_iter().map(|s| s.entry).collect()
    }

    /// Check heap order and that every recorded position matches the heap.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let ordered = (1..self.heap.len()).all(|i| !self.less(i, (i - 1) / 2));
        let indexed = self
            .heap
            .iter()
            .enumerate()
            .all(|(i, &id)| self.slots[id].position == Some(i));
        let attached = self.slots.iter().filter(|s| s.position.is_some()).count();
        ordered && indexed && attached == self.heap.len()
    }

    fn key(&self, i: usize) -> (usize, WorkerId) {
        let id = self.heap[i];
        (self.slots[id].entry.load(), id)
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.key(i) < self.key(j)
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.slots[self.heap[i]].position = Some(i);
        self.slots[self.heap[j]].position = Some(j);
    }

    fn pop(&mut self) -> WorkerId {
        let id = self
            .heap
            .pop()
            .unwrap_or_else(|| unreachable!("pop on an empty pool"));
        self.slots[id].position = None;
        id
    }

    fn up(&mut self, mut j: usize) {
        while j > 0 {
            let parent = (j - 1) / 2;
            if !self.less(j, parent) {
                break;
            }
            self.swap(parent, j);
            j = parent;
        }
    }

    /// Sift down within the first `n` elements. Returns true if the element
    /// moved.
    fn down(&mut self, start: usize, n: usize) -> bool {
        let mut i = start;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut j = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                j = right;
            }
            if !self.less(j, i) {
                break;
            }
            self.swap(i, j);
            i = j;
        }
        i > start
    }
}
