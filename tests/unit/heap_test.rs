//! Tests for the worker priority pool

use prometheus_balancer::core::{Loaded, PriorityPool};

/// Worker stand-in with a name, to check identity survives re-sorting.
#[derive(Debug)]
struct Worker {
    name: &'static str,
    pending: usize,
}

impl Loaded for Worker {
    fn load(&self) -> usize {
        self.pending
    }
}

fn worker(name: &'static str, pending: usize) -> Worker {
    Worker { name, pending }
}

/// Dispatch the way the balancer does: take the minimum, bump, reinsert.
fn dispatch(pool: &mut PriorityPool<Worker>) -> &'static str {
    let id = pool.extract_min();
    let w = pool.detached_mut(id).unwrap();
    w.pending += 1;
    let name = w.name;
    pool.insert(id);
    name
}

/// Complete one task on a worker the way the balancer does.
fn complete(pool: &mut PriorityPool<Worker>, id: usize) {
    let position = pool.position(id).unwrap();
    let id = pool.remove_at(position);
    pool.detached_mut(id).unwrap().pending -= 1;
    pool.insert(id);
}

#[test]
fn test_dispatch_fills_evenly() {
    let mut pool = PriorityPool::new();
    for name in ["a", "b", "c"] {
        pool.add(worker(name, 0));
    }

    let order: Vec<_> = (0..6).map(|_| dispatch(&mut pool)).collect();
    assert_eq!(order, vec!["a", "b", "c", "a", "b", "c"]);
    assert!(pool.iter().all(|(_, w)| w.pending == 2));
    assert!(pool.is_valid());
}

#[test]
fn test_completion_makes_worker_preferred() {
    let mut pool = PriorityPool::new();
    for name in ["a", "b", "c"] {
        pool.add(worker(name, 0));
    }
    for _ in 0..6 {
        dispatch(&mut pool);
    }

    complete(&mut pool, 2);
    assert_eq!(dispatch(&mut pool), "c");
    assert!(pool.is_valid());
}

#[test]
fn test_slots_report_detached_workers() {
    let mut pool = PriorityPool::new();
    pool.add(worker("a", 1));
    pool.add(worker("b", 0));

    let position = pool.position(0).unwrap();
    pool.remove_at(position);

    let slots: Vec<_> = pool.slots().map(|(id, position, w)| (id, position, w.name)).collect();
    assert_eq!(slots, vec![(0, None, "a"), (1, Some(0), "b")]);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.capacity(), 2);
}

#[test]
fn test_heap_of_plain_loads() {
    let mut pool = PriorityPool::new();
    for load in [9_usize, 4, 7, 1] {
        pool.add(load);
    }
    let mut drained = Vec::new();
    while !pool.is_empty() {
        let id = pool.extract_min();
        drained.push(*pool.get(id).unwrap());
    }
    assert_eq!(drained, vec![1, 4, 7, 9]);
}
