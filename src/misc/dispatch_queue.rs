use binary_heap_plus::BinaryHeap;
use compare::Compare;
use std::sync::Mutex;

/// Thread-safe priority queue the workers of one chunk pop their jobs
/// from. All jobs are pushed before the workers start, so an empty pop
/// means the chunk is drained; there is nothing to wait for.
pub struct DispatchQueue<T, C>
where
    C: Compare<T> + Clone,
{
    queue: Mutex<BinaryHeap<T, C>>,
}

impl<T, C: Compare<T> + Clone> DispatchQueue<T, C> {
    /// Create empty queue ordered by the given comparator
    pub fn new(comparator: C) -> Self {
        let heap = BinaryHeap::from_vec_cmp(vec![] as Vec<T>, comparator);
        Self {
            queue: Mutex::new(heap),
        }
    }

    /// push input into the queue
    /// - unrecoverable if lock fails so just unwrap
    pub fn push(&self, t: T) {
        let mut lq = self.queue.lock().unwrap();
        lq.push(t);
    }

    /// pop highest-priority element
    /// - unrecoverable if lock fails so just unwrap
    pub fn pop(&self) -> Option<T> {
        let mut lq = self.queue.lock().unwrap();
        lq.pop()
    }

    /// return number of elements in queue
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
