use parking_lot::Mutex;

use crate::types::RequestId;

/// Thread-safe source of request and order ids.
///
/// Ids are handed out in contiguous blocks so a bracket's parent, take-profit
/// and stop-loss orders get predictable consecutive ids.
#[derive(Debug)]
pub struct RequestIdAllocator {
    next: Mutex<RequestId>,
}

impl Default for RequestIdAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl RequestIdAllocator {
    #[must_use]
    pub fn new(first: RequestId) -> Self {
        Self {
            next: Mutex::new(first),
        }
    }

    /// Reserves `count` contiguous ids (at least one) and returns the first.
    pub fn reserve(&self, count: u32) -> RequestId {
        let mut next = self.next.lock();
        let first = *next;
        *next += RequestId::from(count.max(1));
        first
    }

    pub fn next_id(&self) -> RequestId {
        self.reserve(1)
    }

    /// Moves the counter forward to `floor`. Never moves it backwards.
    pub fn seed(&self, floor: RequestId) {
        let mut next = self.next.lock();
        if floor > *next {
            *next = floor;
        }
    }

    /// The id the next reservation would return.
    pub fn peek(&self) -> RequestId {
        *self.next.lock()
    }
}
