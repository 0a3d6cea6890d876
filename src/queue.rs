//! Admission counters for session creation.
//!
//! Every incoming creation request is pushed, then balanced by exactly one
//! of `create` (the session registered) or `drop_one` (the request failed or
//! was abandoned before registration). Every created session is eventually
//! balanced by one `release`.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Counters tracking creation requests in flight and sessions in use.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    limit: usize,
    queued: AtomicUsize,
    used: AtomicUsize,
}

/// Point-in-time view of the counters, exposed on the status endpoint.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub total: usize,
    pub used: usize,
    pub queued: usize,
}

impl AdmissionQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            queued: AtomicUsize::new(0),
            used: AtomicUsize::new(0),
        }
    }

    /// A creation request entered the proxy.
    pub fn push(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    /// A queued request turned into a registered session.
    pub fn create(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        self.used.fetch_add(1, Ordering::SeqCst);
    }

    /// A queued request failed or was abandoned before registration.
    pub fn drop_one(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
    }

    /// A registered session was deleted.
    pub fn release(&self) {
        self.used.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            total: self.limit,
            used: self.used.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_moves_a_request_from_queued_to_used() {
        let queue = AdmissionQueue::new(5);
        queue.push();
        assert_eq!(queue.snapshot().queued, 1);

        queue.create();
        let snapshot = queue.snapshot();
        assert_eq!(snapshot.queued, 0);
        assert_eq!(snapshot.used, 1);

        queue.release();
        assert_eq!(queue.snapshot().used, 0);
    }

    #[test]
    fn drop_balances_a_failed_request() {
        let queue = AdmissionQueue::new(5);
        queue.push();
        queue.drop_one();
        let snapshot = queue.snapshot();
        assert_eq!(snapshot.queued, 0);
        assert_eq!(snapshot.used, 0);
        assert_eq!(snapshot.total, 5);
    }
}
