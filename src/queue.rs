//! Request queue (C5): at most one tracked request in flight, FIFO
//! pending behind it. Transport-agnostic — the protocol handler decides
//! what bytes to send and when a tracked request has completed; this
//! module only enforces the ordering invariant.
//!
//! Fire-and-forget commands (steps, pause, resume, update-breakpoint)
//! never touch this queue: they resolve as soon as `send` succeeds.
//!
//! Entries carry a caller-chosen `K` tag alongside their frames, so the
//! protocol handler can tell which command a completion frame resolves
//! (eval vs. restart vs. backtrace) without a second lookup table.

use std::collections::VecDeque;

pub struct RequestQueue<K> {
    in_flight: Option<K>,
    pending: VecDeque<(K, Vec<Vec<u8>>)>,
}

impl<K> Default for RequestQueue<K> {
    fn default() -> Self {
        RequestQueue {
            in_flight: None,
            pending: VecDeque::new(),
        }
    }
}

impl<K: Copy> RequestQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn current_kind(&self) -> Option<K> {
        self.in_flight
    }

    /// Submit a tracked request's frames. If nothing is in flight, returns
    /// the frames back so the caller can send them immediately; otherwise
    /// they are queued and `None` is returned.
    pub fn enqueue(&mut self, kind: K, frames: Vec<Vec<u8>>) -> Option<Vec<Vec<u8>>> {
        if self.in_flight.is_some() {
            self.pending.push_back((kind, frames));
            None
        } else {
            self.in_flight = Some(kind);
            Some(frames)
        }
    }

    /// The in-flight tracked request completed (its terminating frame
    /// arrived). Returns the next queued request's kind and frames to
    /// submit, if any — the caller is responsible for actually sending them.
    pub fn complete(&mut self) -> Option<(K, Vec<Vec<u8>>)> {
        self.in_flight = None;
        if let Some((kind, frames)) = self.pending.pop_front() {
            self.in_flight = Some(kind);
            Some((kind, frames))
        } else {
            None
        }
    }

    /// A submit failure for the request the caller just popped off the
    /// queue (via `enqueue` or `complete`): fail that request without
    /// advancing further. The caller decides whether to retry.
    pub fn fail_in_flight(&mut self) {
        self.in_flight = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_submits_immediately() {
        let mut q = RequestQueue::new();
        assert_eq!(q.enqueue(1, vec![vec![1]]), Some(vec![vec![1]]));
        assert!(q.is_busy());
        assert_eq!(q.current_kind(), Some(1));
    }

    #[test]
    fn second_request_queues_behind_the_first() {
        let mut q = RequestQueue::new();
        q.enqueue(1, vec![vec![1]]);
        assert_eq!(q.enqueue(2, vec![vec![2]]), None);
        assert_eq!(q.pending_len(), 1);
    }

    #[test]
    fn completion_submits_the_next_queued_request() {
        let mut q = RequestQueue::new();
        q.enqueue(1, vec![vec![1]]);
        q.enqueue(2, vec![vec![2]]);
        q.enqueue(3, vec![vec![3]]);
        assert_eq!(q.complete(), Some((2, vec![vec![2]])));
        assert!(q.is_busy());
        assert_eq!(q.pending_len(), 1);
        assert_eq!(q.complete(), Some((3, vec![vec![3]])));
        assert_eq!(q.complete(), None);
        assert!(!q.is_busy());
    }

    #[test]
    fn submit_failure_does_not_advance_the_queue() {
        let mut q = RequestQueue::new();
        q.enqueue(1, vec![vec![1]]);
        q.enqueue(2, vec![vec![2]]);
        q.fail_in_flight();
        assert!(!q.is_busy());
        assert_eq!(q.pending_len(), 1);
    }

    #[test]
    fn multi_frame_entries_are_kept_together() {
        let mut q: RequestQueue<u8> = RequestQueue::new();
        let frames = vec![vec![1, 2], vec![3], vec![4, 5, 6]];
        assert_eq!(q.enqueue(0, frames.clone()), Some(frames));
    }
}
