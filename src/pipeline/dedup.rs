//! Bounded window of recently seen event ids
//!
//! Off by default. When enabled it drops redelivered events whose id was
//! accepted within the last `capacity` ids; older ids age out FIFO.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct DedupWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(4096)),
            seen: HashSet::with_capacity(capacity.min(4096)),
        }
    }

    /// Record `id`; returns false if it is already in the window
    pub fn check_and_record(&mut self, id: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(id) {
            return false;
        }

        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_within_window_rejected() {
        let mut window = DedupWindow::new(3);
        assert!(window.check_and_record("a"));
        assert!(!window.check_and_record("a"));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_ids_age_out() {
        let mut window = DedupWindow::new(2);
        assert!(window.check_and_record("a"));
        assert!(window.check_and_record("b"));
        assert!(window.check_and_record("c"));
        // "a" fell out of the window and is accepted again
        assert!(window.check_and_record("a"));
        assert!(!window.check_and_record("c"));
    }

    #[test]
    fn test_zero_capacity_never_rejects() {
        let mut window = DedupWindow::new(0);
        assert!(window.check_and_record("a"));
        assert!(window.check_and_record("a"));
        assert!(window.is_empty());
    }
}
