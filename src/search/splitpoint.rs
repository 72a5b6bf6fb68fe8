use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use std::sync::Arc;

use crate::board::position::{Move, Position};
use crate::search::alphabeta::{NodeType, Stack};
use crate::search::movepick::MovePicker;
use crate::search::threads::Worker;

// Shared state of one split node. The immutable part is written by the master
// before it publishes the split point (publication happens under the pool and
// split-point mutexes, so slaves always observe it initialized); everything
// the slaves race on lives behind `shared` or is the monotone `cutoff` flag.
pub struct SplitPoint {
    pub master: usize,
    // Kept only while the split is live, so slaves can wake the master
    // without touching the pool. Cleared at join to break the Arc cycle.
    pub master_handle: Option<Arc<Worker>>,
    pub parent: *const SplitPoint,
    pub pos: *const Position,
    pub picker: *mut MovePicker,
    pub ss: Stack,
    pub ply: i32,
    pub depth: i32,
    pub beta: i32,
    pub node_type: NodeType,
    pub cut_node: bool,
    pub threat_move: Move,

    // Set once, never cleared while the split is live.
    pub cutoff: AtomicBool,
    pub shared: Mutex<SplitShared>,
}

unsafe impl Send for SplitPoint {}
unsafe impl Sync for SplitPoint {}

#[derive(Debug, Default, Clone, Copy)]
pub struct SplitShared {
    pub alpha: i32,
    pub best_value: i32,
    pub best_move: Move,
    pub move_count: i32,
    pub nodes: u64,
    pub slaves_mask: u64,
}

impl SplitPoint {
    pub fn new() -> Self {
        Self {
            master: 0,
            master_handle: None,
            parent: std::ptr::null(),
            pos: std::ptr::null(),
            picker: std::ptr::null_mut(),
            ss: Stack::new(),
            ply: 0,
            depth: 0,
            beta: 0,
            node_type: NodeType::NonPv,
            cut_node: false,
            threat_move: Move::NULL,
            cutoff: AtomicBool::new(false),
            shared: Mutex::new(SplitShared::default()),
        }
    }

    #[inline(always)]
    pub fn cutoff_raised(&self) -> bool {
        self.cutoff.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn raise_cutoff(&self) {
        self.cutoff.store(true, Ordering::SeqCst);
    }
}

impl Default for SplitPoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_is_monotone() {
        let sp = SplitPoint::new();
        assert!(!sp.cutoff_raised());
        sp.raise_cutoff();
        assert!(sp.cutoff_raised());
        // Raising again never clears it.
        sp.raise_cutoff();
        assert!(sp.cutoff_raised());
    }

    #[test]
    fn test_best_value_updates_are_monotone_under_lock() {
        let sp = SplitPoint::new();
        {
            let mut g = sp.shared.lock().unwrap();
            g.best_value = -100;
        }
        for value in [-50, -70, 20, 10] {
            let mut g = sp.shared.lock().unwrap();
            if value > g.best_value {
                g.best_value = value;
            }
        }
        assert_eq!(sp.shared.lock().unwrap().best_value, 20);
    }
}
