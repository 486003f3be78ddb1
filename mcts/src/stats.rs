use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters shared by every rollout of a request; read once at the end for
/// the summary log line.
#[derive(Debug, Default)]
pub struct SearchStats {
    nodes_explored: AtomicUsize,
    actions_taken: AtomicUsize,
    simulations_run: AtomicUsize,
    total_depth_reached: AtomicUsize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub nodes_explored: usize,
    pub actions_taken: usize,
    pub simulations_run: usize,
    pub total_depth_reached: usize,
}

impl SearchStats {
    pub fn record_node_explored(&self) {
        self.nodes_explored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_taken(&self) {
        self.actions_taken.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_simulation(&self, depth: usize) {
        self.simulations_run.fetch_add(1, Ordering::Relaxed);
        self.total_depth_reached.fetch_add(depth, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            nodes_explored: self.nodes_explored.load(Ordering::Relaxed),
            actions_taken: self.actions_taken.load(Ordering::Relaxed),
            simulations_run: self.simulations_run.load(Ordering::Relaxed),
            total_depth_reached: self.total_depth_reached.load(Ordering::Relaxed),
        }
    }
}
