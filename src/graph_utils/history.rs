//! Bounded undo/redo over whole-graph snapshots.
//!
//! Snapshots are deep copies taken *before* a structural mutation. Calls that
//! land inside the coalescing window of the previous accepted snapshot are
//! dropped, so a gesture that fans out into several mutations (a node delete
//! followed by its edge deletes) undoes as one step.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;

use super::graph::ModelGraph;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restore {
    Idle,
    Undo,
    Redo,
}

#[derive(Debug, Clone)]
pub struct HistoryManager {
    past: VecDeque<ModelGraph>,
    future: VecDeque<ModelGraph>,
    limit: usize,
    coalesce_window: Duration,
    last_snapshot: Option<Instant>,
    restoring: Restore,
}

impl Default for HistoryManager {
    fn default() -> Self { Self::new(DEFAULT_HISTORY_LIMIT, DEFAULT_COALESCE_WINDOW) }
}

impl HistoryManager {
    pub fn new(limit: usize, coalesce_window: Duration) -> Self {
        Self {
            past: VecDeque::new(),
            future: VecDeque::new(),
            limit: limit.max(1),
            coalesce_window,
            last_snapshot: None,
            restoring: Restore::Idle,
        }
    }

    /// Record `graph` as the state to return to. Returns false when the call
    /// was coalesced into the previous entry or suppressed by a restore.
    pub fn snapshot(&mut self, graph: &ModelGraph, now: Instant) -> bool {
        if self.restoring != Restore::Idle {
            debug!("history: snapshot suppressed during {:?}", self.restoring);
            return false;
        }
        if let Some(last) = self.last_snapshot
            && now.saturating_duration_since(last) < self.coalesce_window
        {
            return false;
        }
        self.last_snapshot = Some(now);
        self.future.clear();
        push_bounded(&mut self.past, graph.clone(), self.limit);
        true
    }

    /// First half of an undo: stores `current` for redo and hands back the
    /// state to restore. Snapshots are suppressed until [`finish_restore`].
    ///
    /// [`finish_restore`]: HistoryManager::finish_restore
    pub fn begin_undo(&mut self, current: &ModelGraph) -> Option<ModelGraph> {
        if self.restoring != Restore::Idle {
            return None;
        }
        let previous = self.past.pop_back()?;
        push_bounded(&mut self.future, current.clone(), self.limit);
        self.restoring = Restore::Undo;
        // The next mutation starts a fresh entry
        self.last_snapshot = None;
        Some(previous)
    }

    pub fn begin_redo(&mut self, current: &ModelGraph) -> Option<ModelGraph> {
        if self.restoring != Restore::Idle {
            return None;
        }
        let next = self.future.pop_back()?;
        push_bounded(&mut self.past, current.clone(), self.limit);
        self.restoring = Restore::Redo;
        self.last_snapshot = None;
        Some(next)
    }

    pub fn finish_restore(&mut self) { self.restoring = Restore::Idle; }

    pub fn is_restoring(&self) -> bool { self.restoring != Restore::Idle }

    pub fn undo(&mut self, live: &mut ModelGraph) -> bool {
        match self.begin_undo(live) {
            Some(previous) => {
                *live = previous;
                self.finish_restore();
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self, live: &mut ModelGraph) -> bool {
        match self.begin_redo(live) {
            Some(next) => {
                *live = next;
                self.finish_restore();
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool { !self.past.is_empty() }
    pub fn can_redo(&self) -> bool { !self.future.is_empty() }
    pub fn past_len(&self) -> usize { self.past.len() }
    pub fn future_len(&self) -> usize { self.future.len() }
    pub fn coalesce_window(&self) -> Duration { self.coalesce_window }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
        self.last_snapshot = None;
        self.restoring = Restore::Idle;
    }
}

// Oldest entries fall off the front
fn push_bounded(stack: &mut VecDeque<ModelGraph>, graph: ModelGraph, limit: usize) {
    stack.push_back(graph);
    while stack.len() > limit {
        stack.pop_front();
    }
}
