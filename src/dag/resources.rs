// src/dag/resources.rs

//! Accounting of the run-wide resource budget and worker slots.

use tracing::warn;

use crate::types::Resources;

/// Tracks reservations of currently running jobs against the budget.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    budget: Resources,
    in_use: Resources,
    running: usize,
    max_workers: usize,
    peak: Resources,
}

impl ResourcePool {
    pub fn new(budget: Resources, max_workers: usize) -> Self {
        Self {
            budget,
            in_use: Resources::default(),
            running: 0,
            max_workers,
            peak: Resources::default(),
        }
    }

    pub fn budget(&self) -> Resources {
        self.budget
    }

    pub fn in_use(&self) -> Resources {
        self.in_use
    }

    /// Highest simultaneous reservation seen so far, per axis.
    pub fn peak(&self) -> Resources {
        self.peak
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn available(&self) -> Resources {
        self.budget.saturating_sub(&self.in_use)
    }

    pub fn has_free_worker(&self) -> bool {
        self.running < self.max_workers
    }

    /// A request that could never be satisfied, even on an idle pool.
    pub fn exceeds_budget(&self, request: &Resources) -> bool {
        !self.budget.contains(request)
    }

    pub fn fits(&self, request: &Resources) -> bool {
        self.has_free_worker() && self.available().contains(request)
    }

    pub fn reserve(&mut self, request: Resources) {
        debug_assert!(self.fits(&request));
        self.in_use = self.in_use.saturating_add(&request);
        self.running += 1;
        self.peak.cores = self.peak.cores.max(self.in_use.cores);
        self.peak.memory = self.peak.memory.max(self.in_use.memory);
    }

    pub fn release(&mut self, request: Resources) {
        if !self.in_use.contains(&request) || self.running == 0 {
            warn!(
                %request,
                in_use = %self.in_use,
                running = self.running,
                "releasing more resources than reserved"
            );
        }
        self.in_use = self.in_use.saturating_sub(&request);
        self.running = self.running.saturating_sub(1);
    }
}
