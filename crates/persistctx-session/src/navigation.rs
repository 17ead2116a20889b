//! Lazy navigation tracking.
//!
//! Every lazy load of a relationship costs one store round trip. Loading the
//! same relationship for each of N parents one at a time is the N+1 pattern;
//! the tracker counts loads per (entity, relationship) and warns once the
//! configured threshold is reached.

use std::collections::HashMap;
use std::panic::Location;
use std::time::Instant;

use serde::Serialize;

/// Call sites kept per relationship; later loads are only counted.
pub const CALL_SITES_PER_RELATIONSHIP: usize = 5;

/// Tracks lazy loads per relationship.
#[derive(Debug)]
pub struct NavigationTracker {
    /// (entity, relationship) -> load count
    counts: HashMap<(&'static str, &'static str), usize>,
    /// Loads of one relationship before warning; `0` disables the tracker.
    threshold: usize,
    call_sites: Vec<CallSite>,
}

/// Where a lazy load was triggered.
#[derive(Debug, Clone)]
pub struct CallSite {
    /// The owning entity type name
    pub entity: &'static str,
    /// The relationship field name
    pub relationship: &'static str,
    /// Source file of the navigation
    pub file: &'static str,
    /// Line number in the source file
    pub line: u32,
    /// When the load occurred
    pub timestamp: Instant,
}

/// Aggregate navigation statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NavigationStats {
    /// Total lazy loads recorded
    pub total_loads: usize,
    /// Distinct relationships loaded
    pub relationships_loaded: usize,
    /// Relationships that reached the threshold
    pub repeated: usize,
}

impl Default for NavigationTracker {
    fn default() -> Self {
        Self::new(3)
    }
}

impl NavigationTracker {
    /// Create a tracker warning at `threshold` loads per relationship.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            counts: HashMap::new(),
            threshold,
            call_sites: Vec::new(),
        }
    }

    /// Warning threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether loads are being counted.
    pub fn is_enabled(&self) -> bool {
        self.threshold > 0
    }

    /// Record one lazy load.
    #[track_caller]
    pub fn record_load(&mut self, entity: &'static str, relationship: &'static str) {
        if !self.is_enabled() {
            return;
        }

        let count = self.counts.entry((entity, relationship)).or_insert(0);
        *count += 1;
        let count = *count;

        if count <= CALL_SITES_PER_RELATIONSHIP {
            let caller = Location::caller();
            self.call_sites.push(CallSite {
                entity,
                relationship,
                file: caller.file(),
                line: caller.line(),
                timestamp: Instant::now(),
            });
        }

        if count == self.threshold {
            self.emit_warning(entity, relationship, count);
        }
    }

    fn emit_warning(&self, entity: &'static str, relationship: &'static str, count: usize) {
        tracing::warn!(
            target: "persistctx::navigation",
            entity,
            relationship,
            loads = count,
            threshold = self.threshold,
            "Repeated lazy loads of one relationship; the same collection is being fetched per parent"
        );

        for (i, site) in self
            .call_sites
            .iter()
            .filter(|s| s.entity == entity && s.relationship == relationship)
            .enumerate()
        {
            tracing::debug!(
                target: "persistctx::navigation",
                index = i,
                file = site.file,
                line = site.line,
                "  [{}] {}:{}",
                i,
                site.file,
                site.line
            );
        }
    }

    /// Forget all counts and call sites.
    pub fn reset(&mut self) {
        self.counts.clear();
        self.call_sites.clear();
    }

    /// Loads recorded for one relationship.
    pub fn count_for(&self, entity: &'static str, relationship: &'static str) -> usize {
        self.counts.get(&(entity, relationship)).copied().unwrap_or(0)
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> NavigationStats {
        NavigationStats {
            total_loads: self.counts.values().sum(),
            relationships_loaded: self.counts.len(),
            repeated: if self.is_enabled() {
                self.counts.values().filter(|c| **c >= self.threshold).count()
            } else {
                0
            },
        }
    }

    /// Recorded call sites, at most [`CALL_SITES_PER_RELATIONSHIP`] per relationship.
    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }
}
