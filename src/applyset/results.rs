//! Per-object outcomes and their rollup

use super::ObjectError;
use crate::manifest::ObjectKey;

#[derive(Debug)]
pub enum ObjectOutcome {
    Applied { healthy: bool },
    Failed(ObjectError),
}

#[derive(Debug)]
pub struct ObjectResult {
    pub key: ObjectKey,
    pub outcome: ObjectOutcome,
}

/// Totals for one `apply_once` pass. `apply_success + apply_fail == total`
/// always holds, as does `healthy + unhealthy == apply_success`.
#[derive(Debug, Default)]
pub struct ApplyResults {
    pub total: usize,
    pub apply_success: usize,
    pub apply_fail: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub objects: Vec<ObjectResult>,
    cancelled: bool,
}

impl ApplyResults {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn applied(&mut self, key: ObjectKey, healthy: bool) {
        self.apply_success += 1;
        if healthy {
            self.healthy += 1;
        } else {
            self.unhealthy += 1;
        }
        self.objects.push(ObjectResult {
            key,
            outcome: ObjectOutcome::Applied { healthy },
        });
    }

    pub fn failed(&mut self, key: ObjectKey, error: ObjectError) {
        if matches!(error, ObjectError::Cancelled) {
            self.cancelled = true;
        }
        self.apply_fail += 1;
        self.objects.push(ObjectResult {
            key,
            outcome: ObjectOutcome::Failed(error),
        });
    }

    pub fn all_applied(&self) -> bool {
        self.apply_fail == 0
    }

    pub fn all_healthy(&self) -> bool {
        self.unhealthy == 0
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn errors(&self) -> impl Iterator<Item = (&ObjectKey, &ObjectError)> {
        self.objects.iter().filter_map(|r| match &r.outcome {
            ObjectOutcome::Failed(e) => Some((&r.key, e)),
            ObjectOutcome::Applied { .. } => None,
        })
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "{} objects: {} applied ({} healthy, {} unhealthy), {} failed",
            self.total, self.apply_success, self.healthy, self.unhealthy, self.apply_fail
        )
    }
}
