//! Pre-search freshness gate
//!
//! Consulted at the start of every search. May force a catch-up reindex so
//! results never reflect a stale tree; the search always proceeds after
//! the attempt, even if the sync failed.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::registry::{Codebase, CodebaseStatus};
use crate::sync::FreshnessReport;

#[derive(Error, Debug)]
pub enum FreshnessError {
    #[error("Codebase is not indexed. Run index_codebase first.")]
    NotIndexed,
    #[error("Previous indexing failed: {0}. Run index_codebase to retry.")]
    IndexFailed(String),
}

/// What the search handler needs to know before querying.
#[derive(Debug, Clone)]
pub struct SearchClearance {
    /// Indexing is still running; results may be incomplete.
    pub incomplete: bool,
    /// The freshness check that ran, if the gate was consulted.
    pub freshness: Option<FreshnessReport>,
}

/// Process-wide gate. A single switch disables the pre-search check
/// entirely; per-codebase state lives in the controller's sync cache.
pub struct FreshnessGate {
    enabled: AtomicBool,
}

impl FreshnessGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Gate a search on `codebase`. Returns clearance to proceed, or an
    /// error if there is nothing to search yet.
    pub fn ensure_fresh(
        &self,
        codebase: &Codebase,
        status: &CodebaseStatus,
    ) -> Result<SearchClearance, FreshnessError> {
        match status {
            CodebaseStatus::NotIndexed => Err(FreshnessError::NotIndexed),
            CodebaseStatus::Failed { error, .. } => {
                Err(FreshnessError::IndexFailed(error.clone()))
            }
            CodebaseStatus::Indexing { .. } => Ok(SearchClearance {
                incomplete: true,
                freshness: None,
            }),
            CodebaseStatus::Indexed { .. } => {
                if !self.enabled() {
                    return Ok(SearchClearance {
                        incomplete: false,
                        freshness: None,
                    });
                }
                // Sync failures inside the check are logged there and never
                // surfaced; whatever index exists is searched.
                let report = codebase.controller.check_and_maybe_sync();
                Ok(SearchClearance {
                    incomplete: false,
                    freshness: Some(report),
                })
            }
        }
    }
}
