//! One-shot guards for side effects that navigate away from the page.
//!
//! A flag is claimed before the side effect runs, so a page that is loaded
//! again (bounce-back, reload, retry) sees it and skips the action.

use crate::error::Result;
use crate::store::JobStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardFlag {
    /// Navigated to the edit form to copy the rich text description
    EditCopy,
    /// Clicked delete on the listing page
    DeleteClick,
    /// Controller acted on the delete-success redirect
    DeleteObserved,
    /// Clicked the final submit button
    Submit,
}

impl GuardFlag {
    pub const ALL: [GuardFlag; 4] = [
        GuardFlag::EditCopy,
        GuardFlag::DeleteClick,
        GuardFlag::DeleteObserved,
        GuardFlag::Submit,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            GuardFlag::EditCopy => "guard.edit_copy",
            GuardFlag::DeleteClick => "guard.delete_click",
            GuardFlag::DeleteObserved => "guard.delete_observed",
            GuardFlag::Submit => "guard.submit",
        }
    }
}

impl fmt::Display for GuardFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key().trim_start_matches("guard."))
    }
}

#[derive(Clone)]
pub struct OneShotGuard {
    store: JobStore,
}

impl OneShotGuard {
    pub fn new(store: JobStore) -> Self {
        Self { store }
    }

    pub fn is_set(&self, flag: GuardFlag) -> Result<bool> {
        self.store.flag(flag)
    }

    pub fn claim(&self, flag: GuardFlag) -> Result<bool> {
        let claimed = self.store.claim_flag(flag)?;
        if claimed {
            tracing::debug!("Guard {} claimed", flag);
        } else {
            tracing::debug!("Guard {} already held", flag);
        }
        Ok(claimed)
    }

    pub fn clear(&self, flag: GuardFlag) -> Result<()> {
        self.store.clear_flag(flag)
    }

    pub fn clear_all(&self) -> Result<()> {
        self.store.clear_flags()
    }

    /// Run `action` unless `flag` is already held. The flag is claimed first
    /// and stays set even when the action fails.
    pub async fn run_once<F, Fut, T>(&self, flag: GuardFlag, action: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.claim(flag)? {
            return Ok(None);
        }
        action().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_two_loads_run_side_effect_once() {
        let store = JobStore::in_memory();
        let runs = Arc::new(AtomicUsize::new(0));

        // Each "page load" builds its own guard from the shared store
        for _ in 0..2 {
            let guard = OneShotGuard::new(store.clone());
            let runs = runs.clone();
            guard
                .run_once(GuardFlag::DeleteClick, || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flag_held_after_failed_action() {
        let guard = OneShotGuard::new(JobStore::in_memory());
        let result: Result<Option<()>> = guard
            .run_once(GuardFlag::Submit, || async {
                Err(crate::error::ReposterError::Browser("gone".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(guard.is_set(GuardFlag::Submit).unwrap());
    }

    #[test]
    fn test_clear_allows_new_claim() {
        let guard = OneShotGuard::new(JobStore::in_memory());
        assert!(guard.claim(GuardFlag::EditCopy).unwrap());
        assert!(!guard.claim(GuardFlag::EditCopy).unwrap());
        guard.clear(GuardFlag::EditCopy).unwrap();
        assert!(guard.claim(GuardFlag::EditCopy).unwrap());
    }
}
