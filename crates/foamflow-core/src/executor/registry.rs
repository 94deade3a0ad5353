//! At most one execution per case.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::domain::{FoamError, Result};

type ActiveSet = Arc<Mutex<HashSet<PathBuf>>>;

/// Shared set of case directories with a run in flight.
///
/// Clone it into every controller that may touch the same output tree.
#[derive(Debug, Clone, Default)]
pub struct CaseRegistry {
    active: ActiveSet,
}

impl CaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `case_dir`, or fail with `CaseBusy` if another run holds it.
    pub fn try_acquire(&self, case_dir: impl AsRef<Path>) -> Result<CaseLease> {
        let key = case_key(case_dir.as_ref());
        if !lock(&self.active).insert(key.clone()) {
            return Err(FoamError::CaseBusy {
                case: key.display().to_string(),
            });
        }
        debug!(case_dir = %key.display(), "case lease acquired");
        Ok(CaseLease {
            key,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self, case_dir: impl AsRef<Path>) -> bool {
        lock(&self.active).contains(&case_key(case_dir.as_ref()))
    }
}

/// Absolute form of `case_dir`, so relative spellings of one case collide.
fn case_key(case_dir: &Path) -> PathBuf {
    std::path::absolute(case_dir).unwrap_or_else(|_| case_dir.to_path_buf())
}

/// Released on drop.
#[derive(Debug)]
pub struct CaseLease {
    key: PathBuf,
    active: ActiveSet,
}

impl CaseLease {
    pub fn case_dir(&self) -> &Path {
        &self.key
    }
}

impl Drop for CaseLease {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.key);
        debug!(case_dir = %self.key.display(), "case lease released");
    }
}

fn lock(active: &Mutex<HashSet<PathBuf>>) -> MutexGuard<'_, HashSet<PathBuf>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let registry = CaseRegistry::new();
        let lease = registry.try_acquire("/tmp/out/cavity").unwrap();
        assert!(registry.is_active("/tmp/out/cavity"));

        let err = registry.try_acquire("/tmp/out/cavity").unwrap_err();
        assert!(matches!(err, FoamError::CaseBusy { .. }));

        // Other cases are independent.
        let _other = registry.try_acquire("/tmp/out/pitzDaily").unwrap();

        drop(lease);
        assert!(!registry.is_active("/tmp/out/cavity"));
        registry.try_acquire("/tmp/out/cavity").unwrap();
    }

    #[test]
    fn test_relative_spellings_are_the_same_case() {
        let registry = CaseRegistry::new();
        let _lease = registry.try_acquire("out/cavity").unwrap();
        assert!(registry.is_active("./out/cavity"));
        assert!(matches!(
            registry.try_acquire("./out/cavity"),
            Err(FoamError::CaseBusy { .. })
        ));
        let cwd = std::env::current_dir().unwrap();
        assert!(registry.try_acquire(cwd.join("out/cavity")).is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let registry = CaseRegistry::new();
        let clone = registry.clone();
        let _lease = registry.try_acquire("case").unwrap();
        assert!(clone.try_acquire("case").is_err());
    }
}
