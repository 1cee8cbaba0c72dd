// Mutation Guard
// Per-production operation state: Idle -> Mutating -> Idle. Replaces an
// ambient "locked" flag with an explicit guard acquired at every
// mutating call site, so two operators cannot interleave backend
// mutations on the same production.

use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
pub struct MutationGuard {
    mutating: Mutex<HashSet<String>>,
}

impl MutationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a production from Idle to Mutating. Fails while another
    /// operation on the same production is still outstanding; other
    /// productions are unaffected.
    pub fn begin(&self, production_id: &str) -> Result<MutationLock<'_>, String> {
        let mut mutating = self.mutating.lock().unwrap();
        if !mutating.insert(production_id.to_string()) {
            return Err(format!(
                "An operation on production '{production_id}' is already in progress"
            ));
        }
        Ok(MutationLock {
            guard: self,
            production_id: production_id.to_string(),
        })
    }

    /// Whether a production is currently mutating
    pub fn is_mutating(&self, production_id: &str) -> bool {
        self.mutating.lock().unwrap().contains(production_id)
    }

    fn end(&self, production_id: &str) {
        self.mutating.lock().unwrap().remove(production_id);
    }
}

/// Held for the duration of a mutating operation; dropping it returns
/// the production to Idle even on early error returns.
pub struct MutationLock<'a> {
    guard: &'a MutationGuard,
    production_id: String,
}

impl Drop for MutationLock<'_> {
    fn drop(&mut self) {
        self.guard.end(&self.production_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_rejected_until_drop() {
        let guard = MutationGuard::new();

        let lock = guard.begin("prod-1").unwrap();
        assert!(guard.is_mutating("prod-1"));
        assert!(guard.begin("prod-1").is_err());

        drop(lock);
        assert!(!guard.is_mutating("prod-1"));
        assert!(guard.begin("prod-1").is_ok());
    }

    #[test]
    fn test_productions_are_independent() {
        let guard = MutationGuard::new();
        let _lock_a = guard.begin("prod-a").unwrap();
        assert!(guard.begin("prod-b").is_ok());
    }
}
