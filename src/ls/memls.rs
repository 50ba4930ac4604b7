//! Simple in-memory locksystem.
//!
//! Locks are always recorded and reported. Whether they block anything
//! depends on `enforce`: an advisory `MemLs` never reports a conflict,
//! neither on LOCK nor on `check`.
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use uuid::Uuid;
use xmltree::Element;

use crate::davpath::DavPath;
use crate::fs::UserId;
use crate::ls::*;

/// Ephemeral in-memory LockSystem.
#[derive(Debug)]
pub struct MemLs {
    enforce: bool,
    locks: Mutex<Vec<DavLock>>,
}

impl MemLs {
    /// Create a new "memls" locksystem.
    pub fn new(enforce: bool) -> Arc<MemLs> {
        Arc::new(MemLs {
            enforce,
            locks: Mutex::new(Vec::new()),
        })
    }

    fn purge(locks: &mut Vec<DavLock>) {
        let now = SystemTime::now();
        locks.retain(|l| !l.is_expired(now));
    }
}

// Two locks conflict when one covers the other's root and they are
// not both shared.
fn conflicts(existing: &DavLock, path: &DavPath, deep: bool, shared: bool) -> bool {
    if existing.shared && shared {
        return false;
    }
    let p = path.without_slash();
    let e = existing.path.without_slash();
    existing.covers(&p) || (deep && p.is_ancestor_of(&e))
}

fn expiry(timeout: Option<Duration>) -> Option<SystemTime> {
    timeout.map(|t| SystemTime::now() + t)
}

impl DavLockSystem for MemLs {
    fn lock(
        &self,
        ns: UserId,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, DavLock> {
        let mut locks = self.locks.lock();
        MemLs::purge(&mut locks);

        if self.enforce {
            if let Some(l) = locks
                .iter()
                .find(|l| l.ns == ns && conflicts(l, path, deep, shared))
            {
                debug!("lock on {path:?} conflicts with {}", l.token);
                return Err(l.clone());
            }
        }

        let lock = DavLock {
            token: format!("opaquelocktoken:{}", Uuid::new_v4()),
            path: path.without_slash(),
            ns,
            principal: principal.map(|s| s.to_string()),
            owner: owner.cloned(),
            timeout_at: expiry(timeout),
            timeout,
            shared,
            deep,
        };
        trace!("lock {} created", lock.token);
        locks.push(lock.clone());
        Ok(lock)
    }

    fn unlock(&self, ns: UserId, path: &DavPath, token: &str) -> Result<(), ()> {
        let mut locks = self.locks.lock();
        MemLs::purge(&mut locks);
        let before = locks.len();
        locks.retain(|l| !(l.ns == ns && l.token == token && l.covers(path)));
        if locks.len() < before {
            Ok(())
        } else {
            Err(())
        }
    }

    fn refresh(
        &self,
        ns: UserId,
        path: &DavPath,
        token: &str,
        timeout: Option<Duration>,
    ) -> Result<DavLock, ()> {
        let mut locks = self.locks.lock();
        MemLs::purge(&mut locks);
        let lock = locks
            .iter_mut()
            .find(|l| l.ns == ns && l.token == token && l.covers(path))
            .ok_or(())?;
        lock.timeout = timeout;
        lock.timeout_at = expiry(timeout);
        Ok(lock.clone())
    }

    fn check(
        &self,
        ns: UserId,
        path: &DavPath,
        principal: Option<&str>,
        deep: bool,
        submitted_tokens: &[String],
    ) -> Result<(), DavLock> {
        if !self.enforce {
            return Ok(());
        }
        let mut locks = self.locks.lock();
        MemLs::purge(&mut locks);
        for l in locks.iter().filter(|l| l.ns == ns) {
            if !conflicts(l, path, deep, false) {
                continue;
            }
            let held = submitted_tokens.iter().any(|t| *t == l.token);
            let same_principal = l.principal.is_none() || l.principal.as_deref() == principal;
            if !(held && same_principal) {
                return Err(l.clone());
            }
        }
        Ok(())
    }

    fn discover(&self, ns: UserId, path: &DavPath) -> Vec<DavLock> {
        let mut locks = self.locks.lock();
        MemLs::purge(&mut locks);
        locks
            .iter()
            .filter(|l| l.ns == ns && l.covers(path))
            .cloned()
            .collect()
    }

    fn delete(&self, ns: UserId, path: &DavPath) -> Result<(), ()> {
        let mut locks = self.locks.lock();
        locks.retain(|l| !(l.ns == ns && path.is_ancestor_of(&l.path)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: UserId = UserId(1);

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[test]
    fn test_lock_unlock() {
        let ls = MemLs::new(false);
        let lock = ls
            .lock(NS, &p("/a.txt"), Some("alice"), None, Some(Duration::from_secs(60)), false, false)
            .unwrap();
        assert!(lock.token.starts_with("opaquelocktoken:"));
        assert_eq!(ls.discover(NS, &p("/a.txt")).len(), 1);
        assert!(ls.discover(UserId(2), &p("/a.txt")).is_empty());
        assert!(ls.unlock(NS, &p("/a.txt"), &lock.token).is_ok());
        assert!(ls.unlock(NS, &p("/a.txt"), &lock.token).is_err());
        assert!(ls.discover(NS, &p("/a.txt")).is_empty());
    }

    #[test]
    fn test_tokens_are_unique() {
        let ls = MemLs::new(false);
        let a = ls.lock(NS, &p("/x"), None, None, None, true, false).unwrap();
        let b = ls.lock(NS, &p("/x"), None, None, None, true, false).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_advisory_never_conflicts() {
        let ls = MemLs::new(false);
        ls.lock(NS, &p("/dir"), Some("alice"), None, None, false, true).unwrap();
        assert!(ls.lock(NS, &p("/dir/f"), Some("bob"), None, None, false, false).is_ok());
        assert!(ls.check(NS, &p("/dir/f"), Some("bob"), false, &[]).is_ok());
    }

    #[test]
    fn test_enforced_conflicts() {
        let ls = MemLs::new(true);
        let lock = ls
            .lock(NS, &p("/dir"), Some("alice"), None, None, false, true)
            .unwrap();
        assert!(ls.lock(NS, &p("/dir/f"), Some("bob"), None, None, false, false).is_err());
        assert!(ls.lock(NS, &p("/other"), Some("bob"), None, None, false, false).is_ok());
        assert!(ls.check(NS, &p("/dir/f"), Some("alice"), false, &[]).is_err());
        assert!(ls
            .check(NS, &p("/dir/f"), Some("alice"), false, &[lock.token.clone()])
            .is_ok());
        // deep check on an ancestor sees the lock below it.
        assert!(ls.check(NS, &p("/"), Some("bob"), true, &[]).is_err());
    }

    #[test]
    fn test_refresh_and_expiry() {
        let ls = MemLs::new(true);
        let lock = ls
            .lock(NS, &p("/a"), None, None, Some(Duration::from_secs(0)), false, false)
            .unwrap();
        // zero timeout: expired right away.
        assert!(ls.refresh(NS, &p("/a"), &lock.token, None).is_err());

        let lock = ls.lock(NS, &p("/a"), None, None, Some(Duration::from_secs(10)), false, false).unwrap();
        let refreshed = ls
            .refresh(NS, &p("/a"), &lock.token, Some(Duration::from_secs(100)))
            .unwrap();
        assert_eq!(refreshed.timeout, Some(Duration::from_secs(100)));
        assert!(ls.refresh(NS, &p("/a"), "opaquelocktoken:nope", None).is_err());
    }

    #[test]
    fn test_delete_subtree() {
        let ls = MemLs::new(false);
        ls.lock(NS, &p("/d/a"), None, None, None, false, false).unwrap();
        ls.lock(NS, &p("/d/b/c"), None, None, None, false, false).unwrap();
        ls.lock(NS, &p("/e"), None, None, None, false, false).unwrap();
        ls.delete(NS, &p("/d")).unwrap();
        assert!(ls.discover(NS, &p("/d/a")).is_empty());
        assert_eq!(ls.discover(NS, &p("/e")).len(), 1);
    }
}
