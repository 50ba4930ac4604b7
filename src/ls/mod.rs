//! Contains the structs and traits that define a `locksystem` backend.
//!
//! Locks are kept per namespace: the same path in two owners' namespaces
//! names two different resources.
use std::fmt::Debug;
use std::time::{Duration, SystemTime};

use xmltree::Element;

use crate::davpath::DavPath;
use crate::fs::UserId;

pub mod memls;

pub use memls::MemLs;

/// Type of the locks returned by DavLockSystem methods.
#[derive(Debug, Clone)]
pub struct DavLock {
    /// Token, `opaquelocktoken:<uuid>`.
    pub token: String,
    /// Path of the locked resource, within the namespace.
    pub path: DavPath,
    /// Namespace owner.
    pub ns: UserId,
    /// Name of the user that created the lock.
    pub principal: Option<String>,
    /// `<D:owner>` element from the LOCK body.
    pub owner: Option<Element>,
    pub timeout_at: Option<SystemTime>,
    pub timeout: Option<Duration>,
    pub shared: bool,
    /// Depth infinity.
    pub deep: bool,
}

impl DavLock {
    /// Does this lock cover `path`.
    pub fn covers(&self, path: &DavPath) -> bool {
        let mine = self.path.without_slash();
        let other = path.without_slash();
        mine == other || (self.deep && mine.is_ancestor_of(&other))
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.timeout_at, Some(t) if t <= now)
    }
}

/// The trait that defines a locksystem.
pub trait DavLockSystem: Debug + Send + Sync {
    /// Lock a node. Returns `Ok(new_lock)` if succeeded,
    /// or `Err(conflicting_lock)` if failed.
    #[allow(clippy::too_many_arguments)]
    fn lock(
        &self,
        ns: UserId,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, DavLock>;

    /// Unlock a node. Returns `Ok(())` if succeeded, `Err(())` if failed
    /// (because lock doesn't exist)
    fn unlock(&self, ns: UserId, path: &DavPath, token: &str) -> Result<(), ()>;

    /// Refresh lock. Returns updated lock if succeeded.
    fn refresh(
        &self,
        ns: UserId,
        path: &DavPath,
        token: &str,
        timeout: Option<Duration>,
    ) -> Result<DavLock, ()>;

    /// Check if a node is locked against a write by this principal.
    ///
    /// `submitted_tokens` are the tokens the client sent along in the
    /// `If` / `Lock-Token` headers. Returns the conflicting lock, if any.
    fn check(
        &self,
        ns: UserId,
        path: &DavPath,
        principal: Option<&str>,
        deep: bool,
        submitted_tokens: &[String],
    ) -> Result<(), DavLock>;

    /// Find the locks that cover a node.
    fn discover(&self, ns: UserId, path: &DavPath) -> Vec<DavLock>;

    /// Delete all locks at this node and below, after the node
    /// itself was deleted.
    fn delete(&self, ns: UserId, path: &DavPath) -> Result<(), ()>;
}
