//! Endpoint registry: which live tunnel currently owns which endpoint name.
//!
//! Pure in-memory coordination: no I/O happens while the lock is held.
//! Replacing a tunnel is two-phase: swap under the write lock, then
//! [`Tunnel::terminate`] the evicted handle after the lock is released.
//! [`Registry::unregister`] never terminates; the connection that owns a
//! handle tears it down itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use crate::tunnel::Tunnel;

/// Shared, non-owning reference to a registered tunnel.
pub type TunnelHandle = Arc<dyn Tunnel>;

/// Identity of one successful registration. Lets a connection release its
/// endpoint without evicting a newer registration under the same name.
pub type RegistrationId = u64;

struct Entry {
    id: RegistrationId,
    tunnel: TunnelHandle,
}

#[derive(Default)]
struct Inner {
    tunnels: HashMap<String, Entry>,
    /// Billing attribution only, never consulted for routing.
    owners: HashMap<String, String>,
}

/// Concurrent endpoint → tunnel directory. Cheap to clone.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `tunnel` for `endpoint`, replacing any existing registration.
    ///
    /// The owner mapping is set to `owner`, or cleared when `owner` is `None`
    /// or empty. A replaced tunnel is terminated exactly once, after the lock
    /// is released.
    pub fn register(
        &self,
        endpoint: &str,
        tunnel: TunnelHandle,
        owner: Option<&str>,
    ) -> RegistrationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let replaced = {
            let mut inner = self.write();
            let replaced = inner
                .tunnels
                .insert(endpoint.to_string(), Entry { id, tunnel });
            match owner.filter(|o| !o.is_empty()) {
                Some(owner) => {
                    inner
                        .owners
                        .insert(endpoint.to_string(), owner.to_string());
                }
                None => {
                    inner.owners.remove(endpoint);
                }
            }
            replaced
        };

        if let Some(old) = replaced {
            info!(endpoint, old_id = old.id, new_id = id, "Replacing existing tunnel");
            old.tunnel.terminate();
        }
        id
    }

    /// Remove the routing and owner entries for `endpoint`.
    ///
    /// Does not terminate the handle. Returns whether a tunnel was removed.
    pub fn unregister(&self, endpoint: &str) -> bool {
        let mut inner = self.write();
        inner.owners.remove(endpoint);
        inner.tunnels.remove(endpoint).is_some()
    }

    /// Like [`unregister`](Self::unregister), but only if `endpoint` is still
    /// held by registration `id`.
    pub fn release(&self, endpoint: &str, id: RegistrationId) -> bool {
        let mut inner = self.write();
        if inner.tunnels.get(endpoint).is_some_and(|e| e.id == id) {
            inner.tunnels.remove(endpoint);
            inner.owners.remove(endpoint);
            true
        } else {
            false
        }
    }

    /// Look up the tunnel for `endpoint`.
    pub fn get(&self, endpoint: &str) -> Option<TunnelHandle> {
        self.read().tunnels.get(endpoint).map(|e| e.tunnel.clone())
    }

    /// Billing owner for `endpoint`, if attributed.
    pub fn owner(&self, endpoint: &str) -> Option<String> {
        self.read().owners.get(endpoint).cloned()
    }

    /// Snapshot of registered endpoint names. May be stale by the time it is read.
    pub fn list(&self) -> Vec<String> {
        self.read().tunnels.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every registration and terminate each tunnel (relay shutdown).
    /// Returns how many tunnels were terminated.
    pub fn drain(&self) -> usize {
        let drained: Vec<(String, Entry)> = {
            let mut inner = self.write();
            inner.owners.clear();
            inner.tunnels.drain().collect()
        };
        let count = drained.len();
        for (endpoint, entry) in drained {
            info!(endpoint = %endpoint, "Terminating tunnel for relay shutdown");
            entry.tunnel.terminate();
        }
        count
    }
}
