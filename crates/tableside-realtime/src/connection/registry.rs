//! Connection registry with reverse indices.
//!
//! Maintains a primary index by connection id and reverse indices by user,
//! branch, sector and session. All mutations and all scope lookups run under
//! the [`LockManager`] locks of the scopes involved, so a lookup observes
//! either the full effect of a registration, unregistration or scope update,
//! or none of it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use tableside_core::error::AppError;
use tableside_core::result::AppResult;
use tableside_core::types::{BranchId, ConnectionId, SectorId, SessionId, TenantId, UserId};

use super::handle::{ConnectionHandle, ConnectionScopes};
use super::lock::{LockManager, LockScope};

type Members = HashMap<ConnectionId, Arc<ConnectionHandle>>;
type ReverseIndex<K> = DashMap<K, Members>;

/// Capacity limits enforced at registration.
#[derive(Debug, Clone, Copy)]
pub struct RegistryLimits {
    /// Maximum concurrent connections for one user.
    pub max_per_user: usize,
    /// Maximum concurrent connections indexed under one branch.
    pub max_per_branch: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_per_user: 3,
            max_per_branch: 1000,
        }
    }
}

/// Index sizes, for health and metrics reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Registered connections.
    pub connections: usize,
    /// Users with at least one connection.
    pub users: usize,
    /// Branches with at least one connection.
    pub branches: usize,
    /// Sectors with at least one connection.
    pub sectors: usize,
    /// Table sessions with at least one connection.
    pub sessions: usize,
}

/// The set of live, registered connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    locks: Arc<LockManager>,
    limits: RegistryLimits,
    by_id: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    by_user: ReverseIndex<UserId>,
    by_branch: ReverseIndex<BranchId>,
    by_sector: ReverseIndex<SectorId>,
    by_session: ReverseIndex<SessionId>,
    accepting: AtomicBool,
}

impl ConnectionRegistry {
    /// Create an empty registry sharing `locks`.
    pub fn new(locks: Arc<LockManager>, limits: RegistryLimits) -> Self {
        Self {
            locks,
            limits,
            by_id: DashMap::new(),
            by_user: DashMap::new(),
            by_branch: DashMap::new(),
            by_sector: DashMap::new(),
            by_session: DashMap::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Shared lock manager.
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Register a connection under its current scopes.
    ///
    /// Registering the same id again with identical scopes is a no-op;
    /// with different scopes it is a conflict. Fails with a capacity error
    /// when a per-user or per-branch limit would be exceeded, and with
    /// service-unavailable once the registry stopped accepting.
    pub async fn register(&self, handle: Arc<ConnectionHandle>) -> AppResult<()> {
        if !self.is_accepting() {
            return Err(AppError::service_unavailable("Gateway is shutting down"));
        }

        let scopes = handle.scopes().await;
        let _guard = self.locks.acquire(lock_set(&handle, &scopes)).await?;

        if !self.is_accepting() {
            return Err(AppError::service_unavailable("Gateway is shutting down"));
        }

        let existing = self.by_id.get(&handle.id).map(|e| Arc::clone(e.value()));
        if let Some(existing) = existing {
            if existing.identity == handle.identity && existing.scopes().await == scopes {
                debug!(conn_id = %handle.id, "Connection already registered");
                return Ok(());
            }
            return Err(AppError::conflict(format!(
                "Connection {} is already registered with different scopes",
                handle.id
            )));
        }

        if let Some(user_id) = handle.identity.user_id {
            let count = member_count(&self.by_user, &user_id);
            if count >= self.limits.max_per_user {
                return Err(AppError::resource_exhausted(format!(
                    "User {user_id} already has {count} open connections"
                )));
            }
        }
        for branch_id in &scopes.branch_ids {
            let count = member_count(&self.by_branch, branch_id);
            if count >= self.limits.max_per_branch {
                return Err(AppError::resource_exhausted(format!(
                    "Branch {branch_id} already has {count} open connections"
                )));
            }
        }

        if let Some(user_id) = handle.identity.user_id {
            index_insert(&self.by_user, user_id, &handle);
        }
        if let Some(session_id) = handle.identity.session_id {
            index_insert(&self.by_session, session_id, &handle);
        }
        for branch_id in &scopes.branch_ids {
            index_insert(&self.by_branch, *branch_id, &handle);
        }
        for sector_id in &scopes.sector_ids {
            index_insert(&self.by_sector, *sector_id, &handle);
        }
        self.by_id.insert(handle.id, Arc::clone(&handle));

        info!(
            conn_id = %handle.id,
            tenant_id = handle.tenant_id(),
            role = %handle.role(),
            branches = ?scopes.branch_ids,
            sectors = ?scopes.sector_ids,
            "Connection registered"
        );
        Ok(())
    }

    /// Remove a connection from every index.
    ///
    /// Returns the removed handle, or `None` if it was not registered.
    pub async fn unregister(&self, id: &ConnectionId) -> AppResult<Option<Arc<ConnectionHandle>>> {
        let Some(handle) = self.get(id) else {
            return Ok(None);
        };

        loop {
            let scopes = handle.scopes().await;
            let _guard = self.locks.acquire(lock_set(&handle, &scopes)).await?;

            // A scope update may have landed between the read and the lock.
            if handle.scopes().await != scopes {
                continue;
            }

            if self.by_id.remove(id).is_none() {
                return Ok(None);
            }

            if let Some(user_id) = handle.identity.user_id {
                index_remove(&self.by_user, &user_id, id);
            }
            if let Some(session_id) = handle.identity.session_id {
                index_remove(&self.by_session, &session_id, id);
            }
            for branch_id in &scopes.branch_ids {
                index_remove(&self.by_branch, branch_id, id);
            }
            for sector_id in &scopes.sector_ids {
                index_remove(&self.by_sector, sector_id, id);
            }

            info!(conn_id = %id, "Connection unregistered");
            return Ok(Some(handle));
        }
    }

    /// Atomically replace a connection's branch and sector scopes.
    ///
    /// Locks the union of old and new scopes, so concurrent lookups see
    /// either the old or the new scope set, never a mix.
    pub async fn update_scopes(
        &self,
        id: &ConnectionId,
        branch_ids: impl IntoIterator<Item = BranchId>,
        sector_ids: impl IntoIterator<Item = SectorId>,
    ) -> AppResult<ConnectionScopes> {
        let handle = self
            .get(id)
            .ok_or_else(|| AppError::not_found(format!("Connection {id} is not registered")))?;
        let new = ConnectionScopes::new(branch_ids, sector_ids);

        loop {
            let old = handle.scopes().await;
            let union = ConnectionScopes {
                branch_ids: old.branch_ids.union(&new.branch_ids).copied().collect(),
                sector_ids: old.sector_ids.union(&new.sector_ids).copied().collect(),
            };
            let _guard = self.locks.acquire(lock_set(&handle, &union)).await?;

            if handle.scopes().await != old {
                continue;
            }
            if !self.by_id.contains_key(id) {
                return Err(AppError::not_found(format!("Connection {id} is not registered")));
            }

            for branch_id in new.branch_ids.difference(&old.branch_ids) {
                let count = member_count(&self.by_branch, branch_id);
                if count >= self.limits.max_per_branch {
                    return Err(AppError::resource_exhausted(format!(
                        "Branch {branch_id} already has {count} open connections"
                    )));
                }
            }

            apply_diff(&self.by_branch, &old.branch_ids, &new.branch_ids, &handle);
            apply_diff(&self.by_sector, &old.sector_ids, &new.sector_ids, &handle);
            handle.replace_scopes(new.clone()).await;

            debug!(
                conn_id = %id,
                branches = ?new.branch_ids,
                sectors = ?new.sector_ids,
                "Connection scopes updated"
            );
            return Ok(new);
        }
    }

    /// Connection by id.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.by_id.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Snapshot of the connections indexed under a branch.
    pub async fn lookup_by_branch(&self, branch_id: BranchId) -> AppResult<Vec<Arc<ConnectionHandle>>> {
        let _guard = self.locks.acquire([LockScope::Branch(branch_id)]).await?;
        Ok(snapshot(&self.by_branch, &branch_id))
    }

    /// Snapshot of the connections indexed under a sector.
    pub async fn lookup_by_sector(&self, sector_id: SectorId) -> AppResult<Vec<Arc<ConnectionHandle>>> {
        let _guard = self.locks.acquire([LockScope::Sector(sector_id)]).await?;
        Ok(snapshot(&self.by_sector, &sector_id))
    }

    /// Snapshot of a user's connections.
    pub async fn lookup_by_user(&self, user_id: UserId) -> AppResult<Vec<Arc<ConnectionHandle>>> {
        let _guard = self.locks.acquire([LockScope::User(user_id)]).await?;
        Ok(snapshot(&self.by_user, &user_id))
    }

    /// Snapshot of the connections bound to a table session.
    pub async fn lookup_by_session(&self, session_id: SessionId) -> AppResult<Vec<Arc<ConnectionHandle>>> {
        let _guard = self.locks.acquire([LockScope::Session(session_id)]).await?;
        Ok(snapshot(&self.by_session, &session_id))
    }

    /// Branch-wide broadcast targets, filtered to `tenant_id` under the lock.
    pub async fn branch_targets(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> AppResult<Vec<Arc<ConnectionHandle>>> {
        let _guard = self.locks.acquire([LockScope::Branch(branch_id)]).await?;
        Ok(filter_tenant(snapshot(&self.by_branch, &branch_id), tenant_id))
    }

    /// Sector broadcast targets.
    ///
    /// Targets are connections in the sector whose scopes also contain the
    /// branch. When `fallback_to_branch` is set, branch members with no
    /// sector assignment are targets too, since an empty sector set covers
    /// every sector of the branch. A branch without any assignments therefore
    /// receives the event as a whole.
    pub async fn sector_targets(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        sector_id: SectorId,
        fallback_to_branch: bool,
    ) -> AppResult<Vec<Arc<ConnectionHandle>>> {
        let _guard = self
            .locks
            .acquire([LockScope::Branch(branch_id), LockScope::Sector(sector_id)])
            .await?;

        let mut targets = Vec::new();
        let mut seen = BTreeSet::new();
        for handle in filter_tenant(snapshot(&self.by_sector, &sector_id), tenant_id) {
            if handle.scopes().await.branch_ids.contains(&branch_id) && seen.insert(handle.id) {
                targets.push(handle);
            }
        }
        if !fallback_to_branch {
            return Ok(targets);
        }

        for handle in filter_tenant(snapshot(&self.by_branch, &branch_id), tenant_id) {
            if handle.scopes().await.sector_ids.is_empty() && seen.insert(handle.id) {
                targets.push(handle);
            }
        }
        Ok(targets)
    }

    /// Table-session broadcast targets.
    pub async fn session_targets(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
    ) -> AppResult<Vec<Arc<ConnectionHandle>>> {
        let _guard = self.locks.acquire([LockScope::Session(session_id)]).await?;
        Ok(filter_tenant(snapshot(&self.by_session, &session_id), tenant_id))
    }

    /// Single-user broadcast targets.
    pub async fn user_targets(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> AppResult<Vec<Arc<ConnectionHandle>>> {
        let _guard = self.locks.acquire([LockScope::User(user_id)]).await?;
        Ok(filter_tenant(snapshot(&self.by_user, &user_id), tenant_id))
    }

    /// Stop accepting registrations. Existing connections are unaffected.
    pub fn stop_accepting(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("Connection registry stopped accepting registrations");
        }
    }

    /// Whether new registrations are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Unregister every connection, returning the removed handles.
    pub async fn drain(&self) -> Vec<Arc<ConnectionHandle>> {
        let ids: Vec<ConnectionId> = self.by_id.iter().map(|e| *e.key()).collect();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            match self.unregister(&id).await {
                Ok(Some(handle)) => removed.push(handle),
                Ok(None) => {}
                Err(e) => warn!(conn_id = %id, error = %e, "Failed to unregister during drain"),
            }
        }
        removed
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.by_id.len()
    }

    /// Index sizes.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.by_id.len(),
            users: self.by_user.len(),
            branches: self.by_branch.len(),
            sectors: self.by_sector.len(),
            sessions: self.by_session.len(),
        }
    }
}

/// Locks covering a connection's identity and the given scopes.
fn lock_set(handle: &ConnectionHandle, scopes: &ConnectionScopes) -> Vec<LockScope> {
    let mut set = Vec::with_capacity(2 + scopes.branch_ids.len() + scopes.sector_ids.len());
    if let Some(user_id) = handle.identity.user_id {
        set.push(LockScope::User(user_id));
    }
    if let Some(session_id) = handle.identity.session_id {
        set.push(LockScope::Session(session_id));
    }
    set.extend(scopes.branch_ids.iter().map(|id| LockScope::Branch(*id)));
    set.extend(scopes.sector_ids.iter().map(|id| LockScope::Sector(*id)));
    if set.is_empty() {
        set.push(LockScope::Global);
    }
    set
}

fn index_insert<K>(index: &ReverseIndex<K>, key: K, handle: &Arc<ConnectionHandle>)
where
    K: Eq + std::hash::Hash,
{
    index
        .entry(key)
        .or_default()
        .insert(handle.id, Arc::clone(handle));
}

fn index_remove<K>(index: &ReverseIndex<K>, key: &K, id: &ConnectionId)
where
    K: Eq + std::hash::Hash,
{
    if let Some(mut members) = index.get_mut(key) {
        members.remove(id);
    }
    index.remove_if(key, |_, members| members.is_empty());
}

fn apply_diff<K>(
    index: &ReverseIndex<K>,
    old: &BTreeSet<K>,
    new: &BTreeSet<K>,
    handle: &Arc<ConnectionHandle>,
) where
    K: Eq + Ord + Copy + std::hash::Hash,
{
    for key in old.difference(new) {
        index_remove(index, key, &handle.id);
    }
    for key in new.difference(old) {
        index_insert(index, *key, handle);
    }
}

fn member_count<K>(index: &ReverseIndex<K>, key: &K) -> usize
where
    K: Eq + std::hash::Hash,
{
    index.get(key).map(|m| m.len()).unwrap_or(0)
}

fn snapshot<K>(index: &ReverseIndex<K>, key: &K) -> Vec<Arc<ConnectionHandle>>
where
    K: Eq + std::hash::Hash,
{
    index
        .get(key)
        .map(|members| members.values().cloned().collect())
        .unwrap_or_default()
}

fn filter_tenant(handles: Vec<Arc<ConnectionHandle>>, tenant_id: TenantId) -> Vec<Arc<ConnectionHandle>> {
    handles
        .into_iter()
        .filter(|h| h.tenant_id() == tenant_id)
        .collect()
}
