//! Mutation orchestrator: optimistic cache updates, reconciliation against
//! the authoritative server record, and rollback on failure.
//!
//! Every mutation attaches a per-entity revision token at optimistic-apply
//! time. Reconciliations and rollbacks whose token is behind the entity's
//! current token are discarded, so interleaved mutations on the same
//! entity resolve by issue order, not by network completion order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::cache::{CacheKey, QueryCache, Record};
use crate::error::StoreError;
use crate::models::{Client, Credential, EntityKind, Milestone, Project};
use crate::remote::RemoteStore;

type RevKey = (EntityKind, i32);

/// Records removed by an optimistic cascade purge, with the entry they
/// came from and their position in it.
type PurgedRecords = Vec<(CacheKey, Vec<(usize, Record)>)>;

/// Liveness flag owned by whatever view started a mutation. Once
/// dismissed (the view unmounted), the orchestrator stops applying
/// reconciliations or rollbacks for it and only marks the touched entries
/// stale so the next reader fetches fresh data.
#[derive(Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn dismiss(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Performs entity mutations against the remote store while keeping the
/// injected [`QueryCache`] plausible before confirmation. The only writer
/// to the cache besides the read-through refresh path.
pub struct MutationOrchestrator {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<QueryCache>,
    revisions: Mutex<HashMap<RevKey, u64>>,
    /// Provisional ids for optimistic creates count down from -1 so they
    /// can never collide with server-assigned ids.
    next_provisional: AtomicI32,
}

impl MutationOrchestrator {
    pub fn new(remote: Arc<dyn RemoteStore>, cache: Arc<QueryCache>) -> Self {
        Self {
            remote,
            cache,
            revisions: Mutex::new(HashMap::new()),
            next_provisional: AtomicI32::new(-1),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    // ------------------------------------------------------------------
    // Revision tokens
    // ------------------------------------------------------------------

    fn bump(&self, key: RevKey) -> u64 {
        let mut revisions = self.revisions.lock().unwrap();
        let counter = revisions.entry(key).or_insert(0);
        *counter += 1;
        *counter
    }

    fn is_current(&self, key: RevKey, token: u64) -> bool {
        self.revisions.lock().unwrap().get(&key).copied() == Some(token)
    }

    /// Carry a provisional entity's revision over to its server id.
    fn migrate_revision(&self, from: RevKey, to: RevKey) {
        let mut revisions = self.revisions.lock().unwrap();
        if let Some(token) = revisions.remove(&from) {
            let counter = revisions.entry(to).or_insert(0);
            if token > *counter {
                *counter = token;
            }
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Create `record` remotely, with an optimistic provisional record
    /// visible in the cache until the server confirms.
    pub async fn create(
        &self,
        tenant_id: i32,
        live: &Liveness,
        mut record: Record,
    ) -> Result<Record, StoreError> {
        let kind = record.kind();
        let provisional = self.next_provisional.fetch_sub(1, Ordering::Relaxed);
        record.set_id(provisional);
        let token = self.bump((kind, provisional));

        if live.is_live() {
            self.cache.mutate_kind(tenant_id, kind, &mut |key, records| {
                if record.matches(key) {
                    records.push(record.clone());
                }
            });
        }

        match self.dispatch_create(tenant_id, &record).await {
            Ok(server) => {
                self.migrate_revision((kind, provisional), (kind, server.id()));
                if !live.is_live() {
                    self.scrub_provisional(tenant_id, kind, provisional);
                } else if self.is_current((kind, server.id()), token) {
                    self.cache.mutate_kind(tenant_id, kind, &mut |key, records| {
                        if let Some(slot) = records.iter_mut().find(|r| r.id() == provisional) {
                            *slot = server.clone();
                        } else if server.matches(key)
                            && !records.iter().any(|r| r.id() == server.id())
                        {
                            records.push(server.clone());
                        }
                    });
                    self.invalidate_derived(tenant_id, &server);
                    tracing::debug!(kind = %kind, id = server.id(), "reconciled optimistic create");
                } else {
                    tracing::warn!(kind = %kind, id = server.id(), "discarding stale create reconciliation");
                }
                Ok(server)
            }
            Err(err) => {
                if !live.is_live() {
                    self.scrub_provisional(tenant_id, kind, provisional);
                } else if self.is_current((kind, provisional), token) {
                    // Rolling back a create only means dropping the
                    // provisional row; other records stay untouched.
                    self.cache.mutate_kind(tenant_id, kind, &mut |_, records| {
                        records.retain(|r| r.id() != provisional);
                    });
                    tracing::debug!(kind = %kind, error = %err, "rolled back optimistic create");
                } else {
                    tracing::warn!(kind = %kind, "discarding stale create rollback");
                }
                Err(err)
            }
        }
    }

    /// Full-record update. The optimistic patch swaps the cached record in
    /// place; reconciliation swaps in whatever the server stored.
    pub async fn update(
        &self,
        tenant_id: i32,
        live: &Liveness,
        record: Record,
    ) -> Result<Record, StoreError> {
        let kind = record.kind();
        let id = record.id();
        let token = self.bump((kind, id));

        // Only the mutated entity's own pre-image is kept for rollback, so
        // a failure can never revert a different entity's confirmed state.
        let previous = self.cache.find_record(tenant_id, kind, id);
        if live.is_live() {
            self.cache.mutate_kind(tenant_id, kind, &mut |_, records| {
                if let Some(slot) = records.iter_mut().find(|r| r.id() == id) {
                    *slot = record.clone();
                }
            });
        }

        match self.dispatch_update(tenant_id, &record).await {
            Ok(server) => {
                if !live.is_live() {
                    self.cache.invalidate_kind(tenant_id, kind);
                } else if self.is_current((kind, id), token) {
                    self.cache.mutate_kind(tenant_id, kind, &mut |_, records| {
                        if let Some(slot) = records.iter_mut().find(|r| r.id() == id) {
                            *slot = server.clone();
                        }
                    });
                    self.invalidate_derived(tenant_id, &server);
                    tracing::debug!(kind = %kind, id, "reconciled optimistic update");
                } else {
                    tracing::warn!(kind = %kind, id, "discarding stale update reconciliation");
                }
                Ok(server)
            }
            Err(err) => {
                if !live.is_live() {
                    self.cache.invalidate_kind(tenant_id, kind);
                } else if self.is_current((kind, id), token) {
                    self.handle_mutation_failure(tenant_id, kind, id, &err, previous);
                } else {
                    tracing::warn!(kind = %kind, id, "discarding stale update rollback");
                }
                Err(err)
            }
        }
    }

    /// Delete an entity. Client and project deletes cascade through the
    /// cached dependents the same way the remote store cascades.
    pub async fn delete(
        &self,
        tenant_id: i32,
        live: &Liveness,
        kind: EntityKind,
        id: i32,
    ) -> Result<(), StoreError> {
        let token = self.bump((kind, id));
        let affected = cascade_kinds(kind);

        let purged = if live.is_live() {
            self.purge_with_cascade(tenant_id, kind, id)
        } else {
            Vec::new()
        };

        match self.dispatch_delete(tenant_id, kind, id).await {
            Ok(()) => {
                if !live.is_live() {
                    for k in &affected {
                        self.cache.invalidate_kind(tenant_id, *k);
                    }
                } else if self.is_current((kind, id), token) {
                    self.invalidate_derived_by_id(tenant_id, kind, id);
                    tracing::debug!(kind = %kind, id, "confirmed optimistic delete");
                }
                Ok(())
            }
            Err(err) => {
                if !live.is_live() {
                    for k in &affected {
                        self.cache.invalidate_kind(tenant_id, *k);
                    }
                } else if self.is_current((kind, id), token) {
                    match &err {
                        // Already gone remotely: keep the purge, refresh.
                        StoreError::NotFound { .. } => {
                            for k in &affected {
                                self.cache.invalidate_kind(tenant_id, *k);
                            }
                        }
                        StoreError::Conflict(_) => {
                            self.reinsert_records(purged);
                            for k in &affected {
                                self.cache.invalidate_kind(tenant_id, *k);
                            }
                        }
                        _ => self.reinsert_records(purged),
                    }
                } else {
                    tracing::warn!(kind = %kind, id, "discarding stale delete rollback");
                }
                Err(err)
            }
        }
    }

    /// Monotonic completion transition. Un-completing a milestone requires
    /// an explicit full [`MutationOrchestrator::update`].
    pub async fn complete_milestone(
        &self,
        tenant_id: i32,
        live: &Liveness,
        mut milestone: Milestone,
    ) -> Result<Milestone, StoreError> {
        milestone.completed = true;
        let Record::Milestone(updated) =
            self.update(tenant_id, live, Record::Milestone(milestone)).await?
        else {
            return Err(StoreError::Conflict("remote returned a record of the wrong kind".into()));
        };
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Read-through loaders
    // ------------------------------------------------------------------

    pub async fn load_clients(&self, tenant_id: i32) -> Result<Vec<Client>, StoreError> {
        let key = CacheKey::clients(tenant_id);
        if let Some(entry) = self.cache.get(&key) {
            if !entry.stale {
                return Ok(entry
                    .records
                    .into_iter()
                    .filter_map(|r| match r {
                        Record::Client(c) => Some(c),
                        _ => None,
                    })
                    .collect());
            }
        }
        // Stamp at issue time, not completion time, so a slower request
        // that was started earlier can never overwrite a fresher snapshot.
        let fetched_at = Utc::now();
        let fetched = self.remote.list_clients(tenant_id).await?;
        self.cache
            .set(key, fetched.iter().cloned().map(Record::Client).collect(), fetched_at);
        Ok(fetched)
    }

    pub async fn load_projects(
        &self,
        tenant_id: i32,
        client_id: Option<i32>,
    ) -> Result<Vec<Project>, StoreError> {
        let key = CacheKey::projects(tenant_id, client_id);
        if let Some(entry) = self.cache.get(&key) {
            if !entry.stale {
                return Ok(entry
                    .records
                    .into_iter()
                    .filter_map(|r| match r {
                        Record::Project(p) => Some(p),
                        _ => None,
                    })
                    .collect());
            }
        }
        let fetched_at = Utc::now();
        let fetched = self.remote.list_projects(tenant_id, client_id).await?;
        self.cache
            .set(key, fetched.iter().cloned().map(Record::Project).collect(), fetched_at);
        Ok(fetched)
    }

    pub async fn load_milestones(
        &self,
        tenant_id: i32,
        project_id: Option<i32>,
    ) -> Result<Vec<Milestone>, StoreError> {
        let key = CacheKey::milestones(tenant_id, project_id);
        if let Some(entry) = self.cache.get(&key) {
            if !entry.stale {
                return Ok(entry
                    .records
                    .into_iter()
                    .filter_map(|r| match r {
                        Record::Milestone(m) => Some(m),
                        _ => None,
                    })
                    .collect());
            }
        }
        let fetched_at = Utc::now();
        let fetched = self.remote.list_milestones(tenant_id, project_id).await?;
        self.cache
            .set(key, fetched.iter().cloned().map(Record::Milestone).collect(), fetched_at);
        Ok(fetched)
    }

    pub async fn load_credentials(
        &self,
        tenant_id: i32,
        project_id: Option<i32>,
    ) -> Result<Vec<Credential>, StoreError> {
        let key = CacheKey::credentials(tenant_id, project_id);
        if let Some(entry) = self.cache.get(&key) {
            if !entry.stale {
                return Ok(entry
                    .records
                    .into_iter()
                    .filter_map(|r| match r {
                        Record::Credential(c) => Some(c),
                        _ => None,
                    })
                    .collect());
            }
        }
        let fetched_at = Utc::now();
        let fetched = self.remote.list_credentials(tenant_id, project_id).await?;
        self.cache
            .set(key, fetched.iter().cloned().map(Record::Credential).collect(), fetched_at);
        Ok(fetched)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn handle_mutation_failure(
        &self,
        tenant_id: i32,
        kind: EntityKind,
        id: i32,
        err: &StoreError,
        previous: Option<Record>,
    ) {
        match err {
            // The entity vanished remotely: purge it, nothing to revert to.
            StoreError::NotFound { .. } => {
                self.cache.mutate_kind(tenant_id, kind, &mut |_, records| {
                    records.retain(|r| r.id() != id);
                });
                self.cache.invalidate_kind(tenant_id, kind);
            }
            // Remote state diverged: restore the pre-mutation record and
            // force a refetch so the user is re-prompted with fresh data.
            StoreError::Conflict(_) => {
                self.restore_record(tenant_id, kind, previous);
                self.cache.invalidate_kind(tenant_id, kind);
            }
            _ => {
                self.restore_record(tenant_id, kind, previous);
                tracing::debug!(kind = %kind, id, error = %err, "rolled back optimistic update");
            }
        }
    }

    /// Swap the mutated entity's pre-image back in by id. Every other
    /// cached record stays as it is, so rolling back one entity can never
    /// revert another entity's confirmed mutation.
    fn restore_record(&self, tenant_id: i32, kind: EntityKind, previous: Option<Record>) {
        let Some(previous) = previous else { return };
        let id = previous.id();
        self.cache.mutate_kind(tenant_id, kind, &mut |_, records| {
            if let Some(slot) = records.iter_mut().find(|r| r.id() == id) {
                *slot = previous.clone();
            }
        });
    }

    /// A dismissed view's provisional record must not linger; remove it
    /// and mark the kind stale instead of reconciling.
    fn scrub_provisional(&self, tenant_id: i32, kind: EntityKind, provisional: i32) {
        self.cache.mutate_kind(tenant_id, kind, &mut |_, records| {
            records.retain(|r| r.id() != provisional);
        });
        self.cache.invalidate_kind(tenant_id, kind);
    }

    /// Optimistically remove the entity (and, for clients and projects,
    /// its cached dependents), returning what was taken and where so a
    /// failed delete can put exactly those records back.
    fn purge_with_cascade(&self, tenant_id: i32, kind: EntityKind, id: i32) -> PurgedRecords {
        let mut purged = PurgedRecords::new();
        match kind {
            EntityKind::Client => {
                let mut project_ids = HashSet::new();
                self.cache.mutate_kind(tenant_id, EntityKind::Project, &mut |_, records| {
                    for record in records.iter() {
                        if let Record::Project(p) = record {
                            if p.client_id == id {
                                project_ids.insert(p.id);
                            }
                        }
                    }
                });
                self.purge_matching(tenant_id, EntityKind::Project, &mut purged, &|r| {
                    matches!(r, Record::Project(p) if p.client_id == id)
                });
                self.purge_project_children(tenant_id, &project_ids, &mut purged);
                self.purge_matching(tenant_id, EntityKind::Client, &mut purged, &|r| {
                    r.id() == id
                });
            }
            EntityKind::Project => {
                let project_ids = HashSet::from([id]);
                self.purge_project_children(tenant_id, &project_ids, &mut purged);
                self.purge_matching(tenant_id, EntityKind::Project, &mut purged, &|r| {
                    r.id() == id
                });
            }
            kind => {
                self.purge_matching(tenant_id, kind, &mut purged, &|r| r.id() == id);
            }
        }
        purged
    }

    fn purge_project_children(
        &self,
        tenant_id: i32,
        project_ids: &HashSet<i32>,
        purged: &mut PurgedRecords,
    ) {
        self.purge_matching(tenant_id, EntityKind::Milestone, purged, &|r| {
            matches!(r, Record::Milestone(m) if project_ids.contains(&m.project_id))
        });
        self.purge_matching(tenant_id, EntityKind::Credential, purged, &|r| {
            matches!(r, Record::Credential(c) if project_ids.contains(&c.project_id))
        });
    }

    fn purge_matching(
        &self,
        tenant_id: i32,
        kind: EntityKind,
        purged: &mut PurgedRecords,
        doomed: &dyn Fn(&Record) -> bool,
    ) {
        self.cache.mutate_kind(tenant_id, kind, &mut |key, records| {
            let mut taken = Vec::new();
            let mut index = 0usize;
            records.retain(|record| {
                let keep = !doomed(record);
                if !keep {
                    taken.push((index, record.clone()));
                }
                index += 1;
                keep
            });
            if !taken.is_empty() {
                purged.push((*key, taken));
            }
        });
    }

    /// Put purged records back at their original positions. A record some
    /// later mutation already re-added is left alone.
    fn reinsert_records(&self, purged: PurgedRecords) {
        for (key, taken) in purged {
            self.cache.mutate_entry(&key, &mut |records| {
                for (index, record) in &taken {
                    if records.iter().any(|r| r.id() == record.id()) {
                        continue;
                    }
                    records.insert((*index).min(records.len()), record.clone());
                }
            });
        }
    }

    /// Views derived from a mutated entity: a client mutation touches its
    /// project lists, a project mutation touches the milestone and
    /// credential collections the grouping engine is built from.
    fn invalidate_derived(&self, tenant_id: i32, record: &Record) {
        match record {
            Record::Client(c) => self.invalidate_derived_by_id(tenant_id, EntityKind::Client, c.id),
            Record::Project(p) => {
                self.invalidate_derived_by_id(tenant_id, EntityKind::Project, p.id)
            }
            _ => {}
        }
    }

    fn invalidate_derived_by_id(&self, tenant_id: i32, kind: EntityKind, id: i32) {
        match kind {
            EntityKind::Client => {
                self.cache.invalidate(&[
                    CacheKey::projects(tenant_id, Some(id)),
                    CacheKey::projects(tenant_id, None),
                ]);
            }
            EntityKind::Project => {
                self.cache.invalidate(&[
                    CacheKey::milestones(tenant_id, Some(id)),
                    CacheKey::milestones(tenant_id, None),
                    CacheKey::credentials(tenant_id, Some(id)),
                    CacheKey::credentials(tenant_id, None),
                ]);
            }
            _ => {}
        }
    }

    async fn dispatch_create(
        &self,
        tenant_id: i32,
        record: &Record,
    ) -> Result<Record, StoreError> {
        match record {
            Record::Client(c) => self.remote.create_client(tenant_id, c).await.map(Record::Client),
            Record::Project(p) => {
                self.remote.create_project(tenant_id, p).await.map(Record::Project)
            }
            Record::Milestone(m) => {
                self.remote.create_milestone(tenant_id, m).await.map(Record::Milestone)
            }
            Record::Credential(c) => {
                self.remote.create_credential(tenant_id, c).await.map(Record::Credential)
            }
        }
    }

    async fn dispatch_update(
        &self,
        tenant_id: i32,
        record: &Record,
    ) -> Result<Record, StoreError> {
        match record {
            Record::Client(c) => self.remote.update_client(tenant_id, c).await.map(Record::Client),
            Record::Project(p) => {
                self.remote.update_project(tenant_id, p).await.map(Record::Project)
            }
            Record::Milestone(m) => {
                self.remote.update_milestone(tenant_id, m).await.map(Record::Milestone)
            }
            Record::Credential(c) => {
                self.remote.update_credential(tenant_id, c).await.map(Record::Credential)
            }
        }
    }

    async fn dispatch_delete(
        &self,
        tenant_id: i32,
        kind: EntityKind,
        id: i32,
    ) -> Result<(), StoreError> {
        match kind {
            EntityKind::Client => self.remote.delete_client(tenant_id, id).await,
            EntityKind::Project => self.remote.delete_project(tenant_id, id).await,
            EntityKind::Milestone => self.remote.delete_milestone(tenant_id, id).await,
            EntityKind::Credential => self.remote.delete_credential(tenant_id, id).await,
        }
    }
}

fn cascade_kinds(kind: EntityKind) -> Vec<EntityKind> {
    match kind {
        EntityKind::Client => vec![
            EntityKind::Client,
            EntityKind::Project,
            EntityKind::Milestone,
            EntityKind::Credential,
        ],
        EntityKind::Project => {
            vec![EntityKind::Project, EntityKind::Milestone, EntityKind::Credential]
        }
        other => vec![other],
    }
}
