use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::models::{Client, Credential, EntityKind, Milestone, Project};

/// Collection filter a cache entry was fetched with. Mirrors the list
/// operations of the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    All,
    ByClient(i32),
    ByProject(i32),
}

/// Key of one cached collection. Always scoped to a tenant so records of
/// different users can never end up in the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant_id: i32,
    pub kind: EntityKind,
    pub filter: Filter,
}

impl CacheKey {
    pub fn clients(tenant_id: i32) -> Self {
        Self { tenant_id, kind: EntityKind::Client, filter: Filter::All }
    }

    pub fn projects(tenant_id: i32, client_id: Option<i32>) -> Self {
        let filter = match client_id {
            Some(id) => Filter::ByClient(id),
            None => Filter::All,
        };
        Self { tenant_id, kind: EntityKind::Project, filter }
    }

    pub fn milestones(tenant_id: i32, project_id: Option<i32>) -> Self {
        let filter = match project_id {
            Some(id) => Filter::ByProject(id),
            None => Filter::All,
        };
        Self { tenant_id, kind: EntityKind::Milestone, filter }
    }

    pub fn credentials(tenant_id: i32, project_id: Option<i32>) -> Self {
        let filter = match project_id {
            Some(id) => Filter::ByProject(id),
            None => Filter::All,
        };
        Self { tenant_id, kind: EntityKind::Credential, filter }
    }
}

/// One record of any entity kind, so a single cache serves all four
/// collections.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Client(Client),
    Project(Project),
    Milestone(Milestone),
    Credential(Credential),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Client(_) => EntityKind::Client,
            Self::Project(_) => EntityKind::Project,
            Self::Milestone(_) => EntityKind::Milestone,
            Self::Credential(_) => EntityKind::Credential,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            Self::Client(c) => c.id,
            Self::Project(p) => p.id,
            Self::Milestone(m) => m.id,
            Self::Credential(c) => c.id,
        }
    }

    pub(crate) fn set_id(&mut self, id: i32) {
        match self {
            Self::Client(c) => c.id = id,
            Self::Project(p) => p.id = id,
            Self::Milestone(m) => m.id = id,
            Self::Credential(c) => c.id = id,
        }
    }

    /// Whether this record belongs in the collection `key` describes.
    /// Tenant scoping is the key's job; this only checks kind and filter.
    pub fn matches(&self, key: &CacheKey) -> bool {
        if self.kind() != key.kind {
            return false;
        }
        match (key.filter, self) {
            (Filter::All, _) => true,
            (Filter::ByClient(client_id), Self::Project(p)) => p.client_id == client_id,
            (Filter::ByProject(project_id), Self::Milestone(m)) => m.project_id == project_id,
            (Filter::ByProject(project_id), Self::Credential(c)) => c.project_id == project_id,
            _ => false,
        }
    }
}

/// Snapshot of one fetched collection plus its staleness flag.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    pub records: Vec<Record>,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
}

/// Process-wide keyed cache of entity collections.
///
/// Initialized at session start and cleared on logout or tenant switch.
/// Readers get cloned snapshots and never block on a fetch; only the
/// mutation orchestrator and the refresh path write to it.
#[derive(Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<CacheKey, CachedEntry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot for `key`, if any. The `stale` flag tells the
    /// caller whether a refresh is due.
    pub fn get(&self, key: &CacheKey) -> Option<CachedEntry> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Replace a snapshot after a successful fetch.
    ///
    /// Last-fetch-wins by `fetched_at`: a fetch that started earlier but
    /// completed later than one already applied is dropped, so completion
    /// order cannot resurrect stale data.
    pub fn set(&self, key: CacheKey, records: Vec<Record>, fetched_at: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(&key) {
            if existing.fetched_at > fetched_at {
                tracing::debug!(?key, "dropping out-of-order fetch result");
                return;
            }
        }
        entries.insert(key, CachedEntry { records, fetched_at, stale: false });
    }

    /// Mark the given entries stale. Idempotent; missing keys are ignored.
    pub fn invalidate(&self, keys: &[CacheKey]) {
        let mut entries = self.entries.lock().unwrap();
        for key in keys {
            if let Some(entry) = entries.get_mut(key) {
                entry.stale = true;
            }
        }
    }

    /// Mark every entry of `kind` for `tenant_id` stale.
    pub fn invalidate_kind(&self, tenant_id: i32, kind: EntityKind) {
        let mut entries = self.entries.lock().unwrap();
        for (key, entry) in entries.iter_mut() {
            if key.tenant_id == tenant_id && key.kind == kind {
                entry.stale = true;
            }
        }
    }

    /// Drop everything belonging to one tenant (logout / tenant switch).
    pub fn clear_tenant(&self, tenant_id: i32) {
        self.entries
            .lock()
            .unwrap()
            .retain(|key, _| key.tenant_id != tenant_id);
    }

    pub fn clear_all(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// First cached record of `kind` with `id`, if any entry holds one.
    /// The orchestrator keeps this pre-image for targeted rollback.
    pub(crate) fn find_record(&self, tenant_id: i32, kind: EntityKind, id: i32) -> Option<Record> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.tenant_id == tenant_id && key.kind == kind)
            .find_map(|(_, entry)| entry.records.iter().find(|r| r.id() == id).cloned())
    }

    /// Apply `apply` to one entry's record list, if the entry exists.
    pub(crate) fn mutate_entry(&self, key: &CacheKey, apply: &mut dyn FnMut(&mut Vec<Record>)) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            apply(&mut entry.records);
        }
    }

    /// Apply `apply` to the record list of every entry of `kind` for
    /// `tenant_id`. This is the single write path the orchestrator uses
    /// for optimistic updates and reconciliation.
    pub(crate) fn mutate_kind(
        &self,
        tenant_id: i32,
        kind: EntityKind,
        apply: &mut dyn FnMut(&CacheKey, &mut Vec<Record>),
    ) {
        let mut entries = self.entries.lock().unwrap();
        for (key, entry) in entries.iter_mut() {
            if key.tenant_id == tenant_id && key.kind == kind {
                apply(key, &mut entry.records);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::ClientStatus;

    fn client(id: i32, tenant_id: i32, name: &str) -> Record {
        Record::Client(Client {
            id,
            tenant_id,
            name: name.into(),
            email: format!("{name}@example.com"),
            phone: String::new(),
            address: None,
            status: ClientStatus::Active,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        })
    }

    #[test]
    fn set_then_get_round_trips_fresh() {
        let cache = QueryCache::new();
        let key = CacheKey::clients(1);
        cache.set(key, vec![client(1, 1, "Acme")], Utc::now());

        let entry = cache.get(&key).unwrap();
        assert!(!entry.stale);
        assert_eq!(entry.records.len(), 1);
    }

    #[test]
    fn out_of_order_fetch_is_dropped() {
        let cache = QueryCache::new();
        let key = CacheKey::clients(1);
        let earlier = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 5).unwrap();

        cache.set(key, vec![client(1, 1, "Acme"), client(2, 1, "Bell")], later);
        // A slower request that was issued before the one above finishes
        // last; its payload must not replace the newer snapshot.
        cache.set(key, vec![client(1, 1, "Acme")], earlier);

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.fetched_at, later);
        assert_eq!(entry.records.len(), 2);
    }

    #[test]
    fn invalidate_is_idempotent_and_cleared_by_set() {
        let cache = QueryCache::new();
        let key = CacheKey::clients(1);
        cache.set(key, vec![client(1, 1, "Acme")], Utc::now());

        cache.invalidate(&[key]);
        cache.invalidate(&[key]);
        assert!(cache.get(&key).unwrap().stale);

        cache.set(key, vec![client(1, 1, "Acme")], Utc::now());
        assert!(!cache.get(&key).unwrap().stale);
    }

    #[test]
    fn clear_tenant_does_not_touch_other_tenants() {
        let cache = QueryCache::new();
        cache.set(CacheKey::clients(1), vec![client(1, 1, "Acme")], Utc::now());
        cache.set(CacheKey::clients(2), vec![client(5, 2, "Zed")], Utc::now());

        cache.clear_tenant(1);
        assert!(cache.get(&CacheKey::clients(1)).is_none());
        assert!(cache.get(&CacheKey::clients(2)).is_some());
    }
}
