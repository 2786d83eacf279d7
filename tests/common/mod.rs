//! In-memory stand-in for the remote store: records every call, supports
//! scripted failures and delays keyed on the record being sent.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use client_manager::error::StoreError;
use client_manager::models::{
    Client, ClientStatus, Credential, CredentialKind, EntityKind, Milestone, Project,
    ProjectStatus, Secret,
};
use client_manager::remote::RemoteStore;

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub op: &'static str,
    pub label: String,
    pub project_id: Option<i32>,
}

#[derive(Default)]
struct Inner {
    clients: Vec<Client>,
    projects: Vec<Project>,
    milestones: Vec<Milestone>,
    credentials: Vec<Credential>,
    next_id: i32,
}

impl Inner {
    fn alloc_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct MockRemote {
    inner: Mutex<Inner>,
    calls: Mutex<Vec<CallRecord>>,
    failures: Mutex<Vec<(&'static str, String, StoreError)>>,
    delays: Mutex<Vec<(&'static str, String, u64)>>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            delays: Mutex::new(Vec::new()),
        })
    }

    /// Script the next matching call (by operation name and a substring
    /// of the record's label) to fail with `error`.
    pub fn fail_when(&self, op: &'static str, needle: &str, error: StoreError) {
        self.failures.lock().unwrap().push((op, needle.to_owned(), error));
    }

    /// Script the next matching call to stall for `millis` before
    /// completing, to force a completion order in tests.
    pub fn delay_when(&self, op: &'static str, needle: &str, millis: u64) {
        self.delays.lock().unwrap().push((op, needle.to_owned(), millis));
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, op: &str) -> Vec<CallRecord> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    pub fn seed_client(&self, tenant_id: i32, name: &str) -> Client {
        let mut inner = self.inner.lock().unwrap();
        let client = Client {
            id: inner.alloc_id(),
            tenant_id,
            name: name.into(),
            email: format!("{name}@example.com"),
            phone: "555-0100".into(),
            address: None,
            status: ClientStatus::Active,
            created_at: Utc::now(),
        };
        inner.clients.push(client.clone());
        client
    }

    pub fn seed_project(&self, client_id: i32, name: &str) -> Project {
        let mut inner = self.inner.lock().unwrap();
        let project = Project {
            id: inner.alloc_id(),
            client_id,
            name: name.into(),
            status: ProjectStatus::Active,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: None,
            budget: 2500.0,
            created_at: Utc::now(),
        };
        inner.projects.push(project.clone());
        project
    }

    pub fn seed_milestone(&self, project_id: i32, position: i32, title: &str) -> Milestone {
        let mut inner = self.inner.lock().unwrap();
        let milestone = Milestone {
            id: inner.alloc_id(),
            project_id,
            position,
            title: title.into(),
            due_date: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            amount: 500.0,
            completed: false,
        };
        inner.milestones.push(milestone.clone());
        milestone
    }

    pub fn seed_credential(&self, project_id: i32, label: &str) -> Credential {
        let mut inner = self.inner.lock().unwrap();
        let credential = Credential {
            id: inner.alloc_id(),
            project_id,
            kind: CredentialKind::Hosting,
            label: label.into(),
            username: "admin".into(),
            secret: Secret::new("seeded"),
        };
        inner.credentials.push(credential.clone());
        credential
    }

    pub fn stored_clients(&self) -> Vec<Client> {
        self.inner.lock().unwrap().clients.clone()
    }

    async fn intercept(
        &self,
        op: &'static str,
        label: &str,
        project_id: Option<i32>,
    ) -> Result<(), StoreError> {
        self.calls
            .lock()
            .unwrap()
            .push(CallRecord { op, label: label.to_owned(), project_id });

        let delay = {
            let mut delays = self.delays.lock().unwrap();
            delays
                .iter()
                .position(|(o, needle, _)| *o == op && label.contains(needle.as_str()))
                .map(|index| delays.remove(index).2)
        };
        if let Some(millis) = delay {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        let failure = {
            let mut failures = self.failures.lock().unwrap();
            failures
                .iter()
                .position(|(o, needle, _)| *o == op && label.contains(needle.as_str()))
                .map(|index| failures.remove(index).2)
        };
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn list_clients(&self, tenant_id: i32) -> Result<Vec<Client>, StoreError> {
        // Snapshot before the scripted delay so a stalled fetch returns the
        // data visible when it was issued, not when it completed.
        let snapshot: Vec<Client> = {
            let inner = self.inner.lock().unwrap();
            inner.clients.iter().filter(|c| c.tenant_id == tenant_id).cloned().collect()
        };
        self.intercept("list_clients", "", None).await?;
        Ok(snapshot)
    }

    async fn create_client(&self, tenant_id: i32, client: &Client) -> Result<Client, StoreError> {
        self.intercept("create_client", &client.name, None).await?;
        let mut inner = self.inner.lock().unwrap();
        let mut stored = client.clone();
        stored.id = inner.alloc_id();
        stored.tenant_id = tenant_id;
        stored.created_at = Utc::now();
        inner.clients.push(stored.clone());
        Ok(stored)
    }

    async fn update_client(&self, tenant_id: i32, client: &Client) -> Result<Client, StoreError> {
        self.intercept("update_client", &client.name, None).await?;
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .clients
            .iter_mut()
            .find(|c| c.id == client.id && c.tenant_id == tenant_id)
            .ok_or(StoreError::NotFound { kind: EntityKind::Client, id: client.id })?;
        let mut stored = client.clone();
        stored.tenant_id = tenant_id;
        stored.created_at = slot.created_at;
        *slot = stored.clone();
        Ok(stored)
    }

    async fn delete_client(&self, tenant_id: i32, id: i32) -> Result<(), StoreError> {
        self.intercept("delete_client", &id.to_string(), None).await?;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.clients.len();
        inner.clients.retain(|c| !(c.id == id && c.tenant_id == tenant_id));
        if inner.clients.len() == before {
            return Err(StoreError::NotFound { kind: EntityKind::Client, id });
        }
        let doomed: Vec<i32> =
            inner.projects.iter().filter(|p| p.client_id == id).map(|p| p.id).collect();
        inner.projects.retain(|p| p.client_id != id);
        inner.milestones.retain(|m| !doomed.contains(&m.project_id));
        inner.credentials.retain(|c| !doomed.contains(&c.project_id));
        Ok(())
    }

    async fn list_projects(
        &self,
        _tenant_id: i32,
        client_id: Option<i32>,
    ) -> Result<Vec<Project>, StoreError> {
        let snapshot: Vec<Project> = {
            let inner = self.inner.lock().unwrap();
            inner
                .projects
                .iter()
                .filter(|p| client_id.is_none_or(|id| p.client_id == id))
                .cloned()
                .collect()
        };
        self.intercept("list_projects", "", None).await?;
        Ok(snapshot)
    }

    async fn create_project(
        &self,
        _tenant_id: i32,
        project: &Project,
    ) -> Result<Project, StoreError> {
        self.intercept("create_project", &project.name, None).await?;
        let mut inner = self.inner.lock().unwrap();
        let mut stored = project.clone();
        stored.id = inner.alloc_id();
        stored.created_at = Utc::now();
        inner.projects.push(stored.clone());
        Ok(stored)
    }

    async fn update_project(
        &self,
        _tenant_id: i32,
        project: &Project,
    ) -> Result<Project, StoreError> {
        self.intercept("update_project", &project.name, None).await?;
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .projects
            .iter_mut()
            .find(|p| p.id == project.id)
            .ok_or(StoreError::NotFound { kind: EntityKind::Project, id: project.id })?;
        let mut stored = project.clone();
        stored.created_at = slot.created_at;
        *slot = stored.clone();
        Ok(stored)
    }

    async fn delete_project(&self, _tenant_id: i32, id: i32) -> Result<(), StoreError> {
        self.intercept("delete_project", &id.to_string(), None).await?;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.projects.len();
        inner.projects.retain(|p| p.id != id);
        if inner.projects.len() == before {
            return Err(StoreError::NotFound { kind: EntityKind::Project, id });
        }
        inner.milestones.retain(|m| m.project_id != id);
        inner.credentials.retain(|c| c.project_id != id);
        Ok(())
    }

    async fn list_milestones(
        &self,
        _tenant_id: i32,
        project_id: Option<i32>,
    ) -> Result<Vec<Milestone>, StoreError> {
        let snapshot: Vec<Milestone> = {
            let inner = self.inner.lock().unwrap();
            inner
                .milestones
                .iter()
                .filter(|m| project_id.is_none_or(|id| m.project_id == id))
                .cloned()
                .collect()
        };
        self.intercept("list_milestones", "", None).await?;
        Ok(snapshot)
    }

    async fn create_milestone(
        &self,
        _tenant_id: i32,
        milestone: &Milestone,
    ) -> Result<Milestone, StoreError> {
        self.intercept("create_milestone", &milestone.title, Some(milestone.project_id))
            .await?;
        let mut inner = self.inner.lock().unwrap();
        let mut stored = milestone.clone();
        stored.id = inner.alloc_id();
        inner.milestones.push(stored.clone());
        Ok(stored)
    }

    async fn update_milestone(
        &self,
        _tenant_id: i32,
        milestone: &Milestone,
    ) -> Result<Milestone, StoreError> {
        self.intercept("update_milestone", &milestone.title, Some(milestone.project_id))
            .await?;
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .milestones
            .iter_mut()
            .find(|m| m.id == milestone.id)
            .ok_or(StoreError::NotFound { kind: EntityKind::Milestone, id: milestone.id })?;
        *slot = milestone.clone();
        Ok(milestone.clone())
    }

    async fn delete_milestone(&self, _tenant_id: i32, id: i32) -> Result<(), StoreError> {
        self.intercept("delete_milestone", &id.to_string(), None).await?;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.milestones.len();
        inner.milestones.retain(|m| m.id != id);
        if inner.milestones.len() == before {
            return Err(StoreError::NotFound { kind: EntityKind::Milestone, id });
        }
        Ok(())
    }

    async fn list_credentials(
        &self,
        _tenant_id: i32,
        project_id: Option<i32>,
    ) -> Result<Vec<Credential>, StoreError> {
        let snapshot: Vec<Credential> = {
            let inner = self.inner.lock().unwrap();
            inner
                .credentials
                .iter()
                .filter(|c| project_id.is_none_or(|id| c.project_id == id))
                .cloned()
                .collect()
        };
        self.intercept("list_credentials", "", None).await?;
        Ok(snapshot)
    }

    async fn create_credential(
        &self,
        _tenant_id: i32,
        credential: &Credential,
    ) -> Result<Credential, StoreError> {
        self.intercept("create_credential", &credential.label, Some(credential.project_id))
            .await?;
        let mut inner = self.inner.lock().unwrap();
        let mut stored = credential.clone();
        stored.id = inner.alloc_id();
        inner.credentials.push(stored.clone());
        Ok(stored)
    }

    async fn update_credential(
        &self,
        _tenant_id: i32,
        credential: &Credential,
    ) -> Result<Credential, StoreError> {
        self.intercept("update_credential", &credential.label, Some(credential.project_id))
            .await?;
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .credentials
            .iter_mut()
            .find(|c| c.id == credential.id)
            .ok_or(StoreError::NotFound { kind: EntityKind::Credential, id: credential.id })?;
        *slot = credential.clone();
        Ok(credential.clone())
    }

    async fn delete_credential(&self, _tenant_id: i32, id: i32) -> Result<(), StoreError> {
        self.intercept("delete_credential", &id.to_string(), None).await?;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.credentials.len();
        inner.credentials.retain(|c| c.id != id);
        if inner.credentials.len() == before {
            return Err(StoreError::NotFound { kind: EntityKind::Credential, id });
        }
        Ok(())
    }
}
