pub mod postgres;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Client, Credential, Milestone, Project};

pub use postgres::PgRemote;

/// Request/response boundary to the backend store. One call per entity
/// operation, every call scoped to the authenticated tenant. Stateless;
/// caching lives in [`crate::cache::QueryCache`], never here.
///
/// `create` returns the authoritative server record (server-assigned id
/// and defaults), `update` the entity as stored after the write.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_clients(&self, tenant_id: i32) -> Result<Vec<Client>, StoreError>;
    async fn create_client(&self, tenant_id: i32, client: &Client) -> Result<Client, StoreError>;
    async fn update_client(&self, tenant_id: i32, client: &Client) -> Result<Client, StoreError>;
    async fn delete_client(&self, tenant_id: i32, id: i32) -> Result<(), StoreError>;

    async fn list_projects(
        &self,
        tenant_id: i32,
        client_id: Option<i32>,
    ) -> Result<Vec<Project>, StoreError>;
    async fn create_project(&self, tenant_id: i32, project: &Project)
        -> Result<Project, StoreError>;
    async fn update_project(&self, tenant_id: i32, project: &Project)
        -> Result<Project, StoreError>;
    async fn delete_project(&self, tenant_id: i32, id: i32) -> Result<(), StoreError>;

    async fn list_milestones(
        &self,
        tenant_id: i32,
        project_id: Option<i32>,
    ) -> Result<Vec<Milestone>, StoreError>;
    async fn create_milestone(
        &self,
        tenant_id: i32,
        milestone: &Milestone,
    ) -> Result<Milestone, StoreError>;
    async fn update_milestone(
        &self,
        tenant_id: i32,
        milestone: &Milestone,
    ) -> Result<Milestone, StoreError>;
    async fn delete_milestone(&self, tenant_id: i32, id: i32) -> Result<(), StoreError>;

    async fn list_credentials(
        &self,
        tenant_id: i32,
        project_id: Option<i32>,
    ) -> Result<Vec<Credential>, StoreError>;
    async fn create_credential(
        &self,
        tenant_id: i32,
        credential: &Credential,
    ) -> Result<Credential, StoreError>;
    async fn update_credential(
        &self,
        tenant_id: i32,
        credential: &Credential,
    ) -> Result<Credential, StoreError>;
    async fn delete_credential(&self, tenant_id: i32, id: i32) -> Result<(), StoreError>;
}
