//! Postgres-backed implementation of [`RemoteStore`].
//!
//! Every query is scoped to the tenant column, so a session can only ever
//! see its own rows. Deleting a client (or project) cascades to its
//! dependents inside a single transaction.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::StoreError;
use crate::models::{Client, Credential, EntityKind, Milestone, Project};
use crate::remote::RemoteStore;

const CLIENT_COLS: &str = "id, tenant_id, name, email, phone, address, status, created_at";
const PROJECT_COLS: &str =
    "id, client_id, name, status, start_date, end_date, budget, created_at";
const MILESTONE_COLS: &str = "id, project_id, position, title, due_date, amount, completed";
const CREDENTIAL_COLS: &str = "id, project_id, kind, label, username, secret";

/// Remote store backed by a Postgres connection pool.
pub struct PgRemote {
    pool: PgPool,
}

impl PgRemote {
    /// Create a new PgRemote instance with a connection pool
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(config.database_url())
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Normalize driver errors into the taxonomy. Unique violations surface
/// as validation (label collisions), foreign-key violations as conflicts
/// (a parent vanished under us), transport problems as network.
fn map_sqlx(err: sqlx::Error, kind: EntityKind, id: i32) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound { kind, id },
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => StoreError::Validation(format!("{kind} violates a uniqueness rule")),
            Some("23503") => StoreError::Conflict(format!("{kind} references a missing parent")),
            _ => StoreError::Network(db.to_string()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_) => StoreError::Network(err.to_string()),
        _ => StoreError::Network(err.to_string()),
    }
}

#[async_trait]
impl RemoteStore for PgRemote {
    async fn list_clients(&self, tenant_id: i32) -> Result<Vec<Client>, StoreError> {
        sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLS} FROM clients WHERE tenant_id = $1 ORDER BY name ASC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, EntityKind::Client, 0))
    }

    async fn create_client(&self, tenant_id: i32, client: &Client) -> Result<Client, StoreError> {
        sqlx::query_as::<_, Client>(&format!(
            "INSERT INTO clients (tenant_id, name, email, phone, address, status) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {CLIENT_COLS}"
        ))
        .bind(tenant_id)
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.phone)
        .bind(&client.address)
        .bind(client.status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, EntityKind::Client, client.id))
    }

    async fn update_client(&self, tenant_id: i32, client: &Client) -> Result<Client, StoreError> {
        let updated = sqlx::query_as::<_, Client>(&format!(
            "UPDATE clients \
             SET name = $1, email = $2, phone = $3, address = $4, status = $5 \
             WHERE id = $6 AND tenant_id = $7 \
             RETURNING {CLIENT_COLS}"
        ))
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.phone)
        .bind(&client.address)
        .bind(client.status)
        .bind(client.id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, EntityKind::Client, client.id))?;

        updated.ok_or(StoreError::NotFound { kind: EntityKind::Client, id: client.id })
    }

    async fn delete_client(&self, tenant_id: i32, id: i32) -> Result<(), StoreError> {
        let map = |e| map_sqlx(e, EntityKind::Client, id);

        // Cascade to projects and their dependents in one transaction.
        let mut tx = self.pool.begin().await.map_err(map)?;

        sqlx::query(
            "DELETE FROM credentials WHERE project_id IN \
             (SELECT p.id FROM projects p \
              JOIN clients c ON c.id = p.client_id \
              WHERE p.client_id = $1 AND c.tenant_id = $2)",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(map)?;

        sqlx::query(
            "DELETE FROM milestones WHERE project_id IN \
             (SELECT p.id FROM projects p \
              JOIN clients c ON c.id = p.client_id \
              WHERE p.client_id = $1 AND c.tenant_id = $2)",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(map)?;

        sqlx::query(
            "DELETE FROM projects WHERE client_id = $1 AND client_id IN \
             (SELECT id FROM clients WHERE tenant_id = $2)",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(map)?;

        let result = sqlx::query("DELETE FROM clients WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .map_err(map)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { kind: EntityKind::Client, id });
        }

        tx.commit().await.map_err(map)?;

        Ok(())
    }

    async fn list_projects(
        &self,
        tenant_id: i32,
        client_id: Option<i32>,
    ) -> Result<Vec<Project>, StoreError> {
        let query = match client_id {
            Some(_) => format!(
                "SELECT {PROJECT_COLS} FROM projects \
                 WHERE client_id = $1 AND client_id IN \
                 (SELECT id FROM clients WHERE tenant_id = $2) \
                 ORDER BY created_at DESC"
            ),
            None => format!(
                "SELECT {PROJECT_COLS} FROM projects \
                 WHERE client_id IN (SELECT id FROM clients WHERE tenant_id = $1) \
                 ORDER BY created_at DESC"
            ),
        };

        let mut q = sqlx::query_as::<_, Project>(&query);
        if let Some(client_id) = client_id {
            q = q.bind(client_id);
        }
        q.bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx(e, EntityKind::Project, 0))
    }

    async fn create_project(
        &self,
        tenant_id: i32,
        project: &Project,
    ) -> Result<Project, StoreError> {
        sqlx::query_as::<_, Project>(&format!(
            "INSERT INTO projects (client_id, name, status, start_date, end_date, budget) \
             SELECT $1::int4, $2::text, $3::text, $4::date, $5::date, $6::float8 \
             WHERE $1 IN (SELECT id FROM clients WHERE tenant_id = $7) \
             RETURNING {PROJECT_COLS}"
        ))
        .bind(project.client_id)
        .bind(&project.name)
        .bind(project.status)
        .bind(project.start_date)
        .bind(project.end_date)
        .bind(project.budget)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, EntityKind::Project, project.id))?
        .ok_or_else(|| {
            StoreError::Conflict(format!(
                "client {} does not exist for this tenant",
                project.client_id
            ))
        })
    }

    async fn update_project(
        &self,
        tenant_id: i32,
        project: &Project,
    ) -> Result<Project, StoreError> {
        let updated = sqlx::query_as::<_, Project>(&format!(
            "UPDATE projects \
             SET name = $1, status = $2, start_date = $3, end_date = $4, budget = $5 \
             WHERE id = $6 AND client_id IN (SELECT id FROM clients WHERE tenant_id = $7) \
             RETURNING {PROJECT_COLS}"
        ))
        .bind(&project.name)
        .bind(project.status)
        .bind(project.start_date)
        .bind(project.end_date)
        .bind(project.budget)
        .bind(project.id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, EntityKind::Project, project.id))?;

        updated.ok_or(StoreError::NotFound { kind: EntityKind::Project, id: project.id })
    }

    async fn delete_project(&self, tenant_id: i32, id: i32) -> Result<(), StoreError> {
        let map = |e| map_sqlx(e, EntityKind::Project, id);

        let mut tx = self.pool.begin().await.map_err(map)?;

        sqlx::query(
            "DELETE FROM credentials WHERE project_id = $1 AND project_id IN \
             (SELECT p.id FROM projects p \
              JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $2)",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(map)?;

        sqlx::query(
            "DELETE FROM milestones WHERE project_id = $1 AND project_id IN \
             (SELECT p.id FROM projects p \
              JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $2)",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(map)?;

        let result = sqlx::query(
            "DELETE FROM projects WHERE id = $1 AND client_id IN \
             (SELECT id FROM clients WHERE tenant_id = $2)",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(map)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { kind: EntityKind::Project, id });
        }

        tx.commit().await.map_err(map)?;

        Ok(())
    }

    async fn list_milestones(
        &self,
        tenant_id: i32,
        project_id: Option<i32>,
    ) -> Result<Vec<Milestone>, StoreError> {
        let query = match project_id {
            Some(_) => format!(
                "SELECT {MILESTONE_COLS} FROM milestones \
                 WHERE project_id = $1 AND project_id IN \
                 (SELECT p.id FROM projects p \
                  JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $2) \
                 ORDER BY position ASC"
            ),
            None => format!(
                "SELECT {MILESTONE_COLS} FROM milestones \
                 WHERE project_id IN \
                 (SELECT p.id FROM projects p \
                  JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $1) \
                 ORDER BY project_id ASC, position ASC"
            ),
        };

        let mut q = sqlx::query_as::<_, Milestone>(&query);
        if let Some(project_id) = project_id {
            q = q.bind(project_id);
        }
        q.bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx(e, EntityKind::Milestone, 0))
    }

    async fn create_milestone(
        &self,
        tenant_id: i32,
        milestone: &Milestone,
    ) -> Result<Milestone, StoreError> {
        sqlx::query_as::<_, Milestone>(&format!(
            "INSERT INTO milestones (project_id, position, title, due_date, amount, completed) \
             SELECT $1::int4, $2::int4, $3::text, $4::date, $5::float8, $6::bool \
             WHERE $1 IN (SELECT p.id FROM projects p \
                          JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $7) \
             RETURNING {MILESTONE_COLS}"
        ))
        .bind(milestone.project_id)
        .bind(milestone.position)
        .bind(&milestone.title)
        .bind(milestone.due_date)
        .bind(milestone.amount)
        .bind(milestone.completed)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, EntityKind::Milestone, milestone.id))?
        .ok_or_else(|| {
            StoreError::Conflict(format!(
                "project {} does not exist for this tenant",
                milestone.project_id
            ))
        })
    }

    async fn update_milestone(
        &self,
        tenant_id: i32,
        milestone: &Milestone,
    ) -> Result<Milestone, StoreError> {
        let updated = sqlx::query_as::<_, Milestone>(&format!(
            "UPDATE milestones \
             SET position = $1, title = $2, due_date = $3, amount = $4, completed = $5 \
             WHERE id = $6 AND project_id IN \
             (SELECT p.id FROM projects p \
              JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $7) \
             RETURNING {MILESTONE_COLS}"
        ))
        .bind(milestone.position)
        .bind(&milestone.title)
        .bind(milestone.due_date)
        .bind(milestone.amount)
        .bind(milestone.completed)
        .bind(milestone.id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, EntityKind::Milestone, milestone.id))?;

        updated.ok_or(StoreError::NotFound { kind: EntityKind::Milestone, id: milestone.id })
    }

    async fn delete_milestone(&self, tenant_id: i32, id: i32) -> Result<(), StoreError> {
        let result = sqlx::query(
            "DELETE FROM milestones WHERE id = $1 AND project_id IN \
             (SELECT p.id FROM projects p \
              JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $2)",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, EntityKind::Milestone, id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { kind: EntityKind::Milestone, id });
        }

        Ok(())
    }

    async fn list_credentials(
        &self,
        tenant_id: i32,
        project_id: Option<i32>,
    ) -> Result<Vec<Credential>, StoreError> {
        let query = match project_id {
            Some(_) => format!(
                "SELECT {CREDENTIAL_COLS} FROM credentials \
                 WHERE project_id = $1 AND project_id IN \
                 (SELECT p.id FROM projects p \
                  JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $2) \
                 ORDER BY label ASC"
            ),
            None => format!(
                "SELECT {CREDENTIAL_COLS} FROM credentials \
                 WHERE project_id IN \
                 (SELECT p.id FROM projects p \
                  JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $1) \
                 ORDER BY label ASC"
            ),
        };

        let mut q = sqlx::query_as::<_, Credential>(&query);
        if let Some(project_id) = project_id {
            q = q.bind(project_id);
        }
        q.bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx(e, EntityKind::Credential, 0))
    }

    async fn create_credential(
        &self,
        tenant_id: i32,
        credential: &Credential,
    ) -> Result<Credential, StoreError> {
        sqlx::query_as::<_, Credential>(&format!(
            "INSERT INTO credentials (project_id, kind, label, username, secret) \
             SELECT $1::int4, $2::text, $3::text, $4::text, $5::text \
             WHERE $1 IN (SELECT p.id FROM projects p \
                          JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $6) \
             RETURNING {CREDENTIAL_COLS}"
        ))
        .bind(credential.project_id)
        .bind(credential.kind)
        .bind(&credential.label)
        .bind(&credential.username)
        .bind(credential.secret.expose())
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, EntityKind::Credential, credential.id))?
        .ok_or_else(|| {
            StoreError::Conflict(format!(
                "project {} does not exist for this tenant",
                credential.project_id
            ))
        })
    }

    async fn update_credential(
        &self,
        tenant_id: i32,
        credential: &Credential,
    ) -> Result<Credential, StoreError> {
        let updated = sqlx::query_as::<_, Credential>(&format!(
            "UPDATE credentials \
             SET kind = $1, label = $2, username = $3, secret = $4 \
             WHERE id = $5 AND project_id IN \
             (SELECT p.id FROM projects p \
              JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $6) \
             RETURNING {CREDENTIAL_COLS}"
        ))
        .bind(credential.kind)
        .bind(&credential.label)
        .bind(&credential.username)
        .bind(credential.secret.expose())
        .bind(credential.id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, EntityKind::Credential, credential.id))?;

        updated.ok_or(StoreError::NotFound { kind: EntityKind::Credential, id: credential.id })
    }

    async fn delete_credential(&self, tenant_id: i32, id: i32) -> Result<(), StoreError> {
        let result = sqlx::query(
            "DELETE FROM credentials WHERE id = $1 AND project_id IN \
             (SELECT p.id FROM projects p \
              JOIN clients c ON c.id = p.client_id WHERE c.tenant_id = $2)",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, EntityKind::Credential, id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { kind: EntityKind::Credential, id });
        }

        Ok(())
    }
}
