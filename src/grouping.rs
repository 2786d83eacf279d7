//! Credential grouping engine: pure projections from flat collections
//! into the client → project → credential display tree, plus validation
//! of the multi-credential creation form.
//!
//! Nothing here touches the cache or the remote store; callers pass the
//! collections in and get values back.

use std::collections::HashMap;

use crate::models::{Client, Credential, CredentialDraft, Project};

#[derive(Debug, Clone, PartialEq)]
pub struct CredentialTree {
    pub clients: Vec<ClientGroup>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientGroup {
    pub client: Client,
    pub projects: Vec<ProjectGroup>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectGroup {
    pub project: Project,
    pub credentials: Vec<Credential>,
}

/// Materialize the display tree.
///
/// Ordering is deterministic: clients by case-insensitive name with ties
/// broken by id, projects within a client by creation date descending,
/// credentials within a project by label ascending. Credentials whose
/// project is missing from `projects` (and projects whose client is
/// missing) are dropped rather than guessed at.
pub fn group_credentials(
    clients: &[Client],
    projects: &[Project],
    credentials: &[Credential],
) -> CredentialTree {
    let mut by_project: HashMap<i32, Vec<Credential>> = HashMap::new();
    for credential in credentials {
        by_project.entry(credential.project_id).or_default().push(credential.clone());
    }
    for list in by_project.values_mut() {
        list.sort_by(|a, b| a.label.cmp(&b.label).then(a.id.cmp(&b.id)));
    }

    let mut by_client: HashMap<i32, Vec<Project>> = HashMap::new();
    for project in projects {
        by_client.entry(project.client_id).or_default().push(project.clone());
    }

    let mut sorted_clients: Vec<Client> = clients.to_vec();
    sorted_clients.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then(a.id.cmp(&b.id))
    });

    let tree_clients = sorted_clients
        .into_iter()
        .map(|client| {
            let mut client_projects = by_client.remove(&client.id).unwrap_or_default();
            client_projects
                .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

            let project_groups = client_projects
                .into_iter()
                .map(|project| {
                    let credentials = by_project.remove(&project.id).unwrap_or_default();
                    ProjectGroup { project, credentials }
                })
                .collect();

            ClientGroup { client, projects: project_groups }
        })
        .collect();

    CredentialTree { clients: tree_clients }
}

/// One problem found while validating a batch-creation request. Row
/// indexes refer to positions in the submitted slice.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchError {
    UnknownProject { row: usize, project_id: i32 },
    EmptyLabel { row: usize },
    /// Two or more submitted rows collide on (project, label). One error
    /// per colliding group, listing every offending row.
    DuplicateLabel { project_id: i32, label: String, rows: Vec<usize> },
    /// A submitted row collides with a credential that already exists.
    LabelTaken { row: usize, project_id: i32, label: String, existing_id: i32 },
}

/// Validate the multi-credential form against the current project and
/// credential collections.
///
/// Returns every problem at once so the caller can highlight all
/// offending rows, never just the first.
pub fn validate_batch(
    drafts: &[CredentialDraft],
    projects: &[Project],
    existing: &[Credential],
) -> Result<(), Vec<BatchError>> {
    let mut errors = Vec::new();

    for (row, draft) in drafts.iter().enumerate() {
        if !projects.iter().any(|p| p.id == draft.project_id) {
            errors.push(BatchError::UnknownProject { row, project_id: draft.project_id });
        }
        if draft.label.trim().is_empty() {
            errors.push(BatchError::EmptyLabel { row });
            continue;
        }
        if let Some(taken) = existing
            .iter()
            .find(|c| c.project_id == draft.project_id && c.label == draft.label)
        {
            errors.push(BatchError::LabelTaken {
                row,
                project_id: draft.project_id,
                label: draft.label.clone(),
                existing_id: taken.id,
            });
        }
    }

    // Collisions between co-submitted rows, grouped so each (project,
    // label) pair yields exactly one error naming all of its rows.
    let mut groups: Vec<((i32, &str), Vec<usize>)> = Vec::new();
    for (row, draft) in drafts.iter().enumerate() {
        if draft.label.trim().is_empty() {
            continue;
        }
        let key = (draft.project_id, draft.label.as_str());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, rows)) => rows.push(row),
            None => groups.push((key, vec![row])),
        }
    }
    for ((project_id, label), rows) in groups {
        if rows.len() > 1 {
            errors.push(BatchError::DuplicateLabel {
                project_id,
                label: label.to_owned(),
                rows,
            });
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::{ClientStatus, CredentialKind, ProjectStatus, Secret};

    fn client(id: i32, name: &str) -> Client {
        Client {
            id,
            tenant_id: 1,
            name: name.into(),
            email: format!("{name}@example.com"),
            phone: String::new(),
            address: None,
            status: ClientStatus::Active,
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn project(id: i32, client_id: i32, name: &str, created_day: u32) -> Project {
        Project {
            id,
            client_id,
            name: name.into(),
            status: ProjectStatus::Active,
            start_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            end_date: None,
            budget: 1000.0,
            created_at: Utc.with_ymd_and_hms(2024, 6, created_day, 0, 0, 0).unwrap(),
        }
    }

    fn credential(id: i32, project_id: i32, label: &str) -> Credential {
        Credential {
            id,
            project_id,
            kind: CredentialKind::Hosting,
            label: label.into(),
            username: "admin".into(),
            secret: Secret::new("s3cret"),
        }
    }

    fn draft(project_id: i32, label: &str) -> CredentialDraft {
        CredentialDraft {
            project_id,
            kind: CredentialKind::Hosting,
            label: label.into(),
            username: "admin".into(),
            secret: Secret::new("s3cret"),
        }
    }

    #[test]
    fn tree_ordering_is_deterministic() {
        let clients = vec![client(2, "zeta"), client(1, "Acme"), client(3, "acme")];
        let projects = vec![
            project(10, 1, "older", 1),
            project(11, 1, "newer", 15),
            project(12, 2, "only", 3),
        ];
        let credentials = vec![
            credential(100, 10, "db"),
            credential(101, 10, "api"),
            credential(102, 11, "host"),
        ];

        let tree = group_credentials(&clients, &projects, &credentials);

        // "Acme" (id 1) before "acme" (id 3) before "zeta".
        let names: Vec<&str> =
            tree.clients.iter().map(|g| g.client.name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "acme", "zeta"]);

        // Projects newest-first within a client.
        let acme = &tree.clients[0];
        assert_eq!(acme.projects[0].project.id, 11);
        assert_eq!(acme.projects[1].project.id, 10);

        // Credentials by label ascending.
        let labels: Vec<&str> =
            acme.projects[1].credentials.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["api", "db"]);
    }

    #[test]
    fn grouping_is_idempotent() {
        let clients = vec![client(1, "Acme"), client(2, "Bell")];
        let projects = vec![project(10, 1, "a", 1), project(11, 2, "b", 2)];
        let credentials = vec![credential(100, 10, "db"), credential(101, 11, "api")];

        let first = group_credentials(&clients, &projects, &credentials);
        let second = group_credentials(&clients, &projects, &credentials);
        assert_eq!(first, second);
    }

    #[test]
    fn orphan_credentials_are_dropped() {
        let clients = vec![client(1, "Acme")];
        let projects = vec![project(10, 1, "a", 1)];
        let credentials = vec![credential(100, 10, "db"), credential(101, 99, "ghost")];

        let tree = group_credentials(&clients, &projects, &credentials);
        let total: usize = tree
            .clients
            .iter()
            .flat_map(|c| &c.projects)
            .map(|p| p.credentials.len())
            .sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn batch_collision_reports_every_offending_row_once() {
        let projects = vec![project(1, 1, "p1", 1)];
        let drafts = vec![draft(1, "db"), draft(1, "db"), draft(1, "api")];

        let errors = validate_batch(&drafts, &projects, &[]).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            BatchError::DuplicateLabel {
                project_id: 1,
                label: "db".into(),
                rows: vec![0, 1],
            }
        );
    }

    #[test]
    fn batch_reports_all_error_kinds_together() {
        let projects = vec![project(1, 1, "p1", 1)];
        let existing = vec![credential(50, 1, "host")];
        let drafts = vec![
            draft(9, "db"),   // unknown project
            draft(1, ""),     // empty label
            draft(1, "host"), // taken by existing id 50
        ];

        let errors = validate_batch(&drafts, &projects, &existing).unwrap_err();
        assert!(errors.contains(&BatchError::UnknownProject { row: 0, project_id: 9 }));
        assert!(errors.contains(&BatchError::EmptyLabel { row: 1 }));
        assert!(errors.contains(&BatchError::LabelTaken {
            row: 2,
            project_id: 1,
            label: "host".into(),
            existing_id: 50,
        }));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn valid_batch_passes() {
        let projects = vec![project(1, 1, "p1", 1)];
        let drafts = vec![draft(1, "db"), draft(1, "api")];
        assert!(validate_batch(&drafts, &projects, &[]).is_ok());
    }
}
