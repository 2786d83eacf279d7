//! Guided "create project with milestones and credentials" flow as an
//! explicit state machine over a draft aggregate.
//!
//! The wizard never talks to the remote store directly; every commit goes
//! through the [`MutationOrchestrator`]. On partial failure the created
//! project id is retained so [`ProjectWizard::resume`] re-submits only the
//! failed children instead of duplicating the project.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::cache::Record;
use crate::config::Config;
use crate::error::StoreError;
use crate::models::{
    Credential, CredentialDraft, Milestone, MilestoneDraft, Project, ProjectStatus,
};
use crate::sync::{Liveness, MutationOrchestrator};

/// Persisted drafts carry a format version; a mismatch on load discards
/// the draft rather than attempting migration.
const DRAFT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WizardStep {
    ClientSelect,
    ProjectDetails,
    Milestones,
    Credentials,
    Review,
}

impl WizardStep {
    fn next(self) -> Option<Self> {
        match self {
            Self::ClientSelect => Some(Self::ProjectDetails),
            Self::ProjectDetails => Some(Self::Milestones),
            Self::Milestones => Some(Self::Credentials),
            Self::Credentials => Some(Self::Review),
            Self::Review => None,
        }
    }

    fn back(self) -> Option<Self> {
        match self {
            Self::ClientSelect => None,
            Self::ProjectDetails => Some(Self::ClientSelect),
            Self::Milestones => Some(Self::ProjectDetails),
            Self::Credentials => Some(Self::Milestones),
            Self::Review => Some(Self::Credentials),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WizardState {
    Draft(WizardStep),
    Submitting,
    Committed,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDraft {
    pub client_id: Option<i32>,
    pub name: String,
    pub status: ProjectStatus,
    pub start_date: chrono::NaiveDate,
    pub end_date: Option<chrono::NaiveDate>,
    pub budget: f64,
}

impl ProjectDraft {
    fn new() -> Self {
        Self {
            client_id: None,
            name: String::new(),
            status: ProjectStatus::Planned,
            start_date: Local::now().date_naive(),
            end_date: None,
            budget: 0.0,
        }
    }
}

/// The in-progress project plus its milestones and credentials, held in
/// memory until commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftAggregate {
    pub project: ProjectDraft,
    pub milestones: Vec<MilestoneDraft>,
    pub credentials: Vec<CredentialDraft>,
}

impl DraftAggregate {
    fn new() -> Self {
        Self { project: ProjectDraft::new(), milestones: Vec::new(), credentials: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKind {
    Milestone,
    Credential,
}

/// A child record that failed to commit, by its row in the draft.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildFailure {
    pub kind: ChildKind,
    pub row: usize,
    pub error: StoreError,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedDraft {
    version: u32,
    tenant_id: i32,
    step: WizardStep,
    draft: DraftAggregate,
}

pub struct ProjectWizard {
    tenant_id: i32,
    state: WizardState,
    draft: DraftAggregate,
    /// Set as soon as the project is created remotely; survives child
    /// failures so a retry never duplicates the project.
    project_id: Option<i32>,
    committed: HashMap<(ChildKind, usize), i32>,
    failures: Vec<ChildFailure>,
}

impl ProjectWizard {
    pub fn new(tenant_id: i32) -> Self {
        Self {
            tenant_id,
            state: WizardState::Draft(WizardStep::ClientSelect),
            draft: DraftAggregate::new(),
            project_id: None,
            committed: HashMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    pub fn step(&self) -> Option<WizardStep> {
        match &self.state {
            WizardState::Draft(step) => Some(*step),
            _ => None,
        }
    }

    pub fn draft(&self) -> &DraftAggregate {
        &self.draft
    }

    /// The draft is only editable while the wizard is in a `Draft` step.
    pub fn draft_mut(&mut self) -> Option<&mut DraftAggregate> {
        match &self.state {
            WizardState::Draft(_) => Some(&mut self.draft),
            _ => None,
        }
    }

    pub fn project_id(&self) -> Option<i32> {
        self.project_id
    }

    pub fn failures(&self) -> &[ChildFailure] {
        &self.failures
    }

    pub fn is_child_committed(&self, kind: ChildKind, row: usize) -> bool {
        self.committed.contains_key(&(kind, row))
    }

    /// Advance one step if the current step's validation passes.
    pub fn next(&mut self) -> Result<WizardStep, StoreError> {
        let WizardState::Draft(step) = &self.state else {
            return Err(StoreError::Validation("wizard is no longer in a draft step".into()));
        };
        let step = *step;
        self.validate_step(step)?;
        match step.next() {
            Some(next) => {
                self.state = WizardState::Draft(next);
                Ok(next)
            }
            None => Err(StoreError::Validation(
                "already at review; submit instead of advancing".into(),
            )),
        }
    }

    /// Go back one step. Never validates; editing backwards is always
    /// allowed.
    pub fn back(&mut self) -> Option<WizardStep> {
        let WizardState::Draft(step) = &self.state else {
            return None;
        };
        let previous = step.back()?;
        self.state = WizardState::Draft(previous);
        Some(previous)
    }

    /// Discard the in-memory draft with no remote effect. Only possible
    /// from a draft step; returns whether anything was discarded.
    pub fn cancel(&mut self) -> bool {
        match self.state {
            WizardState::Draft(_) => {
                *self = Self::new(self.tenant_id);
                true
            }
            _ => false,
        }
    }

    /// Rewrite milestone positions into a dense 1..n sequence, keeping
    /// the current relative order.
    pub fn renumber_milestones(&mut self) {
        self.draft.milestones.sort_by_key(|m| m.position);
        for (index, milestone) in self.draft.milestones.iter_mut().enumerate() {
            milestone.position = index as i32 + 1;
        }
    }

    fn validate_step(&self, step: WizardStep) -> Result<(), StoreError> {
        let mut problems: Vec<String> = Vec::new();
        let draft = &self.draft;

        match step {
            WizardStep::ClientSelect => {
                if draft.project.client_id.is_none() {
                    problems.push("a client must be selected".into());
                }
            }
            WizardStep::ProjectDetails => {
                if draft.project.name.trim().is_empty() {
                    problems.push("project name must not be empty".into());
                }
                if let Some(end) = draft.project.end_date {
                    if end < draft.project.start_date {
                        problems.push("end date precedes start date".into());
                    }
                }
                if draft.project.budget < 0.0 {
                    problems.push("budget must not be negative".into());
                }
            }
            WizardStep::Milestones => {
                let mut positions: Vec<i32> =
                    draft.milestones.iter().map(|m| m.position).collect();
                positions.sort_unstable();
                let dense = positions
                    .iter()
                    .enumerate()
                    .all(|(index, position)| *position == index as i32 + 1);
                if !dense {
                    problems.push(
                        "milestone positions must form a dense 1..n sequence".into(),
                    );
                }
                for (row, milestone) in draft.milestones.iter().enumerate() {
                    if milestone.title.trim().is_empty() {
                        problems.push(format!("milestone {} needs a title", row + 1));
                    }
                    if milestone.amount < 0.0 {
                        problems.push(format!(
                            "milestone {} has a negative amount",
                            row + 1
                        ));
                    }
                }
            }
            WizardStep::Credentials => {
                for (row, credential) in draft.credentials.iter().enumerate() {
                    if credential.label.trim().is_empty() {
                        problems.push(format!("credential {} needs a label", row + 1));
                    }
                    if credential.secret.is_empty() {
                        problems.push(format!(
                            "credential {} needs its secret (re-)entered",
                            row + 1
                        ));
                    }
                }
                for (row, credential) in draft.credentials.iter().enumerate() {
                    let first = draft
                        .credentials
                        .iter()
                        .position(|c| c.label == credential.label)
                        .unwrap_or(row);
                    if first < row && !credential.label.trim().is_empty() {
                        problems.push(format!(
                            "credential label {:?} is used more than once",
                            credential.label
                        ));
                    }
                }
            }
            WizardStep::Review => {
                for earlier in [
                    WizardStep::ClientSelect,
                    WizardStep::ProjectDetails,
                    WizardStep::Milestones,
                    WizardStep::Credentials,
                ] {
                    self.validate_step(earlier)?;
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(problems.join("; ")))
        }
    }

    /// Commit the draft. Only reachable from the review step; the project
    /// is created first, then all children in parallel against its id.
    ///
    /// `Err` is returned for local validation problems only; remote
    /// outcomes land in the resulting state (`Committed` or `Failed`).
    pub async fn submit(
        &mut self,
        orchestrator: &MutationOrchestrator,
        live: &Liveness,
    ) -> Result<&WizardState, StoreError> {
        match &self.state {
            WizardState::Draft(WizardStep::Review) => {}
            _ => {
                return Err(StoreError::Validation(
                    "submit is only available from the review step".into(),
                ));
            }
        }
        self.validate_step(WizardStep::Review)?;

        self.state = WizardState::Submitting;
        self.create_project_then_children(orchestrator, live).await;
        Ok(&self.state)
    }

    /// Retry after a failed commit. If the project already exists only
    /// the failed children are re-submitted; if the project creation
    /// itself failed, the whole commit is retried.
    pub async fn resume(
        &mut self,
        orchestrator: &MutationOrchestrator,
        live: &Liveness,
    ) -> Result<&WizardState, StoreError> {
        match &self.state {
            WizardState::Failed { .. } => {}
            _ => {
                return Err(StoreError::Validation(
                    "resume is only available after a failed commit".into(),
                ));
            }
        }

        self.state = WizardState::Submitting;
        if self.project_id.is_some() {
            self.commit_children(orchestrator, live).await;
        } else {
            self.create_project_then_children(orchestrator, live).await;
        }
        Ok(&self.state)
    }

    async fn create_project_then_children(
        &mut self,
        orchestrator: &MutationOrchestrator,
        live: &Liveness,
    ) {
        let Some(client_id) = self.draft.project.client_id else {
            self.state = WizardState::Failed { reason: "no client selected".into() };
            return;
        };
        let project = Project {
            id: 0,
            client_id,
            name: self.draft.project.name.clone(),
            status: self.draft.project.status,
            start_date: self.draft.project.start_date,
            end_date: self.draft.project.end_date,
            budget: self.draft.project.budget,
            created_at: Utc::now(),
        };

        match orchestrator.create(self.tenant_id, live, Record::Project(project)).await {
            Ok(Record::Project(created)) => {
                tracing::debug!(project_id = created.id, "wizard created project");
                self.project_id = Some(created.id);
                self.commit_children(orchestrator, live).await;
            }
            Ok(_) => {
                self.state = WizardState::Failed {
                    reason: "remote returned a record of the wrong kind".into(),
                };
            }
            Err(err) => {
                tracing::debug!(error = %err, "wizard project creation failed");
                self.state = WizardState::Failed { reason: err.to_string() };
            }
        }
    }

    async fn commit_children(
        &mut self,
        orchestrator: &MutationOrchestrator,
        live: &Liveness,
    ) {
        let Some(project_id) = self.project_id else {
            self.state = WizardState::Failed { reason: "project was never created".into() };
            return;
        };
        let tenant_id = self.tenant_id;

        let mut pending: Vec<(ChildKind, usize, Record)> = Vec::new();
        for (row, milestone) in self.draft.milestones.iter().enumerate() {
            if self.committed.contains_key(&(ChildKind::Milestone, row)) {
                continue;
            }
            pending.push((
                ChildKind::Milestone,
                row,
                Record::Milestone(Milestone {
                    id: 0,
                    project_id,
                    position: milestone.position,
                    title: milestone.title.clone(),
                    due_date: milestone.due_date,
                    amount: milestone.amount,
                    completed: false,
                }),
            ));
        }
        for (row, credential) in self.draft.credentials.iter().enumerate() {
            if self.committed.contains_key(&(ChildKind::Credential, row)) {
                continue;
            }
            pending.push((
                ChildKind::Credential,
                row,
                Record::Credential(Credential {
                    id: 0,
                    project_id,
                    kind: credential.kind,
                    label: credential.label.clone(),
                    username: credential.username.clone(),
                    secret: credential.secret.clone(),
                }),
            ));
        }

        let child_futures = pending.into_iter().map(|(kind, row, record)| async move {
            let outcome = orchestrator.create(tenant_id, live, record).await;
            (kind, row, outcome)
        });
        let outcomes = join_all(child_futures).await;

        self.failures.clear();
        for (kind, row, outcome) in outcomes {
            match outcome {
                Ok(record) => {
                    self.committed.insert((kind, row), record.id());
                }
                Err(error) => self.failures.push(ChildFailure { kind, row, error }),
            }
        }
        self.failures.sort_by(|a, b| (a.kind, a.row).cmp(&(b.kind, b.row)));

        if self.failures.is_empty() {
            self.state = WizardState::Committed;
        } else {
            tracing::warn!(
                failed = self.failures.len(),
                project_id,
                "wizard commit left failed children; project id retained for resume"
            );
            self.state = WizardState::Failed {
                reason: format!("{} child record(s) failed to commit", self.failures.len()),
            };
        }
    }

    // ------------------------------------------------------------------
    // Draft persistence
    // ------------------------------------------------------------------

    /// Persist the in-progress draft under a versioned format. Secrets
    /// are never written (see [`CredentialDraft`]).
    pub fn save(&self, path: &Path) -> Result<()> {
        let WizardState::Draft(step) = &self.state else {
            bail!("only an in-progress draft can be saved");
        };
        let persisted = PersistedDraft {
            version: DRAFT_FORMAT_VERSION,
            tenant_id: self.tenant_id,
            step: *step,
            draft: self.draft.clone(),
        };
        let json = serde_json::to_string_pretty(&persisted)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write wizard draft to {}", path.display()))?;
        Ok(())
    }

    /// Load a previously saved draft. A missing file, an unreadable file,
    /// a version mismatch or a different tenant all discard the draft and
    /// return `None` rather than attempting migration.
    pub fn load(tenant_id: i32, path: &Path) -> Result<Option<Self>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read wizard draft from {}", path.display())
                });
            }
        };

        let persisted: PersistedDraft = match serde_json::from_str(&raw) {
            Ok(persisted) => persisted,
            Err(err) => {
                tracing::debug!(error = %err, "discarding unreadable wizard draft");
                return Ok(None);
            }
        };
        if persisted.version != DRAFT_FORMAT_VERSION {
            tracing::debug!(
                found = persisted.version,
                expected = DRAFT_FORMAT_VERSION,
                "discarding wizard draft with mismatched format version"
            );
            return Ok(None);
        }
        if persisted.tenant_id != tenant_id {
            return Ok(None);
        }

        Ok(Some(Self {
            tenant_id,
            state: WizardState::Draft(persisted.step),
            draft: persisted.draft,
            project_id: None,
            committed: HashMap::new(),
            failures: Vec::new(),
        }))
    }

    /// Persist the draft to the configured location. Returns `false` when
    /// draft persistence is disabled (no `DRAFT_PATH` set).
    pub fn save_to(&self, config: &Config) -> Result<bool> {
        match &config.draft_path {
            Some(path) => {
                self.save(path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Load a draft from the configured location, if persistence is
    /// enabled and a compatible draft exists.
    pub fn load_from(tenant_id: i32, config: &Config) -> Result<Option<Self>> {
        match &config.draft_path {
            Some(path) => Self::load(tenant_id, path),
            None => Ok(None),
        }
    }
}
