mod client;
mod project;
mod milestone;
mod credential;

pub use client::{Client, ClientStatus};
pub use project::{Project, ProjectStatus};
pub use milestone::{Milestone, MilestoneDraft};
pub use credential::{Credential, CredentialDraft, CredentialKind, Secret};

use std::fmt;

/// Discriminant shared by the cache, the orchestrator and the error
/// taxonomy to talk about an entity without holding one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Client,
    Project,
    Milestone,
    Credential,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Client => "client",
            Self::Project => "project",
            Self::Milestone => "milestone",
            Self::Credential => "credential",
        };
        f.write_str(s)
    }
}
