use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Hosting,
    Domain,
    ApiKey,
    Database,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hosting => "hosting",
            Self::Domain => "domain",
            Self::ApiKey => "api_key",
            Self::Database => "database",
        };
        f.write_str(s)
    }
}

impl FromStr for CredentialKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hosting" => Ok(Self::Hosting),
            "domain" => Ok(Self::Domain),
            "api_key" => Ok(Self::ApiKey),
            "database" => Ok(Self::Database),
            other => Err(format!("invalid credential kind: {other:?}")),
        }
    }
}

/// Key material that must never appear in logs. `Debug` redacts; there is
/// no `Display`. Callers that actually need the value go through
/// [`Secret::expose`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: i32,
    pub project_id: i32,
    pub kind: CredentialKind,
    /// Unique within the owning project.
    pub label: String,
    pub username: String,
    pub secret: Secret,
}

/// Credential row of a batch-creation form or a wizard draft.
///
/// The secret is deliberately skipped on serialize so a draft persisted to
/// disk never carries plaintext key material; a reloaded draft has to have
/// its secrets re-entered before it validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialDraft {
    /// Target project. Zero for wizard drafts, where the project does not
    /// exist yet and the id is filled in at commit time.
    pub project_id: i32,
    pub kind: CredentialKind,
    pub label: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub secret: Secret,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(****)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn draft_serialization_drops_secret() {
        let draft = CredentialDraft {
            project_id: 7,
            kind: CredentialKind::Hosting,
            label: "prod host".into(),
            username: "deploy".into(),
            secret: Secret::new("hunter2"),
        };
        let json = serde_json::to_string(&draft).unwrap();
        assert!(!json.contains("hunter2"));

        let back: CredentialDraft = serde_json::from_str(&json).unwrap();
        assert!(back.secret.is_empty());
    }
}
