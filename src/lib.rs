//! Client-side synchronization core of a freelancer CRM: clients,
//! projects, payment milestones and a per-project credential vault kept
//! consistent with a remote store under optimistic updates.

pub mod cache;
pub mod config;
pub mod error;
pub mod grouping;
pub mod models;
pub mod remote;
pub mod sync;
pub mod wizard;

pub use cache::{CacheKey, CachedEntry, Filter, QueryCache, Record};
pub use error::StoreError;
pub use sync::{Liveness, MutationOrchestrator};
pub use wizard::{ProjectWizard, WizardState, WizardStep};
