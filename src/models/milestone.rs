use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Payment milestone. `position` is a dense, gap-free 1-based sequence
/// within the owning project; completion only moves forward unless the
/// caller explicitly writes it back.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: i32,
    pub project_id: i32,
    pub position: i32,
    pub title: String,
    pub due_date: NaiveDate,
    pub amount: f64,
    pub completed: bool,
}

/// Milestone row of an in-progress wizard draft, before a project id
/// exists to attach it to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneDraft {
    pub position: i32,
    pub title: String,
    pub due_date: NaiveDate,
    pub amount: f64,
}
