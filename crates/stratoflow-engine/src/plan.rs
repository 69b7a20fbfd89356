//! Plan/apply bookkeeping

use crate::diff::ChangeSet;
use crate::state::ResourceAddress;
use serde::{Deserialize, Serialize};

/// What a reconciliation would do to one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub address: ResourceAddress,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Remote ID, when the resource exists
    pub remote_id: Option<String>,

    pub changes: ChangeSet,

    /// Problems found while refreshing (drift, vanished resources)
    pub warnings: Vec<String>,
}

impl Action {
    /// One-line description for plan output
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("{} will be created", self.address),
            ActionType::Update => format!(
                "{} will be updated in-place ({} change(s))",
                self.address,
                self.changes.len()
            ),
            ActionType::Replace => format!(
                "{} must be replaced ({})",
                self.address,
                self.changes.replace_reasons().join(", ")
            ),
            ActionType::Delete => format!("{} will be destroyed", self.address),
            ActionType::NoOp => format!("{} is up to date", self.address),
        }
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    /// Delete, then create
    Replace,
    Delete,
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Result of applying actions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Successfully reconciled resources
    pub succeeded: Vec<ActionResult>,

    /// Failed resources
    pub failed: Vec<ActionResult>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, address: &ResourceAddress, message: String) {
        self.succeeded.push(ActionResult {
            address: address.to_string(),
            success: true,
            message,
            error: None,
        });
    }

    pub fn add_failure(&mut self, address: &ResourceAddress, error: String) {
        self.failed.push(ActionResult {
            address: address.to_string(),
            success: false,
            message: String::new(),
            error: Some(error),
        });
    }
}

/// Result of a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub address: String,

    pub success: bool,

    /// Success message
    pub message: String,

    /// Error message if failed
    pub error: Option<String>,
}

/// Plan containing all actions to be applied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            replace: self.actions_by_type(ActionType::Replace).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.no_change
        )
    }
}
