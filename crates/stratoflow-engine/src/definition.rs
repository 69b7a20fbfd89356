//! Per-resource-type binding of a schema to remote actions
//!
//! A [`ResourceDefinition`] tells the orchestrator which remote action
//! creates, reads, updates and deletes a resource type, which response
//! field carries the remote ID, and which status values mean "settled".

use crate::error::{EngineError, Result};
use crate::poll::StatusWait;
use crate::schema::{AttributeKind, ResourceSchema};
use std::time::Duration;

/// Per-phase timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
    /// Budget for one poll-until-settled wait
    pub poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(5 * 60),
            read: Duration::from_secs(3 * 60),
            update: Duration::from_secs(5 * 60),
            delete: Duration::from_secs(5 * 60),
            poll: Duration::from_secs(20 * 60),
        }
    }
}

/// How an update group is sent to the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStyle {
    /// Send the ID plus every attribute of the group
    Replace,
    /// Send `{id, upsert, remove}` computed from a map attribute
    MapDelta { attribute: String },
}

/// Remote action applying changes to one update group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAction {
    pub group: String,
    pub action: String,
    pub style: UpdateStyle,
}

/// What to wait for after a delete step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteWait {
    /// Wait until the status attribute settles (e.g. `isolated`)
    Status(StatusWait),
    /// Wait until a read reports the resource gone
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStep {
    pub action: String,
    pub wait: DeleteWait,
}

/// Status attribute and the values that mean "ready"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusAttribute {
    pub attribute: String,
    pub wait: StatusWait,
}

/// Everything the orchestrator needs to manage one resource type
#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    pub schema: ResourceSchema,
    pub create: String,
    pub read: String,
    pub updates: Vec<UpdateAction>,
    /// Executed in order; the last step always waits for absence
    pub delete: Vec<DeleteStep>,
    /// Payload field carrying the remote ID in requests and responses
    pub id_field: String,
    pub status: Option<StatusAttribute>,
    pub timeouts: Timeouts,
}

impl ResourceDefinition {
    pub fn new(
        schema: ResourceSchema,
        create: impl Into<String>,
        read: impl Into<String>,
        id_field: impl Into<String>,
    ) -> Self {
        Self {
            schema,
            create: create.into(),
            read: read.into(),
            updates: Vec::new(),
            delete: Vec::new(),
            id_field: id_field.into(),
            status: None,
            timeouts: Timeouts::default(),
        }
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    pub fn update(mut self, group: impl Into<String>, action: impl Into<String>) -> Self {
        self.updates.push(UpdateAction {
            group: group.into(),
            action: action.into(),
            style: UpdateStyle::Replace,
        });
        self
    }

    /// Map-valued group updated by key-level delta
    pub fn update_map(
        mut self,
        group: impl Into<String>,
        action: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        self.updates.push(UpdateAction {
            group: group.into(),
            action: action.into(),
            style: UpdateStyle::MapDelta {
                attribute: attribute.into(),
            },
        });
        self
    }

    pub fn delete_step(mut self, action: impl Into<String>, wait: DeleteWait) -> Self {
        self.delete.push(DeleteStep {
            action: action.into(),
            wait,
        });
        self
    }

    pub fn status(mut self, attribute: impl Into<String>, wait: StatusWait) -> Self {
        self.status = Some(StatusAttribute {
            attribute: attribute.into(),
            wait,
        });
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn update_action(&self, group: &str) -> Option<&UpdateAction> {
        self.updates.iter().find(|u| u.group == group)
    }

    /// Check that every updatable group has an action and that deletion ends
    /// with an absence wait
    pub fn validate(&self) -> Result<()> {
        let type_name = self.type_name();

        for group in self.schema.update_groups() {
            let updatable = self
                .schema
                .iter()
                .any(|(_, a)| a.is_settable() && !a.force_replace && a.group_name() == group);
            if updatable && self.update_action(group).is_none() {
                return Err(EngineError::Schema(format!(
                    "{}: no update action for group '{}'",
                    type_name, group
                )));
            }
        }

        for update in &self.updates {
            if let UpdateStyle::MapDelta { attribute } = &update.style {
                match self.schema.get(attribute) {
                    Some(attr) if matches!(attr.kind, AttributeKind::Map(_)) => {}
                    _ => {
                        return Err(EngineError::Schema(format!(
                            "{}: delta update '{}' needs a map attribute, '{}' is not one",
                            type_name, update.action, attribute
                        )));
                    }
                }
            }
        }

        let status_steps = self
            .delete
            .iter()
            .any(|step| matches!(step.wait, DeleteWait::Status(_)));
        if status_steps && self.status.is_none() {
            return Err(EngineError::Schema(format!(
                "{}: delete steps wait on a status but no status attribute is declared",
                type_name
            )));
        }

        match self.delete.last() {
            Some(DeleteStep {
                wait: DeleteWait::Absent,
                ..
            }) => {}
            Some(step) => {
                return Err(EngineError::Schema(format!(
                    "{}: last delete step '{}' must wait for absence",
                    type_name, step.action
                )));
            }
            None => {
                return Err(EngineError::Schema(format!(
                    "{}: no delete action",
                    type_name
                )));
            }
        }

        if let Some(status) = &self.status {
            match self.schema.get(&status.attribute) {
                Some(attr) if attr.kind == AttributeKind::string() => {}
                _ => {
                    return Err(EngineError::Schema(format!(
                        "{}: status attribute '{}' must be a string attribute",
                        type_name, status.attribute
                    )));
                }
            }
        }

        Ok(())
    }
}
