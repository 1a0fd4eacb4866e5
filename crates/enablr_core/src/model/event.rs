//! Change events carried between the change detector and the reconciler.
//!
//! # Responsibility
//! - Parse loosely-typed wire JSON into a closed event variant.
//! - Render events back to the wire shape and derive stable dedup ids.
//!
//! # Invariants
//! - Anything that is not a known `target_type`/`update_type` combination
//!   with its required fields is `EventError::Malformed`.
//! - Dedup ids depend only on event content and task revision.

use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Partition key shared by every full-schedule sweep.
pub const ALL_PARTITION_KEY: &str = "ALL";

const DEDUP_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_0e2a_9b4d_4f3e_8a57_d2c4_1e90_b3a6);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    Malformed(String),
}

impl Display for EventError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(message) => write!(f, "malformed change event: {message}"),
        }
    }
}

impl Error for EventError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateType {
    Create,
    Update,
    Delete,
}

impl UpdateType {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATE" => Some(Self::Create),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Whether existing future reminders must be removed first.
    pub fn removes_existing(&self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }

    /// Whether fresh reminders must be generated.
    pub fn generates_new(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

/// A validated change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// One task of one individual changed.
    Individual {
        target_id: String,
        task_id: String,
        update_type: UpdateType,
    },
    /// Rebuild every individual's schedule. The sweep always deletes and
    /// regenerates, whatever `update_type` says.
    All { update_type: UpdateType },
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    target_type: Option<String>,
    target_id: Option<String>,
    task_id: Option<String>,
    update_type: Option<String>,
}

impl ChangeEvent {
    pub fn individual(
        target_id: impl Into<String>,
        task_id: impl Into<String>,
        update_type: UpdateType,
    ) -> Self {
        Self::Individual {
            target_id: target_id.into(),
            task_id: task_id.into(),
            update_type,
        }
    }

    /// Parses one wire message body.
    pub fn from_wire(body: &str) -> Result<Self, EventError> {
        let wire: WireEvent = serde_json::from_str(body)
            .map_err(|err| EventError::Malformed(format!("invalid JSON body: {err}")))?;

        let target_type = required(wire.target_type, "target_type")?;
        match target_type.as_str() {
            "INDIVIDUAL" => Ok(Self::Individual {
                target_id: required(wire.target_id, "target_id")?,
                task_id: required(wire.task_id, "task_id")?,
                update_type: parse_update_type(required(wire.update_type, "update_type")?)?,
            }),
            // Scheduled sweeps are sent without an update type.
            "ALL" => Ok(Self::All {
                update_type: match wire.update_type {
                    Some(value) if !value.trim().is_empty() => parse_update_type(value)?,
                    _ => UpdateType::Update,
                },
            }),
            other => Err(EventError::Malformed(format!(
                "unknown target_type `{other}`"
            ))),
        }
    }

    /// Renders the wire JSON body.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Individual {
                target_id,
                task_id,
                update_type,
            } => json!({
                "target_type": "INDIVIDUAL",
                "target_id": target_id,
                "task_id": task_id,
                "update_type": update_type.as_wire(),
            }),
            Self::All { update_type } => json!({
                "target_type": "ALL",
                "update_type": update_type.as_wire(),
            }),
        }
        .to_string()
    }

    pub fn update_type(&self) -> UpdateType {
        match self {
            Self::Individual { update_type, .. } | Self::All { update_type } => *update_type,
        }
    }

    /// Transport partition: one per individual, one shared by sweeps.
    pub fn partition_key(&self) -> &str {
        match self {
            Self::Individual { target_id, .. } => target_id.as_str(),
            Self::All { .. } => ALL_PARTITION_KEY,
        }
    }

    /// Deterministic dedup id over the event body and the task revision it
    /// was computed from. Redelivering the same change yields the same id,
    /// while a later edit of the same task does not collide with it.
    pub fn dedup_id(&self, revision: &[u8]) -> Uuid {
        let mut name = self.to_wire().into_bytes();
        name.push(b'|');
        name.extend_from_slice(revision);
        Uuid::new_v5(&DEDUP_NAMESPACE, &name)
    }
}

fn parse_update_type(value: String) -> Result<UpdateType, EventError> {
    UpdateType::parse(&value)
        .ok_or_else(|| EventError::Malformed(format!("unknown update_type `{value}`")))
}

fn required(value: Option<String>, field: &str) -> Result<String, EventError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(EventError::Malformed(format!("missing `{field}`"))),
    }
}
