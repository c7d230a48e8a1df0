use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use reserva_core::UserId;

/// Metadata attached to every command execution.
///
/// Serialized into `RecordedEvent.meta` for audit; the runner also uses it to
/// label the `ConcurrencyConflictUnresolved` telemetry event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMeta {
    pub command_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<UserId>,
}

impl CommandMeta {
    pub fn new(command_name: impl Into<String>) -> Self {
        Self {
            command_name: command_name.into(),
            actor_user_id: None,
        }
    }

    pub fn with_actor(command_name: impl Into<String>, actor: UserId) -> Self {
        Self {
            command_name: command_name.into(),
            actor_user_id: Some(actor),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
