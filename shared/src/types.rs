use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use crate::protocol::{
    FIELD_CAPACITY, FIELD_EXTRAS, FIELD_KEY, FIELD_NAME, FIELD_PLAYERS, FIELD_PORT, FIELD_UUID,
};

/// Ordered form body sent with a single directory exchange.
pub type FormFields = Vec<(&'static str, String)>;

/// The directory-facing description of the local game server.
///
/// Identity (`uuid`, `port`) is fixed for the running instance. Everything
/// the `update` exchange carries lives in [`ServerStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Stable identifier, assigned once per running instance
    pub uuid: Uuid,

    /// Game port; the directory keys entries on address+port
    pub port: u16,

    /// Mutable part of the record
    #[serde(flatten)]
    pub status: ServerStatus,
}

/// Fields of the record that may change between exchanges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub name: String,
    pub player_count: u32,
    pub player_capacity: u32,

    /// Opaque payload, conventionally JSON
    pub extra: String,
}

impl ServerRecord {
    pub fn new(uuid: Uuid, port: u16, status: ServerStatus) -> Self {
        Self { uuid, port, status }
    }

    /// Fields for the `add` exchange: the full record.
    pub fn add_fields(&self, credentials: &Credentials) -> FormFields {
        vec![
            (FIELD_KEY, credentials.communication_key().to_string()),
            (FIELD_UUID, self.uuid.to_string()),
            (FIELD_NAME, self.status.name.clone()),
            (FIELD_PORT, self.port.to_string()),
            (FIELD_PLAYERS, self.status.player_count.to_string()),
            (FIELD_CAPACITY, self.status.player_capacity.to_string()),
            (FIELD_EXTRAS, self.status.extra.clone()),
        ]
    }

    /// Fields for the `update` exchange. The port is never sent here.
    pub fn update_fields(&self, credentials: &Credentials) -> FormFields {
        vec![
            (FIELD_KEY, credentials.communication_key().to_string()),
            (FIELD_UUID, self.uuid.to_string()),
            (FIELD_NAME, self.status.name.clone()),
            (FIELD_PLAYERS, self.status.player_count.to_string()),
            (FIELD_CAPACITY, self.status.player_capacity.to_string()),
            (FIELD_EXTRAS, self.status.extra.clone()),
        ]
    }

    /// Fields for the `remove` exchange.
    pub fn remove_fields(&self, credentials: &Credentials) -> FormFields {
        vec![
            (FIELD_KEY, credentials.communication_key().to_string()),
            (FIELD_UUID, self.uuid.to_string()),
        ]
    }
}

/// Shared secret presented with every exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    communication_key: String,
}

impl Credentials {
    pub fn new(communication_key: impl Into<String>) -> Self {
        Self {
            communication_key: communication_key.into(),
        }
    }

    pub fn communication_key(&self) -> &str {
        &self.communication_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("communication_key", &"<redacted>")
            .finish()
    }
}

/// Lifecycle state of the registration with the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Updating,
    Deregistering,
}

impl RegistrationState {
    /// True when no exchange is in flight.
    pub fn is_quiescent(self) -> bool {
        matches!(self, Self::Unregistered | Self::Registered)
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "unregistered",
            Self::Registering => "registering",
            Self::Registered => "registered",
            Self::Updating => "updating",
            Self::Deregistering => "deregistering",
        };
        f.write_str(s)
    }
}

/// Snapshot published by the controller on every transition.
/// This is what the agent's local API serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: RegistrationState,

    pub record: ServerRecord,

    /// Whether a periodic refresh is currently armed
    pub refresh_armed: bool,

    /// Last time an `add` (or fallback `update`) succeeded
    pub registered_at: Option<DateTime<Utc>>,

    /// Last time an `update` succeeded
    pub last_refresh_at: Option<DateTime<Utc>>,

    /// Detail of the most recent failed exchange, cleared on success
    pub last_error: Option<String>,
}
