//! Wire protocol spoken over the instance socket.
//!
//! The server pushes notification envelopes (`{"Action": ..., "Data": ...}`)
//! and accepts fire-and-forget commands in the same shape. Notification rows
//! are decoded one at a time so a single malformed row never poisons the
//! rest of its batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtoError, ProtoResult};

// ── Service records ───────────────────────────────────────────────

/// Network address of a service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAddr {
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    #[serde(rename = "Port")]
    pub port: u16,
}

impl ServiceAddr {
    /// `ip:port` form, used as the instance identifier.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }
}

/// Static configuration a service instance registered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceConfig {
    pub name: String,
    pub version: String,
    pub region: String,
    pub service_addr: ServiceAddr,
    /// Admin endpoint. Older servers omit it and share the service address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_addr: Option<ServiceAddr>,
}

/// One service instance as reported by the registry.
///
/// Unknown fields are tolerated so newer servers can add to the record;
/// every field declared here is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRecord {
    pub config: ServiceConfig,
    pub registered: bool,
}

impl ServiceRecord {
    pub fn region(&self) -> &str {
        &self.config.region
    }

    /// Host the instance runs on (its node).
    pub fn host(&self) -> &str {
        &self.config.service_addr.ip_address
    }

    pub fn instance_id(&self) -> String {
        self.config.service_addr.endpoint()
    }

    pub fn admin_address(&self) -> String {
        self.config
            .admin_addr
            .as_ref()
            .unwrap_or(&self.config.service_addr)
            .endpoint()
    }
}

// ── Inbound notifications ─────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Data", default)]
    data: Value,
}

/// A decoded notification envelope whose rows are not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Full authoritative snapshot.
    List(Vec<RawRow>),
    /// Incremental deltas.
    Update(Vec<RawRow>),
    /// An action this client does not understand.
    Unknown(String),
}

impl Notification {
    /// Decode a text frame into a notification.
    ///
    /// Only the envelope is checked here. A `null` payload is an empty
    /// batch, which is what the server sends for an empty registry.
    pub fn decode(text: &str) -> ProtoResult<Self> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtoError::Decode(e.to_string()))?;

        match envelope.action.as_str() {
            "List" => Ok(Notification::List(into_rows(envelope.data)?)),
            "Update" => Ok(Notification::Update(into_rows(envelope.data)?)),
            _ => Ok(Notification::Unknown(envelope.action)),
        }
    }
}

fn into_rows(data: Value) -> ProtoResult<Vec<RawRow>> {
    match data {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, body)| RawRow { key, body })
            .collect()),
        other => Err(ProtoError::Decode(format!(
            "expected an object for Data, found {other}"
        ))),
    }
}

/// One entry of a notification payload, keyed by an opaque path.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub key: String,
    pub body: Value,
}

/// Kind of an incremental delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Add,
    Update,
    Remove,
}

impl DeltaKind {
    /// Map the wire `Type` value; unknown values yield `None`.
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "InstanceAddNotification" => Some(DeltaKind::Add),
            "InstanceUpdateNotification" => Some(DeltaKind::Update),
            "InstanceRemoveNotification" => Some(DeltaKind::Remove),
            _ => None,
        }
    }
}

/// A validated incremental delta.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub kind: DeltaKind,
    pub service: ServiceRecord,
}

impl RawRow {
    /// Validate this row as a snapshot entry (`{"Service": ...}`).
    pub fn snapshot_record(&self) -> ProtoResult<ServiceRecord> {
        #[derive(Deserialize)]
        struct SnapshotRow {
            #[serde(rename = "Service")]
            service: ServiceRecord,
        }

        SnapshotRow::deserialize(&self.body)
            .map(|row| row.service)
            .map_err(|e| self.malformed(e))
    }

    /// Validate this row as a delta (`{"Type": ..., "Service": ...}`).
    ///
    /// Returns `Ok(None)` for a `Type` this client does not know; the
    /// service body of such a row is not inspected.
    pub fn delta(&self) -> ProtoResult<Option<Delta>> {
        let kind = match self.body.get("Type") {
            Some(Value::String(kind)) => kind,
            Some(_) => return Err(self.malformed("field `Type` is not a string")),
            None => return Err(self.malformed("missing field `Type`")),
        };

        let Some(kind) = DeltaKind::from_wire(kind) else {
            return Ok(None);
        };

        let service = match self.body.get("Service") {
            Some(body) => ServiceRecord::deserialize(body).map_err(|e| self.malformed(e))?,
            None => return Err(self.malformed("missing field `Service`")),
        };

        Ok(Some(Delta { kind, service }))
    }

    /// The raw `Type` value, if present, for logging ignored rows.
    pub fn kind_name(&self) -> Option<&str> {
        self.body.get("Type").and_then(Value::as_str)
    }

    fn malformed(&self, reason: impl ToString) -> ProtoError {
        ProtoError::Malformed {
            key: self.key.clone(),
            reason: reason.to_string(),
        }
    }
}

// ── Outbound commands ─────────────────────────────────────────────

/// Restriction sent with a `Filter` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterCriterion {
    /// Only instances whose `Registered` flag matches.
    Registered(bool),
    /// Drop any restriction.
    Reset(bool),
}

/// Fire-and-forget command sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Action", content = "Data")]
pub enum Command {
    Heartbeat,
    Filter(FilterCriterion),
}

impl Command {
    /// Serialize to the JSON text frame written on the socket.
    pub fn encode(&self) -> ProtoResult<String> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encode(e.to_string()))
    }
}
