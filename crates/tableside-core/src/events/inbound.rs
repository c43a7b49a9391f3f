//! Immutable inbound event value object and its schema validation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{BranchId, SectorId, SessionId, TableId, TenantId};

/// Highest envelope schema version this gateway understands.
pub const CURRENT_SCHEMA_VERSION: u64 = 1;

/// Reasons an envelope from the bus is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventValidationError {
    /// The payload is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),
    /// The payload is JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,
    /// A required field is absent or null.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// A field has the wrong JSON type.
    #[error("field `{field}` must be {expected}")]
    WrongType {
        /// Offending field.
        field: &'static str,
        /// Expected type description.
        expected: &'static str,
    },
    /// The envelope was produced by a newer schema.
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u64),
}

/// A validated event from the bus.
///
/// Fields are private and only exposed through borrowing accessors, so an
/// event shared across concurrent fan-out tasks (as `Arc<InboundEvent>`)
/// can never be mutated after construction. The nested `entity` and `actor`
/// payloads are owned copies taken out of the parsed document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundEvent {
    #[serde(rename = "type")]
    event_type: String,
    tenant_id: TenantId,
    branch_id: BranchId,
    #[serde(skip_serializing_if = "Option::is_none")]
    table_id: Option<TableId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sector_id: Option<SectorId>,
    entity: Value,
    actor: Value,
    ts: DateTime<Utc>,
    v: u64,
}

impl InboundEvent {
    /// Parse and validate a raw bus payload.
    pub fn parse(raw: &str) -> Result<Self, EventValidationError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| EventValidationError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already-parsed JSON document.
    pub fn from_value(value: Value) -> Result<Self, EventValidationError> {
        let Value::Object(mut obj) = value else {
            return Err(EventValidationError::NotAnObject);
        };

        let event_type = match obj.remove("type") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::String(_)) | None | Some(Value::Null) => {
                return Err(EventValidationError::MissingField("type"));
            }
            Some(_) => {
                return Err(EventValidationError::WrongType {
                    field: "type",
                    expected: "a string",
                });
            }
        };

        let tenant_id = required_id(&obj, "tenant_id")?;
        let branch_id = required_id(&obj, "branch_id")?;
        let table_id = optional_id(&obj, "table_id")?;
        let session_id = optional_id(&obj, "session_id")?;
        let sector_id = optional_id(&obj, "sector_id")?;

        let v = match obj.get("v") {
            None | Some(Value::Null) => CURRENT_SCHEMA_VERSION,
            Some(value) => value.as_u64().ok_or(EventValidationError::WrongType {
                field: "v",
                expected: "a non-negative integer",
            })?,
        };
        if v > CURRENT_SCHEMA_VERSION {
            return Err(EventValidationError::UnsupportedVersion(v));
        }

        let ts = match obj.get("ts") {
            None | Some(Value::Null) => Utc::now(),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| EventValidationError::WrongType {
                    field: "ts",
                    expected: "an RFC 3339 timestamp",
                })?,
            Some(_) => {
                return Err(EventValidationError::WrongType {
                    field: "ts",
                    expected: "an RFC 3339 timestamp",
                });
            }
        };

        // Opaque to the gateway: any JSON value is forwarded as sent.
        let entity = match obj.remove("entity") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(entity) => entity,
        };
        let actor = obj.remove("actor").unwrap_or(Value::Null);

        Ok(Self {
            event_type,
            tenant_id,
            branch_id,
            table_id,
            session_id,
            sector_id,
            entity,
            actor,
            ts,
            v,
        })
    }

    /// Event type name chosen by the backend (e.g. `ROUND_SUBMITTED`).
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Owning tenant.
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Branch the event belongs to.
    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    /// Table the event concerns, if any.
    pub fn table_id(&self) -> Option<TableId> {
        self.table_id
    }

    /// Diner table session the event concerns, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Sector the event is scoped to, if any.
    pub fn sector_id(&self) -> Option<SectorId> {
        self.sector_id
    }

    /// Opaque domain payload.
    pub fn entity(&self) -> &Value {
        &self.entity
    }

    /// Who caused the event, as reported by the backend.
    pub fn actor(&self) -> &Value {
        &self.actor
    }

    /// When the backend produced the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }

    /// Envelope schema version.
    pub fn version(&self) -> u64 {
        self.v
    }

    /// Serialize to the outbound client envelope.
    pub fn to_client_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn required_id(obj: &Map<String, Value>, field: &'static str) -> Result<i64, EventValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(EventValidationError::MissingField(field)),
        Some(value) => value.as_i64().ok_or(EventValidationError::WrongType {
            field,
            expected: "an integer",
        }),
    }
}

fn optional_id(
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<i64>, EventValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or(EventValidationError::WrongType {
            field,
            expected: "an integer",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_envelope() {
        let raw = json!({
            "type": "ROUND_SUBMITTED",
            "tenant_id": 1,
            "branch_id": 5,
            "table_id": 12,
            "session_id": 99,
            "sector_id": 2,
            "entity": {"round_id": 7, "items": [{"qty": 2}]},
            "actor": {"user_id": 3, "role": "WAITER"},
            "ts": "2026-03-01T12:00:00Z",
            "v": 1
        })
        .to_string();

        let event = InboundEvent::parse(&raw).unwrap();
        assert_eq!(event.event_type(), "ROUND_SUBMITTED");
        assert_eq!(event.tenant_id(), 1);
        assert_eq!(event.branch_id(), 5);
        assert_eq!(event.table_id(), Some(12));
        assert_eq!(event.session_id(), Some(99));
        assert_eq!(event.sector_id(), Some(2));
        assert_eq!(event.entity()["items"][0]["qty"], 2);
        assert_eq!(event.actor()["role"], "WAITER");
        assert_eq!(event.version(), 1);
    }

    #[test]
    fn test_missing_tenant_rejected() {
        let raw = json!({"type": "TABLE_CLEARED", "branch_id": 5}).to_string();
        assert_eq!(
            InboundEvent::parse(&raw).unwrap_err(),
            EventValidationError::MissingField("tenant_id")
        );
    }

    #[test]
    fn test_string_branch_rejected() {
        let raw = json!({"type": "X", "tenant_id": 1, "branch_id": "5"}).to_string();
        assert!(matches!(
            InboundEvent::parse(&raw).unwrap_err(),
            EventValidationError::WrongType { field: "branch_id", .. }
        ));
    }

    #[test]
    fn test_non_object_and_garbage_rejected() {
        assert_eq!(
            InboundEvent::parse("[1,2]").unwrap_err(),
            EventValidationError::NotAnObject
        );
        assert!(matches!(
            InboundEvent::parse("not json").unwrap_err(),
            EventValidationError::Malformed(_)
        ));
    }

    #[test]
    fn test_future_version_rejected() {
        let raw = json!({"type": "X", "tenant_id": 1, "branch_id": 2, "v": 9}).to_string();
        assert_eq!(
            InboundEvent::parse(&raw).unwrap_err(),
            EventValidationError::UnsupportedVersion(9)
        );
    }

    #[test]
    fn test_client_json_omits_absent_scopes() {
        let raw = json!({"type": "CHECK_PAID", "tenant_id": 1, "branch_id": 2}).to_string();
        let event = InboundEvent::parse(&raw).unwrap();
        let out: Value = serde_json::from_str(&event.to_client_json().unwrap()).unwrap();
        assert_eq!(out["type"], "CHECK_PAID");
        assert!(out.get("sector_id").is_none());
        assert!(out.get("session_id").is_none());
        assert_eq!(out["entity"], json!({}));
        assert_eq!(out["v"], 1);
    }

    #[test]
    fn test_entity_is_opaque() {
        for entity in [json!([1, 2, 3]), json!("cancelled"), json!(42), json!({"id": 7})] {
            let raw = json!({"type": "X", "tenant_id": 1, "branch_id": 2, "entity": entity.clone()}).to_string();
            let event = InboundEvent::parse(&raw).unwrap();
            assert_eq!(event.entity(), &entity);
            let out: Value = serde_json::from_str(&event.to_client_json().unwrap()).unwrap();
            assert_eq!(out["entity"], entity);
        }
    }
}
