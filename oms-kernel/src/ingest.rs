/**
 * INGESTION CONTRACT - Validation and normalization of occupancy inputs
 *
 * Device readings arrive over HTTP (`POST /api/occupancy/ingest`) or MQTT
 * (`/oms/v1/occupancy`) with the same snake_case payload. Required fields are
 * checked all at once so the caller gets every field error in one response.
 * Nothing is written when validation fails.
 */

use crate::error::{KernelError, ValidationErrors};
use crate::events::ManualOverride;
use crate::models::{UNKNOWN, UNKNOWN_ETA};
use serde::Deserialize;
use serde_json::Value;
use time::format_description::well_known::Iso8601;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// Raw device payload. Typed loosely so bad values become field errors
/// instead of a body rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadingIn {
    pub bus_id: Option<Value>,
    pub device_id: Option<Value>,
    pub occupancy: Option<Value>,
    pub capacity: Option<Value>,
    pub ts_device: Option<Value>,
    pub route_id: Option<Value>,
    pub route_name: Option<Value>,
    pub direction: Option<Value>,
    pub platform: Option<Value>,
    pub estimasi: Option<Value>,
}

/// A reading that passed validation, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidReading {
    pub bus_id: String,
    pub device_id: String,
    pub occupancy: u32,
    pub capacity: u32,
    pub reported_at: OffsetDateTime,
    pub route_id: String,
    pub route_name: String,
    pub direction: String,
    pub platform: String,
    pub estimasi: String,
}

impl ReadingIn {
    /// Decodes a request body. Only a non-object body fails here; field
    /// problems are left to `validate`.
    pub fn from_json(body: Value) -> Result<Self, KernelError> {
        serde_json::from_value(body).map_err(invalid_body)
    }

    pub fn validate(self, default_capacity: u32) -> Result<ValidReading, KernelError> {
        let mut errors = ValidationErrors::new();

        let bus_id = required_string(&mut errors, "bus_id", self.bus_id.as_ref());
        let device_id = required_string(&mut errors, "device_id", self.device_id.as_ref());

        let occupancy = match self.occupancy.as_ref().map(non_negative_int) {
            Some(Some(n)) => n,
            Some(None) => {
                errors.push("occupancy", "must be a non-negative integer");
                0
            }
            None => {
                errors.push("occupancy", "is required");
                0
            }
        };

        let capacity = match self.capacity.as_ref() {
            None | Some(Value::Null) => default_capacity,
            Some(v) => match non_negative_int(v) {
                Some(n) if n > 0 => n,
                _ => {
                    errors.push("capacity", "must be a positive integer");
                    default_capacity
                }
            },
        };

        let reported_at = match self.ts_device.as_ref() {
            Some(Value::String(s)) => match parse_device_time(s) {
                Some(ts) => Some(ts),
                None => {
                    errors.push("ts_device", "must be an ISO-8601 timestamp");
                    None
                }
            },
            Some(_) => {
                errors.push("ts_device", "must be an ISO-8601 timestamp");
                None
            }
            None => {
                errors.push("ts_device", "is required");
                None
            }
        };

        let route_id = optional_text(&mut errors, "route_id", self.route_id);
        let route_name = optional_text(&mut errors, "route_name", self.route_name);
        let direction = optional_text(&mut errors, "direction", self.direction);
        let platform = optional_text(&mut errors, "platform", self.platform);
        let estimasi = optional_text(&mut errors, "estimasi", self.estimasi);

        errors.finish(|| ValidReading {
            bus_id,
            device_id,
            occupancy,
            capacity,
            reported_at: reported_at.unwrap_or_else(OffsetDateTime::now_utc),
            route_id: route_id.unwrap_or_else(|| UNKNOWN.to_string()),
            route_name: route_name.unwrap_or_else(|| UNKNOWN.to_string()),
            direction: direction.unwrap_or_else(|| UNKNOWN.to_string()),
            platform: platform.unwrap_or_else(|| UNKNOWN.to_string()),
            estimasi: estimasi.unwrap_or_else(|| UNKNOWN_ETA.to_string()),
        })
    }
}

/// A manual override that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidOverride {
    pub bus_id: String,
    pub occupancy: u32,
    pub submitted_by: String,
    pub reason: Option<String>,
}

/// Loose view of an override body, same field names as `ManualOverride`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualOverrideIn {
    bus_id: Option<Value>,
    #[serde(alias = "count")]
    occupancy_count: Option<Value>,
    #[serde(alias = "userId")]
    submitted_by: Option<Value>,
    reason: Option<Value>,
}

impl ManualOverride {
    /// Decodes a request body, reporting every missing or mistyped field.
    pub fn from_json(body: Value) -> Result<Self, KernelError> {
        let raw: ManualOverrideIn = serde_json::from_value(body).map_err(invalid_body)?;
        let mut errors = ValidationErrors::new();
        let bus_id = required_string(&mut errors, "busId", raw.bus_id.as_ref());
        let submitted_by = required_string(&mut errors, "submittedBy", raw.submitted_by.as_ref());
        let occupancy_count = match raw.occupancy_count.as_ref().map(integer) {
            Some(Some(n)) => n,
            Some(None) => {
                errors.push("occupancyCount", "must be an integer");
                0
            }
            None => {
                errors.push("occupancyCount", "is required");
                0
            }
        };
        let reason = optional_text(&mut errors, "reason", raw.reason);
        errors.finish(|| ManualOverride {
            bus_id,
            occupancy_count,
            submitted_by,
            reason,
        })
    }

    pub fn validate(self) -> Result<ValidOverride, KernelError> {
        let mut errors = ValidationErrors::new();
        if self.bus_id.trim().is_empty() {
            errors.push("busId", "must not be empty");
        }
        if self.submitted_by.trim().is_empty() {
            errors.push("submittedBy", "must not be empty");
        }
        let occupancy = match u32::try_from(self.occupancy_count) {
            Ok(n) => n,
            Err(_) => {
                errors.push("occupancyCount", "must be a non-negative integer");
                0
            }
        };
        errors.finish(|| ValidOverride {
            bus_id: self.bus_id.trim().to_string(),
            occupancy,
            submitted_by: self.submitted_by,
            reason: non_blank(self.reason),
        })
    }
}

fn required_string(errors: &mut ValidationErrors, field: &str, value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) => {
            errors.push(field, "must not be empty");
            String::new()
        }
        Some(_) => {
            errors.push(field, "must be a string");
            String::new()
        }
        None => {
            errors.push(field, "is required");
            String::new()
        }
    }
}

/// Integers in u32 range, given as a JSON number or a string of digits.
fn non_negative_int(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Free-text metadata. Numbers are taken as their decimal text, blanks as absent.
fn optional_text(errors: &mut ValidationErrors, field: &str, value: Option<Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => non_blank(Some(s)),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(_) => {
            errors.push(field, "must be a string");
            None
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// ISO-8601 with or without offset. A missing offset means UTC, a bare date
/// means UTC midnight.
fn parse_device_time(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    OffsetDateTime::parse(s, &Iso8601::DEFAULT)
        .ok()
        .or_else(|| {
            PrimitiveDateTime::parse(s, &Iso8601::DEFAULT)
                .ok()
                .map(PrimitiveDateTime::assume_utc)
        })
        .or_else(|| {
            Date::parse(s, &Iso8601::DEFAULT)
                .ok()
                .map(|d| d.midnight().assume_utc())
        })
}

fn invalid_body(e: serde_json::Error) -> KernelError {
    let mut errors = ValidationErrors::new();
    errors.push("body", format!("must be a JSON object ({e})"));
    KernelError::Validation(errors)
}
