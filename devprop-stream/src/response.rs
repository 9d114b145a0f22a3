//! Response payloads delivered by providers and broadcast through streams.
//!
//! A response always carries exactly one of a successful outcome or a
//! [`PropertyAccessError`]. The pairing is expressed as a `Result`, so a
//! response with both or with neither can not be constructed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::query::{PropertyAccessQuery, Selector};

/// Schema-less field bag of an acquired value.
pub type FieldMap = Map<String, Value>;

/// Convert a nanosecond Unix timestamp into a UTC date-time.
///
/// The result is rounded to the nearest microsecond.
pub fn datetime_from_ns(ns: i64) -> Option<DateTime<Utc>> {
    let round_up = i64::from(ns.rem_euclid(1_000) >= 500);
    let micros = ns.div_euclid(1_000) + round_up;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()
}

// ============================================================================
// Headers
// ============================================================================

/// Acquisition metadata attached to a value.
///
/// Timestamps are nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub acquisition_timestamp: Option<i64>,
    pub set_timestamp: Option<i64>,
    pub cycle_timestamp: Option<i64>,
    pub selector: Option<Selector>,
}

impl Header {
    pub fn acquisition_time(&self) -> Option<DateTime<Utc>> {
        self.acquisition_timestamp.and_then(datetime_from_ns)
    }

    pub fn set_time(&self) -> Option<DateTime<Utc>> {
        self.set_timestamp.and_then(datetime_from_ns)
    }

    pub fn cycle_time(&self) -> Option<DateTime<Utc>> {
        self.cycle_timestamp.and_then(datetime_from_ns)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(selector) = &self.selector {
            parts.push(format!("selector={}", selector));
        }
        if let Some(time) = self.acquisition_time() {
            parts.push(format!("acquisition_time={}", format_time(time)));
        }
        if let Some(time) = self.set_time() {
            parts.push(format!("set_time={}", format_time(time)));
        }
        if let Some(time) = self.cycle_time() {
            parts.push(format!("cycle_time={}", format_time(time)));
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Metadata of a completed set request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateHeader {
    pub selector: Selector,
}

impl UpdateHeader {
    pub fn new(selector: impl Into<Selector>) -> Self {
        Self {
            selector: selector.into(),
        }
    }
}

impl fmt::Display for UpdateHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[selector={}]", self.selector)
    }
}

// ============================================================================
// Values and errors
// ============================================================================

/// A successfully acquired property value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquiredPropertyData {
    pub header: Header,
    pub fields: FieldMap,
}

impl AcquiredPropertyData {
    pub fn new(header: Header, fields: FieldMap) -> Self {
        Self { header, fields }
    }

    /// Build a value from a JSON object, ignoring anything that is not one.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self {
                header: Header::default(),
                fields,
            },
            _ => Self::default(),
        }
    }

    /// Look up a single field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl From<FieldMap> for AcquiredPropertyData {
    fn from(fields: FieldMap) -> Self {
        Self {
            header: Header::default(),
            fields,
        }
    }
}

impl fmt::Display for AcquiredPropertyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = serde_json::to_string(&self.fields).map_err(|_| fmt::Error)?;
        f.write_str(&fields)
    }
}

/// Failure to acquire or set a property, carried as data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PropertyAccessError {
    pub message: String,
    pub header: Option<Header>,
}

impl PropertyAccessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            header: None,
        }
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = Some(header);
        self
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Result of a get request, and the update payload broadcast by streams.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyAccessResponse {
    query: PropertyAccessQuery,
    outcome: Result<AcquiredPropertyData, PropertyAccessError>,
}

impl PropertyAccessResponse {
    pub fn success(query: PropertyAccessQuery, value: AcquiredPropertyData) -> Self {
        Self {
            query,
            outcome: Ok(value),
        }
    }

    pub fn failure(query: PropertyAccessQuery, error: PropertyAccessError) -> Self {
        Self {
            query,
            outcome: Err(error),
        }
    }

    pub fn query(&self) -> &PropertyAccessQuery {
        &self.query
    }

    /// The acquired value, or the carried access error.
    pub fn value(&self) -> Result<&AcquiredPropertyData, &PropertyAccessError> {
        self.outcome.as_ref()
    }

    /// The carried access error, if any. Never fails.
    pub fn error(&self) -> Option<&PropertyAccessError> {
        self.outcome.as_ref().err()
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_result(self) -> Result<AcquiredPropertyData, PropertyAccessError> {
        self.outcome
    }
}

impl fmt::Display for PropertyAccessResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-- PropertyAccessResponse from {} --\n\n", self.query)?;
        match &self.outcome {
            Ok(value) => write!(f, "{}", value),
            Err(error) => write!(f, "Exception occurred: {}", error),
        }
    }
}

/// Result of a set request.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyUpdateResponse {
    query: PropertyAccessQuery,
    outcome: Result<UpdateHeader, PropertyAccessError>,
}

impl PropertyUpdateResponse {
    pub fn success(query: PropertyAccessQuery, header: UpdateHeader) -> Self {
        Self {
            query,
            outcome: Ok(header),
        }
    }

    pub fn failure(query: PropertyAccessQuery, error: PropertyAccessError) -> Self {
        Self {
            query,
            outcome: Err(error),
        }
    }

    pub fn query(&self) -> &PropertyAccessQuery {
        &self.query
    }

    /// The update header, or the carried access error.
    pub fn header(&self) -> Result<&UpdateHeader, &PropertyAccessError> {
        self.outcome.as_ref()
    }

    pub fn error(&self) -> Option<&PropertyAccessError> {
        self.outcome.as_ref().err()
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_result(self) -> Result<UpdateHeader, PropertyAccessError> {
        self.outcome
    }
}

impl fmt::Display for PropertyUpdateResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-- PropertyUpdateResponse from {} --\n\n", self.query)?;
        match &self.outcome {
            Ok(header) => write!(f, "{}", header),
            Err(error) => write!(f, "Exception occurred: {}", error),
        }
    }
}
