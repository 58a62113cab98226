//! Core telemetry types for flightstream.
//!
//! Inbound stream payloads are JSON objects that may carry a `flight_info`
//! block (flight metadata) and a `sensor_data` block (one telemetry sample).
//! Both are kept as opaque JSON; only the fields the core recognizes are
//! exposed through accessors.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

use crate::error::{Error, Result};

/// Field carrying the aircraft model in flight metadata.
pub const MODEL_FIELD: &str = "model";

/// Field carrying the flight date in flight metadata.
pub const DATE_FIELD: &str = "date";

/// Field carrying the optional flight segment in flight metadata.
pub const SEGMENT_FIELD: &str = "segment";

/// Field of a sample used to derive the human-facing status.
pub const OPERATION_CLASS_FIELD: &str = "operation_class";

/// One timestamped sensor reading.
///
/// The payload is kept verbatim so it can be persisted and replayed without
/// loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetrySample(Value);

impl TelemetrySample {
    /// Wrap a decoded JSON payload.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self(payload)
    }

    /// The raw payload.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.0
    }

    /// Consume the sample, returning the raw payload.
    #[must_use]
    pub fn into_payload(self) -> Value {
        self.0
    }

    /// The sample's operation class, rendered as text.
    #[must_use]
    pub fn operation_class(&self) -> Option<String> {
        match self.0.get(OPERATION_CLASS_FIELD)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Descriptive record identifying a flight.
///
/// Equality is structural: mapping fields compare regardless of key order,
/// sequence fields compare element by element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightMetadata(Map<String, Value>);

impl FlightMetadata {
    /// Wrap a JSON object.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build metadata from a JSON value, returning `None` unless it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// All metadata fields.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// A raw field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The aircraft model, if present and usable as an identity component.
    #[must_use]
    pub fn model(&self) -> Option<String> {
        self.identity_field(MODEL_FIELD)
    }

    /// The flight date, if present and usable as an identity component.
    #[must_use]
    pub fn date(&self) -> Option<String> {
        self.identity_field(DATE_FIELD)
    }

    /// The flight segment, if present and usable as an identity component.
    #[must_use]
    pub fn segment(&self) -> Option<String> {
        self.identity_field(SEGMENT_FIELD)
    }

    /// Render a field as an identity component.
    ///
    /// Empty strings, zero, `false`, `null`, and nested objects or arrays do
    /// not identify anything and yield `None`.
    #[must_use]
    pub fn identity_field(&self, name: &str) -> Option<String> {
        match self.0.get(name)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => identity_number(n),
            Value::Bool(true) => Some("true".to_string()),
            _ => None,
        }
    }

    /// Serialize back into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl PartialEq for FlightMetadata {
    fn eq(&self, other: &Self) -> bool {
        crate::store::conflict::equivalent(self, other)
    }
}

impl From<Map<String, Value>> for FlightMetadata {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Render a non-zero number the way it compares: `1.0` and `1` both give `"1"`.
fn identity_number(n: &Number) -> Option<String> {
    if n.is_f64() {
        let f = n.as_f64()?;
        return (f != 0.0).then(|| f.to_string());
    }
    match (n.as_i64(), n.as_u64()) {
        (Some(0), _) | (_, Some(0)) => None,
        _ => Some(n.to_string()),
    }
}

/// A decoded inbound stream payload.
///
/// Framing fields other than `flight_info` and `sensor_data` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InboundMessage {
    /// Flight metadata carried by this payload.
    #[serde(default)]
    pub flight_info: Option<FlightMetadata>,
    /// Telemetry sample carried by this payload.
    #[serde(default)]
    pub sensor_data: Option<TelemetrySample>,
}

impl InboundMessage {
    /// Decode a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the payload is not a JSON object of the
    /// expected shape.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(Error::Decode)
    }
}

/// Out-of-band directive telling the peer whether to keep streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlDirective {
    /// Ask the peer to stop sending telemetry.
    Pause,
    /// Ask the peer to resume sending telemetry.
    Resume,
}

impl ControlDirective {
    /// The directive matching a listening flag.
    #[must_use]
    pub fn for_listening(listening: bool) -> Self {
        if listening {
            Self::Resume
        } else {
            Self::Pause
        }
    }

    /// Wire representation: `{"control": "pause" | "resume"}`.
    #[must_use]
    pub fn to_frame(self) -> String {
        json!({ "control": self }).to_string()
    }
}

impl std::fmt::Display for ControlDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
        }
    }
}
