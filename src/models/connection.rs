//! Connection records
//!
//! A connection is a captured request paired with its (optional) response,
//! as reported by the intercepting proxy engine.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// A single applied rule reported alongside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEffect {
    /// Rule name as configured in its rule group
    pub name: String,
    /// Free-form details (e.g. redirect target, delay). `null` reads as empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub info: HashMap<String, String>,
}

/// Applied rules keyed by rule-group name
pub type RuleEffects = HashMap<String, Vec<RuleEffect>>;

/// Request half of a connection. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: String,
    /// Milliseconds since epoch
    pub time: i64,
    pub method: String,
    pub uri: String,
    #[serde(default, deserialize_with = "header_map")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// HTTP version (e.g., "HTTP/1.1")
    pub version: String,
}

impl RequestRecord {
    /// Create a bodiless request stamped with the current time
    pub fn new(id: impl Into<String>, method: &str, uri: &str) -> Self {
        Self {
            id: id.into(),
            time: Utc::now().timestamp_millis(),
            method: method.to_uppercase(),
            uri: uri.to_string(),
            headers: HashMap::new(),
            body: String::new(),
            version: "HTTP/1.1".to_string(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// Response half of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    /// Id of the request this response completes
    pub id: String,
    /// Milliseconds since epoch
    pub time: i64,
    /// Address actually fetched; differs from the request uri after a redirect rule
    pub uri: String,
    pub status: u16,
    pub version: String,
    #[serde(default, deserialize_with = "header_map")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// Rules that fired while producing this response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<RuleEffects>,
}

impl ResponseRecord {
    pub fn new(id: impl Into<String>, uri: &str, status: u16) -> Self {
        Self {
            id: id.into(),
            time: Utc::now().timestamp_millis(),
            uri: uri.to_string(),
            status,
            version: "HTTP/1.1".to_string(),
            headers: HashMap::new(),
            body: String::new(),
            effects: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_effect(mut self, group: &str, effect: RuleEffect) -> Self {
        self.effects
            .get_or_insert_with(HashMap::new)
            .entry(group.to_string())
            .or_default()
            .push(effect);
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// Lower-cased `content-type` header, if any
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type").map(|v| v.to_ascii_lowercase())
    }

    /// Names of every rule that fired, grouped order not guaranteed
    pub fn hit_rule_names(&self) -> Vec<&str> {
        self.effects
            .iter()
            .flat_map(|groups| groups.values())
            .flat_map(|effects| effects.iter().map(|e| e.name.as_str()))
            .collect()
    }
}

/// A request paired with its response once one arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub id: String,
    pub request: RequestRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseRecord>,
}

impl ConnectionRecord {
    pub fn new(request: RequestRecord) -> Self {
        Self {
            id: request.id.clone(),
            request,
            response: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.response.is_some()
    }

    /// The address that was actually fetched
    pub fn effective_uri(&self) -> &str {
        self.response
            .as_ref()
            .map(|res| res.uri.as_str())
            .unwrap_or(self.request.uri.as_str())
    }

    pub fn was_redirected(&self) -> bool {
        self.response
            .as_ref()
            .is_some_and(|res| res.uri != self.request.uri)
    }

    /// Round-trip duration in ms once the response is attached
    pub fn duration_ms(&self) -> Option<i64> {
        self.response
            .as_ref()
            .map(|res| (res.time - self.request.time).max(0))
    }
}

/// Events pushed by the proxy engine.
///
/// Serialized externally tagged, so the payload is either
/// `{"NewRequest": {...}}` or `{"NewResponse": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    NewRequest(RequestRecord),
    NewResponse(ResponseRecord),
}

impl ConnectionEvent {
    pub fn id(&self) -> &str {
        match self {
            ConnectionEvent::NewRequest(req) => &req.id,
            ConnectionEvent::NewResponse(res) => &res.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionEvent::NewRequest(_) => "NewRequest",
            ConnectionEvent::NewResponse(_) => "NewResponse",
        }
    }

    /// Decode one JSON payload from the push channel
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

impl From<RequestRecord> for ConnectionEvent {
    fn from(value: RequestRecord) -> Self {
        Self::NewRequest(value)
    }
}

impl From<ResponseRecord> for ConnectionEvent {
    fn from(value: ResponseRecord) -> Self {
        Self::NewResponse(value)
    }
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderValue {
    One(String),
    Many(Vec<String>),
}

/// Header maps as the engine sends them: a repeated header arrives as an
/// array and is folded into one comma-separated value.
fn header_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<HashMap<String, HeaderValue>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                HeaderValue::One(v) => v,
                HeaderValue::Many(vs) => vs.join(", "),
            };
            (name, value)
        })
        .collect())
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}
