use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LokiError, Result};

/// 工具调用参数。入口处一次性从松散的 JSON 映射转换为强类型字段。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    pub query: Option<String>,
    pub label: Option<String>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub org: Option<String>,
    pub format: Option<String>,
    pub limit: Option<f64>,
}

impl ToolArgs {
    /// Accepts a JSON object (or `null` for "no arguments"). Empty strings are
    /// dropped; a value of the wrong JSON type is rejected.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Self::from_map(map),
            _ => Err(LokiError::InvalidArgument {
                name: "arguments".to_string(),
                expected: "object",
            }),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            query: string_arg(map, "query")?,
            label: string_arg(map, "label")?,
            url: string_arg(map, "url")?,
            username: string_arg(map, "username")?,
            password: string_arg(map, "password")?,
            token: string_arg(map, "token")?,
            start: string_arg(map, "start")?,
            end: string_arg(map, "end")?,
            org: string_arg(map, "org")?,
            format: string_arg(map, "format")?,
            limit: number_arg(map, "limit")?,
        })
    }
}

fn string_arg(map: &Map<String, Value>, name: &str) -> Result<Option<String>> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(LokiError::InvalidArgument {
            name: name.to_string(),
            expected: "string",
        }),
    }
}

fn number_arg(map: &Map<String, Value>, name: &str) -> Result<Option<f64>> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or(LokiError::InvalidArgument {
            name: name.to_string(),
            expected: "number",
        }),
        Some(_) => Err(LokiError::InvalidArgument {
            name: name.to_string(),
            expected: "number",
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Raw,
    Json,
    Text,
}

impl FromStr for OutputFormat {
    type Err = LokiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(Self::Raw),
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(LokiError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Raw => "raw",
            Self::Json => "json",
            Self::Text => "text",
        })
    }
}

/// Authentication for one backend request. A bearer token always wins over
/// basic credentials.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

impl Credentials {
    pub fn select(token: Option<String>, username: Option<String>, password: Option<String>) -> Self {
        if let Some(token) = token {
            return Self::Bearer(token);
        }
        if username.is_some() || password.is_some() {
            return Self::Basic {
                username: username.unwrap_or_default(),
                password: password.unwrap_or_default(),
            };
        }
        Self::None
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bearer(_) => "bearer",
            Self::Basic { .. } => "basic",
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(_) => f.write_str("Bearer(***)"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Fields shared by all three tools.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonParams {
    pub base_url: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub org_id: Option<String>,
    pub credentials: Credentials,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query: String,
    pub limit: i64,
    pub common: CommonParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelNamesRequest {
    pub common: CommonParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelValuesRequest {
    pub label: String,
    pub common: CommonParams,
}

/// Loki 返回的 JSON 外层结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendEnvelope {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
}

impl BackendEnvelope {
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }

    pub fn payload_len(&self) -> usize {
        match &self.data {
            Some(Payload::Series(series)) => series.result.len(),
            Some(Payload::List(items)) => items.len(),
            None => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Series(SeriesData),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesData {
    #[serde(rename = "resultType", default)]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<SeriesEntry>,
    /// Fields such as `stats`, kept so JSON output mirrors the backend.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One stream (log query) or one series (metric query).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeriesEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<BTreeMap<String, String>>,
    /// Pairs of `[timestamp, value]`; either element may be a string or a number.
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

impl SeriesEntry {
    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.stream
            .as_ref()
            .filter(|m| !m.is_empty())
            .or(self.metric.as_ref())
            .filter(|m| !m.is_empty())
    }
}
