use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::BackendClient;
use crate::config::{
    LokiDefaults, ENV_LOKI_ORG_ID, ENV_LOKI_PASSWORD, ENV_LOKI_TOKEN, ENV_LOKI_URL,
    ENV_LOKI_USERNAME,
};
use crate::endpoint;
use crate::error::{LokiError, Result};
use crate::format::{self, Subject};
use crate::model::ToolArgs;
use crate::params::ParameterResolver;

pub const TOOL_QUERY: &str = "loki_query";
pub const TOOL_LABEL_NAMES: &str = "loki_label_names";
pub const TOOL_LABEL_VALUES: &str = "loki_label_values";

/// 三个 Loki 工具的注册表：参数解析 → URL 构造 → 请求 → 格式化。
#[derive(Debug, Clone)]
pub struct LokiTools {
    resolver: ParameterResolver,
    client: BackendClient,
}

impl LokiTools {
    pub fn new(defaults: LokiDefaults) -> Result<Self> {
        Ok(Self::with_client(
            ParameterResolver::new(defaults),
            BackendClient::new()?,
        ))
    }

    pub fn with_client(resolver: ParameterResolver, client: BackendClient) -> Self {
        Self { resolver, client }
    }

    /// Dispatch a tool call by name. `arguments` is the raw JSON argument map.
    pub async fn call(
        &self,
        name: &str,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let args = ToolArgs::from_value(arguments)?;
        info!(tool = name, format = args.format.as_deref().unwrap_or("raw"), "tool call");
        let result = match name {
            TOOL_QUERY => self.query(&args, cancel).await,
            TOOL_LABEL_NAMES => self.label_names(&args, cancel).await,
            TOOL_LABEL_VALUES => self.label_values(&args, cancel).await,
            other => Err(LokiError::UnknownTool(other.to_string())),
        };
        if let Err(e) = &result {
            warn!(tool = name, error = %e, "tool call failed");
        }
        result
    }

    pub async fn query(&self, args: &ToolArgs, cancel: &CancellationToken) -> Result<String> {
        let req = self.resolver.resolve_query(args)?;
        let url = endpoint::query_range_url(&req)?;
        let envelope = self
            .client
            .fetch(url, &req.common.credentials, req.common.org_id.as_deref(), cancel)
            .await?;
        format::render(&envelope, Subject::Logs, req.common.format)
    }

    pub async fn label_names(&self, args: &ToolArgs, cancel: &CancellationToken) -> Result<String> {
        let req = self.resolver.resolve_label_names(args)?;
        let url = endpoint::labels_url(&req)?;
        let envelope = self
            .client
            .fetch(url, &req.common.credentials, req.common.org_id.as_deref(), cancel)
            .await?;
        format::render(&envelope, Subject::LabelNames, req.common.format)
    }

    pub async fn label_values(&self, args: &ToolArgs, cancel: &CancellationToken) -> Result<String> {
        let req = self.resolver.resolve_label_values(args)?;
        let url = endpoint::label_values_url(&req)?;
        let envelope = self
            .client
            .fetch(url, &req.common.credentials, req.common.org_id.as_deref(), cancel)
            .await?;
        format::render(&envelope, Subject::LabelValues(&req.label), req.common.format)
    }

    /// Tool descriptors for `tools/list`, mentioning the active environment defaults.
    pub fn definitions(&self) -> Vec<Value> {
        let d = self.resolver.defaults();
        let mut common = serde_json::Map::new();
        common.insert(
            "url".into(),
            string_prop(format!(
                "Loki server URL (default: {} from {ENV_LOKI_URL} env var)",
                d.effective_url()
            )),
        );
        common.insert(
            "username".into(),
            string_prop(format!(
                "Username for basic authentication (default: {} from {ENV_LOKI_USERNAME} env var)",
                d.username.as_deref().unwrap_or("unset")
            )),
        );
        common.insert(
            "password".into(),
            string_prop(format!(
                "Password for basic authentication (default: {} from {ENV_LOKI_PASSWORD} env var)",
                secret_state(&d.password)
            )),
        );
        common.insert(
            "token".into(),
            string_prop(format!(
                "Bearer token for authentication (default: {} from {ENV_LOKI_TOKEN} env var)",
                secret_state(&d.token)
            )),
        );
        common.insert(
            "start".into(),
            string_prop("Start time for the query (default: 1h ago)".to_string()),
        );
        common.insert(
            "end".into(),
            string_prop("End time for the query (default: now)".to_string()),
        );
        common.insert(
            "org".into(),
            string_prop(format!(
                "Organization ID for the query (default: {} from {ENV_LOKI_ORG_ID} env var)",
                d.org_id.as_deref().unwrap_or("unset")
            )),
        );
        common.insert(
            "format".into(),
            string_prop("Output format: raw, json, or text (default: raw)".to_string()),
        );

        let mut query_props = common.clone();
        query_props.insert("query".into(), string_prop("LogQL query string".to_string()));
        query_props.insert(
            "limit".into(),
            json!({
                "type": "number",
                "description": "Maximum number of entries to return (default: 100)"
            }),
        );

        let mut value_props = common.clone();
        value_props.insert(
            "label".into(),
            string_prop("Label name to get values for".to_string()),
        );

        vec![
            tool(
                TOOL_QUERY,
                "Run a query against Grafana Loki",
                query_props,
                &["query"],
            ),
            tool(
                TOOL_LABEL_NAMES,
                "Get all label names from Grafana Loki",
                common,
                &[],
            ),
            tool(
                TOOL_LABEL_VALUES,
                "Get all values for a specific label from Grafana Loki",
                value_props,
                &["label"],
            ),
        ]
    }
}

fn string_prop(description: String) -> Value {
    json!({ "type": "string", "description": description })
}

fn secret_state(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "set"
    } else {
        "unset"
    }
}

fn tool(
    name: &str,
    description: &str,
    properties: serde_json::Map<String, Value>,
    required: &[&str],
) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}
