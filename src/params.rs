use chrono::{DateTime, Duration, Utc};

use crate::config::LokiDefaults;
use crate::error::{LokiError, Result};
use crate::model::{
    CommonParams, Credentials, LabelNamesRequest, LabelValuesRequest, OutputFormat, QueryRequest,
    ToolArgs,
};
use crate::timeparse::parse_time_at;

pub const DEFAULT_LIMIT: i64 = 100;
pub const DEFAULT_LOOKBACK_HOURS: i64 = 1;

/// Merges tool arguments with the injected environment defaults and the static
/// fallbacks, producing fully resolved requests.
#[derive(Debug, Clone, Default)]
pub struct ParameterResolver {
    defaults: LokiDefaults,
}

impl ParameterResolver {
    pub fn new(defaults: LokiDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &LokiDefaults {
        &self.defaults
    }

    pub fn resolve_query(&self, args: &ToolArgs) -> Result<QueryRequest> {
        self.resolve_query_at(args, Utc::now())
    }

    pub fn resolve_query_at(&self, args: &ToolArgs, now: DateTime<Utc>) -> Result<QueryRequest> {
        let query = args
            .query
            .clone()
            .ok_or(LokiError::MissingRequiredParameter("query"))?;
        // f64 -> i64 的 as 转换向零截断
        let limit = args.limit.map(|l| l as i64).unwrap_or(DEFAULT_LIMIT);
        Ok(QueryRequest {
            query,
            limit,
            common: self.resolve_common(args, now)?,
        })
    }

    pub fn resolve_label_names(&self, args: &ToolArgs) -> Result<LabelNamesRequest> {
        self.resolve_label_names_at(args, Utc::now())
    }

    pub fn resolve_label_names_at(
        &self,
        args: &ToolArgs,
        now: DateTime<Utc>,
    ) -> Result<LabelNamesRequest> {
        Ok(LabelNamesRequest {
            common: self.resolve_common(args, now)?,
        })
    }

    pub fn resolve_label_values(&self, args: &ToolArgs) -> Result<LabelValuesRequest> {
        self.resolve_label_values_at(args, Utc::now())
    }

    pub fn resolve_label_values_at(
        &self,
        args: &ToolArgs,
        now: DateTime<Utc>,
    ) -> Result<LabelValuesRequest> {
        let label = args
            .label
            .clone()
            .ok_or(LokiError::MissingRequiredParameter("label"))?;
        Ok(LabelValuesRequest {
            label,
            common: self.resolve_common(args, now)?,
        })
    }

    fn resolve_common(&self, args: &ToolArgs, now: DateTime<Utc>) -> Result<CommonParams> {
        let format = match args.format.as_deref() {
            Some(f) => f.parse::<OutputFormat>()?,
            None => OutputFormat::default(),
        };

        let start = match args.start.as_deref() {
            Some(s) => parse_time_at(s, now)?,
            None => now - Duration::hours(DEFAULT_LOOKBACK_HOURS),
        };
        let end = match args.end.as_deref() {
            Some(s) => parse_time_at(s, now)?,
            None => now,
        };

        let d = &self.defaults;
        let base_url = args
            .url
            .clone()
            .unwrap_or_else(|| d.effective_url().to_string());
        let credentials = Credentials::select(
            args.token.clone().or_else(|| d.token.clone()),
            args.username.clone().or_else(|| d.username.clone()),
            args.password.clone().or_else(|| d.password.clone()),
        );

        Ok(CommonParams {
            base_url,
            start,
            end,
            org_id: args.org.clone().or_else(|| d.org_id.clone()),
            credentials,
            format,
        })
    }
}
