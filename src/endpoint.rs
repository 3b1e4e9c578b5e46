use url::Url;

use crate::error::{LokiError, Result};
use crate::model::{CommonParams, LabelNamesRequest, LabelValuesRequest, QueryRequest};

/// Path segment shared by every Loki HTTP API route.
pub const API_PREFIX: &str = "loki/api/v1";

/// Backend operation a URL is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint<'a> {
    QueryRange,
    Labels,
    LabelValues(&'a str),
}

impl Endpoint<'_> {
    fn operation(&self) -> String {
        match self {
            Self::QueryRange => "query_range".to_string(),
            Self::Labels => "labels".to_string(),
            Self::LabelValues(name) => format!("label/{}/values", urlencoding::encode(name)),
        }
    }

    /// Whether a path that already carries the API prefix also carries this operation.
    fn present_in(&self, path: &str) -> bool {
        match self {
            Self::QueryRange => path.ends_with("query_range"),
            Self::Labels => path.ends_with("labels"),
            Self::LabelValues(_) => path.contains("/label/"),
        }
    }
}

pub fn query_range_url(req: &QueryRequest) -> Result<Url> {
    let mut params = time_params(&req.common);
    params.push(("query", req.query.clone()));
    params.push(("limit", req.limit.to_string()));
    build_url(&req.common.base_url, Endpoint::QueryRange, &params)
}

pub fn labels_url(req: &LabelNamesRequest) -> Result<Url> {
    build_url(&req.common.base_url, Endpoint::Labels, &time_params(&req.common))
}

pub fn label_values_url(req: &LabelValuesRequest) -> Result<Url> {
    build_url(
        &req.common.base_url,
        Endpoint::LabelValues(&req.label),
        &time_params(&req.common),
    )
}

fn time_params(common: &CommonParams) -> Vec<(&'static str, String)> {
    vec![
        ("start", common.start.timestamp().to_string()),
        ("end", common.end.timestamp().to_string()),
    ]
}

/// 构造后端 URL：基础路径中已包含 API 前缀时只补齐缺失的操作后缀，
/// 查询参数按键覆盖（而非追加）并按键名排序。
pub fn build_url(base: &str, endpoint: Endpoint<'_>, params: &[(&str, String)]) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|e| LokiError::InvalidBaseUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(LokiError::InvalidBaseUrl {
            url: base.to_string(),
            reason: "URL cannot carry a path".to_string(),
        });
    }

    let current = url.path().trim_end_matches('/').to_string();
    let path = if !current.contains(API_PREFIX) {
        format!("{current}/{API_PREFIX}/{}", endpoint.operation())
    } else if !endpoint.present_in(&current) {
        format!("{current}/{}", endpoint.operation())
    } else {
        current
    };
    url.set_path(&path);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !params.iter().any(|(key, _)| *key == &**k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.extend(params.iter().map(|(k, v)| (k.to_string(), v.clone())));
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    url.query_pairs_mut().clear().extend_pairs(pairs);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::model::{Credentials, OutputFormat};

    fn common(base: &str) -> CommonParams {
        CommonParams {
            base_url: base.to_string(),
            start: Utc.timestamp_opt(1705312245, 0).single().unwrap(),
            end: Utc.timestamp_opt(1705315845, 0).single().unwrap(),
            org_id: None,
            credentials: Credentials::None,
            format: OutputFormat::Raw,
        }
    }

    fn query(base: &str) -> QueryRequest {
        QueryRequest {
            query: "{job=\"x\"}".to_string(),
            limit: 10,
            common: common(base),
        }
    }

    #[test]
    fn query_range_from_bare_host() {
        let url = query_range_url(&query("http://localhost:3100")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3100/loki/api/v1/query_range?end=1705315845&limit=10&query=%7Bjob%3D%22x%22%7D&start=1705312245"
        );
    }

    #[test]
    fn query_range_is_idempotent_against_full_path() {
        let bases = [
            "http://localhost:3100/loki/api/v1/query_range",
            "http://localhost:3100/loki/api/v1",
            "http://localhost:3100/loki/api/v1/",
        ];
        for base in bases {
            let url = query_range_url(&query(base)).unwrap();
            assert_eq!(url.path(), "/loki/api/v1/query_range", "base {base}");
        }
    }

    #[test]
    fn proxy_prefix_is_preserved() {
        let url = query_range_url(&query("https://grafana.example.com/api/datasources/proxy/3/")).unwrap();
        assert_eq!(
            url.path(),
            "/api/datasources/proxy/3/loki/api/v1/query_range"
        );
        let url = labels_url(&LabelNamesRequest {
            common: common("https://gw.example.com/tenant/loki/api/v1/labels"),
        })
        .unwrap();
        assert_eq!(url.path(), "/tenant/loki/api/v1/labels");
        assert_eq!(url.query(), Some("end=1705315845&start=1705312245"));
    }

    #[test]
    fn label_values_escapes_name_as_one_segment() {
        let req = LabelValuesRequest {
            label: "service/name".to_string(),
            common: common("http://localhost:3100"),
        };
        let url = label_values_url(&req).unwrap();
        assert_eq!(url.path(), "/loki/api/v1/label/service%2Fname/values");

        let req = LabelValuesRequest {
            label: "job".to_string(),
            common: common("http://localhost:3100/loki/api/v1/label/job/values"),
        };
        let url = label_values_url(&req).unwrap();
        assert_eq!(url.path(), "/loki/api/v1/label/job/values");
    }

    #[test]
    fn query_parameters_are_set_not_appended() {
        let url = query_range_url(&query("http://localhost:3100/?limit=5&direction=backward")).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.iter().filter(|(k, _)| k == "limit").count(), 1);
        assert!(pairs.contains(&("limit".to_string(), "10".to_string())));
        assert!(pairs.contains(&("direction".to_string(), "backward".to_string())));
        assert_eq!(pairs[0].0, "direction");

        let again = query_range_url(&query(url.as_str())).unwrap();
        assert_eq!(again, url);
    }

    #[test]
    fn invalid_base_url() {
        for base in ["not a url", "localhost:3100", ""] {
            assert!(
                matches!(
                    query_range_url(&query(base)),
                    Err(LokiError::InvalidBaseUrl { .. })
                ),
                "base {base:?}"
            );
        }
    }
}
