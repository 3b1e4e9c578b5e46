use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{LokiError, Result};
use crate::model::{BackendEnvelope, Credentials};

/// Upper bound for one backend round trip, body included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tenant header understood by Loki; independent of the auth scheme.
pub const ORG_ID_HEADER: &str = "X-Scope-OrgID";

/// HTTP client for the Loki API. Cheap to clone; connections are pooled by reqwest.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl BackendClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LokiError::Transport(format!("build http client: {e}")))?;
        Ok(Self { http, timeout })
    }

    /// GET `url` and decode the Loki envelope.
    ///
    /// Fails on non-2xx status, malformed JSON, an envelope whose status is
    /// `"error"`, timeout, or cancellation through `cancel`. Never retries.
    pub async fn fetch(
        &self,
        url: Url,
        credentials: &Credentials,
        org_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<BackendEnvelope> {
        let mut request = self.http.get(url.clone());
        match credentials {
            Credentials::Bearer(token) => request = request.bearer_auth(token),
            Credentials::Basic { username, password } => {
                request = request.basic_auth(username, Some(password))
            }
            Credentials::None => {}
        }
        if let Some(org) = org_id {
            request = request.header(ORG_ID_HEADER, org);
        }

        debug!(path = %url.path(), auth = credentials.kind(), org = ?org_id, "sending loki request");

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        // 取消时 exchange 被 drop，连接与响应体随之释放
        let (status, body) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(path = %url.path(), "loki request cancelled");
                return Err(LokiError::Cancelled);
            }
            result = exchange => result.map_err(|e| self.transport_error(e))?,
        };

        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).into_owned();
            warn!(status = status.as_u16(), "loki returned HTTP error");
            return Err(LokiError::BackendHttpError {
                status: status.as_u16(),
                body,
            });
        }

        decode_envelope(&body)
    }

    fn transport_error(&self, e: reqwest::Error) -> LokiError {
        if e.is_timeout() {
            warn!(timeout = ?self.timeout, "loki request timed out");
            LokiError::Timeout(self.timeout)
        } else {
            warn!(error = %e, "loki request failed");
            LokiError::Transport(e.without_url().to_string())
        }
    }
}

/// Decode a response body, turning a `status: "error"` envelope into an error.
pub fn decode_envelope(body: &[u8]) -> Result<BackendEnvelope> {
    let envelope: BackendEnvelope =
        serde_json::from_slice(body).map_err(|e| LokiError::DecodeError(e.to_string()))?;
    if envelope.is_error() {
        return Err(LokiError::BackendReportedError {
            message: envelope.error.unwrap_or_default(),
        });
    }
    Ok(envelope)
}
