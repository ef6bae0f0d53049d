// Readiness probes: bounded HTTP checks against a service endpoint

use crate::errors::ReadinessError;
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// A check that a dependent service is accepting requests
#[async_trait]
pub trait Probe: Send + Sync {
    /// Short label used in progress output, e.g. "frontend"
    fn name(&self) -> &str;

    /// What is being probed, for diagnostics
    fn target(&self) -> &str;

    /// `true` if the service answered successfully; failures are never retried here
    async fn check(&self) -> bool;
}

/// Status codes that count as ready
pub fn is_ready_status(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::NOT_MODIFIED
}

/// GET probe that succeeds on HTTP 200 or 304
#[derive(Debug, Clone)]
pub struct HttpProbe {
    name: String,
    url: String,
    client: Client,
}

impl HttpProbe {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ReadinessError> {
        // Only a direct 200/304 counts; a redirect is reported as its own status
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| ReadinessError::ProbeClient(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> &str {
        &self.url
    }

    #[tracing::instrument(skip(self), fields(probe = %self.name, url = %self.url))]
    async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                let status = response.status();
                tracing::debug!(status = status.as_u16(), "Probe answered");
                is_ready_status(status)
            }
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    timeout = e.is_timeout(),
                    connect = e.is_connect(),
                    "Probe failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_statuses() {
        assert!(is_ready_status(StatusCode::OK));
        assert!(is_ready_status(StatusCode::NOT_MODIFIED));
        assert!(!is_ready_status(StatusCode::NO_CONTENT));
        assert!(!is_ready_status(StatusCode::NOT_FOUND));
        assert!(!is_ready_status(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_connection_refused_is_not_ready() {
        let probe = HttpProbe::new(
            "backend",
            "http://127.0.0.1:9/api/health",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(probe.name(), "backend");
        assert!(!probe.check().await);
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_not_ready() {
        let probe = HttpProbe::new(
            "frontend",
            "http://nonexistent.invalid:5173",
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!probe.check().await);
    }
}
