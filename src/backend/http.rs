//! HTTP load generator.
//!
//! Issues plain `GET /` requests against the load balancer and keeps a
//! histogram of the status codes it sees. Transport failures and `5xx`
//! responses count as errors; everything else is a success.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{task_rng, BackendKind, BackendResult, InertReason, LoadGenerator, Pacing};
use crate::error::OperationError;
use crate::registry::{EndpointRegistry, KEY_HTTP_HOST};

/// Issues one GET and returns the response status.
#[async_trait]
pub trait HttpGetter: Send + Sync {
    async fn get(&self, url: &str) -> Result<u16, OperationError>;
}

/// Target URL for a manifest host name.
///
/// Bare hosts get `http://` and a trailing `/`; hosts that already carry a
/// scheme are used as given.
pub fn target_url(host: &str) -> String {
    let host = host.trim();
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}/", host.trim_end_matches('/'))
    }
}

/// Drives the HTTP backend.
pub struct HttpLoadGenerator {
    getter: Option<Box<dyn HttpGetter>>,
    url: Option<String>,
    inert: Option<InertReason>,
    pacing: Pacing,
}

impl HttpLoadGenerator {
    /// Build from the registry's `NlbDnsName`.
    ///
    /// `make_getter` runs only when a target exists; if it fails the
    /// generator is inert.
    pub fn new<F>(registry: &EndpointRegistry, capable: bool, make_getter: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn HttpGetter>, String>,
    {
        if !capable {
            return Self::inert(InertReason::CapabilityUnavailable(BackendKind::Http));
        }
        let Some(host) = registry.http_host() else {
            return Self::inert(InertReason::MissingEndpoint { key: KEY_HTTP_HOST });
        };
        match make_getter() {
            Ok(getter) => Self::with_getter(getter, target_url(host)),
            Err(reason) => Self::inert(InertReason::ClientBuild(reason)),
        }
    }

    pub fn with_getter(getter: Box<dyn HttpGetter>, url: String) -> Self {
        info!(backend = %BackendKind::Http, url = %url, "HTTP target");
        Self {
            getter: Some(getter),
            url: Some(url),
            inert: None,
            pacing: Pacing::default(),
        }
    }

    pub fn inert(reason: InertReason) -> Self {
        warn!(backend = %BackendKind::Http, reason = %reason, "Backend inert");
        Self {
            getter: None,
            url: None,
            inert: Some(reason),
            pacing: Pacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

#[async_trait]
impl LoadGenerator for HttpLoadGenerator {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    fn inert_reason(&self) -> Option<&InertReason> {
        self.inert.as_ref()
    }

    async fn run(&mut self, budget: u64, cancel: CancellationToken) -> BackendResult {
        let (Some(getter), Some(url)) = (self.getter.as_deref(), self.url.as_deref()) else {
            return match &self.inert {
                Some(reason) => BackendResult::inert(BackendKind::Http, reason),
                None => BackendResult::new(BackendKind::Http),
            };
        };
        let mut result = BackendResult::new(BackendKind::Http);
        let mut rng = task_rng();

        for _ in 0..budget {
            if cancel.is_cancelled() {
                break;
            }
            match getter.get(url).await {
                Ok(status) => {
                    result.record_status(status);
                    if status >= 500 {
                        let err = OperationError::Http { status };
                        debug!(backend = %BackendKind::Http, status, "Server error");
                        result.record_error(&err);
                    } else {
                        result.record_success();
                    }
                }
                Err(err) => {
                    debug!(backend = %BackendKind::Http, error = %err, "Request failed");
                    result.record_error(&err);
                }
            }
            if !self.pacing.pause(&mut rng, &cancel).await {
                break;
            }
        }
        result
    }
}

#[cfg(feature = "http")]
pub use live::ReqwestGetter;

#[cfg(feature = "http")]
mod live {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::HttpGetter;
    use crate::error::OperationError;

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// [`HttpGetter`] over a shared `reqwest::Client`.
    pub struct ReqwestGetter {
        client: reqwest::Client,
    }

    impl ReqwestGetter {
        pub fn new() -> Result<Self, reqwest::Error> {
            let client = reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .user_agent(concat!("stack-loadtest/", env!("CARGO_PKG_VERSION")))
                .build()?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl HttpGetter for ReqwestGetter {
        async fn get(&self, url: &str) -> Result<u16, OperationError> {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| OperationError::classify_reqwest(&e))?;
            Ok(response.status().as_u16())
        }
    }
}
