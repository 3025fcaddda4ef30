//! Termination of a service-mesh proxy sidecar sharing the pod.
//!
//! The proxy would otherwise keep the pod alive after the VM is gone.

use anyhow::Context;
use reqwest::header::SERVER;
use std::time::Duration;
use tracing::{debug, info, warn};

use pkg_constants::sidecar::{
    PROXY_HEALTH_CHECK_PORT, PROXY_HEALTH_PATH, PROXY_HOST, PROXY_QUIT_PATH,
    PROXY_REQUEST_TIMEOUT_SECS, PROXY_SERVER_HEADER, PROXY_TELEMETRY_PORT,
};

#[derive(Debug, Clone)]
pub struct SidecarProxy {
    client: reqwest::Client,
    health_url: String,
    quit_url: String,
}

impl SidecarProxy {
    /// Proxy on the pod's own network namespace at the standard ports.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_endpoints(
            format!(
                "http://{}:{}{}",
                PROXY_HOST, PROXY_HEALTH_CHECK_PORT, PROXY_HEALTH_PATH
            ),
            format!(
                "http://{}:{}{}",
                PROXY_HOST, PROXY_TELEMETRY_PORT, PROXY_QUIT_PATH
            ),
        )
    }

    pub fn with_endpoints(health_url: String, quit_url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROXY_REQUEST_TIMEOUT_SECS))
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            health_url,
            quit_url,
        })
    }

    /// A proxy is present if its readiness endpoint answers with
    /// `server: envoy`.
    pub async fn is_present(&self) -> bool {
        let resp = match self.client.get(&self.health_url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("No proxy sidecar at {}: {}", self.health_url, e);
                return false;
            }
        };
        resp.headers()
            .get(SERVER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == PROXY_SERVER_HEADER)
    }

    pub async fn terminate(&self) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(&self.quit_url)
            .send()
            .await
            .with_context(|| format!("POST {}", self.quit_url))?;
        if !resp.status().is_success() {
            anyhow::bail!("proxy quit request returned {}", resp.status());
        }
        Ok(())
    }

    /// Ask the proxy to exit if there is one. Failures are logged only.
    pub async fn terminate_if_present(&self) -> bool {
        if !self.is_present().await {
            return false;
        }
        info!("Proxy sidecar detected, requesting termination");
        match self.terminate().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to terminate proxy sidecar: {}", e);
                false
            }
        }
    }
}
