//! VmixDriver - HTTP client for the vMix Web API

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::xml::VmixStatus;
use crate::drivers::{Driver, Endpoint, FieldBatch, KnownInput, PollResult};
use crate::error::{SyncError, SyncResult};

/// vMix driver over `http://host:port/api/`
pub struct VmixDriver {
    name: String,
    http: reqwest::Client,
    /// Endpoint committed by the last successful `connect`
    endpoint: Arc<RwLock<Option<Endpoint>>>,
}

impl VmixDriver {
    /// Create a driver whose requests give up after `request_timeout`
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()
            .context("Failed to build vMix HTTP client")?;

        Ok(Self {
            name: "vmix".to_string(),
            http,
            endpoint: Arc::new(RwLock::new(None)),
        })
    }

    fn api_url(endpoint: &Endpoint) -> String {
        format!("http://{}:{}/api/", endpoint.host, endpoint.port)
    }

    fn attached(&self) -> SyncResult<Endpoint> {
        self.endpoint.read().clone().ok_or_else(SyncError::not_connected)
    }

    fn transport_error(endpoint: &Endpoint, e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::Connectivity(format!("vMix at {} timed out", endpoint))
        } else if e.is_connect() {
            SyncError::Connectivity(format!("vMix at {} is unreachable", endpoint))
        } else {
            SyncError::Connectivity(format!("vMix at {}: {}", endpoint, e))
        }
    }

    /// Fetch and parse the status document
    async fn fetch_status(&self, endpoint: &Endpoint) -> SyncResult<VmixStatus> {
        let response = self
            .http
            .get(Self::api_url(endpoint))
            .send()
            .await
            .map_err(|e| Self::transport_error(endpoint, e))?;

        if !response.status().is_success() {
            return Err(SyncError::Connectivity(format!(
                "vMix at {} answered {}",
                endpoint,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Self::transport_error(endpoint, e))?;
        VmixStatus::parse(&body)
    }

    /// Invoke one API function
    async fn call(&self, endpoint: &Endpoint, function: &str, params: &[(&str, &str)]) -> SyncResult<()> {
        let mut query: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 1);
        query.push(("Function", function));
        query.extend_from_slice(params);

        let response = self
            .http
            .get(Self::api_url(endpoint))
            .query(&query)
            .send()
            .await
            .map_err(|e| Self::transport_error(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::TransientPush(format!(
                "{} answered {}: {}",
                function,
                status,
                body.trim()
            )));
        }
        Ok(())
    }

    async fn set_field(
        &self,
        endpoint: &Endpoint,
        function: &str,
        target: &str,
        field: &str,
        value: Option<&str>,
    ) -> SyncResult<()> {
        let mut params = vec![("Input", target), ("SelectedName", field)];
        if let Some(value) = value {
            params.push(("Value", value));
        }
        self.call(endpoint, function, &params).await
    }
}

#[async_trait]
impl Driver for VmixDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self, endpoint: &Endpoint) -> SyncResult<String> {
        let status = self.fetch_status(endpoint).await?;
        debug!("vMix {} reachable at {}", status.version, endpoint);
        Ok(status.version)
    }

    async fn connect(&self, endpoint: &Endpoint) -> SyncResult<()> {
        info!("🎬 Connecting to vMix at {}", endpoint);
        let status = self.fetch_status(endpoint).await?;
        *self.endpoint.write() = Some(endpoint.clone());
        info!(
            "✅ vMix {} connected ({} inputs)",
            status.version,
            status.inputs.len()
        );
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(endpoint) = self.endpoint.write().take() {
            info!("🔌 Detached from vMix at {}", endpoint);
        }
    }

    async fn list_known_inputs(&self) -> SyncResult<Vec<KnownInput>> {
        let endpoint = self.attached()?;
        Ok(self.fetch_status(&endpoint).await?.inputs)
    }

    async fn push_fields(&self, target: &str, batch: &FieldBatch) -> SyncResult<()> {
        let endpoint = self.attached()?;

        let result: SyncResult<()> = async {
            for (field, value) in &batch.text {
                self.set_field(&endpoint, "SetText", target, field, Some(value.as_str())).await?;
            }
            for (field, value) in &batch.color {
                self.set_field(&endpoint, "SetColor", target, field, Some(value.as_str())).await?;
            }
            for (field, visible) in &batch.visibility {
                let function = if *visible {
                    "SetTextVisibleOn"
                } else {
                    "SetTextVisibleOff"
                };
                self.set_field(&endpoint, function, target, field, None).await?;
            }
            for (field, value) in &batch.image {
                self.set_field(&endpoint, "SetImage", target, field, Some(value.as_str())).await?;
            }
            Ok(())
        }
        .await;

        // A partially applied batch is retried as a whole
        result.map_err(|e| match e {
            SyncError::TransientPush(_) => e,
            other => SyncError::TransientPush(other.to_string()),
        })
    }

    async fn show_overlay(&self, target: &str, layer: u8) -> SyncResult<()> {
        let endpoint = self.attached()?;
        let function = format!("OverlayInput{}In", layer);
        self.call(&endpoint, &function, &[("Input", target)]).await
    }

    async fn hide_overlay(&self, _target: &str, layer: u8) -> SyncResult<()> {
        let endpoint = self.attached()?;
        let function = format!("OverlayInput{}Out", layer);
        self.call(&endpoint, &function, &[]).await
    }

    async fn poll_overlay_state(&self) -> SyncResult<PollResult> {
        let endpoint = self.attached()?;
        Ok(self.fetch_status(&endpoint).await?.into_poll_result())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::vmix::SAMPLE_STATUS;
    use mockito::Matcher;

    fn endpoint_of(server: &mockito::ServerGuard) -> Endpoint {
        let host_port = server.host_with_port();
        let (host, port) = host_port.rsplit_once(':').unwrap();
        Endpoint::new(host, port.parse().unwrap())
    }

    fn driver() -> VmixDriver {
        VmixDriver::new(Duration::from_millis(500)).unwrap()
    }

    #[tokio::test]
    async fn test_test_connection_does_not_attach() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/api/")
            .with_body(SAMPLE_STATUS)
            .create_async()
            .await;

        let driver = driver();
        let version = driver.test_connection(&endpoint_of(&server)).await.unwrap();
        assert_eq!(version, "27.0.0.49");

        let err = driver.poll_overlay_state().await.unwrap_err();
        assert_eq!(err, SyncError::not_connected());
    }

    #[tokio::test]
    async fn test_connect_then_poll() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/api/")
            .with_body(SAMPLE_STATUS)
            .create_async()
            .await;

        let driver = driver();
        driver.connect(&endpoint_of(&server)).await.unwrap();

        let poll = driver.poll_overlay_state().await.unwrap();
        assert_eq!(poll.overlays[&1].active_input_number.as_deref(), Some("13"));
        assert_eq!(poll.inputs["13"].key, "score-target");

        driver.disconnect().await;
        assert!(driver.list_known_inputs().await.is_err());
    }

    #[tokio::test]
    async fn test_push_fields_sends_one_call_per_field() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/api/")
            .with_body(SAMPLE_STATUS)
            .create_async()
            .await;
        let set_text = server
            .mock("GET", "/api/")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("Function".into(), "SetText".into()),
                Matcher::UrlEncoded("Input".into(), "score-target".into()),
                Matcher::UrlEncoded("SelectedName".into(), "TeamA".into()),
                Matcher::UrlEncoded("Value".into(), "Alpha & Co".into()),
            ]))
            .expect(1)
            .create_async()
            .await;
        let visible = server
            .mock("GET", "/api/")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("Function".into(), "SetTextVisibleOff".into()),
                Matcher::UrlEncoded("SelectedName".into(), "ServeA".into()),
            ]))
            .expect(1)
            .create_async()
            .await;

        let driver = driver();
        driver.connect(&endpoint_of(&server)).await.unwrap();

        let mut batch = FieldBatch::default();
        batch.text.insert("TeamA".into(), "Alpha & Co".into());
        batch.visibility.insert("ServeA".into(), false);
        driver.push_fields("score-target", &batch).await.unwrap();

        set_text.assert_async().await;
        visible.assert_async().await;
    }

    #[tokio::test]
    async fn test_push_failure_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/api/")
            .with_body(SAMPLE_STATUS)
            .create_async()
            .await;
        let _fail = server
            .mock("GET", "/api/")
            .match_query(Matcher::UrlEncoded("Function".into(), "SetText".into()))
            .with_status(500)
            .with_body("Input not found")
            .create_async()
            .await;

        let driver = driver();
        driver.connect(&endpoint_of(&server)).await.unwrap();

        let mut batch = FieldBatch::default();
        batch.text.insert("TeamA".into(), "Alpha".into());
        let err = driver.push_fields("missing", &batch).await.unwrap_err();
        assert!(matches!(err, SyncError::TransientPush(ref msg) if msg.contains("Input not found")));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connectivity_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let driver = driver();
        let err = driver
            .connect(&Endpoint::new("127.0.0.1", port))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_overlay_functions() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/api/")
            .with_body(SAMPLE_STATUS)
            .create_async()
            .await;
        let show = server
            .mock("GET", "/api/")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("Function".into(), "OverlayInput2In".into()),
                Matcher::UrlEncoded("Input".into(), "13".into()),
            ]))
            .expect(1)
            .create_async()
            .await;
        let hide = server
            .mock("GET", "/api/")
            .match_query(Matcher::UrlEncoded("Function".into(), "OverlayInput2Out".into()))
            .expect(1)
            .create_async()
            .await;

        let driver = driver();
        driver.connect(&endpoint_of(&server)).await.unwrap();
        driver.show_overlay("13", 2).await.unwrap();
        driver.hide_overlay("13", 2).await.unwrap();

        show.assert_async().await;
        hide.assert_async().await;
    }
}
