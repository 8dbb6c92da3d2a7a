//! Laser enable gate.
//!
//! The laser driver is an ESP32 exposing three GET endpoints: `/high` turns the
//! beam on, `/low` turns it off and `/status` reports `{"state": "HIGH"|"LOW"}`.
//! A 200 response is the acknowledgment.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::GatewayError;
use crate::retry::{retry_bounded, RetryPolicy};

/// How a `set` call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaserAck {
    /// The endpoint acknowledged the request
    Confirmed,
    /// Same state was acknowledged recently; nothing was sent
    Unchanged,
}

/// Binary laser enable/disable.
///
/// `set` is idempotent: repeating a state has no additional physical effect, so
/// callers may issue it every tick without tracking what they sent before.
#[async_trait]
pub trait LaserGate: Send {
    async fn set(&mut self, on: bool) -> Result<LaserAck, GatewayError>;

    /// Forget any cached acknowledgment so the next `set` goes to the device.
    fn invalidate(&mut self) {}
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: String,
}

/// HTTP laser gate with bounded retry and re-assert throttling.
pub struct HttpLaserGate {
    base_url: String,
    client: reqwest::Client,
    policy: RetryPolicy,
    /// An acknowledged state is physically re-sent at most this often
    reassert_interval: Duration,
    last_ack: Option<(bool, Instant)>,
}

impl HttpLaserGate {
    pub fn new(
        base_url: &str,
        policy: RetryPolicy,
        reassert_interval: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(policy.attempt_timeout)
            .build()
            .map_err(|e| GatewayError::failure("laser client", e))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            policy,
            reassert_interval,
            last_ack: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query the driver's current output state.
    pub async fn status(&self) -> Result<bool, GatewayError> {
        let url = format!("{}/status", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error("laser status", e))?;

        if response.status() != StatusCode::OK {
            return Err(GatewayError::failure(
                "laser status",
                format!("HTTP {}", response.status()),
            ));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::failure("laser status", e))?;

        match body.state.to_ascii_uppercase().as_str() {
            "HIGH" => Ok(true),
            "LOW" => Ok(false),
            other => Err(GatewayError::failure(
                "laser status",
                format!("unexpected state {other:?}"),
            )),
        }
    }
}

fn request_error(operation: &str, err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::timeout(operation)
    } else {
        GatewayError::failure(operation, err)
    }
}

#[async_trait]
impl LaserGate for HttpLaserGate {
    async fn set(&mut self, on: bool) -> Result<LaserAck, GatewayError> {
        if let Some((state, at)) = self.last_ack {
            if state == on && at.elapsed() < self.reassert_interval {
                return Ok(LaserAck::Unchanged);
            }
        }

        let (operation, path) = if on {
            ("laser on", "/high")
        } else {
            ("laser off", "/low")
        };
        let url = format!("{}{}", self.base_url, path);
        let client = self.client.clone();

        let result = retry_bounded(operation, &self.policy, || {
            let client = client.clone();
            let url = url.clone();
            async move {
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| request_error(operation, e))?;
                if response.status() == StatusCode::OK {
                    Ok(())
                } else {
                    Err(GatewayError::failure(
                        operation,
                        format!("HTTP {}", response.status()),
                    ))
                }
            }
        })
        .await;

        match result {
            Ok(()) => {
                let changed = self.last_ack.map(|(s, _)| s) != Some(on);
                if changed {
                    info!("Laser {}", if on { "ON" } else { "OFF" });
                } else {
                    debug!("Laser state re-asserted ({})", if on { "ON" } else { "OFF" });
                }
                self.last_ack = Some((on, Instant::now()));
                Ok(LaserAck::Confirmed)
            }
            Err(e) => {
                self.last_ack = None;
                Err(e)
            }
        }
    }

    fn invalidate(&mut self) {
        self.last_ack = None;
    }
}
