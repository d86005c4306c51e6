//! Post-switch verification against the public health URL.
//!
//! After a switch the verifier polls `http(s)://<domain><health_check_path>`
//! until a response lands in the accepted status range (and carries the
//! expected header, if one is configured). Waits use the caller's clock and
//! cancel signal like every other poll.

use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use cutover_core::{CancelSignal, Clock, HeaderExpectation, ProxyConfig};
use cutover_health::{PollOutcome, RetryPolicy};

use crate::switch::{SwitchError, SwitchResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Polls the externally visible URL after a traffic switch.
#[derive(Debug, Clone)]
pub struct Verifier {
    url: String,
    attempts: u32,
    interval: Duration,
    accepted: RangeInclusive<u16>,
    header: Option<HeaderExpectation>,
    client: reqwest::Client,
}

impl Verifier {
    /// `None` when the proxy block has no domain.
    pub fn from_config(proxy: &ProxyConfig) -> SwitchResult<Option<Self>> {
        let Some(url) = proxy.verification_url() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Some(Self {
            url,
            attempts: proxy.verify_attempts.max(1),
            interval: Duration::from_secs(proxy.verify_interval_secs),
            accepted: proxy.verify_status_min..=proxy.verify_status_max,
            header: proxy.verify_header.clone(),
            client,
        }))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Poll until the URL answers acceptably. Returns the attempt count.
    pub async fn verify(&self, clock: &dyn Clock, cancel: &CancelSignal) -> SwitchResult<u32> {
        let policy = RetryPolicy {
            max_attempts: Some(self.attempts),
            interval: self.interval,
            timeout: (self.interval + REQUEST_TIMEOUT) * self.attempts,
        };
        let last_error = Mutex::new(String::new());

        let outcome = policy
            .poll(clock, cancel, |attempt| {
                let last_error = &last_error;
                async move {
                    match self.probe().await {
                        Ok(status) => {
                            debug!(url = %self.url, attempt, status, "verification probe passed");
                            true
                        }
                        Err(message) => {
                            debug!(url = %self.url, attempt, %message, "verification probe failed");
                            *last_error.lock().unwrap_or_else(PoisonError::into_inner) = message;
                            false
                        }
                    }
                }
            })
            .await;

        let last = last_error.into_inner().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            PollOutcome::Ready { attempts } => {
                info!(url = %self.url, attempts, "traffic verified");
                Ok(attempts)
            }
            PollOutcome::Exhausted { attempts } | PollOutcome::TimedOut { attempts, .. } => {
                warn!(url = %self.url, attempts, %last, "traffic verification failed");
                Err(SwitchError::Verification { attempts, last })
            }
            PollOutcome::Interrupted { reason, .. } => Err(SwitchError::Interrupted(reason)),
        }
    }

    async fn probe(&self) -> Result<u16, String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status().as_u16();
        if !self.accepted.contains(&status) {
            return Err(format!("unexpected status {status}"));
        }

        if let Some(expected) = &self.header {
            let actual = response
                .headers()
                .get(expected.name.as_str())
                .and_then(|v| v.to_str().ok());
            if actual != Some(expected.value.as_str()) {
                return Err(format!(
                    "header {} is {:?}, expected {:?}",
                    expected.name, actual, expected.value
                ));
            }
        }
        Ok(status)
    }
}
