//! Two-factor resolve loop.
//!
//! Backend calls that may need a second factor return a [`TwoFactorCall`]. The
//! loop polls its status and drives it to `done`, asking the injected
//! [`ChallengeResolver`] or [`HwSigner`] whenever the user or the device has to
//! answer. Before each step, a liveness predicate supplied by the session is
//! checked; a session that stays disconnected or paused aborts the loop.

use crate::backend::{ChallengeResolver, CodeRequest, HwSigner, TwoFactorCall};
use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::types::{NetworkIdentity, TwoFactorConfig};
use serde_json::Value;
use std::sync::Arc;

/// Drives [`TwoFactorCall`]s for one network.
#[derive(Clone)]
pub struct TwoFactorResolver {
    network: NetworkIdentity,
    config: ResolverConfig,
    challenge: Option<Arc<dyn ChallengeResolver>>,
    hw_signer: Option<Arc<dyn HwSigner>>,
    two_factor_config: Option<TwoFactorConfig>,
}

impl TwoFactorResolver {
    pub fn new(network: NetworkIdentity, config: ResolverConfig) -> Self {
        Self {
            network,
            config,
            challenge: None,
            hw_signer: None,
            two_factor_config: None,
        }
    }

    pub fn with_challenge(mut self, challenge: Option<Arc<dyn ChallengeResolver>>) -> Self {
        self.challenge = challenge;
        self
    }

    pub fn with_hw_signer(mut self, hw_signer: Option<Arc<dyn HwSigner>>) -> Self {
        self.hw_signer = hw_signer;
        self
    }

    /// Two-factor configuration used to decide whether a phone call can replace SMS.
    pub fn with_two_factor_config(mut self, config: Option<TwoFactorConfig>) -> Self {
        self.two_factor_config = config;
        self
    }

    /// Resolve `call` to completion and return its `result` payload.
    ///
    /// # Arguments
    /// * `call` - The pending backend call
    /// * `is_alive` - True while the session is connected and not paused
    pub async fn resolve<P>(&self, call: Box<dyn TwoFactorCall>, is_alive: P) -> Result<Value>
    where
        P: Fn() -> bool + Send + Sync,
    {
        let mut previous_method: Option<String> = None;
        loop {
            self.wait_connection(&is_alive).await?;

            let status = call.get_status().await?;
            let state = status.get("status").and_then(Value::as_str).unwrap_or_default();
            log::debug!("{} two factor status {}", self.network, state);

            match state {
                "done" => return Ok(status.get("result").cloned().unwrap_or(Value::Null)),
                "error" => {
                    let message = status
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    return Err(Error::TwoFactorChallengeFailure(message));
                }
                "call" => call.call().await?,
                "request_code" => {
                    let methods = string_list(status.get("methods"));
                    let method = match methods.as_slice() {
                        [] => {
                            return Err(Error::TwoFactorChallengeFailure(
                                "No two factor method available".to_string(),
                            ));
                        }
                        [only] => only.clone(),
                        _ => {
                            let picked = self
                                .challenge()?
                                .select_method(self.network, methods.clone())
                                .await?;
                            self.wait_connection(&is_alive).await?;
                            picked
                        }
                    };
                    call.request_code(method).await?;
                }
                "resolve_code" => {
                    let required_data = status.get("required_data").cloned().unwrap_or(Value::Null);
                    let action = required_data
                        .get("action")
                        .and_then(Value::as_str)
                        .map(str::to_string);

                    let code = match action {
                        Some(action) => {
                            let signer = self.hw_signer.as_ref().ok_or_else(|| {
                                Error::TwoFactorChallengeCancelled(
                                    "Hardware wallet required".to_string(),
                                )
                            })?;
                            signer
                                .resolve_code(self.network, action, required_data)
                                .await?
                                .to_string()
                        }
                        None => {
                            let method = status
                                .get("method")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string();
                            let request = CodeRequest {
                                network: self.network,
                                method: method.clone(),
                                attempts_remaining: status
                                    .get("attempts_remaining")
                                    .and_then(Value::as_u64)
                                    .and_then(|n| u32::try_from(n).ok()),
                                enable_2fa_call_method: self.sms_only(),
                                previous_failed: previous_method.as_deref() == Some(method.as_str()),
                            };
                            let code = self.challenge()?.code(request).await?;
                            previous_method = Some(method);
                            code
                        }
                    };
                    self.wait_connection(&is_alive).await?;
                    call.resolve_code(code).await?;
                }
                other => {
                    return Err(Error::TwoFactorChallengeFailure(format!(
                        "Unknown two factor status: {}",
                        other
                    )));
                }
            }
        }
    }

    fn challenge(&self) -> Result<&Arc<dyn ChallengeResolver>> {
        self.challenge.as_ref().ok_or_else(|| {
            Error::TwoFactorChallengeCancelled("No two factor resolver available".to_string())
        })
    }

    fn sms_only(&self) -> bool {
        self.two_factor_config
            .as_ref()
            .is_some_and(|c| c.enabled_methods.len() == 1 && c.enabled_methods[0] == "sms")
    }

    /// Give a degraded session a grace period before giving up.
    async fn wait_connection<P>(&self, is_alive: &P) -> Result<()>
    where
        P: Fn() -> bool + Send + Sync,
    {
        for _ in 0..self.config.connection_attempts {
            if is_alive() {
                return Ok(());
            }
            tokio::time::sleep(self.config.retry_delay).await;
        }
        log::warn!("{} connection lost during two factor resolution", self.network);
        Err(Error::ConnectionFailed(None))
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
