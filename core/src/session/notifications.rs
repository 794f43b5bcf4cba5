//! Mapping of backend push notifications to domain events.
//!
//! Notifications look like `{"event": "block", "block": {"block_height": 1}}`:
//! the payload sits under the key named by `event`.

use super::SessionHandle;
use crate::events::{EventKind, SubaccountEvent};
use crate::types::{ConnectionEvent, Settings, TransactionEvent, TwoFactorReset};
use serde_json::Value;
use std::sync::PoisonError;
use tokio::runtime::Handle;

impl SessionHandle {
    /// Map one push notification to domain events.
    ///
    /// Safe to call from any thread. Work that needs the backend (two-factor
    /// config refresh, hidden reconnect) runs on the runtime captured at connect.
    pub fn handle_notification(&self, notification: Value) {
        let Some(event) = notification.get("event").and_then(Value::as_str) else {
            return;
        };
        let Some(data) = notification.get(event).cloned() else {
            return;
        };
        log::debug!("{} notification {}", self.network(), event);

        match event {
            "block" => {
                let Some(height) = data
                    .get("block_height")
                    .and_then(Value::as_u64)
                    .and_then(|h| u32::try_from(h).ok())
                else {
                    return;
                };
                let paused = {
                    let mut state = self.state();
                    state.block_height = height;
                    state.paused
                };
                // Stale while a reconnect is pending
                if !paused {
                    self.sink().emit(EventKind::Block {
                        block_height: height,
                    });
                }
            }
            "subaccount" => {
                let pointer = data
                    .get("pointer")
                    .and_then(Value::as_u64)
                    .and_then(|p| u32::try_from(p).ok())
                    .unwrap_or_default();
                self.sink().emit(EventKind::Subaccount {
                    pointer,
                    event: SubaccountEvent::Updated(data),
                });
            }
            "transaction" => {
                let Ok(tx) = serde_json::from_value::<TransactionEvent>(data) else {
                    return;
                };
                let incoming = tx.is_incoming().then(|| tx.subaccounts.clone());
                self.sink().emit(EventKind::Transaction(tx));
                for pointer in incoming.unwrap_or_default() {
                    self.sink().emit(EventKind::Subaccount {
                        pointer,
                        event: SubaccountEvent::AddressChanged,
                    });
                }
            }
            "twofactor_reset" => {
                let reset: TwoFactorReset = serde_json::from_value(data).unwrap_or_default();
                if let Some(runtime) = self.runtime() {
                    let session = self.clone();
                    runtime.spawn(async move {
                        if let Err(err) = session.load_two_factor_config().await {
                            log::warn!("{} two factor config refresh: {}", session.network(), err);
                        }
                    });
                }
                self.sink().emit(EventKind::TwoFactorReset(reset));
            }
            "settings" => {
                let Ok(settings) = serde_json::from_value::<Settings>(data) else {
                    return;
                };
                self.state().settings = Some(settings.clone());
                self.sink().emit(EventKind::Settings(settings));
            }
            "network" => {
                if let Ok(connection) = serde_json::from_value::<ConnectionEvent>(data) {
                    self.on_connection_event(connection);
                }
            }
            "tor" => self.sink().emit(EventKind::Tor(data)),
            "ticker" => self.sink().emit(EventKind::Ticker(data)),
            _ => {}
        }
    }

    fn on_connection_event(&self, connection: ConnectionEvent) {
        let (connected, logged) = {
            let state = self.state();
            (state.connected, state.logged)
        };

        if !logged && connection.is_disconnected() && self.personal_electrum_url().is_some() {
            let message = format!(
                "Your personal Electrum server for {} can't be reached. Check your settings or your internet connection.",
                self.network().chain()
            );
            log::warn!("{}", message);
            self.state().failures = vec![message];
            return;
        }

        if !(connected && logged) {
            return;
        }

        if connection.is_disconnected() {
            self.state().paused = true;
            self.sink().emit(EventKind::Network(connection));
            return;
        }

        let Some(runtime) = self.runtime() else {
            log::warn!("{} cannot reconnect without a runtime", self.network());
            return;
        };
        let session = self.clone();
        runtime.spawn(async move {
            log::info!("{} reconnect", session.network());
            let worker = session.clone();
            let reconnected = session
                .inner
                .queue
                .add(async move { worker.reconnect().await })
                .await;
            match reconnected {
                Ok(()) => {
                    log::info!("{} reconnected", session.network());
                    session.state().paused = false;
                }
                // Retried on the next state transition
                Err(err) => log::warn!("{} reconnect failed: {}", session.network(), err),
            }
            session.sink().emit(EventKind::Network(connection));
        });
    }

    fn runtime(&self) -> Option<Handle> {
        Handle::try_current().ok().or_else(|| {
            self.inner
                .runtime
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }
}
