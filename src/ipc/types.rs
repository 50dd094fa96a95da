use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use super::events::Outbox;
use crate::auth::{AuthEvent, AuthService};
use crate::clock::DayCursor;
use crate::config::AppConfig;
use crate::poll::{PollGate, TickerHandle};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub auth: AuthService,
    pub outbox: Outbox,
    /// Shared with the schedule ticker thread.
    pub day_cursor: Arc<Mutex<DayCursor>>,
    pub schedule_ticker: Option<TickerHandle>,
    pub feed_ticker: Option<TickerHandle>,
    /// Guards both the feed ticker and manual `feeds.refresh`.
    pub feed_gate: Arc<PollGate>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, outbox: Outbox) -> Self {
        let mut auth = AuthService::default();
        let events = outbox.clone();
        auth.on_auth_change(move |ev| {
            let payload = match ev {
                AuthEvent::SignedIn(session) => json!({ "state": "signedIn", "session": session }),
                AuthEvent::SignedOut { nv_number } => {
                    json!({ "state": "signedOut", "nvNumber": nv_number })
                }
            };
            events.push_event("auth.changed", payload);
        });

        let cursor = DayCursor::new(
            config.schedule.rollover_policy,
            config.schedule.weekend_policy,
            None,
        );
        Self {
            config,
            workspace: None,
            db: None,
            auth,
            outbox,
            day_cursor: Arc::new(Mutex::new(cursor)),
            schedule_ticker: None,
            feed_ticker: None,
            feed_gate: Arc::new(PollGate::new()),
        }
    }

    /// Stops every timer. Called when the workspace changes and on shutdown.
    pub fn stop_tickers(&mut self) {
        if let Some(t) = self.schedule_ticker.take() {
            t.cancel();
        }
        if let Some(t) = self.feed_ticker.take() {
            t.cancel();
        }
    }
}
