mod auth;
mod backup;
mod clock;
mod config;
mod db;
mod deadlines;
mod estimator;
mod ipc;
mod logging;
mod poll;
mod store;

use std::io::{self, BufRead};
use std::sync::Arc;

fn main() {
    logging::init();

    let config = match config::AppConfig::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!(error = %e, "refusing to start with invalid configuration");
            std::process::exit(2);
        }
    };
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        timetables = config.timetables.len(),
        presets = config.presets.len(),
        "campusd ready"
    );

    let outbox = ipc::Outbox::stdout();
    let mut state = ipc::AppState::new(config, outbox.clone());

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let mut resp = ipc::err("", "bad_json", e.to_string(), None);
                if let Some(obj) = resp.as_object_mut() {
                    obj.remove("id");
                }
                outbox.send(&resp);
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        outbox.send(&resp);
    }

    state.stop_tickers();
    tracing::info!("stdin closed, exiting");
}
