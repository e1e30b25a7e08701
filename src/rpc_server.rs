//! Linkshelf RPC Server: JSON-RPC over stdin/stdout for a UI front end.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"bookmarks.add", "params":{"title":"...","url":"..."}}
//! Response: {"id":1, "result":{...}} or {"id":1, "error":"..."}
//! Push:     {"event":"state", "state":{...}} whenever the bookmark list changes.
//!
//! Usage: `linkshelf-rpc [settings.json]`. Logs go to stderr, filtered by
//! `LINKSHELF_LOG` (default `linkshelf=info`).

use std::sync::Arc;
use std::time::Instant;

use linkshelf::app::App;
use linkshelf::rpc_handler::{handle_method, state};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "LINKSHELF_LOG";
const MAX_REQUESTS_PER_SECOND: u32 = 200;

/// Simple rate limiter: max requests per one-second window.
struct RateLimiter {
    window_start: Instant,
    request_count: u32,
    max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self { window_start: Instant::now(), request_count: 0, max_per_second }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    fn check(&mut self) -> bool {
        if self.window_start.elapsed().as_secs() >= 1 {
            self.window_start = Instant::now();
            self.request_count = 0;
        }
        self.request_count += 1;
        self.request_count <= self.max_per_second
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("linkshelf=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Serializes every outgoing line through one writer so pushes and responses never interleave.
fn spawn_writer() -> mpsc::UnboundedSender<Value> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = rx.recv().await {
            let mut line = message.to_string();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });
    tx
}

/// Pushes a state event each time the bookmark list changes.
fn spawn_state_pusher(app: Arc<App>, out: mpsc::UnboundedSender<Value>) {
    let mut revisions = app.bookmarks.subscribe_state();
    tokio::spawn(async move {
        while revisions.changed().await.is_ok() {
            let payload = match state(&app) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "failed to serialize state");
                    continue;
                }
            };
            if out.send(json!({"event": "state", "state": payload})).is_err() {
                break;
            }
        }
    });
}

#[tokio::main]
async fn main() {
    init_logging();

    let settings_path = std::env::args().nth(1);
    let app = match App::new(settings_path) {
        Ok(app) => Arc::new(app),
        Err(e) => {
            error!(error = %e, "failed to initialize");
            eprintln!("linkshelf-rpc: {}", e);
            std::process::exit(1);
        }
    };

    let out = spawn_writer();
    spawn_state_pusher(app.clone(), out.clone());

    // Signal ready before mounting so the first state push follows it.
    let _ = out.send(json!({"event": "ready", "version": env!("CARGO_PKG_VERSION")}));
    app.start().await;

    let mut rate_limiter = RateLimiter::new(MAX_REQUESTS_PER_SECOND);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                let _ = out.send(json!({"id": null, "error": format!("parse error: {}", e)}));
                continue;
            }
        };

        let id = req.get("id").cloned().unwrap_or(Value::Null);

        if !rate_limiter.check() {
            let _ = out.send(json!({"id": id, "error": "rate limit exceeded"}));
            continue;
        }

        let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let params = req.get("params").cloned().unwrap_or(json!({}));

        // Requests run concurrently; the list itself decides which page response wins.
        let app = app.clone();
        let out = out.clone();
        tokio::spawn(async move {
            let response = match handle_method(&app, &method, &params).await {
                Ok(val) => json!({"id": id, "result": val}),
                Err(err) => json!({"id": id, "error": err}),
            };
            let _ = out.send(response);
        });
    }

    info!("stdin closed, shutting down");
    app.dispose();
}
