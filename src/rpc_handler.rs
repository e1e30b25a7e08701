//! RPC method handler for the Linkshelf JSON-RPC protocol.
//!
//! Extracted from `rpc_server.rs` so it can be unit-tested independently.
//! The `handle_method` function dispatches JSON-RPC method calls to the
//! bookmark list held by the `App` struct.

use serde_json::{json, Value};

use crate::app::App;
use crate::managers::bookmark_list::{LoadOutcome, MutationOutcome};
use crate::services::settings_engine::SettingsEngineTrait;

fn str_param<'a>(params: &'a Value, name: &str) -> Result<&'a str, String> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing {}", name))
}

fn page_param(params: &Value) -> Result<usize, String> {
    let page = params
        .get("page")
        .and_then(|v| v.as_u64())
        .ok_or("missing page")?;
    if page == 0 {
        return Err("invalid page: must be at least 1".to_string());
    }
    usize::try_from(page).map_err(|e| format!("invalid page: {}", e))
}

fn load_outcome_name(outcome: LoadOutcome) -> &'static str {
    match outcome {
        LoadOutcome::Applied => "applied",
        LoadOutcome::Stale => "stale",
        LoadOutcome::Failed => "failed",
        LoadOutcome::Disposed => "disposed",
    }
}

fn mutation_result(outcome: MutationOutcome) -> Value {
    match outcome {
        MutationOutcome::Completed => json!({"ok": true}),
        MutationOutcome::Rejected(message) => json!({"ok": false, "message": message}),
        MutationOutcome::Ignored => json!({"ok": false, "ignored": true}),
    }
}

/// The list snapshot, with each item's display host alongside it.
///
/// Replies and pushed state events share this shape.
pub fn state(app: &App) -> Result<Value, String> {
    let snapshot = app.bookmarks.snapshot();
    let hosts: Vec<Option<String>> = snapshot.items.iter().map(|b| b.hostname()).collect();
    let mut value = serde_json::to_value(snapshot).map_err(|e| e.to_string())?;
    if let Some(items) = value.get_mut("items").and_then(Value::as_array_mut) {
        for (item, host) in items.iter_mut().zip(hosts) {
            if let Some(obj) = item.as_object_mut() {
                obj.insert("host".to_string(), json!(host));
            }
        }
    }
    Ok(value)
}

/// Dispatch a JSON-RPC method call to the appropriate handler.
///
/// Returns `Ok(Value)` on success or `Err(String)` with an error message.
pub async fn handle_method(app: &App, method: &str, params: &Value) -> Result<Value, String> {
    match method {
        "ping" => Ok(json!({"pong": true})),

        // ─── Session ───
        "session.user" => {
            let user = &app.session().user;
            Ok(json!({"id": user.id, "email": user.email}))
        }

        "auth.config" => serde_json::to_value(&app.settings.auth).map_err(|e| e.to_string()),

        // ─── Bookmark list ───
        "bookmarks.state" => state(app),
        "bookmarks.load_page" => {
            let page = page_param(params)?;
            let show_busy = params
                .get("show_busy")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            let outcome = app.bookmarks.load_page(page, show_busy).await;
            Ok(json!({"outcome": load_outcome_name(outcome), "state": state(app)?}))
        }
        "bookmarks.change_page" => {
            let page = page_param(params)?;
            let changed = app.bookmarks.change_page(page).await;
            Ok(json!({"changed": changed, "state": state(app)?}))
        }
        "bookmarks.add" => {
            let title = str_param(params, "title")?;
            let url = str_param(params, "url")?;
            let outcome = app.bookmarks.submit_add(title, url).await;
            Ok(mutation_result(outcome))
        }
        "bookmarks.delete" => {
            let id = str_param(params, "id")?;
            let outcome = app.bookmarks.submit_delete(id).await;
            Ok(mutation_result(outcome))
        }

        // ─── Add form ───
        "draft.edit" => {
            let title = params.get("title").and_then(|v| v.as_str()).unwrap_or("");
            let url = params.get("url").and_then(|v| v.as_str()).unwrap_or("");
            app.bookmarks.edit_draft(title, url);
            Ok(json!({"ok": true}))
        }

        // ─── Notices ───
        "notice.get" => {
            let notice = app.bookmarks.notice();
            serde_json::to_value(notice).map_err(|e| e.to_string())
        }

        // ─── Settings ───
        "settings.get" => {
            let value = match &app.settings_engine {
                Some(engine) => {
                    let engine = engine.lock().map_err(|e| e.to_string())?;
                    serde_json::to_value(engine.get_settings())
                }
                None => serde_json::to_value(&app.settings),
            };
            value.map_err(|e| e.to_string())
        }
        "settings.set" => {
            let key = str_param(params, "key")?;
            let value = params.get("value").cloned().ok_or("missing value")?;
            let engine = app
                .settings_engine
                .as_ref()
                .ok_or("settings are not backed by a file")?;
            let mut engine = engine.lock().map_err(|e| e.to_string())?;
            engine.set_value(key, value).map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }

        // ─── Lifecycle ───
        "app.dispose" => {
            app.dispose();
            Ok(json!({"ok": true}))
        }

        _ => Err(format!("unknown method: {}", method)),
    }
}
