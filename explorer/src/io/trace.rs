//! Durable action trace for an exploration session.
//!
//! Every mutating call rewrites the whole trace file atomically, so anything
//! already logged survives a crash after any single call.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::io::artifacts::write_atomic;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
/// Session timestamp used in artifact file names.
pub const SESSION_TS_FORMAT: &str = "%Y%m%d_%H%M%S";

/// App-state fields snapshotted into every action record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceAppState {
    pub current_activity: Option<String>,
    pub current_screen: Option<String>,
    pub current_view: Option<String>,
    pub last_page_source_hash: Option<String>,
}

impl TraceAppState {
    /// Overwrite the fields that are set in `patch`.
    fn merge(&mut self, patch: TraceAppState) {
        let TraceAppState {
            current_activity,
            current_screen,
            current_view,
            last_page_source_hash,
        } = patch;
        if current_activity.is_some() {
            self.current_activity = current_activity;
        }
        if current_screen.is_some() {
            self.current_screen = current_screen;
        }
        if current_view.is_some() {
            self.current_view = current_view;
        }
        if last_page_source_hash.is_some() {
            self.last_page_source_hash = last_page_source_hash;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub timestamp: String,
    pub action_type: String,
    pub details: Value,
    pub app_state: TraceAppState,
    pub timestamp_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub timestamp: String,
    pub url: String,
    pub method: String,
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

/// On-disk trace document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDocument {
    pub app: String,
    pub bundle_id: Option<String>,
    pub session_start: String,
    pub actions: Vec<ActionRecord>,
    pub network_requests: Vec<NetworkRecord>,
}

#[derive(Debug)]
struct ActiveTrace {
    path: PathBuf,
    started: DateTime<Local>,
    document: TraceDocument,
}

/// Single-writer trace recorder owned by the active run.
#[derive(Debug)]
pub struct ActionTracer {
    artifacts_dir: PathBuf,
    app_state: TraceAppState,
    active: Option<ActiveTrace>,
}

impl ActionTracer {
    pub fn new(artifacts_dir: &Path) -> Self {
        Self {
            artifacts_dir: artifacts_dir.to_path_buf(),
            app_state: TraceAppState::default(),
            active: None,
        }
    }

    /// Path of the active trace file, if a session is open.
    pub fn active_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|trace| trace.path.as_path())
    }

    /// Timestamp of the active session in [`SESSION_TS_FORMAT`].
    pub fn session_ts(&self) -> Option<String> {
        self.active
            .as_ref()
            .map(|trace| trace.started.format(SESSION_TS_FORMAT).to_string())
    }

    /// Reset in-memory state and open a fresh trace file for the app.
    pub fn start_new_trace(
        &mut self,
        app_dir_name: &str,
        bundle_id: Option<&str>,
    ) -> Result<PathBuf> {
        let started = Local::now();
        let timestamp = started.format(SESSION_TS_FORMAT).to_string();
        let path = self
            .artifacts_dir
            .join(app_dir_name)
            .join("traces")
            .join(format!("action_trace_{timestamp}.json"));

        self.app_state = TraceAppState::default();
        self.active = Some(ActiveTrace {
            path: path.clone(),
            started,
            document: TraceDocument {
                app: app_dir_name.to_string(),
                bundle_id: bundle_id.map(str::to_string),
                session_start: started.format(ISO_FORMAT).to_string(),
                actions: Vec::new(),
                network_requests: Vec::new(),
            },
        });
        self.log_action(
            "session_start",
            json!({ "app": app_dir_name, "bundle_id": bundle_id, "timestamp": timestamp }),
        )?;
        info!(path = %path.display(), "started action trace");
        Ok(path)
    }

    pub fn update_app_state(&mut self, patch: TraceAppState) {
        self.app_state.merge(patch);
    }

    /// Record the screen shown by the latest snapshot. Unlike a patch, a
    /// missing title clears the previous one.
    pub fn set_snapshot_state(&mut self, current_screen: Option<String>, page_source_hash: &str) {
        self.app_state.current_screen = current_screen;
        self.app_state.last_page_source_hash = Some(page_source_hash.to_string());
    }

    pub fn app_state(&self) -> &TraceAppState {
        &self.app_state
    }

    /// Append an action with a snapshot of the current app state.
    pub fn log_action(&mut self, action_type: &str, details: Value) -> Result<()> {
        let Some(trace) = self.active.as_mut() else {
            warn!(action_type, "cannot log action: no active trace");
            return Ok(());
        };
        let now = Local::now();
        trace.document.actions.push(ActionRecord {
            timestamp: now.format(ISO_FORMAT).to_string(),
            action_type: action_type.to_string(),
            details,
            app_state: self.app_state.clone(),
            timestamp_millis: now.timestamp_millis(),
        });
        write_trace(trace)?;
        debug!(action_type, "logged action");
        Ok(())
    }

    pub fn log_network_request(
        &mut self,
        url: &str,
        method: &str,
        status: Option<u16>,
        request_data: Option<Value>,
        response_data: Option<Value>,
    ) -> Result<()> {
        let Some(trace) = self.active.as_mut() else {
            warn!(url, "cannot log network request: no active trace");
            return Ok(());
        };
        trace.document.network_requests.push(NetworkRecord {
            timestamp: Local::now().format(ISO_FORMAT).to_string(),
            url: url.to_string(),
            method: method.to_string(),
            status,
            request_data,
            response_data,
        });
        write_trace(trace)?;
        debug!(url, "logged network request");
        Ok(())
    }

    /// Append `session_end` and close the trace. Returns the closed trace path.
    pub fn end_trace(&mut self) -> Result<Option<PathBuf>> {
        let Some(trace) = self.active.as_ref() else {
            warn!("cannot end trace: no active trace");
            return Ok(None);
        };
        let elapsed = Local::now().signed_duration_since(trace.started);
        let details = json!({
            "app": trace.document.app,
            "bundle_id": trace.document.bundle_id,
            "duration_seconds": elapsed.num_milliseconds() as f64 / 1000.0,
        });
        self.log_action("session_end", details)?;
        let path = self.active.take().map(|trace| trace.path);
        if let Some(path) = &path {
            info!(path = %path.display(), "ended action trace");
        }
        Ok(path)
    }
}

fn write_trace(trace: &ActiveTrace) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(&trace.document)?;
    buf.push('\n');
    write_atomic(&trace.path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn read(path: &Path) -> TraceDocument {
        serde_json::from_str(&fs::read_to_string(path).expect("read trace")).expect("parse trace")
    }

    #[test]
    fn every_call_is_written_through() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut tracer = ActionTracer::new(temp.path());

        let path = tracer
            .start_new_trace("mobilesms", Some("com.apple.MobileSMS"))
            .expect("start");
        assert!(path.starts_with(temp.path().join("mobilesms").join("traces")));
        assert_eq!(read(&path).actions[0].action_type, "session_start");

        tracer.update_app_state(TraceAppState {
            last_page_source_hash: Some("abc".to_string()),
            ..TraceAppState::default()
        });
        tracer
            .log_action("tap", json!({ "element_id": "Compose" }))
            .expect("log");
        tracer
            .log_network_request("https://example.com", "GET", Some(200), None, None)
            .expect("network");

        let doc = read(&path);
        assert_eq!(doc.app, "mobilesms");
        assert_eq!(doc.bundle_id.as_deref(), Some("com.apple.MobileSMS"));
        assert_eq!(doc.actions.len(), 2);
        assert_eq!(
            doc.actions[1].app_state.last_page_source_hash.as_deref(),
            Some("abc")
        );
        assert_eq!(doc.actions[0].app_state.last_page_source_hash, None);
        assert_eq!(doc.network_requests[0].status, Some(200));
    }

    #[test]
    fn end_trace_appends_session_end_and_closes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut tracer = ActionTracer::new(temp.path());
        let path = tracer.start_new_trace("demo", None).expect("start");

        let closed = tracer.end_trace().expect("end");

        assert_eq!(closed.as_deref(), Some(path.as_path()));
        assert!(tracer.active_path().is_none());
        let doc = read(&path);
        let last = doc.actions.last().expect("session_end");
        assert_eq!(last.action_type, "session_end");
        assert!(last.details["duration_seconds"].as_f64().is_some());
        assert!(doc.actions[0].timestamp_millis <= last.timestamp_millis);
    }

    #[test]
    fn logging_without_trace_is_a_no_op() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut tracer = ActionTracer::new(temp.path());
        tracer.log_action("tap", json!({})).expect("no-op");
        assert_eq!(tracer.end_trace().expect("no-op"), None);
        assert!(fs::read_dir(temp.path()).expect("read dir").next().is_none());
    }

    #[test]
    fn app_state_patch_keeps_unset_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut tracer = ActionTracer::new(temp.path());
        tracer.update_app_state(TraceAppState {
            current_screen: Some("Inbox".to_string()),
            ..TraceAppState::default()
        });
        tracer.update_app_state(TraceAppState {
            last_page_source_hash: Some("h1".to_string()),
            ..TraceAppState::default()
        });
        assert_eq!(tracer.app_state().current_screen.as_deref(), Some("Inbox"));
        assert_eq!(tracer.app_state().last_page_source_hash.as_deref(), Some("h1"));
    }

    #[test]
    fn untitled_snapshot_clears_the_previous_screen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut tracer = ActionTracer::new(temp.path());
        let path = tracer.start_new_trace("demo", None).expect("start");

        tracer.set_snapshot_state(Some("Sign In".to_string()), "h1");
        tracer.log_action("get_page_source", json!({})).expect("log");
        tracer.set_snapshot_state(None, "h2");
        tracer.log_action("get_page_source", json!({})).expect("log");

        let doc = read(&path);
        assert_eq!(doc.actions[1].app_state.current_screen.as_deref(), Some("Sign In"));
        assert_eq!(doc.actions[2].app_state.current_screen, None);
        assert_eq!(doc.actions[2].app_state.last_page_source_hash.as_deref(), Some("h2"));
    }
}
