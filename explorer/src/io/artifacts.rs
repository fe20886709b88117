//! Artifact layout under `<artifacts_dir>/<app_dir>/`.
//!
//! ```text
//! traces/action_trace_<ts>.json
//! screenshots/screenshot_<ts>_<nnn>.png
//! pagesource/pagesource_<ts>_<nnn>.xml
//! runs/<run_id>/plan.json
//! runs/<run_id>/manifest.json
//! runs/<run_id>/<iter>/{meta,capture,evaluation}.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{CoverageEvaluation, ExplorationPlan};

/// Everything a run produced, returned by the orchestrator and persisted as
/// `manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub app_dir: PathBuf,
    pub trace_path: Option<PathBuf>,
    pub plan_path: Option<PathBuf>,
    pub screenshots: Vec<PathBuf>,
    pub page_sources: Vec<PathBuf>,
    pub iteration_dirs: Vec<PathBuf>,
}

/// Paths of one saved screenshot and its page source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedCapture {
    pub screenshot: PathBuf,
    pub page_source: PathBuf,
}

/// Owns the on-disk layout for one app and one session timestamp.
#[derive(Debug)]
pub struct ArtifactStore {
    app_root: PathBuf,
    session_ts: String,
    capture_seq: u32,
    manifest: ArtifactManifest,
}

impl ArtifactStore {
    pub fn new(artifacts_dir: &Path, app_dir: &str, session_ts: &str) -> Self {
        let app_root = artifacts_dir.join(app_dir);
        Self {
            manifest: ArtifactManifest {
                app_dir: app_root.clone(),
                ..ArtifactManifest::default()
            },
            app_root,
            session_ts: session_ts.to_string(),
            capture_seq: 0,
        }
    }

    pub fn app_root(&self) -> &Path {
        &self.app_root
    }

    pub fn session_ts(&self) -> &str {
        &self.session_ts
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.app_root.join("runs").join(run_id)
    }

    /// Directory holding the output schemas handed to the agent executor.
    pub fn schema_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("schemas")
    }

    pub fn manifest(&self) -> &ArtifactManifest {
        &self.manifest
    }

    pub fn record_trace(&mut self, path: &Path) {
        self.manifest.trace_path = Some(path.to_path_buf());
    }

    /// Save a screenshot and the page source it was taken with.
    pub fn save_capture(&mut self, png: &[u8], page_source: &str) -> Result<SavedCapture> {
        self.capture_seq += 1;
        let seq = self.capture_seq;
        let screenshot = self
            .app_root
            .join("screenshots")
            .join(format!("screenshot_{}_{seq:03}.png", self.session_ts));
        let page_source_path = self
            .app_root
            .join("pagesource")
            .join(format!("pagesource_{}_{seq:03}.xml", self.session_ts));
        write_bytes(&screenshot, png)?;
        write_bytes(&page_source_path, page_source.as_bytes())?;
        debug!(screenshot = %screenshot.display(), seq, "saved capture");
        self.manifest.screenshots.push(screenshot.clone());
        self.manifest.page_sources.push(page_source_path.clone());
        Ok(SavedCapture {
            screenshot,
            page_source: page_source_path,
        })
    }

    pub fn write_plan(&mut self, run_id: &str, plan: &ExplorationPlan) -> Result<PathBuf> {
        let path = self.run_dir(run_id).join("plan.json");
        write_json(&path, plan)?;
        self.manifest.plan_path = Some(path.clone());
        Ok(path)
    }

    pub fn write_iteration(
        &mut self,
        request: &IterationWriteRequest<'_>,
    ) -> Result<IterationPaths> {
        let paths = IterationPaths::new(&self.run_dir(request.run_id), request.meta.iter);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

        // Write in deterministic order to keep logs stable.
        write_json(&paths.meta_path, request.meta)?;
        write_json(&paths.capture_path, request.capture)?;
        if let Some(evaluation) = request.evaluation {
            write_json(&paths.evaluation_path, evaluation)?;
        }
        if !self.manifest.iteration_dirs.contains(&paths.dir) {
            self.manifest.iteration_dirs.push(paths.dir.clone());
        }
        Ok(paths)
    }

    pub fn write_manifest(&self, run_id: &str) -> Result<PathBuf> {
        let path = self.run_dir(run_id).join("manifest.json");
        write_json(&path, &self.manifest)?;
        Ok(path)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iter: u32,
    pub capture_turns: u32,
    pub commands_executed: usize,
    pub screenshot_count: u32,
    pub score: Option<String>,
    pub completion_percentage: Option<f64>,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
}

/// Digest of one capture iteration, persisted as `capture.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureLog {
    pub summaries: Vec<String>,
    pub commands: Vec<String>,
    pub screenshots: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub capture_path: PathBuf,
    pub evaluation_path: PathBuf,
}

impl IterationPaths {
    pub fn new(run_dir: &Path, iter: u32) -> Self {
        let dir = run_dir.join(iter.to_string());
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            capture_path: dir.join("capture.json"),
            evaluation_path: dir.join("evaluation.json"),
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub run_id: &'a str,
    pub meta: &'a IterationMeta,
    pub capture: &'a CaptureLog,
    pub evaluation: Option<&'a CoverageEvaluation>,
}

fn write_bytes(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_bytes(path, buf.as_bytes())
}

/// Atomically write `contents` (temp file + rename).
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coverage::default_evaluation;

    #[test]
    fn layout_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(temp.path(), "mobilesms", "20250101_120000");

        assert_eq!(store.session_ts(), "20250101_120000");
        assert!(store.run_dir("run-1").ends_with("mobilesms/runs/run-1"));
        let paths = IterationPaths::new(&store.run_dir("run-1"), 3);
        assert!(paths.meta_path.ends_with("runs/run-1/3/meta.json"));
        assert!(paths.capture_path.ends_with("capture.json"));
        assert!(paths.evaluation_path.ends_with("evaluation.json"));
    }

    #[test]
    fn captures_are_numbered_and_recorded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = ArtifactStore::new(temp.path(), "demo", "20250101_120000");

        let first = store.save_capture(b"png", "<a/>").expect("first");
        let second = store.save_capture(b"png", "<b/>").expect("second");

        assert!(first.screenshot.ends_with("screenshots/screenshot_20250101_120000_001.png"));
        assert!(second.page_source.ends_with("pagesource/pagesource_20250101_120000_002.xml"));
        assert_eq!(fs::read_to_string(&second.page_source).expect("read"), "<b/>");
        assert_eq!(store.manifest().screenshots.len(), 2);
    }

    #[test]
    fn writes_iteration_logs_and_manifest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = ArtifactStore::new(temp.path(), "demo", "20250101_120000");
        let plan = ExplorationPlan::default();
        store.write_plan("run-9", &plan).expect("plan");
        let meta = IterationMeta {
            run_id: "run-9".to_string(),
            iter: 1,
            capture_turns: 2,
            commands_executed: 3,
            screenshot_count: 1,
            score: Some("incomplete".to_string()),
            completion_percentage: Some(0.0),
            started_at: "start".to_string(),
            ended_at: "end".to_string(),
            duration_ms: 10,
        };
        let evaluation = default_evaluation(&plan);

        let paths = store
            .write_iteration(&IterationWriteRequest {
                run_id: "run-9",
                meta: &meta,
                capture: &CaptureLog::default(),
                evaluation: Some(&evaluation),
            })
            .expect("write logs");
        let manifest_path = store.write_manifest("run-9").expect("manifest");

        assert!(paths.meta_path.is_file());
        assert!(paths.capture_path.is_file());
        assert!(paths.evaluation_path.is_file());
        let manifest: ArtifactManifest =
            serde_json::from_str(&fs::read_to_string(manifest_path).expect("read")).expect("parse");
        assert_eq!(manifest.iteration_dirs, vec![paths.dir]);
        assert!(manifest.plan_path.is_some());
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("trace.json");
        write_atomic(&path, b"{}").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "{}");
        assert!(!path.with_extension("tmp").exists());
    }
}
