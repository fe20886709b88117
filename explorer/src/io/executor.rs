//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples the agents from the actual backend
//! (currently `codex exec`). Tests use scripted executors that return
//! predetermined outputs without spawning processes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use jsonschema::Draft;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Parameters for an executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the executor process.
    pub workdir: PathBuf,
    /// Prompt text to feed to the agent.
    pub prompt: String,
    /// Path to the JSON Schema that constrains agent output.
    pub output_schema_path: PathBuf,
    /// Path where the agent must write its output JSON.
    pub output_path: PathBuf,
    /// Path to write executor stdout/stderr log.
    pub executor_log_path: PathBuf,
    /// Maximum time to wait for the executor to complete.
    pub timeout: Duration,
    /// Truncate executor output logs beyond this many bytes.
    pub output_limit_bytes: usize,
    pub reasoning_effort: String,
}

/// Abstraction over agent execution backends.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the agent with the given request. Must write output to `request.output_path`.
    async fn exec(&self, request: &ExecRequest) -> Result<()>;
}

/// Executor that spawns `codex exec`.
pub struct CodexExecutor;

#[async_trait]
impl Executor for CodexExecutor {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    async fn exec(&self, request: &ExecRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting codex exec");

        if fs::metadata(&request.output_schema_path).await.is_err() {
            return Err(anyhow!(
                "missing output schema {}",
                request.output_schema_path.display()
            ));
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }
        let mut cmd = Command::new("codex");
        cmd.arg("exec")
            .arg("-c")
            .arg(format!("model_reasoning_effort={}", request.reasoning_effort))
            .arg("--sandbox")
            .arg("read-only")
            // Artifact directories are usually not git repositories.
            .arg("--skip-git-repo-check")
            .arg("--output-schema")
            .arg(&request.output_schema_path)
            .arg("--output-last-message")
            .arg(&request.output_path)
            .arg("-")
            .current_dir(&request.workdir);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .await
        .context("run codex exec")?;

        write_executor_log(
            &request.executor_log_path,
            &output,
            request.output_limit_bytes,
        )
        .await?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "codex exec timed out"
            );
            return Err(anyhow!("codex exec timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "codex exec failed");
            return Err(anyhow!(
                "codex exec failed with status {:?}",
                output.status.code()
            ));
        }

        debug!("codex exec completed successfully");
        Ok(())
    }
}

/// Execute the agent, validate its output against the request's schema and
/// load it as JSON of type `T`.
#[instrument(skip_all, fields(output_path = %request.output_path.display()))]
pub async fn execute_and_load_json<E, T>(executor: &E, request: &ExecRequest) -> Result<T>
where
    E: Executor + ?Sized,
    T: DeserializeOwned,
{
    executor.exec(request).await?;
    ensure_output_exists(&request.output_path).await?;
    let value = read_output_json(&request.output_path).await?;
    validate_output(&request.output_schema_path, &value).await?;
    serde_json::from_value(value)
        .with_context(|| format!("deserialize {}", request.output_path.display()))
}

async fn ensure_output_exists(path: &Path) -> Result<()> {
    if fs::metadata(path).await.is_err() {
        return Err(anyhow!("missing executor output {}", path.display()));
    }
    Ok(())
}

async fn read_output_json(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)
        .await
        .with_context(|| format!("read agent output {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Validate JSON instance against the schema file (Draft 2020-12).
async fn validate_output(schema_path: &Path, instance: &Value) -> Result<()> {
    let schema_contents = fs::read_to_string(schema_path)
        .await
        .with_context(|| format!("read schema {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&schema_contents)
        .with_context(|| format!("parse schema {}", schema_path.display()))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("agent output failed schema validation:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

async fn write_executor_log(
    path: &Path,
    output: &CommandOutput,
    output_limit: usize,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create executor log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice("executor"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("executor"));
    if output.timed_out {
        buf.push_str("\n[executor timed out]\n");
    }

    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        buf = format!("{}\n[truncated {} bytes]\n", &buf[..cut], buf.len() - cut);
    }

    fs::write(path, buf)
        .await
        .with_context(|| format!("write executor log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "additionalProperties": false,
  "required": ["summary"],
  "properties": { "summary": { "type": "string" } }
}"#;

    #[derive(Debug, Deserialize)]
    struct Output {
        summary: String,
    }

    struct FakeExecutor {
        output: Option<&'static str>,
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn exec(&self, request: &ExecRequest) -> Result<()> {
            if let Some(output) = self.output {
                fs::write(&request.output_path, output).await?;
            }
            Ok(())
        }
    }

    fn request(dir: &Path) -> ExecRequest {
        std::fs::write(dir.join("schema.json"), SCHEMA).expect("write schema");
        ExecRequest {
            workdir: dir.to_path_buf(),
            prompt: "prompt".to_string(),
            output_schema_path: dir.join("schema.json"),
            output_path: dir.join("output.json"),
            executor_log_path: dir.join("executor.log"),
            timeout: Duration::from_secs(1),
            output_limit_bytes: 1000,
            reasoning_effort: "low".to_string(),
        }
    }

    #[tokio::test]
    async fn execute_and_load_reads_valid_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fake = FakeExecutor {
            output: Some(r#"{"summary":"ok"}"#),
        };

        let output: Output = execute_and_load_json(&fake, &request(temp.path()))
            .await
            .expect("load");
        assert_eq!(output.summary, "ok");
    }

    #[tokio::test]
    async fn execute_and_load_errors_on_missing_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fake = FakeExecutor { output: None };

        let err = execute_and_load_json::<_, Output>(&fake, &request(temp.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing executor output"));
    }

    #[tokio::test]
    async fn execute_and_load_rejects_schema_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fake = FakeExecutor {
            output: Some(r#"{"summary":"ok","extra":1}"#),
        };

        let err = execute_and_load_json::<_, Output>(&fake, &request(temp.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("schema validation"));
    }
}
