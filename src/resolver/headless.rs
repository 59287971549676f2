//! Headless assistant CLI adapter.
//!
//! Drives an external assistant binary (default `claude`) in
//! non-interactive mode with JSON output, one invocation per resolve or
//! perform call. This is the only place that knows how the external
//! service is spoken to; the rest of the crate sees the
//! `AssistantResolver` trait.

use crate::core::task::FailureKind;
use crate::core::{Assistant, Goal, Task};
use crate::error::{Error, Result};
use crate::resolver::{AssistantResolver, ProposedTask, Resolution, TaskOutcome};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Default timeout for one external call (10 minutes).
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 600;

/// Internal struct for deserializing the assistant CLI's JSON envelope.
#[derive(Debug, Deserialize)]
struct RawResponse {
    subtype: Option<String>,
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// The assistant's decomposition payload, embedded as JSON in the
/// envelope's `result` field.
#[derive(Debug, Deserialize)]
struct RawDecomposition {
    name: String,
    role: String,
    #[serde(default)]
    instructions: String,
    tasks: Vec<ProposedTask>,
}

/// Headless executor for the external assistant CLI.
///
/// Executes the binary in non-interactive mode (`-p` flag) with JSON
/// output format, parses the response, and maps it onto the resolver
/// contract.
#[derive(Debug, Clone)]
pub struct HeadlessResolver {
    /// Path to the assistant binary.
    binary: PathBuf,
    /// Extra arguments placed before the prompt flag.
    base_args: Vec<String>,
    /// Timeout for one external call.
    timeout: Duration,
}

impl HeadlessResolver {
    /// Create a resolver for the given command line.
    ///
    /// The first whitespace-separated token is located via `which`; any
    /// remaining tokens become leading arguments on every invocation.
    ///
    /// # Errors
    /// Returns an error if the binary cannot be found.
    pub fn new(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or("claude");
        let binary = which::which(name)
            .map_err(|_| Error::AssistantBinaryNotFound(name.to_string()))?;
        Ok(Self {
            binary,
            base_args: parts.map(String::from).collect(),
            timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        })
    }

    /// Create a resolver with a specific binary path.
    ///
    /// Useful for testing or when the binary is installed in a
    /// non-standard location.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary,
            base_args: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }

    /// Set a custom timeout for external calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the binary path.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Get the call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The deterministic remote correlation token for an assistant.
    ///
    /// Derived from name and role the same way on every compilation, so
    /// recompiling the same goal set updates the existing remote
    /// definition instead of creating a duplicate.
    fn derive_external_ref(name: &str, role: &str) -> String {
        format!("{}-{}", slug(name), slug(role))
    }

    /// Run one prompt through the binary and return the raw output text.
    async fn invoke(&self, prompt: &str) -> Result<std::result::Result<String, String>> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .args(&self.base_args)
                .arg("-p")
                .arg(prompt)
                .arg("--output-format")
                .arg("json")
                .output(),
        )
        .await
        .map_err(|_| Error::Timeout(self.timeout))?
        .map_err(Error::Io)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Ok(raw) = serde_json::from_str::<RawResponse>(&stdout) {
            return Ok(match raw.subtype.as_deref() {
                Some("error") => Err(raw.error.or(raw.result).unwrap_or_default()),
                _ => match (raw.result, raw.error) {
                    (_, Some(error)) => Err(error),
                    (Some(result), None) => Ok(result),
                    (None, None) => Err("empty response".to_string()),
                },
            });
        }

        if !output.status.success() {
            let message = if stderr.is_empty() {
                format!(
                    "assistant exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Ok(Err(message));
        }

        // Non-JSON success output (shouldn't happen with --output-format json)
        Ok(Ok(stdout.trim().to_string()))
    }

    /// Build the decomposition prompt for a goal.
    fn decomposition_prompt(goal: &Goal) -> String {
        format!(
            "Goal: {}\n\
             Break this goal down into tasks to create a project plan, and \
             define the single assistant (name, role, instructions) best \
             suited to perform them. The instructions must be written as if \
             speaking to that assistant. Reply with exactly one JSON object: \
             {{\"name\": ..., \"role\": ..., \"instructions\": ..., \
             \"tasks\": [{{\"label\": ..., \"description\": ..., \
             \"depends_on\": [indices or labels of prerequisite tasks]}}]}}",
            goal.text
        )
    }

    /// Build the execution prompt for a task.
    fn perform_prompt(assistant: &Assistant, task: &Task) -> String {
        format!(
            "Your name is {}. You are a {}. {}\n\nPlease {}",
            assistant.name, assistant.role, assistant.instructions, task.description
        )
    }

    /// Parse a decomposition payload into a resolution.
    fn parse_decomposition(payload: &str, existing_ref: Option<&str>) -> Result<Resolution> {
        let raw: RawDecomposition = serde_json::from_str(payload)
            .map_err(|e| Error::Resolution(format!("malformed decomposition: {}", e)))?;

        let external_ref = existing_ref
            .map(str::to_string)
            .unwrap_or_else(|| Self::derive_external_ref(&raw.name, &raw.role));

        Ok(Resolution {
            external_ref,
            name: raw.name,
            role: raw.role,
            instructions: raw.instructions,
            tasks: raw.tasks,
        })
    }
}

impl AssistantResolver for HeadlessResolver {
    fn resolve_assistant<'a>(
        &'a self,
        goal: &'a Goal,
        existing_ref: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Resolution>> {
        async move {
            let prompt = Self::decomposition_prompt(goal);
            match self.invoke(&prompt).await? {
                Ok(payload) => Self::parse_decomposition(&payload, existing_ref),
                Err(message) => Err(Error::Resolution(message)),
            }
        }
        .boxed()
    }

    fn perform_task<'a>(
        &'a self,
        assistant: &'a Assistant,
        task: &'a Task,
    ) -> BoxFuture<'a, Result<TaskOutcome>> {
        async move {
            let prompt = Self::perform_prompt(assistant, task);
            let outcome = match self.invoke(&prompt).await? {
                Ok(result) => TaskOutcome::Success { result },
                Err(message) => TaskOutcome::Failure {
                    kind: FailureKind::Execution,
                    message,
                },
            };
            Ok(outcome)
        }
        .boxed()
    }
}

/// Lowercase a string and collapse non-alphanumerics into single dashes.
fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
