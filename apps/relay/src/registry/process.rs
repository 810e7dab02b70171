use anyhow::Context;
use async_trait::async_trait;
use dev_tunnel_common::{InvocationContext, TunnelError};
use serde_json::{Value, json};
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::debug;

use super::{Function, FunctionRef, Loader};

/// Environment variable naming the function a process should run
pub const HANDLER_ENV: &str = "DTR_HANDLER";

/// Loads modules as executables under a root directory
///
/// Each invocation starts the executable with [`HANDLER_ENV`] set to the
/// function name, writes `{"event": ..., "context": ...}` to its stdin and
/// reads the return value as JSON from its stdout.
pub struct ProcessLoader {
    root: PathBuf,
}

impl ProcessLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Loader for ProcessLoader {
    async fn load(&self, reference: &FunctionRef) -> anyhow::Result<Arc<dyn Function>> {
        let program = self.root.join(&reference.module);
        if !program.is_file() {
            return Err(TunnelError::HandlerNotFound(format!(
                "{} (no executable at {})",
                reference,
                program.display()
            ))
            .into());
        }

        Ok(Arc::new(ProcessFunction {
            program,
            handler: reference.function.clone(),
        }))
    }
}

struct ProcessFunction {
    program: PathBuf,
    handler: String,
}

#[async_trait]
impl Function for ProcessFunction {
    async fn invoke(&self, event: Value, context: InvocationContext) -> anyhow::Result<Value> {
        let input = serde_json::to_vec(&json!({ "event": event, "context": context }))?;

        let mut child = Command::new(&self.program)
            .env(HANDLER_ENV, &self.handler)
            .current_dir(self.program.parent().unwrap_or(Path::new(".")))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program.display()))?;

        // Feed stdin while stdout drains, or a large event fills both pipes
        let program = &self.program;
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin
                && let Err(e) = stdin.write_all(&input).await
            {
                // The handler may exit without reading its input
                debug!("Failed to write event to {}: {}", program.display(), e);
            }
        };

        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output =
            output.with_context(|| format!("Failed to wait for {}", self.program.display()))?;

        if !output.status.success() {
            return Err(TunnelError::InvocationFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("{} did not print a JSON result", self.program.display()))
    }
}
