// Script runtime
//
// Executions run user code in an interpreter subprocess with a fresh
// event loop, the sandboxed module tree on its path, and stdout/stderr
// captured as structured logs. Peak memory and CPU time come from the
// OS resource-usage interface for child processes.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bifrost_contracts::{ExecutionMetrics, LogLine};
use bifrost_core::settings::exec_cancel_key;
use bifrost_core::{Error, Result};
use bifrost_workspace::ModuleCacheStore;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bootstrap::site_packages_dir;
use crate::sandbox::Sandbox;

/// Entry script executed inside the sandbox. Imports the target module
/// from the materialized tree, runs the function on a fresh event loop,
/// and writes the result as JSON to a side channel so stdout stays free
/// for user logs.
const RUNNER_SOURCE: &str = r#"import asyncio
import importlib.util
import inspect
import json
import sys


def main() -> int:
    module_path, function_name, params_path, result_path = sys.argv[1:5]

    with open(params_path) as fh:
        params = json.load(fh)

    spec = importlib.util.spec_from_file_location("__bifrost_target__", module_path)
    module = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(module)

    fn = getattr(module, function_name)
    if inspect.iscoroutinefunction(fn):
        result = asyncio.run(fn(**params))
    else:
        result = fn(**params)

    with open(result_path, "w") as fh:
        json.dump({"result": result}, fh, default=str)
    return 0


if __name__ == "__main__":
    sys.exit(main())
"#;

/// What to run: a registered workflow function or an inline script.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub execution_id: Uuid,
    /// Workspace-relative module path, e.g. "workflows/hello.py"
    pub module_path: Option<String>,
    pub function_name: Option<String>,
    /// Inline source, mutually exclusive with module_path
    pub inline_code: Option<String>,
    pub script_name: Option<String>,
    pub parameters: serde_json::Value,
}

/// Raw outcome of one run
#[derive(Debug)]
pub struct RunOutput {
    pub success: bool,
    pub cancelled: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub logs: Vec<LogLine>,
    pub metrics: ExecutionMetrics,
}

#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    async fn run(&self, request: RunRequest) -> Result<RunOutput>;
}

/// Interpreter-subprocess runtime serving modules from the Redis cache
pub struct PythonRuntime {
    modules: ModuleCacheStore,
    redis: ConnectionManager,
    python: String,
}

impl PythonRuntime {
    pub fn new(modules: ModuleCacheStore, redis: ConnectionManager) -> Self {
        Self {
            modules,
            redis,
            python: std::env::var("BIFROST_PYTHON").unwrap_or_else(|_| "python3".to_string()),
        }
    }

    async fn cancel_requested(&self, execution_id: Uuid) -> bool {
        let mut conn = self.redis.clone();
        let flag: redis::RedisResult<Option<String>> =
            conn.get(exec_cancel_key(execution_id)).await;
        matches!(flag, Ok(Some(_)))
    }
}

#[async_trait]
impl ScriptRuntime for PythonRuntime {
    async fn run(&self, request: RunRequest) -> Result<RunOutput> {
        let sandbox = Sandbox::materialize(&self.modules).await?;

        let (target_path, function_name) = match (&request.module_path, &request.inline_code) {
            (Some(module_path), _) => {
                let function = request
                    .function_name
                    .clone()
                    .ok_or_else(|| Error::validation("workflow run without function name"))?;
                let absolute = sandbox.path().join(module_path);
                if !absolute.is_file() {
                    return Err(Error::not_found(format!(
                        "module {module_path} not present in workspace cache"
                    )));
                }
                (absolute, function)
            }
            (None, Some(code)) => {
                let name = request
                    .script_name
                    .clone()
                    .unwrap_or_else(|| "script.py".to_string());
                let path = sandbox.write_file(&name, code.as_bytes())?;
                (path, "main".to_string())
            }
            (None, None) => {
                return Err(Error::validation(
                    "execution carries neither workflow nor code",
                ))
            }
        };

        let runner = sandbox.write_file("__bifrost_runner__.py", RUNNER_SOURCE.as_bytes())?;
        let params = sandbox.write_file(
            "__bifrost_params__.json",
            serde_json::to_vec(&request.parameters)
                .map_err(|e| Error::validation(format!("unserializable parameters: {e}")))?
                .as_slice(),
        )?;
        let result_path = sandbox.path().join("__bifrost_result__.json");

        let usage_before = child_usage();
        let started = Instant::now();

        let mut child = tokio::process::Command::new(&self.python)
            .arg(&runner)
            .arg(&target_path)
            .arg(&function_name)
            .arg(&params)
            .arg(&result_path)
            .current_dir(sandbox.path())
            .env("PYTHONPATH", python_path(sandbox.path()))
            .env("BIFROST_EXECUTION_ID", request.execution_id.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| Error::Fatal(anyhow::anyhow!("failed to spawn interpreter: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Fatal(anyhow::anyhow!("interpreter stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Fatal(anyhow::anyhow!("interpreter stderr not captured")))?;
        let stdout_task = tokio::spawn(collect_lines(stdout, "info"));
        let stderr_task = tokio::spawn(collect_lines(stderr, "error"));

        // Wait for exit while honoring the cooperative cancel flag.
        let mut cancelled = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| {
                        Error::Fatal(anyhow::anyhow!("interpreter wait failed: {e}"))
                    })?;
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    if self.cancel_requested(request.execution_id).await {
                        warn!(execution_id = %request.execution_id, "cancel requested, killing run");
                        cancelled = true;
                        let _ = child.start_kill();
                    }
                }
            }
        };

        let mut logs = Vec::new();
        if let Ok(lines) = stdout_task.await {
            logs.extend(lines);
        }
        if let Ok(lines) = stderr_task.await {
            logs.extend(lines);
        }

        let usage_after = child_usage();
        let metrics = ExecutionMetrics {
            duration_ms: started.elapsed().as_millis() as i64,
            peak_memory_kb: usage_after.max_rss_kb,
            cpu_seconds: (usage_after.cpu_seconds - usage_before.cpu_seconds).max(0.0),
        };

        if cancelled {
            return Ok(RunOutput {
                success: false,
                cancelled: true,
                result: None,
                error: Some("execution cancelled".to_string()),
                logs,
                metrics,
            });
        }

        if !status.success() {
            let error = logs
                .iter()
                .rev()
                .find(|l| l.level == "error")
                .map(|l| l.message.clone())
                .unwrap_or_else(|| format!("interpreter exited with {status}"));
            return Ok(RunOutput {
                success: false,
                cancelled: false,
                result: None,
                error: Some(error),
                logs,
                metrics,
            });
        }

        let result = match std::fs::read(&result_path) {
            Ok(raw) => serde_json::from_slice::<serde_json::Value>(&raw)
                .ok()
                .and_then(|v| v.get("result").cloned()),
            Err(_) => None,
        };

        debug!(execution_id = %request.execution_id, "run completed");
        Ok(RunOutput {
            success: true,
            cancelled: false,
            result,
            error: None,
            logs,
            metrics,
        })
    }
}

fn python_path(sandbox: &std::path::Path) -> String {
    let site = site_packages_dir();
    format!("{}:{}", sandbox.display(), site.display())
}

async fn collect_lines(
    stream: impl tokio::io::AsyncRead + Unpin,
    level: &'static str,
) -> Vec<LogLine> {
    let mut lines = Vec::new();
    let mut reader = BufReader::new(stream).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        lines.push(LogLine::new(level, line));
    }
    lines
}

struct ChildUsage {
    max_rss_kb: i64,
    cpu_seconds: f64,
}

/// Resource usage of reaped child processes (RUSAGE_CHILDREN).
fn child_usage() -> ChildUsage {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) };
    if rc != 0 {
        return ChildUsage {
            max_rss_kb: 0,
            cpu_seconds: 0.0,
        };
    }

    let cpu = usage.ru_utime.tv_sec as f64
        + usage.ru_utime.tv_usec as f64 / 1e6
        + usage.ru_stime.tv_sec as f64
        + usage.ru_stime.tv_usec as f64 / 1e6;

    ChildUsage {
        // ru_maxrss is kilobytes on Linux
        max_rss_kb: usage.ru_maxrss,
        cpu_seconds: cpu,
    }
}
