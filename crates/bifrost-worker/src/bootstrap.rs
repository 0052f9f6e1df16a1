// Worker bootstrap: install packages from the cached requirements.txt
//
// Runs once at worker startup so installed packages survive container
// restarts. This function never fails the worker: Redis being down, a
// broken requirements file or a pip error are all logged and the worker
// continues with whatever is already installed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bifrost_core::settings::REQUIREMENTS_KEY;
use redis::AsyncCommands;
use tracing::{info, warn};

const CONNECT_RETRIES: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const PIP_TIMEOUT: Duration = Duration::from_secs(300);

/// Directory pip installs into; exported on PYTHONPATH for executions.
pub fn site_packages_dir() -> PathBuf {
    std::env::var("BIFROST_SITE_PACKAGES")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/bifrost/site-packages"))
}

pub async fn install_requirements_from_cache(redis_url: &str, worker_id: &str) {
    let content = match fetch_requirements(redis_url, worker_id).await {
        Some(c) => c,
        None => return,
    };

    if content.trim().is_empty() {
        info!(worker_id, "cached requirements.txt is empty");
        return;
    }

    let temp = match tempfile::NamedTempFile::new() {
        Ok(t) => t,
        Err(e) => {
            warn!(worker_id, error = %e, "failed to create temp requirements file");
            return;
        }
    };
    if let Err(e) = std::fs::write(temp.path(), &content) {
        warn!(worker_id, error = %e, "failed to write temp requirements file");
        return;
    }

    let site_dir = site_packages_dir();
    if let Err(e) = std::fs::create_dir_all(&site_dir) {
        warn!(worker_id, error = %e, "failed to create site-packages dir");
        return;
    }

    info!(worker_id, "installing packages from cached requirements.txt");
    match run_pip(temp.path(), &site_dir).await {
        Ok(true) => {
            let count = content.lines().filter(|l| !l.trim().is_empty()).count();
            info!(worker_id, count, "installed packages from requirements.txt");
        }
        Ok(false) => {}
        Err(_) => {
            warn!(worker_id, "pip install timed out after 5 minutes");
        }
    }
}

async fn fetch_requirements(redis_url: &str, worker_id: &str) -> Option<String> {
    for attempt in 1..=CONNECT_RETRIES {
        let client = match redis::Client::open(redis_url) {
            Ok(c) => c,
            Err(e) => {
                warn!(worker_id, error = %e, "invalid redis url, skipping requirements install");
                return None;
            }
        };

        match client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                let raw: Result<Option<String>, _> = conn.get(REQUIREMENTS_KEY).await;
                match raw {
                    Ok(Some(payload)) => {
                        // Payload is JSON {"content": "..."} written by the
                        // requirements cache on the API side.
                        match serde_json::from_str::<serde_json::Value>(&payload) {
                            Ok(parsed) => {
                                return parsed
                                    .get("content")
                                    .and_then(|c| c.as_str())
                                    .map(|s| s.to_string());
                            }
                            Err(e) => {
                                warn!(worker_id, error = %e, "invalid JSON in cached requirements");
                                return None;
                            }
                        }
                    }
                    Ok(None) => {
                        info!(worker_id, "no cached requirements.txt found");
                        return None;
                    }
                    Err(e) => {
                        warn!(
                            worker_id,
                            attempt, error = %e, "redis read failed during requirements fetch"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(
                    worker_id,
                    attempt, error = %e, "redis connect failed during requirements fetch"
                );
            }
        }

        if attempt < CONNECT_RETRIES {
            tokio::time::sleep(RETRY_DELAY).await;
        } else {
            warn!(
                worker_id,
                "redis unavailable after {CONNECT_RETRIES} attempts, skipping requirements install"
            );
        }
    }
    None
}

/// Returns Ok(true) on success, Ok(false) on pip failure, Err on timeout.
async fn run_pip(requirements: &Path, site_dir: &Path) -> Result<bool, ()> {
    let run = tokio::process::Command::new("python3")
        .arg("-m")
        .arg("pip")
        .arg("install")
        .arg("-r")
        .arg(requirements)
        .arg("--target")
        .arg(site_dir)
        .arg("--quiet")
        .output();

    match tokio::time::timeout(PIP_TIMEOUT, run).await {
        Ok(Ok(output)) if output.status.success() => Ok(true),
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(error = %stderr.trim(), "pip install failed");
            Ok(false)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "failed to spawn pip");
            Ok(false)
        }
        Err(_) => Err(()),
    }
}
