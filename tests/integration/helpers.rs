//! Test helpers and utilities

use std::path::Path;
use std::time::{Duration, Instant};

use ripple_drive::Config;

/// Configuration rooted at `project` with a throwaway listen port and
/// hot reload off.
pub fn test_config(project: &Path, workers: usize) -> Config {
    Config::from_env()
        .expect("Failed to load configuration")
        .with_project_path(project)
        .with_listen("http://127.0.0.1:0".parse().expect("valid listen address"))
        .with_workers(workers)
        .with_reload(false)
}

/// Poll `check` every 20ms until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Strip ANSI colour sequences from console output.
pub fn plain(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for c in chars.by_ref() {
                if c == 'm' {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
