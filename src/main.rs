mod backup;
mod config;
mod dates;
mod db;
mod ipc;
mod model;
mod reconcile;
mod session;
mod stats;
mod store;

use std::io::{self, BufRead, Write};

use config::AttendConfig;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr; stdout carries the IPC responses.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("ATTENDD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let config = match AttendConfig::load_with_dotenv() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("attendd: invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config.log_level);

    let tz = match config.tz() {
        Ok(tz) => tz,
        Err(e) => {
            eprintln!("attendd: invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let auto_open = config.workspace.clone();
    let mut state = ipc::AppState::new(config, tz);
    if let Some(path) = auto_open {
        if let Err(e) = ipc::open_workspace(&mut state, &path) {
            tracing::error!(workspace = %path.to_string_lossy(), "failed to open configured workspace: {e:#}");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!("unparseable request: {e}");
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
