#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

/// A running `attendd` driven over stdin/stdout.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    // Keeps the scratch cwd alive so no stray attendd.toml or .env is read.
    _cwd: TempDir,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let cwd = tempfile::tempdir().expect("scratch cwd");
        let exe = env!("CARGO_BIN_EXE_attendd");
        let mut child = Command::new(exe)
            .current_dir(cwd.path())
            .env_remove("ATTENDD_CONFIG")
            .env_remove("ATTENDD_WORKSPACE")
            .env("ATTENDD_TIMEZONE", "UTC")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn attendd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
            _cwd: cwd,
        }
    }

    /// Spawns and selects `workspace`.
    pub fn with_workspace(workspace: &Path) -> Self {
        let mut sidecar = Self::spawn();
        sidecar.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
            None,
        );
        sidecar
    }

    pub fn call(
        &mut self,
        method: &str,
        params: serde_json::Value,
        session: Option<serde_json::Value>,
    ) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(s) = session {
            payload["session"] = s;
        }
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    /// Calls `method` and returns `result`, failing the test on an error response.
    pub fn ok(
        &mut self,
        method: &str,
        params: serde_json::Value,
        session: Option<serde_json::Value>,
    ) -> serde_json::Value {
        let resp = self.call(method, params, session);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            resp
        );
        resp["result"].clone()
    }

    /// Calls `method` expecting failure and returns the whole error object.
    pub fn fail(
        &mut self,
        method: &str,
        params: serde_json::Value,
        session: Option<serde_json::Value>,
    ) -> serde_json::Value {
        let resp = self.call(method, params, session);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            resp
        );
        resp["error"].clone()
    }

    pub fn add_student(&mut self, name: &str, roll_no: &str) -> String {
        let result = self.ok(
            "students.create",
            json!({ "name": name, "rollNo": roll_no, "class": "8", "section": "A" }),
            Some(teacher()),
        );
        result["studentId"].as_str().expect("studentId").to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn teacher() -> serde_json::Value {
    json!({ "username": "ms.k", "role": "teacher" })
}

pub fn student(username: &str) -> serde_json::Value {
    json!({ "username": username, "role": "student" })
}

pub fn code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}
