//! Common utilities for CLI E2E tests.

use std::process::Command;

use tempfile::TempDir;

/// A `pomolog` invocation rooted in its own throwaway data directory.
pub struct Cli {
    pub home: TempDir,
}

impl Cli {
    pub fn new() -> Self {
        Self {
            home: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Invoke a CLI command and return (stdout, stderr, code).
    pub fn run(&self, args: &[&str]) -> (String, String, i32) {
        let output = Command::new(env!("CARGO_BIN_EXE_pomolog"))
            .args(args)
            .env("POMOLOG_HOME", self.home.path())
            .env_remove("POMOLOG_LOG")
            .output()
            .expect("Failed to execute CLI command");

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let code = output.status.code().unwrap_or(-1);

        (stdout, stderr, code)
    }

    /// Invoke a CLI command and expect success.
    pub fn success(&self, args: &[&str]) -> String {
        let (stdout, stderr, code) = self.run(args);
        assert_eq!(code, 0, "CLI command {args:?} failed: {stderr}");
        stdout
    }

    /// Invoke a CLI command and expect failure; returns stderr.
    pub fn failure(&self, args: &[&str]) -> String {
        let (_, stderr, code) = self.run(args);
        assert_ne!(code, 0, "CLI command unexpectedly succeeded: {args:?}");
        stderr
    }

    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let stdout = self.success(args);
        serde_json::from_str(&stdout).expect("Failed to parse JSON output")
    }

    pub fn read(&self, file: &str) -> String {
        std::fs::read_to_string(self.home.path().join(file)).expect("Failed to read data file")
    }
}
