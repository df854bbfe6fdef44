// tests/common/mod.rs
// Shared test utilities for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use errdigest::DigestConfig;
use tempfile::TempDir;

/// A scratch log directory with its own database.
pub struct LogDir {
    dir: TempDir,
}

impl LogDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn log_path(&self) -> PathBuf {
        self.path().join("error.log")
    }

    /// Replace the active log.
    pub fn write_log(&self, content: &str) {
        fs::write(self.log_path(), content).expect("Failed to write error.log");
    }

    pub fn write_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn config(&self) -> DigestConfig {
        DigestConfig::new(self.path())
    }

    /// Files in the directory other than the database and lock.
    pub fn leftover_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.path())
            .expect("Failed to list dir")
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| !n.starts_with("errdigest.sqlite3") && n != "lock-errdigest")
            .collect();
        names.sort();
        names
    }
}

/// One error-log line in the recognised format.
pub fn line(time: &str, severity: &str, message: &str, file: &str, source_line: u32) -> String {
    format!(
        "[2024-01-01 {}] {}: {} in {}:{}\n",
        time, severity, message, file, source_line
    )
}

/// Run the errdigest binary against `dir`, ignoring any config files on the machine.
pub fn run_errdigest(dir: &LogDir, args: &[&str]) -> (String, String, i32) {
    let mut full_args: Vec<&str> = vec!["--ignore-config", "--log-dir"];
    let dir_arg = dir.path().to_str().expect("temp dir path is UTF-8");
    full_args.push(dir_arg);
    full_args.extend_from_slice(args);

    let output = Command::new(env!("CARGO_BIN_EXE_errdigest"))
        .args(&full_args)
        .env_remove("ERRDIGEST_LOG")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute errdigest");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}
