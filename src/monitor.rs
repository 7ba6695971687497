//! Liveness probing, crash persistence, and target restart.
//!
//! Owns exactly the state the reference `Monitor` class owns: a crash
//! counter and the configuration needed to probe liveness, save a crash,
//! and wait for the target to come back after a restart. Everything here
//! runs on the fuzz loop's single thread; there is no concurrent access to
//! guard against.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    thread,
    time::Duration,
};

use chrono::Local;
use tracing::{info, warn};

/// Errors produced by [`Monitor`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An HTTP client for the liveness probe could not be constructed.
    #[error("failed to construct http client: {0}")]
    Client(#[source] reqwest::Error),
    /// The crash directory could not be created.
    #[error("failed to create crash directory {0}: {1}")]
    CreateDir(String, #[source] std::io::Error),
    /// A crash file could not be written.
    #[error("failed to write crash file {0}: {1}")]
    WriteCrash(String, #[source] std::io::Error),
}

/// The HTTP GET timeout for the liveness probe, per spec §4.8/§6.
const ALIVE_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracks target liveness and persists crash-triggering requests.
#[derive(Debug)]
pub struct Monitor {
    alive_url: Option<String>,
    crash_dir: PathBuf,
    restart_cmd: Option<String>,
    restart_delay: Duration,
    client: reqwest::blocking::Client,
    /// Number of crashes detected so far this run; also used as the
    /// ordinal in saved crash file names.
    pub crashes: u64,
}

impl Monitor {
    /// Creates a monitor. Does not create `crash_dir` yet; call
    /// [`create_crash_dir`](Self::create_crash_dir) before fuzzing starts.
    pub fn new(
        alive_url: Option<String>,
        crash_dir: impl Into<PathBuf>,
        restart_cmd: Option<String>,
        restart_delay: Duration,
    ) -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(Error::Client)?;
        Ok(Self {
            alive_url,
            crash_dir: crash_dir.into(),
            restart_cmd,
            restart_delay,
            client,
            crashes: 0,
        })
    }

    /// Creates the crash directory (and any missing parents) if it does
    /// not already exist.
    pub fn create_crash_dir(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.crash_dir)
            .map_err(|e| Error::CreateDir(self.crash_dir.display().to_string(), e))
    }

    /// Whether the target is currently alive. Always true if no alive URL
    /// was configured; otherwise true iff a GET to it succeeds within
    /// [`ALIVE_PROBE_TIMEOUT`].
    #[must_use]
    pub fn check_alive(&self) -> bool {
        let Some(url) = &self.alive_url else {
            return true;
        };

        match self.client.get(url).timeout(ALIVE_PROBE_TIMEOUT).send() {
            Ok(_) => true,
            Err(err) => {
                warn!("target at alive url ({url}) does not respond: {err}");
                false
            }
        }
    }

    /// Saves `request` under the crash directory, runs the restart command
    /// (if any), and blocks until the target reports alive again.
    pub fn handle_crash(
        &mut self,
        generator_name: &str,
        strategy: &str,
        request: &[u8],
    ) -> Result<(), Error> {
        self.crashes += 1;
        let path = self.crash_path(generator_name, strategy);

        info!(path = %path.display(), "saving crash");
        fs::write(&path, request).map_err(|e| Error::WriteCrash(path.display().to_string(), e))?;

        if let Some(cmd) = &self.restart_cmd {
            run_restart_command(cmd);
        }

        while !self.check_alive() {
            thread::sleep(self.restart_delay);
        }
        Ok(())
    }

    fn crash_path(&self, generator_name: &str, strategy: &str) -> PathBuf {
        let timestamp = Local::now().format("%H_%M_%S_%d_%m_%Y");
        let filename = format!("{generator_name}_{strategy}_{}_at_{timestamp}", self.crashes);
        self.crash_dir.join(filename)
    }
}

/// Runs the restart command to completion, ignoring its exit status: the
/// liveness-probe loop is what actually decides whether to keep waiting.
fn run_restart_command(cmd: &str) {
    let mut parts = cmd.split_whitespace();
    let Some(program) = parts.next() else {
        return;
    };

    match Command::new(program).args(parts).status() {
        Ok(status) if !status.success() => {
            warn!("restart command `{cmd}` exited with {status}");
        }
        Ok(_) => {}
        Err(err) => warn!("failed to run restart command `{cmd}`: {err}"),
    }
}

/// Whether `path` exists and is a directory, used by tests that want to
/// assert [`Monitor::create_crash_dir`] actually created it.
#[cfg(test)]
fn is_dir(path: &Path) -> bool {
    path.is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_crash_dir_creates_missing_nested_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let crash_dir = tmp.path().join("nested").join("crashes");
        let monitor = Monitor::new(None, &crash_dir, None, Duration::from_secs(1)).unwrap();

        assert!(!is_dir(&crash_dir));
        monitor.create_crash_dir().unwrap();
        assert!(is_dir(&crash_dir));
    }

    #[test]
    fn no_alive_url_is_always_alive() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let monitor = Monitor::new(None, tmp.path(), None, Duration::from_secs(1)).unwrap();
        assert!(monitor.check_alive());
    }

    #[test]
    fn handle_crash_writes_file_with_expected_name_and_contents() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut monitor = Monitor::new(None, tmp.path(), None, Duration::from_millis(1)).unwrap();
        monitor.create_crash_dir().unwrap();

        monitor
            .handle_crash("esp", "injection", b"the triggering request")
            .unwrap();

        let entries: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries.len(), 1);
        let name = &entries[0];
        assert!(name.starts_with("esp_injection_1_at_"));

        let contents = fs::read(tmp.path().join(name)).unwrap();
        assert_eq!(contents, b"the triggering request");
        assert_eq!(monitor.crashes, 1);
    }
}
