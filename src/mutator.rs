//! The external mutator adapter.
//!
//! Wraps an external command-line byte mutator (conventionally Radamsa) as
//! a pure `bytes -> bytes` function backed by a child process. No timeout
//! is placed on the child: `DESIGN.md` records this as a known sharp
//! corner rather than something to silently patch over.

use std::{
    io::{Read, Write},
    process::{Command, Stdio},
};

use tracing::warn;

/// Errors produced invoking the external mutator.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The child process could not be spawned, or its stdin/stdout pipes
    /// could not be used.
    #[error("failed to run external mutator: {0}")]
    Io(#[from] std::io::Error),
}

/// Invokes an external mutator binary, resolved once at construction time.
#[derive(Debug, Clone)]
pub struct ExternalMutator {
    /// `Some(path)` when the binary was found on `PATH` (or was given as an
    /// explicit path that exists); `None` means every call degrades to the
    /// identity function.
    binary: Option<String>,
}

impl ExternalMutator {
    /// Default binary name searched for on `PATH` when no explicit path is
    /// configured.
    pub const DEFAULT_BINARY: &'static str = "radamsa";

    /// Resolve `path` (or [`Self::DEFAULT_BINARY`] if empty) against `PATH`.
    /// If resolution fails, the mutator is disabled for the session and a
    /// warning is logged.
    #[must_use]
    pub fn new(path: &str) -> Self {
        let candidate = if path.is_empty() {
            Self::DEFAULT_BINARY
        } else {
            path
        };

        match resolve_on_path(candidate) {
            Some(resolved) => Self {
                binary: Some(resolved),
            },
            None => {
                warn!("external mutator '{candidate}' is not installed; this strategy will pass requests through unmodified");
                Self { binary: None }
            }
        }
    }

    /// Whether this mutator resolved to a runnable binary.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.binary.is_some()
    }

    /// Run `input` through the external mutator's stdin and return its
    /// stdout. Returns `input` unchanged (identity) if the mutator is
    /// disabled. The child's stderr is discarded.
    pub fn fuzz(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let Some(binary) = &self.binary else {
            return Ok(input.to_vec());
        };

        let mut child = Command::new(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        {
            let mut stdin = child.stdin.take().expect("piped stdin");
            stdin.write_all(input)?;
        }

        let mut output = Vec::new();
        child
            .stdout
            .as_mut()
            .expect("piped stdout")
            .read_to_end(&mut output)?;
        child.wait()?;

        Ok(output)
    }
}

/// Search `PATH` for an executable named `name`, mirroring Python's
/// `shutil.which` used in `fuzzers/radamsa.py`. Also accepts `name` as an
/// already-qualified path.
fn resolve_on_path(name: &str) -> Option<String> {
    let candidate = std::path::Path::new(name);
    if candidate.is_absolute() || name.contains(std::path::MAIN_SEPARATOR) {
        return is_executable_file(candidate).then(|| name.to_string());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let full = dir.join(name);
        is_executable_file(&full).then(|| full.to_string_lossy().into_owned())
    })
}

fn is_executable_file(path: &std::path::Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_disables_and_becomes_identity() {
        let mutator = ExternalMutator::new("definitely-not-a-real-binary-1234");
        assert!(!mutator.is_enabled());
        let out = mutator.fuzz(b"hello").expect("identity fuzz never fails");
        assert_eq!(out, b"hello");
    }

    #[test]
    fn cat_binary_pipes_bytes_through_unmodified() {
        // `cat` is POSIX-standard and available in any sandboxed CI image
        // this crate is built in; it is a faithful stand-in for Radamsa's
        // stdin-to-stdout contract.
        let mutator = ExternalMutator::new("cat");
        if !mutator.is_enabled() {
            return; // best-effort: environments without `cat` skip silently
        }
        let out = mutator.fuzz(b"structurally valid bytes").expect("fuzz");
        assert_eq!(out, b"structurally valid bytes");
    }
}
