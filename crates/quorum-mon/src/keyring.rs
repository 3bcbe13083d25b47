//! Key generation through `ceph-authtool`
//!
//! The tool writes a keyring file rather than printing the key, so every
//! generation runs inside a private temporary directory that is removed when
//! the call returns, fails, or is cancelled. The key is then taken from the
//! keyring's `key = <secret>` line.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{ADMIN_USERNAME, MON_USERNAME};
use quorum_common::{Error, Result};

/// Default keyring tool
pub const AUTHTOOL: &str = "ceph-authtool";

/// A capability granted to a generated key, e.g. `mon` / `allow *`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCap {
    /// Daemon type the capability applies to
    pub service: &'static str,
    /// Access specification
    pub access: &'static str,
}

/// Capabilities of the monitor key
pub const MON_CAPS: &[KeyCap] = &[KeyCap {
    service: "mon",
    access: "allow *",
}];

/// Capabilities of the admin key
pub const ADMIN_CAPS: &[KeyCap] = &[
    KeyCap {
        service: "mon",
        access: "allow *",
    },
    KeyCap {
        service: "osd",
        access: "allow *",
    },
    KeyCap {
        service: "mgr",
        access: "allow *",
    },
    KeyCap {
        service: "mds",
        access: "allow",
    },
];

/// Command output for testability
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Whether command succeeded
    pub success: bool,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Trait for executing external commands (allows mocking in tests)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs commands as child processes
///
/// The child is killed if the returned future is dropped before it exits.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::exec(program, format!("failed to execute: {}", e)))?;
        Ok(CommandOutput::from(output))
    }
}

/// Produces new cluster keys
#[async_trait]
pub trait KeyringGenerator: Send + Sync {
    /// Generate a key for `entity` with the given capabilities
    async fn generate(&self, entity: &str, caps: &[KeyCap]) -> Result<String>;
}

/// Generates keys by running `ceph-authtool --create-keyring`
pub struct AuthtoolKeyringGenerator<R: CommandRunner = TokioCommandRunner> {
    runner: R,
    program: String,
    work_dir: Option<PathBuf>,
}

impl AuthtoolKeyringGenerator<TokioCommandRunner> {
    /// Create a generator running the default tool as a child process
    pub fn new() -> Self {
        Self::with_runner(TokioCommandRunner)
    }
}

impl Default for AuthtoolKeyringGenerator<TokioCommandRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> AuthtoolKeyringGenerator<R> {
    /// Create a generator with a custom command runner
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            program: AUTHTOOL.to_string(),
            work_dir: None,
        }
    }

    /// Use a different tool binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Create temporary keyrings under `dir` instead of the system temp dir
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    fn temp_dir(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("keyring-");
        let dir = match &self.work_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.map_err(|e| Error::exec(&self.program, format!("failed to create temp dir: {}", e)))
    }
}

#[async_trait]
impl<R: CommandRunner> KeyringGenerator for AuthtoolKeyringGenerator<R> {
    async fn generate(&self, entity: &str, caps: &[KeyCap]) -> Result<String> {
        // Dropped on every exit path, including cancellation at an await point
        let dir = self.temp_dir()?;
        let path = dir.path().join(keyring_file_name(entity));
        let args = authtool_args(&path, entity, caps);

        debug!(entity = %entity, program = %self.program, "Generating key");

        let output = self.runner.run(&self.program, &args).await?;
        if !output.success {
            return Err(Error::exec(
                &self.program,
                format!("exited unsuccessfully: {}", output.stderr.trim()),
            ));
        }

        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::exec(
                &self.program,
                format!("keyring {} not readable: {}", path.display(), e),
            )
        })?;

        extract_key(&contents)
    }
}

/// File name for an entity's keyring (`mon.` -> `mon.keyring`)
fn keyring_file_name(entity: &str) -> String {
    format!("{}.keyring", entity).replacen("..", ".", 1)
}

/// Arguments requesting a new keyring with a generated key
fn authtool_args(path: &Path, entity: &str, caps: &[KeyCap]) -> Vec<String> {
    let mut args = vec![
        "--create-keyring".to_string(),
        path.display().to_string(),
        "--gen-key".to_string(),
        "-n".to_string(),
        entity.to_string(),
    ];
    for cap in caps {
        args.push("--cap".to_string());
        args.push(cap.service.to_string());
        args.push(cap.access.to_string());
    }
    args
}

/// Extract the secret from keyring contents
///
/// Exactly one line must read `key = <secret>`.
pub fn extract_key(contents: &str) -> Result<String> {
    let mut keys = contents.lines().filter_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            ["key", "=", secret] => Some(Ok(secret.to_string())),
            ["key", ..] => Some(Err(())),
            _ => None,
        }
    });

    match (keys.next(), keys.next()) {
        (Some(Ok(secret)), None) => Ok(secret),
        (None, _) => Err(Error::parse("keyring contains no key line")),
        (Some(Err(())), None) => Err(Error::parse("malformed key line in keyring")),
        (Some(_), Some(_)) => Err(Error::parse("keyring contains more than one key line")),
    }
}

/// Generate the monitor key
pub async fn generate_mon_key(generator: &dyn KeyringGenerator) -> Result<String> {
    generator.generate(MON_USERNAME, MON_CAPS).await
}

/// Generate the admin key
pub async fn generate_admin_key(generator: &dyn KeyringGenerator) -> Result<String> {
    generator.generate(ADMIN_USERNAME, ADMIN_CAPS).await
}
