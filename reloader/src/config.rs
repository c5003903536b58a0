use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::cli::Cli;
use crate::controller::{ControllerSettings, DEFAULT_READY_TIMEOUT};

pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_DEBOUNCE_SECS: f64 = 0.5;

/// Optional per-repository config, read from `<repo root>/.reloader.toml`.
///
/// Every field mirrors a CLI flag; flags given on the command line win.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Command line run through the shell.
    pub command: Option<String>,
    /// Seconds between git status polls.
    pub interval: Option<f64>,
    /// Seconds of quiet required before a restart.
    pub debounce: Option<f64>,
    /// Local port to wait for after each start.
    pub port: Option<u16>,
    /// Seconds to wait for readiness before giving up.
    pub ready_timeout: Option<f64>,
    /// Regex matched against each line of child output.
    pub wait_for_output: Option<String>,
    /// URL fetched once the child is ready.
    pub webhook: Option<String>,
    /// Shell command run once the child is ready.
    pub on_ready: Option<String>,
    /// Snapshot early on filesystem events.
    pub fs_events: Option<bool>,
}

/// Loads the config file at `path`, returning `FileConfig::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Fully resolved, immutable settings for one supervisor run.
#[derive(Debug)]
pub struct Settings {
    pub command: String,
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub port: Option<u16>,
    pub ready_timeout: Duration,
    pub ready_pattern: Option<Regex>,
    pub webhook: Option<String>,
    pub on_ready: Option<String>,
    pub fs_events: bool,
}

impl Settings {
    /// Merges CLI flags over the file config over built-in defaults.
    pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Self> {
        let command = match cli.command_line() {
            Some(command) => command,
            None => match file.command.filter(|c| !c.trim().is_empty()) {
                Some(command) => command,
                None => bail!(
                    "No command specified.\n\
                     Usage: command-reloader [options] -- <command>\n\
                     Example: command-reloader -- python main.py"
                ),
            },
        };

        let poll_interval = seconds(
            "interval",
            cli.interval.or(file.interval).unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        )?;
        if poll_interval.is_zero() {
            bail!("interval must be greater than zero");
        }
        let debounce = seconds(
            "debounce",
            cli.debounce.or(file.debounce).unwrap_or(DEFAULT_DEBOUNCE_SECS),
        )?;
        let ready_timeout = match cli.ready_timeout.or(file.ready_timeout) {
            Some(secs) => seconds("ready-timeout", secs)?,
            None => DEFAULT_READY_TIMEOUT,
        };

        let ready_pattern = cli
            .wait_for_output
            .clone()
            .or(file.wait_for_output)
            .map(|p| Regex::new(&p).with_context(|| format!("Invalid --wait-for-output pattern: {p}")))
            .transpose()?;

        Ok(Self {
            command,
            poll_interval,
            debounce,
            port: cli.port.or(file.port),
            ready_timeout,
            ready_pattern,
            webhook: cli.webhook.clone().or(file.webhook),
            on_ready: cli.on_ready.clone().or(file.on_ready),
            fs_events: cli.fs_events || file.fs_events.unwrap_or(false),
        })
    }

    pub fn controller(&self) -> ControllerSettings {
        ControllerSettings {
            poll_interval: self.poll_interval,
            debounce: self.debounce,
            port: self.port,
            ready_timeout: self.ready_timeout,
            wait_for_output: self.ready_pattern.is_some(),
        }
    }
}

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("{name} must be a non-negative number of seconds, got {secs}"))
}
