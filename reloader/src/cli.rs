use std::path::PathBuf;

use clap::Parser;

/// Watch for git file changes and restart a command.
#[derive(Debug, Parser)]
#[command(name = "command-reloader", version, about)]
pub struct Cli {
    /// Seconds between git status polls [default: 1.0]
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<f64>,

    /// Seconds of quiet required after the last change before restarting [default: 0.5]
    #[arg(short, long, value_name = "SECS")]
    pub debounce: Option<f64>,

    /// Wait for localhost:PORT to accept connections after each start
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seconds to wait for readiness before giving up [default: 30]
    #[arg(long, value_name = "SECS")]
    pub ready_timeout: Option<f64>,

    /// Wait for a line of command output matching this regex after each start
    #[arg(long, value_name = "REGEX")]
    pub wait_for_output: Option<String>,

    /// URL to GET once the command is ready
    #[arg(long, value_name = "URL")]
    pub webhook: Option<String>,

    /// Shell command to run once the command is ready
    #[arg(long, value_name = "CMD")]
    pub on_ready: Option<String>,

    /// Take a snapshot as soon as files change on disk instead of waiting for the next poll
    #[arg(long)]
    pub fs_events: bool,

    /// Config file [default: <repo root>/.reloader.toml]
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// The command to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// The positional command joined back into one shell line, if any was given.
    pub fn command_line(&self) -> Option<String> {
        let line = self.command.join(" ");
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["command-reloader"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn command_after_separator_keeps_its_flags() {
        let cli = parse(&["--interval", "2", "--", "python", "main.py", "--reload"]);
        assert_eq!(cli.interval, Some(2.0));
        assert_eq!(cli.command_line().as_deref(), Some("python main.py --reload"));
    }

    #[test]
    fn command_without_separator() {
        let cli = parse(&["-p", "8080", "npm", "run", "dev"]);
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.command_line().as_deref(), Some("npm run dev"));
    }

    #[test]
    fn missing_command_is_none() {
        assert!(parse(&[]).command_line().is_none());
        assert!(parse(&["--"]).command_line().is_none());
    }

    #[test]
    fn all_flags_parse() {
        let cli = parse(&[
            "--debounce",
            "0.25",
            "--ready-timeout",
            "10",
            "--wait-for-output",
            "ready",
            "--webhook",
            "http://localhost:9999/",
            "--on-ready",
            "echo ok",
            "--fs-events",
            "--config",
            "custom.toml",
            "make",
        ]);
        assert_eq!(cli.debounce, Some(0.25));
        assert_eq!(cli.ready_timeout, Some(10.0));
        assert_eq!(cli.wait_for_output.as_deref(), Some("ready"));
        assert_eq!(cli.webhook.as_deref(), Some("http://localhost:9999/"));
        assert_eq!(cli.on_ready.as_deref(), Some("echo ok"));
        assert!(cli.fs_events);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.command, vec!["make"]);
    }
}
