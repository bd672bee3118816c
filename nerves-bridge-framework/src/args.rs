//! Command line shared by `nerves-hub` and the bridge binaries.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};

/// Arguments accepted by every Nerves process.
#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Falnet Nerves process (nerves-hub or nerves-bridge-virtual)",
    long_about = "Runs a Falnet Nerves hub or bridge from a JSON5 configuration file."
)]
pub struct BridgeArgs {
    /// JSON5 configuration file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Log level overriding the configuration (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// Parse the process arguments, falling back to `default_config` when
    /// `--config` is absent. Exits with usage on bad input.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        Self::parse_from_with_default(std::env::args_os(), default_config)
    }

    pub fn parse_from_with_default<I, T>(args: I, default_config: &'static str) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from_with_default(args, default_config).unwrap_or_else(|e| e.exit())
    }

    /// Like [`parse_from_with_default`](Self::parse_from_with_default), but
    /// returns the usage error. Help and errors name the invoked binary.
    pub fn try_parse_from_with_default<I, T>(
        args: I,
        default_config: &'static str,
    ) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .try_get_matches_from(args)?;
        Self::from_arg_matches(&matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        let args = BridgeArgs::parse_from_with_default(["nerves-hub"], "hub.json5");
        assert_eq!(args.config, PathBuf::from("hub.json5"));
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_explicit_args() {
        let args = BridgeArgs::parse_from_with_default(
            ["nerves-hub", "--config", "/etc/nerves/hub.json5", "--log-level", "debug"],
            "hub.json5",
        );
        assert_eq!(args.config, PathBuf::from("/etc/nerves/hub.json5"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_usage_names_invoked_binary() {
        let err = BridgeArgs::try_parse_from_with_default(
            ["/usr/bin/nerves-bridge-virtual", "--bogus"],
            "virtual.json5",
        )
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
        assert!(err.to_string().contains("nerves-bridge-virtual"));
    }

    #[test]
    fn test_about_names_both_binaries() {
        let about = BridgeArgs::command().get_about().map(|a| a.to_string()).unwrap_or_default();
        assert!(about.contains("nerves-hub"));
        assert!(about.contains("nerves-bridge-virtual"));
    }
}
