//! Clap derive structures for the `plcgw` CLI.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use plcgw_core::DataType;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// plcgw -- S7 PLC gateway with an HTTP control API and live data feed
#[derive(Debug, Parser)]
#[command(
    name = "plcgw",
    version,
    about = "Bridge a Siemens S7 PLC to HTTP and WebSocket clients",
    long_about = "Polls configured data-block points from an S7 CPU, serves them over an\n\
        HTTP control API and pushes every sweep to WebSocket subscribers.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "PLCGW_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default)
    #[default]
    Table,
    /// Pretty-printed JSON
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway: HTTP control API plus live feed
    Serve(ServeArgs),

    /// List the configured data points
    #[command(alias = "dp")]
    Points(PointsArgs),

    /// Inspect configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Control API listen address (overrides gateway.api_bind)
    #[arg(long, short = 'b')]
    pub bind: Option<SocketAddr>,

    /// Start in demo mode with synthetic values
    #[arg(long, conflicts_with = "connect")]
    pub demo: bool,

    /// Connect to the configured PLC at startup
    #[arg(long)]
    pub connect: bool,
}

#[derive(Debug, Args)]
pub struct PointsArgs {
    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    pub output: OutputFormat,

    /// Only points of this type (BOOL, INT, REAL, ...)
    #[arg(long = "type", short = 't')]
    pub data_type: Option<DataType>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path in use
    Path,

    /// Print the effective configuration as TOML
    Show,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn demo_and_connect_are_exclusive() {
        let result = Cli::try_parse_from(["plcgw", "serve", "--demo", "--connect"]);
        assert!(result.is_err());
    }

    #[test]
    fn point_type_filter_ignores_case() {
        let cli = Cli::try_parse_from(["plcgw", "points", "--type", "real"]).unwrap();
        let Command::Points(args) = cli.command else {
            panic!("expected points command");
        };
        assert_eq!(args.data_type, Some(DataType::Real));
    }
}
