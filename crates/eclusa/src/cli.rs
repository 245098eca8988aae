//! Clap derive structures for the `eclusa` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use eclusa_core::{FaultId, PlcId, TagId, TagType};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// eclusa -- live console for lock controllers
#[derive(Debug, Parser)]
#[command(
    name = "eclusa",
    version,
    about = "Watch faults, tags and PLC status of eclusa lock controllers",
    long_about = "Command-line console for the eclusa SCADA backend.\n\n\
        Snapshots come from the REST API; live views follow the event bus\n\
        and keep reconciling until interrupted.",
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
    /// Plant profile to use
    #[arg(long, short = 'p', env = "ECLUSA_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Backend API URL (overrides profile)
    #[arg(long, short = 'a', env = "ECLUSA_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Event bus URL (skips discovery)
    #[arg(long, env = "ECLUSA_BUS_URL", global = true)]
    pub bus_url: Option<String>,

    /// Bearer token for API and bus
    #[arg(long, env = "ECLUSA_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "ECLUSA_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "ECLUSA_INSECURE", global = true)]
    pub insecure: bool,

    /// HTTP request timeout in seconds (overrides profile)
    #[arg(long, env = "ECLUSA_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

impl OutputFormat {
    /// Format used for repeated renders in watch mode: JSON becomes one
    /// compact document per line.
    pub fn streaming(self) -> Self {
        match self {
            Self::Json => Self::JsonCompact,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List and acknowledge faults
    #[command(alias = "f")]
    Faults(FaultsArgs),

    /// List, read and write controller tags
    #[command(alias = "t")]
    Tags(TagsArgs),

    /// List controllers and their connectivity
    Plcs(PlcsArgs),

    /// Follow live state over the event bus
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Event bus discovery
    Bus(BusArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Faults ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct FaultsArgs {
    #[command(subcommand)]
    pub command: FaultsCommand,
}

#[derive(Debug, Subcommand)]
pub enum FaultsCommand {
    /// List faults (active only unless --all)
    #[command(alias = "ls")]
    List {
        /// Include inactive faults
        #[arg(long)]
        all: bool,
    },

    /// Acknowledge a fault
    Ack {
        /// Fault ID
        id: FaultId,

        /// Wait until the acknowledgement is broadcast on the bus
        #[arg(long)]
        wait: bool,
    },
}

// ── Tags ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TagsArgs {
    #[command(subcommand)]
    pub command: TagsCommand,
}

#[derive(Debug, Subcommand)]
pub enum TagsCommand {
    /// List the tags of a controller
    #[command(alias = "ls")]
    List {
        /// Controller ID
        plc: PlcId,
    },

    /// Read the current value of a tag
    Read {
        /// Tag ID
        tag: TagId,
    },

    /// Write a value to a tag
    Write {
        /// Tag ID
        tag: TagId,

        /// New value
        value: String,

        /// Parse the value as this type (BOOL, INT, WORD, REAL, STRING)
        #[arg(long = "type", short = 't')]
        data_type: Option<TagType>,
    },
}

// ── PLCs ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PlcsArgs {
    #[command(subcommand)]
    pub command: PlcsCommand,
}

#[derive(Debug, Subcommand)]
pub enum PlcsCommand {
    /// List controllers
    #[command(alias = "ls")]
    List,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(subcommand)]
    pub command: WatchCommand,

    /// Stop after this long (e.g. "30s", "5m")
    #[arg(long = "for", value_parser = humantime::parse_duration, global = true)]
    pub duration: Option<Duration>,

    /// Do not reconnect after the bus connection drops
    #[arg(long, global = true)]
    pub no_reconnect: bool,
}

#[derive(Debug, Subcommand)]
pub enum WatchCommand {
    /// Live fault list with acknowledgement notices
    Faults {
        /// Keep inactive faults in the list
        #[arg(long)]
        all: bool,
    },

    /// Live tag values of one controller
    Tags {
        /// Controller ID
        plc: PlcId,
    },

    /// Live connectivity of every controller
    Status,
}

// ── Bus ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct BusArgs {
    #[command(subcommand)]
    pub command: BusCommand,
}

#[derive(Debug, Subcommand)]
pub enum BusCommand {
    /// Show the resolved bus endpoint and subject names
    Info,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or replace a profile and make it the default
    Init {
        /// Backend API URL
        #[arg(long = "url")]
        url: String,

        /// Event bus URL (omit to use discovery)
        #[arg(long)]
        bus: Option<String>,

        /// Environment variable holding the token
        #[arg(long)]
        token_env: Option<String>,
    },

    /// Display current configuration (secrets masked)
    Show,

    /// Print the config file path
    Path,

    /// Set a profile value
    Set {
        /// Profile key (api_url, bus_url, token, token_env, ca_cert, insecure,
        /// timeout, connect_timeout_secs, subjects.<role>)
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },

    /// Store a token for the active profile in the system keyring (read
    /// from stdin)
    SetToken,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
