mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, favorite::FavoriteSubcommand, LinkArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "axis-tool",
    about = "Beamline motor axis console: watch positions, move, stop, and log axes",
    version,
    propagate_version = true
)]
struct Cli {
    /// Directory holding default_axis.yaml (default: auto-detect upward from cwd)
    #[arg(long, global = true, env = "AXIS_TOOL_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Hardware config blob (default: $BLCONFIG/bss/bss.config)
    #[arg(long, global = true, env = "AXIS_TOOL_HARDWARE_CONFIG")]
    hardware_config: Option<PathBuf>,

    /// Controller host, overriding the settings file and the hardware config
    #[arg(long, global = true, env = "AXIS_TOOL_HOST")]
    host: Option<String>,

    /// Controller port, overriding the settings file and the hardware config
    #[arg(long, global = true, env = "AXIS_TOOL_PORT")]
    port: Option<u16>,

    /// Talk to an in-memory simulated controller instead of the network
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List axis groups
    Groups,

    /// Show the axes of one group and their conversion parameters
    Show { group: String },

    /// Poll once and print positions
    Status {
        /// Only poll and print this group
        #[arg(long)]
        group: Option<String>,
    },

    /// Poll continuously and print changes until interrupted
    Watch {
        /// Only print axes of this group
        #[arg(long)]
        group: Option<String>,
        /// Stop after this many poll cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Move an axis to a position in its display unit
    Move {
        axis: String,
        #[arg(allow_hyphen_values = true)]
        value: f64,
        /// Treat VALUE as an offset from the current position
        #[arg(long)]
        relative: bool,
        /// Keep polling until the axis settles
        #[arg(long)]
        wait: bool,
    },

    /// Stop an axis immediately
    Stop { axis: String },

    /// Manage favorite groups
    Favorite {
        #[command(subcommand)]
        subcommand: FavoriteSubcommand,
    },

    /// Record the current positions of a group in today's log
    Log {
        group: String,
        /// Free-form note stored with every entry
        #[arg(long, short = 'm', default_value = "")]
        comment: String,
    },

    /// Query one axis directly and print the raw reading and limit switches
    TestAxis { axis: String },

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Watch { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let link = LinkArgs {
        hardware_config: cli.hardware_config,
        host: cli.host,
        port: cli.port,
        simulate: cli.simulate,
    };

    let result = match cli.command {
        Commands::Groups => cmd::groups::list(&root, &link, cli.json),
        Commands::Show { group } => cmd::groups::show(&root, &link, &group, cli.json),
        Commands::Status { group } => cmd::status::run(&root, &link, group.as_deref(), cli.json),
        Commands::Watch { group, cycles } => {
            cmd::watch::run(&root, &link, group.as_deref(), cycles, cli.json)
        }
        Commands::Move {
            axis,
            value,
            relative,
            wait,
        } => cmd::motion::move_axis(&root, &link, &axis, value, relative, wait, cli.json),
        Commands::Stop { axis } => cmd::motion::stop(&root, &link, &axis, cli.json),
        Commands::Favorite { subcommand } => cmd::favorite::run(&root, &link, subcommand, cli.json),
        Commands::Log { group, comment } => cmd::log::run(&root, &link, &group, &comment, cli.json),
        Commands::TestAxis { axis } => cmd::probe::run(&root, &link, &axis, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, &link, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
