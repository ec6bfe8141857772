mod cli_utils;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{cmd_inspect, cmd_lookup, cmd_networks};

#[derive(Parser)]
#[command(name = "netwalk")]
#[command(
    about = "Enumerate, look up, and inspect MaxMind DB (MMDB) files",
    long_about = "netwalk - Walk the search tree of a MaxMind DB file\n\n\
    Lists every network that carries data, in ascending address order,\n\
    optionally restricted to a CIDR and with each record decoded to JSON.\n\n\
    Examples:\n\
      netwalk networks GeoLite2-Country.mmdb\n\
      netwalk networks GeoLite2-Country.mmdb --within 81.2.69.0/24 --data\n\
      netwalk lookup GeoLite2-Country.mmdb 81.2.69.142\n\
      netwalk inspect GeoLite2-Country.mmdb --json"
)]
#[command(version)]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides this)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read the whole file into memory instead of memory-mapping it
    #[arg(long, global = true)]
    no_mmap: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the networks stored in a database
    Networks {
        /// Path to the MMDB file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Only list networks inside this CIDR (e.g. 10.0.0.0/8)
        #[arg(long, value_name = "CIDR")]
        within: Option<String>,

        /// Output NDJSON, one object per network
        #[arg(long)]
        json: bool,

        /// Decode and include each network's record
        #[arg(long)]
        data: bool,
    },

    /// Look up the record for an IP address
    Lookup {
        /// Path to the MMDB file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// IPv4 or IPv6 address
        #[arg(value_name = "IP")]
        ip: String,

        /// Quiet mode: no output, exit code only (0 = found, 1 = not found)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show database metadata and tree layout
    Inspect {
        /// Path to the MMDB file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();

    let format = fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact();

    // Logs go to stderr so stdout stays machine-readable
    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(format)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mmap = !cli.no_mmap;
    match cli.command {
        Commands::Networks {
            database,
            within,
            json,
            data,
        } => cmd_networks(database, mmap, within, json, data),
        Commands::Lookup {
            database,
            ip,
            quiet,
        } => cmd_lookup(database, mmap, ip, quiet),
        Commands::Inspect { database, json } => cmd_inspect(database, mmap, json),
    }
}
