//! `playurl` CLI - resolve provider references with a provider script

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use playurl::{ContentType, ProviderId, Quality, ResolverConfig};

#[derive(Parser)]
#[command(name = "playurl")]
#[command(about = "Resolve opaque provider media references into playable stream URLs")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: ~/.config/playurl/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a URL through a provider script
    Resolve {
        /// Page URL or provider reference to resolve
        url: String,

        /// Provider script file ('-' reads stdin)
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Provider id or name (see `playurl providers`)
        #[arg(short, long, default_value = "youku")]
        provider: ProviderId,

        /// Channel name or code (live providers)
        #[arg(long)]
        channel: Option<String>,

        /// Quality tier: smooth, standard, high, 720p, 1080p
        #[arg(short, long)]
        quality: Option<Quality>,

        /// Channel category passed to the script
        #[arg(long)]
        tv_type: Option<String>,

        /// Content type: vod or live
        #[arg(long)]
        content_type: Option<ContentType>,

        /// Override the iteration cap
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load a provider script and check its entry point
    Check {
        /// Provider script file ('-' reads stdin)
        script: PathBuf,

        /// Entry point to look for (default from config)
        #[arg(long)]
        entry_point: Option<String>,
    },

    /// List known providers
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => ResolverConfig::load_from(path)?,
        None => ResolverConfig::load()?,
    };

    match cli.command {
        Commands::Resolve {
            url,
            script,
            provider,
            channel,
            quality,
            tv_type,
            content_type,
            max_iterations,
            json,
        } => {
            let options = cmd::resolve::ResolveOptions {
                url,
                script,
                provider,
                channel,
                quality,
                tv_type,
                content_type,
                max_iterations,
                json,
            };
            cmd::resolve::cmd_resolve(config, options).await?;
        }
        Commands::Check {
            script,
            entry_point,
        } => {
            cmd::check::cmd_check(&config, &script, entry_point.as_deref())?;
        }
        Commands::Providers => {
            cmd::providers::cmd_providers();
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays pipeable.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "playurl=warn",
        1 => "playurl=info",
        2 => "playurl=debug",
        _ => "playurl=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
