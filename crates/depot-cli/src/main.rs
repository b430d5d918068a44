//! Depot CLI - administer hosted, proxy and group repositories

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod context;
mod display;
mod error;
mod exit_codes;

use context::Context;

#[derive(Parser)]
#[command(name = "depot")]
#[command(author = "Depot Contributors")]
#[command(version)]
#[command(about = "Artifact repository manager: proxy caching, groups and cache maintenance", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Repository configuration file
    #[arg(long, global = true, env = "DEPOT_CONFIG")]
    config: Option<PathBuf>,

    /// Local store database
    #[arg(long, global = true, env = "DEPOT_STORE")]
    store: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProxyStateArg {
    /// Allow remote access
    Allow,
    /// Block remote access until allowed again
    Block,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured repositories
    Repos {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Retrieve an item, fetching it from the remote when needed
    Get {
        /// Repository id
        repo: String,

        /// Item path
        path: String,

        /// Write content to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only consult local storage
        #[arg(long, conflicts_with = "remote_only")]
        local_only: bool,

        /// Only consult the remote origin
        #[arg(long)]
        remote_only: bool,

        /// Treat cached content as expired
        #[arg(long)]
        as_expired: bool,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Print item metadata as JSON instead of content
        #[arg(long)]
        json: bool,
    },

    /// List the children of a collection
    List {
        /// Repository id
        repo: String,

        /// Collection path
        #[arg(default_value = "/")]
        path: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Expire cached items so they are revalidated on next request
    ExpireCaches {
        /// Repository id
        repo: String,

        /// Subtree to expire
        #[arg(default_value = "/")]
        path: String,

        /// Only expire paths matching this regex
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Forget cached "not found" answers
    ExpireNfc {
        /// Repository id
        repo: String,

        /// Subtree to expire
        #[arg(default_value = "/")]
        path: String,

        /// Only expire paths matching this regex
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Delete cached items not requested recently
    EvictUnused {
        /// Repository id
        repo: String,

        /// Subtree to evict from
        #[arg(default_value = "/")]
        path: String,

        /// Evict items not requested for this many days
        #[arg(long, default_value_t = 30)]
        days: i64,
    },

    /// Show or change whether a proxy may contact its remote
    ProxyState {
        /// Proxy repository id
        repo: String,

        /// New state
        #[arg(value_enum)]
        state: Option<ProxyStateArg>,

        /// Reason recorded with the change
        #[arg(long)]
        reason: Option<String>,
    },

    /// Show or change group members
    Members {
        /// Group repository id
        group: String,

        /// Replace the member list (comma separated)
        #[arg(long, value_delimiter = ',', conflicts_with_all = ["add", "remove"])]
        set: Option<Vec<String>>,

        /// Append a member
        #[arg(long, conflicts_with = "remove")]
        add: Option<String>,

        /// Remove a member
        #[arg(long)]
        remove: Option<String>,

        /// Show the flattened list of non-group members
        #[arg(long)]
        transitive: bool,
    },

    /// Show the remote status of a proxy
    Status {
        /// Proxy repository id
        repo: String,

        /// Probe the remote now
        #[arg(long)]
        check: bool,
    },
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> error::Result<()> {
    let mut ctx = Context::load(cli.config.as_deref(), cli.store.as_deref())?;

    match cli.command {
        Commands::Repos { json } => commands::repos::run(&ctx, json),
        Commands::Get {
            repo,
            path,
            output,
            local_only,
            remote_only,
            as_expired,
            timeout,
            json,
        } => {
            let options = commands::get::GetOptions {
                local_only,
                remote_only,
                as_expired,
                timeout,
                json,
            };
            commands::get::run(&ctx, &repo, &path, output.as_deref(), options).await
        }
        Commands::List { repo, path, json } => commands::list::run(&ctx, &repo, &path, json).await,
        Commands::ExpireCaches {
            repo,
            path,
            pattern,
        } => commands::maintenance::expire_caches(&ctx, &repo, &path, pattern.as_deref()).await,
        Commands::ExpireNfc {
            repo,
            path,
            pattern,
        } => commands::maintenance::expire_nfc(&ctx, &repo, &path, pattern.as_deref()).await,
        Commands::EvictUnused { repo, path, days } => {
            commands::maintenance::evict_unused(&ctx, &repo, &path, days).await
        }
        Commands::ProxyState {
            repo,
            state,
            reason,
        } => {
            let blocked = state.map(|s| matches!(s, ProxyStateArg::Block));
            commands::proxy::state(&mut ctx, &repo, blocked, reason)
        }
        Commands::Members {
            group,
            set,
            add,
            remove,
            transitive,
        } => {
            let change = match (set, add, remove) {
                (Some(members), _, _) => Some(commands::members::Change::Set(members)),
                (_, Some(member), _) => Some(commands::members::Change::Add(member)),
                (_, _, Some(member)) => Some(commands::members::Change::Remove(member)),
                _ => None,
            };
            commands::members::run(&mut ctx, &group, change, transitive)
        }
        Commands::Status { repo, check } => commands::proxy::status(&ctx, &repo, check).await,
    }
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
