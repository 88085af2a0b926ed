mod events;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prox_core::{ChannelNamer, Reactor, export_json, import_json};
use prox_link::{
    Config, ConfiguredSource, Driver, JsonLines, StaticTokenSource, TokenSource, Transport,
};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "prox", about = "Proximity channel grouping engine")]
struct Cli {
    /// Config file (default: $PROX_CONFIG, $PROX_HOME/prox.toml, ~/.prox/prox.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    /// Seed channel naming for reproducible runs
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read contact events from stdin, write effects to stdout (JSON lines)
    Serve {
        /// Restore grouping state from a snapshot before reading events
        #[arg(long)]
        restore: Option<PathBuf>,

        /// Write a snapshot here when input ends
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Run a scenario file of contact events
    Replay {
        /// JSON-lines event file
        file: PathBuf,

        /// Restore grouping state from a snapshot first
        #[arg(long)]
        restore: Option<PathBuf>,

        /// Write the final snapshot to this path
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Use static tokens instead of the configured token source
        #[arg(long)]
        offline: bool,
    },

    /// Print the effective configuration
    Config,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Serve { restore, snapshot } => {
            cmd_serve(&cli, restore.as_deref(), snapshot.as_deref()).await
        }
        Commands::Replay {
            file,
            restore,
            snapshot,
            offline,
        } => cmd_replay(&cli, file, restore.as_deref(), snapshot.as_deref(), *offline).await,
        Commands::Config => cmd_config(&cli),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    Config::load(cli.config.as_deref()).context("failed to load config")
}

fn build_namer(config: &Config, seed: Option<u64>) -> ChannelNamer {
    let strategy = config.naming.strategy();
    match seed {
        Some(seed) => ChannelNamer::seeded(strategy, seed),
        None => ChannelNamer::new(strategy),
    }
}

/// Fresh reactor, or one rebuilt from a snapshot file.
fn build_reactor(cli: &Cli, config: &Config, restore: Option<&Path>) -> Result<Reactor> {
    let namer = build_namer(config, cli.seed);
    let Some(path) = restore else {
        return Ok(Reactor::new(namer));
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let reactor = import_json(&json, namer)
        .with_context(|| format!("failed to restore {}", path.display()))?;
    tracing::info!(
        entities = reactor.entity_count(),
        channels = reactor.channel_count(),
        "restored snapshot from {}",
        path.display()
    );
    Ok(reactor)
}

fn write_snapshot(reactor: &Reactor, path: &Path) -> Result<()> {
    let json = export_json(reactor).context("failed to serialize snapshot")?;
    std::fs::write(path, &json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("wrote snapshot to {}", path.display());
    Ok(())
}

async fn cmd_serve(cli: &Cli, restore: Option<&Path>, snapshot: Option<&Path>) -> Result<()> {
    let config = load_config(cli)?;
    let reactor = build_reactor(cli, &config, restore)?;
    let source =
        ConfiguredSource::from_config(&config.token).context("failed to build token client")?;

    let mut driver = Driver::new(reactor, source, JsonLines::new(std::io::stdout()));
    if restore.is_some() {
        driver.refresh_tokens().context("failed to request tokens")?;
    }

    let (tx, rx) = mpsc::channel(256);
    let _stdin = events::spawn_stdin_reader(tx);
    let shutdown = async {
        // Without a signal handler the session only ends at EOF.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tracing::info!("serving");
    let (reactor, _) = driver.run(rx, shutdown).await.context("driver failed")?;
    tracing::info!(
        entities = reactor.entity_count(),
        channels = reactor.channel_count(),
        "session ended"
    );

    if let Some(path) = snapshot {
        write_snapshot(&reactor, path)?;
    }
    Ok(())
}

async fn cmd_replay(
    cli: &Cli,
    file: &Path,
    restore: Option<&Path>,
    snapshot: Option<&Path>,
    offline: bool,
) -> Result<()> {
    let config = load_config(cli)?;
    let reactor = build_reactor(cli, &config, restore)?;
    let script = events::read_script(file)?;
    let out = JsonLines::new(std::io::stdout());

    let reactor = if offline {
        let source = StaticTokenSource::new(config.token.static_prefix.clone());
        replay(Driver::new(reactor, source, out), &script, restore.is_some()).await?
    } else {
        let source =
            ConfiguredSource::from_config(&config.token).context("failed to build token client")?;
        replay(Driver::new(reactor, source, out), &script, restore.is_some()).await?
    };

    eprintln!(
        "replayed {} events: entities={}, channels={}, contacts={}",
        script.len(),
        reactor.entity_count(),
        reactor.channel_count(),
        reactor.edge_count()
    );
    if let Some(path) = snapshot {
        write_snapshot(&reactor, path)?;
    }
    Ok(())
}

/// Apply events one at a time, letting each event's fetches resolve before
/// the next, so output order is reproducible.
async fn replay<S: TokenSource, T: Transport>(
    mut driver: Driver<S, T>,
    script: &[prox_link::ContactEvent],
    refresh: bool,
) -> Result<Reactor> {
    if refresh {
        driver.refresh_tokens().context("failed to request tokens")?;
        driver.settle().await.context("token refresh failed")?;
    }
    for event in script {
        driver
            .handle_event(event)
            .with_context(|| format!("failed to apply {event:?}"))?;
        driver.settle().await.context("token fetch failed")?;
    }
    Ok(driver.into_parts().0)
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let path = cli
        .config
        .clone()
        .unwrap_or_else(prox_link::config::default_config_path);
    println!("# source: {}", path.display());
    let toml = config.to_toml_string().context("failed to render config")?;
    print!("{toml}");
    Ok(())
}
