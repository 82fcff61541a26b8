//! cryptmirror - One-way encrypted folder replication
//!
//! Usage:
//!   cryptmirror init                  - Write a default config and identity
//!   cryptmirror keygen <output>       - Generate an identity
//!   cryptmirror sync                  - Run one sync pass
//!   cryptmirror run                   - Sync periodically until interrupted
//!   cryptmirror status                - Show configuration and the root manifest
//!   cryptmirror export-public         - Print or write the public identity

use clap::{Parser, Subcommand};
use cryptmirror::{
    config::Config,
    crypto::{CryptoCodec, EnvelopeCodec, Identity, PublicIdentity},
    manifest::ManifestCodec,
    store::{ContentStore, LocalStore, RetryingStore},
    sync::{Reconciler, SyncDriver, SyncOptions},
    Error, Result,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cryptmirror")]
#[command(author = "cryptmirror Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "One-way encrypted folder replication")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/cryptmirror/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and generate an identity
    Init {
        /// Local directory to mirror
        #[arg(long)]
        local_root: Option<PathBuf>,

        /// Directory backing the content store
        #[arg(long)]
        store_root: Option<PathBuf>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Generate a new identity
    Keygen {
        /// Where to write the secret identity
        output: PathBuf,

        /// Overwrite an existing identity
        #[arg(long)]
        force: bool,
    },

    /// Run a single sync pass
    Sync,

    /// Sync periodically until interrupted
    Run,

    /// Show configuration and the root manifest
    Status,

    /// Export the public part of the configured identity
    ExportPublic {
        /// Output file (stdout if omitted)
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Expand ~ in config path
    let config_path = expand_tilde(&cli.config);

    init_logging(cli.verbose, &config_path);

    // Run the command
    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// `--verbose` wins, then `RUST_LOG`, then the config's logging section
fn init_logging(verbose: bool, config_path: &Path) {
    let logging = Config::load(config_path)
        .map(|c| c.logging)
        .unwrap_or_default();

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let log_file = logging.file.as_ref().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("Cannot open log file {:?}: {}", path, e))
            .ok()
    });

    let result = match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .try_init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("Failed to set up logging: {}", e);
    }
}

fn run_command(command: Commands, config_path: &Path) -> Result<()> {
    match command {
        Commands::Init {
            local_root,
            store_root,
            force,
        } => cmd_init(config_path, local_root, store_root, force),

        Commands::Keygen { output, force } => cmd_keygen(&output, force),

        Commands::Sync => cmd_sync(config_path),

        Commands::Run => cmd_run(config_path),

        Commands::Status => cmd_status(config_path),

        Commands::ExportPublic { output } => cmd_export_public(config_path, output),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| Error::Internal(e.to_string()))
}

/// Public identity file written next to a secret one
fn public_identity_path(identity_file: &Path) -> PathBuf {
    identity_file.with_extension("pub.json")
}

fn write_identity(path: &Path, force: bool) -> Result<Identity> {
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "Identity {:?} already exists (use --force to replace it)",
            path
        )));
    }

    let identity = Identity::generate()?;
    identity.save(path)?;
    identity.public().save(public_identity_path(path))?;
    Ok(identity)
}

fn cmd_init(
    config_path: &Path,
    local_root: Option<PathBuf>,
    store_root: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    info!("Initializing cryptmirror...");

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration {:?} already exists (use --force to replace it)",
            config_path
        )));
    }

    let mut config = Config::default();
    if let Some(root) = local_root {
        config.sync.local_root = root;
    }
    if let Some(root) = store_root {
        config.store.root = root;
    }
    config.apply_env_overrides();
    config.validate()?;

    config.save(config_path)?;
    config.ensure_directories()?;
    std::fs::create_dir_all(&config.sync.local_root)
        .map_err(|e| Error::filesystem(&config.sync.local_root, e))?;

    if config.keys.identity_file.exists() {
        info!("Keeping existing identity {:?}", config.keys.identity_file);
    } else {
        let identity = write_identity(&config.keys.identity_file, false)?;
        info!("Generated identity {}", identity.public().fingerprint());
    }

    info!("Configuration saved to {:?}", config_path);
    info!("Local root: {:?}", config.sync.local_root);
    info!("Store root: {:?}", config.store.root);
    info!("");
    info!("Next steps:");
    info!("  1. Put files under the local root");
    info!("  2. Run 'cryptmirror sync' once, or 'cryptmirror run' to keep syncing");

    Ok(())
}

fn cmd_keygen(output: &Path, force: bool) -> Result<()> {
    let identity = write_identity(output, force)?;
    println!("Identity written to {:?}", output);
    println!("Public identity written to {:?}", public_identity_path(output));
    println!("Fingerprint: {}", identity.public().fingerprint());
    Ok(())
}

/// Wire the store, codecs and reconciler described by the config
fn build_reconciler(config: &Config) -> Result<Reconciler> {
    let local = LocalStore::open(&config.store.root)?;
    let store: Arc<dyn ContentStore> = Arc::new(RetryingStore::from_config(local, &config.store));

    let identity = Arc::new(Identity::load(&config.keys.identity_file)?);
    let own: Arc<dyn CryptoCodec> = Arc::new(EnvelopeCodec::for_self(identity.clone()));
    let options = SyncOptions::from(&config.sync);

    match &config.keys.recipient_file {
        Some(path) => {
            let recipient = PublicIdentity::load(path)?;
            info!("Encrypting files for recipient {}", recipient.fingerprint());
            let files = Arc::new(EnvelopeCodec::new(
                identity.clone(),
                recipient,
                identity.public(),
            ));
            Ok(Reconciler::new(store, files, options).with_manifest_crypto(own))
        }
        None => Ok(Reconciler::new(store, own, options)),
    }
}

fn cmd_sync(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let reconciler = build_reconciler(&config)?;
    let driver = SyncDriver::new(
        reconciler,
        config.sync.local_root.clone(),
        config.remote_root()?,
        config.interval(),
    );

    let outcome = runtime()?.block_on(driver.run_once())?;
    let stats = &outcome.stats;
    println!(
        "Synced {} directories in {:?}: {} uploaded, {} unchanged, {} removed",
        stats.directories_synced,
        outcome.elapsed,
        stats.files_uploaded,
        stats.files_unchanged,
        stats.files_removed + stats.folders_removed,
    );
    for failure in &stats.failures {
        println!("  skipped {:?}: {}", failure.path, failure.error);
    }
    Ok(())
}

fn cmd_run(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let reconciler = build_reconciler(&config)?;
    let cancel = reconciler.cancel_token();
    let driver = SyncDriver::new(
        reconciler,
        config.sync.local_root.clone(),
        config.remote_root()?,
        config.interval(),
    );

    info!(
        "Syncing {:?} every {}s, press Ctrl-C to stop",
        config.sync.local_root, config.sync.interval_secs
    );

    runtime()?.block_on(async {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, finishing current directory");
                    cancel.cancel();
                }
                Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
            }
        });
        driver.run().await;
    });

    Ok(())
}

fn cmd_status(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let remote_root = config.remote_root()?;

    println!("cryptmirror Status");
    println!("==================");
    println!();
    println!("Configuration: {:?}", config_path);
    println!("Local root: {:?}", config.sync.local_root);
    println!("Remote root: {}", remote_root);
    println!("Store root: {:?}", config.store.root);
    println!("Path policy: {:?}", config.sync.path_policy);
    println!("Interval: {}s", config.sync.interval_secs);

    let identity = Arc::new(Identity::load(&config.keys.identity_file)?);
    println!("Identity: {}", identity.public().fingerprint());

    let store: Arc<dyn ContentStore> = Arc::new(LocalStore::open(&config.store.root)?);
    let codec = ManifestCodec::new(store, Arc::new(EnvelopeCodec::for_self(identity)));

    runtime()?.block_on(async {
        match codec.load(&remote_root).await {
            Ok(Some(manifest)) => {
                println!();
                println!("Root manifest: {} files, {} folders", manifest.files.len(), manifest.folders.len());
                for file in &manifest.files {
                    println!(
                        "  {}  {}  {}",
                        file.modified.format("%Y-%m-%d %H:%M:%S"),
                        short_hash(&file.content_hash),
                        file.filename
                    );
                }
                for folder in &manifest.folders {
                    println!("  {}/", folder.name);
                }
            }
            Ok(None) => println!("Root manifest: none (not synced yet)"),
            Err(e) => println!("Root manifest: unreadable - {}", e),
        }
    });

    Ok(())
}

fn cmd_export_public(config_path: &Path, output: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path)?;
    let public = Identity::load(&config.keys.identity_file)?.public();

    match output {
        Some(path) => {
            public.save(&path)?;
            println!("Public identity written to {:?}", path);
        }
        None => println!("{}", serde_json::to_string_pretty(&public)?),
    }
    Ok(())
}

/// Leading characters of a digest for display
fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(12) {
        Some((end, _)) => &hash[..end],
        None => hash,
    }
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
