//! Capshare CLI - share captures to the configured destinations.
//!
//! Settings, history and destination configuration live as JSON files under
//! the user's config directory.

mod store;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use capshare_common::{Dimensions, Error, ErrorReport, ErrorSink, ShareFile, ShareOptions};
use capshare_destinations::{
    delete_history_entry, DeleteTarget, DestinationKind, DestinationRegistry, HistoryEntry,
    LocalFileSource, OAuthCallbackRouter, PanelAction, PanelItem, SettingsStore, UrlOpener,
};

use store::JsonFileSettingsStore;

#[derive(Parser)]
#[command(name = "capshare")]
#[command(about = "Capshare - share screenshots to online destinations")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding settings, history and config (default: config dir).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List destinations ready to share to.
    Destinations {
        /// Include destinations that still need setup.
        #[arg(short, long)]
        all: bool,
    },

    /// Log in to a destination through the browser.
    Login {
        /// Destination id, e.g. "dropbox".
        destination: DestinationKind,
    },

    /// Forget a destination's credentials.
    Logout { destination: DestinationKind },

    /// Set or clear a destination setting, e.g. the ImgBB "apiKey".
    Set {
        destination: DestinationKind,
        key: String,
        /// New value; omit to clear the setting.
        value: Option<String>,
    },

    /// Upload a file and print its link.
    Share {
        destination: DestinationKind,
        file: PathBuf,

        #[arg(long, default_value_t = 0)]
        width: u32,

        #[arg(long, default_value_t = 0)]
        height: u32,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show shared files.
    History,

    /// Delete a history entry locally, remotely or both.
    Delete {
        /// Index shown by `history`.
        index: usize,

        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Args)]
#[group(multiple = false)]
struct TargetArgs {
    /// Only delete the local file.
    #[arg(long)]
    local: bool,

    /// Only delete the uploaded copy.
    #[arg(long)]
    remote: bool,

    /// Delete both copies (default).
    #[arg(long)]
    both: bool,
}

impl TargetArgs {
    fn target(&self) -> DeleteTarget {
        if self.local {
            DeleteTarget::Local
        } else if self.remote {
            DeleteTarget::Remote
        } else {
            DeleteTarget::Both
        }
    }
}

/// Opens URLs in the system browser.
struct BrowserOpener;

#[async_trait]
impl UrlOpener for BrowserOpener {
    async fn open_url(&self, url: &Url) -> capshare_common::Result<()> {
        info!("Opening {}", url);
        open::that(url.as_str())
            .map_err(|e| Error::user("Failed to open the browser").with_cause(e))
    }
}

/// Prints errors the way the application's error dialog would.
struct ConsoleErrorSink;

impl ErrorSink for ConsoleErrorSink {
    fn handle_error(&self, error: &Error) {
        eprintln!("{}", ErrorReport::from_error(error));
    }
}

/// Shared state of one CLI invocation.
struct Shell {
    dir: PathBuf,
    registry: Arc<DestinationRegistry>,
    store: Arc<JsonFileSettingsStore>,
}

impl Shell {
    fn open(dir: PathBuf) -> Result<Self> {
        let config = store::load_config(&dir)?;
        let registry = DestinationRegistry::new(&config, Arc::new(LocalFileSource))
            .context("Failed to set up destinations")?;
        let store = JsonFileSettingsStore::open(&dir)?;
        registry.seed_defaults(&store);

        Ok(Self {
            dir,
            registry: Arc::new(registry),
            store: Arc::new(store),
        })
    }

    fn redirect_base(&self) -> Result<String> {
        Ok(store::load_config(&self.dir)?.redirect_base)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let shell = Shell::open(cli.data_dir.unwrap_or_else(store::data_dir))?;

    let result = match cli.command {
        Commands::Destinations { all } => cmd_destinations(&shell, all),

        Commands::Login { destination } => cmd_login(&shell, destination).await,

        Commands::Logout { destination } => {
            shell.registry.logout(destination, shell.store.as_ref()).await;
            println!("Logged out of {}", destination);
            Ok(())
        }

        Commands::Set {
            destination,
            key,
            value,
        } => cmd_set(&shell, destination, key, value).await,

        Commands::Share {
            destination,
            file,
            width,
            height,
            title,
            description,
        } => {
            let options = ShareOptions { title, description };
            cmd_share(&shell, destination, &file, Dimensions::new(width, height), options).await
        }

        Commands::History => cmd_history(&shell),

        Commands::Delete { index, target } => cmd_delete(&shell, index, target.target()).await,
    };

    // Tokens refreshed or rotated during the command may not have been saved.
    if let Some(failure) = shell.store.take_write_failure() {
        ConsoleErrorSink.handle_error(
            &Error::user("Settings could not be saved; you may need to log in again")
                .with_cause(std::io::Error::other(failure)),
        );
    }

    result
}

/// List destinations with their account status.
fn cmd_destinations(shell: &Shell, all: bool) -> Result<()> {
    let kinds = shell.registry.list_available(all, shell.store.as_ref());
    if kinds.is_empty() {
        println!("No destination is ready. Use `capshare login` or `capshare set` first.");
        return Ok(());
    }

    for kind in kinds {
        let destination = shell.registry.get(kind);
        let settings = shell.store.get(&kind.id());
        let ready = if destination.is_available(&settings) {
            "ready"
        } else {
            "needs setup"
        };

        let status = destination
            .settings_panel(&settings)
            .and_then(|panel| {
                panel.items.into_iter().find_map(|item| match item {
                    PanelItem::Status(status) => Some(status),
                    _ => None,
                })
            })
            .unwrap_or_default();

        println!(
            "  {:<10} {:<10} {:<12} {}",
            kind.as_str(),
            destination.configuration().name,
            ready,
            status
        );
    }

    Ok(())
}

/// Run the browser login and complete it from the pasted redirect.
async fn cmd_login(shell: &Shell, kind: DestinationKind) -> Result<()> {
    let router = OAuthCallbackRouter::new(
        shell.registry.clone(),
        shell.store.clone(),
        Arc::new(ConsoleErrorSink),
        shell.redirect_base()?,
    );

    shell
        .registry
        .apply_panel_action(kind, PanelAction::Login, shell.store.as_ref(), &BrowserOpener)
        .await
        .with_context(|| format!("Failed to start {} login", kind))?;

    println!("Finish logging in in the browser, then paste the URL you were redirected to:");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read redirect URL")?;

    match router.deliver(&line).await {
        Some(completed) => {
            println!("Logged in to {}", completed);
            Ok(())
        }
        None => anyhow::bail!("Login to {} did not complete", kind),
    }
}

async fn cmd_set(
    shell: &Shell,
    kind: DestinationKind,
    key: String,
    value: Option<String>,
) -> Result<()> {
    let cleared = value.is_none();
    shell
        .registry
        .apply_panel_action(
            kind,
            PanelAction::SetField { key: key.clone(), value },
            shell.store.as_ref(),
            &BrowserOpener,
        )
        .await?;

    if cleared {
        println!("Cleared {}.{}", kind, key);
    } else {
        println!("Set {}.{}", kind, key);
    }
    Ok(())
}

/// Share a file and record it in history.
async fn cmd_share(
    shell: &Shell,
    kind: DestinationKind,
    path: &Path,
    dimensions: Dimensions,
    options: ShareOptions,
) -> Result<()> {
    let path = tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("File not found: {}", path.display()))?;
    let metadata = tokio::fs::metadata(&path)
        .await
        .context("Failed to read file metadata")?;

    let file = ShareFile {
        path,
        size: metadata.len(),
        dimensions,
    };

    info!(destination = %kind, "Sharing {}", file.path.display());
    let share = match shell
        .registry
        .share(kind, &file, &options, shell.store.as_ref())
        .await
    {
        Ok(share) => share,
        Err(e) => {
            ConsoleErrorSink.handle_error(&e);
            anyhow::bail!("Sharing to {} failed", kind);
        }
    };

    let mut history = store::load_history(&shell.dir)?;
    history.push(HistoryEntry::new(share.clone()));
    store::save_history(&shell.dir, &history)?;

    println!("{}", share.link);
    if share.anon {
        println!("(uploaded anonymously)");
    }
    Ok(())
}

fn cmd_history(shell: &Shell) -> Result<()> {
    let history = store::load_history(&shell.dir)?;
    if history.is_empty() {
        println!("Nothing shared yet.");
        return Ok(());
    }

    for (index, entry) in history.iter().enumerate() {
        let mut flags = Vec::new();
        if entry.local_deleted {
            flags.push("local deleted");
        }
        if entry.remote_deleted {
            flags.push("remote deleted");
        }

        println!(
            "[{}] {} {:<9} {}",
            index,
            entry.share.date.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            entry.share.destination_id.as_str(),
            entry.share.link
        );
        println!("      {}", entry.share.path.display());
        if !flags.is_empty() {
            println!("      ({})", flags.join(", "));
        }
    }

    Ok(())
}

/// Delete a history entry, keeping whatever progress was made on failure.
async fn cmd_delete(shell: &Shell, index: usize, target: DeleteTarget) -> Result<()> {
    let mut history = store::load_history(&shell.dir)?;
    let entry = history
        .get_mut(index)
        .with_context(|| format!("No history entry {}", index))?;

    let result = delete_history_entry(
        &shell.registry,
        entry,
        target,
        shell.store.as_ref(),
        &BrowserOpener,
    )
    .await;
    store::save_history(&shell.dir, &history)?;

    match result {
        Ok(()) => {
            println!("Deleted entry {}", index);
            Ok(())
        }
        Err(e) => {
            ConsoleErrorSink.handle_error(&e);
            anyhow::bail!("Deleting entry {} failed", index)
        }
    }
}
