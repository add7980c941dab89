//! Versecut CLI - manage transcript projects stored in Google Drive.
//!
//! # Commands
//!
//! - `versecut login`: Exchange an authorization code and remember the session
//! - `versecut list`: List stored projects
//! - `versecut get <id>`: Print a project document
//! - `versecut put <name> <file>`: Store a new project
//! - `versecut update <id> <file>`: Replace a project's content
//! - `versecut delete <id>`: Delete a project
//! - `versecut logout`: End the session
//!
//! # Environment Variables
//!
//! See the [`versecut_client::config`] module for available configuration options.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use versecut_client::auth::{AuthClient, ExchangeRequest};
use versecut_client::config::Config;
use versecut_client::drive::DriveStore;
use versecut_client::error::{PersistenceError, Result as ClientResult};
use versecut_client::retry::Reauthenticator;
use versecut_client::session_file;

/// Versecut - transcript projects in Google Drive.
#[derive(Parser, Debug)]
#[command(name = "versecut")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    VERSECUT_SERVER_URL     Token server URL (required)
    VERSECUT_DRIVE_URL      Drive API URL (default: https://www.googleapis.com)
    VERSECUT_SESSION_ID     Session identifier (overrides the session file)
    VERSECUT_SESSION_FILE   Session file (default: <config dir>/session)

EXAMPLES:
    # Sign in with a code obtained from the browser redirect
    versecut login --code 4/0Ab... --code-verifier dBjftJeZ4CVP... \\
        --redirect-uri http://localhost:5173/callback --remember-me

    # Store and list projects
    versecut put \"Sunday sermon\" sermon.json
    versecut list
")]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange an authorization code for a session.
    ///
    /// The session identifier is kept in the session file for later commands.
    Login {
        /// Authorization code from the provider redirect.
        #[arg(long)]
        code: String,

        /// PKCE code verifier used when requesting the code.
        #[arg(long)]
        code_verifier: String,

        /// Redirect URI used when requesting the code.
        #[arg(long)]
        redirect_uri: String,

        /// OAuth provider name.
        #[arg(long, default_value = "google")]
        provider: String,

        /// Keep the session beyond one day.
        #[arg(long)]
        remember_me: bool,
    },

    /// List stored projects.
    List,

    /// Print a project document.
    Get {
        /// Project file ID.
        id: String,
    },

    /// Store a new project from a JSON file.
    Put {
        /// Project name.
        name: String,

        /// Path to the project JSON.
        file: PathBuf,
    },

    /// Replace a project's content from a JSON file.
    Update {
        /// Project file ID.
        id: String,

        /// Path to the project JSON.
        file: PathBuf,
    },

    /// Delete a project.
    Delete {
        /// Project file ID.
        id: String,
    },

    /// End the session and forget it locally.
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::from_env().context("Failed to load configuration")?;
    debug!(?config, "Configuration loaded");

    match cli.command {
        Command::Login {
            code,
            code_verifier,
            redirect_uri,
            provider,
            remember_me,
        } => {
            let request = ExchangeRequest {
                code,
                code_verifier,
                redirect_uri,
                provider,
                remember_me,
            };
            run_login(&config, &request).await
        }
        Command::Logout => run_logout(&config).await,
        Command::List => {
            let store = open_store(&config)?;
            let projects = store.list_projects().await.map_err(storage_error)?;
            if projects.is_empty() {
                println!("No projects.");
            }
            for project in projects {
                let modified = project
                    .modified_time
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{}\t{}\t{}", project.id, modified, project.name);
            }
            Ok(())
        }
        Command::Get { id } => {
            let store = open_store(&config)?;
            let project = store.load_project(&id).await.map_err(storage_error)?;
            println!("{}", serde_json::to_string_pretty(&project)?);
            Ok(())
        }
        Command::Put { name, file } => {
            let project = read_project(&file)
                .with_context(|| format!("Failed to load project from {}", file.display()))?;
            let store = open_store(&config)?;
            let created = store
                .create_project(&name, &project)
                .await
                .map_err(storage_error)?;
            println!("{}", created.id);
            Ok(())
        }
        Command::Update { id, file } => {
            let project = read_project(&file)
                .with_context(|| format!("Failed to load project from {}", file.display()))?;
            let store = open_store(&config)?;
            store
                .save_project(&id, &project)
                .await
                .map_err(storage_error)?;
            Ok(())
        }
        Command::Delete { id } => {
            let store = open_store(&config)?;
            store.delete_project(&id).await.map_err(storage_error)?;
            Ok(())
        }
    }
}

/// Exchanges the authorization code and stores the new session identifier.
async fn run_login(config: &Config, request: &ExchangeRequest) -> Result<()> {
    let auth = AuthClient::new(&config.server_url)?;
    let grant = auth
        .exchange(request)
        .await
        .context("Failed to exchange authorization code")?;

    let Some(session_id) = auth.session_id() else {
        bail!("server did not start a session");
    };
    session_file::save(&config.session_file, &session_id).with_context(|| {
        format!(
            "Failed to write session file {}",
            config.session_file.display()
        )
    })?;

    match grant.expires_in_sec {
        Some(secs) => println!("Signed in (access token valid for {secs}s)."),
        None => println!("Signed in."),
    }
    Ok(())
}

/// Revokes the session on the server and removes the local session file.
async fn run_logout(config: &Config) -> Result<()> {
    let Some(session_id) = current_session(config)? else {
        println!("Not signed in.");
        return Ok(());
    };

    let auth = AuthClient::new(&config.server_url)?.with_session_id(&session_id);
    let revoked = auth.revoke().await;

    session_file::clear(&config.session_file).with_context(|| {
        format!(
            "Failed to remove session file {}",
            config.session_file.display()
        )
    })?;
    revoked.context("Failed to revoke session")?;

    println!("Signed out.");
    Ok(())
}

fn current_session(config: &Config) -> Result<Option<String>> {
    if let Some(id) = &config.session_id {
        return Ok(Some(id.clone()));
    }
    session_file::load(&config.session_file).with_context(|| {
        format!(
            "Failed to read session file {}",
            config.session_file.display()
        )
    })
}

fn open_store(config: &Config) -> Result<DriveStore<AuthClient>> {
    let Some(session_id) = current_session(config)? else {
        bail!("not signed in; run `versecut login` first");
    };
    Ok(connect_store(config, &session_id)?)
}

fn connect_store(config: &Config, session_id: &str) -> ClientResult<DriveStore<AuthClient>> {
    let auth = AuthClient::new(&config.server_url)?.with_session_id(session_id);
    Ok(DriveStore::new(&config.drive_url, Reauthenticator::new(auth))?)
}

fn read_project(path: &Path) -> ClientResult<serde_json::Value> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn storage_error(err: PersistenceError) -> anyhow::Error {
    if err.is_unauthorized() {
        anyhow::Error::new(err).context("Session expired or revoked; run `versecut login` again")
    } else {
        anyhow::Error::new(err)
    }
}

/// Initialize logging to stderr, keeping stdout for command output.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
