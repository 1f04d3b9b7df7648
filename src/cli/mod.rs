pub mod daemon;
pub mod download;
pub mod jobs;
pub mod records;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::models::{Credentials, InstallMode, JobMetadata, JobRequest};

/// Workshop Queue - download and install Steam workshop content
#[derive(Parser, Debug)]
#[command(
    name = "wsq",
    version,
    about = "Workshop Queue - download and install Steam workshop content"
)]
pub struct Cli {
    /// Daemon host
    #[arg(long, default_value = "127.0.0.1", global = true)]
    pub host: String,

    /// Daemon port
    #[arg(long, default_value_t = 8477, global = true)]
    pub port: u16,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Where to find the config file and record store.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Path to configuration file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Data directory path
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,
}

/// What to download and where to put it.
#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Steam app id the workshop items belong to
    #[arg(long)]
    pub app: String,

    /// Workshop item id (repeatable; items are queued in the order given)
    #[arg(long = "item", required = true, num_args = 1..)]
    pub items: Vec<String>,

    /// Profile the content is installed for
    #[arg(long)]
    pub profile: String,

    /// Directory the content is installed into
    #[arg(long)]
    pub dest: PathBuf,

    /// Path to the steamcmd binary (overrides config)
    #[arg(long)]
    pub tool: Option<PathBuf>,

    /// Working directory for the tool (defaults to the tool's directory)
    #[arg(long = "working-dir")]
    pub working_dir: Option<PathBuf>,

    /// Install mode: copy or symlink (overrides config)
    #[arg(long)]
    pub mode: Option<InstallMode>,

    /// Steam username (anonymous login when omitted)
    #[arg(long, requires = "password")]
    pub username: Option<String>,

    /// Steam password
    #[arg(long, requires = "username")]
    pub password: Option<String>,
}

impl DownloadArgs {
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    /// One request per item, in the order the items were given.
    pub fn requests(&self, tool_path: &str, mode: InstallMode) -> Vec<JobRequest> {
        self.items
            .iter()
            .map(|item| JobRequest {
                app_id: self.app.clone(),
                content_item_id: item.clone(),
                profile_id: self.profile.clone(),
                tool_path: tool_path.to_string(),
                working_dir: self
                    .working_dir
                    .as_ref()
                    .map(|d| d.display().to_string()),
                credentials: self.credentials(),
                install_mode: mode,
                install_destination: self.dest.display().to_string(),
                metadata: JobMetadata::default(),
            })
            .collect()
    }
}

/// Identifies one installed item.
#[derive(Args, Debug, Clone)]
pub struct ItemArgs {
    /// Workshop item id
    #[arg(long)]
    pub item: String,

    /// Profile id
    #[arg(long)]
    pub profile: String,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon in the foreground
    Serve {
        #[command(flatten)]
        store: StoreArgs,

        /// Port to listen on (overrides config)
        #[arg(short = 'p', long)]
        port: Option<u16>,
    },

    /// Show daemon status
    Status,

    /// Download and install workshop items without a daemon
    Download {
        #[command(flatten)]
        target: DownloadArgs,

        #[command(flatten)]
        store: StoreArgs,

        /// Maximum concurrent downloads (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Manage jobs on a running daemon
    Jobs {
        #[command(subcommand)]
        action: JobsCommand,
    },

    /// List install records
    Records {
        /// Only show records for this profile
        #[arg(long)]
        profile: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Remove an installed item and mark its record uninstalled
    Uninstall(ItemArgs),

    /// Re-enable a disabled item
    Enable(ItemArgs),

    /// Disable an installed item without removing it
    Disable(ItemArgs),
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List jobs known to the daemon
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Queue downloads on the daemon
    Submit {
        #[command(flatten)]
        target: DownloadArgs,
    },

    /// Cancel a queued or running job
    Cancel {
        /// Job id
        id: String,
    },
}

/// Build the base URL for the daemon HTTP API.
pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

/// Format a connection error message for when the daemon is not reachable.
pub fn connection_error_message(host: &str, port: u16) -> String {
    format!(
        "Could not connect to daemon at {}:{}. Is it running? (try: wsq serve)",
        host, port
    )
}

/// Turn a reqwest error into a user-facing message.
pub(crate) fn handle_request_error(err: reqwest::Error, host: &str, port: u16) -> anyhow::Error {
    if err.is_connect() || err.is_timeout() {
        anyhow::anyhow!("{}", connection_error_message(host, port))
    } else {
        anyhow::anyhow!("Request failed: {}", err)
    }
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Some(Commands::Serve { store, port }) => {
            daemon::cmd_serve(&cli.host, store, *port).await
        }
        Some(Commands::Status) => daemon::cmd_status(&cli.host, cli.port, cli.verbose).await,
        Some(Commands::Download {
            target,
            store,
            concurrency,
        }) => download::cmd_download(target, store, *concurrency).await,
        Some(Commands::Jobs { action }) => match action {
            JobsCommand::List { json } => jobs::cmd_list(&cli.host, cli.port, *json).await,
            JobsCommand::Submit { target } => jobs::cmd_submit(&cli.host, cli.port, target).await,
            JobsCommand::Cancel { id } => jobs::cmd_cancel(&cli.host, cli.port, id).await,
        },
        Some(Commands::Records {
            profile,
            json,
            store,
        }) => records::cmd_records(store, profile.as_deref(), *json).await,
        Some(Commands::Uninstall(args)) => records::cmd_uninstall(args).await,
        Some(Commands::Enable(args)) => records::cmd_set_enabled(args, true).await,
        Some(Commands::Disable(args)) => records::cmd_set_enabled(args, false).await,
        None => {
            // No subcommand provided -- print help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
