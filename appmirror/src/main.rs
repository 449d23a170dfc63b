//! appmirror - mirror an applications-as-code platform into a local tree
//!
//! Pulls workspaces, apps, registries and knowledge bases into a directory
//! tree, and pushes local app and document edits back.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Tree: $XDG_DATA_HOME/appmirror/tree (~/.local/share/appmirror/tree)
//! - Secret key: $XDG_DATA_HOME/appmirror/secret.key
//! - Logs: $XDG_STATE_HOME/appmirror/appmirror.log (~/.local/state/appmirror/appmirror.log)
//! - Config: $XDG_CONFIG_HOME/appmirror/config.toml (~/.config/appmirror/config.toml)

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use appmirror_core::{AppType, Config};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "appmirror")]
#[command(about = "Mirror an applications-as-code platform into a local tree")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage registered platforms
    #[command(subcommand)]
    Platform(PlatformCommand),

    /// Manage accounts on a platform
    #[command(subcommand)]
    Account(AccountCommand),

    /// Pull remote state into the tree (everything when PATH is omitted)
    Pull {
        /// Platform, account, workspace, app or knowledge base directory
        path: Option<PathBuf>,
    },

    /// Push a local app to the remote
    Push(PushArgs),

    /// Show sync status of apps and knowledge bases
    Status {
        /// Directory to scan (the whole tree when omitted)
        path: Option<PathBuf>,

        /// Also ask the remote whether apps changed there
        #[arg(long)]
        remote: bool,
    },

    /// Author apps offline
    #[command(subcommand)]
    App(AppCommand),

    /// Pull and edit knowledge bases
    #[command(subcommand)]
    Knowledge(KnowledgeCommand),
}

#[derive(Subcommand)]
enum PlatformCommand {
    /// Register a platform by base URL
    Add { name: String, url: String },
    /// List platforms and their accounts
    List,
    /// Remove a platform and everything mirrored from it
    Remove { platform: PathBuf },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Register an account; the password is read from stdin or APPMIRROR_PASSWORD
    Add {
        platform: PathBuf,
        email: String,

        /// Read the password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
    },
    /// Remove an account and its mirrored workspaces
    Remove { account: PathBuf },
}

#[derive(Args)]
struct PushArgs {
    app_path: PathBuf,

    /// Overwrite remote changes made since the last pull
    #[arg(long, conflicts_with = "pull_first")]
    force: bool,

    /// Pull instead of pushing when the remote changed
    #[arg(long)]
    pull_first: bool,
}

#[derive(Subcommand)]
enum AppCommand {
    /// Create an app locally; it is created remotely on first push
    New {
        workspace: PathBuf,
        name: String,

        /// App type (workflow, chatflow, chatbot, agent, text-generation)
        #[arg(long = "type", default_value = "workflow")]
        app_type: AppType,

        /// Initial DSL content
        #[arg(long)]
        from: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum KnowledgeCommand {
    /// Pull every document of a dataset into a workspace
    Pull {
        workspace: PathBuf,
        dataset_id: String,
    },
    /// Create a document locally
    NewDoc {
        knowledge_base: PathBuf,
        name: String,

        /// Initial text
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Create or update a document remotely
    Push { document: PathBuf },
    /// Delete a document remotely and locally
    Rm { document: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        appmirror_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("appmirror starting");

    let ctx = commands::Context::open(config)?;
    match cli.command {
        Command::Platform(cmd) => match cmd {
            PlatformCommand::Add { name, url } => commands::platform_add(&ctx, &name, &url),
            PlatformCommand::List => commands::platform_list(&ctx),
            PlatformCommand::Remove { platform } => {
                commands::platform_remove(&ctx, &platform).await
            }
        },
        Command::Account(cmd) => match cmd {
            AccountCommand::Add {
                platform,
                email,
                password_stdin,
            } => commands::account_add(&ctx, &platform, &email, password_stdin),
            AccountCommand::Remove { account } => commands::account_remove(&ctx, &account),
        },
        Command::Pull { path } => commands::pull(&ctx, path.as_deref()).await,
        Command::Push(args) => {
            commands::push(&ctx, &args.app_path, args.force, args.pull_first).await
        }
        Command::Status { path, remote } => commands::status(&ctx, path.as_deref(), remote).await,
        Command::App(AppCommand::New {
            workspace,
            name,
            app_type,
            from,
        }) => commands::app_new(&ctx, &workspace, &name, app_type, from.as_deref()),
        Command::Knowledge(cmd) => match cmd {
            KnowledgeCommand::Pull {
                workspace,
                dataset_id,
            } => commands::knowledge_pull(&ctx, &workspace, &dataset_id).await,
            KnowledgeCommand::NewDoc {
                knowledge_base,
                name,
                from,
            } => commands::knowledge_new_doc(&ctx, &knowledge_base, &name, from.as_deref()),
            KnowledgeCommand::Push { document } => commands::knowledge_push(&ctx, &document).await,
            KnowledgeCommand::Rm { document } => commands::knowledge_rm(&ctx, &document).await,
        },
    }
}
