//! sheetdir operator CLI
//!
//! ## Usage
//!
//! ```bash
//! # Create the storage tree and a default config
//! sheetdir init
//!
//! # Bootstrap the first platform admin
//! sheetdir add-admin admin@example.com
//!
//! # Create a directory owned by a user
//! sheetdir create-directory --as owner@example.com --name Clinics --columns Name,City,Score
//!
//! # Appoint a moderator limited to rows scoring above 40
//! sheetdir appoint --as owner@example.com --directory <id> --email mod@example.com \
//!     --scope '{"type":"controls","controls":[{"column":{"type":"single","value":"Score"},"filter":{"type":"numeric_range","range":{"type":"above","threshold":40}}}]}' \
//!     --can-edit --requires-approval
//!
//! # Review queued changes
//! sheetdir pending --as owner@example.com --directory <id>
//! sheetdir review --as owner@example.com --directory <id> --change 1 --action approve
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sheetdir::db::rows::RowQuery;
use sheetdir::{AppointRequest, Config, DirectoryService, NewDirectory, RequestContext, ReviewAction, RowScope};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sheetdir")]
#[command(about = "Moderation engine for spreadsheet-mirrored directories")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "SHEETDIR_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "SHEETDIR_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the storage tree and write a default config
    Init,

    /// Add a platform admin (no authorization check)
    AddAdmin { email: String },

    /// Create a directory owned by the acting user
    CreateDirectory {
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        sheet_id: Option<String>,
        /// Comma-separated column names
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },

    /// Appoint or re-appoint a moderator
    Appoint {
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        directory: String,
        #[arg(long)]
        email: String,
        /// Row scope as JSON; omitted means every row
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        can_edit: bool,
        #[arg(long)]
        can_approve: bool,
        #[arg(long)]
        requires_approval: bool,
    },

    /// Deactivate a moderator
    RemoveModerator {
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        directory: String,
        #[arg(long)]
        email: String,
    },

    /// List active moderators of a directory
    Moderators {
        #[arg(long)]
        directory: String,
    },

    /// Browse or search rows
    Rows {
        #[arg(long)]
        directory: String,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// List pending changes the acting user may review
    Pending {
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        directory: String,
    },

    /// Approve or reject a pending change
    Review {
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        directory: String,
        #[arg(long)]
        change: i64,
        /// approve or reject
        #[arg(long)]
        action: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sheetdir=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }

    let service = DirectoryService::open(&config)?;

    match args.command {
        Command::Init => {
            let config_path = config.config_path();
            if !config_path.exists() {
                config.save(&config_path)?;
                info!("Created default config at {}", config_path.display());
            }
            info!("Storage ready at {}", config.storage_dir.display());
        }

        Command::AddAdmin { email } => {
            let added = service.bootstrap_admin(&email)?;
            println!("{}", if added { "added" } else { "already an admin" });
        }

        Command::CreateDirectory {
            actor,
            name,
            description,
            sheet_id,
            columns,
        } => {
            let ctx = RequestContext::from_email(&actor);
            let directory = service.create_directory(
                &ctx,
                &NewDirectory {
                    name,
                    description,
                    sheet_id,
                    columns,
                },
            )?;
            print_json(&directory)?;
        }

        Command::Appoint {
            actor,
            directory,
            email,
            scope,
            can_edit,
            can_approve,
            requires_approval,
        } => {
            let scope = match scope {
                Some(json) => RowScope::from_json(&json).context("parsing --scope")?,
                None => RowScope::All,
            };
            let ctx = RequestContext::from_email(&actor);
            let moderator = service.appoint_moderator(
                &ctx,
                &directory,
                &AppointRequest {
                    email,
                    username: None,
                    auth_provider: None,
                    scope,
                    can_edit,
                    can_approve,
                    requires_approval,
                },
            )?;
            print_json(&moderator)?;
        }

        Command::RemoveModerator {
            actor,
            directory,
            email,
        } => {
            let ctx = RequestContext::from_email(&actor);
            let removed = service.remove_moderator(&ctx, &directory, &email)?;
            println!("{}", if removed { "removed" } else { "not an active moderator" });
        }

        Command::Moderators { directory } => {
            print_json(&service.moderators(&directory)?)?;
        }

        Command::Rows {
            directory,
            search,
            limit,
            offset,
        } => {
            let rows = service.rows(
                &directory,
                &RowQuery {
                    search,
                    limit,
                    offset,
                },
            )?;
            print_json(&rows)?;
        }

        Command::Pending { actor, directory } => {
            let ctx = RequestContext::from_email(&actor);
            print_json(&service.pending_changes(&ctx, &directory)?)?;
        }

        Command::Review {
            actor,
            directory,
            change,
            action,
            reason,
        } => {
            let ctx = RequestContext::from_email(&actor);
            let action: ReviewAction = action.parse()?;
            let result = service.review_change(&ctx, &directory, change, action, reason.as_deref())?;
            if let Some(handle) = result.write_back {
                handle.await?;
            }
            print_json(&result.change)?;
        }
    }

    Ok(())
}
