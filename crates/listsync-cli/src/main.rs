//! listsync CLI
//!
//! Thin wrapper around listsync-core for command-line usage. Task lists,
//! sessions and documents live in one local redb database. Every command
//! prints JSON on stdout; failures print `{"code", "message"}` on stderr and
//! exit non-zero.
//!
//! ## Usage
//!
//! ```bash
//! # Register a list owned by alice with two tasks
//! listsync list create groceries --owner alice t1 t2
//!
//! # Start editing from a device
//! listsync session start groceries --user alice --device phone
//!
//! # Move the second task to the top, as the phone's replica would
//! listsync edit move groceries --user alice --device phone 1 0
//!
//! # Fetch the current state
//! listsync session state groceries --user alice --device phone
//!
//! # Apply a base64 update produced elsewhere
//! listsync update apply groceries --user alice --device phone <update>
//!
//! # End the session
//! listsync session end <session_id>
//!
//! # Inspect recorded sessions
//! listsync session list groceries
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use listsync_core::wire::{
    self, ApplyUpdateRequest, ApplyUpdateResponse, DiffRequest, ErrorResponse, GetStateRequest,
    SessionRequest, StartSessionRequest,
};
use listsync_core::{
    protocol, DeviceId, SessionManager, SessionType, Storage, SyncConfig, SyncError, TaskListDoc,
    TaskListId, TaskListRecord, UpdateAck, UserId,
};
use serde_json::json;
use tracing::debug;

/// listsync - collaborative ordering for shared task lists
#[derive(Parser)]
#[command(name = "listsync")]
#[command(version = "0.1.0")]
#[command(about = "listsync - collaborative ordering for shared task lists")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.listsync/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file with session timeouts and persist retry policy
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Task list records (local stand-in for the task database)
    List {
        #[command(subcommand)]
        action: ListAction,
    },

    /// Session lifecycle
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Raw update exchange
    Update {
        #[command(subcommand)]
        action: UpdateAction,
    },

    /// Edit the order as a device replica would
    Edit {
        #[command(subcommand)]
        action: EditAction,
    },
}

#[derive(Subcommand)]
enum ListAction {
    /// Create (or replace) a task list
    Create {
        /// Task list ID
        list: String,

        /// Owning user ID
        #[arg(long)]
        owner: String,

        /// Task IDs in order
        task_ids: Vec<String>,
    },

    /// Replace the tasks of a list, as task CRUD would
    SetTasks {
        /// Task list ID
        list: String,

        /// Task IDs in order
        task_ids: Vec<String>,
    },

    /// Show a list record and its document order
    Show {
        /// Task list ID
        list: String,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Start a session for a device
    Start {
        /// Task list ID
        list: String,

        #[arg(long)]
        user: String,

        #[arg(long, default_value = "")]
        device: String,

        /// Start a background session (shorter idle timeout)
        #[arg(long)]
        background: bool,
    },

    /// Fetch the current document state for a device
    State {
        /// Task list ID
        list: String,

        #[arg(long)]
        user: String,

        #[arg(long, default_value = "")]
        device: String,
    },

    /// Extend a session's expiry
    KeepAlive {
        /// Session ID
        session: String,
    },

    /// End a session
    End {
        /// Session ID
        session: String,
    },

    /// List every session recorded for a list
    List {
        /// Task list ID
        list: String,
    },
}

#[derive(Subcommand)]
enum UpdateAction {
    /// Merge a base64 update from a device
    Apply {
        /// Task list ID
        list: String,

        #[arg(long)]
        user: String,

        #[arg(long, default_value = "")]
        device: String,

        /// Base64 update
        update: String,
    },

    /// Print the update a device at a state vector is missing
    Diff {
        /// Task list ID
        list: String,

        #[arg(long)]
        user: String,

        #[arg(long, default_value = "")]
        device: String,

        /// Base64 state vector (empty for the full history)
        #[arg(long, default_value = "")]
        state_vector: String,
    },
}

#[derive(Subcommand)]
enum EditAction {
    /// Move the task at FROM to position TO and submit the change
    Move {
        /// Task list ID
        list: String,

        #[arg(long)]
        user: String,

        #[arg(long, default_value = "")]
        device: String,

        from: usize,

        to: usize,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.listsync/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".listsync")
        .join("data")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Error body for failures that carry a stable code
fn error_body(e: &anyhow::Error) -> Option<ErrorResponse> {
    if let Some(body) = e.downcast_ref::<ErrorResponse>() {
        return Some(body.clone());
    }
    e.downcast_ref::<SyncError>().map(|e| ErrorResponse {
        code: e.code().to_string(),
        message: e.to_string(),
    })
}

/// Order materialized from the stored document, if one exists
fn document_order(storage: &Storage, list: &TaskListId) -> Result<Option<Vec<String>>> {
    match storage.load_document(list)? {
        Some(bytes) => Ok(Some(TaskListDoc::load(&bytes)?.order()?)),
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        if let Some(body) = error_body(&e) {
            eprintln!("{}", serde_json::to_string(&body)?);
            std::process::exit(1);
        }
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    debug!(?data_dir, "Opening storage");
    let storage = Storage::new(data_dir.join("listsync.redb"))?;
    let manager = SessionManager::new(storage.clone(), Arc::new(storage.clone()), config)?;

    match cli.command {
        Commands::List { action } => match action {
            ListAction::Create {
                list,
                owner,
                task_ids,
            } => {
                let record = TaskListRecord {
                    owner: owner.into(),
                    task_ids,
                };
                storage.save_task_list(&list.as_str().into(), &record)?;
                print_json(&json!({
                    "taskListId": list,
                    "owner": record.owner.as_str(),
                    "taskIds": record.task_ids,
                }))?;
            }

            ListAction::SetTasks { list, task_ids } => {
                storage.set_task_ids(&list.as_str().into(), task_ids.clone())?;
                print_json(&json!({
                    "taskListId": list,
                    "taskIds": task_ids,
                }))?;
            }

            ListAction::Show { list } => {
                let id = TaskListId::new(list);
                let record = storage
                    .load_task_list(&id)?
                    .ok_or_else(|| SyncError::TaskListNotFound(id.to_string()))?;
                print_json(&json!({
                    "taskListId": id.as_str(),
                    "owner": record.owner.as_str(),
                    "taskIds": record.task_ids,
                    "documentOrder": document_order(&storage, &id)?,
                }))?;
            }
        },

        Commands::Session { action } => match action {
            SessionAction::Start {
                list,
                user,
                device,
                background,
            } => {
                let session_type = if background {
                    SessionType::Background
                } else {
                    SessionType::Active
                };
                let response = wire::start_session(
                    &manager,
                    StartSessionRequest {
                        task_list_id: list,
                        user_id: user,
                        device_id: Some(device),
                        session_type: Some(session_type),
                    },
                )
                .await?;
                print_json(&response)?;
            }

            SessionAction::State { list, user, device } => {
                let response = wire::get_state(
                    &manager,
                    GetStateRequest {
                        task_list_id: list,
                        user_id: user,
                        device_id: Some(device),
                    },
                )
                .await?;
                print_json(&response)?;
            }

            SessionAction::KeepAlive { session } => {
                let response =
                    wire::keep_alive(&manager, SessionRequest { session_id: session }).await?;
                print_json(&response)?;
            }

            SessionAction::End { session } => {
                let response =
                    wire::end_session(&manager, SessionRequest { session_id: session }).await?;
                print_json(&response)?;
            }

            SessionAction::List { list } => {
                let sessions: Vec<_> = storage
                    .list_sessions(&TaskListId::new(list))?
                    .into_iter()
                    .map(|s| {
                        json!({
                            "sessionId": s.session_id.as_str(),
                            "userId": s.user_id.as_str(),
                            "deviceId": s.device_id.as_str(),
                            "sessionType": s.session_type,
                            "expiresAt": s.expires_at,
                            "isActive": s.is_active,
                        })
                    })
                    .collect();
                print_json(&sessions)?;
            }
        },

        Commands::Update { action } => match action {
            UpdateAction::Apply {
                list,
                user,
                device,
                update,
            } => {
                let response = wire::apply_update(
                    &manager,
                    ApplyUpdateRequest {
                        task_list_id: list,
                        user_id: user,
                        device_id: Some(device),
                        update,
                    },
                )
                .await?;
                print_json(&response)?;
            }

            UpdateAction::Diff {
                list,
                user,
                device,
                state_vector,
            } => {
                let response = wire::diff_since(
                    &manager,
                    DiffRequest {
                        task_list_id: list,
                        user_id: user,
                        device_id: Some(device),
                        state_vector,
                    },
                )
                .await?;
                print_json(&response)?;
            }
        },

        Commands::Edit { action } => match action {
            EditAction::Move {
                list,
                user,
                device,
                from,
                to,
            } => {
                let list = TaskListId::new(list);
                let user = UserId::new(user);
                let device = DeviceId::new(device);

                let snapshot = manager.get_state(&list, &user, &device).await?;
                let mut replica = TaskListDoc::load(&snapshot.document_state)?;
                let before = replica.heads();
                replica.move_item(from, to)?;

                let ack = match protocol::update_since(&mut replica, &before) {
                    Some(update) => manager.apply_update(&list, &user, &device, &update).await?,
                    // Moving an item onto itself produces no change to send
                    None => UpdateAck {
                        success: true,
                        state_vector: snapshot.state_vector,
                        conflict: false,
                    },
                };

                let response = ApplyUpdateResponse::from(ack);
                print_json(&json!({
                    "success": response.success,
                    "stateVector": response.state_vector,
                    "order": document_order(&storage, &list)?,
                }))?;
            }
        },
    }

    Ok(())
}
