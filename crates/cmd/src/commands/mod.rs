pub mod apply;

use anyhow::Result;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use studio::{ApiResponse, StudioApi};

pub use apply::read_operation;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load a data source and start a session on it
    Init {
        /// Path of the CSV, Parquet or Excel HTML file
        source: String,
    },
    /// Show the current state of a session
    Status { source: String },
    /// Apply one transformation to the current snapshot
    Apply {
        source: String,
        /// Operation as inline JSON, e.g. '{"type":"drop_columns","columns":["a"]}'
        #[arg(long, conflicts_with = "op_file")]
        op: Option<String>,
        /// Operation read from a JSON or YAML file
        #[arg(long)]
        op_file: Option<PathBuf>,
    },
    /// Step back to the previous snapshot
    Undo { source: String },
    /// Step forward to the next snapshot
    Redo { source: String },
    /// Discard a session and all of its snapshots
    Clear { source: String },
    /// Persist the current snapshot as a named artifact and end the session
    Save {
        source: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Show a page of rows from the current snapshot
    Preview {
        source: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List the snapshots of a session
    History { source: String },
    /// Summary statistics per column of the current snapshot
    Profile { source: String },
}

impl Command {
    pub fn source(&self) -> &str {
        match self {
            Command::Init { source }
            | Command::Status { source }
            | Command::Apply { source, .. }
            | Command::Undo { source }
            | Command::Redo { source }
            | Command::Clear { source }
            | Command::Save { source, .. }
            | Command::Preview { source, .. }
            | Command::History { source }
            | Command::Profile { source } => source,
        }
    }
}

/// Run one subcommand against the studio at `home`; `Err` only for local
/// problems such as an unreadable operation file, everything else is
/// reported in the response.
///
/// Separate invocations share `home`, so the session's file lock is held for
/// the whole command.
pub async fn run(api: &StudioApi, home: &Path, user: &str, command: &Command) -> Result<ApiResponse> {
    let source = crate::common::source_id(command.source());
    let _lock = crate::common::lock_session(home, user, &source).await?;
    diagnostics::debug!(
        "Running {command} for {user} on {source}",
        command: format!("{:?}", command),
        user: user.to_string(),
        source: source.clone()
    );

    let response = match command {
        Command::Init { .. } => api.initialize(user, &source).await,
        Command::Status { .. } => api.status(user, &source).await,
        Command::Apply { op, op_file, .. } => {
            let json = read_operation(op.as_deref(), op_file.as_deref())?;
            api.apply_json(user, &source, &json).await
        }
        Command::Undo { .. } => api.undo(user, &source).await,
        Command::Redo { .. } => api.redo(user, &source).await,
        Command::Clear { .. } => api.clear(user, &source).await,
        Command::Save {
            name, description, ..
        } => api.save(user, &source, name, description).await,
        Command::Preview { offset, limit, .. } => {
            api.preview(user, &source, *offset, *limit).await
        }
        Command::History { .. } => api.history(user, &source).await,
        Command::Profile { .. } => api.profile(user, &source).await,
    };
    Ok(response)
}
