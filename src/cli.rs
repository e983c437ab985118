//! CLI argument parsing for chorekeeper.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ck",
    about = "Offline-first household chore tracker",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/chorekeeper/logs/chorekeeper.log"
)]
pub struct Cli {
    /// Path to the household directory (default: current directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a household in the current directory
    Init,

    /// Add a chore
    Add {
        /// Chore title
        title: String,

        /// Description
        #[arg(short = 'D', long)]
        description: Option<String>,

        /// Priority (low, medium, high)
        #[arg(short, long, default_value = "medium")]
        priority: String,

        /// Assignee user ID
        #[arg(short, long)]
        assignee: Option<String>,

        /// Assignee display name
        #[arg(long, requires = "assignee")]
        assignee_name: Option<String>,

        /// Due date (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,

        /// Category
        #[arg(short, long)]
        category: Option<String>,

        /// Recurrence (daily, weekly, monthly)
        #[arg(short, long)]
        recurring: Option<String>,

        /// Prerequisite chore IDs (comma-separated)
        #[arg(long, value_delimiter = ',')]
        after: Vec<String>,

        /// Mark as blocking other chores
        #[arg(long)]
        blocks_others: bool,
    },

    /// List chores
    List {
        /// Only chores not yet completed
        #[arg(long, conflicts_with = "completed")]
        pending: bool,

        /// Only completed chores
        #[arg(long)]
        completed: bool,
    },

    /// Show a chore with its dependencies
    Show {
        /// Chore ID
        id: String,
    },

    /// Complete a chore (all prerequisites must be done)
    Complete {
        /// Chore ID
        id: String,

        /// User completing the chore
        #[arg(short, long)]
        by: Option<String>,
    },

    /// Assign a chore to a user
    Claim {
        /// Chore ID
        id: String,

        /// User ID
        user: String,

        /// User display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Edit a chore
    Edit {
        /// Chore ID
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short = 'D', long, conflicts_with = "clear_description")]
        description: Option<String>,

        /// Remove the description
        #[arg(long)]
        clear_description: bool,

        /// Priority (low, medium, high)
        #[arg(short, long)]
        priority: Option<String>,

        #[arg(short, long)]
        category: Option<String>,

        /// Due date (RFC 3339 or YYYY-MM-DD)
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<String>,

        /// Remove the due date
        #[arg(long)]
        clear_due: bool,

        /// Replace prerequisites (comma-separated chore IDs)
        #[arg(long, value_delimiter = ',')]
        after: Option<Vec<String>>,
    },

    /// Delete a chore
    Delete {
        /// Chore ID
        id: String,
    },

    /// Make a chore wait on a prerequisite
    Depend {
        /// Chore that waits
        chore_id: String,

        /// Chore that must be completed first
        prerequisite_id: String,
    },

    /// Show chores whose prerequisites are all done
    Ready,

    /// Act on several chores at once
    Bulk {
        #[command(subcommand)]
        action: BulkCommand,
    },

    /// Archive old completed chores and manage the archive
    Archive {
        #[command(subcommand)]
        action: ArchiveCommand,
    },

    /// Push queued changes to the hub now
    Sync,

    /// Show connectivity and queue status
    Status,

    /// List queued operations
    Queue,

    /// Reset a failed operation so it is sent again
    Retry {
        /// Operation ID
        operation_id: String,
    },

    /// Drop every failed operation
    ClearFailed,

    /// Keep syncing in the foreground as connectivity changes
    Watch,

    /// Run the hub in foreground
    Hub,

    /// Stop the running hub
    HubStop,

    /// Check hub status
    HubStatus,
}

#[derive(Subcommand)]
pub enum BulkCommand {
    /// Complete chores, prerequisites first
    Complete {
        /// Chore IDs
        ids: Vec<String>,

        /// Every chore that is ready now
        #[arg(long, conflicts_with = "ids")]
        ready: bool,

        /// User completing the chores
        #[arg(short, long)]
        by: Option<String>,
    },

    /// Delete chores
    Delete {
        /// Chore IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Assign chores to a user
    Assign {
        /// User ID
        user: String,

        /// Chore IDs
        #[arg(required = true)]
        ids: Vec<String>,

        /// User display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Apply the same change to chores
    Update {
        /// Chore IDs
        #[arg(required = true)]
        ids: Vec<String>,

        /// Priority (low, medium, high)
        #[arg(short, long)]
        priority: Option<String>,

        #[arg(short, long)]
        category: Option<String>,

        /// Due date (RFC 3339 or YYYY-MM-DD)
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<String>,

        /// Remove the due date
        #[arg(long)]
        clear_due: bool,
    },

    /// Summarize chores (all chores when no IDs are given)
    Stats {
        /// Chore IDs
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ArchiveCommand {
    /// Archive chores completed more than the configured number of days ago
    Run {
        /// Override the age threshold in days
        #[arg(long)]
        days: Option<u32>,

        /// Recorded as the archiver
        #[arg(long, default_value = "system")]
        by: String,
    },

    /// Archive one chore now
    Chore {
        /// Chore ID
        id: String,

        #[arg(long, default_value = "system")]
        by: String,
    },

    /// Move an archived chore back to the chore list
    Restore {
        /// Original chore ID
        id: String,

        #[arg(long, default_value = "system")]
        by: String,
    },

    /// List archived chores, newest first
    List {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show archive statistics
    Stats,

    /// Delete archived chores kept longer than the configured retention
    Cleanup {
        /// Override the retention in days
        #[arg(long)]
        keep_days: Option<u32>,
    },
}
