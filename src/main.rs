//! ck - offline-first household chore tracker.

use chorekeeper::{
    BackgroundMessage, BulkResult, BulkStats, Chore, ChoreDraft, ChorePatch, ChoreState, Client, Config, Connectivity,
    Daemon, DaemonConfig, DrainReport, Hub, OfflineSync, OperationPayload, OperationStatus, Priority, QueuedOperation,
    Recurrence, RemoteError, STORE_DIR, SqliteKv, SyncBulkExt, SyncCoordinator, SyncSignal, SyncTrigger, Timestamp,
    bulk_stats, check_completion, chore_state, completable_chores, dependents, get_dependencies, is_daemon_running,
    is_local_id, validate_dependencies,
};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail, eyre};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

mod cli;

use cli::{ArchiveCommand, BulkCommand, Cli, Command};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chorekeeper")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("chorekeeper.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn get_store_dir(cli: &Cli) -> PathBuf {
    cli.dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn parse_priority(s: &str) -> Result<Priority> {
    Priority::parse(s).ok_or_else(|| eyre!("Unknown priority '{}' (use low, medium or high)", s))
}

fn parse_recurrence(s: &str) -> Result<Recurrence> {
    Recurrence::parse(s).ok_or_else(|| eyre!("Unknown recurrence '{}' (use daily, weekly or monthly)", s))
}

fn parse_due(s: &str) -> Result<Timestamp> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Invalid due date '{}'", s))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| eyre!("Invalid due date '{}'", s))
}

fn format_state(state: ChoreState) -> ColoredString {
    match state {
        ChoreState::Blocked => "blocked".red(),
        ChoreState::Completable => "ready".green(),
        ChoreState::Completed => "done".blue(),
    }
}

fn format_op_status(status: OperationStatus) -> ColoredString {
    match status {
        OperationStatus::Pending => "pending".yellow(),
        OperationStatus::InFlight => "in_flight".cyan(),
        OperationStatus::Applied => "applied".green(),
        OperationStatus::Failed => "failed".red(),
    }
}

fn print_chore_line(chore: &Chore, all: &[Chore]) {
    let unsynced = if chore.is_local() { " (unsynced)".dimmed().to_string() } else { String::new() };
    let assignee = chore
        .assignee_name
        .as_deref()
        .or(chore.assignee_id.as_deref())
        .filter(|a| !a.is_empty())
        .map(|a| format!(" @{}", a).dimmed().to_string())
        .unwrap_or_default();
    println!(
        "{} {} {} {}{}{}",
        format_state(chore_state(chore, all)),
        chore.id.cyan(),
        chore.priority,
        chore.title,
        assignee,
        unsynced
    );
}

/// Everything a chore command needs.
struct App {
    root: PathBuf,
    config: Config,
    client: Arc<Client>,
    sync: Arc<OfflineSync>,
}

impl App {
    async fn open(root: &Path) -> Result<Self> {
        if !root.join(STORE_DIR).exists() {
            bail!("No household found in {}. Run 'ck init' first.", root.display());
        }

        let config = Config::load(root)?;
        let client = Arc::new(Client::connect(root, &config.hub).await?);
        let kv = Arc::new(SqliteKv::open(root).context("Failed to open device store")?);
        let sync = OfflineSync::open(kv, client.clone(), config.sync.clone()).context("Failed to open sync queue")?;

        Ok(Self {
            root: root.to_path_buf(),
            config,
            client,
            sync: Arc::new(sync),
        })
    }

    /// Current chores: fresh from the hub when reachable, otherwise the device cache.
    async fn snapshot(&self) -> Result<(Vec<Chore>, bool)> {
        match self.client.chores().await {
            Ok(chores) => Ok((self.sync.cache_chores(chores).await?, true)),
            Err(e) if e.is_unavailable() => {
                info!("Hub unreachable, using cached chores: {}", e);
                Ok((self.sync.cached_chores()?, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, id: &str) -> Result<(Chore, Vec<Chore>, bool)> {
        let (chores, online) = self.snapshot().await?;
        let resolved = self.sync.resolve_chore_id(id).await;
        let chore = chores
            .iter()
            .find(|c| c.id == resolved)
            .cloned()
            .ok_or_else(|| eyre!(RemoteError::NotFound {
                collection: chorekeeper::CHORES.to_string(),
                id: id.to_string(),
            }))?;
        Ok((chore, chores, online))
    }

    /// Queue a mutation and push it straight away when the hub is reachable.
    async fn submit(&self, payload: OperationPayload, online: bool) -> Result<Submitted> {
        let op = self.sync.queue_action(payload).await.context("Change could not be saved")?;
        if !online {
            return Ok(Submitted::Queued(op));
        }

        let report = self.sync.process_queued_actions(SyncTrigger::Manual).await?;
        let remaining = self.sync.operations().await;
        let Some(q) = remaining.into_iter().find(|q| q.operation_id == op.operation_id) else {
            return Ok(Submitted::Applied(report));
        };
        if q.status == OperationStatus::Failed {
            return Ok(Submitted::Failed(q));
        }
        if !report.interrupted
            && let Some(blocker) = self.sync.blocking_operation(&q.operation_id).await
        {
            return Ok(Submitted::Held { op: q, blocker });
        }
        Ok(Submitted::Queued(q))
    }
}

enum Submitted {
    Applied(DrainReport),
    Queued(QueuedOperation),
    /// Waiting behind a failed operation on the same chore
    Held {
        op: QueuedOperation,
        blocker: QueuedOperation,
    },
    Failed(QueuedOperation),
}

/// Report a submission; returns the chore's id as the hub knows it, when applied.
fn report_submission(outcome: &Submitted, verb: &str, local_id: &str) -> Result<String> {
    match outcome {
        Submitted::Applied(report) => {
            let id = report
                .created
                .iter()
                .find(|(local, _)| local == local_id)
                .map(|(_, remote)| remote.clone())
                .unwrap_or_else(|| local_id.to_string());
            println!("{} {}: {}", "✓".green(), verb, id.cyan());
            Ok(id)
        }
        Submitted::Queued(op) => {
            println!(
                "{} {} queued as {} (hub unreachable, will sync later)",
                "…".yellow(),
                verb,
                op.operation_id.cyan()
            );
            Ok(local_id.to_string())
        }
        Submitted::Held { op, blocker } => {
            println!(
                "{} {} queued as {}, held behind failed operation {} ({})",
                "!".yellow(),
                verb,
                op.operation_id.cyan(),
                blocker.operation_id.cyan(),
                blocker.last_error.as_deref().unwrap_or("unknown error")
            );
            println!(
                "  Retry it with 'ck retry {}' or drop it with 'ck clear-failed'",
                blocker.operation_id
            );
            Ok(local_id.to_string())
        }
        Submitted::Failed(op) => bail!(
            "{} rejected by hub: {} (see 'ck queue', retry with 'ck retry {}')",
            verb,
            op.last_error.as_deref().unwrap_or("unknown error"),
            op.operation_id
        ),
    }
}

fn print_report(report: &DrainReport) {
    if report.already_running {
        println!("{} Sync already in progress", "→".blue());
        return;
    }
    println!(
        "{} Sync: {} applied, {} failed, {} held, {} remaining",
        if report.failed > 0 { "!".red() } else { "✓".green() },
        report.applied,
        report.failed,
        report.held,
        report.remaining
    );
    if report.interrupted {
        println!("  {} Hub became unreachable during sync", "✗".red());
    }
}

fn print_bulk_result(result: &BulkResult, verb: &str) {
    println!("{} {} {} chore(s)", "✓".green(), verb, result.queued.len());
    for id in &result.not_found {
        println!("  {} Not found: {}", "✗".red(), id.cyan());
    }
    for (id, reason) in &result.skipped {
        println!("  {} Skipped {}: {}", "!".yellow(), id.cyan(), reason);
    }
}

fn print_bulk_stats(stats: &BulkStats) {
    println!("{}: {}", "Selected".bold(), stats.total);
    println!("{}: {}", "Completed".bold(), stats.completed);
    println!("{}: {}", "Pending".bold(), stats.pending);
    println!("{}: {}", "Overdue".bold(), stats.overdue);
    println!("{}: {}", "Unassigned".bold(), stats.unassigned);
    println!(
        "{}: {} high, {} medium, {} low",
        "Priority".bold(),
        stats.high_priority,
        stats.medium_priority,
        stats.low_priority
    );
}

/// Archive commands talk to the hub directly; there is no offline path.
fn hub_required<T>(result: Result<T, RemoteError>) -> Result<T> {
    result.map_err(|e| {
        if e.is_unavailable() {
            eyre!("The archive needs a reachable hub: {}", e)
        } else {
            eyre!(e)
        }
    })
}

async fn run(cli: Cli) -> Result<()> {
    let store_dir = get_store_dir(&cli);

    match cli.command {
        Command::Init => {
            Hub::init(&store_dir).context("Failed to initialize hub storage")?;
            SqliteKv::open(&store_dir).context("Failed to initialize device store")?;
            if !store_dir.join(STORE_DIR).join(chorekeeper::config::CONFIG_FILE).exists() {
                Config::default().save(&store_dir)?;
            }
            println!("{} Initialized household in {}", "✓".green(), store_dir.display());
        }

        Command::Add {
            title,
            description,
            priority,
            assignee,
            assignee_name,
            due,
            category,
            recurring,
            after,
            blocks_others,
        } => {
            let app = App::open(&store_dir).await?;
            let (chores, online) = app.snapshot().await?;

            let mut draft = ChoreDraft::new(title)
                .with_priority(parse_priority(&priority)?)
                .blocking_others(blocks_others);
            if let Some(d) = description {
                draft = draft.with_description(d);
            }
            if let Some(a) = assignee {
                draft = draft.with_assignee(a, assignee_name.as_deref());
            }
            if let Some(d) = due {
                draft = draft.with_due_date(parse_due(&d)?);
            }
            if let Some(c) = category {
                draft = draft.with_category(c);
            }
            if let Some(r) = recurring {
                draft = draft.recurring(parse_recurrence(&r)?);
            }

            let mut deps = Vec::new();
            for dep in after {
                let resolved = app.sync.resolve_chore_id(&dep).await;
                if !chores.iter().any(|c| c.id == resolved) {
                    bail!("Prerequisite not found: {}", dep);
                }
                deps.push(resolved);
            }
            draft = draft.with_dependencies(deps);

            let local_id = draft.local_id.clone();
            let outcome = app.submit(OperationPayload::CreateChore { draft }, online).await?;
            report_submission(&outcome, "Added", &local_id)?;
        }

        Command::List { pending, completed } => {
            let app = App::open(&store_dir).await?;
            let (chores, online) = app.snapshot().await?;
            if !online {
                println!("{}", "Offline: showing cached chores".yellow());
            }

            let shown: Vec<&Chore> = chores
                .iter()
                .filter(|c| (!pending || !c.is_completed()) && (!completed || c.is_completed()))
                .collect();

            if shown.is_empty() {
                println!("{}", "No chores found".dimmed());
            }
            for chore in shown {
                print_chore_line(chore, &chores);
            }
        }

        Command::Show { id } => {
            let app = App::open(&store_dir).await?;
            let (chore, chores, _) = app.find(&id).await?;

            println!("{}: {}", "ID".bold(), chore.id.cyan());
            println!("{}: {}", "Title".bold(), chore.title);
            println!("{}: {}", "State".bold(), format_state(chore_state(&chore, &chores)));
            println!("{}: {}", "Priority".bold(), chore.priority);
            if let Some(desc) = &chore.description {
                println!("{}: {}", "Description".bold(), desc);
            }
            if let Some(assignee) = chore.assignee_id.as_deref().filter(|a| !a.is_empty()) {
                let name = chore.assignee_name.as_deref().unwrap_or(assignee);
                println!("{}: {} ({})", "Assignee".bold(), name, assignee);
            }
            if let Some(category) = &chore.category {
                println!("{}: {}", "Category".bold(), category);
            }
            if let Some(due) = &chore.due_date {
                println!("{}: {}", "Due".bold(), due);
            }
            if let Some(pattern) = chore.recurrence_pattern.filter(|_| chore.is_recurring) {
                println!("{}: {}", "Repeats".bold(), pattern);
            }
            println!("{}: {}", "Created".bold(), chore.created_at);
            println!("{}: {}", "Updated".bold(), chore.updated_at);
            if let Some(completed_at) = &chore.completed_at {
                let by = chore.completed_by.as_deref().map(|b| format!(" by {}", b)).unwrap_or_default();
                println!("{}: {}{}", "Completed".bold(), completed_at, by);
            }

            let deps = get_dependencies(&chore, &chores);
            if !deps.is_empty() {
                println!("{}:", "Waits on".bold());
                for dep in deps {
                    print!("  ");
                    print_chore_line(dep, &chores);
                }
            }
            let waiting = dependents(&chore.id, &chores);
            if !waiting.is_empty() {
                println!("{}:", "Needed by".bold());
                for dep in waiting {
                    print!("  ");
                    print_chore_line(dep, &chores);
                }
            }
        }

        Command::Complete { id, by } => {
            let app = App::open(&store_dir).await?;
            let (chore, chores, online) = app.find(&id).await?;
            check_completion(&chore, &chores)?;

            let payload = OperationPayload::CompleteChore {
                chore_id: chore.id.clone(),
                completed_at: Utc::now(),
                completed_by: by,
            };
            let outcome = app.submit(payload, online).await?;
            report_submission(&outcome, "Completed", &chore.id)?;
        }

        Command::Claim { id, user, name } => {
            let app = App::open(&store_dir).await?;
            let (chore, _, online) = app.find(&id).await?;

            let payload = OperationPayload::ClaimChore {
                chore_id: chore.id.clone(),
                assignee_id: user,
                assignee_name: name,
            };
            let outcome = app.submit(payload, online).await?;
            report_submission(&outcome, "Claimed", &chore.id)?;
        }

        Command::Edit {
            id,
            title,
            description,
            clear_description,
            priority,
            category,
            due,
            clear_due,
            after,
        } => {
            let app = App::open(&store_dir).await?;
            let (chore, chores, online) = app.find(&id).await?;

            let mut patch = ChorePatch {
                title,
                category: category.map(Some),
                ..ChorePatch::default()
            };
            if clear_description {
                patch.description = Some(None);
            } else if let Some(d) = description {
                patch.description = Some(Some(d));
            }
            if let Some(p) = priority {
                patch.priority = Some(parse_priority(&p)?);
            }
            if clear_due {
                patch.due_date = Some(None);
            } else if let Some(d) = due {
                patch.due_date = Some(Some(parse_due(&d)?));
            }
            if let Some(after) = after {
                let mut deps = Vec::new();
                for dep in after {
                    deps.push(app.sync.resolve_chore_id(&dep).await);
                }
                validate_dependencies(&chore.id, &deps, &chores)?;
                patch.dependencies = Some(deps);
            }

            if patch.is_empty() {
                bail!("Nothing to change");
            }

            let outcome = app
                .submit(OperationPayload::UpdateChore { chore_id: chore.id.clone(), patch }, online)
                .await?;
            report_submission(&outcome, "Updated", &chore.id)?;
        }

        Command::Delete { id } => {
            let app = App::open(&store_dir).await?;
            let (chore, chores, online) = app.find(&id).await?;

            let waiting = dependents(&chore.id, &chores);
            if !waiting.is_empty() {
                let titles: Vec<&str> = waiting.iter().map(|c| c.title.as_str()).collect();
                println!(
                    "{} Still listed as a prerequisite of: {}",
                    "!".yellow(),
                    titles.join(", ")
                );
            }

            let outcome = app
                .submit(OperationPayload::DeleteChore { chore_id: chore.id.clone() }, online)
                .await?;
            report_submission(&outcome, "Deleted", &chore.id)?;
        }

        Command::Depend {
            chore_id,
            prerequisite_id,
        } => {
            let app = App::open(&store_dir).await?;
            let (chore, chores, online) = app.find(&chore_id).await?;
            let prerequisite = app.sync.resolve_chore_id(&prerequisite_id).await;
            if !chores.iter().any(|c| c.id == prerequisite) {
                bail!("Prerequisite not found: {}", prerequisite_id);
            }
            if chore.dependencies.contains(&prerequisite) {
                println!("{} {} already waits on {}", "✓".green(), chore.id.cyan(), prerequisite.cyan());
                return Ok(());
            }

            let mut deps = chore.dependencies.clone();
            deps.push(prerequisite.clone());
            validate_dependencies(&chore.id, &deps, &chores)?;

            let patch = ChorePatch {
                dependencies: Some(deps),
                ..ChorePatch::default()
            };
            let outcome = app
                .submit(OperationPayload::UpdateChore { chore_id: chore.id.clone(), patch }, online)
                .await?;
            report_submission(&outcome, "Dependency added", &chore.id)?;
        }

        Command::Ready => {
            let app = App::open(&store_dir).await?;
            let (chores, _) = app.snapshot().await?;
            let ready = completable_chores(&chores);

            if ready.is_empty() {
                println!("{}", "No chores ready".dimmed());
            } else {
                println!("{} {} chore(s) ready to complete:", "→".blue(), ready.len());
                for chore in ready {
                    println!("  {} {} {}", chore.id.cyan(), chore.priority, chore.title);
                }
            }
        }

        Command::Bulk { action } => {
            let app = App::open(&store_dir).await?;
            let (chores, online) = app.snapshot().await?;

            let (result, verb) = match action {
                BulkCommand::Complete { ids, ready, by } => {
                    let ids: Vec<String> = if ready {
                        completable_chores(&chores).iter().map(|c| c.id.clone()).collect()
                    } else {
                        ids
                    };
                    if ids.is_empty() {
                        bail!("No chores selected");
                    }
                    let result = app.sync.bulk_complete(&ids, &chores, by.as_deref(), Utc::now()).await?;
                    (result, "Completed")
                }
                BulkCommand::Delete { ids } => (app.sync.bulk_delete(&ids, &chores).await?, "Deleted"),
                BulkCommand::Assign { user, ids, name } => {
                    let result = app.sync.bulk_assign(&ids, &chores, &user, name.as_deref()).await?;
                    (result, "Assigned")
                }
                BulkCommand::Update {
                    ids,
                    priority,
                    category,
                    due,
                    clear_due,
                } => {
                    let mut patch = ChorePatch {
                        category: category.map(Some),
                        ..ChorePatch::default()
                    };
                    if let Some(p) = priority {
                        patch.priority = Some(parse_priority(&p)?);
                    }
                    if clear_due {
                        patch.due_date = Some(None);
                    } else if let Some(d) = due {
                        patch.due_date = Some(Some(parse_due(&d)?));
                    }
                    if patch.is_empty() {
                        bail!("Nothing to change");
                    }
                    (app.sync.bulk_update(&ids, &chores, &patch).await?, "Updated")
                }
                BulkCommand::Stats { ids } => {
                    let mut selected = Vec::new();
                    if ids.is_empty() {
                        selected.extend(chores.iter().map(|c| c.id.clone()));
                    }
                    for id in ids {
                        selected.push(app.sync.resolve_chore_id(&id).await);
                    }
                    print_bulk_stats(&bulk_stats(&chores, &selected, Utc::now()));
                    return Ok(());
                }
            };

            print_bulk_result(&result, verb);
            if result.queued.is_empty() {
                return Ok(());
            }
            if online {
                print_report(&app.sync.sync_pending_data().await?);
            } else {
                println!("  {} Hub unreachable, changes will sync later", "…".yellow());
            }
        }

        Command::Archive { action } => {
            let app = App::open(&store_dir).await?;
            let mut policy = app.config.archive.clone();

            match action {
                ArchiveCommand::Run { days, by } => {
                    if let Some(days) = days {
                        policy.after_days = days;
                    }
                    let result = hub_required(app.client.archive_completed(&policy, &by).await)?;
                    println!(
                        "{} Archived {} chore(s) completed over {} days ago",
                        "✓".green(),
                        result.archived.len(),
                        policy.after_days
                    );
                    for (id, reason) in &result.errors {
                        println!("  {} {}: {}", "✗".red(), id.cyan(), reason);
                    }
                }

                ArchiveCommand::Chore { id, by } => {
                    let resolved = app.sync.resolve_chore_id(&id).await;
                    if is_local_id(&resolved) {
                        bail!("Chore {} has not synced yet; run 'ck sync' first", id);
                    }
                    hub_required(app.client.archive_chore(&resolved, &by).await)?;
                    println!("{} Archived {}", "✓".green(), resolved.cyan());
                }

                ArchiveCommand::Restore { id, by } => {
                    let restored = hub_required(app.client.restore_chore(&id, &by).await)?;
                    println!("{} Restored {}", "✓".green(), restored.id.cyan());
                }

                ArchiveCommand::List { limit } => {
                    let archived = hub_required(app.client.archived_chores(limit).await)?;
                    if archived.is_empty() {
                        println!("{}", "Archive is empty".dimmed());
                    }
                    for entry in archived {
                        println!(
                            "{} {} {}",
                            entry.chore.id.cyan(),
                            entry.chore.title,
                            format!("archived {} by {}", entry.archived_at, entry.archived_by).dimmed()
                        );
                    }
                    return Ok(());
                }

                ArchiveCommand::Stats => {
                    let stats = hub_required(app.client.archive_stats().await)?;
                    println!("{}: {}", "Archived chores".bold(), stats.total_archived);
                    if let (Some(oldest), Some(newest)) = (stats.oldest_archived, stats.newest_archived) {
                        println!("{}: {}", "Oldest".bold(), oldest);
                        println!("{}: {}", "Newest".bold(), newest);
                    }
                    return Ok(());
                }

                ArchiveCommand::Cleanup { keep_days } => {
                    if let Some(days) = keep_days {
                        policy.keep_days = days;
                    }
                    let removed = hub_required(app.client.cleanup_archive(&policy).await)?;
                    println!(
                        "{} Deleted {} archived chore(s) older than {} days",
                        "✓".green(),
                        removed,
                        policy.keep_days
                    );
                    return Ok(());
                }
            }

            // The chore list changed on the hub; refresh the device copy
            app.snapshot().await?;
        }

        Command::Sync => {
            let app = App::open(&store_dir).await?;
            let report = app.sync.sync_pending_data().await?;
            print_report(&report);
            if !report.interrupted
                && let Ok(chores) = app.client.chores().await
            {
                app.sync.cache_chores(chores).await?;
            }
        }

        Command::Status => {
            let app = App::open(&store_dir).await?;
            let online = app.client.ping().await.is_ok();
            let summary = app.sync.get_offline_summary().await?;
            let status = app.sync.get_sync_status().await?;

            if online {
                println!("{} Hub reachable", "✓".green());
            } else {
                println!("{} Hub unreachable (offline)", "✗".red());
            }
            println!("{}: {}", "Cached chores".bold(), summary.total_chores);
            println!("{}: {}", "Queued changes".bold(), summary.pending_chores);
            match status.last_sync {
                Some(ts) => println!("{}: {}", "Last sync".bold(), ts),
                None => println!("{}: {}", "Last sync".bold(), "never".dimmed()),
            }
        }

        Command::Queue => {
            let app = App::open(&store_dir).await?;
            let ops = app.sync.operations().await;
            if ops.is_empty() {
                println!("{}", "Queue is empty".dimmed());
            }
            for op in ops {
                println!(
                    "{} {} {} {} (attempts: {})",
                    format_op_status(op.status),
                    op.operation_id.cyan(),
                    op.kind,
                    op.payload.chore_key(),
                    op.attempts
                );
                if let Some(err) = &op.last_error {
                    println!("    {}", err.dimmed());
                }
            }
        }

        Command::Retry { operation_id } => {
            let app = App::open(&store_dir).await?;
            app.sync.retry_operation(&operation_id).await?;
            println!("{} Operation {} will be sent again", "✓".green(), operation_id.cyan());
            if app.client.ping().await.is_ok() {
                print_report(&app.sync.sync_pending_data().await?);
            }
        }

        Command::ClearFailed => {
            let app = App::open(&store_dir).await?;
            let removed = app.sync.clear_failed().await?;
            println!("{} Dropped {} failed operation(s)", "✓".green(), removed);
        }

        Command::Watch => {
            let app = App::open(&store_dir).await?;
            watch(&app).await?;
        }

        Command::Hub => {
            println!("{} Starting hub for {}", "→".blue(), store_dir.display());

            let config = DaemonConfig::new(&store_dir);
            let mut daemon = Daemon::new(config).context("Failed to create hub")?;
            daemon.run().await.context("Hub error")?;
        }

        Command::HubStop => {
            if !is_daemon_running(&store_dir) {
                println!("{} Hub is not running", "✗".red());
                std::process::exit(1);
            }

            let config = Config::load(&store_dir)?;
            let client = Client::new(&store_dir, config.hub.request_timeout());
            client.shutdown().await.context("Failed to shutdown hub")?;
            println!("{} Hub stopped", "✓".green());
        }

        Command::HubStatus => {
            if is_daemon_running(&store_dir) {
                println!("{} Hub is running", "✓".green());

                let config = Config::load(&store_dir)?;
                let client = Client::new(&store_dir, config.hub.request_timeout());
                if client.ping().await.is_ok() {
                    println!("  {} Responding to requests", "✓".green());
                }
            } else {
                println!("{} Hub is not running", "✗".red());
            }
        }
    }

    Ok(())
}

/// Poll hub reachability and feed the coordinator until interrupted.
async fn watch(app: &App) -> Result<()> {
    let initial = if app.client.ping().await.is_ok() {
        Connectivity::Online
    } else {
        Connectivity::Offline
    };
    println!(
        "{} Watching {} (Ctrl-C to stop)",
        "→".blue(),
        app.root.display()
    );

    let (tx, rx) = mpsc::channel(16);
    let coordinator = SyncCoordinator::new(Arc::clone(&app.sync), initial);
    let worker = tokio::spawn(coordinator.run(rx));
    let mut ticker = tokio::time::interval(app.config.watch_interval());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let state = if app.client.ping().await.is_ok() {
                    Connectivity::Online
                } else {
                    Connectivity::Offline
                };
                let signals = [
                    SyncSignal::Connectivity(state),
                    SyncSignal::Background(BackgroundMessage::sync_due()),
                ];
                for signal in signals {
                    tx.send(signal).await.map_err(|_| eyre!("Sync coordinator stopped"))?;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(tx);
    worker.await.context("Sync coordinator panicked")?;
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
    if let Err(e) = rt.block_on(run(cli)) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
