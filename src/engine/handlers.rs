//! Command handlers for process, timestamp and show.

use anyhow::{Context, Result, bail};
use kdam::Animation;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::engine::arg_parser::{Cli, Commands, ProcessArgs};
use crate::engine::progress::{ProgressBarConfig, create_progress_bar, finish_progress, set_progress};
use crate::pipeline::PresentationBuilder;
use crate::queue::{JobQueue, MemoryQueue, QueueSettings};
use crate::repository::CorepoClient;
use crate::store;
use crate::utils::config::{PackagePaths, WorkerConfig};
use crate::utils::{apply_file_to_config, load_presentation_toml, setup_logging};
use crate::worker::{Worker, WorkerSettings};

/// How often the process command checks progress and liveness.
const PROGRESS_TICK: Duration = Duration::from_millis(250);

/// Defaults, then config file, then environment, then CLI.
pub fn resolve_config(cli: &Cli) -> Result<WorkerConfig> {
    let mut config = WorkerConfig::default();
    let file_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(PackagePaths::get().config_filename()));
    match load_presentation_toml(&file_path) {
        Some(file) => apply_file_to_config(&file, &mut config)?,
        None if cli.config.is_some() => bail!("cannot read config file {}", file_path.display()),
        None => {}
    }
    config.apply_process_env()?;

    if let Some(ref db) = cli.db {
        config.db_path = db.clone();
    }
    if let Some(v) = cli.verbose {
        config.verbose = v;
    }
    if let Commands::Process(args) = &cli.command {
        apply_process_args(args, &mut config);
    }
    config.validate()?;
    Ok(config)
}

fn apply_process_args(args: &ProcessArgs, config: &mut WorkerConfig) {
    if let Some(ref url) = args.repository_url {
        config.repository_url = Some(url.clone());
    }
    if let Some(n) = args.threads {
        config.threads = n;
    }
    if let Some(n) = args.pool_size {
        config.pool_size = n;
    }
    if let Some(n) = args.executor_threads {
        config.executor_threads = n;
    }
    if let Some(d) = args.deduplicate {
        config.queue_deduplicate = d;
    }
}

pub fn handle_run(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    setup_logging(config.verbose);
    debug!("{} CONFIG: {:#?}", PackagePaths::get().pkg_name().to_uppercase(), config);
    match &cli.command {
        Commands::Process(args) => handle_process(args, &config),
        Commands::Timestamp { id } => handle_timestamp(id, &config),
        Commands::Show { persistent_work_id } => handle_show(persistent_work_id, &config),
    }
}

fn handle_process(args: &ProcessArgs, config: &WorkerConfig) -> Result<()> {
    let Some(ref url) = config.repository_url else {
        bail!("no repository url; set COREPO_CONTENT_SERVICE_URL or pass --repository-url");
    };
    // Creates the schema before the worker threads race for it.
    store::open_db(&config.db_path)?;

    let client = Arc::new(CorepoClient::new(url, &config.user_agent)?);
    let builder = Arc::new(PresentationBuilder::from_config(client, config)?);
    let queue = Arc::new(MemoryQueue::new(QueueSettings {
        deduplicate: config.queue_deduplicate,
        max_tries: config.max_tries,
        postpone: config.postpone,
    }));
    for (i, work_id) in args.work_ids.iter().enumerate() {
        queue.enqueue(work_id, &format!("cli-{i}"))?;
    }
    let total = args.work_ids.len();

    let worker = Worker::start(
        Arc::clone(&queue) as Arc<dyn JobQueue>,
        builder,
        WorkerSettings {
            threads: config.threads,
            hung_after: config.hung_after,
            ..WorkerSettings::default()
        },
    )?;
    let stop = worker.stop_flag();
    {
        let stop = Arc::clone(&stop);
        let queue = Arc::clone(&queue);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
            let _ = queue.close();
        })
        .context("install Ctrl-C handler")?;
    }

    let bar = args.progress.unwrap_or(false).then(|| {
        create_progress_bar(ProgressBarConfig::new(total, "Processing", Animation::Classic))
    });
    let mut warned_hung = false;
    while !queue.wait_idle(PROGRESS_TICK)? {
        if stop.load(Ordering::Relaxed) {
            warn!("Interrupted; waiting for running jobs");
            break;
        }
        let stats = queue.stats()?;
        if let Some(ref bar) = bar {
            set_progress(bar, stats.completed + stats.failed + stats.collapsed);
        }
        if !warned_hung {
            warned_hung = !worker.is_healthy();
        }
    }
    queue.close()?;
    worker.stop()?;

    let stats = queue.stats()?;
    if let Some(ref bar) = bar {
        finish_progress(bar, stats.completed + stats.failed + stats.collapsed);
    }
    info!(
        "{} completed, {} failed, {} collapsed as duplicates",
        stats.completed, stats.failed, stats.collapsed
    );
    let failed = queue.failed_jobs()?;
    if !failed.is_empty() {
        for f in &failed {
            warn!("{} ({}): {}", f.job.work_id, f.job.tracking_id, f.error);
        }
        bail!("{} job(s) failed", failed.len());
    }
    Ok(())
}

fn handle_timestamp(id: &str, config: &WorkerConfig) -> Result<()> {
    let conn = store::open_db(&config.db_path)?;
    match store::object_modified(&conn, id)? {
        Some(modified) => {
            println!("{}", modified.to_rfc3339());
            Ok(())
        }
        None => bail!("{id} not found"),
    }
}

fn handle_show(persistent_work_id: &str, config: &WorkerConfig) -> Result<()> {
    let conn = store::open_db(&config.db_path)?;
    let Some(doc) = store::load_work(&conn, persistent_work_id)? else {
        bail!("{persistent_work_id} not found");
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&doc.value).context("encode work document")?
    );
    Ok(())
}
