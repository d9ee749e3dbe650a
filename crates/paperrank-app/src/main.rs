//! paperrank application binary - composition root.
//!
//! 1. Parse the command line and load configuration from TOML
//! 2. Initialise tracing
//! 3. Open the SQLite store and the configured result sink
//! 4. Dispatch the subcommand (pipeline loop, ranking, merge, reports)
//!
//! The process exit status of `run` reflects whether the final iteration
//! succeeded.

mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use paperrank_core::cancel::{CancelFlag, ShutdownSignal};
use paperrank_core::config::{PaperrankConfig, SinkBackend};
use paperrank_core::error::PaperrankError;
use paperrank_merge::{MergeEngine, SqliteEntityStore};
use paperrank_pipeline::{build_stages, Orchestrator, OrchestratorOptions, PipelineContext};
use paperrank_ranking::{
    run_ranking_cycle, ColumnSink, HBaseRestSink, MemorySink, RankingError, SqliteColumnStore,
};
use paperrank_storage::{Database, PaperRepository};

use cli::{expand_home, CliArgs, Command};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Build the result sink selected in `[sink]`.
fn open_sink(config: &PaperrankConfig, db: &Arc<Database>) -> Arc<dyn ColumnSink> {
    match config.sink.backend {
        SinkBackend::Memory => Arc::new(MemorySink::new()),
        SinkBackend::Sqlite => Arc::new(SqliteColumnStore::new(Arc::clone(db))),
        SinkBackend::Hbase => Arc::new(HBaseRestSink::new(
            &config.sink.hbase_url,
            Duration::from_secs(config.sink.request_timeout_secs),
        )),
    }
}

/// Trigger `shutdown` on Ctrl+C or SIGTERM.
fn listen_for_signals(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("Interrupt received, finishing current stage");
        shutdown.trigger();
    });
}

/// Load the config file if present, defaults otherwise.
fn load_config(path: &Path) -> AppResult<PaperrankConfig> {
    if path.exists() {
        Ok(PaperrankConfig::load(path)?)
    } else {
        Ok(PaperrankConfig::default())
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_config(path: &Path, force: bool) -> AppResult<u8> {
    if path.exists() && !force {
        eprintln!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
        return Ok(1);
    }
    PaperrankConfig::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(0)
}

async fn run_pipeline(
    config: &PaperrankConfig,
    db: Arc<Database>,
    single: bool,
    iterations: Option<u64>,
    json: bool,
) -> AppResult<u8> {
    let sink = open_sink(config, &db);
    let stages = build_stages(config, Arc::clone(&db), sink)?;

    let mut options = OrchestratorOptions::from(&config.pipeline);
    if single {
        options = options.single();
    } else if iterations.is_some() {
        options.max_iterations = iterations;
    }

    let shutdown = ShutdownSignal::new();
    listen_for_signals(shutdown.clone());

    let orchestrator = Orchestrator::new(PipelineContext::new(db, shutdown), stages, options);
    tracing::info!(run_id = %orchestrator.run_id(), "Pipeline run starting");
    let summary = orchestrator.run().await;

    if json {
        print_json(&summary)?;
    } else {
        println!("{}", summary);
    }
    Ok(summary.exit_code() as u8)
}

async fn rank_once(config: &PaperrankConfig, db: Arc<Database>, json: bool) -> AppResult<u8> {
    let sink = open_sink(config, &db);
    let ranking = config.ranking.clone();
    let cancel = CancelFlag::new();

    let shutdown = ShutdownSignal::new();
    listen_for_signals(shutdown.clone());
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        shutdown.wait().await;
        on_interrupt.cancel();
    });

    let result = tokio::task::spawn_blocking(move || {
        run_ranking_cycle(&PaperRepository::new(db), sink.as_ref(), &ranking, &cancel)
    })
    .await?;

    let report = match result {
        Ok(report) => report,
        Err(RankingError::Cancelled) => {
            tracing::warn!("Ranking cancelled, rows already written were kept");
            return Err(PaperrankError::ShuttingDown.into());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        print_json(&report)?;
    } else if report.skipped {
        println!(
            "Skipped: too few usable embeddings (minimum {})",
            config.ranking.min_papers
        );
    } else {
        println!("Sources ranked:   {}", report.sources_ranked);
        println!("Rows written:     {}", report.rows_written);
        println!("Rows failed:      {}", report.rows_failed);
        println!("Rejected records: {}", report.rejected.len());
        if let Some(verified) = report.verified {
            println!("Read-back check:  {}", if verified { "ok" } else { "MISMATCH" });
        }
        println!("Elapsed:          {:.2}s", report.elapsed.as_secs_f64());
    }
    Ok(if report.rows_failed > 0 || report.verified == Some(false) {
        1
    } else {
        0
    })
}

async fn merge(db: Arc<Database>, json: bool) -> AppResult<u8> {
    let report = tokio::task::spawn_blocking(move || {
        MergeEngine::new(SqliteEntityStore::new(db)).run()
    })
    .await??;

    if json {
        print_json(&report)?;
    } else {
        println!("{}", report);
    }
    Ok(if report.is_clean() { 0 } else { 1 })
}

async fn duplicates(config: &PaperrankConfig, db: Arc<Database>, json: bool) -> AppResult<u8> {
    let sample_limit = config.merge.sample_limit;
    let report = tokio::task::spawn_blocking(move || {
        MergeEngine::new(SqliteEntityStore::new(db)).report(sample_limit)
    })
    .await??;

    if json {
        print_json(&report)?;
    } else {
        println!("{}", report);
    }
    Ok(0)
}

fn stats(db: Arc<Database>, json: bool) -> AppResult<u8> {
    let stats = PaperRepository::new(db).stats()?;
    if json {
        print_json(&stats)?;
    } else {
        println!("Papers:           {}", stats.total_papers);
        println!("With embeddings:  {}", stats.with_embeddings);
        println!("Coverage:         {:.1}%", stats.coverage_pct());
    }
    Ok(0)
}

async fn dispatch(cli: CliArgs) -> AppResult<u8> {
    let config_file = cli.resolve_config_path();

    if let Command::InitConfig { force } = cli.command {
        init_tracing(&cli.resolve_log_filter("info"));
        return init_config(&config_file, force);
    }

    let mut config = load_config(&config_file)?;
    init_tracing(&cli.resolve_log_filter(&config.general.log_level));
    tracing::info!(
        path = %config_file.display(),
        "Starting paperrank v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Some(dir) = cli.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Command::Rank { top_k: Some(k) } = cli.command {
        config.ranking.top_k = k;
    }
    config.validate()?;

    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("paperrank.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    match cli.command {
        Command::Run { single, iterations } => {
            run_pipeline(&config, db, single, iterations, cli.json).await
        }
        Command::Rank { .. } => rank_once(&config, db, cli.json).await,
        Command::Merge => merge(db, cli.json).await,
        Command::Duplicates => duplicates(&config, db, cli.json).await,
        Command::Stats => stats(db, cli.json),
        Command::InitConfig { .. } => Ok(0),
    }
}

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();
    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let class = e
                .downcast_ref::<PaperrankError>()
                .map_or("unclassified", |core| core.class().as_str());
            tracing::error!(error = %e, error_class = class, "paperrank failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
