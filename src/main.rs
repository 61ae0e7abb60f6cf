use anyhow::{Context, Result};
use jwst_archive::{
    api,
    cli::{Cli, Commands},
    config::Config,
    ingest::{
        ArchiveSource, IngestionJob, JobOutcome, JsonlSource, MastClient, MastConfig, ProgressReport,
        RunSummary,
    },
    model::{Month, ARCHIVE_START},
    schema::table_names,
    store::Store,
    ui::{LogUi, Ui, UiApp},
};
use std::process::ExitCode;
use std::time::Instant;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let tui = matches!(cli.command, Commands::Ingest { tui: true, .. });
    if !tui {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::resolve(cli.database)?;

    match cli.command {
        Commands::Init { reset } => {
            let store = Store::open(config.database())
                .with_context(|| format!("Failed to open {:?}", config.database()))?;
            if reset {
                store.reset().context("Failed to reset database")?;
            }
            println!(
                "Database ready at {:?} (tables: {})",
                store.path(),
                table_names().join(", ")
            );
        }

        Commands::Ingest {
            month,
            force,
            months,
            page_size,
            no_products,
            from_dir,
            tui,
        } => {
            let store = Store::open(config.database())
                .with_context(|| format!("Failed to open {:?}", config.database()))?;
            let source: Box<dyn ArchiveSource> = match from_dir {
                Some(dir) => Box::new(JsonlSource::new(dir)),
                None => Box::new(MastClient::new(MastConfig {
                    page_size,
                    resolve_products: !no_products,
                })?),
            };
            let job = IngestionJob::new(&store, source.as_ref());

            let start = Instant::now();
            let outcomes = if tui {
                let mut ui = UiApp::new()?;
                let outcomes = run_ingest(&job, month, force, months, &mut ui);
                let summary = match &outcomes {
                    Ok(o) => summarize(o, start),
                    Err(e) => format!("Error: {:#}", e),
                };
                ui.finish(&summary)?;
                outcomes?
            } else {
                run_ingest(&job, month, force, months, &mut LogUi::new())?
            };

            for outcome in &outcomes {
                println!("{}", outcome);
            }
            println!("{}", summarize(&outcomes, start));
            if outcomes.iter().any(JobOutcome::is_failure) {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Progress { json } => {
            let store = Store::open(config.database())?;
            let conn = store.connect()?;
            let report = ProgressReport::build(&conn, Month::current())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
        }

        Commands::Query { path, params } => {
            let store = Store::open(config.database())?;
            let request = Commands::query_request(&path, &params);
            match request.and_then(|(route, params)| api::handle(&store, &route, &params)) {
                Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
                Err(e) => {
                    println!("{}", serde_json::to_string_pretty(&api::error_body(&e))?);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Explicit month, or up to `months` incomplete months in calendar order.
/// A failed month does not stop the run.
fn run_ingest<S, U>(
    job: &IngestionJob<'_, S>,
    month: Option<Month>,
    force: bool,
    months: u32,
    ui: &mut U,
) -> Result<Vec<JobOutcome>>
where
    S: ArchiveSource + ?Sized,
    U: Ui,
{
    if let Some(month) = month {
        return Ok(vec![job.run_month(month, force, ui)?]);
    }

    let current = Month::current();
    let mut from = ARCHIVE_START;
    let mut outcomes = Vec::new();
    for _ in 0..months {
        if ui.should_stop() {
            break;
        }
        let outcome = job.run_next_from(from, current, ui)?;
        let caught_up = match &outcome {
            JobOutcome::CaughtUp => true,
            JobOutcome::Completed { month, .. }
            | JobOutcome::Failed { month, .. }
            | JobOutcome::AlreadyComplete(month) => {
                from = month.succ();
                false
            }
        };
        outcomes.push(outcome);
        if caught_up {
            break;
        }
    }
    Ok(outcomes)
}

fn summarize(outcomes: &[JobOutcome], start: Instant) -> String {
    let run: RunSummary = outcomes.iter().collect();
    format!(
        "{} month(s) complete, {} failed, {} observations inserted in {:.1}s",
        run.completed,
        run.failed,
        run.inserted,
        start.elapsed().as_secs_f64()
    )
}
