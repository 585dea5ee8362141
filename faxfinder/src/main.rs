use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use faxfinder::batch::{export_summary, spawn_batch, BatchDriver, BatchSettings};
use faxfinder::checkpoint::{load_for_run, CsvSink, OutputPaths, ResumeMode};
use faxfinder::cli::{Cli, Commands};
use faxfinder::config::{AppConfig, CONFIG_PATH};
use faxfinder::document;
use faxfinder::events::{CancelToken, EventSender};
use faxfinder::extract::FaxExtractor;
use faxfinder::finder::{FaxFinder, FaxLookup};
use faxfinder::logger::{RunLogger, VerbosityLevel};
use faxfinder::retry::TokioSleeper;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise the level follows `-v`. Event lines are
/// already shown by the run logger, so their tracing echo stays quiet.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "faxfinder=warn",
        1 => "faxfinder=info,faxfinder::events=warn",
        _ => "faxfinder=debug,faxfinder::events=warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .try_init();
    if let Err(e) = result {
        eprintln!("⚠️  Warning: Failed to initialise logging: {}", e);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.init {
        let path = cli.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_PATH));
        let created = AppConfig::create_default_config(&path)?;
        println!("✅ Created default configuration file at: {}", created.display());
        println!("   Edit this file to customize settings, then run faxfinder again.");
        return Ok(());
    }

    let verbosity = VerbosityLevel::from_verbose_count(cli.verbose);
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };
    let resume_mode = command.resume_mode();

    match command {
        Commands::Run {
            input,
            output,
            checkpoint,
            summary,
            log_file,
            overrides,
            ..
        } => {
            let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
            overrides.apply(&mut config);
            config.validate()?;

            let mut paths = OutputPaths::derive(
                &input,
                &config.batch.checkpoint_suffix,
                &config.batch.result_suffix,
            );
            if let Some(output) = output {
                paths.result = output;
            }
            if let Some(checkpoint) = checkpoint {
                paths.checkpoint = checkpoint;
            }
            let logger = match log_file {
                Some(path) => RunLogger::with_log_file(verbosity, path),
                None => RunLogger::new(verbosity),
            };
            run_batch(&config, &input, paths, resume_mode, summary.as_deref(), logger).await
        }
        Commands::Lookup { name, url, overrides } => {
            let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
            overrides.apply(&mut config);
            config.validate()?;
            let finder = FaxFinder::from_config(&config)?;

            let found = with_event_printer(verbosity, |events| async move {
                finder.lookup(&name, url.as_deref(), &events).await
            })
            .await;
            print_lookup(found)
        }
        Commands::Extract { file: Some(file), .. } => {
            let body = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read HTML file: {}", file.display()))?;
            match FaxExtractor::default().extract_html(&body) {
                Some(found) => {
                    println!("{}", found.number);
                    eprintln!("   via {} in {}", found.strategy, found.scope);
                    Ok(())
                }
                None => Err(anyhow!("No fax number found in {}", file.display())),
            }
        }
        Commands::Extract { url: Some(url), .. } => {
            let config = AppConfig::load_or_default(cli.config.as_deref())?;
            let finder = FaxFinder::from_config(&config)?;

            let found = with_event_printer(verbosity, |events| async move {
                finder.lookup_url(&url, &events).await
            })
            .await;
            print_lookup(found)
        }
        Commands::Extract { .. } => Err(anyhow!("Either --file or --url is required")),
        Commands::Scan { input, output } => {
            let hits = document::scan_file(&input)?;
            match output {
                Some(path) => {
                    let file = fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    document::write_hits(io::BufWriter::new(file), &hits)?;
                    eprintln!("✅ {} numbers written to {}", hits.len(), path.display());
                }
                None => document::write_hits(io::stdout().lock(), &hits)?,
            }
            Ok(())
        }
    }
}

async fn run_batch(
    config: &AppConfig,
    input: &Path,
    paths: OutputPaths,
    mode: ResumeMode,
    summary: Option<&Path>,
    mut logger: RunLogger,
) -> Result<()> {
    let (table, resumed) = load_for_run(input, &paths.checkpoint, mode)?;
    if resumed {
        logger.info(&format!("Resuming from checkpoint {}", paths.checkpoint.display()));
    }
    logger.info(&format!("Loaded {} records from {}", table.len(), input.display()));

    let finder = FaxFinder::from_config(config)?;
    let driver = Arc::new(BatchDriver::new(
        finder,
        Arc::new(TokioSleeper),
        BatchSettings::from(&config.batch),
    ));
    let total = table.len();
    let sink = CsvSink::new(paths.clone(), config.batch.utf8_bom);
    let mut handle = spawn_batch(driver, table, sink);
    install_interrupt_handler(handle.cancel_token());

    logger.start_progress(total);
    while let Some(event) = handle.next_event().await {
        logger.handle(&event);
    }
    logger.finish_progress();

    let joined = handle.join().await;
    if let Err(e) = logger.export_logs() {
        eprintln!("⚠️  Warning: Failed to export logs: {:#}", e);
    }
    let (_, outcome) = joined?;

    logger.print_final_summary(&outcome, &paths.result);
    if let Some(path) = summary {
        export_summary(&outcome, path)?;
        println!("Summary written to {}", path.display());
    }
    Ok(())
}

/// First Ctrl-C stops the batch after the current record; a second one exits.
fn install_interrupt_handler(token: CancelToken) {
    let mut presses = 0u32;
    let result = ctrlc::set_handler(move || {
        presses += 1;
        if presses == 1 {
            token.cancel();
            eprintln!("\n⚠️  Interrupt received. Finishing the current record and saving...");
        } else {
            eprintln!("⚠️  Force exiting (checkpoint may be incomplete).");
            std::process::exit(130);
        }
    });
    if let Err(e) = result {
        eprintln!(
            "⚠️  Warning: Failed to set Ctrl-C handler: {}. Interrupt signals may not be handled gracefully.",
            e
        );
    }
}

/// Run `work` with an event sender whose events are printed as they arrive.
async fn with_event_printer<T, F, Fut>(verbosity: VerbosityLevel, work: F) -> T
where
    F: FnOnce(EventSender) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let (events, mut rx) = EventSender::channel();
    let printer = tokio::spawn(async move {
        let mut logger = RunLogger::new(verbosity);
        while let Some(event) = rx.recv().await {
            logger.handle(&event);
        }
    });

    let result = work(events).await;
    // The sender was moved into `work` and is gone now, so the printer drains and stops.
    let _ = printer.await;
    result
}

fn print_lookup(found: Result<FaxLookup, faxfinder::error::FaxError>) -> Result<()> {
    let found = found.map_err(|e| anyhow!(e.detail()))?;
    println!("{}", found.number);
    eprintln!("   from {} via {} in {}", found.url, found.strategy, found.scope);
    Ok(())
}
