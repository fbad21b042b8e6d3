use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use servmatch_core::{ServiceRequest, Worker};
use servmatch_dispatch::{report_recent, DispatchConfig, DispatchPipeline, ProfileEdit};
use servmatch_selection::{load_selection_script, ConsoleSelectionProvider, SelectionProvider};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "servmatch")]
#[command(about = "Household service request matcher")]
struct Cli {
    /// Directory holding works_config.json, workers.json and services.json.
    #[arg(long, global = true, env = "SERVMATCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Match every pending request.
    Process {
        /// JSON map of request id to operator answer, instead of prompting.
        #[arg(long)]
        selections: Option<PathBuf>,
    },
    /// List pending requests.
    Pending,
    /// Mark an assigned request done by one of its workers.
    Complete {
        #[arg(long)]
        request: u32,
        #[arg(long)]
        worker: String,
    },
    /// Show a worker's bookings.
    Bookings {
        #[arg(long)]
        worker: String,
        /// Completed bookings instead of ongoing ones.
        #[arg(long)]
        history: bool,
    },
    /// Take a worker in or out of the immediate pool.
    Availability {
        #[arg(long)]
        worker: String,
        #[arg(long, conflicts_with = "off", required_unless_present = "off")]
        on: bool,
        #[arg(long)]
        off: bool,
    },
    /// Change a worker's area or capable works.
    EditWorker {
        #[arg(long)]
        worker: String,
        #[arg(long)]
        area: Option<String>,
        /// Comma-separated work names; replaces the current list.
        #[arg(long, value_delimiter = ',')]
        works: Option<Vec<String>>,
    },
    /// Summarize recent batch runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "servmatch=info,servmatch_dispatch=info,servmatch_selection=info,servmatch_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = DispatchConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    info!(data_dir = %config.data_dir.display(), "servmatch starting");

    match cli.command.unwrap_or(Commands::Process { selections: None }) {
        Commands::Process { selections } => {
            let pipeline = DispatchPipeline::open(config).await?;
            let mut selector: Box<dyn SelectionProvider> = match selections {
                Some(path) => Box::new(load_selection_script(path)?),
                None => Box::new(ConsoleSelectionProvider::new(io::stdin().lock(), io::stdout())),
            };
            let run = pipeline.run_once(selector.as_mut()).await?;
            println!(
                "dispatch complete: run_id={} processed={} assigned={} rejected={} saved={}",
                run.summary.run_id,
                run.summary.processed_count(),
                run.summary.assigned_count(),
                run.summary.rejected_count(),
                run.summary.saved
            );
            if let Some(dir) = run.reports_dir {
                println!("reports: {}", dir.display());
            }
        }
        Commands::Pending => {
            let pipeline = DispatchPipeline::open(config).await?;
            for request in pipeline.pending().await? {
                print_request(&request);
            }
        }
        Commands::Complete { request, worker } => {
            let pipeline = DispatchPipeline::open(config).await?;
            let completed = pipeline.complete(request, &worker).await?;
            print_request(&completed);
        }
        Commands::Bookings { worker, history } => {
            let pipeline = DispatchPipeline::open(config).await?;
            for request in pipeline.bookings(&worker, history).await? {
                print_request(&request);
            }
        }
        Commands::Availability { worker, on, .. } => {
            let pipeline = DispatchPipeline::open(config).await?;
            print_worker(&pipeline.set_availability(&worker, on).await?);
        }
        Commands::EditWorker {
            worker,
            area,
            works,
        } => {
            let pipeline = DispatchPipeline::open(config).await?;
            let edit = ProfileEdit {
                locality: area,
                capable_works: works,
            };
            print_worker(&pipeline.update_profile(&worker, edit).await?);
        }
        Commands::Report { runs } => {
            println!("{}", report_recent(runs, &config.reports_dir)?);
        }
    }

    Ok(())
}

fn print_request(request: &ServiceRequest) {
    let when = match (request.work_date(), request.work_start(), request.work_end()) {
        (Some(date), Some(start), Some(end)) => format!(" {date} {start}-{end}"),
        _ => String::new(),
    };
    let price = request.price().map(|p| format!(" {p:.2}")).unwrap_or_default();
    println!(
        "#{} {} {} {} [{}]{}{}{}",
        request.id,
        request.kind,
        request.status(),
        request.customer_id,
        request.requested_work_names().join(", "),
        when,
        price,
        request
            .rejection_reason()
            .map(|r| format!(" ({r})"))
            .unwrap_or_default()
    );
}

fn print_worker(worker: &Worker) {
    println!(
        "{} {} [{}] {} available={} works=[{}]",
        worker.id,
        worker.name,
        worker.gender,
        worker.locality,
        worker.available,
        worker.capable_work_names().join(", ")
    );
}
