use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiln_common::config::Config;
use kiln_common::store::RedisStore;
use kiln_common::types::{Sdk, Status};
use kiln_engine::service::JobService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln - submit code jobs and watch them run", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a source file and watch the job until it reaches a terminal state
    Run {
        /// SDK to run the file with (java, go, python, scio)
        #[arg(short, long)]
        sdk: String,

        /// Path to the source file
        file: PathBuf,
    },

    /// Show the current status of a job
    Status {
        job_id: Uuid,
    },

    /// Ask a running job to stop
    Cancel {
        job_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let store = RedisStore::connect(&config.redis_url)
        .await
        .context("failed to connect to the state store")?;
    let service = JobService::new(Arc::new(store), config);

    match cli.command {
        Commands::Run { sdk, file } => run_and_watch(&service, &sdk, &file).await?,
        Commands::Status { job_id } => {
            let status = service.status(job_id).await?;
            println!("{status}");
        }
        Commands::Cancel { job_id } => {
            service.cancel(job_id).await?;
            println!("cancel requested for {job_id}");
        }
    }

    Ok(())
}

async fn run_and_watch(service: &JobService, sdk: &str, file: &Path) -> Result<()> {
    let sdk = Sdk::from_str(sdk)
        .with_context(|| format!("unknown sdk: {sdk} (valid: java, go, python, scio)"))?;
    let code = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let job_id = service.submit(sdk, &code).await?;
    println!("job {job_id} submitted");

    let mut last: Option<Status> = None;
    loop {
        let status = service.status(job_id).await?;
        if last != Some(status) {
            println!("status: {status}");
            last = Some(status);
        }
        if status.is_terminal() {
            print_outputs(service, job_id, status).await;
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Ok(())
}

async fn print_outputs(service: &JobService, job_id: Uuid, status: Status) {
    if let Ok(output) = service.compile_output(job_id).await {
        if !output.is_empty() {
            println!("--- compile output ---");
            println!("{output}");
        }
    }
    match status {
        Status::Finished => {
            if let Ok(output) = service.run_output(job_id).await {
                println!("--- run output ---");
                println!("{output}");
            }
        }
        Status::RunError => {
            if let Ok(output) = service.run_error(job_id).await {
                println!("--- run error ---");
                println!("{output}");
            }
        }
        _ => {}
    }
}
