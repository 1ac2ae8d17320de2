//! Subcommand execution: wires AWS / Postgres adapters into the engine.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use patchflow_aws::{
    AwsClients, DynamoCatalog, DynamoHistoryStore, Ec2Directory, SnsNotifier, SsmExecutor,
};
use patchflow_core::clients::ResultStore;
use patchflow_engine::{
    Collaborators, InstancePlanner, OrchestrationError, Orchestrator, PatchResolver, RunRequest,
    RunStatus,
};
use tokio_util::sync::CancellationToken;

use crate::cli::Command;
use crate::config::{HistoryBackend, WorkerConfig};

/// Exit code for input the run rejected before dispatching.
pub const EXIT_INVALID_INPUT: u8 = 2;
/// Exit code when the run deadline cut the run short.
pub const EXIT_DEADLINE_EXCEEDED: u8 = 3;
/// Exit code when the run was interrupted.
pub const EXIT_CANCELLED: u8 = 130;

pub async fn execute(command: Command, config: WorkerConfig) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run { os_versions } => run(&config, os_versions).await,
        Command::Plan { instances } => plan(&config, &instances).await,
    }
}

async fn run(config: &WorkerConfig, os_versions: Vec<String>) -> anyhow::Result<ExitCode> {
    let request = RunRequest::new(os_versions);
    // Reject bad input before touching AWS or the database.
    if let Err(OrchestrationError::InvalidInput(reason)) = request.os_keys() {
        tracing::error!(reason = %reason, "Invalid run request");
        eprintln!("Invalid input: {reason}");
        return Ok(ExitCode::from(EXIT_INVALID_INPUT));
    }

    let engine_config = config.engine_config()?;
    let aws = AwsClients::load().await;
    let collaborators = Collaborators {
        catalog: Arc::new(DynamoCatalog::new(
            aws.dynamodb.clone(),
            WorkerConfig::require(&config.catalog_table, "PATCH_CATALOG_TABLE")?,
        )),
        directory: Arc::new(Ec2Directory::new(aws.ec2.clone())),
        executor: Arc::new(SsmExecutor::new(aws.ssm.clone())),
        store: history_store(config, &aws).await?,
        notifier: Arc::new(SnsNotifier::new(
            aws.sns.clone(),
            WorkerConfig::require(&config.sns_topic_arn, "SNS_TOPIC_ARN")?,
        )),
    };
    let orchestrator = Orchestrator::new(collaborators, engine_config);

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let result = orchestrator.run(request, cancel).await;
    interrupt.abort();

    let report = match result {
        Ok(report) => report,
        Err(OrchestrationError::InvalidInput(reason)) => {
            eprintln!("Invalid input: {reason}");
            return Ok(ExitCode::from(EXIT_INVALID_INPUT));
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
    );

    Ok(match report.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::DeadlineExceeded => ExitCode::from(EXIT_DEADLINE_EXCEEDED),
        RunStatus::Cancelled => ExitCode::from(EXIT_CANCELLED),
    })
}

async fn plan(config: &WorkerConfig, instances: &[String]) -> anyhow::Result<ExitCode> {
    let catalog_table = WorkerConfig::require(&config.catalog_table, "PATCH_CATALOG_TABLE")?;
    let aws = AwsClients::load().await;
    let planner = InstancePlanner::new(
        Arc::new(Ec2Directory::new(aws.ec2.clone())),
        PatchResolver::new(Arc::new(DynamoCatalog::new(aws.dynamodb.clone(), catalog_table))),
    );

    match planner.plan(instances).await {
        Ok(plans) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&plans).context("Failed to serialize plan")?
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(OrchestrationError::InvalidInput(reason)) => {
            eprintln!("Invalid input: {reason}");
            Ok(ExitCode::from(EXIT_INVALID_INPUT))
        }
    }
}

async fn history_store(
    config: &WorkerConfig,
    aws: &AwsClients,
) -> anyhow::Result<Arc<dyn ResultStore>> {
    match config.history_backend {
        HistoryBackend::DynamoDb => {
            let table = WorkerConfig::require(&config.history_table, "PATCH_HISTORY_TABLE")?;
            Ok(Arc::new(DynamoHistoryStore::new(aws.dynamodb.clone(), table)))
        }
        HistoryBackend::Postgres => {
            let url = WorkerConfig::require(&config.database_url, "DATABASE_URL")?;
            let pool = patchflow_db::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            patchflow_db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Using Postgres history store");
            Ok(Arc::new(patchflow_db::PgHistoryStore::new(pool)))
        }
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("Interrupt received, timing out unfinished jobs");
        cancel.cancel();
    }
}
