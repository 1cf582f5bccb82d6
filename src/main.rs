//! Command-line batch transformer

use anyhow::{bail, Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use batch_transform_lib::{
    BatchConfig, BatchEngine, BatchEvent, ChunkStage, Credential, EchoBackend, GenerationClient,
    MarkdownFormatter, MemoryStore, ModelBackend, ModelRunner, RunStore, S3Store, Segmenter,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Transform a long text document chunk by chunk with a prioritized list of models
#[derive(Parser, Debug)]
#[command(name = "batch-transform")]
#[command(version)]
struct Cli {
    /// Text file to transform
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Batch configuration (JSON); defaults are used when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Where to write the assembled output
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Optional Markdown run report
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Run id used for persisted state; generated when omitted
    #[arg(long)]
    run_id: Option<String>,

    /// Echo prompts back instead of calling Bedrock
    #[arg(long)]
    dry_run: bool,

    /// Persist run state to this S3 bucket instead of memory
    #[arg(long, env = "BATCH_STATE_BUCKET")]
    state_bucket: Option<String>,

    #[arg(long, env = "BATCH_STATE_PREFIX", default_value = "batch-transform")]
    state_prefix: String,

    #[arg(long, env = "PRIMARY_AWS_ACCESS_KEY_ID", hide_env_values = true)]
    primary_access_key_id: Option<String>,

    #[arg(long, env = "PRIMARY_AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    primary_secret_access_key: Option<String>,

    #[arg(long, env = "PRIMARY_AWS_SESSION_TOKEN", hide_env_values = true)]
    primary_session_token: Option<String>,

    #[arg(long, env = "BACKUP_AWS_ACCESS_KEY_ID", hide_env_values = true)]
    backup_access_key_id: Option<String>,

    #[arg(long, env = "BACKUP_AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    backup_secret_access_key: Option<String>,

    #[arg(long, env = "BACKUP_AWS_SESSION_TOKEN", hide_env_values = true)]
    backup_session_token: Option<String>,
}

impl Cli {
    fn credential(key_id: &Option<String>, secret: &Option<String>, token: &Option<String>) -> Option<Credential> {
        match (key_id, secret) {
            (Some(key_id), Some(secret)) if !key_id.is_empty() && !secret.is_empty() => {
                let credential = Credential::new(key_id, secret);
                Some(match token {
                    Some(token) if !token.is_empty() => credential.with_session_token(token),
                    _ => credential,
                })
            }
            _ => None,
        }
    }

    fn primary(&self) -> Option<Credential> {
        Self::credential(&self.primary_access_key_id, &self.primary_secret_access_key, &self.primary_session_token)
    }

    fn backup(&self) -> Option<Credential> {
        Self::credential(&self.backup_access_key_id, &self.backup_secret_access_key, &self.backup_session_token)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("batch-transform v{}", batch_transform_lib::VERSION);

    let config = match &cli.config {
        Some(path) => BatchConfig::from_file(path).await?,
        None => BatchConfig::default(),
    };
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("Invalid configuration: {}", problem);
        }
        bail!("Configuration has {} problem(s)", problems.len());
    }

    let primary = match (cli.primary(), cli.dry_run) {
        (Some(credential), _) => credential,
        (None, true) => Credential::new("dry-run", "dry-run"),
        (None, false) => bail!("PRIMARY_AWS_ACCESS_KEY_ID and PRIMARY_AWS_SECRET_ACCESS_KEY must be set"),
    };
    let backup = cli.backup();
    if backup.is_none() {
        warn!("No backup credential configured; authentication failures will fail chunks immediately");
    }

    let text = tokio::fs::read_to_string(&cli.input)
        .await
        .context(format!("Failed to read input file {}", cli.input.display()))?;
    let chunks = Segmenter::with_config(config.segment_config()).segment(&text);
    info!(
        "Split {} characters into {} chunks of ~{} tokens",
        text.chars().count(),
        chunks.len(),
        config.batch_size
    );

    let needs_aws = !cli.dry_run || cli.state_bucket.is_some();
    let sdk_config = if needs_aws {
        Some(aws_config::load_defaults(BehaviorVersion::latest()).await)
    } else {
        None
    };

    let store: Arc<dyn RunStore> = match (&cli.state_bucket, &sdk_config) {
        (Some(bucket), Some(sdk_config)) => {
            info!("Persisting run state to s3://{}/{}", bucket, cli.state_prefix);
            Arc::new(S3Store::new(S3Client::new(sdk_config), bucket.clone(), cli.state_prefix.clone()))
        }
        _ => Arc::new(MemoryStore::new()),
    };

    let backend: Arc<dyn ModelBackend> = match &sdk_config {
        Some(sdk_config) if !cli.dry_run => Arc::new(ModelRunner::new(sdk_config.clone())),
        _ => Arc::new(EchoBackend),
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let client = Arc::new(GenerationClient::new(backend, store.clone()));
    let engine = Arc::new(
        BatchEngine::new(config.clone(), client, store, primary, backup).with_events(events_tx),
    );

    let reporter = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                BatchEvent::Progress { completed, total, chunk, stage: ChunkStage::Processing } => {
                    info!("[{}/{}] chunk {} started", completed, total, chunk.sequence + 1);
                }
                BatchEvent::Progress { completed, total, .. } => {
                    info!("[{}/{}] done", completed, total);
                }
                BatchEvent::ChunkCompleted(chunk) => {
                    info!(
                        "Chunk {} transformed by {}",
                        chunk.sequence + 1,
                        chunk.model.as_deref().unwrap_or("unknown model")
                    );
                }
                BatchEvent::ChunkFailed { sequence, failure, .. } => {
                    warn!("Chunk {} failed: {}", sequence + 1, failure);
                }
            }
        }
    });

    let interrupt = tokio::spawn({
        let engine = engine.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling after in-flight chunks finish");
                engine.cancel();
            }
        }
    });

    let run_id = cli.run_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    engine
        .run_named(run_id.clone(), chunks, config.dispatch_width())
        .await
        .context("Batch run failed")?;

    let output = engine.assemble_text();
    tokio::fs::write(&cli.output, &output)
        .await
        .context(format!("Failed to write output to {}", cli.output.display()))?;

    let stats = engine.stats();
    if let Some(report_path) = &cli.report {
        let report = MarkdownFormatter::format_run_report(engine.config(), &stats, &engine.chunks());
        tokio::fs::write(report_path, report)
            .await
            .context(format!("Failed to write report to {}", report_path.display()))?;
    }

    // the event stream ends once every engine handle is gone
    interrupt.abort();
    drop(engine);
    let _ = reporter.await;

    info!(
        "Run {} complete: {}/{} chunks succeeded, {} failed, {} pending, {} tokens. Output: {}",
        run_id,
        stats.completed,
        stats.total,
        stats.failed,
        stats.pending,
        stats.usage.total_tokens,
        cli.output.display()
    );

    if stats.failed > 0 {
        warn!("{} chunks failed and are missing from the output", stats.failed);
    }

    Ok(())
}
