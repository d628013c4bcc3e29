use anyhow::{Context, Result};
use b2_image_uploader::mime;
use b2_image_uploader::models::{Config, ImagePayload, StdinUploadRequest, UploadOutcome};
use b2_image_uploader::UploadPipeline;
use base64::Engine as _;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "b2-image-uploader")]
#[command(about = "Optimize images and upload them to Backblaze B2 behind a CDN")]
struct CliArgs {
    /// Image files to upload. Each prints one JSON outcome line, in order.
    /// Stored as `<millis>_<sanitized name>.<ext>`.
    #[arg(value_name = "FILE", required_unless_present = "stdin_json")]
    files: Vec<PathBuf>,

    /// Read {"image": <base64>, "filename", "content_type"} from stdin.
    #[arg(long, conflicts_with = "files")]
    stdin_json: bool,

    /// Declared content type for file inputs (inferred when omitted).
    #[arg(long)]
    content_type: Option<String>,

    /// Skip the start-up reachability check.
    #[arg(long)]
    skip_preflight: bool,
}

fn parse_stdin_request(raw: &str) -> b2_image_uploader::Result<ImagePayload> {
    let request: StdinUploadRequest = serde_json::from_str(raw)?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(request.image.trim())?;
    Ok(ImagePayload::with_inferred_type(
        bytes,
        request.filename,
        request.content_type,
    ))
}

fn print_outcome(outcome: &UploadOutcome) -> Result<()> {
    println!("{}", serde_json::to_string(outcome)?);
    Ok(())
}

async fn read_file_payload(
    path: PathBuf,
    content_type: Option<String>,
    stored_at_millis: i64,
) -> Result<ImagePayload> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let original = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Invalid file name: {}", path.display()))?;
    let filename = mime::stored_name(original, stored_at_millis);
    Ok(ImagePayload::with_inferred_type(bytes, filename, content_type))
}

async fn upload_files(
    pipeline: Arc<UploadPipeline>,
    files: Vec<PathBuf>,
    content_type: Option<String>,
) -> Vec<UploadOutcome> {
    // One tick per file so same-named files in a batch never share an object.
    let batch_start = chrono::Utc::now().timestamp_millis();
    let mut tasks = JoinSet::new();
    for (index, path) in files.into_iter().enumerate() {
        let pipeline = Arc::clone(&pipeline);
        let content_type = content_type.clone();
        let stored_at = batch_start + index as i64;
        tasks.spawn(async move {
            let outcome = match read_file_payload(path, content_type, stored_at).await {
                Ok(payload) => pipeline.run(payload).await,
                Err(e) => UploadOutcome::failed(format!("{:#}", e)),
            };
            (index, outcome)
        });
    }

    let mut outcomes: Vec<Option<UploadOutcome>> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => {
                if outcomes.len() <= index {
                    outcomes.resize(index + 1, None);
                }
                outcomes[index] = Some(outcome);
            }
            Err(e) => error!("Upload task failed: {}", e),
        }
    }

    outcomes
        .into_iter()
        .map(|o| o.unwrap_or_else(|| UploadOutcome::failed("Upload task aborted")))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "b2_image_uploader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();

    let pipeline = Config::from_env().and_then(|config| UploadPipeline::from_config(&config));
    let pipeline = match pipeline {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to initialize upload pipeline: {}", e);
            std::process::exit(1);
        }
    };

    if !args.skip_preflight {
        if let Err(e) = pipeline.preflight().await {
            error!("Upload pipeline disabled: {}", e);
            std::process::exit(1);
        }
    }

    let outcomes = if args.stdin_json {
        let mut raw = String::new();
        tokio::io::stdin()
            .read_to_string(&mut raw)
            .await
            .context("Failed to read stdin")?;
        let outcome = match parse_stdin_request(&raw) {
            Ok(payload) => pipeline.run(payload).await,
            Err(e) => UploadOutcome::failed(e.to_string()),
        };
        vec![outcome]
    } else {
        info!("Uploading {} file(s)", args.files.len());
        upload_files(Arc::new(pipeline), args.files, args.content_type).await
    };

    for outcome in &outcomes {
        print_outcome(outcome)?;
    }

    let failed = outcomes.iter().filter(|o| !o.success).count();
    if failed > 0 {
        error!("{} of {} upload(s) failed", failed, outcomes.len());
        std::process::exit(1);
    }
    Ok(())
}
