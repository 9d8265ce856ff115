use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use pickabook::cli::CliOptions;
use pickabook::config::{aggregation_policy, client_config, opener, setup_logging};
use pickabook::download::DownloadStatus;
use pickabook::{
    DirectoryTarget, Downloader, HttpFetcher, HttpGenerationClient, ImageBlob, Orchestrator,
    Submission, Workflow, WorkflowState,
};
use tracing::{error, info, warn};

async fn run(cli: CliOptions) -> Result<()> {
    let config = client_config(&cli)?;
    let http = config.build_http()?;
    let client = Arc::new(HttpGenerationClient::with_client(http.clone(), &config));
    let orchestrator = Orchestrator::new(client).with_fanout(cli.fanout);
    let mut workflow = Workflow::new(orchestrator).with_policy(aggregation_policy(&cli));

    workflow.start();

    let primary = ImageBlob::from_path(&cli.photo)
        .await
        .with_context(|| format!("Can't use {} as the photo", cli.photo.display()))?;
    let mut submission = Submission::new(primary);
    if let Some(template) = cli.template.as_deref() {
        let template = ImageBlob::from_path(template)
            .await
            .with_context(|| format!("Can't use {} as the template", template.display()))?;
        submission = submission.with_template(template);
    }

    info!(
        "Creating {} unique variants via {}",
        cli.fanout,
        config.base_url()
    );
    let state = tokio::select! {
        state = workflow.submit(submission) => state?.clone(),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning generation");
            return Err(anyhow!("Interrupted"));
        }
    };

    if let WorkflowState::CapturingInput {
        last_error: Some(cause),
    } = &state
    {
        error!("{}", cause.user_message());
        if let Some(hint) = cause.remedial_hint() {
            error!("Tip: {hint}");
        }
        return Err(anyhow!("Generation failed: {cause}"));
    }

    let artifacts = workflow
        .selection()
        .map(|selection| selection.artifacts().to_vec())
        .unwrap_or_default();
    if artifacts.is_empty() {
        warn!("The service returned no images; nothing to download");
        return Ok(());
    }
    for (index, artifact) in artifacts.iter().enumerate() {
        info!("Variant {}: {artifact}", index + 1);
    }

    for number in &cli.skip {
        let Some(artifact) = number
            .checked_sub(1)
            .and_then(|index| artifacts.get(index))
        else {
            warn!("Ignoring --skip {number}: there are only {} variants", artifacts.len());
            continue;
        };
        if workflow.selection().is_some_and(|s| s.is_selected(artifact)) {
            workflow.toggle(artifact)?;
        }
    }

    let mut target = DirectoryTarget::new(&cli.out_dir);
    if let Some(opener) = opener(&cli) {
        target = target.with_opener(opener);
    }
    let downloader = Downloader::new(HttpFetcher::new(http), target);
    let report = workflow.download_selected(&downloader).await?;

    for item in &report.items {
        match &item.status {
            DownloadStatus::Saved(path) => println!("{}", path.display()),
            DownloadStatus::FellBack { .. } => {
                println!("{} (opened {})", item.file_name, item.artifact)
            }
            DownloadStatus::Failed { reason, fallback } => {
                error!("Could not download {}: {reason}; {fallback}", item.artifact)
            }
        }
    }
    info!(
        "{} of {} selected {} saved",
        report.saved(),
        report.items.len(),
        if report.items.len() == 1 { "image" } else { "images" }
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = CliOptions::parse();

    if setup_logging(cli.debug).is_err() {
        std::process::exit(2);
    }

    if let Err(err) = run(cli).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}
