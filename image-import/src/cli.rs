/// # ucloud-image-import CLI Interface (Module)
///
/// This module implements the CLI for `ucloud-image-import`: command parsing, the async
/// entrypoint, and wiring the concrete UCloud client into the core pipeline.
///
/// All pipeline logic (upload, import, readiness polling, cleanup) lives in the
/// [`image-import-core`] crate. This module only loads configuration, picks the artifact
/// file and reports the outcome.
///
/// ## How To Use
/// - From the command line: `ucloud-image-import import --config import.yaml --artifact disk.raw`
/// - Programmatically or from integration tests: call [`run`] with a constructed [`Cli`].
///
/// [`image-import-core`]: ../../image-import-core/
use crate::client::UCloudClient;
use crate::load_config::load_config;
use anyhow::Result;
use clap::{Parser, Subcommand};
use image_import_core::artifact::ArtifactRef;
use image_import_core::pipeline::run_import;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// CLI for ucloud-image-import: turn a local disk image into a UCloud custom image.
#[derive(Parser)]
#[clap(
    name = "ucloud-image-import",
    version,
    about = "Upload a disk image to UFile and import it as a UCloud custom image"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload the artifact, import it as an image and wait until it is available
    Import {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Build output files; the first one ending in `.<format>` is imported
        #[clap(long = "artifact", required = true)]
        artifacts: Vec<PathBuf>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let result = match cli.command {
        Commands::Import { config, artifacts } => {
            let loaded = load_config(config)?;
            let format = loaded.import.image.format;

            let artifact = match ArtifactRef::locate(&artifacts, format) {
                Some(artifact) => artifact,
                None => {
                    tracing::error!(%format, candidates = artifacts.len(), "No matching artifact file");
                    anyhow::bail!("No {format} image file found in artifact");
                }
            };

            let client = UCloudClient::new(loaded.access)
                .map_err(|e| anyhow::anyhow!("Failed to construct UCloud client: {e}"))?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            let signal_task = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping");
                    on_signal.cancel();
                }
            });

            tracing::info!(command = "import", "Starting image import");
            let outcome = run_import(&loaded.import, &artifact, Arc::new(client), &cancel).await;
            signal_task.abort();

            match outcome {
                Ok(imported) => {
                    tracing::info!(artifact_id = %imported.id(), "Import succeeded");
                    print!("{imported}");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(
                        stage = %e.stage,
                        image_id = e.image_id().unwrap_or(""),
                        error = %e,
                        "Import failed"
                    );
                    if let Some(image) = e.imported() {
                        eprintln!(
                            "Image {} is available in {} (project: {}); the uploaded object was not removed",
                            image.image_id, image.region, image.project_id
                        );
                    } else if let Some(image_id) = e.image_id() {
                        eprintln!("Image {image_id} was created by the provider; check or delete it manually");
                    }
                    Err(anyhow::Error::new(e))
                }
            }
        }
    };

    tracing::info!("exit");
    result
}
