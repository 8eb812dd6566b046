mod adapter;
mod cancel;
mod filter;
mod navigate;
mod source;

use adapter::IndexedViewer;
use cancel::CancellationToken;
use filter::delta::DeltaTracker;
use filter::pipeline::{MotionFilterPipeline, PipelineConfig};
use rawview_common::config::Config;
use source::device::DeviceSource;
use source::directory::DirectorySequenceSource;
use source::mapped::MappedFileSource;
use source::{FrameSource, InputKind};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let input = match args.next() {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("Usage: rawview <input-path> [config.toml]");
            std::process::exit(1);
        }
    };

    let config = match args.next().map(PathBuf::from) {
        Some(config_path) => match Config::load(&config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", config_path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .with_writer(std::io::stderr)
        .init();

    let metadata = match std::fs::metadata(&input) {
        Ok(m) => m,
        Err(e) => {
            error!(path = %input.display(), error = %e, "unable to stat input");
            std::process::exit(1);
        }
    };
    let kind = InputKind::classify(&metadata);

    info!(
        path = %input.display(),
        ?kind,
        width = config.frame.width,
        height = config.frame.height,
        delta_threshold = config.filter.delta_threshold,
        "starting rawview"
    );

    let source = match open_source(&input, kind, &config).await {
        Ok(s) => s,
        Err(e) => {
            error!(path = %input.display(), error = %e, "failed to open frame source");
            std::process::exit(1);
        }
    };

    let mut viewer = IndexedViewer::new(source);
    info!(source = viewer.source_name(), extent = ?viewer.extent(), "starting viewer");

    let start_index = config.viewer.start_index;
    let result = tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        navigate::run(&mut viewer, start_index, stdin.lock(), stdout.lock())
    })
    .await;

    match result {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            error!(error = %e, "frame retrieval failed");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "viewer task failed");
            std::process::exit(1);
        }
    }
}

/// First Ctrl-C stops the motion filter; once it is stopped, Ctrl-C exits.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if cancel.is_cancelled() {
                info!("interrupted, exiting");
                std::process::exit(130);
            }
            warn!("interrupt received, stopping motion filter");
            cancel.cancel();
        }
    });
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] rawview_common::config::ConfigError),
    #[error(transparent)]
    Source(#[from] source::SourceError),
    #[error(transparent)]
    Pipeline(#[from] filter::pipeline::PipelineError),
    #[error("{path} is {bytes} bytes, smaller than one {width}x{height} frame ({frame_size} bytes)")]
    NoFrames {
        path: String,
        bytes: usize,
        width: u32,
        height: u32,
        frame_size: usize,
    },
}

/// Build the frame source the input path calls for. Directories are run
/// through the motion filter to completion first.
async fn open_source(
    path: &Path,
    kind: InputKind,
    config: &Config,
) -> Result<Box<dyn FrameSource>, StartupError> {
    match kind {
        InputKind::RegularFile => {
            let format = config.frame_format()?;
            let source = MappedFileSource::open(path, format)?;
            if source.frame_count() == 0 {
                return Err(StartupError::NoFrames {
                    path: path.display().to_string(),
                    bytes: source.byte_len(),
                    width: format.width(),
                    height: format.height(),
                    frame_size: format.frame_size(),
                });
            }
            Ok(Box::new(source))
        }
        InputKind::Device => {
            let format = config.frame_format()?;
            Ok(Box::new(DeviceSource::open(path, format)?))
        }
        InputKind::Directory => {
            let directory = DirectorySequenceSource::open(path)?;
            if directory.entries().is_empty() {
                warn!(path = %path.display(), "directory has no files to filter");
            }
            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());

            let pipeline = MotionFilterPipeline::from_directory(
                directory,
                DeltaTracker::new(config.filter.block_size),
                &PipelineConfig::from(&config.filter),
                cancel.clone(),
            );
            let buffer = pipeline.drain().await?;
            if cancel.is_cancelled() {
                warn!(frames = buffer.len(), "motion filter interrupted, showing frames found so far");
            } else if buffer.is_empty() {
                warn!(path = %path.display(), "no motion found in any image");
            } else {
                info!(frames = buffer.len(), "filtered directory ready");
            }
            // Filtering is over either way; from here an interrupt quits.
            cancel.cancel();
            Ok(Box::new(buffer))
        }
    }
}
