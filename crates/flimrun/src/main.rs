//! flimrun: command-line driver for the FLIM saliency pipeline.
//!
//! Runs housekeeping, workspace reset, optional preprocessing, feature
//! extraction, the per-layer model/encode/decode loop and the final
//! decode/detection/delineation tail by invoking the external tools in
//! order.
//!
//! # Usage
//!
//! ```text
//! flimrun [OPTIONS] <LAYER_COUNT> <TARGET_LAYER> <POINTS_PER_MARKER> <MODEL_TYPE> <PREPROC_RADIUS> <RESULT_PATH>
//! flimrun 3 2 1 0 -1 out
//! ```
//!
//! Progress is logged to stderr (`RUST_LOG` controls verbosity, default
//! `info`); the run report goes to stdout.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use flimrun_pipeline::{
    DryRunRunner, FailurePolicy, ImageSource, ModelType, PipelineConfig, RunOptions, RunReport,
    SystemRunner, ToolLayout,
};
use tracing_subscriber::EnvFilter;

/// Drive the FLIM saliency pipeline through its external stages.
///
/// The result directory is destroyed and recreated on every run.
#[derive(Parser)]
#[command(name = "flimrun", version, allow_negative_numbers = true)]
struct Cli {
    /// Number of layers to build, encode and decode (zero or negative:
    /// reuse the layers of a previous run).
    layer_count: i32,

    /// Layer used for the final decode, detection and delineation.
    target_layer: i32,

    /// Feature points sampled per marker (1, 2, ...).
    points_per_marker: i32,

    /// Model type: 0 or 2 encode each layer directly, 1 merges models
    /// across layers before encoding.
    model_type: ModelType,

    /// Preprocessing median radius (zero or negative skips preprocessing).
    preproc_radius: f64,

    /// Result directory.
    result_path: PathBuf,

    /// Raw image directory.
    #[arg(long, default_value = ToolLayout::DEFAULT_IMAGES_DIR)]
    images: PathBuf,

    /// Marker directory.
    #[arg(long, default_value = ToolLayout::DEFAULT_MARKERS_DIR)]
    markers: PathBuf,

    /// Network architecture descriptor.
    #[arg(long, default_value = ToolLayout::DEFAULT_ARCH_PATH)]
    arch: PathBuf,

    /// Preprocessing output directory.
    #[arg(long, default_value = ToolLayout::DEFAULT_FILTERED_DIR)]
    filtered: PathBuf,

    /// Directory containing the stage executables (default: search PATH).
    #[arg(long)]
    tool_dir: Option<PathBuf>,

    /// Working directory for the stage processes.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Skip the housekeeping command.
    #[arg(long)]
    no_cleanup: bool,

    /// Full tool layout as a JSON string.
    ///
    /// When provided, all other layout flags are ignored. The JSON must
    /// be a valid `ToolLayout` serialization; missing fields take their
    /// defaults.
    #[arg(long)]
    layout_json: Option<String>,

    /// Keep going when a stage fails instead of aborting the run.
    #[arg(long)]
    best_effort: bool,

    /// Always extract features from the filtered directory, even when
    /// preprocessing is skipped.
    #[arg(long)]
    legacy_image_source: bool,

    /// Do not decode the target layer again when the layer loop already
    /// decoded it.
    #[arg(long)]
    skip_duplicate_decode: bool,

    /// Log the stage commands without running them or touching the
    /// workspace.
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            layer_count: self.layer_count,
            target_layer: self.target_layer,
            points_per_marker: self.points_per_marker,
            model_type: self.model_type,
            preproc_radius: self.preproc_radius,
            result_path: self.result_path.clone(),
        }
    }

    const fn run_options(&self) -> RunOptions {
        RunOptions {
            failure_policy: if self.best_effort {
                FailurePolicy::BestEffort
            } else {
                FailurePolicy::FailFast
            },
            image_source: if self.legacy_image_source {
                ImageSource::AlwaysFiltered
            } else {
                ImageSource::FollowPreprocessing
            },
            skip_duplicate_target_decode: self.skip_duplicate_decode,
            skip_workspace_reset: self.dry_run,
        }
    }
}

/// Build a [`ToolLayout`] from CLI arguments.
///
/// If `--layout-json` is provided, the JSON is parsed directly and all
/// individual layout flags are ignored.
fn layout_from_cli(cli: &Cli) -> Result<ToolLayout, String> {
    if let Some(ref json) = cli.layout_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --layout-json: {e}"));
    }

    let defaults = ToolLayout::default();
    Ok(ToolLayout {
        images_dir: cli.images.clone(),
        markers_dir: cli.markers.clone(),
        arch_path: cli.arch.clone(),
        filtered_dir: cli.filtered.clone(),
        cleanup: if cli.no_cleanup {
            None
        } else {
            defaults.cleanup
        },
        tool_dir: cli.tool_dir.clone(),
        work_dir: cli.work_dir.clone(),
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let layout = match layout_from_cli(&cli) {
        Ok(l) => l,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let config = cli.pipeline_config();
    let options = cli.run_options();

    let result = if cli.dry_run {
        flimrun_pipeline::run(&config, &layout, &options, &mut DryRunRunner::new())
    } else {
        flimrun_pipeline::run(&config, &layout, &options, &mut SystemRunner)
    };

    match result {
        Ok(report) => print_report(&report, cli.json),
        Err(e) => {
            eprintln!("Pipeline error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> ExitCode {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing report: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", report.report());
    }
    ExitCode::SUCCESS
}
