//! flimrun-pipeline: orchestration of the FLIM saliency pipeline.
//!
//! Drives a chain of external tools through:
//! housekeeping -> workspace reset -> optional preprocessing ->
//! feature extraction -> per-layer model build / encode / decode ->
//! target layer decode -> detection -> delineation.
//!
//! The tools themselves are opaque. This crate only decides which of
//! them run, in what order, with which positional arguments, and what
//! happens when one of them fails. Every process goes through the
//! [`ProcessRunner`] trait, so the whole sequence can be recorded with
//! [`DryRunRunner`] instead of executed.
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use flimrun_pipeline::{ModelType, PipelineConfig, RunOptions, SystemRunner, ToolLayout};
//!
//! # fn main() -> Result<(), flimrun_pipeline::RunError> {
//! let config = PipelineConfig {
//!     layer_count: 3,
//!     target_layer: 2,
//!     points_per_marker: 1,
//!     model_type: ModelType::Direct,
//!     preproc_radius: -1.0,
//!     result_path: PathBuf::from("out"),
//! };
//! let report = flimrun_pipeline::run(
//!     &config,
//!     &ToolLayout::default(),
//!     &RunOptions::default(),
//!     &mut SystemRunner,
//! )?;
//! println!("{}", report.report());
//! # Ok(())
//! # }
//! ```

pub mod diagnostics;
pub mod pipeline;
pub mod runner;
pub mod stage;
pub mod types;
pub mod workspace;

pub use diagnostics::{Clock, InvocationOutcome, InvocationRecord, RunReport, StdClock};
pub use pipeline::{Step, plan, run, run_with_clock};
pub use runner::{DryRunRunner, ProcessRunner, StageStatus, SystemRunner};
pub use stage::{StageCommand, StageInvocation, StageKind};
pub use types::{
    CleanupCommand, FailurePolicy, ImageSource, ModelType, ParseModelTypeError, PipelineConfig,
    RunError, RunOptions, ToolLayout, WorkspaceError,
};
pub use workspace::WorkspaceContext;
