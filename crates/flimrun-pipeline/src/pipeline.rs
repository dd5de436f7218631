//! Stage sequencing and execution.
//!
//! A run is first laid out as a flat list of [`Step`]s by [`plan`], then
//! executed in order by [`run`]. [`plan`] touches neither the filesystem
//! nor any process.
//!
//! # Step order
//!
//! 1. Housekeeping (fire-and-forget)
//! 2. Result directory reset
//! 3. Filtered directory reset + preprocessing (only when `preproc_radius > 0`)
//! 4. Feature extraction
//! 5. For each layer `1..=layer_count`: model build, encode path, decode
//! 6. Target layer decode, detection, delineation

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::diagnostics::{Clock, InvocationRecord, RunReport, StdClock};
use crate::runner::ProcessRunner;
use crate::stage::{StageCommand, StageKind};
use crate::types::{FailurePolicy, PipelineConfig, RunError, RunOptions, ToolLayout};
use crate::workspace::{self, WorkspaceContext};

/// One unit of work in a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Destroy and recreate the result directory.
    ResetResultDirectory(PathBuf),
    /// Destroy and recreate the filtered image directory.
    ResetFilteredDirectory(PathBuf),
    /// Invoke an external stage.
    Run(StageCommand),
}

impl Step {
    /// The stage command, if this step runs one.
    #[must_use]
    pub const fn command(&self) -> Option<&StageCommand> {
        match self {
            Self::Run(command) => Some(command),
            Self::ResetResultDirectory(_) | Self::ResetFilteredDirectory(_) => None,
        }
    }
}

/// Lay out every step of a run, in execution order.
#[must_use]
pub fn plan(
    config: &PipelineConfig,
    layout: &ToolLayout,
    options: &RunOptions,
    ctx: &WorkspaceContext,
) -> Vec<Step> {
    let mut steps = vec![
        Step::Run(StageCommand::Cleanup),
        Step::ResetResultDirectory(ctx.root().to_path_buf()),
    ];
    steps.extend(plan_preprocessing(config, layout, ctx));
    steps.push(Step::Run(plan_feature_extraction(config, layout, ctx)));
    for layer in config.layers() {
        steps.extend(plan_layer(config, layout, ctx, layer).into_iter().map(Step::Run));
    }
    steps.extend(
        plan_finalization(config, layout, options, ctx)
            .into_iter()
            .map(Step::Run),
    );
    steps
}

/// Filtered directory reset and the preprocessing filter, or nothing when
/// preprocessing is disabled.
fn plan_preprocessing(
    config: &PipelineConfig,
    layout: &ToolLayout,
    ctx: &WorkspaceContext,
) -> Vec<Step> {
    if !config.preprocessing_enabled() {
        return Vec::new();
    }
    vec![
        Step::ResetFilteredDirectory(ctx.filtered().to_path_buf()),
        Step::Run(StageCommand::Preprocess {
            images: layout.images_dir.clone(),
            radius: config.preproc_radius,
            filtered: ctx.filtered().to_path_buf(),
        }),
    ]
}

fn plan_feature_extraction(
    config: &PipelineConfig,
    layout: &ToolLayout,
    ctx: &WorkspaceContext,
) -> StageCommand {
    StageCommand::ExtractFeatures {
        images: ctx.image_source().to_path_buf(),
        markers: layout.markers_dir.clone(),
        points_per_marker: config.points_per_marker,
        bag: ctx.bag(),
    }
}

/// Model build, encode path and decode for one layer.
///
/// Merged model types go through merge + merged-encode; every other type
/// encodes the layer directly. Decode is issued in both cases.
#[must_use]
pub fn plan_layer(
    config: &PipelineConfig,
    layout: &ToolLayout,
    ctx: &WorkspaceContext,
    layer: i32,
) -> Vec<StageCommand> {
    let arch = &layout.arch_path;
    let mut commands = vec![StageCommand::BuildModel {
        bag: ctx.bag(),
        arch: arch.clone(),
        layer,
        flim: ctx.flim(),
    }];
    if config.model_type.merges_layers() {
        commands.push(StageCommand::MergeModels {
            arch: arch.clone(),
            layer,
            flim: ctx.flim(),
        });
        commands.push(StageCommand::EncodeMerged {
            arch: arch.clone(),
            layer,
            flim: ctx.flim(),
        });
    } else {
        commands.push(StageCommand::Encode {
            arch: arch.clone(),
            layer,
            flim: ctx.flim(),
        });
    }
    commands.push(decode(config, layout, ctx, layer));
    commands
}

/// Target layer decode, detection and delineation.
///
/// The decode is dropped only when `skip_duplicate_target_decode` is set
/// and the loop already decoded the target layer.
#[must_use]
pub fn plan_finalization(
    config: &PipelineConfig,
    layout: &ToolLayout,
    options: &RunOptions,
    ctx: &WorkspaceContext,
) -> Vec<StageCommand> {
    let target = config.target_layer;
    let mut commands = Vec::with_capacity(3);
    if options.skip_duplicate_target_decode && config.target_decoded_in_loop() {
        debug!(layer = target, "target layer already decoded");
    } else {
        commands.push(decode(config, layout, ctx, target));
    }
    commands.push(StageCommand::Detect {
        salie: ctx.salie(),
        layer: target,
        boxes: ctx.boxes(),
    });
    commands.push(StageCommand::Delineate {
        salie: ctx.salie(),
        layer: target,
        objs: ctx.objs(),
    });
    commands
}

fn decode(
    config: &PipelineConfig,
    layout: &ToolLayout,
    ctx: &WorkspaceContext,
    layer: i32,
) -> StageCommand {
    StageCommand::Decode {
        layer,
        arch: layout.arch_path.clone(),
        flim: ctx.flim(),
        model_type: config.model_type,
        salie: ctx.salie(),
    }
}

/// Run the full pipeline.
///
/// Steps are executed strictly in [`plan`] order, each external stage
/// blocking until its process exits.
///
/// # Errors
///
/// - [`RunError::Workspace`] when a directory reset fails, under either
///   failure policy.
/// - [`RunError::ExternalStageFailure`] / [`RunError::StageSpawn`] for the
///   first failing stage under [`FailurePolicy::FailFast`]. Cleanup
///   failures are never fatal.
pub fn run<R: ProcessRunner>(
    config: &PipelineConfig,
    layout: &ToolLayout,
    options: &RunOptions,
    runner: &mut R,
) -> Result<RunReport, RunError> {
    run_with_clock(config, layout, options, runner, &StdClock)
}

/// [`run`] with an explicit time source for the report durations.
///
/// # Errors
///
/// Same as [`run`].
pub fn run_with_clock<R: ProcessRunner, C: Clock>(
    config: &PipelineConfig,
    layout: &ToolLayout,
    options: &RunOptions,
    runner: &mut R,
    clock: &C,
) -> Result<RunReport, RunError> {
    let started = clock.now();
    let ctx = WorkspaceContext::new(config, layout, options.image_source);
    let mut executor = Executor {
        layout,
        policy: options.failure_policy,
        runner,
        clock,
        report: RunReport::default(),
    };

    for step in plan(config, layout, options, &ctx) {
        match step {
            Step::ResetResultDirectory(path) => {
                if !options.skip_workspace_reset {
                    workspace::reset_result_directory(&layout.resolve(&path))?;
                }
            }
            Step::ResetFilteredDirectory(path) => {
                if !options.skip_workspace_reset {
                    workspace::reset_filtered_directory(&layout.resolve(&path))?;
                }
            }
            Step::Run(command) => executor.execute(&command)?,
        }
    }

    let mut report = executor.report;
    report.total_duration = clock.elapsed(&started);
    info!(
        invocations = report.invocations.len(),
        failures = report.failure_count(),
        "pipeline finished"
    );
    Ok(report)
}

struct Executor<'a, R, C> {
    layout: &'a ToolLayout,
    policy: FailurePolicy,
    runner: &'a mut R,
    clock: &'a C,
    report: RunReport,
}

impl<R: ProcessRunner, C: Clock> Executor<'_, R, C> {
    fn execute(&mut self, command: &StageCommand) -> Result<(), RunError> {
        let Some(invocation) = command.invocation(self.layout) else {
            debug!(stage = %command.kind(), "no program configured, skipping");
            return Ok(());
        };

        match invocation.layer {
            Some(layer) => info!(stage = %invocation.kind, layer, "running stage"),
            None => info!(stage = %invocation.kind, "running stage"),
        }
        debug!(command = %invocation);

        let started = self.clock.now();
        let result = self.runner.run(&invocation);
        let duration = self.clock.elapsed(&started);
        self.report
            .invocations
            .push(InvocationRecord::new(&invocation, &result, duration));

        let tolerated = invocation.kind == StageKind::Cleanup
            || self.policy == FailurePolicy::BestEffort;

        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) if tolerated => {
                warn!(stage = %invocation.kind, %status, "stage failed, continuing");
                Ok(())
            }
            Ok(status) => Err(RunError::ExternalStageFailure {
                stage: invocation.kind,
                program: invocation.program,
                args: invocation.args,
                status,
            }),
            Err(source) if tolerated => {
                warn!(stage = %invocation.kind, error = %source, "stage did not start, continuing");
                Ok(())
            }
            Err(source) => Err(RunError::StageSpawn {
                stage: invocation.kind,
                program: invocation.program,
                source,
            }),
        }
    }
}
