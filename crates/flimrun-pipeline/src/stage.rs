//! Typed commands for the external stages.
//!
//! Each external tool is addressed by a fixed program name and a fixed
//! positional-argument order. [`StageCommand`] captures the arguments of
//! one call as typed fields; [`StageCommand::invocation`] is the only
//! place where they are turned into a program name and argument list.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{ModelType, ToolLayout};

/// Flag passed as the last delineation argument.
pub const DELINEATION_FLAG: &str = "1";

/// Identifies an external stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Housekeeping run before anything else.
    Cleanup,
    /// Median filter over the raw images.
    Preprocess,
    /// Marker feature point extraction into the bag.
    ExtractFeatures,
    /// Per-layer model construction.
    BuildModel,
    /// Cross-layer model merge.
    MergeModels,
    /// Encoding with the merged model.
    EncodeMerged,
    /// Direct per-layer encoding.
    Encode,
    /// Per-layer decoding into saliency maps.
    Decode,
    /// Bounding box detection.
    Detect,
    /// Object delineation.
    Delineate,
}

impl StageKind {
    /// Program name of the external tool, or the log label for
    /// [`Cleanup`](Self::Cleanup) whose program comes from the layout.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cleanup => "cleanup",
            Self::Preprocess => "preproc",
            Self::ExtractFeatures => "bag_of_feature_points",
            Self::BuildModel => "create_layer_model",
            Self::MergeModels => "merge_layer_models",
            Self::EncodeMerged => "encode_merged_layer",
            Self::Encode => "encode_layer",
            Self::Decode => "decode_layer",
            Self::Detect => "detection",
            Self::Delineate => "delineation",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One call to an external stage, with typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum StageCommand {
    /// `<cleanup program> <cleanup args...>`
    Cleanup,
    /// `preproc <images> <radius> <filtered>`
    Preprocess {
        /// Raw image directory.
        images: PathBuf,
        /// Filter radius.
        radius: f64,
        /// Output directory.
        filtered: PathBuf,
    },
    /// `bag_of_feature_points <images> <markers> <points> <bag>`
    ExtractFeatures {
        /// Image directory the points are sampled from.
        images: PathBuf,
        /// Marker directory.
        markers: PathBuf,
        /// Points per marker.
        points_per_marker: i32,
        /// Output bag.
        bag: PathBuf,
    },
    /// `create_layer_model <bag> <arch> <layer> <flim>`
    BuildModel {
        /// Feature point bag.
        bag: PathBuf,
        /// Architecture descriptor.
        arch: PathBuf,
        /// Layer index.
        layer: i32,
        /// Model directory.
        flim: PathBuf,
    },
    /// `merge_layer_models <arch> <layer> <flim>`
    MergeModels {
        /// Architecture descriptor.
        arch: PathBuf,
        /// Layer index.
        layer: i32,
        /// Model directory.
        flim: PathBuf,
    },
    /// `encode_merged_layer <arch> <layer> <flim>`
    EncodeMerged {
        /// Architecture descriptor.
        arch: PathBuf,
        /// Layer index.
        layer: i32,
        /// Model directory.
        flim: PathBuf,
    },
    /// `encode_layer <arch> <layer> <flim>`
    Encode {
        /// Architecture descriptor.
        arch: PathBuf,
        /// Layer index.
        layer: i32,
        /// Model directory.
        flim: PathBuf,
    },
    /// `decode_layer <layer> <arch> <flim> <model type> <salie>`
    Decode {
        /// Layer index.
        layer: i32,
        /// Architecture descriptor.
        arch: PathBuf,
        /// Model directory.
        flim: PathBuf,
        /// Model type code forwarded to the decoder.
        model_type: ModelType,
        /// Saliency output directory.
        salie: PathBuf,
    },
    /// `detection <salie> <layer> <boxes>`
    Detect {
        /// Saliency directory.
        salie: PathBuf,
        /// Layer index.
        layer: i32,
        /// Bounding box output.
        boxes: PathBuf,
    },
    /// `delineation <salie> <layer> <objs> 1`
    Delineate {
        /// Saliency directory.
        salie: PathBuf,
        /// Layer index.
        layer: i32,
        /// Object output.
        objs: PathBuf,
    },
}

impl StageCommand {
    /// Which stage this command runs.
    #[must_use]
    pub const fn kind(&self) -> StageKind {
        match self {
            Self::Cleanup => StageKind::Cleanup,
            Self::Preprocess { .. } => StageKind::Preprocess,
            Self::ExtractFeatures { .. } => StageKind::ExtractFeatures,
            Self::BuildModel { .. } => StageKind::BuildModel,
            Self::MergeModels { .. } => StageKind::MergeModels,
            Self::EncodeMerged { .. } => StageKind::EncodeMerged,
            Self::Encode { .. } => StageKind::Encode,
            Self::Decode { .. } => StageKind::Decode,
            Self::Detect { .. } => StageKind::Detect,
            Self::Delineate { .. } => StageKind::Delineate,
        }
    }

    /// Layer index this command is tagged with, if any.
    #[must_use]
    pub const fn layer(&self) -> Option<i32> {
        match self {
            Self::BuildModel { layer, .. }
            | Self::MergeModels { layer, .. }
            | Self::EncodeMerged { layer, .. }
            | Self::Encode { layer, .. }
            | Self::Decode { layer, .. }
            | Self::Detect { layer, .. }
            | Self::Delineate { layer, .. } => Some(*layer),
            Self::Cleanup | Self::Preprocess { .. } | Self::ExtractFeatures { .. } => None,
        }
    }

    /// Positional arguments, in the order the external tool expects.
    #[must_use]
    pub fn args(&self, layout: &ToolLayout) -> Vec<String> {
        match self {
            Self::Cleanup => layout
                .cleanup
                .as_ref()
                .map(|c| c.args.clone())
                .unwrap_or_default(),
            Self::Preprocess {
                images,
                radius,
                filtered,
            } => vec![path_arg(images), radius.to_string(), path_arg(filtered)],
            Self::ExtractFeatures {
                images,
                markers,
                points_per_marker,
                bag,
            } => vec![
                path_arg(images),
                path_arg(markers),
                points_per_marker.to_string(),
                path_arg(bag),
            ],
            Self::BuildModel {
                bag,
                arch,
                layer,
                flim,
            } => vec![
                path_arg(bag),
                path_arg(arch),
                layer.to_string(),
                path_arg(flim),
            ],
            Self::MergeModels { arch, layer, flim }
            | Self::EncodeMerged { arch, layer, flim }
            | Self::Encode { arch, layer, flim } => {
                vec![path_arg(arch), layer.to_string(), path_arg(flim)]
            }
            Self::Decode {
                layer,
                arch,
                flim,
                model_type,
                salie,
            } => vec![
                layer.to_string(),
                path_arg(arch),
                path_arg(flim),
                model_type.to_string(),
                path_arg(salie),
            ],
            Self::Detect {
                salie,
                layer,
                boxes,
            } => vec![path_arg(salie), layer.to_string(), path_arg(boxes)],
            Self::Delineate { salie, layer, objs } => vec![
                path_arg(salie),
                layer.to_string(),
                path_arg(objs),
                DELINEATION_FLAG.to_owned(),
            ],
        }
    }

    /// Program to execute for this command under `layout`.
    ///
    /// Returns `None` only for [`Cleanup`](Self::Cleanup) when the layout
    /// disables housekeeping.
    #[must_use]
    pub fn program(&self, layout: &ToolLayout) -> Option<String> {
        if matches!(self, Self::Cleanup) {
            return layout.cleanup.as_ref().map(|c| c.program.clone());
        }
        let name = self.kind().name();
        Some(match &layout.tool_dir {
            Some(dir) => path_arg(&dir.join(name)),
            None => name.to_owned(),
        })
    }

    /// Build the process invocation for this command.
    ///
    /// Returns `None` when the command has no program to run (see
    /// [`program`](Self::program)).
    #[must_use]
    pub fn invocation(&self, layout: &ToolLayout) -> Option<StageInvocation> {
        Some(StageInvocation {
            kind: self.kind(),
            layer: self.layer(),
            program: self.program(layout)?,
            args: self.args(layout),
            current_dir: layout.work_dir.clone(),
        })
    }
}

/// A ready-to-run external process call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInvocation {
    /// Which stage this is.
    pub kind: StageKind,
    /// Layer index the call is tagged with.
    pub layer: Option<i32>,
    /// Program to execute.
    pub program: String,
    /// Positional arguments.
    pub args: Vec<String>,
    /// Working directory for the process.
    pub current_dir: Option<PathBuf>,
}

impl fmt::Display for StageInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Render a path as a process argument.
///
/// Non-UTF-8 components are replaced, matching how the paths are logged.
fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
