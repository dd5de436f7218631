//! Shared types for the flimrun orchestration pipeline.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::runner::StageStatus;
use crate::stage::StageKind;

/// Selects how each layer's encoding is produced.
///
/// The numeric code is forwarded verbatim to the decoder, which is the
/// only stage that distinguishes [`Direct`](Self::Direct) from
/// [`DirectVariant`](Self::DirectVariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ModelType {
    /// Code `0`: encode every layer directly from its own model.
    #[default]
    Direct,
    /// Code `1`: merge the models across layers, then encode the merged
    /// representation.
    Merged,
    /// Code `2`: direct encoding, decoded differently by the decoder.
    DirectVariant,
}

impl ModelType {
    /// The numeric code understood by the external decoder.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Direct => 0,
            Self::Merged => 1,
            Self::DirectVariant => 2,
        }
    }

    /// Returns `true` when layers go through merge + merged-encode
    /// instead of a direct encode.
    #[must_use]
    pub const fn merges_layers(self) -> bool {
        matches!(self, Self::Merged)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Error returned when a model type code is not `0`, `1`, or `2`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid model type `{0}` (expected 0, 1, or 2)")]
pub struct ParseModelTypeError(String);

impl TryFrom<u8> for ModelType {
    type Error = ParseModelTypeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Direct),
            1 => Ok(Self::Merged),
            2 => Ok(Self::DirectVariant),
            other => Err(ParseModelTypeError(other.to_string())),
        }
    }
}

impl From<ModelType> for u8 {
    fn from(model_type: ModelType) -> Self {
        model_type.code()
    }
}

impl FromStr for ModelType {
    type Err = ParseModelTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .map_err(|_| ParseModelTypeError(s.to_owned()))
            .and_then(Self::try_from)
    }
}

/// The six run parameters of a pipeline run.
///
/// Beyond the typed parse, no semantic validation is applied: a negative
/// `points_per_marker` or a `target_layer` outside `1..=layer_count` is
/// handed to the external stages as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of layers to build, encode and decode. Zero or negative
    /// skips the layer loop and reuses artifacts from a previous run.
    pub layer_count: i32,

    /// Layer decoded again at the end and used for detection and
    /// delineation.
    pub target_layer: i32,

    /// Feature points sampled per marker during feature extraction.
    pub points_per_marker: i32,

    /// Per-layer encoding policy.
    pub model_type: ModelType,

    /// Median-filter radius for preprocessing. Values `<= 0` disable
    /// preprocessing.
    pub preproc_radius: f64,

    /// Destination of every run output. Destroyed and recreated at the
    /// start of each run.
    pub result_path: PathBuf,
}

impl PipelineConfig {
    /// Returns `true` when the preprocessing stage runs.
    #[must_use]
    pub fn preprocessing_enabled(&self) -> bool {
        self.preproc_radius > 0.0
    }

    /// Layer indices visited by the layer loop, in order.
    ///
    /// Empty when `layer_count <= 0`.
    #[must_use]
    pub const fn layers(&self) -> std::ops::RangeInclusive<i32> {
        1..=self.layer_count
    }

    /// Returns `true` when the target layer is also decoded by the loop.
    #[must_use]
    pub const fn target_decoded_in_loop(&self) -> bool {
        self.target_layer >= 1 && self.target_layer <= self.layer_count
    }
}

/// Housekeeping command run once before anything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupCommand {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
}

impl Default for CleanupCommand {
    fn default() -> Self {
        Self {
            program: "python3".to_owned(),
            args: vec!["dellall.py".to_owned()],
        }
    }
}

/// Locations of the fixed external collaborators.
///
/// Paths are passed to the stages exactly as given, so relative paths are
/// interpreted by each stage against its own working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolLayout {
    /// Directory with the raw input images.
    pub images_dir: PathBuf,

    /// Directory with the marker files.
    pub markers_dir: PathBuf,

    /// Network architecture descriptor (JSON).
    pub arch_path: PathBuf,

    /// Output directory of the preprocessing filter.
    pub filtered_dir: PathBuf,

    /// Housekeeping command, or `None` to skip it.
    pub cleanup: Option<CleanupCommand>,

    /// Directory prepended to every stage program name. `None` resolves
    /// programs through `PATH`.
    pub tool_dir: Option<PathBuf>,

    /// Working directory for stage processes. `None` inherits the
    /// orchestrator's.
    pub work_dir: Option<PathBuf>,
}

impl ToolLayout {
    /// Default raw image directory.
    pub const DEFAULT_IMAGES_DIR: &'static str = "images";
    /// Default marker directory.
    pub const DEFAULT_MARKERS_DIR: &'static str = "markers";
    /// Default architecture descriptor.
    pub const DEFAULT_ARCH_PATH: &'static str = "arch.json";
    /// Default preprocessing output directory.
    pub const DEFAULT_FILTERED_DIR: &'static str = "filtered";

    /// Resolve `path` the way a stage process would see it.
    ///
    /// Used for the directories the orchestrator itself creates and
    /// removes, so that they match what the stages write to.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.work_dir {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }
}

impl Default for ToolLayout {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from(Self::DEFAULT_IMAGES_DIR),
            markers_dir: PathBuf::from(Self::DEFAULT_MARKERS_DIR),
            arch_path: PathBuf::from(Self::DEFAULT_ARCH_PATH),
            filtered_dir: PathBuf::from(Self::DEFAULT_FILTERED_DIR),
            cleanup: Some(CleanupCommand::default()),
            tool_dir: None,
            work_dir: None,
        }
    }
}

/// What happens when an external stage exits non-zero or cannot start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run at the first failing stage.
    #[default]
    FailFast,
    /// Log the failure and keep going with the next stage.
    BestEffort,
}

/// Which image directory feature extraction reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// The filtered directory when preprocessing ran, the raw image
    /// directory otherwise.
    #[default]
    FollowPreprocessing,
    /// Always the filtered directory, whether or not preprocessing ran.
    AlwaysFiltered,
}

/// Policies that shape a run without changing its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Reaction to failing stages.
    pub failure_policy: FailurePolicy,

    /// Image directory handed to feature extraction.
    pub image_source: ImageSource,

    /// Skip the final decode of the target layer when the layer loop
    /// already decoded it.
    pub skip_duplicate_target_decode: bool,

    /// Leave the result and filtered directories untouched.
    pub skip_workspace_reset: bool,
}

/// Errors raised while resetting workspace directories.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// An existing directory (or file) could not be removed.
    #[error("failed to remove {}: {source}", path.display())]
    Remove {
        /// Path that was being removed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The directory could not be created.
    #[error("failed to create {}: {source}", path.display())]
    Create {
        /// Path that was being created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Errors that abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Resetting a workspace directory failed.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// An external stage ran and reported failure.
    #[error("stage `{stage}` failed with {status}: {program} {}", args.join(" "))]
    ExternalStageFailure {
        /// Which stage failed.
        stage: StageKind,
        /// Program that was executed.
        program: String,
        /// Arguments it was given.
        args: Vec<String>,
        /// How the process ended.
        status: StageStatus,
    },

    /// An external stage could not be started.
    #[error("failed to start stage `{stage}` ({program}): {source}")]
    StageSpawn {
        /// Which stage failed.
        stage: StageKind,
        /// Program that was executed.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(layer_count: i32, target_layer: i32, preproc_radius: f64) -> PipelineConfig {
        PipelineConfig {
            layer_count,
            target_layer,
            points_per_marker: 1,
            model_type: ModelType::Direct,
            preproc_radius,
            result_path: PathBuf::from("out"),
        }
    }

    // --- ModelType ---

    #[test]
    fn model_type_parses_known_codes() {
        assert_eq!("0".parse::<ModelType>().unwrap(), ModelType::Direct);
        assert_eq!("1".parse::<ModelType>().unwrap(), ModelType::Merged);
        assert_eq!("2".parse::<ModelType>().unwrap(), ModelType::DirectVariant);
    }

    #[test]
    fn model_type_rejects_unknown_codes() {
        assert!("3".parse::<ModelType>().is_err());
        assert!("-1".parse::<ModelType>().is_err());
        assert!("merged".parse::<ModelType>().is_err());
        assert!(ModelType::try_from(7).is_err());
    }

    #[test]
    fn model_type_display_is_code() {
        assert_eq!(ModelType::Merged.to_string(), "1");
        assert_eq!(ModelType::DirectVariant.to_string(), "2");
    }

    #[test]
    fn only_type_one_merges() {
        assert!(!ModelType::Direct.merges_layers());
        assert!(ModelType::Merged.merges_layers());
        assert!(!ModelType::DirectVariant.merges_layers());
    }

    #[test]
    fn model_type_serializes_as_code() {
        let json = serde_json::to_string(&ModelType::Merged).unwrap();
        assert_eq!(json, "1");
        let back: ModelType = serde_json::from_str("2").unwrap();
        assert_eq!(back, ModelType::DirectVariant);
        assert!(serde_json::from_str::<ModelType>("5").is_err());
    }

    // --- PipelineConfig ---

    #[test]
    fn preprocessing_requires_positive_radius() {
        assert!(config(1, 1, 0.5).preprocessing_enabled());
        assert!(!config(1, 1, 0.0).preprocessing_enabled());
        assert!(!config(1, 1, -1.0).preprocessing_enabled());
    }

    #[test]
    fn layers_are_ascending_from_one() {
        let layers: Vec<i32> = config(3, 1, -1.0).layers().collect();
        assert_eq!(layers, vec![1, 2, 3]);
    }

    #[test]
    fn non_positive_layer_count_visits_no_layers() {
        assert_eq!(config(0, 1, -1.0).layers().count(), 0);
        assert_eq!(config(-1, 1, -1.0).layers().count(), 0);
    }

    #[test]
    fn target_in_loop_detection() {
        assert!(config(3, 2, -1.0).target_decoded_in_loop());
        assert!(config(3, 3, -1.0).target_decoded_in_loop());
        assert!(!config(3, 4, -1.0).target_decoded_in_loop());
        assert!(!config(3, 0, -1.0).target_decoded_in_loop());
        assert!(!config(-1, 5, -1.0).target_decoded_in_loop());
    }

    // --- ToolLayout ---

    #[test]
    fn layout_defaults_match_legacy_names() {
        let layout = ToolLayout::default();
        assert_eq!(layout.images_dir, PathBuf::from("images"));
        assert_eq!(layout.markers_dir, PathBuf::from("markers"));
        assert_eq!(layout.arch_path, PathBuf::from("arch.json"));
        assert_eq!(layout.filtered_dir, PathBuf::from("filtered"));
        let cleanup = layout.cleanup.unwrap();
        assert_eq!(cleanup.program, "python3");
        assert_eq!(cleanup.args, vec!["dellall.py".to_owned()]);
    }

    #[test]
    fn resolve_without_work_dir_is_identity() {
        let layout = ToolLayout::default();
        assert_eq!(layout.resolve(Path::new("out")), PathBuf::from("out"));
    }

    #[test]
    fn resolve_with_work_dir_joins() {
        let layout = ToolLayout {
            work_dir: Some(PathBuf::from("/data/run")),
            ..ToolLayout::default()
        };
        assert_eq!(
            layout.resolve(Path::new("out")),
            PathBuf::from("/data/run/out")
        );
        assert_eq!(layout.resolve(Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn layout_partial_json_keeps_defaults() {
        let layout: ToolLayout = serde_json::from_str(r#"{"arch_path": "net.json"}"#).unwrap();
        assert_eq!(layout.arch_path, PathBuf::from("net.json"));
        assert_eq!(layout.images_dir, PathBuf::from("images"));
    }

    #[test]
    fn run_options_default_is_fail_fast() {
        let options = RunOptions::default();
        assert_eq!(options.failure_policy, FailurePolicy::FailFast);
        assert_eq!(options.image_source, ImageSource::FollowPreprocessing);
        assert!(!options.skip_duplicate_target_decode);
        assert!(!options.skip_workspace_reset);
    }
}
