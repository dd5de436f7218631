//! Workspace layout and directory lifecycle.
//!
//! [`WorkspaceContext`] names every artifact location a run uses, so the
//! stages never build paths on their own. [`reset_result_directory`] and
//! [`reset_filtered_directory`] implement the destroy-then-create rule for
//! the two directories the orchestrator owns.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::types::{ImageSource, PipelineConfig, ToolLayout, WorkspaceError};

/// Artifact locations for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceContext {
    root: PathBuf,
    filtered: PathBuf,
    image_source: PathBuf,
}

impl WorkspaceContext {
    /// Feature point bag, under the result directory.
    pub const BAG: &'static str = "bag";
    /// Per-layer model and encoding directory.
    pub const FLIM: &'static str = "flim";
    /// Decoded saliency directory.
    pub const SALIE: &'static str = "salie";
    /// Detection output.
    pub const BOXES: &'static str = "boxes";
    /// Delineation output.
    pub const OBJS: &'static str = "objs";

    /// Derive the workspace for `config`.
    ///
    /// The image source follows the preprocessing decision unless
    /// `image_source` pins it to the filtered directory.
    #[must_use]
    pub fn new(config: &PipelineConfig, layout: &ToolLayout, image_source: ImageSource) -> Self {
        let image_source = match image_source {
            ImageSource::FollowPreprocessing if !config.preprocessing_enabled() => {
                layout.images_dir.clone()
            }
            ImageSource::FollowPreprocessing | ImageSource::AlwaysFiltered => {
                layout.filtered_dir.clone()
            }
        };
        Self {
            root: config.result_path.clone(),
            filtered: layout.filtered_dir.clone(),
            image_source,
        }
    }

    /// The result directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The preprocessing output directory.
    #[must_use]
    pub fn filtered(&self) -> &Path {
        &self.filtered
    }

    /// Image directory read by feature extraction.
    #[must_use]
    pub fn image_source(&self) -> &Path {
        &self.image_source
    }

    /// `<result>/bag`
    #[must_use]
    pub fn bag(&self) -> PathBuf {
        self.root.join(Self::BAG)
    }

    /// `<result>/flim`
    #[must_use]
    pub fn flim(&self) -> PathBuf {
        self.root.join(Self::FLIM)
    }

    /// `<result>/salie`
    #[must_use]
    pub fn salie(&self) -> PathBuf {
        self.root.join(Self::SALIE)
    }

    /// `<result>/boxes`
    #[must_use]
    pub fn boxes(&self) -> PathBuf {
        self.root.join(Self::BOXES)
    }

    /// `<result>/objs`
    #[must_use]
    pub fn objs(&self) -> PathBuf {
        self.root.join(Self::OBJS)
    }
}

/// Remove `path` if it exists, then create it empty.
///
/// Any previous content is lost. A plain file at `path` is removed too.
///
/// # Errors
///
/// Returns [`WorkspaceError::Remove`] or [`WorkspaceError::Create`] when
/// the filesystem refuses either step.
pub fn reset_result_directory(path: &Path) -> Result<(), WorkspaceError> {
    info!(path = %path.display(), "resetting result directory");
    recreate(path)
}

/// Remove the filtered image directory, then create it empty.
///
/// A missing directory is not an error.
///
/// # Errors
///
/// Same as [`reset_result_directory`].
pub fn reset_filtered_directory(path: &Path) -> Result<(), WorkspaceError> {
    info!(path = %path.display(), "resetting filtered directory");
    recreate(path)
}

fn recreate(path: &Path) -> Result<(), WorkspaceError> {
    remove_existing(path)?;
    fs::create_dir_all(path).map_err(|source| WorkspaceError::Create {
        path: path.to_path_buf(),
        source,
    })
}

fn remove_existing(path: &Path) -> Result<(), WorkspaceError> {
    let removed = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "nothing to remove");
            return Ok(());
        }
        Err(e) => Err(e),
    };
    removed.map_err(|source| WorkspaceError::Remove {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ModelType;

    fn config(preproc_radius: f64) -> PipelineConfig {
        PipelineConfig {
            layer_count: 1,
            target_layer: 1,
            points_per_marker: 1,
            model_type: ModelType::Direct,
            preproc_radius,
            result_path: PathBuf::from("out"),
        }
    }

    // --- WorkspaceContext ---

    #[test]
    fn derived_paths() {
        let ctx = WorkspaceContext::new(
            &config(-1.0),
            &ToolLayout::default(),
            ImageSource::default(),
        );
        assert_eq!(ctx.root(), Path::new("out"));
        assert_eq!(ctx.bag(), PathBuf::from("out/bag"));
        assert_eq!(ctx.flim(), PathBuf::from("out/flim"));
        assert_eq!(ctx.salie(), PathBuf::from("out/salie"));
        assert_eq!(ctx.boxes(), PathBuf::from("out/boxes"));
        assert_eq!(ctx.objs(), PathBuf::from("out/objs"));
    }

    #[test]
    fn image_source_raw_without_preprocessing() {
        let ctx = WorkspaceContext::new(
            &config(0.0),
            &ToolLayout::default(),
            ImageSource::FollowPreprocessing,
        );
        assert_eq!(ctx.image_source(), Path::new("images"));
    }

    #[test]
    fn image_source_filtered_with_preprocessing() {
        let ctx = WorkspaceContext::new(
            &config(2.0),
            &ToolLayout::default(),
            ImageSource::FollowPreprocessing,
        );
        assert_eq!(ctx.image_source(), Path::new("filtered"));
    }

    #[test]
    fn image_source_pinned_to_filtered() {
        let ctx = WorkspaceContext::new(
            &config(-1.0),
            &ToolLayout::default(),
            ImageSource::AlwaysFiltered,
        );
        assert_eq!(ctx.image_source(), Path::new("filtered"));
    }

    // --- directory lifecycle ---

    #[test]
    fn reset_creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        reset_result_directory(&out).unwrap();
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn reset_clears_existing_content() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(out.join("flim/layer1")).unwrap();
        fs::write(out.join("bag"), b"stale").unwrap();

        reset_result_directory(&out).unwrap();
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn reset_twice_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        reset_result_directory(&out).unwrap();
        reset_result_directory(&out).unwrap();
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn reset_replaces_plain_file() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        fs::write(&out, b"not a directory").unwrap();
        reset_result_directory(&out).unwrap();
        assert!(out.is_dir());
    }

    #[test]
    fn filtered_reset_tolerates_absence() {
        let tmp = tempfile::tempdir().unwrap();
        let filtered = tmp.path().join("filtered");
        assert!(!filtered.exists());
        reset_filtered_directory(&filtered).unwrap();
        assert!(filtered.is_dir());
    }

    #[test]
    fn path_below_a_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, b"file").unwrap();
        let nested = blocker.join("out");
        let err = reset_result_directory(&nested).unwrap_err();
        assert!(
            err.to_string().contains(&nested.display().to_string()),
            "error should name the path: {err}"
        );
    }
}
