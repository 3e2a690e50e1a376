use std::{fs, path::Path};

use tempfile::TempDir;
use tracing::debug;

use crate::error::{ChronoplotError, ChronoplotResult};

/// Run-scoped scratch tree: a temporary root with a `frames/` child the
/// plotting session writes its images into.
///
/// [`ScratchDirs::cleanup`] removes the frame images and then the root —
/// unless the root still holds files, which happens only when the output
/// video was diverted here by the ignore-errors fallback; in that case the
/// root is kept so the video survives the run.
pub struct ScratchDirs {
    root: TempDir,
    frames: std::path::PathBuf,
}

impl ScratchDirs {
    pub fn create() -> ChronoplotResult<Self> {
        let root = tempfile::Builder::new()
            .prefix("tmp__")
            .suffix("__chronoplot")
            .tempdir()
            .map_err(|e| {
                ChronoplotError::resource(format!("cannot create temporary directory: {e}"))
            })?;
        let frames = root.path().join("frames");
        fs::create_dir(&frames).map_err(|e| {
            ChronoplotError::resource(format!(
                "cannot create frame directory '{}': {e}",
                frames.display()
            ))
        })?;
        Ok(Self { root, frames })
    }

    pub fn root_dir(&self) -> &Path {
        self.root.path()
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames
    }

    pub fn cleanup(self) {
        let _ = fs::remove_dir_all(&self.frames);
        let holds_output = fs::read_dir(self.root.path())
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if holds_output {
            // Disarm the TempDir so the diverted video is not deleted.
            let kept = self.root.keep();
            debug!("keeping scratch root '{}', it holds run output", kept.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_root_with_frames_child() {
        let scratch = ScratchDirs::create().unwrap();
        assert!(scratch.root_dir().is_dir());
        assert!(scratch.frames_dir().is_dir());
        assert_eq!(scratch.frames_dir().parent(), Some(scratch.root_dir()));
    }

    #[test]
    fn cleanup_removes_everything_when_root_is_empty() {
        let scratch = ScratchDirs::create().unwrap();
        let root = scratch.root_dir().to_path_buf();
        fs::write(scratch.frames_dir().join("g_0.png"), b"png").unwrap();
        scratch.cleanup();
        assert!(!root.exists());
    }

    #[test]
    fn cleanup_keeps_root_holding_diverted_output() {
        let scratch = ScratchDirs::create().unwrap();
        let root = scratch.root_dir().to_path_buf();
        fs::write(root.join("anim.mp4"), b"video").unwrap();
        scratch.cleanup();
        assert!(root.join("anim.mp4").exists());
        fs::remove_dir_all(root).unwrap();
    }
}
