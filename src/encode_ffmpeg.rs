use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tracing::{info, warn};

use crate::{
    error::{ChronoplotError, ChronoplotResult},
    gnuplot::frame_pattern,
};

/// Pick and create the directory the video lands in. If `<parent>/<name>`
/// already exists, suffixes `_0, _1, …` are probed from zero (every
/// invocation restarts at `_0`; nothing is remembered between runs) until a
/// free name is found. A creation failure falls back to the scratch root
/// under ignore-errors, otherwise it is fatal.
pub fn resolve_output_dir(
    name: &str,
    scratch_root: &Path,
    ignore_errors: bool,
) -> ChronoplotResult<PathBuf> {
    let parent = std::env::current_dir()
        .map_err(|e| ChronoplotError::resource(format!("resolve working directory: {e}")))?;
    resolve_output_dir_in(&parent, name, scratch_root, ignore_errors)
}

fn resolve_output_dir_in(
    parent: &Path,
    name: &str,
    scratch_root: &Path,
    ignore_errors: bool,
) -> ChronoplotResult<PathBuf> {
    let mut output = parent.join(name);
    if output.is_dir() {
        let mut suffix = 0u32;
        output = parent.join(format!("{name}_{suffix}"));
        while output.is_dir() {
            suffix += 1;
            output = parent.join(format!("{name}_{suffix}"));
        }
    }

    match fs::create_dir_all(&output) {
        Ok(()) => Ok(output),
        Err(e) if ignore_errors => {
            warn!(
                "cannot create output directory '{}' ({e}), storing the video in '{}'",
                output.display(),
                scratch_root.display()
            );
            Ok(scratch_root.to_path_buf())
        },
        Err(e) => Err(ChronoplotError::resource(format!(
            "cannot create output directory '{}': {e} \
             (use --ignore-errors to fall back to the scratch directory)",
            output.display()
        ))),
    }
}

/// Invoke the system `ffmpeg` once, synchronously, over the rendered frame
/// images and return the path of the produced video.
pub fn assemble_video(
    frames_dir: &Path,
    frame_count: u64,
    fps: f64,
    output_dir: &Path,
    name: &str,
) -> ChronoplotResult<PathBuf> {
    // A name given as a path contributes only its final component to the
    // video file name; the directory part was consumed by the output dir.
    let stem = Path::new(name)
        .file_name()
        .map_or_else(|| name.to_string(), |f| f.to_string_lossy().into_owned());
    let video = output_dir.join(format!("{stem}.mp4"));
    let pattern = frames_dir.join(frame_pattern(frame_count));
    let fps = fps.to_string();

    let status = Command::new("ffmpeg")
        .arg("-f")
        .arg("image2")
        .arg("-r")
        .arg(&fps)
        .arg("-i")
        .arg(&pattern)
        .arg("-c:v")
        .arg("libx264")
        .arg("-r")
        .arg(&fps)
        .arg(&video)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| {
            ChronoplotError::resource(format!(
                "failed to run ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

    if !status.success() {
        return Err(ChronoplotError::resource(format!(
            "ffmpeg exited with status {status} while encoding '{}'",
            video.display()
        )));
    }

    info!("wrote {}", video.display());
    Ok(video)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_name_is_used_as_is() {
        let parent = tempfile::tempdir().unwrap();
        let out = resolve_output_dir_in(parent.path(), "anim", parent.path(), false).unwrap();
        assert_eq!(out, parent.path().join("anim"));
        assert!(out.is_dir());
    }

    #[test]
    fn collisions_probe_suffixes_from_zero() {
        let parent = tempfile::tempdir().unwrap();
        fs::create_dir(parent.path().join("anim")).unwrap();
        fs::create_dir(parent.path().join("anim_0")).unwrap();
        let out = resolve_output_dir_in(parent.path(), "anim", parent.path(), false).unwrap();
        assert_eq!(out, parent.path().join("anim_1"));
    }

    #[test]
    fn probing_restarts_at_zero_every_call() {
        let parent = tempfile::tempdir().unwrap();
        fs::create_dir(parent.path().join("anim")).unwrap();
        // A stale high suffix does not shift the probe start.
        fs::create_dir(parent.path().join("anim_7")).unwrap();
        let out = resolve_output_dir_in(parent.path(), "anim", parent.path(), false).unwrap();
        assert_eq!(out, parent.path().join("anim_0"));
    }

    #[test]
    fn creation_failure_falls_back_to_scratch_only_when_ignoring_errors() {
        let parent = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        // A plain file with the target name makes create_dir_all fail
        // without triggering the directory-collision probing.
        fs::write(parent.path().join("anim"), b"not a dir").unwrap();

        let err = resolve_output_dir_in(parent.path(), "anim", scratch.path(), false);
        assert!(matches!(err, Err(ChronoplotError::Resource(_))));

        let out = resolve_output_dir_in(parent.path(), "anim", scratch.path(), true).unwrap();
        assert_eq!(out, scratch.path());
    }
}
