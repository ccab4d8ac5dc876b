//! Container repair via an external remux.
//!
//! Streams are copied, not transcoded, so the pass is cheap; it exists to
//! rebuild container metadata (duration, index) that the demuxer could not
//! trust. The `ffmpeg` binary must be on PATH.

use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};

/// Remux `path` into a temporary sibling and swap it into place.
pub fn remux_in_place(path: &Path) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("remux target has no file name: {}", path.display()))?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(".remux.mkv");
    let tmp = path.with_file_name(tmp_name);

    log::info!("remuxing {}", path.display());
    let status = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-i")
        .arg(path)
        .arg("-c")
        .arg("copy")
        .arg(&tmp)
        .status()
        .context("spawn ffmpeg for remux")?;
    if !status.success() {
        let _ = std::fs::remove_file(&tmp);
        return Err(anyhow!(
            "ffmpeg remux of {} failed with {}",
            path.display(),
            status
        ));
    }

    std::fs::rename(&tmp, path)
        .with_context(|| format!("replace {} with remuxed copy", path.display()))?;
    Ok(())
}
