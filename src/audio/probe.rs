// Duration probing - an ordered chain of strategies, each tried in turn.
// Symphonia reads the container directly; ffprobe covers whatever it can't;
// if everything fails the track still plays, just with a zero-length bar.

use anyhow::{anyhow, Result};
use std::fs::File;
use std::path::Path;
use std::process::Command;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

pub fn duration_seconds(path: &Path) -> f64 {
    match probe_symphonia(path) {
        Ok(secs) => return secs,
        Err(e) => debug!("symphonia probe failed for {}: {e}", path.display()),
    }

    match probe_ffprobe(path) {
        Ok(secs) => return secs,
        Err(e) => debug!("ffprobe failed for {}: {e}", path.display()),
    }

    warn!("could not determine duration of {}, using 0", path.display());
    0.0
}

fn probe_symphonia(path: &Path) -> Result<f64> {
    let file = File::open(path)?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        stream,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| anyhow!("no default track"))?;
    let params = &track.codec_params;

    let time_base = params.time_base.ok_or_else(|| anyhow!("no time base"))?;
    let n_frames = params.n_frames.ok_or_else(|| anyhow!("no frame count"))?;

    let time = time_base.calc_time(n_frames);
    Ok(time.seconds as f64 + time.frac)
}

fn probe_ffprobe(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args(["-i"])
        .arg(path)
        .args([
            "-show_entries",
            "format=duration",
            "-v",
            "quiet",
            "-of",
            "csv=p=0",
        ])
        .output()?;

    if !output.status.success() {
        return Err(anyhow!("ffprobe exited with {}", output.status));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text.trim().parse::<f64>()?)
}
