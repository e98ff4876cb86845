// Weighted track selection.
//
// An optional JSON overlay maps a filename (or a filename prefix) to a
// numeric weight. Keys are applied shortest-first so a longer, more specific
// prefix overrides a shorter one. Files the overlay never touches weigh 1.

use anyhow::{bail, Context, Result};
use rand::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Build the selection table for `files`. Returns the files plus a parallel
/// weight list; `None` weights means "no overlay, choose uniformly".
/// Every file in the listing appears in the result exactly once.
pub fn build_weights(
    overlay: Option<&Path>,
    files: Vec<String>,
) -> Result<(Vec<String>, Option<Vec<f64>>)> {
    let Some(path) = overlay else {
        return Ok((files, None));
    };

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read weights file {}", path.display()))?;
    let overlay: HashMap<String, serde_json::Value> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse weights file {}", path.display()))?;

    // Shortest keys first, so longer completions override shorter ones.
    let mut keys: Vec<&String> = overlay.keys().collect();
    keys.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

    let mut table: HashMap<&str, f64> = HashMap::new();
    for key in keys {
        let Some(weight) = overlay[key].as_f64() else {
            continue;
        };
        if files.iter().any(|f| f == key) {
            table.insert(key.as_str(), weight);
        } else {
            let matches: Vec<&String> = files.iter().filter(|f| f.starts_with(key.as_str())).collect();
            if matches.is_empty() {
                warn!("weights: no such key {key}");
            }
            for file in matches {
                table.insert(file.as_str(), weight);
            }
        }
    }

    let weights = files
        .iter()
        .map(|f| table.get(f.as_str()).copied().unwrap_or(1.0))
        .collect();

    Ok((files, Some(weights)))
}

/// Weighted random draw. Each call is independent; the same track may recur.
pub fn choose<'a, R: Rng>(
    tracks: &'a [String],
    weights: Option<&[f64]>,
    rng: &mut R,
) -> Result<&'a str> {
    if tracks.is_empty() {
        bail!("no audio files found in the current directory");
    }

    let Some(weights) = weights else {
        return Ok(tracks.choose(rng).map(String::as_str).unwrap());
    };

    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Ok(tracks.choose(rng).map(String::as_str).unwrap());
    }

    let mut remaining = rng.gen::<f64>() * total;
    for (track, weight) in tracks.iter().zip(weights) {
        remaining -= weight;
        if remaining <= 0.0 {
            return Ok(track);
        }
    }

    // Rounding can leave a sliver; land on the last entry.
    Ok(tracks.last().map(String::as_str).unwrap())
}

/// Percentage each track gets of the total weight, sorted ascending.
/// Backs the `--show-weights` report.
pub fn weight_report(tracks: &[String], weights: Option<&[f64]>) -> Vec<(String, f64)> {
    let uniform = vec![1.0; tracks.len()];
    let weights = weights.unwrap_or(&uniform);
    let total: f64 = weights.iter().sum();

    let mut report: Vec<(String, f64)> = tracks
        .iter()
        .zip(weights)
        .map(|(t, w)| (t.clone(), if total > 0.0 { w * 100.0 / total } else { 0.0 }))
        .collect();

    report.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    report
}
