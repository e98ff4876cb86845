// Track discovery - the player operates on the working directory,
// flat (no recursion), filenames are the identifiers everywhere.

use anyhow::Result;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

use crate::audio::probe;

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "wav", "m4a"];

/// Matches an embedded downloader id: `[` + 11 alphanumeric/`-`/`_` chars + `]`.
fn video_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[a-zA-Z0-9\-_]{11}\]").unwrap())
}

#[derive(Debug, Clone)]
pub struct Track {
    /// Filename as it appears in the directory listing.
    pub file: String,
    /// Filename minus extension, trimmed and NFC-normalized.
    pub name: String,
    pub duration_secs: f64,
    pub video_id: Option<String>,
}

impl Track {
    /// Build a track from a filename in the working directory, probing
    /// its duration (falls back to 0 with a warning if probing fails).
    pub fn load(file: &str) -> Self {
        let name = display_name(file);
        let video_id = extract_video_id(&name);
        let duration_secs = probe::duration_seconds(Path::new(file));

        Self {
            file: file.to_string(),
            name,
            duration_secs,
            video_id,
        }
    }
}

pub fn display_name(file: &str) -> String {
    let stem = Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file);
    stem.trim().nfc().collect()
}

pub fn extract_video_id(name: &str) -> Option<String> {
    video_id_regex()
        .find(name)
        .map(|m| m.as_str().trim_matches(|c| c == '[' || c == ']').to_string())
}

pub fn is_audio_file(file: &str) -> bool {
    Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// List playable files in `dir`, sorted. Hidden files are skipped.
pub fn list_audio_files<P: AsRef<Path>>(dir: P) -> Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if is_audio_file(name) {
            files.push(name.to_string());
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_display_name_strips_extension_and_trims() {
        assert_eq!(display_name("My Song [dQw4w9WgXcQ].mp3"), "My Song [dQw4w9WgXcQ]");
        assert_eq!(display_name(" padded .mp3"), "padded");
    }

    #[test]
    fn test_extract_video_id() {
        assert_eq!(
            extract_video_id("Artist - Title [dQw4w9WgXcQ]"),
            Some("dQw4w9WgXcQ".to_string())
        );
        // wrong length
        assert_eq!(extract_video_id("Title [short]"), None);
        assert_eq!(extract_video_id("no id here"), None);
    }

    #[test]
    fn test_list_audio_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp3", "a.mp3", "notes.txt", ".hidden.mp3", "c.flac"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/nested.mp3"), b"").unwrap();

        let files = list_audio_files(dir.path()).unwrap();
        assert_eq!(files, vec!["a.mp3", "b.mp3", "c.flac"]);
    }
}
