use crate::SUPPORTED_EXTENSIONS;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("No such directory: {0}")]
    MissingDir(PathBuf),
}

/// Whether a path carries one of the supported MIDI extensions (any case).
pub fn is_midi_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Walk directories (following links) and collect MIDI files, sorted by path.
///
/// A plain file given directly is included if its extension matches.
pub fn discover(paths: &[PathBuf]) -> Result<Vec<PathBuf>, ScanError> {
    let mut files = Vec::new();

    for path in paths {
        if !path.exists() {
            return Err(ScanError::MissingDir(path.clone()));
        }
        for entry in WalkDir::new(path).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && is_midi_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files.dedup();
    log::debug!("Discovered {} MIDI files", files.len());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter() {
        assert!(is_midi_file(Path::new("a/song.mid")));
        assert!(is_midi_file(Path::new("song.MIDI")));
        assert!(is_midi_file(Path::new("karaoke.Kar")));
        assert!(!is_midi_file(Path::new("song.mp3")));
        assert!(!is_midi_file(Path::new("mid")));
    }

    #[test]
    fn test_discover_walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b/c")).unwrap();
        for name in ["a.mid", "b/c/d.MID", "b/notes.txt", "e.kar"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = discover(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.mid", "b/c/d.MID", "e.kar"]);
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(discover(&[missing]), Err(ScanError::MissingDir(_))));
    }
}
