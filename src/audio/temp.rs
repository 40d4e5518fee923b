//! Scoped temporary file holding one uploaded audio payload.
//!
//! The file exists from [`TemporaryAudio::create`] until the value is dropped.
//! Dropping removes it on every path out of the request: success, error,
//! or a panic unwinding through the inference closure.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// An uploaded audio file materialised on disk.
#[derive(Debug)]
pub struct TemporaryAudio {
    path: PathBuf,
    bytes_written: usize,
}

impl TemporaryAudio {
    /// Write `bytes` to a uniquely named file in `dir`.
    ///
    /// Only the extension of `filename_hint` is kept (decoders probe on it);
    /// the rest of the client-supplied name never reaches the filesystem.
    pub async fn create(dir: &Path, bytes: &[u8], filename_hint: Option<&str>) -> io::Result<Self> {
        let mut name = Uuid::new_v4().to_string();
        if let Some(ext) = filename_hint.and_then(safe_extension) {
            name.push('.');
            name.push_str(&ext);
        }

        let path = dir.join(name);
        // Constructed before writing so a partial file is cleaned up too
        let audio = Self {
            path,
            bytes_written: bytes.len(),
        };
        tokio::fs::write(&audio.path, bytes).await?;

        debug!(path = %audio.path.display(), bytes = audio.bytes_written, "Created temporary audio file");
        Ok(audio)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

impl Drop for TemporaryAudio {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed temporary audio file"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove temporary audio file"),
        }
    }
}

fn safe_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_lives_until_drop() {
        let dir = std::env::temp_dir();
        let audio = TemporaryAudio::create(&dir, b"RIFF....", Some("meeting.WAV"))
            .await
            .unwrap();
        let path = audio.path().to_path_buf();

        assert!(path.exists());
        assert_eq!(audio.bytes_written(), 8);
        assert_eq!(path.extension().unwrap(), "wav");
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF....");

        drop(audio);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_tolerates_missing_file() {
        let audio = TemporaryAudio::create(&std::env::temp_dir(), b"x", None)
            .await
            .unwrap();
        assert!(audio.path().extension().is_none());

        std::fs::remove_file(audio.path()).unwrap();
        drop(audio);
    }

    #[tokio::test]
    async fn test_unique_names() {
        let dir = std::env::temp_dir();
        let a = TemporaryAudio::create(&dir, b"a", Some("a.mp3")).await.unwrap();
        let b = TemporaryAudio::create(&dir, b"b", Some("a.mp3")).await.unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let dir = std::env::temp_dir().join(Uuid::new_v4().to_string()).join("nested");
        assert!(TemporaryAudio::create(&dir, b"a", Some("a.wav")).await.is_err());
    }

    #[test]
    fn test_safe_extension() {
        assert_eq!(safe_extension("clip.m4a").as_deref(), Some("m4a"));
        assert_eq!(safe_extension("../../etc/passwd"), None);
        assert_eq!(safe_extension("weird.ex t"), None);
        assert_eq!(safe_extension("noext"), None);
    }
}
