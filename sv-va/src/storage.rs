//! On-disk layout for frames, uploads, and export bundles
//!
//! Everything lives under the configured storage root:
//!
//! ```text
//! <root>/frames/<session_id>/frame_NNNNNN.jpg
//! <root>/uploads/
//! <root>/exports/<session_id>_<timestamp>.zip
//! ```

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Frame and export file store rooted at one directory
#[derive(Debug, Clone)]
pub struct FrameStore {
    root: PathBuf,
}

impl FrameStore {
    /// Open the store, creating the directory tree if missing
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("frames"))?;
        std::fs::create_dir_all(root.join("uploads"))?;
        std::fs::create_dir_all(root.join("exports"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    fn session_frames_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join("frames").join(session_id.to_string())
    }

    /// Canonical frame filename for an index
    pub fn frame_file_name(frame_index: i64) -> String {
        format!("frame_{:06}.jpg", frame_index)
    }

    /// Write a JPEG for a frame, returning its path
    pub fn save_frame_jpeg(
        &self,
        session_id: Uuid,
        frame_index: i64,
        jpeg_bytes: &[u8],
    ) -> std::io::Result<PathBuf> {
        let dir = self.session_frames_dir(session_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(Self::frame_file_name(frame_index));
        std::fs::write(&path, jpeg_bytes)?;
        Ok(path)
    }

    /// Read a frame JPEG back
    pub fn load_frame_jpeg(&self, image_path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(image_path)
    }

    /// Path for a new export bundle; timestamped so re-exports never
    /// clobber earlier bundles
    pub fn new_export_path(&self, session_id: Uuid) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        self.exports_dir()
            .join(format!("{}_{}.zip", session_id, stamp))
    }

    /// Remove everything stored for a session (frames; export bundles
    /// are kept, they may be shared externally already)
    pub fn purge_session(&self, session_id: Uuid) -> std::io::Result<()> {
        let dir = self.session_frames_dir(session_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_file_name_zero_padded() {
        assert_eq!(FrameStore::frame_file_name(0), "frame_000000.jpg");
        assert_eq!(FrameStore::frame_file_name(42), "frame_000042.jpg");
    }

    #[test]
    fn test_save_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(dir.path()).unwrap();
        let session_id = Uuid::new_v4();

        let path = store.save_frame_jpeg(session_id, 3, b"jpegdata").unwrap();
        assert!(path.ends_with("frame_000003.jpg"));
        assert_eq!(
            store.load_frame_jpeg(path.to_str().unwrap()).unwrap(),
            b"jpegdata"
        );

        store.purge_session(session_id).unwrap();
        assert!(!path.exists());
    }
}
