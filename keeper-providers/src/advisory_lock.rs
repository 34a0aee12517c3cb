use std::fs;
use std::fs::File;
use std::io;
use std::path::Path;
use std::path::PathBuf;

/// An advisory, cross-process file lock held only for the duration of one
/// provider call (spec §5: "local GPU/model providers acquire an advisory
/// file lock before inference so that multiple processes do not saturate
/// the same model... held only for the duration of one call, not across
/// calls"). The lock file is removed on drop.
pub struct FileLock {
    path: PathBuf,
    _file: File,
}

impl FileLock {
    /// Fails with [`io::ErrorKind::AlreadyExists`] if another process (or
    /// an earlier, uncleaned run) holds the lock.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
