//! Scratch directory for downloaded artifacts.

use std::io;
use std::path::Path;

/// Create `dir` if missing and remove everything inside it.
pub(crate) fn reset_dir(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;

    let mut removed = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        removed += 1;
    }

    tracing::debug!(dir = %dir.display(), removed, "Scratch directory cleared");
    Ok(())
}
