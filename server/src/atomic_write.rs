use std::ffi::OsString;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Replaces the contents of `path` with `content`, keeping the previous
/// contents recoverable throughout.
///
/// Protocol: rename the existing file to `path~`, write the new content,
/// and on a failed write rename the backup back into place before
/// propagating the error. A file that did not exist yet simply skips the
/// backup step. On success the `~` backup is left on disk as a recovery
/// artifact.
///
/// The rename/write pair is not crash-safe across an OS failure between
/// the two steps; it defends against write errors inside this process.
pub fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    write_with(path, |p| fs::write(p, content))
}

fn write_with(path: &Path, write_fn: impl FnOnce(&Path) -> io::Result<()>) -> io::Result<()> {
    let backup = backup_path(path);

    let had_backup = match fs::rename(path, &backup) {
        Ok(()) => true,
        // First save of a new file: nothing to back up.
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };

    match write_fn(path) {
        Ok(()) => Ok(()),
        Err(write_err) => {
            if had_backup {
                if let Err(restore_err) = fs::rename(&backup, path) {
                    // Double fault: the file is still available as the
                    // backup, but we can only report the original error.
                    warn!(
                        "restoring backup {} failed: {}",
                        backup.display(),
                        restore_err
                    );
                }
            }
            Err(write_err)
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push("~");
    PathBuf::from(name)
}
