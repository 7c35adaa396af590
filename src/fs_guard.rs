use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::OFlag;

/// Opens `path` read-only without following a final symlink.
///
/// Returns `Ok(None)` when the file does not exist. A symlink fails with
/// `ELOOP` (see [`is_symlink_refusal`]). `O_NONBLOCK` keeps a FIFO planted at
/// the path from hanging the open; it has no effect on regular files.
///
/// Integrity checks should be run against `File::metadata()` of the handle
/// returned here, so the file that was checked is the file that is read.
pub fn open_no_follow(path: &Path) -> io::Result<Option<File>> {
    let opened = OpenOptions::new()
        .read(true)
        .custom_flags((OFlag::O_NOFOLLOW | OFlag::O_NONBLOCK).bits())
        .open(path);
    match opened {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// True when `err` is the `ELOOP` that [`open_no_follow`] reports for a symlink.
pub fn is_symlink_refusal(err: &io::Error) -> bool {
    err.raw_os_error() == Some(Errno::ELOOP as i32)
}

/// Reads at most `max_bytes` from `file`, failing if there is more.
pub fn read_bounded(file: &mut File, path: &Path, max_bytes: u64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    file.take(max_bytes + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > max_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "file too large: {} (max {max_bytes} bytes)",
                path.display()
            ),
        ));
    }
    Ok(buf)
}
