//! Config guard: loads the allowlist and refuses to trust a config file that
//! anyone but the superuser could have written.
//!
//! The guard works on an explicit [`ConfigStore`] (path plus required owner)
//! rather than a process-wide path, so tests can point it at a temporary
//! directory owned by the current user.

use std::fs::{self, DirBuilder, File, Metadata, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use nix::unistd::{Gid, Uid};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::allowlist::Allowlist;
use crate::error::{ExecfdaError, Result};
use crate::fs_guard;

/// Default location of the config file.
pub const DEFAULT_CONFIG_PATH: &str = "/private/etc/execfda/config.yml";

/// The only mode a trusted config file may have.
pub const REQUIRED_MODE: u32 = 0o644;

/// Mode for directories created on the way to the config file.
pub const DIR_MODE: u32 = 0o755;

/// Maximum config file size (1 MB).
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

/// On-disk config document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub allowed: Allowlist,
}

impl ConfigDocument {
    pub fn parse(data: &[u8]) -> std::result::Result<Self, serde_yaml::Error> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_yaml::from_slice(data)
    }
}

/// User and group that must own the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl Ownership {
    /// `root:root` (`root:wheel` on macOS).
    pub const SUPERUSER: Self = Self { uid: 0, gid: 0 };

    /// Effective uid and gid of this process.
    pub fn current() -> Self {
        Self {
            uid: Uid::effective().as_raw(),
            gid: Gid::effective().as_raw(),
        }
    }
}

/// Location of the allowlist and the identity that must own it.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    owner: Ownership,
}

/// Exclusive lock on a config store, released on drop.
pub struct ConfigLock {
    _lock: Flock<File>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

impl ConfigStore {
    /// A store at `path` that must be owned by the superuser.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_owner(path, Ownership::SUPERUSER)
    }

    pub fn with_owner(path: impl Into<PathBuf>, owner: Ownership) -> Self {
        Self {
            path: path.into(),
            owner,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.symlink_metadata().is_ok()
    }

    /// Reads the allowlist without checking who owns the file.
    ///
    /// A missing file is an empty allowlist. Use [`ConfigStore::load_trusted`]
    /// for anything that authorizes execution.
    pub fn load(&self) -> Result<Allowlist> {
        Ok(self.read_document(false)?.allowed)
    }

    /// Checks mode and ownership of the config file.
    ///
    /// A missing file passes. Symlinks are rejected rather than followed.
    pub fn verify_integrity(&self) -> Result<()> {
        match self.path.symlink_metadata() {
            Ok(meta) => self.check_metadata(&meta),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no config file, nothing to verify");
                Ok(())
            }
            Err(err) => Err(self.read_error(err)),
        }
    }

    /// Verifies integrity and loads the allowlist from the same open file.
    pub fn load_trusted(&self) -> Result<Allowlist> {
        Ok(self.read_document(true)?.allowed)
    }

    /// Reads the whole document, optionally verifying the open handle first.
    pub fn read_document(&self, verify: bool) -> Result<ConfigDocument> {
        let file = match fs_guard::open_no_follow(&self.path) {
            Ok(file) => file,
            Err(err) if fs_guard::is_symlink_refusal(&err) => {
                return Err(ExecfdaError::NotRegularFile {
                    path: self.path.clone(),
                })
            }
            Err(err) => return Err(self.read_error(err)),
        };
        let Some(mut file) = file else {
            debug!(path = %self.path.display(), "no config file, allowlist is empty");
            return Ok(ConfigDocument::default());
        };

        let meta = file.metadata().map_err(|err| self.read_error(err))?;
        if verify {
            self.check_metadata(&meta)?;
        } else if !meta.is_file() {
            return Err(ExecfdaError::NotRegularFile {
                path: self.path.clone(),
            });
        }

        let data = fs_guard::read_bounded(&mut file, &self.path, MAX_CONFIG_BYTES)
            .map_err(|err| self.read_error(err))?;
        let doc = ConfigDocument::parse(&data).map_err(|err| ExecfdaError::ConfigRead {
            path: self.path.clone(),
            reason: err.to_string(),
        })?;
        debug!(
            path = %self.path.display(),
            entries = doc.allowed.len(),
            verified = verify,
            "loaded config"
        );
        Ok(doc)
    }

    /// Replaces the config file with `allowlist`.
    ///
    /// Content goes to a temporary file in the same directory, which is
    /// chowned to the required owner, set to [`REQUIRED_MODE`], synced and
    /// then renamed over the config path. Readers see either the old file or
    /// the new, already secured one.
    pub fn write(&self, allowlist: &Allowlist) -> Result<()> {
        let doc = ConfigDocument {
            allowed: allowlist.clone(),
        };
        let body = serde_yaml::to_string(&doc)
            .map_err(|err| ExecfdaError::write(&self.path, io::Error::other(err)))?;

        let dir = self.ensure_parent_dir()?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".execfda-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|err| ExecfdaError::write(&self.path, err))?;

        let secured = tmp
            .write_all(body.as_bytes())
            .and_then(|()| self.apply_ownership(tmp.as_file()))
            .and_then(|()| tmp.as_file().sync_all());
        secured.map_err(|err| ExecfdaError::write(&self.path, err))?;

        tmp.persist(&self.path)
            .map_err(|err| ExecfdaError::write(&self.path, err.error))?;
        debug!(path = %self.path.display(), entries = allowlist.len(), "wrote config");
        Ok(())
    }

    /// Re-applies the required owner and mode to the existing file in place.
    pub fn secure(&self) -> Result<()> {
        let meta = self
            .path
            .symlink_metadata()
            .map_err(|err| ExecfdaError::write(&self.path, err))?;
        if !meta.is_file() {
            return Err(ExecfdaError::NotRegularFile {
                path: self.path.clone(),
            });
        }
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(nix::fcntl::OFlag::O_NOFOLLOW.bits())
            .open(&self.path)
            .map_err(|err| ExecfdaError::write(&self.path, err))?;
        self.apply_ownership(&file)
            .map_err(|err| ExecfdaError::write(&self.path, err))
    }

    /// Creates missing parent directories with mode [`DIR_MODE`] and
    /// returns the immediate parent.
    ///
    /// Each created directory is chmodded explicitly, so the umask cannot
    /// leave it unreadable for the users that `exec` runs as. Directories
    /// that already exist are left alone.
    pub fn ensure_parent_dir(&self) -> Result<PathBuf> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let missing: Vec<&Path> = dir.ancestors().take_while(|p| !p.is_dir()).collect();
        for component in missing.into_iter().rev() {
            match DirBuilder::new().mode(DIR_MODE).create(component) {
                Ok(()) => {
                    fs::set_permissions(component, Permissions::from_mode(DIR_MODE))
                        .map_err(|err| ExecfdaError::write(&self.path, err))?;
                    debug!(dir = %component.display(), "created config directory");
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists && component.is_dir() => {}
                Err(err) => return Err(ExecfdaError::write(&self.path, err)),
            }
        }
        Ok(dir)
    }

    /// Takes an exclusive lock for a read-modify-write of the config file.
    ///
    /// The lock lives on a sidecar file next to the config, since the config
    /// itself is replaced by rename on every write.
    pub fn lock(&self) -> Result<ConfigLock> {
        let dir = self.ensure_parent_dir()?;
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        let lock_path = dir.join(format!(".{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .mode(0o600)
            .custom_flags(nix::fcntl::OFlag::O_NOFOLLOW.bits())
            .open(&lock_path)
            .map_err(|err| ExecfdaError::write(&lock_path, err))?;
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| ExecfdaError::write(&lock_path, io::Error::from(errno)))?;
        debug!(lock = %lock_path.display(), "acquired config lock");
        Ok(ConfigLock { _lock: lock })
    }

    fn apply_ownership(&self, file: &File) -> io::Result<()> {
        std::os::unix::fs::fchown(file, Some(self.owner.uid), Some(self.owner.gid))?;
        file.set_permissions(Permissions::from_mode(REQUIRED_MODE))
    }

    fn check_metadata(&self, meta: &Metadata) -> Result<()> {
        if !meta.file_type().is_file() {
            return Err(ExecfdaError::NotRegularFile {
                path: self.path.clone(),
            });
        }
        let mode = meta.mode() & 0o7777;
        if mode != REQUIRED_MODE {
            return Err(ExecfdaError::Permission {
                path: self.path.clone(),
                mode,
                expected: REQUIRED_MODE,
            });
        }
        if meta.uid() != self.owner.uid || meta.gid() != self.owner.gid {
            return Err(ExecfdaError::Ownership {
                path: self.path.clone(),
                uid: meta.uid(),
                gid: meta.gid(),
                expected_uid: self.owner.uid,
                expected_gid: self.owner.gid,
            });
        }
        debug!(path = %self.path.display(), "config integrity verified");
        Ok(())
    }

    fn read_error(&self, err: io::Error) -> ExecfdaError {
        ExecfdaError::ConfigRead {
            path: self.path.clone(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn store_in(dir: &Path) -> ConfigStore {
        ConfigStore::with_owner(dir.join("config.yml"), Ownership::current())
    }

    fn write_raw(path: &Path, body: &str, mode: u32) {
        fs::write(path, body).unwrap();
        fs::set_permissions(path, Permissions::from_mode(mode)).unwrap();
    }

    fn someone_else() -> Ownership {
        let me = Ownership::current();
        Ownership {
            uid: me.uid.wrapping_add(1),
            gid: me.gid,
        }
    }

    #[test]
    fn missing_file_loads_empty_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.load().unwrap().is_empty());
        assert!(store.load_trusted().unwrap().is_empty());
    }

    #[test]
    fn missing_file_passes_integrity() {
        let dir = tempfile::tempdir().unwrap();
        store_in(dir.path()).verify_integrity().unwrap();
    }

    #[test]
    fn loads_entries_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        write_raw(
            store.path(),
            "allowed:\n  - tar -xvf a.tar\n  - ls\n  - ls\n",
            0o644,
        );
        let allowlist = store.load_trusted().unwrap();
        assert_eq!(allowlist.entries(), ["tar -xvf a.tar", "ls", "ls"]);
    }

    #[test]
    fn empty_file_is_empty_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        write_raw(store.path(), "\n", 0o644);
        assert!(store.load_trusted().unwrap().is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        write_raw(store.path(), "other: 1\nallowed: [pwd]\n", 0o644);
        assert_eq!(store.load().unwrap().entries(), ["pwd"]);
    }

    #[test]
    fn malformed_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        write_raw(store.path(), "allowed: {not: [a list\n", 0o644);
        let err = store.load().unwrap_err();
        assert!(matches!(err, ExecfdaError::ConfigRead { .. }), "{err}");
    }

    #[test]
    fn rejects_mode_0640() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        write_raw(store.path(), "allowed: [ls]\n", 0o640);

        let err = store.verify_integrity().unwrap_err();
        assert!(
            matches!(err, ExecfdaError::Permission { mode: 0o640, .. }),
            "{err}"
        );
        assert!(store.load_trusted().is_err());
    }

    #[test]
    fn rejects_executable_and_writable_modes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        for mode in [0o755, 0o664, 0o646, 0o600, 0o444] {
            write_raw(store.path(), "allowed: [ls]\n", mode);
            let err = store.verify_integrity().unwrap_err();
            assert!(
                matches!(err, ExecfdaError::Permission { .. }),
                "mode {mode:o}: {err}"
            );
        }
    }

    #[test]
    fn rejects_foreign_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        write_raw(&path, "allowed: [ls]\n", 0o644);

        let store = ConfigStore::with_owner(&path, someone_else());
        let err = store.verify_integrity().unwrap_err();
        assert!(matches!(err, ExecfdaError::Ownership { .. }), "{err}");
        let err = store.load_trusted().unwrap_err();
        assert!(matches!(err, ExecfdaError::Ownership { .. }), "{err}");
    }

    #[test]
    fn accepts_correct_mode_and_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        write_raw(store.path(), "allowed: [ls]\n", 0o644);
        store.verify_integrity().unwrap();
    }

    #[test]
    fn rejects_symlinked_config() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.yml");
        write_raw(&real, "allowed: [ls]\n", 0o644);
        let store = store_in(dir.path());
        std::os::unix::fs::symlink(&real, store.path()).unwrap();

        let err = store.verify_integrity().unwrap_err();
        assert!(matches!(err, ExecfdaError::NotRegularFile { .. }), "{err}");
        let err = store.load_trusted().unwrap_err();
        assert!(matches!(err, ExecfdaError::NotRegularFile { .. }), "{err}");
    }

    #[test]
    fn write_creates_directories_and_secures_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc").join("execfda").join("config.yml");
        let store = ConfigStore::with_owner(&path, Ownership::current());

        let allowlist = Allowlist::from(vec!["tar -xvf a.tar".to_string()]);
        store.write(&allowlist).unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.mode() & 0o7777, REQUIRED_MODE);
        store.verify_integrity().unwrap();
        assert_eq!(store.load_trusted().unwrap(), allowlist);
    }

    #[test]
    fn created_directories_are_0755_under_restrictive_umask() {
        use nix::sys::stat::{umask, Mode};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc").join("execfda").join("config.yml");
        let store = ConfigStore::with_owner(&path, Ownership::current());

        let previous = umask(Mode::from_bits_truncate(0o077));
        let written = store.write(&Allowlist::new());
        umask(previous);
        written.unwrap();

        for created in [dir.path().join("etc"), dir.path().join("etc").join("execfda")] {
            let mode = fs::metadata(&created).unwrap().mode() & 0o7777;
            assert_eq!(mode, DIR_MODE, "{}", created.display());
        }
        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o7777, REQUIRED_MODE);
    }

    #[test]
    fn existing_parent_directory_keeps_its_mode() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("private");
        fs::create_dir(&parent).unwrap();
        fs::set_permissions(&parent, Permissions::from_mode(0o750)).unwrap();

        let store = ConfigStore::with_owner(parent.join("config.yml"), Ownership::current());
        store.write(&Allowlist::new()).unwrap();
        assert_eq!(fs::metadata(&parent).unwrap().mode() & 0o7777, 0o750);
    }

    #[test]
    fn write_replaces_insecure_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        write_raw(store.path(), "allowed: [ls]\n", 0o666);

        store.write(&Allowlist::from(vec!["pwd".to_string()])).unwrap();
        store.verify_integrity().unwrap();
        assert_eq!(store.load_trusted().unwrap().entries(), ["pwd"]);
    }

    #[test]
    fn write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.write(&Allowlist::new()).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["config.yml".to_string()]);
    }

    #[test]
    fn secure_repairs_mode_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        write_raw(store.path(), "allowed: [ls]\n", 0o666);
        assert!(store.verify_integrity().is_err());

        store.secure().unwrap();
        store.verify_integrity().unwrap();
        assert_eq!(store.load_trusted().unwrap().entries(), ["ls"]);
    }

    #[test]
    fn lock_is_reacquirable_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        drop(store.lock().unwrap());
        let _again = store.lock().unwrap();
        assert!(dir.path().join(".config.yml.lock").exists());
    }
}
