//! Management commands: `config create|add|delete|get`.
//!
//! Every mutation checks the invoking identity first, then holds the store
//! lock for the whole verify, read, modify and write sequence so concurrent
//! invocations cannot lose each other's updates.

use tracing::{info, warn};

use crate::config::{ConfigDocument, ConfigStore};
use crate::error::{ExecfdaError, Result};
use crate::gate::normalize;
use crate::identity::{require_superuser, Identity};

/// Initializes an empty config, or re-secures an existing one.
///
/// An existing file keeps its contents but gets the required owner and
/// mode re-applied, which makes this the repair path for a config that
/// `exec` refuses.
pub fn create(store: &ConfigStore, who: &dyn Identity) -> Result<()> {
    require_superuser(who)?;
    let _lock = store.lock()?;

    if store.exists() {
        if let Err(err) = store.verify_integrity() {
            warn!(error = %err, "re-securing existing config");
        }
        store.secure()?;
        info!(path = %store.path().display(), "config already exists, ownership and mode re-applied");
    } else {
        store.write(&Default::default())?;
        info!(path = %store.path().display(), "created empty config");
    }
    Ok(())
}

/// Appends the normalized `command` to the allowlist and returns the stored
/// entry. A command that normalizes to the empty string is refused, since
/// it could never match.
pub fn add<S: AsRef<str>>(store: &ConfigStore, who: &dyn Identity, command: &[S]) -> Result<String> {
    require_superuser(who)?;
    let requested = normalize(command);
    if requested.is_empty() {
        return Err(ExecfdaError::EmptyCommand);
    }
    let _lock = store.lock()?;

    let mut allowlist = store.load_trusted()?;
    let entry = allowlist.push(&requested).to_string();
    store.write(&allowlist)?;
    info!(entry = %entry, total = allowlist.len(), "added allowlist entry");
    Ok(entry)
}

/// Removes every entry matching the normalized `command` and returns how
/// many were removed. The file is rewritten even when nothing matched.
pub fn delete<S: AsRef<str>>(
    store: &ConfigStore,
    who: &dyn Identity,
    command: &[S],
) -> Result<usize> {
    require_superuser(who)?;
    let _lock = store.lock()?;

    let mut allowlist = store.load_trusted()?;
    let target = normalize(command);
    let removed = allowlist.remove_matching(&target);
    store.write(&allowlist)?;
    if removed == 0 {
        warn!(entry = %target, "no matching allowlist entry");
    } else {
        info!(entry = %target, removed, "deleted allowlist entries");
    }
    Ok(removed)
}

/// Reads the config for display. No privilege is required.
///
/// An insecure file is still shown, with a warning that `exec` will refuse
/// it.
pub fn get(store: &ConfigStore) -> Result<ConfigDocument> {
    if let Err(err) = store.verify_integrity() {
        if !err.is_integrity_failure() {
            return Err(err);
        }
        warn!(error = %err, "exec will refuse this config");
    }
    store.read_document(false)
}
