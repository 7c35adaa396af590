//! Exec gate: decides whether a requested command line may run and, if it
//! may, replaces this process with it.
//!
//! Matching is an exact comparison of whitespace-normalized strings. There
//! is no quoting, globbing or prefix matching: `tar -xvf a.tar` authorizes
//! exactly that command line and nothing else.

use std::convert::Infallible;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info};

use crate::allowlist::Allowlist;
use crate::config::ConfigStore;
use crate::error::{ExecfdaError, Result};

/// Collapses every whitespace run in `line` to a single space and trims
/// the ends.
pub fn normalize_line(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Space-joins `args` and normalizes the result.
pub fn normalize<S: AsRef<str>>(args: &[S]) -> String {
    normalize_line(
        &args
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join(" "),
    )
}

/// True iff some entry of `allowlist` equals `requested` after both are
/// normalized. An empty request never matches.
pub fn is_allowed(requested: &str, allowlist: &Allowlist) -> bool {
    let requested = normalize_line(requested);
    if requested.is_empty() {
        return false;
    }
    allowlist.iter().any(|entry| normalize_line(entry) == requested)
}

/// Resolves `program` against `$PATH`.
pub fn resolve(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|source| ExecfdaError::Resolution {
        program: program.to_string(),
        source,
    })
}

/// Replaces the current process with `args[0]`, resolved on `$PATH`.
///
/// `args` is passed through as the argument vector, `argv[0]` included, and
/// the environment is inherited unchanged. Only returns on failure.
pub fn execute<S: AsRef<str>>(args: &[S]) -> Result<Infallible> {
    let Some((program, rest)) = args.split_first() else {
        return Err(ExecfdaError::Execution {
            binary: PathBuf::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        });
    };
    let program: &str = program.as_ref();
    let rest: Vec<&str> = rest.iter().map(|arg| arg.as_ref()).collect();
    let binary = resolve(program)?;
    debug!(binary = %binary.display(), "replacing process");

    let source = Command::new(&binary).arg0(program).args(rest).exec();
    Err(ExecfdaError::Execution { binary, source })
}

/// Runs `args` if the trusted allowlist in `store` permits it.
///
/// The config file is verified before its contents are looked at; an
/// insecure file fails the call without consulting the allowlist. On a
/// match this never returns.
pub fn run<S: AsRef<str>>(store: &ConfigStore, args: &[S]) -> Result<Infallible> {
    let allowlist = store.load_trusted()?;
    let requested = normalize(args);
    if !is_allowed(&requested, &allowlist) {
        info!(command = %requested, "command not allowed");
        return Err(ExecfdaError::NotAllowed { command: requested });
    }
    debug!(command = %requested, "command allowed");
    execute(args)
}
