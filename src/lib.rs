//! # execfda -- execute allowlisted commands with full disk access
//!
//! `execfda` is granted elevated filesystem access once and hands it on to
//! exactly the command lines an administrator has allowlisted. Anything not
//! on the list is refused without running anything.
//!
//! ## Trust Boundary
//!
//! - **Config guard** ([`config`]): the allowlist file must be a regular file
//!   owned by `root:root` with mode exactly `0644`. It is opened without
//!   following symlinks and checked on the open descriptor before a single
//!   byte is parsed. A missing file is an empty allowlist.
//! - **Exec gate** ([`gate`]): the requested command line is whitespace
//!   normalized and compared for exact equality with each entry. On a match
//!   the process is replaced via `execve`; success never returns, which
//!   [`gate::execute`] expresses as `Result<Infallible, _>`.
//! - **Management** ([`manage`]): only the superuser may create, add or delete.
//!   Updates are locked and written atomically with ownership and mode set
//!   before the file becomes visible.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`allowlist`] | Ordered allowlist of command lines |
//! | [`config`] | Config store: integrity checks, load, atomic write, lock |
//! | [`gate`] | Normalization, matching, `$PATH` resolution, exec |
//! | [`identity`] | Superuser check for management commands |
//! | [`manage`] | `config create`, `add`, `delete`, `get` |
//! | [`fs_guard`] | Symlink-refusing, size-bounded file reads |
//! | [`error`] | [`ExecfdaError`] |

pub mod allowlist;

/// Config guard: the allowlist file, its integrity checks and atomic writes.
pub mod config;

pub mod error;

/// Symlink-refusing, size-bounded reads. All config reads go through here.
pub mod fs_guard;

/// Exec gate: decides and, on a match, replaces the process.
pub mod gate;

pub mod identity;
pub mod manage;

pub use allowlist::Allowlist;
pub use config::{ConfigDocument, ConfigStore, Ownership};
pub use error::ExecfdaError;
