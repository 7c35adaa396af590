use nix::unistd::{Uid, User};

use crate::error::{ExecfdaError, Result};

/// Who is invoking a management command.
pub trait Identity {
    fn is_superuser(&self) -> bool;

    /// Name for error messages.
    fn name(&self) -> String;
}

/// The real user of this process, i.e. the person at the keyboard even when
/// the binary carries extra privileges.
#[derive(Debug, Clone, Copy)]
pub struct InvokingUser {
    uid: Uid,
}

impl InvokingUser {
    pub fn current() -> Self {
        Self { uid: Uid::current() }
    }
}

impl Identity for InvokingUser {
    fn is_superuser(&self) -> bool {
        self.uid.is_root()
    }

    fn name(&self) -> String {
        match User::from_uid(self.uid) {
            Ok(Some(user)) => user.name,
            _ => format!("uid {}", self.uid),
        }
    }
}

/// Fails with [`ExecfdaError::Authorization`] unless `who` is the superuser.
pub fn require_superuser(who: &dyn Identity) -> Result<()> {
    if who.is_superuser() {
        Ok(())
    } else {
        Err(ExecfdaError::Authorization { user: who.name() })
    }
}
