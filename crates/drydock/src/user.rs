//! Identity of the user running the harness.

use nix::unistd::{User, geteuid};

use crate::errors::HarnessError;

/// Login name of the effective user.
///
/// # Errors
///
/// Fails when the passwd lookup errors or returns no entry.
pub fn current_user() -> Result<String, HarnessError> {
    let uid = geteuid();
    match User::from_uid(uid) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => Err(HarnessError::UnknownUser {
            uid: uid.as_raw(),
        }),
        Err(source) => Err(HarnessError::CurrentUser {
            uid: uid.as_raw(),
            source,
        }),
    }
}
