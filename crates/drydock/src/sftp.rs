//! Locates the OpenSSH SFTP subsystem binary.

use std::path::{Path, PathBuf};

use crate::errors::HarnessError;

/// Locations checked by [`discover`], in order.
pub const SFTP_SERVER_CANDIDATES: [&str; 4] = [
    "/usr/lib/openssh/sftp-server",
    "/usr/libexec/openssh/sftp-server",
    "/usr/lib/ssh/sftp-server",
    "/usr/libexec/sftp-server",
];

/// Finds `sftp-server` at one of the standard locations.
///
/// # Errors
///
/// Returns [`HarnessError::SftpServerNotFound`] listing every location.
pub fn discover() -> Result<PathBuf, HarnessError> {
    discover_in(SFTP_SERVER_CANDIDATES.iter().map(Path::new))
}

/// Checks `candidates` in order; when several exist the last one wins.
///
/// # Errors
///
/// Returns [`HarnessError::SftpServerNotFound`] when none exists.
pub fn discover_in<I, P>(candidates: I) -> Result<PathBuf, HarnessError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut searched = Vec::new();
    let mut found = None;
    for candidate in candidates {
        let path = candidate.as_ref().to_path_buf();
        if path.exists() {
            found = Some(path.clone());
        }
        searched.push(path);
    }
    found.ok_or(HarnessError::SftpServerNotFound { searched })
}
