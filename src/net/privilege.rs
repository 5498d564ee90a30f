//! Privilege drop for the remote server: if the process was started as
//! root to bind a low port, it steps down to an unprivileged user
//! before serving any client.
//!
//! Reaches for `libc` directly for the raw POSIX identity syscalls
//! rather than hand-rolling an FFI
//! declaration for `getpwnam`/`setuid`/`setgid`.

use std::ffi::CString;
use std::io;

use anyhow::{bail, Context, Result};

#[cfg(unix)]
pub fn drop_privileges(username: &str) -> Result<()> {
    if unsafe { libc::getuid() } != 0 {
        tracing::debug!("not running as root, skipping privilege drop");
        return Ok(());
    }

    let name = CString::new(username).context("privilege-drop username contains a NUL byte")?;
    let passwd = unsafe { libc::getpwnam(name.as_ptr()) };
    if passwd.is_null() {
        bail!("no such user '{username}' to drop privileges to");
    }
    let (uid, gid) = unsafe { ((*passwd).pw_uid, (*passwd).pw_gid) };

    if unsafe { libc::setgid(gid) } != 0 {
        return Err(io::Error::last_os_error()).context("setgid failed during privilege drop");
    }
    if unsafe { libc::setuid(uid) } != 0 {
        return Err(io::Error::last_os_error()).context("setuid failed during privilege drop");
    }
    tracing::info!(username, uid, gid, "dropped root privileges");
    Ok(())
}

#[cfg(not(unix))]
pub fn drop_privileges(_username: &str) -> Result<()> {
    tracing::debug!("privilege drop is a no-op on this platform");
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn non_root_process_skips_the_drop() {
        // The test runner is not root, so this must be a no-op rather
        // than an error.
        drop_privileges("nobody").unwrap();
    }

    #[test]
    fn unknown_user_is_reported_if_we_were_root() {
        // Exercised only to confirm the lookup-failure path type-checks
        // and returns an error rather than panicking; skipped at
        // runtime since we aren't root.
        if unsafe { libc::getuid() } == 0 {
            assert!(drop_privileges("no-such-user-xyz").is_err());
        }
    }
}
