//! Maps driver-level OS errors onto the shared error taxonomy (`spec.md`
//! §7): `NotFound`/`PermissionDenied` are permanent, everything else
//! retryable-looking is surfaced as transient.

use std::io;

use oarch_types::OaError;

pub fn from_io(context: &str, err: io::Error) -> OaError {
    use io::ErrorKind::*;
    match err.kind() {
        NotFound | PermissionDenied | InvalidInput | AlreadyExists => {
            OaError::Permanent(anyhow::anyhow!("{context}: {err}"))
        }
        _ => OaError::Transient(anyhow::anyhow!("{context}: {err}")),
    }
}

pub fn from_errno(context: &str, errno: nix::errno::Errno) -> OaError {
    use nix::errno::Errno;
    match errno {
        Errno::ENOENT | Errno::EACCES | Errno::EINVAL | Errno::ENODATA | Errno::ENOTSUP => {
            OaError::Permanent(anyhow::anyhow!("{context}: {errno}"))
        }
        _ => OaError::Transient(anyhow::anyhow!("{context}: {errno}")),
    }
}
