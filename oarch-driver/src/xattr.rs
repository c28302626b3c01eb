//! Thin wrappers over the libc xattr syscalls, grounded on
//! `pbs-tools/src/xattr.rs`'s buffer-doubling-on-ERANGE pattern.

use std::ffi::CString;
use std::os::unix::io::RawFd;

use nix::errno::Errno;

fn cname(name: &str) -> anyhow::Result<CString> {
    Ok(CString::new(name)?)
}

pub fn fgetxattr(fd: RawFd, name: &str) -> Result<Vec<u8>, Errno> {
    let cname = CString::new(name).map_err(|_| Errno::EINVAL)?;
    let mut size = 256usize;
    let mut buffer = vec![0u8; size];
    loop {
        let bytes = unsafe {
            libc::fgetxattr(
                fd,
                cname.as_ptr(),
                buffer.as_mut_ptr() as *mut core::ffi::c_void,
                buffer.len(),
            )
        };
        if bytes >= 0 {
            buffer.truncate(bytes as usize);
            return Ok(buffer);
        }
        let err = Errno::last();
        if err != Errno::ERANGE {
            return Err(err);
        }
        size = size.saturating_mul(2);
        buffer.resize(size, 0);
    }
}

pub fn fsetxattr(fd: RawFd, name: &str, data: &[u8]) -> Result<(), Errno> {
    let cname = CString::new(name).map_err(|_| Errno::EINVAL)?;
    let result = unsafe {
        libc::fsetxattr(
            fd,
            cname.as_ptr(),
            data.as_ptr() as *const core::ffi::c_void,
            data.len(),
            0,
        )
    };
    if result < 0 {
        return Err(Errno::last());
    }
    Ok(())
}

pub fn fremovexattr(fd: RawFd, name: &str) -> Result<(), Errno> {
    let cname = CString::new(name).map_err(|_| Errno::EINVAL)?;
    let result = unsafe { libc::fremovexattr(fd, cname.as_ptr()) };
    if result < 0 {
        return Err(Errno::last());
    }
    Ok(())
}

pub fn setxattr_path(path: &std::path::Path, name: &str, data: &[u8]) -> anyhow::Result<()> {
    let cpath = CString::new(path.as_os_str().to_string_lossy().as_bytes())?;
    let cname = cname(name)?;
    let result = unsafe {
        libc::setxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            data.as_ptr() as *const core::ffi::c_void,
            data.len(),
            0,
        )
    };
    if result < 0 {
        anyhow::bail!("setxattr({:?}, {name}) failed: {}", path, Errno::last());
    }
    Ok(())
}

pub fn removexattr_path(path: &std::path::Path, name: &str) -> anyhow::Result<()> {
    let cpath = CString::new(path.as_os_str().to_string_lossy().as_bytes())?;
    let cname = cname(name)?;
    let result = unsafe { libc::removexattr(cpath.as_ptr(), cname.as_ptr()) };
    if result < 0 {
        anyhow::bail!("removexattr({:?}, {name}) failed: {}", path, Errno::last());
    }
    Ok(())
}
