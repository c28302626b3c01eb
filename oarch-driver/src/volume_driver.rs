//! `LocalVolumeDriver` — the source-FS driver leaf, standing in for the
//! distributed-volume product's native binding (`original_source`'s
//! `vfs_intfx.h`/`gfapi_iopx.h`). Operates against a real local directory so
//! the pipeline above it can be exercised end-to-end without a vendor
//! volume library.

use std::fs::OpenOptions;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use oarch_types::{File, Iopx, OaError, OaResult, OpKind, Request};

use crate::errconv::{from_errno, from_io};
use crate::xattr;

pub struct LocalVolumeDriver {
    root: PathBuf,
}

impl LocalVolumeDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, rel: &Path) -> PathBuf {
        if rel.is_absolute() {
            rel.to_path_buf()
        } else {
            self.root.join(rel)
        }
    }
}

fn raw_close_fn() -> Arc<oarch_types::RawCloseFn> {
    Arc::new(|fd: i64| {
        if fd >= 0 {
            unsafe {
                libc::close(fd as RawFd);
            }
        }
    })
}

impl Iopx for LocalVolumeDriver {
    fn call(&self, file: &mut File, req: &mut Request) -> OaResult<()> {
        match req.op {
            OpKind::Open => {
                let path = self.resolve(file.loc.path());
                let opened = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .custom_flags(0)
                    .open(&path)
                    .map_err(|e| from_io(&format!("open {path:?}"), e))?;
                let fd = opened.as_raw_fd() as i64;
                std::mem::forget(opened); // ownership now lives in `fd`/File
                file.set_fd(fd);
                file.set_raw_close(raw_close_fn());
                Ok(())
            }
            OpKind::Close => {
                let fd = file.fd();
                if fd >= 0 {
                    unsafe {
                        libc::close(fd as RawFd);
                    }
                    file.set_fd(-1);
                }
                Ok(())
            }
            OpKind::Pread => {
                let fd = file.fd();
                req.buf.resize(req.len, 0);
                let n = pread_raw(fd, &mut req.buf, req.offset).map_err(|e| from_io("pread", e))?;
                req.buf.truncate(n);
                req.result_int = n as i64;
                Ok(())
            }
            OpKind::PreadAsync => {
                // No real async driver API exists; service it synchronously
                // and fire the callback immediately, matching the "async
                // completion callback" model from Design Notes §9.
                let fd = file.fd();
                req.buf.resize(req.len, 0);
                let result = pread_raw(fd, &mut req.buf, req.offset).map_err(|e| from_io("pread_async", e));
                match result {
                    Ok(n) => {
                        req.buf.truncate(n);
                        req.result_int = n as i64;
                        req.complete();
                        Ok(())
                    }
                    Err(err) => {
                        req.fail(err);
                        req.complete();
                        Ok(())
                    }
                }
            }
            OpKind::Pwrite => {
                let fd = file.fd();
                let n = pwrite_raw(fd, &req.buf, req.offset).map_err(|e| from_io("pwrite", e))?;
                req.result_int = n as i64;
                Ok(())
            }
            OpKind::Fstat => {
                let fd = file.fd();
                let meta = fd_metadata(fd).map_err(|e| from_io("fstat", e))?;
                req.result_int = meta.len() as i64;
                Ok(())
            }
            OpKind::Stat => {
                let path = self.resolve(req.path.as_deref().unwrap_or_else(|| file.loc.path()));
                let meta = std::fs::metadata(&path).map_err(|e| from_io(&format!("stat {path:?}"), e))?;
                req.result_int = meta.len() as i64;
                Ok(())
            }
            OpKind::Ftruncate => {
                let fd = file.fd();
                let result = unsafe { libc::ftruncate(fd as RawFd, req.offset as libc::off_t) };
                if result < 0 {
                    return Err(from_errno("ftruncate", nix::errno::Errno::last()));
                }
                Ok(())
            }
            OpKind::Truncate => {
                let path = self.resolve(req.path.as_deref().unwrap_or_else(|| file.loc.path()));
                std::fs::File::options()
                    .write(true)
                    .open(&path)
                    .and_then(|f| f.set_len(req.offset))
                    .map_err(|e| from_io(&format!("truncate {path:?}"), e))
            }
            OpKind::Fsetxattr => {
                xattr::fsetxattr(file.fd() as RawFd, &req.xattr_name, &req.xattr_value)
                    .map_err(|e| from_errno("fsetxattr", e))
            }
            OpKind::Setxattr => {
                let path = self.resolve(req.path.as_deref().unwrap_or_else(|| file.loc.path()));
                xattr::setxattr_path(&path, &req.xattr_name, &req.xattr_value)
                    .map_err(|e| OaError::Permanent(e))
            }
            OpKind::Fgetxattr => {
                let value = xattr::fgetxattr(file.fd() as RawFd, &req.xattr_name)
                    .map_err(|e| from_errno("fgetxattr", e))?;
                req.result_int = value.len() as i64;
                req.buf = value;
                Ok(())
            }
            OpKind::Getxattr => {
                // No standalone path-based fd in this driver; resolve via a
                // throwaway open, matching how the vfs driver treats
                // path-addressed xattr ops as a convenience wrapper.
                let path = self.resolve(req.path.as_deref().unwrap_or_else(|| file.loc.path()));
                let opened = std::fs::File::open(&path).map_err(|e| from_io(&format!("open {path:?}"), e))?;
                let value = xattr::fgetxattr(opened.as_raw_fd(), &req.xattr_name)
                    .map_err(|e| from_errno("getxattr", e))?;
                req.result_int = value.len() as i64;
                req.buf = value;
                Ok(())
            }
            OpKind::Fremovexattr => {
                xattr::fremovexattr(file.fd() as RawFd, &req.xattr_name).map_err(|e| from_errno("fremovexattr", e))
            }
            OpKind::Removexattr => {
                let path = self.resolve(req.path.as_deref().unwrap_or_else(|| file.loc.path()));
                xattr::removexattr_path(&path, &req.xattr_name).map_err(OaError::Permanent)
            }
            OpKind::Lseek => {
                let fd = file.fd();
                let result = unsafe { libc::lseek(fd as RawFd, req.offset as libc::off_t, req.whence) };
                if result < 0 {
                    return Err(from_errno("lseek", nix::errno::Errno::last()));
                }
                req.result_int = result as i64;
                Ok(())
            }
            OpKind::Getuuid => {
                req.result_text = Some(file.loc.uuid_str().to_string());
                Ok(())
            }
            OpKind::Gethosts => {
                req.result_hosts = vec!["localhost".to_string()];
                Ok(())
            }
            OpKind::Mkdir => {
                let path = self.resolve(req.path.as_deref().unwrap_or_else(|| file.loc.path()));
                std::fs::create_dir_all(&path).map_err(|e| from_io(&format!("mkdir {path:?}"), e))
            }
            OpKind::Resolve => {
                req.result_text = Some(self.resolve(req.path.as_deref().unwrap_or_else(|| file.loc.path())).display().to_string());
                Ok(())
            }
            OpKind::Dup => {
                let fd = file.fd();
                let dup = unsafe { libc::dup(fd as RawFd) };
                if dup < 0 {
                    return Err(from_errno("dup", nix::errno::Errno::last()));
                }
                req.result_int = dup as i64;
                Ok(())
            }
            OpKind::Scan => {
                let path = self.resolve(req.path.as_deref().unwrap_or_else(|| file.loc.path()));
                let mut entries = Vec::new();
                collect_paths(&path, &mut entries).map_err(|e| from_io(&format!("scan {path:?}"), e))?;
                req.result_hosts = entries.into_iter().map(|p| p.display().to_string()).collect();
                Ok(())
            }
        }
    }
}

fn pread_raw(fd: i64, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    let file = unsafe { std::fs::File::from_raw_fd(fd as RawFd) };
    let result = file.read_at(buf, offset);
    std::mem::forget(file);
    result
}

fn pwrite_raw(fd: i64, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    let file = unsafe { std::fs::File::from_raw_fd(fd as RawFd) };
    let result = file.write_at(buf, offset);
    std::mem::forget(file);
    result
}

fn fd_metadata(fd: i64) -> std::io::Result<std::fs::Metadata> {
    let file = unsafe { std::fs::File::from_raw_fd(fd as RawFd) };
    let result = file.metadata();
    std::mem::forget(file);
    result
}

fn collect_paths(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if !dir.is_dir() {
        if dir.is_file() {
            out.push(dir.to_path_buf());
        }
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_paths(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oarch_types::Location;

    fn driver_file(root: &Path, rel: &str) -> (LocalVolumeDriver, File) {
        let driver = LocalVolumeDriver::new(root);
        let loc = Location::new("glusterfs", "store1", rel);
        (driver, File::new(loc))
    }

    #[test]
    fn open_pread_pwrite_close_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f1"), b"hello world").unwrap();
        let (driver, mut file) = driver_file(dir.path(), "f1");

        let mut open_req = Request::new(OpKind::Open, 1);
        driver.call(&mut file, &mut open_req).unwrap();
        assert!(file.fd() >= 0);

        let mut read_req = Request::new(OpKind::Pread, 2);
        read_req.offset = 0;
        read_req.len = 5;
        driver.call(&mut file, &mut read_req).unwrap();
        assert_eq!(&read_req.buf, b"hello");

        let mut close_req = Request::new(OpKind::Close, 3);
        driver.call(&mut file, &mut close_req).unwrap();
        assert_eq!(file.fd(), -1);
    }

    #[test]
    fn xattr_set_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f2"), b"data").unwrap();
        let (driver, mut file) = driver_file(dir.path(), "f2");
        let mut open_req = Request::new(OpKind::Open, 1);
        driver.call(&mut file, &mut open_req).unwrap();

        let mut set_req = Request::new(OpKind::Fsetxattr, 2);
        set_req.xattr_name = "user.oarch_test".to_string();
        set_req.xattr_value = b"v1".to_vec();
        // xattrs may be unsupported on the test filesystem (e.g. tmpfs
        // without user_xattr); treat that as an environment limitation.
        if driver.call(&mut file, &mut set_req).is_err() {
            return;
        }

        let mut get_req = Request::new(OpKind::Fgetxattr, 3);
        get_req.xattr_name = "user.oarch_test".to_string();
        driver.call(&mut file, &mut get_req).unwrap();
        assert_eq!(get_req.buf, b"v1");
    }
}
