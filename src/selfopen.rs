//! Self-open: obtain a readable handle to the currently-running
//! executable image (spec §4.1).
//!
//! Resolution order:
//! 1. `SOCKET_SMOL_STUB_PATH` env override.
//! 2. The platform-native way to find one's own image: Linux opens
//!    `/proc/self/exe` directly rather than resolving it first (the
//!    `readlink` target may not exist in the current mount namespace, so
//!    `std::env::current_exe`'s validate-then-canonicalize behavior is
//!    the wrong tool here); macOS calls `_NSGetExecutablePath`; Windows
//!    calls `GetModuleFileNameA`.
//! 3. Fatal, naming every attempted method.

use crate::error::{Error, Result};
use std::fs::File;
use std::path::PathBuf;

const ENV_OVERRIDE: &str = "SOCKET_SMOL_STUB_PATH";

/// A readable handle to this process's own executable image, plus a
/// best-effort path (which, on Linux, may be the literal
/// `/proc/self/exe` symlink rather than its resolved target).
pub struct SelfImage {
    /// Open read-only file handle over the image.
    pub file: File,
    /// Best-effort path to the image.
    pub path: PathBuf,
}

/// Resolve and open this process's own executable image.
pub fn open_self() -> Result<SelfImage> {
    let mut attempted = Vec::new();

    if let Ok(path) = std::env::var(ENV_OVERRIDE) {
        if !path.is_empty() {
            attempted.push(ENV_OVERRIDE.to_string());
            let path = PathBuf::from(path);
            if let Ok(file) = open_read_only(&path) {
                set_cloexec(&file);
                return Ok(SelfImage { file, path });
            }
        }
    }

    match platform_open() {
        Ok(image) => return Ok(image),
        Err(method) => attempted.push(method),
    }

    Err(Error::SelfOpenFailed {
        attempted: attempted.join(", "),
    })
}

fn open_read_only(path: &std::path::Path) -> std::io::Result<File> {
    File::open(path)
}

#[cfg(target_os = "linux")]
fn platform_open() -> std::result::Result<SelfImage, String> {
    const PROC_SELF_EXE: &str = "/proc/self/exe";
    match open_read_only(std::path::Path::new(PROC_SELF_EXE)) {
        Ok(file) => {
            set_cloexec(&file);
            Ok(SelfImage {
                file,
                path: PathBuf::from(PROC_SELF_EXE),
            })
        }
        Err(_) => Err(PROC_SELF_EXE.to_string()),
    }
}

#[cfg(target_os = "macos")]
fn platform_open() -> std::result::Result<SelfImage, String> {
    extern "C" {
        fn _NSGetExecutablePath(buf: *mut libc::c_char, bufsize: *mut u32) -> i32;
    }

    let mut size: u32 = 1024;
    let mut buf = vec![0u8; size as usize];
    let rc = unsafe { _NSGetExecutablePath(buf.as_mut_ptr() as *mut libc::c_char, &mut size) };
    if rc != 0 {
        // Buffer too small; `size` now holds the required size.
        buf.resize(size as usize, 0);
        let rc = unsafe { _NSGetExecutablePath(buf.as_mut_ptr() as *mut libc::c_char, &mut size) };
        if rc != 0 {
            return Err("_NSGetExecutablePath".to_string());
        }
    }

    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let path_str = String::from_utf8_lossy(&buf[..end]).into_owned();
    let path = PathBuf::from(path_str);
    match open_read_only(&path) {
        Ok(file) => {
            set_cloexec(&file);
            Ok(SelfImage { file, path })
        }
        Err(_) => Err("_NSGetExecutablePath".to_string()),
    }
}

#[cfg(windows)]
fn platform_open() -> std::result::Result<SelfImage, String> {
    use windows_sys::Win32::System::LibraryLoader::GetModuleFileNameA;

    let mut buf = vec![0u8; 1024];
    let len = unsafe { GetModuleFileNameA(0, buf.as_mut_ptr(), buf.len() as u32) };
    if len == 0 {
        return Err("GetModuleFileNameA".to_string());
    }
    let path_str = String::from_utf8_lossy(&buf[..len as usize]).into_owned();
    let path = PathBuf::from(path_str);
    match open_read_only(&path) {
        Ok(file) => Ok(SelfImage { file, path }),
        Err(_) => Err("GetModuleFileNameA".to_string()),
    }
}

#[cfg(unix)]
fn set_cloexec(file: &File) {
    use std::os::unix::io::AsRawFd;
    unsafe {
        let fd = file.as_raw_fd();
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
}

#[cfg(windows)]
fn set_cloexec(_file: &File) {
    // Windows handles are not inherited by default unless explicitly
    // marked inheritable; nothing to do here.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-exe");
        std::fs::write(&path, b"not really an executable").unwrap();

        std::env::set_var(ENV_OVERRIDE, &path);
        let result = open_self();
        std::env::remove_var(ENV_OVERRIDE);

        let image = result.unwrap();
        assert_eq!(image.path, path);
    }

    #[test]
    fn missing_override_path_falls_through_to_platform_open() {
        std::env::set_var(ENV_OVERRIDE, "/nonexistent/definitely/not/here");
        let result = open_self();
        std::env::remove_var(ENV_OVERRIDE);
        // Platform open should still succeed against the test binary itself.
        assert!(result.is_ok());
    }
}
