//! Content-addressed cache manager.
//!
//! A `<cache_root>/<cache_key>/` directory holds the decompressed binary
//! plus a `dlx.json` sidecar. Two concurrent stub invocations for the
//! same key may both decompress and both `rename()` into place; the
//! rename is atomic so the winner's bytes are indistinguishable from the
//! loser's (the cache key is a deterministic function of the payload),
//! and the sidecar is last-writer-wins by design (spec §5).

use crate::error::{Error, Result};
use crate::format::PlatformTuple;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sidecar metadata written alongside the cached binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlxSidecar {
    /// Hex-encoded SHA-256 of the decompressed binary.
    pub integrity: String,
    /// Path to the original packed executable that produced this entry.
    pub original_exe: PathBuf,
    /// Update-check bookkeeping.
    #[serde(default)]
    pub update_check: UpdateCheckState,
}

/// Update-check bookkeeping persisted in the sidecar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCheckState {
    /// Unix timestamp of the last update check, or 0 if never checked.
    #[serde(default)]
    pub last_check: i64,
    /// Unix timestamp of the last time a notification was shown, or 0.
    #[serde(default)]
    pub last_notification: i64,
    /// The latest version string observed, or empty if unknown.
    #[serde(default)]
    pub latest_known: String,
}

/// Resolve the cache root directory, first non-empty of:
/// `SOCKET_DLX_DIR`, `<SOCKET_HOME>/_dlx`, `<HOME>/.socket/_dlx`.
pub fn resolve_cache_root() -> Result<PathBuf> {
    if let Some(dir) = non_empty_env("SOCKET_DLX_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Some(home) = non_empty_env("SOCKET_HOME") {
        return Ok(PathBuf::from(home).join("_dlx"));
    }
    let home = home_dir().ok_or_else(|| {
        Error::CacheIoFailed {
            path: PathBuf::new(),
            detail: "could not determine home directory (HOME/USERPROFILE unset)".into(),
        }
    })?;
    Ok(home.join(".socket").join("_dlx"))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(unix)]
fn home_dir() -> Option<PathBuf> {
    non_empty_env("HOME").map(PathBuf::from).or_else(dirs::home_dir)
}

#[cfg(windows)]
fn home_dir() -> Option<PathBuf> {
    if let Some(profile) = non_empty_env("USERPROFILE") {
        return Some(PathBuf::from(profile));
    }
    if let Some(drive) = non_empty_env("HOMEDRIVE") {
        let path = non_empty_env("HOMEPATH").unwrap_or_default();
        return Some(PathBuf::from(format!("{drive}{path}")));
    }
    dirs::home_dir()
}

/// Path to the cached binary for a given cache key and platform, whether
/// or not it currently exists.
pub fn cached_binary_path(cache_root: &Path, cache_key: &str, platform: &PlatformTuple) -> PathBuf {
    cache_root.join(cache_key).join(platform.binary_name())
}

/// Path to the sidecar JSON file for a given cache key.
pub fn sidecar_path(cache_root: &Path, cache_key: &str) -> PathBuf {
    cache_root.join(cache_key).join("dlx.json")
}

/// Return the cached binary's path if it exists and its size matches
/// `uncompressed_size` exactly. This is a cheap existence + size check by
/// design: the stub is on the cold path and a full integrity
/// recomputation on every hit would defeat the point of caching.
pub fn get_cached_binary_path(
    cache_root: &Path,
    cache_key: &str,
    platform: &PlatformTuple,
    uncompressed_size: u64,
) -> Option<PathBuf> {
    let path = cached_binary_path(cache_root, cache_key, platform);
    let metadata = fs::metadata(&path).ok()?;
    if metadata.is_file() && metadata.len() == uncompressed_size {
        Some(path)
    } else {
        None
    }
}

/// Write a decompressed binary to the cache: create the directory,
/// write to `<path>.tmp`, rename into place, chmod 0o755 (POSIX only),
/// and write the `dlx.json` sidecar.
pub fn write_to_cache(
    cache_root: &Path,
    cache_key: &str,
    platform: &PlatformTuple,
    decompressed: &[u8],
    original_exe: &Path,
) -> Result<PathBuf> {
    let entry_dir = cache_root.join(cache_key);
    fs::create_dir_all(&entry_dir).map_err(|e| Error::CacheIoFailed {
        path: entry_dir.clone(),
        detail: e.to_string(),
    })?;

    let final_path = cached_binary_path(cache_root, cache_key, platform);
    let tmp_path = final_path.with_extension("tmp");

    {
        let mut tmp_file = fs::File::create(&tmp_path).map_err(|e| Error::CacheIoFailed {
            path: tmp_path.clone(),
            detail: e.to_string(),
        })?;
        tmp_file
            .write_all(decompressed)
            .map_err(|e| Error::CacheIoFailed {
                path: tmp_path.clone(),
                detail: e.to_string(),
            })?;
        tmp_file.flush().map_err(|e| Error::CacheIoFailed {
            path: tmp_path.clone(),
            detail: e.to_string(),
        })?;
    }

    fs::rename(&tmp_path, &final_path).map_err(|e| Error::CacheIoFailed {
        path: final_path.clone(),
        detail: e.to_string(),
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&final_path)
            .map_err(|e| Error::CacheIoFailed {
                path: final_path.clone(),
                detail: e.to_string(),
            })?
            .permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&final_path, perms).map_err(|e| Error::CacheIoFailed {
            path: final_path.clone(),
            detail: e.to_string(),
        })?;
    }

    let integrity = compute_integrity(decompressed);
    let sidecar = DlxSidecar {
        integrity,
        original_exe: original_exe.to_path_buf(),
        update_check: UpdateCheckState::default(),
    };
    write_sidecar(cache_root, cache_key, &sidecar)?;

    Ok(final_path)
}

/// SHA-256 hex digest of a decompressed binary, used as the sidecar's
/// `integrity` field.
pub fn compute_integrity(decompressed: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(decompressed);
    format!("sha256:{:x}", hasher.finalize())
}

/// Read the sidecar JSON, if present and parseable.
pub fn read_sidecar(cache_root: &Path, cache_key: &str) -> Option<DlxSidecar> {
    let path = sidecar_path(cache_root, cache_key);
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Write (or overwrite) the sidecar JSON. Last-writer-wins by design; no
/// cross-process lock is taken (spec §5).
pub fn write_sidecar(cache_root: &Path, cache_key: &str, sidecar: &DlxSidecar) -> Result<()> {
    let path = sidecar_path(cache_root, cache_key);
    let json = serde_json::to_vec_pretty(sidecar).map_err(|e| Error::CacheIoFailed {
        path: path.clone(),
        detail: e.to_string(),
    })?;
    fs::write(&path, json).map_err(|e| Error::CacheIoFailed {
        path,
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{arch_byte, libc_byte, platform_byte};

    fn linux_platform() -> PlatformTuple {
        PlatformTuple {
            platform: platform_byte::LINUX,
            arch: arch_byte::X64,
            libc: libc_byte::GLIBC,
        }
    }

    #[test]
    fn write_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let platform = linux_platform();
        let data = b"hello world payload bytes".repeat(200);

        assert!(get_cached_binary_path(dir.path(), "deadbeefcafef00d", &platform, data.len() as u64)
            .is_none());

        let path = write_to_cache(
            dir.path(),
            "deadbeefcafef00d",
            &platform,
            &data,
            Path::new("/tmp/original-stub"),
        )
        .unwrap();
        assert_eq!(fs::read(&path).unwrap(), data);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        let hit = get_cached_binary_path(dir.path(), "deadbeefcafef00d", &platform, data.len() as u64);
        assert_eq!(hit, Some(path));

        let sidecar = read_sidecar(dir.path(), "deadbeefcafef00d").unwrap();
        assert!(sidecar.integrity.starts_with("sha256:"));
    }

    #[test]
    fn miss_on_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let platform = linux_platform();
        write_to_cache(dir.path(), "aaaaaaaaaaaaaaaa", &platform, b"short", Path::new("x"))
            .unwrap();
        assert!(get_cached_binary_path(dir.path(), "aaaaaaaaaaaaaaaa", &platform, 9999).is_none());
    }
}
