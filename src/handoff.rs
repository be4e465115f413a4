//! Process hand-off: filter `--update-config...`/stub-only flags out of
//! argv, close the self handle, and replace (POSIX) or spawn-and-wait
//! (Windows) the cached binary (spec §4.8).

use crate::error::{Error, Result};
use std::path::Path;

/// Flag prefixes the stub consumes itself; the child must never see them.
const STUB_ONLY_PREFIXES: &[&str] = &["--update-config", "--stub-info", "--stub-version", "--stub-reextract"];

/// Remove any argument starting with one of [`STUB_ONLY_PREFIXES`],
/// preserving the relative order of everything else.
pub fn filter_stub_args(argv: &[String]) -> Vec<String> {
    argv.iter()
        .filter(|arg| {
            !STUB_ONLY_PREFIXES
                .iter()
                .any(|prefix| arg.starts_with(prefix))
        })
        .cloned()
        .collect()
}

/// Replace the current process with `binary_path`, forwarding `args` and
/// the current environment. On POSIX this never returns on success. On
/// Windows it spawns the child, waits for it, and returns its exit code.
#[cfg(unix)]
pub fn exec_or_spawn(binary_path: &Path, args: &[String]) -> Result<std::convert::Infallible> {
    use std::os::unix::process::CommandExt;

    // Drop anything we were still holding onto before handing off; there
    // is no manual free to race here (no raw allocations survive past
    // this point), just ordinary owned buffers going out of scope.
    let err = std::process::Command::new(binary_path)
        .arg0(binary_path.as_os_str())
        .args(args)
        .exec();

    Err(Error::ExecFailed {
        path: binary_path.to_path_buf(),
        detail: err.to_string(),
    })
}

/// Spawn `binary_path` with `args`, wait for it, and exit this process
/// with its exit code. Uses `std::process::Command`, which already
/// implements the CRT argument-quoting rules and inherits the parent's
/// stdio handles — reaching for raw `CreateProcessA` would only
/// reimplement what the standard library already gets right (see
/// DESIGN.md).
#[cfg(windows)]
pub fn exec_or_spawn(binary_path: &Path, args: &[String]) -> Result<std::convert::Infallible> {
    let status = std::process::Command::new(binary_path)
        .args(args)
        .status()
        .map_err(|e| Error::ExecFailed {
            path: binary_path.to_path_buf(),
            detail: e.to_string(),
        })?;

    std::process::exit(status.code().unwrap_or(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_update_config_flag() {
        let argv = vec![
            "--update-config".to_string(),
            "enable".to_string(),
            "--foo".to_string(),
            "bar".to_string(),
        ];
        let filtered = filter_stub_args(&argv);
        assert_eq!(filtered, vec!["enable".to_string(), "bar".to_string()]);
    }

    #[test]
    fn strips_update_config_with_suffix() {
        let argv = vec!["--update-config=apply".to_string(), "--keep".to_string()];
        let filtered = filter_stub_args(&argv);
        assert_eq!(filtered, vec!["--keep".to_string()]);
    }

    #[test]
    fn leaves_unrelated_args_untouched() {
        let argv = vec!["--foo".to_string(), "bar".to_string()];
        assert_eq!(filter_stub_args(&argv), argv);
    }
}
