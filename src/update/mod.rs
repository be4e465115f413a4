//! Update check and notification (spec §4.6, §4.7).
//!
//! Both subsystems are best-effort: any failure here is logged (under
//! `DEBUG=1`) and swallowed. A broken update check must never stop the
//! stub from handing off to the cached binary.

mod checker;
mod notifier;

pub use checker::{check_for_update, UpdateCheckResult};
pub use notifier::notify_and_prompt;

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use stub_format::cache::{self, DlxSidecar, UpdateCheckState};
use stub_format::format::UpdateConfig;

/// Env vars that unconditionally disable the update check, independent of
/// `config.enabled`.
const DISABLE_ENV_VARS: &[&str] = &["CI", "SOCKET_NO_UPDATE_CHECK", "SOCKET_STUB_NO_UPDATE"];

fn checks_disabled_by_env() -> bool {
    DISABLE_ENV_VARS.iter().any(|name| {
        std::env::var(name)
            .map(|v| !v.is_empty() && v != "0" && v.to_ascii_lowercase() != "false")
            .unwrap_or(false)
    })
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Run the update check (if enabled) and, if a newer release is found,
/// notify the user and optionally invoke the configured update command.
/// Never returns an error to the caller: every failure is swallowed after
/// an optional debug trace. Always records `last_check` in the sidecar
/// (and, on a hit, `last_notification`/`latest_known`) so a subsequent run
/// doesn't forget a release it already found (spec §3, §8).
pub fn maybe_check_updates(
    config: &UpdateConfig,
    current_version: &str,
    cache_root: &Path,
    cache_key: &str,
) {
    if !config.enabled {
        crate::trace!("update check disabled by config");
        return;
    }
    if checks_disabled_by_env() {
        crate::trace!("update check disabled by environment");
        return;
    }

    let mut sidecar = cache::read_sidecar(cache_root, cache_key).unwrap_or(DlxSidecar {
        integrity: String::new(),
        original_exe: std::path::PathBuf::new(),
        update_check: UpdateCheckState::default(),
    });
    sidecar.update_check.last_check = now_unix();

    match check_for_update(config, current_version) {
        Ok(Some(result)) => {
            crate::trace!(
                "update available: {} -> {}",
                result.current_version,
                result.latest_version
            );
            sidecar.update_check.latest_known = result.latest_version.clone();
            sidecar.update_check.last_notification = now_unix();
            persist_sidecar(cache_root, cache_key, &sidecar);
            notify_and_prompt(config, &result);
        }
        Ok(None) => {
            crate::trace!("no update available");
            persist_sidecar(cache_root, cache_key, &sidecar);
        }
        Err(e) => {
            crate::trace!("update check failed: {e}");
            persist_sidecar(cache_root, cache_key, &sidecar);
        }
    }
}

fn persist_sidecar(cache_root: &Path, cache_key: &str, sidecar: &DlxSidecar) {
    if let Err(e) = cache::write_sidecar(cache_root, cache_key, sidecar) {
        crate::trace!("failed to persist update-check sidecar: {e}");
    }
}
