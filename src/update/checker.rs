//! HTTP release-index polling, tag matching, and version comparison
//! (spec §4.6).

use serde::Deserialize;
use std::time::Duration;
use stub_format::format::UpdateConfig;

const USER_AGENT: &str = "socket-stub-updater/1.0";
const MAX_RESPONSE_BYTES: u64 = 256 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF_MS: u64 = 5000;

/// Result of a successful update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheckResult {
    pub current_version: String,
    pub latest_version: String,
    pub latest_tag: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    published_at: String,
    #[serde(default)]
    assets: Vec<serde_json::Value>,
}

/// Check `config.url` for a release matching `config.tag_pattern` newer
/// than `current_version`. Returns `Ok(None)` if no such release exists,
/// and `Err` only for errors the caller may want to log — never treat an
/// `Err` here as fatal to the stub.
pub fn check_for_update(
    config: &UpdateConfig,
    current_version: &str,
) -> Result<Option<UpdateCheckResult>, String> {
    let releases = fetch_releases(&config.url)?;

    let matched = releases
        .into_iter()
        .filter(|r| !r.assets.is_empty())
        .filter(|r| glob_match(&config.tag_pattern, &r.tag_name))
        .max_by(|a, b| a.published_at.cmp(&b.published_at));

    let Some(release) = matched else {
        return Ok(None);
    };

    let latest_version = extract_version(&config.tag_pattern, &release.tag_name);

    if compare_versions(&latest_version, current_version) > 0 {
        Ok(Some(UpdateCheckResult {
            current_version: current_version.to_string(),
            latest_version,
            latest_tag: release.tag_name,
        }))
    } else {
        Ok(None)
    }
}

fn fetch_releases(url: &str) -> Result<Vec<Release>, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| format!("building http client: {e}"))?;

    let request_url = format!("{url}?per_page=30");

    let mut attempt = 0;
    let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
    loop {
        match try_fetch_once(&client, &request_url) {
            Ok(releases) => return Ok(releases),
            Err(e) => {
                crate::trace!("update fetch attempt {attempt} failed: {e}");
                if attempt >= MAX_RETRIES {
                    return Err(e);
                }
                std::thread::sleep(backoff);
                backoff *= 2;
                attempt += 1;
            }
        }
    }
}

fn try_fetch_once(client: &reqwest::blocking::Client, url: &str) -> Result<Vec<Release>, String> {
    let mut builder = client
        .get(url)
        .header("Accept", "application/vnd.github+json")
        .header("X-GitHub-Api-Version", "2022-11-28")
        .header("User-Agent", USER_AGENT);

    if let Some(token) = github_token() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }

    let mut response = builder.send().map_err(|e| e.to_string())?;
    let status = response.status();

    let content_length = response.content_length().unwrap_or(0);
    if content_length > MAX_RESPONSE_BYTES {
        return Err(format!(
            "response too large ({content_length} bytes, max {MAX_RESPONSE_BYTES})"
        ));
    }

    // Bound the read itself rather than buffering an unbounded body first:
    // take one byte past the cap so an oversized response is detected
    // without ever holding more than `MAX_RESPONSE_BYTES + 1` bytes.
    let mut limited = std::io::Read::take(&mut response, MAX_RESPONSE_BYTES + 1);
    let mut body = String::new();
    std::io::Read::read_to_string(&mut limited, &mut body).map_err(|e| e.to_string())?;
    if body.len() as u64 > MAX_RESPONSE_BYTES {
        return Err(format!(
            "response body exceeded size cap of {MAX_RESPONSE_BYTES} bytes"
        ));
    }

    if !status.is_success() || body.is_empty() {
        return Err(format!("non-200 or empty response: {status}"));
    }

    serde_json::from_str(&body).map_err(|e| format!("parsing release index: {e}"))
}

fn github_token() -> Option<String> {
    std::env::var("GH_TOKEN")
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var("GITHUB_TOKEN").ok().filter(|v| !v.is_empty()))
}

/// Anchored glob matching supporting `*` (any run, possibly empty) and `?`
/// (exactly one character). An empty pattern matches every tag.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_from(&p, &t)
}

fn glob_match_from(p: &[char], t: &[char]) -> bool {
    // Classic two-pointer glob matcher with backtracking on `*`.
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star_idx, mut star_match) = (None, 0usize);

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star_idx = Some(pi);
            star_match = ti;
            pi += 1;
        } else if let Some(si) = star_idx {
            pi = si + 1;
            star_match += 1;
            ti = star_match;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }

    pi == p.len()
}

/// If `pattern` contains `*`, strip the literal prefix before the first
/// `*` from `tag` to yield the version. If `pattern` is empty, the whole
/// tag is the version.
fn extract_version(pattern: &str, tag: &str) -> String {
    match pattern.find('*') {
        Some(star_pos) => {
            let prefix = &pattern[..star_pos];
            tag.strip_prefix(prefix).unwrap_or(tag).to_string()
        }
        None => tag.to_string(),
    }
}

/// Compare two version-ish strings. Strips a leading `v`/`V`, then tries
/// `major.minor.patch.build` (missing components default to 0); falls
/// back to `year-month-day` if fewer than two dotted components parse.
/// Returns `>0` if `a` is newer, `<0` if older, `0` if equal.
pub fn compare_versions(a: &str, b: &str) -> i32 {
    let ta = parse_version(a);
    let tb = parse_version(b);
    ta.cmp(&tb) as i32
}

/// Read the leading run of ASCII digits from `s` and parse it, the way
/// C's `scanf("%d", ...)` stops at the first non-digit instead of
/// requiring the whole field to be numeric. Returns `None` if `s` doesn't
/// start with a digit at all (e.g. an empty component).
fn leading_number(s: &str) -> Option<u64> {
    let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn parse_version(v: &str) -> (u64, u64, u64, u64) {
    let trimmed = v.trim_start_matches(['v', 'V']);

    let dotted: Vec<&str> = trimmed.split('.').collect();
    let dotted_parsed: Vec<Option<u64>> = dotted.iter().map(|p| leading_number(p)).collect();
    if dotted_parsed.iter().filter(|n| n.is_some()).count() >= 2 {
        let at = |i: usize| dotted_parsed.get(i).copied().flatten().unwrap_or(0);
        return (at(0), at(1), at(2), at(3));
    }

    let dashed: Vec<u64> = trimmed
        .split('-')
        .filter_map(leading_number)
        .collect();
    (
        *dashed.first().unwrap_or(&0),
        *dashed.get(1).unwrap_or(&0),
        *dashed.get(2).unwrap_or(&0),
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_anchored_star() {
        assert!(glob_match("node-smol-v*", "node-smol-v1.1.0"));
        assert!(!glob_match("node-smol-v*", "other-v1.1.0"));
    }

    #[test]
    fn glob_matches_question_mark() {
        assert!(glob_match("v1.?.0", "v1.5.0"));
        assert!(!glob_match("v1.?.0", "v1.50.0"));
    }

    #[test]
    fn empty_pattern_matches_everything() {
        assert!(glob_match("", "anything-at-all"));
    }

    #[test]
    fn extracts_version_from_star_pattern() {
        assert_eq!(extract_version("node-smol-v*", "node-smol-v1.1.0"), "1.1.0");
    }

    #[test]
    fn extracts_whole_tag_for_empty_pattern() {
        assert_eq!(extract_version("", "1.1.0"), "1.1.0");
    }

    #[test]
    fn compares_semver_tuples() {
        assert!(compare_versions("1.1.0", "1.0.0") > 0);
        assert!(compare_versions("1.0.0", "1.1.0") < 0);
        assert_eq!(compare_versions("v1.0.0", "1.0.0"), 0);
    }

    #[test]
    fn keeps_patch_component_with_prerelease_suffix() {
        // "3-rc1" isn't a pure integer, but its leading digit run is
        // still the patch version; it must not be dropped entirely.
        assert!(compare_versions("1.2.3-rc1", "1.2.2") > 0);
        assert_eq!(compare_versions("1.2.3-rc1", "1.2.3-rc1"), 0);
    }

    #[test]
    fn falls_back_to_date_form() {
        assert!(compare_versions("2025-02-01", "2025-01-01") > 0);
    }

    #[test]
    fn skips_empty_asset_releases_and_picks_latest_by_published_at() {
        let releases = vec![
            Release {
                tag_name: "node-smol-v2.0.0".into(),
                published_at: "2026-01-01T00:00:00Z".into(),
                assets: vec![],
            },
            Release {
                tag_name: "node-smol-v1.1.0".into(),
                published_at: "2025-02-01T00:00:00Z".into(),
                assets: vec![serde_json::json!({"name": "a"})],
            },
        ];
        let matched = releases
            .into_iter()
            .filter(|r| !r.assets.is_empty())
            .max_by(|a, b| a.published_at.cmp(&b.published_at))
            .unwrap();
        assert_eq!(matched.tag_name, "node-smol-v1.1.0");
    }
}
