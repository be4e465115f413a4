//! Bordered-box stderr notification and interactive y/n prompt
//! (spec §4.7).

use super::checker::UpdateCheckResult;
use stub_format::format::UpdateConfig;

const BOX_WIDTH: usize = 45;

struct BoxChars {
    top_left: char,
    top_right: char,
    bottom_left: char,
    bottom_right: char,
    horizontal: char,
    vertical: char,
}

const UTF8_BOX: BoxChars = BoxChars {
    top_left: '┌',
    top_right: '┐',
    bottom_left: '└',
    bottom_right: '┘',
    horizontal: '─',
    vertical: '│',
};

const ASCII_BOX: BoxChars = BoxChars {
    top_left: '+',
    top_right: '+',
    bottom_left: '+',
    bottom_right: '+',
    horizontal: '-',
    vertical: '|',
};

fn terminal_supports_utf8() -> bool {
    for var in ["LC_ALL", "LANG"] {
        if let Ok(v) = std::env::var(var) {
            let lower = v.to_ascii_lowercase();
            if lower.contains("utf-8") || lower.contains("utf8") {
                return true;
            }
        }
    }
    false
}

fn render_line(chars: &BoxChars, content: &str) -> String {
    let inner_width = BOX_WIDTH.saturating_sub(2);
    let truncated: String = content.chars().take(inner_width).collect();
    let padding = inner_width.saturating_sub(truncated.chars().count());
    format!(
        "{}{}{}{}",
        chars.vertical,
        truncated,
        " ".repeat(padding),
        chars.vertical
    )
}

fn render_box(content_lines: &[String]) -> String {
    let chars = if terminal_supports_utf8() { &UTF8_BOX } else { &ASCII_BOX };
    let border: String = std::iter::repeat(chars.horizontal)
        .take(BOX_WIDTH.saturating_sub(2))
        .collect();

    let mut out = String::new();
    out.push(chars.top_left);
    out.push_str(&border);
    out.push(chars.top_right);
    out.push('\n');
    for line in content_lines {
        out.push_str(&render_line(chars, line));
        out.push('\n');
    }
    out.push(chars.bottom_left);
    out.push_str(&border);
    out.push(chars.bottom_right);
    out
}

fn stderr_is_tty() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::isatty(libc::STDERR_FILENO) != 0 }
    }
    #[cfg(windows)]
    {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::System::Console::GetConsoleMode;
        let handle = std::io::stderr().as_raw_handle();
        let mut mode: u32 = 0;
        unsafe { GetConsoleMode(handle as _, &mut mode) != 0 }
    }
}

/// Draw the update notification to stderr and, if `config.prompt` and
/// stderr is a TTY, ask the user whether to apply it. On acceptance, run
/// `config.command` via the cached binary and return its exit status;
/// otherwise does nothing further.
pub fn notify_and_prompt(config: &UpdateConfig, result: &UpdateCheckResult) {
    let mut lines = vec![format!(
        "Update available: {} -> {}",
        result.current_version, result.latest_version
    )];
    if !config.command.is_empty() {
        let binname_prefix = if config.binname.is_empty() {
            String::new()
        } else {
            format!("[{}] ", config.binname)
        };
        lines.push(format!("Run: {binname_prefix}{}", config.command));
    }

    eprintln!("{}", render_box(&lines));

    if !config.prompt {
        return;
    }

    let accepted = if stderr_is_tty() {
        read_prompt_choice(config.prompt_default_yes)
    } else {
        config.prompt_default_yes
    };
    if accepted {
        invoke_update_command(config);
    }
}

fn read_prompt_choice(default_yes: bool) -> bool {
    eprint!("Apply update now? [y/N] ");
    match read_raw_char() {
        Some('y') | Some('Y') => true,
        Some('n') | Some('N') => false,
        Some('\r') | Some('\n') | None => default_yes,
        _ => default_yes,
    }
}

#[cfg(unix)]
fn read_raw_char() -> Option<char> {
    use std::io::Read;

    let fd = libc::STDIN_FILENO;
    let mut original: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut original) } != 0 {
        return None;
    }
    let mut raw = original;
    unsafe { libc::cfmakeraw(&mut raw) };
    unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) };

    let mut byte = [0u8; 1];
    let result = std::io::stdin().read_exact(&mut byte);

    unsafe { libc::tcsetattr(fd, libc::TCSANOW, &original) };

    result.ok()?;
    Some(byte[0] as char)
}

#[cfg(windows)]
fn read_raw_char() -> Option<char> {
    // `_getch`-equivalent: read a single byte from the console input handle.
    use windows_sys::Win32::System::Console::{GetStdHandle, ReadConsoleA, STD_INPUT_HANDLE};
    let handle = unsafe { GetStdHandle(STD_INPUT_HANDLE) };
    let mut buf = [0u8; 1];
    let mut read: u32 = 0;
    let ok = unsafe {
        ReadConsoleA(handle, buf.as_mut_ptr() as *mut _, 1, &mut read, std::ptr::null())
    };
    if ok == 0 || read == 0 {
        None
    } else {
        Some(buf[0] as char)
    }
}

fn invoke_update_command(config: &UpdateConfig) {
    if config.command.is_empty() {
        return;
    }
    let mut parts = config.command.split_whitespace();
    let Some(program) = parts.next() else { return };
    let status = std::process::Command::new(program).args(parts).status();
    match status {
        Ok(status) => crate::trace!("update command exited with {status}"),
        Err(e) => crate::trace!("update command failed to spawn: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_render_respects_fixed_width() {
        let rendered = render_line(&ASCII_BOX, "short");
        assert_eq!(rendered.chars().count(), BOX_WIDTH);
    }

    #[test]
    fn box_render_truncates_overlong_content() {
        let long = "x".repeat(100);
        let rendered = render_line(&ASCII_BOX, &long);
        assert_eq!(rendered.chars().count(), BOX_WIDTH);
    }
}
