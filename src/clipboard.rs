use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Result, anyhow};

/// Clipboard access seam so the session can be driven with a fake in tests.
pub trait Clipboard: Send + Sync {
    fn write_text(&self, text: &str) -> Result<()>;
}

/// Clipboard backed by the platform's copy command.
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn write_text(&self, text: &str) -> Result<()> {
        copy_to_clipboard(text)
    }
}

pub fn copy_to_clipboard(text: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        run_with_stdin("pbcopy", &[], text)
    }
    #[cfg(target_os = "windows")]
    {
        run_with_stdin("cmd", &["/C", "clip"], text)
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let candidates: [(&str, &[&str]); 3] = [
            ("wl-copy", &[]),
            ("xclip", &["-selection", "clipboard"]),
            ("xsel", &["--clipboard", "--input"]),
        ];
        for (cmd, args) in candidates {
            if run_with_stdin(cmd, args, text).is_ok() {
                return Ok(());
            }
        }
        Err(anyhow!(
            "no clipboard command found (install wl-copy, xclip, or xsel)"
        ))
    }
}

fn run_with_stdin(cmd: &str, args: &[&str], input: &str) -> Result<()> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|_| anyhow!("clipboard command `{cmd}` not available"))?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(input.as_bytes());
    }

    match child.wait() {
        Ok(status) if status.success() => Ok(()),
        _ => Err(anyhow!("clipboard command `{cmd}` failed")),
    }
}
