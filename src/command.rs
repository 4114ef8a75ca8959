//! Shell command helpers for `reload_cmd` and `onclick`.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Runs `command` through `sh -c` and returns its stdout.
pub fn spawn_sync(command: &str) -> Result<String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to spawn shell for command: {command}"))?;

    if !output.status.success() {
        debug!(
            command,
            exit_code = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "command exited unsuccessfully"
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Starts `command` through `sh -c` without waiting for it.
pub fn spawn_async(command: &str) {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match child {
        Ok(mut child) => {
            // reap in the background so the child never lingers as a zombie
            std::thread::spawn(move || {
                let _ = child.wait();
            });
        }
        Err(err) => warn!(command, error = %err, "failed to spawn command"),
    }
}

/// Turns the output of a reload command into an image path.
///
/// Drops one trailing newline and a `file://` scheme. Returns `None` when
/// nothing is left.
pub fn path_from_command_output(output: &str) -> Option<String> {
    let line = output.strip_suffix('\n').unwrap_or(output);
    let line = line.strip_prefix("file://").unwrap_or(line);
    (!line.is_empty()).then(|| line.to_owned())
}

/// Expands a leading `~` and anchors relative paths at the working directory.
pub fn absolute_path(raw: &str) -> PathBuf {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(raw),
        },
        _ => PathBuf::from(raw),
    };

    if expanded.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    } else {
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_output_trims_newline_and_scheme() {
        assert_eq!(
            path_from_command_output("file:///tmp/a.png\n").as_deref(),
            Some("/tmp/a.png")
        );
        assert_eq!(path_from_command_output("/tmp/b.gif").as_deref(), Some("/tmp/b.gif"));
        assert_eq!(path_from_command_output("\n"), None);
        assert_eq!(path_from_command_output(""), None);
    }

    #[test]
    fn only_one_trailing_newline_is_dropped() {
        assert_eq!(path_from_command_output("/tmp/c\n\n").as_deref(), Some("/tmp/c\n"));
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(absolute_path("~/pic.png"), home.join("pic.png"));
        }
        assert_eq!(absolute_path("/abs/pic.png"), PathBuf::from("/abs/pic.png"));
    }

    #[cfg(unix)]
    #[test]
    fn spawn_sync_captures_stdout() {
        let out = spawn_sync("printf '/tmp/x.png\\n'").unwrap();
        assert_eq!(out, "/tmp/x.png\n");
    }
}
