//! Running pre/post hook commands.

use crate::error::{Error, HookKind, Result};
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

/// Runs `command` through the shell in `cwd` and waits for it.
///
/// `output` is only used to name the job in errors. Output is fully captured
/// before the exit status is checked; stdout goes to the debug log, stderr
/// into the error.
pub fn run_hook(kind: HookKind, command: &str, cwd: &Path, output: &Path) -> Result<()> {
    debug!(hook = %kind, command, cwd = %cwd.display(), "running hook");

    let result = shell(command).current_dir(cwd).output().map_err(|e| Error::Hook {
        kind,
        output: output.to_path_buf(),
        message: format!("failed to start '{}': {}", command, e),
    })?;

    let stdout = String::from_utf8_lossy(&result.stdout);
    if !stdout.trim().is_empty() {
        debug!(hook = %kind, "{}", stdout.trim_end());
    }

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        warn!(
            hook = %kind,
            command,
            exit_code = ?result.status.code(),
            "hook exited with non-zero status"
        );
        return Err(Error::Hook {
            kind,
            output: output.to_path_buf(),
            message: match result.status.code() {
                Some(code) => format!("exit code {}: {}", code, stderr.trim_end()),
                None => format!("terminated by signal: {}", stderr.trim_end()),
            },
        });
    }
    Ok(())
}
