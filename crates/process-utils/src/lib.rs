//! Child-process helpers: console-less spawning and cooperative shutdown.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// A `tokio::process::Command` that never opens a console window.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// How a child process ended after [`stop_gracefully`] was asked to stop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The child exited on its own within the grace period.
    Exited(std::process::ExitStatus),
    /// The grace period elapsed and the child was killed.
    Killed,
}

/// Ask a child to quit by writing `quit_input` to its stdin, then wait up to
/// `grace` before killing it.
///
/// Tools such as ffmpeg finalize their output when they read `q` on stdin, so
/// this gives them a chance to leave a playable file behind. The child's stdin
/// must have been configured as piped; when it was not, only the grace wait
/// and the kill apply.
pub async fn stop_gracefully(
    child: &mut tokio::process::Child,
    quit_input: &[u8],
    grace: std::time::Duration,
) -> std::io::Result<StopOutcome> {
    use tokio::io::AsyncWriteExt;

    if let Some(mut stdin) = child.stdin.take() {
        // The child may already have closed its end of the pipe.
        if let Err(e) = stdin.write_all(quit_input).await {
            tracing::debug!(error = %e, "Failed to write quit request to child stdin");
        }
        let _ = stdin.flush().await;
        drop(stdin);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => Ok(StopOutcome::Exited(status?)),
        Err(_) => {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "Child did not exit within grace period, killing it"
            );
            child.kill().await?;
            Ok(StopOutcome::Killed)
        }
    }
}
