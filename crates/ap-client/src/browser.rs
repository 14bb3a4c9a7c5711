//! Best-effort launch of the user's web browser

use std::process::{Command, Stdio};

use tracing::{debug, warn};

#[cfg(target_os = "macos")]
fn platform_opener() -> (&'static str, &'static [&'static str]) {
    ("open", &[])
}

#[cfg(windows)]
fn platform_opener() -> (&'static str, &'static [&'static str]) {
    ("cmd", &["/C", "start", ""])
}

#[cfg(not(any(target_os = "macos", windows)))]
fn platform_opener() -> (&'static str, &'static [&'static str]) {
    ("xdg-open", &[])
}

/// Opens URLs in a browser without waiting for it
#[derive(Debug, Clone, Default)]
pub struct BrowserLauncher {
    /// Program to run instead of the platform opener
    command: Option<String>,
}

impl BrowserLauncher {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    /// Build the command that opens `url`
    fn command_for(&self, url: &str) -> Command {
        if let Some(program) = &self.command {
            let mut cmd = Command::new(program);
            cmd.arg(url);
            return cmd;
        }

        let (program, args) = platform_opener();
        let mut cmd = Command::new(program);
        cmd.args(args).arg(url);
        cmd
    }

    /// Try to open `url`; returns whether the opener could be started
    ///
    /// The child is detached from our stdio so it cannot write into the
    /// tunnel stream, and it is never waited on.
    pub fn open(&self, url: &str) -> bool {
        let mut cmd = self.command_for(url);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match cmd.spawn() {
            Ok(child) => {
                debug!(pid = child.id(), "Launched browser");
                true
            }
            Err(e) => {
                warn!("Could not launch a browser: {}", e);
                false
            }
        }
    }
}
