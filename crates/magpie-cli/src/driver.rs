use magpie_core::{MagpieError, MagpieResult};
use magpie_session::ReauthDriver;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, warn};

/// CLI stand-in for the hidden reauth tab: runs the profile's configured
/// command (typically one that opens the host in a logged-in browser
/// alongside a capture) and tears the process down when the attempt ends.
pub struct ShellReauthDriver {
    command: Option<String>,
    child: Mutex<Option<Child>>,
}

impl ShellReauthDriver {
    pub fn new(command: Option<String>) -> Self {
        Self {
            command,
            child: Mutex::new(None),
        }
    }
}

impl ReauthDriver for ShellReauthDriver {
    fn open(&self) -> MagpieResult<()> {
        let Some(command) = self.command.as_deref() else {
            return Err(MagpieError::no_auth(
                "no reauth command configured; set `reauth_command` in the profile or capture headers manually",
            ));
        };

        debug!(command, "starting reauth command");
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| MagpieError::io(format!("failed to start reauth command: {err}")))?;

        let mut slot = self
            .child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(child);
        Ok(())
    }

    fn close(&self) {
        let child = {
            let mut slot = self
                .child
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.take()
        };

        if let Some(mut child) = child {
            if let Err(err) = child.kill() {
                warn!(error = %err, "failed to stop reauth command");
            }
            let _ = child.wait();
        }
    }
}
