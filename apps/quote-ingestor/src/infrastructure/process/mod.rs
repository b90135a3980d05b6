//! Process Restart
//!
//! Replaces the running process with a fresh copy of the same binary and
//! arguments. Nothing is persisted across the restart; the new process
//! reloads configuration and starts from an empty state.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use crate::application::ports::{RestartError, Restarter};

/// Re-executes the current binary in place.
#[derive(Debug, Clone)]
pub struct ExecRestarter {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ExecRestarter {
    /// Capture the current executable and its arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable path cannot be resolved.
    pub fn current() -> Result<Self, RestartError> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: std::env::args_os().skip(1).collect(),
        })
    }

    /// Restart target.
    #[must_use]
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl Restarter for ExecRestarter {
    #[cfg(unix)]
    fn restart(&self) -> Result<(), RestartError> {
        use std::os::unix::process::CommandExt;

        tracing::warn!(program = %self.program.display(), "Re-executing process");
        // Only returns on failure.
        Err(RestartError::Exec(self.command().exec()))
    }

    #[cfg(not(unix))]
    fn restart(&self) -> Result<(), RestartError> {
        tracing::warn!(program = %self.program.display(), "Spawning replacement process");
        self.command().spawn()?;
        std::process::exit(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_targets_current_binary() {
        let restarter = ExecRestarter::current().unwrap();
        let command = restarter.command();
        assert_eq!(command.get_program(), std::env::current_exe().unwrap().as_os_str());
        let args: Vec<OsString> = std::env::args_os().skip(1).collect();
        let expected: Vec<&std::ffi::OsStr> = args.iter().map(OsString::as_os_str).collect();
        assert_eq!(command.get_args().collect::<Vec<_>>(), expected);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_arguments_are_carried_over() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![b'-', b'-', 0xff, 0xfe]);
        let restarter = ExecRestarter {
            program: PathBuf::from("/bin/true"),
            args: vec![raw.clone()],
        };
        let command = restarter.command();
        assert_eq!(command.get_args().collect::<Vec<_>>(), vec![raw.as_os_str()]);
    }
}
