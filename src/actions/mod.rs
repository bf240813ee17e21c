use crate::context::Context;
use mockall::automock;
use thiserror::Error;

/// An action to run a command and save its output.
pub mod command;

/// A custom error for describing the error cases for actions
#[derive(Debug, Error)]
pub enum ActionError {
    /// Cannot start the action, because it has a misconfiguration.
    #[error("not configured correctly: {0}")]
    Misconfigured(String),
    /// The process cannot be spawned or read, the parameter contains the error.
    #[error("the command cannot run: {0}")]
    FailedToStart(#[from] std::io::Error),
    /// The output cannot be written into the result file.
    #[error("cannot write the result to {0}: {1}")]
    FailedWritingResult(String, std::io::Error),
}

/// The captured output and exit status of a finished command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// The exit code, `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The standard output followed by the standard error.
    pub fn combined(&self) -> Vec<u8> {
        [self.stdout.as_slice(), self.stderr.as_slice()].concat()
    }
}

/// An action is a process that runs if the repository changed.
///
/// A command that exits with a non-zero code is a successful run with a failed
/// [CommandResult], only failing to start or save it is an error.
#[automock]
pub trait Action {
    /// Initiate the action
    fn run(&self, context: &Context) -> Result<CommandResult, ActionError>;
}
