use super::{Action, ActionError, CommandResult};
use crate::context::Context;
use duct::{cmd, Expression};
use log::{debug, info, trace, warn};
use std::{
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
};

/// The file in the command folder, where the output of the last run is saved.
pub const RESULT_FILE: &str = "reposmon.out";

/// How the output of the command is collected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Log every line as it arrives, stderr is merged into stdout.
    Streaming,
    /// Wait for the command to finish and capture stdout and stderr separately.
    Buffered,
}

/// An action to run the configured command.
///
/// The command is split into words with shell rules (quotes group words),
/// but it is not run in a shell: there is no variable expansion, no pipes and
/// no redirection. After every run the output is written into [RESULT_FILE]
/// in the command folder, overwriting the previous one.
pub struct CommandRunner {
    directory: PathBuf,
    command: String,
    mode: OutputMode,
}

impl CommandRunner {
    /// Creates a new command to be started in the given directory.
    pub fn new(directory: PathBuf, command: String, mode: OutputMode) -> Self {
        CommandRunner {
            directory,
            command,
            mode,
        }
    }

    fn create_command(&self, context: &Context) -> Result<Expression, ActionError> {
        let contains_variables = self
            .command
            .find('$')
            .and_then(|pos| self.command[pos + 1..].chars().next())
            .map(|ch| ch.is_ascii_alphabetic() || ch == '{')
            == Some(true);
        let contains_suspicious = [" | ", " && ", " || ", " > ", " < ", "; "]
            .iter()
            .any(|operator| self.command.contains(operator));
        if contains_variables || contains_suspicious {
            warn!(
                "The command {:?} contains a variable or other shell-specific character, but it doesn't run in a shell: you might want to wrap it in sh -c.",
                self.command
            );
        }

        let split_args = shlex::split(&self.command).ok_or_else(|| {
            ActionError::Misconfigured(format!("cannot split {:?} into words", self.command))
        })?;
        let (program, args) = split_args
            .split_first()
            .ok_or_else(|| ActionError::Misconfigured(String::from("the command is empty")))?;

        let mut expression = cmd(program, args)
            .dir(&self.directory)
            .env("CI", "true")
            .unchecked();
        for (key, value) in context {
            expression = expression.env(format!("REPOSMON_{key}"), value);
        }

        trace!("Parsed {:?} to {expression:?}.", self.command);

        Ok(expression)
    }

    fn run_buffered(&self, expression: Expression) -> Result<CommandResult, ActionError> {
        let output = expression.stdout_capture().stderr_capture().run()?;

        Ok(CommandResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
        })
    }

    fn run_streaming(&self, expression: Expression) -> Result<CommandResult, ActionError> {
        let handle = expression.stderr_to_stdout().reader()?;
        let mut reader = BufReader::new(&handle);
        let mut stdout = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end();
            if !text.is_empty() {
                info!("{text}");
            }
            stdout.extend_from_slice(&line);
        }

        let exit_code = handle
            .try_wait()?
            .and_then(|output| output.status.code());

        Ok(CommandResult {
            stdout,
            stderr: Vec::new(),
            exit_code,
        })
    }

    fn write_result(&self, result: &CommandResult) -> Result<(), ActionError> {
        let path = self.directory.join(RESULT_FILE);
        fs::write(&path, result.combined())
            .map_err(|err| ActionError::FailedWritingResult(path.display().to_string(), err))
    }

    fn run_inner(&self, context: &Context) -> Result<CommandResult, ActionError> {
        let expression = self.create_command(context)?;
        let result = match self.mode {
            OutputMode::Streaming => self.run_streaming(expression)?,
            OutputMode::Buffered => self.run_buffered(expression)?,
        };
        self.write_result(&result)?;

        Ok(result)
    }
}

fn log_output(output: &[u8]) {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .for_each(|line| info!("{line}"));
}

impl Action for CommandRunner {
    /// Run the command in the command folder and save its output.
    /// A non-zero exit code is logged, but it is not an error.
    fn run(&self, context: &Context) -> Result<CommandResult, ActionError> {
        debug!(
            "Running command: {} in directory {}.",
            self.command,
            self.directory.display()
        );

        let result = self.run_inner(context)?;
        if result.success() {
            debug!("Command finished successfully.");
        } else {
            match result.exit_code {
                Some(code) => warn!("Command returned non-zero exit code {code}."),
                None => warn!("Command was terminated by a signal."),
            }
            if self.mode == OutputMode::Buffered {
                log_output(&result.stdout);
                log_output(&result.stderr);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures::{cleanup, get_random_id, test_directory};
    use log::Level;
    use std::{collections::HashMap, error::Error};

    fn runner(directory: &std::path::Path, command: &str, mode: OutputMode) -> CommandRunner {
        CommandRunner::new(directory.to_path_buf(), String::from(command), mode)
    }

    #[test]
    fn it_should_create_new_command() {
        let action = CommandRunner::new(
            PathBuf::from("."),
            String::from("echo test"),
            OutputMode::Buffered,
        );

        assert_eq!("echo test", action.command);
        assert_eq!(PathBuf::from("."), action.directory);
        assert_eq!(OutputMode::Buffered, action.mode);
    }

    #[test]
    fn it_should_run_the_command_and_save_the_result() -> Result<(), Box<dyn Error>> {
        let directory = test_directory(&get_random_id())?;

        let result = runner(&directory, "echo hello", OutputMode::Buffered).run(&HashMap::new())?;
        assert!(result.success());
        assert_eq!(b"hello\n".to_vec(), result.stdout);

        let saved = fs::read_to_string(directory.join(RESULT_FILE))?;
        assert!(saved.contains("hello"));

        cleanup(&directory)?;

        Ok(())
    }

    #[test]
    fn it_should_append_the_error_output() -> Result<(), Box<dyn Error>> {
        let directory = test_directory(&get_random_id())?;

        let action = runner(&directory, "sh -c 'echo out; echo err >&2'", OutputMode::Buffered);
        let result = action.run(&HashMap::new())?;
        assert_eq!(b"out\n".to_vec(), result.stdout);
        assert_eq!(b"err\n".to_vec(), result.stderr);

        let saved = fs::read_to_string(directory.join(RESULT_FILE))?;
        assert_eq!("out\nerr\n", saved);

        cleanup(&directory)?;

        Ok(())
    }

    #[test]
    fn it_should_overwrite_the_previous_result() -> Result<(), Box<dyn Error>> {
        let directory = test_directory(&get_random_id())?;

        runner(&directory, "echo first", OutputMode::Buffered).run(&HashMap::new())?;
        runner(&directory, "echo second", OutputMode::Buffered).run(&HashMap::new())?;

        let saved = fs::read_to_string(directory.join(RESULT_FILE))?;
        assert_eq!("second\n", saved);

        cleanup(&directory)?;

        Ok(())
    }

    #[test]
    fn it_should_not_fail_if_the_command_fails() -> Result<(), Box<dyn Error>> {
        let directory = test_directory(&get_random_id())?;

        let result = runner(&directory, "false", OutputMode::Buffered).run(&HashMap::new())?;
        assert!(!result.success());
        assert_eq!(Some(1), result.exit_code);
        assert!(directory.join(RESULT_FILE).exists());

        cleanup(&directory)?;

        Ok(())
    }

    #[test]
    fn it_should_fail_if_the_program_is_missing() -> Result<(), Box<dyn Error>> {
        let directory = test_directory(&get_random_id())?;

        let action = runner(&directory, "surely-not-an-existing-program", OutputMode::Buffered);
        let result = action.run(&HashMap::new());
        assert!(
            matches!(result, Err(ActionError::FailedToStart(_))),
            "{result:?} should be FailedToStart"
        );
        assert!(!directory.join(RESULT_FILE).exists());

        cleanup(&directory)?;

        Ok(())
    }

    #[test]
    fn it_should_fail_on_unbalanced_quotes() {
        let action = runner(std::path::Path::new("."), "echo 'test", OutputMode::Buffered);

        let result = action.run(&HashMap::new());
        assert!(
            matches!(result, Err(ActionError::Misconfigured(_))),
            "{result:?} should be Misconfigured"
        );
    }

    #[test]
    fn it_should_fail_on_an_empty_command() {
        let action = runner(std::path::Path::new("."), "   ", OutputMode::Buffered);

        let result = action.run(&HashMap::new());
        assert!(
            matches!(result, Err(ActionError::Misconfigured(_))),
            "{result:?} should be Misconfigured"
        );
    }

    #[test]
    fn it_should_warn_about_shell_variables() -> Result<(), ActionError> {
        testing_logger::setup();

        let directory = std::path::Path::new(".");
        runner(directory, "echo été $HOME", OutputMode::Buffered).create_command(&HashMap::new())?;
        runner(directory, "echo été $ abc", OutputMode::Buffered).create_command(&HashMap::new())?;
        runner(directory, "echo 5$", OutputMode::Buffered).create_command(&HashMap::new())?;

        testing_logger::validate(|captured_logs| {
            let warnings: Vec<&str> = captured_logs
                .iter()
                .filter(|log| log.level == Level::Warn)
                .map(|log| log.body.as_str())
                .collect();
            assert_eq!(1, warnings.len(), "{warnings:?} should only warn about $HOME");
            assert!(warnings[0].contains("$HOME"));
        });

        Ok(())
    }

    #[test]
    fn it_should_set_the_env_vars() -> Result<(), Box<dyn Error>> {
        let directory = test_directory(&get_random_id())?;

        let context: Context = HashMap::from([
            ("COMMIT_SHA".to_string(), "abc".to_string()),
            ("REPOSITORY_URL".to_string(), "git@host:repo.git".to_string()),
        ]);
        let result = runner(&directory, "printenv", OutputMode::Buffered).run(&context)?;
        let output = String::from_utf8(result.stdout)?;
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines.contains(&"CI=true"));
        assert!(lines.contains(&"REPOSMON_COMMIT_SHA=abc"));
        assert!(lines.contains(&"REPOSMON_REPOSITORY_URL=git@host:repo.git"));

        cleanup(&directory)?;

        Ok(())
    }

    #[test]
    fn it_should_stream_the_output_to_the_log() -> Result<(), Box<dyn Error>> {
        testing_logger::setup();
        let directory = test_directory(&get_random_id())?;

        let action = runner(
            &directory,
            "sh -c 'echo streamed-one; echo streamed-two >&2; exit 3'",
            OutputMode::Streaming,
        );
        let result = action.run(&HashMap::new())?;
        assert_eq!(Some(3), result.exit_code);
        assert_eq!(b"streamed-one\nstreamed-two\n".to_vec(), result.stdout);

        testing_logger::validate(|captured_logs| {
            let streamed: Vec<&str> = captured_logs
                .iter()
                .filter(|log| log.level == Level::Info && log.body.starts_with("streamed-"))
                .map(|log| log.body.as_str())
                .collect();
            assert_eq!(vec!["streamed-one", "streamed-two"], streamed);
        });

        let saved = fs::read_to_string(directory.join(RESULT_FILE))?;
        assert_eq!("streamed-one\nstreamed-two\n", saved);

        cleanup(&directory)?;

        Ok(())
    }
}
