use args::{parse_args, Args};
use gumdrop::Options;
use log::{debug, error, info, warn};
use logger::init_logger;
use reposmon::{
    actions::command::{CommandRunner, OutputMode},
    config::{ConfigError, Configuration, RawConfiguration},
    instance::{lock_path, program_identity, Acquisition, InstanceError, InstanceGuard, OsProcessTable},
    repository::{GitClient, Synchronizer},
    signal::SignalListener,
    start::{start, StartError, StopReason},
};
use std::{process::ExitCode, sync::mpsc, thread};
use thiserror::Error;

mod args;
mod logger;

/// Another instance is monitoring the same repository with the same command.
const EXIT_ALREADY_RUNNING: u8 = 3;
/// The arguments or the configuration file are invalid.
const EXIT_MISCONFIGURED: u8 = 2;

/// A custom error for the failures of the whole program.
#[derive(Debug, Error)]
pub enum MainError {
    #[error("Cannot determine the local timezone offset.")]
    FailedLoggerTimezones,
    #[error("Cannot set up the logger: {0}.")]
    FailedLogger(#[from] log::SetLoggerError),
    #[error("{0}")]
    Instance(#[from] InstanceError),
    #[error("{0}")]
    Start(#[from] StartError),
}

fn print_usage(args: &Args) {
    eprintln!(
        "Usage: {} [OPTIONS] <repository-url> <command>\n\n{}",
        env!("CARGO_PKG_NAME"),
        args.self_usage()
    );
}

/// Merge the arguments over the loaded file, validate it and save it if asked.
fn resolve_configuration(args: &Args) -> Result<Configuration, ConfigError> {
    let loaded = match &args.load {
        Some(path) => RawConfiguration::load(path)?,
        None => RawConfiguration::default(),
    };
    let configuration = args.to_raw().or(loaded).validate()?;

    if let Some(path) = &args.write {
        RawConfiguration::from(&configuration).save(path)?;
    }

    Ok(configuration)
}

fn run(configuration: &Configuration) -> Result<ExitCode, MainError> {
    let identity = program_identity();
    let path = lock_path(
        &identity,
        &configuration.command,
        &configuration.repository_url,
    );
    let guard = InstanceGuard::new(path, identity, OsProcessTable);
    let lock = match guard.try_acquire()? {
        Acquisition::Acquired(lock) => lock,
        Acquisition::AlreadyRunning(pid) => {
            warn!(
                "An instance runs already (pid {pid}, lock {}), exiting.",
                guard.path().display()
            );
            return Ok(ExitCode::from(EXIT_ALREADY_RUNNING));
        }
    };

    // Setup the signal listener, which stops the loop.
    let (tx, rx) = mpsc::channel::<()>();
    let listener = SignalListener::new(Some(lock.releaser()));
    thread::spawn(move || listener.listen(tx));

    // Setup the synchronization and the command.
    let mut state = configuration.repository_state();
    let mut synchronizer = Synchronizer::new(GitClient);
    let action = CommandRunner::new(
        configuration.cmd_folder.clone(),
        configuration.command.clone(),
        if configuration.verbose {
            OutputMode::Streaming
        } else {
            OutputMode::Buffered
        },
    );

    let result = start(
        &configuration.schedule(),
        &mut state,
        &mut synchronizer,
        &action,
        &rx,
    );
    drop(lock);

    match result? {
        StopReason::Interrupted => info!("Bye."),
        StopReason::Finished => debug!("Checked once, exiting."),
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let args = parse_args();

    if args.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let configuration = match resolve_configuration(&args) {
        Ok(configuration) => configuration,
        Err(ConfigError::MissingArguments) => {
            print_usage(&args);
            return ExitCode::from(EXIT_MISCONFIGURED);
        }
        Err(err) => {
            eprintln!("Error: {err}.\n");
            print_usage(&args);
            return ExitCode::from(EXIT_MISCONFIGURED);
        }
    };

    let verbose = args.verbose.max(u8::from(configuration.verbose));
    if let Err(err) = init_logger(args.quiet, verbose) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match run(&configuration) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
