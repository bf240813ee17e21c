use crate::{
    actions::Action,
    context::Context,
    repository::{shorthash, RepositoryState, SyncError, SyncOutcome, Synchronize},
};
use duration_string::DurationString;
use log::{debug, error, info};
use std::{
    sync::mpsc::{Receiver, RecvTimeoutError},
    thread,
    time::Duration,
};
use thiserror::Error;

/// A custom error implementation for the start function
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Synchronization failed: {0}.")]
    FailedSync(#[from] SyncError),
}

/// When and how often the repository is synchronized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// The time to wait after every cycle.
    pub interval: Duration,
    /// Stop after the first full cycle.
    pub once: bool,
    /// Run the command after the first clone as well.
    pub run_on_clone: bool,
}

/// Why the poll loop stopped without an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The single cycle of the once mode is done.
    Finished,
    /// A shutdown was requested.
    Interrupted,
}

#[derive(Debug)]
enum LoopState {
    Synchronizing,
    Executing(Context),
    Sleeping,
    Stopped(StopReason),
}

struct PollLoop<'a> {
    schedule: &'a Schedule,
    state: &'a mut RepositoryState,
    synchronizer: &'a mut dyn Synchronize,
    action: &'a dyn Action,
    shutdown: &'a Receiver<()>,
}

impl<'a> PollLoop<'a> {
    fn context(&self) -> Context {
        Context::from([
            (
                String::from("REPOSITORY_URL"),
                self.state.remote_url.clone(),
            ),
            (
                String::from("CHECKOUT_DIRECTORY"),
                self.state.local_path.display().to_string(),
            ),
        ])
    }

    fn synchronize(&mut self) -> Result<LoopState, StartError> {
        debug!("Synchronizing {}.", self.state.local_path.display());

        let next = match self.synchronizer.synchronize(self.state)? {
            SyncOutcome::Cloned { branch, commit } => {
                if self.schedule.run_on_clone {
                    info!(
                        "Cloned {} on {branch} ({}), running the command.",
                        self.state.remote_url,
                        shorthash(&commit)
                    );
                    let mut context = self.context();
                    context.insert(String::from("BRANCH_NAME"), branch);
                    context.insert(String::from("COMMIT_SHA"), commit);
                    LoopState::Executing(context)
                } else {
                    info!(
                        "Cloned {} on {branch} ({}), waiting for changes.",
                        self.state.remote_url,
                        shorthash(&commit)
                    );
                    LoopState::Sleeping
                }
            }
            SyncOutcome::Changed { before, after } => {
                info!(
                    "There are updates from {} to {}, running the command.",
                    shorthash(&before),
                    shorthash(&after)
                );
                let mut context = self.context();
                context.insert(String::from("BEFORE_COMMIT_SHA"), before);
                context.insert(String::from("COMMIT_SHA"), after);
                LoopState::Executing(context)
            }
            SyncOutcome::Unchanged { commit } => {
                debug!("There are no updates, still on {}.", shorthash(&commit));
                LoopState::Sleeping
            }
        };

        Ok(next)
    }

    fn execute(&self, context: &Context) -> LoopState {
        // A failing command doesn't stop monitoring, the next change runs it again
        if let Err(err) = self.action.run(context) {
            error!("Command failed: {err}.");
        }

        LoopState::Sleeping
    }

    fn after_sleep(&self) -> LoopState {
        if self.schedule.once {
            LoopState::Stopped(StopReason::Finished)
        } else {
            LoopState::Synchronizing
        }
    }

    fn sleep(&self) -> LoopState {
        let interval = self.schedule.interval;
        debug!("Waiting {} until the next check.", DurationString::new(interval));

        match self.shutdown.recv_timeout(interval) {
            Ok(()) => LoopState::Stopped(StopReason::Interrupted),
            Err(RecvTimeoutError::Timeout) => self.after_sleep(),
            Err(RecvTimeoutError::Disconnected) => {
                // Nobody can interrupt anymore, wait out the interval
                thread::sleep(interval);
                self.after_sleep()
            }
        }
    }

    fn step(&mut self, current: LoopState) -> Result<LoopState, StartError> {
        match current {
            LoopState::Synchronizing => self.synchronize(),
            LoopState::Executing(context) => Ok(self.execute(&context)),
            LoopState::Sleeping => Ok(self.sleep()),
            LoopState::Stopped(reason) => Ok(LoopState::Stopped(reason)),
        }
    }
}

/// The main program loop, that synchronizes the repository and runs the action
/// until it is stopped.
///
/// It starts by synchronizing immediately, sleeps after every cycle and stops
/// after the first cycle in once mode or when a message arrives on `shutdown`.
/// A failed synchronization is fatal, a failed action is only logged.
pub fn start(
    schedule: &Schedule,
    state: &mut RepositoryState,
    synchronizer: &mut dyn Synchronize,
    action: &dyn Action,
    shutdown: &Receiver<()>,
) -> Result<StopReason, StartError> {
    info!(
        "Monitoring {} every {}{}.",
        state.remote_url,
        DurationString::new(schedule.interval),
        if schedule.once { " (once)" } else { "" }
    );

    let mut poll_loop = PollLoop {
        schedule,
        state,
        synchronizer,
        action,
        shutdown,
    };

    let mut current = LoopState::Synchronizing;
    loop {
        current = match poll_loop.step(current)? {
            LoopState::Stopped(reason) => {
                debug!("Finished running ({reason:?}).");
                return Ok(reason);
            }
            next => next,
        };
    }
}
