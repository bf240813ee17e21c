use crate::instance::LockReleaser;
use log::debug;
use std::sync::{atomic::AtomicU8, mpsc::Sender};

/// Listens to termination signals and asks the poll loop to stop.
///
/// The first signal sends a shutdown request, the loop stops after the current
/// step. The second one releases the lock and exits immediately.
pub struct SignalListener {
    signal_count: AtomicU8,
    releaser: Option<LockReleaser>,
}

impl SignalListener {
    pub fn new(releaser: Option<LockReleaser>) -> SignalListener {
        SignalListener {
            signal_count: AtomicU8::new(0),
            releaser,
        }
    }

    #[cfg(unix)]
    fn listen_inner<I>(&self, tx: Sender<()>, signals: I)
    where
        I: IntoIterator<Item = i32>,
    {
        use log::{error, warn};
        use std::{process, sync::atomic::Ordering};

        for signal in signals.into_iter() {
            let previous = self.signal_count.fetch_add(1, Ordering::AcqRel);
            if previous == 0 {
                debug!("Got signal {signal}, stopping after the current step.");
                if tx.send(()).is_err() {
                    error!("Failed stopping the poll loop with signal {signal}.");
                }
            } else {
                warn!("Got signal {signal} again, terminating right now.");
                if let Some(releaser) = &self.releaser {
                    releaser.release();
                }
                process::exit(128 + signal);
            }
        }
    }

    /// Iterate over the termination signals until the process exits.
    #[cfg(unix)]
    pub fn listen(&self, tx: Sender<()>) {
        use log::warn;
        use signal_hook::{
            consts::TERM_SIGNALS,
            iterator::{exfiltrator::SignalOnly, SignalsInfo},
        };

        match SignalsInfo::<SignalOnly>::new(TERM_SIGNALS) {
            Ok(mut signals) => self.listen_inner(tx, &mut signals),
            Err(err) => warn!("Failed setting up signal handler: {err}."),
        }
    }

    #[cfg(not(unix))]
    pub fn listen(&self, _tx: Sender<()>) {
        debug!("Signal handlers are not supported on non-unix systems.");
    }
}

impl Default for SignalListener {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn it_should_request_shutdown_on_the_first_signal() {
        let listener = SignalListener::default();
        let (tx, rx) = mpsc::channel::<()>();

        listener.listen_inner(tx, vec![2]);

        let msgs: Vec<_> = rx.iter().collect();
        assert_eq!(vec![()], msgs);
    }
}
