//! Sweep Task
//!
//! Dedicated thread that ticks at a fixed interval until cancelled.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, select, Sender};
use tracing::{debug, warn};

/// Shortest accepted interval, so a zero step cannot spin the thread.
const MIN_STEP: Duration = Duration::from_millis(1);

/// Handle on a running sweep thread.
///
/// The thread calls `tick` once per interval. It exits when `tick` returns
/// false, when [`Sweeper::stop`] is called, or when the handle is dropped.
pub(crate) struct Sweeper {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawns the sweep thread.
    ///
    /// The first tick fires one `step` after spawning.
    pub(crate) fn spawn<F>(step: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let step = step.max(MIN_STEP);
        let (cancel, cancelled) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("cache-sweeper".to_string())
            .spawn(move || {
                let ticker = channel::tick(step);
                debug!(step_ms = step.as_millis() as u64, "Sweep thread started");

                loop {
                    select! {
                        // A message or a dropped sender both mean stop
                        recv(cancelled) -> _ => break,
                        recv(ticker) -> _ => {
                            if !tick() {
                                break;
                            }
                        }
                    }
                }

                debug!("Sweep thread exiting");
            })?;

        Ok(Self { cancel, handle })
    }

    /// Signals the thread to stop.
    ///
    /// Waits for an in-flight tick to finish unless called from the sweep
    /// thread itself. Returns false if the thread had panicked.
    pub(crate) fn stop(self) -> bool {
        let Self { cancel, handle } = self;
        drop(cancel);
        if handle.thread().id() == thread::current().id() {
            return true;
        }

        match handle.join() {
            Ok(()) => true,
            Err(_) => {
                warn!("Sweep thread panicked");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_sweeper_ticks_periodically() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let sweeper = Sweeper::spawn(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        thread::sleep(Duration::from_millis(150));
        assert!(sweeper.stop(), "Sweep thread should exit cleanly");

        let observed = ticks.load(Ordering::SeqCst);
        assert!(observed >= 2, "Expected several ticks, got {}", observed);

        // No more ticks once stopped
        thread::sleep(Duration::from_millis(60));
        assert_eq!(ticks.load(Ordering::SeqCst), observed);
    }

    #[test]
    fn test_sweeper_exits_when_tick_returns_false() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let sweeper = Sweeper::spawn(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert!(sweeper.handle.is_finished());
        sweeper.stop();
    }

    #[test]
    fn test_sweeper_stop_before_first_tick() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let sweeper = Sweeper::spawn(Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        sweeper.stop();
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_reports_panicked_thread() {
        let sweeper = Sweeper::spawn(Duration::from_millis(5), || panic!("sweep failed")).unwrap();
        thread::sleep(Duration::from_millis(50));

        assert!(!sweeper.stop());
    }
}
