//! Stoppable worker threads.
//!
//! Workers share a `Stop` flag and look at it only at their own tick
//! boundaries. Raising the flag never interrupts a tick in progress, it keeps
//! the next one from starting.

use crate::constants::STOP_CHECK_MILLIS;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// A cooperative cancellation flag shared by every worker in a process.
#[derive(Debug, Clone, Default)]
pub struct Stop {
    flag: Arc<AtomicBool>,
}

impl Stop {
    /// A lowered flag.
    pub fn new() -> Stop {
        Stop::default()
    }

    /// Raise the flag.
    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Has the flag been raised?
    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `interval` or until the flag is raised, whichever comes
    /// first. Returns true if the full interval elapsed.
    pub fn wait(&self, interval: Duration) -> bool {
        let slice = Duration::from_millis(STOP_CHECK_MILLIS);
        let deadline = match Instant::now().checked_add(interval) {
            Some(deadline) => deadline,
            None => {
                // Unrepresentable deadline: only the flag can end the wait.
                while !self.is_raised() {
                    thread::sleep(slice);
                }
                return false;
            }
        };
        loop {
            if self.is_raised() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let remaining = deadline - now;
            thread::sleep(if remaining < slice { remaining } else { slice });
        }
    }
}

/// A named worker thread.
pub struct ThreadHandle {
    name: String,
    handle: thread::JoinHandle<()>,
}

impl ThreadHandle {
    /// The worker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join the given thread, blocking until it exits.
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("worker {} panicked", self.name);
        }
    }
}

/// Spawn a named thread running `f` once.
pub fn spawn<F>(name: &str, f: F) -> io::Result<ThreadHandle>
where
    F: FnOnce() + Send + 'static,
{
    let handle = thread::Builder::new().name(name.to_string()).spawn(f)?;
    Ok(ThreadHandle {
        name: name.to_string(),
        handle,
    })
}

/// Spawn a thread that runs `tick` every `interval` until `stop` is raised.
///
/// The first tick runs after one full interval.
pub fn spawn_periodic<F>(
    name: &str,
    interval: Duration,
    stop: Stop,
    mut tick: F,
) -> io::Result<ThreadHandle>
where
    F: FnMut() + Send + 'static,
{
    let label = name.to_string();
    spawn(name, move || {
        trace!("{} started, interval {:?}", label, interval);
        while stop.wait(interval) {
            tick();
        }
        trace!("{} observed stop", label);
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn periodic_runs_until_stopped() {
        let stop = Stop::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&ticks);
        let worker = spawn_periodic("test-ticker", Duration::from_millis(5), stop.clone(), move || {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        thread::sleep(Duration::from_millis(100));
        stop.raise();
        worker.join();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen > 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn wait_returns_early_when_raised() {
        let stop = Stop::new();
        stop.raise();
        let start = Instant::now();
        assert!(!stop.wait(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn wait_survives_unrepresentable_interval() {
        let stop = Stop::new();
        let raiser = stop.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            raiser.raise();
        });
        assert!(!stop.wait(Duration::from_secs(u64::max_value())));
        t.join().unwrap();
    }
}
