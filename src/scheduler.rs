//! Background drain scheduler.
//!
//! A dedicated thread waits on a command channel with a timeout equal to the
//! drain interval. Every timeout is a tick and runs the drain task unforced,
//! letting the persist queue's gate decide whether there is work. A
//! [`run_now`](DrainScheduler::run_now) request runs it forced and hands the
//! report back to the waiting caller.
//!
//! The task returns `None` once its target is gone, which ends the loop.

use crate::persist::DrainReport;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

enum Command {
    RunNow(Sender<DrainReport>),
    Shutdown,
}

/// Handle to the drain thread. Dropping it stops the thread.
pub struct DrainScheduler {
    sender: Sender<Command>,
    thread: Option<JoinHandle<()>>,
    interval: Duration,
}

impl DrainScheduler {
    /// Spawns the drain thread. `task(force)` runs on every tick with
    /// `force == false` and on every [`run_now`](Self::run_now) with
    /// `force == true`.
    pub fn spawn<F>(interval: Duration, task: F) -> io::Result<Self>
    where
        F: FnMut(bool) -> Option<DrainReport> + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name("writeback-drain".into())
            .spawn(move || drain_loop(interval, receiver, task))?;
        Ok(DrainScheduler {
            sender,
            thread: Some(thread),
            interval,
        })
    }

    /// Tick period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs a forced drain on the scheduler thread and waits for it.
    /// Returns `None` if the thread has stopped.
    pub fn run_now(&self) -> Option<DrainReport> {
        let (ack, report) = crossbeam_channel::bounded(1);
        self.sender.send(Command::RunNow(ack)).ok()?;
        report.recv().ok()
    }

    /// Stops the thread and waits for an in-flight drain to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        // a closed channel means the loop already exited
        let _ = self.sender.send(Command::Shutdown);
        if handle.thread().id() == thread::current().id() {
            // dropped by the task itself; the loop exits on its own
            return;
        }
        if handle.join().is_err() {
            error!("drain scheduler thread panicked");
        }
    }
}

impl Drop for DrainScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl core::fmt::Debug for DrainScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DrainScheduler")
            .field("interval", &self.interval)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

fn drain_loop<F>(interval: Duration, receiver: Receiver<Command>, mut task: F)
where
    F: FnMut(bool) -> Option<DrainReport>,
{
    debug!(?interval, "drain scheduler started");
    loop {
        let alive = match receiver.recv_timeout(interval) {
            Ok(Command::RunNow(ack)) => match task(true) {
                Some(report) => {
                    let _ = ack.send(report);
                    true
                }
                None => false,
            },
            Err(RecvTimeoutError::Timeout) => task(false).is_some(),
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => false,
        };
        if !alive {
            break;
        }
    }
    debug!("drain scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_ticks_run_unforced() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let scheduler = DrainScheduler::spawn(Duration::from_millis(5), move |force| {
            assert!(!force);
            counter.fetch_add(1, Ordering::SeqCst);
            Some(DrainReport::default())
        })
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        scheduler.shutdown();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, saw {seen}");

        thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_run_now_is_forced_and_awaited() {
        let scheduler = DrainScheduler::spawn(Duration::from_secs(3600), |force| {
            Some(DrainReport {
                ran: force,
                tick: 7,
                ..DrainReport::default()
            })
        })
        .unwrap();

        let report = scheduler.run_now().unwrap();
        assert!(report.ran);
        assert_eq!(report.tick, 7);
    }

    #[test]
    fn test_task_without_target_stops_loop() {
        let scheduler = DrainScheduler::spawn(Duration::from_millis(1), |_| None).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(scheduler.run_now().is_none());
    }
}
