//! Cancellable fixed-period timers.
//!
//! Jobs never overlap: a tick that comes due while the previous job is still
//! running is skipped, not queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// At-most-one-in-flight guard shared between a timer and manual triggers.
#[derive(Debug, Default)]
pub struct PollGate {
    in_flight: AtomicBool,
    skipped: AtomicU64,
}

impl PollGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when another run holds the gate; the attempt is counted as skipped.
    pub fn try_enter(&self) -> Option<PollPermit<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(PollPermit { gate: self })
        } else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    fn note_skipped(&self, n: u64) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
    }
}

pub struct PollPermit<'a> {
    gate: &'a PollGate,
}

impl Drop for PollPermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.store(false, Ordering::Release);
    }
}

pub struct TickerHandle {
    name: String,
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    gate: Arc<PollGate>,
}

impl TickerHandle {
    pub fn skipped(&self) -> u64 {
        self.gate.skipped()
    }

    /// Stops the timer and waits for a running job to finish.
    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the thread with `Disconnected`.
        self.stop.take();
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                tracing::warn!(ticker = %self.name, "ticker thread panicked");
            }
        }
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct Ticker;

impl Ticker {
    /// Runs `job` now and then every `interval` on a dedicated thread.
    ///
    /// Overruns are coalesced: if a job outlasts one or more periods, the
    /// missed ticks are dropped and the schedule resumes on the next period
    /// boundary.
    pub fn spawn<F>(name: &str, interval: Duration, gate: Arc<PollGate>, mut job: F) -> std::io::Result<TickerHandle>
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        let thread_gate = gate.clone();
        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(format!("ticker-{name}"))
            .spawn(move || {
                let interval = interval.max(Duration::from_millis(1));
                let mut next = Instant::now();
                tracing::debug!(ticker = %thread_name, ?interval, "ticker started");
                loop {
                    match thread_gate.try_enter() {
                        Some(_permit) => job(),
                        None => tracing::debug!(ticker = %thread_name, "tick skipped, previous run in flight"),
                    }

                    next += interval;
                    let now = Instant::now();
                    if now > next {
                        let behind = now.duration_since(next);
                        let missed = (behind.as_nanos() / interval.as_nanos()) as u64 + 1;
                        thread_gate.note_skipped(missed);
                        next += interval * missed as u32;
                        tracing::debug!(ticker = %thread_name, missed, "ticker overran");
                    }

                    match rx.recv_timeout(next.saturating_duration_since(Instant::now())) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!(ticker = %thread_name, "ticker stopped");
            })?;

        Ok(TickerHandle {
            name: name.to_string(),
            stop: Some(tx),
            thread: Some(thread),
            gate,
        })
    }
}
