//! Metronome - internal periodic scheduler
//!
//! Runs a tick callback on a dedicated thread every `period`. Stopping only
//! raises a signal, so it never waits for a tick that is in flight and may be
//! called from inside the tick itself.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;

struct StopSignal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

impl StopSignal {
    fn raise(&self) -> bool {
        let mut stopped = self.stopped.lock();
        let first = !*stopped;
        *stopped = true;
        self.wakeup.notify_all();
        first
    }
}

/// Periodic tick source on its own thread
pub struct Metronome {
    name: String,
    period: Duration,
    signal: Arc<StopSignal>,
    exited: Option<oneshot::Receiver<()>>,
}

impl Metronome {
    /// Start ticking. The first tick fires one `period` from now.
    pub fn start<F>(name: &str, period: Duration, tick: F) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        if period.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "metronome period must be positive",
            ));
        }

        let signal = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            wakeup: Condvar::new(),
        });
        let (exit_tx, exit_rx) = oneshot::channel();

        let thread_signal = signal.clone();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                run(&thread_signal, period, tick);
                let _ = exit_tx.send(());
            })?;

        tracing::info!(metronome = name, ?period, "metronome started");

        Ok(Metronome {
            name: name.to_string(),
            period,
            signal,
            exited: Some(exit_rx),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_stopped(&self) -> bool {
        *self.signal.stopped.lock()
    }

    /// Signal the thread to stop without waiting for it
    pub fn stop(self) {
        drop(self);
    }

    /// Signal the thread to stop and wait until it has exited
    pub async fn stop_async(mut self) {
        self.halt();
        if let Some(exited) = self.exited.take() {
            // Err only means the thread went away without reporting
            let _ = exited.await;
        }
    }

    fn halt(&self) {
        if self.signal.raise() {
            tracing::info!(metronome = %self.name, "metronome stopped");
        }
    }
}

impl Drop for Metronome {
    fn drop(&mut self) {
        self.halt();
    }
}

impl std::fmt::Debug for Metronome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metronome")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn run<F: Fn()>(signal: &StopSignal, period: Duration, tick: F) {
    let mut next = Instant::now() + period;
    loop {
        {
            let mut stopped = signal.stopped.lock();
            while !*stopped && Instant::now() < next {
                signal.wakeup.wait_until(&mut stopped, next);
            }
            if *stopped {
                return;
            }
        }

        tick();

        next += period;
        let now = Instant::now();
        if next <= now {
            // Fell a full period behind; re-anchor instead of bursting
            next = now + period;
        }
    }
}
