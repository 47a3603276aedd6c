//! Cooperative pause/stop signalling for crawl tasks
//!
//! Tasks call [`ControlToken::checkpoint`] before scheduling each new fetch.
//! A paused run blocks there; a stopped run returns `false` so the task can
//! flush what it already holds and exit.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSignal {
    Run,
    Pause,
    Stop,
}

/// Sending side, owned by the run controller
#[derive(Debug, Clone)]
pub struct CrawlControl {
    tx: Arc<watch::Sender<RunSignal>>,
}

impl CrawlControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunSignal::Run);
        Self { tx: Arc::new(tx) }
    }

    pub fn token(&self) -> ControlToken {
        ControlToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn pause(&self) {
        self.send(RunSignal::Pause);
    }

    pub fn resume(&self) {
        self.send(RunSignal::Run);
    }

    pub fn stop(&self) {
        self.send(RunSignal::Stop);
    }

    pub fn signal(&self) -> RunSignal {
        *self.tx.borrow()
    }

    /// A control that follows `parent` but can also be stopped on its own
    ///
    /// The returned task relays every parent signal and stops the child when
    /// the parent's controller is dropped. Abort it once the child is no
    /// longer needed.
    pub fn linked(mut parent: ControlToken) -> (Self, JoinHandle<()>) {
        let child = Self::new();
        if parent.is_stopped() {
            child.stop();
        } else {
            child.send(parent.signal());
        }

        let relay = child.clone();
        let handle = tokio::spawn(async move {
            while let Some(signal) = parent.next_signal().await {
                relay.send(signal);
            }
            relay.stop();
        });
        (child, handle)
    }

    /// Stop is final; later pause/resume requests are ignored
    fn send(&self, signal: RunSignal) {
        self.tx.send_if_modified(|current| {
            if *current == RunSignal::Stop || *current == signal {
                return false;
            }
            *current = signal;
            true
        });
    }
}

impl Default for CrawlControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side, cloned into every crawl task
///
/// A token whose controller has been dropped behaves as stopped.
#[derive(Debug, Clone)]
pub struct ControlToken {
    rx: watch::Receiver<RunSignal>,
}

impl ControlToken {
    pub fn signal(&self) -> RunSignal {
        *self.rx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.signal() == RunSignal::Stop || self.rx.has_changed().is_err()
    }

    /// Waits while paused; returns false once the run is stopping
    pub async fn checkpoint(&mut self) -> bool {
        loop {
            if self.rx.has_changed().is_err() {
                return false;
            }
            let signal = *self.rx.borrow_and_update();
            match signal {
                RunSignal::Run => return true,
                RunSignal::Stop => return false,
                RunSignal::Pause => {
                    if self.rx.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Waits for the next signal; `None` once the controller is gone
    pub async fn next_signal(&mut self) -> Option<RunSignal> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() == RunSignal::Stop {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleeps for `duration` unless stopped first; returns false on stop
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_stopped();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
            _ = self.stopped() => false,
        }
    }
}
