//! Trigger input watcher
//!
//! Polls the trigger line and reports rising edges, at most one per
//! bounce window. Polling keeps the watcher backend-agnostic: the sysfs and
//! simulated backends both only offer level reads.

use crate::config::TriggerConfig;
use crate::gpio::{InputReader, PinLevel};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A debounced rising edge on the trigger pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub pin: u32,
}

/// Rising-edge detection with a debounce window
#[derive(Debug)]
pub struct EdgeDetector {
    bounce: Duration,
    previous: Option<PinLevel>,
    last_fired: Option<Instant>,
}

impl EdgeDetector {
    pub fn new(bounce: Duration) -> Self {
        Self {
            bounce,
            previous: None,
            last_fired: None,
        }
    }

    /// Feed one sample; true when it completes a reportable rising edge.
    ///
    /// The first sample only sets the baseline, so a line that is already
    /// high at startup does not fire.
    pub fn sample(&mut self, level: PinLevel, now: Instant) -> bool {
        let previous = self.previous.replace(level);
        if previous != Some(PinLevel::Low) || level != PinLevel::High {
            return false;
        }

        if let Some(last) = self.last_fired {
            if now.duration_since(last) < self.bounce {
                debug!("Edge inside bounce window, ignoring");
                return false;
            }
        }
        self.last_fired = Some(now);
        true
    }
}

pub struct TriggerWatcher {
    reader: Arc<dyn InputReader>,
    pin: u32,
    poll_interval: Duration,
    detector: EdgeDetector,
}

impl TriggerWatcher {
    pub fn new(reader: Arc<dyn InputReader>, config: &TriggerConfig) -> Self {
        Self {
            reader,
            pin: config.pin,
            poll_interval: config.poll_interval,
            detector: EdgeDetector::new(config.bounce),
        }
    }

    /// Poll until shutdown or until the event receiver is dropped
    pub async fn run(
        mut self,
        events: mpsc::Sender<TriggerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            pin = self.pin,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            bounce_ms = self.detector.bounce.as_millis() as u64,
            "Trigger watcher started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut read_failing = false;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let level = match self.reader.read_input(self.pin).await {
                        Ok(level) => {
                            read_failing = false;
                            level
                        }
                        Err(e) => {
                            if !read_failing {
                                warn!(pin = self.pin, error = %e, "Failed to read trigger input");
                                read_failing = true;
                            }
                            continue;
                        }
                    };

                    if self.detector.sample(level, Instant::now()) {
                        info!(pin = self.pin, "GPIO event detected on pin {}", self.pin);
                        if events.send(TriggerEvent { pin: self.pin }).await.is_err() {
                            debug!("Trigger event receiver dropped");
                            break;
                        }
                    }
                }
            }
        }

        info!(pin = self.pin, "Trigger watcher stopped");
    }
}
