//! Background deadlock surveillance.
//!
//! One task polls every region at a fixed period. A region that stays held
//! with an unchanged lock generation for longer than its [`LockLimit`] is
//! declared deadlocked. The first such region latches the registry's
//! deadlock flag, all locked and unexited regions are dumped to the sink,
//! and the registry's [`FatalHalt`](crate::FatalHalt) is invoked. No lock is
//! ever broken or force-released.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::diagnostic::DiagnosticReport;
use crate::error::{RegionError, RegionResult, Violation};
use crate::halt::FatalEvent;
use crate::region::{LockLimit, Region};
use crate::registry::Registry;

/// Surveillance configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveillanceConfig {
    /// Time between polls.
    pub poll_period: Duration,
    /// Delay before the first poll, so start-up holds are not reported.
    pub warmup_delay: Duration,
}

impl Default for SurveillanceConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_secs(5),
            warmup_delay: Duration::from_secs(10),
        }
    }
}

impl SurveillanceConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll period is zero.
    pub fn validate(&self) -> RegionResult<()> {
        if self.poll_period.is_zero() {
            return Err(RegionError::invalid_configuration(
                "poll_period must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> SurveillanceConfigBuilder {
        SurveillanceConfigBuilder::default()
    }
}

/// Builder for `SurveillanceConfig`.
#[derive(Debug, Default)]
pub struct SurveillanceConfigBuilder {
    config: SurveillanceConfig,
}

impl SurveillanceConfigBuilder {
    /// Set the poll period.
    #[must_use]
    pub fn poll_period(mut self, period: Duration) -> Self {
        self.config.poll_period = period;
        self
    }

    /// Set the warm-up delay.
    #[must_use]
    pub fn warmup_delay(mut self, delay: Duration) -> Self {
        self.config.warmup_delay = delay;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> RegionResult<SurveillanceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Number of consecutive unchanged polls a region may accumulate before it
/// trips: `limit / period`, rounded down.
///
/// A region trips once its stable poll count is strictly greater than this.
#[must_use]
pub fn stable_poll_limit(limit: Duration, period: Duration) -> u128 {
    limit
        .as_nanos()
        .checked_div(period.as_nanos())
        .unwrap_or(u128::MAX)
}

/// A detected deadlock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadlockReport {
    /// The [`Violation::Deadlock`] of the region that tripped.
    pub violation: Violation,
    /// The tripped region first, then every other locked or unexited region.
    pub report: DiagnosticReport,
}

/// Deadlock detector over one registry.
#[derive(Debug, Clone)]
pub struct Surveillance {
    registry: Registry,
    config: SurveillanceConfig,
}

impl Surveillance {
    /// Create a detector.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(registry: Registry, config: SurveillanceConfig) -> RegionResult<Self> {
        config.validate()?;
        Ok(Self { registry, config })
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &SurveillanceConfig {
        &self.config
    }

    /// Run one poll over all regions.
    ///
    /// Returns the deadlock if this poll tripped one. Once any poll has
    /// tripped, every later poll is a no-op returning `None`.
    #[must_use]
    pub fn poll_once(&self) -> Option<DeadlockReport> {
        if self.registry.deadlock_reported() {
            return None;
        }

        let period = self.config.poll_period;
        for region in self.registry.regions(None) {
            let limit = region.max_lock();
            let stable = observe(&region, limit);
            if let Some(max) = limit.duration()
                && u128::from(stable) > stable_poll_limit(max, period)
            {
                return self.trip(&region, max);
            }
        }
        None
    }

    fn trip(&self, region: &Region, limit: Duration) -> Option<DeadlockReport> {
        let shared = self.registry.shared();
        if shared
            .deadlock_reported
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let offender = region.snapshot(true);
        let violation = Violation::Deadlock {
            region: offender.name.clone(),
            module: offender.module,
            held_for: offender.lock_age.unwrap_or_default(),
            limit,
        };
        error!(
            region = region.name(),
            module = %region.module(),
            generation = offender.generation,
            "Region deadlock detected"
        );

        let mut report = self.registry.blocking_report(violation.to_string());
        report.regions.retain(|snapshot| snapshot.id != offender.id);
        report.regions.insert(0, offender);
        Some(DeadlockReport { violation, report })
    }

    /// Run surveillance on a dedicated thread.
    ///
    /// Dropping the handle leaves the thread running.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(self) -> std::io::Result<SurveillanceHandle> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let thread = thread::Builder::new()
            .name("regionwatch-surveillance".to_string())
            .spawn(move || self.run(&thread_signal))?;
        Ok(SurveillanceHandle {
            signal,
            thread: Some(thread),
        })
    }

    fn run(&self, signal: &StopSignal) {
        info!(
            poll_period_ms = self.config.poll_period.as_millis(),
            warmup_ms = self.config.warmup_delay.as_millis(),
            "Region surveillance started"
        );
        if signal.sleep(self.config.warmup_delay) {
            return;
        }
        loop {
            if signal.sleep(self.config.poll_period) {
                debug!("Region surveillance stopped");
                return;
            }
            if let Some(deadlock) = self.poll_once() {
                let shared = self.registry.shared();
                shared
                    .sink
                    .emit(&format!("Error: region deadlock: {}", deadlock.violation));
                shared.sink.emit("All locked regions listed below.");
                for line in deadlock.report.lines() {
                    shared.sink.emit(&line);
                }
                shared.halt.halt(FatalEvent {
                    violation: deadlock.violation,
                    location: None,
                    report: deadlock.report,
                });
            }
        }
    }
}

/// Update a region's poll bookkeeping and return its stable poll count.
///
/// An unexited region counts as held by its creator. Its generation stays
/// at 0 until the first exit, so it trips like any other stuck region.
fn observe(region: &Region, limit: LockLimit) -> u64 {
    let poll = &region.core().poll;
    if !region.state().is_blocking() || limit == LockLimit::Disabled {
        poll.stable_polls.store(0, Ordering::Relaxed);
        return 0;
    }
    let generation = region.generation();
    if poll.last_seen_generation.load(Ordering::Relaxed) == generation {
        let stable = poll.stable_polls.load(Ordering::Relaxed).saturating_add(1);
        poll.stable_polls.store(stable, Ordering::Relaxed);
        stable
    } else {
        poll.last_seen_generation.store(generation, Ordering::Relaxed);
        poll.stable_polls.store(0, Ordering::Relaxed);
        0
    }
}

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    /// Sleep for `duration` or until stopped. Returns whether stopped.
    fn sleep(&self, duration: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        match Instant::now().checked_add(duration) {
            Some(deadline) => {
                while !*stopped {
                    if self.changed.wait_until(&mut stopped, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !*stopped {
                    self.changed.wait(&mut stopped);
                }
            }
        }
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.changed.notify_all();
    }
}

/// Handle to a running surveillance thread.
#[derive(Debug)]
pub struct SurveillanceHandle {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl SurveillanceHandle {
    /// Whether the thread has ended, by stop or by halting.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the thread and wait for it.
    ///
    /// # Errors
    ///
    /// Returns the panic payload if the thread panicked, which is what a
    /// panicking test halt produces.
    pub fn stop(mut self) -> thread::Result<()> {
        self.signal.stop();
        match self.thread.take() {
            Some(thread) => thread.join(),
            None => Ok(()),
        }
    }
}
