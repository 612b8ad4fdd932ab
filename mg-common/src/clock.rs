// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timer primitives shared by the protocol state machines.
//!
//! A [`Timer`] is a cheap, cloneable handle over shared countdown state. A
//! [`Clock`] owns a thread that ticks a set of timers at a fixed resolution
//! and delivers the event paired with each timer into the inbox of the entity
//! that owns them. State machines keep their own clones of the timers to
//! enable, disable and reset them from their event loops.

use crate::lock;
use slog::{debug, Logger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{sleep, spawn};
use std::time::Duration;

/// How a timer behaves once it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Reload the interval and keep running.
    Periodic,

    /// Disable after firing once. Must be re-enabled to fire again.
    OneShot,
}

#[derive(Debug)]
struct TimerState {
    interval: Duration,
    enabled: bool,
    remaining: Duration,
}

#[derive(Debug, Clone)]
pub struct Timer {
    kind: TimerKind,
    value: Arc<Mutex<TimerState>>,
}

impl Timer {
    /// Create a new periodic timer with the specified interval. Timers start
    /// out disabled.
    pub fn new(interval: Duration) -> Self {
        Self::with_kind(interval, TimerKind::Periodic)
    }

    /// Create a new one-shot timer with the specified interval.
    pub fn one_shot(interval: Duration) -> Self {
        Self::with_kind(interval, TimerKind::OneShot)
    }

    fn with_kind(interval: Duration, kind: TimerKind) -> Self {
        Self {
            kind,
            value: Arc::new(Mutex::new(TimerState {
                interval,
                enabled: false,
                remaining: interval,
            })),
        }
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn interval(&self) -> Duration {
        lock!(self.value).interval
    }

    /// Change the interval of the timer. The remaining time is reloaded with
    /// the new interval.
    pub fn set_interval(&self, interval: Duration) {
        let mut v = lock!(self.value);
        v.interval = interval;
        v.remaining = interval;
    }

    /// Make the timer tick, decrementing the value by the specified
    /// resolution. The decrement saturates, so ticking once the timer has
    /// reached zero is a no-op. Use `expired` to check for expiration.
    pub fn tick(&self, resolution: Duration) {
        let mut v = lock!(self.value);
        if v.enabled {
            v.remaining = v.remaining.saturating_sub(resolution);
        }
    }

    /// Returns true if the timer is enabled.
    pub fn enabled(&self) -> bool {
        lock!(self.value).enabled
    }

    /// Enable the timer. Only enabled timers can expire.
    pub fn enable(&self) {
        lock!(self.value).enabled = true
    }

    /// Disable the timer. Only enabled timers can expire.
    pub fn disable(&self) {
        lock!(self.value).enabled = false
    }

    /// Reload the remaining time from the interval and enable the timer.
    pub fn restart(&self) {
        let mut v = lock!(self.value);
        v.remaining = v.interval;
        v.enabled = true;
    }

    /// Returns true if the timer is enabled and has ticked down to zero.
    pub fn expired(&self) -> bool {
        let v = lock!(self.value);
        v.enabled && v.remaining.is_zero()
    }

    /// Reset the remaining time of the timer to its interval.
    pub fn reset(&self) {
        let mut v = lock!(self.value);
        v.remaining = v.interval;
    }

    /// Consume an expiration. Periodic timers reload, one-shot timers
    /// disable. Returns true if the timer had expired.
    fn fire(&self) -> bool {
        let mut v = lock!(self.value);
        if !(v.enabled && v.remaining.is_zero()) {
            return false;
        }
        v.remaining = v.interval;
        if self.kind == TimerKind::OneShot {
            v.enabled = false;
        }
        true
    }
}

/// Drives a set of timers from a dedicated thread. The thread stops when the
/// clock is dropped, so an entity that owns its clock cannot leak timer
/// events past its own teardown.
pub struct Clock {
    pub resolution: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Clock {
    /// Start ticking `timers`. When a timer expires, its paired value is
    /// converted into an event and sent on `tx`.
    pub fn new<T, E>(
        resolution: Duration,
        timers: Vec<(Timer, T)>,
        tx: Sender<E>,
        log: Logger,
    ) -> Self
    where
        T: Clone + Send + 'static,
        E: From<T> + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        Self::run(resolution, timers, tx, shutdown.clone(), log);
        Self {
            resolution,
            shutdown,
        }
    }

    fn run<T, E>(
        resolution: Duration,
        timers: Vec<(Timer, T)>,
        tx: Sender<E>,
        shutdown: Arc<AtomicBool>,
        log: Logger,
    ) where
        T: Clone + Send + 'static,
        E: From<T> + Send + 'static,
    {
        spawn(move || loop {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            for (timer, value) in &timers {
                timer.tick(resolution);
                if timer.fire() && tx.send(E::from(value.clone())).is_err() {
                    debug!(log, "timer event receiver gone, stopping clock");
                    return;
                }
            }
            sleep(resolution);
        });
    }

    /// Stop the clock thread. Equivalent to dropping the clock.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.stop();
    }
}
