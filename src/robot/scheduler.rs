// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the cooperative scheduler interleaving the periodic tasks of a session.
//!
//! Every task has its own period and last-run stamp. The control loop asks the scheduler once
//! per iteration which tasks are due and runs them in a fixed order. Nothing blocks.
use crate::settings::{period, Settings};
#[cfg(test)]
use std::cell::Cell;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

/// Time source of a session. Times are measured from the start of the session.
pub trait Clock {
    fn now(&self) -> Duration;
    fn sleep(&mut self, duration: Duration);
}

/// Wall clock.
#[derive(Debug, Copy, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Simulated clock advancing by a fixed step on every reading.
#[cfg(test)]
pub(crate) struct StepClock {
    time: Cell<Duration>,
    step: Duration,
    slept: Duration,
}

#[cfg(test)]
impl StepClock {
    pub fn new(step: Duration) -> Self {
        StepClock {
            time: Cell::new(Duration::from_secs(0)),
            step,
            slept: Duration::from_secs(0),
        }
    }
    /// total time spent in sleep
    pub fn slept(&self) -> Duration {
        self.slept
    }
}

#[cfg(test)]
impl Clock for StepClock {
    fn now(&self) -> Duration {
        let now = self.time.get() + self.step;
        self.time.set(now);
        now
    }
    fn sleep(&mut self, duration: Duration) {
        self.time.set(self.time.get() + duration);
        self.slept += duration;
    }
}

/// The periodic tasks of a session, in the order they run within one iteration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// control law of the active mode, every `dt_pid`
    Control,
    /// hold stabilization, every `dt_hold`
    Hold,
    /// input poll, every `dt_frame`
    Frame,
    /// command transmission, every `dt_comm`
    Transmit,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskKind::Control => write!(f, "control"),
            TaskKind::Hold => write!(f, "hold"),
            TaskKind::Frame => write!(f, "frame"),
            TaskKind::Transmit => write!(f, "transmit"),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct PeriodicTask {
    pub kind: TaskKind,
    pub period: Duration,
    pub last_run: Duration,
}

impl PeriodicTask {
    pub fn is_due(&self, now: Duration) -> bool {
        now.saturating_sub(self.last_run) >= self.period
    }
}

/// Ordered set of periodic tasks.
#[derive(Debug, Clone)]
pub struct Scheduler {
    tasks: Vec<PeriodicTask>,
}

impl Scheduler {
    /// Creates the four session tasks with every last-run stamp set to `now`.
    pub fn new(settings: &Settings, now: Duration) -> Self {
        let task = |kind, seconds| PeriodicTask {
            kind,
            period: period(seconds),
            last_run: now,
        };
        Scheduler {
            tasks: vec![
                task(TaskKind::Control, settings.dt_pid),
                task(TaskKind::Hold, settings.dt_hold),
                task(TaskKind::Frame, settings.dt_frame),
                task(TaskKind::Transmit, settings.dt_comm),
            ],
        }
    }

    /// Returns the tasks whose period elapsed, in order, and stamps them with `now`.
    pub fn due(&mut self, now: Duration) -> Vec<TaskKind> {
        let mut due = Vec::with_capacity(self.tasks.len());
        for task in self.tasks.iter_mut() {
            if task.is_due(now) {
                task.last_run = now;
                due.push(task.kind);
            }
        }
        due
    }
}
