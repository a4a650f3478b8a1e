//! Two cancellable timed loops on one thread: render and detection poll.
//!
//! The scheduler never runs anything itself. The coordinator asks it which
//! tasks are due, runs them, then sleeps until `next_wakeup_ms`.

use crate::types::Clock;
use log::debug;

/// Display refresh period the render loop is driven at (~60 Hz).
pub const DISPLAY_SYNC_MS: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Render,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    /// Due times advance by the period; missed slots are dropped, not queued.
    FixedRate,
    /// Next due time is measured from the moment the task was handed out.
    FixedDelay,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    period_ms: u64,
    next_due_ms: u64,
    cadence: Cadence,
}

impl Timer {
    fn fire(&mut self, now: u64) -> bool {
        if now < self.next_due_ms {
            return false;
        }
        self.next_due_ms = match self.cadence {
            Cadence::FixedRate => {
                let next = self.next_due_ms + self.period_ms;
                if next <= now {
                    now + self.period_ms
                } else {
                    next
                }
            }
            Cadence::FixedDelay => now + self.period_ms,
        };
        true
    }
}

pub struct Scheduler<C: Clock> {
    clock: C,
    render: Option<Timer>,
    poll: Option<Timer>,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            render: None,
            poll: None,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Arm both loops. Both fire on the first call to `due_tasks`.
    pub fn start(&mut self, render_period_ms: u64, poll_delay_ms: u64) {
        let now = self.clock.now_ms();
        self.render = Some(Timer {
            period_ms: render_period_ms.max(1),
            next_due_ms: now,
            cadence: Cadence::FixedRate,
        });
        self.poll = Some(Timer {
            period_ms: poll_delay_ms.max(1),
            next_due_ms: now,
            cadence: Cadence::FixedDelay,
        });
        debug!(
            "Scheduler started: render every {} ms, poll delay {} ms",
            render_period_ms, poll_delay_ms
        );
    }

    pub fn is_running(&self) -> bool {
        self.render.is_some() || self.poll.is_some()
    }

    pub fn is_armed(&self, task: Task) -> bool {
        match task {
            Task::Render => self.render.is_some(),
            Task::Poll => self.poll.is_some(),
        }
    }

    /// Change the poll delay. Takes effect from the next due time.
    pub fn set_poll_delay(&mut self, delay_ms: u64) {
        if let Some(t) = self.poll.as_mut() {
            t.period_ms = delay_ms.max(1);
        }
    }

    /// Tasks due now, render first. Each armed task appears at most once.
    pub fn due_tasks(&mut self) -> Vec<Task> {
        let now = self.clock.now_ms();
        let mut due = Vec::with_capacity(2);
        if self.render.as_mut().is_some_and(|t| t.fire(now)) {
            due.push(Task::Render);
        }
        if self.poll.as_mut().is_some_and(|t| t.fire(now)) {
            due.push(Task::Poll);
        }
        due
    }

    /// Earliest time any armed task becomes due.
    pub fn next_wakeup_ms(&self) -> Option<u64> {
        [self.render, self.poll]
            .iter()
            .flatten()
            .map(|t| t.next_due_ms)
            .min()
    }

    pub fn cancel(&mut self, task: Task) {
        match task {
            Task::Render => self.render = None,
            Task::Poll => self.poll = None,
        }
    }

    pub fn stop(&mut self) {
        self.render = None;
        self.poll = None;
        debug!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManualClock;

    #[test]
    fn test_nothing_due_before_start() {
        let mut s = Scheduler::new(ManualClock::new(0));
        assert!(s.due_tasks().is_empty());
        assert_eq!(s.next_wakeup_ms(), None);
    }

    #[test]
    fn test_both_fire_immediately_then_on_cadence() {
        let clock = ManualClock::new(1000);
        let mut s = Scheduler::new(clock.clone());
        s.start(16, 1000);
        assert_eq!(s.due_tasks(), vec![Task::Render, Task::Poll]);
        assert!(s.due_tasks().is_empty(), "same instant fires once");

        clock.advance(16);
        assert_eq!(s.due_tasks(), vec![Task::Render]);
        assert_eq!(s.next_wakeup_ms(), Some(1032));

        clock.set(2000);
        assert_eq!(s.due_tasks(), vec![Task::Render, Task::Poll]);
    }

    #[test]
    fn test_missed_render_slots_are_dropped() {
        let clock = ManualClock::new(0);
        let mut s = Scheduler::new(clock.clone());
        s.start(16, 10_000);
        s.due_tasks();
        clock.advance(100);
        assert_eq!(s.due_tasks(), vec![Task::Render]);
        assert!(s.due_tasks().is_empty(), "no backlog after a stall");
        assert_eq!(s.next_wakeup_ms(), Some(116));
    }

    #[test]
    fn test_poll_is_fixed_delay() {
        let clock = ManualClock::new(0);
        let mut s = Scheduler::new(clock.clone());
        s.start(16, 1000);
        s.due_tasks();
        clock.set(1300);
        assert!(s.due_tasks().contains(&Task::Poll));
        clock.set(2000);
        assert!(!s.due_tasks().contains(&Task::Poll), "next poll is 1000 ms after 1300");
        clock.set(2300);
        assert!(s.due_tasks().contains(&Task::Poll));
    }

    #[test]
    fn test_stop_cancels_everything() {
        let clock = ManualClock::new(0);
        let mut s = Scheduler::new(clock.clone());
        s.start(16, 1000);
        s.cancel(Task::Poll);
        assert!(!s.is_armed(Task::Poll));
        s.stop();
        clock.advance(5000);
        assert!(s.due_tasks().is_empty());
        assert!(!s.is_running());
    }
}
