//! Generation-checked debounce timer.
//!
//! Every restart bumps the generation, so a fire scheduled before the latest
//! restart is recognized as stale and ignored. The timer holds no task of its
//! own; the owner polls it or sleeps until `deadline()`.

use std::time::Duration;

use tokio::time::Instant;

/// Delay used while the user drags the map.
pub const INTERACTIVE_DELAY: Duration = Duration::from_millis(200);

/// Delay for low-power or slow-network profiles.
pub const RELAXED_DELAY: Duration = Duration::from_millis(500);

/// Identifies one scheduled fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTicket(u64);

#[derive(Debug, Clone)]
pub struct DebounceTimer {
    delay: Duration,
    generation: u64,
    deadline: Option<Instant>,
}

impl Default for DebounceTimer {
    fn default() -> Self {
        Self::new(INTERACTIVE_DELAY)
    }
}

impl DebounceTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: 0,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule a fire `delay` after `now`, superseding any pending one.
    pub fn restart(&mut self, now: Instant) -> DebounceTicket {
        self.generation += 1;
        self.deadline = Some(now + self.delay);
        DebounceTicket(self.generation)
    }

    pub fn cancel(&mut self) {
        self.generation += 1;
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_current(&self, ticket: DebounceTicket) -> bool {
        self.deadline.is_some() && ticket.0 == self.generation
    }

    /// Consume the pending fire if `ticket` is still current and due.
    pub fn fire(&mut self, ticket: DebounceTicket, now: Instant) -> bool {
        if self.is_current(ticket) {
            self.poll(now)
        } else {
            false
        }
    }

    /// Consume the pending fire if it is due, whichever ticket scheduled it.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
