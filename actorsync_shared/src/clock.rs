//! Fixed-timestep clock.
//!
//! The owner polls `tick`/`next_step` with the current time as often as it
//! likes; the clock runs exactly one step per elapsed interval. A late poll
//! runs the missed steps back to back, so simulation time always advances in
//! whole intervals regardless of timer jitter.

use tokio::time::Instant;

/// Milliseconds on a caller-chosen monotonic timeline.
pub type Millis = u64;

#[derive(Debug, Clone)]
pub struct SimClock {
    interval_ms: Millis,
    last_sim_time: Millis,
    wall_time: Millis,
    running: bool,
    steps: u64,
}

impl SimClock {
    pub fn new(interval_ms: Millis) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            last_sim_time: 0,
            wall_time: 0,
            running: false,
            steps: 0,
        }
    }

    /// Records the initial time and starts stepping.
    pub fn start(&mut self, now: Millis) {
        self.last_sim_time = now;
        self.wall_time = now;
        self.running = true;
    }

    /// Stops stepping. Calling it again has no effect.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn interval_ms(&self) -> Millis {
        self.interval_ms
    }

    /// Wall time passed to the most recent poll.
    pub fn now(&self) -> Millis {
        self.wall_time
    }

    /// Simulation time of the next step to run.
    pub fn sim_time(&self) -> Millis {
        self.last_sim_time
    }

    /// Total steps executed since construction.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Returns the simulation time of the next due step and consumes it, or
    /// `None` once the clock has caught up with `now`.
    pub fn next_step(&mut self, now: Millis) -> Option<Millis> {
        if !self.running {
            return None;
        }
        self.wall_time = now;
        if self.last_sim_time <= now {
            let t = self.last_sim_time;
            self.last_sim_time += self.interval_ms;
            self.steps += 1;
            Some(t)
        } else {
            None
        }
    }

    /// Runs every due step and returns how many ran.
    pub fn tick(&mut self, now: Millis, mut step: impl FnMut(Millis)) -> u32 {
        let mut n = 0;
        while let Some(t) = self.next_step(now) {
            step(t);
            n += 1;
        }
        n
    }
}

/// Monotonic millisecond source for the drivers.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> Millis {
        self.epoch.elapsed().as_millis() as Millis
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
