//! Interpolation.
//!
//! The server sends positions at tick boundaries together with a per-tick
//! velocity. Between updates the client dead-reckons: every render substep
//! moves each mirror by `velocity / steps`.

use actorsync_shared::clock::Millis;

use crate::mirror::MirrorActor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interpolator {
    steps: u32,
}

impl Interpolator {
    /// `floor(tick / substep) - 1` substeps per tick, at least one.
    pub fn from_intervals(tick_interval_ms: Millis, substep_ms: Millis) -> Self {
        let per_tick = tick_interval_ms / substep_ms.max(1);
        let steps = per_tick.saturating_sub(1).max(1);
        Self {
            steps: u32::try_from(steps).unwrap_or(u32::MAX),
        }
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn advance(&self, actor: &mut MirrorActor) {
        let n = f64::from(self.steps);
        actor.x += actor.mx / n;
        actor.y += actor.my / n;
    }
}

impl Default for Interpolator {
    fn default() -> Self {
        Self { steps: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_from_intervals() {
        assert_eq!(Interpolator::from_intervals(50, 10).steps(), 4);
        assert_eq!(Interpolator::from_intervals(100, 10).steps(), 9);
        assert_eq!(Interpolator::from_intervals(15, 10).steps(), 1);
        assert_eq!(Interpolator::from_intervals(10, 10).steps(), 1);
    }
}
