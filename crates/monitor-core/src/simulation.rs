use crate::snapshot::ProcessSnapshot;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random-walk band for one analog value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkBand {
    /// Largest change per tick, in either direction.
    pub step: f64,
    pub min: f64,
    pub max: f64,
}

impl WalkBand {
    fn walk<R: Rng>(&self, rng: &mut R, value: f64) -> f64 {
        let step = self.step.abs();
        (value + rng.gen_range(-step..=step)).clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationProfile {
    pub tank_level: WalkBand,
    pub temperature: WalkBand,
    pub pressure: WalkBand,
    pub motor_step_rpm: i32,
    pub motor_min_rpm: i32,
    pub motor_max_rpm: i32,
    /// Speed lost per tick while stopped.
    pub coast_down_rpm: i32,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            tank_level: WalkBand {
                step: 1.0,
                min: 0.0,
                max: 100.0,
            },
            temperature: WalkBand {
                step: 0.3,
                min: 20.0,
                max: 90.0,
            },
            pressure: WalkBand {
                step: 0.05,
                min: 0.0,
                max: 6.0,
            },
            motor_step_rpm: 20,
            motor_min_rpm: 1000,
            motor_max_rpm: 2000,
            coast_down_rpm: 50,
        }
    }
}

/// Produces the next plausible reading from the previous one.
///
/// While running every value takes a bounded random step inside its band;
/// the motor jumps into its band at once. While stopped the analog values
/// hold and the motor coasts down linearly to zero.
#[derive(Debug, Clone)]
pub struct Simulator<R: Rng = StdRng> {
    rng: R,
    profile: SimulationProfile,
}

impl Simulator<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy(), SimulationProfile::default())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), SimulationProfile::default())
    }
}

impl Default for Simulator<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> Simulator<R> {
    pub fn with_rng(rng: R, profile: SimulationProfile) -> Self {
        Self { rng, profile }
    }

    pub fn profile(&self) -> &SimulationProfile {
        &self.profile
    }

    pub fn step(&mut self, previous: &ProcessSnapshot) -> ProcessSnapshot {
        let profile = &self.profile;
        let mut next = *previous;

        if previous.is_running() {
            next.set_tank_level(profile.tank_level.walk(&mut self.rng, previous.tank_level()));
            next.set_temperature(profile.temperature.walk(&mut self.rng, previous.temperature()));
            next.set_pressure(profile.pressure.walk(&mut self.rng, previous.pressure()));

            let step = profile.motor_step_rpm.abs();
            let speed = previous.motor_speed() + self.rng.gen_range(-step..=step);
            next.set_motor_speed(speed.clamp(profile.motor_min_rpm, profile.motor_max_rpm));
        } else {
            let speed = previous.motor_speed() - profile.coast_down_rpm.abs();
            next.set_motor_speed(speed.max(0));
        }

        next
    }
}
