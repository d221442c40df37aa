use serde::Serialize;
use std::ops::RangeInclusive;

/// Physical envelope of each process value. Writes outside are clamped.
pub const TANK_LEVEL_RANGE: RangeInclusive<f64> = 0.0..=100.0;
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = -40.0..=200.0;
pub const PRESSURE_RANGE: RangeInclusive<f64> = 0.0..=10.0;
pub const MOTOR_SPEED_RANGE: RangeInclusive<i32> = 0..=3000;

/// Latest known process state.
///
/// Fields are private: every write goes through a clamping setter, so a
/// snapshot never holds a value outside its physical envelope. Non-finite
/// inputs are rejected and the previous value is kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    tank_level_pct: f64,
    temperature_c: f64,
    pressure_bar: f64,
    motor_speed_rpm: i32,
    running: bool,
}

impl ProcessSnapshot {
    pub fn new(
        tank_level_pct: f64,
        temperature_c: f64,
        pressure_bar: f64,
        motor_speed_rpm: i32,
        running: bool,
    ) -> Self {
        let mut snapshot = Self::default();
        snapshot.set_tank_level(tank_level_pct);
        snapshot.set_temperature(temperature_c);
        snapshot.set_pressure(pressure_bar);
        snapshot.set_motor_speed(motor_speed_rpm);
        snapshot.set_running(running);
        snapshot
    }

    pub fn tank_level(&self) -> f64 {
        self.tank_level_pct
    }

    pub fn temperature(&self) -> f64 {
        self.temperature_c
    }

    pub fn pressure(&self) -> f64 {
        self.pressure_bar
    }

    pub fn motor_speed(&self) -> i32 {
        self.motor_speed_rpm
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_tank_level(&mut self, pct: f64) {
        self.tank_level_pct = clamp_finite(self.tank_level_pct, pct, &TANK_LEVEL_RANGE);
    }

    pub fn set_temperature(&mut self, celsius: f64) {
        self.temperature_c = clamp_finite(self.temperature_c, celsius, &TEMPERATURE_RANGE);
    }

    pub fn set_pressure(&mut self, bar: f64) {
        self.pressure_bar = clamp_finite(self.pressure_bar, bar, &PRESSURE_RANGE);
    }

    pub fn set_motor_speed(&mut self, rpm: i32) {
        self.motor_speed_rpm = rpm.clamp(*MOTOR_SPEED_RANGE.start(), *MOTOR_SPEED_RANGE.end());
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn with_running(mut self, running: bool) -> Self {
        self.set_running(running);
        self
    }
}

impl Default for ProcessSnapshot {
    fn default() -> Self {
        Self {
            tank_level_pct: 65.0,
            temperature_c: 45.2,
            pressure_bar: 2.4,
            motor_speed_rpm: 1450,
            running: false,
        }
    }
}

fn clamp_finite(current: f64, value: f64, range: &RangeInclusive<f64>) -> f64 {
    if value.is_finite() {
        value.clamp(*range.start(), *range.end())
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_plant_start_values() {
        let snapshot = ProcessSnapshot::default();
        assert_eq!(snapshot.tank_level(), 65.0);
        assert_eq!(snapshot.temperature(), 45.2);
        assert_eq!(snapshot.pressure(), 2.4);
        assert_eq!(snapshot.motor_speed(), 1450);
        assert!(!snapshot.is_running());
    }

    #[test]
    fn setters_clamp_to_physical_envelope() {
        let snapshot = ProcessSnapshot::new(140.0, -90.0, 12.5, -30, true);
        assert_eq!(snapshot.tank_level(), 100.0);
        assert_eq!(snapshot.temperature(), -40.0);
        assert_eq!(snapshot.pressure(), 10.0);
        assert_eq!(snapshot.motor_speed(), 0);
        assert!(snapshot.is_running());
    }

    #[test]
    fn non_finite_writes_keep_previous_value() {
        let mut snapshot = ProcessSnapshot::default();
        snapshot.set_tank_level(f64::NAN);
        snapshot.set_temperature(f64::INFINITY);
        snapshot.set_pressure(f64::NEG_INFINITY);
        assert_eq!(snapshot, ProcessSnapshot::default());
    }

    #[test]
    fn serializes_with_unit_suffixed_keys() {
        let json = serde_json::to_value(ProcessSnapshot::default()).unwrap();
        assert_eq!(json["tank_level_pct"], 65.0);
        assert_eq!(json["motor_speed_rpm"], 1450);
        assert_eq!(json["running"], false);
    }
}
