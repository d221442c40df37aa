/// Where a tag lives on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    InputRegister,
    Coil,
}

#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub key: &'static str,
    pub metric: &'static str,
    pub area: Area,
    pub address: u16,
    /// Raw register value = engineering value * scale.
    pub scale: f64,
}

impl Tag {
    /// Engineering value of a raw register. Registers are read as signed.
    pub fn decode(&self, raw: u16) -> f64 {
        f64::from(raw as i16) / self.scale
    }

    pub fn is_writable(&self) -> bool {
        self.area == Area::Coil
    }
}

pub const TANK_LEVEL_PCT: Tag = Tag {
    key: "tank_level_pct",
    metric: "plcmon_tank_level_percent",
    area: Area::InputRegister,
    address: 0,
    scale: 10.0,
};

pub const TEMPERATURE_C: Tag = Tag {
    key: "temperature_c",
    metric: "plcmon_temperature_celsius",
    area: Area::InputRegister,
    address: 1,
    scale: 10.0,
};

pub const PRESSURE_BAR: Tag = Tag {
    key: "pressure_bar",
    metric: "plcmon_pressure_bar",
    area: Area::InputRegister,
    address: 2,
    scale: 100.0,
};

pub const MOTOR_SPEED_RPM: Tag = Tag {
    key: "motor_speed_rpm",
    metric: "plcmon_motor_speed_rpm",
    area: Area::InputRegister,
    address: 3,
    scale: 1.0,
};

pub const SYSTEM_RUNNING: Tag = Tag {
    key: "system_running",
    metric: "plcmon_system_running",
    area: Area::Coil,
    address: 0,
    scale: 1.0,
};

/// Input registers in address order, starting at `TANK_LEVEL_PCT.address`.
pub const INPUT_REGISTERS: &[Tag] = &[TANK_LEVEL_PCT, TEMPERATURE_C, PRESSURE_BAR, MOTOR_SPEED_RPM];

pub const ALL: &[Tag] = &[
    TANK_LEVEL_PCT,
    TEMPERATURE_C,
    PRESSURE_BAR,
    MOTOR_SPEED_RPM,
    SYSTEM_RUNNING,
];

pub fn lookup(key: &str) -> Option<&'static Tag> {
    ALL.iter().find(|tag| tag.key == key)
}
