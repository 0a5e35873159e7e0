use serde::Serialize;

/// Index of a relay-driven device, `0..N` with `N` fixed at start-up.
pub type DeviceIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEvent {
    Pressed,
    Released,
}

/// Last accepted environmental readings. `NaN` marks a value that has never
/// been read successfully.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReadings {
    pub temperature: f32,
    pub humidity: f32,
    pub soil_moisture: f32,
}

impl Default for SensorReadings {
    fn default() -> Self {
        Self {
            temperature: f32::NAN,
            humidity: f32::NAN,
            soil_moisture: f32::NAN,
        }
    }
}

/// What every connected client sees. Serialized once per broadcast; `NaN`
/// readings serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSnapshot {
    #[serde(rename = "deviceStates")]
    pub device_states: Vec<bool>,
    pub temperature: f32,
    pub humidity: f32,
    #[serde(rename = "soilMoisture")]
    pub soil_moisture: f32,
}

impl ClientSnapshot {
    pub fn new(device_states: Vec<bool>, readings: SensorReadings) -> Self {
        Self {
            device_states,
            temperature: readings.temperature,
            humidity: readings.humidity,
            soil_moisture: readings.soil_moisture,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
