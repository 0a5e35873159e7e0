//! Boundary traits for the hardware and network collaborators.
//!
//! The control core only ever reads inputs and writes outputs through these
//! traits; pin setup, sensor calibration and Wi-Fi provisioning live behind
//! them.

/// Write-only digital output driving a relay coil.
pub trait DigitalOutput: Send {
    fn write(&mut self, high: bool);
}

/// Digital input level, as wired (no active-low inversion applied).
pub trait DigitalInput: Send {
    fn is_high(&mut self) -> bool;
}

/// Raw analog or capacitive-touch reading.
pub trait AnalogInput: Send {
    fn read(&mut self) -> i32;
}

/// Environmental sensors. Readings may be `NaN` on a sensor fault.
pub trait SensorSource: Send {
    fn read_temperature_humidity(&mut self) -> (f32, f32);
    fn read_soil_moisture_percent(&mut self) -> f32;
}

/// Network provisioning collaborator. `reset_credentials_and_restart` is not
/// expected to return on real hardware.
pub trait Provisioner: Send {
    fn enter_config_portal(&mut self);
    fn reset_credentials_and_restart(&mut self);
}
