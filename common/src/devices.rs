//! Authoritative on/off state for every relay-driven device.
//!
//! The store is the only writer of relay pins. Each pin is a write-only
//! mirror of `output_state`; it is never read back.

use crate::{
    error::ControlError,
    hal::DigitalOutput,
    types::{ClientSnapshot, DeviceIndex, SensorReadings},
};

pub struct Device {
    pub name: String,
    output_state: bool,
    active_low: bool,
    pin: Box<dyn DigitalOutput>,
}

impl Device {
    pub fn new(name: impl Into<String>, active_low: bool, pin: Box<dyn DigitalOutput>) -> Self {
        Self {
            name: name.into(),
            output_state: false,
            active_low,
            pin,
        }
    }

    pub fn is_on(&self) -> bool {
        self.output_state
    }

    fn assert_pin(&mut self) {
        // Energized relay on an active-low board means the pin is driven low.
        self.pin.write(self.output_state != self.active_low);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("output_state", &self.output_state)
            .field("active_low", &self.active_low)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct DeviceStore {
    devices: Vec<Device>,
}

impl DeviceStore {
    /// Takes ownership of the devices and drives every pin to "off".
    pub fn new(mut devices: Vec<Device>) -> Self {
        for device in &mut devices {
            device.output_state = false;
            device.assert_pin();
        }
        Self { devices }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: DeviceIndex) -> Result<bool, ControlError> {
        self.device(index).map(Device::is_on)
    }

    pub fn name(&self, index: DeviceIndex) -> Option<&str> {
        self.devices.get(index).map(|device| device.name.as_str())
    }

    /// Flips the device and returns its new state.
    pub fn toggle(&mut self, index: DeviceIndex) -> Result<bool, ControlError> {
        let device = self.device_mut(index)?;
        device.output_state = !device.output_state;
        device.assert_pin();
        Ok(device.output_state)
    }

    /// Sets the device state and re-asserts the pin. Returns whether the
    /// state actually changed.
    pub fn set_state(&mut self, index: DeviceIndex, on: bool) -> Result<bool, ControlError> {
        let device = self.device_mut(index)?;
        let changed = device.output_state != on;
        device.output_state = on;
        device.assert_pin();
        Ok(changed)
    }

    pub fn states(&self) -> Vec<bool> {
        self.devices.iter().map(Device::is_on).collect()
    }

    pub fn snapshot(&self, readings: SensorReadings) -> ClientSnapshot {
        ClientSnapshot::new(self.states(), readings)
    }

    fn device(&self, index: DeviceIndex) -> Result<&Device, ControlError> {
        let count = self.devices.len();
        self.devices
            .get(index)
            .ok_or(ControlError::InvalidIndex { index, count })
    }

    fn device_mut(&mut self, index: DeviceIndex) -> Result<&mut Device, ControlError> {
        let count = self.devices.len();
        self.devices
            .get_mut(index)
            .ok_or(ControlError::InvalidIndex { index, count })
    }
}
