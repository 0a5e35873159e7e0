//! Simulated board for host builds.
//!
//! Hardware integration point: on the target these are the relay GPIOs, the
//! capacitive touch pads, the reset button and the DHT/soil sensor drivers.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use garden_common::{
    hal::{AnalogInput, DigitalInput, DigitalOutput, SensorSource},
    Device, RuntimeConfig, SensorSample,
};
use tracing::debug;

const TOUCH_IDLE_RAW: i32 = 120;
const TOUCH_PRESS_DROP: i32 = 60;
const SOIL_RAW_DRY: i32 = 1023;
const SOIL_RAW_WET: i32 = 0;

pub struct LoggedRelay {
    name: String,
    pin: i32,
}

impl DigitalOutput for LoggedRelay {
    fn write(&mut self, high: bool) {
        debug!(relay = %self.name, pin = self.pin, high, "relay write");
    }
}

/// Finger state for every simulated pad, shared with the HTTP sim endpoint.
#[derive(Clone)]
pub struct SimTouchPanel {
    pads: Arc<Vec<AtomicBool>>,
}

impl SimTouchPanel {
    pub fn new(pads: usize) -> Self {
        Self {
            pads: Arc::new((0..pads).map(|_| AtomicBool::new(false)).collect()),
        }
    }

    /// Returns `false` when there is no pad at `index`.
    pub fn set(&self, index: usize, touched: bool) -> bool {
        match self.pads.get(index) {
            Some(pad) => {
                pad.store(touched, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn is_touched(&self, index: usize) -> bool {
        self.pads
            .get(index)
            .is_some_and(|pad| pad.load(Ordering::Relaxed))
    }
}

/// Touch pad hovering around its idle reading with a little jitter. A touch
/// pulls the reading well below the idle level.
pub struct SimTouchPad {
    tick: u32,
    index: usize,
    panel: SimTouchPanel,
}

impl AnalogInput for SimTouchPad {
    fn read(&mut self) -> i32 {
        self.tick = self.tick.wrapping_add(1);
        let jitter = (self.tick % 5) as i32 - 2;
        if self.panel.is_touched(self.index) {
            TOUCH_IDLE_RAW - TOUCH_PRESS_DROP + jitter
        } else {
            TOUCH_IDLE_RAW + jitter
        }
    }
}

/// Pulled-up reset button; `press()` holds it low until `release()`.
#[derive(Clone, Default)]
pub struct SimButton {
    pressed: Arc<AtomicBool>,
}

impl SimButton {
    pub fn press(&self) {
        self.pressed.store(true, Ordering::Relaxed);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::Relaxed);
    }
}

impl DigitalInput for SimButton {
    fn is_high(&mut self) -> bool {
        !self.pressed.load(Ordering::Relaxed)
    }
}

pub struct SimSensors {
    tick: u64,
}

impl SensorSource for SimSensors {
    fn read_temperature_humidity(&mut self) -> (f32, f32) {
        self.tick = self.tick.saturating_add(1);
        // Every 20th read fails the way a DHT11 checksum error does.
        if self.tick % 20 == 0 {
            return (f32::NAN, f32::NAN);
        }
        let temperature = 24.0 + (self.tick % 8) as f32 * 0.25;
        let humidity = 55.0 + (self.tick % 6) as f32 * 0.5;
        (temperature, humidity)
    }

    fn read_soil_moisture_percent(&mut self) -> f32 {
        let raw = 600 + (self.tick % 10) as i32 * 4;
        soil_percent(raw)
    }
}

/// Linear map of the soil probe reading: dry (1023) is 0 %, wet (0) is 100 %.
pub fn soil_percent(raw: i32) -> f32 {
    let raw = raw.clamp(SOIL_RAW_WET, SOIL_RAW_DRY);
    (SOIL_RAW_DRY - raw) as f32 * 100.0 / (SOIL_RAW_DRY - SOIL_RAW_WET) as f32
}

pub struct SimBoard {
    pub touch: Vec<Box<dyn AnalogInput>>,
    pub reset_button: Box<dyn DigitalInput>,
    pub sensors: Box<dyn SensorSource>,
}

impl SimBoard {
    /// Builds the input side of the board plus one relay device per
    /// configured output.
    pub fn new(
        runtime: &RuntimeConfig,
        button: SimButton,
        panel: SimTouchPanel,
    ) -> (Self, Vec<Device>) {
        let devices = runtime
            .devices
            .iter()
            .map(|relay| {
                let pin = LoggedRelay {
                    name: relay.name.clone(),
                    pin: relay.pin,
                };
                Device::new(relay.name.clone(), relay.active_low, Box::new(pin))
            })
            .collect();

        let touch = runtime
            .touch_inputs
            .iter()
            .enumerate()
            .map(|(index, _)| {
                Box::new(SimTouchPad {
                    tick: 0,
                    index,
                    panel: panel.clone(),
                }) as Box<dyn AnalogInput>
            })
            .collect();

        let board = Self {
            touch,
            reset_button: Box::new(button),
            sensors: Box::new(SimSensors { tick: 0 }),
        };
        (board, devices)
    }

    pub fn read_touch(&mut self) -> Vec<i32> {
        self.touch.iter_mut().map(|pad| pad.read()).collect()
    }

    pub fn reset_level_high(&mut self) -> bool {
        self.reset_button.is_high()
    }

    pub fn read_sensors(&mut self) -> SensorSample {
        let (temperature, humidity) = self.sensors.read_temperature_humidity();
        SensorSample {
            temperature,
            humidity,
            soil_moisture: self.sensors.read_soil_moisture_percent(),
        }
    }
}
