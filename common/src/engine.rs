use chrono::{DateTime, FixedOffset};

use crate::{
    config::ControllerConfig,
    debounce::{Debouncer, EdgeDetector},
    devices::DeviceStore,
    error::ControlError,
    long_press::{LongPress, PressAction, PressPhase},
    schedule::{Schedule, ScheduleReconciler, ScheduleTransition},
    types::{ClientSnapshot, DeviceIndex, EdgeEvent, SensorReadings},
};

/// Raw sensor values as returned by the drivers, before validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub temperature: f32,
    pub humidity: f32,
    pub soil_moisture: f32,
}

/// Everything sampled from the hardware for one control-loop iteration.
#[derive(Debug, Clone, Default)]
pub struct TickInputs {
    pub now_ms: u64,
    /// One raw reading per touch input, in input order.
    pub touch: Vec<i32>,
    /// Reset button pin level as wired.
    pub reset_level_high: bool,
    pub sensors: Option<SensorSample>,
    /// Local wall-clock time, `None` while time is not known.
    pub wall_clock: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// A device changed state; clients need a fresh snapshot.
    pub changed: bool,
    pub toggled: Vec<(DeviceIndex, bool)>,
    pub press_action: Option<PressAction>,
    pub schedule: Option<ScheduleTransition>,
    pub sensors_updated: bool,
    pub faults: Vec<ControlError>,
    pub sensor_faults: Vec<&'static str>,
}

/// One cooperative control loop over the device store.
///
/// `tick` runs the steps in a fixed order: touch inputs, edges applied to the
/// store, reset button, sensors, schedule. Remote toggles go through
/// [`ControllerEngine::toggle`] and land in the same store.
#[derive(Debug)]
pub struct ControllerEngine {
    pub config: ControllerConfig,
    store: DeviceStore,
    debouncer: Debouncer,
    touch_targets: Vec<DeviceIndex>,
    reset_edge: EdgeDetector,
    reset_active_low: bool,
    long_press: LongPress,
    readings: SensorReadings,
    last_sensor_read_ms: Option<u64>,
    schedule: Schedule,
    reconciler: ScheduleReconciler,
}

impl ControllerEngine {
    pub fn new(
        config: ControllerConfig,
        store: DeviceStore,
        touch_targets: Vec<DeviceIndex>,
        reset_active_low: bool,
        mut schedule: Schedule,
    ) -> Self {
        schedule.normalize(store.len());
        Self {
            debouncer: Debouncer::new(
                touch_targets.len(),
                config.touch_threshold,
                config.touch_max_raw,
                config.touch_confirm_ms,
            ),
            reset_edge: EdgeDetector::new(config.button_confirm_ms),
            long_press: LongPress::new(config.config_hold_ms, config.reset_hold_ms),
            config,
            store,
            touch_targets,
            reset_active_low,
            readings: SensorReadings::default(),
            last_sensor_read_ms: None,
            schedule,
            reconciler: ScheduleReconciler::new(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.store.len()
    }

    pub fn device_name(&self, index: DeviceIndex) -> Option<&str> {
        self.store.name(index)
    }

    pub fn readings(&self) -> SensorReadings {
        self.readings
    }

    pub fn press_phase(&self) -> PressPhase {
        self.long_press.phase()
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Replaces the schedule as a whole. The new window is applied on the
    /// next tick even if the desired state did not change.
    pub fn set_schedule(&mut self, mut schedule: Schedule) {
        schedule.normalize(self.store.len());
        self.schedule = schedule;
        self.reconciler.reset();
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.store.snapshot(self.readings)
    }

    pub fn toggle(&mut self, index: DeviceIndex) -> Result<bool, ControlError> {
        self.store.toggle(index)
    }

    pub fn sensors_due(&self, now_ms: u64) -> bool {
        self.last_sensor_read_ms
            .map(|last| now_ms.saturating_sub(last) >= self.config.sensor_interval_ms)
            .unwrap_or(true)
    }

    /// Accepts the valid parts of a sensor sample and keeps the last known
    /// value for anything out of range. Returns the names of rejected fields.
    pub fn update_sensor_data(&mut self, sample: SensorSample, now_ms: u64) -> Vec<&'static str> {
        self.last_sensor_read_ms = Some(now_ms);
        let mut faults = Vec::new();

        if is_plausible(sample.temperature, -40.0, 80.0) {
            self.readings.temperature = sample.temperature;
        } else {
            faults.push("temperature");
        }
        if is_plausible(sample.humidity, 0.0, 100.0) {
            self.readings.humidity = sample.humidity;
        } else {
            faults.push("humidity");
        }
        if is_plausible(sample.soil_moisture, 0.0, 100.0) {
            self.readings.soil_moisture = sample.soil_moisture;
        } else {
            faults.push("soilMoisture");
        }

        faults
    }

    pub fn tick(&mut self, inputs: &TickInputs) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let now_ms = inputs.now_ms;

        // Touch edges, applied straight to the store.
        for (input, raw) in inputs.touch.iter().enumerate() {
            match self.debouncer.sample(input, *raw, now_ms) {
                Ok(Some(EdgeEvent::Pressed)) => {
                    let Some(&device) = self.touch_targets.get(input) else {
                        continue;
                    };
                    match self.store.toggle(device) {
                        Ok(state) => {
                            outcome.changed = true;
                            outcome.toggled.push((device, state));
                        }
                        Err(err) => outcome.faults.push(err),
                    }
                }
                Ok(Some(EdgeEvent::Released)) | Ok(None) => {}
                Err(err) => outcome.faults.push(err),
            }
        }

        // Reset button.
        let held = inputs.reset_level_high != self.reset_active_low;
        self.reset_edge.update(held, now_ms);
        outcome.press_action = self.long_press.poll(self.reset_edge.is_pressed(), now_ms);

        if let Some(sample) = inputs.sensors {
            outcome.sensor_faults = self.update_sensor_data(sample, now_ms);
            outcome.sensors_updated = true;
        }

        if let Some(now) = inputs.wall_clock.as_ref() {
            outcome.schedule = self
                .reconciler
                .reconcile(now, &self.schedule, &mut self.store);
            if let Some(transition) = outcome.schedule {
                outcome.changed |= transition.changed;
            }
        }

        outcome
    }
}

fn is_plausible(value: f32, min: f32, max: f32) -> bool {
    value.is_finite() && (min..=max).contains(&value)
}
