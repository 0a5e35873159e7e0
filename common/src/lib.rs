pub mod config;
pub mod debounce;
pub mod devices;
pub mod engine;
pub mod error;
pub mod hal;
pub mod long_press;
pub mod schedule;
pub mod types;

pub use config::{
    ButtonConfig, ControllerConfig, LoginConfig, NetworkConfig, RelayConfig, RuntimeConfig,
    TouchConfig,
};
pub use debounce::{Debouncer, EdgeDetector};
pub use devices::{Device, DeviceStore};
pub use engine::{ControllerEngine, SensorSample, TickInputs, TickOutcome};
pub use error::ControlError;
pub use long_press::{LongPress, PressAction, PressPhase};
pub use schedule::{
    evaluate, DayOfWeek, Schedule, ScheduleReconciler, ScheduleTransition, ScheduleWindow,
    WeekdayMask,
};
pub use types::{ClientSnapshot, DeviceIndex, EdgeEvent, SensorReadings};
