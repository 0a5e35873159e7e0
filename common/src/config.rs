use serde::{Deserialize, Serialize};

use crate::schedule::Schedule;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub loop_interval_ms: u64,
    pub sensor_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub touch_threshold: i32,
    pub touch_confirm_ms: u64,
    pub touch_max_raw: i32,
    pub button_confirm_ms: u64,
    pub config_hold_ms: u64,
    pub reset_hold_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            loop_interval_ms: 50,
            sensor_interval_ms: 2_000,
            heartbeat_interval_ms: 2_000,
            touch_threshold: 30,
            touch_confirm_ms: 50,
            touch_max_raw: 4_095,
            button_confirm_ms: 50,
            config_hold_ms: 2_000,
            reset_hold_ms: 4_000,
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        self.loop_interval_ms = self.loop_interval_ms.clamp(10, 1_000);
        // DHT11 cannot be read faster than once a second.
        self.sensor_interval_ms = self.sensor_interval_ms.max(1_000);
        self.heartbeat_interval_ms = self.heartbeat_interval_ms.clamp(250, 60_000);
        if self.touch_threshold <= 0 {
            self.touch_threshold = defaults.touch_threshold;
        }
        if self.touch_max_raw <= 0 {
            self.touch_max_raw = defaults.touch_max_raw;
        }
        self.touch_confirm_ms = self.touch_confirm_ms.min(500);
        self.button_confirm_ms = self.button_confirm_ms.min(500);
        if self.config_hold_ms == 0 || self.reset_hold_ms <= self.config_hold_ms {
            self.config_hold_ms = defaults.config_hold_ms;
            self.reset_hold_ms = defaults.reset_hold_ms;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayConfig {
    pub name: String,
    pub pin: i32,
    #[serde(rename = "activeLow", default = "default_true")]
    pub active_low: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TouchConfig {
    pub pin: i32,
    pub device: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ButtonConfig {
    pub pin: i32,
    #[serde(rename = "activeLow", default = "default_true")]
    pub active_low: bool,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            pin: 26,
            active_low: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    #[serde(rename = "wifiSsid")]
    pub wifi_ssid: String,
    #[serde(rename = "wifiPass")]
    pub wifi_pass: String,
    #[serde(rename = "httpPort")]
    pub http_port: u16,
    #[serde(rename = "apSsid")]
    pub ap_ssid: String,
    #[serde(rename = "apPassword")]
    pub ap_password: String,
    #[serde(rename = "portalTimeoutSecs")]
    pub portal_timeout_secs: u64,
    pub hostname: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            http_port: 8080,
            ap_ssid: "GARDEN-CONFIG".to_string(),
            ap_password: "12345678".to_string(),
            portal_timeout_secs: 30,
            hostname: "garden".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn clear_credentials(&mut self) {
        self.wifi_ssid.clear();
        self.wifi_pass.clear();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoginConfig {
    pub username: String,
    pub password: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default = "default_relays")]
    pub devices: Vec<RelayConfig>,
    #[serde(rename = "touchInputs", default = "default_touch_inputs")]
    pub touch_inputs: Vec<TouchConfig>,
    #[serde(rename = "resetButton", default)]
    pub reset_button: ButtonConfig,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub login: LoginConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            devices: default_relays(),
            touch_inputs: default_touch_inputs(),
            reset_button: ButtonConfig::default(),
            schedule: Schedule::default(),
            timezone: default_timezone(),
            network: NetworkConfig::default(),
            login: LoginConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.controller.sanitize();
        if self.devices.is_empty() {
            self.devices = default_relays();
        }
        let device_count = self.devices.len();
        self.touch_inputs.retain(|touch| touch.device < device_count);
        self.schedule.normalize(device_count);
        if self.network.http_port == 0 {
            self.network.http_port = NetworkConfig::default().http_port;
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "America/Sao_Paulo".to_string()
}

fn default_relays() -> Vec<RelayConfig> {
    [18, 19, 23, 5]
        .into_iter()
        .enumerate()
        .map(|(index, pin)| RelayConfig {
            name: format!("Device {}", index + 1),
            pin,
            active_low: true,
        })
        .collect()
}

fn default_touch_inputs() -> Vec<TouchConfig> {
    [13, 12, 14]
        .into_iter()
        .enumerate()
        .map(|(device, pin)| TouchConfig { pin, device })
        .collect()
}
