use crate::prelude::*;
use crate::pi30::session::{DEFAULT_TIMEOUT, SETTLE_DELAY};

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverter: Inverter,

    #[serde(default)]
    pub scheduler: Scheduler,

    #[serde(default)]
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Inverter {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    /// Serial device, eg /dev/ttyUSB0 or COM3
    pub port: String,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_read_timeout")]
    pub read_timeout: Duration,

    #[serde(default = "Config::default_inverter_name")]
    pub name: String,
}
impl Inverter {
    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Longest a full cycle can block on a silent inverter.
    pub fn worst_case_cycle(&self) -> Duration {
        (SETTLE_DELAY + self.read_timeout) * Command::ALL.len() as u32
    }
} // }}}

// Scheduler {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Scheduler {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_interval")]
    pub interval: Duration,
}
impl Default for Scheduler {
    fn default() -> Self {
        Self {
            interval: Config::default_interval(),
        }
    }
}
impl Scheduler {
    pub fn interval(&self) -> Duration {
        self.interval
    }
} // }}}

// HomeAssistant {{{
#[derive(Clone, Debug, Deserialize)]
pub struct HomeAssistant {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_homeassistant_prefix")]
    pub prefix: String,
}
impl Default for HomeAssistant {
    fn default() -> Self {
        Self {
            enabled: Config::default_enabled(),
            prefix: Config::default_mqtt_homeassistant_prefix(),
        }
    }
}
impl HomeAssistant {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_host")]
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub homeassistant: HomeAssistant,

    pub publish_individual: Option<bool>,
}
// no mqtt section at all means no mqtt
impl Default for Mqtt {
    fn default() -> Self {
        Self {
            enabled: false,
            host: Config::default_mqtt_host(),
            port: Config::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Config::default_mqtt_namespace(),
            homeassistant: HomeAssistant::default(),
            publish_individual: None,
        }
    }
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn homeassistant(&self) -> &HomeAssistant {
        &self.homeassistant
    }

    pub fn publish_individual(&self) -> bool {
        self.publish_individual == Some(true)
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn inverter(&self) -> Inverter {
        self.config.lock().unwrap().inverter.clone()
    }

    pub fn scheduler(&self) -> Scheduler {
        self.config.lock().unwrap().scheduler.clone()
    }

    pub fn mqtt(&self) -> Mqtt {
        self.config.lock().unwrap().mqtt.clone()
    }

    pub fn homeassistant_enabled(&self) -> bool {
        let config = self.config.lock().unwrap();
        config.mqtt.enabled && config.mqtt.homeassistant.enabled
    }

    pub fn loglevel(&self) -> String {
        self.config.lock().unwrap().loglevel.clone()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  Inverter:");
        info!("    Name: {}", self.inverter.name);
        info!("    Port: {}", self.inverter.port);
        info!("    Read Timeout: {}s", self.inverter.read_timeout.as_secs());
        info!("  Poll Interval: {}s", self.scheduler.interval.as_secs());

        info!("  MQTT: {}", if self.mqtt.enabled { "enabled" } else { "disabled" });
        if self.mqtt.enabled {
            info!("    Host: {}", self.mqtt.host);
            info!("    Port: {}", self.mqtt.port);
            info!("    Namespace: {}", self.mqtt.namespace);
            info!("    Publish Individual: {}", self.mqtt.publish_individual());
            info!(
                "    Home Assistant: {}",
                if self.mqtt.homeassistant.enabled { "enabled" } else { "disabled" }
            );
        }

        info!("  Log Level: {}", self.loglevel);

        let worst_case = self.inverter.worst_case_cycle();
        if self.scheduler.interval < worst_case {
            warn!(
                "scheduler.interval {}s is shorter than the worst case poll cycle ({}s); slow cycles will delay the next poll",
                self.scheduler.interval.as_secs(),
                worst_case.as_secs_f32()
            );
        }
    }

    fn validate(&self) -> Result<()> {
        if self.inverter.port.is_empty() {
            bail!("inverter.port cannot be empty");
        }
        if self.inverter.read_timeout.is_zero() {
            bail!("inverter.read_timeout must be at least 1 second");
        }
        if self.inverter.name.is_empty() || self.inverter.name.contains('/') {
            bail!("inverter.name must be non-empty and contain no '/'");
        }

        if self.scheduler.interval.is_zero() {
            bail!("scheduler.interval must be at least 1 second");
        }
        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                return Err(anyhow!("config.rs:MQTT host cannot be empty"));
            }
            if self.mqtt.namespace.is_empty() {
                return Err(anyhow!("config.rs:MQTT namespace cannot be empty"));
            }
        }

        Ok(())
    }

    fn default_read_timeout() -> Duration {
        DEFAULT_TIMEOUT
    }

    fn default_interval() -> Duration {
        Duration::from_secs(10)
    }

    fn default_inverter_name() -> String {
        "pi30".to_string()
    }

    fn default_mqtt_host() -> String {
        "localhost".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "pi30".to_string()
    }

    fn default_mqtt_homeassistant_prefix() -> String {
        "homeassistant".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_yaml("inverter:\n  port: /dev/ttyUSB0\n").unwrap();

        assert_eq!(config.inverter.port(), "/dev/ttyUSB0");
        assert_eq!(config.inverter.read_timeout(), Duration::from_secs(3));
        assert_eq!(config.inverter.name(), "pi30");
        assert_eq!(config.scheduler.interval(), Duration::from_secs(10));
        assert!(!config.mqtt.enabled());
        assert_eq!(config.loglevel, "info");
    }

    #[test]
    fn mqtt_section_enables_mqtt() {
        let yaml = "
inverter:
  port: COM3
  read_timeout: 2
scheduler:
  interval: 30
mqtt:
  host: broker.local
  publish_individual: true
  homeassistant:
    prefix: ha
";
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.mqtt.enabled());
        assert_eq!(config.mqtt.host(), "broker.local");
        assert_eq!(config.mqtt.port(), 1883);
        assert_eq!(config.mqtt.namespace(), "pi30");
        assert!(config.mqtt.publish_individual());
        assert!(config.mqtt.homeassistant().enabled());
        assert_eq!(config.mqtt.homeassistant().prefix(), "ha");
        assert_eq!(config.inverter.read_timeout(), Duration::from_secs(2));
        assert_eq!(config.scheduler.interval(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_yaml("inverter:\n  port: ''\n").is_err());
        assert!(Config::from_yaml("inverter:\n  port: /dev/ttyS0\n  read_timeout: 0\n").is_err());
        assert!(Config::from_yaml("inverter:\n  port: /dev/ttyS0\nscheduler:\n  interval: 0\n").is_err());
        assert!(Config::from_yaml("inverter:\n  port: /dev/ttyS0\nmqtt:\n  port: 0\n").is_err());
        assert!(Config::from_yaml("mqtt:\n  host: x\n").is_err());
    }

    #[test]
    fn worst_case_cycle() {
        let config = Config::from_yaml("inverter:\n  port: /dev/ttyUSB0\n").unwrap();
        assert_eq!(config.inverter.worst_case_cycle(), Duration::from_millis(17_500));
    }
}
