use crate::commandline::CliArgs;
use anyhow::{Context, Result};
use classic_mqtt_lib::protocol::DEFAULT_UNIT_ID;
use classic_mqtt_lib::scheduler::{
    RateSettings, AWAKE_INTERVAL_DEFAULT_SECS, AWAKE_PUBLISH_LIMIT_DEFAULT,
    SNOOZE_INTERVAL_DEFAULT_SECS,
};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassicConfig {
    #[serde(default = "default_classic_host")]
    pub host: String,
    #[serde(default = "default_classic_port")]
    pub port: u16,
    /// Topic segment identifying this controller.
    #[serde(default = "default_classic_name")]
    pub name: String,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_classic_host() -> String {
    String::from("ClassicHost")
}

fn default_classic_port() -> u16 {
    502
}

fn default_classic_name() -> String {
    String::from("classic")
}

fn default_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ClassicConfig {
    fn default() -> Self {
        Self {
            host: default_classic_host(),
            port: default_classic_port(),
            name: default_classic_name(),
            unit_id: default_unit_id(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_root")]
    pub root: String,
    #[serde(default = "default_mqtt_user")]
    pub user: String,
    #[serde(default = "default_mqtt_password")]
    pub password: String,
    /// Quality of service code to use
    #[serde(default = "default_qos")]
    qos: u8,
}

fn default_mqtt_host() -> String {
    String::from("127.0.0.1")
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_root() -> String {
    String::from("ClassicMQTT")
}

fn default_mqtt_user() -> String {
    String::from("username")
}

fn default_mqtt_password() -> String {
    String::from("password")
}

fn default_qos() -> u8 {
    0
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            root: default_mqtt_root(),
            user: default_mqtt_user(),
            password: default_mqtt_password(),
            qos: default_qos(),
        }
    }
}

impl MqttConfig {
    /// QoS clamped to the valid range 0..=2.
    pub fn qos(&self) -> i32 {
        self.qos.min(2) as i32
    }

    pub fn url(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RatesConfig {
    #[serde(default = "default_awake_publish_rate", with = "humantime_serde")]
    pub awake_publish_rate: Duration,
    #[serde(default = "default_snooze_publish_rate", with = "humantime_serde")]
    pub snooze_publish_rate: Duration,
    #[serde(default = "default_awake_publish_limit")]
    pub awake_publish_limit: u32,
}

fn default_awake_publish_rate() -> Duration {
    Duration::from_secs(AWAKE_INTERVAL_DEFAULT_SECS.into())
}

fn default_snooze_publish_rate() -> Duration {
    Duration::from_secs(SNOOZE_INTERVAL_DEFAULT_SECS.into())
}

fn default_awake_publish_limit() -> u32 {
    AWAKE_PUBLISH_LIMIT_DEFAULT
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            awake_publish_rate: default_awake_publish_rate(),
            snooze_publish_rate: default_snooze_publish_rate(),
            awake_publish_limit: default_awake_publish_limit(),
        }
    }
}

impl RatesConfig {
    /// Rounds to the nearest second and checks the bounds.
    pub fn to_settings(&self) -> Result<RateSettings> {
        let secs = |rate: Duration| {
            u32::try_from(rate.as_millis().saturating_add(500) / 1000).unwrap_or(u32::MAX)
        };
        let settings = RateSettings {
            awake_interval_secs: secs(self.awake_publish_rate),
            snooze_interval_secs: secs(self.snooze_publish_rate),
            awake_publish_limit: self.awake_publish_limit,
        };
        settings
            .validate()
            .with_context(|| "Invalid publish rate configuration")?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub classic: ClassicConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub rates: RatesConfig,
}

impl Config {
    pub const DEFAULT_CONFIG_FILE: &'static str = "classic_mqtt.yml";

    /// Reads the YAML file if given, otherwise starts from the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                log::debug!("Loading config file from {path:?}");
                let file = File::open(path)
                    .with_context(|| format!("Cannot open config file {path:?}"))?;
                serde_yaml::from_reader(file)
                    .with_context(|| format!("Cannot parse config file {path:?}"))
            }
            None => {
                let default_file = Path::new(Self::DEFAULT_CONFIG_FILE);
                if default_file.exists() {
                    Self::load(Some(default_file))
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Applies command line and environment values on top of the file.
    pub fn apply_args(&mut self, args: &CliArgs) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        set(&mut self.classic.host, &args.classic);
        set(&mut self.classic.port, &args.classic_port);
        set(&mut self.classic.name, &args.classic_name);
        set(&mut self.classic.unit_id, &args.classic_unit_id);
        set(&mut self.classic.timeout, &args.timeout);
        set(&mut self.mqtt.host, &args.mqtt);
        set(&mut self.mqtt.port, &args.mqtt_port);
        set(&mut self.mqtt.root, &args.mqtt_root);
        set(&mut self.mqtt.user, &args.user);
        set(&mut self.mqtt.password, &args.password);
        set(&mut self.rates.awake_publish_rate, &args.awake_publish_rate);
        set(&mut self.rates.snooze_publish_rate, &args.snooze_publish_rate);
        set(&mut self.rates.awake_publish_limit, &args.awake_publish_limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn yaml_with_defaults() {
        let config: Config = serde_yaml::from_str(
            "classic:\n  host: 192.168.0.225\nmqtt:\n  root: solar\nrates:\n  snooze_publish_rate: 10m\n",
        )
        .unwrap();
        assert_eq!(config.classic.host, "192.168.0.225");
        assert_eq!(config.classic.port, 502);
        assert_eq!(config.classic.unit_id, 10);
        assert_eq!(config.mqtt.root, "solar");
        assert_eq!(config.mqtt.url(), "tcp://127.0.0.1:1883");
        assert_eq!(config.rates.snooze_publish_rate, Duration::from_secs(600));
        let settings = config.rates.to_settings().unwrap();
        assert_eq!(settings.awake_interval_secs, 5);
        assert_eq!(settings.snooze_interval_secs, 600);
    }

    #[test]
    fn arguments_override_file() {
        let mut config = Config::default();
        let args = CliArgs::parse_from([
            "classic_mqtt",
            "--classic",
            "10.0.0.2",
            "--mqtt-root",
            "Home",
            "--awake-publish-rate",
            "2s",
            "--classic-unit-id",
            "0x0b",
        ]);
        config.apply_args(&args);
        assert_eq!(config.classic.host, "10.0.0.2");
        assert_eq!(config.classic.unit_id, 11);
        assert_eq!(config.mqtt.root, "Home");
        assert_eq!(config.mqtt.user, "username");
        assert_eq!(config.rates.awake_publish_rate, Duration::from_secs(2));
    }

    #[test]
    fn rates_round_to_nearest_second() {
        let rates = RatesConfig {
            awake_publish_rate: Duration::from_millis(2900),
            ..Default::default()
        };
        assert_eq!(rates.to_settings().unwrap().awake_interval_secs, 3);
        let rates = RatesConfig {
            awake_publish_rate: Duration::from_millis(1500),
            ..Default::default()
        };
        assert_eq!(rates.to_settings().unwrap().awake_interval_secs, 2);
    }

    #[test]
    fn out_of_range_rates_are_rejected() {
        let rates = RatesConfig {
            awake_publish_rate: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(rates.to_settings().is_err());
        let rates = RatesConfig {
            awake_publish_rate: Duration::from_millis(1400),
            ..Default::default()
        };
        assert!(rates.to_settings().is_err());
        let rates = RatesConfig {
            awake_publish_limit: 3,
            ..Default::default()
        };
        assert!(rates.to_settings().is_err());
    }
}
