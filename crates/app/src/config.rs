//! TOML config file loading and validation for the backend profiles.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

use crate::registry::ProfileId;
use crate::store::MqttTarget;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub profiles: Vec<ProfileEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Mqtt,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default = "default_host")]
    pub mqtt_host: String,
    #[serde(default = "default_port")]
    pub mqtt_port: u16,
    pub topic_prefix: String,
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    1883
}

impl ProfileEntry {
    /// Only meaningful once the config has been validated.
    pub fn profile_id(&self) -> Option<ProfileId> {
        self.id.parse().ok()
    }

    pub fn mqtt_target(&self) -> MqttTarget {
        MqttTarget {
            client_id: format!("shrimptech-{}", self.id),
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            topic_prefix: self.topic_prefix.clone(),
        }
    }
}

impl Default for Config {
    /// Both profiles on the in-process store.
    fn default() -> Self {
        let entry = |id: ProfileId, name: &str, prefix: &str| ProfileEntry {
            id: id.as_str().into(),
            name: name.into(),
            transport: Transport::Memory,
            mqtt_host: default_host(),
            mqtt_port: default_port(),
            topic_prefix: prefix.into(),
        };
        Self {
            profiles: vec![
                entry(ProfileId::IotDemo, "IoT System Demo", "iot-demo"),
                entry(ProfileId::Nckh, "NCKH", "nckh"),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    pub fn profile(&self, id: ProfileId) -> Option<&ProfileEntry> {
        self.profiles.iter().find(|p| p.profile_id() == Some(id))
    }

    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.profiles.is_empty() {
            errors.push("no [[profiles]] defined".into());
        }
        self.validate_profiles(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_profiles(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<&str> = HashSet::new();

        for (i, p) in self.profiles.iter().enumerate() {
            let ctx = || {
                if p.id.is_empty() {
                    format!("profiles[{i}]")
                } else {
                    format!("profile '{}'", p.id)
                }
            };

            if p.id.trim().is_empty() {
                errors.push(format!("{}: id is empty", ctx()));
            } else if p.profile_id().is_none() {
                errors.push(format!(
                    "{}: unknown id (expected firebase1 or firebase2)",
                    ctx()
                ));
            } else if !seen.insert(&p.id) {
                errors.push(format!("{}: duplicate id", ctx()));
            }

            if p.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }

            if p.transport == Transport::Mqtt {
                if p.mqtt_host.trim().is_empty() {
                    errors.push(format!("{}: mqtt_host is empty", ctx()));
                }
                if p.mqtt_port == 0 {
                    errors.push(format!("{}: mqtt_port must be non-zero", ctx()));
                }
            }

            let prefix = p.topic_prefix.as_str();
            if prefix.trim().is_empty() {
                errors.push(format!("{}: topic_prefix is empty", ctx()));
            } else if prefix.starts_with('/') || prefix.ends_with('/') {
                errors.push(format!(
                    "{}: topic_prefix '{prefix}' must not start or end with '/'",
                    ctx()
                ));
            } else if prefix.contains(['#', '+']) {
                errors.push(format!(
                    "{}: topic_prefix '{prefix}' contains an MQTT wildcard",
                    ctx()
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file yields the
/// built-in defaults.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        warn!(path, "config file not found, using in-memory defaults");
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
