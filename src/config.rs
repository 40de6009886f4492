use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::MonitorError;
use crate::ingest::{LiveConfig, RecordedConfig, SourceSpec};
use crate::transport::{PublisherConfig, TlsMaterials, DEFAULT_PORT, DEFAULT_TOPIC};

const DEFAULT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_FALLBACK_FPS: f64 = 30.0;
const DEFAULT_IDENTITY: &str = "workspace-monitor";
const DEFAULT_CLIENT_ID: &str = "workspace-monitor";
const DEFAULT_DETECTOR: &str = "motion";
const DEFAULT_TRACKED_OBJECT: &str = "person";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
    source: Option<SourceConfigFile>,
    livekit: Option<LiveKitConfigFile>,
    mqtt: Option<MqttConfigFile>,
    monitor: Option<MonitorSectionFile>,
    debug_snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    kind: Option<SourceKind>,
    path: Option<String>,
    fallback_fps: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LiveKitConfigFile {
    url: Option<String>,
    identity: Option<String>,
    room_name: Option<String>,
    track_name: Option<String>,
    api_key: Option<String>,
    api_secret: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MqttConfigFile {
    broker: Option<String>,
    port: Option<u16>,
    topic: Option<String>,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
    connect_timeout_secs: Option<u64>,
    use_tls: Option<bool>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorSectionFile {
    tracked_objects: Option<Vec<String>>,
    detector: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Live,
    Recorded,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "recorded" | "file" => Ok(Self::Recorded),
            other => Err(anyhow!(
                "unknown source kind '{}': expected 'live' or 'recorded'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub source: SourceSettings,
    pub livekit: LiveKitSettings,
    pub mqtt: MqttSettings,
    pub monitor: MonitorSettings,
    pub debug_snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// Recorded media path or `stub://` location.
    pub path: Option<String>,
    pub fallback_fps: f64,
}

#[derive(Debug, Clone)]
pub struct LiveKitSettings {
    pub url: String,
    pub identity: String,
    pub room_name: String,
    pub track_name: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub connect_timeout: Duration,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub tracked_objects: Vec<String>,
    pub detector: String,
}

impl MonitorConfig {
    /// Defaults, then the file named by `MONITOR_CONFIG` (if set), then the
    /// environment. The result is validated.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::layered(None)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like `load`, but from an explicit file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::layered(Some(path.as_ref()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults, file and environment, without validation, so a caller can
    /// apply its own overrides before calling `validate`. `None` falls back to
    /// `MONITOR_CONFIG`.
    pub fn layered(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => match env_value("MONITOR_CONFIG") {
                Some(path) => read_config_file(Path::new(&path))?,
                None => MonitorConfigFile::default(),
            },
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let livekit = file.livekit.unwrap_or_default();
        let mqtt = file.mqtt.unwrap_or_default();
        let monitor = file.monitor.unwrap_or_default();

        Self {
            source: SourceSettings {
                kind: source.kind.unwrap_or_default(),
                path: source.path,
                fallback_fps: source.fallback_fps.unwrap_or(DEFAULT_FALLBACK_FPS),
            },
            livekit: LiveKitSettings {
                url: livekit.url.unwrap_or_default(),
                identity: livekit
                    .identity
                    .unwrap_or_else(|| DEFAULT_IDENTITY.to_string()),
                room_name: livekit.room_name.unwrap_or_default(),
                track_name: livekit.track_name.unwrap_or_default(),
                api_key: livekit.api_key,
                api_secret: livekit.api_secret,
                timeout: Duration::from_secs(livekit.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            },
            mqtt: MqttSettings {
                broker: mqtt.broker.unwrap_or_default(),
                port: mqtt.port.unwrap_or(DEFAULT_PORT),
                topic: mqtt.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
                username: mqtt.username,
                password: mqtt.password,
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
                connect_timeout: Duration::from_secs(
                    mqtt.connect_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
                ),
                use_tls: mqtt.use_tls.unwrap_or(false),
                tls_ca_path: mqtt.tls_ca_path,
                tls_client_cert_path: mqtt.tls_client_cert_path,
                tls_client_key_path: mqtt.tls_client_key_path,
            },
            monitor: MonitorSettings {
                tracked_objects: monitor
                    .tracked_objects
                    .unwrap_or_else(|| vec![DEFAULT_TRACKED_OBJECT.to_string()]),
                detector: monitor
                    .detector
                    .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            },
            debug_snapshot_path: file.debug_snapshot_path,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("LIVEKIT_URL") {
            self.livekit.url = url;
        }
        if let Some(key) = env_value("LIVEKIT_API_KEY") {
            self.livekit.api_key = Some(key);
        }
        if let Some(secret) = env_value("LIVEKIT_API_SECRET") {
            self.livekit.api_secret = Some(secret);
        }
        if let Some(identity) = env_value("LIVEKIT_IDENTITY") {
            self.livekit.identity = identity;
        }
        if let Some(room) = env_value("LIVEKIT_ROOM") {
            self.livekit.room_name = room;
        }
        if let Some(track) = env_value("LIVEKIT_TRACK") {
            self.livekit.track_name = track;
        }
        if let Some(timeout) = env_value("LIVEKIT_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("LIVEKIT_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.livekit.timeout = Duration::from_secs(seconds);
        }
        if let Some(broker) = env_value("MQTT_BROKER") {
            self.mqtt.broker = broker;
        }
        if let Some(port) = env_value("MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .map_err(|_| anyhow!("MQTT_PORT must be a port number"))?;
        }
        if let Some(topic) = env_value("MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(username) = env_value("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = env_value("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(objects) = env_value("MONITOR_TRACKED_OBJECTS") {
            let parsed = split_csv(&objects);
            if !parsed.is_empty() {
                self.monitor.tracked_objects = parsed;
            }
        }
        if let Some(kind) = env_value("MONITOR_SOURCE") {
            self.source.kind = kind.parse()?;
        }
        if let Some(path) = env_value("MONITOR_VIDEO_PATH") {
            self.source.path = Some(path);
        }
        if let Some(detector) = env_value("MONITOR_DETECTOR") {
            self.monitor.detector = detector;
        }
        Ok(())
    }

    /// Check cross-field rules. Call again after applying CLI overrides.
    pub fn validate(&mut self) -> Result<()> {
        self.monitor.tracked_objects = self
            .monitor
            .tracked_objects
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        if self.monitor.tracked_objects.is_empty() {
            return Err(config_error("monitor.tracked_objects must not be empty"));
        }
        if self.monitor.detector.trim().is_empty() {
            return Err(config_error("monitor.detector must not be empty"));
        }

        match self.source.kind {
            SourceKind::Recorded => {
                if self.source.path.as_deref().map_or(true, |p| p.trim().is_empty()) {
                    return Err(config_error(
                        "source.path (or MONITOR_VIDEO_PATH) is required for a recorded source",
                    ));
                }
            }
            SourceKind::Live => {
                for (name, value) in [
                    ("livekit.url", &self.livekit.url),
                    ("livekit.identity", &self.livekit.identity),
                    ("livekit.room_name", &self.livekit.room_name),
                    ("livekit.track_name", &self.livekit.track_name),
                ] {
                    if value.trim().is_empty() {
                        return Err(config_error(&format!(
                            "{} is required for a live source",
                            name
                        )));
                    }
                }
                if self.livekit.timeout.is_zero() {
                    return Err(config_error("livekit.timeout_secs must be greater than zero"));
                }
            }
        }

        if self.mqtt.broker.trim().is_empty() {
            return Err(config_error("mqtt.broker (or MQTT_BROKER) is required"));
        }
        if self.mqtt.topic.trim().is_empty() {
            return Err(config_error("mqtt.topic must not be empty"));
        }
        if self.mqtt.connect_timeout.is_zero() {
            return Err(config_error("mqtt.connect_timeout_secs must be greater than zero"));
        }
        Ok(())
    }

    /// Frame source selected by this configuration.
    pub fn source_spec(&self) -> SourceSpec {
        match self.source.kind {
            SourceKind::Recorded => SourceSpec::Recorded(RecordedConfig {
                path: self.source.path.clone().unwrap_or_default(),
                fallback_fps: self.source.fallback_fps,
            }),
            SourceKind::Live => SourceSpec::Live(LiveConfig {
                url: self.livekit.url.clone(),
                identity: self.livekit.identity.clone(),
                room_name: self.livekit.room_name.clone(),
                track_name: self.livekit.track_name.clone(),
                api_key: self.livekit.api_key.clone(),
                api_secret: self.livekit.api_secret.clone(),
                timeout: self.livekit.timeout,
                ..LiveConfig::default()
            }),
        }
    }

    /// Publisher settings, with TLS material read from disk.
    pub fn publisher_config(&self) -> Result<PublisherConfig> {
        let tls = TlsMaterials::load(
            self.mqtt.tls_ca_path.as_deref(),
            self.mqtt.tls_client_cert_path.as_deref(),
            self.mqtt.tls_client_key_path.as_deref(),
        )?;
        Ok(PublisherConfig {
            broker: self.mqtt.broker.clone(),
            port: self.mqtt.port,
            topic: self.mqtt.topic.clone(),
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            use_tls: self.mqtt.use_tls,
            tls,
            ..PublisherConfig::default()
        })
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn config_error(message: &str) -> anyhow::Error {
    MonitorError::Config(message.to_string()).into()
}

pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_entries_are_trimmed() {
        assert_eq!(split_csv(" person, forklift ,,"), vec!["person", "forklift"]);
    }

    #[test]
    fn source_kind_parses_aliases() {
        assert_eq!("Recorded".parse::<SourceKind>().unwrap(), SourceKind::Recorded);
        assert_eq!("file".parse::<SourceKind>().unwrap(), SourceKind::Recorded);
        assert!("camera".parse::<SourceKind>().is_err());
    }

    #[test]
    fn file_defaults_are_filled() {
        let cfg = MonitorConfig::from_file(MonitorConfigFile::default());
        assert_eq!(cfg.source.kind, SourceKind::Live);
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.topic, "workspace/state");
        assert_eq!(cfg.livekit.timeout, Duration::from_secs(5));
        assert_eq!(cfg.monitor.tracked_objects, vec!["person"]);
        assert_eq!(cfg.monitor.detector, "motion");
    }
}
