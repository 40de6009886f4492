use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use workspace_monitor::config::{MonitorConfig, SourceKind};
use workspace_monitor::ingest::SourceSpec;
use workspace_monitor::MonitorError;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MONITOR_CONFIG",
        "LIVEKIT_URL",
        "LIVEKIT_API_KEY",
        "LIVEKIT_API_SECRET",
        "LIVEKIT_IDENTITY",
        "LIVEKIT_ROOM",
        "LIVEKIT_TRACK",
        "LIVEKIT_TIMEOUT_SECS",
        "MQTT_BROKER",
        "MQTT_PORT",
        "MQTT_TOPIC",
        "MQTT_USERNAME",
        "MQTT_PASSWORD",
        "MONITOR_TRACKED_OBJECTS",
        "MONITOR_SOURCE",
        "MONITOR_VIDEO_PATH",
        "MONITOR_DETECTOR",
    ] {
        std::env::remove_var(key);
    }
}

fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    guard
}

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_from_env_path_with_env_overrides() {
    let _guard = lock_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": { "kind": "live" },
        "livekit": {
            "url": "wss://rooms.example.com",
            "room_name": "cell-4",
            "track_name": "overhead",
            "timeout_secs": 8
        },
        "mqtt": {
            "broker": "broker.local",
            "port": 1884,
            "topic": "cell4/state"
        },
        "monitor": {
            "tracked_objects": ["person"],
            "detector": "scripted"
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("MONITOR_CONFIG", file.path());
    std::env::set_var("LIVEKIT_TRACK", "side");
    std::env::set_var("MQTT_TOPIC", "override/state");
    std::env::set_var("MONITOR_TRACKED_OBJECTS", "person, forklift");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.source.kind, SourceKind::Live);
    assert_eq!(cfg.livekit.url, "wss://rooms.example.com");
    assert_eq!(cfg.livekit.room_name, "cell-4");
    assert_eq!(cfg.livekit.track_name, "side");
    assert_eq!(cfg.livekit.identity, "workspace-monitor");
    assert_eq!(cfg.livekit.timeout, Duration::from_secs(8));
    assert_eq!(cfg.mqtt.broker, "broker.local");
    assert_eq!(cfg.mqtt.port, 1884);
    assert_eq!(cfg.mqtt.topic, "override/state");
    assert_eq!(cfg.monitor.tracked_objects, vec!["person", "forklift"]);
    assert_eq!(cfg.monitor.detector, "scripted");

    clear_env();
}

#[test]
fn toml_recorded_source_maps_to_source_spec() {
    let _guard = lock_env();

    let file = toml_file(
        r#"
        debug_snapshot_path = "/tmp/latest.jpg"

        [source]
        kind = "recorded"
        path = "stub://clip?fps=10"
        fallback_fps = 12.5

        [mqtt]
        broker = "mqtts://broker.example.com:8883"
        username = "monitor"
        password = "secret"
        "#,
    );

    let cfg = MonitorConfig::from_path(file.path()).expect("load config");
    assert_eq!(cfg.mqtt.port, 1883);
    assert_eq!(cfg.mqtt.topic, "workspace/state");
    assert_eq!(cfg.monitor.tracked_objects, vec!["person"]);
    assert_eq!(
        cfg.debug_snapshot_path.as_deref(),
        Some(std::path::Path::new("/tmp/latest.jpg"))
    );

    match cfg.source_spec() {
        SourceSpec::Recorded(recorded) => {
            assert_eq!(recorded.path, "stub://clip?fps=10");
            assert_eq!(recorded.fallback_fps, 12.5);
        }
        other => panic!("expected a recorded source, got {:?}", other),
    }

    let publisher = cfg.publisher_config().expect("publisher config");
    assert_eq!(publisher.broker, "mqtts://broker.example.com:8883");
    assert_eq!(publisher.username.as_deref(), Some("monitor"));
    assert!(!format!("{:?}", publisher).contains("secret"));

    clear_env();
}

#[test]
fn env_alone_configures_a_recorded_run() {
    let _guard = lock_env();

    std::env::set_var("MONITOR_SOURCE", "recorded");
    std::env::set_var("MONITOR_VIDEO_PATH", "stub://bench");
    std::env::set_var("MQTT_BROKER", "127.0.0.1");
    std::env::set_var("MQTT_PORT", "2883");

    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(cfg.source.kind, SourceKind::Recorded);
    assert_eq!(cfg.source.path.as_deref(), Some("stub://bench"));
    assert_eq!(cfg.mqtt.port, 2883);

    clear_env();
}

#[test]
fn missing_live_fields_are_config_errors() {
    let _guard = lock_env();

    std::env::set_var("MQTT_BROKER", "broker.local");
    std::env::set_var("LIVEKIT_URL", "wss://rooms.example.com");

    let err = MonitorConfig::load().expect_err("room and track are unset");
    assert!(matches!(
        err.downcast_ref::<MonitorError>(),
        Some(MonitorError::Config(_))
    ));
    assert!(err.to_string().contains("livekit.room_name"), "{err}");

    clear_env();
}

#[test]
fn empty_tracked_objects_are_rejected() {
    let _guard = lock_env();

    let file = toml_file(
        r#"
        [source]
        kind = "recorded"
        path = "stub://clip"

        [mqtt]
        broker = "broker.local"

        [monitor]
        tracked_objects = [" ", ""]
        "#,
    );

    let err = MonitorConfig::from_path(file.path()).expect_err("no tracked objects");
    assert!(err.to_string().contains("tracked_objects"), "{err}");

    clear_env();
}

#[test]
fn malformed_values_fail_to_load() {
    let _guard = lock_env();

    std::env::set_var("MONITOR_VIDEO_PATH", "stub://clip");
    std::env::set_var("MONITOR_SOURCE", "recorded");
    std::env::set_var("MQTT_BROKER", "broker.local");
    std::env::set_var("MQTT_PORT", "not-a-port");
    assert!(MonitorConfig::load().is_err());

    std::env::set_var("MQTT_PORT", "1883");
    std::env::set_var("MONITOR_SOURCE", "webcam");
    assert!(MonitorConfig::load().is_err());

    std::env::remove_var("MONITOR_SOURCE");
    let file = toml_file("[mqtt]\nbrokr = \"typo\"\n");
    assert!(MonitorConfig::from_path(file.path()).is_err());

    clear_env();
}

#[test]
fn layered_config_defers_validation_for_overrides() {
    let _guard = lock_env();

    let mut cfg = MonitorConfig::layered(None).expect("defaults");
    assert!(cfg.validate().is_err());

    cfg.source.kind = SourceKind::Recorded;
    cfg.source.path = Some("stub://clip".into());
    cfg.mqtt.broker = "broker.local".into();
    cfg.validate().expect("overrides complete the config");

    clear_env();
}
