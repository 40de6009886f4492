use std::sync::atomic::AtomicBool;

use anyhow::Result;
use serde_json::{json, Value};

use workspace_monitor::detect::{ScriptStep, ScriptedDetector, ScriptedObject};
use workspace_monitor::ingest::{RecordedConfig, RecordedSource};
use workspace_monitor::pipeline::{run, StateSink};
use workspace_monitor::transport::{build_message, to_payload};
use workspace_monitor::{ManualClock, WorkspaceMonitor, WorkspaceState};

/// Serializes every state exactly as the MQTT publisher would.
#[derive(Default)]
struct PayloadSink {
    payloads: Vec<Value>,
}

impl StateSink for PayloadSink {
    fn publish_state(&mut self, state: &WorkspaceState) -> Result<()> {
        let payload = to_payload(&build_message(state)?)?;
        self.payloads.push(serde_json::from_slice(&payload)?);
        Ok(())
    }
}

fn clip(frames: u32) -> RecordedSource {
    RecordedSource::new(RecordedConfig {
        path: format!("stub://bench?fps=10&frames={}&size=40x20", frames),
        ..RecordedConfig::default()
    })
    .with_clock(ManualClock::new())
}

fn workcell_objects() -> Vec<ScriptedObject> {
    vec![
        ScriptedObject::new("person", 0.9, (4, 2, 10, 5)),
        ScriptedObject::new("forklift", 0.7, (20, 10, 8, 4)),
        ScriptedObject::new("pallet", 0.99, (0, 0, 2, 2)),
    ]
}

#[test]
fn only_tracked_classes_reach_the_wire() -> Result<()> {
    let detector = ScriptedDetector::repeating(workcell_objects());
    let mut monitor = WorkspaceMonitor::new(["person", "forklift"], Box::new(detector))?;
    let mut sink = PayloadSink::default();

    let summary = run(&mut clip(3), &mut monitor, &mut sink, &AtomicBool::new(false))?;
    assert_eq!(summary.frames_processed, 3);
    assert_eq!(summary.states_published, 3);
    assert_eq!(summary.intrusions_seen, 6);

    for payload in &sink.payloads {
        let object = payload.as_object().expect("envelope object");
        assert_eq!(object.len(), 1);

        let value = &payload["value"];
        assert_eq!(value["resolution"], json!([40, 20]));
        let intrusions = value["intrusions"].as_array().expect("intrusions");
        let names: Vec<&str> = intrusions
            .iter()
            .map(|i| i["class_name"].as_str().expect("class name"))
            .collect();
        assert_eq!(names, vec!["person", "forklift"]);
        assert_eq!(intrusions[0]["box"], json!([0.1, 0.1, 0.25, 0.25]));
        assert_eq!(intrusions[1]["box"], json!([0.5, 0.5, 0.2, 0.2]));
    }
    Ok(())
}

#[test]
fn forklift_is_ignored_when_only_people_are_tracked() -> Result<()> {
    let detector = ScriptedDetector::repeating(workcell_objects());
    let mut monitor = WorkspaceMonitor::new(["person"], Box::new(detector))?;
    let mut sink = PayloadSink::default();

    run(&mut clip(1), &mut monitor, &mut sink, &AtomicBool::new(false))?;
    let intrusions = sink.payloads[0]["value"]["intrusions"]
        .as_array()
        .expect("intrusions")
        .clone();
    assert_eq!(intrusions.len(), 1);
    assert_eq!(intrusions[0]["class_name"], "person");
    Ok(())
}

#[test]
fn untracked_scene_still_publishes_empty_states() -> Result<()> {
    let detector = ScriptedDetector::repeating(workcell_objects());
    let mut monitor = WorkspaceMonitor::new(["robot_arm"], Box::new(detector))?;
    let mut sink = PayloadSink::default();

    let summary = run(&mut clip(2), &mut monitor, &mut sink, &AtomicBool::new(false))?;
    assert_eq!(summary.states_published, 2);
    assert_eq!(summary.intrusions_seen, 0);
    for payload in &sink.payloads {
        assert_eq!(payload["value"]["intrusions"], json!([]));
    }
    Ok(())
}

#[test]
fn class_names_match_exactly() -> Result<()> {
    let detector = ScriptedDetector::new([ScriptStep::Objects(vec![
        ScriptedObject::new("Person", 0.8, (0, 0, 4, 4)),
        ScriptedObject::new("person ", 0.8, (0, 0, 4, 4)),
        ScriptedObject::new("person", 0.8, (0, 0, 4, 4)),
    ])]);
    let mut monitor = WorkspaceMonitor::new(["person"], Box::new(detector))?;
    let mut sink = PayloadSink::default();

    run(&mut clip(1), &mut monitor, &mut sink, &AtomicBool::new(false))?;
    let intrusions = sink.payloads[0]["value"]["intrusions"]
        .as_array()
        .expect("intrusions")
        .len();
    assert_eq!(intrusions, 1);
    Ok(())
}

#[test]
fn failing_sink_does_not_stop_the_loop() -> Result<()> {
    struct Flaky(u32);

    impl StateSink for Flaky {
        fn publish_state(&mut self, _state: &WorkspaceState) -> Result<()> {
            self.0 += 1;
            if self.0 % 2 == 1 {
                anyhow::bail!("broker unavailable");
            }
            Ok(())
        }
    }

    let mut monitor = WorkspaceMonitor::new(["person"], Box::new(ScriptedDetector::default()))?;
    let mut sink = Flaky(0);
    let summary = run(&mut clip(4), &mut monitor, &mut sink, &AtomicBool::new(false))?;
    assert_eq!(summary.frames_processed, 4);
    assert_eq!(summary.publish_failures, 2);
    assert_eq!(summary.states_published, 2);
    Ok(())
}
