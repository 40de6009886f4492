//! Workspace monitor: one frame in, one classified workspace snapshot out.

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::detect::{Detection, Detector};
use crate::error::MonitorError;
use crate::frame::Frame;
use crate::stopwatch::Stopwatch;

/// Snapshot of the workcell at capture time.
#[derive(Clone, Debug)]
pub struct WorkspaceState {
    pub timestamp: DateTime<Utc>,
    pub frame: Frame,
    /// Detections whose class is tracked.
    pub intrusions: Vec<Detection>,
}

impl WorkspaceState {
    pub fn intrusion_names(&self) -> Vec<&str> {
        self.intrusions.iter().map(|d| d.class_name.as_str()).collect()
    }
}

pub struct WorkspaceMonitor {
    tracked: BTreeSet<String>,
    detector: Box<dyn Detector>,
}

impl WorkspaceMonitor {
    /// `tracked_objects` must not be empty; class names match exactly.
    pub fn new(
        tracked_objects: impl IntoIterator<Item = impl Into<String>>,
        detector: Box<dyn Detector>,
    ) -> Result<Self> {
        let tracked: BTreeSet<String> = tracked_objects.into_iter().map(Into::into).collect();
        if tracked.is_empty() {
            return Err(MonitorError::Config(
                "tracked objects must not be empty; the monitor needs to know which classes to report"
                    .into(),
            )
            .into());
        }
        log::info!(
            "WorkspaceMonitor: tracking {:?} with detector '{}'",
            tracked,
            detector.name()
        );
        let monitor = Self { tracked, detector };
        if !monitor.can_report_intrusions() {
            log::warn!(
                "WorkspaceMonitor: detector '{}' only emits {:?}; no tracked class can ever be reported",
                monitor.detector.name(),
                monitor.detector.classes().unwrap_or_default()
            );
        }
        Ok(monitor)
    }

    /// False when the detector's fixed class set misses every tracked class.
    pub fn can_report_intrusions(&self) -> bool {
        match self.detector.classes() {
            Some(classes) => classes.iter().any(|c| self.tracked.contains(*c)),
            None => true,
        }
    }

    pub fn tracked_objects(&self) -> impl Iterator<Item = &str> {
        self.tracked.iter().map(String::as_str)
    }

    /// Detect, keep tracked classes, stamp. Detector errors are returned
    /// unchanged for the caller to treat as "skip this frame".
    pub fn process(&mut self, frame: Frame) -> Result<WorkspaceState> {
        let timestamp = Utc::now();

        let mut sw = Stopwatch::start();
        let detections = self.detector.detect(&frame)?;
        sw.stop();
        log::debug!("Detected {} objects in {}", detections.len(), sw);

        let resolution = frame.resolution();
        if let Some(bad) = detections
            .iter()
            .find(|d| d.mask.dimensions() != resolution)
        {
            return Err(anyhow!(
                "detector '{}' returned a {:?} mask for a {:?} frame",
                self.detector.name(),
                bad.mask.dimensions(),
                resolution
            ));
        }

        let intrusions = detections
            .into_iter()
            .filter(|d| self.tracked.contains(&d.class_name))
            .collect();

        Ok(WorkspaceState {
            timestamp,
            frame,
            intrusions,
        })
    }
}
