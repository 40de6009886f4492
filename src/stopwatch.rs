use std::fmt;
use std::time::{Duration, Instant};

/// Measures time from construction until `stop()` (or until now, while running).
#[derive(Clone, Debug)]
pub struct Stopwatch {
    start: Instant,
    stopped: Option<Duration>,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            stopped: None,
        }
    }

    /// Freeze the measurement and return it. Repeated calls keep the first value.
    pub fn stop(&mut self) -> Duration {
        *self.stopped.get_or_insert_with(|| self.start.elapsed())
    }

    pub fn elapsed(&self) -> Duration {
        self.stopped.unwrap_or_else(|| self.start.elapsed())
    }

    pub fn is_running(&self) -> bool {
        self.stopped.is_none()
    }
}

impl fmt::Display for Stopwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "⏱ {}", format_duration(self.elapsed()))
    }
}

/// Human-scale rendering: minutes, seconds, milliseconds or microseconds.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        return format!("{} min {} s", secs / 60, secs % 60);
    }
    if secs >= 1 {
        return format!("{:.1} s", duration.as_secs_f64());
    }
    let millis = duration.as_millis();
    let micros = duration.as_micros() % 1000;
    if millis >= 10 {
        format!("{} ms", millis)
    } else if millis >= 1 {
        format!("{} ms {} µs", millis, micros)
    } else {
        format!("{} µs", micros)
    }
}
