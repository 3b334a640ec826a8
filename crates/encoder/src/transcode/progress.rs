//! ffmpeg progress parsing
//!
//! The total duration comes from the `Duration:` banner ffmpeg prints on
//! stderr while probing the input; the current position comes from the
//! `-progress` key/value stream on stdout.

/// Parse an `HH:MM:SS[.fraction]` timecode into seconds
///
/// Returns `None` for `N/A`, negative or malformed timecodes.
pub fn parse_timecode(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.starts_with('-') {
        return None;
    }

    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Tracks duration and position for one transcode
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    total_secs: Option<f64>,
    current_secs: Option<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total duration, once the input metadata has been seen
    pub fn total_secs(&self) -> Option<f64> {
        self.total_secs
    }

    /// Record the input duration reported by the metadata banner
    pub fn set_duration(&mut self, total_secs: f64) {
        self.total_secs = Some(total_secs);
    }

    /// Feed a stderr line; picks up `Duration: 00:02:00.00, start: ...`
    pub fn observe_log_line(&mut self, line: &str) {
        // Only the first input's duration counts
        if self.total_secs.is_some() {
            return;
        }

        let Some(rest) = line.trim_start().strip_prefix("Duration:") else {
            return;
        };
        let timecode = rest.split(',').next().unwrap_or_default();
        if let Some(secs) = parse_timecode(timecode) {
            self.total_secs = Some(secs);
        }
    }

    /// Feed a `-progress` line; returns a percentage at each `progress=` marker
    pub fn observe_progress_line(&mut self, line: &str) -> Option<f64> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    if us >= 0 {
                        self.current_secs = Some(us as f64 / 1_000_000.0);
                    }
                }
                None
            }
            "out_time" => {
                if let Some(secs) = parse_timecode(value) {
                    self.current_secs = Some(secs);
                }
                None
            }
            "progress" => self.current_secs.and_then(|secs| self.percent(secs)),
            _ => None,
        }
    }

    /// Percent complete for a position, clamped to [0, 100]
    ///
    /// `None` while the duration is unknown or zero.
    pub fn percent(&self, current_secs: f64) -> Option<f64> {
        let total = self.total_secs?;
        if total <= 0.0 {
            return None;
        }
        Some((current_secs / total * 100.0).clamp(0.0, 100.0))
    }
}
