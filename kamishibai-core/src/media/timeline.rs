use crate::script::{Line, LineTiming};

/// Lines spoken by this pseudo-speaker hold a slide on screen.
pub const SLIDE_SPEAKER: &str = "slide";
pub const SLIDE_SECONDS: f64 = 3.0;

/// Estimated duration of a line: its clip when one exists, a fixed hold for
/// slides, otherwise a character-count estimate.
pub fn line_duration(line: &Line, clip_seconds: Option<f64>) -> f64 {
    if line.speaker == SLIDE_SPEAKER {
        return SLIDE_SECONDS;
    }
    match clip_seconds {
        Some(seconds) if seconds > 0.0 => seconds,
        _ => line.text.chars().count() as f64 * 0.12 + 0.3,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub timings: Vec<LineTiming>,
    pub correction_ratio: f64,
    pub total_seconds: f64,
    pub total_frames: u64,
}

impl Timeline {
    pub fn corrected_total(&self) -> f64 {
        self.timings
            .iter()
            .map(|timing| timing.end_seconds - timing.start_seconds)
            .sum()
    }
}

fn to_frame(seconds: f64, fps: u32) -> u64 {
    (seconds * f64::from(fps)).floor().max(0.0) as u64
}

/// Scales every duration by `measured / sum(durations)` so the timeline ends
/// exactly at the measured total, then converts to frames shifted by
/// `offset_frames`. A non-positive measurement leaves durations unscaled.
pub fn build_timeline(durations: &[f64], measured_seconds: f64, fps: u32, offset_frames: u64) -> Timeline {
    let individual_total: f64 = durations.iter().sum();
    let correction_ratio = if measured_seconds > 0.0 && individual_total > 0.0 {
        measured_seconds / individual_total
    } else {
        1.0
    };

    let mut timings = Vec::with_capacity(durations.len());
    let mut cursor = 0.0f64;
    for duration in durations {
        let start = cursor;
        let end = start + duration * correction_ratio;
        timings.push(LineTiming {
            start_seconds: start,
            end_seconds: end,
            start_frame: to_frame(start, fps) + offset_frames,
            end_frame: to_frame(end, fps) + offset_frames,
        });
        cursor = end;
    }

    let total_seconds = if measured_seconds > 0.0 {
        if let Some(last) = timings.last_mut() {
            last.end_seconds = measured_seconds;
            last.end_frame = to_frame(measured_seconds, fps) + offset_frames;
        }
        measured_seconds
    } else {
        cursor
    };

    Timeline {
        timings,
        correction_ratio,
        total_seconds,
        total_frames: to_frame(total_seconds, fps) + offset_frames,
    }
}

pub fn apply_timeline(lines: &mut [Line], timeline: &Timeline) {
    for (line, timing) in lines.iter_mut().zip(&timeline.timings) {
        line.timing = Some(*timing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_scale_to_measured_total() {
        let timeline = build_timeline(&[2.0, 3.0, 5.0], 11.0, 24, 0);
        assert!((timeline.correction_ratio - 1.1).abs() < 1e-9);
        assert!((timeline.corrected_total() - 11.0).abs() < 1.0 / 24.0);
        let last = timeline.timings.last().unwrap();
        assert_eq!(last.end_seconds, 11.0);
        assert_eq!(last.end_frame, 264);
        assert_eq!(timeline.total_frames, 264);
    }

    #[test]
    fn offset_shifts_every_frame() {
        let timeline = build_timeline(&[1.0, 1.0], 2.0, 24, 168);
        assert_eq!(timeline.timings[0].start_frame, 168);
        assert_eq!(timeline.timings[1].start_frame, 192);
        assert_eq!(timeline.total_frames, 216);
    }

    #[test]
    fn missing_measurement_keeps_estimates() {
        let timeline = build_timeline(&[1.5, 2.5], 0.0, 12, 0);
        assert_eq!(timeline.correction_ratio, 1.0);
        assert_eq!(timeline.total_seconds, 4.0);
        assert_eq!(timeline.total_frames, 48);
    }

    #[test]
    fn slide_and_fallback_durations() {
        let slide = Line::new(SLIDE_SPEAKER, "");
        assert_eq!(line_duration(&slide, Some(9.0)), SLIDE_SECONDS);
        let line = Line::new("カツミ", "年金です");
        assert!((line_duration(&line, None) - (4.0 * 0.12 + 0.3)).abs() < 1e-9);
        assert_eq!(line_duration(&line, Some(2.25)), 2.25);
    }
}
