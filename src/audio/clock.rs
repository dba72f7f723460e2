//! A/V clock arithmetic shared by the audio output.

use super::ring::{SegmentFormat, BYTES_PER_SAMPLE, SEGMENT_BUFFER_SIZE};

/// 90 kHz ticks per millisecond.
pub const TICKS_PER_MS: i64 = 90;

/// Buffered bytes needed before playback may start.
///
/// At least one hardware period, at least `delay_ms` of audio, at most a
/// third of a segment.
pub fn start_threshold(period_bytes: usize, rate: u32, channels: u32, delay_ms: u32) -> usize {
    let wanted = rate as usize * channels as usize * BYTES_PER_SAMPLE * delay_ms as usize / 1000;
    period_bytes.max(wanted).min(SEGMENT_BUFFER_SIZE / 3)
}

/// Start delay in milliseconds: the buffer time plus a positive A/V delay.
pub fn start_delay_ms(buffer_time_ms: u32, video_audio_delay: i64) -> u32 {
    if video_audio_delay > 0 {
        buffer_time_ms + (video_audio_delay / TICKS_PER_MS) as u32
    } else {
        buffer_time_ms
    }
}

/// True when `used` buffered bytes are enough to start draining.
pub fn should_start(threshold: usize, used: usize, fast_switch: bool, video_ready: bool) -> bool {
    // fast switch trades a shorter start for underrun risk
    let filled = if fast_switch {
        threshold * 18 / 10 < used
    } else {
        threshold * 4 < used
    };
    filled || (video_ready && threshold < used)
}

/// True when the next segment already holds enough to keep playing.
pub fn can_continue(threshold: usize, used: usize, video_ready: bool) -> bool {
    threshold * 4 < used || (video_ready && threshold < used)
}

/// Clock of the sample currently leaving the sink: the segment clock of
/// the next written byte minus everything still queued.
pub fn audio_clock(segment_pts: Option<i64>, delay: i64) -> Option<i64> {
    match (segment_pts, delay) {
        (Some(pts), delay) if delay != 0 => Some(pts - delay),
        _ => None,
    }
}

/// Bytes of audio worth `ms` milliseconds in `format`, rounded to frames.
pub fn ms_to_bytes(format: &SegmentFormat, ms: u32) -> usize {
    let frames = format.hw_rate as usize * ms as usize / 1000;
    frames * format.frame_bytes()
}
