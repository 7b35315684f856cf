//! Frame index resampling between the source and target frame rates.
//!
//! The source video runs at `source_fps`; the emitted dataset runs at
//! `target_fps`. Every destination index must map back into the source
//! segment, so the destination range is shrunk (ceil/floor) rather than
//! widened.

/// Source frames advanced per destination frame. May be fractional.
pub fn frame_step(source_fps: f64, target_fps: f64) -> f64 {
    source_fps / target_fps
}

/// Map a source frame interval onto the destination index interval.
///
/// `dest_start = ceil(source_start / step)`, `dest_end = floor(source_end / step)`,
/// so every destination index in the range resolves to a source index inside
/// `[source_start, source_end]`. The range is empty when `dest_end < dest_start`.
pub fn map_range(source_start: i64, source_end: i64, source_fps: f64, target_fps: f64) -> (i64, i64) {
    let step = frame_step(source_fps, target_fps);
    let dest_start = (source_start as f64 / step).ceil() as i64;
    let dest_end = (source_end as f64 / step).floor() as i64;
    (dest_start, dest_end)
}

/// Map a destination index back to the source index it samples.
///
/// Truncating, not rounding: `floor(dest * step)`. Changing this rule changes
/// which source frame every destination frame samples.
pub fn map_index(dest_index: i64, frame_step: f64) -> i64 {
    (dest_index as f64 * frame_step).floor() as i64
}
