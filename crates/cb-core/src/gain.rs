//! Gain, pitch and filter conversions
//!
//! Banks store volumes as centibels (dB * 100) and pitches as
//! centisemitones. These helpers turn them into the linear values a
//! backend channel consumes.

/// Upper bound for a channel volume pushed to a backend
pub const MAX_CHANNEL_VOLUME: f32 = 3.0;

/// Cutoff at which the low-pass gain reaches 1.0 (fully open)
pub const LOW_PASS_REFERENCE_HZ: f32 = 22050.0;

/// dB to linear gain conversion
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f64.powf(db as f64 / 20.0) as f32
}

/// Linear gain to dB conversion
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.max(1e-10).log10()
}

/// Centibel fixed-point (dB * 100) to linear gain
#[inline]
pub fn centibels_to_gain(centibels: i32) -> f32 {
    db_to_gain(centibels as f32 / 100.0)
}

/// Semitone offset to playback-rate ratio
#[inline]
pub fn semitones_to_ratio(semitones: f32) -> f32 {
    2.0_f32.powf(semitones / 12.0)
}

/// Clamp a computed volume into the range a channel accepts
#[inline]
pub fn clamp_channel_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, MAX_CHANNEL_VOLUME)
}

/// Low-pass cutoff (Hz) to the 0..1 gain a channel low-pass stage takes
///
/// The gain is the square root of the cutoff relative to 22050 Hz.
#[inline]
pub fn low_pass_gain(cutoff_hz: f32) -> f32 {
    (cutoff_hz / LOW_PASS_REFERENCE_HZ).clamp(0.0, 1.0).sqrt()
}
