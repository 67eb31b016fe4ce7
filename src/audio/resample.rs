//! Format conversion between decoded clips and the output device.
//!
//! TTS payloads arrive at whatever rate the provider chose (commonly 24 or
//! 32 kHz mono) while the device runs at its own rate and channel count.
//! [`convert_for_output`] maps one onto the other.

use super::buffer::DecodedAudio;

/// Remix interleaved audio from `from` channels to `to` channels.
///
/// Down-mixing to mono averages every frame; up-mixing from mono copies the
/// sample into every output channel; any other combination maps channel `i`
/// to `i % from`.
///
/// ```rust
/// use flowist_player::audio::remix_channels;
///
/// assert_eq!(remix_channels(&[1.0, -1.0, 0.5, 0.5], 2, 1), vec![0.0, 0.5]);
/// assert_eq!(remix_channels(&[0.25, 0.5], 1, 2), vec![0.25, 0.25, 0.5, 0.5]);
/// ```
pub fn remix_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == 0 || to == 0 {
        return Vec::new();
    }
    if from == to {
        return samples.to_vec();
    }

    let from = from as usize;
    let to = to as usize;
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);

    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for ch in 0..to {
                out.push(frame[ch % from]);
            }
        }
    }
    out
}

/// Linearly resample interleaved audio from `source_rate` to `target_rate`.
///
/// The output holds `ceil(frames * target_rate / source_rate)` frames.
///
/// ```rust
/// use flowist_player::audio::resample;
///
/// let hi = vec![0.5_f32; 480];
/// let lo = resample(&hi, 1, 48_000, 16_000);
/// assert_eq!(lo.len(), 160);
/// ```
pub fn resample(samples: &[f32], channels: u16, source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || channels == 0 {
        return samples.to_vec();
    }
    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let channels = channels as usize;
    let frames = samples.len() / channels;
    let ratio = target_rate as f64 / source_rate as f64;
    let output_frames = (frames as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_frames * channels);

    for i in 0..output_frames {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        for ch in 0..channels {
            let at = |frame: usize| samples[frame * channels + ch];
            let sample = if idx + 1 < frames {
                // Linear interpolation between adjacent frames
                at(idx) * (1.0 - frac) + at(idx + 1) * frac
            } else if idx < frames {
                at(idx)
            } else {
                0.0
            };
            output.push(sample);
        }
    }

    output
}

/// Convert `clip` to the device format and apply `volume`.
pub fn convert_for_output(
    clip: &DecodedAudio,
    device_rate: u32,
    device_channels: u16,
    volume: f32,
) -> Vec<f32> {
    let remixed = remix_channels(&clip.samples, clip.channels, device_channels);
    let mut out = resample(&remixed, device_channels, clip.sample_rate, device_rate);

    let gain = volume.clamp(0.0, 1.0);
    if (gain - 1.0).abs() > f32::EPSILON {
        for sample in &mut out {
            *sample *= gain;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- remix_channels ----------------------------------------------------

    #[test]
    fn remix_same_layout_is_copy() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(remix_channels(&input, 1, 1), input);
    }

    #[test]
    fn remix_four_to_mono_averages() {
        let out = remix_channels(&[0.4_f32; 4], 4, 1);
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn remix_zero_channels_is_empty() {
        assert!(remix_channels(&[1.0_f32, 2.0], 0, 2).is_empty());
        assert!(remix_channels(&[1.0_f32, 2.0], 2, 0).is_empty());
    }

    #[test]
    fn remix_stereo_to_quad_wraps_channels() {
        let out = remix_channels(&[0.1_f32, 0.2], 2, 4);
        assert_eq!(out, vec![0.1, 0.2, 0.1, 0.2]);
    }

    // ---- resample ----------------------------------------------------------

    #[test]
    fn resample_same_rate_is_noop() {
        let input: Vec<f32> = (0..160).map(|i| i as f32 / 160.0).collect();
        assert_eq!(resample(&input, 1, 24_000, 24_000), input);
    }

    #[test]
    fn resample_empty_input() {
        assert!(resample(&[], 1, 24_000, 48_000).is_empty());
    }

    #[test]
    fn resample_upsample_doubles_frames() {
        let out = resample(&vec![0.0_f32; 240], 1, 24_000, 48_000);
        assert_eq!(out.len(), 480);
    }

    #[test]
    fn resample_stereo_keeps_channels_apart() {
        // Left constant 1.0, right constant -1.0.
        let input: Vec<f32> = (0..100).flat_map(|_| [1.0_f32, -1.0]).collect();
        let out = resample(&input, 2, 24_000, 48_000);
        assert_eq!(out.len(), 400);
        for frame in out.chunks_exact(2) {
            assert!((frame[0] - 1.0).abs() < 1e-6);
            assert!((frame[1] + 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn resample_44100_to_48000_length() {
        let out = resample(&vec![0.0_f32; 44_100], 1, 44_100, 48_000);
        assert!(out.len().abs_diff(48_000) <= 1, "got {}", out.len());
    }

    // ---- convert_for_output ------------------------------------------------

    #[test]
    fn convert_applies_layout_rate_and_volume() {
        let clip = DecodedAudio::new(vec![0.5_f32; 240], 24_000, 1);
        let out = convert_for_output(&clip, 48_000, 2, 0.5);
        assert_eq!(out.len(), 480 * 2);
        for &s in &out {
            assert!((s - 0.25).abs() < 1e-6, "unexpected sample {s}");
        }
    }

    #[test]
    fn convert_at_unity_gain_keeps_amplitude() {
        let clip = DecodedAudio::new(vec![0.5_f32; 10], 48_000, 1);
        let out = convert_for_output(&clip, 48_000, 1, 1.0);
        assert_eq!(out, vec![0.5_f32; 10]);
    }
}
