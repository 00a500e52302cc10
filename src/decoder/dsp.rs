// src/decoder/dsp.rs

//! Interleaved/planar conversion and channel up/down-mixing.
//! Everything here writes into caller-owned buffers so it can run on the
//! audio thread.

/// Splits `frames` frames of `interleaved` into the first `frames` slots of each
/// planar channel buffer.
pub fn deinterleave_into(interleaved: &[f32], planar: &mut [Vec<f32>], frames: usize) {
    let channels = planar.len();
    if channels == 0 {
        return;
    }
    for f in 0..frames {
        let row = &interleaved[f * channels..(f + 1) * channels];
        for (ch, buf) in planar.iter_mut().enumerate() {
            buf[f] = row[ch];
        }
    }
}

/// Appends the first `frames` frames of `planar` to `out`, interleaved.
pub fn interleave_append(planar: &[Vec<f32>], frames: usize, out: &mut Vec<f32>) {
    for f in 0..frames {
        for ch in planar {
            out.push(ch[f]);
        }
    }
}

/// Remaps `input` (`in_ch` channels) into `out` (`out_ch` channels).
/// Returns the number of frames written, bounded by both buffers.
///
/// Mono is duplicated into stereo, stereo is averaged into mono. Other
/// reductions average neighbouring channel groups; other expansions wrap
/// the input channels.
pub fn remap_channels_into(input: &[f32], in_ch: usize, out: &mut [f32], out_ch: usize) -> usize {
    if in_ch == 0 || out_ch == 0 {
        return 0;
    }
    let frames = (input.len() / in_ch).min(out.len() / out_ch);

    if in_ch == out_ch {
        out[..frames * out_ch].copy_from_slice(&input[..frames * in_ch]);
        return frames;
    }

    match (in_ch, out_ch) {
        (1, 2) => {
            for f in 0..frames {
                let m = input[f];
                out[f * 2] = m;
                out[f * 2 + 1] = m;
            }
        }
        (2, 1) => {
            for f in 0..frames {
                out[f] = 0.5 * (input[f * 2] + input[f * 2 + 1]);
            }
        }
        _ if out_ch < in_ch => {
            let factor = in_ch as f32 / out_ch as f32;
            for f in 0..frames {
                for oc in 0..out_ch {
                    let start = (oc as f32 * factor).floor() as usize;
                    let end = (((oc + 1) as f32 * factor).ceil() as usize).min(in_ch);
                    let mut acc = 0.0f32;
                    let mut n = 0usize;
                    for ic in start..end {
                        acc += input[f * in_ch + ic];
                        n += 1;
                    }
                    out[f * out_ch + oc] = if n > 0 { acc / n as f32 } else { 0.0 };
                }
            }
        }
        _ => {
            for f in 0..frames {
                for oc in 0..out_ch {
                    out[f * out_ch + oc] = input[f * in_ch + oc % in_ch];
                }
            }
        }
    }

    frames
}
