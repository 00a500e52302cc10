// src/decoder/resample.rs

use rubato::{
    calculate_cutoff, ResamplerConstructionError, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

/// Input frames consumed per resampler call on the playback path.
pub const PLAYBACK_CHUNK_FRAMES: usize = 512;

/// Builds a sinc resampler for `src_rate -> dst_rate`, or `None` when the
/// rates already match.
pub fn build_resampler(
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
    chunk_size: usize,
) -> Result<Option<SincFixedIn<f32>>, ResamplerConstructionError> {
    if src_rate == dst_rate {
        return Ok(None);
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let sinc_len = 128usize;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window,
    };
    let r = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_size, channels)?;
    Ok(Some(r))
}
