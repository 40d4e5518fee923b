//! Mel filter bank for the Whisper front-end.
//!
//! Slaney-style mel scale with Slaney area normalisation, the same bank
//! Whisper was trained with. The result is laid out row-major as
//! `n_mels x (N_FFT / 2 + 1)`, which is what
//! `candle_transformers::models::whisper::audio::pcm_to_mel` expects.

use candle_transformers::models::whisper::{N_FFT, SAMPLE_RATE};

const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;
const F_SP: f64 = 200.0 / 3.0;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        mel * F_SP
    }
}

/// Build the filter bank for `n_mels` bands (80 for most models, 128 for large-v3).
pub fn mel_filters(n_mels: usize) -> Vec<f32> {
    let n_freqs = N_FFT / 2 + 1;
    let sample_rate = SAMPLE_RATE as f64;

    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|k| k as f64 * sample_rate / N_FFT as f64)
        .collect();

    let mel_max = hz_to_mel(sample_rate / 2.0);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0f32; n_mels * n_freqs];
    for band in 0..n_mels {
        let (lower, center, upper) = (mel_points[band], mel_points[band + 1], mel_points[band + 2]);
        let enorm = 2.0 / (upper - lower);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            let weight = rising.min(falling).max(0.0);
            filters[band * n_freqs + k] = (weight * enorm) as f32;
        }
    }

    filters
}
