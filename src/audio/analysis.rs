use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::cell::RefCell;
use std::sync::{Arc, Mutex, TryLockError};

use crate::config::{AnalyzerConfig, WindowKind};
use crate::error::Result;

/// Latest transform output as seen by readers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpectrumSnapshot {
    /// Frequency magnitudes, `fft_size / 2` bytes.
    pub freq: Vec<u8>,
    /// Time-domain samples, `fft_size` bytes, 128 = zero.
    pub time: Vec<u8>,
    /// 0 until the first transform has been published.
    pub generation: u64,
}

impl SpectrumSnapshot {
    fn silent(fft_size: usize) -> Self {
        Self {
            freq: vec![0; fft_size / 2],
            time: vec![0; fft_size],
            generation: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.generation > 0
    }
}

/// Read side of an analyzer. Never touches the audio thread's state.
///
/// Each handle keeps its own copy of the last snapshot it saw, handed out
/// again when the audio thread is publishing at that moment.
#[derive(Clone, Debug)]
pub struct AnalyzerHandle {
    shared: Arc<Mutex<SpectrumSnapshot>>,
    cached: RefCell<SpectrumSnapshot>,
}

impl AnalyzerHandle {
    /// Copy of the most recently published transform. Never waits.
    pub fn snapshot(&self) -> SpectrumSnapshot {
        let mut cached = self.cached.borrow_mut();
        let published = match self.shared.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        };
        if let Some(published) = published {
            if published.generation != cached.generation {
                cached.freq.copy_from_slice(&published.freq);
                cached.time.copy_from_slice(&published.time);
                cached.generation = published.generation;
            }
        }
        cached.clone()
    }

    pub fn bin_count(&self) -> usize {
        self.cached.borrow().freq.len()
    }
}

/// Windowed FFT over a sliding block of mono samples, fed from the audio callback.
///
/// A transform runs every `hop_size` input samples; magnitudes are smoothed
/// over time, mapped from decibels onto bytes and published to the paired
/// [`AnalyzerHandle`].
pub struct SpectralAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    hop_size: usize,
    smoothing: f32,
    min_db: f32,
    db_range: f32,
    window: Vec<f32>,

    ring: Vec<f32>,
    write_pos: usize,
    since_transform: usize,

    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    freq_bytes: Vec<u8>,
    time_bytes: Vec<u8>,

    generation: u64,
    unpublished: bool,
    shared: Arc<Mutex<SpectrumSnapshot>>,
}

impl SpectralAnalyzer {
    pub fn configure(config: &AnalyzerConfig) -> Result<(Self, AnalyzerHandle)> {
        config.validate()?;

        let fft_size = config.fft_size;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        let window = match config.window {
            WindowKind::Blackman => blackman_window(fft_size),
            WindowKind::Hann => hann_window(fft_size),
        };

        let shared = Arc::new(Mutex::new(SpectrumSnapshot::silent(fft_size)));
        let handle = AnalyzerHandle {
            shared: Arc::clone(&shared),
            cached: RefCell::new(SpectrumSnapshot::silent(fft_size)),
        };

        log::info!(
            "Spectral analyzer: fft_size={}, hop={}, smoothing={:.2}, range=[{}, {}] dB, window={:?}",
            fft_size,
            config.hop_size,
            config.smoothing,
            config.min_decibels,
            config.max_decibels,
            config.window
        );

        let analyzer = Self {
            fft,
            fft_size,
            hop_size: config.hop_size,
            smoothing: config.smoothing,
            min_db: config.min_decibels,
            db_range: config.max_decibels - config.min_decibels,
            window,
            ring: vec![0.0; fft_size],
            write_pos: 0,
            since_transform: 0,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            smoothed: vec![0.0; fft_size / 2],
            freq_bytes: vec![0; fft_size / 2],
            time_bytes: vec![0; fft_size],
            generation: 0,
            unpublished: false,
            shared,
        };

        Ok((analyzer, handle))
    }

    /// Feed mono samples.
    pub fn process(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.push_sample(sample);
        }
        self.flush();
    }

    /// Feed interleaved frames, downmixing each one to mono.
    pub fn process_interleaved(&mut self, data: &[f32], channels: usize) {
        if channels <= 1 {
            self.process(data);
            return;
        }
        let scale = 1.0 / channels as f32;
        for frame in data.chunks_exact(channels) {
            self.push_sample(frame.iter().sum::<f32>() * scale);
        }
        self.flush();
    }

    fn push_sample(&mut self, sample: f32) {
        self.ring[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.fft_size;
        self.since_transform += 1;

        if self.since_transform >= self.hop_size {
            self.since_transform = 0;
            self.transform();
        }
    }

    fn transform(&mut self) {
        // Oldest sample sits at write_pos once the ring has wrapped.
        let (newer, older) = self.ring.split_at(self.write_pos);
        for (i, &s) in older.iter().chain(newer.iter()).enumerate() {
            self.buffer[i] = Complex::new(s * self.window[i], 0.0);
            self.time_bytes[i] = (128.0 * (1.0 + s)).clamp(0.0, 255.0) as u8;
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let norm = 1.0 / self.fft_size as f32;
        let tau = self.smoothing;
        let half = self.fft_size / 2;
        for k in 0..half {
            let magnitude = self.buffer[k].norm() * norm;
            let smoothed = tau * self.smoothed[k] + (1.0 - tau) * magnitude;
            // NaN/inf must not stick in the smoothing state.
            let smoothed = if smoothed.is_finite() { smoothed } else { 0.0 };
            self.smoothed[k] = smoothed;
            self.freq_bytes[k] = magnitude_to_byte(smoothed, self.min_db, self.db_range);
        }

        self.generation += 1;
        self.unpublished = true;
    }

    /// Hand the latest transform to readers without ever blocking the audio thread.
    fn flush(&mut self) {
        if !self.unpublished {
            return;
        }
        let mut published = match self.shared.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        published.freq.copy_from_slice(&self.freq_bytes);
        published.time.copy_from_slice(&self.time_bytes);
        published.generation = self.generation;
        self.unpublished = false;
    }
}

fn magnitude_to_byte(magnitude: f32, min_db: f32, db_range: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    (255.0 * (db - min_db) / db_range).clamp(0.0, 255.0) as u8
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

fn blackman_window(size: usize) -> Vec<f32> {
    const A0: f32 = 0.42;
    const A1: f32 = 0.5;
    const A2: f32 = 0.08;
    (0..size)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / size as f32;
            A0 - A1 * x.cos() + A2 * (2.0 * x).cos()
        })
        .collect()
}
