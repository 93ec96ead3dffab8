use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::FeatureConfig;

/// Per-frame perceptual features handed to the visual layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnalysis {
    /// Normalized loudness (0.0-1.0)
    pub volume: f32,
    /// True only on the frame a new onset is detected
    pub beat: bool,
    /// Dominant frequency bin, normalized over the usable range (0.0-1.0)
    pub pitch: f32,
    /// Share of energy in the upper half of the usable spectrum (0.0-1.0)
    pub timbre: f32,
    /// Frequency bins exactly as the analyzer produced them
    pub raw_fft: Vec<u8>,
}

/// Beat detection memory: recent volumes and the last accepted onset.
#[derive(Clone, Debug, Default)]
pub struct BeatState {
    history: VecDeque<f32>,
    last_beat: Option<Duration>,
}

impl BeatState {
    pub fn rolling_average(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<f32>() / self.history.len() as f32
    }

    pub fn last_beat(&self) -> Option<Duration> {
        self.last_beat
    }
}

/// Adaptive-threshold onset detector with a refractory period.
///
/// A beat fires when `volume - average` exceeds
/// `max(average * beat_threshold_ratio, beat_threshold_floor)` and the last
/// beat is at least `refractory` old. The volume always enters the history.
pub fn detect_beat(state: &mut BeatState, config: &FeatureConfig, volume: f32, at: Duration) -> bool {
    let average = state.rolling_average();
    let threshold = (average * config.beat_threshold_ratio).max(config.beat_threshold_floor);
    let delta = volume - average;

    let rested = state
        .last_beat
        .map_or(true, |last| at.saturating_sub(last) >= config.refractory());

    let beat = !state.history.is_empty() && delta > threshold && rested;
    if beat {
        state.last_beat = Some(at);
    }

    if state.history.len() >= config.beat_history {
        state.history.pop_front();
    }
    state.history.push_back(volume);

    beat
}

/// Turns analyzer buffers into an [`AudioAnalysis`].
///
/// Stateless except for the owned [`BeatState`].
pub struct FeatureExtractor {
    config: FeatureConfig,
    bin_count: usize,
    usable: std::ops::Range<usize>,
    beat: BeatState,
}

impl FeatureExtractor {
    pub fn new(bin_count: usize, config: FeatureConfig) -> Self {
        let usable = usable_bins(bin_count, &config);
        Self {
            config,
            bin_count,
            usable,
            beat: BeatState::default(),
        }
    }

    pub fn beat_state(&self) -> &BeatState {
        &self.beat
    }

    /// # Panics
    ///
    /// If `freq` is not `bin_count` long or `time` is not twice that.
    pub fn extract(&mut self, freq: &[u8], time: &[u8], at: Duration) -> AudioAnalysis {
        assert_eq!(
            freq.len(),
            self.bin_count,
            "frequency buffer has {} bins, extractor expects {}",
            freq.len(),
            self.bin_count
        );
        assert_eq!(
            time.len(),
            self.bin_count * 2,
            "time buffer has {} samples, extractor expects {}",
            time.len(),
            self.bin_count * 2
        );

        let volume = volume(time);
        let pitch = pitch(freq, self.usable.clone());
        let timbre = timbre(freq, self.usable.clone());
        let beat = detect_beat(&mut self.beat, &self.config, volume, at);

        if beat {
            log::debug!(
                "Beat at {:.3}s (volume={:.3}, avg={:.3})",
                at.as_secs_f32(),
                volume,
                self.beat.rolling_average()
            );
        }

        AudioAnalysis {
            volume,
            beat,
            pitch,
            timbre,
            raw_fft: freq.to_vec(),
        }
    }
}

/// Bins left after dropping the DC/hum bins at the bottom and the noisy top.
pub fn usable_bins(bin_count: usize, config: &FeatureConfig) -> std::ops::Range<usize> {
    let high_cut = (bin_count as f32 * config.high_cut_fraction) as usize;
    let hi = bin_count.saturating_sub(high_cut);
    let lo = config.low_cut_bins.min(hi);
    lo..hi
}

/// RMS of the time-domain bytes around their mean, scaled so full swing is 1.0.
pub fn volume(time: &[u8]) -> f32 {
    if time.is_empty() {
        return 0.0;
    }
    let n = time.len() as f32;
    let mean = time.iter().map(|&b| b as f32).sum::<f32>() / n;
    let power = time
        .iter()
        .map(|&b| {
            let d = b as f32 - mean;
            d * d
        })
        .sum::<f32>()
        / n;
    (power.sqrt() / 128.0).clamp(0.0, 1.0)
}

/// Position of the loudest usable bin; ties resolve to the lowest index.
pub fn pitch(freq: &[u8], usable: std::ops::Range<usize>) -> f32 {
    if usable.len() < 2 {
        return 0.0;
    }
    let lo = usable.start;
    let span = (usable.len() - 1) as f32;

    let mut peak = lo;
    for i in usable {
        if freq[i] > freq[peak] {
            peak = i;
        }
    }
    ((peak - lo) as f32 / span).clamp(0.0, 1.0)
}

/// High-frequency energy ratio over the usable bins.
pub fn timbre(freq: &[u8], usable: std::ops::Range<usize>) -> f32 {
    let bins = &freq[usable];
    if bins.is_empty() {
        return 0.0;
    }
    let split = bins.len() / 2;
    let energy = |slice: &[u8]| slice.iter().map(|&b| (b as f32) * (b as f32)).sum::<f32>();

    let total = energy(bins);
    if total <= 0.0 {
        return 0.0;
    }
    (energy(&bins[split..]) / total).clamp(0.0, 1.0)
}
