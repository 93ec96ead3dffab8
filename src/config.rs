use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::AnalyzerError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub pump: PumpConfig,
}

/// Window applied to each block before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Blackman,
    Hann,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// New samples between two transforms.
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    /// Exponential time smoothing of magnitudes (0 = none).
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,
    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,
    #[serde(default = "default_window")]
    pub window: WindowKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureConfig {
    /// Bins at the bottom of the spectrum ignored for pitch and timbre (DC, hum).
    #[serde(default = "default_low_cut_bins")]
    pub low_cut_bins: usize,
    /// Share of the spectrum at the top ignored for pitch and timbre.
    #[serde(default = "default_high_cut_fraction")]
    pub high_cut_fraction: f32,
    /// Number of recent volumes averaged for the beat threshold.
    #[serde(default = "default_beat_history")]
    pub beat_history: usize,
    #[serde(default = "default_beat_threshold_ratio")]
    pub beat_threshold_ratio: f32,
    #[serde(default = "default_beat_threshold_floor")]
    pub beat_threshold_floor: f32,
    #[serde(default = "default_refractory_ms")]
    pub refractory_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PumpConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            hop_size: default_hop_size(),
            smoothing: default_smoothing(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
            window: default_window(),
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            low_cut_bins: default_low_cut_bins(),
            high_cut_fraction: default_high_cut_fraction(),
            beat_history: default_beat_history(),
            beat_threshold_ratio: default_beat_threshold_ratio(),
            beat_threshold_floor: default_beat_threshold_floor(),
            refractory_ms: default_refractory_ms(),
        }
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self { fps: default_fps() }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        if !self.fft_size.is_power_of_two() || !(32..=32768).contains(&self.fft_size) {
            return Err(AnalyzerError::InvalidConfig(format!(
                "fft_size must be a power of two between 32 and 32768, got {}",
                self.fft_size
            )));
        }
        if self.hop_size == 0 || self.hop_size > self.fft_size {
            return Err(AnalyzerError::InvalidConfig(format!(
                "hop_size must be in 1..={}, got {}",
                self.fft_size, self.hop_size
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(AnalyzerError::InvalidConfig(format!(
                "smoothing must be in [0, 1), got {}",
                self.smoothing
            )));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(AnalyzerError::InvalidConfig(format!(
                "min_decibels ({}) must be below max_decibels ({})",
                self.min_decibels, self.max_decibels
            )));
        }
        Ok(())
    }

    /// Number of frequency bins produced per transform.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        if !(0.0..1.0).contains(&self.high_cut_fraction) {
            return Err(AnalyzerError::InvalidConfig(format!(
                "high_cut_fraction must be in [0, 1), got {}",
                self.high_cut_fraction
            )));
        }
        if self.beat_history == 0 {
            return Err(AnalyzerError::InvalidConfig("beat_history must be at least 1".into()));
        }
        if self.beat_threshold_ratio < 0.0 || self.beat_threshold_floor < 0.0 {
            return Err(AnalyzerError::InvalidConfig(
                "beat thresholds must not be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn refractory(&self) -> Duration {
        Duration::from_millis(self.refractory_ms)
    }
}

impl PumpConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.fps.max(1) as u64)
    }
}

fn default_fft_size() -> usize { 2048 }
fn default_hop_size() -> usize { 512 }
fn default_smoothing() -> f32 { 0.75 }
fn default_min_decibels() -> f32 { -100.0 }
fn default_max_decibels() -> f32 { -30.0 }
fn default_window() -> WindowKind { WindowKind::Blackman }
fn default_low_cut_bins() -> usize { 2 }
fn default_high_cut_fraction() -> f32 { 1.0 / 32.0 }
fn default_beat_history() -> usize { 24 }
fn default_beat_threshold_ratio() -> f32 { 0.5 }
fn default_beat_threshold_floor() -> f32 { 0.05 }
fn default_refractory_ms() -> u64 { 120 }
fn default_fps() -> u32 { 60 }

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
}
