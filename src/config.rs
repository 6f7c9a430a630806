// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Application configuration management.
//!
//! Persisted with `confy` in the platform config directory. Every field has a
//! serde default, so configs written by older versions keep loading.

use std::path::PathBuf;

use iqscope_core::{
    Averaging, ComboConfig, ScopeSettings, SpectrumSettings, TriggerSettings, WindowKind,
};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "iqscope";
const CONFIG_NAME: &str = "config";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Configuration schema version
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Samples per block handed to the visualizers
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Demo signal sample rate in Hz (file sources use their own)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Sleep one block duration per block to mimic a live receiver
    #[serde(default = "default_true")]
    pub realtime: bool,

    /// Spectra/traces buffered before frames are dropped
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,

    /// FFT size (number of frequency bins)
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,

    /// FFT frame overlap in percent
    #[serde(default)]
    pub overlap_percent: u8,

    #[serde(default)]
    pub window: WindowKind,

    /// Samples per scope trace
    #[serde(default = "default_trace_size")]
    pub trace_size: usize,

    /// Samples kept ahead of the trigger
    #[serde(default = "default_pre_trigger")]
    pub pre_trigger: usize,

    /// Where FFT plan wisdom is kept between runs
    #[serde(default = "default_wisdom_path")]
    pub wisdom_path: Option<PathBuf>,

    #[serde(default)]
    pub averaging: Averaging,

    #[serde(default)]
    pub trigger: TriggerSettings,

    /// Spectrum windowing around the trigger
    #[serde(default)]
    pub windowing: ComboConfig,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_block_size() -> usize {
    4096
}

fn default_sample_rate() -> u32 {
    2_048_000
}

fn default_true() -> bool {
    true
}

fn default_channel_buffer_size() -> usize {
    64
}

fn default_fft_size() -> usize {
    1024
}

fn default_trace_size() -> usize {
    1024
}

fn default_pre_trigger() -> usize {
    128
}

fn default_wisdom_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join(APP_NAME).join("fft-wisdom.json"))
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            block_size: default_block_size(),
            sample_rate: default_sample_rate(),
            realtime: true,
            channel_buffer_size: default_channel_buffer_size(),
            fft_size: default_fft_size(),
            overlap_percent: 0,
            window: WindowKind::default(),
            trace_size: default_trace_size(),
            pre_trigger: default_pre_trigger(),
            wisdom_path: default_wisdom_path(),
            averaging: Averaging::default(),
            trigger: TriggerSettings::default(),
            windowing: ComboConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk
    pub fn load() -> Result<Self, confy::ConfyError> {
        let mut config: AppConfig = confy::load(APP_NAME, CONFIG_NAME)?;

        if config.config_version < default_config_version() {
            log::info!(
                "Upgrading configuration from version {} to {}",
                config.config_version,
                default_config_version()
            );
            config.config_version = default_config_version();
        }

        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is unusable
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            log::warn!("Failed to load configuration ({e}), using defaults");
            Self::default()
        })
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn config_path() -> Result<PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    #[must_use]
    pub fn spectrum_settings(&self) -> SpectrumSettings {
        SpectrumSettings {
            fft_size: self.fft_size,
            overlap_percent: self.overlap_percent,
            window: self.window,
            averaging: self.averaging,
        }
    }

    #[must_use]
    pub fn scope_settings(&self) -> ScopeSettings {
        ScopeSettings {
            trace_size: self.trace_size,
            pre_trigger: self.pre_trigger,
            trigger: self.trigger.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iqscope_core::{Edge, WindowingPolicy};

    #[test]
    fn test_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.fft_size, 1024);
        assert_eq!(config.block_size, 4096);
        assert!(!config.trigger.enabled);
        assert_eq!(config.windowing.policy, WindowingPolicy::FreeRun);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = AppConfig::default();
        config.fft_size = 4096;
        config.trigger.enabled = true;
        config.trigger.edge = Edge::Both;
        config.windowing.policy = WindowingPolicy::TriggerIndexRelative;

        let text = serde_json::to_string(&config).unwrap();
        let restored: AppConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_partial_trigger_section() {
        let config: AppConfig =
            serde_json::from_str(r#"{"trigger":{"enabled":true,"level":0.3}}"#).unwrap();
        assert!(config.trigger.enabled);
        assert_eq!(config.trigger.level, 0.3);
        assert_eq!(config.trigger.edge, Edge::Positive);
        assert_eq!(config.trace_size, 1024);
    }

    #[test]
    fn test_settings_views() {
        let config = AppConfig {
            fft_size: 512,
            trace_size: 256,
            pre_trigger: 32,
            ..Default::default()
        };
        assert_eq!(config.spectrum_settings().fft_size, 512);
        let scope = config.scope_settings();
        assert_eq!((scope.trace_size, scope.pre_trigger), (256, 32));
    }
}
