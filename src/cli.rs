//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use iqscope_core::{Edge, Projection, WindowKind, WindowingPolicy};

use crate::config::AppConfig;

/// Spectrum window function
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowArg {
    #[value(alias = "rect")]
    Rectangular,
    Hann,
    Hamming,
    #[value(alias = "bh")]
    BlackmanHarris,
}

impl From<WindowArg> for WindowKind {
    fn from(arg: WindowArg) -> Self {
        match arg {
            WindowArg::Rectangular => Self::Rectangular,
            WindowArg::Hann => Self::Hann,
            WindowArg::Hamming => Self::Hamming,
            WindowArg::BlackmanHarris => Self::BlackmanHarris,
        }
    }
}

/// Trigger edge polarity
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeArg {
    #[value(alias = "rising")]
    Positive,
    #[value(alias = "falling")]
    Negative,
    Both,
}

impl From<EdgeArg> for Edge {
    fn from(arg: EdgeArg) -> Self {
        match arg {
            EdgeArg::Positive => Self::Positive,
            EdgeArg::Negative => Self::Negative,
            EdgeArg::Both => Self::Both,
        }
    }
}

/// Sample projection the trigger compares
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelArg {
    #[value(alias = "i")]
    Real,
    #[value(alias = "q")]
    Imag,
    #[value(alias = "mag")]
    Magnitude,
    #[value(alias = "db")]
    MagnitudeDb,
    Phase,
}

impl From<ChannelArg> for Projection {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Real => Self::Real,
            ChannelArg::Imag => Self::Imag,
            ChannelArg::Magnitude => Self::Magnitude,
            ChannelArg::MagnitudeDb => Self::MagnitudeDb,
            ChannelArg::Phase => Self::Phase,
        }
    }
}

/// Which part of each block the spectrum sees
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyArg {
    /// Every block, untouched
    FreeRun,
    /// Samples before the trigger, located by index
    TriggerIndex,
    /// Samples before the trigger, located by distance to the block end
    TriggerIterator,
}

impl From<PolicyArg> for WindowingPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::FreeRun => Self::FreeRun,
            PolicyArg::TriggerIndex => Self::TriggerIndexRelative,
            PolicyArg::TriggerIterator => Self::TriggerIteratorRelative,
        }
    }
}

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "iqscope")]
#[command(about = "Triggered spectrum and oscilloscope analyzer for IQ streams", long_about = None)]
pub struct Args {
    /// IQ input file (.cf32/.iq/.cfile raw float32 or 16-bit stereo .wav); demo signal if omitted
    #[arg(short = 'i', long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// FFT size
    #[arg(short = 'n', long)]
    pub fft_size: Option<usize>,

    /// FFT frame overlap in percent
    #[arg(long, value_name = "PERCENT")]
    pub overlap: Option<u8>,

    /// Window function
    #[arg(long, value_enum)]
    pub window: Option<WindowArg>,

    /// Enable the trigger at this level
    #[arg(short = 't', long)]
    pub trigger_level: Option<f32>,

    /// Trigger edge
    #[arg(long, value_enum)]
    pub edge: Option<EdgeArg>,

    /// Trigger channel
    #[arg(long, value_enum)]
    pub channel: Option<ChannelArg>,

    /// Samples the trigger condition must persist
    #[arg(long)]
    pub holdoff: Option<u32>,

    /// Samples between the trigger edge and the start of the capture
    #[arg(long, value_name = "SAMPLES")]
    pub trigger_delay: Option<usize>,

    /// Matching edges to skip before the trigger fires
    #[arg(long, value_name = "COUNT")]
    pub trigger_repeat: Option<u32>,

    /// Capture one trace, then stop triggering
    #[arg(long)]
    pub one_shot: bool,

    /// Samples per scope trace
    #[arg(long)]
    pub trace_size: Option<usize>,

    /// Samples kept ahead of the trigger
    #[arg(long)]
    pub pre_trigger: Option<usize>,

    /// Spectrum windowing around the trigger
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Samples per processing block
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Demo signal sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Input is magnitude-only real data; publish only the positive half of the spectrum
    #[arg(long)]
    pub positive_only: bool,

    /// Process as fast as possible instead of at the sample rate
    #[arg(long)]
    pub fast: bool,

    /// Stop after this many blocks
    #[arg(long)]
    pub max_blocks: Option<usize>,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub seconds: Option<f64>,

    /// Resize the FFT to this size once the first spectrum arrives
    #[arg(long, value_name = "SIZE")]
    pub retune: Option<usize>,

    /// FFT wisdom file
    #[arg(long, value_name = "FILE")]
    pub wisdom: Option<PathBuf>,

    /// Write the merged configuration back to the config file
    #[arg(long)]
    pub save_config: bool,
}

impl Args {
    /// Overlay command-line overrides onto the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(size) = self.fft_size {
            config.fft_size = size;
        }
        if let Some(overlap) = self.overlap {
            config.overlap_percent = overlap;
        }
        if let Some(window) = self.window {
            config.window = window.into();
        }

        if let Some(level) = self.trigger_level {
            config.trigger.enabled = true;
            config.trigger.level = level;
        }
        if let Some(edge) = self.edge {
            config.trigger.edge = edge.into();
        }
        if let Some(channel) = self.channel {
            config.trigger.channel = channel.into();
        }
        if let Some(holdoff) = self.holdoff {
            config.trigger.holdoff = holdoff;
        }
        if let Some(delay) = self.trigger_delay {
            config.trigger.delay = delay;
        }
        if let Some(repeat) = self.trigger_repeat {
            config.trigger.repeat = repeat;
        }
        if self.one_shot {
            config.trigger.one_shot = true;
        }

        if let Some(size) = self.trace_size {
            config.trace_size = size;
        }
        if let Some(pre) = self.pre_trigger {
            config.pre_trigger = pre;
        }
        if let Some(policy) = self.policy {
            config.windowing.policy = policy.into();
        }

        if let Some(size) = self.block_size {
            config.block_size = size;
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if self.fast {
            config.realtime = false;
        }
        if let Some(path) = &self.wisdom {
            config.wisdom_path = Some(path.clone());
        }
    }
}
