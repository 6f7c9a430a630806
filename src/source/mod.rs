//! IQ sample sources feeding the pipeline.
//!
//! - Synthetic demo signal
//! - Raw complex float32 files (`.cf32`, `.iq`, `.cfile`)
//! - 16-bit stereo WAV files (left = I, right = Q)

mod cf32;
mod demo;
mod wav;

pub use cf32::Cf32Source;
pub use demo::DemoSource;
pub use wav::WavSource;

use std::path::{Path, PathBuf};

use anyhow::Result;
use iqscope_core::Sample;

/// A blocking producer of complex samples.
pub trait IqSource: Send {
    /// Fill `block` from the front. Returns the number of samples written;
    /// 0 means end of stream.
    fn read(&mut self, block: &mut [Sample]) -> Result<usize>;

    /// Sample rate in Hz, when the source knows it.
    fn sample_rate(&self) -> Option<u32> {
        None
    }
}

/// Where samples come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceType {
    /// Generated test signal.
    Demo,
    /// IQ recording on disk; format picked from the extension.
    File { path: PathBuf },
}

impl SourceType {
    #[must_use]
    pub fn from_input(input: Option<&Path>) -> Self {
        match input {
            Some(path) => Self::File {
                path: path.to_path_buf(),
            },
            None => Self::Demo,
        }
    }

    /// Open the source. `sample_rate` only applies to the demo signal.
    pub fn open(&self, sample_rate: u32) -> Result<Box<dyn IqSource>> {
        match self {
            Self::Demo => {
                log::info!("Using demo signal at {:.1} kHz", f64::from(sample_rate) / 1e3);
                Ok(Box::new(DemoSource::new(sample_rate)))
            }
            Self::File { path } => {
                if !path.exists() {
                    anyhow::bail!("IQ file not found: {}", path.display());
                }

                let extension = path
                    .extension()
                    .and_then(|s| s.to_str())
                    .unwrap_or("")
                    .to_lowercase();

                match extension.as_str() {
                    "wav" => Ok(Box::new(WavSource::open(path)?)),
                    "cf32" | "iq" | "cfile" => Ok(Box::new(Cf32Source::open(path)?)),
                    other => {
                        log::warn!("Unknown file extension '.{other}', assuming raw cf32 IQ");
                        Ok(Box::new(Cf32Source::open(path)?))
                    }
                }
            }
        }
    }
}
