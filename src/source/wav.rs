//! WAV file source.
//!
//! Reads 16-bit stereo WAV files and yields complex IQ samples.
//! Left channel = I (in-phase), right channel = Q (quadrature).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use iqscope_core::Sample;

use super::IqSource;

/// Full scale of a signed 16-bit sample.
const I16_SCALE: f32 = 32768.0;

pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    sample_rate: u32,
}

impl std::fmt::Debug for WavSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavSource")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl WavSource {
    /// Open a WAV file, rejecting anything but 16-bit integer stereo.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file {}", path.display()))?;

        let spec = reader.spec();
        if spec.channels != 2 {
            anyhow::bail!(
                "WAV file must be stereo (2 channels), found {} channels",
                spec.channels
            );
        }
        if spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int {
            anyhow::bail!(
                "WAV file must be 16-bit integer, found {} bits ({:?})",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        log::info!(
            "Opened WAV file {}: {} Hz, {:.2} seconds",
            path.display(),
            spec.sample_rate,
            f64::from(reader.duration()) / f64::from(spec.sample_rate)
        );

        Ok(Self {
            reader,
            sample_rate: spec.sample_rate,
        })
    }
}

impl IqSource for WavSource {
    fn read(&mut self, block: &mut [Sample]) -> Result<usize> {
        let mut samples = self.reader.samples::<i16>();
        let mut count = 0;

        for dst in block.iter_mut() {
            let (Some(i), Some(q)) = (samples.next(), samples.next()) else {
                break;
            };
            let i = i.context("Failed to read WAV sample")?;
            let q = q.context("Failed to read WAV sample")?;

            *dst = Sample::new(f32::from(i) / I16_SCALE, f32::from(q) / I16_SCALE);
            count += 1;
        }

        Ok(count)
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }
}
