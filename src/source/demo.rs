//! Synthetic IQ signal for running without a recording.

use std::f64::consts::PI;

use anyhow::Result;
use iqscope_core::Sample;

use super::IqSource;

/// Bursts per second.
const BURST_RATE: u32 = 10;

/// Two steady tones plus a short, strong burst ten times a second, so both
/// the spectrum and the scope trigger have something to show.
#[derive(Debug)]
pub struct DemoSource {
    sample_rate: u32,
    position: u64,
    burst_period: u64,
    burst_len: u64,
}

impl DemoSource {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(BURST_RATE * 20);
        let burst_period = u64::from(sample_rate / BURST_RATE);
        Self {
            sample_rate,
            position: 0,
            burst_period,
            burst_len: burst_period / 20,
        }
    }

    fn tone(&self, freq_fraction: f64, amplitude: f64) -> (f64, f64) {
        #[allow(clippy::cast_precision_loss, reason = "phase of a demo signal")]
        let phase = 2.0 * PI * freq_fraction * self.position as f64;
        (amplitude * phase.cos(), amplitude * phase.sin())
    }

    fn next_sample(&mut self) -> Sample {
        let (mut i, mut q) = self.tone(1.0 / 8.0, 0.1);
        let (bi, bq) = self.tone(-1.0 / 5.0, 0.05);
        i += bi;
        q += bq;

        if self.position % self.burst_period < self.burst_len {
            let (bi, bq) = self.tone(1.0 / 16.0, 0.8);
            i += bi;
            q += bq;
        }

        self.position += 1;
        #[allow(clippy::cast_possible_truncation, reason = "signal is well inside f32 range")]
        Sample::new(i as f32, q as f32)
    }
}

impl IqSource for DemoSource {
    fn read(&mut self, block: &mut [Sample]) -> Result<usize> {
        for dst in block.iter_mut() {
            *dst = self.next_sample();
        }
        Ok(block.len())
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }
}
