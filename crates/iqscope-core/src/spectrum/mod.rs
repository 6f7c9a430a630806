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

//! Frequency-domain sink.
//!
//! Frames the sample stream, windows each frame, transforms it and publishes
//! a DC-centered power spectrum in dB. Spectra are sent with `try_send`, so a
//! slow consumer loses frames rather than stalling the producer.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::message::{Control, Message, MessageKind, MessageQueue};
use crate::sink::{Sample, SampleSink, SinkId};
use crate::transform::{PlanLock, TransformEngine, WindowKind};

/// Floor for empty bins.
const MIN_DB: f32 = -100.0;

/// Spectrum averaging mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum Averaging {
    #[default]
    None,
    /// Mean of the last `frames` spectra.
    Moving { frames: usize },
    /// Per-bin maximum since the last reset.
    PeakHold,
}

/// Spectrum configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumSettings {
    pub fft_size: usize,
    /// Frame overlap in percent, 0..=99.
    pub overlap_percent: u8,
    pub window: WindowKind,
    pub averaging: Averaging,
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            overlap_percent: 0,
            window: WindowKind::default(),
            averaging: Averaging::None,
        }
    }
}

impl SpectrumSettings {
    fn sanitized(mut self) -> Self {
        if self.overlap_percent > 99 {
            warn!("Spectrum overlap {}% too high, using 99%", self.overlap_percent);
            self.overlap_percent = 99;
        }
        if self.averaging == (Averaging::Moving { frames: 0 }) {
            warn!("Moving average over 0 frames requested, using 1");
            self.averaging = Averaging::Moving { frames: 1 };
        }
        self
    }

    fn hop(&self) -> usize {
        let overlap = self.fft_size * usize::from(self.overlap_percent) / 100;
        (self.fft_size - overlap).max(1)
    }
}

/// Running average / peak-hold state.
#[derive(Debug, Default)]
struct Accumulator {
    frames: VecDeque<Vec<f32>>,
    sum: Vec<f32>,
    peak: Vec<f32>,
}

impl Accumulator {
    fn reset(&mut self) {
        self.frames.clear();
        self.sum.clear();
        self.peak.clear();
    }

    #[allow(clippy::cast_precision_loss, reason = "frame counts are small")]
    fn apply(&mut self, mode: Averaging, spectrum: Vec<f32>) -> Vec<f32> {
        match mode {
            Averaging::None => spectrum,
            Averaging::Moving { frames } => {
                if self.sum.len() != spectrum.len() {
                    self.reset();
                    self.sum = vec![0.0; spectrum.len()];
                }
                for (acc, &v) in self.sum.iter_mut().zip(&spectrum) {
                    *acc += v;
                }
                self.frames.push_back(spectrum);
                while self.frames.len() > frames.max(1) {
                    if let Some(old) = self.frames.pop_front() {
                        for (acc, v) in self.sum.iter_mut().zip(old) {
                            *acc -= v;
                        }
                    }
                }
                let count = self.frames.len() as f32;
                self.sum.iter().map(|acc| acc / count).collect()
            }
            Averaging::PeakHold => {
                if self.peak.len() == spectrum.len() {
                    for (peak, v) in self.peak.iter_mut().zip(spectrum) {
                        *peak = peak.max(v);
                    }
                } else {
                    self.peak = spectrum;
                }
                self.peak.clone()
            }
        }
    }
}

/// Spectrum analyzer sink.
pub struct SpectrumVis {
    id: SinkId,
    queue: Arc<MessageQueue>,
    settings: SpectrumSettings,
    engine: TransformEngine,
    window: Vec<f32>,
    frame: Vec<Sample>,
    accumulator: Accumulator,
    tx: mpsc::Sender<Vec<f32>>,
    spectra_produced: u64,
}

impl std::fmt::Debug for SpectrumVis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumVis")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .field("buffered", &self.frame.len())
            .finish_non_exhaustive()
    }
}

impl SpectrumVis {
    /// Create a spectrum sink whose engine plans under `plan_lock`.
    #[must_use]
    pub fn new(
        plan_lock: &Arc<PlanLock>,
        settings: SpectrumSettings,
        tx: mpsc::Sender<Vec<f32>>,
    ) -> Self {
        let mut vis = Self {
            id: SinkId::next(),
            queue: Arc::new(MessageQueue::new()),
            settings: settings.sanitized(),
            engine: TransformEngine::new(plan_lock),
            window: Vec::new(),
            frame: Vec::new(),
            accumulator: Accumulator::default(),
            tx,
            spectra_produced: 0,
        };
        vis.resize(vis.settings.fft_size);
        vis
    }

    #[must_use]
    pub fn settings(&self) -> &SpectrumSettings {
        &self.settings
    }

    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.settings.fft_size
    }

    #[must_use]
    pub fn spectra_produced(&self) -> u64 {
        self.spectra_produced
    }

    /// Switch to a new transform size, discarding buffered samples.
    fn resize(&mut self, fft_size: usize) {
        self.engine.configure(fft_size, false);
        self.settings.fft_size = self.engine.size();
        self.window = self.settings.window.coefficients(self.settings.fft_size);
        self.frame = Vec::with_capacity(self.settings.fft_size);
        self.accumulator.reset();
    }

    fn process_frame(&mut self, positive_only: bool) {
        for ((dst, &src), &w) in self
            .engine
            .input_mut()
            .iter_mut()
            .zip(&self.frame)
            .zip(&self.window)
        {
            *dst = src * w;
        }

        if let Err(e) = self.engine.transform() {
            warn!("{}: transform failed: {e}", self.id);
            return;
        }

        let output = self.engine.output();
        let n = output.len();
        #[allow(clippy::cast_precision_loss, reason = "FFT sizes fit in f32")]
        let normalization_db = 20.0 * (n as f32).log10();

        let half = n / 2;
        let shifted = output[half..].iter().chain(&output[..half]);
        let mut spectrum: Vec<f32> = shifted
            .map(|bin| {
                let mag = bin.norm();
                if mag > 0.0 {
                    (20.0 * mag.log10() - normalization_db).max(MIN_DB)
                } else {
                    MIN_DB
                }
            })
            .collect();

        if positive_only {
            spectrum.drain(..half);
        }

        let spectrum = self.accumulator.apply(self.settings.averaging, spectrum);
        self.spectra_produced += 1;
        if self.tx.try_send(spectrum).is_err() {
            debug!("{}: spectrum consumer behind, dropping frame", self.id);
        }
    }
}

impl SampleSink for SpectrumVis {
    fn feed(&mut self, samples: &[Sample], positive_only: bool) {
        let size = self.settings.fft_size;
        let hop = self.settings.hop().min(size);

        for &sample in samples {
            self.frame.push(sample);
            if self.frame.len() == size {
                self.process_frame(positive_only);
                self.frame.drain(..hop);
            }
        }
    }

    fn start(&mut self) {
        self.frame.clear();
        self.accumulator.reset();
    }

    fn stop(&mut self) {
        self.frame.clear();
    }

    fn handle_message(&mut self, message: &Message) -> bool {
        if !message.is_for(self.id) || !message.matches(MessageKind::SpectrumControl) {
            return false;
        }

        match message.body() {
            Control::ReconfigureTransformSize { size } => {
                debug!("{}: FFT size {} -> {size}", self.id, self.settings.fft_size);
                self.resize(*size);
                true
            }
            Control::ResetAccumulation => {
                self.accumulator.reset();
                true
            }
            _ => false,
        }
    }

    fn input_queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    fn id(&self) -> SinkId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Deadline, MessageError};
    use std::f32::consts::PI;
    use std::time::Duration;

    fn spectrum_vis(settings: SpectrumSettings) -> (SpectrumVis, mpsc::Receiver<Vec<f32>>) {
        let lock = Arc::new(PlanLock::new());
        let (tx, rx) = mpsc::channel(64);
        (SpectrumVis::new(&lock, settings, tx), rx)
    }

    #[allow(clippy::cast_precision_loss, reason = "test signal")]
    fn tone(bin: usize, size: usize, len: usize) -> Vec<Sample> {
        (0..len)
            .map(|i| Sample::from_polar(1.0, 2.0 * PI * (bin * i) as f32 / size as f32))
            .collect()
    }

    fn peak_bin(spectrum: &[f32]) -> usize {
        spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_tone_peaks_at_expected_bin() {
        let (mut vis, mut rx) = spectrum_vis(SpectrumSettings::default());
        vis.feed(&tone(64, 1024, 1024), false);

        let spectrum = rx.try_recv().unwrap();
        assert_eq!(spectrum.len(), 1024);
        // DC sits at the center after the shift.
        assert_eq!(peak_bin(&spectrum), 512 + 64);
        assert!(spectrum[512 + 64] > -20.0);
    }

    #[test]
    fn test_positive_only_halves_spectrum() {
        let (mut vis, mut rx) = spectrum_vis(SpectrumSettings::default());
        vis.feed(&tone(100, 1024, 1024), true);

        let spectrum = rx.try_recv().unwrap();
        assert_eq!(spectrum.len(), 512);
        assert_eq!(peak_bin(&spectrum), 100);
    }

    #[test]
    fn test_silence_hits_floor() {
        let (mut vis, mut rx) = spectrum_vis(SpectrumSettings::default());
        vis.feed(&vec![Sample::new(0.0, 0.0); 1024], false);
        assert!(rx.try_recv().unwrap().iter().all(|&db| db == MIN_DB));
    }

    #[test]
    fn test_partial_frames_accumulate() {
        let (mut vis, mut rx) = spectrum_vis(SpectrumSettings::default());
        vis.feed(&tone(8, 1024, 512), false);
        assert!(rx.try_recv().is_err());
        vis.feed(&tone(8, 1024, 512), false);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_overlap_produces_extra_frames() {
        let (mut vis, _rx) = spectrum_vis(SpectrumSettings {
            overlap_percent: 50,
            ..Default::default()
        });
        vis.feed(&vec![Sample::new(0.0, 0.0); 2048], false);
        assert_eq!(vis.spectra_produced(), 3);
    }

    #[test]
    fn test_peak_hold_and_reset_accumulation() {
        let (mut vis, mut rx) = spectrum_vis(SpectrumSettings {
            averaging: Averaging::PeakHold,
            ..Default::default()
        });
        let silence = vec![Sample::new(0.0, 0.0); 1024];

        vis.feed(&tone(32, 1024, 1024), false);
        vis.feed(&silence, false);
        let _ = rx.try_recv().unwrap();
        let held = rx.try_recv().unwrap();
        assert_eq!(peak_bin(&held), 512 + 32);
        assert!(held[512 + 32] > -20.0);

        assert!(vis.handle_message(&Message::new(Control::ResetAccumulation)));
        vis.feed(&silence, false);
        assert!(rx.try_recv().unwrap().iter().all(|&db| db == MIN_DB));
    }

    #[test]
    fn test_start_clears_peak_hold() {
        let (mut vis, mut rx) = spectrum_vis(SpectrumSettings {
            averaging: Averaging::PeakHold,
            ..Default::default()
        });
        let silence = vec![Sample::new(0.0, 0.0); 1024];

        vis.feed(&tone(32, 1024, 1024), false);
        vis.feed(&silence, false);
        let _ = rx.try_recv().unwrap();
        assert!(rx.try_recv().unwrap()[512 + 32] > -20.0);

        vis.start();
        vis.feed(&silence, false);
        assert!(rx.try_recv().unwrap().iter().all(|&db| db == MIN_DB));
    }

    #[test]
    fn test_moving_average() {
        let (mut vis, mut rx) = spectrum_vis(SpectrumSettings {
            window: WindowKind::Rectangular,
            averaging: Averaging::Moving { frames: 2 },
            ..Default::default()
        });

        vis.feed(&tone(16, 1024, 1024), false);
        let first = rx.try_recv().unwrap();
        vis.feed(&vec![Sample::new(0.0, 0.0); 1024], false);
        let second = rx.try_recv().unwrap();

        // Full-scale tone is 0 dB, silence is the floor; the mean sits halfway.
        let bin = 512 + 16;
        assert!(first[bin].abs() < 1e-3);
        assert!((second[bin] - MIN_DB / 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_zero_moving_frames_corrected() {
        let (vis, _rx) = spectrum_vis(SpectrumSettings {
            averaging: Averaging::Moving { frames: 0 },
            ..Default::default()
        });
        assert_eq!(vis.settings().averaging, Averaging::Moving { frames: 1 });
    }

    #[test]
    fn test_reconfigure_transform_size() {
        let (mut vis, mut rx) = spectrum_vis(SpectrumSettings::default());
        let message = Message::new(Control::ReconfigureTransformSize { size: 256 });
        assert!(vis.handle_message(&message));
        assert_eq!(vis.fft_size(), 256);

        vis.feed(&vec![Sample::new(0.0, 0.0); 256], false);
        assert_eq!(rx.try_recv().unwrap().len(), 256);
    }

    #[test]
    fn test_scope_messages_not_claimed() {
        let (mut vis, _rx) = spectrum_vis(SpectrumSettings::default());
        assert!(!vis.handle_message(&Message::new(Control::RearmTrigger)));
        let other = Message::new(Control::ResetAccumulation).to(SinkId::next());
        assert!(!vis.handle_message(&other));
    }

    #[test]
    fn test_queued_reconfigure_applies_before_feed() {
        let (mut vis, mut rx) = spectrum_vis(SpectrumSettings::default());
        vis.control()
            .post(Control::ReconfigureTransformSize { size: 128 });
        vis.process(&vec![Sample::new(0.0, 0.0); 128], false);
        assert_eq!(rx.try_recv().unwrap().len(), 128);
        assert!(vis.input_queue().is_empty());
    }

    #[test]
    fn test_timed_out_reconfigure_is_discarded() {
        let (mut vis, mut rx) = spectrum_vis(SpectrumSettings::default());
        let result = vis.control().execute(
            Control::ReconfigureTransformSize { size: 256 },
            Deadline::After(Duration::from_millis(20)),
        );
        assert_eq!(
            result,
            Err(MessageError::Timeout(Duration::from_millis(20)))
        );

        vis.process(&vec![Sample::new(0.0, 0.0); 1024], false);
        assert_eq!(vis.fft_size(), 1024);
        assert_eq!(rx.try_recv().unwrap().len(), 1024);
        assert!(vis.input_queue().is_empty());
    }

    #[test]
    fn test_serde_defaults() {
        let settings: SpectrumSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, SpectrumSettings::default());

        let settings: SpectrumSettings =
            serde_json::from_str(r#"{"averaging":{"mode":"moving","frames":4}}"#).unwrap();
        assert_eq!(settings.averaging, Averaging::Moving { frames: 4 });
    }
}
