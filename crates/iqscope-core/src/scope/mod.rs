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

//! Time-domain (oscilloscope) sink.
//!
//! Projects each complex sample to a real value, looks for the configured
//! trigger condition and captures fixed-length traces starting a configurable
//! number of samples before the trigger. Completed traces are published on a
//! bounded channel; when the consumer falls behind, traces are dropped.

mod trigger;

pub use trigger::{Edge, TriggerSettings, TriggerState};

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::message::{Control, Message, MessageKind, MessageQueue};
use crate::sink::{Sample, SampleSink, SinkId};

use trigger::Trigger;

/// Complex-to-real projection used for traces and trigger evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Projection {
    /// In-phase component.
    #[default]
    Real,
    /// Quadrature component.
    Imag,
    /// Linear magnitude.
    Magnitude,
    /// Power in dB, floored at -200 dB.
    MagnitudeDb,
    /// Phase in radians.
    Phase,
}

impl Projection {
    #[must_use]
    pub fn project(self, sample: Sample) -> f32 {
        match self {
            Self::Real => sample.re,
            Self::Imag => sample.im,
            Self::Magnitude => sample.norm(),
            Self::MagnitudeDb => {
                let power = sample.norm_sqr();
                if power > 1e-20 {
                    10.0 * power.log10()
                } else {
                    -200.0
                }
            }
            Self::Phase => sample.arg(),
        }
    }
}

/// Where the trigger fired in the most recent block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPoint {
    /// Trigger disabled: the whole block is live.
    FreeRun,
    /// Trigger fired at `index` within the block; `to_end` samples remain from
    /// the trigger point to the end of the block.
    Captured { index: usize, to_end: usize },
}

/// A sink that reports where its trigger fired in the last fed block.
pub trait TriggeredSink: SampleSink {
    /// `None` if the trigger did not fire during the last `feed`.
    fn trigger_point(&self) -> Option<TriggerPoint>;
}

/// Scope configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeSettings {
    /// Samples per captured trace.
    pub trace_size: usize,
    /// Samples of history kept ahead of the trigger point.
    pub pre_trigger: usize,
    pub trigger: TriggerSettings,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self {
            trace_size: 1024,
            pre_trigger: 0,
            trigger: TriggerSettings::default(),
        }
    }
}

/// A completed trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeTrace {
    /// Projected values, `trace_size` long.
    pub values: Vec<f32>,
    /// Index of the trigger sample within `values`.
    pub trigger_offset: usize,
    /// Running count of traces produced by this scope.
    pub sequence: u64,
}

/// Oscilloscope sink.
pub struct ScopeVis {
    id: SinkId,
    queue: Arc<MessageQueue>,
    trace_size: usize,
    pre_trigger: usize,
    trigger: Trigger,
    history: VecDeque<f32>,
    trace: Option<Vec<f32>>,
    trace_offset: usize,
    block_trigger: Option<TriggerPoint>,
    traces_captured: u64,
    tx: mpsc::Sender<ScopeTrace>,
}

impl std::fmt::Debug for ScopeVis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeVis")
            .field("id", &self.id)
            .field("trace_size", &self.trace_size)
            .field("pre_trigger", &self.pre_trigger)
            .field("state", &self.trigger.state())
            .finish_non_exhaustive()
    }
}

/// Clamp trace geometry to something usable.
fn sanitize_trace(trace_size: usize, pre_trigger: usize) -> (usize, usize) {
    let trace_size = if trace_size == 0 {
        warn!("Scope trace size 0 requested, using 1");
        1
    } else {
        trace_size
    };

    let pre_trigger = if pre_trigger >= trace_size {
        warn!(
            "Pre-trigger {pre_trigger} does not fit trace of {trace_size}, using {}",
            trace_size - 1
        );
        trace_size - 1
    } else {
        pre_trigger
    };

    (trace_size, pre_trigger)
}

impl ScopeVis {
    /// Create an armed scope publishing traces on `tx`.
    #[must_use]
    pub fn new(settings: ScopeSettings, tx: mpsc::Sender<ScopeTrace>) -> Self {
        let (trace_size, pre_trigger) = sanitize_trace(settings.trace_size, settings.pre_trigger);
        let mut trigger = Trigger::new(settings.trigger);
        trigger.arm();

        Self {
            id: SinkId::next(),
            queue: Arc::new(MessageQueue::new()),
            trace_size,
            pre_trigger,
            trigger,
            history: VecDeque::with_capacity(pre_trigger),
            trace: None,
            trace_offset: 0,
            block_trigger: None,
            traces_captured: 0,
            tx,
        }
    }

    #[must_use]
    pub fn trigger_state(&self) -> TriggerState {
        self.trigger.state()
    }

    #[must_use]
    pub fn trigger_settings(&self) -> &TriggerSettings {
        self.trigger.settings()
    }

    #[must_use]
    pub fn trace_size(&self) -> usize {
        self.trace_size
    }

    #[must_use]
    pub fn pre_trigger(&self) -> usize {
        self.pre_trigger
    }

    #[must_use]
    pub fn traces_captured(&self) -> u64 {
        self.traces_captured
    }

    /// Drop history and any partial trace, then re-arm.
    fn restart(&mut self) {
        self.history.clear();
        self.trace = None;
        self.block_trigger = None;
        self.trigger.reset();
        self.trigger.arm();
    }

    fn remember(&mut self, value: f32) {
        if self.pre_trigger == 0 {
            return;
        }
        if self.history.len() == self.pre_trigger {
            self.history.pop_front();
        }
        self.history.push_back(value);
    }

    fn begin_trace(&mut self, value: f32) {
        let mut trace = Vec::with_capacity(self.trace_size);
        trace.extend(self.history.iter().copied());
        self.trace_offset = trace.len();
        self.trace = Some(trace);
        self.extend_trace(value);
    }

    fn extend_trace(&mut self, value: f32) {
        let Some(trace) = self.trace.as_mut() else {
            return;
        };
        trace.push(value);
        if trace.len() < self.trace_size {
            return;
        }

        if let Some(values) = self.trace.take() {
            self.traces_captured += 1;
            let trace = ScopeTrace {
                values,
                trigger_offset: self.trace_offset,
                sequence: self.traces_captured,
            };
            if self.tx.try_send(trace).is_err() {
                debug!("{}: trace consumer behind, dropping trace", self.id);
            }
        }

        self.trigger.release();
        if !self.trigger.settings().one_shot {
            self.trigger.arm();
        }
    }
}

impl SampleSink for ScopeVis {
    fn feed(&mut self, samples: &[Sample], _positive_only: bool) {
        self.block_trigger = None;
        let free_run = !self.trigger.settings().enabled;
        let channel = self.trigger.settings().channel;
        let len = samples.len();

        for (i, &sample) in samples.iter().enumerate() {
            let value = channel.project(sample);

            let fired = if free_run {
                self.trace.is_none() && self.trigger.force()
            } else {
                self.trigger.evaluate(value)
            };

            if self.trace.is_some() {
                self.extend_trace(value);
            } else if fired {
                if self.block_trigger.is_none() {
                    self.block_trigger = Some(TriggerPoint::Captured {
                        index: i,
                        to_end: len - i,
                    });
                }
                self.begin_trace(value);
            }

            self.remember(value);
        }

        if free_run && len > 0 {
            self.block_trigger = Some(TriggerPoint::FreeRun);
        }
    }

    fn start(&mut self) {
        self.restart();
    }

    fn stop(&mut self) {
        self.trace = None;
        self.block_trigger = None;
        self.trigger.reset();
    }

    fn handle_message(&mut self, message: &Message) -> bool {
        if !message.is_for(self.id) || !message.matches(MessageKind::ScopeControl) {
            return false;
        }

        match message.body() {
            Control::SetTriggerParameters(settings) => {
                debug!("{}: trigger settings {:?}", self.id, settings);
                self.trigger.configure(settings.clone());
                self.restart();
                true
            }
            Control::ConfigureTrace {
                trace_size,
                pre_trigger,
            } => {
                let (trace_size, pre_trigger) = sanitize_trace(*trace_size, *pre_trigger);
                debug!("{}: trace size {trace_size}, pre-trigger {pre_trigger}", self.id);
                self.trace_size = trace_size;
                self.pre_trigger = pre_trigger;
                self.restart();
                true
            }
            Control::RearmTrigger => {
                if self.trigger.state() == TriggerState::Idle {
                    self.trigger.arm();
                }
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

impl TriggeredSink for ScopeVis {
    fn trigger_point(&self) -> Option<TriggerPoint> {
        self.block_trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(len: usize, at: usize) -> Vec<Sample> {
        (0..len)
            .map(|i| Sample::new(if i >= at { 1.0 } else { 0.0 }, 0.0))
            .collect()
    }

    fn triggered_scope(
        trace_size: usize,
        pre_trigger: usize,
        one_shot: bool,
    ) -> (ScopeVis, mpsc::Receiver<ScopeTrace>) {
        let (tx, rx) = mpsc::channel(64);
        let scope = ScopeVis::new(
            ScopeSettings {
                trace_size,
                pre_trigger,
                trigger: TriggerSettings {
                    enabled: true,
                    level: 0.5,
                    one_shot,
                    ..Default::default()
                },
            },
            tx,
        );
        (scope, rx)
    }

    #[test]
    fn test_projection() {
        let s = Sample::new(3.0, 4.0);
        assert_eq!(Projection::Real.project(s), 3.0);
        assert_eq!(Projection::Imag.project(s), 4.0);
        assert!((Projection::Magnitude.project(s) - 5.0).abs() < 1e-6);
        assert!((Projection::MagnitudeDb.project(s) - 13.979_4).abs() < 1e-3);
        assert_eq!(Projection::MagnitudeDb.project(Sample::new(0.0, 0.0)), -200.0);
    }

    #[test]
    fn test_step_trigger_reports_index() {
        let (mut scope, _rx) = triggered_scope(16, 0, false);
        scope.feed(&step(1024, 512), false);
        assert_eq!(
            scope.trigger_point(),
            Some(TriggerPoint::Captured {
                index: 512,
                to_end: 512
            })
        );
    }

    #[test]
    fn test_trigger_delay_shifts_capture() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut scope = ScopeVis::new(
            ScopeSettings {
                trace_size: 4,
                pre_trigger: 2,
                trigger: TriggerSettings {
                    enabled: true,
                    level: 0.5,
                    delay: 5,
                    ..Default::default()
                },
            },
            tx,
        );
        scope.feed(&step(64, 10), false);

        assert_eq!(
            scope.trigger_point(),
            Some(TriggerPoint::Captured {
                index: 15,
                to_end: 49
            })
        );
        let trace = rx.try_recv().unwrap();
        assert_eq!(trace.values, vec![1.0; 4]);
        assert_eq!(trace.trigger_offset, 2);
    }

    #[test]
    fn test_no_trigger_reports_none() {
        let (mut scope, rx) = triggered_scope(16, 0, false);
        scope.feed(&vec![Sample::new(0.0, 0.0); 256], false);
        assert_eq!(scope.trigger_point(), None);
        assert_eq!(scope.trigger_state(), TriggerState::Armed);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_trace_includes_pre_trigger_history() {
        let (mut scope, mut rx) = triggered_scope(8, 3, false);
        scope.feed(&step(32, 10), false);

        let trace = rx.try_recv().unwrap();
        assert_eq!(trace.values, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        assert_eq!(trace.trigger_offset, 3);
        assert_eq!(trace.sequence, 1);
    }

    #[test]
    fn test_trace_spans_blocks() {
        let (mut scope, mut rx) = triggered_scope(100, 0, false);
        scope.feed(&step(64, 60), false);
        assert_eq!(scope.trigger_state(), TriggerState::Captured);
        assert!(rx.try_recv().is_err());

        scope.feed(&step(64, 0), false);
        assert_eq!(scope.trigger_state(), TriggerState::Captured);
        assert!(rx.try_recv().is_err());

        scope.feed(&step(64, 0), false);
        let trace = rx.try_recv().unwrap();
        assert_eq!(trace.values.len(), 100);
        assert!(trace.values.iter().all(|&v| v == 1.0));
        // Trace completed and re-armed; the level never fell so no new edge.
        assert_eq!(scope.trigger_state(), TriggerState::Armed);
        assert_eq!(scope.trigger_point(), None);
    }

    #[test]
    fn test_one_shot_waits_for_rearm() {
        let (mut scope, mut rx) = triggered_scope(4, 0, true);
        let square: Vec<Sample> = (0..64)
            .map(|i| Sample::new(if (i / 8) % 2 == 1 { 1.0 } else { 0.0 }, 0.0))
            .collect();

        scope.feed(&square, false);
        assert_eq!(scope.traces_captured(), 1);
        assert_eq!(scope.trigger_state(), TriggerState::Idle);
        assert!(rx.try_recv().is_ok());

        assert!(scope.handle_message(&Message::new(Control::RearmTrigger)));
        assert_eq!(scope.trigger_state(), TriggerState::Armed);
        scope.feed(&square, false);
        assert_eq!(scope.traces_captured(), 2);
    }

    #[test]
    fn test_free_run_captures_every_block() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut scope = ScopeVis::new(
            ScopeSettings {
                trace_size: 128,
                ..Default::default()
            },
            tx,
        );

        for _ in 0..4 {
            scope.feed(&vec![Sample::new(0.0, 0.0); 128], false);
            assert_eq!(scope.trigger_point(), Some(TriggerPoint::FreeRun));
        }
        let mut traces = 0;
        while rx.try_recv().is_ok() {
            traces += 1;
        }
        assert_eq!(traces, 4);
    }

    #[test]
    fn test_set_trigger_parameters_message() {
        let (tx, _rx) = mpsc::channel(4);
        let mut scope = ScopeVis::new(ScopeSettings::default(), tx);
        let settings = TriggerSettings {
            enabled: true,
            level: 0.25,
            edge: Edge::Negative,
            channel: Projection::Magnitude,
            holdoff: 2,
            one_shot: false,
            delay: 0,
            repeat: 0,
        };

        let claimed = scope.handle_message(&Message::new(Control::SetTriggerParameters(
            settings.clone(),
        )));
        assert!(claimed);
        assert_eq!(scope.trigger_settings(), &settings);
        assert_eq!(scope.trigger_state(), TriggerState::Armed);
    }

    #[test]
    fn test_spectrum_messages_not_claimed() {
        let (tx, _rx) = mpsc::channel(4);
        let mut scope = ScopeVis::new(ScopeSettings::default(), tx);
        assert!(!scope.handle_message(&Message::new(Control::ResetAccumulation)));
        assert!(!scope.handle_message(&Message::new(Control::RearmTrigger).to(SinkId::next())));
    }

    #[test]
    fn test_misconfigured_trace_is_corrected() {
        assert_eq!(sanitize_trace(0, 0), (1, 0));
        assert_eq!(sanitize_trace(16, 16), (16, 15));

        let (tx, _rx) = mpsc::channel(4);
        let mut scope = ScopeVis::new(ScopeSettings::default(), tx);
        assert!(scope.handle_message(&Message::new(Control::ConfigureTrace {
            trace_size: 32,
            pre_trigger: 40,
        })));
        assert_eq!(scope.trace_size(), 32);
        assert_eq!(scope.pre_trigger(), 31);
    }

    #[test]
    fn test_stop_then_start_rearms() {
        let (mut scope, _rx) = triggered_scope(16, 0, false);
        scope.stop();
        scope.stop();
        assert_eq!(scope.trigger_state(), TriggerState::Idle);
        scope.feed(&step(64, 10), false);
        assert_eq!(scope.trigger_point(), None);

        scope.start();
        scope.feed(&step(64, 10), false);
        assert_eq!(
            scope.trigger_point(),
            Some(TriggerPoint::Captured {
                index: 10,
                to_end: 54
            })
        );
    }
}
