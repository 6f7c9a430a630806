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

//! Combined spectrum + scope sink.
//!
//! Every block goes to the scope first. Depending on the [`WindowingPolicy`],
//! the spectrum then sees either the whole block or only the samples leading
//! up to the scope's trigger point, so the displayed spectrum describes the
//! signal just before the captured event.

use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageQueue};
use crate::scope::{ScopeVis, TriggerPoint, TriggeredSink};
use crate::sink::{Sample, SampleSink, SinkControl, SinkId};
use crate::spectrum::SpectrumVis;

/// Which part of each block the spectrum sink is fed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowingPolicy {
    /// The whole block, regardless of the trigger.
    #[default]
    FreeRun,
    /// `[0, k)` where `k` is the trigger index within the block.
    TriggerIndexRelative,
    /// `[0, len - to_end)` where `to_end` counts samples from the trigger to
    /// the end of the block. Yields the same window as the index form.
    TriggerIteratorRelative,
}

/// What the spectrum sink gets when the trigger did not fire in a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoTriggerWindow {
    /// Nothing; the spectrum sink is not fed.
    #[default]
    Skip,
    /// An empty slice.
    LegacyEmpty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComboConfig {
    pub policy: WindowingPolicy,
    pub no_trigger: NoTriggerWindow,
}

/// Slice of a `len`-sample block that the spectrum sink should see.
///
/// `None` means the spectrum sink is not fed this block.
#[must_use]
pub fn spectrum_window(
    config: ComboConfig,
    trigger: Option<TriggerPoint>,
    len: usize,
) -> Option<Range<usize>> {
    if config.policy == WindowingPolicy::FreeRun {
        return Some(0..len);
    }

    match trigger {
        Some(TriggerPoint::FreeRun) => Some(0..len),
        Some(TriggerPoint::Captured { index, to_end }) => match config.policy {
            WindowingPolicy::TriggerIteratorRelative => Some(0..len - to_end.min(len)),
            _ => Some(0..index.min(len)),
        },
        None => match config.no_trigger {
            NoTriggerWindow::Skip => None,
            NoTriggerWindow::LegacyEmpty => Some(0..0),
        },
    }
}

/// Fans one sample stream out to a spectrum sink and a triggered scope sink.
pub struct TriggeredComboVis<S = SpectrumVis, T = ScopeVis> {
    id: SinkId,
    queue: Arc<MessageQueue>,
    spectrum: S,
    scope: T,
    config: ComboConfig,
}

impl<S, T> std::fmt::Debug for TriggeredComboVis<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggeredComboVis")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: SampleSink, T: TriggeredSink> TriggeredComboVis<S, T> {
    #[must_use]
    pub fn new(spectrum: S, scope: T, config: ComboConfig) -> Self {
        Self {
            id: SinkId::next(),
            queue: Arc::new(MessageQueue::new()),
            spectrum,
            scope,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> ComboConfig {
        self.config
    }

    #[must_use]
    pub fn spectrum(&self) -> &S {
        &self.spectrum
    }

    #[must_use]
    pub fn scope(&self) -> &T {
        &self.scope
    }

    /// Control handle addressing the spectrum sink's own queue.
    #[must_use]
    pub fn spectrum_control(&self) -> SinkControl {
        self.spectrum.control()
    }

    /// Control handle addressing the scope sink's own queue.
    #[must_use]
    pub fn scope_control(&self) -> SinkControl {
        self.scope.control()
    }
}

impl<S: SampleSink, T: TriggeredSink> SampleSink for TriggeredComboVis<S, T> {
    fn feed(&mut self, samples: &[Sample], positive_only: bool) {
        self.scope.feed(samples, positive_only);

        if let Some(window) =
            spectrum_window(self.config, self.scope.trigger_point(), samples.len())
        {
            self.spectrum.feed(&samples[window], positive_only);
        }
    }

    fn start(&mut self) {
        self.spectrum.start();
        self.scope.start();
    }

    fn stop(&mut self) {
        self.scope.stop();
        self.spectrum.stop();
    }

    fn handle_message(&mut self, message: &Message) -> bool {
        let spectrum = self.spectrum.handle_message(message);
        let scope = self.scope.handle_message(message);
        spectrum || scope
    }

    fn input_queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    fn id(&self) -> SinkId {
        self.id
    }

    /// Drain the children's queues and then our own before feeding.
    fn process(&mut self, samples: &[Sample], positive_only: bool) {
        self.spectrum.apply_pending();
        self.scope.apply_pending();
        self.apply_pending();
        self.feed(samples, positive_only);
    }
}
