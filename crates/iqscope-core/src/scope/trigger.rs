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

//! Level/edge trigger with holdoff.

use serde::{Deserialize, Serialize};

use super::Projection;

/// Edge polarity that fires the trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// Value rises above the level.
    #[default]
    Positive,
    /// Value falls to or below the level.
    Negative,
    /// Either crossing.
    Both,
}

/// Trigger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    /// When false the scope free-runs and every block is captured at index 0.
    pub enabled: bool,
    /// Level in the units of `channel`.
    pub level: f32,
    pub edge: Edge,
    /// Which projection of the complex sample is compared to `level`.
    pub channel: Projection,
    /// Samples a new condition must persist before it counts.
    pub holdoff: u32,
    /// Capture a single trace, then wait for an explicit re-arm.
    pub one_shot: bool,
    /// Samples between the trigger edge and the start of the capture.
    pub delay: usize,
    /// Extra matching edges to skip before the trigger fires.
    pub repeat: u32,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 0.0,
            edge: Edge::Positive,
            channel: Projection::Real,
            holdoff: 0,
            one_shot: false,
            delay: 0,
            repeat: 0,
        }
    }
}

/// Trigger lifecycle. Transitions only Idle → Armed → Captured → Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Armed,
    Captured,
}

impl TriggerState {
    /// The only state this one may move to.
    #[must_use]
    pub const fn successor(self) -> Self {
        match self {
            Self::Idle => Self::Armed,
            Self::Armed => Self::Captured,
            Self::Captured => Self::Idle,
        }
    }
}

/// Edge comparator plus state machine.
///
/// The comparator sees every sample, armed or not, so that re-arming after a
/// capture does not fire on a level that was already crossed.
#[derive(Debug, Clone)]
pub(super) struct Trigger {
    settings: TriggerSettings,
    state: TriggerState,
    prev_condition: bool,
    trues: u32,
    falses: u32,
    edges_seen: u32,
    delay_remaining: Option<usize>,
}

impl Trigger {
    pub(super) fn new(settings: TriggerSettings) -> Self {
        let mut trigger = Self {
            settings,
            state: TriggerState::Idle,
            prev_condition: false,
            trues: 0,
            falses: 0,
            edges_seen: 0,
            delay_remaining: None,
        };
        trigger.reset_comparator();
        trigger
    }

    pub(super) fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    pub(super) fn state(&self) -> TriggerState {
        self.state
    }

    /// Replace the settings; the comparator history starts over.
    pub(super) fn configure(&mut self, settings: TriggerSettings) {
        self.settings = settings;
        self.reset_comparator();
    }

    /// Return to `Idle` from any state by walking the legal transitions.
    pub(super) fn reset(&mut self) {
        while self.state != TriggerState::Idle {
            self.advance();
        }
        self.reset_comparator();
    }

    /// Idle → Armed. Returns false if the trigger was not idle.
    pub(super) fn arm(&mut self) -> bool {
        if self.state != TriggerState::Idle {
            return false;
        }
        self.advance();
        true
    }

    /// Captured → Idle, ending the current capture.
    pub(super) fn release(&mut self) {
        if self.state == TriggerState::Captured {
            self.advance();
        }
    }

    /// Armed → Captured without evaluating the signal.
    pub(super) fn force(&mut self) -> bool {
        if self.state != TriggerState::Armed {
            return false;
        }
        self.fire();
        true
    }

    /// Feed one projected value. Fires (Armed → Captured) on the
    /// `repeat + 1`-th matching edge, `delay` samples after that edge.
    pub(super) fn evaluate(&mut self, value: f32) -> bool {
        let edge = self.compare(value);
        if self.state != TriggerState::Armed {
            return false;
        }

        if let Some(remaining) = self.delay_remaining {
            if remaining > 0 {
                self.delay_remaining = Some(remaining - 1);
                return false;
            }
            self.fire();
            return true;
        }

        if !edge {
            return false;
        }
        if self.edges_seen < self.settings.repeat {
            self.edges_seen += 1;
            return false;
        }
        if self.settings.delay > 0 {
            self.delay_remaining = Some(self.settings.delay - 1);
            return false;
        }
        self.fire();
        true
    }

    fn fire(&mut self) {
        self.advance();
        self.edges_seen = 0;
        self.delay_remaining = None;
    }

    fn advance(&mut self) {
        self.state = self.state.successor();
    }

    fn reset_comparator(&mut self) {
        self.prev_condition = false;
        self.trues = 0;
        self.falses = self.settings.holdoff;
        self.edges_seen = 0;
        self.delay_remaining = None;
    }

    fn compare(&mut self, value: f32) -> bool {
        let mut condition = value > self.settings.level;
        let holdoff = self.settings.holdoff;

        if condition {
            if self.trues < holdoff {
                condition = false;
                self.trues += 1;
            } else {
                self.falses = 0;
            }
        } else if self.falses < holdoff {
            condition = true;
            self.falses += 1;
        } else {
            self.trues = 0;
        }

        let edge = match self.settings.edge {
            Edge::Positive => !self.prev_condition && condition,
            Edge::Negative => self.prev_condition && !condition,
            Edge::Both => self.prev_condition != condition,
        };
        self.prev_condition = condition;
        edge
    }
}
