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

//! Typed control messages passed between threads.
//!
//! A [`Message`] carries a [`Control`] payload, an optional destination and,
//! when it is synchronous, the completing half of a rendezvous. Messages are
//! delivered through a [`MessageQueue`]; the consumer applies them and calls
//! [`Message::completed`], which wakes the submitter.
//!
//! Dispatch is done against [`MessageKind`], a closed set of kinds with an
//! explicit parent table. A consumer written for a general kind (for example
//! [`MessageKind::SpectrumControl`]) also accepts every more specific kind
//! declared beneath it.

mod queue;
mod rendezvous;

pub use queue::MessageQueue;
pub use rendezvous::{rendezvous, Completer, Deadline, Waiter};

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::scope::TriggerSettings;
use crate::sink::SinkId;

/// Errors surfaced to the submitter of a synchronous message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("message not completed within {0:?}")]
    Timeout(Duration),

    #[error("wait for message completion was cancelled")]
    Cancelled,

    #[error("message was dropped by the consumer without completion")]
    Abandoned,
}

/// Closed set of message kinds.
///
/// The abstract kinds (`Control`, `SpectrumControl`, `ScopeControl`) have no
/// payload of their own; they exist so consumers can match whole families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Root of every control message.
    Control,
    /// Messages addressed to frequency-domain sinks.
    SpectrumControl,
    /// Messages addressed to time-domain sinks.
    ScopeControl,
    ReconfigureTransformSize,
    ResetAccumulation,
    SetTriggerParameters,
    ConfigureTrace,
    RearmTrigger,
}

impl MessageKind {
    /// Declared parent of this kind, if any.
    #[must_use]
    pub const fn parent(self) -> Option<Self> {
        match self {
            Self::Control => None,
            Self::SpectrumControl | Self::ScopeControl => Some(Self::Control),
            Self::ReconfigureTransformSize | Self::ResetAccumulation => {
                Some(Self::SpectrumControl)
            }
            Self::SetTriggerParameters | Self::ConfigureTrace | Self::RearmTrigger => {
                Some(Self::ScopeControl)
            }
        }
    }

    /// Whether this kind is `kind` or declares it as an ancestor.
    #[must_use]
    pub fn is_a(self, kind: Self) -> bool {
        let mut current = Some(self);
        while let Some(k) = current {
            if k == kind {
                return true;
            }
            current = k.parent();
        }
        false
    }
}

/// Control vocabulary consumed by the sinks.
///
/// Every payload is an owned value copy taken when the message is built.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    /// Change the FFT size of a spectrum sink.
    ReconfigureTransformSize { size: usize },
    /// Clear averaging / peak-hold state.
    ResetAccumulation,
    /// Replace the scope trigger configuration.
    SetTriggerParameters(TriggerSettings),
    /// Change trace length and pre-trigger depth of a scope sink.
    ConfigureTrace { trace_size: usize, pre_trigger: usize },
    /// Re-arm a one-shot trigger.
    RearmTrigger,
}

impl Control {
    /// Concrete kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::ReconfigureTransformSize { .. } => MessageKind::ReconfigureTransformSize,
            Self::ResetAccumulation => MessageKind::ResetAccumulation,
            Self::SetTriggerParameters(_) => MessageKind::SetTriggerParameters,
            Self::ConfigureTrace { .. } => MessageKind::ConfigureTrace,
            Self::RearmTrigger => MessageKind::RearmTrigger,
        }
    }
}

/// A control message in flight.
///
/// Ownership moves into the queue on submission. The consumer either calls
/// [`Message::completed`] or drops the message; in both cases a waiting
/// submitter is released.
#[derive(Debug)]
pub struct Message {
    body: Control,
    destination: Option<SinkId>,
    completer: Option<Completer>,
    waiter: Option<Waiter>,
}

impl Message {
    /// Create an asynchronous message.
    #[must_use]
    pub fn new(body: Control) -> Self {
        Self {
            body,
            destination: None,
            completer: None,
            waiter: None,
        }
    }

    /// Address the message to one sink. Other sinks will not claim it.
    #[must_use]
    pub fn to(mut self, destination: SinkId) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Make the message synchronous: the submitter waits for completion
    /// until `deadline` expires or `cancel` fires.
    #[must_use]
    pub fn synchronous(mut self, deadline: Deadline, cancel: CancellationToken) -> Self {
        let (completer, waiter) = rendezvous(deadline, cancel);
        self.completer = Some(completer);
        self.waiter = Some(waiter);
        self
    }

    #[must_use]
    pub fn body(&self) -> &Control {
        &self.body
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    #[must_use]
    pub fn destination(&self) -> Option<SinkId> {
        self.destination
    }

    /// Whether a submitter will wait for this message to complete.
    #[must_use]
    pub fn is_synchronous(&self) -> bool {
        self.completer.is_some()
    }

    /// Whether this message's kind is `kind` or one of its descendants.
    #[must_use]
    pub fn matches(&self, kind: MessageKind) -> bool {
        self.kind().is_a(kind)
    }

    /// Whether the message may be claimed by the sink `id`.
    #[must_use]
    pub fn is_for(&self, id: SinkId) -> bool {
        self.destination.map_or(true, |dest| dest == id)
    }

    /// Complete the message, handing `result` to the waiting submitter.
    ///
    /// Consumes the message, so it can only ever be completed once. Completing
    /// an asynchronous message, or one whose submitter has already given up,
    /// is a no-op.
    pub fn completed(mut self, result: i32) {
        if let Some(completer) = self.completer.take() {
            completer.complete(result);
        }
    }

    /// Claim the message for application.
    ///
    /// Returns `false` when the synchronous submitter already timed out or was
    /// cancelled; such a message must be dropped without being applied.
    /// Asynchronous messages can always be claimed.
    #[must_use]
    pub fn claim(&self) -> bool {
        self.completer.as_ref().map_or(true, Completer::claim)
    }

    pub(crate) fn take_waiter(&mut self) -> Option<Waiter> {
        self.waiter.take()
    }
}
