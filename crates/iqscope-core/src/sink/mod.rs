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

//! Streaming sample consumer contract.
//!
//! Each sink is driven by exactly one producer thread, which hands it
//! contiguous blocks of samples. Control messages may be submitted from any
//! thread to the sink's own queue; they are applied on the producer thread
//! between blocks, so a block is always processed under a single
//! configuration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use num_complex::Complex32;
use tokio_util::sync::CancellationToken;

use crate::message::{Control, Deadline, Message, MessageError, MessageQueue};

/// One complex IQ sample.
pub type Sample = Complex32;

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle used to address messages to one sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

impl SinkId {
    /// Allocate a fresh identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sink#{}", self.0)
    }
}

/// A terminal or combinator stage consuming a stream of samples.
pub trait SampleSink: Send {
    /// Consume one block. `positive_only` marks a magnitude-only real signal
    /// rather than full complex IQ.
    fn feed(&mut self, samples: &[Sample], positive_only: bool);

    /// Begin (or restart) processing, clearing accumulated state.
    fn start(&mut self);

    /// Stop processing. Calling it on a stopped sink is harmless.
    fn stop(&mut self);

    /// Apply `message` if this sink recognizes it. Returns whether it was
    /// claimed.
    fn handle_message(&mut self, message: &Message) -> bool;

    /// Inbound control queue of this sink.
    fn input_queue(&self) -> &Arc<MessageQueue>;

    fn id(&self) -> SinkId;

    /// Drain and apply every queued control message.
    ///
    /// Claimed messages are completed with `0`. Unclaimed messages are
    /// dropped, which releases any synchronous submitter with
    /// [`MessageError::Abandoned`]. Messages whose submitter already timed out
    /// or was cancelled are discarded without being applied.
    fn apply_pending(&mut self) -> usize {
        let queue = Arc::clone(self.input_queue());
        let mut applied = 0;

        while let Some(message) = queue.pop() {
            if !message.claim() {
                debug!("{}: discarding withdrawn {:?}", self.id(), message.kind());
                continue;
            }
            if self.handle_message(&message) {
                applied += 1;
                message.completed(0);
            } else {
                debug!(
                    "{}: ignoring unclaimed {:?} (destination {:?})",
                    self.id(),
                    message.kind(),
                    message.destination()
                );
            }
        }

        applied
    }

    /// Apply pending control messages, then feed `samples`.
    fn process(&mut self, samples: &[Sample], positive_only: bool) {
        self.apply_pending();
        self.feed(samples, positive_only);
    }

    /// Handle for submitting control messages to this sink from other threads.
    fn control(&self) -> SinkControl {
        SinkControl {
            id: self.id(),
            queue: Arc::clone(self.input_queue()),
        }
    }
}

/// Cloneable, thread-safe handle to a sink's control queue.
#[derive(Debug, Clone)]
pub struct SinkControl {
    id: SinkId,
    queue: Arc<MessageQueue>,
}

impl SinkControl {
    #[must_use]
    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Fire-and-forget delivery.
    pub fn post(&self, body: Control) {
        // Asynchronous submission cannot fail.
        let _ = self.queue.submit(Message::new(body));
    }

    /// Deliver and wait for the sink to apply the message.
    pub fn execute(&self, body: Control, deadline: Deadline) -> Result<i32, MessageError> {
        self.queue.execute(Message::new(body), deadline)
    }

    /// Like [`SinkControl::execute`], releasing the wait when `cancel` fires.
    pub fn execute_with_cancel(
        &self,
        body: Control,
        deadline: Deadline,
        cancel: CancellationToken,
    ) -> Result<i32, MessageError> {
        self.queue
            .execute_with_cancel(Message::new(body), deadline, cancel)
    }
}
