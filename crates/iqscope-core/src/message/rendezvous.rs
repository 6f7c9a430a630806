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

//! One-shot completion handoff between a consumer and a blocked submitter.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use log::debug;
use tokio_util::sync::CancellationToken;

use super::MessageError;

/// Granularity at which a blocked waiter re-checks its cancellation token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

const PENDING: u8 = 0;
const CLAIMED: u8 = 1;
const WITHDRAWN: u8 = 2;

/// How long a synchronous submitter is willing to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Wait until completed, abandoned or cancelled.
    Never,
    /// Give up with [`MessageError::Timeout`] after this long.
    After(Duration),
}

impl Default for Deadline {
    fn default() -> Self {
        Self::After(Duration::from_secs(5))
    }
}

/// Consumer half: delivers the result exactly once.
#[derive(Debug)]
pub struct Completer {
    tx: mpsc::Sender<i32>,
    state: Arc<AtomicU8>,
}

impl Completer {
    /// Take ownership of applying the message.
    ///
    /// Returns `false` if the submitter already gave up, in which case the
    /// message must not be applied. Once claimed, the submitter waits for the
    /// result even past its deadline.
    #[must_use]
    pub fn claim(&self) -> bool {
        match self
            .state
            .compare_exchange(PENDING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(state) => state == CLAIMED,
        }
    }

    pub fn complete(self, result: i32) {
        if self.tx.send(result).is_err() {
            debug!("Message completed with {result} after its submitter stopped waiting");
        }
    }
}

/// Submitter half: blocks until completion, deadline or cancellation.
#[derive(Debug)]
pub struct Waiter {
    rx: mpsc::Receiver<i32>,
    deadline: Deadline,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
}

impl Waiter {
    pub fn wait(self) -> Result<i32, MessageError> {
        let started = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                return self.give_up(MessageError::Cancelled);
            }

            let slice = match self.deadline {
                Deadline::Never => CANCEL_POLL_INTERVAL,
                Deadline::After(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        return self.give_up(MessageError::Timeout(limit));
                    }
                    (limit - elapsed).min(CANCEL_POLL_INTERVAL)
                }
            };

            match self.rx.recv_timeout(slice) {
                Ok(result) => return Ok(result),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(MessageError::Abandoned),
            }
        }
    }

    /// Withdraw the message so the consumer skips it. If the consumer has
    /// already claimed it, the message is being applied: wait for the result.
    fn give_up(self, error: MessageError) -> Result<i32, MessageError> {
        match self
            .state
            .compare_exchange(PENDING, WITHDRAWN, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Err(error),
            Err(_) => self.rx.recv().map_err(|_| MessageError::Abandoned),
        }
    }
}

/// Create a linked completer/waiter pair.
#[must_use]
pub fn rendezvous(deadline: Deadline, cancel: CancellationToken) -> (Completer, Waiter) {
    let (tx, rx) = mpsc::channel();
    let state = Arc::new(AtomicU8::new(PENDING));
    (
        Completer {
            tx,
            state: Arc::clone(&state),
        },
        Waiter {
            rx,
            deadline,
            cancel,
            state,
        },
    )
}
