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

//! Multi-producer, single-consumer FIFO of control messages.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{Deadline, Message, MessageError};

type Listener = Box<dyn Fn() + Send + Sync>;

/// Unbounded message queue with an empty-to-non-empty wakeup.
///
/// Any thread may submit. Exactly one consumer thread is expected to pop,
/// typically between sample blocks. The consumer is woken (through
/// [`MessageQueue::wait`] or the registered listener) only when the queue goes
/// from empty to non-empty, not once per message.
pub struct MessageQueue {
    messages: Mutex<VecDeque<Message>>,
    ready: Condvar,
    listener: Mutex<Option<Listener>>,
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            listener: Mutex::new(None),
        }
    }

    /// Register a callback invoked on every empty-to-non-empty transition.
    ///
    /// The callback runs on the submitting thread and must not block.
    pub fn set_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        *self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(listener));
    }

    /// Enqueue `message`.
    ///
    /// Asynchronous messages return `Ok(None)` immediately. Synchronous
    /// messages block the caller until the consumer completes them and return
    /// `Ok(Some(result))`, or fail when the deadline passes, the wait is
    /// cancelled or the consumer drops the message.
    pub fn submit(&self, mut message: Message) -> Result<Option<i32>, MessageError> {
        let waiter = message.take_waiter();
        self.push(message);

        match waiter {
            Some(waiter) => waiter.wait().map(Some),
            None => Ok(None),
        }
    }

    /// Submit `message` synchronously and wait for its result.
    pub fn execute(&self, message: Message, deadline: Deadline) -> Result<i32, MessageError> {
        self.execute_with_cancel(message, deadline, CancellationToken::new())
    }

    /// Like [`MessageQueue::execute`], releasing the wait when `cancel` fires.
    pub fn execute_with_cancel(
        &self,
        message: Message,
        deadline: Deadline,
        cancel: CancellationToken,
    ) -> Result<i32, MessageError> {
        let message = message.synchronous(deadline, cancel);
        self.submit(message)?.ok_or(MessageError::Abandoned)
    }

    /// Remove the oldest message, if any.
    pub fn pop(&self) -> Option<Message> {
        self.lock().pop_front()
    }

    /// Block the consumer until a message is available or `timeout` elapses.
    ///
    /// Returns whether the queue is non-empty.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |messages| messages.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        !guard.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, message: Message) {
        let was_empty = {
            let mut messages = self.lock();
            let was_empty = messages.is_empty();
            messages.push_back(message);
            was_empty
        };

        if was_empty {
            self.ready.notify_one();
            if let Some(listener) = self
                .listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
            {
                listener();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Control;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn trace_size(message: &Message) -> usize {
        match message.body() {
            Control::ConfigureTrace { trace_size, .. } => *trace_size,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_async_submit_never_blocks() {
        let queue = MessageQueue::new();
        let started = Instant::now();
        for _ in 0..1000 {
            let result = queue.submit(Message::new(Control::ResetAccumulation));
            assert_eq!(result, Ok(None));
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(queue.len(), 1000);
    }

    #[test]
    fn test_fifo_order() {
        let queue = MessageQueue::new();
        for i in 0..10 {
            queue
                .submit(Message::new(Control::ConfigureTrace {
                    trace_size: i,
                    pre_trigger: 0,
                }))
                .unwrap();
        }
        let order: Vec<usize> = std::iter::from_fn(|| queue.pop())
            .map(|m| trace_size(&m))
            .collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_per_producer_order_is_preserved() {
        let queue = Arc::new(MessageQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100 {
                        queue
                            .submit(Message::new(Control::ConfigureTrace {
                                trace_size: i,
                                pre_trigger: p,
                            }))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }

        let mut last = [None::<usize>; 4];
        while let Some(message) = queue.pop() {
            if let Control::ConfigureTrace {
                trace_size,
                pre_trigger,
            } = *message.body()
            {
                if let Some(prev) = last[pre_trigger] {
                    assert!(trace_size > prev);
                }
                last[pre_trigger] = Some(trace_size);
            }
        }
        assert_eq!(last, [Some(99); 4]);
    }

    #[test]
    fn test_listener_fires_only_on_empty_transition() {
        let queue = MessageQueue::new();
        let wakeups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakeups);
        queue.set_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        queue.submit(Message::new(Control::RearmTrigger)).unwrap();
        queue.submit(Message::new(Control::RearmTrigger)).unwrap();
        assert_eq!(wakeups.load(Ordering::SeqCst), 1);

        while queue.pop().is_some() {}
        queue.submit(Message::new(Control::RearmTrigger)).unwrap();
        assert_eq!(wakeups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_execute_returns_consumer_result() {
        let queue = Arc::new(MessageQueue::new());
        let consumer_queue = Arc::clone(&queue);
        let consumer = thread::spawn(move || {
            assert!(consumer_queue.wait(Duration::from_secs(5)));
            let message = consumer_queue.pop().unwrap();
            message.completed(17);
        });

        let result = queue.execute(
            Message::new(Control::ResetAccumulation),
            Deadline::After(Duration::from_secs(5)),
        );
        assert_eq!(result, Ok(17));
        consumer.join().unwrap();
    }

    #[test]
    fn test_execute_without_consumer_times_out() {
        let queue = MessageQueue::new();
        let started = Instant::now();
        let result = queue.execute(
            Message::new(Control::ResetAccumulation),
            Deadline::After(Duration::from_millis(50)),
        );
        assert_eq!(result, Err(MessageError::Timeout(Duration::from_millis(50))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_unbounded_execute_stays_blocked_until_cancelled() {
        let queue = Arc::new(MessageQueue::new());
        let cancel = CancellationToken::new();
        let submitter_queue = Arc::clone(&queue);
        let submitter_cancel = cancel.clone();
        let submitter = thread::spawn(move || {
            submitter_queue.execute_with_cancel(
                Message::new(Control::ResetAccumulation),
                Deadline::Never,
                submitter_cancel,
            )
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!submitter.is_finished());

        cancel.cancel();
        assert_eq!(submitter.join().unwrap(), Err(MessageError::Cancelled));
    }

    #[test]
    fn test_dropped_message_abandons_submitter() {
        let queue = Arc::new(MessageQueue::new());
        let consumer_queue = Arc::clone(&queue);
        let consumer = thread::spawn(move || {
            assert!(consumer_queue.wait(Duration::from_secs(5)));
            drop(consumer_queue.pop());
        });

        let result = queue.execute(Message::new(Control::RearmTrigger), Deadline::Never);
        assert_eq!(result, Err(MessageError::Abandoned));
        consumer.join().unwrap();
    }
}
