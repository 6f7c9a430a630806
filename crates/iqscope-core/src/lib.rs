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

//! Streaming IQ visualization core.
//!
//! This library provides the building blocks for processing a live stream of
//! complex radio samples into spectrum and oscilloscope displays. It is split
//! into layers that can be used independently or composed together:
//!
//! - **Message layer**: typed control messages with fire-and-forget or
//!   rendezvous (wait for completion) delivery between threads
//! - **Sink layer**: the [`SampleSink`] contract, which interleaves sample
//!   blocks with control messages drained from the sink's own queue
//! - **Transform layer**: an FFT engine with a per-engine plan cache and a
//!   planning lock shared explicitly across engines
//! - **Visualizers**: [`SpectrumVis`], [`ScopeVis`] and the
//!   [`TriggeredComboVis`] that windows the spectrum feed around the scope's
//!   trigger point
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use iqscope_core::{
//!     ComboConfig, PlanLock, Sample, SampleSink, ScopeSettings, ScopeVis, SpectrumSettings,
//!     SpectrumVis, TriggeredComboVis,
//! };
//! use tokio::sync::mpsc;
//!
//! let plan_lock = Arc::new(PlanLock::new());
//! let (spectrum_tx, mut spectrum_rx) = mpsc::channel(16);
//! let (trace_tx, _trace_rx) = mpsc::channel(16);
//!
//! let spectrum = SpectrumVis::new(&plan_lock, SpectrumSettings::default(), spectrum_tx);
//! let scope = ScopeVis::new(ScopeSettings::default(), trace_tx);
//! let mut combo = TriggeredComboVis::new(spectrum, scope, ComboConfig::default());
//!
//! combo.start();
//! let block = vec![Sample::new(0.0, 0.0); 4096];
//! combo.process(&block, false);
//! combo.stop();
//!
//! assert!(spectrum_rx.try_recv().is_ok());
//! ```

pub mod combo;
pub mod message;
pub mod scope;
pub mod sink;
pub mod spectrum;
pub mod transform;

pub use combo::{ComboConfig, NoTriggerWindow, TriggeredComboVis, WindowingPolicy};
pub use message::{Control, Deadline, Message, MessageError, MessageKind, MessageQueue};
pub use scope::{
    Edge, Projection, ScopeSettings, ScopeTrace, ScopeVis, TriggerPoint, TriggerSettings,
    TriggerState, TriggeredSink,
};
pub use sink::{Sample, SampleSink, SinkControl, SinkId};
pub use spectrum::{Averaging, SpectrumSettings, SpectrumVis};
pub use transform::{Direction, PlanLock, TransformEngine, TransformError, WindowKind};
