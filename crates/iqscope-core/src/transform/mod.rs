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

//! Fourier transform engine with cached plans.
//!
//! Planning an FFT is expensive and not safe to run concurrently, while
//! executing a finished plan is. Every [`TransformEngine`] therefore keeps its
//! own cache of plans keyed by `(size, direction)`, and all engines in a
//! process create plans under one [`PlanLock`] handed to them at construction.
//!
//! Plans are never evicted: the cache grows with every distinct
//! `(size, direction)` pair an engine is configured for.

mod wisdom;
pub mod window;

pub use window::WindowKind;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use num_complex::Complex32;
use rustfft::{Fft, FftDirection, FftPlanner};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wisdom::WisdomFile;

/// Errors returned by [`TransformEngine`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("transform executed before any plan was configured")]
    NotConfigured,
}

/// Transform direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Inverse,
}

impl Direction {
    #[must_use]
    pub const fn from_inverse(inverse: bool) -> Self {
        if inverse {
            Self::Inverse
        } else {
            Self::Forward
        }
    }

    const fn to_rustfft(self) -> FftDirection {
        match self {
            Self::Forward => FftDirection::Forward,
            Self::Inverse => FftDirection::Inverse,
        }
    }
}

/// Cache key of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanKey {
    pub size: usize,
    pub direction: Direction,
}

/// Planning lock shared by every engine in the process.
///
/// Owns the `rustfft` planner, so FFT algorithms (twiddles, sub-plans) are
/// computed once per process and reused by later engines. Optionally backed by
/// a wisdom file that remembers which plans were needed on previous runs so
/// they can be prepared up front.
pub struct PlanLock {
    planner: Mutex<FftPlanner<f32>>,
    known: Mutex<BTreeSet<PlanKey>>,
    wisdom_path: Option<PathBuf>,
    plans_created: AtomicUsize,
}

impl std::fmt::Debug for PlanLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanLock")
            .field("wisdom_path", &self.wisdom_path)
            .field("plans_created", &self.plans_created())
            .finish_non_exhaustive()
    }
}

impl Default for PlanLock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanLock {
    /// Create a lock with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
            known: Mutex::new(BTreeSet::new()),
            wisdom_path: None,
            plans_created: AtomicUsize::new(0),
        }
    }

    /// Create a lock backed by a wisdom file.
    ///
    /// Plans recorded in the file are prepared immediately. A missing or
    /// unreadable file is not an error: planning simply starts fresh.
    #[must_use]
    pub fn with_wisdom(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock = Self::new();

        match WisdomFile::load(&path) {
            Ok(wisdom) => {
                info!(
                    "Loaded {} FFT plan(s) from wisdom file {}",
                    wisdom.plans.len(),
                    path.display()
                );
                {
                    let planner = lock.planner.get_mut().unwrap_or_else(PoisonError::into_inner);
                    for key in &wisdom.plans {
                        planner.plan_fft(key.size, key.direction.to_rustfft());
                    }
                }
                lock.known
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(wisdom.plans);
            }
            Err(e) => {
                info!(
                    "No usable FFT wisdom at {} ({e}), planning from scratch",
                    path.display()
                );
            }
        }

        lock.wisdom_path = Some(path);
        lock
    }

    #[must_use]
    pub fn wisdom_path(&self) -> Option<&Path> {
        self.wisdom_path.as_deref()
    }

    /// Total number of engine plans created under this lock.
    #[must_use]
    pub fn plans_created(&self) -> usize {
        self.plans_created.load(Ordering::Relaxed)
    }

    /// Every `(size, direction)` pair planned so far, including loaded wisdom.
    #[must_use]
    pub fn known_plans(&self) -> Vec<PlanKey> {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Write the known plans to the wisdom file, if one is configured.
    pub fn save_wisdom(&self) -> std::io::Result<()> {
        let Some(path) = &self.wisdom_path else {
            return Ok(());
        };

        WisdomFile::new(self.known_plans()).save(path)?;
        debug!("Saved FFT wisdom to {}", path.display());
        Ok(())
    }

    fn create_plan(&self, key: PlanKey) -> Plan {
        let fft = self
            .planner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .plan_fft(key.size, key.direction.to_rustfft());

        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        self.plans_created.fetch_add(1, Ordering::Relaxed);

        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Plan { fft, scratch }
    }
}

struct Plan {
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
}

/// FFT engine owned by one pipeline stage.
///
/// Fill [`TransformEngine::input_mut`], call [`TransformEngine::transform`],
/// then read [`TransformEngine::output`]. The output is not normalized.
pub struct TransformEngine {
    lock: Arc<PlanLock>,
    plans: HashMap<PlanKey, Plan>,
    active: Option<PlanKey>,
    input: Vec<Complex32>,
    output: Vec<Complex32>,
    reuse: bool,
    plans_created: usize,
}

impl std::fmt::Debug for TransformEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformEngine")
            .field("active", &self.active)
            .field("cached_plans", &self.plans.len())
            .field("reuse", &self.reuse)
            .finish_non_exhaustive()
    }
}

impl TransformEngine {
    #[must_use]
    pub fn new(lock: &Arc<PlanLock>) -> Self {
        Self {
            lock: Arc::clone(lock),
            plans: HashMap::new(),
            active: None,
            input: Vec::new(),
            output: Vec::new(),
            reuse: true,
            plans_created: 0,
        }
    }

    /// Enable or disable the active-plan fast path in [`TransformEngine::configure`].
    pub fn set_reuse(&mut self, reuse: bool) {
        self.reuse = reuse;
    }

    /// Select the plan for `(size, inverse)`, creating it on first use.
    ///
    /// A zero size is corrected to 1.
    pub fn configure(&mut self, size: usize, inverse: bool) {
        let size = if size == 0 {
            warn!("FFT size 0 requested, using 1");
            1
        } else {
            size
        };
        let key = PlanKey {
            size,
            direction: Direction::from_inverse(inverse),
        };

        if self.reuse && self.active == Some(key) {
            return;
        }

        if !self.plans.contains_key(&key) {
            debug!("Creating FFT plan {key:?}");
            let plan = self.lock.create_plan(key);
            self.plans.insert(key, plan);
            self.plans_created += 1;
        }

        self.active = Some(key);
        self.input.resize(size, Complex32::new(0.0, 0.0));
        self.output.resize(size, Complex32::new(0.0, 0.0));
    }

    /// Run the configured plan: `output = FFT(input)`.
    pub fn transform(&mut self) -> Result<(), TransformError> {
        let key = self.active.ok_or(TransformError::NotConfigured)?;
        let plan = self.plans.get_mut(&key).ok_or(TransformError::NotConfigured)?;

        self.output.copy_from_slice(&self.input);
        plan.fft.process_with_scratch(&mut self.output, &mut plan.scratch);
        Ok(())
    }

    pub fn input_mut(&mut self) -> &mut [Complex32] {
        &mut self.input
    }

    #[must_use]
    pub fn output(&self) -> &[Complex32] {
        &self.output
    }

    /// Size of the active plan, or 0 when unconfigured.
    #[must_use]
    pub fn size(&self) -> usize {
        self.active.map_or(0, |key| key.size)
    }

    #[must_use]
    pub fn active_plan(&self) -> Option<PlanKey> {
        self.active
    }

    /// Number of plans this engine has created.
    #[must_use]
    pub fn plans_created(&self) -> usize {
        self.plans_created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_transform_before_configure_fails() {
        let lock = Arc::new(PlanLock::new());
        let mut engine = TransformEngine::new(&lock);
        assert_eq!(engine.transform(), Err(TransformError::NotConfigured));
    }

    #[test]
    fn test_impulse_gives_flat_spectrum() {
        let lock = Arc::new(PlanLock::new());
        let mut engine = TransformEngine::new(&lock);
        engine.configure(1024, false);

        engine.input_mut()[0] = Complex32::new(1.0, 0.0);
        engine.transform().unwrap();

        assert_eq!(engine.output().len(), 1024);
        for bin in engine.output() {
            assert!((bin.norm() - 1.0).abs() < 1e-5, "bin magnitude {}", bin.norm());
        }
    }

    #[test]
    fn test_reconfigure_reuses_cached_plan() {
        let lock = Arc::new(PlanLock::new());
        let mut engine = TransformEngine::new(&lock);

        engine.configure(1024, false);
        assert_eq!(engine.plans_created(), 1);
        engine.configure(2048, false);
        assert_eq!(engine.plans_created(), 2);
        engine.configure(1024, false);
        assert_eq!(engine.plans_created(), 2);
        assert_eq!(engine.size(), 1024);
        assert_eq!(lock.plans_created(), 2);
    }

    #[test]
    fn test_reuse_disabled_still_hits_cache() {
        let lock = Arc::new(PlanLock::new());
        let mut engine = TransformEngine::new(&lock);
        engine.set_reuse(false);
        engine.configure(256, true);
        engine.configure(256, true);
        assert_eq!(engine.plans_created(), 1);
        assert_eq!(
            engine.active_plan(),
            Some(PlanKey {
                size: 256,
                direction: Direction::Inverse
            })
        );
    }

    #[test]
    fn test_zero_size_is_corrected() {
        let lock = Arc::new(PlanLock::new());
        let mut engine = TransformEngine::new(&lock);
        engine.configure(0, false);
        assert_eq!(engine.size(), 1);
        assert!(engine.transform().is_ok());
    }

    #[test]
    fn test_forward_then_inverse_restores_signal() {
        let lock = Arc::new(PlanLock::new());
        let mut forward = TransformEngine::new(&lock);
        let mut inverse = TransformEngine::new(&lock);
        forward.configure(64, false);
        inverse.configure(64, true);

        #[allow(clippy::cast_precision_loss, reason = "small test indices")]
        for (i, x) in forward.input_mut().iter_mut().enumerate() {
            *x = Complex32::new((i as f32 * 0.3).sin(), 0.0);
        }
        forward.transform().unwrap();
        inverse.input_mut().copy_from_slice(forward.output());
        inverse.transform().unwrap();

        for (original, restored) in forward.input_mut().iter().zip(inverse.output()) {
            assert!((*original - *restored / 64.0).norm() < 1e-4);
        }
    }

    #[test]
    fn test_engines_plan_concurrently() {
        let lock = Arc::new(PlanLock::new());
        let handles: Vec<_> = [128usize, 256, 512, 1024]
            .into_iter()
            .map(|size| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    let mut engine = TransformEngine::new(&lock);
                    engine.configure(size, false);
                    engine.input_mut()[0] = Complex32::new(1.0, 0.0);
                    engine.transform().unwrap();
                    engine.output()[size / 2].norm()
                })
            })
            .collect();

        for handle in handles {
            assert!((handle.join().unwrap() - 1.0).abs() < 1e-5);
        }
        assert_eq!(lock.plans_created(), 4);
        assert_eq!(lock.known_plans().len(), 4);
    }
}
