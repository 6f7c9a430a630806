//! IQ processing pipeline.
//!
//! Reads blocks from an [`IqSource`] on a background thread and feeds them to
//! a [`TriggeredComboVis`] holding the spectrum and scope sinks. Spectra and
//! traces come back over bounded channels; control messages go in through the
//! combo's queue and are applied between blocks.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use iqscope_core::{
    ComboConfig, PlanLock, Sample, SampleSink, ScopeSettings, ScopeTrace, ScopeVis, SinkControl,
    SpectrumSettings, SpectrumVis, TriggeredComboVis,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::source::{IqSource, SourceType};

/// Configuration for the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source: SourceType,
    /// Samples per block handed to the visualizers
    pub block_size: usize,
    /// Demo signal sample rate in Hz
    pub sample_rate: u32,
    /// Pace blocks at the source sample rate
    pub realtime: bool,
    /// Spectra/traces to buffer before dropping
    pub channel_buffer_size: usize,
    /// Stop after this many blocks
    pub max_blocks: Option<usize>,
    /// Samples carry magnitude only
    pub positive_only: bool,
    pub spectrum: SpectrumSettings,
    pub scope: ScopeSettings,
    pub combo: ComboConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceType::Demo,
            block_size: 4096,
            sample_rate: 2_048_000,
            realtime: false,
            channel_buffer_size: 64,
            max_blocks: None,
            positive_only: false,
            spectrum: SpectrumSettings::default(),
            scope: ScopeSettings::default(),
            combo: ComboConfig::default(),
        }
    }
}

/// Counters reported when the producer thread finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub blocks: usize,
    pub samples: usize,
}

/// Running pipeline.
pub struct Pipeline {
    handle: Option<JoinHandle<Result<PipelineStats>>>,
    spectrum_rx: mpsc::Receiver<Vec<f32>>,
    trace_rx: mpsc::Receiver<ScopeTrace>,
    control: SinkControl,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("running", &self.is_running())
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Open the source and start the producer thread.
    ///
    /// Source errors (missing file, bad WAV layout) are returned here rather
    /// than from the thread.
    pub fn start(config: PipelineConfig, plan_lock: &Arc<PlanLock>) -> Result<Self> {
        let source = config
            .source
            .open(config.sample_rate)
            .context("Failed to open IQ source")?;

        let (spectrum_tx, spectrum_rx) = mpsc::channel(config.channel_buffer_size.max(1));
        let (trace_tx, trace_rx) = mpsc::channel(config.channel_buffer_size.max(1));

        let spectrum = SpectrumVis::new(plan_lock, config.spectrum.clone(), spectrum_tx);
        let scope = ScopeVis::new(config.scope.clone(), trace_tx);
        let combo = TriggeredComboVis::new(spectrum, scope, config.combo);
        let control = combo.control();
        let cancel = CancellationToken::new();

        log::info!("Source: {:?}", config.source);
        log::info!("FFT size: {}", config.spectrum.fft_size);
        log::info!(
            "Trace: {} samples, {} pre-trigger, trigger {}",
            config.scope.trace_size,
            config.scope.pre_trigger,
            if config.scope.trigger.enabled { "enabled" } else { "free-run" }
        );
        log::info!("Spectrum windowing: {:?}", config.combo.policy);

        let thread_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("iqscope-pipeline".into())
            .spawn(move || run(source, combo, &config, &thread_cancel))
            .context("Failed to spawn pipeline thread")?;

        Ok(Self {
            handle: Some(handle),
            spectrum_rx,
            trace_rx,
            control,
            cancel,
        })
    }

    /// Try to receive the next spectrum (non-blocking).
    pub fn try_recv_spectrum(&mut self) -> Option<Vec<f32>> {
        self.spectrum_rx.try_recv().ok()
    }

    /// Try to receive the next scope trace (non-blocking).
    pub fn try_recv_trace(&mut self) -> Option<ScopeTrace> {
        self.trace_rx.try_recv().ok()
    }

    /// Control handle for the visualizers.
    #[must_use]
    pub fn control(&self) -> SinkControl {
        self.control.clone()
    }

    /// Token cancelled when the pipeline stops.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the producer thread to stop (non-blocking).
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            log::info!("Stopping pipeline...");
            self.cancel.cancel();
        }
    }

    /// Wait for the producer thread to finish.
    pub fn join(&mut self) -> Result<PipelineStats> {
        let Some(handle) = self.handle.take() else {
            return Ok(PipelineStats::default());
        };

        match handle.join() {
            Ok(result) => result,
            Err(_) => anyhow::bail!("Pipeline thread panicked"),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<S: SampleSink>(
    mut source: Box<dyn IqSource>,
    mut sink: S,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<PipelineStats> {
    let block_size = config.block_size.max(1);
    let mut block = vec![Sample::new(0.0, 0.0); block_size];
    let mut stats = PipelineStats::default();

    let rate = source.sample_rate().unwrap_or(config.sample_rate).max(1);
    #[allow(clippy::cast_precision_loss, reason = "block sizes fit in f64")]
    let block_duration = Duration::from_secs_f64(block_size as f64 / f64::from(rate));

    sink.start();
    let result = loop {
        if cancel.is_cancelled() {
            break Ok(());
        }
        if config.max_blocks.is_some_and(|max| stats.blocks >= max) {
            log::info!("Processed {} blocks, stopping", stats.blocks);
            break Ok(());
        }

        let n = match source.read(&mut block) {
            Ok(0) => {
                log::info!("End of IQ stream");
                break Ok(());
            }
            Ok(n) => n,
            Err(e) => break Err(e),
        };

        sink.process(&block[..n], config.positive_only);
        stats.blocks += 1;
        stats.samples += n;

        if stats.blocks % 1000 == 0 {
            log::debug!("Processed {} blocks", stats.blocks);
        }
        if config.realtime {
            thread::sleep(block_duration);
        }
    };
    sink.stop();

    // Nothing drains the queue from here on; release synchronous submitters.
    cancel.cancel();
    result.map(|()| stats)
}
