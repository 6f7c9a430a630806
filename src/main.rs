mod cli;
mod config;
mod pipeline;
mod source;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use iqscope_core::{Control, Deadline, PlanLock};

use cli::Args;
use config::AppConfig;
use pipeline::{Pipeline, PipelineConfig};
use source::SourceType;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What the consumer saw between reports.
#[derive(Debug, Default)]
struct Summary {
    spectra: usize,
    traces: usize,
    strongest: Option<(usize, f32)>,
    last_len: usize,
}

impl Summary {
    fn add_spectrum(&mut self, spectrum: &[f32]) {
        self.spectra += 1;
        self.last_len = spectrum.len();
        let peak = spectrum
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((bin, db)) = peak {
            if self.strongest.map_or(true, |(_, best)| db > best) {
                self.strongest = Some((bin, db));
            }
        }
    }

    fn report(&mut self) {
        match self.strongest {
            Some((bin, db)) => log::info!(
                "{} spectra ({} bins), strongest bin {bin} at {db:.1} dB, {} traces",
                self.spectra,
                self.last_len,
                self.traces
            ),
            None => log::info!("No spectra, {} traces", self.traces),
        }
        *self = Self::default();
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = AppConfig::load_or_default();
    args.apply(&mut config);
    if args.save_config {
        config.save().context("Failed to save configuration")?;
        if let Ok(path) = AppConfig::config_path() {
            log::info!("Configuration saved to {}", path.display());
        }
    }

    let plan_lock = Arc::new(match &config.wisdom_path {
        Some(path) => PlanLock::with_wisdom(path),
        None => PlanLock::new(),
    });

    let mut pipeline = Pipeline::start(
        PipelineConfig {
            source: SourceType::from_input(args.input.as_deref()),
            block_size: config.block_size,
            sample_rate: config.sample_rate,
            realtime: config.realtime,
            channel_buffer_size: config.channel_buffer_size,
            max_blocks: args.max_blocks,
            positive_only: args.positive_only,
            spectrum: config.spectrum_settings(),
            scope: config.scope_settings(),
            combo: config.windowing,
        },
        &plan_lock,
    )?;

    let started = Instant::now();
    let run_for = args.seconds.map(Duration::from_secs_f64);
    let mut retune = args.retune;
    let mut summary = Summary::default();
    let mut last_report = Instant::now();

    loop {
        while let Some(spectrum) = pipeline.try_recv_spectrum() {
            summary.add_spectrum(&spectrum);
        }
        while pipeline.try_recv_trace().is_some() {
            summary.traces += 1;
        }

        if summary.spectra > 0 {
            if let Some(size) = retune.take() {
                log::info!("Resizing FFT to {size}");
                let result = pipeline.control().execute_with_cancel(
                    Control::ReconfigureTransformSize { size },
                    Deadline::default(),
                    pipeline.cancel_token(),
                );
                match result {
                    Ok(_) => log::info!("FFT resized to {size}"),
                    Err(e) => log::warn!("FFT resize not applied: {e}"),
                }
            }
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            summary.report();
            last_report = Instant::now();
        }

        if !pipeline.is_running() {
            break;
        }
        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            pipeline.stop();
        }
        thread::sleep(POLL_INTERVAL);
    }

    while let Some(spectrum) = pipeline.try_recv_spectrum() {
        summary.add_spectrum(&spectrum);
    }
    while pipeline.try_recv_trace().is_some() {
        summary.traces += 1;
    }
    summary.report();

    let stats = pipeline.join()?;
    log::info!(
        "Processed {} blocks ({} samples) in {:.2}s",
        stats.blocks,
        stats.samples,
        started.elapsed().as_secs_f64()
    );

    match plan_lock.save_wisdom() {
        Ok(()) => {
            if let Some(path) = plan_lock.wisdom_path() {
                log::info!("FFT wisdom saved to {}", path.display());
            }
        }
        Err(e) => log::warn!("Failed to save FFT wisdom: {e}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_tracks_strongest_bin() {
        let mut summary = Summary::default();
        summary.add_spectrum(&[-90.0, -20.0, -80.0]);
        summary.add_spectrum(&[-10.0, -90.0, -90.0, -90.0]);
        summary.add_spectrum(&[-50.0, -50.0]);

        assert_eq!(summary.spectra, 3);
        assert_eq!(summary.strongest, Some((0, -10.0)));
        assert_eq!(summary.last_len, 2);

        summary.report();
        assert_eq!(summary.spectra, 0);
        assert_eq!(summary.strongest, None);
    }
}
