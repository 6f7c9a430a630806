//! Raw complex float32 file source.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use iqscope_core::Sample;

use super::IqSource;

/// Bytes per interleaved little-endian `(f32 I, f32 Q)` pair.
const SAMPLE_BYTES: usize = 8;

/// Reads interleaved little-endian f32 I/Q pairs.
#[derive(Debug)]
pub struct Cf32Source {
    reader: BufReader<File>,
    bytes: Vec<u8>,
}

impl Cf32Source {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open IQ file {}", path.display()))?;
        log::info!("Opened cf32 IQ file {}", path.display());

        Ok(Self {
            reader: BufReader::new(file),
            bytes: Vec::new(),
        })
    }
}

impl IqSource for Cf32Source {
    fn read(&mut self, block: &mut [Sample]) -> Result<usize> {
        self.bytes.clear();
        let wanted = (block.len() * SAMPLE_BYTES) as u64;
        self.reader
            .by_ref()
            .take(wanted)
            .read_to_end(&mut self.bytes)
            .context("Failed to read IQ file")?;

        let mut count = 0;
        for (dst, chunk) in block.iter_mut().zip(self.bytes.chunks_exact(SAMPLE_BYTES)) {
            let i = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let q = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            *dst = Sample::new(i, q);
            count += 1;
        }

        if self.bytes.len() % SAMPLE_BYTES != 0 {
            log::warn!("Ignoring truncated sample at end of IQ file");
        }
        Ok(count)
    }
}
