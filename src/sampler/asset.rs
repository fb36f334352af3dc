// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Immutable PCM sample data.
//!
//! Samples are loaded entirely into memory before playback. Files are read as 16-bit
//! little-endian mono PCM at 44.1kHz; the leading header is skipped without being parsed.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use super::{MAX_AMPLITUDE, SAMPLE_RATE};
use crate::util::{filename_display, samples_to_duration};

/// Size of the leading header skipped when reading a sample file.
pub const HEADER_SIZE: usize = 44;

/// Size of a single source sample in bytes.
const SAMPLE_SIZE: usize = 2;

/// Errors raised while loading a sample from disk.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Unable to read sample {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "Sample {} is {len} bytes, shorter than its {} byte header",
        path.display(),
        HEADER_SIZE
    )]
    Truncated { path: PathBuf, len: usize },
}

/// A loaded sample. Never modified once created.
pub struct SampleAsset {
    /// The name of the sample, usually the file name.
    name: String,
    /// Signed 16-bit mono samples.
    samples: Box<[i16]>,
}

impl SampleAsset {
    /// Creates an asset from already decoded samples.
    pub fn from_samples(name: &str, samples: Vec<i16>) -> SampleAsset {
        SampleAsset {
            name: name.to_string(),
            samples: samples.into_boxed_slice(),
        }
    }

    /// Generates a full scale sine wave, used to check the audio path.
    pub fn sine(frequency: f64, duration: Duration, sample_rate: u32) -> SampleAsset {
        let len = (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize;
        let step = std::f64::consts::TAU * frequency / f64::from(sample_rate);
        let samples = (0..len)
            .map(|i| (f64::from(MAX_AMPLITUDE) * (step * i as f64).sin()).round() as i16)
            .collect();
        SampleAsset::from_samples(&format!("{}Hz sine", frequency), samples)
    }

    /// Creates an asset from the raw contents of a sample file. The header is skipped and
    /// a trailing odd byte is ignored.
    pub fn from_file_bytes(name: &str, bytes: &[u8]) -> Option<SampleAsset> {
        let pcm = bytes.get(HEADER_SIZE..)?;
        let samples = pcm
            .chunks_exact(SAMPLE_SIZE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Some(SampleAsset::from_samples(name, samples))
    }

    /// Reads a sample file from disk.
    pub fn load(path: &Path) -> Result<SampleAsset, LoadError> {
        let bytes = fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let asset = SampleAsset::from_file_bytes(filename_display(path), &bytes).ok_or_else(
            || LoadError::Truncated {
                path: path.to_path_buf(),
                len: bytes.len(),
            },
        )?;

        info!(
            path = ?path,
            samples = asset.len(),
            duration_ms = asset.duration().as_millis(),
            memory_kb = asset.memory_size() / 1024,
            "Sample loaded"
        );
        Ok(asset)
    }

    /// The name of the sample.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the sample at the given position, if any.
    #[inline]
    pub fn get(&self, index: usize) -> Option<i16> {
        self.samples.get(index).copied()
    }

    /// The number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the asset holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The playback duration at the engine sample rate.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), SAMPLE_RATE)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.samples.len() * SAMPLE_SIZE
    }
}

impl fmt::Debug for SampleAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleAsset")
            .field("name", &self.name)
            .field("samples", &self.samples.len())
            .finish()
    }
}
