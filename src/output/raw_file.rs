use std::{
    fs::OpenOptions,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use super::{FrameSink, OutputError, Picture};

/// Output file of the raw planar dump when none is given.
pub const DEFAULT_OUTPUT_FILE: &str = "h264.raw";

/// Appends frames to a file, reopening it for every frame so each one is on
/// disk before `write_frame` returns.
#[derive(Debug, Clone)]
pub struct RawFileSink {
    path: PathBuf,
}

impl RawFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for RawFileSink {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_FILE)
    }
}

impl FrameSink for RawFileSink {
    fn write_frame(&mut self, picture: &Picture<'_>) -> Result<usize, OutputError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| OutputError::Open {
                path: self.path.clone(),
                source,
            })?;

        let mut out = BufWriter::new(file);
        let written = picture.write_to(&mut out)?;
        out.flush()?;
        Ok(written)
    }
}
