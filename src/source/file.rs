use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use super::DumpSummary;
use crate::{
    decoders::{
        annexb::{self, NAL_PPS, NAL_SPS},
        DecodeSession, DecoderError, SessionConfig,
    },
    output::FrameSink,
};

#[derive(Debug, Error)]
pub enum FileSourceError {
    #[error("could not read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("{0} has no SPS/PPS and no configuration was given")]
    NoParameterSets(PathBuf),
    #[error(transparent)]
    Decoder(#[from] DecoderError),
}

/// Decodes an Annex-B elementary stream file access unit by access unit.
pub struct FileSource {
    input: PathBuf,
    config: Option<PathBuf>,
}

impl FileSource {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            config: None,
        }
    }

    /// Decoder configuration record to use instead of the stream's own parameter sets.
    pub fn with_config(mut self, val: Option<PathBuf>) -> Self {
        self.config = val;
        self
    }

    pub fn run(
        &self,
        session_config: SessionConfig,
        sink: &mut dyn FrameSink,
    ) -> Result<DumpSummary, FileSourceError> {
        let stream = read(&self.input)?;
        let config_bytes = match &self.config {
            Some(path) => read(path)?,
            None => in_band_parameter_sets(&stream)
                .ok_or_else(|| FileSourceError::NoParameterSets(self.input.clone()))?,
        };

        let mut session = DecodeSession::create(&config_bytes, session_config)?;
        tracing::info!(input = %self.input.display(), framing = ?session.framing(), "decoding file");

        let mut summary = DumpSummary::default();
        let mut packet = Vec::new();
        for unit in annexb::access_units(&stream) {
            packet.clear();
            annexb::write_annex_b(unit.iter().copied(), &mut packet);
            summary.record(session.submit_annex_b_and_drain(&packet, sink));
        }

        summary.record_drain(session.finish(sink));
        Ok(summary)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, FileSourceError> {
    fs::read(path).map_err(|source| FileSourceError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Every SPS and PPS in the stream, Annex-B packaged.
fn in_band_parameter_sets(stream: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    annexb::write_annex_b(
        annexb::nal_units(stream)
            .filter(|nal| matches!(annexb::nal_type(nal), Some(NAL_SPS | NAL_PPS))),
        &mut out,
    );
    (!out.is_empty()).then_some(out)
}
