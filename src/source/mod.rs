//! Feeders that pull access units from somewhere and push them through a
//! [`DecodeSession`](crate::decoders::DecodeSession).

pub mod file;
pub mod rtsp_session;

use crate::decoders::DecoderError;

/// Counters collected while a source runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DumpSummary {
    pub access_units: u64,
    pub frames: u64,
    pub failures: u64,
}

impl DumpSummary {
    fn record(&mut self, outcome: Result<usize, DecoderError>) {
        self.access_units += 1;
        self.record_drain(outcome);
    }

    /// Counts an end-of-stream drain, which consumes no access unit.
    fn record_drain(&mut self, outcome: Result<usize, DecoderError>) {
        match outcome {
            Ok(frames) => self.frames += frames as u64,
            // Already logged by the session; keep feeding.
            Err(_) => self.failures += 1,
        }
    }
}
