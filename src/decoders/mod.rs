pub mod annexb;
pub mod avcc;

use std::io::{self, Write};

use annexb::NalFraming;
use avcc::{AvcConfig, AvccConverter, ConfigError, PackagingError};
use openh264::{
    decoder::{Decoder, DecoderConfig},
    formats::YUVSource,
    OpenH264API,
};
use thiserror::Error;

use crate::output::{FrameSink, OutputError, Picture};

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("invalid codec configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not open H.264 decoder: {0}")]
    InitFail(#[source] openh264::Error),
    #[error("decoder rejected parameter sets: {0}")]
    ConfigRejected(#[source] openh264::Error),
    #[error("malformed access unit: {0}")]
    Packaging(#[from] PackagingError),
    #[error("can't send packet: {0}")]
    DecodeFail(#[source] openh264::Error),
    #[error("can't receive frame: {0}")]
    DrainFail(#[source] openh264::Error),
    #[error(transparent)]
    Output(#[from] OutputError),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    debug: bool,
    report_progress: bool,
}

impl SessionConfig {
    /// Turns on openh264's own trace output.
    pub fn with_debug(mut self, val: bool) -> Self {
        self.debug = val;
        self
    }

    /// Reports a `[n] Frame written` line for every frame, on stdout by default.
    pub fn with_progress(mut self, val: bool) -> Self {
        self.report_progress = val;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debug: false,
            report_progress: true,
        }
    }
}

/// One H.264 decoder context fed with access units of a single stream.
///
/// Dropping the session releases the decoder.
pub struct DecodeSession {
    decoder: Decoder,
    framing: NalFraming,
    converter: Option<AvccConverter>,
    scratch: Vec<u8>,
    progress: Progress,
}

impl DecodeSession {
    /// Opens a decoder primed with the parameter sets found in `config_bytes`.
    pub fn create(config_bytes: &[u8], config: SessionConfig) -> Result<Self, DecoderError> {
        Self::open(config_bytes, config)
            .inspect_err(|err| tracing::error!(%err, "couldn't initialize decoder context"))
    }

    fn open(config_bytes: &[u8], config: SessionConfig) -> Result<Self, DecoderError> {
        let avc = AvcConfig::parse(config_bytes)?;

        let mut decoder = Decoder::with_api_config(
            OpenH264API::from_source(),
            DecoderConfig::new().debug(config.debug),
        )
        .map_err(DecoderError::InitFail)?;

        decoder
            .decode(&avc.parameter_sets_annex_b())
            .map_err(DecoderError::ConfigRejected)?;

        let converter = match avc.framing {
            NalFraming::LengthPrefixed(size) => Some(AvccConverter::new(size)),
            NalFraming::AnnexB => None,
        };

        tracing::debug!(
            profile = avc.profile_indication,
            level = avc.level_indication,
            sps = avc.sps.len(),
            pps = avc.pps.len(),
            framing = ?avc.framing,
            "decoder context opened"
        );

        Ok(Self {
            decoder,
            framing: avc.framing,
            converter,
            scratch: Vec::new(),
            progress: Progress {
                frames_written: 0,
                report: config.report_progress,
                out: Box::new(io::stdout()),
            },
        })
    }

    /// Sends progress lines to `out` instead of stdout.
    pub fn with_progress_output(mut self, out: impl Write + 'static) -> Self {
        self.progress.out = Box::new(out);
        self
    }

    /// Packaging the session expects access units in.
    pub fn framing(&self) -> NalFraming {
        self.framing
    }

    pub fn frames_written(&self) -> u64 {
        self.progress.frames_written
    }

    /// Submits one access unit, packaged as [`framing`](Self::framing) says, and
    /// writes every picture the decoder hands back.
    ///
    /// `Ok(0)` means the decoder needs more input before it can output.
    pub fn submit_and_drain(
        &mut self,
        access_unit: &[u8],
        sink: &mut dyn FrameSink,
    ) -> Result<usize, DecoderError> {
        let packet = match self.converter.as_mut() {
            Some(converter) => converter
                .avcc_to_annex_b(access_unit)
                .inspect_err(|err| tracing::error!(%err, "can't unpack access unit"))?,
            None => access_unit,
        };

        decode_units(
            &mut self.decoder,
            &mut self.scratch,
            packet,
            sink,
            &mut self.progress,
        )
    }

    /// Like [`submit_and_drain`](Self::submit_and_drain) for Annex-B input,
    /// whatever framing the configuration announced.
    pub fn submit_annex_b_and_drain(
        &mut self,
        packet: &[u8],
        sink: &mut dyn FrameSink,
    ) -> Result<usize, DecoderError> {
        decode_units(
            &mut self.decoder,
            &mut self.scratch,
            packet,
            sink,
            &mut self.progress,
        )
    }

    /// Drains pictures the decoder still holds at end of stream.
    pub fn finish(&mut self, sink: &mut dyn FrameSink) -> Result<usize, DecoderError> {
        let remaining = self
            .decoder
            .flush_remaining()
            .map_err(DecoderError::DrainFail)
            .inspect_err(|err| tracing::error!(%err, "drain failed"))?;

        for yuv in &remaining {
            emit(yuv, sink, &mut self.progress)?;
        }
        Ok(remaining.len())
    }
}

/// openh264 hands back at most one picture per `decode` call, so a packet
/// is fed one access unit at a time.
fn decode_units(
    decoder: &mut Decoder,
    scratch: &mut Vec<u8>,
    packet: &[u8],
    sink: &mut dyn FrameSink,
    progress: &mut Progress,
) -> Result<usize, DecoderError> {
    let mut written = 0;

    for unit in annexb::access_units(packet) {
        scratch.clear();
        annexb::write_annex_b(unit.iter().copied(), scratch);

        let decoded = decoder
            .decode(scratch.as_slice())
            .map_err(DecoderError::DecodeFail)
            .inspect_err(|err| tracing::error!(%err, len = scratch.len(), "decode failed"))?;

        match decoded {
            Some(yuv) => {
                emit(&yuv, sink, progress)?;
                written += 1;
            }
            None => tracing::trace!(len = scratch.len(), "no output for access unit"),
        }
    }
    Ok(written)
}

struct Progress {
    frames_written: u64,
    report: bool,
    out: Box<dyn Write>,
}

impl Progress {
    fn frame_written(&mut self, width: usize, height: usize) {
        self.frames_written += 1;
        if !self.report {
            return;
        }
        let line = progress_line(self.frames_written, width, height);
        if let Err(err) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            tracing::warn!(%err, "couldn't report progress");
        }
    }
}

/// `[<count>] Frame written: width=<w>, height=<h>`
pub fn progress_line(frame: u64, width: usize, height: usize) -> String {
    format!("[{frame}] Frame written: width={width}, height={height}")
}

fn emit(
    yuv: &impl YUVSource,
    sink: &mut dyn FrameSink,
    progress: &mut Progress,
) -> Result<(), DecoderError> {
    let picture = Picture::from_yuv(yuv)
        .inspect_err(|err| tracing::error!(%err, "decoded picture is not writable"))?;
    let bytes = sink.write_frame(&picture).inspect_err(|err| {
        tracing::error!(
            %err,
            width = picture.width(),
            height = picture.height(),
            "frame couldn't be written"
        )
    })?;

    progress.frame_written(picture.width(), picture.height());
    tracing::trace!(frame = progress.frames_written, bytes, "frame written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unusable_configuration() {
        assert!(matches!(
            DecodeSession::create(&[], SessionConfig::default()),
            Err(DecoderError::Config(ConfigError::Empty))
        ));
        assert!(matches!(
            DecodeSession::create(&[1, 0x42, 0xc0], SessionConfig::default()),
            Err(DecoderError::Config(ConfigError::Truncated(3)))
        ));
        assert!(matches!(
            DecodeSession::create(&[0xde, 0xad, 0xbe, 0xef], SessionConfig::default()),
            Err(DecoderError::Config(ConfigError::RecordNotFound))
        ));
    }

    #[test]
    fn formats_progress_line() {
        assert_eq!(
            progress_line(7, 1280, 720),
            "[7] Frame written: width=1280, height=720"
        );
    }
}
