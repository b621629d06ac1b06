pub mod utils;

use futures::StreamExt;
use retina::{
    client::{
        Credentials, InitialSequenceNumberPolicy, InitialTimestampPolicy, PlayOptions, Session,
        SessionOptions, SetupOptions, TcpTransportOptions, Transport,
    },
    codec::{CodecItem, ParametersRef},
};
use thiserror::Error;
use url::Url;

use super::DumpSummary;
use crate::{
    decoders::{DecodeSession, DecoderError, SessionConfig},
    output::FrameSink,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not parse camera url")]
    UrlParseError,
    #[error("{0}")]
    UnsetParameter(String),

    #[error("DESCRIBE failed: {0}")]
    Describe(#[source] retina::Error),
    #[error("no H.264 video stream offered")]
    NoVideoStream,
    #[error("SETUP failed: {0}")]
    Setup(#[source] retina::Error),
    #[error("PLAY failed: {0}")]
    Play(#[source] retina::Error),
    #[error("stream broke: {0}")]
    BrokenPipeline(#[source] retina::Error),

    #[error(transparent)]
    DecodingError(#[from] DecoderError),
}

/// Pulls H.264 from an RTSP camera and decodes every frame into a sink.
pub struct RtspSource {
    url: Url,
    creds: Option<Credentials>,
    frame_limit: Option<u64>,
}

impl RtspSource {
    /// Credentials embedded in `url` are moved out of it and sent through
    /// RTSP authentication instead.
    pub fn new(mut url: Url) -> Self {
        let creds = (!url.username().is_empty()).then(|| Credentials {
            username: url.username().to_string(),
            password: url.password().unwrap_or_default().to_string(),
        });
        if creds.is_some() {
            let _ = url.set_username("");
            let _ = url.set_password(None);
        }

        Self {
            url,
            creds,
            frame_limit: None,
        }
    }

    pub fn with_credentials(mut self, user: &str, pass: &str) -> Self {
        self.creds = Some(Credentials {
            username: user.to_string(),
            password: pass.to_string(),
        });
        self
    }

    /// Stops after this many frames have been written.
    pub fn with_frame_limit(mut self, val: Option<u64>) -> Self {
        self.frame_limit = val;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn run(
        self,
        config: SessionConfig,
        sink: &mut dyn FrameSink,
    ) -> Result<DumpSummary, SessionError> {
        let options = SessionOptions::default().creds(self.creds);
        let mut session = Session::describe(self.url, options)
            .await
            .map_err(SessionError::Describe)?;

        let video_stream = session
            .streams()
            .iter()
            .position(|s| s.media() == "video" && s.encoding_name() == "h264")
            .ok_or(SessionError::NoVideoStream)?;

        tracing::info!(stream = video_stream, "setting up session");
        session
            .setup(
                video_stream,
                SetupOptions::default().transport(Transport::Tcp(TcpTransportOptions::default())),
            )
            .await
            .map_err(SessionError::Setup)?;

        let mut session = session
            .play(
                PlayOptions::default()
                    .initial_seq(InitialSequenceNumberPolicy::Respect)
                    .initial_timestamp(InitialTimestampPolicy::Require),
            )
            .await
            .map_err(SessionError::Play)?
            .demuxed()
            .map_err(SessionError::Play)?;
        tracing::info!("playing and demuxing session");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut decoder: Option<DecodeSession> = None;
        let mut awaiting_keyframe = true;
        let mut summary = DumpSummary::default();

        loop {
            let item = tokio::select! {
                item = session.next() => item,
                _ = &mut ctrl_c => {
                    tracing::info!("interrupted");
                    None
                }
            };
            let Some(item) = item else {
                break;
            };

            let frame = match item.map_err(SessionError::BrokenPipeline)? {
                CodecItem::VideoFrame(frame) => frame,
                _ => continue,
            };

            if frame.has_new_parameters() || decoder.is_none() {
                if let Some(ParametersRef::Video(params)) =
                    session.streams()[frame.stream_id()].parameters()
                {
                    if let Some(mut old) = decoder.take() {
                        summary.record_drain(old.finish(sink));
                    }
                    tracing::info!(dimensions = ?params.pixel_dimensions(), "new stream parameters");
                    decoder = Some(DecodeSession::create(params.extra_data(), config.clone())?);
                    awaiting_keyframe = true;
                }
            }

            let Some(active) = decoder.as_mut() else {
                tracing::warn!("uninitialized context before payload");
                continue;
            };

            if awaiting_keyframe {
                if !frame.is_random_access_point() {
                    continue;
                }
                awaiting_keyframe = false;
            }

            summary.record(active.submit_and_drain(frame.data(), sink));

            if limit_reached(self.frame_limit, &summary) {
                tracing::info!(frames = summary.frames, "frame limit reached");
                break;
            }
        }

        // Draining after the limit would write frames past it.
        let limit_hit = limit_reached(self.frame_limit, &summary);
        if let Some(mut active) = decoder.filter(|_| !limit_hit) {
            summary.record_drain(active.finish(sink));
        }
        Ok(summary)
    }
}

fn limit_reached(frame_limit: Option<u64>, summary: &DumpSummary) -> bool {
    frame_limit.is_some_and(|limit| summary.frames >= limit)
}
