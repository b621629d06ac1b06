use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
};

use framedump_lib::{
    decoders::{
        annexb::{self, NalFraming, NAL_PPS, NAL_SPS},
        DecodeSession, DecoderError, SessionConfig,
    },
    output::RawFileSink,
    source::file::FileSource,
};
use openh264::{encoder::Encoder, formats::YUVBuffer};

const WIDTH: usize = 64;
const HEIGHT: usize = 48;
const FRAME_SIZE: usize = WIDTH * HEIGHT + 2 * (WIDTH / 2) * (HEIGHT / 2);

/// Annex-B output of two encoded frames: SPS/PPS + IDR, then one P frame.
fn encode_two_frames() -> Vec<Vec<u8>> {
    let mut encoder = Encoder::new().unwrap();
    (0..2u8)
        .map(|n| {
            let pixels = (0..WIDTH * HEIGHT * 3 / 2)
                .map(|i| (i as u8).wrapping_mul(n + 1).wrapping_add(n * 40))
                .collect();
            let frame = YUVBuffer::from_vec(pixels, WIDTH, HEIGHT);
            encoder.encode(&frame).unwrap().to_vec()
        })
        .collect()
}

/// avcC record over the stream's SPS/PPS, announcing `length_size`-byte NAL lengths.
fn avcc_record(annex_b: &[u8], length_size: u8) -> Vec<u8> {
    let sps = annexb::nal_units(annex_b)
        .find(|nal| annexb::nal_type(nal) == Some(NAL_SPS))
        .unwrap();
    let pps = annexb::nal_units(annex_b)
        .find(|nal| annexb::nal_type(nal) == Some(NAL_PPS))
        .unwrap();

    let mut record = vec![1, sps[1], sps[2], sps[3], 0xfc | (length_size - 1), 0xe1];
    record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    record.extend_from_slice(sps);
    record.push(1);
    record.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    record.extend_from_slice(pps);
    record
}

fn length_prefixed(annex_b: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    NalFraming::LengthPrefixed(4)
        .package(annexb::nal_units(annex_b), &mut out)
        .unwrap();
    out
}

fn quiet() -> SessionConfig {
    SessionConfig::default().with_progress(false)
}

/// Progress output shared with the session under test.
#[derive(Clone, Default)]
struct Lines(Rc<RefCell<Vec<u8>>>);

impl Lines {
    fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl Write for Lines {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn decodes_idr_then_p_frame() {
    let frames = encode_two_frames();
    let lines = Lines::default();
    let mut session = DecodeSession::create(&avcc_record(&frames[0], 4), SessionConfig::default())
        .unwrap()
        .with_progress_output(lines.clone());
    assert_eq!(session.framing(), NalFraming::LengthPrefixed(4));

    let mut sink = Vec::new();
    for packet in &frames {
        assert_eq!(
            session
                .submit_and_drain(&length_prefixed(packet), &mut sink)
                .unwrap(),
            1
        );
    }
    assert_eq!(session.finish(&mut sink).unwrap(), 0);

    assert_eq!(session.frames_written(), 2);
    assert_eq!(sink.len(), 2 * FRAME_SIZE);
    assert_eq!(
        lines.text(),
        "[1] Frame written: width=64, height=48\n[2] Frame written: width=64, height=48\n"
    );
}

#[test]
fn packet_with_two_pictures_writes_both() {
    let frames = encode_two_frames();
    let lines = Lines::default();
    let mut session = DecodeSession::create(&avcc_record(&frames[0], 4), SessionConfig::default())
        .unwrap()
        .with_progress_output(lines.clone());

    let mut sink = Vec::new();
    assert_eq!(
        session
            .submit_and_drain(&length_prefixed(&frames.concat()), &mut sink)
            .unwrap(),
        2
    );
    assert_eq!(session.frames_written(), 2);
    assert_eq!(sink.len(), 2 * FRAME_SIZE);
    assert_eq!(lines.text().lines().count(), 2);
}

#[test]
fn quiet_session_reports_nothing() {
    let frames = encode_two_frames();
    let lines = Lines::default();
    let mut session = DecodeSession::create(&avcc_record(&frames[0], 4), quiet())
        .unwrap()
        .with_progress_output(lines.clone());

    let mut sink = Vec::new();
    session
        .submit_and_drain(&length_prefixed(&frames[0]), &mut sink)
        .unwrap();
    assert_eq!(session.frames_written(), 1);
    assert!(lines.text().is_empty());
}

#[test]
fn parameter_sets_alone_write_nothing() {
    let frames = encode_two_frames();
    let mut session = DecodeSession::create(&avcc_record(&frames[0], 4), quiet()).unwrap();

    let parameter_sets: Vec<u8> = annexb::nal_units(&frames[0])
        .filter(|nal| matches!(annexb::nal_type(nal), Some(NAL_SPS | NAL_PPS)))
        .flat_map(|nal| {
            let mut unit = (nal.len() as u32).to_be_bytes().to_vec();
            unit.extend_from_slice(nal);
            unit
        })
        .collect();

    let mut sink = Vec::new();
    assert_eq!(session.submit_and_drain(&parameter_sets, &mut sink).unwrap(), 0);
    assert_eq!(session.submit_and_drain(&[], &mut sink).unwrap(), 0);
    assert!(sink.is_empty());
    assert_eq!(session.frames_written(), 0);
}

#[test]
fn p_frame_without_reference_writes_nothing() {
    let frames = encode_two_frames();
    let mut session = DecodeSession::create(&avcc_record(&frames[0], 4), quiet()).unwrap();

    let mut sink = Vec::new();
    match session.submit_and_drain(&length_prefixed(&frames[1]), &mut sink) {
        Ok(written) => assert_eq!(written, 0),
        Err(err) => assert!(matches!(err, DecoderError::DecodeFail(_)), "{err}"),
    }
    assert!(sink.is_empty());
    assert_eq!(session.frames_written(), 0);
}

#[test]
fn malformed_access_unit_leaves_session_usable() {
    let frames = encode_two_frames();
    let mut session = DecodeSession::create(&avcc_record(&frames[0], 4), quiet()).unwrap();
    let mut sink = Vec::new();

    let err = session
        .submit_and_drain(&[0, 0, 0, 200, 0x65], &mut sink)
        .unwrap_err();
    assert!(matches!(err, DecoderError::Packaging(_)));

    assert_eq!(
        session
            .submit_and_drain(&length_prefixed(&frames[0]), &mut sink)
            .unwrap(),
        1
    );
    assert_eq!(session.frames_written(), 1);
    assert_eq!(sink.len(), FRAME_SIZE);
}

#[test]
fn counters_are_per_session() {
    let frames = encode_two_frames();
    let record = avcc_record(&frames[0], 4);
    let mut sink = Vec::new();

    let mut first = DecodeSession::create(&record, quiet()).unwrap();
    first
        .submit_and_drain(&length_prefixed(&frames[0]), &mut sink)
        .unwrap();
    assert_eq!(first.frames_written(), 1);
    drop(first);

    let second = DecodeSession::create(&record, quiet()).unwrap();
    assert_eq!(second.frames_written(), 0);
}

#[test]
fn file_source_appends_both_frames() {
    let frames = encode_two_frames();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("two.h264");
    std::fs::write(&input, frames.concat()).unwrap();

    let mut sink = RawFileSink::new(dir.path().join("two.yuv"));
    let summary = FileSource::new(&input).run(quiet(), &mut sink).unwrap();

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.failures, 0);
    assert_eq!(std::fs::read(sink.path()).unwrap().len(), 2 * FRAME_SIZE);

    // Any avcC length size works; the slices are far longer than 255 bytes.
    for length_size in [1, 2, 4] {
        let record = dir.path().join(format!("two-{length_size}.avcc"));
        std::fs::write(&record, avcc_record(&frames[0], length_size)).unwrap();

        let mut with_record = RawFileSink::new(dir.path().join(format!("two-{length_size}.yuv")));
        let summary = FileSource::new(&input)
            .with_config(Some(record))
            .run(quiet(), &mut with_record)
            .unwrap();

        assert_eq!((summary.frames, summary.failures), (2, 0));
        assert_eq!(
            std::fs::read(sink.path()).unwrap(),
            std::fs::read(with_record.path()).unwrap()
        );
    }
}
