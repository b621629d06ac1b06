use thiserror::Error;

use super::annexb::{self, NalFraming, NAL_PPS, NAL_SPS};

/// Bytes of VisualSampleEntry fields between an `avc1` box header and its child boxes.
const VIDEO_SAMPLE_ENTRY_FIELDS_LEN: usize = 78;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration bytes are empty")]
    Empty,
    #[error("unsupported avcC version {0}")]
    UnsupportedVersion(u8),
    #[error("avcC record truncated at offset {0}")]
    Truncated(usize),
    #[error("invalid NAL length size {0}")]
    InvalidLengthSize(u8),
    #[error("configuration carries no SPS")]
    MissingSps,
    #[error("configuration carries no PPS")]
    MissingPps,
    #[error("expected NAL type {expected} in parameter set slot, found {found}")]
    UnexpectedNalType { expected: u8, found: u8 },
    #[error("no avcC record found in configuration bytes")]
    RecordNotFound,
}

/// Parameter sets plus the packaging that access units of this stream use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    pub framing: NalFraming,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

impl AvcConfig {
    /// Accepts a bare AVCDecoderConfigurationRecord, a box sequence holding an
    /// `avcC` box, or Annex-B parameter sets.
    pub fn parse(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.is_empty() {
            return Err(ConfigError::Empty);
        }
        if bytes[0] == 1 {
            return Self::from_record(bytes);
        }

        // A box size of 0x1xx also begins with 00 00 01, so boxes are tried first.
        match find_box_payload(bytes, b"avcC") {
            Some(record) => Self::from_record(record),
            None if annexb::starts_with_start_code(bytes) => Self::from_annex_b(bytes),
            None => Err(ConfigError::RecordNotFound),
        }
    }

    pub fn from_record(record: &[u8]) -> Result<Self, ConfigError> {
        let mut reader = Reader::new(record);

        let version = reader.u8()?;
        if version != 1 {
            return Err(ConfigError::UnsupportedVersion(version));
        }
        let profile_indication = reader.u8()?;
        let profile_compatibility = reader.u8()?;
        let level_indication = reader.u8()?;

        let length_size = (reader.u8()? & 0b11) + 1;
        if length_size == 3 {
            return Err(ConfigError::InvalidLengthSize(length_size));
        }

        let sps_count = reader.u8()? & 0b1_1111;
        let sps = (0..sps_count)
            .map(|_| reader.parameter_set(NAL_SPS))
            .collect::<Result<Vec<_>, _>>()?;

        let pps_count = reader.u8()?;
        let pps = (0..pps_count)
            .map(|_| reader.parameter_set(NAL_PPS))
            .collect::<Result<Vec<_>, _>>()?;

        // High profile extension fields may follow; they are not needed by the decoder.
        Self {
            profile_indication,
            profile_compatibility,
            level_indication,
            framing: NalFraming::LengthPrefixed(length_size),
            sps,
            pps,
        }
        .checked()
    }

    fn from_annex_b(bytes: &[u8]) -> Result<Self, ConfigError> {
        let mut sps = Vec::new();
        let mut pps = Vec::new();
        for nal in annexb::nal_units(bytes) {
            match annexb::nal_type(nal) {
                Some(NAL_SPS) => sps.push(nal.to_vec()),
                Some(NAL_PPS) => pps.push(nal.to_vec()),
                _ => {}
            }
        }

        let (profile_indication, profile_compatibility, level_indication) = sps
            .first()
            .filter(|s| s.len() >= 4)
            .map(|s| (s[1], s[2], s[3]))
            .unwrap_or_default();

        Self {
            profile_indication,
            profile_compatibility,
            level_indication,
            framing: NalFraming::AnnexB,
            sps,
            pps,
        }
        .checked()
    }

    fn checked(self) -> Result<Self, ConfigError> {
        if self.sps.is_empty() {
            return Err(ConfigError::MissingSps);
        }
        if self.pps.is_empty() {
            return Err(ConfigError::MissingPps);
        }
        Ok(self)
    }

    /// SPS followed by PPS, Annex-B packaged, ready for the decoder.
    pub fn parameter_sets_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::new();
        annexb::write_annex_b(
            self.sps.iter().chain(self.pps.iter()).map(Vec::as_slice),
            &mut out,
        );
        out
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackagingError {
    #[error("length field truncated at offset {0}")]
    FieldOutOfBounds(usize),
    #[error("NAL unit of {len} bytes at offset {at} overruns the packet")]
    NalOutOfBounds { at: usize, len: usize },
    #[error("NAL unit of {len} bytes does not fit a {size}-byte length field")]
    NalTooLarge { len: usize, size: usize },
}

/// Rewrites length-prefixed access units into Annex-B, reusing one buffer.
pub struct AvccConverter {
    length_size: usize,
    buf: Vec<u8>,
}

impl AvccConverter {
    pub fn new(length_size: u8) -> Self {
        Self {
            length_size: length_size as usize,
            buf: Vec::new(),
        }
    }

    pub fn avcc_to_annex_b(&mut self, avcc_data: &[u8]) -> Result<&[u8], PackagingError> {
        self.buf.clear();
        let mut index = 0;

        while index < avcc_data.len() {
            if index + self.length_size > avcc_data.len() {
                return Err(PackagingError::FieldOutOfBounds(index));
            }

            let nal_size = avcc_data[index..index + self.length_size]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize);
            index += self.length_size;

            if index + nal_size > avcc_data.len() {
                return Err(PackagingError::NalOutOfBounds {
                    at: index,
                    len: nal_size,
                });
            }

            self.buf.extend_from_slice(&annexb::START_CODE);
            self.buf.extend_from_slice(&avcc_data[index..index + nal_size]);
            index += nal_size;
        }

        Ok(&self.buf)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ConfigError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(ConfigError::Truncated(self.pos))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ConfigError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ConfigError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn parameter_set(&mut self, expected: u8) -> Result<Vec<u8>, ConfigError> {
        let len = self.u16()? as usize;
        let at = self.pos;
        let nal = self.take(len)?;
        match annexb::nal_type(nal) {
            Some(found) if found == expected => Ok(nal.to_vec()),
            Some(found) => Err(ConfigError::UnexpectedNalType { expected, found }),
            None => Err(ConfigError::Truncated(at)),
        }
    }
}

fn find_box_payload<'a>(buf: &'a [u8], marker: &[u8; 4]) -> Option<&'a [u8]> {
    fn walk<'a>(
        buf: &'a [u8],
        mut cursor: usize,
        limit: usize,
        marker: &[u8; 4],
    ) -> Option<&'a [u8]> {
        while cursor + 8 <= limit {
            let mut size = u32::from_be_bytes(buf[cursor..cursor + 4].try_into().ok()?) as usize;
            if size == 0 {
                size = limit - cursor;
            }
            if size < 8 || cursor + size > limit {
                return None;
            }

            let kind = &buf[cursor + 4..cursor + 8];
            if kind == marker {
                return Some(&buf[cursor + 8..cursor + size]);
            }

            let body_start = match kind {
                b"avc1" | b"avc3" => Some(cursor + 8 + VIDEO_SAMPLE_ENTRY_FIELDS_LEN),
                b"stsd" => Some(cursor + 16),
                b"trak" | b"mdia" | b"minf" | b"stbl" => Some(cursor + 8),
                _ => None,
            };
            if let Some(start) = body_start.filter(|start| *start < cursor + size) {
                if let Some(inner) = walk(buf, start, cursor + size, marker) {
                    return Some(inner);
                }
            }

            cursor += size;
        }
        None
    }

    walk(buf, 0, buf.len(), marker)
}
