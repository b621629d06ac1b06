use std::iter::Peekable;

use super::avcc::PackagingError;

pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;

/// How NAL units are delimited inside an access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalFraming {
    AnnexB,
    /// Big-endian length field of 1, 2 or 4 bytes before each NAL unit.
    LengthPrefixed(u8),
}

impl NalFraming {
    pub fn package<'a>(
        &self,
        nals: impl IntoIterator<Item = &'a [u8]>,
        out: &mut Vec<u8>,
    ) -> Result<(), PackagingError> {
        let size = match *self {
            NalFraming::AnnexB => {
                write_annex_b(nals, out);
                return Ok(());
            }
            NalFraming::LengthPrefixed(size) => size as usize,
        };

        for nal in nals {
            if size < 4 && nal.len() >> (8 * size) != 0 {
                return Err(PackagingError::NalTooLarge {
                    len: nal.len(),
                    size,
                });
            }
            let len = (nal.len() as u32).to_be_bytes();
            out.extend_from_slice(&len[4 - size..]);
            out.extend_from_slice(nal);
        }
        Ok(())
    }
}

/// Writes each NAL unit behind a 4-byte start code.
pub fn write_annex_b<'a>(nals: impl IntoIterator<Item = &'a [u8]>, out: &mut Vec<u8>) {
    for nal in nals {
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(nal);
    }
}

pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|header| header & 0x1f)
}

pub fn starts_with_start_code(buf: &[u8]) -> bool {
    buf.starts_with(&[0, 0, 1]) || buf.starts_with(&START_CODE)
}

fn find_start_code(buf: &[u8]) -> Option<usize> {
    buf.windows(3).position(|w| w == [0, 0, 1])
}

/// NAL units of an Annex-B byte stream, without their start codes.
pub fn nal_units(stream: &[u8]) -> NalUnits<'_> {
    let rest = match find_start_code(stream) {
        Some(pos) => &stream[pos + 3..],
        None => &[],
    };
    NalUnits { rest }
}

pub struct NalUnits<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while !self.rest.is_empty() {
            let (nal, rest) = match find_start_code(self.rest) {
                Some(pos) => (&self.rest[..pos], &self.rest[pos + 3..]),
                None => (self.rest, &[][..]),
            };
            self.rest = rest;

            // A NAL unit ends with the rbsp stop bit, so trailing zeros belong to
            // the next start code.
            let end = nal.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
            if end > 0 {
                return Some(&nal[..end]);
            }
        }
        None
    }
}

/// Groups the NAL units of an Annex-B stream into access units.
pub fn access_units(stream: &[u8]) -> AccessUnits<'_> {
    AccessUnits {
        nals: nal_units(stream).peekable(),
    }
}

pub struct AccessUnits<'a> {
    nals: Peekable<NalUnits<'a>>,
}

impl<'a> Iterator for AccessUnits<'a> {
    type Item = Vec<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut unit = Vec::new();
        let mut has_slice = false;

        while let Some(&nal) = self.nals.peek() {
            if has_slice && starts_access_unit(nal) {
                break;
            }
            has_slice |= is_slice(nal);
            unit.push(nal);
            self.nals.next();
        }

        (!unit.is_empty()).then_some(unit)
    }
}

fn is_slice(nal: &[u8]) -> bool {
    matches!(nal_type(nal), Some(NAL_SLICE | NAL_IDR))
}

fn starts_access_unit(nal: &[u8]) -> bool {
    match nal_type(nal) {
        Some(NAL_SEI | NAL_SPS | NAL_PPS | NAL_AUD | 14..=18) => true,
        // first_mb_in_slice is ue(v); a leading 1 bit encodes 0.
        Some(NAL_SLICE | NAL_IDR) => nal.get(1).is_some_and(|b| b & 0x80 != 0),
        _ => false,
    }
}
