//! TS 102 221 flavoured TLV (Tag-Length-Value) parsing.
//!
//! SELECT responses on 3G-aware cards carry File Control Parameters as a
//! BER-TLV template (tag 0x62). The UICC profiles in scope use single-byte
//! tags and single-byte lengths exclusively, so this parser deliberately
//! does not implement the multi-byte BER forms; a buffer using them fails
//! to parse rather than being misread.
//!
//! Lookups walk the buffer record by record. Matching a tag by scanning for
//! its byte value is wrong: the same byte can occur inside an earlier
//! record's value (0x80 is both "File Size" at the template level and "UICC
//! characteristics" inside the 0xA5 proprietary block).

use nom::bytes::complete::take;
use nom::number::complete::be_u8;

use crate::{Error, Result};

pub type IResult<'a, T> = nom::IResult<&'a [u8], T>;

/// Parses the next (tag, value) pair from a TLV blob.
pub fn parse_next(data: &[u8]) -> IResult<(u8, &[u8])> {
    let (data, tag) = be_u8(data)?;
    let (data, len) = be_u8(data)?;
    let (data, val) = take(len as usize)(data)?;
    Ok((data, (tag, val)))
}

/// Iterates over every record of a concatenated TLV buffer in order.
///
/// Yields `Err(MalformedTlv)` carrying the byte offset of the record whose
/// header or value runs past the end of the buffer, then stops.
pub fn iter(data: &[u8]) -> Iter {
    Iter {
        rest: data,
        offset: 0,
        failed: false,
    }
}

pub struct Iter<'a> {
    rest: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Result<(u8, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        match parse_next(self.rest) {
            Ok((rest, tv)) => {
                self.offset += self.rest.len() - rest.len();
                self.rest = rest;
                Some(Ok(tv))
            }
            Err(_) => {
                self.failed = true;
                Some(Err(Error::MalformedTlv(self.offset)))
            }
        }
    }
}

/// Returns the value of the first record with the given tag.
pub fn find(data: &[u8], tag: u8) -> Result<&[u8]> {
    for res in iter(data) {
        let (t, v) = res?;
        if t == tag {
            return Ok(v);
        }
    }
    Err(Error::TagMissing(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    // SELECT response for EF.ARR on a test UICC.
    const FCI: &[u8] = &[
        0x62, 0x21, 0x82, 0x02, 0x78, 0x21, 0x83, 0x02, 0x7F, 0x4F, 0xA5, 0x04, 0x83, 0x02, 0xE2,
        0xAC, 0x8A, 0x01, 0x05, 0x8B, 0x03, 0x2F, 0x06, 0x02, 0xC6, 0x09, 0x90, 0x01, 0x40, 0x83,
        0x01, 0x01, 0x83, 0x01, 0x81,
    ];

    #[test]
    fn parse_fcp_template() {
        let fcp = find(FCI, 0x62).expect("no FCP template");
        assert_eq!(fcp.len(), 0x21);

        let records: Vec<_> = iter(fcp).collect::<Result<_>>().expect("malformed FCP");
        let tags: Vec<u8> = records.iter().map(|(t, _)| *t).collect();
        let lens: Vec<usize> = records.iter().map(|(_, v)| v.len()).collect();
        assert_eq!(tags, vec![0x82, 0x83, 0xA5, 0x8A, 0x8B, 0xC6]);
        assert_eq!(lens, vec![2, 2, 4, 1, 3, 9]);
    }

    #[test]
    fn records_cover_buffer_exactly() {
        let fcp = find(FCI, 0x62).expect("no FCP template");
        let total: usize = iter(fcp)
            .map(|r| r.map(|(_, v)| 2 + v.len()))
            .sum::<Result<usize>>()
            .expect("malformed FCP");
        assert_eq!(total, fcp.len());
    }

    #[test]
    fn find_ignores_tag_bytes_inside_values() {
        // 0x82 occurs inside the 0xA5 value; the real 0x82 record follows.
        let buf = &[0xA5, 0x03, 0x82, 0x01, 0xFF, 0x82, 0x02, 0xAA, 0xBB];
        assert_eq!(find(buf, 0x82).expect("tag not found"), &[0xAA, 0xBB]);
    }

    #[test]
    fn find_returns_first_match() {
        let buf = &[0x83, 0x01, 0x01, 0x83, 0x01, 0x81];
        assert_eq!(find(buf, 0x83).expect("tag not found"), &[0x01]);
    }

    #[test]
    fn missing_tag() {
        assert!(matches!(find(FCI, 0x84), Err(Error::TagMissing(0x84))));
    }

    #[test]
    fn value_past_end_of_buffer() {
        let buf = &[0x82, 0x05, 0x01, 0x02];
        let mut it = iter(buf);
        assert!(matches!(it.next(), Some(Err(Error::MalformedTlv(0)))));
        assert!(it.next().is_none());
    }

    #[test]
    fn truncated_header() {
        // Second record has a tag but no length byte.
        let buf = &[0x82, 0x01, 0xFF, 0x8A];
        let mut it = iter(buf);
        assert!(matches!(it.next(), Some(Ok((0x82, _)))));
        assert!(matches!(it.next(), Some(Err(Error::MalformedTlv(3)))));
        assert!(it.next().is_none());
    }

    #[test]
    fn empty_buffer_is_empty_list() {
        assert_eq!(iter(&[]).count(), 0);
    }
}
