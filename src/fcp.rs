//! SELECT response interpretation.
//!
//! The same file answers SELECT twice per scan, in two very different
//! encodings. Legacy (TS 51.011) responses are a fixed-position frame:
//!
//! ```text
//! byte  2..4   file size (big-endian u16)
//! byte  6      file type (01 MF, 02 DF, 04 EF)
//! byte  8..11  access conditions
//! byte  11     status (bit 0: valid; bit 2: readable when invalidated)
//! byte  13     EF structure (00 transparent, 01 linear fixed, 03 cyclic)
//! byte  14     record size
//! ```
//!
//! 3G responses are an FCP template (tag 0x62) per TS 102 221 11.1.1.3.
//! Both appliers merge into a [`FileRecord`] by filling only fields that
//! are still absent, so whatever the 2G pass established wins and the 3G
//! pass enriches the rest.

use byteorder::{BigEndian, ByteOrder};
use scroll::{Pread, BE};
use tracing::warn;

use crate::file::{FileRecord, FileStatus, FileStructure, FileType};
use crate::{tlv, Result};

/// File size within the FCP template; u16 or u24.
const TAG_FILE_SIZE: u8 = 0x80;
/// File descriptor: structure bits, record size and count.
const TAG_FILE_DESCRIPTOR: u8 = 0x82;
/// Short File Identifier (upper five bits of the value byte).
const TAG_SFI: u8 = 0x88;
/// Proprietary information; contains 0x80 (UICC characteristics) on the MF.
const TAG_PROPRIETARY: u8 = 0xA5;
/// PIN status template, mandatory for MF and DF, absent on EFs.
const TAG_PIN_STATUS: u8 = 0xC6;

/// Interprets a legacy SELECT response into `rec`.
pub fn apply_select_2g(rec: &mut FileRecord, resp: &[u8]) -> Result<()> {
    let type_byte: u8 = resp.pread(6)?;
    let Ok(file_type) = FileType::try_from(type_byte) else {
        warn!("unknown legacy file type byte {:02X}", type_byte);
        return Ok(());
    };
    rec.file_type.get_or_insert(file_type);
    if file_type != FileType::Ef {
        return Ok(());
    }

    let structure_byte: u8 = resp.pread(13)?;
    match FileStructure::from_legacy(structure_byte) {
        Some(s) => {
            rec.structure.get_or_insert(s);
        }
        None => warn!("unknown legacy EF structure byte {:02X}", structure_byte),
    }

    let size = resp.pread_with::<u16>(2, BE)? as u32;
    rec.size.get_or_insert(size);

    if matches!(rec.structure, Some(s) if s.is_record_based()) {
        let record_size: u8 = resp.pread(14)?;
        if record_size > 0 {
            rec.record_size.get_or_insert(record_size as u16);
            rec.record_count
                .get_or_insert((size / record_size as u32) as u16);
        }
    }

    let status: u8 = resp.pread(11)?;
    if status & 0x01 == 0x00 {
        let status = if status & 0x04 == 0x04 {
            FileStatus::InvalidatedReadable
        } else {
            FileStatus::InvalidatedUnreadable
        };
        rec.status.get_or_insert(status);
    }

    let access = [resp.pread(8)?, resp.pread(9)?, resp.pread(10)?];
    rec.access_2g.get_or_insert(access);
    Ok(())
}

/// Interprets a 3G SELECT response (FCP template) into `rec`.
///
/// File type derivation: no PIN status template means EF; otherwise the MF
/// is recognised by the UICC-characteristics record inside the proprietary
/// block, and everything else is a DF.
pub fn apply_select_3g(rec: &mut FileRecord, resp: &[u8]) -> Result<()> {
    let fcp = tlv::find(resp, 0x62)?;

    let file_type = if tlv::find(fcp, TAG_PIN_STATUS).is_ok() {
        let is_mf = tlv::find(fcp, TAG_PROPRIETARY)
            .map(|prop| tlv::find(prop, 0x80).is_ok())
            .unwrap_or(false);
        if is_mf {
            FileType::Mf
        } else {
            FileType::Df
        }
    } else {
        FileType::Ef
    };
    rec.file_type.get_or_insert(file_type);

    if !rec.is_ef() {
        return Ok(());
    }

    let descriptor = match tlv::find(fcp, TAG_FILE_DESCRIPTOR) {
        Ok(d) if !d.is_empty() => d,
        _ => {
            warn!("FCP carries no usable file descriptor");
            return Ok(());
        }
    };
    match FileStructure::from_descriptor(descriptor[0]) {
        Some(s) => {
            rec.structure.get_or_insert(s);
        }
        None => warn!("unknown file descriptor byte {:02X}", descriptor[0]),
    }

    match tlv::find(fcp, TAG_FILE_SIZE) {
        Ok(v) if v.len() == 2 => {
            rec.size.get_or_insert(BigEndian::read_u16(v) as u32);
        }
        Ok(v) if v.len() == 3 => {
            rec.size.get_or_insert(BigEndian::read_u24(v));
        }
        Ok(v) => warn!("file size value has unexpected length {}", v.len()),
        Err(_) => warn!("FCP carries no file size"),
    }

    if matches!(rec.structure, Some(s) if s.is_record_based()) {
        if descriptor.len() >= 5 {
            rec.record_size
                .get_or_insert(BigEndian::read_u16(&descriptor[2..4]));
            rec.record_count.get_or_insert(descriptor[4] as u16);
        } else {
            warn!(
                "record-based descriptor too short: {} bytes",
                descriptor.len()
            );
        }
    }

    if let Ok(v) = tlv::find(fcp, TAG_SFI) {
        if let Some(b) = v.first() {
            rec.sfi = Some(b >> 3);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FilePath;

    fn record() -> FileRecord {
        FileRecord::new(FilePath::mf())
    }

    fn legacy_frame(
        size: u16,
        file_type: u8,
        status: u8,
        structure: u8,
        record_size: u8,
    ) -> Vec<u8> {
        vec![
            0x00,
            0x00,
            (size >> 8) as u8,
            (size & 0xFF) as u8,
            0x6F,
            0x07,
            file_type,
            0x00,
            0x01,
            0xFF,
            0x44,
            status,
            0x02,
            structure,
            record_size,
        ]
    }

    #[test]
    fn legacy_linear_fixed_ef() {
        let mut rec = record();
        apply_select_2g(&mut rec, &legacy_frame(30, 0x04, 0x05, 0x01, 10))
            .expect("apply failed");
        assert_eq!(rec.file_type, Some(FileType::Ef));
        assert_eq!(rec.structure, Some(FileStructure::LinearFixed));
        assert_eq!(rec.size, Some(30));
        assert_eq!(rec.record_size, Some(10));
        assert_eq!(rec.record_count, Some(3));
        assert_eq!(rec.status, None);
        assert_eq!(rec.access_2g, Some([0x01, 0xFF, 0x44]));
    }

    #[test]
    fn legacy_transparent_ef_has_no_record_fields() {
        let mut rec = record();
        apply_select_2g(&mut rec, &legacy_frame(0x0200, 0x04, 0x05, 0x00, 0x00))
            .expect("apply failed");
        assert_eq!(rec.structure, Some(FileStructure::Transparent));
        assert_eq!(rec.size, Some(512));
        assert_eq!(rec.record_size, None);
        assert_eq!(rec.record_count, None);
    }

    #[test]
    fn legacy_df_sets_only_the_type() {
        let mut rec = record();
        apply_select_2g(&mut rec, &legacy_frame(0, 0x02, 0x00, 0x00, 0x00))
            .expect("apply failed");
        assert_eq!(rec.file_type, Some(FileType::Df));
        assert_eq!(rec.size, None);
        assert_eq!(rec.access_2g, None);
    }

    #[test]
    fn legacy_invalidated_status_bits() {
        let mut rec = record();
        apply_select_2g(&mut rec, &legacy_frame(10, 0x04, 0x00, 0x00, 0x00))
            .expect("apply failed");
        assert_eq!(rec.status, Some(FileStatus::InvalidatedUnreadable));

        let mut rec = record();
        apply_select_2g(&mut rec, &legacy_frame(10, 0x04, 0x04, 0x00, 0x00))
            .expect("apply failed");
        assert_eq!(rec.status, Some(FileStatus::InvalidatedReadable));
    }

    #[test]
    fn legacy_truncated_frame_is_an_error() {
        let mut rec = record();
        assert!(apply_select_2g(&mut rec, &[0x00, 0x00, 0x01]).is_err());
    }

    fn fcp(inner: &[u8]) -> Vec<u8> {
        let mut out = vec![0x62, inner.len() as u8];
        out.extend_from_slice(inner);
        out
    }

    #[test]
    fn fcp_mf_detection() {
        // PIN status template present, proprietary block carries 0x80.
        let resp = fcp(&[
            0x82, 0x02, 0x78, 0x21, //
            0xA5, 0x03, 0x80, 0x01, 0x71, //
            0xC6, 0x03, 0x90, 0x01, 0x40,
        ]);
        let mut rec = record();
        apply_select_3g(&mut rec, &resp).expect("apply failed");
        assert_eq!(rec.file_type, Some(FileType::Mf));
    }

    #[test]
    fn fcp_df_detection() {
        // Same shape, but the proprietary block has no 0x80 record.
        let resp = fcp(&[
            0x82, 0x02, 0x78, 0x21, //
            0xA5, 0x04, 0x83, 0x02, 0xE2, 0xAC, //
            0xC6, 0x03, 0x90, 0x01, 0x40,
        ]);
        let mut rec = record();
        apply_select_3g(&mut rec, &resp).expect("apply failed");
        assert_eq!(rec.file_type, Some(FileType::Df));
    }

    #[test]
    fn fcp_linear_fixed_ef() {
        let resp = fcp(&[
            0x82, 0x05, 0x42, 0x21, 0x00, 0x20, 0x06, //
            0x83, 0x02, 0x6F, 0x3A, //
            0x80, 0x02, 0x00, 0xC0, //
            0x88, 0x01, 0xA8,
        ]);
        let mut rec = record();
        apply_select_3g(&mut rec, &resp).expect("apply failed");
        assert_eq!(rec.file_type, Some(FileType::Ef));
        assert_eq!(rec.structure, Some(FileStructure::LinearFixed));
        assert_eq!(rec.record_size, Some(32));
        assert_eq!(rec.record_count, Some(6));
        assert_eq!(rec.size, Some(192));
        assert_eq!(rec.sfi, Some(0x15));
    }

    #[test]
    fn fcp_cyclic_descriptor() {
        let resp = fcp(&[0x82, 0x05, 0x46, 0x21, 0x00, 0x2B, 0x64, 0x80, 0x02, 0x10, 0xCC]);
        let mut rec = record();
        apply_select_3g(&mut rec, &resp).expect("apply failed");
        assert_eq!(rec.structure, Some(FileStructure::Cyclic));
        assert_eq!(rec.record_size, Some(0x2B));
        assert_eq!(rec.record_count, Some(0x64));
    }

    #[test]
    fn fcp_u24_file_size() {
        let resp = fcp(&[0x82, 0x02, 0x41, 0x21, 0x80, 0x03, 0x01, 0x00, 0x00]);
        let mut rec = record();
        apply_select_3g(&mut rec, &resp).expect("apply failed");
        assert_eq!(rec.size, Some(0x010000));
    }

    #[test]
    fn fcp_merge_fills_only_absent_fields() {
        let mut rec = record();
        apply_select_2g(&mut rec, &legacy_frame(30, 0x04, 0x05, 0x01, 10))
            .expect("apply failed");

        // The 3G view disagrees on everything; the 2G values must survive.
        let resp = fcp(&[
            0x82, 0x05, 0x42, 0x21, 0x00, 0x20, 0x06, //
            0x80, 0x02, 0x00, 0xC0, //
            0x88, 0x01, 0x08,
        ]);
        apply_select_3g(&mut rec, &resp).expect("apply failed");
        assert_eq!(rec.size, Some(30));
        assert_eq!(rec.record_size, Some(10));
        assert_eq!(rec.record_count, Some(3));
        // SFI has no legacy source and is taken from the FCP.
        assert_eq!(rec.sfi, Some(0x01));
    }

    #[test]
    fn fcp_without_template_is_tag_missing() {
        let mut rec = record();
        assert!(matches!(
            apply_select_3g(&mut rec, &[0x6F, 0x02, 0x82, 0x00]),
            Err(crate::Error::TagMissing(0x62))
        ));
    }
}
