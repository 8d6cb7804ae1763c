//! Scan orchestration.
//!
//! A scan is one fixed sequence against one card:
//!
//! 1. open the replay sink, power up, write the header
//! 2. (full script) present the 2G verification codes
//! 3. enumerate files via READ HEADER, or fall back to the supplied list
//! 4. 2G pass: SELECT every path, interpret the legacy response, read
//!    contents unless deferred to 3G
//! 5. power-cycle the card
//! 6. (full script) present the 3G verification codes
//! 7. 3G pass: SELECT every path, merge the FCP data, read contents if
//!    deferred
//! 8. flush
//!
//! The channel is owned here for the whole scan, so it is released on
//! every exit path - verification trouble, transport failure, success.

use apdu::Status;
use std::io::Write;
use tap::TapFallible;
use tracing::{debug, info, trace_span, warn};

use crate::commands::{Generation, MAX_RESPONSE_LEN, SW_OK};
use crate::file::{Content, FilePath, FileRecord, FileStatus};
use crate::script::ScriptWriter;
use crate::session::{Session, Trace};
use crate::transport::CardChannel;
use crate::{discover, fcp, verify, Error, Result};

/// Name written into the replay-script header.
pub const TOOL_NAME: &str = "simscan";

/// SELECT warning: selected file is invalidated.
const SW_INVALIDATED: Status = Status(0x62, 0x83);

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Run the verification sequences (set when ADM1 is supplied).
    pub full_script: bool,
    /// Read EF contents during the 3G pass instead of the 2G pass.
    pub read_content_3g: bool,
    pub verify: verify::VerifyConfig,
    /// Fallback paths for cards without READ HEADER support.
    pub file_system: Option<Vec<FilePath>>,
}

/// Runs a full two-phase scan, returning the inventory in discovery order.
pub fn run<C: CardChannel, W: Write>(
    channel: C,
    sink: W,
    opts: &ScanOptions,
) -> Result<Vec<FileRecord>> {
    let span = trace_span!("scan");
    let _enter = span.enter();

    let mut session = Session::new(channel, ScriptWriter::new(sink));
    session.header(TOOL_NAME)?;
    session.power_on_marker()?;

    if opts.full_script {
        verify::run_2g(&mut session, &opts.verify)?;
    }

    let paths = enumerate(&mut session, opts)?;
    info!("Scanning {} files in 2G mode", paths.len());

    let mut records = Vec::with_capacity(paths.len());
    for path in &paths {
        let mut rec = FileRecord::new(path.clone());
        session.section(path)?;
        let resp = session.select_2g(path, Trace::Script)?;
        if resp.status == SW_OK {
            rec.select_2g_raw = Some(resp.data.clone());
            fcp::apply_select_2g(&mut rec, &resp.data)
                .tap_err(|err| warn!(path = %path, "bad legacy select response: {}", err))
                .ok();
            if rec.is_ef() && !opts.read_content_3g {
                read_content(&mut session, Generation::G2, &mut rec)?;
            }
        } else {
            // Application DFs on some cards refuse legacy selection; their
            // attributes come from the 3G pass instead.
            debug!(path = %path, sw = ?resp.status, "2G select refused");
        }
        records.push(rec);
    }

    session.power_cycle()?;

    if opts.full_script {
        verify::run_3g(&mut session, &opts.verify)?;
    }

    info!("Scanning {} files in 3G mode", records.len());
    for rec in &mut records {
        session.section(&rec.path)?;
        let resp = session.select_3g(&rec.path)?;
        if resp.status == SW_INVALIDATED {
            rec.status.get_or_insert(FileStatus::Invalidated);
            continue;
        }
        if resp.status != SW_OK {
            debug!(path = %rec.path, sw = ?resp.status, "3G select refused");
            continue;
        }
        rec.select_3g_raw = Some(resp.data.clone());
        fcp::apply_select_3g(rec, &resp.data)
            .tap_err(|err| warn!(path = %rec.path, "bad FCP: {}", err))
            .ok();
        if rec.is_ef() && opts.read_content_3g {
            read_content(&mut session, Generation::G3, rec)?;
        }
    }

    session.flush()?;
    Ok(records)
}

/// Discovers the file list, falling back to the externally supplied one
/// when the card has no READ HEADER.
fn enumerate<C: CardChannel, W: Write>(
    session: &mut Session<C, W>,
    opts: &ScanOptions,
) -> Result<Vec<FilePath>> {
    match discover::walk(session) {
        Ok(paths) => Ok(paths),
        Err(Error::DiscoveryUnavailable) => match &opts.file_system {
            Some(paths) if !paths.is_empty() => {
                info!("Populating file system from the supplied list");
                Ok(paths.clone())
            }
            _ => Err(Error::DiscoveryUnavailable),
        },
        Err(err) => Err(err),
    }
}

/// Reads an EF's contents into the record, respecting what is already
/// known. A denied record or chunk marks the content unreadable, but the
/// remaining reads are still issued so the replay script stays complete.
fn read_content<C: CardChannel, W: Write>(
    session: &mut Session<C, W>,
    gen: Generation,
    rec: &mut FileRecord,
) -> Result<()> {
    match rec.structure {
        Some(s) if s.is_record_based() => {
            let (Some(count), Some(record_size)) = (rec.record_count, rec.record_size) else {
                return Ok(());
            };
            let mut readable = true;
            let mut contents = Vec::with_capacity(count as usize);
            for number in 1..=count {
                let resp = session.read_record(gen, number, record_size)?;
                if resp.status != SW_OK {
                    readable = false;
                }
                contents.push(resp.data);
            }
            if readable && rec.content.is_none() {
                rec.content = Some(Content::Records(contents));
            }
        }
        Some(_) => {
            let Some(size) = rec.size else {
                return Ok(());
            };
            let mut readable = true;
            let mut body = Vec::with_capacity(size as usize);
            let mut offset = 0u32;
            while offset < size {
                let len = MAX_RESPONSE_LEN.min(size - offset);
                let resp = session.read_binary(gen, offset, len)?;
                if resp.status != SW_OK {
                    readable = false;
                }
                body.extend_from_slice(&resp.data);
                offset += len;
            }
            if readable && rec.content.is_none() {
                rec.content = Some(Content::Transparent(body));
            }
        }
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileStructure, FileType};
    use crate::transport::testing::{basic_card, MockCard, MockFile};
    use crate::verify::VerifyConfig;

    fn scan(card: MockCard, opts: &ScanOptions) -> (Vec<FileRecord>, String) {
        let mut buf = Vec::new();
        let records = run(card, &mut buf, opts).expect("scan failed");
        (records, String::from_utf8(buf).expect("script is not UTF-8"))
    }

    fn by_path<'a>(records: &'a [FileRecord], path: &str) -> &'a FileRecord {
        records
            .iter()
            .find(|r| r.path.hex() == path)
            .expect("path not in inventory")
    }

    #[test]
    fn full_scan_inventory() {
        let (records, _) = scan(basic_card(), &ScanOptions::default());
        assert_eq!(records.len(), 6);

        assert_eq!(by_path(&records, "3F00").file_type, Some(FileType::Mf));
        assert_eq!(by_path(&records, "3F007F20").file_type, Some(FileType::Df));

        let ef = by_path(&records, "3F007F106F3A");
        assert_eq!(ef.file_type, Some(FileType::Ef));
        assert_eq!(ef.structure, Some(FileStructure::LinearFixed));
        assert_eq!(ef.size, Some(24));
        assert_eq!(ef.record_size, Some(8));
        assert_eq!(ef.record_count, Some(3));
        assert_eq!(
            ef.content,
            Some(Content::Records(vec![
                vec![0xA1; 8],
                vec![0xA2; 8],
                vec![0xA3; 8],
            ]))
        );
        assert!(ef.select_2g_raw.is_some());
        assert!(ef.select_3g_raw.is_some());

        // SFI only exists in the 3G view.
        assert_eq!(by_path(&records, "3F002FE2").sfi, Some(0x1D));
    }

    #[test]
    fn record_content_invariant_holds() {
        let (records, _) = scan(basic_card(), &ScanOptions::default());
        for rec in &records {
            if let Some(Content::Records(rows)) = &rec.content {
                assert_eq!(rows.len(), rec.record_count.unwrap() as usize);
                for row in rows {
                    assert_eq!(row.len(), rec.record_size.unwrap() as usize);
                }
            }
        }
    }

    #[test]
    fn transparent_read_is_chunked_at_250() {
        let body: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        let card = MockCard::new(vec![
            MockFile::dir("3F00"),
            MockFile::transparent("3F002FE2", body.clone()),
        ]);
        let (records, _) = scan(card, &ScanOptions::default());

        let ef = by_path(&records, "3F002FE2");
        assert_eq!(ef.size, Some(600));
        assert_eq!(ef.content, Some(Content::Transparent(body)));
    }

    #[test]
    fn transparent_chunk_offsets() {
        let card = MockCard::new(vec![
            MockFile::dir("3F00"),
            MockFile::transparent("3F002FE2", vec![0x5A; 600]),
        ]);
        let mut buf = Vec::new();
        let records = run(card, &mut buf, &ScanOptions::default()).expect("scan failed");
        assert!(records[1].content.is_some());

        let text = String::from_utf8(buf).expect("script is not UTF-8");
        let reads: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with("A0B0"))
            .collect();
        assert_eq!(reads.len(), 3);
        assert!(reads[0].starts_with("A0B00000FA "));
        assert!(reads[1].starts_with("A0B000FAFA "));
        assert!(reads[2].starts_with("A0B001F464 "));
    }

    #[test]
    fn invalidated_ef_is_flagged_and_unread() {
        let card = MockCard::new(vec![
            MockFile::dir("3F00"),
            MockFile::records("3F006F42", vec![vec![0x01; 4]; 2]).invalidated(false),
        ]);
        let (records, script) = scan(card, &ScanOptions::default());

        let ef = by_path(&records, "3F006F42");
        // The legacy pass sees the precise status bits.
        assert_eq!(ef.status, Some(FileStatus::InvalidatedUnreadable));
        // Reads were attempted (and denied) in 2G; nothing was stored.
        assert_eq!(ef.content, None);
        assert!(script.contains("A0B2"));
    }

    #[test]
    fn invalidated_status_from_3g_select_alone() {
        // Refuses 2G selection entirely, so only the 3G pass sees it.
        let card = MockCard::new(vec![
            MockFile::dir("3F00"),
            MockFile::transparent("3F006F42", vec![0x00; 4])
                .invalidated(true)
                .no_2g(),
        ]);
        let mut opts = ScanOptions::default();
        opts.read_content_3g = true;
        let (records, script) = scan(card, &opts);

        let ef = by_path(&records, "3F006F42");
        assert_eq!(ef.status, Some(FileStatus::Invalidated));
        assert_eq!(ef.content, None);
        // No 3G content read was attempted after the 6283.
        assert!(!script.contains("00B0"));
    }

    #[test]
    fn fallback_list_used_when_discovery_unavailable() {
        let mut card = basic_card();
        card.support_read_header = false;
        let opts = ScanOptions {
            file_system: Some(vec![
                FilePath::parse("3F00").expect("bad path"),
                FilePath::parse("3F007F20").expect("bad path"),
                FilePath::parse("3F007F206F07").expect("bad path"),
            ]),
            ..ScanOptions::default()
        };
        let (records, _) = scan(card, &opts);
        let order: Vec<String> = records.iter().map(|r| r.path.hex()).collect();
        assert_eq!(order, vec!["3F00", "3F007F20", "3F007F206F07"]);
        assert_eq!(
            by_path(&records, "3F007F206F07").structure,
            Some(FileStructure::Transparent)
        );
    }

    #[test]
    fn no_fallback_means_discovery_unavailable() {
        let mut card = basic_card();
        card.support_read_header = false;
        let mut buf = Vec::new();
        assert!(matches!(
            run(card, &mut buf, &ScanOptions::default()),
            Err(Error::DiscoveryUnavailable)
        ));
    }

    #[test]
    fn application_df_refusing_2g_is_typed_by_3g() {
        let card = MockCard::new(vec![
            MockFile::dir("3F00"),
            MockFile::dir("3F007FF0").no_2g(),
        ]);
        let (records, _) = scan(card, &ScanOptions::default());
        let adf = by_path(&records, "3F007FF0");
        assert!(adf.select_2g_raw.is_none());
        assert_eq!(adf.file_type, Some(FileType::Df));
    }

    #[test]
    fn content3g_defers_reading_to_the_3g_pass() {
        let mut opts = ScanOptions::default();
        opts.read_content_3g = true;
        let (records, script) = scan(basic_card(), &opts);

        let ef = by_path(&records, "3F007F206F07");
        assert!(ef.content.is_some());
        // Legacy read commands absent, 3G ones present.
        assert!(!script.contains("A0B0"));
        assert!(!script.contains("A0B2"));
        assert!(script.contains("00B0"));
    }

    #[test]
    fn script_layout_and_power_cycle() {
        let opts = ScanOptions {
            full_script: true,
            verify: VerifyConfig {
                adm1: "4331324131364442".into(),
                chv2: "39343438FFFFFFFF".into(),
                ..VerifyConfig::default()
            },
            ..ScanOptions::default()
        };
        let mut buf = Vec::new();
        let card = basic_card();
        let records = run(card, &mut buf, &opts).expect("scan failed");
        assert!(!records.is_empty());

        let text = String::from_utf8(buf).expect("script is not UTF-8");
        assert!(text.starts_with("; Generated with simscan on "));
        // One power-up per phase.
        assert_eq!(text.matches(".POWER_ON").count(), 2);
        // Every path appears as a section header in both passes.
        assert_eq!(text.matches("; 3F00/7F20/6F07").count(), 2);
        // Discovery probes and their helper selects stay out of the script.
        assert!(!text.contains("A0E8"));
        // Verify commands are present, 2G before the cycle and 3G after.
        let power2 = text.rfind(".POWER_ON").expect("no power marker");
        assert!(text[..power2].lines().any(|l| l.starts_with("A020")));
        assert!(text[power2..].lines().any(|l| l.starts_with("0020")));
    }

    #[test]
    fn power_cycle_happens_between_passes() {
        let mut buf = Vec::new();
        let _ = run(basic_card(), &mut buf, &ScanOptions::default()).expect("scan failed");
        let text = String::from_utf8(buf).expect("script is not UTF-8");
        let first = text.find(".POWER_ON").expect("missing first power-on");
        let second = text.rfind(".POWER_ON").expect("missing second power-on");
        assert!(second > first);
        // 2G selects appear between the markers, 3G selects only after.
        assert!(text[first..second].contains("A0A4"));
        assert!(!text[first..second].contains("00A4"));
        assert!(text[second..].contains("00A4"));
    }
}
