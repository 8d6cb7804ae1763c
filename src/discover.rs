//! Directory discovery via the proprietary READ HEADER command.
//!
//! Cards descending from the ex-OT mask expose `A0 E8 <slot> 04 17`, which
//! returns the header of the n-th entry of the currently selected
//! directory. The walker probes slots upward from 1, silently SELECTs each
//! discovered file to learn whether it is a DF (descend) or an EF (keep
//! going), and pops back to the parent when the card reports no more
//! entries (`94 02` or `6A 83`).
//!
//! Two resume slots are remembered while descending: one for the MF level
//! and one for the immediate parent, matching the two-level layouts these
//! cards ship. None of the probes or context re-selects appear in the
//! replay script.
//!
//! Any other READ HEADER status means the card does not implement the
//! command; the caller then falls back to an externally supplied file list.

use apdu::Status;
use std::io::Write;
use tracing::{debug, error, trace_span, warn};

use crate::commands::SW_OK;
use crate::file::{FilePath, FileType};
use crate::session::{Session, Trace};
use crate::transport::CardChannel;
use crate::{Error, Result};

/// Legacy SELECT response position of the file type byte.
const TYPE_BYTE: usize = 6;

/// READ HEADER: no more entries in the current directory.
const SW_NO_MORE_ENTRIES: Status = Status(0x94, 0x02);
const SW_NOT_FOUND: Status = Status(0x6A, 0x83);

/// Walks the card's tree from the MF, returning every discovered path in
/// pre-order: each DF before its children, siblings in probe order.
pub fn walk<C: CardChannel, W: Write>(session: &mut Session<C, W>) -> Result<Vec<FilePath>> {
    let span = trace_span!("discover");
    let _enter = span.enter();

    let mut discovered = vec![FilePath::mf()];
    let mut current_df = FilePath::mf();
    let mut mf_resume: u16 = 0;
    let mut df_resume: u16 = 0;
    let mut index: u16 = 1;

    while index < 256 {
        let probe = session.read_header(index as u8)?;
        if probe.status == SW_OK {
            if probe.data.len() < 2 {
                warn!(index, "READ HEADER returned a short entry; stopping");
                break;
            }
            let fid = [probe.data[0], probe.data[1]];
            let path = current_df.child(fid);
            debug!(slot = index, path = %path, "discovered");
            discovered.push(path.clone());

            if probe_is_df(session, &path, &current_df)? {
                // Descend: remember where to pick this level back up.
                if current_df.is_mf() {
                    mf_resume = index;
                } else {
                    df_resume = index;
                }
                current_df = path;
                index = 0;
            }
        } else if probe.status == SW_NO_MORE_ENTRIES || probe.status == SW_NOT_FOUND {
            // End of this directory; pop to the parent and resume.
            let Some(parent) = current_df.parent() else {
                break;
            };
            session.reselect_2g(&parent)?;
            index = if parent.is_mf() { mf_resume } else { df_resume };
            current_df = parent;
        } else {
            error!(
                index,
                df = %current_df,
                sw = ?probe.status,
                "READ HEADER refused; card does not support discovery"
            );
            return Err(Error::DiscoveryUnavailable);
        }
        index += 1;
    }

    Ok(discovered)
}

/// Silently SELECTs a discovered file to learn whether to descend into it.
/// On an EF (or anything unprobeable) the parent DF context is restored.
fn probe_is_df<C: CardChannel, W: Write>(
    session: &mut Session<C, W>,
    path: &FilePath,
    parent: &FilePath,
) -> Result<bool> {
    let sel = session.select_2g(path, Trace::Silent)?;
    let file_type = sel
        .data
        .get(TYPE_BYTE)
        .and_then(|b| FileType::try_from(*b).ok());

    match file_type {
        Some(FileType::Df) | Some(FileType::Mf) => Ok(true),
        Some(FileType::Ef) => {
            session.select_2g(parent, Trace::Silent)?;
            Ok(false)
        }
        None => {
            warn!(path = %path, "couldn't probe file type; treating as EF");
            session.select_2g(parent, Trace::Silent)?;
            Ok(false)
        }
    }
}
