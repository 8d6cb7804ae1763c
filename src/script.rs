//! Replay script sink.
//!
//! Everything the scanner sends (except silent discovery probes) is
//! appended here in transmission order, in a plain-text format that card
//! personalisation tools replay line by line:
//!
//! ```text
//! ; Generated with simscan on 2024-03-01 14:52
//!
//! .POWER_ON
//!
//! ; 3F00/7F20/6F07
//! A0A4000002 3F00 [000083973F00...] (9000)
//! A0C000001A (6E00)
//! ```
//!
//! A leading `;` marks a comment. The response token and its brackets are
//! omitted when the card returned no data.

use apdu::{Request, Response};
use std::io::Write;

use crate::file::FilePath;
use crate::{commands, util, Result};

pub struct ScriptWriter<W: Write> {
    out: W,
}

impl<W: Write> ScriptWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// The generation header comment, stamped with the current local time.
    pub fn header(&mut self, tool: &str) -> Result<()> {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M");
        writeln!(self.out, "; Generated with {} on {}", tool, now)?;
        Ok(())
    }

    /// Marks a card power-up (initial connect and the mid-scan cycle).
    pub fn power_on(&mut self) -> Result<()> {
        writeln!(self.out, "\n.POWER_ON")?;
        Ok(())
    }

    /// Section header naming the file the next exchanges concern.
    pub fn section(&mut self, path: &FilePath) -> Result<()> {
        writeln!(self.out, "\n; {}", path)?;
        Ok(())
    }

    pub fn comment(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "; {}", text)?;
        Ok(())
    }

    /// One executed APDU with its outcome.
    pub fn exchange(&mut self, req: &Request, resp: &Response) -> Result<()> {
        let form = commands::script_form(req);
        if resp.data.is_empty() {
            writeln!(
                self.out,
                "{} ({:02X}{:02X})",
                form, resp.status.0, resp.status.1
            )?;
        } else {
            writeln!(
                self.out,
                "{} [{}] ({:02X}{:02X})",
                form,
                util::encode(&resp.data),
                resp.status.0,
                resp.status.1
            )?;
        }
        Ok(())
    }

    /// Flushes buffered lines to the underlying sink.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
