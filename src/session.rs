//! Card session: the transceiver every higher layer talks through.
//!
//! A [`Session`] owns the channel and the replay-script sink, and keeps the
//! two consistent: every exchange sent with [`Trace::Script`] lands in the
//! script in transmission order, while [`Trace::Silent`] exchanges (the
//! walker's probes) never appear there.
//!
//! VERIFY commands are additionally teed into a one-slot log buffer so the
//! verification sequencer can report each attempt with its exact APDU and
//! status word.

use apdu::{Request, Response};
use std::io::Write;
use tracing::{error, info};

use crate::commands::{self, ins, Generation, SW_OK};
use crate::file::FilePath;
use crate::script::ScriptWriter;
use crate::transport::CardChannel;
use crate::{util, Result};

/// Whether an exchange is mirrored to the replay script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trace {
    Script,
    Silent,
}

/// Record of the last VERIFY sent, for the sequencer's log line.
#[derive(Debug, Clone)]
pub struct VerifyAttempt {
    pub label: String,
    pub apdu_string: String,
    pub status_word: String,
    pub success: bool,
}

impl VerifyAttempt {
    fn new(label: &str) -> Self {
        Self {
            label: label.into(),
            apdu_string: String::new(),
            status_word: String::new(),
            success: true,
        }
    }

    fn log(&self) {
        if self.success {
            info!("{} {} <- {}", self.label, self.apdu_string, self.status_word);
        } else {
            error!("{} {} <- {}", self.label, self.apdu_string, self.status_word);
        }
    }
}

pub struct Session<C: CardChannel, W: Write> {
    pub(crate) channel: C,
    script: ScriptWriter<W>,
    verify_log: Option<VerifyAttempt>,
}

impl<C: CardChannel, W: Write> Session<C, W> {
    pub fn new(channel: C, script: ScriptWriter<W>) -> Self {
        Self {
            channel,
            script,
            verify_log: None,
        }
    }

    pub fn header(&mut self, tool: &str) -> Result<()> {
        self.script.header(tool)
    }

    pub fn power_on_marker(&mut self) -> Result<()> {
        self.script.power_on()
    }

    pub fn section(&mut self, path: &FilePath) -> Result<()> {
        self.script.section(path)
    }

    pub fn comment(&mut self, text: &str) -> Result<()> {
        self.script.comment(text)
    }

    /// Cold-resets the card and marks the power-up in the script.
    pub fn power_cycle(&mut self) -> Result<()> {
        self.channel.power_cycle()?;
        self.script.power_on()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.script.flush()
    }

    pub fn transmit(&mut self, req: &Request, trace: Trace) -> Result<Response> {
        if req.ins == ins::VERIFY {
            if let Some(attempt) = &mut self.verify_log {
                let wire = commands::serialize(req);
                attempt.apdu_string = format!(
                    "{} {}",
                    util::encode_spaced(&wire[..5]),
                    util::encode(&wire[5..])
                );
            }
        }

        let resp = self.channel.transmit(req)?;

        if req.ins == ins::VERIFY {
            if let Some(attempt) = &mut self.verify_log {
                attempt.status_word = format!("{:02X} {:02X}", resp.status.0, resp.status.1);
                // Success is exactly `90 00`; one matching byte is failure.
                if resp.status != SW_OK {
                    attempt.success = false;
                }
            }
        }

        if trace == Trace::Script {
            self.script.exchange(req, &resp)?;
        }
        Ok(resp)
    }

    /// Composite SELECT: walks the path one FID at a time, then fetches the
    /// terminal response with GET RESPONSE when the card announces one
    /// (`9F xx` legacy, `61 xx` 3G). A terminal SELECT that answers
    /// anything else is returned as-is - including the `62 83` invalidation
    /// warning the 3G pass looks for.
    fn select(&mut self, gen: Generation, path: &FilePath, trace: Trace) -> Result<Response> {
        for n in 0..path.depth() - 1 {
            self.transmit(&commands::select(gen, path.fid(n)), trace)?;
        }
        let sel = self.transmit(&commands::select(gen, path.last_fid()), trace)?;
        if sel.status.0 != gen.response_pending_sw1() {
            return Ok(sel);
        }
        self.transmit(&commands::get_response(gen, sel.status.1), trace)
    }

    pub fn select_2g(&mut self, path: &FilePath, trace: Trace) -> Result<Response> {
        self.select(Generation::G2, path, trace)
    }

    pub fn select_3g(&mut self, path: &FilePath) -> Result<Response> {
        self.select(Generation::G3, path, Trace::Script)
    }

    /// Bare legacy SELECT of every FID in `path`, no GET RESPONSE. Restores
    /// directory context after the walker pops out of a subtree; never
    /// scripted. Selection failures are the caller's concern.
    pub fn reselect_2g(&mut self, path: &FilePath) -> Result<()> {
        for n in 0..path.depth() {
            self.transmit(&commands::select(Generation::G2, path.fid(n)), Trace::Silent)?;
        }
        Ok(())
    }

    /// Probes directory slot `index` with the proprietary READ HEADER.
    /// Always silent: replay tools don't know the command.
    pub fn read_header(&mut self, index: u8) -> Result<Response> {
        self.transmit(
            &commands::read_header(index, commands::READ_HEADER_ABSOLUTE),
            Trace::Silent,
        )
    }

    pub fn read_record(&mut self, gen: Generation, number: u16, len: u16) -> Result<Response> {
        self.transmit(
            &commands::read_record(gen, number, commands::READ_RECORD_ABSOLUTE, len),
            Trace::Script,
        )
    }

    pub fn read_binary(&mut self, gen: Generation, offset: u32, len: u32) -> Result<Response> {
        self.transmit(&commands::read_binary(gen, offset, len), Trace::Script)
    }

    /// Sends one VERIFY, logs the attempt at info/error severity, and
    /// reports whether the card accepted the code. Rejections are not
    /// errors; the scan carries on either way.
    pub fn verify_attempt(&mut self, label: &str, req: &Request) -> Result<bool> {
        self.verify_log = Some(VerifyAttempt::new(label));
        self.transmit(req, Trace::Script)?;
        Ok(match self.verify_log.take() {
            Some(attempt) => {
                attempt.log();
                attempt.success
            }
            None => false,
        })
    }
}
