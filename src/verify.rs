//! ADM/CHV verification sequencing.
//!
//! Administrative and user codes are presented in a fixed order before each
//! scan phase: ADM1, then ADM2..ADM4 when enabled, then CHV1 (the 3G global
//! PIN) unless disabled, then CHV2 (the 3G local PIN). A rejected code is
//! logged and the sequence continues; the card will simply deny whatever
//! reads that code guarded.
//!
//! The (P1, P2, P3) triple of every VERIFY is configurable because some
//! legacy profiles (SIMBIOS among them) wire the key references to
//! non-standard values.

use std::io::Write;
use tracing::info;

use crate::commands::{self, Generation};
use crate::session::Session;
use crate::transport::CardChannel;
use crate::{util, Result};

/// Parameters of one VERIFY step. `p3` documents the expected code length
/// from the settings document; on the wire Lc is derived from the code
/// itself, which matches `p3` for every known profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyParams {
    pub p1: u8,
    pub p2: u8,
    pub p3: u8,
}

impl VerifyParams {
    pub const fn new(p1: u8, p2: u8, p3: u8) -> Self {
        Self { p1, p2, p3 }
    }
}

/// Per-generation VERIFY parameter table. `pin1` is CHV1 in 2G and the
/// global PIN in 3G; `pin2` is CHV2 / the local PIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyTable {
    pub adm1: VerifyParams,
    pub adm2: VerifyParams,
    pub adm3: VerifyParams,
    pub adm4: VerifyParams,
    pub pin1: VerifyParams,
    pub pin2: VerifyParams,
}

impl VerifyTable {
    pub const fn default_2g() -> Self {
        Self {
            adm1: VerifyParams::new(0x00, 0x00, 0x08),
            adm2: VerifyParams::new(0x00, 0x05, 0x08),
            adm3: VerifyParams::new(0x00, 0x06, 0x08),
            adm4: VerifyParams::new(0x00, 0x07, 0x08),
            pin1: VerifyParams::new(0x00, 0x01, 0x08),
            pin2: VerifyParams::new(0x00, 0x02, 0x08),
        }
    }

    pub const fn default_3g() -> Self {
        Self {
            adm1: VerifyParams::new(0x00, 0x0A, 0x08),
            adm2: VerifyParams::new(0x00, 0x0B, 0x08),
            adm3: VerifyParams::new(0x00, 0x0C, 0x08),
            adm4: VerifyParams::new(0x00, 0x0D, 0x08),
            pin1: VerifyParams::new(0x00, 0x01, 0x08),
            pin2: VerifyParams::new(0x00, 0x81, 0x08),
        }
    }
}

/// Codes, step toggles and parameter tables for both generations.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub chv1_disabled: bool,
    pub use_adm2: bool,
    pub use_adm3: bool,
    pub use_adm4: bool,
    pub adm1: String,
    pub adm2: String,
    pub adm3: String,
    pub adm4: String,
    pub chv1: String,
    pub chv2: String,
    pub table_2g: VerifyTable,
    pub table_3g: VerifyTable,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            chv1_disabled: true,
            use_adm2: false,
            use_adm3: false,
            use_adm4: false,
            adm1: String::new(),
            adm2: String::new(),
            adm3: String::new(),
            adm4: String::new(),
            chv1: String::new(),
            chv2: String::new(),
            table_2g: VerifyTable::default_2g(),
            table_3g: VerifyTable::default_3g(),
        }
    }
}

fn step<C: CardChannel, W: Write>(
    session: &mut Session<C, W>,
    gen: Generation,
    label: &str,
    params: VerifyParams,
    code: &str,
) -> Result<()> {
    let req = commands::verify(gen, params.p1, params.p2, &util::parse(code));
    session.verify_attempt(label, &req)?;
    Ok(())
}

/// Runs the legacy (2G) verification sequence.
pub fn run_2g<C: CardChannel, W: Write>(
    session: &mut Session<C, W>,
    cfg: &VerifyConfig,
) -> Result<()> {
    let t = &cfg.table_2g;
    step(session, Generation::G2, "Verify ADM1..", t.adm1, &cfg.adm1)?;
    if cfg.use_adm2 {
        step(session, Generation::G2, "Verify ADM2..", t.adm2, &cfg.adm2)?;
    }
    if cfg.use_adm3 {
        step(session, Generation::G2, "Verify ADM3..", t.adm3, &cfg.adm3)?;
    }
    if cfg.use_adm4 {
        step(session, Generation::G2, "Verify ADM4..", t.adm4, &cfg.adm4)?;
    }
    if !cfg.chv1_disabled {
        step(session, Generation::G2, "Verify CHV1..", t.pin1, &cfg.chv1)?;
    } else {
        info!("CHV1 is disabled; verification not required.");
        session.comment("CHV1 is disabled. No CHV1 verification required.")?;
    }
    step(session, Generation::G2, "Verify CHV2..", t.pin2, &cfg.chv2)
}

/// Runs the 3G verification sequence; issued after the power cycle.
pub fn run_3g<C: CardChannel, W: Write>(
    session: &mut Session<C, W>,
    cfg: &VerifyConfig,
) -> Result<()> {
    let t = &cfg.table_3g;
    step(session, Generation::G3, "Verify ADM1..", t.adm1, &cfg.adm1)?;
    if cfg.use_adm2 {
        step(session, Generation::G3, "Verify ADM2..", t.adm2, &cfg.adm2)?;
    }
    if cfg.use_adm3 {
        step(session, Generation::G3, "Verify ADM3..", t.adm3, &cfg.adm3)?;
    }
    if cfg.use_adm4 {
        step(session, Generation::G3, "Verify ADM4..", t.adm4, &cfg.adm4)?;
    }
    if !cfg.chv1_disabled {
        step(session, Generation::G3, "Verify Global PIN..", t.pin1, &cfg.chv1)?;
    } else {
        info!("GPIN is disabled. No GPIN verification required.");
        session.comment("GPIN is disabled. No GPIN verification required.")?;
    }
    step(session, Generation::G3, "Verify Local PIN..", t.pin2, &cfg.chv2)
}
