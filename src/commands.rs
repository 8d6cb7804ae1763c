//! APDU construction for the commands the scanner issues.
//!
//! Commands are built as [`apdu::Request`] values. Every command exists in
//! two flavours: the legacy 2G class (CLA 0xA0, TS 51.011) and the 3G
//! class (CLA 0x00, TS 102 221). The same card usually answers both, with
//! different response encodings, which is why the scanner runs one pass in
//! each generation.
//!
//! The wire form is plain T=0: header, then Lc and the body when one is
//! present, otherwise the expected length - so P3 is always the fifth
//! byte, exactly as the replay script wants it.

use apdu::{Request, Status};

use crate::util;

/// Instruction bytes.
pub mod ins {
    pub const VERIFY: u8 = 0x20;
    pub const SELECT: u8 = 0xA4;
    pub const READ_BINARY: u8 = 0xB0;
    pub const READ_RECORD: u8 = 0xB2;
    pub const GET_RESPONSE: u8 = 0xC0;
    /// Proprietary directory enumeration (legacy class only).
    pub const READ_HEADER: u8 = 0xE8;
}

/// Success status word; anything else is a failure, including words where
/// only one byte matches.
pub const SW_OK: Status = Status(0x90, 0x00);

/// READ RECORD P2: absolute record addressing.
pub const READ_RECORD_ABSOLUTE: u8 = 0x04;

/// READ HEADER P2: absolute mode.
pub const READ_HEADER_ABSOLUTE: u8 = 0x04;

/// Largest chunk requested per READ BINARY.
pub const MAX_RESPONSE_LEN: u32 = 250;

/// Command classing: legacy SIM vs. USIM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    G2,
    G3,
}

impl Generation {
    pub fn cla(self) -> u8 {
        match self {
            Self::G2 => 0xA0,
            Self::G3 => 0x00,
        }
    }

    /// SELECT P2: 3G requests the FCP template (0x04); 2G uses 0x00.
    fn select_p2(self) -> u8 {
        match self {
            Self::G2 => 0x00,
            Self::G3 => 0x04,
        }
    }

    /// SW1 announcing response data to be fetched with GET RESPONSE.
    pub fn response_pending_sw1(self) -> u8 {
        match self {
            Self::G2 => 0x9F,
            Self::G3 => 0x61,
        }
    }
}

/// SELECT of a single FID under the current directory.
pub fn select(gen: Generation, fid: [u8; 2]) -> Request {
    Request::new(gen.cla(), ins::SELECT, 0x00, gen.select_p2(), fid.to_vec())
}

/// GET RESPONSE for `le` pending bytes.
pub fn get_response(gen: Generation, le: u8) -> Request {
    Request::new(gen.cla(), ins::GET_RESPONSE, 0x00, 0x00, vec![]).expect(le as usize)
}

/// Proprietary READ HEADER: probes directory slot `index`.
pub fn read_header(index: u8, mode: u8) -> Request {
    Request::new(Generation::G2.cla(), ins::READ_HEADER, index, mode, vec![]).expect(0x17)
}

/// VERIFY with an explicit parameter pair and code body.
pub fn verify(gen: Generation, p1: u8, p2: u8, code: &[u8]) -> Request {
    Request::new(gen.cla(), ins::VERIFY, p1, p2, code.to_vec())
}

/// READ RECORD, truncating the record number and length to one byte each.
pub fn read_record(gen: Generation, number: u16, mode: u8, len: u16) -> Request {
    Request::new(gen.cla(), ins::READ_RECORD, (number % 0x100) as u8, mode, vec![])
        .expect((len % 0x100) as usize)
}

/// READ BINARY at a big-endian 16-bit offset.
pub fn read_binary(gen: Generation, offset: u32, len: u32) -> Request {
    let offset = offset % 0x1_0000;
    Request::new(
        gen.cla(),
        ins::READ_BINARY,
        (offset >> 8) as u8,
        (offset & 0xFF) as u8,
        vec![],
    )
    .expect((len % 0x100) as usize)
}

/// Serializes a request the T=0 way: header, then Lc and the body when one
/// is present, otherwise a single expected-length byte.
pub fn serialize(req: &Request) -> Vec<u8> {
    let mut wire = vec![req.cla, req.ins, req.p1, req.p2];
    if req.data.is_empty() {
        wire.push(req.le.unwrap_or(0) as u8);
    } else {
        wire.push(req.data.len() as u8);
        wire.extend_from_slice(&req.data);
    }
    wire
}

/// Replay-script form: continuous-hex header, then the body as a second
/// token when present.
pub fn script_form(req: &Request) -> String {
    let wire = serialize(req);
    if wire.len() == 5 {
        util::encode(&wire)
    } else {
        format!("{} {}", util::encode(&wire[..5]), util::encode(&wire[5..]))
    }
}
