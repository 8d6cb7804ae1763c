//! Card transport.
//!
//! [`CardChannel`] is the single I/O boundary of the crate: transmit one
//! [`apdu::Request`], get back an [`apdu::Response`], plus the power-cycle
//! used between the 2G and 3G scan phases. The production implementation
//! is PC/SC; tests use the scripted card in [`testing`].
//!
//! No retries happen at this layer, and there is no timeout of our own -
//! the reader driver provides one implicitly.

use apdu::{Request, Response, Status};
use std::ffi::CString;
use tap::TapFallible;
use tracing::{debug, trace, warn};

use crate::{commands, util, Error, Result};

pub trait CardChannel {
    /// Transmits a request and returns the card's answer. Blocks until the
    /// card responds; the status word is always delivered.
    fn transmit(&mut self, req: &Request) -> Result<Response>;

    /// Cold-resets the card, losing all selection and PIN state.
    fn power_cycle(&mut self) -> Result<()>;
}

/// PC/SC-backed channel. The underlying connection is released when this
/// is dropped, whichever way the scan exits.
pub struct PcscChannel {
    name: String,
    card: pcsc::Card,
}

fn list_reader_names(ctx: &pcsc::Context) -> Result<Vec<CString>> {
    let mut buf = Vec::with_capacity(ctx.list_readers_len()?);
    buf.resize(buf.capacity(), 0);
    Ok(ctx.list_readers(&mut buf)?.map(|s| s.into()).collect())
}

impl PcscChannel {
    /// Names of all detected readers, in system order.
    pub fn list_readers() -> Result<Vec<String>> {
        let ctx = pcsc::Context::establish(pcsc::Scope::User)?;
        Ok(list_reader_names(&ctx)?
            .iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect())
    }

    /// Connects to the reader at `index`.
    pub fn open(index: usize) -> Result<Self> {
        debug!("Connecting to PCSC...");
        let ctx = pcsc::Context::establish(pcsc::Scope::User)?;
        let readers = list_reader_names(&ctx)?;
        if readers.is_empty() {
            return Err(Error::NoReader);
        }
        let cname = readers.get(index).ok_or(Error::NoReader)?;
        let name = cname.to_string_lossy().into_owned();

        debug!(%name, "Connecting to reader...");
        let card = ctx
            .connect(cname, pcsc::ShareMode::Shared, pcsc::Protocols::ANY)
            .map_err(|err| match err {
                pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => Error::NoCard(name.clone()),
                err => err.into(),
            })?;

        let channel = Self { name, card };
        channel.log_atr();
        Ok(channel)
    }

    fn log_atr(&self) {
        let atr = self
            .card
            .get_attribute_owned(pcsc::Attribute::AtrString)
            .tap_err(|err| warn!("couldn't query ATR: {}", err))
            .unwrap_or_default();
        tracing::info!("{}; ATR: {}", self.name, util::encode_spaced(&atr));
    }
}

impl CardChannel for PcscChannel {
    fn transmit(&mut self, req: &Request) -> Result<Response> {
        let wire = commands::serialize(req);
        trace!(req = ?wire, ">> TX");
        let mut rbuf = [0; pcsc::MAX_BUFFER_SIZE];
        let rsp = self.card.transmit(&wire, &mut rbuf)?;
        trace!(rsp = ?rsp, "<< RX");

        if rsp.len() < 2 {
            return Err(Error::NoStatusWord);
        }
        Ok(Response::new(
            Status(rsp[rsp.len() - 2], rsp[rsp.len() - 1]),
            &rsp[..rsp.len() - 2],
        ))
    }

    fn power_cycle(&mut self) -> Result<()> {
        self.card.reconnect(
            pcsc::ShareMode::Shared,
            pcsc::Protocols::ANY,
            pcsc::Disposition::UnpowerCard,
        )?;
        self.log_atr();
        Ok(())
    }
}
