use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no smartcard readers detected")]
    NoReader,

    #[error("no card inserted in reader {0}")]
    NoCard(String),

    #[error(transparent)]
    Pcsc(#[from] pcsc::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The card returned fewer than the two mandatory status bytes.
    #[error("card response truncated: no status word")]
    NoStatusWord,

    #[error("malformed TLV at offset {0}")]
    MalformedTlv(usize),

    #[error("tag {0:02X} not present")]
    TagMissing(u8),

    /// Fixed-position layout read out of bounds (legacy SELECT responses).
    #[error("malformed select response: {0}")]
    Layout(#[from] scroll::Error),

    /// READ HEADER returned something other than an entry or "no more
    /// entries"; the card does not implement the discovery command.
    #[error("card does not support READ HEADER discovery")]
    DiscoveryUnavailable,

    #[error("invalid file path {0:?}")]
    InvalidPath(String),

    #[error(transparent)]
    Xml(#[from] quick_xml::de::DeError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
