//! Settings document for module mode.
//!
//! When the scanner runs as a component of a larger verification host, the
//! host drops a `config.xml` next to it instead of passing flags:
//!
//! ```xml
//! <verifConfig chv1Disabled="true" useAdm2="false" useAdm3="false"
//!              useAdm4="false" usimIn3GMode="false">
//!   <readerNumber>0</readerNumber>
//!   <codeAdm1>4331324131364442</codeAdm1>
//!   <codeChv1>31323334FFFFFFFF</codeChv1>
//!   <codeChv2>39343438FFFFFFFF</codeChv2>
//!   <customApdu>
//!     <verify2g>
//!       <verify2gAdm1 p1="00" p2="00" p3="08"/>
//!       ...
//!     </verify2g>
//!     <verify3g>...</verify3g>
//!   </customApdu>
//! </verifConfig>
//! ```
//!
//! The `customApdu` triples exist so that profiles with non-standard key
//! references (SIMBIOS) work without code changes. Booleans are the literal
//! string `"true"`; anything else means false.

use serde::Deserialize;
use std::path::Path;

use crate::verify::{VerifyConfig, VerifyParams, VerifyTable};
use crate::{Error, Result};

/// Scanner settings produced from `config.xml`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub reader: usize,
    pub read_content_3g: bool,
    pub verify: VerifyConfig,
}

#[derive(Debug, Deserialize)]
struct ConfigXml {
    #[serde(rename = "@chv1Disabled", default)]
    chv1_disabled: Option<String>,
    #[serde(rename = "@useAdm2", default)]
    use_adm2: Option<String>,
    #[serde(rename = "@useAdm3", default)]
    use_adm3: Option<String>,
    #[serde(rename = "@useAdm4", default)]
    use_adm4: Option<String>,
    #[serde(rename = "@usimIn3GMode", default)]
    usim_in_3g_mode: Option<String>,

    #[serde(rename = "readerNumber")]
    reader_number: i32,

    #[serde(rename = "codeAdm1")]
    code_adm1: String,
    #[serde(rename = "codeAdm2", default)]
    code_adm2: Option<String>,
    #[serde(rename = "codeAdm3", default)]
    code_adm3: Option<String>,
    #[serde(rename = "codeAdm4", default)]
    code_adm4: Option<String>,
    #[serde(rename = "codeChv1")]
    code_chv1: String,
    #[serde(rename = "codeChv2")]
    code_chv2: String,

    #[serde(rename = "customApdu")]
    custom_apdu: CustomApduXml,
}

#[derive(Debug, Deserialize)]
struct CustomApduXml {
    #[serde(rename = "verify2g")]
    verify_2g: VerifyTableXml,
    #[serde(rename = "verify3g")]
    verify_3g: VerifyTableXml,
}

#[derive(Debug, Deserialize)]
struct VerifyTableXml {
    #[serde(alias = "verify2gAdm1", alias = "verify3gAdm1")]
    adm1: TripleXml,
    #[serde(alias = "verify2gAdm2", alias = "verify3gAdm2")]
    adm2: TripleXml,
    #[serde(alias = "verify2gAdm3", alias = "verify3gAdm3")]
    adm3: TripleXml,
    #[serde(alias = "verify2gAdm4", alias = "verify3gAdm4")]
    adm4: TripleXml,
    #[serde(alias = "verify2gChv1", alias = "verify3gGlobalPin1")]
    pin1: TripleXml,
    #[serde(alias = "verify2gChv2", alias = "verify3gLocalPin1")]
    pin2: TripleXml,
}

#[derive(Debug, Deserialize)]
struct TripleXml {
    #[serde(rename = "@p1")]
    p1: String,
    #[serde(rename = "@p2")]
    p2: String,
    #[serde(rename = "@p3")]
    p3: String,
}

fn bool_str(v: &Option<String>) -> bool {
    v.as_deref() == Some("true")
}

fn hex_byte(field: &str, v: &str) -> Result<u8> {
    u8::from_str_radix(v.trim(), 16)
        .map_err(|_| Error::Config(format!("{} is not a hex byte: {:?}", field, v)))
}

impl TripleXml {
    fn params(&self, field: &str) -> Result<VerifyParams> {
        Ok(VerifyParams::new(
            hex_byte(field, &self.p1)?,
            hex_byte(field, &self.p2)?,
            hex_byte(field, &self.p3)?,
        ))
    }
}

impl VerifyTableXml {
    fn table(&self, gen: &str) -> Result<VerifyTable> {
        Ok(VerifyTable {
            adm1: self.adm1.params(&format!("{}Adm1", gen))?,
            adm2: self.adm2.params(&format!("{}Adm2", gen))?,
            adm3: self.adm3.params(&format!("{}Adm3", gen))?,
            adm4: self.adm4.params(&format!("{}Adm4", gen))?,
            pin1: self.pin1.params(&format!("{}Pin1", gen))?,
            pin2: self.pin2.params(&format!("{}Pin2", gen))?,
        })
    }
}

fn required(flag: &str, code: Option<String>) -> Result<String> {
    code.ok_or_else(|| Error::Config(format!("{} is enabled but its code is missing", flag)))
}

/// Parses a settings document.
pub fn parse(xml: &str) -> Result<Settings> {
    let doc: ConfigXml = quick_xml::de::from_str(xml)?;

    if doc.reader_number == -1 {
        return Err(Error::Config("no terminal/reader detected".into()));
    }

    let use_adm2 = bool_str(&doc.use_adm2);
    let use_adm3 = bool_str(&doc.use_adm3);
    let use_adm4 = bool_str(&doc.use_adm4);

    let verify = VerifyConfig {
        chv1_disabled: bool_str(&doc.chv1_disabled),
        use_adm2,
        use_adm3,
        use_adm4,
        adm1: doc.code_adm1,
        adm2: if use_adm2 {
            required("useAdm2", doc.code_adm2)?
        } else {
            String::new()
        },
        adm3: if use_adm3 {
            required("useAdm3", doc.code_adm3)?
        } else {
            String::new()
        },
        adm4: if use_adm4 {
            required("useAdm4", doc.code_adm4)?
        } else {
            String::new()
        },
        chv1: doc.code_chv1,
        chv2: doc.code_chv2,
        table_2g: doc.custom_apdu.verify_2g.table("verify2g")?,
        table_3g: doc.custom_apdu.verify_3g.table("verify3g")?,
    };

    Ok(Settings {
        reader: doc.reader_number as usize,
        read_content_3g: bool_str(&doc.usim_in_3g_mode),
        verify,
    })
}

/// Loads `config.xml` from disk.
pub fn load(path: &Path) -> Result<Settings> {
    parse(&std::fs::read_to_string(path)?)
}
