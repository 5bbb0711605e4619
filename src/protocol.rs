//! Wire protocol between clients and the daemon
//!
//! One message per `\n`-terminated line:
//! - `REG:<menu>\t<lang>\t<6 XDG values>[\t<fingerprint>]` client registers a menu
//! - `UNR:<fingerprint>` client releases a registration
//! - `REL:<fingerprint>` daemon tells the client to reload from disk
//!
//! The fingerprint is derived from the first eight register fields, so the
//! daemon never trusts the optional trailing copy sent by clients.

use std::fmt;
use std::path::PathBuf;

use crate::core::env::XdgEnv;
use crate::core::error::ProtocolError;
use crate::core::paths::{cache_base, cache_file_path};
use crate::core::util::hash_hex128;

/// Content hash naming one (menu, language, environment) cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Number of hex digits
    pub const LEN: usize = 32;

    /// Parse a hex fingerprint, normalizing to lowercase
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        if s.len() == Self::LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(ProtocolError::BadFingerprint(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Register payload: what identifies a cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegisterRequest {
    pub menu: String,
    pub lang: String,
    pub env: XdgEnv,
}

impl RegisterRequest {
    pub fn new(menu: impl Into<String>, lang: impl Into<String>, env: XdgEnv) -> Self {
        Self {
            menu: menu.into(),
            lang: lang.into(),
            env,
        }
    }

    /// Tab-joined menu, language and XDG values
    pub fn payload(&self) -> String {
        let mut fields = vec![self.menu.as_str(), self.lang.as_str()];
        fields.extend(self.env.values());
        fields.join("\t")
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(hash_hex128(self.payload().as_bytes()))
    }

    /// Cache file the daemon keeps for this request
    pub fn cache_file(&self) -> PathBuf {
        cache_file_path(&cache_base(&self.env), self.fingerprint().as_str())
    }
}

/// A protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Register(RegisterRequest),
    Unregister(Fingerprint),
    Reload(Fingerprint),
}

impl Message {
    /// Parse one line, with or without its trailing newline
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(rest) = line.strip_prefix("REG:") {
            let fields: Vec<&str> = rest.split('\t').collect();
            if fields.len() != 8 && fields.len() != 9 {
                return Err(ProtocolError::MalformedRegister(fields.len()));
            }
            let env = XdgEnv::from_values([
                fields[2].to_string(),
                fields[3].to_string(),
                fields[4].to_string(),
                fields[5].to_string(),
                fields[6].to_string(),
                fields[7].to_string(),
            ]);
            return Ok(Message::Register(RegisterRequest::new(
                fields[0], fields[1], env,
            )));
        }
        if let Some(rest) = line.strip_prefix("UNR:") {
            return Ok(Message::Unregister(Fingerprint::parse(rest)?));
        }
        if let Some(rest) = line.strip_prefix("REL:") {
            return Ok(Message::Reload(Fingerprint::parse(rest)?));
        }
        Err(ProtocolError::UnknownCommand(line.to_string()))
    }

    /// Encode as a line including the trailing newline
    pub fn to_line(&self) -> String {
        match self {
            Message::Register(req) => {
                format!("REG:{}\t{}\n", req.payload(), req.fingerprint())
            }
            Message::Unregister(fp) => format!("UNR:{}\n", fp),
            Message::Reload(fp) => format!("REL:{}\n", fp),
        }
    }
}
