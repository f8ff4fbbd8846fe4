//! DID parsing and `did:web` resolution to the DID document URL.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{IssuerError, Result};

const PCT_ENCODED: &str = "(?:%[0-9a-fA-F]{2})";
const PARAM_CHAR: &str = "[a-zA-Z0-9_.:%-]";

fn did_pattern() -> String {
    let id_char = format!("(?:[a-zA-Z0-9._-]|{PCT_ENCODED})");
    let method = "([a-z0-9]+)";
    let method_id = format!("((?:{id_char}*:)*(?:{id_char}+))");
    let param = format!(";{PARAM_CHAR}+={PARAM_CHAR}*");
    let params = format!("((?:{param})*)");
    let path = "(/[^#?]*)?";
    let query = "([?][^#]*)?";
    let fragment = "(#.*)?";
    format!("^did:{method}:{method_id}{params}{path}{query}{fragment}$")
}

fn did_matcher() -> Result<&'static Regex> {
    static MATCHER: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    MATCHER
        .get_or_init(|| Regex::new(&did_pattern()))
        .as_ref()
        .map_err(|e| IssuerError::Configuration(format!("invalid DID pattern: {e}")))
}

/// Components of a DID URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDid {
    /// `did:<method>:<id>` without params, path, query or fragment
    pub did: String,
    pub method: String,
    pub id: String,
    pub did_url: String,
}

impl ParsedDid {
    pub fn parse(did_url: &str) -> Result<Self> {
        let captures = did_matcher()?
            .captures(did_url)
            .ok_or_else(|| IssuerError::InvalidArgument(format!("{did_url} is not a valid DID")))?;

        let method = captures.get(1).map_or("", |m| m.as_str()).to_string();
        let id = captures.get(2).map_or("", |m| m.as_str()).to_string();
        Ok(Self {
            did: format!("did:{method}:{id}"),
            method,
            id,
            did_url: did_url.to_string(),
        })
    }

    /// URL of the DID document for `did:web` identifiers
    pub fn document_url(&self) -> Result<String> {
        if self.method != "web" {
            return Err(IssuerError::InvalidArgument(format!(
                "DID method {} is not supported, expected web",
                self.method
            )));
        }

        let mut segments = self.id.split(':');
        let host = segments
            .next()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| IssuerError::InvalidArgument(format!("{} has no host", self.did)))?
            .replace("%3A", ":")
            .replace("%3a", ":");
        let path: Vec<&str> = segments.collect();

        Ok(if path.is_empty() {
            format!("https://{host}/.well-known/did.json")
        } else {
            format!("https://{host}/{}/did.json", path.join("/"))
        })
    }
}

/// Resolve a `did:web` DID to the URL of its DID document
pub fn did_to_document_url(did: &str) -> Result<String> {
    ParsedDid::parse(did)?.document_url()
}
