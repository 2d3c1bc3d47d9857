//! Proxy server profile and its `ssr://` URI form

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::document::{decode_base64, encode_base64, SSR_SCHEME};
use crate::{Error, Result};

/// Stored proxy server profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Store-assigned id (0 until created)
    pub id: i64,
    /// Display name
    pub name: String,
    /// Group label; empty for manually added profiles
    pub group: String,
    pub host: String,
    pub remote_port: u16,
    pub password: String,
    pub method: String,
    pub protocol: String,
    pub protocol_param: String,
    pub obfs: String,
    pub obfs_param: String,
    /// Profile used for UDP when this one cannot carry it
    pub udp_fallback: Option<i64>,
}

impl Profile {
    /// Parse an `ssr://` URI
    pub fn parse_uri(uri: &str) -> Result<Self> {
        let payload = uri
            .trim()
            .strip_prefix(SSR_SCHEME)
            .ok_or_else(|| Error::invalid_profile_uri("missing ssr:// scheme"))?;
        let decoded = decode_component("payload", payload)?;

        let (main, query) = match decoded.split_once("/?") {
            Some((main, query)) => (main, query),
            None => (decoded.trim_end_matches('/'), ""),
        };

        // host may itself contain ':' (IPv6), so split from the right
        let mut fields = main.rsplitn(6, ':');
        let mut next = |name: &str| {
            fields
                .next()
                .ok_or_else(|| Error::invalid_profile_uri(format!("missing {}", name)))
        };
        let password = next("password")?;
        let obfs = next("obfs")?;
        let method = next("method")?;
        let protocol = next("protocol")?;
        let port = next("port")?;
        let host = next("host")?.trim_start_matches('[').trim_end_matches(']');

        if host.is_empty() {
            return Err(Error::invalid_profile_uri("empty host"));
        }
        let remote_port: u16 = port
            .parse()
            .map_err(|_| Error::invalid_profile_uri(format!("invalid port: {}", port)))?;

        let mut profile = Profile {
            host: host.to_string(),
            remote_port,
            password: decode_component("password", password)?,
            method: method.to_string(),
            protocol: protocol.to_string(),
            obfs: obfs.to_string(),
            ..Default::default()
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let slot = match key {
                "obfsparam" => &mut profile.obfs_param,
                "protoparam" => &mut profile.protocol_param,
                "remarks" => &mut profile.name,
                "group" => &mut profile.group,
                _ => continue,
            };
            *slot = decode_component(key, value)?;
        }

        if profile.name.is_empty() {
            profile.name = profile.address();
        }
        Ok(profile)
    }

    /// Render as an `ssr://` URI
    pub fn to_uri(&self) -> String {
        let main = format!(
            "{}:{}:{}:{}:{}:{}",
            self.host,
            self.remote_port,
            self.protocol,
            self.method,
            self.obfs,
            encode_base64(self.password.as_bytes())
        );
        let query = [
            ("obfsparam", &self.obfs_param),
            ("protoparam", &self.protocol_param),
            ("remarks", &self.name),
            ("group", &self.group),
        ]
        .iter()
        .map(|(key, value)| format!("{}={}", key, encode_base64(value.as_bytes())))
        .collect::<Vec<_>>()
        .join("&");

        format!(
            "{}{}",
            SSR_SCHEME,
            encode_base64(format!("{}/?{}", main, query).as_bytes())
        )
    }

    /// `host:port` as shown when a profile has no remarks
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.remote_port)
        } else {
            format!("{}:{}", self.host, self.remote_port)
        }
    }

    /// Whether both profiles describe the same server, ignoring id, name
    /// and group
    pub fn same_server(&self, other: &Profile) -> bool {
        self.host == other.host
            && self.remote_port == other.remote_port
            && self.password == other.password
            && self.method == other.method
            && self.protocol == other.protocol
            && self.protocol_param == other.protocol_param
            && self.obfs == other.obfs
            && self.obfs_param == other.obfs_param
    }
}

impl FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Profile::parse_uri(s)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address())
    }
}

fn decode_component(field: &str, value: &str) -> Result<String> {
    let bytes = decode_base64(value)
        .map_err(|e| Error::invalid_profile_uri(format!("bad base64 in {}: {}", field, e)))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::invalid_profile_uri(format!("{} is not UTF-8: {}", field, e)))
}
