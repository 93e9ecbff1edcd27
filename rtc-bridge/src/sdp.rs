//! SDP (Session Description Protocol) parsing and generation
//!
//! Implements the subset of RFC 4566 needed to build and validate offers
//! and answers: origin, session name, connection, timing, attributes and
//! media sections.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::engine::{EngineError, EngineResult};
use std::fmt;
use std::str::FromStr;

const CRLF: &str = "\r\n";

/// Parsed session description body (RFC 4566)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpSession {
    /// Protocol version (v=)
    pub version: u32,
    /// Origin (o=)
    pub origin: Origin,
    /// Session name (s=)
    pub session_name: String,
    /// Connection data (c=)
    pub connection: Option<Connection>,
    /// Timing (t=)
    pub timing: Vec<Timing>,
    /// Session-level attributes (a=)
    pub attributes: Vec<Attribute>,
    /// Media sections (m=)
    pub media_descriptions: Vec<MediaDescription>,
}

/// SDP origin (RFC 4566 Section 5.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub session_id: u64,
    pub session_version: u64,
    pub network_type: String,
    pub address_type: String,
    pub unicast_address: String,
}

/// SDP connection data (RFC 4566 Section 5.7)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub network_type: String,
    pub address_type: String,
    pub address: String,
}

/// SDP timing (RFC 4566 Section 5.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub start: u64,
    pub stop: u64,
}

/// SDP attribute (RFC 4566 Section 5.13)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

impl Attribute {
    pub fn flag(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
        }
    }

    pub fn value(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: Some(value.into()),
        }
    }
}

/// SDP media description (RFC 4566 Section 5.14)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// Media type (audio, video, application)
    pub media_type: String,
    pub port: u16,
    /// Transport protocol (UDP/TLS/RTP/SAVPF, UDP/DTLS/SCTP, ...)
    pub protocol: String,
    /// Payload types or, for application sections, format names
    pub formats: Vec<String>,
    pub connection: Option<Connection>,
    pub attributes: Vec<Attribute>,
}

impl MediaDescription {
    pub fn new(media_type: &str, port: u16, protocol: &str, formats: &[&str]) -> Self {
        Self {
            media_type: media_type.to_string(),
            port,
            protocol: protocol.to_string(),
            formats: formats.iter().map(|f| f.to_string()).collect(),
            connection: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        find_attribute(&self.attributes, name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|attr| attr.name == name)
    }

    /// Media identification tag (RFC 5888)
    pub fn mid(&self) -> Option<&str> {
        self.attribute("mid")
    }
}

fn find_attribute<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|attr| attr.name == name)
        .map(|attr| attr.value.as_deref().unwrap_or(""))
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidDescription(message.into())
}

/// Whitespace-separated fields of a line value, at least `min` of them
fn fields<'a>(value: &'a str, min: usize, line: &str) -> EngineResult<Vec<&'a str>> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < min {
        return Err(invalid(format!("{} line needs {} fields: {}", line, min, value)));
    }
    Ok(parts)
}

fn number<T: FromStr>(field: &str, what: &str) -> EngineResult<T> {
    field
        .parse()
        .map_err(|_| invalid(format!("{} is not a number: {}", what, field)))
}

impl FromStr for Origin {
    type Err = EngineError;

    fn from_str(value: &str) -> EngineResult<Self> {
        let parts = fields(value, 6, "o=")?;
        Ok(Origin {
            username: parts[0].to_string(),
            session_id: number(parts[1], "session id")?,
            session_version: number(parts[2], "session version")?,
            network_type: parts[3].to_string(),
            address_type: parts[4].to_string(),
            unicast_address: parts[5].to_string(),
        })
    }
}

impl FromStr for Connection {
    type Err = EngineError;

    fn from_str(value: &str) -> EngineResult<Self> {
        let parts = fields(value, 3, "c=")?;
        Ok(Connection {
            network_type: parts[0].to_string(),
            address_type: parts[1].to_string(),
            address: parts[2].to_string(),
        })
    }
}

impl FromStr for Timing {
    type Err = EngineError;

    fn from_str(value: &str) -> EngineResult<Self> {
        let parts = fields(value, 2, "t=")?;
        Ok(Timing {
            start: number(parts[0], "start time")?,
            stop: number(parts[1], "stop time")?,
        })
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        match value.split_once(':') {
            Some((name, value)) => Attribute::value(name, value),
            None => Attribute::flag(value),
        }
    }
}

impl FromStr for MediaDescription {
    type Err = EngineError;

    fn from_str(value: &str) -> EngineResult<Self> {
        let parts = fields(value, 3, "m=")?;

        // `port/count` is accepted, the count ignored
        let port = parts[1].split('/').next().unwrap_or_default();
        Ok(MediaDescription {
            media_type: parts[0].to_string(),
            port: number(port, "media port")?,
            protocol: parts[2].to_string(),
            formats: parts[3..].iter().map(|s| s.to_string()).collect(),
            connection: None,
            attributes: Vec::new(),
        })
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "o={} {} {} {} {} {}",
            self.username,
            self.session_id,
            self.session_version,
            self.network_type,
            self.address_type,
            self.unicast_address
        )
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c={} {} {}", self.network_type, self.address_type, self.address)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "a={}:{}", self.name, value),
            None => write!(f, "a={}", self.name),
        }
    }
}

/// Every line, media sections included, ends in CRLF
impl fmt::Display for MediaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m={} {} {}", self.media_type, self.port, self.protocol)?;
        for format in &self.formats {
            write!(f, " {}", format)?;
        }
        f.write_str(CRLF)?;

        if let Some(connection) = &self.connection {
            write!(f, "{}{}", connection, CRLF)?;
        }
        for attribute in &self.attributes {
            write!(f, "{}{}", attribute, CRLF)?;
        }
        Ok(())
    }
}

impl fmt::Display for SdpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v={}{}", self.version, CRLF)?;
        write!(f, "{}{}", self.origin, CRLF)?;
        write!(f, "s={}{}", self.session_name, CRLF)?;
        if let Some(connection) = &self.connection {
            write!(f, "{}{}", connection, CRLF)?;
        }
        for timing in &self.timing {
            write!(f, "t={} {}{}", timing.start, timing.stop, CRLF)?;
        }
        for attribute in &self.attributes {
            write!(f, "{}{}", attribute, CRLF)?;
        }
        for media in &self.media_descriptions {
            write!(f, "{}", media)?;
        }
        Ok(())
    }
}

impl SdpSession {
    /// Empty session with a fresh origin
    pub fn new(session_id: u64, session_version: u64) -> Self {
        Self {
            version: 0,
            origin: Origin {
                username: "-".to_string(),
                session_id,
                session_version,
                network_type: "IN".to_string(),
                address_type: "IP4".to_string(),
                unicast_address: "127.0.0.1".to_string(),
            },
            session_name: "-".to_string(),
            connection: None,
            timing: vec![Timing { start: 0, stop: 0 }],
            attributes: Vec::new(),
            media_descriptions: Vec::new(),
        }
    }

    /// Parse a description body.
    ///
    /// The body must open with a `v=` line followed by an `o=` line. Line
    /// types this module does not model are skipped.
    pub fn parse(sdp: &str) -> EngineResult<Self> {
        let mut lines = sdp.lines().map(str::trim_end).filter(|line| !line.is_empty());

        let version = match lines.next().and_then(|line| line.strip_prefix("v=")) {
            Some(value) => number(value, "protocol version")?,
            None => return Err(invalid("description must start with v=")),
        };
        let origin = match lines.next().and_then(|line| line.strip_prefix("o=")) {
            Some(value) => value.parse()?,
            None => return Err(invalid("v= must be followed by o=")),
        };

        let mut session = Self {
            version,
            origin,
            session_name: "-".to_string(),
            connection: None,
            timing: Vec::new(),
            attributes: Vec::new(),
            media_descriptions: Vec::new(),
        };

        for line in lines {
            let (key, value) = match line.split_once('=') {
                Some((key, value)) if key.len() == 1 => (key, value),
                _ => return Err(invalid(format!("malformed line: {}", line))),
            };
            match key {
                "m" => session.media_descriptions.push(value.parse()?),
                "s" => session.session_name = value.to_string(),
                "t" => session.timing.push(value.parse()?),
                "c" => {
                    let connection = Some(value.parse()?);
                    match session.media_descriptions.last_mut() {
                        Some(media) => media.connection = connection,
                        None => session.connection = connection,
                    }
                }
                "a" => {
                    let attribute = Attribute::from(value);
                    match session.media_descriptions.last_mut() {
                        Some(media) => media.attributes.push(attribute),
                        None => session.attributes.push(attribute),
                    }
                }
                _ => {}
            }
        }

        Ok(session)
    }

    pub fn serialize(&self) -> String {
        self.to_string()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        find_attribute(&self.attributes, name)
    }

    /// Media section carrying `mid`
    pub fn media_by_mid(&self, mid: &str) -> Option<(usize, &MediaDescription)> {
        self.media_descriptions
            .iter()
            .enumerate()
            .find(|(_, media)| media.mid() == Some(mid))
    }

    /// ICE credentials (RFC 8839)
    pub fn ice_credentials(&self) -> (Option<&str>, Option<&str>) {
        (self.attribute("ice-ufrag"), self.attribute("ice-pwd"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdp_parse_minimal() {
        let sdp_str = "v=0\r\n\
o=- 1234567890 1234567890 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=mid:0\r\n\
m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
a=mid:1\r\n";

        let sdp = SdpSession::parse(sdp_str).unwrap();
        assert_eq!(sdp.version, 0);
        assert_eq!(sdp.origin.session_id, 1234567890);
        assert_eq!(sdp.media_descriptions.len(), 2);
        assert_eq!(sdp.media_descriptions[0].media_type, "audio");
        assert_eq!(sdp.media_descriptions[1].formats, vec!["webrtc-datachannel".to_string()]);
        assert_eq!(sdp.media_by_mid("1").map(|(index, _)| index), Some(1));
    }

    #[test]
    fn test_sdp_serialize() {
        let mut sdp = SdpSession::new(42, 1);
        sdp.attributes.push(Attribute::value("ice-ufrag", "abcd"));
        sdp.media_descriptions.push(
            MediaDescription::new("video", 9, "UDP/TLS/RTP/SAVPF", &["96"])
                .with_attribute(Attribute::value("mid", "0"))
                .with_attribute(Attribute::flag("sendrecv")),
        );

        let serialized = sdp.serialize();
        assert!(serialized.starts_with("v=0\r\no=- 42 1 IN IP4 127.0.0.1\r\n"));
        assert!(serialized.contains("m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:0\r\na=sendrecv\r\n"));

        let parsed = SdpSession::parse(&serialized).unwrap();
        assert_eq!(parsed.ice_credentials().0, Some("abcd"));
        assert!(parsed.media_descriptions[0].has_attribute("sendrecv"));
    }

    #[test]
    fn test_sdp_rejects_garbage() {
        assert!(SdpSession::parse("").is_err());
        assert!(SdpSession::parse("hello world").is_err());
        assert!(SdpSession::parse("v=0\r\ns=-\r\n").is_err());
        assert!(SdpSession::parse("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\nbogus\r\n").is_err());
    }
}
