// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gossip wire protocol.
//!
//! One ASCII datagram per message, tokens separated by single spaces:
//!
//! ```text
//! DISPATCH <sender-guid> A <name> <PATTERN> <address> <in-types> <out-types>
//! DISPATCH <sender-guid> S <name> [<name> ...]      ("*" = all of yours)
//! DISPATCH <sender-guid> X
//! DISPATCH <sender-guid> R <name>
//! ```
//!
//! Type lists are `|`-joined ids, `.` when empty. Datagrams are parsed once
//! into [`Message`]; anything else is a [`ProtocolError`] and is dropped.

use super::topic::{parse_types, Pattern};
use crate::config::PROTOCOL_PREFIX;
use std::collections::BTreeSet;
use std::fmt;

/// SEARCH argument asking for every local topic of the receiver.
pub const SEARCH_ALL: &str = "*";

/// Command byte of a gossip message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    Available,
    Search,
    Exit,
    Remove,
}

impl CommandCode {
    pub fn as_char(self) -> char {
        match self {
            CommandCode::Available => 'A',
            CommandCode::Search => 'S',
            CommandCode::Exit => 'X',
            CommandCode::Remove => 'R',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'A' => Some(CommandCode::Available),
            'S' => Some(CommandCode::Search),
            'X' => Some(CommandCode::Exit),
            'R' => Some(CommandCode::Remove),
            _ => None,
        }
    }
}

/// AVAILABLE arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement<'a> {
    pub name: &'a str,
    pub pattern: Pattern,
    pub address: &'a str,
    pub input_types: BTreeSet<String>,
    pub output_types: BTreeSet<String>,
}

/// Parsed gossip command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Available(Advertisement<'a>),
    Search(Vec<&'a str>),
    Exit,
    Remove(&'a str),
}

/// Parsed gossip datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<'a> {
    pub sender: &'a str,
    pub command: Command<'a>,
}

/// Reason a datagram was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Byte outside the printable ASCII range.
    NonPrintable { offset: usize, byte: u8 },
    /// Does not start with the protocol prefix.
    MissingPrefix,
    MissingSender,
    MissingCommand,
    UnknownCommand(char),
    /// AVAILABLE/REMOVE field absent or empty.
    MissingField(&'static str),
    UnknownPattern(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::NonPrintable { offset, byte } => {
                write!(f, "non-printable character {} at offset {}", byte, offset)
            }
            ProtocolError::MissingPrefix => write!(f, "missing {} tag", PROTOCOL_PREFIX),
            ProtocolError::MissingSender => write!(f, "missing sender guid"),
            ProtocolError::MissingCommand => write!(f, "missing command"),
            ProtocolError::UnknownCommand(c) => write!(f, "unknown command '{}'", c),
            ProtocolError::MissingField(field) => write!(f, "missing field {}", field),
            ProtocolError::UnknownPattern(name) => write!(f, "unknown socket type {}", name),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Parse one received datagram.
pub fn parse(datagram: &[u8]) -> Result<Message<'_>, ProtocolError> {
    if let Some(offset) = datagram.iter().position(|&b| !(0x20..0x7f).contains(&b)) {
        return Err(ProtocolError::NonPrintable {
            offset,
            byte: datagram[offset],
        });
    }
    // Printable ASCII is valid UTF-8.
    let text = std::str::from_utf8(datagram).map_err(|_| ProtocolError::MissingPrefix)?;

    let rest = text
        .strip_prefix(PROTOCOL_PREFIX)
        .and_then(|r| r.strip_prefix(' '))
        .ok_or(ProtocolError::MissingPrefix)?;

    let mut tokens = rest.split(' ');
    let sender = tokens
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(ProtocolError::MissingSender)?;
    let code = tokens
        .next()
        .and_then(|t| t.chars().next())
        .ok_or(ProtocolError::MissingCommand)?;
    let code = CommandCode::from_char(code).ok_or(ProtocolError::UnknownCommand(code))?;

    let command = match code {
        CommandCode::Available => {
            let mut field = |name: &'static str| {
                tokens
                    .next()
                    .filter(|t| !t.is_empty())
                    .ok_or(ProtocolError::MissingField(name))
            };
            let name = field("name")?;
            let pattern_name = field("pattern")?;
            let address = field("address")?;
            let ins = field("input types")?;
            let outs = field("output types")?;
            let pattern = Pattern::from_name(pattern_name)
                .ok_or_else(|| ProtocolError::UnknownPattern(pattern_name.to_string()))?;
            Command::Available(Advertisement {
                name,
                pattern,
                address,
                input_types: parse_types(ins),
                output_types: parse_types(outs),
            })
        }
        CommandCode::Search => Command::Search(tokens.filter(|t| !t.is_empty()).collect()),
        CommandCode::Exit => Command::Exit,
        CommandCode::Remove => Command::Remove(
            tokens
                .next()
                .filter(|t| !t.is_empty())
                .ok_or(ProtocolError::MissingField("name"))?,
        ),
    };

    Ok(Message { sender, command })
}

/// Writes `DISPATCH <guid> <code>` then space-separated arguments into a
/// fixed buffer.
pub(crate) struct DatagramWriter<'b> {
    buf: &'b mut [u8],
    len: usize,
    header: usize,
}

impl<'b> DatagramWriter<'b> {
    /// `None` if the header alone does not fit.
    pub(crate) fn new(buf: &'b mut [u8], guid: &str, code: CommandCode) -> Option<Self> {
        let mut writer = Self {
            buf,
            len: 0,
            header: 0,
        };
        let mut code_buf = [0u8; 4];
        let code = code.as_char().encode_utf8(&mut code_buf);
        if !(writer.put(PROTOCOL_PREFIX)
            && writer.put(" ")
            && writer.put(guid)
            && writer.put(" ")
            && writer.put(code))
        {
            return None;
        }
        writer.header = writer.len;
        Some(writer)
    }

    /// Whether ` arg` still fits.
    pub(crate) fn fits(&self, arg: &str) -> bool {
        self.len + 1 + arg.len() <= self.buf.len()
    }

    /// Append ` arg`. Returns `false` (and writes nothing) if it does not fit.
    pub(crate) fn push(&mut self, arg: &str) -> bool {
        if !self.fits(arg) {
            return false;
        }
        self.put(" ") && self.put(arg)
    }

    /// Any argument written after the header.
    #[cfg(test)]
    pub(crate) fn has_args(&self) -> bool {
        self.len > self.header
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn put(&mut self, s: &str) -> bool {
        let end = self.len + s.len();
        if end > self.buf.len() {
            return false;
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_available() {
        let msg = parse(b"DISPATCH g1 A cam PUB tcp://127.0.0.1:4000 . 7|9").expect("parse");
        assert_eq!(msg.sender, "g1");
        match msg.command {
            Command::Available(adv) => {
                assert_eq!(adv.name, "cam");
                assert_eq!(adv.pattern, Pattern::Pub);
                assert_eq!(adv.address, "tcp://127.0.0.1:4000");
                assert!(adv.input_types.is_empty());
                assert_eq!(adv.output_types.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_available_rejects() {
        assert_eq!(
            parse(b"DISPATCH g1 A cam PUB tcp://127.0.0.1:4000 ."),
            Err(ProtocolError::MissingField("output types"))
        );
        assert_eq!(
            parse(b"DISPATCH g1 A cam FOO tcp://127.0.0.1:4000 . ."),
            Err(ProtocolError::UnknownPattern("FOO".into()))
        );
    }

    #[test]
    fn test_parse_search_exit_remove() {
        let msg = parse(b"DISPATCH g1 S a  b *").expect("search");
        assert_eq!(msg.command, Command::Search(vec!["a", "b", "*"]));
        assert_eq!(parse(b"DISPATCH g1 X").expect("exit").command, Command::Exit);
        assert_eq!(
            parse(b"DISPATCH g1 R cam").expect("remove").command,
            Command::Remove("cam")
        );
        assert_eq!(
            parse(b"DISPATCH g1 R"),
            Err(ProtocolError::MissingField("name"))
        );
    }

    #[test]
    fn test_parse_envelope_errors() {
        assert_eq!(parse(b"HELLO g1 X"), Err(ProtocolError::MissingPrefix));
        assert_eq!(parse(b"DISPATCHg1 X"), Err(ProtocolError::MissingPrefix));
        assert_eq!(parse(b"DISPATCH "), Err(ProtocolError::MissingSender));
        assert_eq!(parse(b"DISPATCH g1"), Err(ProtocolError::MissingCommand));
        assert_eq!(parse(b"DISPATCH g1 Q"), Err(ProtocolError::UnknownCommand('Q')));
        assert_eq!(
            parse(b"DISPATCH g1 X\n"),
            Err(ProtocolError::NonPrintable {
                offset: 13,
                byte: b'\n'
            })
        );
    }

    #[test]
    fn test_writer_fits() {
        let mut buf = [0u8; 24];
        let mut writer = DatagramWriter::new(&mut buf, "guid", CommandCode::Search).expect("header");
        assert_eq!(writer.len(), "DISPATCH guid S".len());
        assert!(!writer.has_args());
        assert!(writer.push("abc"));
        assert!(!writer.push("toolong"));
        assert!(writer.push("x"));
        let len = writer.len();
        assert_eq!(&buf[..len], b"DISPATCH guid S abc x");
    }

    #[test]
    fn test_writer_header_too_large() {
        let mut buf = [0u8; 8];
        assert!(DatagramWriter::new(&mut buf, "guid", CommandCode::Exit).is_none());
    }
}
