//! Single-pass tokeniser for trace-pipe records.
//!
//! One record per line, in the form
//!
//! ```text
//! <command>-<pid> <cpuinfo>: <tracepoint>: key1=val1 key2=val2 ... keyN=valN
//! ```
//!
//! Values are terminated by a single space, except the last, which runs to
//! the end of the line.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::num::ParseIntError;
use std::time::SystemTime;

use tcp_audit_types::{Event, TcpState, UnknownStateError};
use thiserror::Error;

const FAMILY_INET: &str = "AF_INET";
const PROTOCOL_TCP: &str = "IPPROTO_TCP";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("parsing next field: unexpected end of record")]
    Truncated,
    #[error("{0} not present in event")]
    MissingTag(&'static str),
    #[error("converting {field} to integer: {source}")]
    BadInteger {
        field: &'static str,
        source: ParseIntError,
    },
    #[error("could not parse {0} IP address")]
    BadAddress(&'static str),
    #[error("canonicalising {field} state: {source}")]
    BadState {
        field: &'static str,
        source: UnknownStateError,
    },
}

/// Outcome of parsing one well-formed record line.
#[derive(Debug)]
pub enum ParsedLine {
    /// A TCP state transition worth forwarding.
    Event(Event),
    /// A record for a family or protocol this auditor does not cover.
    Irrelevant,
}

/// Parse one trace-pipe line into an event, or classify it irrelevant.
pub fn parse_line(line: &str) -> Result<ParsedLine, ParseError> {
    let mut tokens = Tokens::new(line);

    let command = tokens.next_field('-')?;
    let pid: i32 = tokens
        .next_field(' ')?
        .parse()
        .map_err(|source| ParseError::BadInteger {
            field: "PID",
            source,
        })?;

    // Per-CPU metadata, then the tracepoint label.
    tokens.skip_past(": ")?;
    tokens.skip_past(": ")?;

    let tags = tokens.tagged_fields()?;

    // Both keys are absent from legacy tcp_set_state records, which only
    // ever describe TCP sockets, so filter only when present.
    if let Some(&family) = tags.get("family") {
        if family != FAMILY_INET {
            return Ok(ParsedLine::Irrelevant);
        }
    }
    if let Some(&protocol) = tags.get("protocol") {
        if protocol != PROTOCOL_TCP {
            return Ok(ParsedLine::Irrelevant);
        }
    }

    let source_port: u16 = require_tag(&tags, "sport", "source port")?
        .parse()
        .map_err(|source| ParseError::BadInteger {
            field: "source port",
            source,
        })?;
    let dest_port: u16 = require_tag(&tags, "dport", "destination port")?
        .parse()
        .map_err(|source| ParseError::BadInteger {
            field: "destination port",
            source,
        })?;

    let source_ip: Ipv4Addr = require_tag(&tags, "saddr", "source address")?
        .parse()
        .map_err(|_| ParseError::BadAddress("source"))?;
    let dest_ip: Ipv4Addr = require_tag(&tags, "daddr", "destination address")?
        .parse()
        .map_err(|_| ParseError::BadAddress("destination"))?;

    // The v6 forms are carried by both tracepoints and must be present
    // even though IPv4 is all this auditor forwards.
    require_tag(&tags, "saddrv6", "source IPv6 address")?;
    require_tag(&tags, "daddrv6", "destination IPv6 address")?;

    let old_state = TcpState::from_kernel(require_tag(&tags, "oldstate", "old state")?).map_err(
        |source| ParseError::BadState {
            field: "old",
            source,
        },
    )?;
    let new_state = TcpState::from_kernel(require_tag(&tags, "newstate", "new state")?).map_err(
        |source| ParseError::BadState {
            field: "new",
            source,
        },
    )?;

    Ok(ParsedLine::Event(Event {
        time: SystemTime::now(),
        pid_on_cpu: pid,
        command_on_cpu: command.to_string(),
        source_ip,
        dest_ip,
        source_port,
        dest_port,
        old_state,
        new_state,
    }))
}

fn require_tag<'a>(
    tags: &HashMap<&str, &'a str>,
    key: &str,
    what: &'static str,
) -> Result<&'a str, ParseError> {
    tags.get(key).copied().ok_or(ParseError::MissingTag(what))
}

/// Cursor over the unconsumed remainder of one record line.
struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(line: &'a str) -> Tokens<'a> {
        Tokens { rest: line }
    }

    /// The field up to the next `sep`, which is consumed. A missing
    /// separator means the record ended early.
    fn next_field(&mut self, sep: char) -> Result<&'a str, ParseError> {
        match self.rest.find(sep) {
            Some(idx) => {
                let field = &self.rest[..idx];
                self.rest = &self.rest[idx + sep.len_utf8()..];
                Ok(field)
            }
            None => Err(ParseError::Truncated),
        }
    }

    /// The field up to the next `sep`, or the whole remainder when `sep`
    /// does not occur again. The flag is false when the remainder was
    /// taken.
    fn next_field_or_rest(&mut self, sep: char) -> (&'a str, bool) {
        match self.rest.find(sep) {
            Some(idx) => {
                let field = &self.rest[..idx];
                self.rest = &self.rest[idx + sep.len_utf8()..];
                (field, true)
            }
            None => {
                let field = self.rest;
                self.rest = "";
                (field, false)
            }
        }
    }

    /// Skip up to and including the next occurrence of `sep`.
    fn skip_past(&mut self, sep: &str) -> Result<(), ParseError> {
        match self.rest.find(sep) {
            Some(idx) => {
                self.rest = &self.rest[idx + sep.len()..];
                Ok(())
            }
            None => Err(ParseError::Truncated),
        }
    }

    /// Consume the rest of the line as `key=value` pairs.
    fn tagged_fields(&mut self) -> Result<HashMap<&'a str, &'a str>, ParseError> {
        let mut tags = HashMap::new();
        loop {
            let tag = self.next_field('=')?;
            let (value, more) = self.next_field_or_rest(' ');
            tags.insert(tag, value);
            if !more {
                break;
            }
        }

        Ok(tags)
    }
}
