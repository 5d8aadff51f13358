//! Shared data model for the tcp-audit pipeline.
//!
//! This crate holds the canonical TCP state enumeration and the event
//! record that flows from an eventer to a sinker. It is deliberately thin:
//! eventer and sinker plugins depend on it without pulling in the agent.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::SystemTime;

use thiserror::Error;

/// Returned when a state string does not name one of the eleven TCP states.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown TCP state: {0}")]
pub struct UnknownStateError(pub String);

/// A TCP connection state, named as in RFC 793.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
    Closed,
}

impl TcpState {
    /// All eleven states, in RFC order.
    pub const ALL: [TcpState; 11] = [
        TcpState::Listen,
        TcpState::SynSent,
        TcpState::SynReceived,
        TcpState::Established,
        TcpState::FinWait1,
        TcpState::FinWait2,
        TcpState::CloseWait,
        TcpState::Closing,
        TcpState::LastAck,
        TcpState::TimeWait,
        TcpState::Closed,
    ];

    /// Canonical hyphenated rendering, e.g. `SYN-SENT`.
    pub fn as_str(self) -> &'static str {
        match self {
            TcpState::Listen => "LISTEN",
            TcpState::SynSent => "SYN-SENT",
            TcpState::SynReceived => "SYN-RECEIVED",
            TcpState::Established => "ESTABLISHED",
            TcpState::FinWait1 => "FIN-WAIT-1",
            TcpState::FinWait2 => "FIN-WAIT-2",
            TcpState::CloseWait => "CLOSE-WAIT",
            TcpState::Closing => "CLOSING",
            TcpState::LastAck => "LAST-ACK",
            TcpState::TimeWait => "TIME-WAIT",
            TcpState::Closed => "CLOSED",
        }
    }

    /// Canonicalise a state string as emitted by the kernel.
    ///
    /// Kernel tracepoints render states as enum constant names
    /// (`TCP_SYN_SENT`); strip the `TCP_` prefix, hyphenate, then match
    /// against the canonical names. Plain canonical names are accepted
    /// unchanged.
    pub fn from_kernel(raw: &str) -> Result<TcpState, UnknownStateError> {
        let name = raw.strip_prefix("TCP_").unwrap_or(raw);
        name.replace('_', "-").parse()
    }
}

impl FromStr for TcpState {
    type Err = UnknownStateError;

    fn from_str(s: &str) -> Result<TcpState, UnknownStateError> {
        match s {
            "LISTEN" => Ok(TcpState::Listen),
            "SYN-SENT" => Ok(TcpState::SynSent),
            "SYN-RECEIVED" => Ok(TcpState::SynReceived),
            "ESTABLISHED" => Ok(TcpState::Established),
            "FIN-WAIT-1" => Ok(TcpState::FinWait1),
            "FIN-WAIT-2" => Ok(TcpState::FinWait2),
            "CLOSE-WAIT" => Ok(TcpState::CloseWait),
            "CLOSING" => Ok(TcpState::Closing),
            "LAST-ACK" => Ok(TcpState::LastAck),
            "TIME-WAIT" => Ok(TcpState::TimeWait),
            "CLOSED" => Ok(TcpState::Closed),
            other => Err(UnknownStateError(other.to_string())),
        }
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One TCP socket state transition, as reported by the kernel.
///
/// Immutable once produced. The PID and command name are those of the task
/// that happened to be on-CPU when the tracepoint fired; for transitions
/// driven by softirq context the PID may be 0. `old_state == new_state` is
/// possible (the kernel may emit identity transitions) and is forwarded
/// as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Wall-clock time at which the record was turned into an event.
    pub time: SystemTime,
    /// PID of the task on-CPU when the tracepoint fired.
    pub pid_on_cpu: i32,
    /// Command name of the task on-CPU when the tracepoint fired.
    pub command_on_cpu: String,
    pub source_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
    pub source_port: u16,
    pub dest_port: u16,
    pub old_state: TcpState,
    pub new_state: TcpState,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PID (on CPU): {}, Command (on CPU): {}, Source: {}:{}, Destination: {}:{}, Old State: {}, New State: {}",
            self.pid_on_cpu,
            self.command_on_cpu,
            self.source_ip,
            self.source_port,
            self.dest_ip,
            self.dest_port,
            self.old_state,
            self.new_state
        )
    }
}
