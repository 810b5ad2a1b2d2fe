use serde::{Deserialize, Serialize};
use std::fmt;

pub type NodeId = u32;
pub type FlowId = u32;
pub type PacketId = u64;

/// Numeric trace fields that fell back to zero while parsing.
pub mod fields {
    pub const TIME: u16 = 0x01;
    pub const FROM: u16 = 0x02;
    pub const TO: u16 = 0x04;
    pub const SIZE: u16 = 0x08;
    pub const FLOW: u16 = 0x10;
    pub const SEQ: u16 = 0x20;
    pub const PACKET_ID: u16 = 0x40;

    pub const ALL: [(u16, &str); 7] = [
        (TIME, "time"),
        (FROM, "from"),
        (TO, "to"),
        (SIZE, "size"),
        (FLOW, "flow_id"),
        (SEQ, "seq"),
        (PACKET_ID, "packet_id"),
    ];

    /// Human readable name of a single field bit.
    pub fn name(field: u16) -> &'static str {
        ALL.iter()
            .find(|(bit, _)| *bit == field)
            .map(|(_, name)| *name)
            .unwrap_or("unknown")
    }
}

/// What happened to a packet at a link, as encoded by the first trace column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// `+`: the packet entered the link queue.
    Send,
    /// `-`: the packet left the link queue.
    Dequeue,
    /// `r`: the packet arrived at the far end of the link.
    Receive,
    /// `d`: the packet was dropped by the link queue.
    Drop,
    Other(char),
}

impl EventKind {
    pub fn from_code(code: &str) -> Self {
        let mut chars = code.chars();
        match (chars.next(), chars.next()) {
            (Some('+'), None) => EventKind::Send,
            (Some('-'), None) => EventKind::Dequeue,
            (Some('r'), None) => EventKind::Receive,
            (Some('d'), None) => EventKind::Drop,
            (Some(c), _) => EventKind::Other(c),
            (None, _) => EventKind::Other('?'),
        }
    }

    pub fn code(&self) -> char {
        match self {
            EventKind::Send => '+',
            EventKind::Dequeue => '-',
            EventKind::Receive => 'r',
            EventKind::Drop => 'd',
            EventKind::Other(c) => *c,
        }
    }
}

/// Traffic type column of the trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PacketClass {
    Tcp,
    /// Constant-bit-rate background traffic.
    Cbr,
    Ack,
    Other(String),
}

impl PacketClass {
    pub fn as_str(&self) -> &str {
        match self {
            PacketClass::Tcp => "tcp",
            PacketClass::Cbr => "cbr",
            PacketClass::Ack => "ack",
            PacketClass::Other(name) => name,
        }
    }
}

impl From<&str> for PacketClass {
    fn from(value: &str) -> Self {
        match value {
            "tcp" => PacketClass::Tcp,
            "cbr" => PacketClass::Cbr,
            "ack" => PacketClass::Ack,
            other => PacketClass::Other(other.to_string()),
        }
    }
}

impl From<String> for PacketClass {
    fn from(value: String) -> Self {
        match value.as_str() {
            "tcp" | "cbr" | "ack" => PacketClass::from(value.as_str()),
            _ => PacketClass::Other(value),
        }
    }
}

impl From<PacketClass> for String {
    fn from(value: PacketClass) -> Self {
        match value {
            PacketClass::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for PacketClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed link between two simulated nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub from: NodeId,
    pub to: NodeId,
}

impl Link {
    pub fn new(from: NodeId, to: NodeId) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// One packet event of a simulator trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: EventKind,
    /// Simulation time in seconds.
    pub time: f64,
    pub from: NodeId,
    pub to: NodeId,
    pub class: PacketClass,
    /// Packet size in bytes.
    pub size: u32,
    pub flow_id: FlowId,
    /// Per-flow ordering hint, not unique across retransmissions.
    pub seq: i64,
    /// Identifies one physical packet instance across its events.
    pub packet_id: PacketId,
    /// Bit set of [`fields`] that failed to parse and were zeroed.
    #[serde(default)]
    pub defaulted: u16,
}

impl TraceEvent {
    pub fn new(kind: EventKind, time: f64, link: Link, class: PacketClass, size: u32) -> Self {
        Self {
            kind,
            time,
            from: link.from,
            to: link.to,
            class,
            size,
            flow_id: 0,
            seq: 0,
            packet_id: 0,
            defaulted: 0,
        }
    }

    pub fn with_flow(mut self, flow_id: FlowId, seq: i64, packet_id: PacketId) -> Self {
        self.flow_id = flow_id;
        self.seq = seq;
        self.packet_id = packet_id;
        self
    }

    pub fn link(&self) -> Link {
        Link::new(self.from, self.to)
    }

    pub fn on_link(&self, link: Link) -> bool {
        self.from == link.from && self.to == link.to
    }

    pub fn is_send(&self) -> bool {
        self.kind == EventKind::Send
    }
    pub fn is_receive(&self) -> bool {
        self.kind == EventKind::Receive
    }
    pub fn is_drop(&self) -> bool {
        self.kind == EventKind::Drop
    }

    pub fn was_defaulted(&self, field: u16) -> bool {
        self.defaulted & field != 0
    }

    pub fn has_defaults(&self) -> bool {
        self.defaulted != 0
    }
}

/// Re-emits the event in the 12-column ns-2 layout. Flag and address
/// columns are not retained and print as placeholders.
impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} ------- {} - - {} {}",
            self.kind.code(),
            self.time,
            self.from,
            self.to,
            self.class,
            self.size,
            self.flow_id,
            self.seq,
            self.packet_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_codes() {
        for code in ["+", "-", "r", "d"] {
            let kind = EventKind::from_code(code);
            assert_eq!(kind.code().to_string(), code);
        }
        assert_eq!(EventKind::from_code("h"), EventKind::Other('h'));
        assert_eq!(EventKind::from_code("rr"), EventKind::Other('r'));
    }

    #[test]
    fn test_packet_class_from_string() {
        assert_eq!(PacketClass::from("cbr".to_string()), PacketClass::Cbr);
        assert_eq!(
            PacketClass::from("exp".to_string()),
            PacketClass::Other("exp".into())
        );
        assert_eq!(String::from(PacketClass::Ack), "ack");
    }

    #[test]
    fn test_display_layout() {
        let event = TraceEvent::new(
            EventKind::Receive,
            1.25,
            Link::new(1, 2),
            PacketClass::Tcp,
            1040,
        )
        .with_flow(1, 7, 42);
        assert_eq!(event.to_string(), "r 1.25 1 2 tcp 1040 ------- 1 - - 7 42");
    }

    #[test]
    fn test_defaulted_bits() {
        let mut event =
            TraceEvent::new(EventKind::Send, 0.0, Link::new(0, 1), PacketClass::Cbr, 0);
        assert!(!event.has_defaults());
        event.defaulted |= fields::SIZE;
        assert!(event.was_defaulted(fields::SIZE));
        assert!(!event.was_defaulted(fields::TIME));
        assert_eq!(fields::name(fields::SIZE), "size");
    }
}
