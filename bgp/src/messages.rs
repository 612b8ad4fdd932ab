// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured BGP messages as seen by the peer state machines. Encoding to
//! and from the wire is the business of the connection implementation.

use crate::error::Error;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

pub const BGP4: u8 = 4;

/// Placeholder 2-octet ASN advertised by speakers with a 4-octet ASN.
///
/// Ref: RFC 6793 §9
pub const AS_TRANS: u16 = 23456;

pub const AFI_IPV4: u16 = 1;
pub const AFI_IPV6: u16 = 2;
pub const SAFI_UNICAST: u8 = 1;

#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Copy, Clone)]
#[repr(u8)]
pub enum MessageType {
    /// The first message sent by each side once a TCP connection is
    /// established.
    ///
    /// RFC 4271 §4.2
    Open = 1,

    /// Used to transfer routing information between BGP peers.
    ///
    /// RFC 4271 §4.3
    Update = 2,

    /// Sent when an error condition is detected.
    ///
    /// RFC 4271 §4.5
    Notification = 3,

    /// Exchanged between peers often enough not to cause the hold timer to
    /// expire.
    ///
    /// RFC 4271 §4.4
    KeepAlive = 4,
}

impl From<&Message> for MessageType {
    fn from(m: &Message) -> Self {
        match m {
            Message::Open(_) => Self::Open,
            Message::Update(_) => Self::Update,
            Message::Notification(_) => Self::Notification,
            Message::KeepAlive => Self::KeepAlive,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Message {
    Open(OpenMessage),
    Update(UpdateMessage),
    Notification(NotificationMessage),
    KeepAlive,
}

impl Message {
    pub fn title(&self) -> &'static str {
        match self {
            Message::Open(_) => "open",
            Message::Update(_) => "update",
            Message::Notification(_) => "notification",
            Message::KeepAlive => "keepalive",
        }
    }
}

impl From<OpenMessage> for Message {
    fn from(m: OpenMessage) -> Message {
        Message::Open(m)
    }
}

impl From<UpdateMessage> for Message {
    fn from(m: UpdateMessage) -> Message {
        Message::Update(m)
    }
}

impl From<NotificationMessage> for Message {
    fn from(m: NotificationMessage) -> Message {
        Message::Notification(m)
    }
}

/// Width of the AS numbers a peer speaks.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AsSize {
    TwoOctet,
    FourOctet,
}

/// Ref: RFC 4271 §4.2
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OpenMessage {
    /// BGP protocol version.
    pub version: u8,

    /// Autonomous system number of the sender. When 4-byte ASNs are in use
    /// this value is set to AS_TRANS.
    pub asn: u16,

    /// Number of seconds the sender proposes for the hold timer.
    pub hold_time: u16,

    /// BGP identifier of the sender.
    pub id: u32,

    pub capabilities: Vec<Capability>,
}

impl OpenMessage {
    /// Create a new open message for a sender with a 2-byte ASN
    pub fn new2(asn: u16, hold_time: u16, id: u32) -> OpenMessage {
        OpenMessage {
            version: BGP4,
            asn,
            hold_time,
            id,
            capabilities: Vec::new(),
        }
    }

    /// Create a new open message for a sender with a 4-byte ASN
    pub fn new4(asn: u32, hold_time: u16, id: u32) -> OpenMessage {
        OpenMessage {
            version: BGP4,
            asn: AS_TRANS,
            hold_time,
            id,
            capabilities: vec![Capability::FourOctetAs { asn }],
        }
    }

    pub fn add_capabilities(&mut self, capabilities: &[Capability]) {
        self.capabilities.extend_from_slice(capabilities);
    }

    pub fn as_size(&self) -> AsSize {
        if self
            .capabilities
            .iter()
            .any(|c| matches!(c, Capability::FourOctetAs { .. }))
        {
            AsSize::FourOctet
        } else {
            AsSize::TwoOctet
        }
    }

    /// The sender's AS number, taken from the 4-octet capability when one is
    /// present.
    pub fn asn(&self) -> u32 {
        for c in &self.capabilities {
            if let Capability::FourOctetAs { asn } = c {
                return *asn;
            }
        }
        u32::from(self.asn)
    }

    /// Address families the sender negotiated add-path for.
    pub fn add_path_families(&self) -> Vec<AddPathElement> {
        self.capabilities
            .iter()
            .filter_map(|c| match c {
                Capability::AddPath { elements } => Some(elements.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn router_id(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.id)
    }
}

/// The `AddPathElement` comes as a BGP capability extension as described in
/// RFC 7911.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct AddPathElement {
    pub afi: u16,
    pub safi: u8,
    /// 1 = receive, 2 = send, 3 = both.
    pub send_receive: u8,
}

/// Capabilities the state machines look at when negotiating a session.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Capability {
    /// RFC 2858
    MultiprotocolExtensions { afi: u16, safi: u8 },

    /// RFC 2918
    RouteRefresh {},

    /// RFC 6793
    FourOctetAs { asn: u32 },

    /// RFC 7911
    AddPath { elements: Vec<AddPathElement> },
}

/// An address prefix carried in updates.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct Prefix {
    pub value: IpAddr,
    pub length: u8,
}

impl Display for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.length)
    }
}

impl FromStr for Prefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidPrefix(s.to_owned()))?;
        let value: IpAddr = addr
            .parse()
            .map_err(|_| Error::InvalidPrefix(s.to_owned()))?;
        let length: u8 = len
            .parse()
            .map_err(|_| Error::InvalidPrefix(s.to_owned()))?;
        let max = if value.is_ipv4() { 32 } else { 128 };
        if length > max {
            return Err(Error::InvalidPrefix(s.to_owned()));
        }
        Ok(Self { value, length })
    }
}

/// A path attribute the state machines pass through untouched.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PathAttribute {
    pub flags: u8,
    pub type_code: u8,
    pub value: Vec<u8>,
}

/// Ref: RFC 4271 §4.3
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct UpdateMessage {
    pub withdrawn: Vec<Prefix>,
    pub path_attributes: Vec<PathAttribute>,
    pub nlri: Vec<Prefix>,
}

/// Ref: RFC 4271 §4.5
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NotificationMessage {
    pub error_code: ErrorCode,
    pub error_subcode: ErrorSubcode,
    pub data: Vec<u8>,
}

impl NotificationMessage {
    /// Build a notification from raw code points, rejecting unknown codes.
    pub fn from_codes(code: u8, subcode: u8) -> Result<Self, Error> {
        let error_code = ErrorCode::try_from(code)?;
        let error_subcode = match error_code {
            ErrorCode::Header => ErrorSubcode::Header(subcode),
            ErrorCode::Open => ErrorSubcode::Open(subcode),
            ErrorCode::Update => ErrorSubcode::Update(subcode),
            ErrorCode::HoldTimerExpired => ErrorSubcode::HoldTime(subcode),
            ErrorCode::Fsm => ErrorSubcode::Fsm(subcode),
            ErrorCode::Cease => {
                ErrorSubcode::Cease(CeaseErrorSubcode::try_from(subcode)?)
            }
        };
        Ok(Self {
            error_code,
            error_subcode,
            data: Vec::new(),
        })
    }

    pub fn cease(subcode: CeaseErrorSubcode) -> Self {
        Self {
            error_code: ErrorCode::Cease,
            error_subcode: ErrorSubcode::Cease(subcode),
            data: Vec::new(),
        }
    }

    pub fn hold_timer_expired() -> Self {
        Self {
            error_code: ErrorCode::HoldTimerExpired,
            error_subcode: ErrorSubcode::HoldTime(0),
            data: Vec::new(),
        }
    }

    pub fn open_error(subcode: OpenErrorSubcode) -> Self {
        Self {
            error_code: ErrorCode::Open,
            error_subcode: ErrorSubcode::Open(subcode.into()),
            data: Vec::new(),
        }
    }

    pub fn fsm_error() -> Self {
        Self {
            error_code: ErrorCode::Fsm,
            error_subcode: ErrorSubcode::Fsm(0),
            data: Vec::new(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum ErrorCode {
    Header = 1,
    Open,
    Update,
    HoldTimerExpired,
    Fsm,
    Cease,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorSubcode {
    Header(u8),
    Open(u8),
    Update(u8),
    HoldTime(u8),
    Fsm(u8),
    Cease(CeaseErrorSubcode),
}

impl ErrorSubcode {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Header(x)
            | Self::Open(x)
            | Self::Update(x)
            | Self::HoldTime(x)
            | Self::Fsm(x) => *x,
            Self::Cease(x) => *x as u8,
        }
    }
}

#[derive(
    Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum OpenErrorSubcode {
    Unspecific = 0,
    UnsupportedVersionNumber,
    BadPeerAS,
    BadBgpIdentifier,
    UnsupportedOptionalParameter,
    Deprecated,
    UnacceptableHoldTime,
    UnsupportedCapability,
}

/// Ref: RFC 4486
#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum CeaseErrorSubcode {
    MaximumNumberofPrefixesReached = 1,
    AdministrativeShutdown,
    PeerDeconfigured,
    AdministrativeReset,
    ConnectionRejected,
    OtherConfigurationChange,
    ConnectionCollisionResolution,
    OutOfResources,
}
