// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The BFD control packet codec (RFC 5880 §4).

use crate::error::Error;
use crate::{AuthParams, AuthType, Diag, SessionState, MIN_CONTROL_PACKET_LEN};
use std::time::Duration;

const VERSION: u8 = 1;

// Control packet flags.
const POLL: u8 = 1 << 5;
const FINAL: u8 = 1 << 4;
const CONTROL_PLANE_INDEPENDENT: u8 = 1 << 3;
const AUTHENTICATION_PRESENT: u8 = 1 << 2;
const DEMAND: u8 = 1 << 1;
const MULTIPOINT: u8 = 1;

/// The BFD control packet.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Vers |  Diag   |Sta|P|F|C|A|D|M|  Detect Mult  |    Length     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       My Discriminator                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Your Discriminator                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Desired Min TX Interval                    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                   Required Min RX Interval                    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 Required Min Echo RX Interval                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    /// Version in the top three bits, diagnostic code in the low five.
    pub vers_diag: u8,

    /// Session state in the top two bits followed by the P, F, C, A, D and M
    /// flags.
    pub flags: u8,

    pub detect_mult: u8,

    /// Length of the whole packet including any authentication section.
    pub length: u8,

    pub my_discriminator: u32,

    /// Reflects the remote's My Discriminator, zero while unknown.
    pub your_discriminator: u32,

    /// Microseconds. Zero is reserved.
    pub desired_min_tx: u32,

    /// Microseconds. Zero asks the remote to stop periodic transmission.
    pub required_min_rx: u32,

    /// Microseconds. Zero means echo packets are not supported.
    pub required_min_echo_rx: u32,

    pub auth: Option<Auth>,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            vers_diag: VERSION << 5,
            flags: (SessionState::Down as u8) << 6,
            detect_mult: 3,
            length: MIN_CONTROL_PACKET_LEN as u8,
            my_discriminator: 0,
            your_discriminator: 0,
            desired_min_tx: 0,
            required_min_rx: 0,
            required_min_echo_rx: 0,
            auth: None,
        }
    }
}

impl Control {
    /// Decode and validate a control packet. The checks are the ones
    /// RFC 5880 §6.8.6 requires before a packet may reach a session.
    pub fn from_bytes(d: &[u8]) -> Result<Self, Error> {
        if d.len() < MIN_CONTROL_PACKET_LEN {
            return Err(Error::TooSmall(d.len()));
        }
        let version = d[0] >> 5;
        if version != VERSION {
            return Err(Error::Version(version));
        }
        let length = d[3];
        if usize::from(length) < MIN_CONTROL_PACKET_LEN
            || usize::from(length) > d.len()
        {
            return Err(Error::Length {
                field: length,
                actual: d.len(),
            });
        }
        let be = |i: usize| {
            u32::from_be_bytes([d[i], d[i + 1], d[i + 2], d[i + 3]])
        };
        let mut pkt = Self {
            vers_diag: d[0],
            flags: d[1],
            detect_mult: d[2],
            length,
            my_discriminator: be(4),
            your_discriminator: be(8),
            desired_min_tx: be(12),
            required_min_rx: be(16),
            required_min_echo_rx: be(20),
            auth: None,
        };
        if pkt.detect_mult == 0 {
            return Err(Error::DetectMultiplier);
        }
        if pkt.multipoint() {
            return Err(Error::Multipoint);
        }
        if pkt.my_discriminator == 0 {
            return Err(Error::Discriminator);
        }
        if pkt.authentication_present() {
            pkt.auth = Some(Auth::from_bytes(
                &d[MIN_CONTROL_PACKET_LEN..usize::from(length)],
            )?);
        }
        Ok(pkt)
    }

    /// Encode the packet. The length field is taken as is, use `set_auth`
    /// or `clear_auth` to keep it consistent with the authentication
    /// section.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut v =
            vec![self.vers_diag, self.flags, self.detect_mult, self.length];
        v.extend_from_slice(&self.my_discriminator.to_be_bytes());
        v.extend_from_slice(&self.your_discriminator.to_be_bytes());
        v.extend_from_slice(&self.desired_min_tx.to_be_bytes());
        v.extend_from_slice(&self.required_min_rx.to_be_bytes());
        v.extend_from_slice(&self.required_min_echo_rx.to_be_bytes());
        if let Some(auth) = &self.auth {
            auth.write(&mut v);
        }
        v
    }

    pub fn version(&self) -> u8 {
        self.vers_diag >> 5
    }

    /// The diagnostic code, if it is one we know about.
    pub fn diag(&self) -> Option<Diag> {
        Diag::try_from(self.vers_diag & 0x1f).ok()
    }

    pub fn set_diag(&mut self, diag: Diag) {
        self.vers_diag = (self.vers_diag & 0b11100000) | diag as u8;
    }

    pub fn state(&self) -> State {
        let status = (self.flags & 0b11000000) >> 6;
        match SessionState::try_from(status) {
            Ok(s) => State::Peer(s),
            Err(_) => State::Unknown(status),
        }
    }

    pub fn set_state(&mut self, s: SessionState) {
        self.flags = (self.flags & 0b00111111) | ((s as u8) << 6);
    }

    pub fn desired_min_tx(&self) -> Duration {
        Duration::from_micros(self.desired_min_tx.into())
    }

    pub fn required_min_rx(&self) -> Duration {
        Duration::from_micros(self.required_min_rx.into())
    }

    pub fn poll(&self) -> bool {
        (self.flags & POLL) != 0
    }

    pub fn set_poll(&mut self) {
        self.flags |= POLL;
    }

    pub fn r#final(&self) -> bool {
        (self.flags & FINAL) != 0
    }

    pub fn set_final(&mut self) {
        self.flags |= FINAL;
    }

    pub fn control_plane_independent(&self) -> bool {
        (self.flags & CONTROL_PLANE_INDEPENDENT) != 0
    }

    pub fn authentication_present(&self) -> bool {
        (self.flags & AUTHENTICATION_PRESENT) != 0
    }

    /// Attach an authentication section, setting the A bit and growing the
    /// length field to cover it.
    pub fn set_auth(&mut self, auth: Auth) {
        self.flags |= AUTHENTICATION_PRESENT;
        self.length = (MIN_CONTROL_PACKET_LEN + auth.wire_len()) as u8;
        self.auth = Some(auth);
    }

    pub fn clear_auth(&mut self) {
        self.flags &= !AUTHENTICATION_PRESENT;
        self.length = MIN_CONTROL_PACKET_LEN as u8;
        self.auth = None;
    }

    pub fn demand(&self) -> bool {
        (self.flags & DEMAND) != 0
    }

    pub fn set_demand(&mut self) {
        self.flags |= DEMAND;
    }

    pub fn multipoint(&self) -> bool {
        (self.flags & MULTIPOINT) != 0
    }
}

/// A wrapper for session states that can handle unknown values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Peer(SessionState),
    Unknown(u8),
}

/// The optional authentication section.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Auth Type   |   Auth Len    |  Auth Key ID  |  Password or  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Reserved    |             Sequence Number (keyed)           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    pub auth_type: AuthType,
    pub key_id: u8,
    pub data: AuthData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthData {
    /// 1 to 16 byte simple password.
    Password(Vec<u8>),

    /// MD5 or SHA1 variants. The digest field is 16 or 20 bytes.
    Keyed { sequence_number: u32, digest: Vec<u8> },
}

impl Auth {
    /// Build the section a session sends with the given parameters. Keyed
    /// types carry the shared key padded to the digest length.
    pub fn from_params(p: &AuthParams, sequence_number: u32) -> Self {
        let data = match p.auth_type.digest_len() {
            None => {
                AuthData::Password(p.key.iter().take(16).copied().collect())
            }
            Some(n) => {
                let mut digest = p.key.clone();
                digest.resize(n, 0);
                AuthData::Keyed {
                    sequence_number,
                    digest,
                }
            }
        };
        Self {
            auth_type: p.auth_type,
            key_id: p.key_id,
            data,
        }
    }

    /// Encoded length including the type and length octets.
    pub fn wire_len(&self) -> usize {
        match &self.data {
            AuthData::Password(pw) => 3 + pw.len(),
            AuthData::Keyed { digest, .. } => 8 + digest.len(),
        }
    }

    fn write(&self, v: &mut Vec<u8>) {
        v.push(self.auth_type as u8);
        v.push(self.wire_len() as u8);
        v.push(self.key_id);
        match &self.data {
            AuthData::Password(pw) => v.extend_from_slice(pw),
            AuthData::Keyed {
                sequence_number,
                digest,
            } => {
                v.push(0);
                v.extend_from_slice(&sequence_number.to_be_bytes());
                v.extend_from_slice(digest);
            }
        }
    }

    fn from_bytes(d: &[u8]) -> Result<Self, Error> {
        if d.len() < 3 {
            return Err(Error::AuthSection);
        }
        let auth_type = AuthType::try_from(d[0])?;
        let len = usize::from(d[1]);
        if len < 3 || len > d.len() {
            return Err(Error::AuthSection);
        }
        let key_id = d[2];
        let data = match auth_type.digest_len() {
            None => {
                let pw = &d[3..len];
                if pw.is_empty() || pw.len() > 16 {
                    return Err(Error::AuthSection);
                }
                AuthData::Password(pw.to_vec())
            }
            Some(n) => {
                if len != 8 + n {
                    return Err(Error::AuthSection);
                }
                AuthData::Keyed {
                    sequence_number: u32::from_be_bytes([
                        d[4], d[5], d[6], d[7],
                    ]),
                    digest: d[8..len].to_vec(),
                }
            }
        };
        Ok(Self {
            auth_type,
            key_id,
            data,
        })
    }
}
