//! # Lab Brick command frames
//!
//! Every exchange is one fixed-size request frame followed by one reply frame.
//!
//! | byte | field                                                         |
//! |------|---------------------------------------------------------------|
//! | 0    | opcode                                                        |
//! | 1    | control: payload length, query, high-res, response, NAK bits   |
//! | 2..9 | payload, little endian, zero padded                           |
//! | 9    | checksum, the whole frame sums to zero                        |
//!
//! ### Core Types
//!
//! - **`Frame`**: a validated frame. Built with the `request`/`query`/`reply`
//!   helpers and parsed with `Frame::try_from(&[u8])`.
//! - **`Command`**: a typed host request. `Command::to_frame` encodes it,
//!   `Command::parse_reply` checks and decodes the device's answer.

use crate::constants::{FRAME_SIZE, MAX_PAYLOAD};
use crate::error::LabBrickError;
use crate::status::{DeviceStatus, RampFlags};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use modular_bitfield::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Opcode {
    Frequency = 0x04,
    Sweep = 0x09,
    RfOn = 0x0A,
    RampMode = 0x0B,
    Attenuation = 0x0D,
    Status = 0x0E,
    SerialNumber = 0x1F,
    RampStart = 0x30,
    RampEnd = 0x31,
    StepOne = 0x32,
    DwellOne = 0x33,
    Idle = 0x36,
    DwellTwo = 0x37,
    StepTwo = 0x38,
    Hold = 0x39,
    ProfileElement = 0x3A,
    ProfileCount = 0x3B,
    ProfileDwell = 0x3C,
    ProfileIdle = 0x3D,
    ProfileStart = 0x3E,
    ProfileIndex = 0x3F,
    PhaseAngle = 0x50,
    Channel = 0x54,
    SaveSettings = 0x8C,
}

impl Opcode {
    /// Opcodes the device answers with a live value.
    pub fn is_queryable(&self) -> bool {
        matches!(
            self,
            Opcode::Frequency
                | Opcode::Attenuation
                | Opcode::PhaseAngle
                | Opcode::RfOn
                | Opcode::ProfileIndex
                | Opcode::ProfileElement
                | Opcode::Status
                | Opcode::SerialNumber
        )
    }
}

#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Control {
    pub len: B4,
    pub query: bool,
    pub high_res: bool,
    pub response: bool,
    pub nak: bool,
}

/// On-the-wire layout of a frame.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct RawFrame {
    pub opcode: u8,
    pub control: u8,
    pub payload: [u8; MAX_PAYLOAD],
    pub checksum: u8,
}

/// Two's complement of the wrapping byte sum.
pub fn checksum(bytes: &[u8]) -> u8 {
    0u8.wrapping_sub(bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub opcode: Opcode,
    pub control: Control,
    pub payload: Bytes,
}

impl Frame {
    fn new(opcode: Opcode, control: Control, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Self {
            opcode,
            control: control.with_len(payload.len() as u8),
            payload,
        }
    }

    pub fn request(opcode: Opcode, high_res: bool, payload: Bytes) -> Self {
        Self::new(opcode, Control::new().with_high_res(high_res), payload)
    }

    pub fn query(opcode: Opcode, high_res: bool, payload: Bytes) -> Self {
        Self::new(opcode, Control::new().with_query(true).with_high_res(high_res), payload)
    }

    /// A device reply to `request` carrying `payload`.
    pub fn reply(request: &Frame, payload: Bytes) -> Self {
        Self::new(request.opcode, request.control.with_response(true), payload)
    }

    pub fn nak(request: &Frame, reason: u8) -> Self {
        Self::new(
            request.opcode,
            request.control.with_response(true).with_nak(true),
            Bytes::copy_from_slice(&[reason]),
        )
    }

    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut raw = RawFrame {
            opcode: self.opcode.into(),
            control: self.control.into_bytes()[0],
            payload: [0; MAX_PAYLOAD],
            checksum: 0,
        };
        let len = self.payload.len().min(MAX_PAYLOAD);
        raw.payload[..len].copy_from_slice(&self.payload[..len]);
        raw.checksum = checksum(&raw.as_bytes()[..FRAME_SIZE - 1]);

        let mut out = [0u8; FRAME_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = LabBrickError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        if data.len() < FRAME_SIZE {
            return Err(LabBrickError::Protocol(format!(
                "frame too short: expected {} bytes, got {}",
                FRAME_SIZE,
                data.len()
            )));
        }
        let bytes = &data[..FRAME_SIZE];
        let raw = RawFrame::read_from_bytes(bytes)
            .map_err(|_| LabBrickError::Protocol("failed to read frame layout".to_string()))?;

        if checksum(bytes) != 0 {
            return Err(LabBrickError::Protocol(format!(
                "checksum mismatch in frame {}",
                hex::encode(bytes)
            )));
        }

        let control = Control::from_bytes([raw.control]);
        let len = control.len() as usize;
        if len > MAX_PAYLOAD {
            return Err(LabBrickError::Protocol(format!("payload length {} exceeds {}", len, MAX_PAYLOAD)));
        }
        if raw.payload[len..].iter().any(|b| *b != 0) {
            return Err(LabBrickError::Protocol("non-zero padding after payload".to_string()));
        }

        let opcode = Opcode::try_from(raw.opcode)
            .map_err(|_| LabBrickError::Protocol(format!("unknown opcode {:#04x}", raw.opcode)))?;

        Ok(Self {
            opcode,
            control,
            payload: Bytes::copy_from_slice(&raw.payload[..len]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProfileMode {
    #[default]
    Off = 0,
    Once = 1,
    Repeat = 2,
}

/// A typed host request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Set a scalar quantity addressed by `opcode`.
    Set { opcode: Opcode, value: i32, high_res: bool },
    /// Set the attenuation of one channel of a multi-channel unit.
    SetAttenuationOn { channel: u8, value: i32, high_res: bool },
    /// Switch a boolean quantity (`RfOn`, `Sweep`).
    SetFlag { opcode: Opcode, on: bool },
    SetRampMode(RampFlags),
    SetChannel(u8),
    SetProfileElement { index: u16, value: i32, high_res: bool },
    StartProfile(ProfileMode),
    SaveSettings,
    Query { opcode: Opcode, high_res: bool },
    QueryProfileElement { index: u16, high_res: bool },
}

/// A decoded device answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    Ack,
    Value(i32),
    Status(DeviceStatus),
    Serial(u32),
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Set { opcode, .. } | Command::SetFlag { opcode, .. } | Command::Query { opcode, .. } => *opcode,
            Command::SetAttenuationOn { .. } => Opcode::Attenuation,
            Command::SetRampMode(_) => Opcode::RampMode,
            Command::SetChannel(_) => Opcode::Channel,
            Command::SetProfileElement { .. } | Command::QueryProfileElement { .. } => Opcode::ProfileElement,
            Command::StartProfile(_) => Opcode::ProfileStart,
            Command::SaveSettings => Opcode::SaveSettings,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let mut payload = BytesMut::with_capacity(MAX_PAYLOAD);
        match *self {
            Command::Set { opcode, value, high_res } => {
                payload.put_i32_le(value);
                Frame::request(opcode, high_res, payload.freeze())
            }
            Command::SetAttenuationOn { channel, value, high_res } => {
                payload.put_i32_le(value);
                payload.put_u8(channel);
                Frame::request(Opcode::Attenuation, high_res, payload.freeze())
            }
            Command::SetFlag { opcode, on } => {
                payload.put_u8(on as u8);
                Frame::request(opcode, false, payload.freeze())
            }
            Command::SetRampMode(flags) => {
                payload.put_slice(&flags.into_bytes());
                Frame::request(Opcode::RampMode, false, payload.freeze())
            }
            Command::SetChannel(channel) => {
                payload.put_u8(channel);
                Frame::request(Opcode::Channel, false, payload.freeze())
            }
            Command::SetProfileElement { index, value, high_res } => {
                payload.put_u16_le(index);
                payload.put_i32_le(value);
                Frame::request(Opcode::ProfileElement, high_res, payload.freeze())
            }
            Command::StartProfile(mode) => {
                payload.put_u8(mode.into());
                Frame::request(Opcode::ProfileStart, false, payload.freeze())
            }
            Command::SaveSettings => Frame::request(Opcode::SaveSettings, false, Bytes::new()),
            Command::Query { opcode, high_res } => Frame::query(opcode, high_res, Bytes::new()),
            Command::QueryProfileElement { index, high_res } => {
                payload.put_u16_le(index);
                Frame::query(Opcode::ProfileElement, high_res, payload.freeze())
            }
        }
    }

    /// Validate `reply` against the frame this command produced and decode it.
    pub fn parse_reply(&self, request: &Frame, reply: &Frame) -> Result<Reply, LabBrickError> {
        if !reply.control.response() {
            return Err(LabBrickError::Protocol("reply is missing the response flag".to_string()));
        }
        if reply.opcode != request.opcode {
            return Err(LabBrickError::Protocol(format!(
                "reply opcode {:?} does not match request {:?}",
                reply.opcode, request.opcode
            )));
        }
        let flags = |frame: &Frame| (frame.control.query(), frame.control.high_res());
        if flags(reply) != flags(request) {
            return Err(LabBrickError::Protocol(format!(
                "{:?} reply flags (query, high_res) {:?} do not match request {:?}",
                request.opcode,
                flags(reply),
                flags(request)
            )));
        }
        if reply.control.nak() {
            return Err(LabBrickError::Nak {
                opcode: reply.opcode,
                reason: reply.payload.first().copied().unwrap_or(0),
            });
        }

        let mut payload = reply.payload.clone();
        match *self {
            Command::Query { opcode: Opcode::Status, .. } => {
                expect_len(&payload, 2)?;
                Ok(Reply::Status(DeviceStatus::from_bits(payload.get_u16_le())))
            }
            Command::Query {
                opcode: Opcode::SerialNumber,
                ..
            } => {
                expect_len(&payload, 4)?;
                Ok(Reply::Serial(payload.get_u32_le()))
            }
            Command::Query { .. } => {
                expect_len(&payload, 4)?;
                Ok(Reply::Value(payload.get_i32_le()))
            }
            Command::QueryProfileElement { index, .. } => {
                expect_len(&payload, 6)?;
                let echoed = payload.get_u16_le();
                if echoed != index {
                    return Err(LabBrickError::Protocol(format!(
                        "profile element reply for index {} (requested {})",
                        echoed, index
                    )));
                }
                Ok(Reply::Value(payload.get_i32_le()))
            }
            _ => {
                if reply.payload != request.payload {
                    return Err(LabBrickError::Protocol(format!(
                        "{:?} acknowledged with {} instead of {}",
                        request.opcode,
                        hex::encode(&reply.payload),
                        hex::encode(&request.payload)
                    )));
                }
                Ok(Reply::Ack)
            }
        }
    }
}

fn expect_len(payload: &Bytes, expected: usize) -> Result<(), LabBrickError> {
    if payload.len() != expected {
        return Err(LabBrickError::Protocol(format!(
            "expected {} payload bytes, got {}",
            expected,
            payload.len()
        )));
    }
    Ok(())
}

impl TryFrom<&Frame> for Command {
    type Error = LabBrickError;

    /// Device-side decoding of a host request.
    fn try_from(frame: &Frame) -> Result<Self, Self::Error> {
        let mut payload = frame.payload.clone();
        let high_res = frame.control.high_res();
        let short = || LabBrickError::Protocol(format!("{:?} request payload too short", frame.opcode));

        if frame.control.query() {
            return match frame.opcode {
                Opcode::ProfileElement => {
                    if payload.len() < 2 {
                        return Err(short());
                    }
                    Ok(Command::QueryProfileElement {
                        index: payload.get_u16_le(),
                        high_res,
                    })
                }
                opcode => Ok(Command::Query { opcode, high_res }),
            };
        }

        let command = match frame.opcode {
            Opcode::SaveSettings => Command::SaveSettings,
            Opcode::Status | Opcode::SerialNumber | Opcode::ProfileIndex => {
                return Err(LabBrickError::Protocol(format!("{:?} is read-only", frame.opcode)));
            }
            Opcode::RfOn | Opcode::Sweep => {
                if payload.is_empty() {
                    return Err(short());
                }
                Command::SetFlag {
                    opcode: frame.opcode,
                    on: payload.get_u8() != 0,
                }
            }
            Opcode::RampMode => {
                if payload.is_empty() {
                    return Err(short());
                }
                Command::SetRampMode(RampFlags::from_bytes([payload.get_u8()]))
            }
            Opcode::Channel => {
                if payload.is_empty() {
                    return Err(short());
                }
                Command::SetChannel(payload.get_u8())
            }
            Opcode::ProfileStart => {
                if payload.is_empty() {
                    return Err(short());
                }
                let mode = payload.get_u8();
                Command::StartProfile(
                    ProfileMode::try_from(mode)
                        .map_err(|_| LabBrickError::Protocol(format!("unknown profile mode {}", mode)))?,
                )
            }
            Opcode::ProfileElement => {
                if payload.len() < 6 {
                    return Err(short());
                }
                Command::SetProfileElement {
                    index: payload.get_u16_le(),
                    value: payload.get_i32_le(),
                    high_res,
                }
            }
            Opcode::Attenuation if payload.len() >= 5 => Command::SetAttenuationOn {
                value: payload.get_i32_le(),
                channel: payload.get_u8(),
                high_res,
            },
            opcode => {
                if payload.len() < 4 {
                    return Err(short());
                }
                Command::Set {
                    opcode,
                    value: payload.get_i32_le(),
                    high_res,
                }
            }
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_attenuation(value: i32) -> Command {
        Command::Set {
            opcode: Opcode::Attenuation,
            value,
            high_res: false,
        }
    }

    #[test]
    fn encode_set_attenuation() {
        let frame = set_attenuation(40).to_frame();
        let bytes = frame.to_bytes();
        assert_eq!(hex::encode(bytes), "0d0428000000000000c7");
        assert_eq!(bytes.iter().fold(0u8, |a, b| a.wrapping_add(*b)), 0);
    }

    #[test]
    fn decode_validates_checksum() {
        let mut bytes = set_attenuation(40).to_frame().to_bytes();
        bytes[2] ^= 0x01;
        assert!(matches!(Frame::try_from(&bytes[..]), Err(LabBrickError::Protocol(msg)) if msg.contains("checksum")));
    }

    #[test]
    fn decode_rejects_short_frames() {
        let result = Frame::try_from(&[0x0d, 0x00, 0x00][..]);
        assert!(matches!(result, Err(LabBrickError::Protocol(msg)) if msg.contains("too short")));
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[0] = 0x77;
        bytes[FRAME_SIZE - 1] = checksum(&bytes[..FRAME_SIZE - 1]);
        assert!(matches!(Frame::try_from(&bytes[..]), Err(LabBrickError::Protocol(msg)) if msg.contains("unknown opcode")));
    }

    #[test]
    fn decode_rejects_bad_length_nibble() {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[0] = Opcode::Frequency.into();
        bytes[1] = 0x0f;
        bytes[FRAME_SIZE - 1] = checksum(&bytes[..FRAME_SIZE - 1]);
        assert!(Frame::try_from(&bytes[..]).is_err());
    }

    #[test]
    fn device_side_decode_matches_host_command() {
        let commands = [
            set_attenuation(-3),
            Command::SetAttenuationOn {
                channel: 3,
                value: 201,
                high_res: true,
            },
            Command::SetProfileElement {
                index: 999,
                value: 2400,
                high_res: true,
            },
            Command::SetRampMode(RampFlags::new().with_repeat(true).with_bidirectional(true)),
            Command::StartProfile(ProfileMode::Repeat),
            Command::QueryProfileElement { index: 7, high_res: false },
            Command::SaveSettings,
        ];
        for command in commands {
            let bytes = command.to_frame().to_bytes();
            let frame = Frame::try_from(&bytes[..]).unwrap();
            assert_eq!(Command::try_from(&frame).unwrap(), command);
        }
    }

    #[test]
    fn set_reply_must_echo_payload() {
        let command = set_attenuation(40);
        let request = command.to_frame();
        let good = Frame::reply(&request, request.payload.clone());
        assert_eq!(command.parse_reply(&request, &good).unwrap(), Reply::Ack);

        let bad = Frame::reply(&request, Bytes::from_static(&[0x29, 0, 0, 0]));
        assert!(matches!(command.parse_reply(&request, &bad), Err(LabBrickError::Protocol(_))));
    }

    #[test]
    fn reply_opcode_must_match() {
        let command = Command::Query {
            opcode: Opcode::Frequency,
            high_res: false,
        };
        let request = command.to_frame();
        let other = Command::Query {
            opcode: Opcode::Attenuation,
            high_res: false,
        }
        .to_frame();
        let reply = Frame::reply(&other, Bytes::from_static(&[1, 0, 0, 0]));
        assert!(matches!(command.parse_reply(&request, &reply), Err(LabBrickError::Protocol(_))));
    }

    #[test]
    fn reply_resolution_must_match_request() {
        let command = Command::Query {
            opcode: Opcode::Attenuation,
            high_res: true,
        };
        let request = command.to_frame();
        let mut reply = Frame::reply(&request, Bytes::from_static(&[40, 0, 0, 0]));
        assert_eq!(command.parse_reply(&request, &reply).unwrap(), Reply::Value(40));

        // Same value in standard units must not be taken for fine units
        reply.control = reply.control.with_high_res(false);
        assert!(matches!(
            command.parse_reply(&request, &reply),
            Err(LabBrickError::Protocol(msg)) if msg.contains("high_res")
        ));

        let set = set_attenuation(40);
        let request = set.to_frame();
        let mut reply = Frame::reply(&request, request.payload.clone());
        reply.control = reply.control.with_query(true);
        assert!(matches!(set.parse_reply(&request, &reply), Err(LabBrickError::Protocol(_))));
    }

    #[test]
    fn nak_is_reported() {
        let command = set_attenuation(40);
        let request = command.to_frame();
        let reply = Frame::nak(&request, 0x02);
        assert!(matches!(
            command.parse_reply(&request, &reply),
            Err(LabBrickError::Nak {
                opcode: Opcode::Attenuation,
                reason: 0x02
            })
        ));
    }

    #[test]
    fn status_query_decodes_bits() {
        let command = Command::Query {
            opcode: Opcode::Status,
            high_res: false,
        };
        let request = command.to_frame();
        let reply = Frame::reply(&request, Bytes::from_static(&[0x85, 0x00]));
        match command.parse_reply(&request, &reply).unwrap() {
            Reply::Status(status) => {
                assert!(status.connected());
                assert!(status.ramp_active());
                assert!(status.rf_on());
                assert!(!status.profile_active());
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
