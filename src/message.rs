use std::fmt::Display;

use chrono::Timelike;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// The recognized opcode subset. Anything else still frames correctly
// (the length class is encoded in the opcode itself) and decodes to
// [`Message::Unknown`].
pub(crate) const OPC_GPBUSY: u8 = 0x81;
pub(crate) const OPC_GPOFF: u8 = 0x82;
pub(crate) const OPC_GPON: u8 = 0x83;
pub(crate) const OPC_LOCO_SPD: u8 = 0xA0;
pub(crate) const OPC_LOCO_DIRF: u8 = 0xA1;
pub(crate) const OPC_LOCO_SND: u8 = 0xA2;
pub(crate) const OPC_LOCO_F912: u8 = 0xA3;
pub(crate) const OPC_SW_REQ: u8 = 0xB0;
pub(crate) const OPC_SW_REP: u8 = 0xB1;
pub(crate) const OPC_INPUT_REP: u8 = 0xB2;
pub(crate) const OPC_LONG_ACK: u8 = 0xB4;
pub(crate) const OPC_RQ_SL_DATA: u8 = 0xBB;
pub(crate) const OPC_SW_STATE: u8 = 0xBC;
pub(crate) const OPC_LOCO_ADR: u8 = 0xBF;
pub(crate) const OPC_TIMESTAMP: u8 = 0xC0;
pub(crate) const OPC_SL_RD_DATA: u8 = 0xE7;
pub(crate) const OPC_IMM_PACKET: u8 = 0xED;
pub(crate) const OPC_WR_SL_DATA: u8 = 0xEF;

// Bit positions within the `dirf`, `snd` and switch argument bytes.
const DIRF_DIR: u8 = 0x20;
const DIRF_F0: u8 = 0x10;
const SW_DIR: u8 = 0x20;
const SW_ON: u8 = 0x10;
const STAT_CONSIST_UP: u8 = 0x40;
const STAT_CONSIST_DOWN: u8 = 0x08;
const INPUT_LEVEL: u8 = 0x10;

/// Why a byte slice failed to decode as a LocoNet frame.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum DecodeError {
    /// The slice is shorter than the length its opcode declares.
    #[error("frame too short: opcode {opcode:#04x} wants {expected} bytes, got {actual}")]
    TooShort {
        /// The opcode of the truncated frame.
        opcode: u8,
        /// Bytes the opcode's length class declares.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// The frame's XOR fold, checksum included, did not come out as `0xFF`.
    #[error("checksum mismatch in frame with opcode {opcode:#04x}")]
    BadChecksum {
        /// The opcode of the corrupt frame.
        opcode: u8,
    },

    /// The first byte has its MSB clear; it is a data byte and declares no
    /// length class. Every actual opcode (`0x80..=0xFF`) has one.
    #[error("{byte:#04x} is a data byte, not an opcode")]
    UnknownLengthClass {
        /// The offending byte.
        byte: u8,
    },
}

/// The checksum byte completing a frame: XOR-fold of all preceding bytes,
/// inverted, so that the fold over the whole frame comes out as `0xFF`.
pub fn checksum(bytes: &[u8]) -> u8 {
    0xFF ^ bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Whether a complete frame, checksum included, folds to `0xFF`.
pub fn frame_intact(frame: &[u8]) -> bool {
    frame.iter().fold(0u8, |acc, b| acc ^ b) == 0xFF
}

/// Total frame length declared by an opcode.
///
/// Bits 7..5 give the length class: `0b100` is 2 bytes, `0b101` is 4,
/// `0b110` is 6 and `0b111` is variable, with `next` (the second frame byte)
/// holding the total length. Returns `None` for data bytes (MSB clear).
pub fn frame_length(opcode: u8, next: u8) -> Option<usize> {
    if opcode & 0x80 == 0 {
        return None;
    }
    Some(match (opcode >> 5) & 0x03 {
        0 => 2,
        1 => 4,
        2 => 6,
        _ => next as usize,
    })
}

fn low7(value: u16) -> u8 {
    (value & 0x7F) as u8
}

/// An 11-bit turnout address packed into two data bytes. Sensor reports
/// carry half the address here and the low bit in the DS bit (bit 5 of the
/// second byte).
pub(crate) fn packed_address(d1: u8, d2: u8) -> u16 {
    (d1 & 0x7F) as u16 | (((d2 & 0x0F) as u16) << 7)
}

/// Travel direction of a locomotive.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Running forward.
    Forward,
    /// Running in reverse.
    Reverse,
}

/// Commanded or reported position of a turnout.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SwitchPosition {
    /// The straight-through route.
    Closed,
    /// The diverging route.
    Thrown,
}

/// Level reported by a layout input such as an occupancy detector.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SensorLevel {
    /// The input is high.
    Active,
    /// The input is low.
    Inactive,
}

/// How the command station is using a slot, from the stat byte bits 4..5.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SlotUsage {
    /// Not in use.
    Free,
    /// Refreshed but not owned by a throttle.
    Common,
    /// Not refreshed.
    Idle,
    /// Owned by a throttle and refreshed.
    InUse,
}

/// Consist linkage of a slot, from the stat byte bits 6 and 3.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ConsistState {
    /// Not part of a consist.
    Free,
    /// Head of a consist.
    Top,
    /// Linked both up and down the consist chain.
    Mid,
    /// Linked up to another slot.
    Sub,
}

/// Payload shared by the slot read (`0xE7`) and slot write (`0xEF`) frames.
///
/// The raw `stat`, `dirf` and `snd` bit fields are kept as transmitted;
/// accessors decode them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SlotData {
    /// Slot number.
    pub slot: u8,
    /// Status byte: usage, consist linkage and speed-step code.
    pub stat: u8,
    /// Locomotive address, reassembled from the two 7-bit halves.
    pub address: u16,
    /// Current speed, 0..=127 (0 is stop, 1 is emergency stop).
    pub speed: u8,
    /// Direction and F0..F4 bit field.
    pub dirf: u8,
    /// Track status byte.
    pub trk: u8,
    /// Extended slot status.
    pub ss2: u8,
    /// F5..F8 bit field.
    pub snd: u8,
    /// Throttle id, low half.
    pub id1: u8,
    /// Throttle id, high half.
    pub id2: u8,
}

impl SlotData {
    /// Usage status from the stat byte.
    pub fn usage(&self) -> SlotUsage {
        match (self.stat >> 4) & 0x03 {
            0 => SlotUsage::Free,
            1 => SlotUsage::Common,
            2 => SlotUsage::Idle,
            _ => SlotUsage::InUse,
        }
    }

    /// Consist linkage from the stat byte.
    pub fn consist(&self) -> ConsistState {
        let up = self.stat & STAT_CONSIST_UP != 0;
        let down = self.stat & STAT_CONSIST_DOWN != 0;
        match (up, down) {
            (true, true) => ConsistState::Mid,
            (true, false) => ConsistState::Sub,
            (false, true) => ConsistState::Top,
            (false, false) => ConsistState::Free,
        }
    }

    /// Speed steps the decoder runs, from the stat byte bits 0..2.
    pub fn speed_steps(&self) -> u8 {
        match self.stat & 0x07 {
            2 => 14,
            3 | 7 => 128,
            _ => 28,
        }
    }

    /// Travel direction from the dirf byte.
    pub fn direction(&self) -> Direction {
        if self.dirf & DIRF_DIR != 0 {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }

    /// State of function `n` for `n` in 0..=8, `None` otherwise.
    pub fn function(&self, n: u8) -> Option<bool> {
        match n {
            0 => Some(self.dirf & DIRF_F0 != 0),
            1..=4 => Some(self.dirf & (1 << (n - 1)) != 0),
            5..=8 => Some(self.snd & (1 << (n - 5)) != 0),
            _ => None,
        }
    }

    fn decode(frame: &[u8]) -> Self {
        SlotData {
            slot: frame[2] & 0x7F,
            stat: frame[3] & 0x7F,
            address: (frame[4] & 0x7F) as u16 | (((frame[9] & 0x7F) as u16) << 7),
            speed: frame[5] & 0x7F,
            dirf: frame[6] & 0x7F,
            trk: frame[7] & 0x7F,
            ss2: frame[8] & 0x7F,
            snd: frame[10] & 0x7F,
            id1: frame[11] & 0x7F,
            id2: frame[12] & 0x7F,
        }
    }

    fn put(&self, opcode: u8, out: &mut Vec<u8>) {
        out.push(opcode);
        out.push(0x0E);
        out.push(self.slot & 0x7F);
        out.push(self.stat & 0x7F);
        out.push(low7(self.address));
        out.push(self.speed & 0x7F);
        out.push(self.dirf & 0x7F);
        out.push(self.trk & 0x7F);
        out.push(self.ss2 & 0x7F);
        out.push(((self.address >> 7) & 0x7F) as u8);
        out.push(self.snd & 0x7F);
        out.push(self.id1 & 0x7F);
        out.push(self.id2 & 0x7F);
    }
}

/// A contiguous block of function states carried by an immediate DCC packet.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FunctionBlock {
    /// The locomotive address the packet is for.
    pub address: u16,
    /// First function number in the block (9, 13 or 21).
    pub first: u8,
    /// Number of functions covered (4 or 8).
    pub count: u8,
    /// Function state bits, LSB first within the block.
    pub bits: u8,
}

/// One LocoNet frame, decoded.
///
/// Every variant round-trips through [`Message::encode`] and
/// [`Message::decode`] identity-equal, with the serialized length matching
/// the opcode's length class and a freshly computed checksum.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Message {
    /// Master busy (`0x81`).
    GpBusy,
    /// Global power off (`0x82`).
    GpOff,
    /// Global power on (`0x83`).
    GpOn,
    /// Set the speed of a slot (`0xA0`).
    LocoSpd {
        /// Slot number.
        slot: u8,
        /// Speed, 0..=127.
        speed: u8,
    },
    /// Set direction and F0..F4 of a slot (`0xA1`).
    LocoDirf {
        /// Slot number.
        slot: u8,
        /// Direction and function bit field.
        dirf: u8,
    },
    /// Set F5..F8 of a slot (`0xA2`).
    LocoSnd {
        /// Slot number.
        slot: u8,
        /// Function bit field.
        snd: u8,
    },
    /// Set F9..F12 of a slot (`0xA3`, DCC-ex style extension).
    LocoF912 {
        /// Slot number.
        slot: u8,
        /// Function bit field, bit 0 is F9.
        bits: u8,
    },
    /// Request a turnout change (`0xB0`).
    SwReq {
        /// Turnout address.
        address: u16,
        /// Requested position.
        position: SwitchPosition,
        /// Whether the point motor output is engaged.
        activate: bool,
    },
    /// Turnout state report (`0xB1`).
    SwRep {
        /// Turnout address.
        address: u16,
        /// Reported position.
        position: SwitchPosition,
        /// Whether the point motor output is engaged.
        engaged: bool,
    },
    /// Layout input report (`0xB2`).
    InputRep {
        /// Sensor address.
        address: u16,
        /// Reported level.
        level: SensorLevel,
    },
    /// Long acknowledge of a previous request (`0xB4`).
    LongAck {
        /// The opcode being acknowledged, MSB restored.
        opcode: u8,
        /// Acknowledge code; 0 is a rejection.
        code: u8,
    },
    /// Request slot data for a slot number (`0xBB`).
    RqSlData {
        /// Slot number.
        slot: u8,
    },
    /// Request the state of a turnout (`0xBC`).
    SwState {
        /// Turnout address.
        address: u16,
    },
    /// Request a slot for a locomotive address (`0xBF`).
    LocoAdr {
        /// Locomotive address, 14 bit.
        address: u16,
    },
    /// Capture-file timestamp pseudo-message (`0xC0`).
    ///
    /// Never seen on a live bus; written by the capture sink and consumed by
    /// the replay pacer.
    CaptureTimeStamp {
        /// Hour, 0..24.
        hour: u8,
        /// Minute, 0..60.
        minute: u8,
        /// Second, 0..60.
        second: u8,
        /// Hundredths of a second, 0..100.
        hundredths: u8,
    },
    /// Slot data read back from the command station (`0xE7`).
    SlotRdData(SlotData),
    /// Slot data written to the command station (`0xEF`).
    WrSlData(SlotData),
    /// An immediate DCC packet (`0xED`), carried to and from the track.
    ImmPacket {
        /// Repeat count for the packet, 0..=15.
        repeats: u8,
        /// The DCC packet bytes with their MSBs restored, at most 5.
        dcc: Vec<u8>,
    },
    /// A well-framed message whose opcode this library does not interpret.
    Unknown {
        /// The opcode.
        opcode: u8,
        /// The data bytes between opcode and checksum.
        data: Vec<u8>,
    },
}

impl Message {
    /// Decode exactly one frame starting at offset 0.
    ///
    /// Trailing bytes beyond the declared frame length are ignored.
    pub fn decode(frame: &[u8]) -> Result<Message, DecodeError> {
        let Some(&opcode) = frame.first() else {
            return Err(DecodeError::TooShort {
                opcode: 0,
                expected: 2,
                actual: 0,
            });
        };
        let next = frame.get(1).copied().unwrap_or(0);
        let expected =
            frame_length(opcode, next).ok_or(DecodeError::UnknownLengthClass { byte: opcode })?;
        if expected < 2 || frame.len() < expected {
            return Err(DecodeError::TooShort {
                opcode,
                expected: expected.max(2),
                actual: frame.len(),
            });
        }
        let frame = &frame[..expected];
        if !frame_intact(frame) {
            return Err(DecodeError::BadChecksum { opcode });
        }

        Ok(match (opcode, expected) {
            (OPC_GPBUSY, _) => Message::GpBusy,
            (OPC_GPOFF, _) => Message::GpOff,
            (OPC_GPON, _) => Message::GpOn,
            (OPC_LOCO_SPD, _) => Message::LocoSpd {
                slot: frame[1] & 0x7F,
                speed: frame[2] & 0x7F,
            },
            (OPC_LOCO_DIRF, _) => Message::LocoDirf {
                slot: frame[1] & 0x7F,
                dirf: frame[2] & 0x7F,
            },
            (OPC_LOCO_SND, _) => Message::LocoSnd {
                slot: frame[1] & 0x7F,
                snd: frame[2] & 0x7F,
            },
            (OPC_LOCO_F912, _) => Message::LocoF912 {
                slot: frame[1] & 0x7F,
                bits: frame[2] & 0x0F,
            },
            (OPC_SW_REQ, _) => Message::SwReq {
                address: packed_address(frame[1], frame[2]),
                position: switch_position(frame[2]),
                activate: frame[2] & SW_ON != 0,
            },
            (OPC_SW_REP, _) => Message::SwRep {
                address: packed_address(frame[1], frame[2]),
                position: switch_position(frame[2]),
                engaged: frame[2] & SW_ON != 0,
            },
            (OPC_INPUT_REP, _) => {
                let raw = packed_address(frame[1], frame[2]);
                Message::InputRep {
                    address: (raw << 1) | ((frame[2] >> 5) & 1) as u16,
                    level: if frame[2] & INPUT_LEVEL != 0 {
                        SensorLevel::Active
                    } else {
                        SensorLevel::Inactive
                    },
                }
            }
            (OPC_LONG_ACK, _) => Message::LongAck {
                opcode: frame[1] | 0x80,
                code: frame[2] & 0x7F,
            },
            (OPC_RQ_SL_DATA, _) => Message::RqSlData {
                slot: frame[1] & 0x7F,
            },
            (OPC_SW_STATE, _) => Message::SwState {
                address: packed_address(frame[1], frame[2]),
            },
            (OPC_LOCO_ADR, _) => Message::LocoAdr {
                address: ((frame[1] & 0x7F) as u16) << 7 | (frame[2] & 0x7F) as u16,
            },
            (OPC_TIMESTAMP, 6) => Message::CaptureTimeStamp {
                hour: frame[1] & 0x7F,
                minute: frame[2] & 0x7F,
                second: frame[3] & 0x7F,
                hundredths: frame[4] & 0x7F,
            },
            (OPC_SL_RD_DATA, 14) => Message::SlotRdData(SlotData::decode(frame)),
            (OPC_WR_SL_DATA, 14) => Message::WrSlData(SlotData::decode(frame)),
            (OPC_IMM_PACKET, 11) if frame[2] == 0x7F => {
                let count = ((frame[3] >> 4) & 0x07).min(5) as usize;
                let dhi = frame[4];
                let dcc = (0..count)
                    .map(|i| frame[5 + i] & 0x7F | ((dhi >> i) & 1) << 7)
                    .collect();
                Message::ImmPacket {
                    repeats: frame[3] & 0x0F,
                    dcc,
                }
            }
            _ => Message::Unknown {
                opcode,
                data: frame[1..expected - 1].to_vec(),
            },
        })
    }

    /// Encode into a complete frame with a freshly computed checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        match self {
            Message::GpBusy => out.push(OPC_GPBUSY),
            Message::GpOff => out.push(OPC_GPOFF),
            Message::GpOn => out.push(OPC_GPON),
            Message::LocoSpd { slot, speed } => {
                out.extend_from_slice(&[OPC_LOCO_SPD, slot & 0x7F, speed & 0x7F]);
            }
            Message::LocoDirf { slot, dirf } => {
                out.extend_from_slice(&[OPC_LOCO_DIRF, slot & 0x7F, dirf & 0x7F]);
            }
            Message::LocoSnd { slot, snd } => {
                out.extend_from_slice(&[OPC_LOCO_SND, slot & 0x7F, snd & 0x7F]);
            }
            Message::LocoF912 { slot, bits } => {
                out.extend_from_slice(&[OPC_LOCO_F912, slot & 0x7F, bits & 0x0F]);
            }
            Message::SwReq {
                address,
                position,
                activate,
            } => {
                out.push(OPC_SW_REQ);
                out.push(low7(*address));
                out.push(switch_argument(*address, *position, *activate));
            }
            Message::SwRep {
                address,
                position,
                engaged,
            } => {
                out.push(OPC_SW_REP);
                out.push(low7(*address));
                out.push(switch_argument(*address, *position, *engaged));
            }
            Message::InputRep { address, level } => {
                out.push(OPC_INPUT_REP);
                let half = address >> 1;
                out.push(low7(half));
                let mut d2 = ((half >> 7) & 0x0F) as u8 | ((address & 1) as u8) << 5;
                if *level == SensorLevel::Active {
                    d2 |= INPUT_LEVEL;
                }
                out.push(d2);
            }
            Message::LongAck { opcode, code } => {
                out.extend_from_slice(&[OPC_LONG_ACK, opcode & 0x7F, code & 0x7F]);
            }
            Message::RqSlData { slot } => {
                out.extend_from_slice(&[OPC_RQ_SL_DATA, slot & 0x7F, 0]);
            }
            Message::SwState { address } => {
                out.push(OPC_SW_STATE);
                out.push(low7(*address));
                out.push(((address >> 7) & 0x0F) as u8);
            }
            Message::LocoAdr { address } => {
                out.push(OPC_LOCO_ADR);
                out.push(((address >> 7) & 0x7F) as u8);
                out.push(low7(*address));
            }
            Message::CaptureTimeStamp {
                hour,
                minute,
                second,
                hundredths,
            } => {
                out.extend_from_slice(&[
                    OPC_TIMESTAMP,
                    hour & 0x7F,
                    minute & 0x7F,
                    second & 0x7F,
                    hundredths & 0x7F,
                ]);
            }
            Message::SlotRdData(data) => data.put(OPC_SL_RD_DATA, &mut out),
            Message::WrSlData(data) => data.put(OPC_WR_SL_DATA, &mut out),
            Message::ImmPacket { repeats, dcc } => {
                out.extend_from_slice(&[OPC_IMM_PACKET, 0x0B, 0x7F]);
                out.push(((dcc.len() as u8 & 0x07) << 4) | (repeats & 0x0F));
                let mut dhi = 0u8;
                for (i, byte) in dcc.iter().enumerate() {
                    dhi |= (byte >> 7) << i;
                }
                out.push(dhi);
                for i in 0..5 {
                    out.push(dcc.get(i).copied().unwrap_or(0) & 0x7F);
                }
            }
            Message::Unknown { opcode, data } => {
                out.push(*opcode);
                out.extend_from_slice(data);
            }
        }
        out.push(checksum(&out));
        out
    }

    /// The opcode this message serializes under.
    pub fn opcode(&self) -> u8 {
        match self {
            Message::GpBusy => OPC_GPBUSY,
            Message::GpOff => OPC_GPOFF,
            Message::GpOn => OPC_GPON,
            Message::LocoSpd { .. } => OPC_LOCO_SPD,
            Message::LocoDirf { .. } => OPC_LOCO_DIRF,
            Message::LocoSnd { .. } => OPC_LOCO_SND,
            Message::LocoF912 { .. } => OPC_LOCO_F912,
            Message::SwReq { .. } => OPC_SW_REQ,
            Message::SwRep { .. } => OPC_SW_REP,
            Message::InputRep { .. } => OPC_INPUT_REP,
            Message::LongAck { .. } => OPC_LONG_ACK,
            Message::RqSlData { .. } => OPC_RQ_SL_DATA,
            Message::SwState { .. } => OPC_SW_STATE,
            Message::LocoAdr { .. } => OPC_LOCO_ADR,
            Message::CaptureTimeStamp { .. } => OPC_TIMESTAMP,
            Message::SlotRdData(_) => OPC_SL_RD_DATA,
            Message::WrSlData(_) => OPC_WR_SL_DATA,
            Message::ImmPacket { .. } => OPC_IMM_PACKET,
            Message::Unknown { opcode, .. } => *opcode,
        }
    }

    /// A timestamp pseudo-message for the given wall-clock time.
    pub fn timestamp(time: chrono::NaiveTime) -> Message {
        Message::CaptureTimeStamp {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
            second: time.second() as u8,
            hundredths: (time.nanosecond() / 10_000_000).min(99) as u8,
        }
    }

    /// For a timestamp pseudo-message, the time of day in hundredths of a
    /// second. `None` for every other variant.
    pub fn hundredths_of_day(&self) -> Option<u32> {
        let Message::CaptureTimeStamp {
            hour,
            minute,
            second,
            hundredths,
        } = self
        else {
            return None;
        };
        let seconds = *hour as u32 * 3600 + *minute as u32 * 60 + *second as u32;
        Some(seconds * 100 + *hundredths as u32)
    }

    /// The function block carried by an immediate DCC packet, if this is one
    /// carrying a function group.
    pub fn function_block(&self) -> Option<FunctionBlock> {
        let Message::ImmPacket { dcc, .. } = self else {
            return None;
        };
        dcc_function_block(dcc)
    }

    /// An immediate packet setting a block of functions on a locomotive.
    ///
    /// `block.first` must be 9, 13 or 21 (the DCC function groups above F8).
    pub fn imm_function_block(block: FunctionBlock, repeats: u8) -> Message {
        let mut dcc = Vec::with_capacity(4);
        if block.address > 127 {
            dcc.push(0xC0 | ((block.address >> 8) as u8 & 0x3F));
            dcc.push(block.address as u8);
        } else {
            dcc.push(block.address as u8 & 0x7F);
        }
        match block.first {
            9 => dcc.push(0xA0 | (block.bits & 0x0F)),
            13 => {
                dcc.push(0xDE);
                dcc.push(block.bits);
            }
            _ => {
                dcc.push(0xDF);
                dcc.push(block.bits);
            }
        }
        Message::ImmPacket { repeats, dcc }
    }
}

fn switch_position(d2: u8) -> SwitchPosition {
    if d2 & SW_DIR != 0 {
        SwitchPosition::Thrown
    } else {
        SwitchPosition::Closed
    }
}

fn switch_argument(address: u16, position: SwitchPosition, on: bool) -> u8 {
    let mut d2 = ((address >> 7) & 0x0F) as u8;
    if position == SwitchPosition::Thrown {
        d2 |= SW_DIR;
    }
    if on {
        d2 |= SW_ON;
    }
    d2
}

/// Extract a function group from a raw DCC packet: the short or long address,
/// then either a function-group-two instruction (`101 0 DDDD`, F9..F12) or an
/// expansion instruction (`0xDE` F13..F20, `0xDF` F21..F28).
fn dcc_function_block(dcc: &[u8]) -> Option<FunctionBlock> {
    let first = *dcc.first()?;
    let (address, rest) = if first & 0xC0 == 0xC0 {
        let hi = (first & 0x3F) as u16;
        (hi << 8 | *dcc.get(1)? as u16, dcc.get(2..)?)
    } else {
        ((first & 0x7F) as u16, &dcc[1..])
    };
    let instruction = *rest.first()?;
    match instruction {
        0xDE => Some(FunctionBlock {
            address,
            first: 13,
            count: 8,
            bits: *rest.get(1)?,
        }),
        0xDF => Some(FunctionBlock {
            address,
            first: 21,
            count: 8,
            bits: *rest.get(1)?,
        }),
        _ if instruction & 0xF0 == 0xA0 => Some(FunctionBlock {
            address,
            first: 9,
            count: 4,
            bits: instruction & 0x0F,
        }),
        _ => None,
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::GpBusy => write!(f, "GpBusy"),
            Message::GpOff => write!(f, "GpOff"),
            Message::GpOn => write!(f, "GpOn"),
            Message::LocoSpd { slot, speed } => write!(f, "LocoSpd(slot={slot}, speed={speed})"),
            Message::LocoDirf { slot, dirf } => {
                write!(f, "LocoDirf(slot={slot}, dirf={dirf:#04x})")
            }
            Message::LocoSnd { slot, snd } => write!(f, "LocoSnd(slot={slot}, snd={snd:#04x})"),
            Message::LocoF912 { slot, bits } => {
                write!(f, "LocoF912(slot={slot}, bits={bits:#04x})")
            }
            Message::SwReq {
                address,
                position,
                activate,
            } => write!(
                f,
                "SwReq(address={}, {position:?}, activate={activate})",
                address + 1
            ),
            Message::SwRep {
                address,
                position,
                engaged,
            } => write!(
                f,
                "SwRep(address={}, {position:?}, engaged={engaged})",
                address + 1
            ),
            Message::InputRep { address, level } => {
                write!(f, "InputRep(address={}, {level:?})", address + 1)
            }
            Message::LongAck { opcode, code } => {
                write!(f, "LongAck(opcode={opcode:#04x}, code={code})")
            }
            Message::RqSlData { slot } => write!(f, "RqSlData(slot={slot})"),
            Message::SwState { address } => write!(f, "SwState(address={})", address + 1),
            Message::LocoAdr { address } => write!(f, "LocoAdr(address={address})"),
            Message::CaptureTimeStamp {
                hour,
                minute,
                second,
                hundredths,
            } => write!(
                f,
                "CaptureTimeStamp({hour:02}:{minute:02}:{second:02}.{hundredths:02})"
            ),
            Message::SlotRdData(data) => write!(
                f,
                "SlRdData(slot={}, address={}, speed={}, {:?})",
                data.slot,
                data.address,
                data.speed,
                data.usage()
            ),
            Message::WrSlData(data) => write!(
                f,
                "WrSlData(slot={}, address={}, speed={})",
                data.slot, data.address, data.speed
            ),
            Message::ImmPacket { repeats, dcc } => {
                write!(f, "ImmPacket(repeats={repeats}, dcc={dcc:02x?})")
            }
            Message::Unknown { opcode, data } => {
                write!(f, "Unknown(opcode={opcode:#04x}, data={data:02x?})")
            }
        }
    }
}
