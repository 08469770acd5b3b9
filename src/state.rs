use std::collections::BTreeMap;
use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::message::{ConsistState, Direction, SensorLevel, SlotData, SlotUsage, SwitchPosition};

/// Observed state of a layout input.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SensorState {
    /// The input is high (e.g. the block is occupied).
    Active,
    /// The input is low.
    Inactive,
    /// Not reported yet.
    Unknown,
}

impl From<SensorLevel> for SensorState {
    fn from(level: SensorLevel) -> Self {
        match level {
            SensorLevel::Active => SensorState::Active,
            SensorLevel::Inactive => SensorState::Inactive,
        }
    }
}

/// A layout input such as an occupancy detector, reported via input reports.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    /// Sensor address as transmitted (0-based).
    pub address: u16,
    /// Last reported level.
    pub state: SensorState,
}

impl Sensor {
    /// A sensor that has not reported yet.
    pub fn new(address: u16) -> Self {
        Self {
            address,
            state: SensorState::Unknown,
        }
    }
}

impl Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.state {
            SensorState::Active => "ON",
            SensorState::Inactive => "OFF",
            SensorState::Unknown => "?",
        };
        write!(f, "Sensor({:2}) = {level}", self.address + 1)
    }
}

/// Observed position of a turnout.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SwitchState {
    /// Lined for the straight-through route.
    Closed,
    /// Lined for the diverging route.
    Thrown,
    /// Not reported yet.
    Unknown,
}

impl From<SwitchPosition> for SwitchState {
    fn from(position: SwitchPosition) -> Self {
        match position {
            SwitchPosition::Closed => SwitchState::Closed,
            SwitchPosition::Thrown => SwitchState::Thrown,
        }
    }
}

/// A powered turnout, mirrored from switch requests and reports.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Switch {
    /// Turnout address as transmitted (0-based).
    pub address: u16,
    /// Last commanded or reported position.
    pub state: SwitchState,
    /// Whether the point motor output was engaged last we heard.
    pub engaged: bool,
}

impl Switch {
    /// A turnout that has not reported yet.
    pub fn new(address: u16) -> Self {
        Self {
            address,
            state: SwitchState::Unknown,
            engaged: false,
        }
    }
}

impl Display for Switch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let position = match self.state {
            SwitchState::Closed => "CLOSED",
            SwitchState::Thrown => "THROWN",
            SwitchState::Unknown => "?",
        };
        write!(f, "Switch(address={}, position={position})", self.address + 1)
    }
}

/// One entry of the command station's locomotive slot table.
///
/// Slots 1..=119 are usable; 0 and 120 and up are reserved by the station.
/// A slot is created on the first slot-data read that mentions it and is
/// kept for the life of the process; going [`SlotUsage::Free`] only changes
/// its status.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// Slot number.
    pub slot: u8,
    /// Locomotive address occupying the slot.
    pub address: u16,
    /// Raw speed, 0..=127 (0 is stop, 1 is emergency stop).
    pub speed: u8,
    /// Travel direction.
    pub direction: Direction,
    /// Usage status.
    pub status: SlotUsage,
    /// Consist linkage.
    pub consist: ConsistState,
    /// Speed steps the decoder runs (14, 28 or 128).
    pub speed_steps: u8,
    /// Function states, F0 and up. Absent means never reported.
    pub functions: BTreeMap<u8, bool>,
    /// Raw track status byte from the last slot read.
    pub trk: u8,
    /// Raw extended status byte from the last slot read.
    pub ss2: u8,
    /// Throttle id, low half.
    pub id1: u8,
    /// Throttle id, high half.
    pub id2: u8,
}

impl Slot {
    /// Build a slot entry from a full slot-data payload.
    pub fn from_slot_data(data: &SlotData) -> Self {
        let mut slot = Slot {
            slot: data.slot,
            address: data.address,
            speed: data.speed,
            direction: data.direction(),
            status: data.usage(),
            consist: data.consist(),
            speed_steps: data.speed_steps(),
            functions: BTreeMap::new(),
            trk: data.trk,
            ss2: data.ss2,
            id1: data.id1,
            id2: data.id2,
        };
        for n in 0..=8 {
            slot.functions.insert(n, data.function(n).unwrap_or(false));
        }
        slot
    }

    /// Overwrite this entry with a full slot-data payload, keeping any
    /// F9..F28 states that slot data does not carry.
    pub fn apply_slot_data(&mut self, data: &SlotData) {
        self.address = data.address;
        self.speed = data.speed;
        self.direction = data.direction();
        self.status = data.usage();
        self.consist = data.consist();
        self.speed_steps = data.speed_steps();
        self.trk = data.trk;
        self.ss2 = data.ss2;
        self.id1 = data.id1;
        self.id2 = data.id2;
        for n in 0..=8 {
            self.functions.insert(n, data.function(n).unwrap_or(false));
        }
    }

    /// Apply a direction/F0..F4 bit field.
    pub fn apply_dirf(&mut self, dirf: u8) {
        self.direction = if dirf & 0x20 != 0 {
            Direction::Reverse
        } else {
            Direction::Forward
        };
        self.functions.insert(0, dirf & 0x10 != 0);
        for n in 1..=4 {
            self.functions.insert(n, dirf & (1 << (n - 1)) != 0);
        }
    }

    /// Apply an F5..F8 bit field.
    pub fn apply_snd(&mut self, snd: u8) {
        for n in 5..=8u8 {
            self.functions.insert(n, snd & (1 << (n - 5)) != 0);
        }
    }

    /// Apply a block of function bits starting at function `first`.
    pub fn apply_function_block(&mut self, first: u8, count: u8, bits: u8) {
        for i in 0..count.min(8) {
            self.functions.insert(first + i, bits & (1 << i) != 0);
        }
    }

    /// State of function `n`; unreported functions read as off.
    pub fn function(&self, n: u8) -> bool {
        self.functions.get(&n).copied().unwrap_or(false)
    }

    /// Record the state of function `n` locally.
    pub fn set_function(&mut self, n: u8, on: bool) {
        self.functions.insert(n, on);
    }

    /// The direction/F0..F4 bit field for this entry.
    pub fn dirf_byte(&self) -> u8 {
        let mut dirf = 0u8;
        if self.direction == Direction::Reverse {
            dirf |= 0x20;
        }
        if self.function(0) {
            dirf |= 0x10;
        }
        for n in 1..=4u8 {
            if self.function(n) {
                dirf |= 1 << (n - 1);
            }
        }
        dirf
    }

    /// The F5..F8 bit field for this entry.
    pub fn snd_byte(&self) -> u8 {
        let mut snd = 0u8;
        for n in 5..=8u8 {
            if self.function(n) {
                snd |= 1 << (n - 5);
            }
        }
        snd
    }

    /// The F9..F12 bit field for this entry.
    pub fn f912_bits(&self) -> u8 {
        let mut bits = 0u8;
        for n in 9..=12u8 {
            if self.function(n) {
                bits |= 1 << (n - 9);
            }
        }
        bits
    }

    /// Bits for the F13..F20 or F21..F28 group starting at `first`.
    pub fn function_group_bits(&self, first: u8) -> u8 {
        let mut bits = 0u8;
        for i in 0..8u8 {
            if self.function(first + i) {
                bits |= 1 << i;
            }
        }
        bits
    }

    /// Reassemble the wire payload for a slot write.
    pub fn to_slot_data(&self) -> SlotData {
        let usage = match self.status {
            SlotUsage::Free => 0,
            SlotUsage::Common => 1,
            SlotUsage::Idle => 2,
            SlotUsage::InUse => 3,
        };
        let steps = match self.speed_steps {
            14 => 2,
            128 => 3,
            _ => 0,
        };
        let consist = match self.consist {
            ConsistState::Free => 0,
            ConsistState::Top => 0x08,
            ConsistState::Sub => 0x40,
            ConsistState::Mid => 0x48,
        };
        SlotData {
            slot: self.slot,
            stat: (usage << 4) | steps | consist,
            address: self.address,
            speed: self.speed,
            dirf: self.dirf_byte(),
            trk: self.trk,
            ss2: self.ss2,
            snd: self.snd_byte(),
            id1: self.id1,
            id2: self.id2,
        }
    }

    /// Whether the command station currently considers the slot unused.
    pub fn is_free(&self) -> bool {
        self.status == SlotUsage::Free
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let functions = (0..=12u8)
            .map(|n| format!("f{n}:{}", if self.function(n) { "ON" } else { "OFF" }))
            .join(" ");
        write!(
            f,
            "Slot({:2}): loc={}, dir={}, speed={}/{}, [{functions}]",
            self.slot,
            self.address,
            match self.direction {
                Direction::Forward => "FORWARD",
                Direction::Reverse => "REVERSE",
            },
            self.speed,
            self.speed_steps,
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn slot_data() -> SlotData {
        SlotData {
            slot: 7,
            stat: 0x33,
            address: 3,
            speed: 20,
            dirf: 0x12,
            trk: 0x07,
            ss2: 0,
            snd: 0x03,
            id1: 0,
            id2: 0,
        }
    }

    #[test]
    fn slot_mirrors_slot_data() {
        let slot = Slot::from_slot_data(&slot_data());
        assert_eq!(slot.slot, 7);
        assert_eq!(slot.address, 3);
        assert_eq!(slot.speed, 20);
        assert_eq!(slot.direction, Direction::Forward);
        assert_eq!(slot.status, SlotUsage::InUse);
        assert_eq!(slot.speed_steps, 128);
        assert!(slot.function(0));
        assert!(slot.function(2));
        assert!(slot.function(5));
        assert!(slot.function(6));
        assert!(!slot.function(7));
    }

    #[test]
    fn slot_data_reassembles() {
        let slot = Slot::from_slot_data(&slot_data());
        let data = slot.to_slot_data();
        assert_eq!(data.slot, 7);
        assert_eq!(data.address, 3);
        assert_eq!(data.dirf, 0x12);
        assert_eq!(data.snd, 0x03);
        assert_eq!(data.usage(), SlotUsage::InUse);
        assert_eq!(data.speed_steps(), 128);
    }

    #[test]
    fn function_blocks_extend_the_map() {
        let mut slot = Slot::from_slot_data(&slot_data());
        slot.apply_function_block(9, 4, 0b0110);
        assert!(!slot.function(9));
        assert!(slot.function(10));
        assert!(slot.function(11));
        assert!(!slot.function(12));

        slot.apply_function_block(21, 8, 0x81);
        assert!(slot.function(21));
        assert!(slot.function(28));
        assert!(!slot.function(22));

        assert_eq!(slot.f912_bits(), 0b0110);
        assert_eq!(slot.function_group_bits(21), 0x81);
    }

    #[test]
    fn dirf_byte_round_trips() {
        let mut slot = Slot::from_slot_data(&slot_data());
        slot.direction = Direction::Reverse;
        slot.set_function(0, false);
        slot.set_function(3, true);
        let dirf = slot.dirf_byte();

        let mut other = Slot::from_slot_data(&slot_data());
        other.apply_dirf(dirf);
        assert_eq!(other.direction, Direction::Reverse);
        assert!(!other.function(0));
        assert!(other.function(3));
    }
}
