use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::interface::Interface;
use crate::message::{
    Direction, FunctionBlock, Message, SensorLevel, SlotData, SwitchPosition,
};
use crate::state::{Sensor, SensorState, Slot, Switch, SwitchState};

const STATUS_REQUEST_RETRIES: u32 = 3;
const STATUS_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const IMM_PACKET_REPEATS: u8 = 2;

/// The live mirror of bus-observable layout state.
///
/// One instance consumes the interface's inbound stream and keeps three
/// collections — sensors, switches, slots — each behind its own lock so
/// sensor traffic never contends with slot traffic. Commands referencing an
/// entity the mirror has not seen yet first put the matching status request
/// on the bus and wait (bounded) for the reply to land.
pub struct Scrollkeeper {
    interface: Arc<Interface>,
    sensors: Mutex<HashMap<u16, Sensor>>,
    sensors_changed: Notify,
    switches: Mutex<HashMap<u16, Switch>>,
    switches_changed: Notify,
    slots: Mutex<HashMap<u8, Slot>>,
    slots_changed: Notify,
    last_ack: Mutex<Option<(u8, u8)>>,
    slot_trace: bool,
}

impl Scrollkeeper {
    /// A mirror bound to an interface. With `slot_trace` on, a full report
    /// is printed after every slot update, the way the monitor does it.
    pub fn new(interface: Arc<Interface>, slot_trace: bool) -> Arc<Self> {
        Arc::new(Self {
            interface,
            sensors: Mutex::new(HashMap::new()),
            sensors_changed: Notify::new(),
            switches: Mutex::new(HashMap::new()),
            switches_changed: Notify::new(),
            slots: Mutex::new(HashMap::new()),
            slots_changed: Notify::new(),
            last_ack: Mutex::new(None),
            slot_trace,
        })
    }

    /// Subscribe to the interface and spawn the mirror task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let messages = self.interface.subscribe();
        tokio::spawn(self.run(messages))
    }

    async fn run(self: Arc<Self>, mut messages: broadcast::Receiver<Message>) {
        loop {
            match messages.recv().await {
                Ok(message) => self.on_message(&message).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "state mirror lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("state mirror finished");
    }

    /// Apply one inbound message to the mirror.
    ///
    /// Messages that update a slot the mirror does not know yet trigger a
    /// slot-data request instead, so the next refresh fills the gap.
    pub async fn on_message(&self, message: &Message) {
        match message {
            Message::InputRep { address, level } => {
                self.update_sensor(*address, SensorState::from(*level));
            }
            Message::SwReq {
                address,
                position,
                activate,
            } => {
                self.update_switch(*address, SwitchState::from(*position), *activate);
            }
            Message::SwRep {
                address,
                position,
                engaged,
            } => {
                self.update_switch(*address, SwitchState::from(*position), *engaged);
            }
            Message::LongAck { opcode, code } => {
                trace!(opcode = *opcode, code = *code, "acknowledge");
                *self.last_ack.lock().expect("ack lock poisoned") = Some((*opcode, *code));
            }
            Message::SlotRdData(data) | Message::WrSlData(data) => {
                self.update_slot_data(data);
            }
            Message::LocoSpd { slot, speed } => {
                if !self.apply_to_slot(*slot, |entry| entry.speed = *speed) {
                    self.request_slot_data(*slot).await;
                }
            }
            Message::LocoDirf { slot, dirf } => {
                if !self.apply_to_slot(*slot, |entry| entry.apply_dirf(*dirf)) {
                    self.request_slot_data(*slot).await;
                }
            }
            Message::LocoSnd { slot, snd } => {
                if !self.apply_to_slot(*slot, |entry| entry.apply_snd(*snd)) {
                    self.request_slot_data(*slot).await;
                }
            }
            Message::LocoF912 { slot, bits } => {
                if !self.apply_to_slot(*slot, |entry| entry.apply_function_block(9, 4, *bits)) {
                    self.request_slot_data(*slot).await;
                }
            }
            Message::ImmPacket { .. } => {
                if let Some(block) = message.function_block() {
                    self.apply_to_address(block.address, |entry| {
                        entry.apply_function_block(block.first, block.count, block.bits)
                    });
                }
            }
            // Requests from other throttles and power messages carry no
            // entity state; timestamps only matter to the replay pacer.
            Message::GpBusy
            | Message::GpOff
            | Message::GpOn
            | Message::RqSlData { .. }
            | Message::SwState { .. }
            | Message::LocoAdr { .. }
            | Message::CaptureTimeStamp { .. } => {}
            Message::Unknown { opcode, .. } => {
                trace!(opcode = *opcode, "no state update for unrecognized message");
            }
        }
    }

    /// A copy of the mirrored sensor, if it has been observed.
    pub fn get_sensor(&self, address: u16) -> Option<Sensor> {
        self.sensors
            .lock()
            .expect("sensor lock poisoned")
            .get(&address)
            .copied()
    }

    /// A copy of the mirrored switch, if it has been observed.
    pub fn get_switch(&self, address: u16) -> Option<Switch> {
        self.switches
            .lock()
            .expect("switch lock poisoned")
            .get(&address)
            .copied()
    }

    /// A copy of the mirrored slot, if it has been observed.
    pub fn get_slot(&self, slot: u8) -> Option<Slot> {
        self.slots
            .lock()
            .expect("slot lock poisoned")
            .get(&slot)
            .cloned()
    }

    /// Copies of all observed sensors, ordered by address.
    pub fn sensors(&self) -> Vec<Sensor> {
        let mut sensors: Vec<_> = self
            .sensors
            .lock()
            .expect("sensor lock poisoned")
            .values()
            .copied()
            .collect();
        sensors.sort_by_key(|sensor| sensor.address);
        sensors
    }

    /// Copies of all observed switches, ordered by address.
    pub fn switches(&self) -> Vec<Switch> {
        let mut switches: Vec<_> = self
            .switches
            .lock()
            .expect("switch lock poisoned")
            .values()
            .copied()
            .collect();
        switches.sort_by_key(|switch| switch.address);
        switches
    }

    /// Copies of all observed slots, ordered by slot number.
    pub fn slots(&self) -> Vec<Slot> {
        let mut slots: Vec<_> = self
            .slots
            .lock()
            .expect("slot lock poisoned")
            .values()
            .cloned()
            .collect();
        slots.sort_by_key(|slot| slot.slot);
        slots
    }

    /// The most recent long acknowledge as `(opcode, code)`; a code of 0 is
    /// a rejection.
    pub fn last_ack(&self) -> Option<(u8, u8)> {
        *self.last_ack.lock().expect("ack lock poisoned")
    }

    /// Command a turnout. An unknown turnout is first resolved with a
    /// switch-state request.
    pub async fn set_switch(&self, address: u16, position: SwitchPosition) -> Result<(), Error> {
        if address > 0x7FF {
            return Err(Error::InvalidArgument(format!(
                "switch address {address} does not fit 11 bits"
            )));
        }
        self.request_until(&self.switches_changed, Message::SwState { address }, || {
            self.switch_known(address)
        })
        .await
        .map_err(|e| Self::unknown(e, format!("switch {}", address + 1)))?;
        self.interface
            .send(Message::SwReq {
                address,
                position,
                activate: true,
            })
            .await
    }

    /// Set a locomotive's speed. Without a known slot for the address, a
    /// slot request goes out first and the command waits for the reply.
    pub async fn set_loco_speed(&self, address: u16, speed: u8) -> Result<(), Error> {
        if speed > 127 {
            return Err(Error::InvalidArgument(format!(
                "speed {speed} is out of 0..=127"
            )));
        }
        let slot = self.find_slot(address).await?;
        self.interface.send(Message::LocoSpd { slot, speed }).await
    }

    /// Set a locomotive's direction, keeping its F0..F4 states.
    pub async fn set_loco_direction(&self, address: u16, direction: Direction) -> Result<(), Error> {
        let slot = self.find_slot(address).await?;
        let mut entry = self
            .get_slot(slot)
            .ok_or_else(|| Error::UnknownEntity(format!("slot {slot}")))?;
        entry.direction = direction;
        self.interface
            .send(Message::LocoDirf {
                slot,
                dirf: entry.dirf_byte(),
            })
            .await
    }

    /// Set one locomotive function, F0..=F28.
    ///
    /// F0..F8 go out as the classic dirf/snd frames; the higher groups ride
    /// in immediate DCC packets.
    pub async fn set_loco_function(
        &self,
        address: u16,
        function: u8,
        on: bool,
    ) -> Result<(), Error> {
        if function > 28 {
            return Err(Error::InvalidArgument(format!(
                "function F{function} is out of F0..=F28"
            )));
        }
        let slot = self.find_slot(address).await?;
        let mut entry = self
            .get_slot(slot)
            .ok_or_else(|| Error::UnknownEntity(format!("slot {slot}")))?;
        entry.set_function(function, on);

        let message = match function {
            0..=4 => Message::LocoDirf {
                slot,
                dirf: entry.dirf_byte(),
            },
            5..=8 => Message::LocoSnd {
                slot,
                snd: entry.snd_byte(),
            },
            9..=12 => Message::imm_function_block(
                FunctionBlock {
                    address,
                    first: 9,
                    count: 4,
                    bits: entry.f912_bits(),
                },
                IMM_PACKET_REPEATS,
            ),
            13..=20 => Message::imm_function_block(
                FunctionBlock {
                    address,
                    first: 13,
                    count: 8,
                    bits: entry.function_group_bits(13),
                },
                IMM_PACKET_REPEATS,
            ),
            _ => Message::imm_function_block(
                FunctionBlock {
                    address,
                    first: 21,
                    count: 8,
                    bits: entry.function_group_bits(21),
                },
                IMM_PACKET_REPEATS,
            ),
        };
        self.interface.send(message).await
    }

    /// Write the whole mirrored slot back with a new direction and speed,
    /// the way a throttle hands over a locomotive.
    pub async fn write_slot(
        &self,
        address: u16,
        direction: Direction,
        speed: u8,
    ) -> Result<(), Error> {
        if speed > 127 {
            return Err(Error::InvalidArgument(format!(
                "speed {speed} is out of 0..=127"
            )));
        }
        let slot = self.find_slot(address).await?;
        let mut entry = self
            .get_slot(slot)
            .ok_or_else(|| Error::UnknownEntity(format!("slot {slot}")))?;
        entry.direction = direction;
        entry.speed = speed;
        self.interface
            .send(Message::WrSlData(entry.to_slot_data()))
            .await
    }

    /// The state of a sensor, issuing a status request if it is unknown.
    pub async fn get_sensor_state(&self, address: u16) -> Result<SensorState, Error> {
        // A sensor state request is the same frame as a sensor state report.
        let request = Message::InputRep {
            address,
            level: SensorLevel::Inactive,
        };
        self.request_until(&self.sensors_changed, request, || self.get_sensor(address))
            .await
            .map(|sensor| sensor.state)
            .map_err(|e| Self::unknown(e, format!("sensor {}", address + 1)))
    }

    /// The state of a switch, issuing a status request if it is unknown.
    pub async fn get_switch_state(&self, address: u16) -> Result<SwitchState, Error> {
        self.request_until(&self.switches_changed, Message::SwState { address }, || {
            self.get_switch(address)
        })
        .await
        .map(|switch| switch.state)
        .map_err(|e| Self::unknown(e, format!("switch {}", address + 1)))
    }

    /// Block until the sensor reports the desired state or the timeout
    /// expires. Returns [`Error::Timeout`] on expiry without mutating state.
    pub async fn wait_for_sensor(
        &self,
        address: u16,
        desired: SensorState,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.wait_until(&self.sensors_changed, timeout, || {
            self.get_sensor(address)
                .is_some_and(|sensor| sensor.state == desired)
        })
        .await
    }

    /// Block until the switch reports the desired state or the timeout
    /// expires.
    pub async fn wait_for_switch(
        &self,
        address: u16,
        desired: SwitchState,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.wait_until(&self.switches_changed, timeout, || {
            self.get_switch(address)
                .is_some_and(|switch| switch.state == desired)
        })
        .await
    }

    /// The layout snapshot the web view pushes to browsers.
    pub fn to_json_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "time": chrono::Local::now().format("%H:%M:%S").to_string(),
            "slots": self.slots(),
            "sensors": self.sensors(),
            "switches": self.switches(),
        })
    }

    fn unknown(error: Error, description: String) -> Error {
        match error {
            Error::UnknownEntity(_) => Error::UnknownEntity(description),
            other => other,
        }
    }

    fn switch_known(&self, address: u16) -> Option<()> {
        self.switches
            .lock()
            .expect("switch lock poisoned")
            .contains_key(&address)
            .then_some(())
    }

    fn lookup_slot(&self, address: u16) -> Option<u8> {
        self.slots
            .lock()
            .expect("slot lock poisoned")
            .values()
            .find(|slot| slot.address == address)
            .map(|slot| slot.slot)
    }

    async fn find_slot(&self, address: u16) -> Result<u8, Error> {
        if address > 0x3FFF {
            return Err(Error::InvalidArgument(format!(
                "locomotive address {address} does not fit 14 bits"
            )));
        }
        self.request_until(&self.slots_changed, Message::LocoAdr { address }, || {
            self.lookup_slot(address)
        })
        .await
        .map_err(|e| Self::unknown(e, format!("locomotive address {address}")))
    }

    /// Probe for an entity; when absent, put `request` on the bus and wait
    /// for the probe to succeed, retrying a bounded number of times.
    async fn request_until<T, F>(
        &self,
        notify: &Notify,
        request: Message,
        mut probe: F,
    ) -> Result<T, Error>
    where
        F: FnMut() -> Option<T>,
    {
        if let Some(found) = probe() {
            return Ok(found);
        }
        for attempt in 1..=STATUS_REQUEST_RETRIES {
            debug!(%request, attempt, "issuing status request");
            self.interface.send(request.clone()).await?;
            let deadline = tokio::time::Instant::now() + STATUS_REQUEST_TIMEOUT;
            loop {
                let notified = notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(found) = probe() {
                    return Ok(found);
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    break;
                }
            }
        }
        Err(Error::UnknownEntity("status request unanswered".into()))
    }

    async fn wait_until<F>(
        &self,
        notify: &Notify,
        timeout: Duration,
        mut condition: F,
    ) -> Result<(), Error>
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if condition() {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(Error::Timeout);
            }
        }
    }

    async fn request_slot_data(&self, slot: u8) {
        debug!(slot, "slot data missing, requesting a refresh");
        if let Err(e) = self.interface.send(Message::RqSlData { slot }).await {
            warn!(%e, slot, "could not request slot data");
        }
    }

    fn update_sensor(&self, address: u16, state: SensorState) {
        {
            let mut sensors = self.sensors.lock().expect("sensor lock poisoned");
            sensors
                .entry(address)
                .or_insert_with(|| Sensor::new(address))
                .state = state;
        }
        self.sensors_changed.notify_waiters();
    }

    fn update_switch(&self, address: u16, state: SwitchState, engaged: bool) {
        {
            let mut switches = self.switches.lock().expect("switch lock poisoned");
            let switch = switches
                .entry(address)
                .or_insert_with(|| Switch::new(address));
            switch.state = state;
            switch.engaged = engaged;
        }
        self.switches_changed.notify_waiters();
    }

    fn update_slot_data(&self, data: &SlotData) {
        {
            let mut slots = self.slots.lock().expect("slot lock poisoned");
            slots
                .entry(data.slot)
                .and_modify(|entry| entry.apply_slot_data(data))
                .or_insert_with(|| Slot::from_slot_data(data));
        }
        self.slots_changed.notify_waiters();
        if self.slot_trace {
            println!("{self}");
        }
    }

    fn apply_to_slot(&self, slot: u8, apply: impl FnOnce(&mut Slot)) -> bool {
        let applied = {
            let mut slots = self.slots.lock().expect("slot lock poisoned");
            match slots.get_mut(&slot) {
                Some(entry) => {
                    apply(entry);
                    true
                }
                None => false,
            }
        };
        if applied {
            self.slots_changed.notify_waiters();
            if self.slot_trace {
                println!("{self}");
            }
        }
        applied
    }

    fn apply_to_address(&self, address: u16, apply: impl FnOnce(&mut Slot)) -> bool {
        let applied = {
            let mut slots = self.slots.lock().expect("slot lock poisoned");
            match slots.values_mut().find(|slot| slot.address == address) {
                Some(entry) => {
                    apply(entry);
                    true
                }
                None => false,
            }
        };
        if applied {
            self.slots_changed.notify_waiters();
        }
        applied
    }
}

impl Display for Scrollkeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn section<T: Display>(
            f: &mut std::fmt::Formatter<'_>,
            title: &str,
            entries: &[T],
        ) -> std::fmt::Result {
            writeln!(f, "{title}:")?;
            if entries.is_empty() {
                writeln!(f, "\t<none>")?;
            } else {
                for entry in entries {
                    writeln!(f, "\t{entry}")?;
                }
            }
            writeln!(f)
        }

        writeln!(f)?;
        writeln!(
            f,
            "Scrollkeeper [{}]",
            chrono::Local::now().format("%H:%M:%S")
        )?;
        writeln!(f)?;
        section(f, "Slots", &self.slots())?;
        section(f, "Switches", &self.switches())?;
        section(f, "Sensors", &self.sensors())
    }
}
