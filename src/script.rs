use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::Error;
use crate::message::{Direction, SwitchPosition};
use crate::scrollkeeper::Scrollkeeper;
use crate::state::SensorState;

/// Synchronous-feeling layout commands for scripts.
///
/// A thin wrapper over [`Scrollkeeper`] with no state of its own.
#[derive(Clone)]
pub struct Script {
    scrollkeeper: Arc<Scrollkeeper>,
}

impl Script {
    /// A script handle over the given mirror.
    pub fn new(scrollkeeper: Arc<Scrollkeeper>) -> Self {
        Self { scrollkeeper }
    }

    /// Throw or close a turnout.
    pub async fn throw_switch(&self, address: u16, position: SwitchPosition) -> Result<(), Error> {
        self.scrollkeeper.set_switch(address, position).await
    }

    /// Set a locomotive's speed (0..=127).
    pub async fn set_speed(&self, address: u16, speed: u8) -> Result<(), Error> {
        self.scrollkeeper.set_loco_speed(address, speed).await
    }

    /// Set a locomotive's direction.
    pub async fn set_direction(&self, address: u16, direction: Direction) -> Result<(), Error> {
        self.scrollkeeper.set_loco_direction(address, direction).await
    }

    /// Switch a locomotive function on or off.
    pub async fn set_function(&self, address: u16, function: u8, on: bool) -> Result<(), Error> {
        self.scrollkeeper
            .set_loco_function(address, function, on)
            .await
    }

    /// Wait until a sensor reports the given state.
    pub async fn wait_for_sensor(
        &self,
        address: u16,
        state: SensorState,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.scrollkeeper
            .wait_for_sensor(address, state, timeout)
            .await
    }

    /// Plain wall-clock pause between script steps.
    pub async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// A throttle bound to one locomotive.
    pub fn throttle(&self, address: u16) -> Throttle {
        Throttle {
            scrollkeeper: self.scrollkeeper.clone(),
            address,
        }
    }
}

/// Controls a single locomotive by writing its slot back, the way a handheld
/// throttle does.
#[derive(Clone)]
pub struct Throttle {
    scrollkeeper: Arc<Scrollkeeper>,
    address: u16,
}

impl Throttle {
    /// A throttle over the given mirror for one locomotive address.
    pub fn new(scrollkeeper: Arc<Scrollkeeper>, address: u16) -> Self {
        Self {
            scrollkeeper,
            address,
        }
    }

    /// Run forward at the given speed.
    pub async fn forward(&self, speed: u8) -> Result<(), Error> {
        self.scrollkeeper
            .write_slot(self.address, Direction::Forward, speed)
            .await
    }

    /// Run in reverse at the given speed.
    pub async fn reverse(&self, speed: u8) -> Result<(), Error> {
        self.scrollkeeper
            .write_slot(self.address, Direction::Reverse, speed)
            .await
    }

    /// Headlights (F0) on or off.
    pub async fn lights(&self, on: bool) -> Result<(), Error> {
        self.scrollkeeper
            .set_loco_function(self.address, 0, on)
            .await
    }

    /// Sound the whistle (F1) for the given duration.
    pub async fn whistle(&self, duration: Duration) -> Result<(), Error> {
        self.pulse_function(1, duration).await
    }

    /// Switch a function on and schedule it off again after `duration`.
    ///
    /// The switch-off runs on a detached task, so the call returns as soon
    /// as the switch-on is queued.
    pub async fn pulse_function(&self, function: u8, duration: Duration) -> Result<(), Error> {
        self.scrollkeeper
            .set_loco_function(self.address, function, true)
            .await?;
        let scrollkeeper = self.scrollkeeper.clone();
        let address = self.address;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Err(e) = scrollkeeper.set_loco_function(address, function, false).await {
                warn!(%e, address, function, "could not release the pulsed function");
            }
        });
        Ok(())
    }
}
