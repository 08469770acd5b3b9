#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lnkeeper::interface::{DummyPort, Interface, InterfaceBuilder};
use lnkeeper::message::SlotData;
use lnkeeper::scrollkeeper::Scrollkeeper;

/// A dummy interface plus the far end of its in-memory port.
pub async fn dummy_interface() -> (Arc<Interface>, DummyPort) {
    let interface = InterfaceBuilder::dummy()
        .build()
        .await
        .expect("dummy interface should build");
    let port = interface
        .take_dummy_port()
        .expect("dummy transport has a port");
    (Arc::new(interface), port)
}

/// A running scrollkeeper on a dummy interface.
pub async fn dummy_scrollkeeper() -> (Arc<Scrollkeeper>, Arc<Interface>, DummyPort) {
    let (interface, port) = dummy_interface().await;
    let scrollkeeper = Scrollkeeper::new(interface.clone(), false);
    scrollkeeper.clone().spawn();
    (scrollkeeper, interface, port)
}

/// Poll until `condition` holds, failing the test after five seconds.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F, what: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting until {what}"));
}

/// A plausible in-use 128-step slot entry.
pub fn slot_data(slot: u8, address: u16) -> SlotData {
    SlotData {
        slot,
        stat: 0x33,
        address,
        speed: 0,
        dirf: 0,
        trk: 0x07,
        ss2: 0,
        snd: 0,
        id1: 0,
        id2: 0,
    }
}
