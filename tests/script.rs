use std::time::Duration;

use lnkeeper::message::{Direction, Message, SensorLevel, SwitchPosition};
use lnkeeper::script::Script;
use lnkeeper::state::SensorState;
use pretty_assertions::assert_eq;

mod common;

#[tokio::test]
async fn throttle_writes_the_slot_back() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    port.inject(&Message::SlotRdData(common::slot_data(7, 3)))
        .await
        .unwrap();
    common::eventually(|| scrollkeeper.get_slot(7).is_some(), "slot is mirrored").await;

    let script = Script::new(scrollkeeper);
    let throttle = script.throttle(3);
    throttle.forward(40).await.unwrap();

    match port.next_outbound().await {
        Some(Message::WrSlData(data)) => {
            assert_eq!(data.slot, 7);
            assert_eq!(data.address, 3);
            assert_eq!(data.speed, 40);
            assert_eq!(data.direction(), Direction::Forward);
        }
        other => panic!("expected a slot write, got {other:?}"),
    }

    throttle.reverse(10).await.unwrap();
    match port.next_outbound().await {
        Some(Message::WrSlData(data)) => {
            assert_eq!(data.speed, 10);
            assert_eq!(data.direction(), Direction::Reverse);
        }
        other => panic!("expected a slot write, got {other:?}"),
    }
}

#[tokio::test]
async fn lights_and_whistle_ride_the_function_frames() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    port.inject(&Message::SlotRdData(common::slot_data(7, 3)))
        .await
        .unwrap();
    common::eventually(|| scrollkeeper.get_slot(7).is_some(), "slot is mirrored").await;

    let script = Script::new(scrollkeeper);
    let throttle = script.throttle(3);

    throttle.lights(true).await.unwrap();
    assert_eq!(
        port.next_outbound().await,
        Some(Message::LocoDirf {
            slot: 7,
            dirf: 0x10,
        })
    );

    // The whistle pulses F1 on and back off a moment later.
    throttle.whistle(Duration::from_millis(50)).await.unwrap();
    assert_eq!(
        port.next_outbound().await,
        Some(Message::LocoDirf {
            slot: 7,
            dirf: 0x01,
        })
    );
    assert_eq!(
        port.next_outbound().await,
        Some(Message::LocoDirf { slot: 7, dirf: 0 })
    );
}

#[tokio::test]
async fn throwing_a_known_switch_goes_straight_out() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    port.inject(&Message::SwRep {
        address: 2,
        position: SwitchPosition::Closed,
        engaged: false,
    })
    .await
    .unwrap();
    common::eventually(|| scrollkeeper.get_switch(2).is_some(), "switch is mirrored").await;

    let script = Script::new(scrollkeeper);
    script
        .throw_switch(2, SwitchPosition::Thrown)
        .await
        .unwrap();

    assert_eq!(
        port.next_outbound().await,
        Some(Message::SwReq {
            address: 2,
            position: SwitchPosition::Thrown,
            activate: true,
        })
    );
}

#[tokio::test]
async fn scripts_wait_for_sensors() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;
    let script = Script::new(scrollkeeper);

    let waiter = {
        let script = script.clone();
        tokio::spawn(async move {
            script
                .wait_for_sensor(10, SensorState::Active, Duration::from_secs(5))
                .await
        })
    };

    port.inject(&Message::InputRep {
        address: 10,
        level: SensorLevel::Active,
    })
    .await
    .unwrap();

    waiter.await.unwrap().unwrap();
}
