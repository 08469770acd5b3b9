use std::time::Duration;

use lnkeeper::error::Error;
use lnkeeper::message::{Message, SensorLevel, SwitchPosition};
use lnkeeper::state::{SensorState, SwitchState};
use pretty_assertions::assert_eq;

mod common;

#[tokio::test]
async fn unknown_loco_triggers_a_slot_request_first() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    let command = {
        let scrollkeeper = scrollkeeper.clone();
        tokio::spawn(async move { scrollkeeper.set_loco_speed(3, 20).await })
    };

    // The slot request goes out before the deferred speed command.
    assert_eq!(
        port.next_outbound().await,
        Some(Message::LocoAdr { address: 3 })
    );

    port.inject(&Message::SlotRdData(common::slot_data(7, 3)))
        .await
        .unwrap();

    assert_eq!(
        port.next_outbound().await,
        Some(Message::LocoSpd { slot: 7, speed: 20 })
    );
    command.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn commands_fail_after_bounded_retries() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    let result = scrollkeeper.set_loco_speed(9, 10).await;
    assert!(matches!(result, Err(Error::UnknownEntity(_))));

    for _ in 0..3 {
        assert_eq!(
            port.next_outbound().await,
            Some(Message::LocoAdr { address: 9 })
        );
    }
}

#[tokio::test]
async fn repeated_status_messages_are_idempotent() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    for _ in 0..3 {
        port.inject(&Message::InputRep {
            address: 5,
            level: SensorLevel::Active,
        })
        .await
        .unwrap();
        port.inject(&Message::SwRep {
            address: 9,
            position: SwitchPosition::Thrown,
            engaged: false,
        })
        .await
        .unwrap();
        port.inject(&Message::SlotRdData(common::slot_data(4, 11)))
            .await
            .unwrap();
    }

    common::eventually(
        || !scrollkeeper.slots().is_empty(),
        "the mirror sees the updates",
    )
    .await;

    assert_eq!(scrollkeeper.sensors().len(), 1);
    assert_eq!(scrollkeeper.switches().len(), 1);
    assert_eq!(scrollkeeper.slots().len(), 1);

    let sensor = scrollkeeper.get_sensor(5).unwrap();
    assert_eq!(sensor.state, SensorState::Active);
    let switch = scrollkeeper.get_switch(9).unwrap();
    assert_eq!(switch.state, SwitchState::Thrown);
    let slot = scrollkeeper.get_slot(4).unwrap();
    assert_eq!(slot.address, 11);
}

#[tokio::test]
async fn wait_for_sensor_returns_when_the_state_lands() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    let waiter = {
        let scrollkeeper = scrollkeeper.clone();
        tokio::spawn(async move {
            scrollkeeper
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

#[tokio::test]
async fn wait_for_sensor_times_out() {
    let (scrollkeeper, _interface, _port) = common::dummy_scrollkeeper().await;

    let result = scrollkeeper
        .wait_for_sensor(10, SensorState::Active, Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(Error::Timeout)));
}

#[tokio::test]
async fn speed_update_for_an_unknown_slot_requests_a_refresh() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    port.inject(&Message::LocoSpd { slot: 4, speed: 10 })
        .await
        .unwrap();

    // The mirror asks the station for the slot rather than inventing one.
    assert_eq!(port.next_outbound().await, Some(Message::RqSlData { slot: 4 }));
    assert_eq!(scrollkeeper.get_slot(4), None);

    port.inject(&Message::SlotRdData(common::slot_data(4, 11)))
        .await
        .unwrap();
    port.inject(&Message::LocoSpd { slot: 4, speed: 10 })
        .await
        .unwrap();

    common::eventually(
        || scrollkeeper.get_slot(4).is_some_and(|slot| slot.speed == 10),
        "the speed update lands once the slot is known",
    )
    .await;
}

#[tokio::test]
async fn function_messages_update_the_slot() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    port.inject(&Message::SlotRdData(common::slot_data(7, 3)))
        .await
        .unwrap();
    common::eventually(|| scrollkeeper.get_slot(7).is_some(), "slot is mirrored").await;

    // F0 and F3 via dirf, F5 via snd, F10 via the extended opcode,
    // F13..F20 via an immediate packet.
    port.inject(&Message::LocoDirf {
        slot: 7,
        dirf: 0x10 | 0x04,
    })
    .await
    .unwrap();
    port.inject(&Message::LocoSnd { slot: 7, snd: 0x01 })
        .await
        .unwrap();
    port.inject(&Message::LocoF912 { slot: 7, bits: 0x02 })
        .await
        .unwrap();
    port.inject(&Message::imm_function_block(
        lnkeeper::message::FunctionBlock {
            address: 3,
            first: 13,
            count: 8,
            bits: 0x80,
        },
        2,
    ))
    .await
    .unwrap();

    common::eventually(
        || scrollkeeper.get_slot(7).is_some_and(|slot| slot.function(20)),
        "all function groups land",
    )
    .await;

    let slot = scrollkeeper.get_slot(7).unwrap();
    assert!(slot.function(0));
    assert!(slot.function(3));
    assert!(!slot.function(1));
    assert!(slot.function(5));
    assert!(slot.function(10));
    assert!(!slot.function(9));
    assert!(slot.function(20));
    assert!(!slot.function(13));
}

#[tokio::test]
async fn acknowledges_are_retained() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    port.inject(&Message::LongAck {
        opcode: 0xBC,
        code: 0x7F,
    })
    .await
    .unwrap();

    common::eventually(
        || scrollkeeper.last_ack() == Some((0xBC, 0x7F)),
        "the acknowledge is mirrored",
    )
    .await;
}

#[tokio::test]
async fn switch_commands_resolve_unknown_switches_first() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    let command = {
        let scrollkeeper = scrollkeeper.clone();
        tokio::spawn(async move {
            scrollkeeper
                .set_switch(5, SwitchPosition::Thrown)
                .await
        })
    };

    assert_eq!(
        port.next_outbound().await,
        Some(Message::SwState { address: 5 })
    );

    port.inject(&Message::SwRep {
        address: 5,
        position: SwitchPosition::Closed,
        engaged: false,
    })
    .await
    .unwrap();

    assert_eq!(
        port.next_outbound().await,
        Some(Message::SwReq {
            address: 5,
            position: SwitchPosition::Thrown,
            activate: true,
        })
    );
    command.await.unwrap().unwrap();
}

#[tokio::test]
async fn out_of_range_arguments_are_rejected() {
    let (scrollkeeper, _interface, _port) = common::dummy_scrollkeeper().await;

    assert!(matches!(
        scrollkeeper.set_loco_speed(3, 128).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        scrollkeeper.set_loco_function(3, 29, true).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        scrollkeeper.set_switch(0x800, SwitchPosition::Closed).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        scrollkeeper.set_loco_speed(0x4000, 10).await,
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn snapshot_has_the_expected_shape() {
    let (scrollkeeper, _interface, mut port) = common::dummy_scrollkeeper().await;

    port.inject(&Message::SlotRdData(common::slot_data(7, 3)))
        .await
        .unwrap();
    port.inject(&Message::InputRep {
        address: 2,
        level: SensorLevel::Inactive,
    })
    .await
    .unwrap();

    common::eventually(
        || !scrollkeeper.slots().is_empty() && !scrollkeeper.sensors().is_empty(),
        "mirror is populated",
    )
    .await;

    let snapshot = scrollkeeper.to_json_snapshot();
    assert!(snapshot["time"].is_string());
    assert_eq!(snapshot["slots"].as_array().unwrap().len(), 1);
    assert_eq!(snapshot["slots"][0]["slot"], 7);
    assert_eq!(snapshot["slots"][0]["address"], 3);
    assert_eq!(snapshot["sensors"][0]["state"], "Inactive");
    assert_eq!(snapshot["switches"].as_array().unwrap().len(), 0);
}
