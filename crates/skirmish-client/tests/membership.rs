//! Membership churn over a live relay: departures, kicks, lobby teardown,
//! and capacity changes observed from every side.

mod common;

use common::{config, options, spawn_relay, wait_for};
use skirmish_client::{
    AiDifficulty, LobbyEvent, Occupant, ParticipantId, Session, SlotAddr, SlotState,
};

#[tokio::test]
async fn test_member_departure_updates_everyone() {
    let addr = spawn_relay().await;
    let host = Session::host(&addr, config(1, "Anna"), options("Evening Skirmish"))
        .await
        .unwrap();
    let leaver = Session::join(&addr, config(2, "Ben"), host.lobby_id(), None)
        .await
        .unwrap();
    let bystander = Session::join(&addr, config(3, "Cara"), host.lobby_id(), None)
        .await
        .unwrap();

    let mut host_events = host.events();
    let mut bystander_events = bystander.events();

    leaver.close();

    let event = wait_for(&mut host_events, |event| {
        matches!(event, LobbyEvent::ParticipantLeft { .. })
    })
    .await;
    assert_eq!(
        event,
        LobbyEvent::ParticipantLeft {
            participant: ParticipantId(2),
            addr: SlotAddr { team: 0, slot: 1 },
        }
    );
    let vacated = host.lobby().team(0).unwrap().slot(1).unwrap();
    assert_eq!(vacated.state().await.unwrap(), SlotState::Open);

    wait_for(&mut bystander_events, |event| {
        matches!(
            event,
            LobbyEvent::ParticipantLeft {
                participant: ParticipantId(2),
                ..
            }
        )
    })
    .await;
    let observed = bystander.lobby().team(0).unwrap().slot(1).unwrap();
    assert_eq!(observed.state().await.unwrap(), SlotState::Open);
}

#[tokio::test]
async fn test_departed_member_can_rejoin() {
    let addr = spawn_relay().await;
    let host = Session::host(&addr, config(1, "Anna"), options("Evening Skirmish"))
        .await
        .unwrap();
    let mut host_events = host.events();

    let first = Session::join(&addr, config(2, "Ben"), host.lobby_id(), None)
        .await
        .unwrap();
    first.close();
    wait_for(&mut host_events, |event| {
        matches!(event, LobbyEvent::ParticipantLeft { .. })
    })
    .await;

    let again = Session::join(&addr, config(2, "Ben"), host.lobby_id(), None)
        .await
        .unwrap();
    assert!(again.lobby().is_ready(ParticipantId(2)).await.is_ok());
}

#[tokio::test]
async fn test_host_close_tears_the_lobby_down() {
    let addr = spawn_relay().await;
    let host = Session::host(&addr, config(1, "Anna"), options("Evening Skirmish"))
        .await
        .unwrap();
    let member = Session::join(&addr, config(2, "Ben"), host.lobby_id(), None)
        .await
        .unwrap();
    let mut member_events = member.events();

    host.close();

    wait_for(&mut member_events, |event| {
        matches!(event, LobbyEvent::LobbyClosed)
    })
    .await;

    // the lobby is gone from the browser too
    let lobbies = Session::list_lobbies(&addr, &config(9, "Browser")).await.unwrap();
    assert!(lobbies.is_empty());
}

#[tokio::test]
async fn test_kick_reaches_the_kicked_member_and_bystanders() {
    let addr = spawn_relay().await;
    let host = Session::host(&addr, config(1, "Anna"), options("Evening Skirmish"))
        .await
        .unwrap();
    let target = Session::join(&addr, config(2, "Ben"), host.lobby_id(), None)
        .await
        .unwrap();
    let bystander = Session::join(&addr, config(3, "Cara"), host.lobby_id(), None)
        .await
        .unwrap();

    let mut target_events = target.events();
    let mut bystander_events = bystander.events();

    assert!(
        host.lobby()
            .team(0)
            .unwrap()
            .slot(1)
            .unwrap()
            .remove_occupant()
            .await
            .unwrap()
    );
    let vacated = host.lobby().team(0).unwrap().slot(1).unwrap();
    assert_eq!(vacated.state().await.unwrap(), SlotState::Open);

    wait_for(&mut target_events, |event| {
        matches!(event, LobbyEvent::Kicked)
    })
    .await;

    wait_for(&mut bystander_events, |event| {
        matches!(
            event,
            LobbyEvent::ParticipantLeft {
                participant: ParticipantId(2),
                ..
            }
        )
    })
    .await;
    let observed = bystander.lobby().team(0).unwrap().slot(1).unwrap();
    assert_eq!(observed.state().await.unwrap(), SlotState::Open);
}

#[tokio::test]
async fn test_resize_migrates_and_disables_over_the_wire() {
    let addr = spawn_relay().await;
    let host = Session::host(&addr, config(1, "Anna"), options("Evening Skirmish"))
        .await
        .unwrap();
    let member = Session::join(&addr, config(2, "Ben"), host.lobby_id(), None)
        .await
        .unwrap();
    let mut member_events = member.events();

    // an AI stranded above the new capacity must migrate down
    let team = host.lobby().team(1).unwrap();
    assert!(
        team.slot(3)
            .unwrap()
            .set_difficulty(AiDifficulty::Hard)
            .await
            .unwrap()
    );
    assert!(team.resize(2).await.unwrap());

    wait_for(&mut member_events, |event| {
        matches!(event, LobbyEvent::TeamChanged { team: 1 })
    })
    .await;

    let observed = member.lobby().team(1).unwrap();
    assert_eq!(observed.capacity().await.unwrap(), 2);
    assert_eq!(
        observed.slot(0).unwrap().occupant().await.unwrap(),
        Some(Occupant::Ai {
            difficulty: AiDifficulty::Hard
        })
    );
    assert_eq!(
        observed.slot(3).unwrap().state().await.unwrap(),
        SlotState::Disabled
    );
}
