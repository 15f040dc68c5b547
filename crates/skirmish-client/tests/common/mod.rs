//! Helpers shared by the integration tests: a throwaway relay and event
//! stream plumbing.

// not every test binary uses every helper
#![allow(dead_code)]

use std::time::Duration;

use skirmish_client::{ClientConfig, HostOptions, LobbyEvent, ParticipantId};
use skirmish_server::{LobbyServer, ServerConfig};
use tokio::sync::broadcast;

/// Bind a relay on an ephemeral port and run it in the background.
pub async fn spawn_relay() -> String {
    let server = LobbyServer::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .expect("bind relay");
    let addr = server.local_addr().expect("local addr").to_string();
    tokio::spawn(server.run());
    addr
}

pub fn config(id: u64, name: &str) -> ClientConfig {
    ClientConfig::new(ParticipantId(id), name)
}

pub fn options(name: &str) -> HostOptions {
    HostOptions::new(name, "vanilla")
}

/// First event the predicate accepts, within a bound.
pub async fn wait_for(
    events: &mut broadcast::Receiver<LobbyEvent>,
    mut accept: impl FnMut(&LobbyEvent) -> bool,
) -> LobbyEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if accept(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for an event")
}
