//! In-game commands arriving through the log server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use booker::dispatch::{GameCommand, GameDispatcher};
use booker::logserver::LogServer;
use booker::messages;
use common::{harness, info, ADMIN};
use tokio::net::UdpSocket;
use tokio::sync::watch;

fn say(steam_account: u32, text: &str) -> String {
    format!(
        "RL 10/19/2026 - 21:04:11: \"player<7><[U:1:{steam_account}]><Red>\" say \"{text}\""
    )
}

#[tokio::test]
async fn test_timeleft_booked_and_unbooked() {
    let h = harness(1);
    let dispatcher = GameDispatcher::new(h.env());
    let server = &h.servers[0];

    let handled = dispatcher.handle_line(server, &say(1, "!timeleft")).await;
    assert_eq!(handled, Some(GameCommand::TimeLeft));
    assert_eq!(
        h.drivers[0].commands().last().map(String::as_str),
        Some(messages::TIME_LEFT_UNBOOKED)
    );

    h.coordinator.book(&info("u1")).await.expect("book");
    h.settle().await;

    dispatcher.handle_line(server, &say(1, "!TimeLeft")).await;
    let last = h.drivers[0].commands().last().cloned().expect("answered");
    assert!(last.starts_with("say Time left on this booking: 2h 59m"));
}

#[tokio::test]
async fn test_report_rate_limited_per_player() {
    let h = harness(1);
    let dispatcher = GameDispatcher::new(h.env());
    let server = &h.servers[0];

    dispatcher
        .handle_line(server, &say(1234, "!report \"Aim Bot\" on blu"))
        .await;
    let alerts = h.chat.direct_to(ADMIN);
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("https://steamcommunity.com/profiles/76561197960266962"));
    assert!(alerts[0].contains("aim bot on blu"));
    assert_eq!(
        h.drivers[0].commands().last().map(String::as_str),
        Some(messages::REPORT_SENT)
    );

    dispatcher.handle_line(server, &say(1234, "!report again")).await;
    assert_eq!(h.chat.direct_to(ADMIN).len(), 1);
    assert_eq!(
        h.drivers[0].commands().last().map(String::as_str),
        Some(messages::REPORT_COOLDOWN)
    );

    // Another player is not affected by the first one's cooldown.
    dispatcher.handle_line(server, &say(99, "!report")).await;
    assert_eq!(h.chat.direct_to(ADMIN).len(), 2);
}

#[tokio::test]
async fn test_plain_chat_ignored() {
    let h = harness(1);
    let dispatcher = GameDispatcher::new(h.env());

    assert_eq!(
        dispatcher.handle_line(&h.servers[0], &say(1, "gg report")).await,
        None
    );
    assert_eq!(
        dispatcher.handle_line(&h.servers[0], &say(1, "!unknown")).await,
        None
    );
    assert!(h.drivers[0].commands().is_empty());
}

#[tokio::test]
async fn test_log_server_dispatches_packets() {
    let h = harness(1);
    let dispatcher = Arc::new(GameDispatcher::new(h.env()));

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    // Make the server resolvable by the sender's address.
    let server = booker::server::Server::new(
        booker::server::ServerIdentity {
            id: "local".into(),
            name: "Local".into(),
            address: sender.local_addr().unwrap().to_string(),
            stv_address: String::new(),
            session_name: "local".into(),
        },
        booker::driver::Driver::Mock(h.drivers[0].clone()),
    );
    let pool = Arc::new(booker::pool::StaticPool::new(
        vec![Arc::new(server)],
        booker::pool::DEFAULT_TICK_RATE_TARGET,
    ));

    let log_server = LogServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        pool,
        dispatcher,
        Arc::clone(&h.supervisor),
    )
    .await
    .unwrap();
    let addr = log_server.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { log_server.run(shutdown_rx).await });

    let mut packet = vec![0xff, 0xff, 0xff, 0xff];
    packet.extend_from_slice(say(5, "!timeleft").as_bytes());
    packet.push(0);
    sender.send_to(&packet, addr).await.unwrap();

    let answered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            h.settle().await;
            if !h.drivers[0].commands().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(answered.is_ok());
    assert_eq!(
        h.drivers[0].commands(),
        vec![messages::TIME_LEFT_UNBOOKED.to_string()]
    );

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
