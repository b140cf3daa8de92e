//! Multi-client sessions driven end to end.
//!
//! The loopback tests poll every session by hand so each step is
//! deterministic. The TCP test runs real sessions on their own threads.

use netsession_core::Reliability;
use netsession_network::{
    runtime, ClientSession, ConnectionStatus, LoopbackNetwork, ServerSession, SessionConfig,
    TcpTransport,
};
use netsession_protocol::{build_text_message, decode_text_message, MessageId};
use std::thread;
use std::time::{Duration, Instant};

const TEXT_MESSAGE: MessageId = MessageId::application(1);

fn config() -> SessionConfig {
    SessionConfig {
        port: 0,
        poll_interval: Duration::from_millis(1),
        ..SessionConfig::default()
    }
}

struct Chat {
    network: LoopbackNetwork,
    server: ServerSession,
    port: u16,
}

impl Chat {
    fn new(config: SessionConfig) -> Self {
        let network = LoopbackNetwork::new();
        let mut server = ServerSession::new(network.endpoint(), config).unwrap();
        let port = server.listen().unwrap();

        server.set_packet_callback(|state, sender, message| {
            let (_, text) = decode_text_message(&message).unwrap();
            let line = format!("[{}]: {}", sender.nickname, text);
            let relay = build_text_message(TEXT_MESSAGE, &line).unwrap();
            state.broadcast(relay.as_slice(), None, Reliability::Reliable);
        });

        Self { network, server, port }
    }

    fn client(&self) -> ClientSession {
        let mut client = ClientSession::new(self.network.endpoint(), config()).unwrap();
        client.set_packet_callback(|state, message| {
            let (_, text) = decode_text_message(&message).unwrap();
            state.output().info(text);
        });
        client
    }

    fn join(&mut self, clients: &mut [&mut ClientSession]) -> ClientSession {
        let mut client = self.client();
        client.push_input(format!("/connect default {}", self.port));
        self.settle(&mut [&mut client]);
        self.settle(clients);
        client
    }

    /// Poll the server and `clients` until every queued event has been handled
    fn settle(&mut self, clients: &mut [&mut ClientSession]) {
        for _ in 0..4 {
            for client in clients.iter_mut() {
                client.poll().unwrap();
            }
            self.server.poll().unwrap();
        }
        for client in clients.iter_mut() {
            client.poll().unwrap();
        }
    }
}

fn count(client: &ClientSession, line: &str) -> usize {
    client
        .output()
        .entries()
        .iter()
        .filter(|entry| entry.as_str() == line)
        .count()
}

#[test]
fn test_two_clients_chat_and_rename() {
    let mut chat = Chat::new(config());
    let mut alice = chat.join(&mut []);
    let mut bob = chat.join(&mut [&mut alice]);

    assert!(alice.is_connected());
    assert!(bob.is_connected());
    assert!(alice.output().contains("User 1 has connected!"));
    assert!(bob.output().contains("Current Users [2]: \nUser 0, User 1"));

    alice.push_input("/nick Alice");
    chat.settle(&mut [&mut alice, &mut bob]);
    assert_eq!(count(&alice, "User 0 is now Alice"), 1);
    assert_eq!(count(&bob, "User 0 is now Alice"), 1);

    // Duplicate: one notice to the sender, nothing to anyone else
    bob.push_input("/nickname Alice");
    chat.settle(&mut [&mut alice, &mut bob]);
    assert_eq!(
        count(&bob, "Set Nickname Failed: Another user already has this nickname!"),
        1
    );
    assert!(!alice.output().contains("Set Nickname Failed"));
    assert_eq!(chat.server.state().registry().nicknames(), vec!["Alice", "User 1"]);

    let message = build_text_message(TEXT_MESSAGE, "hello").unwrap();
    bob.send_to_server(message.as_slice(), Reliability::Reliable).unwrap();
    chat.settle(&mut [&mut alice, &mut bob]);
    assert_eq!(count(&alice, "[User 1]: hello"), 1);
    assert_eq!(count(&bob, "[User 1]: hello"), 1);

    alice.push_input("/disconnect");
    chat.settle(&mut [&mut alice, &mut bob]);
    assert_eq!(alice.status(), ConnectionStatus::Disconnected);
    assert!(bob.output().contains("Alice has left."));
    assert_eq!(chat.server.client_count(), 1);
}

#[test]
fn test_three_clients_nickname_scenario() {
    const TAKEN: &str = "Set Nickname Failed: Another user already has this nickname!";

    let mut chat = Chat::new(config());
    let mut alice = chat.join(&mut []);
    let mut bob = chat.join(&mut [&mut alice]);
    let mut carol = chat.join(&mut [&mut alice, &mut bob]);

    alice.push_input("/nick Alice");
    chat.settle(&mut [&mut alice, &mut bob, &mut carol]);
    bob.push_input("/nick Bob");
    chat.settle(&mut [&mut alice, &mut bob, &mut carol]);

    for client in [&alice, &bob, &carol] {
        assert_eq!(count(client, "User 0 is now Alice"), 1);
        assert_eq!(count(client, "User 1 is now Bob"), 1);
    }

    carol.push_input("/nick Alice");
    chat.settle(&mut [&mut alice, &mut bob, &mut carol]);

    assert_eq!(count(&carol, TAKEN), 1);
    assert_eq!(count(&alice, TAKEN), 0);
    assert_eq!(count(&bob, TAKEN), 0);
    for client in [&alice, &bob, &carol] {
        assert_eq!(count(client, "User 2 is now Alice"), 0);
    }
    assert_eq!(
        chat.server.state().registry().nicknames(),
        vec!["Alice", "Bob", "User 2"]
    );

    carol.push_input("/whosonline");
    chat.settle(&mut [&mut alice, &mut bob, &mut carol]);
    assert_eq!(count(&carol, "Current Users [3]: \nAlice, Bob, User 2"), 1);
}

#[test]
fn test_presence_lists_every_client() {
    let mut chat = Chat::new(config());
    let mut a = chat.join(&mut []);
    let mut b = chat.join(&mut [&mut a]);
    let mut c = chat.join(&mut [&mut a, &mut b]);

    b.push_input("/nick Bee");
    chat.settle(&mut [&mut a, &mut b, &mut c]);

    c.push_input("/whosonline");
    chat.settle(&mut [&mut a, &mut b, &mut c]);

    assert_eq!(c.output().latest().as_deref(), Some("Current Users [3]: \nUser 0, Bee, User 2"));
    assert_eq!(chat.server.connected_users(), "Current Users [3]: \nUser 0, Bee, User 2");
    assert!(!a.output().contains("Current Users [3]"));
}

#[test]
fn test_kick_disconnects_client() {
    let mut chat = Chat::new(config());
    let mut alice = chat.join(&mut []);
    let mut bob = chat.join(&mut [&mut alice]);

    chat.server.push_input("/kick -user \"User 0\"");
    chat.settle(&mut [&mut alice, &mut bob]);

    assert_eq!(alice.status(), ConnectionStatus::Disconnected);
    assert!(alice.output().contains("Disconnected from server. Kicked by server"));
    assert_eq!(chat.server.client_count(), 1);

    chat.server.push_input("/kick -user Ghost");
    chat.settle(&mut [&mut bob]);
    assert_eq!(chat.server.client_count(), 1);
    assert!(chat
        .server
        .output()
        .contains("Error: Could not kick client because User [Ghost] is not connected!"));
    assert!(bob.is_connected());
}

#[test]
fn test_full_server_rejects_client() {
    let mut chat = Chat::new(SessionConfig {
        max_clients: 1,
        ..config()
    });
    let mut first = chat.join(&mut []);
    let second = chat.join(&mut [&mut first]);

    assert!(first.is_connected());
    assert_eq!(second.status(), ConnectionStatus::Failed);
    assert!(second.output().contains("Failed to connect to server. Server Full"));
    assert_eq!(chat.server.client_count(), 1);
}

#[test]
fn test_server_shutdown_disconnects_everyone() {
    let mut chat = Chat::new(config());
    let mut alice = chat.join(&mut []);
    let mut bob = chat.join(&mut [&mut alice]);

    chat.server.state_mut().shutdown();
    chat.settle(&mut [&mut alice, &mut bob]);

    for client in [&alice, &bob] {
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(client.output().contains("Disconnected from server. Server Shutdown"));
    }
    assert_eq!(chat.network.link_count(), 0);
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_tcp_sessions_on_threads() {
    let mut server = ServerSession::new(TcpTransport::new().unwrap(), config()).unwrap();
    let port = server.listen().unwrap();
    let server = runtime::start(server).unwrap();

    let client = ClientSession::new(TcpTransport::new().unwrap(), config()).unwrap();
    let client = runtime::start(client).unwrap();
    client.push_input(format!("/connect 127.0.0.1 {}", port));

    let timeout = Duration::from_secs(10);
    assert!(wait_for(timeout, || client.output().contains("Connected to server")));
    assert!(wait_for(timeout, || client.output().contains("Current Users [1]: \nUser 0")));

    client.push_input("/nick Tester");
    assert!(wait_for(timeout, || server.output().contains("User 0 is now Tester")));
    assert!(wait_for(timeout, || client.output().contains("User 0 is now Tester")));

    client.push_input("/quit");
    assert!(wait_for(timeout, || !client.is_running()));
    client.join().unwrap();

    assert!(wait_for(timeout, || server.output().contains("closed by peer")));
    server.stop();
    server.join().unwrap();
}
