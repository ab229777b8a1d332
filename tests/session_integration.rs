//! End-to-end tests for the session protocol over real TCP connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use filo::config::ServerConfig;
use filo::server::{ChatServer, SessionContext, SessionHandler};
use filo::{ChatRegistry, UserRegistry};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a server on an ephemeral port and return its address and context.
async fn start_server() -> (SocketAddr, SessionContext) {
    let ctx = SessionContext {
        users: Arc::new(UserRegistry::new()),
        chats: Arc::new(ChatRegistry::new()),
        store: None,
    };

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    let server = ChatServer::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();

    let handler_ctx = ctx.clone();
    tokio::spawn(server.run(move |stream, peer| {
        let ctx = handler_ctx.clone();
        async move {
            SessionHandler::new(ctx, peer).run(stream).await;
        }
    }));

    (addr, ctx)
}

/// A line-oriented test client.
struct TestClient {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    async fn send(&mut self, line: &str) {
        self.write
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> String {
        timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("connection closed")
    }

    async fn expect(&mut self, expected: &str) {
        assert_eq!(self.recv().await, expected);
    }

    /// Assert that no line arrives within a short window.
    async fn expect_silence(&mut self) {
        let result = timeout(Duration::from_millis(200), self.lines.next_line()).await;
        assert!(result.is_err(), "unexpected line: {result:?}");
    }

    /// Connect and register, consuming the whole auth exchange.
    async fn register(addr: SocketAddr, username: &str, password: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.expect("Benvenuto! Digita 'login' o 'register':").await;
        client.send("register").await;
        client.expect("Scegli un username:").await;
        client.send(username).await;
        client.expect("Scegli una password:").await;
        client.send(password).await;
        client
            .expect(&format!(
                "Benvenuto, {username}! Digita /help per comandi."
            ))
            .await;
        client
    }

    /// Connect and log in, consuming the whole auth exchange.
    async fn login(addr: SocketAddr, username: &str, password: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.expect("Benvenuto! Digita 'login' o 'register':").await;
        client.send("login").await;
        client.expect("Username:").await;
        client.send(username).await;
        client.expect("Password:").await;
        client.send(password).await;
        client
            .expect(&format!(
                "Benvenuto, {username}! Digita /help per comandi."
            ))
            .await;
        client
    }
}

#[tokio::test]
async fn test_register_flow() {
    let (addr, ctx) = start_server().await;

    let _alice = TestClient::register(addr, "alice", "pw1").await;
    assert!(ctx.users.get("alice").await.is_some());
    assert!(ctx.users.is_online("alice").await);
}

#[tokio::test]
async fn test_register_duplicate_reprompts() {
    let (addr, _ctx) = start_server().await;
    let _alice = TestClient::register(addr, "alice", "pw1").await;

    let mut other = TestClient::connect(addr).await;
    other.expect("Benvenuto! Digita 'login' o 'register':").await;
    other.send("register").await;
    other.expect("Scegli un username:").await;
    other.send("alice").await;
    other.expect("Scegli una password:").await;
    other.send("pw2").await;
    other.expect("Username già esistente. Prova di nuovo.").await;
    // The state machine loops back to the choice prompt
    other.expect("Benvenuto! Digita 'login' o 'register':").await;
}

#[tokio::test]
async fn test_login_flow_with_retry() {
    let (addr, _ctx) = start_server().await;
    drop(TestClient::register(addr, "alice", "pw1").await);

    let mut client = TestClient::connect(addr).await;
    client.expect("Benvenuto! Digita 'login' o 'register':").await;
    client.send("login").await;
    client.expect("Username:").await;
    client.send("alice").await;
    client.expect("Password:").await;
    client.send("wrong").await;
    client.expect("Login fallito. Prova di nuovo.").await;

    client.expect("Benvenuto! Digita 'login' o 'register':").await;
    client.send("login").await;
    client.expect("Username:").await;
    client.send("alice").await;
    client.expect("Password:").await;
    client.send("pw1").await;
    client
        .expect("Benvenuto, alice! Digita /help per comandi.")
        .await;
}

#[tokio::test]
async fn test_auth_choice_is_case_insensitive() {
    let (addr, _ctx) = start_server().await;

    let mut client = TestClient::connect(addr).await;
    client.expect("Benvenuto! Digita 'login' o 'register':").await;
    client.send("REGISTER").await;
    client.expect("Scegli un username:").await;
}

#[tokio::test]
async fn test_invalid_auth_choice_reprompts() {
    let (addr, _ctx) = start_server().await;

    let mut client = TestClient::connect(addr).await;
    client.expect("Benvenuto! Digita 'login' o 'register':").await;
    client.send("attack").await;
    client.expect("Comando non valido.").await;
    client.expect("Benvenuto! Digita 'login' o 'register':").await;
}

#[tokio::test]
async fn test_help() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;

    alice.send("/help").await;
    alice.expect("--- COMANDI DISPONIBILI ---").await;
    alice.expect("/list                    → elenco chat").await;
    alice
        .expect("/open <id>              → mostra messaggi della chat")
        .await;
    alice
        .expect("/newdm <username>       → crea chat diretta")
        .await;
    alice.expect("/newgroup <nome>        → crea un gruppo").await;
    alice
        .expect("/add <chatID> <user>    → aggiunge utente al gruppo")
        .await;
}

#[tokio::test]
async fn test_list_empty() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;

    alice.send("/list").await;
    alice.expect("Le tue chat:").await;
    alice.expect("Nessuna chat.").await;
}

#[tokio::test]
async fn test_dm_scenario() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;
    let mut bob = TestClient::register(addr, "bob", "pw2").await;

    alice.send("/newdm bob").await;
    alice.expect("DM creata! ID=1").await;

    alice.send("1|hello").await;

    // Both participants receive the push, each exactly once (alice id 1, bob id 2)
    alice.expect("[1] 1: hello").await;
    bob.expect("[1] 1: hello").await;
    bob.expect_silence().await;

    // The log shows exactly that one message for either party
    alice.send("/open 1").await;
    alice.expect("Messaggi della chat 1:").await;
    alice.expect("[1] hello").await;

    bob.send("/open 1").await;
    bob.expect("Messaggi della chat 1:").await;
    bob.expect("[1] hello").await;

    // And /list shows the chat for both
    bob.send("/list").await;
    bob.expect("Le tue chat:").await;
    bob.expect(" • ID=1  (DirectMessage)").await;
}

#[tokio::test]
async fn test_newdm_unknown_user() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;

    alice.send("/newdm nobody").await;
    alice.expect("Utente non trovato.").await;
}

#[tokio::test]
async fn test_open_unknown_chat() {
    let (addr, ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;

    alice.send("/open 9999").await;
    alice.expect("Chat non trovata.").await;
    assert_eq!(ctx.chats.count().await, 0);
}

#[tokio::test]
async fn test_message_to_unknown_chat() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;

    alice.send("9999|ciao").await;
    alice.expect("Chat non trovata.").await;
}

#[tokio::test]
async fn test_malformed_message_line() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;

    alice.send("ciao a tutti").await;
    alice
        .expect("Formato messaggio invalido. Usa: ID_CHAT|messaggio")
        .await;

    // The session stays usable
    alice.send("/list").await;
    alice.expect("Le tue chat:").await;
}

#[tokio::test]
async fn test_unknown_command() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;

    alice.send("/frobnicate").await;
    alice.expect("Comando non valido. Usa /help.").await;
}

#[tokio::test]
async fn test_group_lifecycle() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;
    let mut bob = TestClient::register(addr, "bob", "pw2").await;

    alice.send("/newgroup gli amici").await;
    alice.expect("Gruppo creato! ID=1").await;

    alice.send("/add 1 bob").await;
    alice.expect("Utente aggiunto!").await;

    // Duplicate add is rejected
    alice.send("/add 1 bob").await;
    alice.expect("Utente già nel gruppo.").await;

    // Unknown user
    alice.send("/add 1 nobody").await;
    alice.expect("Utente non trovato.").await;

    // Group messages reach every member
    bob.send("1|ciao gruppo").await;
    alice.expect("[1] 2: ciao gruppo").await;
    bob.expect("[1] 2: ciao gruppo").await;

    bob.send("/list").await;
    bob.expect("Le tue chat:").await;
    bob.expect(" • ID=1  (Gruppo)").await;
}

#[tokio::test]
async fn test_add_to_direct_chat_rejected() {
    let (addr, ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;
    let _bob = TestClient::register(addr, "bob", "pw2").await;
    let _carol = TestClient::register(addr, "carol", "pw3").await;

    alice.send("/newdm bob").await;
    alice.expect("DM creata! ID=1").await;

    alice.send("/add 1 carol").await;
    alice.expect("La chat non è un gruppo.").await;

    // Membership unchanged
    assert_eq!(ctx.chats.participants(1).await.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_add_to_missing_chat() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;

    alice.send("/add 42 alice").await;
    alice.expect("Chat non trovata.").await;
}

#[tokio::test]
async fn test_content_with_delimiter_round_trips() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;
    let mut bob = TestClient::register(addr, "bob", "pw2").await;

    alice.send("/newdm bob").await;
    alice.expect("DM creata! ID=1").await;

    alice.send("1|a|b|c").await;
    alice.expect("[1] 1: a|b|c").await;
    bob.expect("[1] 1: a|b|c").await;

    bob.send("/open 1").await;
    bob.expect("Messaggi della chat 1:").await;
    bob.expect("[1] a|b|c").await;
}

#[tokio::test]
async fn test_command_argument_errors() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;

    alice.send("/open").await;
    alice.expect("Errore comando: uso: /open <id>").await;

    alice.send("/open abc").await;
    alice.expect("Errore comando: ID chat non valido.").await;

    alice.send("/newgroup").await;
    alice.expect("Errore comando: uso: /newgroup <nome>").await;
}

#[tokio::test]
async fn test_offline_participant_misses_live_line() {
    let (addr, ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;
    let bob = TestClient::register(addr, "bob", "pw2").await;

    alice.send("/newdm bob").await;
    alice.expect("DM creata! ID=1").await;

    // Bob disconnects; the push is simply not delivered to him
    drop(bob);
    for _ in 0..50 {
        if !ctx.users.is_online("bob").await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!ctx.users.is_online("bob").await);

    alice.send("1|sei ancora li?").await;
    alice.expect("[1] 1: sei ancora li?").await;

    // The message made the log regardless
    alice.send("/open 1").await;
    alice.expect("Messaggi della chat 1:").await;
    alice.expect("[1] sei ancora li?").await;
}

#[tokio::test]
async fn test_second_login_takes_over_routing() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;
    let mut bob_first = TestClient::register(addr, "bob", "pw2").await;

    alice.send("/newdm bob").await;
    alice.expect("DM creata! ID=1").await;

    // Bob logs in again from a second connection; pushes follow the new one
    let mut bob_second = TestClient::login(addr, "bob", "pw2").await;

    alice.send("1|ping").await;
    alice.expect("[1] 1: ping").await;
    bob_second.expect("[1] 1: ping").await;
    bob_first.expect_silence().await;
}

#[tokio::test]
async fn test_disconnect_does_not_affect_other_sessions() {
    let (addr, ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;
    let bob = TestClient::register(addr, "bob", "pw2").await;

    drop(bob);
    for _ in 0..50 {
        if !ctx.users.is_online("bob").await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Alice's session and the registries are intact
    assert!(ctx.users.is_online("alice").await);
    assert!(ctx.users.get("bob").await.is_some());
    alice.send("/list").await;
    alice.expect("Le tue chat:").await;
}

#[tokio::test]
async fn test_self_dm_delivers_once() {
    let (addr, _ctx) = start_server().await;
    let mut alice = TestClient::register(addr, "alice", "pw1").await;

    alice.send("/newdm alice").await;
    alice.expect("DM creata! ID=1").await;

    alice.send("1|nota per me").await;
    alice.expect("[1] 1: nota per me").await;
    alice.expect_silence().await;
}
