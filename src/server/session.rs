//! Per-connection session handling for filo.
//!
//! Each accepted connection gets one `SessionHandler` running the protocol
//! state machine: CONNECTED → AUTHENTICATING → AUTHENTICATED → TERMINATED.
//! The handler reads lines from its connection, mutates the shared
//! registries, and fans posted messages out to the sessions of the other
//! participants.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{self, wire, Command, InputLine};
use crate::chat::{AddMemberError, ChatRegistry, Message};
use crate::store::SqliteStore;
use crate::user::{Account, SessionHandle, UserRegistry};

/// Shared dependencies handed to every session.
#[derive(Clone)]
pub struct SessionContext {
    /// Account directory and routing table.
    pub users: Arc<UserRegistry>,
    /// Chat directory.
    pub chats: Arc<ChatRegistry>,
    /// Write-through persistence, when available. Failures are soft.
    pub store: Option<Arc<SqliteStore>>,
}

type LineReader = tokio::io::Lines<BufReader<OwnedReadHalf>>;

/// Handler for one client connection.
pub struct SessionHandler {
    id: Uuid,
    peer_addr: SocketAddr,
    ctx: SessionContext,
}

impl SessionHandler {
    /// Create a handler for a freshly accepted connection.
    pub fn new(ctx: SessionContext, peer_addr: SocketAddr) -> Self {
        let id = Uuid::new_v4();
        debug!("Created session {} for {}", id, peer_addr);
        Self { id, peer_addr, ctx }
    }

    /// Get the session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the session to completion.
    ///
    /// Never propagates an error: anything that goes wrong terminates this
    /// session only, after routing/online cleanup.
    pub async fn run(self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(write_loop(write_half, rx));
        let mut lines = BufReader::new(read_half).lines();

        let account = self.authenticate(&mut lines, &tx).await;

        if let Some(account) = &account {
            self.ctx
                .users
                .bind(account.id, SessionHandle::new(self.id, tx.clone()))
                .await;
            send(&tx, wire::welcome(&account.username));
            info!(
                "Session {} authenticated as {} (user_id={})",
                self.id, account.username, account.id
            );

            self.command_loop(account, &mut lines, &tx).await;

            // Cleanup only applies if this session still owns the binding;
            // a newer login for the same account keeps its own.
            if self.ctx.users.unbind(account.id, self.id).await {
                debug!("Session {} unbound user {}", self.id, account.id);
            }
        }

        drop(tx);
        let _ = writer.await;
        info!("Session {} from {} terminated", self.id, self.peer_addr);
    }

    /// The AUTHENTICATING loop.
    ///
    /// Repeatedly offers login/register until one path succeeds. Returns
    /// None if the client disconnects first.
    async fn authenticate(
        &self,
        lines: &mut LineReader,
        tx: &UnboundedSender<String>,
    ) -> Option<Account> {
        loop {
            send(tx, wire::PROMPT_CHOICE);
            let choice = read_line(lines).await?;

            // The keyword is case-insensitive; usernames and passwords are not.
            match choice.trim().to_lowercase().as_str() {
                "login" => {
                    send(tx, wire::PROMPT_USERNAME);
                    let username = read_line(lines).await?;
                    send(tx, wire::PROMPT_PASSWORD);
                    let password = read_line(lines).await?;

                    match self.ctx.users.authenticate(&username, &password).await {
                        Ok(account) => return Some(account),
                        Err(_) => send(tx, wire::LOGIN_FAILED),
                    }
                }
                "register" => {
                    send(tx, wire::PROMPT_REG_USERNAME);
                    let username = read_line(lines).await?;
                    send(tx, wire::PROMPT_REG_PASSWORD);
                    let password = read_line(lines).await?;

                    match self.ctx.users.register(&username, &password).await {
                        Ok(account) => {
                            self.persist_user(&account).await;
                            return Some(account);
                        }
                        Err(_) => send(tx, wire::USERNAME_TAKEN),
                    }
                }
                _ => send(tx, wire::INVALID_CHOICE),
            }
        }
    }

    /// The AUTHENTICATED loop. Exits only when the connection ends.
    async fn command_loop(
        &self,
        account: &Account,
        lines: &mut LineReader,
        tx: &UnboundedSender<String>,
    ) {
        while let Some(line) = read_line(lines).await {
            match protocol::parse_line(&line) {
                Ok(InputLine::Command(command)) => {
                    self.handle_command(account, command, tx).await;
                }
                Ok(InputLine::Message { chat_id, content }) => {
                    self.handle_message(account, chat_id, content, tx).await;
                }
                Err(e) => send(tx, e.wire_line()),
            }
        }
    }

    async fn handle_command(&self, account: &Account, command: Command, tx: &UnboundedSender<String>) {
        match command {
            Command::Help => {
                for line in wire::HELP_LINES {
                    send(tx, *line);
                }
            }
            Command::List => {
                send(tx, wire::LIST_HEADER);
                let chats = self.ctx.chats.list_for_user(account.id).await;
                if chats.is_empty() {
                    send(tx, wire::NO_CHATS);
                }
                for summary in chats {
                    send(tx, wire::list_entry(summary.id, summary.kind));
                }
            }
            Command::Open(chat_id) => match self.ctx.chats.messages(chat_id).await {
                Some(log) => {
                    send(tx, wire::open_header(chat_id));
                    for message in log {
                        send(tx, message.format_log_line());
                    }
                }
                None => send(tx, wire::CHAT_NOT_FOUND),
            },
            Command::NewDm(username) => match self.ctx.users.get(&username).await {
                Some(target) => {
                    let summary = self.ctx.chats.create_direct(account.id, target.id).await;
                    self.persist_chat(summary.id, "DirectMessage", None, &[account.id, target.id])
                        .await;
                    send(tx, wire::dm_created(summary.id));
                }
                None => send(tx, wire::USER_NOT_FOUND),
            },
            Command::NewGroup(name) => {
                let summary = self.ctx.chats.create_group(&name, account.id).await;
                self.persist_chat(summary.id, "Gruppo", Some(&name), &[account.id])
                    .await;
                send(tx, wire::group_created(summary.id));
            }
            Command::Add { chat_id, username } => {
                self.handle_add(chat_id, &username, tx).await;
            }
            Command::Unknown(_) => send(tx, wire::UNKNOWN_COMMAND),
        }
    }

    /// `/add`: chat existence, chat kind, target existence and duplicate
    /// membership are reported in that order, as clients expect.
    async fn handle_add(&self, chat_id: i64, username: &str, tx: &UnboundedSender<String>) {
        let Some(summary) = self.ctx.chats.get(chat_id).await else {
            send(tx, wire::CHAT_NOT_FOUND);
            return;
        };
        if summary.kind != crate::chat::ChatKind::Group {
            send(tx, wire::NOT_A_GROUP);
            return;
        }
        let Some(target) = self.ctx.users.get(username).await else {
            send(tx, wire::USER_NOT_FOUND);
            return;
        };

        match self.ctx.chats.add_member(chat_id, target.id).await {
            Ok(()) => {
                self.persist_member(chat_id, target.id).await;
                send(tx, wire::MEMBER_ADDED);
            }
            Err(AddMemberError::AlreadyMember) => send(tx, wire::ALREADY_IN_GROUP),
            Err(AddMemberError::NotAGroup) => send(tx, wire::NOT_A_GROUP),
            Err(AddMemberError::ChatNotFound) => send(tx, wire::CHAT_NOT_FOUND),
        }
    }

    /// Post a message: allocate, append, persist, fan out.
    async fn handle_message(
        &self,
        account: &Account,
        chat_id: i64,
        content: String,
        tx: &UnboundedSender<String>,
    ) {
        match self
            .ctx
            .chats
            .append_message(chat_id, account.id, content)
            .await
        {
            Ok((message, participants)) => {
                self.persist_message(&message).await;
                self.fan_out(&message, &participants).await;
            }
            Err(_) => send(tx, wire::CHAT_NOT_FOUND),
        }
    }

    /// Push the formatted line to every participant's bound session.
    ///
    /// Unbound participants simply miss the live line; there is no queuing.
    /// Each recipient is pushed at most once even if it appears twice in
    /// the participant set (self-DM).
    async fn fan_out(&self, message: &Message, participants: &[i64]) {
        let line = message.format_push_line();
        let mut delivered: Vec<i64> = Vec::with_capacity(participants.len());

        for &user_id in participants {
            if delivered.contains(&user_id) {
                continue;
            }
            delivered.push(user_id);

            if let Some(handle) = self.ctx.users.route(user_id).await {
                // A send failure means the peer's writer just went away;
                // its own cleanup handles the rest.
                handle.send(line.clone());
            }
        }
    }

    async fn persist_user(&self, account: &Account) {
        if let Some(store) = &self.ctx.store {
            if let Err(e) = store.create_user(account).await {
                warn!("Persisting user {} failed: {}", account.username, e);
            }
        }
    }

    async fn persist_chat(&self, chat_id: i64, kind: &str, name: Option<&str>, members: &[i64]) {
        if let Some(store) = &self.ctx.store {
            if let Err(e) = store.create_chat(chat_id, kind, name, members).await {
                warn!("Persisting chat {} failed: {}", chat_id, e);
            }
        }
    }

    async fn persist_member(&self, chat_id: i64, user_id: i64) {
        if let Some(store) = &self.ctx.store {
            if let Err(e) = store.add_participant(chat_id, user_id).await {
                warn!(
                    "Persisting membership {} -> chat {} failed: {}",
                    user_id, chat_id, e
                );
            }
        }
    }

    async fn persist_message(&self, message: &Message) {
        if let Some(store) = &self.ctx.store {
            if let Err(e) = store.append_message(message).await {
                warn!("Persisting message {} failed: {}", message.id, e);
            }
        }
    }
}

/// Read the next line, treating EOF and read errors alike as the end of the
/// session. Strips a trailing `\r` for clients that send CRLF.
async fn read_line(lines: &mut LineReader) -> Option<String> {
    match lines.next_line().await {
        Ok(Some(line)) => Some(line.strip_suffix('\r').map(String::from).unwrap_or(line)),
        Ok(None) => None,
        Err(e) => {
            debug!("Read failed, closing session: {}", e);
            None
        }
    }
}

/// Queue a line for the writer task. Failures mean the writer already quit.
fn send(tx: &UnboundedSender<String>, line: impl Into<String>) {
    let _ = tx.send(line.into());
}

/// Writer task: drains the session's output channel onto the socket, one
/// newline-terminated line per send. Keeping all writes on one task stops
/// fan-out pushes and command replies from interleaving mid-line.
async fn write_loop(mut half: OwnedWriteHalf, mut rx: UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        let mut buf = line.into_bytes();
        buf.push(b'\n');
        if half.write_all(&buf).await.is_err() {
            break;
        }
    }
}
