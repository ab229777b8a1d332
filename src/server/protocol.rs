//! Wire protocol for filo.
//!
//! Parsing of client input lines and the exact server line formats. The
//! protocol is newline-delimited UTF-8 text, Italian-language responses kept
//! verbatim for compatibility with existing clients.

use crate::chat::ChatKind;

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the command list.
    Help,
    /// List the caller's chats.
    List,
    /// Dump a chat's message log.
    Open(i64),
    /// Create a direct chat with a user.
    NewDm(String),
    /// Create a group chat.
    NewGroup(String),
    /// Add a user to a group chat.
    Add { chat_id: i64, username: String },
    /// Unrecognized command.
    Unknown(String),
}

/// Result of parsing an input line in the authenticated loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    /// A slash command.
    Command(Command),
    /// A message post: `<chatId>|<content>`.
    Message { chat_id: i64, content: String },
}

/// A line the client got wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Message line without a `|` delimiter.
    MissingDelimiter,
    /// Chat id is not a valid integer.
    BadChatId,
    /// Command is missing a required argument.
    MissingArg(&'static str),
}

impl ParseError {
    /// The error line sent to the offending connection.
    pub fn wire_line(&self) -> String {
        match self {
            ParseError::MissingDelimiter => wire::BAD_MESSAGE_FORMAT.to_string(),
            ParseError::BadChatId => "Errore comando: ID chat non valido.".to_string(),
            ParseError::MissingArg(usage) => format!("Errore comando: uso: {usage}"),
        }
    }
}

/// Parse an input line from an authenticated session.
///
/// A line starting with `/` is a command; anything else is a message of the
/// form `<chatId>|<content>`, split on the FIRST delimiter only so the
/// content itself may contain `|`.
pub fn parse_line(line: &str) -> Result<InputLine, ParseError> {
    if line.starts_with('/') {
        return parse_command(line).map(InputLine::Command);
    }

    let (chat_id, content) = line.split_once('|').ok_or(ParseError::MissingDelimiter)?;
    let chat_id: i64 = chat_id.trim().parse().map_err(|_| ParseError::BadChatId)?;

    Ok(InputLine::Message {
        chat_id,
        content: content.to_string(),
    })
}

fn parse_command(line: &str) -> Result<Command, ParseError> {
    let without_slash = &line[1..];
    let (name, args) = match without_slash.find(' ') {
        Some(pos) => (&without_slash[..pos], without_slash[pos + 1..].trim()),
        None => (without_slash, ""),
    };

    let command = match name {
        "help" => Command::Help,
        "list" => Command::List,
        "open" => {
            let arg = args
                .split_whitespace()
                .next()
                .ok_or(ParseError::MissingArg("/open <id>"))?;
            Command::Open(arg.parse().map_err(|_| ParseError::BadChatId)?)
        }
        "newdm" => {
            let username = args
                .split_whitespace()
                .next()
                .ok_or(ParseError::MissingArg("/newdm <username>"))?;
            Command::NewDm(username.to_string())
        }
        "newgroup" => {
            if args.is_empty() {
                return Err(ParseError::MissingArg("/newgroup <nome>"));
            }
            Command::NewGroup(args.to_string())
        }
        "add" => {
            let mut parts = args.split_whitespace();
            let chat_id = parts
                .next()
                .ok_or(ParseError::MissingArg("/add <chatID> <username>"))?
                .parse()
                .map_err(|_| ParseError::BadChatId)?;
            let username = parts
                .next()
                .ok_or(ParseError::MissingArg("/add <chatID> <username>"))?;
            Command::Add {
                chat_id,
                username: username.to_string(),
            }
        }
        other => Command::Unknown(other.to_string()),
    };

    Ok(command)
}

/// Exact server line formats.
pub mod wire {
    use super::ChatKind;

    pub const PROMPT_CHOICE: &str = "Benvenuto! Digita 'login' o 'register':";
    pub const PROMPT_USERNAME: &str = "Username:";
    pub const PROMPT_PASSWORD: &str = "Password:";
    pub const PROMPT_REG_USERNAME: &str = "Scegli un username:";
    pub const PROMPT_REG_PASSWORD: &str = "Scegli una password:";
    pub const LOGIN_FAILED: &str = "Login fallito. Prova di nuovo.";
    pub const USERNAME_TAKEN: &str = "Username già esistente. Prova di nuovo.";
    pub const INVALID_CHOICE: &str = "Comando non valido.";
    pub const UNKNOWN_COMMAND: &str = "Comando non valido. Usa /help.";
    pub const CHAT_NOT_FOUND: &str = "Chat non trovata.";
    pub const USER_NOT_FOUND: &str = "Utente non trovato.";
    pub const NOT_A_GROUP: &str = "La chat non è un gruppo.";
    pub const ALREADY_IN_GROUP: &str = "Utente già nel gruppo.";
    pub const MEMBER_ADDED: &str = "Utente aggiunto!";
    pub const BAD_MESSAGE_FORMAT: &str = "Formato messaggio invalido. Usa: ID_CHAT|messaggio";
    pub const LIST_HEADER: &str = "Le tue chat:";
    pub const NO_CHATS: &str = "Nessuna chat.";

    /// The `/help` command list, one entry per line.
    pub const HELP_LINES: &[&str] = &[
        "--- COMANDI DISPONIBILI ---",
        "/list                    → elenco chat",
        "/open <id>              → mostra messaggi della chat",
        "/newdm <username>       → crea chat diretta",
        "/newgroup <nome>        → crea un gruppo",
        "/add <chatID> <user>    → aggiunge utente al gruppo",
    ];

    /// One-line welcome emitted on the AUTHENTICATING → AUTHENTICATED transition.
    pub fn welcome(username: &str) -> String {
        format!("Benvenuto, {username}! Digita /help per comandi.")
    }

    /// `/list` entry line.
    pub fn list_entry(id: i64, kind: ChatKind) -> String {
        format!(" • ID={id}  ({kind})")
    }

    /// `/open` header line.
    pub fn open_header(chat_id: i64) -> String {
        format!("Messaggi della chat {chat_id}:")
    }

    /// Direct chat creation confirmation.
    pub fn dm_created(id: i64) -> String {
        format!("DM creata! ID={id}")
    }

    /// Group chat creation confirmation.
    pub fn group_created(id: i64) -> String {
        format!("Gruppo creato! ID={id}")
    }
}
