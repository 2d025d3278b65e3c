pub mod chat;
pub mod knowledge;
pub mod settings;

use std::io::Write;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::ClientConfig;
use crate::store::Stores;

pub const HELP: &str = "\
Type a question to ask about your documents.
  /new            start a new conversation
  /list           list conversations
  /open <id|n>    open a conversation by id or list position
  /history        show the open conversation
  /upload <path>  upload a PDF document
  /uploads        files uploaded this session
  /health         check the backend
  /info           backend endpoints
  /settings       show client settings
  /help           this text
  /quit           exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    List,
    Open(String),
    History,
    Upload(PathBuf),
    Uploads,
    Health,
    Info,
    Settings,
    Help,
    Quit,
}

impl Command {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Command::Send(line.to_string())));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let command = match (name, arg.is_empty()) {
            ("new", _) => Command::New,
            ("list", _) => Command::List,
            ("open", false) => Command::Open(arg.to_string()),
            ("open", true) => return Err("usage: /open <conversation id or number>".into()),
            ("history", _) => Command::History,
            ("upload", false) => Command::Upload(PathBuf::from(arg)),
            ("upload", true) => return Err("usage: /upload <path to pdf>".into()),
            ("uploads", _) => Command::Uploads,
            ("health", _) => Command::Health,
            ("info", _) => Command::Info,
            ("settings", _) => Command::Settings,
            ("help", _) => Command::Help,
            ("quit" | "exit", _) => Command::Quit,
            _ => return Err(format!("unknown command '/{}' (try /help)", name)),
        };
        Ok(Some(command))
    }
}

pub async fn execute(
    stores: &Stores,
    config: &ClientConfig,
    command: Command,
) -> Result<String, String> {
    match command {
        Command::Send(query) => {
            let mut stdout = std::io::stdout();
            let result = chat::send_message(stores, &query, |chunk| {
                let _ = write!(stdout, "{}", chunk);
                let _ = stdout.flush();
            })
            .await;
            println!();
            result
        }
        Command::New => Ok(chat::new_conversation(stores)),
        Command::List => chat::list_conversations(stores).await,
        Command::Open(target) => chat::open_conversation(stores, &target).await,
        Command::History => Ok(chat::history(stores)),
        Command::Upload(path) => knowledge::upload_document(stores, &path).await,
        Command::Uploads => Ok(knowledge::list_uploads(stores)),
        Command::Health => settings::health(stores).await,
        Command::Info => settings::api_info(stores).await,
        Command::Settings => Ok(settings::get_settings(config)),
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok(String::new()),
    }
}

/// Line-oriented loop over stdin until `/quit` or end of input.
pub async fn repl(stores: &Stores, config: &ClientConfig) -> std::io::Result<()> {
    println!("Heritage RAG: connected to {}", stores.client.base_url());
    println!("Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        match execute(stores, config, command).await {
            Ok(output) if output.is_empty() => {}
            Ok(output) => println!("{}", output),
            Err(message) => println!("error: {}", message),
        }
    }
    Ok(())
}
