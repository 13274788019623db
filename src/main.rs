//! Interactive chat front end
//!
//! `/quit`, end of input, or Ctrl-C at the `> ` prompt leaves. Ctrl-C while a
//! reply streams only cancels that reply.

use anyhow::{Context, Result};
use chat_session::api::ModelInfo;
use chat_session::config::Config;
use chat_session::conversation::DEFAULT_CONVERSATION;
use chat_session::logging::init_logging;
use chat_session::persistence::{JsonFileStore, SessionArchive};
use chat_session::session::{
    AskOptions, ChatSession, FirstLineTitler, ReplyStream, SessionSettings, SessionTitler,
    Summarizer,
};
use chat_session::{CompletionClient, ModelProfile};
use clap::Parser;
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser)]
#[command(name = "chat-session")]
#[command(about = "Chat with an OpenAI-compatible completion API", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Model id, overriding the configured one
    #[arg(short, long)]
    model: Option<String>,

    /// System prompt, overriding the configured one
    #[arg(short, long)]
    system: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Ask(String),
    Retry,
    Reset,
    Rollback(usize),
    Save,
    Sessions,
    Load(usize),
    Models,
    Model(String),
    System(String),
    Image(String),
    Tokens,
    Quit,
    Unknown(String),
    Empty,
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Ask(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        match (name, arg) {
            ("retry", _) => Command::Retry,
            ("reset", _) => Command::Reset,
            ("rollback", "") => Command::Rollback(1),
            ("rollback", n) => n
                .parse()
                .map(Command::Rollback)
                .unwrap_or_else(|_| Command::Unknown(line.to_string())),
            ("save", _) => Command::Save,
            ("sessions", _) => Command::Sessions,
            ("load", n) => n
                .parse()
                .map(Command::Load)
                .unwrap_or_else(|_| Command::Unknown(line.to_string())),
            ("models", _) => Command::Models,
            ("model", id) if !id.is_empty() => Command::Model(id.to_string()),
            ("system", prompt) if !prompt.is_empty() => Command::System(prompt.to_string()),
            ("image", prompt) if !prompt.is_empty() => Command::Image(prompt.to_string()),
            ("tokens", _) => Command::Tokens,
            ("quit" | "exit", _) => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

/// Profile for `id`: the listed context window when the server advertises one,
/// otherwise the configured limits
fn profile_for(models: &[ModelInfo], id: &str, config: &Config) -> Result<Option<ModelProfile>> {
    let Some(listed) = models.iter().find(|model| model.id == id) else {
        return Ok(None);
    };
    let profile = match listed.tokens {
        Some(tokens) => ModelProfile::with_context_window(id, tokens)?,
        None => config.model_profile(id)?,
    };
    Ok(Some(profile))
}

struct App {
    config: Config,
    session: ChatSession,
    client: CompletionClient,
    archive: SessionArchive,
    titler: SessionTitler,
}

impl App {
    fn model(&self) -> String {
        self.session.settings().profile.id
    }

    async fn run(&self, command: Command) -> Result<bool> {
        match command {
            Command::Empty => {}
            Command::Ask(prompt) => {
                self.stream_reply(|options| self.session.ask_stream(&prompt, options))
                    .await;
            }
            Command::Retry => {
                self.stream_reply(|options| self.session.retry(options)).await;
            }
            Command::Reset => {
                self.session.reset(DEFAULT_CONVERSATION, None)?;
                println!("Conversation reset.");
            }
            Command::Rollback(n) => {
                let removed = self.session.rollback(DEFAULT_CONVERSATION, n)?;
                println!("Removed {} messages.", removed.len());
            }
            Command::Save => {
                let conversation = self.session.conversation(DEFAULT_CONVERSATION)?;
                let title = match self.titler.summarize(&conversation).await {
                    Ok(title) if !title.is_empty() => title,
                    Ok(_) => FirstLineTitler::default().summarize(&conversation).await?,
                    Err(e) => {
                        warn!("Title request failed, using first line: {}", e);
                        FirstLineTitler::default().summarize(&conversation).await?
                    }
                };
                let saved = self
                    .archive
                    .save_session(&self.model(), &title, self.session.snapshot())
                    .await?;
                println!("Saved \"{}\".", saved.title);
            }
            Command::Sessions => {
                let sessions = self.archive.saved_sessions(&self.model()).await;
                if sessions.is_empty() {
                    println!("No saved sessions.");
                }
                for (index, saved) in sessions.iter().enumerate() {
                    match saved.saved_at {
                        Some(at) => println!("{:>3}  {}  ({})", index, saved.title, at.format("%Y-%m-%d %H:%M")),
                        None => println!("{:>3}  {}", index, saved.title),
                    }
                }
            }
            Command::Load(index) => {
                let mut sessions = self.archive.saved_sessions(&self.model()).await;
                if index >= sessions.len() {
                    println!("No saved session {}.", index);
                } else {
                    let saved = sessions.swap_remove(index);
                    self.session.restore(saved.conversation)?;
                    println!("Loaded \"{}\".", saved.title);
                }
            }
            Command::Models => {
                for model in self.client.list_models().await?.iter() {
                    match model.tokens {
                        Some(tokens) => println!("{}  ({} tokens)", model.id, tokens),
                        None => println!("{}", model.id),
                    }
                }
            }
            Command::Model(id) => {
                let profile = match self.client.list_models().await {
                    Ok(models) => profile_for(&models, &id, &self.config)?,
                    Err(e) => {
                        warn!("Model listing failed, using configured limits: {}", e);
                        Some(self.config.model_profile(&id)?)
                    }
                };
                match profile {
                    Some(profile) => {
                        self.session.switch_model(profile)?;
                        println!("Model {}. Conversation reset.", id);
                    }
                    None => println!("No model {}. See /models.", id),
                }
            }
            Command::System(prompt) => {
                self.session.set_system_prompt(&prompt)?;
                println!("System prompt set. Conversation reset.");
            }
            Command::Image(prompt) => {
                for url in self.client.create_images(&prompt, 1, "1024x1024").await? {
                    println!("{}", url);
                }
            }
            Command::Tokens => {
                let used = self.session.token_count(DEFAULT_CONVERSATION)?;
                let profile = self.session.settings().profile;
                println!(
                    "{} tokens used, truncating above {}, window {}",
                    used, profile.truncate_limit, profile.max_tokens
                );
            }
            Command::Quit => return Ok(false),
            Command::Unknown(line) => println!("unknown command: {}", line),
        }
        Ok(true)
    }

    /// Print a reply as it streams. Ctrl-C cancels it.
    async fn stream_reply<F, Fut>(&self, start: F)
    where
        F: FnOnce(AskOptions) -> Fut,
        Fut: std::future::Future<Output = chat_session::Result<ReplyStream>>,
    {
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            }
        });

        match start(AskOptions::default().with_cancellation(cancel)).await {
            Ok(mut stream) => {
                let mut stdout = std::io::stdout();
                while let Some(fragment) = stream.next().await {
                    match fragment {
                        Ok(text) => {
                            print!("{}", text);
                            let _ = stdout.flush();
                        }
                        Err(e) => {
                            println!();
                            eprintln!("error: {}", e);
                            break;
                        }
                    }
                }
                println!();
            }
            Err(e) => eprintln!("error: {}", e),
        }

        watcher.abort();
    }
}

/// Next line typed at the prompt. `None` on end of input or when `interrupt` fires first.
async fn next_input<R, I, T>(lines: &mut Lines<R>, interrupt: I) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    I: std::future::Future<Output = T>,
{
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        _ = interrupt => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(model) = cli.model {
        config.api.model = model;
    }
    if let Some(system) = cli.system {
        config.session.system_prompt = system;
    }

    init_logging(&config.logging)?;

    let client = CompletionClient::new(config.api.clone())?;
    let session = ChatSession::new(client.clone(), SessionSettings::from_config(&config)?)?;
    let store = JsonFileStore::new(config.storage.resolved_dir()?);
    let archive = SessionArchive::new(Arc::new(store), config.storage.load_timeout());
    let titler = SessionTitler::new(client.clone(), session.accountant());

    let app = App {
        config,
        session,
        client,
        archive,
        titler,
    };

    println!("Model {}. Type /quit to leave.", app.model());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = next_input(&mut lines, tokio::signal::ctrl_c()).await? else {
            println!();
            break;
        };
        match app.run(Command::parse(&line)).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("error: {}", e),
        }
    }

    Ok(())
}
