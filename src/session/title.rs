//! Short titles for saved conversations

use super::chat::{AskOptions, ChatSession, SessionSettings};
use crate::api::CompletionClient;
use crate::context::TokenAccountant;
use crate::conversation::{Conversation, Role};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Model used for titles regardless of the session model
pub const TITLE_MODEL: &str = "gpt-3.5-turbo";
const TITLE_SEED: &str = "You write short titles for conversations.";
const TITLE_PROMPT: &str = "Summarize the conversation above in 10 words or fewer.";
const TITLE_MAX_TOKENS: usize = 32;

/// Produces a short title for a conversation
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, conversation: &Conversation) -> Result<String>;
}

/// Asks the model for a title, in a throwaway session
pub struct SessionTitler {
    client: CompletionClient,
    accountant: Arc<TokenAccountant>,
}

impl SessionTitler {
    pub fn new(client: CompletionClient, accountant: Arc<TokenAccountant>) -> Self {
        Self { client, accountant }
    }
}

#[async_trait]
impl Summarizer for SessionTitler {
    async fn summarize(&self, conversation: &Conversation) -> Result<String> {
        let mut settings = SessionSettings::new(TITLE_MODEL, TITLE_SEED);
        settings.generation.temperature = 0.0;
        settings.generation.max_tokens = Some(TITLE_MAX_TOKENS);

        // The throwaway default only has to fit the title model; `replace` installs the history
        let session =
            ChatSession::with_accountant(self.client.clone(), settings, self.accountant.clone())?;
        let id = Uuid::new_v4().to_string();
        session.replace(&id, conversation.messages().to_vec())?;

        debug!("Requesting title for {} messages", conversation.len());
        let title = session
            .ask(TITLE_PROMPT, AskOptions::default().conversation(&id))
            .await?;
        Ok(clean_title(&title))
    }
}

/// First line of the first user message, clipped
#[derive(Debug, Clone)]
pub struct FirstLineTitler {
    pub max_chars: usize,
}

impl Default for FirstLineTitler {
    fn default() -> Self {
        Self { max_chars: 30 }
    }
}

#[async_trait]
impl Summarizer for FirstLineTitler {
    async fn summarize(&self, conversation: &Conversation) -> Result<String> {
        let first_line = conversation
            .messages()
            .iter()
            .find(|message| message.role == Role::User)
            .and_then(|message| message.content.lines().find(|line| !line.trim().is_empty()))
            .map(str::trim);

        Ok(match first_line {
            Some(line) if line.chars().count() > self.max_chars => {
                let clipped: String = line.chars().take(self.max_chars).collect();
                format!("{}…", clipped.trim_end())
            }
            Some(line) => line.to_string(),
            None => "Untitled conversation".to_string(),
        })
    }
}

fn clean_title(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use crate::conversation::Message;
    use serde_json::json;

    #[tokio::test]
    async fn test_first_line_titler() {
        let titler = FirstLineTitler { max_chars: 10 };
        let conversation = Conversation::from_messages(vec![
            Message::system("s"),
            Message::user("\n  What is a monad really?\nmore"),
            Message::assistant("a"),
        ])
        .unwrap();
        assert_eq!(titler.summarize(&conversation).await.unwrap(), "What is a…");

        let short = Conversation::from_messages(vec![Message::system("s"), Message::user("Hi")]).unwrap();
        assert_eq!(titler.summarize(&short).await.unwrap(), "Hi");

        let empty = Conversation::seeded("s");
        assert_eq!(titler.summarize(&empty).await.unwrap(), "Untitled conversation");
    }

    #[tokio::test]
    async fn test_titles_conversation_with_long_seed() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(
            "data: {}\n\ndata: [DONE]\n\n",
            json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": "\"Long prompts\""}}]})
        );
        let mock = server
            .mock("POST", "/api/v1/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({"model": TITLE_MODEL})))
            .with_status(200)
            .with_body(body)
            .expect(1)
            .create_async()
            .await;

        let client = CompletionClient::new(ApiConfig {
            base_url: server.url(),
            ..ApiConfig::default()
        })
        .unwrap();
        let titler = SessionTitler::new(client, Arc::new(TokenAccountant::new()));

        // Fits gpt-4-32k but not the title model's window
        let conversation = Conversation::from_messages(vec![
            Message::system("word ".repeat(5000)),
            Message::user("Why is my prompt so long?"),
            Message::assistant("It repeats one word."),
        ])
        .unwrap();

        assert_eq!(titler.summarize(&conversation).await.unwrap(), "Long prompts");
        mock.assert_async().await;
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("\n \"Weather in Paris\"\n"), "Weather in Paris");
        assert_eq!(clean_title(""), "");
    }
}
