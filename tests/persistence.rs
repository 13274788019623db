//! Saved sessions round-trip through the storage backends

use chat_session::conversation::{Conversation, ConversationSet, Message, DEFAULT_CONVERSATION};
use chat_session::persistence::{
    sessions_key, JsonFileStore, MemoryStore, PersistenceAdapter, SessionArchive,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn sample_set(question: &str) -> ConversationSet {
    let mut set = ConversationSet::new();
    set.insert(
        DEFAULT_CONVERSATION,
        Conversation::from_messages(vec![
            Message::system("You are a helper."),
            Message::user(question),
            Message::assistant("partial").mark_incomplete(),
        ])
        .unwrap(),
    );
    set
}

#[tokio::test]
async fn test_sessions_are_listed_most_recent_first() {
    let archive = SessionArchive::new(Arc::new(MemoryStore::new()), Duration::from_millis(200));

    archive.save_session("gpt-4", "first", sample_set("a")).await.unwrap();
    archive.save_session("gpt-4", "second", sample_set("b")).await.unwrap();
    archive.save_session("gpt-3.5-turbo", "other model", sample_set("c")).await.unwrap();

    let sessions = archive.saved_sessions("gpt-4").await;
    let titles: Vec<&str> = sessions.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["second", "first"]);
    assert!(sessions.iter().all(|s| s.saved_at.is_some()));
    assert_eq!(sessions[1].conversation, sample_set("a"));
}

#[tokio::test]
async fn test_file_store_keeps_the_storage_layout() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path()));
    let archive = SessionArchive::new(store.clone(), Duration::from_millis(500));

    assert_ok!(archive.save_session("gpt-4", "weather", sample_set("rain?")).await);

    let raw = store.load(&sessions_key("gpt-4")).await.unwrap().unwrap();
    assert_eq!(raw[0]["title"], "weather");
    assert_eq!(
        raw[0]["conversation"]["default"][1],
        json!({"role": "user", "content": "rain?"})
    );
    assert_eq!(raw[0]["conversation"]["default"][2]["incomplete"], true);

    let reopened = SessionArchive::new(
        Arc::new(JsonFileStore::new(dir.path())),
        Duration::from_millis(500),
    );
    let sessions = reopened.saved_sessions("gpt-4").await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].conversation, sample_set("rain?"));
}

#[tokio::test]
async fn test_missing_key_loads_default() {
    let dir = tempfile::tempdir().unwrap();
    let archive = SessionArchive::new(
        Arc::new(JsonFileStore::new(dir.path().join("never-created"))),
        Duration::from_millis(200),
    );

    assert!(archive.saved_sessions("gpt-4").await.is_empty());
    let base_url: String = archive.load_or("base_url", "http://localhost:8080".to_string()).await;
    assert_eq!(base_url, "http://localhost:8080");
}
