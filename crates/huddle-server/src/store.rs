//! Storage backends.
//!
//! The CRUD service owns messages and memberships; [`HttpMessageStore`]
//! talks to its REST API. [`MemoryMessageStore`] keeps the most recent
//! messages and a fixed membership table in process, for development setups
//! without a backend.

use async_trait::async_trait;
use huddle_core::{MessageStore, NewMessageRecord, StoreError};
use huddle_protocol::{ChatId, UserId};
use reqwest::{Client, StatusCode};
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Message store backed by the CRUD service's REST API.
pub struct HttpMessageStore {
    client: Client,
    base_url: String,
}

impl HttpMessageStore {
    /// Create a store for the API rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn backend_error(operation: &'static str, response: reqwest::Response) -> StoreError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| status.to_string());
    StoreError::Backend(format!("{} returned {}: {}", operation, status, body))
}

fn network_error(operation: &'static str, error: reqwest::Error) -> StoreError {
    StoreError::Backend(format!("{} failed: {}", operation, error))
}

#[async_trait]
impl MessageStore for HttpMessageStore {
    async fn create_message(&self, record: NewMessageRecord) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.url("/messages"))
            .json(&record)
            .send()
            .await
            .map_err(|e| network_error("create_message", e))?;

        if !response.status().is_success() {
            return Err(backend_error("create_message", response).await);
        }

        debug!(chat = %record.chat, "Message stored");
        Ok(())
    }

    async fn find_chat_members(&self, chat: &ChatId) -> Result<Vec<UserId>, StoreError> {
        let response = self
            .client
            .get(self.url(&format!("/chats/{}/members", chat)))
            .send()
            .await
            .map_err(|e| network_error("find_chat_members", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::ChatNotFound(chat.clone()));
        }
        if !response.status().is_success() {
            return Err(backend_error("find_chat_members", response).await);
        }

        response
            .json::<Vec<UserId>>()
            .await
            .map_err(|e| network_error("find_chat_members", e))
    }
}

/// Messages a [`MemoryMessageStore`] keeps by default.
pub const DEFAULT_RETAINED_MESSAGES: usize = 1000;

/// In-process message store.
///
/// Only the newest `retain` messages are kept; older ones are discarded.
#[derive(Debug)]
pub struct MemoryMessageStore {
    messages: RwLock<VecDeque<NewMessageRecord>>,
    retain: usize,
    chats: RwLock<HashMap<ChatId, Vec<UserId>>>,
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAINED_MESSAGES)
    }

    /// Create an empty store keeping at most `retain` messages.
    #[must_use]
    pub fn with_retention(retain: usize) -> Self {
        Self {
            messages: RwLock::new(VecDeque::new()),
            retain,
            chats: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the membership table.
    #[must_use]
    pub fn with_chats(mut self, chats: HashMap<ChatId, Vec<UserId>>) -> Self {
        *self.chats.get_mut().unwrap_or_else(PoisonError::into_inner) = chats;
        self
    }

    /// Messages stored so far, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<NewMessageRecord> {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create_message(&self, record: NewMessageRecord) -> Result<(), StoreError> {
        debug!(chat = %record.chat, sender = %record.sender, "Message kept in memory");
        if self.retain == 0 {
            return Ok(());
        }

        let mut messages = self.messages.write().unwrap_or_else(PoisonError::into_inner);
        while messages.len() >= self.retain {
            messages.pop_front();
        }
        messages.push_back(record);
        Ok(())
    }

    async fn find_chat_members(&self, chat: &ChatId) -> Result<Vec<UserId>, StoreError> {
        self.chats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chat)
            .cloned()
            .ok_or_else(|| StoreError::ChatNotFound(chat.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record() -> NewMessageRecord {
        NewMessageRecord {
            chat: "c1".into(),
            sender: "alice".into(),
            content: "hi".to_string(),
        }
    }

    #[tokio::test]
    async fn test_http_create_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/messages"))
            .and(body_json(json!({"chat": "c1", "sender": "alice", "content": "hi"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpMessageStore::new(format!("{}/api/", server.uri()));
        store.create_message(record()).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_create_message_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
            .mount(&server)
            .await;

        let store = HttpMessageStore::new(server.uri());
        match store.create_message(record()).await {
            Err(StoreError::Backend(msg)) => assert!(msg.contains("db down")),
            other => panic!("Expected backend error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_find_chat_members() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chats/c1/members"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["alice", "bob"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/chats/gone/members"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = HttpMessageStore::new(server.uri());
        let members = store.find_chat_members(&"c1".into()).await.unwrap();
        assert_eq!(members, vec![UserId::from("alice"), UserId::from("bob")]);

        assert!(matches!(
            store.find_chat_members(&"gone".into()).await,
            Err(StoreError::ChatNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_http_backend_unreachable() {
        let store = HttpMessageStore::new("http://127.0.0.1:1");
        assert!(matches!(
            store.create_message(record()).await,
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let chats = HashMap::from([(ChatId::from("c1"), vec![UserId::from("alice")])]);
        let store = MemoryMessageStore::new().with_chats(chats);

        store.create_message(record()).await.unwrap();
        assert_eq!(store.messages(), vec![record()]);
        assert_eq!(
            store.find_chat_members(&"c1".into()).await.unwrap(),
            vec![UserId::from("alice")]
        );
        assert!(store.find_chat_members(&"c2".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_keeps_newest_messages() {
        let store = MemoryMessageStore::with_retention(2);
        for content in ["one", "two", "three"] {
            store
                .create_message(NewMessageRecord {
                    content: content.to_string(),
                    ..record()
                })
                .await
                .unwrap();
        }

        let kept: Vec<String> = store.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(kept, vec!["two".to_string(), "three".to_string()]);

        let discarding = MemoryMessageStore::with_retention(0);
        discarding.create_message(record()).await.unwrap();
        assert!(discarding.messages().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_seeded_chats() {
        let mut chats = HashMap::new();
        chats.insert(ChatId::from("team"), vec![UserId::from("alice"), UserId::from("bob")]);
        let store = MemoryMessageStore::new().with_chats(chats);

        assert_eq!(
            store.find_chat_members(&"team".into()).await.unwrap(),
            vec![UserId::from("alice"), UserId::from("bob")]
        );
    }
}
