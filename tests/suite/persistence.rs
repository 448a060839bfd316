//! Persistence gateway against a file store and a mock chat store.

use std::time::Duration;

use chorus_engine::{
    ARCHIVE_FILE, CHATS_FILE, ChatId, ChatRecord, ExchangeId, FileStore, GatewaySettings,
    LocalStore, Message, PersistenceGateway, SaveOutcome,
};
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{bodies_for, memory_gateway, mount_save, remote_store};

fn answered_chat(id: &str, models: &[&str]) -> ChatRecord {
    let now = Utc::now();
    let exchange = ExchangeId::mint();
    let mut chat = ChatRecord::new(ChatId::from(id), "Why is the sky blue?", now);
    chat.messages
        .push(Message::user(exchange, "Why is the sky blue?", now));
    let mut reply = Message::pending_assistant(exchange, now);
    for model in models {
        reply.upsert_answer((*model).to_string(), format!("{model}: Rayleigh scattering"));
    }
    reply.set_synthesis("===ANSWER===\nRayleigh scattering".to_string());
    chat.messages.push(reply);
    chat
}

#[tokio::test(start_paused = true)]
async fn streaming_updates_coalesce_into_one_file_write() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = PersistenceGateway::open(
        FileStore::new(dir.path()),
        None,
        GatewaySettings {
            debounce: Duration::from_millis(60),
            model_slots: 4,
        },
    )
    .unwrap();
    let mut changed = gateway.subscribe();

    let chat = ChatId::from("chat-stream");
    let exchange = ExchangeId::mint();
    gateway.insert_chat(ChatRecord::new(chat.clone(), "stream", Utc::now()));
    let mut reply = Message::pending_assistant(exchange, Utc::now());
    for model in ["deepseek", "llama", "glm", "qwen"] {
        reply.upsert_answer(model.to_string(), "answer".to_string());
        let snapshot = reply.clone();
        gateway.schedule_chat(&chat, |record| record.upsert_message(snapshot, Utc::now()));
    }
    assert!(!dir.path().join(CHATS_FILE).exists());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*changed.borrow_and_update(), 1);

    let stored = FileStore::new(dir.path()).load_chats().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].messages.len(), 1);
    assert_eq!(stored[0].messages[0].model_answers().len(), 4);
}

#[tokio::test]
async fn transcript_is_reloaded_on_open() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let first =
        PersistenceGateway::open(FileStore::new(dir.path()), None, GatewaySettings::default())?;
    first.insert_chat(answered_chat("chat-1", &["llama"]));
    first.flush()?;

    let reopened =
        PersistenceGateway::open(FileStore::new(dir.path()), None, GatewaySettings::default())?;
    let chat = reopened
        .chat(&ChatId::from("chat-1"))
        .ok_or_else(|| anyhow::anyhow!("chat-1 was not reloaded"))?;
    assert_eq!(chat.messages.len(), 2);
    Ok(())
}

#[tokio::test]
async fn save_completed_pushes_slotted_record() {
    let server = MockServer::start().await;
    mount_save(&server, 200).await;
    let dir = tempfile::tempdir().unwrap();
    let gateway = PersistenceGateway::open(
        FileStore::new(dir.path()),
        Some(remote_store(&server)),
        GatewaySettings::default(),
    )
    .unwrap();
    gateway.insert_chat(answered_chat("chat-1", &["qwen", "deepseek", "glm", "llama", "mistral"]));

    let outcome = gateway.save_completed(&ChatId::from("chat-1")).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Synced);

    let saved = bodies_for(&server, "/api/chats/save").await;
    assert_eq!(saved.len(), 1);
    let bot = &saved[0]["messages"][1];
    assert_eq!(bot["synthesized_response"], "===ANSWER===\nRayleigh scattering");
    assert_eq!(bot["model1_name"], "qwen");
    assert_eq!(bot["model4_name"], "llama");
    assert!(bot.get("model5_name").is_none());
    assert!(!saved[0].to_string().contains("mistral"));

    let archive = FileStore::new(dir.path()).load_archive().unwrap();
    assert_eq!(archive.len(), 1);
    assert!(dir.path().join(ARCHIVE_FILE).exists());

    // Saving again is an upsert, not a duplicate.
    gateway.save_completed(&ChatId::from("chat-1")).await.unwrap();
    assert_eq!(FileStore::new(dir.path()).load_archive().unwrap().len(), 1);
}

#[tokio::test]
async fn remote_failure_keeps_local_copy() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_save(&server, 500).await;
    let (gateway, store) = memory_gateway(Some(remote_store(&server)));
    gateway.insert_chat(answered_chat("chat-1", &["llama"]));

    let outcome = gateway.save_completed(&ChatId::from("chat-1")).await?;
    assert_eq!(outcome, SaveOutcome::LocalOnly);
    assert_eq!(store.load_archive()?.len(), 1);
    assert_eq!(store.chats().len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_fetch_yields_an_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chats"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let (gateway, _store) = memory_gateway(Some(remote_store(&server)));

    assert!(gateway.fetch_remote().await.is_empty());
    assert_eq!(gateway.import_remote().await, 0);
}

#[tokio::test]
async fn remote_chats_are_imported_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chats": [{
                "chat_id": "chat-remote",
                "title": "From the server",
                "created_at": "2024-05-01T10:00:00Z",
                "updated_at": "2024-05-01T10:05:00Z",
                "messages": [
                    {"message_id": "m1", "sender": "user", "user_prompt": "hi",
                     "created_at": "2024-05-01T10:00:00Z"},
                    {"message_id": "m2", "sender": "bot", "synthesized_response": "hello",
                     "created_at": "2024-05-01T10:00:05Z",
                     "model1_name": "llama", "model1_response": "hey",
                     "model2_name": null, "model2_response": null}
                ]
            }]
        })))
        .mount(&server)
        .await;
    let (gateway, _store) = memory_gateway(Some(remote_store(&server)));

    assert_eq!(gateway.import_remote().await, 1);
    assert_eq!(gateway.import_remote().await, 0);

    let chat = gateway.chat(&ChatId::from("chat-remote")).unwrap();
    assert_eq!(chat.title, "From the server");
    assert_eq!(chat.messages[1].model_answers().len(), 1);
    assert_eq!(chat.messages[1].text(), Some("hello"));
}

#[tokio::test]
async fn delete_reaches_the_remote_store() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/chats/chat-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let (gateway, store) = memory_gateway(Some(remote_store(&server)));
    gateway.insert_chat(answered_chat("chat-1", &["glm"]));
    gateway.insert_chat(answered_chat("chat-2", &["glm"]));

    assert!(gateway.delete_chat(&ChatId::from("chat-1")).await.unwrap());
    assert_eq!(store.chats().len(), 1);
    assert_eq!(store.chats()[0].id, ChatId::from("chat-2"));
}
