//! Stream session lifecycle, cancellation and failure handling.

use chorus_engine::{
    ChatId, FAILURE_NOTICE, Role, SessionState, StreamFailure, TransportError, WireEvent,
};
use wiremock::MockServer;

use crate::common::{
    bodies_for, full_exchange, http_controller, mount_chat_error, mount_chat_stream, mount_save,
    recording_registry, scripted_controller, sse_body, wait_for_request,
};

#[tokio::test]
async fn completed_exchange_is_aggregated_and_saved() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, sse_body(&full_exchange())).await;
    mount_save(&server, 200).await;
    let (mut controller, _store) = http_controller(&server);
    let mut registry = recording_registry();

    let submission = controller
        .submit("What is the capital of France?", None)
        .unwrap();
    let outcome = controller.run_to_completion(&mut registry).await;
    let Some(Ok(timings)) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert!(timings.first_model_ms.is_some());
    assert!(timings.synthesis_ms.is_some());

    let chat = controller.gateway().chat(&submission.chat).unwrap();
    assert_eq!(chat.title, "What is the capital of France?");
    let reply = chat.messages.last().unwrap();
    assert_eq!(reply.role(), Role::Assistant);
    assert_eq!(reply.model_answers().len(), 4);
    assert!(reply.model_answers().contains_key("deepseek"));

    let synthesis = reply.synthesis().expect("tagged synthesis");
    assert!(synthesis.answer.is_some());
    assert!(synthesis.tips.is_some());
    let reasoning = synthesis.reasoning.expect("reasoning section");
    let breakdown = reasoning.breakdown.expect("labelled reasoning");
    assert!(breakdown.consensus.is_some());
    assert!(breakdown.conflicts.is_none());

    assert!(wait_for_request(&server, "/api/chats/save").await);
    let saved = bodies_for(&server, "/api/chats/save").await;
    assert_eq!(saved[0]["chat_id"], submission.chat.as_str());
    let bot = &saved[0]["messages"][1];
    assert_eq!(bot["sender"], "bot");
    assert_eq!(bot["model1_name"], "deepseek");
    assert_eq!(bot["model4_name"], "qwen");

    let recorder = registry.current_mut().unwrap();
    assert!(recorder.failures.is_empty());
    assert_eq!(recorder.states.last(), Some(&SessionState::Idle));
    assert!(recorder.states.contains(&SessionState::Completed));
}

#[tokio::test]
async fn cancel_leaves_no_unanswered_message_in_storage() {
    let (mut controller, transport, store) = scripted_controller();
    let feed = transport.queue();
    let mut registry = recording_registry();

    let submission = controller.submit("Explain monads", None).unwrap();
    feed.event(&WireEvent::model_response("llama", "A monad is..."));

    // Opened, then the model response.
    assert!(controller.next_update(&mut registry).await);
    assert!(controller.next_update(&mut registry).await);
    assert_eq!(controller.state(), SessionState::Streaming);
    let pending = controller.gateway().chat(&submission.chat).unwrap();
    assert!(pending.messages.iter().any(|m| m.is_pending()));

    assert!(controller.cancel());
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(matches!(
        controller.last_outcome(),
        Some(Err(StreamFailure::Cancelled))
    ));

    // A late chunk after cancellation is never applied.
    feed.event(&WireEvent::synthesis("too late"));
    assert_eq!(controller.process_stream_events(&mut registry), 0);

    let persisted = store.chats();
    let chat = persisted
        .iter()
        .find(|c| c.id == submission.chat)
        .expect("chat persisted");
    assert!(chat.messages.iter().all(|m| m.text().is_some()));
    assert_eq!(chat.messages.len(), 1);
    assert_eq!(chat.messages[0].role(), Role::User);

    let recorder = registry.current_mut().unwrap();
    assert!(recorder.failures.is_empty());
    assert!(recorder.states.contains(&SessionState::Cancelled));
}

#[tokio::test]
async fn navigating_to_the_new_chat_keeps_its_stream() {
    let (mut controller, transport, _store) = scripted_controller();
    let _feed = transport.queue();

    let submission = controller.submit("Hello there", None).unwrap();
    assert!(submission.created);

    assert!(!controller.chat_identity_changed(submission.chat.clone()));
    assert_eq!(controller.active_exchange(), Some(submission.exchange));

    assert!(controller.chat_identity_changed(ChatId::from("chat-other")));
    assert_eq!(controller.active_exchange(), None);
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(controller.current_chat(), Some(&ChatId::from("chat-other")));
}

#[tokio::test]
async fn second_navigation_to_the_new_chat_aborts() {
    let (mut controller, transport, _store) = scripted_controller();
    let _feed = transport.queue();

    let submission = controller.submit("Hello there", None).unwrap();
    assert!(!controller.chat_identity_changed(submission.chat.clone()));
    assert!(controller.chat_identity_changed(submission.chat.clone()));
    assert!(matches!(
        controller.last_outcome(),
        Some(Err(StreamFailure::Cancelled))
    ));
}

#[tokio::test]
async fn navigating_to_an_existing_chat_aborts() {
    let (mut controller, transport, _store) = scripted_controller();
    let first = transport.queue();
    let _second = transport.queue();
    let mut registry = recording_registry();

    let earlier = controller.submit("Earlier chat", None).unwrap();
    first.event(&WireEvent::synthesis("done here"));
    first.event(&WireEvent::Done);
    controller.run_to_completion(&mut registry).await;

    let live = controller.submit("Another one", None).unwrap();
    assert_ne!(live.chat, earlier.chat);
    assert!(controller.chat_identity_changed(earlier.chat));
    assert_eq!(controller.active_exchange(), None);
}

#[tokio::test]
async fn stream_without_done_fails_once() {
    let (mut controller, transport, store) = scripted_controller();
    let feed = transport.queue();
    let mut registry = recording_registry();

    let submission = controller.submit("Compare sorting algorithms", None).unwrap();
    feed.event(&WireEvent::model_response("glm", "quicksort"));
    feed.event(&WireEvent::model_response("qwen", "mergesort"));
    drop(feed);

    let outcome = controller.run_to_completion(&mut registry).await;
    assert!(matches!(outcome, Some(Err(StreamFailure::ProtocolAnomaly))));
    assert_eq!(controller.state(), SessionState::Idle);

    let chat = controller.gateway().chat(&submission.chat).unwrap();
    let failed: Vec<_> = chat.messages.iter().filter(|m| m.is_failed()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].text(), Some(FAILURE_NOTICE));
    assert_eq!(chat.messages.len(), 2);

    let recorder = registry.current_mut().unwrap();
    assert_eq!(recorder.failures.len(), 1);
    assert!(recorder.states.contains(&SessionState::Failed));

    controller.gateway().flush().unwrap();
    assert!(store.chats()[0].messages.iter().all(|m| !m.is_pending()));
}

#[tokio::test]
async fn stream_breaking_after_synthesis_keeps_the_synthesis() {
    let (mut controller, transport, store) = scripted_controller();
    let feed = transport.queue();
    let mut registry = recording_registry();

    let submission = controller.submit("Summarize the debate", None).unwrap();
    feed.event(&WireEvent::model_response("glm", "both sides"));
    feed.event(&WireEvent::synthesis("===ANSWER===\nreal synthesis"));
    drop(feed);

    let outcome = controller.run_to_completion(&mut registry).await;
    assert!(matches!(outcome, Some(Err(StreamFailure::ProtocolAnomaly))));

    let chat = controller.gateway().chat(&submission.chat).unwrap();
    assert_eq!(chat.messages.len(), 3);
    let answered = &chat.messages[1];
    assert_eq!(answered.role(), Role::Assistant);
    assert!(!answered.is_failed());
    assert_eq!(answered.text(), Some("===ANSWER===\nreal synthesis"));
    assert_eq!(answered.model_answers().len(), 1);

    let failed: Vec<_> = chat.messages.iter().filter(|m| m.is_failed()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].text(), Some(FAILURE_NOTICE));
    assert_eq!(failed[0].exchange(), submission.exchange);

    controller.gateway().flush().unwrap();
    let persisted = &store.chats()[0];
    assert!(
        persisted
            .messages
            .iter()
            .any(|m| m.text() == Some("===ANSWER===\nreal synthesis"))
    );
}

#[tokio::test]
async fn error_status_fails_and_allows_a_new_submission() {
    let server = MockServer::start().await;
    mount_chat_error(&server, 500, "model backend down").await;
    let (mut controller, _store) = http_controller(&server);
    let mut registry = recording_registry();

    let submission = controller.submit("Anything", None).unwrap();
    let outcome = controller.run_to_completion(&mut registry).await;
    let Some(Err(StreamFailure::Transport(TransportError::Status { status, body }))) = outcome
    else {
        panic!("expected a status failure, got {outcome:?}");
    };
    assert_eq!(*status, 500);
    assert_eq!(body, "model backend down");

    let chat = controller.gateway().chat(&submission.chat).unwrap();
    assert_eq!(chat.messages.len(), 2);
    assert_eq!(chat.messages[1].text(), Some(FAILURE_NOTICE));
    assert_eq!(controller.state(), SessionState::Idle);

    assert!(
        controller
            .submit("Try again", Some(submission.chat.clone()))
            .is_ok()
    );
    assert_eq!(controller.state(), SessionState::Submitting);
}

#[tokio::test]
async fn new_submission_supersedes_the_live_one() {
    let (mut controller, transport, _store) = scripted_controller();
    let first = transport.queue();
    let second = transport.queue();
    let mut registry = recording_registry();

    let a = controller.submit("First", None).unwrap();
    first.event(&WireEvent::model_response("llama", "partial"));
    assert!(controller.next_update(&mut registry).await);
    assert!(controller.next_update(&mut registry).await);

    let b = controller.submit("Second", Some(a.chat.clone())).unwrap();
    assert_ne!(a.exchange, b.exchange);
    assert_eq!(controller.active_exchange(), Some(b.exchange));

    second.event(&WireEvent::synthesis("answer"));
    second.event(&WireEvent::Done);
    controller.run_to_completion(&mut registry).await;

    let chat = controller.gateway().chat(&a.chat).unwrap();
    assert!(chat.messages.iter().all(|m| m.exchange() != a.exchange || m.role() == Role::User));
    assert_eq!(chat.messages.last().and_then(|m| m.text()), Some("answer"));
    assert_eq!(transport.requests().len(), 2);
}
