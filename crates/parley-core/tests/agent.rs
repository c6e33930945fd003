mod common;

use common::{echo_tool, registry, MockFactory, ScriptedDriver};
use futures::StreamExt;
use parley_core::storage::{StorageManager, UsageStorage};
use parley_core::{
    Agent, AgentError, Event, InMemoryStorage, Message, MessageKind, ProviderEntry,
    RecordingListener, Role, SessionIdentity, StorageConfig, StorageDriver, ToolCall, Usage,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn echo_call() -> Message {
    Message::tool_calls(vec![ToolCall::new("call_1", "echo", r#"{"input":"x"}"#)])
}

#[tokio::test]
async fn test_fallback_order_and_restart() {
    let p1 = ScriptedDriver::failing("p1", "p1 down");
    let p2 = ScriptedDriver::failing("p2", "p2 down");
    let p3 = ScriptedDriver::replying(
        "p3",
        vec![Message::assistant("from p3"), Message::assistant("again p3")],
    );
    let factory = MockFactory::new()
        .with("P1", p1.clone())
        .with("P2", p2.clone())
        .with("P3", p3.clone());
    let listener = RecordingListener::new();

    let mut agent = Agent::builder("bot")
        .registry(registry(&["P1", "P2", "P3"]))
        .providers(vec!["P1".into(), "P2".into(), "P3".into()])
        .driver_factory(Arc::new(factory))
        .listener(listener.clone())
        .build()
        .await
        .unwrap();

    let reply = agent.respond("hi").await.unwrap();
    assert_eq!(reply.text_content(), "from p3");
    assert_eq!(agent.active_provider(), Some("P3"));

    let provider_events: Vec<Event> = listener
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::ProviderFailed { .. } | Event::ProviderResolved { .. }))
        .collect();
    assert_eq!(provider_events.len(), 3);
    assert_eq!(
        provider_events[2],
        Event::ProviderResolved {
            provider: "P3".into()
        }
    );

    let reply = agent.respond("and again").await.unwrap();
    assert_eq!(reply.text_content(), "again p3");
    assert_eq!(p1.calls(), 2);
    assert_eq!(p2.calls(), 2);
    assert_eq!(p3.calls(), 2);
}

#[tokio::test]
async fn test_exhaustion_reports_last_error() {
    let factory = MockFactory::new()
        .with("P1", ScriptedDriver::failing("p1", "p1 down"))
        .with("P2", ScriptedDriver::failing("p2", "p2 down"));

    let mut agent = Agent::builder("bot")
        .registry(registry(&["P1", "P2"]))
        .providers(vec!["P1".into(), "P2".into()])
        .driver_factory(Arc::new(factory))
        .build()
        .await
        .unwrap();

    let err = agent.respond("hi").await.unwrap_err();
    assert!(matches!(err, AgentError::ProviderUnavailable { .. }));
    assert!(err.to_string().contains("p2 down"));
    assert_eq!(agent.active_provider(), None);
}

#[tokio::test]
async fn test_scalar_override_rejected_at_build() {
    let factory = Arc::new(MockFactory::new());
    let err = Agent::builder("bot")
        .registry(registry(&["default", "x"]))
        .providers_value(json!(["default", {"x": "not-an-array"}]))
        .driver_factory(factory.clone())
        .build()
        .await
        .unwrap_err();

    assert!(err.is_config());
    assert!(factory.configs().is_empty());
}

#[tokio::test]
async fn test_unknown_provider_rejected_at_build() {
    let err = Agent::builder("bot")
        .registry(registry(&["P1"]))
        .providers(vec!["P1".into(), "missing".into()])
        .driver_factory(Arc::new(MockFactory::new()))
        .build()
        .await
        .unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_legacy_fallback_provider() {
    let factory = MockFactory::new()
        .with("default", ScriptedDriver::failing("primary", "primary down"))
        .with("backup", ScriptedDriver::replying("backup", vec![Message::assistant("ok")]));

    let mut agent = Agent::builder("bot")
        .registry(registry(&["default", "backup"]))
        .fallback_provider("backup")
        .driver_factory(Arc::new(factory))
        .build()
        .await
        .unwrap();

    assert_eq!(agent.respond("hi").await.unwrap().text_content(), "ok");
    assert_eq!(agent.active_provider(), Some("backup"));
}

#[tokio::test]
async fn test_agent_model_preserved_and_override_applied() {
    let factory = Arc::new(
        MockFactory::new().with("P1", ScriptedDriver::replying("p1", vec![Message::assistant("ok")])),
    );

    let mut agent = Agent::builder("bot")
        .model("agent-model")
        .temperature(0.9)
        .registry(registry(&["P1"]))
        .providers(vec![ProviderEntry::with_override("P1", json!({"temperature": 0.25})).unwrap()])
        .driver_factory(factory.clone())
        .build()
        .await
        .unwrap();
    agent.respond("hi").await.unwrap();

    let configs = factory.configs();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].options.model, "agent-model");
    assert_eq!(configs[0].options.temperature, Some(0.25));
}

#[tokio::test]
async fn test_echo_tool_round_trip_is_persisted() {
    let driver = ScriptedDriver::replying("p1", vec![echo_call(), Message::assistant("Processed x")]);
    let storage: Arc<dyn StorageDriver> = Arc::new(InMemoryStorage::new());

    let mut agent = Agent::builder("bot")
        .registry(registry(&["default"]))
        .driver_factory(Arc::new(MockFactory::new().with("default", driver.clone())))
        .tool(echo_tool())
        .storage(StorageConfig::shared(vec![storage.clone()]))
        .build()
        .await
        .unwrap();

    let reply = agent.respond("use tool").await.unwrap();
    assert_eq!(reply.text_content(), "Processed x");

    // second call carried the tool result back to the model
    let second = &driver.seen()[1];
    let result = second.last().unwrap();
    assert_eq!(result.role(), Role::Tool);
    assert_eq!(result.text_content(), "Processed x");

    let identity = SessionIdentity::new("bot").with_scope("chatHistory");
    let records = storage.read(&identity).await.unwrap().unwrap();
    let stored: Vec<Message> = records
        .into_iter()
        .map(|r| Message::from_record(r).unwrap())
        .collect();
    let roles: Vec<Role> = stored.iter().map(Message::role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert!(matches!(
        &stored[2].kind,
        MessageKind::ToolResult { tool_call_id, content, .. }
            if tool_call_id == "call_1" && content == "Processed x"
    ));
}

#[tokio::test]
async fn test_tool_errors_are_reported_to_the_model() {
    let missing = Message::tool_calls(vec![ToolCall::new("call_9", "missing", "{}")]);
    let driver = ScriptedDriver::replying("p1", vec![missing, Message::assistant("sorry")]);

    let mut agent = Agent::builder("bot")
        .registry(registry(&["default"]))
        .driver_factory(Arc::new(MockFactory::new().with("default", driver)))
        .tool(echo_tool())
        .build()
        .await
        .unwrap();

    assert_eq!(agent.respond("go").await.unwrap().text_content(), "sorry");
    let history = agent.history().await.unwrap();
    assert!(history[2].text_content().starts_with("Error:"));
}

#[tokio::test]
async fn test_max_iterations() {
    let driver = ScriptedDriver::replying("p1", vec![echo_call(), echo_call(), echo_call()]);

    let mut agent = Agent::builder("bot")
        .registry(registry(&["default"]))
        .driver_factory(Arc::new(MockFactory::new().with("default", driver)))
        .tool(echo_tool())
        .max_iterations(2)
        .build()
        .await
        .unwrap();

    assert!(matches!(
        agent.respond("loop").await,
        Err(AgentError::MaxIterations(2))
    ));
}

#[tokio::test]
async fn test_failed_turn_leaves_history_untouched() {
    let driver = ScriptedDriver::replying("p1", vec![echo_call(), Message::assistant("done")]);

    let mut agent = Agent::builder("bot")
        .registry(registry(&["default"]))
        .driver_factory(Arc::new(MockFactory::new().with("default", driver.clone())))
        .tool(echo_tool())
        .max_iterations(1)
        .build()
        .await
        .unwrap();

    assert!(agent.respond("first").await.is_err());
    assert!(agent.history().await.unwrap().is_empty());

    let reply = agent.respond("retry").await.unwrap();
    assert_eq!(reply.text_content(), "done");
    assert_eq!(driver.seen()[1].len(), 1);
    assert_eq!(agent.history().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_stream_leaves_history_untouched() {
    let factory = MockFactory::new().with("default", ScriptedDriver::failing("p1", "down"));

    let mut agent = Agent::builder("bot")
        .registry(registry(&["default"]))
        .driver_factory(Arc::new(factory))
        .build()
        .await
        .unwrap();

    let items: Vec<_> = agent.respond_streamed("hi", None).collect().await;
    assert!(matches!(items.last(), Some(Err(AgentError::ProviderUnavailable { .. }))));
    assert!(agent.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_instructions_are_sent_but_not_stored() {
    let driver = ScriptedDriver::replying("p1", vec![Message::assistant("ok")]);

    let mut agent = Agent::builder("bot")
        .instructions("Be brief.")
        .registry(registry(&["default"]))
        .driver_factory(Arc::new(MockFactory::new().with("default", driver.clone())))
        .build()
        .await
        .unwrap();
    agent.respond("hi").await.unwrap();

    let sent = &driver.seen()[0];
    assert_eq!(sent[0].role(), Role::System);
    assert_eq!(sent[0].text_content(), "Be brief.");
    assert!(agent
        .history()
        .await
        .unwrap()
        .iter()
        .all(|m| m.role() != Role::System));
}

#[tokio::test]
async fn test_usage_is_tracked_per_response() {
    let driver = ScriptedDriver::replying(
        "p1",
        vec![
            echo_call().with_usage(Usage::new(10, 2)),
            Message::assistant("Processed x").with_usage(Usage::new(20, 5)),
        ],
    );

    let mut agent = Agent::builder("bot")
        .model("m1")
        .registry(registry(&["default"]))
        .driver_factory(Arc::new(MockFactory::new().with("default", driver)))
        .tool(echo_tool())
        .track_usage(true)
        .build()
        .await
        .unwrap();
    agent.respond("use tool").await.unwrap();

    let usage = agent.context_mut().get_mut::<UsageStorage>().unwrap();
    assert_eq!(usage.totals().await.unwrap(), Usage::new(30, 7));
    let records = usage.records().await.unwrap();
    assert_eq!(records[0].provider, "default");
    assert_eq!(records[0].model, "m1");
}

#[tokio::test]
async fn test_streamed_response_with_tool_round() {
    let driver = ScriptedDriver::replying("p1", vec![echo_call(), Message::assistant("Processed x")]);
    let factory = MockFactory::new()
        .with("P1", ScriptedDriver::failing("p0", "offline"))
        .with("P2", driver);

    let mut agent = Agent::builder("bot")
        .registry(registry(&["P1", "P2"]))
        .providers(vec!["P1".into(), "P2".into()])
        .driver_factory(Arc::new(factory))
        .tool(echo_tool())
        .build()
        .await
        .unwrap();

    let seen = Arc::new(Mutex::new(0_usize));
    let counter = seen.clone();
    let callback: parley_core::StreamCallback = Arc::new(move |_message: &Message| {
        *counter.lock().unwrap() += 1;
    });

    let items: Vec<_> = agent.respond_streamed("use tool", Some(callback)).collect().await;
    let messages: Vec<Message> = items.into_iter().map(Result::unwrap).collect();

    // tool call, tool result, two text chunks
    assert_eq!(messages.len(), 4);
    assert!(messages[0].is_tool_call());
    assert_eq!(messages[1].role(), Role::Tool);
    assert_eq!(messages.last().unwrap().text_content(), "Processed x");
    assert_eq!(*seen.lock().unwrap(), 3);
    assert_eq!(agent.active_provider(), Some("P2"));

    let history = agent.history().await.unwrap();
    assert!(matches!(
        history.last().unwrap().kind,
        MessageKind::Assistant { .. }
    ));
}

#[tokio::test]
async fn test_tracked_keys_survive_agent_recreation() {
    let storage: Arc<dyn StorageDriver> = Arc::new(InMemoryStorage::new());
    let build = |storage: Arc<dyn StorageDriver>| {
        Agent::builder("bot")
            .chat("c1")
            .registry(registry(&["default"]))
            .driver_factory(Arc::new(MockFactory::new().with(
                "default",
                ScriptedDriver::replying("p1", vec![Message::assistant("ok")]),
            )))
            .storage(StorageConfig::shared(vec![storage]))
            .build()
    };

    let mut agent = build(storage.clone()).await.unwrap();
    agent.respond("hi").await.unwrap();
    drop(agent);

    let mut agent = build(storage.clone()).await.unwrap();
    assert!(agent
        .tracked_keys()
        .await
        .unwrap()
        .contains(&"bot_c1:chatHistory".to_string()));
    assert_eq!(agent.history().await.unwrap().len(), 2);

    let manager = StorageManager::new(vec![storage]).unwrap();
    agent.clear_history().await.unwrap();
    let identity = SessionIdentity::new("bot").with_chat("c1").with_scope("chatHistory");
    assert_eq!(manager.read(&identity).await.unwrap(), Some(Vec::new()));
}
