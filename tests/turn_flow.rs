//! End-to-end turn flow against wiremock-backed directory and agent endpoints.

use std::sync::Arc;
use std::time::Duration;

use turnrelay::config::{EngineConfig, RoutingConfig};
use turnrelay::routing::{
    ContextKind, EntityRef, EntityRouting, RoutingContext, StaticEntityStore, TargetSource,
};
use turnrelay::session::{
    ChatSession, Citation, MessageAnnotation, MessageRole, SessionHandle, SessionState,
};
use turnrelay::transport::{CompletionPayload, Frame, InterAgentRecord};
use turnrelay::Engine;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(10);

fn engine_config(server: &MockServer) -> EngineConfig {
    EngineConfig {
        routing: RoutingConfig::new(server.uri(), format!("{}/chat", server.uri())),
        transport: Default::default(),
        session: Default::default(),
    }
}

fn sse_body(frames: &[Frame]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(&serde_json::to_string(frame).unwrap());
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_response(frames: &[Frame]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse_body(frames))
}

async fn settle(handle: &SessionHandle) -> ChatSession {
    tokio::time::timeout(
        WAIT,
        handle.wait_for(|s| !s.state.is_busy() && s.generation > 0),
    )
    .await
    .expect("turn did not finish")
    .expect("session closed")
}

#[tokio::test]
async fn test_agent_turn_streams_into_structured_transcript() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/registry/agent/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "url": format!("{}/agents/a1", server.uri()),
            "available": true,
            "capabilities": ["streaming"],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let frames = vec![
        Frame::delta("researcher", "Checking sources."),
        Frame::InterAgent(InterAgentRecord {
            correlation_id: Some("corr-1".into()),
            source: "researcher".into(),
            target: "search".into(),
            message: "find sources".into(),
            status: Some("ok".into()),
            latency_ms: Some(12),
        }),
        Frame::delta("researcher", "Hello"),
        Frame::delta("researcher", " world"),
        Frame::Completion(CompletionPayload {
            agent: Some("researcher".into()),
            content: "Hello world".into(),
            citations: vec![Citation {
                source: "c1".into(),
                title: Some("Doc".into()),
                excerpt: None,
                relevance: Some(0.9),
            }],
            ..Default::default()
        }),
    ];
    Mock::given(method("POST"))
        .and(path("/agents/a1"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(serde_json::json!({
            "context": {"kind": "agent", "id": "a1"},
            "message": {"role": "user", "parts": [{"kind": "text", "text": "hi"}]},
        })))
        .respond_with(sse_response(&frames))
        .expect(1)
        .mount(&server)
        .await;

    let engine = Engine::new(engine_config(&server), Arc::new(StaticEntityStore::new())).unwrap();
    let handle = engine.sessions().create_session();
    handle
        .submit_turn("hi", vec![], Some(RoutingContext::Agent(EntityRef::new("a1"))))
        .await
        .unwrap();

    let snap = settle(&handle).await;
    assert_eq!(snap.state, SessionState::Idle);

    let roles: Vec<MessageRole> = snap.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Agent,
            MessageRole::InterAgent,
            MessageRole::Agent,
        ]
    );
    // The hop closes the first message; text after it lands in a new one.
    assert_eq!(snap.messages[1].content, "Checking sources.");
    assert!(snap.messages[1].complete);
    let answer = &snap.messages[3];
    assert_eq!(answer.content, "Hello world");
    assert_eq!(answer.citations[0].source, "c1");
    assert!(answer.complete && !answer.streaming);
    assert_eq!(snap.streaming_messages().count(), 0);

    let comms = handle.communications();
    assert_eq!(comms.len(), 1);
    assert_eq!(comms[0].correlation_id(), "corr-1");
    assert_eq!(comms[0].target_agent(), "search");

    engine.shutdown().await;
}

#[tokio::test]
async fn test_directory_outage_falls_back_to_static_address() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/registry/workflow/wf-9"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(sse_response(&[Frame::delta("assistant", "fallback answer")]))
        .expect(1)
        .mount(&server)
        .await;

    let engine = Engine::new(engine_config(&server), Arc::new(StaticEntityStore::new())).unwrap();
    let (handle, _) = engine
        .sessions()
        .submit_turn(
            None,
            "hello",
            vec![],
            Some(RoutingContext::Workflow(EntityRef::new("wf-9"))),
        )
        .await
        .unwrap();

    let snap = settle(&handle).await;
    assert_eq!(snap.state, SessionState::Idle);
    let last = snap.last_message().unwrap();
    assert_eq!(last.content, "fallback answer");
    assert!(last.complete);
}

#[tokio::test]
async fn test_dns_name_from_entity_store_is_used_when_directory_misses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/registry/agent/a1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let entities = StaticEntityStore::new().with(
        ContextKind::Agent,
        "a1",
        EntityRouting {
            service_url: None,
            dns_name: Some("svc.internal".into()),
            url: None,
        },
    );
    let engine = Engine::new(engine_config(&server), Arc::new(entities)).unwrap();

    let target = engine
        .selector()
        .select(&RoutingContext::Agent(EntityRef::new("a1")))
        .await;
    assert_eq!(target.url, "http://svc.internal/a2a");
    assert_eq!(target.source, TargetSource::DnsName);
}

#[tokio::test]
async fn test_failed_dispatch_invalidates_cached_route() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/registry/agent/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "url": format!("{}/agents/a1", server.uri()),
            "available": true,
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/agents/a1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let engine = Engine::new(engine_config(&server), Arc::new(StaticEntityStore::new())).unwrap();
    let handle = engine.sessions().create_session();
    let context = RoutingContext::Agent(EntityRef::new("a1"));

    handle.submit_turn("first", vec![], Some(context)).await.unwrap();
    let snap = settle(&handle).await;
    assert_eq!(snap.state, SessionState::Error);
    let notice = snap.last_message().unwrap();
    assert_eq!(notice.role, MessageRole::System);
    assert!(notice.content.contains("HTTP 500"), "{}", notice.content);

    // The cache entry was dropped, so the retry asks the directory again.
    handle.submit_turn("second", vec![], None).await.unwrap();
    let snap = tokio::time::timeout(
        WAIT,
        handle.wait_for(|s| s.state == SessionState::Error && s.generation == 2),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(snap.messages.len(), 4);
}

#[tokio::test]
async fn test_error_frame_interrupts_partial_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(sse_response(&[
            Frame::delta("assistant", "Part of the"),
            Frame::Error {
                message: "model overloaded".into(),
                retryable: true,
            },
        ]))
        .mount(&server)
        .await;

    let engine = Engine::new(engine_config(&server), Arc::new(StaticEntityStore::new())).unwrap();
    let handle = engine.sessions().create_session();
    handle.submit_turn("explain", vec![], None).await.unwrap();

    let snap = settle(&handle).await;
    assert_eq!(snap.state, SessionState::Error);
    let partial = snap.last_message().unwrap();
    assert_eq!(partial.content, "Part of the");
    assert!(!partial.streaming);
    match &partial.annotation {
        Some(MessageAnnotation::Interrupted { reason }) => {
            assert!(reason.contains("model overloaded"));
            assert!(reason.contains("retry"));
        }
        other => panic!("unexpected annotation {other:?}"),
    }
}

#[tokio::test]
async fn test_endpoint_that_never_answers_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            sse_response(&[Frame::delta("assistant", "too late")])
                .set_delay(Duration::from_secs(20)),
        )
        .mount(&server)
        .await;

    let mut config = engine_config(&server);
    config.transport.response_timeout_secs = 1;
    let engine = Engine::new(config, Arc::new(StaticEntityStore::new())).unwrap();
    let handle = engine.sessions().create_session();
    handle.submit_turn("anyone there?", vec![], None).await.unwrap();

    // Headers never arrive; the turn must still end well inside the delay.
    let snap = settle(&handle).await;
    assert_eq!(snap.state, SessionState::Error);
    let notice = snap.last_message().unwrap();
    assert_eq!(notice.role, MessageRole::System);
    assert!(notice.content.contains("no response within 1s"), "{}", notice.content);
    assert_eq!(snap.streaming_messages().count(), 0);
}
