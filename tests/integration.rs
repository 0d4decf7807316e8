//! End-to-end tests: recording, fan-out resolution, the playback state
//! machine, and the network capture bridge working together.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mimeo::capture::{network_bridge, BridgeConfig, RecorderConfig};
use mimeo::dom::Document;
use mimeo::{
    Command, CommandKind, ControllerConfig, Engine, EngineConfig, Error, ErrorDecision,
    NullOverlay, Overlay, Page, PlaybackController, PlaybackStatus, Recorder, Scenario,
};

/// Overlay driven by the test: forwards error messages out, waits for
/// the scripted decision.
struct ScriptedOverlay {
    err_tx: mpsc::UnboundedSender<String>,
    decisions: tokio::sync::Mutex<mpsc::UnboundedReceiver<ErrorDecision>>,
}

#[async_trait]
impl Overlay for ScriptedOverlay {
    async fn show_error(&self, message: &str) -> ErrorDecision {
        let _ = self.err_tx.send(message.to_string());
        self.decisions
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(ErrorDecision::Stop)
    }
}

fn scripted_overlay() -> (
    Arc<ScriptedOverlay>,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedSender<ErrorDecision>,
) {
    let (err_tx, err_rx) = mpsc::unbounded_channel();
    let (decision_tx, decision_rx) = mpsc::unbounded_channel();
    (
        Arc::new(ScriptedOverlay {
            err_tx,
            decisions: tokio::sync::Mutex::new(decision_rx),
        }),
        err_rx,
        decision_tx,
    )
}

fn quick_config() -> ControllerConfig {
    ControllerConfig {
        inter_step_delay_ms: 0,
        ..ControllerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn fan_out_click_succeeds_via_alternate() {
    let mut page = Page::from_html(r#"<button id="real">Go</button>"#, "about:test");
    let handle = page.doc_handle();

    let cmd = Command::new(CommandKind::Click)
        .with_target("id=stale")
        .with_targets(&["css=.gone", "id=real"]);
    let outcome = Engine::new()
        .execute(&mut page, &cmd, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.locator.as_deref(), Some("id=real"));
    let doc = handle.lock().unwrap();
    let real = doc.element_by_id("real").unwrap();
    assert!(doc.event_names(real).contains(&"click"));
}

#[tokio::test(start_paused = true)]
async fn error_then_skip_completes_with_skipped_index() {
    let page = Page::from_html(
        r#"<button id="a">A</button><input name="b">"#,
        "about:test",
    );
    let mut scenario = Scenario::new("three steps");
    scenario.push(Command::new(CommandKind::Click).with_target("id=a"));
    scenario.push(
        Command::new(CommandKind::Type)
            .with_target("name=b")
            .with_value("x"),
    );
    scenario.push(Command::new(CommandKind::Click).with_target("id=missing"));

    let (overlay, mut err_rx, decision_tx) = scripted_overlay();
    let controller = PlaybackController::with_config(Engine::new(), overlay, quick_config());
    controller.start(page, scenario, 0).await.unwrap();

    let message = err_rx.recv().await.unwrap();
    assert!(message.contains("id=missing"));
    let state = controller.state();
    assert_eq!(state.status, PlaybackStatus::Error);
    assert_eq!(state.index, 2);
    assert!(state.skipped.is_empty());

    decision_tx.send(ErrorDecision::Skip).unwrap();
    let end = controller.wait().await;
    assert_eq!(end.status, PlaybackStatus::Completed);
    assert_eq!(end.skipped, vec![2]);
    assert_eq!(end.index, 2);
}

#[tokio::test(start_paused = true)]
async fn retry_re_executes_the_same_step() {
    let page = Page::from_html("<p>empty</p>", "about:test");
    let mut scenario = Scenario::new("one failing step");
    scenario.push(Command::new(CommandKind::Click).with_target("id=missing"));

    let (overlay, mut err_rx, decision_tx) = scripted_overlay();
    let controller = PlaybackController::with_config(Engine::new(), overlay, quick_config());
    controller.start(page, scenario, 0).await.unwrap();

    err_rx.recv().await.unwrap();
    assert_eq!(controller.state().index, 0);
    decision_tx.send(ErrorDecision::Retry).unwrap();

    // Same index fails again: retry re-executed the step.
    err_rx.recv().await.unwrap();
    assert_eq!(controller.state().index, 0);
    assert!(controller.state().skipped.is_empty());

    decision_tx.send(ErrorDecision::Stop).unwrap();
    let end = controller.wait().await;
    assert_eq!(end.status, PlaybackStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn unattended_error_defaults_to_skip_after_timeout() {
    let page = Page::from_html("<p>empty</p>", "about:test");
    let mut scenario = Scenario::new("unattended");
    scenario.push(Command::new(CommandKind::Click).with_target("id=missing"));

    let controller = PlaybackController::with_config(
        Engine::new(),
        Arc::new(NullOverlay),
        ControllerConfig {
            inter_step_delay_ms: 0,
            decision_timeout_ms: 500,
        },
    );
    controller.start(page, scenario, 0).await.unwrap();
    let end = controller.wait().await;

    assert_eq!(end.status, PlaybackStatus::Completed);
    assert_eq!(end.skipped, vec![0]);
}

#[tokio::test(start_paused = true)]
async fn pause_takes_effect_at_the_step_boundary() {
    let page = Page::from_html(r#"<button id="a">A</button>"#, "about:test");
    let mut scenario = Scenario::new("pause test");
    scenario.push(Command::new(CommandKind::Pause).with_value("10000"));
    scenario.push(Command::new(CommandKind::Click).with_target("id=a"));

    let controller =
        PlaybackController::with_config(Engine::new(), Arc::new(NullOverlay), quick_config());
    controller.start(page, scenario, 0).await.unwrap();

    controller.pause().await;
    assert_eq!(controller.state().status, PlaybackStatus::Paused);

    controller.resume().await;
    assert_eq!(controller.state().status, PlaybackStatus::Playing);

    let end = controller.wait().await;
    assert_eq!(end.status, PlaybackStatus::Completed);
    assert!(end.skipped.is_empty());
}

#[tokio::test]
async fn stop_aborts_an_in_flight_wait() {
    let page = Page::from_html("<p>empty</p>", "about:test");
    let mut scenario = Scenario::new("long pause");
    scenario.push(Command::new(CommandKind::Pause).with_value("60000"));
    scenario.push(Command::new(CommandKind::Pause).with_value("60000"));

    let controller =
        PlaybackController::with_config(Engine::new(), Arc::new(NullOverlay), quick_config());
    controller.start(page, scenario, 0).await.unwrap();
    tokio::task::yield_now().await;

    controller.stop().await;
    let state = controller.state();
    assert_eq!(state.status, PlaybackStatus::Stopped);
    assert_eq!(state.index, 0);
    assert!(state.skipped.is_empty());
}

#[tokio::test(start_paused = true)]
async fn starting_again_stops_the_previous_session() {
    let controller =
        PlaybackController::with_config(Engine::new(), Arc::new(NullOverlay), quick_config());

    let mut long = Scenario::new("long");
    long.push(Command::new(CommandKind::Pause).with_value("600000"));
    controller
        .start(Page::from_html("<p></p>", "about:a"), long, 0)
        .await
        .unwrap();
    tokio::task::yield_now().await;

    let mut short = Scenario::new("short");
    short.push(Command::new(CommandKind::Pause).with_value("1"));
    controller
        .start(Page::from_html("<p></p>", "about:b"), short, 0)
        .await
        .unwrap();

    let end = controller.wait().await;
    assert_eq!(end.status, PlaybackStatus::Completed);
    assert_eq!(end.total, 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_commands_are_skipped_without_error() {
    let page = Page::from_html(r#"<button id="b">B</button>"#, "about:test");
    let handle = page.doc_handle();

    let mut scenario = Scenario::new("audit");
    let mut legacy = Command::new(CommandKind::Click).with_target("id=gone-from-page");
    legacy.disabled = true;
    scenario.push(legacy);
    scenario.push(Command::new(CommandKind::Click).with_target("id=b"));

    let controller =
        PlaybackController::with_config(Engine::new(), Arc::new(NullOverlay), quick_config());
    controller.start(page, scenario, 0).await.unwrap();
    let end = controller.wait().await;

    assert_eq!(end.status, PlaybackStatus::Completed);
    assert!(end.skipped.is_empty());
    let doc = handle.lock().unwrap();
    let b = doc.element_by_id("b").unwrap();
    assert!(doc.event_names(b).contains(&"click"));
}

#[tokio::test(start_paused = true)]
async fn start_index_resumes_mid_scenario() {
    let page = Page::from_html(
        r#"<button id="a">A</button><button id="b">B</button>"#,
        "about:test",
    );
    let handle = page.doc_handle();

    let mut scenario = Scenario::new("resume");
    scenario.push(Command::new(CommandKind::Click).with_target("id=a"));
    scenario.push(Command::new(CommandKind::Click).with_target("id=b"));

    let controller =
        PlaybackController::with_config(Engine::new(), Arc::new(NullOverlay), quick_config());
    controller.start(page, scenario, 1).await.unwrap();
    let end = controller.wait().await;

    assert_eq!(end.status, PlaybackStatus::Completed);
    let doc = handle.lock().unwrap();
    let a = doc.element_by_id("a").unwrap();
    let b = doc.element_by_id("b").unwrap();
    assert!(doc.event_names(a).is_empty());
    assert!(doc.event_names(b).contains(&"click"));
}

#[tokio::test(flavor = "multi_thread")]
async fn api_request_replays_with_cached_auth_context() {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/items"))
        .and(header("authorization", "Bearer tok"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 7})))
        .mount(&server)
        .await;

    let (interceptor, listener) = network_bridge(BridgeConfig::default());
    let handle = listener.handle();
    tokio::spawn(listener.run(CancellationToken::new()));

    let auth_headers = [("authorization".to_string(), "Bearer tok".to_string())]
        .into_iter()
        .collect();
    interceptor.observe(
        "GET",
        &format!("{}/api/items?page=1", server.uri()),
        &auth_headers,
        "",
    );
    let _ = handle.recent().await;
    let auth = handle.auth_context().expect("auth context cached");

    let mut cmd = Command::new(CommandKind::ApiRequest)
        .with_target(&format!("{}/api/items", server.uri()))
        .with_value(r#"{"qty":1}"#);
    cmd.method = Some("POST".into());
    cmd.headers
        .insert("content-type".into(), "application/json".into());

    let mut page = Page::from_html("<p></p>", "about:test");
    let outcome = Engine::new()
        .execute(&mut page, &cmd, Some(&auth), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.response.unwrap()["id"], 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn api_request_non_2xx_is_a_network_error() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut cmd = Command::new(CommandKind::ApiRequest)
        .with_target(&format!("{}/api/items", server.uri()));
    cmd.method = Some("POST".into());

    let mut page = Page::from_html("<p></p>", "about:test");
    let err = Engine::new()
        .execute(&mut page, &cmd, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)));
}

#[tokio::test]
async fn submit_click_captures_write_and_appends_commands() {
    let (interceptor, listener) = network_bridge(BridgeConfig::default());
    let handle = listener.handle();
    tokio::spawn(listener.run(CancellationToken::new()));

    let (mut recorder, mut rx) = Recorder::with_config(RecorderConfig {
        capture_timeout_ms: 2_000,
        ..RecorderConfig::default()
    });
    recorder.attach_bridge(handle.clone());

    let doc = Document::parse(
        r#"<form action="/api/items">
             <button id="save" type="submit">Save</button>
           </form>"#,
    );
    let save = doc.element_by_id("save").unwrap();
    recorder.on_click(&doc, save);

    // Let the armed capture reach the listener before the write lands.
    tokio::task::yield_now().await;
    let _ = handle.recent().await;

    let headers = [("content-type".to_string(), "application/json".to_string())]
        .into_iter()
        .collect();
    interceptor.observe("POST", "https://x/api/items", &headers, r#"{"qty":1}"#);

    let click = rx.recv().await.unwrap();
    assert_eq!(click.kind, CommandKind::Click);
    assert_eq!(click.target, "id=save");

    let api = rx.recv().await.unwrap();
    assert_eq!(api.kind, CommandKind::ApiRequest);
    assert_eq!(api.target, "https://x/api/items");
    assert_eq!(api.value, r#"{"qty":1}"#);
    assert_eq!(api.method.as_deref(), Some("POST"));

    let refresh = rx.recv().await.unwrap();
    assert_eq!(refresh.kind, CommandKind::Refresh);
}

#[tokio::test(start_paused = true)]
async fn recorded_commands_replay_against_a_fresh_parse() {
    let html = r#"<form>
        <input id="user" name="username">
        <select id="plan" name="plan">
          <option value="basic">Basic</option>
          <option value="pro">Pro</option>
        </select>
        <input type="checkbox" id="tos" name="tos">
        <button id="create" type="button">Create</button>
    </form>"#;

    // Record against one parse of the page.
    let mut record_doc = Document::parse(html);
    let (mut recorder, mut rx) = Recorder::new();

    let user = record_doc.element_by_id("user").unwrap();
    record_doc.set_value_native(user, "ada");
    recorder.on_change(&record_doc, user);

    let plan = record_doc.element_by_id("plan").unwrap();
    record_doc.set_value_native(plan, "pro");
    recorder.on_change(&record_doc, plan);

    let tos = record_doc.element_by_id("tos").unwrap();
    record_doc.set_checked(tos, true);
    recorder.on_change(&record_doc, tos);

    let create = record_doc.element_by_id("create").unwrap();
    recorder.on_click(&record_doc, create);

    let mut scenario = Scenario::new("signup");
    while let Ok(cmd) = rx.try_recv() {
        scenario.push(cmd);
    }
    assert_eq!(scenario.len(), 4);

    // Replay against a fresh parse of the same page.
    let mut page = Page::from_html(html, "about:replay");
    let handle = page.doc_handle();
    let engine = Engine::with_config(EngineConfig {
        char_delay_ms: 1,
        settle_ms: 1,
        ..EngineConfig::default()
    });
    let cancel = CancellationToken::new();
    for cmd in &scenario.commands {
        engine.execute(&mut page, cmd, None, &cancel).await.unwrap();
    }

    let doc = handle.lock().unwrap();
    let user = doc.element_by_id("user").unwrap();
    let plan = doc.element_by_id("plan").unwrap();
    let tos = doc.element_by_id("tos").unwrap();
    let create = doc.element_by_id("create").unwrap();
    assert_eq!(doc.value(user), "ada");
    assert_eq!(doc.value(plan), "pro");
    assert!(doc.checked(tos));
    assert!(doc.event_names(create).contains(&"click"));
}
