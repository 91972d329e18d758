//! End-to-end behaviour of the traffic core: events published on the push
//! channel, reconciled by the ledger and surfaced through the debounced view.

use std::io::Cursor;
use std::time::Duration;

use proxyledger_core::ledger::LedgerAnomaly;
use proxyledger_core::models::{ContentFamily, StatusClass};
use proxyledger_core::{
    CategoricalFilter, CoreConfig, EventHub, JsonLinesSource, RequestRecord, ResponseRecord,
    TrafficCore,
};

const CHANNEL: &str = "proxy_event";
/// Longer than the default quiet period
const SETTLE: Duration = Duration::from_millis(400);

async fn attached_core(config: CoreConfig) -> (TrafficCore, EventHub) {
    let core = TrafficCore::new(config);
    let hub = EventHub::new();
    core.attach(&hub).await.expect("attach to hub");
    (core, hub)
}

fn request(id: &str, uri: &str) -> RequestRecord {
    RequestRecord::new(id, "GET", uri)
}

fn response(id: &str, uri: &str, status: u16) -> ResponseRecord {
    ResponseRecord::new(id, uri, status)
}

fn ids(records: &[proxyledger_core::ConnectionRecord]) -> Vec<&str> {
    records.iter().map(|c| c.id.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn request_then_response_forms_one_connection() {
    let (core, hub) = attached_core(CoreConfig::default()).await;

    hub.publish(CHANNEL, request("1", "http://a.com").into());
    hub.publish(CHANNEL, response("1", "http://a.com", 200).into());
    tokio::time::sleep(SETTLE).await;

    let list = core.list_connections();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, "1");
    assert_eq!(list[0].request.uri, "http://a.com");
    assert_eq!(list[0].response.as_ref().map(|r| r.status), Some(200));
    assert_eq!(ids(&core.effective_view()), vec!["1"]);

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn orphan_response_emits_one_diagnostic() {
    let (core, hub) = attached_core(CoreConfig::default()).await;
    let mut diagnostics = core.subscribe_diagnostics();

    hub.publish(CHANNEL, response("99", "http://a.com", 500).into());
    tokio::time::sleep(SETTLE).await;

    assert!(core.list_connections().is_empty());
    assert_eq!(
        diagnostics.try_recv().expect("diagnostic"),
        LedgerAnomaly::OrphanResponse { id: "99".into() }
    );
    assert!(diagnostics.try_recv().is_err());
    assert_eq!(core.connection_stats().anomalies.orphan_responses, 1);

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn current_pin_scopes_the_view() {
    let (core, hub) = attached_core(CoreConfig::default()).await;
    core.pin_uri("http://a.com");
    core.set_current_pin(Some("http://a.com")).expect("pinned uri");
    // keyword and filter are ignored while a pin is selected
    core.set_keyword(Some("b.com"));
    core.set_active_filter(Some(CategoricalFilter::Status(StatusClass::ServerError)));

    hub.publish(CHANNEL, request("1", "http://a.com/x").into());
    hub.publish(CHANNEL, request("2", "http://b.com/y").into());
    tokio::time::sleep(SETTLE).await;

    let view = core.effective_view();
    assert_eq!(ids(&view), vec!["1"]);
    assert!(view.iter().all(|c| c.request.uri.starts_with("http://a.com")));

    core.set_current_pin(None).expect("clear pin");
    core.set_keyword(None);
    core.set_active_filter(None);
    tokio::time::sleep(SETTLE).await;
    assert_eq!(ids(&core.effective_view()), vec!["1", "2"]);

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn status_filter_keeps_only_server_errors() {
    let (core, hub) = attached_core(CoreConfig::default()).await;
    for (id, status) in [("ok", 200), ("bad", 503)] {
        let uri = format!("http://a.com/{id}");
        hub.publish(CHANNEL, request(id, &uri).into());
        hub.publish(CHANNEL, response(id, &uri, status).into());
    }
    hub.publish(CHANNEL, request("pending", "http://a.com/pending").into());

    let server_error = CategoricalFilter::Status(StatusClass::ServerError);
    assert_eq!(core.set_active_filter(Some(server_error)), Some(server_error));
    tokio::time::sleep(SETTLE).await;
    assert_eq!(ids(&core.effective_view()), vec!["bad"]);

    // pressing it again returns to all
    assert_eq!(core.set_active_filter(Some(server_error)), None);
    tokio::time::sleep(SETTLE).await;
    assert_eq!(ids(&core.effective_view()), vec!["ok", "bad", "pending"]);

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn keyword_and_content_filter_combine() {
    let (core, hub) = attached_core(CoreConfig::default()).await;
    let entries = [
        ("1", "http://api.example.com/users", "application/json"),
        ("2", "http://api.example.com/logo", "image/png"),
        ("3", "http://cdn.example.com/data", "application/json; charset=utf-8"),
    ];
    for (id, uri, content_type) in entries {
        hub.publish(CHANNEL, request(id, uri).into());
        hub.publish(
            CHANNEL,
            response(id, uri, 200)
                .with_header("Content-Type", content_type)
                .into(),
        );
    }

    core.set_keyword(Some("API.example"));
    core.set_active_filter(Some(CategoricalFilter::ContentType(ContentFamily::Json)));
    tokio::time::sleep(SETTLE).await;

    assert_eq!(ids(&core.effective_view()), vec!["1"]);
    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn clear_removes_everything() {
    let (core, hub) = attached_core(CoreConfig::default()).await;
    for i in 0..10 {
        hub.publish(CHANNEL, request(&i.to_string(), "http://a.com").into());
    }
    tokio::time::sleep(SETTLE).await;
    assert_eq!(core.list_connections().len(), 10);

    assert_eq!(core.clear_connections(), 10);
    assert!(core.list_connections().is_empty());
    tokio::time::sleep(SETTLE).await;
    assert!(core.effective_view().is_empty());

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ledger_size_counts_distinct_request_ids() {
    let (core, hub) = attached_core(CoreConfig::default()).await;
    for id in ["a", "b", "a", "c", "b"] {
        hub.publish(CHANNEL, request(id, "http://a.com").into());
    }
    hub.publish(CHANNEL, response("a", "http://a.com", 200).into());
    hub.publish(CHANNEL, response("a", "http://a.com", 500).into());
    tokio::time::sleep(SETTLE).await;

    assert_eq!(ids(&core.list_connections()), vec!["a", "b", "c"]);
    let first = core.get_connection("a").expect("connection a");
    assert_eq!(first.response.map(|r| r.status), Some(200));

    let stats = core.connection_stats();
    assert_eq!(stats.anomalies.duplicate_requests, 2);
    assert_eq!(stats.anomalies.duplicate_responses, 1);

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rapid_keyword_changes_recompute_once() {
    let (core, hub) = attached_core(CoreConfig::default()).await;
    hub.publish(CHANNEL, request("1", "http://alpha.com/").into());
    hub.publish(CHANNEL, request("2", "http://beta.com/").into());
    tokio::time::sleep(SETTLE).await;
    let before = core.engine().recomputations();

    for keyword in ["b", "be", "bet", "beta"] {
        core.set_keyword(Some(keyword));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(SETTLE).await;

    assert_eq!(core.engine().recomputations(), before + 1);
    let view = core.current_view();
    assert_eq!(view.criteria.keyword.as_deref(), Some("beta"));
    assert_eq!(ids(&view.records), vec!["2"]);

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_delivery_and_pending_recomputation() {
    let (core, hub) = attached_core(CoreConfig::default()).await;
    hub.publish(CHANNEL, request("1", "http://a.com").into());
    tokio::time::sleep(SETTLE).await;
    let before = core.engine().recomputations();

    core.set_keyword(Some("nothing"));
    core.shutdown().await;
    assert_eq!(hub.subscriber_count(CHANNEL), 0);
    assert_eq!(hub.publish(CHANNEL, request("2", "http://a.com").into()), 0);

    tokio::time::sleep(SETTLE).await;
    assert_eq!(core.engine().recomputations(), before);
    assert_eq!(core.list_connections().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn buffered_mode_preserves_ordering() {
    let config = CoreConfig {
        flush_interval_ms: Some(200),
        ..CoreConfig::default()
    };
    let (core, hub) = attached_core(config).await;

    hub.publish(CHANNEL, request("1", "http://a.com/1").into());
    hub.publish(CHANNEL, request("2", "http://a.com/2").into());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(core.list_connections().is_empty());

    // a response for a buffered request forces the flush
    hub.publish(CHANNEL, response("2", "http://a.com/2", 204).into());
    hub.publish(CHANNEL, request("3", "http://a.com/3").into());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ids(&core.list_connections()), vec!["1", "2"]);

    tokio::time::sleep(SETTLE).await;
    assert_eq!(ids(&core.list_connections()), vec!["1", "2", "3"]);
    assert_eq!(ids(&core.effective_view()), vec!["1", "2", "3"]);

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn detach_flushes_buffered_requests() {
    let config = CoreConfig {
        flush_interval_ms: Some(60_000),
        ..CoreConfig::default()
    };
    let (core, hub) = attached_core(config).await;

    hub.publish(CHANNEL, request("1", "http://a.com/1").into());
    hub.publish(CHANNEL, request("2", "http://a.com/2").into());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(core.list_connections().is_empty());
    assert_eq!(core.connection_stats().buffered, 2);

    core.detach().await;
    assert_eq!(ids(&core.list_connections()), vec!["1", "2"]);
    assert_eq!(core.connection_stats().buffered, 0);

    tokio::time::sleep(SETTLE).await;
    assert_eq!(ids(&core.effective_view()), vec!["1", "2"]);

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn engine_payloads_with_repeated_headers_and_bare_rules_attach() {
    let input = [
        r#"{"NewRequest":{"id":"1","time":10,"method":"GET","uri":"http://a.com/","headers":{"accept":["text/html","application/json"]},"version":"HTTP/1.1"}}"#,
        r#"{"NewResponse":{"id":"1","time":20,"uri":"http://a.com/","status":200,"version":"HTTP/1.1","headers":{"set-cookie":["a=1","b=2"]},"effects":{"pack":[{"name":"Delay","info":null}]}}}"#,
    ]
    .join("\n");

    let core = TrafficCore::default();
    let source = JsonLinesSource::new(CHANNEL, Cursor::new(input.into_bytes()));
    core.attach(&source).await.expect("attach");
    tokio::time::sleep(SETTLE).await;

    let conn = core.get_connection("1").expect("connection");
    assert_eq!(conn.request.header("Accept"), Some("text/html, application/json"));
    let res = conn.response.as_ref().expect("response attached");
    assert_eq!(res.header("set-cookie"), Some("a=1, b=2"));
    assert_eq!(res.hit_rule_names(), vec!["Delay"]);

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn json_lines_source_feeds_the_ledger() {
    let input = [
        r#"{"NewRequest":{"id":"1","time":10,"method":"GET","uri":"http://a.com/","version":"HTTP/1.1"}}"#,
        r#"{"NewResponse":{"id":"1","time":42,"uri":"http://a.com/","status":302,"version":"HTTP/2.0","effects":{"rewrite":[{"name":"redirect","info":{}}]}}}"#,
        r#"{"NewResponse":{"id":"7","time":50,"uri":"http://b.com/","status":200,"version":"HTTP/1.1"}}"#,
    ]
    .join("\n");

    let core = TrafficCore::default();
    let source = JsonLinesSource::new(CHANNEL, Cursor::new(input.into_bytes()));
    core.attach(&source).await.expect("attach");

    tokio::time::sleep(SETTLE).await;
    assert!(core.ingestion_finished());

    let conn = core.get_connection("1").expect("connection");
    assert_eq!(conn.duration_ms(), Some(32));
    let res = conn.response.as_ref().expect("response");
    assert_eq!(res.hit_rule_names(), vec!["redirect"]);
    assert_eq!(core.connection_stats().anomalies.orphan_responses, 1);

    core.shutdown().await;
}

#[tokio::test]
async fn closed_source_is_a_startup_fault() {
    let core = TrafficCore::default();
    let hub = EventHub::new();
    hub.close();

    let err = core.attach(&hub).await.unwrap_err();
    assert!(err.to_string().contains(CHANNEL));
    assert!(core.list_connections().is_empty());
    assert!(!core.is_attached());
}
