//! End-to-end behavior of the stubbing engine: matching, delivery timing,
//! activation diagnostics, and cancellation.

use httpstub::{
    matcher, ActivationObserver, ActivationOutcome, DeliveryError, Matcher, NetworkError,
    ResponseTiming, StubInfo, StubRegistry, StubRequest, StubResponse,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingObserver {
    activations: Mutex<Vec<(Option<String>, String)>>,
    misses: AtomicUsize,
}

impl RecordingObserver {
    fn outcome_label(outcome: &ActivationOutcome) -> String {
        match outcome {
            ActivationOutcome::Delivered(response) => format!("delivered:{}", response.status),
            ActivationOutcome::Failed(reason) => format!("failed:{reason}"),
        }
    }
}

impl ActivationObserver for RecordingObserver {
    fn on_activation(&self, _request: &StubRequest, stub: &StubInfo, outcome: &ActivationOutcome) {
        self.activations
            .lock()
            .unwrap()
            .push((stub.name.clone(), Self::outcome_label(outcome)));
    }

    fn on_missing(&self, _request: &StubRequest) {
        self.misses.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn get_json_scenario_end_to_end() {
    let registry = StubRegistry::new();
    registry.install(
        matcher::is_get() & matcher::is_extension("json"),
        |_req| StubResponse::json(200, &serde_json::json!({"ok": true})),
    );

    let request = StubRequest::get("https://api.example.com/fixtures/data.json");
    assert!(registry.can_handle(&request));

    let response = registry.handle(&request).await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(
        response.headers.get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(response.body_bytes().await.as_ref(), br#"{"ok":true}"#);

    // Same path, different method: falls through.
    let post = StubRequest::post("https://api.example.com/fixtures/data.json");
    assert!(!registry.can_handle(&post));
    assert!(registry.handle(&post).await.is_none());
}

#[tokio::test]
async fn newest_matching_stub_wins() {
    let registry = StubRegistry::new();
    registry.install(Matcher::any(), |_| StubResponse::new(200).with_body("default"));
    registry.install(Matcher::any(), |_| StubResponse::new(200).with_body("override"));

    let request = StubRequest::get("https://example.com/");
    let response = registry.handle(&request).await.unwrap().unwrap();
    assert_eq!(response.body_bytes().await.as_ref(), b"override");
}

#[tokio::test]
async fn disabling_preserves_stubs() {
    let registry = StubRegistry::new();
    registry.install(Matcher::any(), |_| StubResponse::new(204));

    let request = StubRequest::get("https://example.com/");
    registry.set_enabled(false);
    assert!(registry.handle(&request).await.is_none());

    registry.set_enabled(true);
    let response = registry.handle(&request).await.unwrap().unwrap();
    assert_eq!(response.status, 204);
}

#[tokio::test(start_paused = true)]
async fn request_time_delays_headers() {
    let registry = StubRegistry::new();
    registry.install(Matcher::any(), |_| {
        StubResponse::new(200).with_request_time(Duration::from_secs(2))
    });

    let request = StubRequest::get("https://example.com/slow");
    let start = tokio::time::Instant::now();
    let response = registry.handle(&request).await.unwrap().unwrap();
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(response.status, 200);
    // Empty body: complete right after the headers.
    assert!(response.body.is_empty());
}

#[tokio::test(start_paused = true)]
async fn response_duration_paces_full_body() {
    let registry = StubRegistry::new();
    registry.install(Matcher::any(), |_| {
        StubResponse::new(200)
            .with_body(vec![0u8; 4096])
            .with_times(
                Duration::from_secs(1),
                ResponseTiming::Duration(Duration::from_secs(2)),
            )
    });

    let request = StubRequest::get("https://example.com/download");
    let start = tokio::time::Instant::now();
    let response = registry.handle(&request).await.unwrap().unwrap();
    let body = response.body_bytes().await;

    assert_eq!(body.len(), 4096);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2900), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(3200), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn rate_paces_body_by_throughput() {
    let registry = StubRegistry::new();
    registry.install(Matcher::any(), |_| {
        StubResponse::new(200)
            .with_body(vec![0u8; 2048])
            .with_response_time(ResponseTiming::Rate(1024))
    });

    let request = StubRequest::get("https://example.com/drip");
    let start = tokio::time::Instant::now();
    let response = registry.handle(&request).await.unwrap().unwrap();
    response.body_bytes().await;

    // 2 KiB at 1 KiB/s.
    assert!(start.elapsed() >= Duration::from_millis(1900));
}

#[tokio::test(start_paused = true)]
async fn connection_failure_after_request_time() {
    let registry = StubRegistry::new();
    registry.install(Matcher::any(), |_| {
        StubResponse::network_error(NetworkError::NotConnected)
            .with_request_time(Duration::from_secs(1))
    });

    let request = StubRequest::get("https://example.com/offline");
    let start = tokio::time::Instant::now();
    let outcome = registry.handle(&request).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(1));
    match outcome {
        Err(DeliveryError::Connection(e)) => assert_eq!(e, NetworkError::NotConnected),
        _ => panic!("expected simulated connection failure"),
    }
}

#[tokio::test]
async fn builder_errors_fail_loudly() {
    let registry = StubRegistry::new();
    registry.install_fallible(Matcher::any(), |_| {
        anyhow::bail!("fixture store misconfigured")
    });

    let request = StubRequest::get("https://example.com/");
    match registry.handle(&request).await.unwrap() {
        Err(DeliveryError::Builder(e)) => {
            assert!(e.to_string().contains("fixture store misconfigured"));
        }
        _ => panic!("expected builder failure"),
    }
}

#[tokio::test]
async fn fixture_file_body_is_delivered() {
    use std::io::Write;

    let mut fixture = tempfile::NamedTempFile::new().unwrap();
    fixture.write_all(b"fixture payload").unwrap();

    let registry = StubRegistry::new();
    let path = fixture.path().to_path_buf();
    registry.install(matcher::path_ends_with("/fixture"), move |_| {
        StubResponse::from_file(200, path.clone()).with_header("Content-Type", "text/plain")
    });

    let request = StubRequest::get("https://example.com/fixture");
    let response = registry.handle(&request).await.unwrap().unwrap();
    assert_eq!(response.body_bytes().await.as_ref(), b"fixture payload");
}

#[tokio::test]
async fn missing_fixture_is_a_delivery_failure() {
    let registry = StubRegistry::new();
    registry.install(Matcher::any(), |_| {
        StubResponse::from_file(200, "/nonexistent/fixture.bin")
    });

    let request = StubRequest::get("https://example.com/");
    assert!(matches!(
        registry.handle(&request).await.unwrap(),
        Err(DeliveryError::Fixture(_))
    ));
}

#[tokio::test]
async fn observer_sees_each_outcome_exactly_once() {
    let registry = StubRegistry::new();
    let observer = Arc::new(RecordingObserver::default());
    registry.set_activation_observer(Some(observer.clone()));

    registry.install_named("ok stub", matcher::is_path("/ok"), |_| {
        StubResponse::new(200).with_body("fine")
    });
    registry.install_named("broken stub", matcher::is_path("/broken"), |_| {
        StubResponse::network_error(NetworkError::ConnectionLost)
    });

    // Delivered.
    let response = registry
        .handle(&StubRequest::get("https://example.com/ok"))
        .await
        .unwrap()
        .unwrap();
    response.body_bytes().await;

    // Failed.
    let _ = registry
        .handle(&StubRequest::get("https://example.com/broken"))
        .await
        .unwrap();

    // Unmatched.
    assert!(registry
        .handle(&StubRequest::get("https://example.com/elsewhere"))
        .await
        .is_none());

    let activations = observer.activations.lock().unwrap();
    assert_eq!(activations.len(), 2);
    assert_eq!(activations[0].0.as_deref(), Some("ok stub"));
    assert_eq!(activations[0].1, "delivered:200");
    assert_eq!(activations[1].0.as_deref(), Some("broken stub"));
    assert!(activations[1].1.starts_with("failed:"));
    assert_eq!(observer.misses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn replacing_observer_clears_previous() {
    let registry = StubRegistry::new();
    registry.install(Matcher::any(), |_| StubResponse::new(200));

    let first = Arc::new(RecordingObserver::default());
    let second = Arc::new(RecordingObserver::default());
    registry.set_activation_observer(Some(first.clone()));
    registry.set_activation_observer(Some(second.clone()));

    let response = registry
        .handle(&StubRequest::get("https://example.com/"))
        .await
        .unwrap()
        .unwrap();
    response.body_bytes().await;

    assert!(first.activations.lock().unwrap().is_empty());
    assert_eq!(second.activations.lock().unwrap().len(), 1);

    // Clearing the slot silences everything.
    registry.set_activation_observer(None);
    let response = registry
        .handle(&StubRequest::get("https://example.com/"))
        .await
        .unwrap()
        .unwrap();
    response.body_bytes().await;
    assert_eq!(second.activations.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_stream_is_a_silent_cancellation() {
    let registry = StubRegistry::new();
    let observer = Arc::new(RecordingObserver::default());
    registry.set_activation_observer(Some(observer.clone()));

    registry.install(Matcher::any(), |_| {
        StubResponse::new(200)
            .with_body(vec![0u8; 64 * 1024])
            .with_response_time(ResponseTiming::Duration(Duration::from_secs(60)))
    });

    let request = StubRequest::get("https://example.com/huge");
    let mut response = registry.handle(&request).await.unwrap().unwrap();
    let first = response.body.next_chunk().await;
    assert!(first.is_some());
    drop(response);

    // The abandoned delivery never reports an activation.
    assert!(observer.activations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn removal_does_not_affect_in_flight_match() {
    let registry = StubRegistry::new();
    let handle = registry.install(Matcher::any(), |_| StubResponse::new(200).with_body("kept"));

    let request = StubRequest::get("https://example.com/");
    let matched = registry.find_match(&request).unwrap();

    assert!(registry.remove(handle));
    // The matched stub keeps working with the builder it already selected.
    let response = matched.build_response(&request).unwrap();
    assert_eq!(response.status, 200);
    // New matches see the removal.
    assert!(registry.find_match(&request).is_none());
}

#[tokio::test]
async fn concurrent_requests_do_not_serialize_on_each_other() {
    let registry = Arc::new(StubRegistry::new());
    registry.install(Matcher::any(), |req| {
        StubResponse::new(200).with_body(req.path().to_string())
    });

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let request = StubRequest::get(&format!("https://example.com/task/{i}"));
                let response = registry.handle(&request).await.unwrap().unwrap();
                assert_eq!(response.status, 200);
                let body = response.body_bytes().await;
                assert_eq!(body.as_ref(), format!("/task/{i}").as_bytes());
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn default_registry_free_functions() {
    // The default registry is process-global; this test owns it exclusively
    // because it is the only one touching it.
    let handle = httpstub::stub(matcher::is_host("global.example.com"), |_| {
        StubResponse::new(201)
    });

    let request = StubRequest::get("https://global.example.com/");
    let response = httpstub::default_registry()
        .handle(&request)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status, 201);

    assert!(httpstub::remove_stub(handle));
    assert!(!httpstub::remove_stub(handle));
    assert_eq!(httpstub::remove_all_stubs(), 0);
}
