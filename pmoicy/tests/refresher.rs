//! Tests for the background title refresher

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use pmoicy::{
    IcyError, IcyInjector, JsonTitleSource, RefresherState, TitleRefresher, TitleSource,
};
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Returns "title 1", "title 2", ...
#[derive(Default)]
struct CountingSource {
    calls: AtomicUsize,
}

#[async_trait]
impl TitleSource for CountingSource {
    async fn fetch_title(&self) -> pmoicy::Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("title {n}"))
    }

    fn describe(&self) -> String {
        "counting".into()
    }
}

#[derive(Default)]
struct FailingSource {
    calls: AtomicUsize,
}

#[async_trait]
impl TitleSource for FailingSource {
    async fn fetch_title(&self) -> pmoicy::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(IcyError::NotAnObject("null"))
    }

    fn describe(&self) -> String {
        "failing".into()
    }
}

/// Fetch that only completes once released.
#[derive(Default)]
struct BlockingSource {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl TitleSource for BlockingSource {
    async fn fetch_title(&self) -> pmoicy::Result<String> {
        self.started.notify_one();
        self.release.notified().await;
        Ok("late".into())
    }

    fn describe(&self) -> String {
        "blocking".into()
    }
}

struct PanickingSource;

#[async_trait]
impl TitleSource for PanickingSource {
    async fn fetch_title(&self) -> pmoicy::Result<String> {
        panic!("metadata parser exploded")
    }

    fn describe(&self) -> String {
        "panicking".into()
    }
}

fn target(title: &str) -> IcyInjector<tokio::io::Empty> {
    IcyInjector::new(tokio::io::empty(), title)
}

#[tokio::test(start_paused = true)]
async fn test_first_fetch_is_immediate_then_periodic() {
    let source = Arc::new(CountingSource::default());
    let injector = target("initial");
    let titles = injector.title_handle();

    let handle = TitleRefresher::new(source.clone())
        .with_interval(Duration::from_secs(10))
        .spawn(injector.title_handle(), CancellationToken::new());

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(titles.title(), "title 1");
    assert_eq!(handle.state(), RefresherState::Running);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(titles.title(), "title 2");
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failures_keep_previous_title() {
    let source = Arc::new(FailingSource::default());
    let injector = target("Station");

    let handle = TitleRefresher::new(source.clone())
        .with_interval(Duration::from_secs(10))
        .spawn(injector.title_handle(), CancellationToken::new());

    tokio::time::sleep(Duration::from_secs(25)).await;

    // t = 0, 10 and 20: one attempt per cycle, no retry in between
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    assert_eq!(injector.title_handle().title(), "Station");
    assert!(!handle.is_stopped());

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancellation_interrupts_fetch() {
    let source = Arc::new(BlockingSource::default());
    let injector = target("Station");
    let token = CancellationToken::new();

    let mut handle = TitleRefresher::new(source.clone()).spawn(injector.title_handle(), token.clone());

    source.started.notified().await;
    token.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle.stopped())
        .await
        .expect("refresher did not stop");
    assert!(handle.is_stopped());

    // A fetch completing after cancellation has no effect
    source.release.notify_one();
    tokio::task::yield_now().await;
    assert_eq!(injector.title_handle().title(), "Station");
}

#[tokio::test(start_paused = true)]
async fn test_wait_wakes_on_cancellation() {
    let source = Arc::new(CountingSource::default());
    let injector = target("initial");

    let mut handle = TitleRefresher::new(source.clone())
        .with_interval(Duration::from_secs(3600))
        .spawn(injector.title_handle(), CancellationToken::new());

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(injector.title_handle().title(), "title 1");

    handle.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle.stopped())
        .await
        .expect("refresher kept sleeping after cancellation");

    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(injector.title_handle().title(), "title 1");
}

#[tokio::test]
async fn test_panic_is_contained() {
    let injector = target("Station");

    let mut handle =
        TitleRefresher::new(Arc::new(PanickingSource)).spawn(injector.title_handle(), CancellationToken::new());

    tokio::time::timeout(Duration::from_secs(5), handle.stopped())
        .await
        .expect("refresher did not stop after panicking");

    assert_eq!(handle.state(), RefresherState::Stopped);
    assert_eq!(injector.title_handle().title(), "Station");
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_dropping_handle_cancels_task() {
    let source = Arc::new(BlockingSource::default());
    let injector = target("Station");
    let token = CancellationToken::new();

    let handle = TitleRefresher::new(source.clone()).spawn(injector.title_handle(), token.clone());
    source.started.notified().await;

    drop(handle);
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn test_json_source_renders_template() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/now_playing.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "artist": "Miles Davis",
            "title": "So What",
            "year": 1959
        })))
        .mount(&mock_server)
        .await;

    let url = format!("{}/now_playing.json", mock_server.uri()).parse().unwrap();
    let source = JsonTitleSource::with_format(
        reqwest::Client::new(),
        url,
        "{{ .artist }} - {{ .title }} ({{ .year }}){{ .missing }}",
    )
    .unwrap();

    assert_eq!(source.fetch_title().await.unwrap(), "Miles Davis - So What (1959)");
}

#[tokio::test]
async fn test_json_source_rejects_non_objects() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["a", "b"])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/garbage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let source_for = |route: &str| {
        JsonTitleSource::with_format(
            reqwest::Client::new(),
            format!("{}{route}", mock_server.uri()).parse().unwrap(),
            "{{ .title }}",
        )
        .unwrap()
    };

    assert!(matches!(
        source_for("/list").fetch_title().await,
        Err(IcyError::NotAnObject("an array"))
    ));
    assert!(matches!(
        source_for("/garbage").fetch_title().await,
        Err(IcyError::Json(_))
    ));
    assert!(matches!(
        source_for("/broken").fetch_title().await,
        Err(IcyError::Http(_))
    ));
}

#[tokio::test]
async fn test_json_source_rejects_bad_template() {
    let result = JsonTitleSource::with_format(
        reqwest::Client::new(),
        "http://localhost/now.json".parse().unwrap(),
        "{{ .title",
    );
    assert!(matches!(result, Err(IcyError::Template(_))));
}

#[tokio::test]
async fn test_refresher_publishes_endpoint_title() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/meta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "now": {"artist": "John Coltrane", "title": "Giant Steps"}
        })))
        .mount(&mock_server)
        .await;

    let source = JsonTitleSource::with_format(
        reqwest::Client::new(),
        format!("{}/meta", mock_server.uri()).parse().unwrap(),
        "{{ .now.artist }} - {{ .now.title }}",
    )
    .unwrap();

    let injector = target("");
    let titles = injector.title_handle();
    let handle = TitleRefresher::new(Arc::new(source)).spawn(titles.clone(), CancellationToken::new());

    tokio::time::timeout(Duration::from_secs(5), async {
        while titles.title().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("title was never published");

    assert_eq!(titles.title(), "John Coltrane - Giant Steps");
    handle.stop().await.unwrap();
}
