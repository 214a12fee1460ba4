//! Concurrency tests for the renderer's scheduling.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spa_prerender::logging::MemoryLog;
use spa_prerender::prelude::*;
use spa_prerender::resources::app::MemoryAssets;
use spa_prerender::resources::network::NoNetwork;
use spa_prerender::runtime::mock::{MockApp, MockRuntimeFactory, Page};
use tokio::task::JoinSet;

const INDEX: &str = "<html><head></head><body><div id=\"app\"></div></body></html>";

/// A handler that keeps its worker thread busy before writing the page.
fn slow_handler(page: &Page, text: &str) {
    std::thread::sleep(Duration::from_millis(200));
    page.set_body(&format!("<p>{}</p>", text));
}

type Journal = Arc<Mutex<Vec<String>>>;

/// Every route logs when it starts and when its timer completes.
fn journaling_app(journal: Journal) -> MockApp {
    MockApp::new().fallback(move |page| {
        let path = page.path();
        journal.lock().unwrap().push(format!("start {}", path));
        let journal = journal.clone();
        page.set_timeout(Duration::from_millis(30), move |page| {
            journal.lock().unwrap().push(format!("end {}", path));
            page.set_body(&format!("<h1>{}</h1>", path));
        });
    })
}

fn renderer(app: MockApp) -> (SharedRenderer, Arc<std::sync::atomic::AtomicUsize>) {
    let factory = MockRuntimeFactory::with_app(app);
    let counter = factory.counter();
    let renderer = Renderer::builder()
        .factory(Arc::new(factory))
        .assets(Arc::new(
            MemoryAssets::new()
                .with("index.html", INDEX)
                .with("data.json", "{}"),
        ))
        .network(Arc::new(NoNetwork))
        .build()
        .unwrap();
    (Arc::new(renderer), counter)
}

fn log() -> Arc<MemoryLog> {
    Arc::new(MemoryLog::new())
}

/// Renders for one identity run strictly one after another.
#[tokio::test]
async fn test_same_identity_renders_do_not_overlap() {
    let journal: Journal = Arc::default();
    let (renderer, counter) = renderer(journaling_app(journal.clone()));

    let (a, b) = tokio::join!(
        renderer.render(log(), "agent", "/a", None),
        renderer.render(log(), "agent", "/b", None),
    );
    assert!(a.unwrap().contains("<h1>/a</h1>"));
    assert!(b.unwrap().contains("<h1>/b</h1>"));

    assert_eq!(*journal.lock().unwrap(), vec!["start /a", "end /a", "start /b", "end /b"]);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    renderer.close().await.unwrap();
}

/// Renders for different identities proceed concurrently.
#[tokio::test]
async fn test_distinct_identities_overlap() {
    let journal: Journal = Arc::default();
    let (renderer, counter) = renderer(journaling_app(journal.clone()));

    let (a, b) = tokio::join!(
        renderer.render(log(), "agent-1", "/a", None),
        renderer.render(log(), "agent-2", "/b", None),
    );
    a.unwrap();
    b.unwrap();

    let journal = journal.lock().unwrap().clone();
    assert_eq!(&journal[..2], ["start /a", "start /b"], "both started before either finished");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    renderer.close().await.unwrap();
}

/// Concurrent first renders for one identity share one construction.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_renders_share_construction() {
    let app = MockApp::new().fallback(|page| page.set_body(&format!("<h1>{}</h1>", page.path())));
    let (renderer, counter) = renderer(app);

    let mut tasks = JoinSet::new();
    for i in 0..8 {
        let renderer = Arc::clone(&renderer);
        tasks.spawn(async move {
            let path = format!("/item/{}", i);
            let html = renderer.render(log(), "shared-agent", &path, None).await.unwrap();
            assert!(html.contains(&format!("<h1>{}</h1>", path)));
        });
    }
    while let Some(result) = tasks.join_next().await {
        assert!(result.is_ok(), "Task should complete without panic");
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let stats = renderer.stats();
    assert_eq!(stats.constructions, 1);
    assert_eq!(stats.renders_succeeded, 8);
    renderer.close().await.unwrap();
}

/// Test concurrent access to renderer stats while rendering.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stats_access() {
    let app = MockApp::new().fallback(|page| {
        page.set_timeout(Duration::from_millis(5), |page| page.set_body("<p>done</p>"));
    });
    let (renderer, _) = renderer(app);

    let mut tasks = JoinSet::new();
    for i in 0..4 {
        let renderer = Arc::clone(&renderer);
        tasks.spawn(async move {
            renderer
                .render(log(), &format!("agent-{}", i), "/", None)
                .await
                .map(|_| ())
        });
    }
    for _ in 0..4 {
        let renderer = Arc::clone(&renderer);
        tasks.spawn(async move {
            for _ in 0..100 {
                let _stats = renderer.stats();
                tokio::task::yield_now().await;
            }
            Ok(())
        });
    }

    while let Some(result) = tasks.join_next().await {
        assert!(result.unwrap().is_ok());
    }
    let stats = renderer.stats();
    assert_eq!(stats.environments, 4);
    assert_eq!(stats.renders_succeeded, 4);
    assert!(stats.is_idle());
    renderer.close().await.unwrap();
}

/// A timer handler running on another worker is part of the render.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timer_handler_on_worker_finishes_before_serialization() {
    let app = MockApp::new().fallback(|page| {
        page.set_timeout(Duration::from_millis(5), |page| slow_handler(page, "late timer"));
    });
    let (renderer, _) = renderer(app);

    let html = renderer.render(log(), "agent", "/", None).await.unwrap();
    assert!(html.contains("<p>late timer</p>"), "serialized before the timer handler finished: {}", html);
    renderer.close().await.unwrap();
}

/// A request handler running on another worker is part of the render.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_handler_on_worker_finishes_before_serialization() {
    let app = MockApp::new().fallback(|page| {
        page.fetch("/data.json", |page, result| {
            assert!(result.is_ok());
            slow_handler(page, "late response");
        });
    });
    let (renderer, _) = renderer(app);

    let html = renderer.render(log(), "agent", "/", None).await.unwrap();
    assert!(html.contains("<p>late response</p>"), "serialized before the request handler finished: {}", html);
    renderer.close().await.unwrap();
}

/// A failed request's handler also runs before the page settles.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_request_handler_on_worker_finishes_before_serialization() {
    let app = MockApp::new().fallback(|page| {
        page.fetch("https://offline.example.com/feed.json", |page, result| {
            assert!(result.is_err());
            slow_handler(page, "offline");
        });
    });
    let (renderer, _) = renderer(app);

    let html = renderer.render(log(), "agent", "/", None).await.unwrap();
    assert!(html.contains("<p>offline</p>"), "serialized before the error handler finished: {}", html);
    renderer.close().await.unwrap();
}
