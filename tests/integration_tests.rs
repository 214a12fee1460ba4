//! End-to-end renders against the scripted mock runtime.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spa_prerender::logging::MemoryLog;
use spa_prerender::middleware::{init_module, resource_module};
use spa_prerender::prelude::*;
use spa_prerender::resources::app::MemoryAssets;
use spa_prerender::resources::network::NoNetwork;
use spa_prerender::resources::{ResourceFuture, ResourceLoader, ResourceRequest};
use spa_prerender::runtime::ImageOutcome;
use spa_prerender::runtime::mock::{MockApp, MockRuntimeFactory};

const INDEX: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>Shop</title>
<link rel="preload" href="main.dart.js" as="script">
<script src="flutter.js" defer></script>
<script type="application/ld+json">{"@type":"Store"}</script>
</head>
<body>
<p>Hello from the shop</p>
<script>window.addEventListener('load', function () { loadMainDartJs(); });</script>
<script type="application/javascript" src="main.dart.js"></script>
</body>
</html>"#;

const DESKTOP: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/120.0";
const MOBILE: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) Mobile Safari/537.36";

type Journal = Arc<Mutex<Vec<String>>>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assets() -> MemoryAssets {
    MemoryAssets::new()
        .with("index.html", INDEX)
        .with("data.json", r#"{"products":3}"#)
}

fn renderer(app: MockApp) -> (Renderer, Arc<std::sync::atomic::AtomicUsize>) {
    let factory = MockRuntimeFactory::with_app(app);
    let counter = factory.counter();
    let renderer = Renderer::builder()
        .factory(Arc::new(factory))
        .assets(Arc::new(assets()))
        .network(Arc::new(NoNetwork))
        .build()
        .unwrap();
    (renderer, counter)
}

/// A fresh render keeps static content, strips the bootstrap and injects
/// exactly the two deferred blocks.
#[tokio::test]
async fn test_fresh_render_of_root() {
    init_logging();
    let app = MockApp::new().route("/", |page| {
        page.set_timeout(Duration::from_millis(10), |page| {
            page.append_body("<p>rendered by timer</p>");
        });
        page.fetch("/data.json", |page, result| {
            let body = result.unwrap_or_default();
            page.append_body(&format!("<pre>{}</pre>", String::from_utf8_lossy(&body)));
        });
    });
    let (renderer, counter) = renderer(app);
    let log = Arc::new(MemoryLog::new());

    let html = renderer.render(log.clone(), DESKTOP, "/", None).await.unwrap();

    assert!(html.contains("<p>Hello from the shop</p>"));
    assert!(html.contains("<p>rendered by timer</p>"));
    assert!(html.contains(r#"<pre>{"products":3}</pre>"#));
    assert!(!html.contains("main.dart.js"));
    assert!(!html.contains("flutter.js"));
    assert!(!html.contains("loadMainDartJs"));
    assert!(html.contains("application/ld+json"), "data blocks are kept");
    assert_eq!(html.matches("<script").count(), 3, "two injected blocks plus the data block");
    assert_eq!(html.matches("<script type=\"application/javascript\">").count(), 2);
    assert!(html.contains("const fontLoaders = [];"));
    assert!(html.contains("Promise.all(fontLoaders)"));

    assert!(log.error_free(), "unexpected errors: {:?}", log.lines());
    assert!(log.contains("Request BEGIN: http://localhost/data.json"));
    assert!(log.contains("Request END:   http://localhost/data.json"));
    assert!(log.contains("Fetching http://localhost/data.json"));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    renderer.close().await.unwrap();
}

/// One identity, three paths: one construction, navigation in between.
#[tokio::test]
async fn test_environment_reused_across_paths() {
    init_logging();
    let app = MockApp::new().fallback(|page| page.set_body(&format!("<h1>{}</h1>", page.path())));
    let (renderer, counter) = renderer(app);

    for path in ["/", "/products", "/cart"] {
        let html = renderer
            .render(Arc::new(MemoryLog::new()), DESKTOP, path, None)
            .await
            .unwrap();
        assert!(html.contains(&format!("<h1>{}</h1>", path)), "{} rendered {}", path, html);
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let stats = renderer.stats();
    assert_eq!(stats.environments, 1);
    assert_eq!(stats.constructions, 1);
    assert_eq!(stats.renders_succeeded, 3);
    assert!(stats.is_idle());

    renderer.close().await.unwrap();
}

/// Identities get their own environment, sized for the device.
#[tokio::test]
async fn test_identities_get_separate_environments() {
    init_logging();
    let app = MockApp::new().fallback(|page| {
        page.set_body(&format!(
            "<p>{}x{} ssr={}</p>",
            page.viewport().width,
            page.viewport().height,
            page.local_storage("flutter.ServerSideRendering").unwrap_or_default()
        ));
    });
    let (renderer, counter) = renderer(app);

    let desktop = renderer.render(Arc::new(MemoryLog::new()), DESKTOP, "/", None).await.unwrap();
    let mobile = renderer.render(Arc::new(MemoryLog::new()), MOBILE, "/", None).await.unwrap();

    assert!(desktop.contains("<p>1920x1600 ssr=true</p>"));
    assert!(mobile.contains("<p>411x731 ssr=true</p>"));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(renderer.stats().environments, 2);

    renderer.close().await.unwrap();
}

/// An aborted render rejects and leaves the environment usable.
#[tokio::test]
async fn test_aborted_render_does_not_poison_queue() {
    init_logging();
    let app = MockApp::new().route("/slow", |page| {
        page.set_timeout(Duration::from_millis(150), |page| page.set_body("<p>slow done</p>"));
    });
    let (renderer, counter) = renderer(app);

    let signal = AbortSignal::timeout(Duration::from_millis(20));
    let err = renderer
        .render(Arc::new(MemoryLog::new()), DESKTOP, "/slow", Some(&signal))
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::Aborted), "got {err:?}");

    // The timer kept running; the next render waits for it.
    let html = renderer
        .render(Arc::new(MemoryLog::new()), DESKTOP, "/slow", None)
        .await
        .unwrap();
    assert!(html.contains("<p>slow done</p>"));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let stats = renderer.stats();
    assert_eq!(stats.renders_failed, 1);
    assert_eq!(stats.renders_succeeded, 1);

    renderer.close().await.unwrap();
}

/// A request that never completes.
fn hanging() -> spa_prerender::middleware::Stateless {
    resource_module(
        "hang",
        |request: &ResourceRequest, next: &dyn ResourceLoader| -> Option<ResourceFuture> {
            if request.url.ends_with("/hang") {
                Some(Box::pin(futures::future::pending::<spa_prerender::Result<bytes::Bytes>>()))
            } else {
                next.fetch(request)
            }
        },
    )
}

fn hanging_app() -> MockApp {
    MockApp::new().route("/", |page| page.fetch("/hang", |_, _| {}))
}

/// A never-terminating request is cut off by a timed abort signal.
#[tokio::test]
async fn test_hanging_request_with_abort_signal() {
    init_logging();
    let renderer = Renderer::builder()
        .config(RendererConfigBuilder::new().render_timeout(None).build().unwrap())
        .factory(Arc::new(MockRuntimeFactory::with_app(hanging_app())))
        .assets(Arc::new(assets()))
        .network(Arc::new(NoNetwork))
        .app(App::new().with(hanging()))
        .build()
        .unwrap();

    let signal = AbortSignal::timeout(Duration::from_millis(50));
    let err = renderer
        .render(Arc::new(MemoryLog::new()), DESKTOP, "/", Some(&signal))
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::Aborted), "got {err:?}");
    assert!(err.is_retryable());

    renderer.close().await.unwrap();
}

/// Without a signal the configured render timeout applies.
#[tokio::test]
async fn test_hanging_request_with_render_timeout() {
    init_logging();
    let limit = Duration::from_millis(50);
    let renderer = Renderer::builder()
        .config(RendererConfigBuilder::new().render_timeout(Some(limit)).build().unwrap())
        .factory(Arc::new(MockRuntimeFactory::with_app(hanging_app())))
        .assets(Arc::new(assets()))
        .network(Arc::new(NoNetwork))
        .app(App::new().with(hanging()))
        .build()
        .unwrap();

    let err = renderer
        .render(Arc::new(MemoryLog::new()), DESKTOP, "/", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::Timeout(d) if d == limit), "got {err:?}");
    assert_eq!(err.status_code(), 504);

    renderer.close().await.unwrap();
}

/// A closed renderer rejects renders, after finishing the one in flight.
#[tokio::test]
async fn test_close_waits_then_rejects() {
    init_logging();
    let app = MockApp::new().fallback(|page| {
        page.set_timeout(Duration::from_millis(40), |page| page.set_body("<p>finished</p>"));
    });
    let (renderer, _) = renderer(app);

    let (rendered, closed) = tokio::join!(
        renderer.render(Arc::new(MemoryLog::new()), DESKTOP, "/", None),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            renderer.close().await
        }
    );
    assert!(rendered.unwrap().contains("<p>finished</p>"));
    closed.unwrap();
    assert!(renderer.is_closed());

    let err = renderer
        .render(Arc::new(MemoryLog::new()), DESKTOP, "/", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::Closed));
    assert_eq!(renderer.stats().environments, 0);
}

/// User handlers see requests in declared order, after the built-in ones.
#[tokio::test]
async fn test_interceptor_order() {
    init_logging();
    let journal: Journal = Arc::default();
    let journaling = |name: &'static str, journal: Journal| {
        resource_module(
            name,
            move |request: &ResourceRequest, next: &dyn ResourceLoader| -> Option<ResourceFuture> {
                journal.lock().unwrap().push(format!("{} {}", name, request.url));
                next.fetch(request)
            },
        )
    };

    let outcome: Arc<Mutex<Option<ImageOutcome>>> = Arc::default();
    let image_outcome = outcome.clone();
    let app = MockApp::new().route("/", move |page| {
        page.fetch("/data.json", |_, _| {});
        page.fetch("/blocked.js", |page, result| {
            assert_eq!(result.unwrap().len(), 0);
            page.append_body("<p>blocked ok</p>");
        });
        let image_outcome = image_outcome.clone();
        page.load_image("https://cdn.example.com/logo.PNG", move |_, outcome| {
            *image_outcome.lock().unwrap() = Some(outcome);
        });
    });

    let renderer = Renderer::builder()
        .config(
            RendererConfigBuilder::new()
                .block_list(["http://localhost/blocked.js"])
                .build()
                .unwrap(),
        )
        .factory(Arc::new(MockRuntimeFactory::with_app(app)))
        .assets(Arc::new(assets()))
        .network(Arc::new(NoNetwork))
        .app(
            App::new()
                .with(journaling("first", journal.clone()))
                .with(journaling("second", journal.clone())),
        )
        .build()
        .unwrap();

    let log = Arc::new(MemoryLog::new());
    let html = renderer.render(log.clone(), DESKTOP, "/", None).await.unwrap();

    assert!(html.contains("<p>blocked ok</p>"));
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["first http://localhost/data.json", "second http://localhost/data.json"],
        "blocked and placeholder URLs are answered before user handlers"
    );
    assert_eq!(*outcome.lock().unwrap(), Some(ImageOutcome::Loaded));
    assert!(log.error_free(), "unexpected errors: {:?}", log.lines());

    renderer.close().await.unwrap();
}

/// Init hooks of modules run before page script and see the seeded window.
#[tokio::test]
async fn test_init_module_runs_before_page_script() {
    init_logging();
    let app = MockApp::new().fallback(|page| {
        let vendor = page.local_storage("vendor").unwrap_or_default();
        page.set_body(&format!("<p>vendor={}</p>", vendor));
    });
    let renderer = Renderer::builder()
        .factory(Arc::new(MockRuntimeFactory::with_app(app)))
        .assets(Arc::new(assets()))
        .network(Arc::new(NoNetwork))
        .app(App::new().with(init_module("vendor", |window| {
            window.local_storage.insert("vendor".into(), "Google Inc.".into());
        })))
        .build()
        .unwrap();

    let html = renderer.render(Arc::new(MemoryLog::new()), DESKTOP, "/", None).await.unwrap();
    assert!(html.contains("<p>vendor=Google Inc.</p>"));

    renderer.close().await.unwrap();
}

/// Object URLs minted by page code are served from the blob store.
#[tokio::test]
async fn test_blob_urls_round_trip_through_resources() {
    init_logging();
    let app = MockApp::new().route("/", |page| {
        let url = page.create_object_url(&b"generated font"[..]).unwrap();
        page.fetch(&url, |page, result| {
            page.append_body(&format!("<p>{}</p>", String::from_utf8_lossy(&result.unwrap())));
        });
    });
    let (renderer, _) = renderer(app);

    let html = renderer.render(Arc::new(MemoryLog::new()), DESKTOP, "/", None).await.unwrap();
    assert!(html.contains("<p>generated font</p>"));

    renderer.close().await.unwrap();
}

/// Page console output is routed to the render's log.
#[tokio::test]
async fn test_console_reaches_render_log() {
    init_logging();
    let app = MockApp::new().route("/", |page| {
        page.console(spa_prerender::logging::ConsoleMessage::Warn("low on stock".into()));
    });
    let (renderer, _) = renderer(app);
    let log = Arc::new(MemoryLog::new());

    renderer.render(log.clone(), DESKTOP, "/", None).await.unwrap();
    assert!(log.contains("Warning from javascript during server-side rendering: low on stock"));

    renderer.close().await.unwrap();
}

/// A failing runtime factory surfaces as a construction error and is
/// retried on the next render.
#[tokio::test]
async fn test_factory_failure_is_retried() {
    init_logging();
    let factory = MockRuntimeFactory::always_fails("engine unavailable");
    let counter = factory.counter();
    let renderer = Renderer::builder()
        .factory(Arc::new(factory))
        .assets(Arc::new(assets()))
        .network(Arc::new(NoNetwork))
        .build()
        .unwrap();

    for _ in 0..2 {
        let err = renderer
            .render(Arc::new(MemoryLog::new()), DESKTOP, "/", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::EnvironmentCreation(ref m) if m == "engine unavailable"));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    renderer.close().await.unwrap();
}
