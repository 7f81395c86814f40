use futures::future::join_all;
use nexus_reactor::{ErrorCode, Pool, Request, RuntimeConfig};
use serde_json::json;
use std::time::Duration;

const VIEWS_SCRIPT: &str = r#"
    var views = {
        Serial: function (props) { return '<div>' + props.serial + '</div>'; },
        Greeting: function (props) { return '<h1>Hello, ' + props.who + '</h1>'; }
    };

    function render(json) {
        var req = JSON.parse(json);
        var view = views[req.name];
        if (!view) {
            return JSON.stringify({ error: 'unknown view: ' + req.name });
        }
        return JSON.stringify({ html: view(req.props) });
    }
"#;

fn setup() {
    nexus_reactor::init_tracing();
    nexus_reactor::init(RuntimeConfig::default()).unwrap();
}

#[tokio::test]
async fn test_render_views() {
    setup();
    let pool = Pool::new(VIEWS_SCRIPT).await.unwrap();

    let res = pool
        .render(Request::new("Greeting").with_props(json!({ "who": "world" })))
        .await
        .unwrap();
    assert_eq!(res.html.as_deref(), Some("<h1>Hello, world</h1>"));

    let res = pool.render(Request::new("Nope")).await.unwrap();
    assert!(res.is_error());
    assert_eq!(res.error.as_deref(), Some("unknown view: Nope"));
    assert!(res.html.is_none());
}

#[tokio::test]
async fn test_div_then_span() {
    setup();
    let div = r#"function render(json) {
        var req = JSON.parse(json);
        return JSON.stringify({ html: '<div>' + req.props.serial + '</div>' });
    }"#;
    let span = div.replace("div", "span");

    let pool = Pool::new(div).await.unwrap();
    let req = Request::new("Serial").with_props(json!({ "serial": "42" }));

    let res = pool.render(req.clone()).await.unwrap();
    let html = res.html.unwrap();
    assert!(html.contains("42"));
    assert!(html.starts_with("<div>"));

    pool.update_code(&span).await.unwrap();
    let res = pool.render(req).await.unwrap();
    let html = res.html.unwrap();
    assert!(html.contains("42"));
    assert!(html.starts_with("<span>"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_renders() {
    setup();
    let pool = Pool::new(VIEWS_SCRIPT).await.unwrap();

    let renders = (0..40).map(|i| {
        let pool = pool.clone();
        async move {
            let req = Request::new("Serial").with_props(json!({ "serial": i }));
            (i, pool.render(req).await)
        }
    });

    for (i, result) in join_all(renders).await {
        let res = result.unwrap();
        assert_eq!(res.html, Some(format!("<div>{}</div>", i)));
    }

    let stats = pool.stats();
    assert_eq!(stats.successful_renders, 40);
    assert!(stats.workers_created >= 1);
    assert!(stats.workers_created <= 40);
    assert_eq!(stats.idle_workers as u64, stats.workers_created);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_renders_across_update() {
    setup();
    let pool = Pool::new(VIEWS_SCRIPT).await.unwrap();
    let updated = VIEWS_SCRIPT.replace("<div>", "<p>").replace("</div>", "</p>");

    let renders = (0..20).map(|i| {
        let pool = pool.clone();
        async move {
            let req = Request::new("Serial").with_props(json!({ "serial": i }));
            pool.render(req).await
        }
    });
    let (results, update) = tokio::join!(join_all(renders), pool.update_code(&updated));

    update.unwrap();
    for result in results {
        let html = result.unwrap().html.unwrap();
        assert!(html.starts_with("<div>") || html.starts_with("<p>"), "{}", html);
    }

    for i in 0..5 {
        let req = Request::new("Serial").with_props(json!({ "serial": i }));
        let res = pool.render(req).await.unwrap();
        assert_eq!(res.html, Some(format!("<p>{}</p>", i)));
    }
}

#[tokio::test]
async fn test_timeouts_do_not_poison_pool() {
    setup();
    let pool = Pool::new(VIEWS_SCRIPT).await.unwrap();

    for _ in 0..10 {
        let req = Request::new("Serial")
            .with_props(json!({ "serial": 1 }))
            .with_timeout(Duration::from_nanos(10));
        let err = pool.render(req).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    let res = pool
        .render(Request::new("Serial").with_props(json!({ "serial": 2 })))
        .await
        .unwrap();
    assert_eq!(res.html.as_deref(), Some("<div>2</div>"));
    assert_eq!(pool.stats().timeouts, 10);
}

#[tokio::test]
async fn test_script_errors_surface() {
    setup();
    let pool = Pool::new("function render(json) { throw 'hi'; }")
        .await
        .unwrap();

    let err = pool.render(Request::new("Any")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExecutionError);
    assert!(err.to_string().contains("Uncaught exception: hi"), "{}", err);

    let err = pool.update_code("function render(").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompilationError);
}
