use axum::{body::Body, routing::get, Router};
use http::StatusCode;
use modkit::{
    AxumAdapter, HttpAdapter, MiddlewareConsumer, MiddlewareModule, Module, ModuleCtxBuilder,
};
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
use otel_core::{ApiMetricsOptions, MetricsOptions, OpenTelemetryModule, OpenTelemetryOptions};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

#[derive(Debug)]
struct Point {
    name: String,
    value: u64,
    attrs: BTreeMap<String, String>,
}

impl Point {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }
}

struct Recorder {
    provider: SdkMeterProvider,
    exporter: InMemoryMetricExporter,
}

impl Recorder {
    fn new() -> Self {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();
        Self { provider, exporter }
    }

    fn counters(&self) -> Vec<Point> {
        self.provider.force_flush().unwrap();
        let finished = self.exporter.get_finished_metrics().unwrap();
        let last = finished.last().expect("metrics were exported");
        let mut points = Vec::new();
        for scope in last.scope_metrics() {
            for metric in scope.metrics() {
                if let AggregatedMetrics::U64(MetricData::Sum(sum)) = metric.data() {
                    points.extend(sum.data_points().map(|dp| Point {
                        name: metric.name().to_owned(),
                        value: dp.value(),
                        attrs: dp
                            .attributes()
                            .map(|kv| (kv.key.to_string(), kv.value.to_string()))
                            .collect(),
                    }));
                }
            }
        }
        points
    }

    fn histogram_count(&self, name: &str) -> u64 {
        self.provider.force_flush().unwrap();
        let finished = self.exporter.get_finished_metrics().unwrap();
        let last = finished.last().expect("metrics were exported");
        last.scope_metrics()
            .flat_map(|scope| scope.metrics())
            .filter(|metric| metric.name() == name)
            .map(|metric| match metric.data() {
                AggregatedMetrics::F64(MetricData::Histogram(h)) => {
                    h.data_points().map(|dp| dp.count()).sum()
                }
                _ => 0,
            })
            .sum()
    }
}

fn named<'a>(points: &'a [Point], name: &str) -> Vec<&'a Point> {
    points.iter().filter(|p| p.name == name).collect()
}

fn api_options(api: ApiMetricsOptions) -> OpenTelemetryOptions {
    OpenTelemetryOptions {
        metrics: Some(MetricsOptions {
            api_metrics: ApiMetricsOptions { enable: true, ..api },
            ..Default::default()
        }),
    }
}

/// Resolves the module against `recorder`, configures the middleware and
/// layers it over `routes`.
async fn instrumented(
    recorder: &Recorder,
    options: OpenTelemetryOptions,
    adapter: Arc<dyn HttpAdapter>,
    routes: Router,
) -> Router {
    let module = OpenTelemetryModule::for_root(options);
    let ctx = ModuleCtxBuilder::new(CancellationToken::new())
        .with_http_adapter(adapter)
        .with_meter_provider(Arc::new(recorder.provider.clone()))
        .for_module("otel_core")
        .build();
    module.init(&ctx).await.unwrap();
    let mut consumer = MiddlewareConsumer::new();
    module.configure(&ctx, &mut consumer).unwrap();
    consumer.apply_to(routes)
}

async fn call(router: &Router, uri: &str) -> StatusCode {
    router
        .clone()
        .oneshot(http::Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn outcomes_are_split_by_status_class() {
    let recorder = Recorder::new();
    let router = instrumented(
        &recorder,
        api_options(ApiMetricsOptions {
            prefix: Some("shop_".into()),
            default_attributes: BTreeMap::from([("env".to_string(), "test".to_string())]),
            ..Default::default()
        }),
        Arc::new(AxumAdapter::new()),
        Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route("/bad", get(|| async { StatusCode::BAD_REQUEST }))
            .route("/boom", get(|| async { StatusCode::INTERNAL_SERVER_ERROR })),
    )
    .await;

    assert_eq!(call(&router, "/ok").await, StatusCode::OK);
    assert_eq!(call(&router, "/bad").await, StatusCode::BAD_REQUEST);
    assert_eq!(call(&router, "/boom").await, StatusCode::INTERNAL_SERVER_ERROR);

    let points = recorder.counters();
    assert!(!points.is_empty());
    for p in &points {
        assert!(p.name.starts_with("shop_"), "{}", p.name);
        assert_eq!(p.attr("env"), Some("test"), "{p:?}");
        assert_eq!(p.attr("method"), Some("GET"), "{p:?}");
    }

    let requests = named(&points, "shop_http.server.request.count");
    assert_eq!(requests.iter().map(|p| p.value).sum::<u64>(), 3);
    // the request counter is recorded before the status is known
    assert!(requests.iter().all(|p| p.attr("status").is_none()));
    assert_eq!(
        named(&points, "shop_http.server.response.count")
            .iter()
            .map(|p| p.value)
            .sum::<u64>(),
        3
    );

    let success = named(&points, "shop_http.server.response.success.count");
    assert_eq!(success.len(), 1);
    assert_eq!(success[0].attr("route"), Some("/ok"));
    assert_eq!(success[0].attr("status"), Some("200"));

    let mut errors: Vec<_> = named(&points, "shop_http.server.response.error.count")
        .iter()
        .map(|p| (p.attr("route").unwrap_or_default().to_owned(), p.value))
        .collect();
    errors.sort();
    assert_eq!(errors, vec![("/bad".to_owned(), 1), ("/boom".to_owned(), 1)]);

    let aborts = named(&points, "shop_http.server.abort.count");
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].attr("route"), Some("/boom"));
    assert_eq!(aborts[0].attr("status"), Some("500"));

    let client_errors = named(&points, "shop_http.client.request.error.count");
    assert_eq!(client_errors.len(), 1);
    assert_eq!(client_errors[0].attr("route"), Some("/bad"));
    assert_eq!(client_errors[0].attr("status"), Some("400"));

    assert_eq!(recorder.histogram_count("shop_http.server.duration"), 3);
}

fn prefixed_routes() -> Router {
    Router::new().nest(
        "/api",
        Router::new().route("/users/{id}", get(|| async { "user" })),
    )
}

#[tokio::test]
async fn route_label_is_the_matched_template_under_global_prefix() {
    let recorder = Recorder::new();
    let router = instrumented(
        &recorder,
        api_options(ApiMetricsOptions::default()),
        Arc::new(AxumAdapter::new().with_global_prefix("/api")),
        prefixed_routes(),
    )
    .await;

    assert_eq!(call(&router, "/api/users/7").await, StatusCode::OK);
    assert_eq!(call(&router, "/api/users/8").await, StatusCode::OK);
    assert_eq!(call(&router, "/api/nowhere").await, StatusCode::NOT_FOUND);

    let points = recorder.counters();
    let mut requests: Vec<_> = named(&points, "http.server.request.count")
        .iter()
        .map(|p| (p.attr("route").unwrap_or_default().to_owned(), p.value))
        .collect();
    requests.sort();
    assert_eq!(
        requests,
        vec![
            ("/api/nowhere".to_owned(), 1),
            ("/api/users/{id}".to_owned(), 2),
        ]
    );
}

#[tokio::test]
async fn undefined_routes_can_be_skipped() {
    let recorder = Recorder::new();
    let router = instrumented(
        &recorder,
        api_options(ApiMetricsOptions {
            ignore_undefined_routes: true,
            ..Default::default()
        }),
        Arc::new(AxumAdapter::new().with_global_prefix("/api")),
        prefixed_routes(),
    )
    .await;

    assert_eq!(call(&router, "/api/nowhere").await, StatusCode::NOT_FOUND);
    assert_eq!(call(&router, "/api/users/1").await, StatusCode::OK);

    let points = recorder.counters();
    assert!(points.iter().all(|p| p.attr("route") == Some("/api/users/{id}")), "{points:?}");
    assert_eq!(
        named(&points, "http.server.request.count")
            .iter()
            .map(|p| p.value)
            .sum::<u64>(),
        1
    );
}
