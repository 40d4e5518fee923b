//! # Health, Readiness and Metrics Endpoints
//!
//! - `GET /` and `GET /health`: liveness. Reports the configured model and
//!   engine and whether a GPU is present. Never touches the engine handle, so
//!   it answers even while the model is still loading.
//! - `GET /ready`: 200 once the engine is loaded, 503 before that (or after a
//!   failed load, with the failure message).
//! - `GET /metrics`: request counters collected by the metrics middleware.

use crate::device::DeviceManager;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let asr = &state.config.asr;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "model": asr.model,
        "engine": asr.engine,
        "cuda_available": DeviceManager::is_cuda_available(),
        "gpu_available": DeviceManager::is_gpu_available(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.get_uptime_seconds()
    }))
}

pub async fn readiness(state: web::Data<AppState>) -> HttpResponse {
    let status = state.engine.status();
    let body = json!({
        "status": if status.is_loaded() { "ready" } else { "not_ready" },
        "engine": status,
        "timestamp": chrono::Utc::now().to_rfc3339()
    });

    if status.is_loaded() {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoints: Vec<_> = metrics.endpoint_metrics.iter().collect();
    endpoints.sort_by(|a, b| a.0.cmp(b.0));
    let endpoint_stats: Vec<_> = endpoints
        .into_iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "inference": {
            "in_flight": state.inferences_in_flight(),
            "max_concurrent": state.config.performance.max_concurrent_inferences,
            "engine": state.engine.status()
        },
        "endpoints": endpoint_stats,
        "memory": memory_info()
    }))
}

#[cfg(target_os = "linux")]
fn memory_info() -> serde_json::Value {
    let status = match std::fs::read_to_string("/proc/self/status") {
        Ok(status) => status,
        Err(_) => return json!({ "available": false }),
    };

    let read_kb = |key: &str| -> u64 {
        status
            .lines()
            .find(|line| line.starts_with(key))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .unwrap_or(0)
    };

    json!({
        "resident_memory_bytes": read_kb("VmRSS:") * 1024,
        "virtual_memory_bytes": read_kb("VmSize:") * 1024,
        "available": true
    })
}

#[cfg(not(target_os = "linux"))]
fn memory_info() -> serde_json::Value {
    json!({
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::transcription::engine::Engine;
    use crate::transcription::testing::{FakeStandard, FixedLoader};
    use actix_web::{test, App};
    use std::sync::{Arc, Mutex};

    fn state() -> AppState {
        let engine = Engine::Standard(Box::new(FakeStandard::returning("", None)));
        AppState::new(
            AppConfig::default(),
            Arc::new(FixedLoader(Mutex::new(Some(engine)))),
        )
        .unwrap()
    }

    #[actix_web::test]
    async fn test_liveness_reports_configuration() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .route("/", web::get().to(health_check)),
        )
        .await;

        let resp: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp["status"], "healthy");
        assert_eq!(resp["model"], "base");
        assert_eq!(resp["engine"], "openai_whisper");
        assert!(resp["cuda_available"].is_boolean());
    }

    #[actix_web::test]
    async fn test_readiness_follows_engine_load() {
        let state = state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ready", web::get().to(readiness)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/ready").to_request()).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);

        state.engine.acquire().await.unwrap();

        let resp = test::call_service(&app, test::TestRequest::get().uri("/ready").to_request()).await;
        assert!(resp.status().is_success());
    }
}
