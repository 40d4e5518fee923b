//! Per-endpoint request and error counters.
//!
//! Endpoints are keyed by the matched route pattern ("POST /asr") so query
//! strings and unknown paths do not create unbounded metric keys.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(state) = &state {
            state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            // Routing has happened by now, so the matched pattern is known
            let (route, is_error) = match &result {
                Ok(response) => (
                    response.request().match_pattern(),
                    response.status().is_client_error() || response.status().is_server_error(),
                ),
                Err(_) => (None, true),
            };
            let endpoint = format!("{} {}", method, route.as_deref().unwrap_or("unmatched"));

            if let Some(state) = state {
                state.record_endpoint_request(&endpoint, duration_ms, is_error);
                if is_error {
                    state.increment_error_count();
                }
            }

            result
        })
    }
}
