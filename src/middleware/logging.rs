//! Structured start/finish log lines for every request, tagged with a
//! per-request id so the two lines can be correlated.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
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
        let request_id = Uuid::new_v4();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();

        info!(
            %request_id,
            method = %method,
            path = %path,
            remote_addr = %remote_addr,
            "Request started"
        );

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            match &result {
                Ok(response) if response.status().is_server_error() => {
                    warn!(
                        %request_id,
                        method = %method,
                        path = %path,
                        status = response.status().as_u16(),
                        duration_ms,
                        "Request completed with server error"
                    );
                }
                Ok(response) => {
                    info!(
                        %request_id,
                        method = %method,
                        path = %path,
                        status = response.status().as_u16(),
                        duration_ms,
                        "Request completed"
                    );
                }
                Err(err) => {
                    error!(
                        %request_id,
                        method = %method,
                        path = %path,
                        duration_ms,
                        error = %err,
                        "Request failed"
                    );
                }
            }

            result
        })
    }
}
