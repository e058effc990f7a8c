use actix_service::{forward_ready, Service, Transform};
use actix_web::{
    dev::{ServiceRequest, ServiceResponse},
    Error,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use tracing_batteries::prelude::*;

/// Opens a `tracing` span for every request handled by the server and records
/// the status code it was answered with.
#[derive(Default, Clone, Copy)]
pub struct TracingLogger;

impl<S, B> Transform<S, ServiceRequest> for TracingLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = TracingLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TracingLoggerMiddleware { service }))
    }
}

pub struct TracingLoggerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for TracingLoggerMiddleware<S>
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
        let span = tracing::info_span!(
            "request",
            otel.kind = "server",
            http.method = %req.method(),
            http.target = %req.path(),
            http.status_code = tracing::field::Empty,
        );

        let fut = {
            let _guard = span.enter();
            self.service.call(req)
        };

        Box::pin(tracing::Instrument::instrument(
            async move {
                let result = fut.await;
                match &result {
                    Ok(res) => {
                        tracing::Span::current()
                            .record("http.status_code", res.status().as_u16());
                    }
                    Err(err) => {
                        error!({ exception.message = %err }, "The request could not be handled");
                    }
                }

                result
            },
            span,
        ))
    }
}
