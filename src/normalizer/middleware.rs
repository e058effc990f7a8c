use actix_service::{forward_ready, Service, Transform};
use actix_web::{
    body::EitherBody,
    dev::{ServiceRequest, ServiceResponse},
    http::header::LOCATION,
    Error, HttpResponse,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use tracing_batteries::prelude::*;

use super::decide;

/// Middleware which applies [`decide`] to every request it sees, answering
/// with a `301 Moved Permanently` where the path needs to change and passing
/// the request through untouched otherwise.
#[derive(Default, Clone, Copy)]
pub struct PathNormalizer;

impl<S, B> Transform<S, ServiceRequest> for PathNormalizer
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = PathNormalizerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PathNormalizerMiddleware { service }))
    }
}

pub struct PathNormalizerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for PathNormalizerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let Some(target) = decide(req.path()).location(req.query_string()) else {
            let fut = self.service.call(req);
            return Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) });
        };

        let location = {
            let info = req.connection_info();
            format!("{}://{}{}", info.scheme(), info.host(), target)
        };

        debug!("Redirecting {} to {}", req.path(), location);

        let response = HttpResponse::MovedPermanently()
            .insert_header((LOCATION, location))
            .finish();

        Box::pin(ready(Ok(req.into_response(response).map_into_right_body())))
    }
}
