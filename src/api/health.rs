use crate::models::*;
use actix_web::{get, web};
use tracing_batteries::prelude::*;

#[tracing::instrument(skip(state), fields(otel.kind = "internal"))]
#[get("/health.json")]
pub async fn get_health_v1(state: web::Data<GlobalState>) -> HealthV1 {
    state.health().await.into()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(get_health_v1);
}
