#[macro_use]
mod macros;

mod error;
mod feeds;
mod health;


use actix_web::web;

use crate::normalizer::PathNormalizer;

pub use error::APIError;

/// Mounts the service's routes. Every path is normalized before it is
/// handled, and the health endpoint is matched ahead of the feed files.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("")
            .wrap(PathNormalizer)
            .configure(health::configure)
            .configure(feeds::configure),
    );
}
