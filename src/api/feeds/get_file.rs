use crate::api::APIError;
use crate::models::*;
use crate::utils::resolve_public_path;
use actix_web::body::BoxBody;
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use std::path::Path;
use tracing_batteries::prelude::*;

/// The document served when a directory itself is requested, which is how `/` is answered.
static INDEX_FILE: &str = "index.html";

#[tracing::instrument(skip(state), fields(otel.kind = "internal"))]
#[get("/{path:.*}")]
pub async fn get_file_v1(
    req: HttpRequest,
    state: web::Data<GlobalState>,
) -> Result<PublicFile, APIError> {
    read_public_file(&state.public_dir, req.match_info().query("path"))
        .await
        .inspect_err(|err| {
            // Server errors are reported where they are raised.
            if !err.is_server_error() {
                debug!("{}", err);
            }
        })
}

async fn read_public_file(public_dir: &Path, uri: &str) -> Result<PublicFile, APIError> {
    let mut path = resolve_public_path(public_dir, uri).ok_or_else(|| {
        APIError::new(
            404,
            "Not Found",
            "The feed you requested could not be found.",
        )
    })?;

    if tokio::fs::metadata(&path).await?.is_dir() {
        path.push(INDEX_FILE);
    }

    let content = tokio::fs::read(&path).await?;
    debug!("Serving {} ({} bytes)", path.display(), content.len());

    Ok(PublicFile {
        content_type: mime_guess::from_path(&path).first_or_octet_stream(),
        content,
    })
}

pub struct PublicFile {
    content_type: mime_guess::Mime,
    content: Vec<u8>,
}

impl Responder for PublicFile {
    type Body = BoxBody;

    fn respond_to(self, _req: &HttpRequest) -> HttpResponse<Self::Body> {
        HttpResponse::Ok()
            .content_type(self.content_type.to_string())
            .body(self.content)
    }
}
