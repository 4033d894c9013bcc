//! OpenAPI documentation for the upload API, served at `/openapi.json` and rendered at `/docs`.

use utoipa::OpenApi;

use crate::api;
use crate::api::models::uploads::{ErrorResponse, UploadResponse};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "imgdrop",
        description = "Profile image uploads. Accepts one image per request and returns the URL it is served from."
    ),
    paths(api::handlers::uploads::upload_image),
    components(schemas(UploadResponse, ErrorResponse)),
    tags(
        (name = "uploads", description = "Image upload")
    )
)]
pub struct ApiDoc;
