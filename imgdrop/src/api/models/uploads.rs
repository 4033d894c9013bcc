use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Successful upload
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Absolute URL the stored file can be fetched from
    #[schema(example = "http://localhost:3001/users_profiles_images/3f0c1c9e8a2b4d6f9e7a5b3c1d2e4f60.jpg")]
    pub url: String,
}

/// Failed upload. Returned with status 200 unless `upload.error_status_codes` is enabled.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Invalid file type. Only JPEG, PNG, or GIF or jpg are allowed.")]
    pub error: String,
}
