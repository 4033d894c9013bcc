//! Building the public URL returned for a stored file.
//!
//! A configured `upload.public_base_url` always wins. Without one the request's `Host` header is
//! echoed back, which is client controlled; it is only accepted if it parses as a plain
//! `host[:port]` authority.

use crate::config::UploadConfig;
use crate::errors::{Error, Result};
use axum::http::{HeaderMap, Uri, header, uri::Authority};
use url::Url;

/// Base URL for links handed out in response to this request.
pub fn resolve_base_url(config: &UploadConfig, headers: &HeaderMap, uri: &Uri) -> Result<Url> {
    if let Some(base) = &config.public_base_url {
        return Ok(base.clone());
    }

    // The URI authority only stands in for a missing Host header
    let authority = match headers.get(header::HOST) {
        Some(value) => value.to_str().ok().and_then(|host| host.parse::<Authority>().ok()),
        None => uri.authority().cloned(),
    };
    let authority = authority
        .filter(|authority| !authority.as_str().contains('@'))
        .ok_or_else(|| Error::UploadFailed {
            reason: "no public_base_url configured and the request carried no usable Host header".to_string(),
        })?;

    Url::parse(&format!("{}://{}/", config.host_scheme, authority)).map_err(|e| Error::UploadFailed {
        reason: format!("invalid Host header {authority:?}: {e}"),
    })
}

/// `<base>/<public_path>/<file_name>`, with each segment percent-encoded as needed.
pub fn file_url(base: &Url, public_path: &str, file_name: &str) -> Result<Url> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);

    url.path_segments_mut()
        .map_err(|_| Error::UploadFailed {
            reason: format!("public base URL {base} cannot carry a path"),
        })?
        .pop_if_empty()
        .extend(public_path.split('/').filter(|segment| !segment.is_empty()))
        .push(file_name);

    Ok(url)
}
