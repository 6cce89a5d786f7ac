//! CORS layer from the `[cors]` config section

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::config::CorsConfig;

/// Build the CORS layer.
///
/// A `"*"` origin combined with credentials mirrors the request origin,
/// since browsers reject a literal wildcard on credentialed responses.
/// The same applies to a `"*"` header list.
pub fn build_cors_layer(config: &CorsConfig) -> common::Result<CorsLayer> {
    let wildcard_origin = config.allowed_origins.iter().any(|o| o == "*");
    let origin = match (wildcard_origin, config.allow_credentials) {
        (true, true) => AllowOrigin::mirror_request(),
        (true, false) => AllowOrigin::any(),
        (false, _) => {
            let origins = config
                .allowed_origins
                .iter()
                .map(|o| {
                    HeaderValue::from_str(o).map_err(|e| {
                        common::Error::Config(format!("invalid CORS origin '{o}': {e}"))
                    })
                })
                .collect::<common::Result<Vec<_>>>()?;
            AllowOrigin::list(origins)
        }
    };

    let methods = config
        .allowed_methods
        .iter()
        .map(|m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|e| common::Error::Config(format!("invalid CORS method '{m}': {e}")))
        })
        .collect::<common::Result<Vec<_>>>()?;

    let headers = if config.allowed_headers.iter().any(|h| h == "*") {
        if config.allow_credentials {
            AllowHeaders::mirror_request()
        } else {
            AllowHeaders::any()
        }
    } else {
        let names = config
            .allowed_headers
            .iter()
            .map(|h| {
                HeaderName::from_bytes(h.as_bytes())
                    .map_err(|e| common::Error::Config(format!("invalid CORS header '{h}': {e}")))
            })
            .collect::<common::Result<Vec<_>>>()?;
        AllowHeaders::list(names)
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(headers)
        .allow_credentials(config.allow_credentials)
        .max_age(Duration::from_secs(config.max_age_secs)))
}
