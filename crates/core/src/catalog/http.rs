//! Response status handling shared by the HTTP catalog clients.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use tracing::warn;

use super::CatalogError;

/// Map a non-success response to a [`CatalogError`].
///
/// `what` names the resource for not-found errors.
pub(crate) async fn check_status(
    provider: &str,
    response: Response,
    what: &str,
) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parse_retry_after(&response);
        warn!(
            "{} rate limit exceeded (retry after {:?})",
            provider, retry_after
        );
        return Err(CatalogError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, what, body))
}

fn error_for_status(status: StatusCode, what: &str, body: String) -> CatalogError {
    match status {
        StatusCode::UNAUTHORIZED => CatalogError::Unauthorized(body),
        StatusCode::FORBIDDEN => CatalogError::Forbidden(format!("{}: {}", what, body)),
        StatusCode::NOT_FOUND => CatalogError::NotFound(what.to_string()),
        s if s.is_server_error() => CatalogError::Server {
            status: s.as_u16(),
            message: body,
        },
        s => CatalogError::Api {
            status: s.as_u16(),
            message: body,
        },
    }
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
