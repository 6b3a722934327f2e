//! Root level.

use super::super::request::{PathIter, Request};
use super::super::response::HttpResponse;
use super::error::DispatchError;

//------------ / -------------------------------------------------------------

pub async fn dispatch_request(request: Request<'_>, mut path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    match path.next() {
        Some("api") => super::api::dispatch(request, path).await,
        Some("health") => health(request, path),
        _ => Ok(HttpResponse::not_found()),
    }
}

//------------ /health -------------------------------------------------------

fn health(request: Request<'_>, path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    path.check_exhausted()?;
    request.check_get()?;
    request.proceed_unchecked().empty()?;
    Ok(HttpResponse::ok())
}
