//! `/api/v1/admin`
//!
//! All endpoints here require the admin bearer token.

use crate::commons::api::{ExpireJournal, LoadDump, SetSerial};
use crate::rpsl::SourceName;

use super::super::request::{PathIter, Request};
use super::super::response::HttpResponse;
use super::error::DispatchError;

pub async fn dispatch(request: Request<'_>, mut path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    request.check_admin()?;

    match path.next() {
        Some("config") => config(request, path),
        Some("sources") => sources(request, path).await,
        _ => Ok(HttpResponse::not_found()),
    }
}

//------------ /api/v1/admin/config/reload -----------------------------------

fn config(request: Request<'_>, mut path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    match path.next() {
        Some("reload") => {
            path.check_exhausted()?;
            request.check_post()?;
            let server = request.proceed_admin()?.empty()?;
            Ok(HttpResponse::json(&server.irrd().reload_config()?))
        }
        _ => Ok(HttpResponse::not_found()),
    }
}

//------------ /api/v1/admin/sources/<source>/... ----------------------------

async fn sources(request: Request<'_>, mut path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    let source: SourceName = path.parse_next()?;
    let action = path.next();
    path.check_exhausted()?;
    request.check_post()?;
    let request = request.proceed_admin()?;

    match action {
        Some("reload") => {
            let server = request.empty()?;
            Ok(HttpResponse::json(&server.irrd().force_reload(&source).await?))
        }
        Some("load") => {
            let (server, dump) = request.read_json::<LoadDump>().await?;
            Ok(HttpResponse::json(&server.irrd().load_dump(&source, dump).await?))
        }
        Some("expire") => {
            let (server, expire) = request.read_json::<ExpireJournal>().await?;
            Ok(HttpResponse::json(&server.irrd().expire_journal(&source, expire).await?))
        }
        Some("serial") => {
            let (server, serial) = request.read_json::<SetSerial>().await?;
            Ok(HttpResponse::json(&server.irrd().set_serial(&source, serial).await?))
        }
        _ => Ok(HttpResponse::not_found()),
    }
}
