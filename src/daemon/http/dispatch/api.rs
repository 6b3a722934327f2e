//! `/api/v1`

use crate::commons::api::{ObjectList, SubmissionRequest};
use crate::commons::error::Error;
use crate::query::{LookupMode, LookupResult, QueryResolver, RouteLookupType};
use crate::rpsl::{AsNumber, IpVersion, ObjectClass, ObjectKey, Prefix, SourceName};

use super::super::request::{PathIter, QueryParams, Request};
use super::super::response::HttpResponse;
use super::error::DispatchError;

pub async fn dispatch(request: Request<'_>, mut path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    match path.next() {
        Some("v1") => api_v1(request, path).await,
        _ => Ok(HttpResponse::not_found()),
    }
}

async fn api_v1(request: Request<'_>, mut path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    match path.next() {
        Some("admin") => super::admin::dispatch(request, path).await,
        Some("dump") => dump(request, path),
        Some("inverse") => inverse(request, path),
        Some("lookup") => lookup(request, path),
        Some("references") => references(request, path),
        Some("routes") => routes(request, path),
        Some("sets") => sets(request, path),
        Some("status") => status(request, path),
        Some("submit") => submit(request, path).await,
        Some("template") => template(request, path),
        Some("text") => text(request, path),
        _ => Ok(HttpResponse::not_found()),
    }
}

/// Checks for a GET without body and returns a resolver restricted to the
/// requested sources.
fn get_resolver(request: Request<'_>) -> Result<(QueryResolver, QueryParams), DispatchError> {
    request.check_get()?;
    let params = request.query();
    let peer = request.peer();
    let admin = request.is_admin();
    let server = request.proceed_unchecked().empty()?;

    let sources = params.sources()?;
    let resolver = server
        .irrd()
        .resolver(peer, admin)
        .with_sources(sources.as_deref())?;
    Ok((resolver, params))
}

//------------ /api/v1/status ------------------------------------------------

fn status(request: Request<'_>, path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    path.strip_trailing_slash().check_exhausted()?;
    request.check_get()?;
    let params = request.query();
    let peer = request.peer();
    let admin = request.is_admin();
    let server = request.proceed_unchecked().empty()?;

    let sources: Option<Vec<String>> = params.list("sources")?;
    Ok(HttpResponse::json(&server.irrd().status(peer, admin, sources.as_deref())?))
}

//------------ /api/v1/submit ------------------------------------------------

async fn submit(request: Request<'_>, path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    path.strip_trailing_slash().check_exhausted()?;
    request.check_post()?;
    let (server, submission) = request.proceed_unchecked().read_json::<SubmissionRequest>().await?;
    Ok(HttpResponse::json(&server.irrd().submit(submission).await?))
}

//------------ /api/v1/lookup/<key> ------------------------------------------

fn lookup(request: Request<'_>, mut path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    let key = path.rest().ok_or_else(HttpResponse::not_found)?.to_string();
    let (resolver, params) = get_resolver(request)?;

    let mode = match params.get("mode").unwrap_or("exact") {
        "exact" => LookupMode::Exact,
        "search" => LookupMode::Search(params.list::<ObjectClass>("classes")?.unwrap_or_default()),
        "expand" => LookupMode::Expand {
            recursive: params.flag("recursive"),
        },
        other => return Err(Error::invalid_request(format!("unknown lookup mode '{other}'")).into()),
    };

    match resolver.lookup(&key, mode)? {
        LookupResult::Objects(objects) => Ok(HttpResponse::json(&ObjectList { objects })),
        LookupResult::Members(members) => Ok(HttpResponse::json(&members)),
    }
}

//------------ /api/v1/sets/<name> -------------------------------------------

fn sets(request: Request<'_>, path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    let mut path = path.strip_trailing_slash();
    let name: String = path.parse_next()?;
    path.check_exhausted()?;
    let (resolver, params) = get_resolver(request)?;
    Ok(HttpResponse::json(&resolver.members_for_set(&name, params.flag("recursive"))?))
}

//------------ /api/v1/routes ------------------------------------------------

fn routes(request: Request<'_>, path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    let mut path = path.strip_trailing_slash();
    match path.next() {
        Some("origin") => {
            let origin: AsNumber = path.parse_next()?;
            path.check_exhausted()?;
            let (resolver, params) = get_resolver(request)?;
            let version = params.parse::<IpVersion>("version")?;
            Ok(HttpResponse::json(&resolver.routes_for_origin(origin, version)?))
        }
        Some("as-set") => {
            let name: String = path.parse_next()?;
            path.check_exhausted()?;
            let (resolver, params) = get_resolver(request)?;
            let version = params.parse::<IpVersion>("version")?;
            Ok(HttpResponse::json(&resolver.routes_for_as_set(&name, version)?))
        }
        Some("search") => {
            path.check_exhausted()?;
            let (resolver, params) = get_resolver(request)?;
            let prefix: Prefix = params
                .parse("prefix")?
                .ok_or_else(|| Error::invalid_request("missing query parameter 'prefix'"))?;
            let lookup = params.parse::<RouteLookupType>("type")?.unwrap_or(RouteLookupType::Exact);
            Ok(HttpResponse::json(&ObjectList {
                objects: resolver.route_search(prefix, lookup)?,
            }))
        }
        _ => Ok(HttpResponse::not_found()),
    }
}

//------------ /api/v1/inverse -----------------------------------------------

fn inverse(request: Request<'_>, path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    path.strip_trailing_slash().check_exhausted()?;
    let (resolver, params) = get_resolver(request)?;
    let attribute = params.required("attribute")?;
    let value = params.required("value")?;
    Ok(HttpResponse::json(&ObjectList {
        objects: resolver.attribute_search(attribute, value)?,
    }))
}

//------------ /api/v1/references/<class>/<pk> -------------------------------

fn references(request: Request<'_>, mut path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    let class: ObjectClass = path.parse_next()?;
    let pk = path.rest().ok_or_else(HttpResponse::not_found)?.to_string();
    let (resolver, _) = get_resolver(request)?;
    Ok(HttpResponse::json(&ObjectList {
        objects: resolver.referencing(&ObjectKey::new(class, &pk))?,
    }))
}

//------------ /api/v1/text --------------------------------------------------

fn text(request: Request<'_>, path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    path.strip_trailing_slash().check_exhausted()?;
    let (resolver, params) = get_resolver(request)?;
    let value = params.required("q")?;
    Ok(HttpResponse::json(&ObjectList {
        objects: resolver.text_search(value)?,
    }))
}

//------------ /api/v1/template/<class> --------------------------------------

fn template(request: Request<'_>, path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    let mut path = path.strip_trailing_slash();
    let class: String = path.parse_next()?;
    path.check_exhausted()?;
    let (resolver, _) = get_resolver(request)?;
    Ok(HttpResponse::text(resolver.template(&class)?))
}

//------------ /api/v1/dump/<source> -----------------------------------------

fn dump(request: Request<'_>, path: PathIter<'_>) -> Result<HttpResponse, DispatchError> {
    let mut path = path.strip_trailing_slash();
    let source: SourceName = path.parse_next()?;
    path.check_exhausted()?;
    let (resolver, _) = get_resolver(request)?;

    let objects = resolver.dump(&source)?;
    let text: Vec<String> = objects.into_iter().map(|o| o.text).collect();
    Ok(HttpResponse::text(text.join("\n")))
}
