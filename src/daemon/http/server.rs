//! The HTTP server processing API requests.

use std::{convert::Infallible, net::IpAddr, sync::Arc};

use crate::commons::error::Error;
use crate::daemon::{config::Config, irrdserver::IrrdServer};

use super::dispatch::{DispatchError, dispatch_request};
use super::request::{Auth, BodyLimits, HyperRequest, Request};
use super::response::{HttpResponse, HyperResponse};

//------------ HttpServer ----------------------------------------------------

/// Gives request handlers access to the registry.
pub struct HttpServer {
    irrd: Arc<IrrdServer>,
    config: Arc<Config>,
    limits: BodyLimits,
}

impl HttpServer {
    pub fn new(irrd: Arc<IrrdServer>, config: Arc<Config>) -> Arc<Self> {
        let limits = BodyLimits::from_config(&config);
        Arc::new(HttpServer { irrd, config, limits })
    }

    pub fn irrd(&self) -> &IrrdServer {
        &self.irrd
    }

    /// Processes a single request from the given peer.
    pub async fn process_request(&self, request: HyperRequest, peer: IpAddr) -> Result<HyperResponse, Infallible> {
        let method = request.method().clone();
        let uri = request.uri().path().to_string();
        let auth = Auth::from_request(&request, self.config.admin_token.as_ref());
        let request = Request::new(request, self, peer, auth, self.limits);

        let response = match request.path() {
            Ok(path) => match dispatch_request(request, path.iter()).await {
                Ok(response) => response,
                Err(DispatchError::Response(response)) => response,
            },
            Err(err) => HttpResponse::response_from_error(Error::invalid_request(err)),
        };

        match response.cause() {
            Some(cause) if response.status().is_server_error() => {
                error!("{method} {uri} from {peer}: {} {cause}", response.status())
            }
            Some(cause) => debug!("{method} {uri} from {peer}: {} {cause}", response.status()),
            None => trace!("{method} {uri} from {peer}: {}", response.status()),
        }

        Ok(response.into_hyper())
    }
}
