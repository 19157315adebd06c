//! Relay of upstream audio streams with ICY metadata injection
//!
//! Every configured source is served at `GET /{source_id}`. The upstream
//! response is relayed as is, except when the client asks for metadata
//! (`Icy-Metadata: 1`) and the upstream does not provide any (no
//! `icy-metaint` header). In that case the body goes through an
//! [`IcyInjector`] and, if the source has a metadata endpoint, a
//! [`TitleRefresher`] keeps the title current for as long as the response
//! body is alive.

use std::{collections::HashMap, io, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{StreamExt, TryStreamExt};
use pmoconfig::{Config, Source, Sources};
use pmoicy::{
    DEFAULT_METAINT, DEFAULT_REFRESH_INTERVAL, IcyInjector, JsonTitleSource, TitleRefresher,
    TitleSource, TitleTemplate,
};
use tokio_util::{
    io::{ReaderStream, StreamReader},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{error::ProxyError, logs::log_request};

/// Response header announcing the metadata cadence
pub const ICY_METAINT: HeaderName = HeaderName::from_static("icy-metaint");

/// Request header by which a player asks for in-band metadata
pub const ICY_METADATA: HeaderName = HeaderName::from_static("icy-metadata");

/// Headers describing the upstream connection, not the stream
const HOP_BY_HOP: [HeaderName; 3] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    HeaderName::from_static("keep-alive"),
];

/// User agent sent upstream when none is configured
pub fn default_user_agent() -> String {
    format!("PMOIcyProxy/{}", env!("CARGO_PKG_VERSION"))
}

/// Tunables shared by all relayed sources
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Audio bytes between two metadata blocks
    pub metaint: usize,
    /// Title used until the first successful refresh
    pub initial_title: String,
    pub refresh_interval: Duration,
    /// Overall timeout of one metadata request
    pub fetch_timeout: Duration,
    /// Connect timeout for upstream and metadata requests
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            metaint: DEFAULT_METAINT,
            initial_title: String::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            fetch_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            user_agent: default_user_agent(),
        }
    }
}

impl ProxyOptions {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            metaint: config.get_icy_metaint()?,
            initial_title: config.get_icy_initial_title()?,
            refresh_interval: config.get_icy_refresh_interval()?,
            fetch_timeout: config.get_icy_fetch_timeout()?,
            connect_timeout: config.get_upstream_connect_timeout()?,
            user_agent: config
                .get_upstream_user_agent()
                .unwrap_or_else(default_user_agent),
        })
    }
}

/// A validated source, ready to be relayed
struct SourceRoute {
    id: String,
    upstream: Url,
    titles: Option<Arc<dyn TitleSource>>,
}

impl SourceRoute {
    fn from_source(
        id: &str,
        source: &Source,
        metadata_client: &reqwest::Client,
    ) -> Result<Self, ProxyError> {
        if id.is_empty() || id.contains('/') {
            return Err(ProxyError::InvalidId(id.to_string()));
        }

        let upstream = parse_url(id, "url", &source.url)?;

        let titles: Option<Arc<dyn TitleSource>> =
            match (&source.metadata_json_url, &source.metadata_format) {
                (None, None) => None,
                (Some(url), Some(format)) => {
                    let url = parse_url(id, "metadataJsonUrl", url)?;
                    let template =
                        TitleTemplate::parse(format).map_err(|source| ProxyError::InvalidTemplate {
                            id: id.to_string(),
                            source,
                        })?;
                    Some(Arc::new(JsonTitleSource::new(
                        metadata_client.clone(),
                        url,
                        template,
                    )))
                }
                (Some(_), None) => {
                    return Err(ProxyError::IncompleteMetadata {
                        id: id.to_string(),
                        present: "metadataJsonUrl",
                        missing: "metadataFormat",
                    });
                }
                (None, Some(_)) => {
                    return Err(ProxyError::IncompleteMetadata {
                        id: id.to_string(),
                        present: "metadataFormat",
                        missing: "metadataJsonUrl",
                    });
                }
            };

        Ok(Self {
            id: id.to_string(),
            upstream,
            titles,
        })
    }
}

fn parse_url(id: &str, field: &'static str, value: &str) -> Result<Url, ProxyError> {
    Url::parse(value).map_err(|source| ProxyError::InvalidUrl {
        id: id.to_string(),
        field,
        value: value.to_string(),
        source,
    })
}

#[derive(Clone)]
struct ProxyState {
    routes: Arc<HashMap<String, SourceRoute>>,
    client: reqwest::Client,
    options: Arc<ProxyOptions>,
    shutdown: CancellationToken,
}

/// Builds the relay router for `sources`
///
/// Every source is validated first; the first invalid one aborts the
/// construction. Title refreshers are bound to child tokens of `shutdown`,
/// so cancelling it stops every refresher.
pub fn build_proxy_router(
    sources: &Sources,
    options: ProxyOptions,
    shutdown: CancellationToken,
) -> Result<Router, ProxyError> {
    if options.metaint == 0 {
        return Err(ProxyError::ZeroMetaint);
    }

    // No overall timeout upstream: the body is an endless stream
    let client = reqwest::Client::builder()
        .connect_timeout(options.connect_timeout)
        .user_agent(options.user_agent.clone())
        .build()?;

    let metadata_client = reqwest::Client::builder()
        .connect_timeout(options.connect_timeout)
        .timeout(options.fetch_timeout)
        .user_agent(options.user_agent.clone())
        .build()?;

    let mut routes = HashMap::with_capacity(sources.len());
    for (id, source) in sources {
        let route = SourceRoute::from_source(id, source, &metadata_client)?;
        info!(
            source = %route.id,
            upstream = %route.upstream,
            metadata = %route.titles.as_ref().map(|t| t.describe()).unwrap_or_default(),
            "Registered source"
        );
        routes.insert(id.clone(), route);
    }

    let state = ProxyState {
        routes: Arc::new(routes),
        client,
        options: Arc::new(options),
        shutdown,
    };

    Ok(Router::new()
        .route("/{source_id}", get(relay))
        .with_state(state)
        .layer(middleware::from_fn(log_request)))
}

/// `Icy-Metadata: 1`, as sent by players
fn client_wants_icy(headers: &HeaderMap) -> bool {
    headers
        .get(&ICY_METADATA)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "1")
}

fn forwarded_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers
}

async fn relay(
    State(state): State<ProxyState>,
    Path(source_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(route) = state.routes.get(&source_id) else {
        debug!(source = %source_id, "Unknown source requested");
        return (StatusCode::NOT_FOUND, "unknown source").into_response();
    };

    let upstream = match state.client.get(route.upstream.clone()).send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(
                source = %route.id,
                upstream = %route.upstream,
                "Failed to contact upstream: {}",
                err
            );
            return (StatusCode::BAD_GATEWAY, "error contacting upstream").into_response();
        }
    };

    let inject = client_wants_icy(&headers) && !upstream.headers().contains_key(&ICY_METAINT);
    let status = upstream.status();
    let mut response_headers = forwarded_headers(upstream.headers());
    let audio = upstream.bytes_stream().map_err(io::Error::other);

    let body = if inject {
        let metaint = state.options.metaint;
        response_headers.remove(header::CONTENT_LENGTH);
        response_headers.insert(ICY_METAINT, HeaderValue::from(metaint));

        let injector = IcyInjector::with_metaint(
            StreamReader::new(Box::pin(audio)),
            metaint,
            state.options.initial_title.clone(),
        );

        let refresher = route.titles.as_ref().map(|titles| {
            TitleRefresher::new(titles.clone())
                .with_interval(state.options.refresh_interval)
                .spawn(injector.title_handle(), state.shutdown.child_token())
        });

        debug!(source = %route.id, metaint, "Injecting ICY metadata");

        // The refresher lives as long as the body stream
        Body::from_stream(ReaderStream::new(injector).map(move |chunk| {
            let _ = &refresher;
            chunk
        }))
    } else {
        debug!(source = %route.id, "Relaying upstream body unchanged");
        Body::from_stream(audio)
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}
