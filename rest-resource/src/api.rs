//! API: authorization hook and axum router binding
//!
//! A [`RestApi`] collects resource handlers under a common prefix. Every
//! handler gets two routes, `/{prefix}/{name}` for the collection and
//! `/{prefix}/{name}/{<name_id>}` for a single resource, plus one route per
//! custom action.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut api = RestApi::new("/api").authorize(|request: RestRequest| async move {
//!     Ok(request.header("authorization").map(|token| json!(token)))
//! });
//! api.register(RestHandler::builder(MemoryStorage::new().with_name("pets")))?;
//!
//! let app = Router::new().merge(api.into_router());
//! ```

use async_trait::async_trait;
use axum::{
    extract::{Path, Request},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handler::{Method, RestHandler, RestHandlerBuilder};
use crate::options::OptionsLayer;
use crate::request::RestRequest;
use crate::storage::Storage;

/// Default request body limit (10 MB)
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Authorization hook
///
/// Returns the caller's identity; `None` or a falsy value rejects the
/// request with `401 Unauthorized`. Implemented for async closures taking a
/// [`RestRequest`].
#[async_trait]
pub trait Authorize: Send + Sync + 'static {
    async fn authorize(&self, request: &RestRequest) -> Result<Option<Value>>;
}

/// Accepts every request
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorize for AllowAll {
    async fn authorize(&self, _request: &RestRequest) -> Result<Option<Value>> {
        Ok(Some(Value::Bool(true)))
    }
}

#[async_trait]
impl<F, Fut> Authorize for F
where
    F: Fn(RestRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>>> + Send,
{
    async fn authorize(&self, request: &RestRequest) -> Result<Option<Value>> {
        self(request.clone()).await
    }
}

/// A set of resources served under one prefix
pub struct RestApi {
    prefix: String,
    authorizer: Arc<dyn Authorize>,
    defaults: OptionsLayer,
    overrides: HashMap<String, OptionsLayer>,
    body_limit: usize,
    resources: Vec<String>,
    router: Router,
}

impl RestApi {
    /// API mounted at `prefix` (e.g. `/api`; empty for the root)
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        Self {
            prefix: if prefix.is_empty() {
                String::new()
            } else {
                format!("/{}", prefix)
            },
            authorizer: Arc::new(AllowAll),
            defaults: OptionsLayer::default(),
            overrides: HashMap::new(),
            body_limit: DEFAULT_BODY_LIMIT,
            resources: Vec::new(),
            router: Router::new(),
        }
    }

    /// API configured from the `api` and `resources` sections
    pub fn from_config(config: &Config) -> Self {
        let mut api = Self::new(&config.api.prefix);
        api.defaults = config.api.options_layer();
        api.overrides = config.resources.clone();
        api.body_limit = config.api.body_limit_bytes();
        api
    }

    /// Set the authorization hook; applies to resources registered afterwards
    pub fn authorize(mut self, authorizer: impl Authorize) -> Self {
        self.authorizer = Arc::new(authorizer);
        self
    }

    /// Options applied beneath every resource's own layers
    pub fn defaults(mut self, layer: OptionsLayer) -> Self {
        self.defaults = layer;
        self
    }

    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Names of the registered resources
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// Resolve a handler's options and mount its routes
    pub fn register<S: Storage>(
        &mut self,
        builder: RestHandlerBuilder<S>,
    ) -> Result<Arc<RestHandler<S>>> {
        let handler = Arc::new(builder.build_with(
            &self.defaults,
            &self.overrides,
            Some(Arc::clone(&self.authorizer)),
        )?);

        let name = handler.name().to_string();
        if self.resources.contains(&name) {
            return Err(Error::Internal(format!("Resource {} is already registered", name)));
        }

        let base = format!("{}/{}", self.prefix, name);
        let item = format!("{}/{{{}}}", base, handler.options().name_id);
        let limit = self.body_limit;

        let mut router = std::mem::take(&mut self.router)
            .route(&base, collection_route(Arc::clone(&handler), None, limit))
            .route(&item, item_route(Arc::clone(&handler), None, limit));

        for action in handler.actions() {
            let path = format!("{}/{}", base, action.path);
            let method = Some(action.name.clone());
            router = if action.path.contains('{') {
                router.route(&path, item_route(Arc::clone(&handler), method, limit))
            } else {
                router.route(&path, collection_route(Arc::clone(&handler), method, limit))
            };
        }

        tracing::info!(resource = %name, path = %base, "Mounted resource");
        self.router = router;
        self.resources.push(name);
        Ok(handler)
    }

    /// Router with every registered resource
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

fn collection_route<S: Storage>(
    handler: Arc<RestHandler<S>>,
    action: Option<String>,
    body_limit: usize,
) -> axum::routing::MethodRouter {
    any(move |request: Request| {
        let handler = Arc::clone(&handler);
        let action = action.clone();
        async move { serve(handler, request, HashMap::new(), action, body_limit).await }
    })
}

fn item_route<S: Storage>(
    handler: Arc<RestHandler<S>>,
    action: Option<String>,
    body_limit: usize,
) -> axum::routing::MethodRouter {
    any(
        move |Path(params): Path<HashMap<String, String>>, request: Request| {
            let handler = Arc::clone(&handler);
            let action = action.clone();
            async move { serve(handler, request, params, action, body_limit).await }
        },
    )
}

async fn serve<S: Storage>(
    handler: Arc<RestHandler<S>>,
    request: Request,
    params: HashMap<String, String>,
    action: Option<String>,
    body_limit: usize,
) -> Response {
    let (parts, body) = request.into_parts();
    let method = match action {
        Some(name) => Method::Custom(name),
        None => Method::from_http(&parts.method),
    };

    let body = match axum::body::to_bytes(body, body_limit).await {
        Ok(body) => body,
        Err(_) => return Error::bad_request("Request body is too large").into_response(),
    };

    let request =
        match RestRequest::from_parts(parts.method, parts.uri, parts.headers, params, body) {
            Ok(request) => request,
            Err(err) => return err.into_response(),
        };

    handler.dispatch(request, method).await.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(RestApi::new("/api/").prefix(), "/api");
        assert_eq!(RestApi::new("v1").prefix(), "/v1");
        assert_eq!(RestApi::new("/").prefix(), "");
    }

    #[test]
    fn test_duplicate_resource_is_rejected() {
        let mut api = RestApi::new("/api");
        api.register(RestHandler::builder(MemoryStorage::new().with_name("pets")))
            .unwrap();
        let err = api
            .register(RestHandler::builder(MemoryStorage::new().with_name("pets")))
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(api.resources(), ["pets"]);
    }

    #[test]
    fn test_config_overrides_apply_by_name() {
        let mut config = Config::default();
        config.api.limit = 10;
        config
            .resources
            .insert("pets".into(), OptionsLayer::new().limit(3).name_id("pk"));

        let mut api = RestApi::from_config(&config);
        let pets = api
            .register(
                RestHandler::builder(MemoryStorage::new().with_name("pets"))
                    .options(OptionsLayer::new().limit(5)),
            )
            .unwrap();
        let toys = api
            .register(RestHandler::builder(MemoryStorage::new().with_name("toys")))
            .unwrap();

        assert_eq!(pets.options().limit, 3);
        assert_eq!(pets.options().name_id, "pk");
        assert_eq!(toys.options().limit, 10);
    }

    #[test]
    fn test_body_limit_from_config() {
        let mut config = Config::default();
        config.api.body_limit_mb = 2;
        let api = RestApi::from_config(&config);
        assert_eq!(api.body_limit, config.api.body_limit_bytes());
        assert_eq!(api.body_limit, 2 * 1024 * 1024);
    }

    #[test]
    fn test_action_shadowing_item_route_is_rejected() {
        let mut api = RestApi::new("/api");
        let err = api
            .register(RestHandler::builder(MemoryStorage::new().with_name("pets")).action(
                "shadow",
                "{id}",
                [axum::http::Method::POST],
                |_request: RestRequest, _ctx: crate::handler::Context<MemoryStorage>| async move {
                    Ok::<_, Error>(Value::Null)
                },
            ))
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(api.resources().is_empty());
    }
}
