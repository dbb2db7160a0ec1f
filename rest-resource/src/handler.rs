//! Resource handler
//!
//! A [`RestHandler`] owns the resolved options of one resource and runs every
//! request through the same sequence:
//!
//! 1. the method is looked up in the handler's method table (405 if absent)
//! 2. the authorization hook runs (401 on a falsy identity)
//! 3. the rate limiter, if any, is checked (429)
//! 4. the storage prepares the base collection
//! 5. the resource addressed by the `name_id` path parameter is resolved (404 if missing)
//! 6. for `GET` requests without a resource: filter, sort, then paginate
//! 7. the method runs and pagination headers are attached
//!
//! # Example
//!
//! ```rust,ignore
//! let handler = RestHandler::builder(MemoryStorage::new().with_name("pets"))
//!     .options(OptionsLayer::new().limit(20).filters(["name", "age"]).sorting(["age"]))
//!     .action("stats", "stats", [Method::GET], |_req, ctx: Context<MemoryStorage>| async move {
//!         Ok(json!({"count": ctx.collection.len()}))
//!     })
//!     .build()?;
//! ```

use axum::http::{self, HeaderMap, HeaderValue};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use crate::api::{AllowAll, Authorize};
use crate::error::{Error, Result};
use crate::fields::ResourceFields;
use crate::limits::{client_key, RateLimiter};
use crate::options::{OptionsLayer, ResourceOptions};
use crate::request::{RestRequest, RestResponse};
use crate::schema::{FieldSelection, LoadContext, Schema};
use crate::storage::{RemoveTarget, Storage};

/// Pagination response headers
pub const TOTAL_HEADER: &str = "x-total";
pub const LIMIT_HEADER: &str = "x-limit";
pub const OFFSET_HEADER: &str = "x-offset";

/// Handler method
///
/// The five standard methods map onto the HTTP verbs of the collection and
/// item routes; `Custom` names a registered action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Custom(String),
}

impl Method {
    /// Methods served when the options do not restrict them
    pub const DEFAULTS: [Method; 5] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
    ];

    /// Map an HTTP verb; verbs without a standard method become `Custom`
    pub fn from_http(method: &http::Method) -> Self {
        method
            .as_str()
            .parse()
            .unwrap_or_else(|_| Method::Custom(method.as_str().to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Custom(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(Error::Internal(format!("Unknown resource method: {}", other))),
        }
    }
}

/// Request state handed to actions
pub struct Context<S: Storage> {
    /// Identity returned by the authorization hook
    pub auth: Value,

    /// Prepared collection; filtered, sorted and paginated for `GET` listings
    pub collection: S::Collection,

    /// Path-addressed resource
    pub resource: Option<S::Resource>,

    pub storage: Arc<S>,
    pub options: Arc<ResourceOptions>,
}

/// A custom handler method
///
/// Implemented for every `Fn(RestRequest, Context<S>) -> impl Future<Output = Result<Value>>`.
pub trait Action<S: Storage>: Send + Sync + 'static {
    fn call(&self, request: RestRequest, ctx: Context<S>) -> BoxFuture<'static, Result<Value>>;
}

impl<S, F, Fut> Action<S> for F
where
    S: Storage,
    F: Fn(RestRequest, Context<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn call(&self, request: RestRequest, ctx: Context<S>) -> BoxFuture<'static, Result<Value>> {
        Box::pin(self(request, ctx))
    }
}

/// Route of a custom action, relative to the resource's collection path
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRoute {
    pub name: String,
    pub path: String,
    pub methods: Vec<http::Method>,
}

enum Endpoint<S: Storage> {
    Builtin,
    Action(Arc<dyn Action<S>>),
}

impl<S: Storage> Clone for Endpoint<S> {
    fn clone(&self) -> Self {
        match self {
            Endpoint::Builtin => Endpoint::Builtin,
            Endpoint::Action(action) => Endpoint::Action(Arc::clone(action)),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Dispatch state machine for one resource
pub struct RestHandler<S: Storage> {
    options: Arc<ResourceOptions>,
    storage: Arc<S>,
    schema: Arc<dyn Schema<S::Resource>>,
    authorizer: Arc<dyn Authorize>,
    limiter: Option<Arc<dyn RateLimiter>>,
    endpoints: HashMap<Method, Endpoint<S>>,
    actions: Vec<ActionRoute>,
}

impl<S: Storage> fmt::Debug for RestHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestHandler")
            .field("name", &self.options.name)
            .field("methods", &self.options.methods)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

impl<S: Storage> RestHandler<S> {
    /// Start declaring a resource over `storage`
    pub fn builder(storage: S) -> RestHandlerBuilder<S> {
        RestHandlerBuilder::new(Arc::new(storage))
    }

    /// Start declaring a resource over shared storage
    pub fn builder_shared(storage: Arc<S>) -> RestHandlerBuilder<S> {
        RestHandlerBuilder::new(storage)
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &ResourceOptions {
        &self.options
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn actions(&self) -> &[ActionRoute] {
        &self.actions
    }

    /// Run one request through the pipeline
    pub async fn dispatch(&self, request: RestRequest, method: Method) -> Result<RestResponse> {
        let name = self.options.name.as_str();
        let endpoint = self.endpoint(&method, request.method())?;

        let auth = match self.authorizer.authorize(&request).await? {
            Some(identity) if is_truthy(&identity) => identity,
            _ => {
                tracing::debug!(resource = name, method = %method, "Authorization rejected");
                return Err(Error::unauthorized());
            }
        };
        tracing::debug!(resource = name, method = %method, "Authorized");

        if let Some(limiter) = &self.limiter {
            let key = client_key(name, &auth, &request);
            if !limiter.check(&key).await {
                tracing::warn!(resource = name, key = %key, "Rate limit exceeded");
                return Err(Error::TooManyRequests);
            }
        }

        let collection = self.storage.prepare_collection(&request).await?;
        tracing::debug!(resource = name, method = %method, "Collection prepared");

        let resource = match request.path_param(&self.options.name_id) {
            Some(id) => Some(
                self.storage
                    .prepare_resource(&request, &collection, id)
                    .await?
                    .ok_or_else(Error::resource_not_found)?,
            ),
            None => None,
        };
        tracing::debug!(
            resource = name,
            method = %method,
            addressed = resource.is_some(),
            "Resource resolved"
        );

        let mut headers = HeaderMap::new();
        let collection = if resource.is_some() || *request.method() != http::Method::GET {
            collection
        } else {
            self.list(&request, collection, &mut headers).await?
        };

        let ctx = Context {
            auth,
            collection,
            resource,
            storage: Arc::clone(&self.storage),
            options: Arc::clone(&self.options),
        };

        tracing::debug!(resource = name, method = %method, "Dispatching");
        let body = match endpoint {
            Endpoint::Action(action) => action.call(request, ctx).await?,
            Endpoint::Builtin => {
                let selection = FieldSelection::from_query(request.query());
                let body = match method {
                    Method::Get => self.get(ctx).await?,
                    Method::Post => self.post(&request, ctx).await?,
                    Method::Put | Method::Patch => self.put(&request, ctx).await?,
                    Method::Delete => self.delete(&request, ctx).await?,
                    Method::Custom(_) => return Err(self.not_allowed(request.method())),
                };
                selection.apply(body)
            }
        };

        let mut response = RestResponse::ok(body);
        response.headers.extend(headers);
        Ok(response)
    }

    fn endpoint(&self, method: &Method, http_method: &http::Method) -> Result<Endpoint<S>> {
        let endpoint = self
            .endpoints
            .get(method)
            .cloned()
            .ok_or_else(|| self.not_allowed(http_method))?;

        if let Method::Custom(action) = method {
            let allowed = self
                .actions
                .iter()
                .any(|route| &route.name == action && route.methods.contains(http_method));
            if !allowed {
                return Err(self.not_allowed(http_method));
            }
        }

        Ok(endpoint)
    }

    fn not_allowed(&self, http_method: &http::Method) -> Error {
        Error::MethodNotAllowed(format!(
            "Method {} is not allowed for {}",
            http_method, self.options.name
        ))
    }

    /// Filter, sort and paginate a listing
    async fn list(
        &self,
        request: &RestRequest,
        collection: S::Collection,
        headers: &mut HeaderMap,
    ) -> Result<S::Collection> {
        let name = self.options.name.as_str();
        let storage = self.storage.as_ref();

        let collection = self.options.filters.apply(storage, request, collection).await?;
        tracing::debug!(resource = name, "Collection filtered");

        let collection = self.options.sorting.apply(storage, request, collection).await?;
        tracing::debug!(resource = name, "Collection sorted");

        if !self.options.paginated() {
            return Ok(collection);
        }

        let (limit, offset) = self.options.page(request.query())?;
        let (collection, total) = storage
            .paginate(request, collection, limit, offset, self.options.limit_total)
            .await?;
        tracing::debug!(resource = name, limit, offset, ?total, "Collection paginated");

        if let Some(total) = total {
            headers.insert(TOTAL_HEADER, HeaderValue::from(total));
        }
        headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
        headers.insert(OFFSET_HEADER, HeaderValue::from(offset));

        Ok(collection)
    }

    /// Render the addressed resource or the prepared listing
    async fn get(&self, ctx: Context<S>) -> Result<Value> {
        match ctx.resource {
            Some(resource) => self.schema.dump(&resource),
            None => {
                let resources = self.storage.fetch(ctx.collection).await?;
                Ok(Value::Array(self.schema.dump_many(&resources)?))
            }
        }
    }

    /// Create resources, or update the addressed one
    ///
    /// A JSON array creates a batch. Updates load the payload partially onto
    /// the existing resource.
    async fn post(&self, request: &RestRequest, ctx: Context<S>) -> Result<Value> {
        let payload = request.json()?.unwrap_or(Value::Null);

        match (payload, ctx.resource) {
            (Value::Array(items), None) => {
                let resources = self.schema.load_many(items, false)?;
                let mut saved = Vec::with_capacity(resources.len());
                for resource in resources {
                    saved.push(self.storage.save(request, resource, false).await?);
                }
                Ok(Value::Array(self.schema.dump_many(&saved)?))
            }
            (payload, resource) => {
                let update = resource.is_some();
                let loaded = self.schema.load(
                    payload,
                    LoadContext {
                        partial: update,
                        instance: resource.as_ref(),
                    },
                )?;
                let saved = self.storage.save(request, loaded, update).await?;
                self.schema.dump(&saved)
            }
        }
    }

    async fn put(&self, request: &RestRequest, ctx: Context<S>) -> Result<Value> {
        if ctx.resource.is_none() {
            return Err(Error::not_found());
        }
        self.post(request, ctx).await
    }

    /// Remove the addressed resource, or the ids listed in the body
    async fn delete(&self, request: &RestRequest, ctx: Context<S>) -> Result<Value> {
        let Context {
            collection,
            resource,
            ..
        } = ctx;

        let (target, single) = match resource {
            Some(resource) => (RemoveTarget::Resource(resource), true),
            None => match request.json()? {
                Some(Value::Array(ids)) if !ids.is_empty() => (RemoveTarget::Ids(ids), false),
                _ => return Err(Error::not_found()),
            },
        };

        let mut removed = self.storage.remove(request, collection, target).await?;
        if removed.is_empty() {
            return Err(Error::not_found());
        }

        Ok(if single {
            removed.swap_remove(0)
        } else {
            Value::Array(removed)
        })
    }
}

/// Declares a [`RestHandler`]
pub struct RestHandlerBuilder<S: Storage> {
    storage: Arc<S>,
    fields: ResourceFields,
    layers: Vec<OptionsLayer>,
    schema: Option<Arc<dyn Schema<S::Resource>>>,
    authorizer: Option<Arc<dyn Authorize>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    overrides: Vec<(Method, Arc<dyn Action<S>>)>,
    actions: Vec<(ActionRoute, Arc<dyn Action<S>>)>,
}

impl<S: Storage> RestHandlerBuilder<S> {
    fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            fields: ResourceFields::new(),
            layers: Vec::new(),
            schema: None,
            authorizer: None,
            limiter: None,
            overrides: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Field metadata used to resolve filters, sorts and the default schema
    pub fn fields(mut self, fields: ResourceFields) -> Self {
        self.fields = fields;
        self
    }

    /// Add an options layer; later layers override earlier ones
    pub fn options(mut self, layer: OptionsLayer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn schema(mut self, schema: impl Schema<S::Resource> + 'static) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Authorization hook used when the handler is not registered on a [`RestApi`](crate::api::RestApi)
    pub fn authorizer(mut self, authorizer: impl Authorize) -> Self {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    /// Replace the limiter built from the `rate_limit` options
    pub fn rate_limiter(mut self, limiter: impl RateLimiter) -> Self {
        self.limiter = Some(Arc::new(limiter));
        self
    }

    /// Replace a standard method's body with a custom one
    pub fn method<F, Fut>(mut self, method: Method, action: F) -> Self
    where
        F: Fn(RestRequest, Context<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.overrides.push((method, Arc::new(action)));
        self
    }

    /// Add a custom action served at `<collection path>/<path>`
    ///
    /// A path may start with the `name_id` parameter (e.g. `{id}/feed`) to
    /// address a single resource.
    pub fn action<I, F, Fut>(mut self, name: &str, path: &str, methods: I, action: F) -> Self
    where
        I: IntoIterator<Item = http::Method>,
        F: Fn(RestRequest, Context<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let route = ActionRoute {
            name: name.to_string(),
            path: path.trim_matches('/').to_string(),
            methods: methods.into_iter().collect(),
        };
        self.actions.push((route, Arc::new(action)));
        self
    }

    /// Resolve the options and build the handler
    pub fn build(self) -> Result<RestHandler<S>> {
        self.build_with(&OptionsLayer::default(), &HashMap::new(), None)
    }

    /// Build with API-level defaults, per-name overrides and authorization hook
    pub(crate) fn build_with(
        self,
        defaults: &OptionsLayer,
        overrides: &HashMap<String, OptionsLayer>,
        authorizer: Option<Arc<dyn Authorize>>,
    ) -> Result<RestHandler<S>> {
        let mut merged = OptionsLayer::merge_all(std::iter::once(defaults).chain(&self.layers));

        let name = merged
            .name
            .clone()
            .or_else(|| self.storage.resource_name())
            .unwrap_or_else(default_name::<S>);
        if let Some(layer) = overrides.get(&name) {
            merged = OptionsLayer::resolve(&merged, layer);
        }
        merged.name = Some(name.clone());

        let options = ResourceOptions::build(&name, &merged, &self.fields)?;

        let schema = match self.schema {
            Some(schema) => schema,
            None => self.storage.default_schema(&self.fields).ok_or_else(|| {
                Error::Internal(format!("No schema declared for resource {}", name))
            })?,
        };

        let limiter = self.limiter.or_else(|| {
            options
                .rate_limit
                .map(|limit| Arc::new(limit.memory_limiter()) as Arc<dyn RateLimiter>)
        });

        let mut endpoints: HashMap<Method, Endpoint<S>> = options
            .methods
            .iter()
            .map(|method| (method.clone(), Endpoint::Builtin))
            .collect();
        for (method, action) in self.overrides {
            if !endpoints.contains_key(&method) {
                tracing::warn!(
                    resource = %name,
                    method = ?method,
                    "Override for undeclared method skipped"
                );
                continue;
            }
            endpoints.insert(method, Endpoint::Action(action));
        }

        let mut actions = Vec::with_capacity(self.actions.len());
        for (route, action) in self.actions {
            if route.path.is_empty() || actions.iter().any(|r: &ActionRoute| r.path == route.path) {
                return Err(Error::Internal(format!(
                    "Invalid or duplicate action path for {}: {:?}",
                    name, route.path
                )));
            }
            let item_param = format!("{{{}}}", options.name_id);
            let first = route.path.split('/').next().unwrap_or_default();
            if route.path.starts_with('{') && (first != item_param || first == route.path) {
                return Err(Error::Internal(format!(
                    "Action path {:?} must address resources through {}/<segment>",
                    route.path, item_param
                )));
            }
            endpoints.insert(Method::Custom(route.name.clone()), Endpoint::Action(action));
            actions.push(route);
        }

        tracing::debug!(
            resource = %name,
            filters = ?options.filters.names().collect::<Vec<_>>(),
            sorting = ?options.sorting.names().collect::<Vec<_>>(),
            limit = options.limit,
            "Resource registered"
        );

        Ok(RestHandler {
            options: Arc::new(options),
            storage: self.storage,
            schema,
            authorizer: authorizer
                .or(self.authorizer)
                .unwrap_or_else(|| Arc::new(AllowAll)),
            limiter,
            endpoints,
            actions,
        })
    }
}

/// Lower-cased type name of the resource, without path or generics
fn default_name<S: Storage>() -> String {
    let full = std::any::type_name::<S::Resource>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_lowercase()
}
