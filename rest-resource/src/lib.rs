//! # rest-resource
//!
//! Declarative REST resources for axum over pluggable storage.
//!
//! A resource is a [`RestHandler`](handler::RestHandler) bound to a
//! [`Storage`](storage::Storage) adapter. Given its options it serves
//! listing, retrieval, creation, update and deletion, plus:
//!
//! - **Filtering**: `?where={"age": {"$ge": 3}}` against declared filters
//! - **Sorting**: `?sort=name,-created` against declared sort fields
//! - **Pagination**: `?limit=20&offset=40` with `x-total`, `x-limit`, `x-offset` headers
//! - **Field selection**: `?schema_only=name,age` or `?schema_exclude=owner`
//! - **Authorization** and per-client **rate limiting** hooks
//! - **Custom actions** routed under the resource path
//!
//! ## Example
//!
//! ```rust,no_run
//! use rest_resource::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let pets = MemoryStorage::new().with_name("pets");
//!
//!     let mut api = RestApi::from_config(&config);
//!     api.register(
//!         RestHandler::builder(pets).options(
//!             OptionsLayer::new()
//!                 .limit(20)
//!                 .filters(["name", "species"])
//!                 .sorting(["name"]),
//!         ),
//!     )?;
//!
//!     Server::new(config).serve_api(api).await
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod fields;
pub mod filters;
pub mod handler;
pub mod limits;
pub mod memory;
pub mod mutate;
pub mod observability;
pub mod options;
pub mod request;
pub mod schema;
pub mod server;
pub mod sorting;
pub mod storage;

pub use error::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::api::{AllowAll, Authorize, RestApi};
    pub use crate::config::{ApiConfig, Config, ServiceConfig};
    pub use crate::error::{Error, Result, ValidationErrors};
    pub use crate::fields::{FieldDef, FieldType, ResourceFields};
    pub use crate::filters::{Filter, Filters, Operator, Predicate};
    pub use crate::handler::{Context, Method, RestHandler, RestHandlerBuilder};
    pub use crate::limits::{MemoryRateLimiter, RateLimit, RateLimiter};
    pub use crate::memory::{MemoryQuery, MemoryStorage};
    pub use crate::mutate::MutationSpec;
    pub use crate::observability::{init_tracing, shutdown_tracing};
    pub use crate::options::{OptionsLayer, ResourceOptions};
    pub use crate::request::{QueryParams, RestRequest, RestResponse};
    pub use crate::schema::{FieldSelection, FieldsSchema, LoadContext, Schema, SerdeSchema};
    pub use crate::server::Server;
    pub use crate::sorting::{Sort, SortDirection, SortKey, Sorting};
    pub use crate::storage::{RemoveTarget, Storage};

    pub use axum::Router;
    pub use serde_json::{json, Value};
}
