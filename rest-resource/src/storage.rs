//! Storage adapter contract
//!
//! A [`Storage`] implementation is the only backend-specific surface the
//! resource handler depends on. It defines an opaque `Collection` (a query
//! builder, cursor chain or in-memory sequence) that the handler threads
//! through filter, sort and pagination before materializing it, plus the
//! write operations used by the default `post`/`put`/`patch`/`delete`
//! methods.
//!
//! The trait uses RPITIT (Return Position Impl Trait In Traits) so adapters
//! can write plain `async fn` bodies.
//!
//! # Example
//!
//! ```rust,ignore
//! impl Storage for PetStorage {
//!     type Collection = PetQuery;
//!     type Resource = Pet;
//!
//!     async fn prepare_collection(&self, _request: &RestRequest) -> Result<PetQuery> {
//!         Ok(PetQuery::select_all())
//!     }
//!
//!     async fn filter(&self, query: PetQuery, filter: &Filter, predicates: &[Predicate]) -> Result<PetQuery> {
//!         predicates.iter().try_fold(query, |q, p| q.and_where(filter.attribute(), p))
//!     }
//!     // ... other required methods
//! }
//! ```

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::fields::ResourceFields;
use crate::filters::{Filter, Predicate};
use crate::request::RestRequest;
use crate::schema::Schema;
use crate::sorting::SortKey;

/// What a delete request removes
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveTarget<R> {
    /// The path-addressed resource
    Resource(R),
    /// Ids listed in the request body
    Ids(Vec<Value>),
}

/// Backend adapter for one resource type
pub trait Storage: Send + Sync + 'static {
    /// Unmaterialized set of resources
    type Collection: Send + Sync + 'static;

    /// A single materialized resource
    type Resource: Send + Sync + 'static;

    /// Resource name used when the options do not set one
    fn resource_name(&self) -> Option<String> {
        None
    }

    /// Build the base collection for a request
    ///
    /// Called for every request, including single-resource and write operations.
    fn prepare_collection(
        &self,
        request: &RestRequest,
    ) -> impl Future<Output = Result<Self::Collection>> + Send;

    /// Look up the resource addressed by `id` within the collection
    ///
    /// `Ok(None)` means no match; the handler answers 404.
    fn prepare_resource(
        &self,
        request: &RestRequest,
        collection: &Self::Collection,
        id: &str,
    ) -> impl Future<Output = Result<Option<Self::Resource>>> + Send;

    /// Narrow the collection by one filter; `predicates` are ANDed
    ///
    /// Operators the backend cannot express should fail with `Error::BadRequest`.
    fn filter(
        &self,
        collection: Self::Collection,
        filter: &Filter,
        predicates: &[Predicate],
    ) -> impl Future<Output = Result<Self::Collection>> + Send;

    /// Order the collection; `keys[0]` is the primary key
    fn sort(
        &self,
        collection: Self::Collection,
        keys: &[SortKey<'_>],
    ) -> impl Future<Output = Result<Self::Collection>> + Send;

    /// Slice the collection, returning the total size before slicing when `with_total` is set
    fn paginate(
        &self,
        request: &RestRequest,
        collection: Self::Collection,
        limit: usize,
        offset: usize,
        with_total: bool,
    ) -> impl Future<Output = Result<(Self::Collection, Option<u64>)>> + Send;

    /// Materialize the collection
    fn fetch(
        &self,
        collection: Self::Collection,
    ) -> impl Future<Output = Result<Vec<Self::Resource>>> + Send;

    /// Persist a resource; `update` is set when it replaces an existing one
    fn save(
        &self,
        request: &RestRequest,
        resource: Self::Resource,
        update: bool,
    ) -> impl Future<Output = Result<Self::Resource>> + Send;

    /// Delete resources from the collection, returning the removed ids
    fn remove(
        &self,
        request: &RestRequest,
        collection: Self::Collection,
        target: RemoveTarget<Self::Resource>,
    ) -> impl Future<Output = Result<Vec<Value>>> + Send;

    /// Schema used when the handler does not declare one
    fn default_schema(&self, _fields: &ResourceFields) -> Option<Arc<dyn Schema<Self::Resource>>> {
        None
    }
}
