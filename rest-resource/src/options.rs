//! Resource options
//!
//! Options are declared as [`OptionsLayer`]s: every field is optional and a
//! later layer overrides an earlier one field by field. The layers of one
//! resource are merged exactly once, at registration, into an immutable
//! [`ResourceOptions`].
//!
//! ```rust
//! use rest_resource::options::OptionsLayer;
//!
//! let base = OptionsLayer::new().limit(20).filters(["name"]);
//! let pets = OptionsLayer::new().name("pets").limit(50);
//!
//! let merged = OptionsLayer::resolve(&base, &pets);
//! assert_eq!(merged.limit, Some(50));
//! assert_eq!(merged.filters.as_ref().map(Vec::len), Some(1));
//! ```

use serde::{Deserialize, Serialize};
use std::num::IntErrorKind;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::fields::ResourceFields;
use crate::filters::Filters;
use crate::handler::Method;
use crate::limits::RateLimit;
use crate::mutate::MutationSpec;
use crate::request::QueryParams;
use crate::sorting::Sorting;

/// Query parameter carrying the page size
pub const LIMIT_PARAM: &str = "limit";

/// Query parameter carrying the page start
pub const OFFSET_PARAM: &str = "offset";

/// Default rate limit period in seconds
pub const DEFAULT_RATE_LIMIT_PERIOD: u64 = 60;

/// One layer of resource options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsLayer {
    /// URL segment and resource key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Path parameter holding the resource id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_id: Option<String>,

    /// Default page size (0 disables pagination)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Largest page size a client may request (0 means `limit`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_max: Option<usize>,

    /// Whether paginated listings report `x-total`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_total: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<MutationSpec>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sorting: Option<Vec<MutationSpec>>,

    /// HTTP methods served on the collection and item routes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,

    /// Requests per period and client (0 disables rate limiting)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,

    /// Rate limit period in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_period: Option<u64>,
}

impl OptionsLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name_id(mut self, name_id: impl Into<String>) -> Self {
        self.name_id = Some(name_id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn limit_max(mut self, limit_max: usize) -> Self {
        self.limit_max = Some(limit_max);
        self
    }

    pub fn limit_total(mut self, limit_total: bool) -> Self {
        self.limit_total = Some(limit_total);
        self
    }

    pub fn filters<I, P>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<MutationSpec>,
    {
        self.filters = Some(filters.into_iter().map(Into::into).collect());
        self
    }

    pub fn sorting<I, P>(mut self, sorting: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<MutationSpec>,
    {
        self.sorting = Some(sorting.into_iter().map(Into::into).collect());
        self
    }

    pub fn methods<I, M>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        self.methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    pub fn rate_limit(mut self, limit: u32, period_secs: u64) -> Self {
        self.rate_limit = Some(limit);
        self.rate_limit_period = Some(period_secs);
        self
    }

    /// Merge two layers; fields set in `child` win
    pub fn resolve(parent: &OptionsLayer, child: &OptionsLayer) -> OptionsLayer {
        fn pick<T: Clone>(parent: &Option<T>, child: &Option<T>) -> Option<T> {
            child.clone().or_else(|| parent.clone())
        }

        OptionsLayer {
            name: pick(&parent.name, &child.name),
            name_id: pick(&parent.name_id, &child.name_id),
            limit: pick(&parent.limit, &child.limit),
            limit_max: pick(&parent.limit_max, &child.limit_max),
            limit_total: pick(&parent.limit_total, &child.limit_total),
            filters: pick(&parent.filters, &child.filters),
            sorting: pick(&parent.sorting, &child.sorting),
            methods: pick(&parent.methods, &child.methods),
            rate_limit: pick(&parent.rate_limit, &child.rate_limit),
            rate_limit_period: pick(&parent.rate_limit_period, &child.rate_limit_period),
        }
    }

    /// Fold layers, most-base first
    pub fn merge_all<'a, I>(layers: I) -> OptionsLayer
    where
        I: IntoIterator<Item = &'a OptionsLayer>,
    {
        layers
            .into_iter()
            .fold(OptionsLayer::default(), |merged, layer| {
                OptionsLayer::resolve(&merged, layer)
            })
    }
}

/// Resolved, read-only options of one resource
#[derive(Debug, Clone)]
pub struct ResourceOptions {
    pub name: String,
    pub name_id: String,
    pub limit: usize,
    pub limit_max: usize,
    pub limit_total: bool,
    pub filters: Filters,
    pub sorting: Sorting,
    pub methods: Vec<Method>,
    pub rate_limit: Option<RateLimit>,
}

impl ResourceOptions {
    /// Build from a merged layer
    ///
    /// `name` is used when the layer does not set one. Filter and sort names
    /// are resolved against `fields`.
    pub fn build(name: &str, layer: &OptionsLayer, fields: &ResourceFields) -> Result<Self> {
        let limit = layer.limit.unwrap_or(0);
        let limit_max = match layer.limit_max.unwrap_or(0) {
            0 => limit,
            max => max,
        };

        let methods = match &layer.methods {
            Some(methods) => methods
                .iter()
                .map(|m| m.parse::<Method>())
                .collect::<Result<Vec<_>>>()?,
            None => Method::DEFAULTS.to_vec(),
        };

        let rate_limit = match layer.rate_limit {
            Some(0) | None => None,
            Some(limit) => Some(RateLimit::new(
                limit,
                Duration::from_secs(
                    layer
                        .rate_limit_period
                        .unwrap_or(DEFAULT_RATE_LIMIT_PERIOD),
                ),
            )),
        };

        let name = layer.name.clone().unwrap_or_else(|| name.to_string());
        if name.is_empty() || name.contains('/') {
            return Err(Error::Internal(format!("Invalid resource name: {:?}", name)));
        }

        Ok(Self {
            name,
            name_id: layer.name_id.clone().unwrap_or_else(|| "id".to_string()),
            limit,
            limit_max,
            limit_total: layer.limit_total.unwrap_or(true),
            filters: Filters::build(layer.filters.iter().flatten().cloned(), fields),
            sorting: Sorting::build(layer.sorting.iter().flatten().cloned(), fields),
            methods,
            rate_limit,
        })
    }

    /// Whether listings are paginated
    pub fn paginated(&self) -> bool {
        self.limit > 0
    }

    /// Page size and start requested by the query string
    ///
    /// The limit is clamped to `[1, limit_max]`; a non-numeric value or a
    /// negative offset is a bad request.
    pub fn page(&self, query: &QueryParams) -> Result<(usize, usize)> {
        let invalid = || Error::bad_request("Pagination params are invalid");

        let limit = match query.get(LIMIT_PARAM).map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => parse_saturating(raw).ok_or_else(invalid)?,
            None => self.limit as i64,
        };
        let limit = limit.clamp(1, self.limit_max.max(1) as i64) as usize;

        let offset = match query.get(OFFSET_PARAM).map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => parse_saturating(raw).ok_or_else(invalid)?,
            None => 0,
        };
        let offset = usize::try_from(offset).map_err(|_| invalid())?;

        Ok((limit, offset))
    }
}

/// Parse an integer, saturating values too large for `i64`
fn parse_saturating(raw: &str) -> Option<i64> {
    match raw.parse::<i64>() {
        Ok(value) => Some(value),
        Err(err) => match err.kind() {
            IntErrorKind::PosOverflow => Some(i64::MAX),
            IntErrorKind::NegOverflow => Some(i64::MIN),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(layer: OptionsLayer) -> ResourceOptions {
        ResourceOptions::build("pet", &layer, &ResourceFields::new()).unwrap()
    }

    fn query(pairs: &[(&str, &str)]) -> QueryParams {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_defaults() {
        let opts = options(OptionsLayer::new());
        assert_eq!(opts.name, "pet");
        assert_eq!(opts.name_id, "id");
        assert!(!opts.paginated());
        assert!(opts.limit_total);
        assert_eq!(opts.methods, Method::DEFAULTS.to_vec());
        assert!(opts.rate_limit.is_none());
    }

    #[test]
    fn test_limit_max_defaults_to_limit() {
        let opts = options(OptionsLayer::new().limit(10));
        assert_eq!(opts.limit_max, 10);
        let opts = options(OptionsLayer::new().limit(10).limit_max(100));
        assert_eq!(opts.limit_max, 100);
    }

    #[test]
    fn test_later_layers_win() {
        let merged = OptionsLayer::merge_all(&[
            OptionsLayer::new().limit(10).filters(["name"]),
            OptionsLayer::new().limit(20),
            OptionsLayer::new().filters(["age", "kind"]),
        ]);
        assert_eq!(merged.limit, Some(20));
        assert_eq!(merged.filters.unwrap().len(), 2);
    }

    #[test]
    fn test_page_clamps_limit() {
        let opts = options(OptionsLayer::new().limit(10).limit_max(50));
        assert_eq!(opts.page(&query(&[])).unwrap(), (10, 0));
        assert_eq!(opts.page(&query(&[("limit", "500")])).unwrap(), (50, 0));
        assert_eq!(opts.page(&query(&[("limit", "0")])).unwrap(), (1, 0));
        assert_eq!(opts.page(&query(&[("limit", "")])).unwrap(), (10, 0));
        assert_eq!(
            opts.page(&query(&[("limit", "99999999999999999999")])).unwrap(),
            (50, 0)
        );
        assert_eq!(
            opts.page(&query(&[("limit", "-99999999999999999999")])).unwrap(),
            (1, 0)
        );
        assert_eq!(
            opts.page(&query(&[("limit", "5"), ("offset", "15")])).unwrap(),
            (5, 15)
        );
    }

    #[test]
    fn test_page_rejects_bad_values() {
        let opts = options(OptionsLayer::new().limit(10));
        assert!(opts.page(&query(&[("limit", "ten")])).is_err());
        assert!(opts.page(&query(&[("offset", "-1")])).is_err());
        assert!(opts.page(&query(&[("offset", "1.5")])).is_err());
        assert!(opts.page(&query(&[("limit", "99999999999999999999x")])).is_err());
        assert!(opts.page(&query(&[("offset", "-99999999999999999999")])).is_err());
    }

    #[test]
    fn test_methods_and_rate_limit() {
        let opts = options(OptionsLayer::new().methods(["get", "DELETE"]).rate_limit(5, 1));
        assert_eq!(opts.methods, vec![Method::Get, Method::Delete]);
        assert_eq!(
            opts.rate_limit,
            Some(RateLimit::new(5, Duration::from_secs(1)))
        );

        let err = ResourceOptions::build(
            "pet",
            &OptionsLayer::new().methods(["FETCH"]),
            &ResourceFields::new(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_layer_deserializes_from_config_values() {
        let layer: OptionsLayer = serde_json::from_value(json!({
            "limit": 25,
            "sorting": ["name", ["created", {"default": "desc"}]],
        }))
        .unwrap();
        let opts = options(layer);
        assert_eq!(opts.limit, 25);
        assert_eq!(opts.sorting.defaults().len(), 1);
    }
}
