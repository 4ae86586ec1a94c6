//! Search query parameters.
//!
//! A [`QueryBuilder`] collects parameters and validates the typed helpers at
//! [`QueryBuilder::build`]; the resulting [`Query`] is immutable.

use crate::config::MAX_PAGE_SIZE;
use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Granule search endpoint returning UMM JSON
pub const GRANULES_ENDPOINT: &str = "granules.umm_json";

/// Collection search endpoint returning UMM JSON
pub const COLLECTIONS_ENDPOINT: &str = "collections.umm_json";

/// Keyword facet (autocomplete) endpoint
pub const AUTOCOMPLETE_ENDPOINT: &str = "autocomplete";

/// Query parameter carrying the page size
pub const PAGE_SIZE_PARAM: &str = "page_size";

/// Granule sort order used unless the query sets its own
pub const DEFAULT_GRANULE_SORT: &str = "-start_date";

/// Accepted `day_night_flag` values
const DAY_NIGHT_FLAGS: [&str; 4] = ["day", "night", "both", "unspecified"];

/// An immutable set of search parameters for one endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    endpoint: String,
    params: Vec<(String, String)>,
    page_size: Option<usize>,
}

impl Query {
    /// Start a query against an arbitrary endpoint path (relative to the base URL)
    pub fn builder(endpoint: impl Into<String>) -> QueryBuilder {
        QueryBuilder {
            endpoint: endpoint.into(),
            params: Vec::new(),
            page_size: None,
            error: None,
        }
    }

    /// Start a granule query, newest first
    pub fn granules() -> QueryBuilder {
        Self::builder(GRANULES_ENDPOINT).sort_key(DEFAULT_GRANULE_SORT)
    }

    /// Start a collection query
    pub fn collections() -> QueryBuilder {
        Self::builder(COLLECTIONS_ENDPOINT)
    }

    /// Start a keyword facet query matching `text`
    ///
    /// Results come back in the `feed.entry` shape; narrow them with
    /// [`QueryBuilder::facet_types`].
    pub fn facets(text: impl Into<String>) -> QueryBuilder {
        Self::builder(AUTOCOMPLETE_ENDPOINT).set("q", text)
    }

    /// Endpoint path
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Parameters in insertion order
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// First value of `key`, if present
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Page size hint, if one was set on the query
    pub fn page_size(&self) -> Option<usize> {
        self.page_size
    }

    /// Request URL under `base`, using `default_page_size` unless the query set one
    pub fn url(&self, base: &Url, default_page_size: usize) -> Result<Url> {
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| Error::Config {
                message: format!("search url {} cannot be a base", base),
                key: Some("search.base_url".to_string()),
            })?;
            segments
                .pop_if_empty()
                .extend(self.endpoint.split('/').filter(|s| !s.is_empty()));
        }
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair(
                PAGE_SIZE_PARAM,
                &self.page_size.unwrap_or(default_page_size).to_string(),
            );
        }
        Ok(url)
    }
}

/// Builder for [`Query`]
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    endpoint: String,
    params: Vec<(String, String)>,
    page_size: Option<usize>,
    error: Option<String>,
}

impl QueryBuilder {
    /// Append a parameter; repeated keys are kept in order
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if key == PAGE_SIZE_PARAM {
            self.fail(format!("use page_size() instead of a raw {} parameter", key));
            return self;
        }
        self.params.push((key, value.into()));
        self
    }

    /// Replace every value of `key` with a single value
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.params.retain(|(k, _)| *k != key);
        self.param(key, value)
    }

    /// Records per page, between 1 and [`MAX_PAGE_SIZE`]
    pub fn page_size(mut self, size: usize) -> Self {
        if size == 0 || size > MAX_PAGE_SIZE {
            self.fail(format!(
                "page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, size
            ));
        }
        self.page_size = Some(size);
        self
    }

    /// Case-insensitive short name patterns
    pub fn short_names<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns("short_name", names)
    }

    /// Collection concept ids
    pub fn concept_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repeated("collection_concept_id", ids)
    }

    /// Granule file names
    pub fn readable_granule_names<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repeated("readable_granule_name", names)
    }

    /// Provider-assigned granule ids
    pub fn native_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repeated("native_id", ids)
    }

    /// Collection versions
    pub fn versions<I, S>(self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repeated("version", versions)
    }

    /// Day/night flag: one of `day`, `night`, `both` or `unspecified`
    pub fn day_night_flag(mut self, flag: &str) -> Self {
        let flag = flag.trim().to_ascii_lowercase();
        if !DAY_NIGHT_FLAGS.contains(&flag.as_str()) {
            self.fail(format!(
                "day/night flag must be one of {}, got {:?}",
                DAY_NIGHT_FLAGS.join(", "),
                flag
            ));
            return self;
        }
        self.set("day_night_flag", flag)
    }

    /// Provider short names, matched case-insensitively
    pub fn providers<I, S>(self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set("options[provider_short_name][ignore_case]", "true")
            .repeated("provider_short_name", providers)
    }

    /// Free-text keyword search
    pub fn keyword(self, keyword: impl Into<String>) -> Self {
        self.set("keyword", keyword)
    }

    /// Case-insensitive platform patterns
    pub fn platforms<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns("platform", names)
    }

    /// Case-insensitive instrument patterns
    pub fn instruments<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns("instrument", names)
    }

    /// Case-insensitive entry title pattern
    pub fn title_pattern(self, pattern: impl Into<String>) -> Self {
        self.set("options[entry_title][pattern]", "true")
            .set("options[entry_title][ignore_case]", "true")
            .set("entry_title", pattern)
    }

    /// Only records updated at or after `since`
    pub fn updated_since(self, since: DateTime<Utc>) -> Self {
        self.set("updated_since", rfc3339(since))
    }

    /// Only collections that had granules added or revised in the range
    pub fn granules_added(self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        self.time_range("has_granules_revised_at", start, end)
    }

    /// Only cloud-hosted (or only on-premises) collections
    pub fn cloud_hosted(self, cloud_hosted: bool) -> Self {
        self.set("cloud_hosted", cloud_hosted.to_string())
    }

    /// Only standard (or only non-standard) products
    pub fn standard_product(self, standard: bool) -> Self {
        self.set("standard_product", standard.to_string())
    }

    /// Only collections with (or without) granules
    pub fn has_granules(self, has_granules: bool) -> Self {
        self.set("has_granules", has_granules.to_string())
    }

    /// Facet types to return, e.g. `platform` or `instrument`
    pub fn facet_types<I, S>(self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repeated("type[]", types)
    }

    /// Temporal range; an open end means "until now"
    pub fn temporal(self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        self.time_range("temporal", start, end)
    }

    /// `west,south,east,north`
    pub fn bounding_box(self, values: &[f64]) -> Self {
        self.spatial("bounding_box", values, |n| n == 4, "bounding box needs 4 values")
    }

    /// `lon,lat`
    pub fn point(self, values: &[f64]) -> Self {
        self.spatial("point", values, |n| n == 2, "point needs 2 values")
    }

    /// `lon,lat,radius`
    pub fn circle(self, values: &[f64]) -> Self {
        self.spatial("circle", values, |n| n == 3, "circle needs 3 values")
    }

    /// Closed polygon as `lon1,lat1,...,lonN,latN`
    pub fn polygon(self, values: &[f64]) -> Self {
        self.spatial(
            "polygon",
            values,
            |n| n % 2 == 0 && n >= 8,
            "polygon needs an even number of values and at least 4 points",
        )
    }

    /// Sort key, e.g. `-start_date`
    pub fn sort_key(self, key: impl Into<String>) -> Self {
        self.set("sort_key", key)
    }

    /// Finish the query, reporting the first invalid helper input
    pub fn build(self) -> Result<Query> {
        if let Some(message) = self.error {
            return Err(Error::InvalidQuery(message));
        }
        if self.endpoint.trim_matches('/').is_empty() {
            return Err(Error::InvalidQuery("endpoint is empty".to_string()));
        }
        Ok(Query {
            endpoint: self.endpoint,
            params: self.params,
            page_size: self.page_size,
        })
    }

    fn repeated<I, S>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self = self.param(key, value);
        }
        self
    }

    fn patterns<I, S>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(format!("options[{}][pattern]", key), "true")
            .set(format!("options[{}][ignore_case]", key), "true")
            .repeated(key, values)
    }

    fn time_range(
        mut self,
        key: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        if let Some(end) = end
            && end < start
        {
            self.fail(format!("{} end {} is before start {}", key, end, start));
            return self;
        }
        let mut value = format!("{},", rfc3339(start));
        if let Some(end) = end {
            value.push_str(&rfc3339(end));
        }
        self.set(key, value)
    }

    fn spatial(
        mut self,
        key: &str,
        values: &[f64],
        valid_len: impl Fn(usize) -> bool,
        message: &str,
    ) -> Self {
        if !valid_len(values.len()) {
            self.fail(format!("{}, got {}", message, values.len()));
            return self;
        }
        if values.iter().any(|v| !v.is_finite()) {
            self.fail(format!("{} values must be finite", key));
            return self;
        }
        let joined = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.set(key, joined)
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}
