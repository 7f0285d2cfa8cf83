//! Filter model and the query-string encoder.
//!
//! # Design
//! The backend parses a fixed set of short query keys. Each populated
//! `Filter` field becomes exactly one pair:
//!
//! | field              | key     | value                         |
//! |--------------------|---------|-------------------------------|
//! | `match_expression` | `_q`    | compact JSON                  |
//! | `limit`            | `_l`    | decimal integer               |
//! | `skip`             | `_sk`   | decimal integer               |
//! | `sort`             | `_s`    | verbatim                      |
//! | `projection`       | `_p`    | names joined with `,`         |
//! | `raw_projection`   | `_rawp` | compact JSON                  |
//!
//! Pairs are then form-urlencoded. Verbs that accept only part of a filter
//! take `CountFilter` or `ProjectionFilter`, which convert into `Filter`.

use indexmap::IndexMap;
use serde::de::{self, Deserializer, Unexpected};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Opaque backend query, passed through as JSON in the caller's key order.
pub type MatchExpression = Map<String, Value>;

/// Field name to flag, in insertion order.
pub type RawProjection = IndexMap<String, ProjectionFlag>;

/// A raw projection entry, `0` or `1` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionFlag {
    Exclude,
    Include,
}

impl From<bool> for ProjectionFlag {
    fn from(include: bool) -> Self {
        if include {
            ProjectionFlag::Include
        } else {
            ProjectionFlag::Exclude
        }
    }
}

impl Serialize for ProjectionFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(match self {
            ProjectionFlag::Exclude => 0,
            ProjectionFlag::Include => 1,
        })
    }
}

impl<'de> Deserialize<'de> for ProjectionFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u64::deserialize(deserializer)? {
            0 => Ok(ProjectionFlag::Exclude),
            1 => Ok(ProjectionFlag::Include),
            other => Err(de::Error::invalid_value(
                Unexpected::Unsigned(other),
                &"0 or 1",
            )),
        }
    }
}

pub const QUERY_KEY: &str = "_q";
pub const LIMIT_KEY: &str = "_l";
pub const SKIP_KEY: &str = "_sk";
pub const SORT_KEY: &str = "_s";
pub const PROJECTION_KEY: &str = "_p";
pub const RAW_PROJECTION_KEY: &str = "_rawp";

/// Which items to match, and how to order, paginate, and project them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_expression: Option<MatchExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_projection: Option<RawProjection>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching(mut self, expression: MatchExpression) -> Self {
        self.match_expression = Some(expression);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Adds one `field: flag` entry to the raw projection.
    pub fn raw_project(mut self, field: impl Into<String>, include: bool) -> Self {
        self.raw_projection
            .get_or_insert_with(RawProjection::new)
            .insert(field.into(), ProjectionFlag::from(include));
        self
    }

    /// True when the match expression is absent or `{}`.
    pub fn has_empty_query(&self) -> bool {
        self.match_expression
            .as_ref()
            .map_or(true, |expression| expression.is_empty())
    }

    /// Key/value pairs in wire order, before urlencoding.
    pub fn query_pairs(&self) -> Result<Vec<(&'static str, String)>, ApiError> {
        let mut pairs = Vec::new();
        if let Some(expression) = &self.match_expression {
            pairs.push((QUERY_KEY, compact_json(expression)?));
        }
        if let Some(limit) = self.limit {
            pairs.push((LIMIT_KEY, limit.to_string()));
        }
        if let Some(skip) = self.skip {
            pairs.push((SKIP_KEY, skip.to_string()));
        }
        if let Some(sort) = &self.sort {
            pairs.push((SORT_KEY, sort.clone()));
        }
        // `[]` is dropped rather than sent as an empty `_p=`.
        if let Some(projection) = self.projection.as_ref().filter(|p| !p.is_empty()) {
            pairs.push((PROJECTION_KEY, projection.join(",")));
        }
        if let Some(raw) = &self.raw_projection {
            pairs.push((RAW_PROJECTION_KEY, compact_json(raw)?));
        }
        Ok(pairs)
    }
}

/// Filter accepted by `count`: everything except `projection`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_expression: Option<MatchExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_projection: Option<RawProjection>,
}

impl From<CountFilter> for Filter {
    fn from(filter: CountFilter) -> Self {
        Filter {
            match_expression: filter.match_expression,
            limit: filter.limit,
            skip: filter.skip,
            sort: filter.sort,
            projection: None,
            raw_projection: filter.raw_projection,
        }
    }
}

/// Filter accepted by `get`: projection only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Vec<String>>,
}

impl From<ProjectionFilter> for Filter {
    fn from(filter: ProjectionFilter) -> Self {
        Filter {
            projection: filter.projection,
            ..Filter::default()
        }
    }
}

/// Encode an optional filter as a urlencoded query string.
///
/// Returns `Ok(None)` when there is no filter or no populated field, so the
/// request carries no `?` at all.
pub fn encode_query(filter: Option<&Filter>) -> Result<Option<String>, ApiError> {
    let Some(filter) = filter else {
        return Ok(None);
    };
    let pairs = filter.query_pairs()?;
    if pairs.is_empty() {
        return Ok(None);
    }
    serde_urlencoded::to_string(&pairs)
        .map(Some)
        .map_err(|e| ApiError::encode(format!("query encoding failed: {e}")))
}

fn compact_json<T: Serialize>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string(value).map_err(|e| ApiError::encode(format!("query encoding failed: {e}")))
}
