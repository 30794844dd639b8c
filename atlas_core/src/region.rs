//! Region model and storage contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Spatial reference system used for every stored geometry (Web Mercator).
pub const WEB_MERCATOR_SRID: i32 = 3857;

/// A geometry in well-known text, expressed in [`WEB_MERCATOR_SRID`].
///
/// The text is passed through to the database as-is; no validation happens here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Geometry(String);

impl Geometry {
    /// Wraps a WKT string.
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self(wkt.into())
    }

    /// The WKT text.
    pub fn as_wkt(&self) -> &str {
        &self.0
    }

    /// Spatial reference identifier of this geometry.
    pub fn srid(&self) -> i32 {
        WEB_MERCATOR_SRID
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SRID={};{}", self.srid(), self.0)
    }
}

/// An administrative or geographic area.
///
/// `relation_id` is supplied by the caller and is never generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Caller supplied identifier, unique across all regions.
    pub relation_id: i64,
    /// Display name.
    pub name: Option<String>,
    /// Outline of the area.
    pub geometry: Option<Geometry>,
    /// Hierarchical administrative tier.
    pub admin_level: Option<i32>,
    /// Free-form attributes.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Region {
    /// A region with only its identifier set.
    pub fn new(relation_id: i64) -> Self {
        Self {
            relation_id,
            name: None,
            geometry: None,
            admin_level: None,
            tags: BTreeMap::new(),
        }
    }

    /// Sets the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the geometry.
    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Sets the administrative level.
    pub fn with_admin_level(mut self, admin_level: i32) -> Self {
        self.admin_level = Some(admin_level);
        self
    }

    /// Adds or replaces a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Errors returned by a [`RegionStore`].
#[derive(Debug, thiserror::Error)]
pub enum RegionStoreError {
    /// A region with this `relation_id` already exists.
    #[error("Region {0} already exists")]
    DuplicateRelationId(i64),

    /// The storage backend failed.
    #[error("Region store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Persistence for [`Region`] rows.
#[async_trait]
pub trait RegionStore: Send + Sync {
    /// Inserts a new region, failing with
    /// [`RegionStoreError::DuplicateRelationId`] if the id is taken.
    async fn insert(&self, region: &Region) -> Result<(), RegionStoreError>;

    /// Inserts or replaces a region.
    async fn upsert(&self, region: &Region) -> Result<(), RegionStoreError>;

    /// Finds a region by its id.
    async fn fetch_by_id(&self, relation_id: i64) -> Result<Option<Region>, RegionStoreError>;

    /// Deletes a region. Returns whether a row was removed.
    async fn delete(&self, relation_id: i64) -> Result<bool, RegionStoreError>;

    /// All regions on an administrative level, ordered by id.
    async fn find_by_admin_level(&self, admin_level: i32)
    -> Result<Vec<Region>, RegionStoreError>;

    /// Regions whose geometry contains the point `(x, y)`, given in
    /// Web Mercator metres. Ordered from the broadest administrative level.
    async fn find_containing(&self, x: f64, y: f64) -> Result<Vec<Region>, RegionStoreError>;
}
