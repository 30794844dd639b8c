use async_trait::async_trait;
use atlas_core::{Geometry, Region, RegionStore, RegionStoreError, WEB_MERCATOR_SRID};
use sqlx::{FromRow, PgPool, types::Json};
use std::collections::BTreeMap;

/// SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Columns as read back from `region`, with geometry and tags converted to
/// text and JSON.
const SELECT_REGION: &str = r#"
    SELECT relation_id,
           name,
           ST_AsText(geometry) AS geometry,
           admin_level,
           hstore_to_jsonb(tags) AS tags
    FROM region
"#;

/// Region store implementation for postgres
#[derive(Debug, Clone)]
pub struct PgRegionStore {
    pg: PgPool,
}

impl PgRegionStore {
    /// Creates a new `PgRegionStore` instance.
    ///
    /// The `region` table must exist, see [`crate::migrations::CreateTableRegion`].
    pub fn new(pool: PgPool) -> Self {
        Self { pg: pool }
    }
}

#[derive(Debug, FromRow)]
struct RegionRow {
    relation_id: i64,
    name: Option<String>,
    geometry: Option<String>,
    admin_level: Option<i32>,
    tags: Option<Json<BTreeMap<String, String>>>,
}

impl From<RegionRow> for Region {
    fn from(row: RegionRow) -> Self {
        Region {
            relation_id: row.relation_id,
            name: row.name,
            geometry: row.geometry.map(Geometry::from_wkt),
            admin_level: row.admin_level,
            tags: row.tags.map(|Json(tags)| tags).unwrap_or_default(),
        }
    }
}

fn backend(err: sqlx::Error) -> RegionStoreError {
    RegionStoreError::Backend(Box::new(err))
}

fn tag_arrays(region: &Region) -> (Vec<&str>, Vec<&str>) {
    region
        .tags
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .unzip()
}

#[async_trait]
impl RegionStore for PgRegionStore {
    async fn insert(&self, region: &Region) -> Result<(), RegionStoreError> {
        let (keys, values) = tag_arrays(region);
        let result = sqlx::query(
            r#"
            INSERT INTO region (relation_id, name, geometry, admin_level, tags)
            VALUES ($1, $2, ST_GeomFromText($3, $4), $5, hstore($6::text[], $7::text[]))
            "#,
        )
        .bind(region.relation_id)
        .bind(region.name.as_deref())
        .bind(region.geometry.as_ref().map(Geometry::as_wkt))
        .bind(WEB_MERCATOR_SRID)
        .bind(region.admin_level)
        .bind(&keys)
        .bind(&values)
        .execute(&self.pg)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                log::debug!("Region {} already exists", region.relation_id);
                Err(RegionStoreError::DuplicateRelationId(region.relation_id))
            }
            Err(err) => Err(backend(err)),
        }
    }

    async fn upsert(&self, region: &Region) -> Result<(), RegionStoreError> {
        let (keys, values) = tag_arrays(region);
        sqlx::query(
            r#"
            INSERT INTO region (relation_id, name, geometry, admin_level, tags)
            VALUES ($1, $2, ST_GeomFromText($3, $4), $5, hstore($6::text[], $7::text[]))
            ON CONFLICT (relation_id) DO UPDATE SET
                name = EXCLUDED.name,
                geometry = EXCLUDED.geometry,
                admin_level = EXCLUDED.admin_level,
                tags = EXCLUDED.tags
            "#,
        )
        .bind(region.relation_id)
        .bind(region.name.as_deref())
        .bind(region.geometry.as_ref().map(Geometry::as_wkt))
        .bind(WEB_MERCATOR_SRID)
        .bind(region.admin_level)
        .bind(&keys)
        .bind(&values)
        .execute(&self.pg)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn fetch_by_id(&self, relation_id: i64) -> Result<Option<Region>, RegionStoreError> {
        let sql = format!("{SELECT_REGION} WHERE relation_id = $1");
        let row: Option<RegionRow> = sqlx::query_as(&sql)
            .bind(relation_id)
            .fetch_optional(&self.pg)
            .await
            .map_err(backend)?;

        Ok(row.map(Region::from))
    }

    async fn delete(&self, relation_id: i64) -> Result<bool, RegionStoreError> {
        let result = sqlx::query("DELETE FROM region WHERE relation_id = $1")
            .bind(relation_id)
            .execute(&self.pg)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_admin_level(
        &self,
        admin_level: i32,
    ) -> Result<Vec<Region>, RegionStoreError> {
        let sql = format!("{SELECT_REGION} WHERE admin_level = $1 ORDER BY relation_id");
        let rows: Vec<RegionRow> = sqlx::query_as(&sql)
            .bind(admin_level)
            .fetch_all(&self.pg)
            .await
            .map_err(backend)?;

        Ok(rows.into_iter().map(Region::from).collect())
    }

    async fn find_containing(&self, x: f64, y: f64) -> Result<Vec<Region>, RegionStoreError> {
        let sql = format!(
            "{SELECT_REGION} \
             WHERE ST_Intersects(geometry, ST_SetSRID(ST_MakePoint($1, $2), $3)) \
             ORDER BY admin_level ASC NULLS LAST, relation_id ASC"
        );
        let rows: Vec<RegionRow> = sqlx::query_as(&sql)
            .bind(x)
            .bind(y)
            .bind(WEB_MERCATOR_SRID)
            .fetch_all(&self.pg)
            .await
            .map_err(backend)?;

        Ok(rows.into_iter().map(Region::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_split_into_parallel_arrays() {
        let region = Region::new(1)
            .with_tag("name:en", "Berlin")
            .with_tag("boundary", "administrative");
        let (keys, values) = tag_arrays(&region);
        assert_eq!(keys, vec!["boundary", "name:en"]);
        assert_eq!(values, vec!["administrative", "Berlin"]);
    }

    #[test]
    fn null_columns_map_to_empty_region_fields() {
        let region = Region::from(RegionRow {
            relation_id: 7,
            name: None,
            geometry: None,
            admin_level: None,
            tags: None,
        });
        assert_eq!(region, Region::new(7));
    }
}
