//! Permit table access: upsert-by-fingerprint, filtered listing, stats.

use sqlx::QueryBuilder;

use crate::models::{ParsedAddress, Permit, Platform, Provenance};

use super::{parse_datetime, Store, StoreResult};

/// Hard cap on page size for listings.
const MAX_LIMIT: i64 = 1000;
const DEFAULT_LIMIT: i64 = 100;

#[derive(sqlx::FromRow)]
struct PermitRow {
    id: String,
    source_id: i64,
    source_name: String,
    platform: String,
    source_record_id: String,
    permit_type: Option<String>,
    work_description: Option<String>,
    permit_status: Option<String>,
    issue_date: Option<String>,
    raw_address: Option<String>,
    address_parsed: String,
    parcel_id: Option<String>,
    owner_name: Option<String>,
    contractor_name: Option<String>,
    permit_value: Option<f64>,
    lat: Option<f64>,
    lon: Option<f64>,
    geom_json: Option<String>,
    fingerprint: String,
    is_roofing: i64,
    created_at: String,
    provenance: String,
    raw_blob_ref: Option<String>,
}

impl From<PermitRow> for Permit {
    fn from(row: PermitRow) -> Self {
        Permit {
            id: row.id,
            source_id: row.source_id,
            source_name: row.source_name,
            platform: Platform::from_str(&row.platform).unwrap_or(Platform::Other),
            source_record_id: row.source_record_id,
            permit_type: row.permit_type,
            work_description: row.work_description,
            permit_status: row.permit_status,
            issue_date: row.issue_date,
            raw_address: row.raw_address,
            address: serde_json::from_str::<ParsedAddress>(&row.address_parsed)
                .unwrap_or_default(),
            parcel_id: row.parcel_id,
            owner_name: row.owner_name,
            contractor_name: row.contractor_name,
            permit_value: row.permit_value,
            lat: row.lat,
            lon: row.lon,
            geom_json: row
                .geom_json
                .and_then(|g| serde_json::from_str(&g).ok()),
            fingerprint: row.fingerprint,
            is_roofing: row.is_roofing != 0,
            created_at: parse_datetime(&row.created_at),
            provenance: serde_json::from_str::<Provenance>(&row.provenance).unwrap_or(
                Provenance {
                    platform: String::new(),
                    url: String::new(),
                    fetched_at: chrono::DateTime::UNIX_EPOCH,
                    fields_map: Default::default(),
                    checksum: None,
                    max_record_id: None,
                },
            ),
            raw_blob_ref: row.raw_blob_ref,
        }
    }
}

/// Listing filters. Bounding box intervals are closed on both ends.
#[derive(Debug, Clone, Default)]
pub struct PermitFilters {
    /// (west, south, east, north) in decimal degrees.
    pub bbox: Option<(f64, f64, f64, f64)>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub permit_type: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub roofing_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PermitStats {
    pub total: i64,
    pub with_coords: i64,
    pub roofing: i64,
}

const SELECT_COLUMNS: &str = "id, source_id, source_name, platform, source_record_id, \
     permit_type, work_description, permit_status, issue_date, raw_address, address_parsed, \
     parcel_id, owner_name, contractor_name, permit_value, lat, lon, geom_json, fingerprint, \
     is_roofing, created_at, provenance, raw_blob_ref";

impl Store {
    pub async fn get_permit(&self, id: &str) -> StoreResult<Option<Permit>> {
        let row = sqlx::query_as::<_, PermitRow>(&format!(
            "SELECT {} FROM permits WHERE id = ?1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Permit::from))
    }

    pub async fn get_permit_by_fingerprint(&self, fingerprint: &str) -> StoreResult<Option<Permit>> {
        let row = sqlx::query_as::<_, PermitRow>(&format!(
            "SELECT {} FROM permits WHERE fingerprint = ?1",
            SELECT_COLUMNS
        ))
        .bind(fingerprint)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Permit::from))
    }

    /// Insert the permit, or — when its fingerprint already exists — merge it
    /// into the existing row, overwriting only with non-null values.
    /// Returns the stored permit's id.
    pub async fn upsert_permit(&self, permit: &Permit) -> StoreResult<String> {
        let address = serde_json::to_string(&permit.address).unwrap_or_else(|_| "{}".to_string());
        let provenance =
            serde_json::to_string(&permit.provenance).unwrap_or_else(|_| "{}".to_string());
        let geom = permit
            .geom_json
            .as_ref()
            .map(|g| serde_json::to_string(g).unwrap_or_else(|_| "null".to_string()));

        if let Some(existing) = self.get_permit_by_fingerprint(&permit.fingerprint).await? {
            sqlx::query(
                r#"UPDATE permits SET
                   source_id = ?1, source_name = ?2, platform = ?3, source_record_id = ?4,
                   permit_type = COALESCE(?5, permit_type),
                   work_description = COALESCE(?6, work_description),
                   permit_status = COALESCE(?7, permit_status),
                   issue_date = COALESCE(?8, issue_date),
                   raw_address = COALESCE(?9, raw_address),
                   address_parsed = ?10,
                   parcel_id = COALESCE(?11, parcel_id),
                   owner_name = COALESCE(?12, owner_name),
                   contractor_name = COALESCE(?13, contractor_name),
                   permit_value = COALESCE(?14, permit_value),
                   lat = COALESCE(?15, lat),
                   lon = COALESCE(?16, lon),
                   geom_json = COALESCE(?17, geom_json),
                   is_roofing = ?18,
                   provenance = ?19,
                   raw_blob_ref = COALESCE(?20, raw_blob_ref)
                   WHERE fingerprint = ?21"#,
            )
            .bind(permit.source_id)
            .bind(&permit.source_name)
            .bind(permit.platform.as_str())
            .bind(&permit.source_record_id)
            .bind(&permit.permit_type)
            .bind(&permit.work_description)
            .bind(&permit.permit_status)
            .bind(&permit.issue_date)
            .bind(&permit.raw_address)
            .bind(&address)
            .bind(&permit.parcel_id)
            .bind(&permit.owner_name)
            .bind(&permit.contractor_name)
            .bind(permit.permit_value)
            .bind(permit.lat)
            .bind(permit.lon)
            .bind(&geom)
            .bind(permit.is_roofing as i64)
            .bind(&provenance)
            .bind(&permit.raw_blob_ref)
            .bind(&permit.fingerprint)
            .execute(self.pool())
            .await?;
            return Ok(existing.id);
        }

        sqlx::query(
            r#"INSERT INTO permits
               (id, source_id, source_name, platform, source_record_id,
                permit_type, work_description, permit_status, issue_date,
                raw_address, address_parsed, parcel_id, owner_name, contractor_name,
                permit_value, lat, lon, geom_json, fingerprint, is_roofing,
                created_at, provenance, raw_blob_ref)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                       ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)"#,
        )
        .bind(&permit.id)
        .bind(permit.source_id)
        .bind(&permit.source_name)
        .bind(permit.platform.as_str())
        .bind(&permit.source_record_id)
        .bind(&permit.permit_type)
        .bind(&permit.work_description)
        .bind(&permit.permit_status)
        .bind(&permit.issue_date)
        .bind(&permit.raw_address)
        .bind(&address)
        .bind(&permit.parcel_id)
        .bind(&permit.owner_name)
        .bind(&permit.contractor_name)
        .bind(permit.permit_value)
        .bind(permit.lat)
        .bind(permit.lon)
        .bind(&geom)
        .bind(&permit.fingerprint)
        .bind(permit.is_roofing as i64)
        .bind(permit.created_at.to_rfc3339())
        .bind(&provenance)
        .bind(&permit.raw_blob_ref)
        .execute(self.pool())
        .await?;

        Ok(permit.id.clone())
    }

    /// Filtered listing plus the total matching count, newest first.
    pub async fn get_permits(&self, filters: &PermitFilters) -> StoreResult<(Vec<Permit>, i64)> {
        let mut count_query: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM permits WHERE 1=1");
        push_filters(&mut count_query, filters);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(self.pool())
            .await?;

        let mut query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM permits WHERE 1=1",
            SELECT_COLUMNS
        ));
        push_filters(&mut query, filters);

        let limit = filters
            .limit
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT);
        let offset = filters.offset.unwrap_or(0).max(0);
        query.push(" ORDER BY created_at DESC LIMIT ");
        query.push_bind(limit);
        query.push(" OFFSET ");
        query.push_bind(offset);

        let rows: Vec<PermitRow> = query.build_query_as().fetch_all(self.pool()).await?;
        Ok((rows.into_iter().map(Permit::from).collect(), total))
    }

    pub async fn get_permit_stats(&self) -> StoreResult<PermitStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permits")
            .fetch_one(self.pool())
            .await?;
        let with_coords: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM permits WHERE lat IS NOT NULL AND lon IS NOT NULL",
        )
        .fetch_one(self.pool())
        .await?;
        let roofing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permits WHERE is_roofing = 1")
            .fetch_one(self.pool())
            .await?;
        Ok(PermitStats {
            total,
            with_coords,
            roofing,
        })
    }

    pub async fn get_source_permit_count(&self, source_id: i64) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permits WHERE source_id = ?1")
            .bind(source_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Largest `source_record_id` for the source, cast to integer.
    /// Lexicographic MAX would mis-order "999" vs "1000", so the cast happens
    /// first; records with non-integer identifiers are skipped.
    pub async fn get_max_source_record_id(&self, source_id: i64) -> StoreResult<Option<i64>> {
        let max: Option<i64> = sqlx::query_scalar(
            r#"SELECT MAX(CAST(source_record_id AS INTEGER)) FROM permits
               WHERE source_id = ?1
                 AND length(source_record_id) > 0
                 AND source_record_id NOT GLOB '*[^0-9]*'"#,
        )
        .bind(source_id)
        .fetch_one(self.pool())
        .await?;
        Ok(max)
    }
}

fn push_filters(query: &mut QueryBuilder<sqlx::Sqlite>, filters: &PermitFilters) {
    if let Some((west, south, east, north)) = filters.bbox {
        query.push(" AND lat IS NOT NULL AND lon IS NOT NULL AND lat >= ");
        query.push_bind(south);
        query.push(" AND lat <= ");
        query.push_bind(north);
        query.push(" AND lon >= ");
        query.push_bind(west);
        query.push(" AND lon <= ");
        query.push_bind(east);
    }
    if let Some(city) = &filters.city {
        query.push(" AND json_extract(address_parsed, '$.city') LIKE ");
        query.push_bind(format!("%{}%", city));
    }
    if let Some(state) = &filters.state {
        query.push(" AND json_extract(address_parsed, '$.state') LIKE ");
        query.push_bind(format!("%{}%", state));
    }
    if let Some(permit_type) = &filters.permit_type {
        query.push(" AND permit_type LIKE ");
        query.push_bind(format!("%{}%", permit_type));
    }
    if let Some(from) = &filters.date_from {
        query.push(" AND issue_date >= ");
        query.push_bind(from.clone());
    }
    if let Some(to) = &filters.date_to {
        query.push(" AND issue_date <= ");
        query.push_bind(to.clone());
    }
    if filters.roofing_only {
        query.push(" AND is_roofing = 1");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{compute_fingerprint, generate_permit_id};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn permit(record_id: &str, city: &str, issue_date: &str, roofing: bool) -> Permit {
        let address = ParsedAddress {
            house_number: Some("700".to_string()),
            street: Some("H Street".to_string()),
            city: Some(city.to_string()),
            state: Some("CA".to_string()),
            zip: None,
        };
        Permit {
            id: generate_permit_id(),
            source_id: 1,
            source_name: "Test Source".to_string(),
            platform: Platform::JsonDataset,
            source_record_id: record_id.to_string(),
            permit_type: Some(if roofing { "Re-Roof" } else { "HVAC" }.to_string()),
            work_description: None,
            permit_status: None,
            issue_date: Some(issue_date.to_string()),
            raw_address: None,
            address: address.clone(),
            parcel_id: None,
            owner_name: None,
            contractor_name: None,
            permit_value: None,
            lat: Some(38.58),
            lon: Some(-121.49),
            geom_json: None,
            fingerprint: compute_fingerprint(
                address.street.as_deref(),
                address.city.as_deref(),
                address.state.as_deref(),
                None,
                Some(issue_date),
                Some(if roofing { "Re-Roof" } else { "HVAC" }),
            ),
            is_roofing: roofing,
            created_at: Utc::now(),
            provenance: Provenance {
                platform: "json-dataset".to_string(),
                url: "https://data.example.gov/resource/x.json".to_string(),
                fetched_at: Utc::now(),
                fields_map: BTreeMap::new(),
                checksum: None,
                max_record_id: None,
            },
            raw_blob_ref: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_fingerprint() {
        let store = Store::in_memory().await.unwrap();
        let p = permit("42", "Sacramento", "2024-10-15", true);

        let first_id = store.upsert_permit(&p).await.unwrap();
        assert_eq!(store.get_permit_stats().await.unwrap().total, 1);

        // Same fingerprint, fresh opaque id: merges instead of inserting.
        let mut again = p.clone();
        again.id = generate_permit_id();
        again.owner_name = Some("ACME Roofing".to_string());
        let second_id = store.upsert_permit(&again).await.unwrap();

        assert_eq!(first_id, second_id);
        assert_eq!(store.get_permit_stats().await.unwrap().total, 1);

        let stored = store
            .get_permit_by_fingerprint(&p.fingerprint)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, first_id);
        assert_eq!(stored.owner_name.as_deref(), Some("ACME Roofing"));
    }

    #[tokio::test]
    async fn test_upsert_merge_keeps_existing_non_null_fields() {
        let store = Store::in_memory().await.unwrap();
        let mut p = permit("42", "Sacramento", "2024-10-15", true);
        p.owner_name = Some("Original Owner".to_string());
        store.upsert_permit(&p).await.unwrap();

        let mut update = p.clone();
        update.id = generate_permit_id();
        update.owner_name = None;
        update.contractor_name = Some("New Contractor".to_string());
        store.upsert_permit(&update).await.unwrap();

        let stored = store
            .get_permit_by_fingerprint(&p.fingerprint)
            .await
            .unwrap()
            .unwrap();
        // Null incoming value does not erase the stored one.
        assert_eq!(stored.owner_name.as_deref(), Some("Original Owner"));
        assert_eq!(stored.contractor_name.as_deref(), Some("New Contractor"));
    }

    #[tokio::test]
    async fn test_get_permits_filters() {
        let store = Store::in_memory().await.unwrap();
        store
            .upsert_permit(&permit("1", "Sacramento", "2024-10-15", true))
            .await
            .unwrap();
        store
            .upsert_permit(&permit("2", "Davis", "2024-09-01", false))
            .await
            .unwrap();
        let mut remote = permit("3", "Portland", "2024-08-01", true);
        remote.lat = Some(45.52);
        remote.lon = Some(-122.68);
        remote.address.state = Some("OR".to_string());
        remote.fingerprint = "distinct-fp-portland".to_string();
        store.upsert_permit(&remote).await.unwrap();

        let (rows, total) = store
            .get_permits(&PermitFilters {
                city: Some("sacram".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].address.city.as_deref(), Some("Sacramento"));

        let (_, roofing_total) = store
            .get_permits(&PermitFilters {
                roofing_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(roofing_total, 2);

        // Closed-interval bbox around Sacramento/Davis only.
        let (rows, total) = store
            .get_permits(&PermitFilters {
                bbox: Some((-122.0, 38.0, -121.0, 39.0)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(rows.iter().all(|p| p.lat.unwrap() >= 38.0));

        let (_, total) = store
            .get_permits(&PermitFilters {
                date_from: Some("2024-09-01".to_string()),
                date_to: Some("2024-10-31".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_stats_counts_coordinates_and_roofing() {
        let store = Store::in_memory().await.unwrap();
        store
            .upsert_permit(&permit("1", "Sacramento", "2024-10-15", true))
            .await
            .unwrap();
        let mut no_coords = permit("2", "Davis", "2024-09-01", false);
        no_coords.lat = None;
        no_coords.lon = None;
        store.upsert_permit(&no_coords).await.unwrap();

        let stats = store.get_permit_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.with_coords, 1);
        assert_eq!(stats.roofing, 1);
    }

    #[tokio::test]
    async fn test_max_source_record_id_casts_and_skips_non_integer() {
        let store = Store::in_memory().await.unwrap();
        store
            .upsert_permit(&permit("999", "Sacramento", "2024-01-01", false))
            .await
            .unwrap();
        store
            .upsert_permit(&permit("1000", "Sacramento", "2024-01-02", false))
            .await
            .unwrap();
        store
            .upsert_permit(&permit("B-2024-77", "Sacramento", "2024-01-03", false))
            .await
            .unwrap();

        // Lexicographic MAX would say "999"; the integer cast says 1000,
        // and the alphanumeric id is skipped.
        let max = store.get_max_source_record_id(1).await.unwrap();
        assert_eq!(max, Some(1000));

        assert_eq!(store.get_max_source_record_id(99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_source_permit_count() {
        let store = Store::in_memory().await.unwrap();
        store
            .upsert_permit(&permit("1", "Sacramento", "2024-01-01", false))
            .await
            .unwrap();
        store
            .upsert_permit(&permit("2", "Sacramento", "2024-01-02", false))
            .await
            .unwrap();
        assert_eq!(store.get_source_permit_count(1).await.unwrap(), 2);
        assert_eq!(store.get_source_permit_count(2).await.unwrap(), 0);
    }
}
