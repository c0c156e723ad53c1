//! Persistent tier of the geocoding cache.

use chrono::Utc;

use crate::geocode::GeocodeEntry;

use super::{parse_datetime, Store, StoreResult};

#[derive(sqlx::FromRow)]
struct GeocodeRow {
    address: String,
    lat: Option<f64>,
    lon: Option<f64>,
    display_name: Option<String>,
    fetched_at: String,
}

impl Store {
    pub async fn get_geocode(&self, address: &str) -> StoreResult<Option<GeocodeEntry>> {
        let row = sqlx::query_as::<_, GeocodeRow>(
            "SELECT address, lat, lon, display_name, fetched_at FROM geocode_cache WHERE address = ?1",
        )
        .bind(address)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| GeocodeEntry {
            address: r.address,
            lat: r.lat,
            lon: r.lon,
            display_name: r.display_name,
            fetched_at: parse_datetime(&r.fetched_at),
        }))
    }

    /// Store a lookup result. Null coordinates record a definitive
    /// "no result" so it is not asked again.
    pub async fn put_geocode(
        &self,
        address: &str,
        lat: Option<f64>,
        lon: Option<f64>,
        display_name: Option<String>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO geocode_cache (address, lat, lon, display_name, fetched_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(address) DO UPDATE SET
                   lat = excluded.lat,
                   lon = excluded.lon,
                   display_name = excluded.display_name,
                   fetched_at = excluded.fetched_at"#,
        )
        .bind(address)
        .bind(lat)
        .bind(lon)
        .bind(display_name)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
