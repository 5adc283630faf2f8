//! Content-addressable geometry storage.
//!
//! Geometries are stored once per distinct shape, keyed by
//! `md5(ST_AsEWKT(geom))` of the canonical SRID-4326 form. Events reference
//! a geometry by that hash, so identical shapes submitted by many events
//! share a single `geo` row (and its precomputed centroid).

use sqlx::PgConnection;

use crate::error::StoreError;

/// Insert-if-absent: only well-formed geometry is stored, with its canonical
/// hash and centroid. Returns no row when an equal geometry already exists
/// or when the geometry is invalid.
const INSERT_GEOMETRY_SQL: &str = r"
    INSERT INTO geo (geom, hash, geom_center)
    SELECT geom, md5(ST_AsEWKT(geom)) AS hash, ST_Centroid(geom) AS geom_center
    FROM (SELECT ST_SetSRID(ST_GeomFromGeoJSON($1), 4326) AS geom) AS g
    WHERE ST_IsValid(geom)
    ON CONFLICT (hash) DO NOTHING
    RETURNING hash";

/// Recompute the canonical hash plus the engine's validity verdict for the
/// cases where the insert returned nothing.
const INSPECT_GEOMETRY_SQL: &str = r"
    SELECT md5(ST_AsEWKT(geom)) AS hash,
           ST_IsValid(geom) AS valid,
           ST_IsValidReason(geom) AS reason
    FROM (SELECT ST_SetSRID(ST_GeomFromGeoJSON($1), 4326) AS geom) AS g";

/// Resolve a GeoJSON geometry to its content hash, inserting it if absent.
///
/// Runs on the caller's connection so multi-step writes (geometry resolve +
/// event insert) share one transaction. Idempotent: equal canonical
/// geometries always resolve to the same hash, and the store never holds two
/// records for equal geometry — the insert is atomic
/// (`ON CONFLICT DO NOTHING`) and a suppressed insert falls back to a lookup
/// that computes the same canonical hash.
///
/// # Errors
///
/// Returns [`StoreError::InvalidGeometry`] with the engine's diagnostic when
/// the geometry is not well-formed (no insertion occurs), or
/// [`StoreError::Postgres`] on storage failure.
pub async fn resolve_or_insert(
    conn: &mut PgConnection,
    geojson: &str,
) -> Result<String, StoreError> {
    let inserted: Option<String> = sqlx::query_scalar(INSERT_GEOMETRY_SQL)
        .bind(geojson)
        .fetch_optional(&mut *conn)
        .await
        .map_err(unparsable_to_invalid)?;

    if let Some(hash) = inserted {
        tracing::debug!(%hash, "Stored new geometry");
        return Ok(hash);
    }

    // Either an equal geometry already exists or the input is invalid; ask
    // the engine which.
    let (hash, valid, reason): (String, bool, String) = sqlx::query_as(INSPECT_GEOMETRY_SQL)
        .bind(geojson)
        .fetch_one(&mut *conn)
        .await
        .map_err(unparsable_to_invalid)?;

    if valid {
        Ok(hash)
    } else {
        Err(StoreError::InvalidGeometry(reason))
    }
}

/// GeoJSON the engine cannot parse at all raises a server-side error rather
/// than an `ST_IsValid` verdict; surface it as the geometry diagnostic.
fn unparsable_to_invalid(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => StoreError::InvalidGeometry(db.message().to_owned()),
        other => StoreError::Postgres(other),
    }
}
