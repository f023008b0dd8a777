use super::*;
use rusqlite::{params, OptionalExtension};

impl Store {
    /// Record one normalized observation of an asset. Upserts the canonical
    /// `(source_name, url)` row, refreshes `last_seen_at`, then compares the
    /// normalized hash with the newest stored version: an identical hash is
    /// classified `unchanged` and no version row is written.
    pub fn record_asset_version(
        &self,
        version: &NewAssetVersion<'_>,
    ) -> Result<DiffClass, SitesyncError> {
        let now = now_ms();
        self.write_tx(|tx| {
            tx.execute(
                "INSERT INTO assets (source_name, url, asset_type, first_seen_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(source_name, url) DO UPDATE SET
                     asset_type = excluded.asset_type,
                     last_seen_at = excluded.last_seen_at",
                params![version.source_name, version.url, version.asset_type, now],
            )
            .map_err(db_err)?;
            let asset_id: i64 = tx
                .query_row(
                    "SELECT id FROM assets WHERE source_name = ?1 AND url = ?2",
                    params![version.source_name, version.url],
                    |row| row.get(0),
                )
                .map_err(db_err)?;

            let previous: Option<String> = tx
                .query_row(
                    "SELECT normalized_hash FROM asset_versions
                     WHERE asset_id = ?1
                     ORDER BY id DESC
                     LIMIT 1",
                    params![asset_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;

            let diff_class = match previous.as_deref() {
                Some(hash) if hash == version.normalized_hash => return Ok(DiffClass::Unchanged),
                Some(_) => DiffClass::Updated,
                None => DiffClass::New,
            };
            tx.execute(
                "INSERT INTO asset_versions
                     (asset_id, run_id, normalized_hash, raw_hash, payload_ref,
                      diff_class, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    asset_id,
                    version.run_id,
                    version.normalized_hash,
                    version.raw_hash,
                    version.payload_ref,
                    diff_class.as_str(),
                    now
                ],
            )
            .map_err(db_err)?;
            Ok(diff_class)
        })
    }

    /// Newest stored version for a canonical asset, if any.
    pub fn latest_version(
        &self,
        source_name: &str,
        url: &str,
    ) -> Result<Option<AssetVersionRow>, SitesyncError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT v.id, v.asset_id, v.run_id, v.normalized_hash, v.raw_hash,
                        v.payload_ref, v.diff_class, v.created_at
                 FROM asset_versions v
                 JOIN assets a ON a.id = v.asset_id
                 WHERE a.source_name = ?1 AND a.url = ?2
                 ORDER BY v.id DESC
                 LIMIT 1",
                params![source_name, url],
                |row| {
                    Ok(AssetVersionRow {
                        id: row.get(0)?,
                        asset_id: row.get(1)?,
                        run_id: row.get(2)?,
                        normalized_hash: row.get(3)?,
                        raw_hash: row.get(4)?,
                        payload_ref: row.get(5)?,
                        diff_class: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
        })
    }

    pub fn asset_count(&self, source_name: &str) -> Result<i64, SitesyncError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM assets WHERE source_name = ?1",
                params![source_name],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
    }

    /// Count of versions written during a run, by diff class.
    pub fn version_count(&self, run_id: i64, diff_class: &str) -> Result<i64, SitesyncError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM asset_versions WHERE run_id = ?1 AND diff_class = ?2",
                params![run_id, diff_class],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
    }
}
