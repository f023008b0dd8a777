use super::*;
use rusqlite::params;
use sitesync_protocol::types::EXCEPTION_KIND_MISSING;

impl Store {
    pub fn record_exception(
        &self,
        run_id: i64,
        task_id: Option<i64>,
        url: Option<&str>,
        kind: &str,
        message: &str,
        context_json: Option<&str>,
    ) -> Result<i64, SitesyncError> {
        let now = now_ms();
        self.write_tx(|tx| {
            tx.execute(
                "INSERT INTO exceptions
                     (run_id, task_id, url, kind, message, context_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![run_id, task_id, url, kind, message, context_json, now],
            )
            .map_err(db_err)?;
            Ok(tx.last_insert_rowid())
        })
    }

    pub fn open_exception_count(&self, run_id: i64) -> Result<i64, SitesyncError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM exceptions WHERE run_id = ?1 AND resolved_at IS NULL",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
    }

    pub fn list_exceptions(
        &self,
        run_id: i64,
        limit: usize,
    ) -> Result<Vec<ExceptionRow>, SitesyncError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, run_id, task_id, url, kind, message, context_json,
                            created_at, resolved_at
                     FROM exceptions
                     WHERE run_id = ?1
                     ORDER BY id DESC
                     LIMIT ?2",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![run_id, limit as i64], |row| {
                    Ok(ExceptionRow {
                        id: row.get(0)?,
                        run_id: row.get(1)?,
                        task_id: row.get(2)?,
                        url: row.get(3)?,
                        kind: row.get(4)?,
                        message: row.get(5)?,
                        context_json: row.get(6)?,
                        created_at: row.get(7)?,
                        resolved_at: row.get(8)?,
                    })
                })
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// Flag every asset of the source that the finished run did not touch.
    /// Missing assets become exceptions, never deletions.
    pub fn record_missing_assets(
        &self,
        run_id: i64,
        source_name: &str,
        run_started_at: i64,
    ) -> Result<usize, SitesyncError> {
        let now = now_ms();
        self.write_tx(|tx| {
            tx.execute(
                "INSERT INTO exceptions (run_id, task_id, url, kind, message, created_at)
                 SELECT ?1, NULL, url, ?2, 'asset not observed during latest crawl', ?3
                 FROM assets
                 WHERE source_name = ?4 AND last_seen_at < ?5",
                params![run_id, EXCEPTION_KIND_MISSING, now, source_name, run_started_at],
            )
            .map_err(db_err)
        })
    }
}
