use super::*;
use rusqlite::{params, OptionalExtension};
use sitesync_protocol::types::{RUN_STATUS_RUNNING, RUN_STATUS_STOPPED};

impl Store {
    /// Create a new run in `running` state.
    pub fn create_run(
        &self,
        source_name: &str,
        config_snapshot: &str,
    ) -> Result<RunRow, SitesyncError> {
        let now = now_ms();
        self.write_tx(|tx| {
            tx.execute(
                "INSERT INTO runs (source_name, status, started_at, config_snapshot_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![source_name, RUN_STATUS_RUNNING, now, config_snapshot],
            )
            .map_err(db_err)?;
            Ok(RunRow {
                id: tx.last_insert_rowid(),
                source_name: source_name.to_owned(),
                status: RUN_STATUS_RUNNING.to_owned(),
                started_at: now,
                completed_at: None,
                config_snapshot: config_snapshot.to_owned(),
            })
        })
    }

    /// Newest run of the source that can be attached to on `--resume`.
    pub fn latest_resumable(&self, source_name: &str) -> Result<Option<RunRow>, SitesyncError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM runs
                     WHERE source_name = ?1 AND status IN (?2, ?3)
                     ORDER BY started_at DESC, id DESC
                     LIMIT 1"
                ),
                params![source_name, RUN_STATUS_RUNNING, RUN_STATUS_STOPPED],
                map_run_row,
            )
            .optional()
            .map_err(db_err)
        })
    }

    pub fn mark_run_running(&self, run_id: i64) -> Result<(), SitesyncError> {
        self.write_tx(|tx| {
            tx.execute(
                "UPDATE runs SET status = ?2, completed_at = NULL WHERE id = ?1",
                params![run_id, RUN_STATUS_RUNNING],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    /// Finalize exactly once: only a `running` run transitions, and every
    /// terminal status stamps `completed_at`.
    pub fn finalize_run(&self, run_id: i64, status: &str) -> Result<(), SitesyncError> {
        let now = now_ms();
        self.write_tx(|tx| {
            tx.execute(
                "UPDATE runs SET status = ?2, completed_at = ?3
                 WHERE id = ?1 AND status = ?4",
                params![run_id, status, now, RUN_STATUS_RUNNING],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn get_run(&self, run_id: i64) -> Result<RunRow, SitesyncError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![run_id],
                map_run_row,
            )
            .map_err(db_err)
        })
    }

    pub fn recent_runs(
        &self,
        source_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RunRow>, SitesyncError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs
                     WHERE (?1 IS NULL OR source_name = ?1)
                     ORDER BY started_at DESC, id DESC
                     LIMIT ?2"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![source_name, limit as i64], map_run_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
    }
}
