use super::*;

pub(crate) fn initialize(conn: &Connection) -> Result<(), SitesyncError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_name TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            config_snapshot_json TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            depth INTEGER NOT NULL DEFAULT 0,
            source_name TEXT NOT NULL,
            plugin_hint TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            next_run_at INTEGER NOT NULL,
            lease_owner TEXT,
            lease_expires_at INTEGER,
            last_error TEXT,
            updated_at INTEGER NOT NULL,
            UNIQUE(run_id, url)
        );

        CREATE TABLE IF NOT EXISTS assets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_name TEXT NOT NULL,
            url TEXT NOT NULL,
            asset_type TEXT NOT NULL,
            first_seen_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            UNIQUE(source_name, url)
        );

        CREATE TABLE IF NOT EXISTS asset_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            asset_id INTEGER NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
            run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            normalized_hash TEXT NOT NULL,
            raw_hash TEXT NOT NULL,
            payload_ref TEXT,
            diff_class TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS exceptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            task_id INTEGER REFERENCES tasks(id) ON DELETE SET NULL,
            url TEXT,
            kind TEXT NOT NULL,
            message TEXT NOT NULL,
            context_json TEXT,
            created_at INTEGER NOT NULL,
            resolved_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_sched
            ON tasks(run_id, status, next_run_at);
        CREATE INDEX IF NOT EXISTS idx_tasks_lease
            ON tasks(run_id, lease_expires_at);
        CREATE INDEX IF NOT EXISTS idx_assets_source
            ON assets(source_name, last_seen_at);
        CREATE INDEX IF NOT EXISTS idx_asset_versions_asset
            ON asset_versions(asset_id, id DESC);
        CREATE INDEX IF NOT EXISTS idx_exceptions_run
            ON exceptions(run_id, resolved_at);
        ",
    )
    .map_err(db_err)
}
