use super::*;
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use sitesync_protocol::types::{
    TASK_STATUS_ERROR, TASK_STATUS_FINISHED, TASK_STATUS_IN_PROGRESS, TASK_STATUS_PENDING,
};

/// Retry scheduling policy: `min(cap, base * 2^(n-1))` plus proportional
/// jitter. Attempt numbers are 1-based.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_ms: i64,
    pub cap_ms: i64,
    pub jitter_fraction: f64,
}

impl BackoffPolicy {
    pub fn delay_ms(&self, attempt: u32) -> i64 {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base_ms.saturating_mul(1_i64 << exp).min(self.cap_ms).max(0);
        if self.jitter_fraction <= 0.0 || raw == 0 {
            return raw;
        }
        let jitter = self.jitter_fraction.min(1.0);
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        ((raw as f64) * factor) as i64
    }
}

impl Store {
    /// Insert a pending task. The `(run_id, url)` uniqueness constraint makes
    /// this idempotent: the first enqueue wins and later calls report
    /// `Duplicate` without touching the row.
    pub fn enqueue_task(
        &self,
        run_id: i64,
        url: &str,
        depth: u32,
        source_name: &str,
        plugin_hint: Option<&str>,
    ) -> Result<EnqueueOutcome, SitesyncError> {
        let now = now_ms();
        self.write_tx(|tx| {
            let inserted = tx.execute(
                "INSERT INTO tasks
                     (run_id, url, depth, source_name, plugin_hint, status,
                      attempt_count, next_run_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
                params![
                    run_id,
                    url,
                    depth as i64,
                    source_name,
                    plugin_hint,
                    TASK_STATUS_PENDING,
                    now
                ],
            );
            match inserted {
                Ok(_) => Ok(EnqueueOutcome::Queued(tx.last_insert_rowid())),
                Err(ref err) if is_constraint_violation(err) => Ok(EnqueueOutcome::Duplicate),
                Err(err) => Err(db_err(err)),
            }
        })
    }

    /// Seed helper: enqueue a batch of `(url, depth)` pairs, swallowing
    /// duplicates. Returns how many rows were newly queued.
    pub fn enqueue_seeds(
        &self,
        run_id: i64,
        source_name: &str,
        seeds: &[(String, u32)],
    ) -> Result<usize, SitesyncError> {
        let mut queued = 0;
        for (url, depth) in seeds {
            if let EnqueueOutcome::Queued(_) =
                self.enqueue_task(run_id, url, *depth, source_name, None)?
            {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Claim up to `batch_size` tasks for `owner`. One transaction performs,
    /// in order: reclamation of expired leases (attempt incremented, task
    /// requeued with backoff or moved to error past `max_retries`), candidate
    /// selection ordered by `(next_run_at, depth, id)`, and leasing.
    pub fn acquire_tasks(
        &self,
        run_id: i64,
        owner: &str,
        batch_size: usize,
        lease_ttl_ms: i64,
        max_retries: u32,
        backoff: &BackoffPolicy,
    ) -> Result<Vec<TaskRow>, SitesyncError> {
        let now = now_ms();
        let lease_until = now.saturating_add(lease_ttl_ms.max(0));
        self.write_tx(|tx| {
            reclaim_expired_leases(tx, run_id, now, max_retries, backoff)?;

            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {TASK_COLUMNS}
                     FROM tasks
                     WHERE run_id = ?1 AND status = ?2 AND next_run_at <= ?3
                     ORDER BY next_run_at ASC, depth ASC, id ASC
                     LIMIT ?4"
                ))
                .map_err(db_err)?;
            let candidates = stmt
                .query_map(
                    params![run_id, TASK_STATUS_PENDING, now, batch_size as i64],
                    map_task_row,
                )
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;

            let mut claimed = Vec::with_capacity(candidates.len());
            for mut task in candidates {
                let updated = tx
                    .execute(
                        "UPDATE tasks
                         SET status = ?2, lease_owner = ?3, lease_expires_at = ?4,
                             updated_at = ?5
                         WHERE id = ?1 AND status = ?6",
                        params![
                            task.id,
                            TASK_STATUS_IN_PROGRESS,
                            owner,
                            lease_until,
                            now,
                            TASK_STATUS_PENDING
                        ],
                    )
                    .map_err(db_err)?;
                if updated == 0 {
                    continue;
                }
                task.status = TASK_STATUS_IN_PROGRESS.to_owned();
                task.lease_owner = Some(owner.to_owned());
                task.lease_expires_at = Some(lease_until);
                task.updated_at = now;
                claimed.push(task);
            }
            Ok(claimed)
        })
    }

    /// Extend the lease if `owner` still holds it.
    pub fn renew_lease(
        &self,
        task_id: i64,
        owner: &str,
        lease_ttl_ms: i64,
    ) -> Result<LeaseOutcome, SitesyncError> {
        let now = now_ms();
        let lease_until = now.saturating_add(lease_ttl_ms.max(0));
        self.write_tx(|tx| {
            let updated = tx
                .execute(
                    "UPDATE tasks
                     SET lease_expires_at = ?3, updated_at = ?4
                     WHERE id = ?1 AND lease_owner = ?2 AND status = ?5",
                    params![task_id, owner, lease_until, now, TASK_STATUS_IN_PROGRESS],
                )
                .map_err(db_err)?;
            Ok(lease_outcome(updated))
        })
    }

    /// Terminal success. Zero rows updated means the lease was lost and the
    /// task must not be considered completed by this worker.
    pub fn finish_task(&self, task_id: i64, owner: &str) -> Result<LeaseOutcome, SitesyncError> {
        let now = now_ms();
        self.write_tx(|tx| {
            let updated = tx
                .execute(
                    "UPDATE tasks
                     SET status = ?3, lease_owner = NULL, lease_expires_at = NULL,
                         updated_at = ?4
                     WHERE id = ?1 AND lease_owner = ?2 AND status = ?5",
                    params![task_id, owner, TASK_STATUS_FINISHED, now, TASK_STATUS_IN_PROGRESS],
                )
                .map_err(db_err)?;
            Ok(lease_outcome(updated))
        })
    }

    /// Retryable failure: requeue with backoff, or move to `error` once the
    /// incremented attempt count exceeds `max_retries`.
    pub fn fail_transient(
        &self,
        task_id: i64,
        owner: &str,
        error: &str,
        max_retries: u32,
        backoff: &BackoffPolicy,
    ) -> Result<FailOutcome, SitesyncError> {
        let now = now_ms();
        self.write_tx(|tx| {
            let attempt_count: Option<i64> = tx
                .query_row(
                    "SELECT attempt_count FROM tasks
                     WHERE id = ?1 AND lease_owner = ?2 AND status = ?3",
                    params![task_id, owner, TASK_STATUS_IN_PROGRESS],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            let Some(attempt_count) = attempt_count else {
                return Ok(FailOutcome::Lost);
            };
            let next_attempt = (attempt_count as u32).saturating_add(1);
            if next_attempt > max_retries {
                tx.execute(
                    "UPDATE tasks
                     SET status = ?2, attempt_count = ?3, last_error = ?4,
                         lease_owner = NULL, lease_expires_at = NULL, updated_at = ?5
                     WHERE id = ?1",
                    params![task_id, TASK_STATUS_ERROR, next_attempt as i64, error, now],
                )
                .map_err(db_err)?;
                Ok(FailOutcome::Exhausted)
            } else {
                let next_run_at = now.saturating_add(backoff.delay_ms(next_attempt));
                tx.execute(
                    "UPDATE tasks
                     SET status = ?2, attempt_count = ?3, last_error = ?4,
                         lease_owner = NULL, lease_expires_at = NULL,
                         next_run_at = ?5, updated_at = ?6
                     WHERE id = ?1",
                    params![
                        task_id,
                        TASK_STATUS_PENDING,
                        next_attempt as i64,
                        error,
                        next_run_at,
                        now
                    ],
                )
                .map_err(db_err)?;
                Ok(FailOutcome::Requeued { next_run_at })
            }
        })
    }

    /// Non-retryable failure: terminal `error` regardless of attempt budget.
    pub fn fail_permanent(
        &self,
        task_id: i64,
        owner: &str,
        error: &str,
    ) -> Result<LeaseOutcome, SitesyncError> {
        let now = now_ms();
        self.write_tx(|tx| {
            let updated = tx
                .execute(
                    "UPDATE tasks
                     SET status = ?3, attempt_count = attempt_count + 1, last_error = ?4,
                         lease_owner = NULL, lease_expires_at = NULL, updated_at = ?5
                     WHERE id = ?1 AND lease_owner = ?2 AND status = ?6",
                    params![task_id, owner, TASK_STATUS_ERROR, error, now, TASK_STATUS_IN_PROGRESS],
                )
                .map_err(db_err)?;
            Ok(lease_outcome(updated))
        })
    }

    /// Cooperative stop: return an in-progress task to pending without
    /// charging an attempt. Guarded by the lease so a reclaimed task is left
    /// to its new owner.
    pub fn release_task(
        &self,
        task_id: i64,
        owner: &str,
        reason: &str,
    ) -> Result<LeaseOutcome, SitesyncError> {
        let now = now_ms();
        self.write_tx(|tx| {
            let updated = tx
                .execute(
                    "UPDATE tasks
                     SET status = ?3, lease_owner = NULL, lease_expires_at = NULL,
                         next_run_at = ?4, last_error = ?5, updated_at = ?4
                     WHERE id = ?1 AND lease_owner = ?2 AND status = ?6",
                    params![
                        task_id,
                        owner,
                        TASK_STATUS_PENDING,
                        now,
                        reason,
                        TASK_STATUS_IN_PROGRESS
                    ],
                )
                .map_err(db_err)?;
            Ok(lease_outcome(updated))
        })
    }

    /// Return every in-progress task of the run to pending (user stop).
    pub fn release_in_progress(&self, run_id: i64, reason: &str) -> Result<usize, SitesyncError> {
        let now = now_ms();
        self.write_tx(|tx| {
            tx.execute(
                "UPDATE tasks
                 SET status = ?2, lease_owner = NULL, lease_expires_at = NULL,
                     next_run_at = ?3, last_error = ?4, updated_at = ?3
                 WHERE run_id = ?1 AND status = ?5",
                params![run_id, TASK_STATUS_PENDING, now, reason, TASK_STATUS_IN_PROGRESS],
            )
            .map_err(db_err)
        })
    }

    pub fn task_counts(&self, run_id: i64) -> Result<TaskCounts, SitesyncError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT status, COUNT(*) FROM tasks WHERE run_id = ?1 GROUP BY status",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![run_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(db_err)?;
            let mut counts = TaskCounts::default();
            for row in rows {
                let (status, count) = row.map_err(db_err)?;
                match status.as_str() {
                    TASK_STATUS_PENDING => counts.pending += count,
                    TASK_STATUS_IN_PROGRESS => counts.in_progress += count,
                    TASK_STATUS_FINISHED => counts.finished += count,
                    TASK_STATUS_ERROR => counts.error += count,
                    _ => {}
                }
            }
            Ok(counts)
        })
    }

    pub fn get_task(&self, task_id: i64) -> Result<TaskRow, SitesyncError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![task_id],
                map_task_row,
            )
            .map_err(db_err)
        })
    }

    pub fn list_tasks(
        &self,
        run_id: i64,
        status: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TaskRow>, SitesyncError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE run_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY id DESC
                     LIMIT ?3",
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![run_id, status, limit as i64], map_task_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// Rewrite a lease deadline in place. Used by recovery tooling and tests
    /// to simulate a stalled worker.
    pub fn force_lease_expiry(&self, task_id: i64, expires_at: i64) -> Result<(), SitesyncError> {
        self.write_tx(|tx| {
            tx.execute(
                "UPDATE tasks SET lease_expires_at = ?2 WHERE id = ?1",
                params![task_id, expires_at],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }
}

fn lease_outcome(updated: usize) -> LeaseOutcome {
    if updated > 0 {
        LeaseOutcome::Applied
    } else {
        LeaseOutcome::Lost
    }
}

/// Return expired in-progress tasks to the pool. Runs inside the acquire
/// transaction so a reclaimed task can be re-leased in the same call.
fn reclaim_expired_leases(
    tx: &rusqlite::Transaction<'_>,
    run_id: i64,
    now: i64,
    max_retries: u32,
    backoff: &BackoffPolicy,
) -> Result<usize, SitesyncError> {
    let mut stmt = tx
        .prepare(
            "SELECT id, attempt_count FROM tasks
             WHERE run_id = ?1 AND status = ?2
               AND lease_expires_at IS NOT NULL AND lease_expires_at <= ?3",
        )
        .map_err(db_err)?;
    let expired = stmt
        .query_map(params![run_id, TASK_STATUS_IN_PROGRESS, now], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u32))
        })
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?;

    let reclaimed = expired.len();
    for (task_id, attempt_count) in expired {
        let next_attempt = attempt_count.saturating_add(1);
        if next_attempt > max_retries {
            tx.execute(
                "UPDATE tasks
                 SET status = ?2, attempt_count = ?3, last_error = 'lease expired',
                     lease_owner = NULL, lease_expires_at = NULL, updated_at = ?4
                 WHERE id = ?1",
                params![task_id, TASK_STATUS_ERROR, next_attempt as i64, now],
            )
            .map_err(db_err)?;
        } else {
            let next_run_at = now.saturating_add(backoff.delay_ms(next_attempt));
            tx.execute(
                "UPDATE tasks
                 SET status = ?2, attempt_count = ?3, last_error = 'lease expired',
                     lease_owner = NULL, lease_expires_at = NULL,
                     next_run_at = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![task_id, TASK_STATUS_PENDING, next_attempt as i64, next_run_at, now],
            )
            .map_err(db_err)?;
        }
    }
    if reclaimed > 0 {
        tracing::debug!(run_id, reclaimed, "reclaimed expired leases");
    }
    Ok(reclaimed)
}
