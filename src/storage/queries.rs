//! SQL queries for lifecycle operations

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{LifecycleError, Result};
use crate::types::{
    LifecycleState, LifecycleUpdate, MaintenanceCheckpoint, Memory, PageCursor, PopulationStats,
    RunStatus,
};

const MEMORY_COLUMNS: &str = "id, created_at, last_accessed_at, access_count, importance, \
     stability, lifecycle_state, decay_score, soft_deleted_at";

/// Format a timestamp so that text order matches time order
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_state(column: usize, raw: &str) -> rusqlite::Result<LifecycleState> {
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

/// Parse a memory from a database row selected with `MEMORY_COLUMNS`
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let created_at: String = row.get(1)?;
    let last_accessed_at: String = row.get(2)?;
    let access_count: i64 = row.get(3)?;
    let state: String = row.get(6)?;
    let soft_deleted_at: Option<String> = row.get(8)?;

    Ok(Memory {
        id: row.get(0)?,
        created_at: parse_ts(1, &created_at)?,
        last_accessed_at: parse_ts(2, &last_accessed_at)?,
        access_count: access_count.max(0) as u64,
        importance: row.get(4)?,
        stability: row.get(5)?,
        lifecycle_state: parse_state(6, &state)?,
        decay_score: row.get(7)?,
        soft_deleted_at: soft_deleted_at
            .map(|raw| parse_ts(8, &raw))
            .transpose()?,
    })
}

pub fn get_memory(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    let sql = format!("SELECT {} FROM memories WHERE id = ?", MEMORY_COLUMNS);
    Ok(conn
        .query_row(&sql, params![id], memory_from_row)
        .optional()?)
}

pub fn upsert_memory(conn: &Connection, memory: &Memory) -> Result<()> {
    conn.execute(
        "INSERT INTO memories (id, created_at, last_accessed_at, access_count, importance,
                               stability, lifecycle_state, decay_score, soft_deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            created_at = excluded.created_at,
            last_accessed_at = excluded.last_accessed_at,
            access_count = excluded.access_count,
            importance = excluded.importance,
            stability = excluded.stability,
            lifecycle_state = excluded.lifecycle_state,
            decay_score = excluded.decay_score,
            soft_deleted_at = excluded.soft_deleted_at",
        params![
            memory.id,
            format_ts(memory.created_at),
            format_ts(memory.last_accessed_at),
            i64::try_from(memory.access_count).unwrap_or(i64::MAX),
            memory.importance,
            memory.stability,
            memory.lifecycle_state.as_str(),
            memory.decay_score,
            memory.soft_deleted_at.map(format_ts),
        ],
    )?;
    Ok(())
}

pub fn page_after(
    conn: &Connection,
    cursor: Option<&PageCursor>,
    limit: usize,
) -> Result<Vec<Memory>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = match cursor {
        Some(cursor) => {
            let sql = format!(
                "SELECT {} FROM memories
                 WHERE last_accessed_at > ?1 OR (last_accessed_at = ?1 AND id > ?2)
                 ORDER BY last_accessed_at ASC, id ASC
                 LIMIT ?3",
                MEMORY_COLUMNS
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(
                params![format_ts(cursor.last_accessed_at), cursor.id, limit],
                memory_from_row,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM memories ORDER BY last_accessed_at ASC, id ASC LIMIT ?1",
                MEMORY_COLUMNS
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![limit], memory_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(rows)
}

pub fn count_after(conn: &Connection, cursor: Option<&PageCursor>) -> Result<u64> {
    let count: i64 = match cursor {
        Some(cursor) => conn.query_row(
            "SELECT COUNT(*) FROM memories
             WHERE last_accessed_at > ?1 OR (last_accessed_at = ?1 AND id > ?2)",
            params![format_ts(cursor.last_accessed_at), cursor.id],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?,
    };
    Ok(count.max(0) as u64)
}

pub fn soft_deleted_before(
    conn: &Connection,
    cutoff: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<Memory>> {
    let sql = format!(
        "SELECT {} FROM memories
         WHERE lifecycle_state = 'SOFT_DELETED' AND soft_deleted_at <= ?1
         ORDER BY soft_deleted_at ASC, id ASC
         LIMIT ?2",
        MEMORY_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(
        params![format_ts(cutoff), i64::try_from(limit).unwrap_or(i64::MAX)],
        memory_from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn delete_memory(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM memories WHERE id = ?", params![id])?;
    Ok(deleted > 0)
}

/// Conditional lifecycle write; returns false when the stored access time is newer
/// Move `last_accessed_at` forward (never back) and count the access
pub fn touch_memory(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE memories
         SET last_accessed_at = MAX(last_accessed_at, ?1),
             access_count = access_count + 1
         WHERE id = ?2",
        params![format_ts(now), id],
    )?;
    Ok(changed > 0)
}

pub fn apply_lifecycle_update(conn: &Connection, update: &LifecycleUpdate) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE memories
         SET lifecycle_state = ?1, decay_score = ?2, soft_deleted_at = ?3
         WHERE id = ?4 AND last_accessed_at <= ?5",
        params![
            update.lifecycle_state.as_str(),
            update.decay_score,
            update.soft_deleted_at.map(format_ts),
            update.id,
            format_ts(update.observed_last_accessed_at),
        ],
    )?;
    Ok(changed > 0)
}

pub fn population_stats(conn: &Connection) -> Result<PopulationStats> {
    let mut stmt = conn.prepare(
        "SELECT lifecycle_state, COUNT(*), SUM(decay_score), SUM(importance), SUM(stability)
         FROM memories
         GROUP BY lifecycle_state",
    )?;

    let rows = stmt.query_map([], |row| {
        let state: String = row.get(0)?;
        Ok((
            parse_state(0, &state)?,
            row.get::<_, i64>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, f64>(4)?,
        ))
    })?;

    let mut by_state = BTreeMap::new();
    let (mut total, mut decay, mut importance, mut stability) = (0u64, 0.0, 0.0, 0.0);
    for row in rows {
        let (state, count, decay_sum, importance_sum, stability_sum) = row?;
        let count = count.max(0) as u64;
        by_state.insert(state, count);
        total += count;
        decay += decay_sum;
        importance += importance_sum;
        stability += stability_sum;
    }

    let n = total.max(1) as f64;
    Ok(PopulationStats {
        total,
        by_state,
        avg_decay_score: decay / n,
        avg_importance: importance / n,
        avg_stability: stability / n,
    })
}

pub fn load_checkpoint(conn: &Connection) -> Result<MaintenanceCheckpoint> {
    let row = conn
        .query_row(
            "SELECT cursor_last_accessed_at, cursor_id, last_run_at, last_status
             FROM maintenance_state WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((cursor_at, cursor_id, last_run_at, last_status)) = row else {
        return Ok(MaintenanceCheckpoint::default());
    };

    let cursor = match (cursor_at, cursor_id) {
        (Some(at), Some(id)) => Some(PageCursor {
            last_accessed_at: parse_ts(0, &at)?,
            id,
        }),
        _ => None,
    };
    let last_run_at = last_run_at.map(|raw| parse_ts(2, &raw)).transpose()?;
    let last_status = last_status
        .map(|raw| raw.parse::<RunStatus>())
        .transpose()
        .map_err(LifecycleError::Storage)?;

    Ok(MaintenanceCheckpoint {
        cursor,
        last_run_at,
        last_status,
    })
}

pub fn save_checkpoint(conn: &Connection, checkpoint: &MaintenanceCheckpoint) -> Result<()> {
    conn.execute(
        "INSERT INTO maintenance_state (id, cursor_last_accessed_at, cursor_id, last_run_at, last_status)
         VALUES (1, ?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            cursor_last_accessed_at = excluded.cursor_last_accessed_at,
            cursor_id = excluded.cursor_id,
            last_run_at = excluded.last_run_at,
            last_status = excluded.last_status",
        params![
            checkpoint.cursor.as_ref().map(|c| format_ts(c.last_accessed_at)),
            checkpoint.cursor.as_ref().map(|c| c.id.as_str()),
            checkpoint.last_run_at.map(format_ts),
            checkpoint.last_status.map(|s| s.as_str()),
        ],
    )?;
    Ok(())
}
