// Work unit database operations

use super::{format_timestamp, parse_column, parse_json_list, parse_timestamp, StoreError, StoreResult};
use crate::models::state_machine::transition_state;
use crate::models::{StatusLogEntry, WorkUnit, WorkUnitStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

const WORK_UNIT_COLUMNS: &str = "chunk, phase, status, priority, blocked_by, worktree, session_id,
    attention_reason, displaced_chunk, completion_retries, created_at, updated_at";

fn row_to_work_unit(row: &Row) -> rusqlite::Result<WorkUnit> {
    let phase: String = row.get(1)?;
    let status: String = row.get(2)?;
    let blocked_by: String = row.get(4)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(WorkUnit {
        chunk: row.get(0)?,
        phase: parse_column(1, &phase)?,
        status: parse_column(2, &status)?,
        priority: row.get(3)?,
        blocked_by: parse_json_list(4, &blocked_by)?,
        worktree: row.get(5)?,
        session_id: row.get(6)?,
        attention_reason: row.get(7)?,
        displaced_chunk: row.get(8)?,
        completion_retries: row.get(9)?,
        created_at: parse_timestamp(10, &created_at)?,
        updated_at: parse_timestamp(11, &updated_at)?,
    })
}

/// Insert a new work unit row. Callers check for an existing row first.
pub fn insert_work_unit(conn: &Connection, unit: &WorkUnit) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO work_units ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            WORK_UNIT_COLUMNS
        ),
        params![
            unit.chunk,
            unit.phase.as_str(),
            unit.status.as_str(),
            unit.priority,
            serde_json::to_string(&unit.blocked_by)?,
            unit.worktree,
            unit.session_id,
            unit.attention_reason,
            unit.displaced_chunk,
            unit.completion_retries,
            format_timestamp(&unit.created_at),
            format_timestamp(&unit.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_work_unit(conn: &Connection, chunk: &str) -> StoreResult<Option<WorkUnit>> {
    let unit = conn
        .query_row(
            &format!("SELECT {} FROM work_units WHERE chunk = ?1", WORK_UNIT_COLUMNS),
            params![chunk],
            row_to_work_unit,
        )
        .optional()?;
    Ok(unit)
}

/// Overwrite `stored` with `unit`, validating the status transition and logging it.
/// `created_at` is always kept from the stored row.
pub fn update_work_unit(
    conn: &Connection,
    stored: &WorkUnit,
    unit: &WorkUnit,
) -> StoreResult<WorkUnit> {
    transition_state(stored.status, unit.status).map_err(|source| {
        StoreError::InvalidTransition {
            chunk: unit.chunk.clone(),
            source,
        }
    })?;

    let now = Utc::now();
    let mut updated = unit.clone();
    updated.created_at = stored.created_at;
    updated.updated_at = now;

    conn.execute(
        "UPDATE work_units SET
            phase = ?2, status = ?3, priority = ?4, blocked_by = ?5, worktree = ?6,
            session_id = ?7, attention_reason = ?8, displaced_chunk = ?9,
            completion_retries = ?10, updated_at = ?11
         WHERE chunk = ?1",
        params![
            updated.chunk,
            updated.phase.as_str(),
            updated.status.as_str(),
            updated.priority,
            serde_json::to_string(&updated.blocked_by)?,
            updated.worktree,
            updated.session_id,
            updated.attention_reason,
            updated.displaced_chunk,
            updated.completion_retries,
            format_timestamp(&now),
        ],
    )?;

    if stored.status != updated.status {
        append_status_log(conn, &updated.chunk, stored.status, updated.status)?;
    }

    Ok(updated)
}

pub fn delete_work_unit(conn: &Connection, chunk: &str) -> StoreResult<bool> {
    conn.execute("DELETE FROM status_log WHERE chunk = ?1", params![chunk])?;
    let rows = conn.execute("DELETE FROM work_units WHERE chunk = ?1", params![chunk])?;
    Ok(rows > 0)
}

pub fn list_work_units(
    conn: &Connection,
    status: Option<WorkUnitStatus>,
) -> StoreResult<Vec<WorkUnit>> {
    let units = match status {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM work_units WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
                WORK_UNIT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![status.as_str()], row_to_work_unit)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM work_units ORDER BY created_at ASC, rowid ASC",
                WORK_UNIT_COLUMNS
            ))?;
            let rows = stmt.query_map([], row_to_work_unit)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(units)
}

pub fn count_by_status(conn: &Connection) -> StoreResult<BTreeMap<String, i64>> {
    let mut counts: BTreeMap<String, i64> = WorkUnitStatus::all()
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();

    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM work_units GROUP BY status")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    for row in rows {
        let (status, count) = row?;
        counts.insert(status, count);
    }

    Ok(counts)
}

pub fn count_with_status(conn: &Connection, status: WorkUnitStatus) -> StoreResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM work_units WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn append_status_log(
    conn: &Connection,
    chunk: &str,
    old_status: WorkUnitStatus,
    new_status: WorkUnitStatus,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO status_log (chunk, old_status, new_status, timestamp)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            chunk,
            old_status.as_str(),
            new_status.as_str(),
            format_timestamp(&Utc::now()),
        ],
    )?;
    Ok(())
}

pub fn get_status_history(conn: &Connection, chunk: &str) -> StoreResult<Vec<StatusLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT chunk, old_status, new_status, timestamp
         FROM status_log WHERE chunk = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![chunk], |row| {
        let old_status: String = row.get(1)?;
        let new_status: String = row.get(2)?;
        let timestamp: String = row.get(3)?;
        Ok(StatusLogEntry {
            chunk: row.get(0)?,
            old_status: parse_column(1, &old_status)?,
            new_status: parse_column(2, &new_status)?,
            timestamp: parse_timestamp(3, &timestamp)?,
        })
    })?;

    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
