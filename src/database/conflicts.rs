// Conflict analysis cache operations

use super::{format_timestamp, parse_column, parse_json_list, parse_timestamp, StoreResult};
use crate::models::conflict::normalize_pair;
use crate::models::{ConflictAnalysis, ConflictVerdict};
use rusqlite::{params, Connection, OptionalExtension, Row};

const CONFLICT_COLUMNS: &str = "chunk_a, chunk_b, verdict, confidence, reason, analysis_stage,
    overlapping_files, overlapping_symbols, created_at";

fn row_to_analysis(row: &Row) -> rusqlite::Result<ConflictAnalysis> {
    let verdict: String = row.get(2)?;
    let stage: String = row.get(5)?;
    let files: String = row.get(6)?;
    let symbols: String = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(ConflictAnalysis {
        chunk_a: row.get(0)?,
        chunk_b: row.get(1)?,
        verdict: parse_column(2, &verdict)?,
        confidence: row.get(3)?,
        reason: row.get(4)?,
        analysis_stage: parse_column(5, &stage)?,
        overlapping_files: parse_json_list(6, &files)?,
        overlapping_symbols: parse_json_list(7, &symbols)?,
        created_at: parse_timestamp(8, &created_at)?,
    })
}

/// Upsert on the normalized pair; at most one row per unordered pair.
pub fn save_conflict_analysis(conn: &Connection, analysis: &ConflictAnalysis) -> StoreResult<()> {
    let (a, b) = normalize_pair(&analysis.chunk_a, &analysis.chunk_b);
    conn.execute(
        "INSERT INTO conflict_analyses (
            chunk_a, chunk_b, verdict, confidence, reason, analysis_stage,
            overlapping_files, overlapping_symbols, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(chunk_a, chunk_b) DO UPDATE SET
            verdict = excluded.verdict,
            confidence = excluded.confidence,
            reason = excluded.reason,
            analysis_stage = excluded.analysis_stage,
            overlapping_files = excluded.overlapping_files,
            overlapping_symbols = excluded.overlapping_symbols,
            created_at = excluded.created_at",
        params![
            a,
            b,
            analysis.verdict.as_str(),
            analysis.confidence,
            analysis.reason,
            analysis.analysis_stage.as_str(),
            serde_json::to_string(&analysis.overlapping_files)?,
            serde_json::to_string(&analysis.overlapping_symbols)?,
            format_timestamp(&analysis.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_conflict_analysis(
    conn: &Connection,
    chunk_a: &str,
    chunk_b: &str,
) -> StoreResult<Option<ConflictAnalysis>> {
    let (a, b) = normalize_pair(chunk_a, chunk_b);
    let analysis = conn
        .query_row(
            &format!(
                "SELECT {} FROM conflict_analyses WHERE chunk_a = ?1 AND chunk_b = ?2",
                CONFLICT_COLUMNS
            ),
            params![a, b],
            row_to_analysis,
        )
        .optional()?;
    Ok(analysis)
}

pub fn list_conflicts_for_chunk(conn: &Connection, chunk: &str) -> StoreResult<Vec<ConflictAnalysis>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM conflict_analyses
         WHERE chunk_a = ?1 OR chunk_b = ?1
         ORDER BY created_at ASC, rowid ASC",
        CONFLICT_COLUMNS
    ))?;
    let rows = stmt.query_map(params![chunk], row_to_analysis)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn clear_conflicts_for_chunk(conn: &Connection, chunk: &str) -> StoreResult<usize> {
    let removed = conn.execute(
        "DELETE FROM conflict_analyses WHERE chunk_a = ?1 OR chunk_b = ?1",
        params![chunk],
    )?;
    Ok(removed)
}

pub fn list_all_conflicts(
    conn: &Connection,
    verdict: Option<ConflictVerdict>,
) -> StoreResult<Vec<ConflictAnalysis>> {
    let analyses = match verdict {
        Some(verdict) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM conflict_analyses WHERE verdict = ?1
                 ORDER BY created_at ASC, rowid ASC",
                CONFLICT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![verdict.as_str()], row_to_analysis)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM conflict_analyses ORDER BY created_at ASC, rowid ASC",
                CONFLICT_COLUMNS
            ))?;
            let rows = stmt.query_map([], row_to_analysis)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(analyses)
}
