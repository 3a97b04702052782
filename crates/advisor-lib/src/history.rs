//! Per-user job history store
//!
//! Embedded SQLite database under the user's home directory holding two
//! logical collections: raw run records and per-script aggregate patterns.
//! A run insert and its pattern upsert commit in the same transaction; every
//! returned value is copied out. One process holds the writer; WAL mode
//! keeps concurrent readers safe.

use crate::error::{AdvisorError, Result};
use crate::models::{Bottleneck, JobEfficiencyData, JobPattern, JobRequest, Venue, WorkloadType};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Directory under the user's home that owns all persisted advisor state.
const DATA_DIR: &str = ".asba";
const DB_FILE: &str = "jobs.db";

/// Exact-fingerprint result cap for similarity lookups.
const EXACT_MATCH_LIMIT: u32 = 20;
/// Widened resource-shape result cap when exact matches are scarce.
const SHAPE_MATCH_LIMIT: u32 = 10;
/// Below this many exact matches the lookup widens to resource shape.
const EXACT_MATCH_FLOOR: usize = 3;

pub struct JobHistoryStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl JobHistoryStore {
    /// Open (or create) the store for the given user at `~/.asba/jobs.db`.
    pub fn open_for_user(username: &str) -> Result<Self> {
        if username.is_empty() {
            return Err(AdvisorError::validation(
                "JobHistoryStore::open_for_user",
                "username cannot be empty",
            ));
        }
        let home = dirs::home_dir().ok_or_else(|| AdvisorError::Permission {
            operation: "JobHistoryStore::open_for_user".to_string(),
            message: "cannot determine home directory".to_string(),
            source: None,
        })?;
        Self::open_at(&home.join(DATA_DIR).join(DB_FILE))
    }

    /// Open the store at an explicit path. Used by tests and tooling.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AdvisorError::Permission {
                operation: "JobHistoryStore::open_at".to_string(),
                message: format!("failed to create {}", parent.display()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AdvisorError::store("JobHistoryStore::open_at", "failed to open database", e))?;

        // WAL for concurrent readers; the busy timeout lets a second opener
        // observe a transient lock instead of corruption.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AdvisorError::store("JobHistoryStore::open_at", "failed to enable WAL", e))?;
        conn.busy_timeout(Duration::from_secs(30))
            .map_err(|e| AdvisorError::store("JobHistoryStore::open_at", "failed to set busy timeout", e))?;

        init_schema(&conn)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        info!(path = %path.display(), "job history store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Insert or replace a run by job id and fold it into the pattern for its
    /// script fingerprint in the same transaction. Re-inserting the same job
    /// id replaces the record without touching the pattern, so insertion is
    /// idempotent end to end.
    pub fn insert(&self, run: &JobEfficiencyData) -> Result<()> {
        run.validate()?;

        let mut conn = self.conn.lock().expect("history store lock poisoned");
        let tx = conn
            .transaction()
            .map_err(|e| AdvisorError::store("JobHistoryStore::insert", "failed to begin transaction", e))?;

        let already_present: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM job_history WHERE job_id = ?1)",
                [&run.job_id],
                |row| row.get(0),
            )
            .map_err(|e| AdvisorError::store("JobHistoryStore::insert", "failed to check for existing run", e))?;

        tx.execute(
            "INSERT OR REPLACE INTO job_history (
                job_id, job_name, user, script_path, script_hash, submission_time,
                req_cpus, req_memory_mb, req_gpus, req_time_seconds, req_cpu_mem_ratio,
                actual_time_seconds, max_memory_mb, total_cpu_seconds, cpu_time_available,
                cpu_efficiency, memory_efficiency, time_efficiency, effective_cpus, actual_cpu_mem_ratio,
                partition, exit_code, queue_wait_seconds, execution_platform,
                workload_type, bottleneck_type
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
            params![
                run.job_id,
                run.job_name,
                run.user,
                run.script_path,
                run.script_hash,
                run.submission_time.timestamp(),
                run.requested_cpus,
                run.requested_memory_mb,
                run.requested_gpus,
                run.requested_time.as_secs() as i64,
                run.requested_cpu_mem_ratio,
                run.actual_time.as_secs() as i64,
                run.max_memory_used_mb,
                run.total_cpu_time.as_secs() as i64,
                run.cpu_time_available.as_secs() as i64,
                run.cpu_efficiency,
                run.memory_efficiency,
                run.time_efficiency,
                run.effective_cpus,
                run.actual_cpu_mem_ratio,
                run.partition,
                run.exit_code,
                run.queue_wait.as_secs() as i64,
                venue_str(run.execution_platform),
                run.workload_type.as_str(),
                run.bottleneck.as_str(),
            ],
        )
        .map_err(|e| AdvisorError::store("JobHistoryStore::insert", "failed to store run", e))?;

        if !already_present && !run.script_hash.is_empty() {
            let existing = query_pattern(&tx, &run.script_hash)?;
            let pattern = match existing {
                Some(mut pattern) => {
                    pattern.absorb(run);
                    pattern
                }
                None => JobPattern::from_run(run),
            };
            upsert_pattern(&tx, &pattern)?;
        }

        tx.commit()
            .map_err(|e| AdvisorError::store("JobHistoryStore::insert", "failed to commit", e))?;

        debug!(job_id = %run.job_id, script_hash = %run.script_hash, "run recorded");
        Ok(())
    }

    /// Successful runs with the exact script fingerprint, newest first,
    /// widened by resource shape when fewer than three exact hits exist.
    pub fn find_similar(
        &self,
        fingerprint: &str,
        request: &JobRequest,
    ) -> Result<Vec<JobEfficiencyData>> {
        let conn = self.conn.lock().expect("history store lock poisoned");

        let mut runs = query_by_fingerprint(&conn, fingerprint)?;

        if runs.len() < EXACT_MATCH_FLOOR {
            let widened = query_by_resource_shape(&conn, fingerprint, request)?;
            runs.extend(widened);
        }

        Ok(runs)
    }

    /// Every stored pattern, most recently run first.
    pub fn patterns(&self) -> Result<Vec<JobPattern>> {
        let conn = self.conn.lock().expect("history store lock poisoned");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PATTERN_COLUMNS} FROM job_patterns ORDER BY last_run DESC"
            ))
            .map_err(|e| AdvisorError::store("JobHistoryStore::patterns", "failed to prepare query", e))?;
        let rows = stmt
            .query_map([], pattern_from_row)
            .map_err(|e| AdvisorError::store("JobHistoryStore::patterns", "failed to query patterns", e))?;

        let mut patterns = Vec::new();
        for row in rows {
            patterns.push(row.map_err(|e| {
                AdvisorError::store("JobHistoryStore::patterns", "failed to read pattern row", e)
            })?);
        }
        Ok(patterns)
    }

    /// The pattern for one script fingerprint, if any runs were recorded.
    pub fn pattern(&self, fingerprint: &str) -> Result<Option<JobPattern>> {
        let conn = self.conn.lock().expect("history store lock poisoned");
        query_pattern(&conn, fingerprint)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("history store lock poisoned");
        conn.query_row("SELECT COUNT(*) FROM job_history", [], |row| row.get(0))
            .map_err(|e| AdvisorError::store("JobHistoryStore::count", "failed to count runs", e))
    }

    /// Size of the store file in bytes.
    pub fn size(&self) -> Result<u64> {
        std::fs::metadata(&self.path)
            .map(|meta| meta.len())
            .map_err(|e| AdvisorError::Permission {
                operation: "JobHistoryStore::size".to_string(),
                message: format!("failed to stat {}", self.path.display()),
                source: Some(e),
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the writer lock. Dropping the store has the same effect.
    pub fn close(self) {
        drop(self);
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS job_history (
            job_id TEXT PRIMARY KEY,
            job_name TEXT NOT NULL DEFAULT '',
            user TEXT NOT NULL DEFAULT '',
            script_path TEXT NOT NULL DEFAULT '',
            script_hash TEXT NOT NULL DEFAULT '',
            submission_time INTEGER NOT NULL,

            req_cpus INTEGER NOT NULL,
            req_memory_mb INTEGER NOT NULL,
            req_gpus INTEGER NOT NULL DEFAULT 0,
            req_time_seconds INTEGER NOT NULL,
            req_cpu_mem_ratio REAL,

            actual_time_seconds INTEGER NOT NULL,
            max_memory_mb INTEGER NOT NULL,
            total_cpu_seconds INTEGER NOT NULL,
            cpu_time_available INTEGER NOT NULL,

            cpu_efficiency REAL NOT NULL,
            memory_efficiency REAL NOT NULL,
            time_efficiency REAL NOT NULL,
            effective_cpus REAL NOT NULL,
            actual_cpu_mem_ratio REAL NOT NULL,

            partition TEXT NOT NULL DEFAULT '',
            exit_code INTEGER NOT NULL,
            queue_wait_seconds INTEGER NOT NULL DEFAULT 0,
            execution_platform TEXT NOT NULL DEFAULT 'local',

            workload_type TEXT NOT NULL,
            bottleneck_type TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_script_hash ON job_history(script_hash);
        CREATE INDEX IF NOT EXISTS idx_submission_time ON job_history(submission_time);
        CREATE INDEX IF NOT EXISTS idx_workload_type ON job_history(workload_type);

        CREATE TABLE IF NOT EXISTS job_patterns (
            script_hash TEXT PRIMARY KEY,
            script_name TEXT NOT NULL DEFAULT '',
            run_count INTEGER NOT NULL,
            last_run INTEGER NOT NULL,

            avg_cpu_efficiency REAL NOT NULL,
            typical_effective_cpus REAL NOT NULL,
            avg_memory_efficiency REAL NOT NULL,
            typical_memory_usage_gb REAL NOT NULL,
            avg_requested_ratio REAL NOT NULL,
            avg_actual_ratio REAL NOT NULL,
            workload_type TEXT NOT NULL,

            avg_runtime_seconds INTEGER NOT NULL,
            success_rate REAL NOT NULL,

            local_executions INTEGER NOT NULL DEFAULT 0,
            cloud_executions INTEGER NOT NULL DEFAULT 0,
            preferred_platform TEXT NOT NULL DEFAULT 'local'
        );

        CREATE INDEX IF NOT EXISTS idx_pattern_last_run ON job_patterns(last_run);
        ",
    )
    .map_err(|e| AdvisorError::store("init_schema", "failed to create schema", e))
}

const RUN_COLUMNS: &str = "job_id, job_name, user, script_path, script_hash, submission_time, \
     req_cpus, req_memory_mb, req_gpus, req_time_seconds, req_cpu_mem_ratio, \
     actual_time_seconds, max_memory_mb, total_cpu_seconds, cpu_time_available, \
     cpu_efficiency, memory_efficiency, time_efficiency, effective_cpus, actual_cpu_mem_ratio, \
     partition, exit_code, queue_wait_seconds, execution_platform, workload_type, bottleneck_type";

const PATTERN_COLUMNS: &str = "script_hash, script_name, run_count, last_run, \
     avg_cpu_efficiency, typical_effective_cpus, avg_memory_efficiency, typical_memory_usage_gb, \
     avg_requested_ratio, avg_actual_ratio, workload_type, avg_runtime_seconds, success_rate, \
     local_executions, cloud_executions, preferred_platform";

fn query_by_fingerprint(conn: &Connection, fingerprint: &str) -> Result<Vec<JobEfficiencyData>> {
    if fingerprint.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM job_history
             WHERE script_hash = ?1 AND exit_code = 0
             ORDER BY submission_time DESC LIMIT {EXACT_MATCH_LIMIT}"
        ))
        .map_err(|e| AdvisorError::store("find_similar", "failed to prepare fingerprint query", e))?;
    let rows = stmt
        .query_map([fingerprint], run_from_row)
        .map_err(|e| AdvisorError::store("find_similar", "failed to query by fingerprint", e))?;
    collect_runs(rows)
}

fn query_by_resource_shape(
    conn: &Connection,
    fingerprint: &str,
    request: &JobRequest,
) -> Result<Vec<JobEfficiencyData>> {
    let total_cpus = request.total_cpus() as f64;
    let cpu_min = (total_cpus * 0.5) as i64;
    let cpu_max = (total_cpus * 2.0) as i64;

    // The ratio filter only applies when the caller's request implies one.
    let (ratio_min, ratio_max) = match request.requested_gb_per_cpu() {
        Some(ratio) => (ratio * 0.5, ratio * 2.0),
        None => (0.0, f64::MAX),
    };

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM job_history
             WHERE exit_code = 0
               AND script_hash != ?1
               AND req_cpus BETWEEN ?2 AND ?3
               AND (req_cpu_mem_ratio IS NULL OR req_cpu_mem_ratio BETWEEN ?4 AND ?5)
             ORDER BY submission_time DESC LIMIT {SHAPE_MATCH_LIMIT}"
        ))
        .map_err(|e| AdvisorError::store("find_similar", "failed to prepare shape query", e))?;
    let rows = stmt
        .query_map(
            params![fingerprint, cpu_min, cpu_max, ratio_min, ratio_max],
            run_from_row,
        )
        .map_err(|e| AdvisorError::store("find_similar", "failed to query by shape", e))?;
    collect_runs(rows)
}

fn collect_runs(
    rows: impl Iterator<Item = rusqlite::Result<JobEfficiencyData>>,
) -> Result<Vec<JobEfficiencyData>> {
    let mut runs = Vec::new();
    for row in rows {
        match row {
            Ok(run) => runs.push(run),
            Err(e) => {
                warn!(error = %e, "skipping unreadable history row");
            }
        }
    }
    Ok(runs)
}

fn query_pattern(conn: &Connection, fingerprint: &str) -> Result<Option<JobPattern>> {
    conn.query_row(
        &format!("SELECT {PATTERN_COLUMNS} FROM job_patterns WHERE script_hash = ?1"),
        [fingerprint],
        pattern_from_row,
    )
    .optional()
    .map_err(|e| AdvisorError::store("query_pattern", "failed to read pattern", e))
}

fn upsert_pattern(conn: &Connection, pattern: &JobPattern) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO job_patterns (
            script_hash, script_name, run_count, last_run,
            avg_cpu_efficiency, typical_effective_cpus, avg_memory_efficiency,
            typical_memory_usage_gb, avg_requested_ratio, avg_actual_ratio, workload_type,
            avg_runtime_seconds, success_rate, local_executions, cloud_executions,
            preferred_platform
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            pattern.script_hash,
            pattern.script_name,
            pattern.run_count,
            pattern.last_run.timestamp(),
            pattern.avg_cpu_efficiency,
            pattern.typical_effective_cpus,
            pattern.avg_memory_efficiency,
            pattern.typical_memory_usage_gb,
            pattern.avg_requested_ratio,
            pattern.avg_actual_ratio,
            pattern.workload_type.as_str(),
            pattern.avg_runtime.as_secs() as i64,
            pattern.success_rate,
            pattern.local_executions,
            pattern.cloud_executions,
            venue_str(pattern.preferred_platform),
        ],
    )
    .map_err(|e| AdvisorError::store("upsert_pattern", "failed to store pattern", e))?;
    Ok(())
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<JobEfficiencyData> {
    Ok(JobEfficiencyData {
        job_id: row.get(0)?,
        job_name: row.get(1)?,
        user: row.get(2)?,
        script_path: row.get(3)?,
        script_hash: row.get(4)?,
        submission_time: unix_time(row.get(5)?),
        requested_cpus: row.get(6)?,
        requested_memory_mb: row.get(7)?,
        requested_gpus: row.get(8)?,
        requested_time: Duration::from_secs(row.get::<_, i64>(9)?.max(0) as u64),
        requested_cpu_mem_ratio: row.get::<_, Option<f64>>(10)?.unwrap_or(0.0),
        actual_time: Duration::from_secs(row.get::<_, i64>(11)?.max(0) as u64),
        max_memory_used_mb: row.get(12)?,
        total_cpu_time: Duration::from_secs(row.get::<_, i64>(13)?.max(0) as u64),
        cpu_time_available: Duration::from_secs(row.get::<_, i64>(14)?.max(0) as u64),
        cpu_efficiency: row.get(15)?,
        memory_efficiency: row.get(16)?,
        time_efficiency: row.get(17)?,
        effective_cpus: row.get(18)?,
        actual_cpu_mem_ratio: row.get(19)?,
        partition: row.get(20)?,
        exit_code: row.get(21)?,
        queue_wait: Duration::from_secs(row.get::<_, i64>(22)?.max(0) as u64),
        execution_platform: parse_venue(&row.get::<_, String>(23)?),
        workload_type: WorkloadType::parse(&row.get::<_, String>(24)?),
        bottleneck: Bottleneck::parse(&row.get::<_, String>(25)?),
    })
}

fn pattern_from_row(row: &Row<'_>) -> rusqlite::Result<JobPattern> {
    Ok(JobPattern {
        script_hash: row.get(0)?,
        script_name: row.get(1)?,
        run_count: row.get(2)?,
        last_run: unix_time(row.get(3)?),
        avg_cpu_efficiency: row.get(4)?,
        typical_effective_cpus: row.get(5)?,
        avg_memory_efficiency: row.get(6)?,
        typical_memory_usage_gb: row.get(7)?,
        avg_requested_ratio: row.get(8)?,
        avg_actual_ratio: row.get(9)?,
        workload_type: WorkloadType::parse(&row.get::<_, String>(10)?),
        avg_runtime: Duration::from_secs(row.get::<_, i64>(11)?.max(0) as u64),
        success_rate: row.get(12)?,
        local_executions: row.get(13)?,
        cloud_executions: row.get(14)?,
        preferred_platform: parse_venue(&row.get::<_, String>(15)?),
    })
}

fn unix_time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn venue_str(venue: Venue) -> &'static str {
    match venue {
        Venue::Local => "local",
        Venue::Cloud => "cloud",
    }
}

fn parse_venue(value: &str) -> Venue {
    if value == "cloud" {
        Venue::Cloud
    } else {
        Venue::Local
    }
}
