//! SQLite-backed store
//!
//! One connection behind a mutex, WAL journal. Timestamps are stored as
//! RFC 3339 strings with a fixed number of fractional digits so that string
//! order equals time order; identifiers are stored as hyphenated UUID text.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use uuid::Uuid;

use super::repository::{
    AccountRepository, ProjectRepository, UploadFilter, UploadRepository, VideoFilter,
    VideoRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    Account, AccountId, ApiProject, Cadence, ProjectId, QuotaCharge, Upload, UploadHistoryEntry,
    UploadId, UploadStatus, Video, VideoId,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        daily_quota INTEGER NOT NULL,
        quota_used_today INTEGER NOT NULL DEFAULT 0,
        quota_reset_at TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS quota_charges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id TEXT NOT NULL REFERENCES projects(id),
        cost INTEGER NOT NULL,
        used_before INTEGER NOT NULL,
        used_after INTEGER NOT NULL,
        charged_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_quota_charges_project
        ON quota_charges(project_id);

    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        channel_id TEXT,
        api_project_id TEXT NOT NULL REFERENCES projects(id),
        theme TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        upload_times TEXT NOT NULL,
        cadence INTEGER NOT NULL,
        allow_rotation INTEGER NOT NULL DEFAULT 1,
        default_tags TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS videos (
        id TEXT PRIMARY KEY,
        source_video_id TEXT NOT NULL UNIQUE,
        title TEXT,
        channel_title TEXT,
        theme TEXT NOT NULL,
        duration_seconds INTEGER NOT NULL,
        picked INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_videos_theme_picked
        ON videos(theme, picked);

    CREATE TABLE IF NOT EXISTS uploads (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL REFERENCES accounts(id),
        video_id TEXT NOT NULL REFERENCES videos(id),
        status TEXT NOT NULL,
        scheduled_for TEXT NOT NULL,
        api_project_id TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        error TEXT,
        youtube_video_id TEXT,
        run_id TEXT,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        tags TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_uploads_due
        ON uploads(status, scheduled_for);

    CREATE INDEX IF NOT EXISTS idx_uploads_account
        ON uploads(account_id);

    CREATE UNIQUE INDEX IF NOT EXISTS idx_uploads_live_video
        ON uploads(video_id) WHERE status NOT IN ('done', 'failed');

    CREATE TABLE IF NOT EXISTS upload_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        upload_id TEXT NOT NULL,
        status TEXT NOT NULL,
        run_id TEXT,
        error TEXT,
        recorded_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_upload_history_upload
        ON upload_history(upload_id);
"#;

const UPLOAD_COLUMNS: &str = "id, account_id, video_id, status, scheduled_for, api_project_id, \
     retry_count, error, youtube_video_id, run_id, title, description, tags, created_at, updated_at";

/// SQLite implementation of every repository trait
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Column codecs
// ============================================================================

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::invariant(format!("corrupt timestamp '{raw}': {e}")))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::invariant(format!("corrupt id '{raw}': {e}")))
}

fn parse_opt_id(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.as_deref().map(parse_id).transpose()
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::invariant(format!("{value} overflows storage")))
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::invariant(format!("negative counter {value}")))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

// ============================================================================
// Raw rows
// ============================================================================

struct ProjectRow {
    id: String,
    name: String,
    daily_quota: i64,
    quota_used_today: i64,
    quota_reset_at: String,
    created_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            daily_quota: row.get(2)?,
            quota_used_today: row.get(3)?,
            quota_reset_at: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_project(self) -> Result<ApiProject> {
        Ok(ApiProject {
            id: parse_id(&self.id)?,
            name: self.name,
            daily_quota: to_u64(self.daily_quota)?,
            quota_used_today: to_u64(self.quota_used_today)?,
            quota_reset_at: parse_ts(&self.quota_reset_at)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct AccountRow {
    id: String,
    display_name: String,
    channel_id: Option<String>,
    api_project_id: String,
    theme: String,
    active: bool,
    upload_times: String,
    cadence: u8,
    allow_rotation: bool,
    default_tags: String,
    created_at: String,
}

impl AccountRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            display_name: row.get(1)?,
            channel_id: row.get(2)?,
            api_project_id: row.get(3)?,
            theme: row.get(4)?,
            active: row.get(5)?,
            upload_times: row.get(6)?,
            cadence: row.get(7)?,
            allow_rotation: row.get(8)?,
            default_tags: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_account(self) -> Result<Account> {
        let upload_times: Vec<NaiveTime> = serde_json::from_str(&self.upload_times)?;
        Ok(Account {
            id: parse_id(&self.id)?,
            display_name: self.display_name,
            channel_id: self.channel_id,
            api_project_id: parse_id(&self.api_project_id)?,
            theme: self.theme,
            active: self.active,
            upload_times,
            cadence: Cadence::new(self.cadence)
                .map_err(|e| Error::invariant(format!("stored cadence invalid: {e}")))?,
            allow_rotation: self.allow_rotation,
            default_tags: serde_json::from_str(&self.default_tags)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct VideoRow {
    id: String,
    source_video_id: String,
    title: Option<String>,
    channel_title: Option<String>,
    theme: String,
    duration_seconds: u32,
    picked: bool,
    created_at: String,
}

impl VideoRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_video_id: row.get(1)?,
            title: row.get(2)?,
            channel_title: row.get(3)?,
            theme: row.get(4)?,
            duration_seconds: row.get(5)?,
            picked: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_video(self) -> Result<Video> {
        Ok(Video {
            id: parse_id(&self.id)?,
            source_video_id: self.source_video_id,
            title: self.title,
            channel_title: self.channel_title,
            theme: self.theme,
            duration_seconds: self.duration_seconds,
            picked: self.picked,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct UploadRow {
    id: String,
    account_id: String,
    video_id: String,
    status: String,
    scheduled_for: String,
    api_project_id: Option<String>,
    retry_count: u32,
    error: Option<String>,
    youtube_video_id: Option<String>,
    run_id: Option<String>,
    title: String,
    description: String,
    tags: String,
    created_at: String,
    updated_at: String,
}

impl UploadRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            video_id: row.get(2)?,
            status: row.get(3)?,
            scheduled_for: row.get(4)?,
            api_project_id: row.get(5)?,
            retry_count: row.get(6)?,
            error: row.get(7)?,
            youtube_video_id: row.get(8)?,
            run_id: row.get(9)?,
            title: row.get(10)?,
            description: row.get(11)?,
            tags: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_upload(self) -> Result<Upload> {
        Ok(Upload {
            id: parse_id(&self.id)?,
            account_id: parse_id(&self.account_id)?,
            video_id: parse_id(&self.video_id)?,
            status: self.status.parse()?,
            scheduled_for: parse_ts(&self.scheduled_for)?,
            api_project_id: parse_opt_id(self.api_project_id)?,
            retry_count: self.retry_count,
            error: self.error,
            youtube_video_id: self.youtube_video_id,
            run_id: parse_opt_id(self.run_id)?,
            title: self.title,
            description: self.description,
            tags: serde_json::from_str(&self.tags)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

fn collect<R, T>(
    rows: impl Iterator<Item = rusqlite::Result<R>>,
    convert: impl Fn(R) -> Result<T>,
) -> Result<Vec<T>> {
    rows.map(|row| convert(row?)).collect()
}

// ============================================================================
// Trait implementations
// ============================================================================

impl ProjectRepository for SqliteStore {
    fn insert_project(&self, project: &ApiProject) -> Result<()> {
        self.conn().execute(
            "INSERT INTO projects (id, name, daily_quota, quota_used_today, quota_reset_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project.id.to_string(),
                project.name,
                to_i64(project.daily_quota)?,
                to_i64(project.quota_used_today)?,
                ts(project.quota_reset_at),
                ts(project.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_project(&self, id: ProjectId) -> Result<Option<ApiProject>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, name, daily_quota, quota_used_today, quota_reset_at, created_at
                 FROM projects WHERE id = ?1",
                params![id.to_string()],
                ProjectRow::from_row,
            )
            .optional()?;
        row.map(ProjectRow::into_project).transpose()
    }

    fn list_projects(&self) -> Result<Vec<ApiProject>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, daily_quota, quota_used_today, quota_reset_at, created_at
             FROM projects ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], ProjectRow::from_row)?;
        collect(rows, ProjectRow::into_project)
    }

    fn save_quota(&self, id: ProjectId, used: u64, reset_at: DateTime<Utc>) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE projects SET quota_used_today = ?2, quota_reset_at = ?3 WHERE id = ?1",
            params![id.to_string(), to_i64(used)?, ts(reset_at)],
        )?;
        if updated == 0 {
            return Err(Error::not_found("project", id));
        }
        Ok(())
    }

    fn take_quota(&self, id: ProjectId, cost: u64) -> Result<Option<u64>> {
        let used = self
            .conn()
            .query_row(
                "UPDATE projects SET quota_used_today = quota_used_today + ?2
                 WHERE id = ?1 AND quota_used_today + ?2 <= daily_quota
                 RETURNING quota_used_today",
                params![id.to_string(), to_i64(cost)?],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        used.map(to_u64).transpose()
    }

    fn return_quota(&self, id: ProjectId, cost: u64) -> Result<u64> {
        let used = self
            .conn()
            .query_row(
                "UPDATE projects SET quota_used_today = MAX(quota_used_today - ?2, 0)
                 WHERE id = ?1
                 RETURNING quota_used_today",
                params![id.to_string(), to_i64(cost)?],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .ok_or_else(|| Error::not_found("project", id))?;
        to_u64(used)
    }

    fn record_charge(&self, charge: &QuotaCharge) -> Result<()> {
        self.conn().execute(
            "INSERT INTO quota_charges (project_id, cost, used_before, used_after, charged_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                charge.project_id.to_string(),
                to_i64(charge.cost)?,
                to_i64(charge.used_before)?,
                to_i64(charge.used_after)?,
                ts(charge.charged_at),
            ],
        )?;
        Ok(())
    }

    fn list_charges(&self, project_id: ProjectId) -> Result<Vec<QuotaCharge>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT cost, used_before, used_after, charged_at FROM quota_charges
             WHERE project_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![project_id.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        collect(rows, |(cost, before, after, at)| {
            Ok(QuotaCharge {
                project_id,
                cost: to_u64(cost)?,
                used_before: to_u64(before)?,
                used_after: to_u64(after)?,
                charged_at: parse_ts(&at)?,
            })
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, display_name, channel_id, api_project_id, theme, active, \
     upload_times, cadence, allow_rotation, default_tags, created_at";

impl AccountRepository for SqliteStore {
    fn insert_account(&self, account: &Account) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO accounts ({ACCOUNT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                account.id.to_string(),
                account.display_name,
                account.channel_id,
                account.api_project_id.to_string(),
                account.theme,
                account.active,
                serde_json::to_string(&account.upload_times)?,
                u8::from(account.cadence),
                account.allow_rotation,
                serde_json::to_string(&account.default_tags)?,
                ts(account.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id.to_string()],
                AccountRow::from_row,
            )
            .optional()?;
        row.map(AccountRow::into_account).transpose()
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at DESC, id ASC"
        ))?;
        let rows = stmt.query_map([], AccountRow::from_row)?;
        collect(rows, AccountRow::into_account)
    }

    fn set_account_active(&self, id: AccountId, active: bool) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE accounts SET active = ?2 WHERE id = ?1",
            params![id.to_string(), active],
        )?;
        Ok(updated > 0)
    }
}

const VIDEO_COLUMNS: &str =
    "id, source_video_id, title, channel_title, theme, duration_seconds, picked, created_at";

impl VideoRepository for SqliteStore {
    fn upsert_video(&self, video: &Video) -> Result<Video> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO videos ({VIDEO_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(source_video_id) DO UPDATE SET
                    title = excluded.title,
                    channel_title = excluded.channel_title,
                    duration_seconds = excluded.duration_seconds"
            ),
            params![
                video.id.to_string(),
                video.source_video_id,
                video.title,
                video.channel_title,
                video.theme,
                video.duration_seconds,
                video.picked,
                ts(video.created_at),
            ],
        )?;
        let row = conn.query_row(
            &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE source_video_id = ?1"),
            params![video.source_video_id],
            VideoRow::from_row,
        )?;
        row.into_video()
    }

    fn get_video(&self, id: VideoId) -> Result<Option<Video>> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"),
                params![id.to_string()],
                VideoRow::from_row,
            )
            .optional()?;
        row.map(VideoRow::into_video).transpose()
    }

    fn list_videos(&self, filter: &VideoFilter) -> Result<Vec<Video>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos
             WHERE (?1 IS NULL OR theme = ?1) AND (?2 IS NULL OR picked = ?2)
             ORDER BY created_at DESC, id ASC
             LIMIT ?3"
        ))?;
        let limit = filter.limit.map_or(-1, |l| l as i64);
        let rows = stmt.query_map(
            params![filter.theme, filter.picked, limit],
            VideoRow::from_row,
        )?;
        collect(rows, VideoRow::into_video)
    }

    fn mark_video_picked(&self, id: VideoId) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE videos SET picked = 1 WHERE id = ?1 AND picked = 0",
            params![id.to_string()],
        )?;
        Ok(updated > 0)
    }

    fn unmark_video_picked(&self, id: VideoId) -> Result<()> {
        self.conn().execute(
            "UPDATE videos SET picked = 0 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }
}

impl UploadRepository for SqliteStore {
    fn insert_upload(&self, upload: &Upload) -> Result<()> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO uploads ({UPLOAD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                upload.id.to_string(),
                upload.account_id.to_string(),
                upload.video_id.to_string(),
                upload.status.as_str(),
                ts(upload.scheduled_for),
                upload.api_project_id.map(|id| id.to_string()),
                upload.retry_count,
                upload.error,
                upload.youtube_video_id,
                upload.run_id.map(|id| id.to_string()),
                upload.title,
                upload.description,
                serde_json::to_string(&upload.tags)?,
                ts(upload.created_at),
                ts(upload.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::VideoAlreadyPicked {
                video_id: upload.video_id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn get_upload(&self, id: UploadId) -> Result<Option<Upload>> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE id = ?1"),
                params![id.to_string()],
                UploadRow::from_row,
            )
            .optional()?;
        row.map(UploadRow::into_upload).transpose()
    }

    fn list_uploads(&self, filter: &UploadFilter) -> Result<Vec<Upload>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads
             WHERE (?1 IS NULL OR account_id = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY scheduled_for DESC, id ASC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![
                filter.account_id.map(|id| id.to_string()),
                filter.status.map(|s| s.as_str()),
                filter.limit as i64,
            ],
            UploadRow::from_row,
        )?;
        collect(rows, UploadRow::into_upload)
    }

    fn due_uploads(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Upload>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads
             WHERE status IN ('scheduled', 'retry') AND scheduled_for <= ?1
             ORDER BY scheduled_for ASC, id ASC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![ts(now), limit as i64], UploadRow::from_row)?;
        collect(rows, UploadRow::into_upload)
    }

    fn update_if_status(&self, upload: &Upload, expected: UploadStatus) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE uploads SET
                status = ?3, scheduled_for = ?4, api_project_id = ?5, retry_count = ?6,
                error = ?7, youtube_video_id = ?8, run_id = ?9, title = ?10,
                description = ?11, tags = ?12, updated_at = ?13
             WHERE id = ?1 AND status = ?2",
            params![
                upload.id.to_string(),
                expected.as_str(),
                upload.status.as_str(),
                ts(upload.scheduled_for),
                upload.api_project_id.map(|id| id.to_string()),
                upload.retry_count,
                upload.error,
                upload.youtube_video_id,
                upload.run_id.map(|id| id.to_string()),
                upload.title,
                upload.description,
                serde_json::to_string(&upload.tags)?,
                ts(upload.updated_at),
            ],
        )?;
        Ok(updated > 0)
    }

    fn delete_if_status(&self, id: UploadId, expected: UploadStatus) -> Result<bool> {
        let deleted = self.conn().execute(
            "DELETE FROM uploads WHERE id = ?1 AND status = ?2",
            params![id.to_string(), expected.as_str()],
        )?;
        Ok(deleted > 0)
    }

    fn account_slots(&self, account_id: AccountId) -> Result<Vec<(UploadId, DateTime<Utc>)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, scheduled_for FROM uploads
             WHERE account_id = ?1 AND status NOT IN ('done', 'failed')",
        )?;
        let rows = stmt.query_map(params![account_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        collect(rows, |(id, at)| Ok((parse_id(&id)?, parse_ts(&at)?)))
    }

    fn count_by_status(&self) -> Result<BTreeMap<UploadStatus, usize>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM uploads GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let pairs = collect(rows, |(status, count)| {
            Ok((status.parse::<UploadStatus>()?, count as usize))
        })?;
        Ok(pairs.into_iter().collect())
    }

    fn count_created_since(&self, since: DateTime<Utc>) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM uploads WHERE created_at >= ?1",
            params![ts(since)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn append_history(&self, entry: &UploadHistoryEntry) -> Result<()> {
        self.conn().execute(
            "INSERT INTO upload_history (upload_id, status, run_id, error, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.upload_id.to_string(),
                entry.status.as_str(),
                entry.run_id.map(|id| id.to_string()),
                entry.error,
                ts(entry.recorded_at),
            ],
        )?;
        Ok(())
    }

    fn history(&self, upload_id: UploadId) -> Result<Vec<UploadHistoryEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT status, run_id, error, recorded_at FROM upload_history
             WHERE upload_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![upload_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        collect(rows, |(status, run_id, error, at)| {
            Ok(UploadHistoryEntry {
                upload_id,
                status: status.parse()?,
                run_id: parse_opt_id(run_id)?,
                error,
                recorded_at: parse_ts(&at)?,
            })
        })
    }
}
