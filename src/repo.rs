use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("store error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Thread documents, one collection per board. A board's collection springs
/// into existence on its first insert.
#[async_trait]
pub trait ThreadRepo: Send + Sync {
    async fn insert_thread(&self, board: &str, new: NewThread) -> RepoResult<ThreadRecord>;
    /// Latest-bumped first, at most `limit`.
    async fn recent_threads(&self, board: &str, limit: usize) -> RepoResult<Vec<ThreadRecord>>;
    async fn get_thread(&self, board: &str, id: PostId) -> RepoResult<ThreadRecord>;
    async fn report_thread(&self, board: &str, id: PostId) -> RepoResult<()>;
    /// Hard delete; the thread and its replies are gone.
    async fn delete_thread(&self, board: &str, id: PostId) -> RepoResult<()>;
}

#[async_trait]
pub trait ReplyRepo: Send + Sync {
    /// Appends and bumps the parent thread in one step.
    async fn push_reply(&self, board: &str, thread_id: PostId, new: NewReply) -> RepoResult<ReplyRecord>;
    async fn get_reply(&self, board: &str, thread_id: PostId, reply_id: PostId) -> RepoResult<ReplyRecord>;
    async fn report_reply(&self, board: &str, thread_id: PostId, reply_id: PostId) -> RepoResult<()>;
    /// Overwrites the text only; the reply row stays.
    async fn set_reply_text(&self, board: &str, thread_id: PostId, reply_id: PostId, text: &str) -> RepoResult<()>;
}

pub trait Repo: ThreadRepo + ReplyRepo {}

impl<T> Repo for T where T: ThreadRepo + ReplyRepo {}

/// A store scoped to one board.
#[derive(Clone, Copy)]
pub struct BoardHandle<'a> {
    repo: &'a dyn Repo,
    board: &'a str,
}

pub fn with_board<'a>(repo: &'a dyn Repo, board: &'a str) -> BoardHandle<'a> {
    BoardHandle { repo, board }
}

impl<'a> BoardHandle<'a> {
    pub fn name(&self) -> &'a str { self.board }

    pub async fn insert_thread(&self, new: NewThread) -> RepoResult<ThreadRecord> { self.repo.insert_thread(self.board, new).await }
    pub async fn recent_threads(&self, limit: usize) -> RepoResult<Vec<ThreadRecord>> { self.repo.recent_threads(self.board, limit).await }
    pub async fn get_thread(&self, id: PostId) -> RepoResult<ThreadRecord> { self.repo.get_thread(self.board, id).await }
    pub async fn report_thread(&self, id: PostId) -> RepoResult<()> { self.repo.report_thread(self.board, id).await }
    pub async fn delete_thread(&self, id: PostId) -> RepoResult<()> { self.repo.delete_thread(self.board, id).await }

    pub async fn push_reply(&self, thread_id: PostId, new: NewReply) -> RepoResult<ReplyRecord> { self.repo.push_reply(self.board, thread_id, new).await }
    pub async fn get_reply(&self, thread_id: PostId, reply_id: PostId) -> RepoResult<ReplyRecord> { self.repo.get_reply(self.board, thread_id, reply_id).await }
    pub async fn report_reply(&self, thread_id: PostId, reply_id: PostId) -> RepoResult<()> { self.repo.report_reply(self.board, thread_id, reply_id).await }
    pub async fn set_reply_text(&self, thread_id: PostId, reply_id: PostId, text: &str) -> RepoResult<()> {
        self.repo.set_reply_text(self.board, thread_id, reply_id, text).await
    }
}

/// Store handle filled once, possibly after the server is already taking
/// requests. Cloning shares the same slot.
#[derive(Clone, Default)]
pub struct StoreSlot {
    inner: Arc<OnceCell<Arc<dyn Repo>>>,
}

impl StoreSlot {
    pub fn empty() -> Self { Self::default() }

    pub fn ready(repo: Arc<dyn Repo>) -> Self {
        let slot = Self::default();
        slot.fill(repo);
        slot
    }

    /// Returns false when the slot was already filled.
    pub fn fill(&self, repo: Arc<dyn Repo>) -> bool {
        self.inner.set(repo).is_ok()
    }

    pub fn get(&self) -> Option<Arc<dyn Repo>> {
        self.inner.get().cloned()
    }
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::RwLock;
    use tracing::{error, info, warn};

    #[derive(Clone, Default, Serialize, Deserialize)]
    struct State {
        boards: HashMap<String, Vec<ThreadRecord>>,
    }

    impl State {
        fn thread_mut(&mut self, board: &str, id: PostId) -> RepoResult<&mut ThreadRecord> {
            self.boards
                .get_mut(board)
                .and_then(|threads| threads.iter_mut().find(|t| t.id == id))
                .ok_or(RepoError::NotFound)
        }

        fn thread(&self, board: &str, id: PostId) -> RepoResult<&ThreadRecord> {
            self.boards
                .get(board)
                .and_then(|threads| threads.iter().find(|t| t.id == id))
                .ok_or(RepoError::NotFound)
        }
    }

    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Process-local store, nothing written to disk.
        pub fn new() -> Self { Self::default() }

        /// Store backed by a JSON snapshot at `<dir>/state.json`, loaded now
        /// and rewritten after every mutation.
        pub fn open(dir: impl AsRef<Path>) -> Self {
            let path = dir.as_ref().join("state.json");
            let state = Self::load_state_from(&path);
            Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        warn!("failed to parse snapshot '{}': {e}, starting empty", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    info!("no snapshot at '{}' ({e}), starting empty", path.display());
                    State::default()
                }
            }
        }

        fn read(&self) -> RepoResult<std::sync::RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        /// Applies `change` under the write lock. With a snapshot configured the
        /// file is rewritten before the lock is released, and a failed write
        /// rolls the change back.
        fn commit<T>(&self, change: impl FnOnce(&mut State) -> RepoResult<T>) -> RepoResult<T> {
            let mut s = self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))?;
            let Some(path) = self.snapshot_path.as_deref() else { return change(&mut *s) };
            let before = State::clone(&s);
            let out = change(&mut *s)?;
            if let Err(e) = Self::write_snapshot(path, &*s) {
                *s = before;
                return Err(e);
            }
            Ok(out)
        }

        fn write_snapshot(path: &Path, state: &State) -> RepoResult<()> {
            let bytes = serde_json::to_vec_pretty(state).map_err(|e| RepoError::Internal(e.to_string()))?;
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            std::fs::write(path, bytes).map_err(|e| {
                error!("failed to write snapshot '{}': {e}", path.display());
                RepoError::Internal(e.to_string())
            })
        }
    }

    #[async_trait]
    impl ThreadRepo for InMemRepo {
        async fn insert_thread(&self, board: &str, new: NewThread) -> RepoResult<ThreadRecord> {
            let now = Utc::now();
            let thread = ThreadRecord {
                id: PostId::new(),
                text: new.text,
                delete_password_hash: new.delete_password_hash,
                reported: false,
                created_on: now,
                bumped_on: now,
                replies: Vec::new(),
            };
            self.commit(|s| {
                s.boards.entry(board.to_string()).or_default().push(thread.clone());
                Ok(())
            })?;
            Ok(thread)
        }

        async fn recent_threads(&self, board: &str, limit: usize) -> RepoResult<Vec<ThreadRecord>> {
            let s = self.read()?;
            let Some(threads) = s.boards.get(board) else { return Ok(Vec::new()) };
            let mut v: Vec<_> = threads.iter().rev().cloned().collect();
            v.sort_by(|a, b| b.bumped_on.cmp(&a.bumped_on)); // latest first
            v.truncate(limit);
            Ok(v)
        }

        async fn get_thread(&self, board: &str, id: PostId) -> RepoResult<ThreadRecord> {
            let s = self.read()?;
            let thread = s.thread(board, id).cloned();
            thread
        }

        async fn report_thread(&self, board: &str, id: PostId) -> RepoResult<()> {
            self.commit(|s| {
                s.thread_mut(board, id)?.reported = true;
                Ok(())
            })
        }

        async fn delete_thread(&self, board: &str, id: PostId) -> RepoResult<()> {
            self.commit(|s| {
                let threads = s.boards.get_mut(board).ok_or(RepoError::NotFound)?;
                let pos = threads.iter().position(|t| t.id == id).ok_or(RepoError::NotFound)?;
                threads.remove(pos);
                Ok(())
            })
        }
    }

    #[async_trait]
    impl ReplyRepo for InMemRepo {
        async fn push_reply(&self, board: &str, thread_id: PostId, new: NewReply) -> RepoResult<ReplyRecord> {
            let now = Utc::now();
            let reply = ReplyRecord {
                id: PostId::new(),
                text: new.text,
                delete_password_hash: new.delete_password_hash,
                reported: false,
                created_on: now,
            };
            self.commit(|s| {
                let thread = s.thread_mut(board, thread_id)?;
                thread.replies.push(reply.clone());
                thread.bumped_on = now;
                Ok(())
            })?;
            Ok(reply)
        }

        async fn get_reply(&self, board: &str, thread_id: PostId, reply_id: PostId) -> RepoResult<ReplyRecord> {
            let s = self.read()?;
            let reply = s
                .thread(board, thread_id)?
                .replies
                .iter()
                .find(|r| r.id == reply_id)
                .cloned()
                .ok_or(RepoError::NotFound);
            reply
        }

        async fn report_reply(&self, board: &str, thread_id: PostId, reply_id: PostId) -> RepoResult<()> {
            self.commit(|s| {
                let reply = s
                    .thread_mut(board, thread_id)?
                    .replies
                    .iter_mut()
                    .find(|r| r.id == reply_id)
                    .ok_or(RepoError::NotFound)?;
                reply.reported = true;
                Ok(())
            })
        }

        async fn set_reply_text(&self, board: &str, thread_id: PostId, reply_id: PostId, text: &str) -> RepoResult<()> {
            self.commit(|s| {
                let reply = s
                    .thread_mut(board, thread_id)?
                    .replies
                    .iter_mut()
                    .find(|r| r.id == reply_id)
                    .ok_or(RepoError::NotFound)?;
                reply.text = text.to_string();
                Ok(())
            })
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::{Pool, Postgres};
    use std::collections::HashMap;

    const SCHEMA: &[&str] = &[
        r#"CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            board TEXT NOT NULL,
            text TEXT NOT NULL,
            delete_password TEXT NOT NULL,
            reported BOOLEAN NOT NULL DEFAULT FALSE,
            created_on TIMESTAMPTZ NOT NULL,
            bumped_on TIMESTAMPTZ NOT NULL
        )"#,
        "CREATE INDEX IF NOT EXISTS threads_board_bumped ON threads (board, bumped_on DESC)",
        r#"CREATE TABLE IF NOT EXISTS replies (
            seq BIGSERIAL PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            text TEXT NOT NULL,
            delete_password TEXT NOT NULL,
            reported BOOLEAN NOT NULL DEFAULT FALSE,
            created_on TIMESTAMPTZ NOT NULL
        )"#,
        "CREATE INDEX IF NOT EXISTS replies_thread ON replies (thread_id, seq)",
    ];

    #[derive(sqlx::FromRow)]
    struct ThreadRow {
        id: String,
        text: String,
        delete_password: String,
        reported: bool,
        created_on: DateTime<Utc>,
        bumped_on: DateTime<Utc>,
    }

    #[derive(sqlx::FromRow)]
    struct ReplyRow {
        id: String,
        thread_id: String,
        text: String,
        delete_password: String,
        reported: bool,
        created_on: DateTime<Utc>,
    }

    fn db_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            other => RepoError::Internal(other.to_string()),
        }
    }

    fn parse_id(s: &str) -> RepoResult<PostId> {
        s.trim().parse().map_err(|_| RepoError::Internal(format!("corrupt id '{s}' in store")))
    }

    impl TryFrom<ReplyRow> for ReplyRecord {
        type Error = RepoError;
        fn try_from(r: ReplyRow) -> RepoResult<Self> {
            Ok(ReplyRecord {
                id: parse_id(&r.id)?,
                text: r.text,
                delete_password_hash: r.delete_password,
                reported: r.reported,
                created_on: r.created_on,
            })
        }
    }

    fn thread_record(row: ThreadRow, replies: Vec<ReplyRecord>) -> RepoResult<ThreadRecord> {
        Ok(ThreadRecord {
            id: parse_id(&row.id)?,
            text: row.text,
            delete_password_hash: row.delete_password,
            reported: row.reported,
            created_on: row.created_on,
            bumped_on: row.bumped_on,
            replies,
        })
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        /// Creates the two tables if they do not exist yet.
        pub async fn ensure_schema(&self) -> RepoResult<()> {
            for stmt in SCHEMA {
                sqlx::query(stmt).execute(&self.pool).await.map_err(db_err)?;
            }
            Ok(())
        }

        async fn replies_for(&self, thread_ids: &[String]) -> RepoResult<Vec<ReplyRow>> {
            sqlx::query_as::<_, ReplyRow>(
                "SELECT id, thread_id, text, delete_password, reported, created_on FROM replies WHERE thread_id = ANY($1) ORDER BY seq ASC",
            )
            .bind(thread_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
        }
    }

    #[async_trait]
    impl ThreadRepo for PgRepo {
        async fn insert_thread(&self, board: &str, new: NewThread) -> RepoResult<ThreadRecord> {
            let id = PostId::new();
            let now = Utc::now();
            let row = sqlx::query_as::<_, ThreadRow>(
                "INSERT INTO threads (id, board, text, delete_password, reported, created_on, bumped_on) VALUES ($1,$2,$3,$4,FALSE,$5,$5) \
                 RETURNING id, text, delete_password, reported, created_on, bumped_on",
            )
            .bind(id.to_string())
            .bind(board)
            .bind(&new.text)
            .bind(&new.delete_password_hash)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
            thread_record(row, Vec::new())
        }

        async fn recent_threads(&self, board: &str, limit: usize) -> RepoResult<Vec<ThreadRecord>> {
            let rows = sqlx::query_as::<_, ThreadRow>(
                "SELECT id, text, delete_password, reported, created_on, bumped_on FROM threads WHERE board = $1 ORDER BY bumped_on DESC LIMIT $2",
            )
            .bind(board)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let mut by_thread: HashMap<String, Vec<ReplyRecord>> = HashMap::new();
            for r in self.replies_for(&ids).await? {
                by_thread.entry(r.thread_id.clone()).or_default().push(r.try_into()?);
            }
            rows.into_iter()
                .map(|row| {
                    let replies = by_thread.remove(&row.id).unwrap_or_default();
                    thread_record(row, replies)
                })
                .collect()
        }

        async fn get_thread(&self, board: &str, id: PostId) -> RepoResult<ThreadRecord> {
            let row = sqlx::query_as::<_, ThreadRow>(
                "SELECT id, text, delete_password, reported, created_on, bumped_on FROM threads WHERE board = $1 AND id = $2",
            )
            .bind(board)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
            let replies = self
                .replies_for(&[row.id.clone()])
                .await?
                .into_iter()
                .map(ReplyRecord::try_from)
                .collect::<RepoResult<Vec<_>>>()?;
            thread_record(row, replies)
        }

        async fn report_thread(&self, board: &str, id: PostId) -> RepoResult<()> {
            let res = sqlx::query("UPDATE threads SET reported = TRUE WHERE board = $1 AND id = $2")
                .bind(board)
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn delete_thread(&self, board: &str, id: PostId) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM threads WHERE board = $1 AND id = $2")
                .bind(board)
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl ReplyRepo for PgRepo {
        async fn push_reply(&self, board: &str, thread_id: PostId, new: NewReply) -> RepoResult<ReplyRecord> {
            let now = Utc::now();
            let id = PostId::new();
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let bumped = sqlx::query("UPDATE threads SET bumped_on = $3 WHERE board = $1 AND id = $2")
                .bind(board)
                .bind(thread_id.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            if bumped.rows_affected() == 0 { return Err(RepoError::NotFound); }
            let row = sqlx::query_as::<_, ReplyRow>(
                "INSERT INTO replies (id, thread_id, text, delete_password, reported, created_on) VALUES ($1,$2,$3,$4,FALSE,$5) \
                 RETURNING id, thread_id, text, delete_password, reported, created_on",
            )
            .bind(id.to_string())
            .bind(thread_id.to_string())
            .bind(&new.text)
            .bind(&new.delete_password_hash)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            row.try_into()
        }

        async fn get_reply(&self, board: &str, thread_id: PostId, reply_id: PostId) -> RepoResult<ReplyRecord> {
            sqlx::query_as::<_, ReplyRow>(
                "SELECT r.id, r.thread_id, r.text, r.delete_password, r.reported, r.created_on \
                 FROM replies r JOIN threads t ON t.id = r.thread_id \
                 WHERE t.board = $1 AND t.id = $2 AND r.id = $3",
            )
            .bind(board)
            .bind(thread_id.to_string())
            .bind(reply_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?
            .try_into()
        }

        async fn report_reply(&self, board: &str, thread_id: PostId, reply_id: PostId) -> RepoResult<()> {
            let res = sqlx::query(
                "UPDATE replies r SET reported = TRUE FROM threads t \
                 WHERE t.id = r.thread_id AND t.board = $1 AND t.id = $2 AND r.id = $3",
            )
            .bind(board)
            .bind(thread_id.to_string())
            .bind(reply_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn set_reply_text(&self, board: &str, thread_id: PostId, reply_id: PostId, text: &str) -> RepoResult<()> {
            let res = sqlx::query(
                "UPDATE replies r SET text = $4 FROM threads t \
                 WHERE t.id = r.thread_id AND t.board = $1 AND t.id = $2 AND r.id = $3",
            )
            .bind(board)
            .bind(thread_id.to_string())
            .bind(reply_id.to_string())
            .bind(text)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }
}
