//! Thread and reply operations: field validation, secret hashing and
//! verification, store mutation, and shaping of what is sent back.
//!
//! Each operation validates in a fixed order and stops at the first failure.
//! The store handle is checked before anything else.

use std::sync::Arc;

use actix_web::web;
use tracing::debug;

use crate::error::ApiError;
use crate::models::*;
use crate::repo::{with_board, Repo, StoreSlot};
use crate::secret::SecretHasher;

/// Threads returned by a board listing.
pub const RECENT_THREAD_LIMIT: usize = 10;
/// Replies shown per thread in a board listing.
pub const REPLY_PREVIEW_LIMIT: usize = 3;

#[derive(Clone)]
pub struct BoardService {
    store: StoreSlot,
    hasher: Arc<dyn SecretHasher>,
}

/// Absent or empty is "missing".
fn require<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, ApiError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::Missing(field)),
    }
}

/// Only absence is "missing"; an empty string falls to the format check.
fn require_present<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, ApiError> {
    value.ok_or(ApiError::Missing(field))
}

fn parse_id(value: &str, field: &'static str) -> Result<PostId, ApiError> {
    value.parse().map_err(|_| ApiError::Malformed(field))
}

fn require_id(value: Option<&str>, field: &'static str) -> Result<PostId, ApiError> {
    parse_id(require(value, field)?, field)
}

fn require_board(board: &str) -> Result<&str, ApiError> {
    require(Some(board), "board")
}

impl BoardService {
    pub fn new(store: StoreSlot, hasher: Arc<dyn SecretHasher>) -> Self {
        Self { store, hasher }
    }

    fn repo(&self) -> Result<Arc<dyn Repo>, ApiError> {
        self.store.get().ok_or(ApiError::StoreUnavailable)
    }

    /// Fails with `StoreUnavailable` until the store handle has been filled.
    pub fn ready(&self) -> Result<(), ApiError> {
        self.repo().map(|_| ())
    }

    async fn hash_secret(&self, secret: &str) -> Result<String, ApiError> {
        let hasher = self.hasher.clone();
        let secret = secret.to_owned();
        web::block(move || hasher.hash(&secret))
            .await
            .map_err(|e| {
                log::error!("hashing task failed: {e}");
                ApiError::Internal("unknown error")
            })?
            .map_err(|e| {
                log::error!("{e}");
                ApiError::Internal("unknown error")
            })
    }

    async fn verify_secret(&self, secret: &str, hash: String) -> Result<(), ApiError> {
        let hasher = self.hasher.clone();
        let secret = secret.to_owned();
        let matched = web::block(move || hasher.verify(&secret, &hash))
            .await
            .map_err(|e| {
                log::error!("verify task failed: {e}");
                ApiError::Internal("unknown error")
            })?
            .map_err(|e| {
                log::error!("{e}");
                ApiError::Internal("unknown error")
            })?;
        if matched { Ok(()) } else { Err(ApiError::IncorrectPassword) }
    }

    /// board → text → delete_password.
    pub async fn create_thread(&self, board: &str, fields: &ThreadFields) -> Result<ThreadRecord, ApiError> {
        let repo = self.repo()?;
        let board = require_board(board)?;
        let text = require(fields.text.as_deref(), "text")?;
        let secret = require(fields.delete_password.as_deref(), "delete_password")?;

        let hash = self.hash_secret(secret).await?;
        let thread = with_board(&*repo, board)
            .insert_thread(NewThread { text: text.to_string(), delete_password_hash: hash })
            .await
            .map_err(|e| ApiError::from_repo(e, "could not create thread"))?;
        debug!(board, thread_id = %thread.id, "thread created");
        Ok(thread)
    }

    /// board → text → delete_password → thread_id.
    pub async fn create_reply(&self, board: &str, fields: &ThreadFields) -> Result<(PostId, ReplyRecord), ApiError> {
        let repo = self.repo()?;
        let board = require_board(board)?;
        let text = require(fields.text.as_deref(), "text")?;
        let secret = require(fields.delete_password.as_deref(), "delete_password")?;
        let thread_id = parse_id(require_present(fields.thread_id.as_deref(), "thread_id")?, "thread_id")?;

        let hash = self.hash_secret(secret).await?;
        let reply = with_board(&*repo, board)
            .push_reply(thread_id, NewReply { text: text.to_string(), delete_password_hash: hash })
            .await
            // same message as a failed thread insert
            .map_err(|e| ApiError::from_repo(e, "could not create thread"))?;
        debug!(board, %thread_id, reply_id = %reply.id, "reply created");
        Ok((thread_id, reply))
    }

    /// Up to ten threads, latest bump first, each with its three newest replies.
    /// A board nobody has posted to yields an empty list.
    pub async fn list_recent_threads(&self, board: &str) -> Result<Vec<ThreadView>, ApiError> {
        let repo = self.repo()?;
        let board = require_board(board)?;
        let threads = with_board(&*repo, board)
            .recent_threads(RECENT_THREAD_LIMIT)
            .await
            .map_err(|e| ApiError::from_repo(e, "could not retrieve threads"))?;
        Ok(threads.iter().map(|t| ThreadView::summary(t, REPLY_PREVIEW_LIMIT)).collect())
    }

    /// board → thread_id.
    pub async fn get_thread(&self, board: &str, query: &ThreadQuery) -> Result<ThreadView, ApiError> {
        let repo = self.repo()?;
        let board = require_board(board)?;
        let thread_id = parse_id(require_present(query.thread_id.as_deref(), "thread_id")?, "thread_id")?;
        let thread = with_board(&*repo, board)
            .get_thread(thread_id)
            .await
            .map_err(|e| ApiError::from_repo(e, "could not retrieve thread"))?;
        Ok(ThreadView::detail(&thread))
    }

    /// board → thread_id. No secret needed; reporting twice is harmless.
    pub async fn report_thread(&self, board: &str, fields: &ThreadFields) -> Result<(), ApiError> {
        let repo = self.repo()?;
        let board = require_board(board)?;
        let thread_id = require_id(fields.thread_id.as_deref(), "thread_id")?;
        with_board(&*repo, board)
            .report_thread(thread_id)
            .await
            .map_err(|e| ApiError::from_repo(e, "could not report thread"))?;
        debug!(board, %thread_id, "thread reported");
        Ok(())
    }

    /// board → thread_id → reply_id. Both ids are compared as parsed
    /// identifiers, so hex case in the request does not matter.
    pub async fn report_reply(&self, board: &str, fields: &ThreadFields) -> Result<(), ApiError> {
        let repo = self.repo()?;
        let board = require_board(board)?;
        let thread_id = require_id(fields.thread_id.as_deref(), "thread_id")?;
        let reply_id = require_id(fields.reply_id.as_deref(), "reply_id")?;
        with_board(&*repo, board)
            .report_reply(thread_id, reply_id)
            .await
            .map_err(|e| ApiError::from_repo(e, "could not report reply"))?;
        debug!(board, %thread_id, %reply_id, "reply reported");
        Ok(())
    }

    /// board → thread_id → delete_password, then the secret check.
    /// On a match the thread is removed for good.
    pub async fn delete_thread(&self, board: &str, fields: &ThreadFields) -> Result<(), ApiError> {
        let repo = self.repo()?;
        let board = require_board(board)?;
        let thread_id = require_id(fields.thread_id.as_deref(), "thread_id")?;
        let secret = require(fields.delete_password.as_deref(), "delete_password")?;

        let handle = with_board(&*repo, board);
        let thread = handle
            .get_thread(thread_id)
            .await
            .map_err(|e| ApiError::from_repo(e, "unknown error"))?;
        self.verify_secret(secret, thread.delete_password_hash).await?;
        handle
            .delete_thread(thread_id)
            .await
            .map_err(|e| ApiError::from_repo(e, "could not delete thread"))?;
        debug!(board, %thread_id, "thread deleted");
        Ok(())
    }

    /// board → thread_id → delete_password → reply_id, then the secret check.
    /// On a match the reply text becomes the deletion marker; the reply stays.
    pub async fn delete_reply(&self, board: &str, fields: &ThreadFields) -> Result<(), ApiError> {
        let repo = self.repo()?;
        let board = require_board(board)?;
        let thread_id = require_id(fields.thread_id.as_deref(), "thread_id")?;
        let secret = require(fields.delete_password.as_deref(), "delete_password")?;
        let reply_id = require_id(fields.reply_id.as_deref(), "reply_id")?;

        let handle = with_board(&*repo, board);
        let reply = handle
            .get_reply(thread_id, reply_id)
            .await
            .map_err(|e| ApiError::from_repo(e, "unknown error"))?;
        self.verify_secret(secret, reply.delete_password_hash).await?;
        handle
            .set_reply_text(thread_id, reply_id, DELETED_MARKER)
            .await
            .map_err(|e| ApiError::from_repo(e, "unknown error"))?;
        debug!(board, %thread_id, %reply_id, "reply tombstoned");
        Ok(())
    }
}
