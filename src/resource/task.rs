//! Tasks, pieces and the task registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::RwLock as AsyncRwLock;

use super::peer::PeerTaskManager;
use super::{read, write};
use crate::error::Error;
use crate::rpc::types::{DirectPiece, RegisterResult, UrlMeta};

/// Largest content length served inline as a tiny task
pub const TINY_FILE_SIZE: i64 = 128;

// ============================================================================
// Size Scope
// ============================================================================

/// Size classification of a completed task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SizeScope {
    /// Not yet known; the CDN has not finished seeding
    #[default]
    Unknown,
    /// One piece of at most [`TINY_FILE_SIZE`] bytes, content held inline
    Tiny,
    /// One piece
    Small,
    /// More than one piece
    Normal,
}

impl SizeScope {
    /// Classify a completed task
    ///
    /// `tiny_content` is the inline content fetched for single-piece tasks, if
    /// any. A fetch that failed or returned the wrong number of bytes
    /// downgrades the task to `Small`.
    pub fn classify(piece_total: u32, content_length: i64, tiny_content: Option<&[u8]>) -> Self {
        if piece_total != 1 {
            return Self::Normal;
        }

        match tiny_content {
            Some(content)
                if content_length <= TINY_FILE_SIZE
                    && i64::try_from(content.len()).ok() == Some(content_length) =>
            {
                Self::Tiny
            }
            _ => Self::Small,
        }
    }
}

// ============================================================================
// Piece
// ============================================================================

/// Storage layout of a piece
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PieceStyle {
    #[default]
    Plain,
}

/// One fixed-range slice of a task's content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub piece_num: u32,
    pub range_start: u64,
    pub range_size: u32,
    /// MD5 of the piece content
    pub piece_md5: String,
    /// Offset of the piece in the seed's storage
    pub piece_offset: u64,
    pub piece_style: PieceStyle,
}

impl Piece {
    /// Create an empty piece descriptor
    pub fn new(piece_num: u32) -> Self {
        Self {
            piece_num,
            ..Default::default()
        }
    }
}

// ============================================================================
// Task
// ============================================================================

#[derive(Debug, Default)]
struct TaskState {
    content_length: Option<i64>,
    piece_total: Option<u32>,
    size_scope: SizeScope,
    pieces: BTreeMap<u32, Piece>,
    cdn_error: Option<Error>,
    direct_piece: Option<Vec<u8>>,
    updated_at: Option<DateTime<Utc>>,
}

/// One content item being distributed
#[derive(Debug)]
pub struct Task {
    task_id: String,
    url: String,
    url_meta: UrlMeta,
    created_at: DateTime<Utc>,
    state: RwLock<TaskState>,
}

impl Task {
    /// Create a task with unknown size
    pub fn new(task_id: impl Into<String>, url: impl Into<String>, url_meta: UrlMeta) -> Self {
        Self {
            task_id: task_id.into(),
            url: url.into(),
            url_meta,
            created_at: Utc::now(),
            state: RwLock::new(TaskState::default()),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn url_meta(&self) -> &UrlMeta {
        &self.url_meta
    }

    /// Query keys ignored when computing the task id
    pub fn filter(&self) -> &str {
        &self.url_meta.filter
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last time the CDN seed stream changed this task
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        read(&self.state).updated_at
    }

    pub fn content_length(&self) -> Option<i64> {
        read(&self.state).content_length
    }

    pub fn piece_total(&self) -> Option<u32> {
        read(&self.state).piece_total
    }

    pub fn size_scope(&self) -> SizeScope {
        read(&self.state).size_scope
    }

    /// Inline content of a tiny task
    pub fn direct_piece(&self) -> Option<Vec<u8>> {
        read(&self.state).direct_piece.clone()
    }

    pub fn cdn_error(&self) -> Option<Error> {
        read(&self.state).cdn_error.clone()
    }

    pub fn set_cdn_error(&self, err: Option<Error>) {
        let mut state = write(&self.state);
        state.cdn_error = err;
        state.updated_at = Some(Utc::now());
    }

    /// Return the piece with this number, creating an empty one if needed
    pub fn get_or_create_piece(&self, piece_num: u32) -> Piece {
        write(&self.state)
            .pieces
            .entry(piece_num)
            .or_insert_with(|| Piece::new(piece_num))
            .clone()
    }

    /// Store the descriptor of a piece, replacing earlier values
    pub fn update_piece(&self, piece: Piece) -> Piece {
        let mut state = write(&self.state);
        state.updated_at = Some(Utc::now());
        let slot = state
            .pieces
            .entry(piece.piece_num)
            .or_insert_with(|| Piece::new(piece.piece_num));
        *slot = piece;
        slot.clone()
    }

    pub fn piece(&self, piece_num: u32) -> Option<Piece> {
        read(&self.state).pieces.get(&piece_num).cloned()
    }

    /// Number of distinct pieces known
    pub fn piece_count(&self) -> usize {
        read(&self.state).pieces.len()
    }

    /// Pieces in piece-number order
    pub fn pieces(&self) -> Vec<Piece> {
        read(&self.state).pieces.values().cloned().collect()
    }

    /// Whether the CDN has reported completion
    pub fn is_completed(&self) -> bool {
        read(&self.state).size_scope != SizeScope::Unknown
    }

    /// Record the completion reported by the CDN
    ///
    /// Length, piece total and size scope are set once; returns `false` and
    /// leaves the task unchanged if it was already completed.
    pub fn complete(
        &self,
        piece_total: u32,
        content_length: i64,
        size_scope: SizeScope,
        direct_piece: Option<Vec<u8>>,
    ) -> bool {
        let mut state = write(&self.state);
        if state.size_scope != SizeScope::Unknown {
            return false;
        }

        state.piece_total = Some(piece_total);
        state.content_length = Some(content_length);
        state.size_scope = size_scope;
        state.direct_piece = if size_scope == SizeScope::Tiny {
            direct_piece
        } else {
            None
        };
        state.updated_at = Some(Utc::now());
        true
    }

    /// Registration answer describing this task
    pub fn register_result(&self) -> RegisterResult {
        let state = read(&self.state);
        RegisterResult {
            task_id: self.task_id.clone(),
            size_scope: state.size_scope,
            direct_piece: state.direct_piece.clone().map(DirectPiece::PieceContent),
        }
    }
}

// ============================================================================
// Task Manager
// ============================================================================

/// Registry of in-flight tasks
///
/// Also owns the peer task registry, since peer tasks live and die with
/// their task.
pub struct TaskManager {
    tasks: AsyncRwLock<HashMap<String, Arc<Task>>>,
    peer_tasks: Arc<PeerTaskManager>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: AsyncRwLock::new(HashMap::new()),
            peer_tasks: Arc::new(PeerTaskManager::new()),
        }
    }

    /// Peer task registry owned by this manager
    pub fn peer_tasks(&self) -> &Arc<PeerTaskManager> {
        &self.peer_tasks
    }

    pub async fn get(&self, task_id: &str) -> Option<Arc<Task>> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Return the task with this id, creating it if unknown
    pub async fn get_or_create(
        &self,
        task_id: &str,
        url: &str,
        url_meta: &UrlMeta,
    ) -> Arc<Task> {
        if let Some(task) = self.get(task_id).await {
            return task;
        }

        let mut tasks = self.tasks.write().await;
        tasks
            .entry(task_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(task_id = %task_id, "Created task");
                Arc::new(Task::new(task_id, url, url_meta.clone()))
            })
            .clone()
    }

    /// Remove a task; its peer tasks are removed separately
    pub async fn delete(&self, task_id: &str) -> Option<Arc<Task>> {
        self.tasks.write().await.remove(task_id)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
