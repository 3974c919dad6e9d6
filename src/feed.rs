use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::backend::{ChangeEvent, ChangeKind, CreatorRecord, VideoRecord};

pub const DEFAULT_ECHO_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("video not found")]
    UnknownVideo,
}

/// Weak reference to the creator: id plus denormalized display fields.
/// The feed never owns the creator entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creator {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: String,
}

impl Creator {
    fn from_record(record: CreatorRecord) -> Self {
        Self {
            id: record.id,
            username: record.username.unwrap_or_default(),
            display_name: record.display_name.unwrap_or_default(),
            avatar_url: record.avatar_url.unwrap_or_default(),
        }
    }
}

/// One feed entry. `like_count` is a materialized aggregate owned by the
/// backend; `is_liked` is the viewer's own join row. They are persisted
/// independently and only ever adjusted together optimistically, never
/// derived from one another.
#[derive(Debug, Clone)]
pub struct Video {
    pub id: String,
    pub media_url: String,
    pub poster_url: Option<String>,
    pub caption: String,
    pub created_at: DateTime<Utc>,
    pub creator: Option<Creator>,
    pub like_count: u64,
    pub comment_count: u64,
    pub is_liked: bool,
    pub is_saved: bool,
}

impl Video {
    pub fn from_record(record: VideoRecord) -> Self {
        Self {
            id: record.id,
            media_url: record.media_url,
            poster_url: record.poster_url,
            caption: record.caption.unwrap_or_default(),
            created_at: record.created_at,
            creator: record.creator.map(Creator::from_record),
            like_count: record.like_count.max(0) as u64,
            comment_count: record.comment_count.max(0) as u64,
            is_liked: false,
            is_saved: false,
        }
    }

    /// Merges server-side fields from a change record. Viewer-local flags
    /// are left alone: the liked join is not part of the video row, and
    /// saves have no backend at all.
    fn merge_record(&mut self, record: &VideoRecord) {
        self.media_url = record.media_url.clone();
        self.poster_url = record.poster_url.clone();
        if let Some(caption) = &record.caption {
            self.caption = caption.clone();
        }
        self.like_count = record.like_count.max(0) as u64;
        self.comment_count = record.comment_count.max(0) as u64;
        if let Some(creator) = &record.creator {
            self.creator = Some(Creator::from_record(creator.clone()));
        }
    }
}

/// What a locally-initiated mutation looks like when it echoes back over
/// the change feed. Like toggles surface as `update` events on the video
/// row (the count aggregate moved); deletes surface as `delete` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Like,
    Delete,
}

/// A persistence call the caller still has to issue after the optimistic
/// flip has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeOp {
    pub video_id: String,
    pub now_liked: bool,
}

/// Outcome of feeding one change event into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Merged,
    Removed,
    /// Echo of a mutation this client initiated within the window.
    DroppedEcho,
    /// Event for a video the store has never seen and cannot place.
    Ignored,
}

/// Ordered feed plus engagement state. Order is server-assigned
/// (newest-first) and never re-sorted locally. Owned by exactly one
/// consumer; all mutation goes through these methods.
pub struct Store {
    items: Vec<Video>,
    pending: HashMap<(String, MutationKind), Instant>,
    echo_window: Duration,
}

impl Store {
    pub fn new(echo_window: Duration) -> Self {
        Self {
            items: Vec::new(),
            pending: HashMap::new(),
            echo_window,
        }
    }

    pub fn items(&self) -> &[Video] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, video_id: &str) -> Option<&Video> {
        self.items.iter().find(|video| video.id == video_id)
    }

    pub fn index_of(&self, video_id: &str) -> Option<usize> {
        self.items.iter().position(|video| video.id == video_id)
    }

    /// Replaces the whole feed from a fresh fetch, merging the viewer's
    /// liked set. Saved flags survive the reload for videos that are
    /// still present (saves are process-local only).
    pub fn replace_all(&mut self, records: Vec<VideoRecord>, liked: &HashSet<String>) {
        let saved: HashSet<String> = self
            .items
            .iter()
            .filter(|video| video.is_saved)
            .map(|video| video.id.clone())
            .collect();
        self.items = records
            .into_iter()
            .map(|record| {
                let mut video = Video::from_record(record);
                video.is_liked = liked.contains(&video.id);
                video.is_saved = saved.contains(&video.id);
                video
            })
            .collect();
        self.pending.clear();
    }

    /// Optimistic like toggle: flips `is_liked` and moves `like_count` by
    /// one (never below zero) before any network round-trip, then hands
    /// back the persistence call the caller must issue. No rollback
    /// happens here on failure; the local value stands until a retry or
    /// the next full reload.
    pub fn toggle_like(&mut self, video_id: &str) -> Result<LikeOp, StoreError> {
        let video = self
            .items
            .iter_mut()
            .find(|video| video.id == video_id)
            .ok_or(StoreError::UnknownVideo)?;
        let now_liked = !video.is_liked;
        video.is_liked = now_liked;
        video.like_count = if now_liked {
            video.like_count.saturating_add(1)
        } else {
            video.like_count.saturating_sub(1)
        };
        self.mark_pending(video_id, MutationKind::Like);
        Ok(LikeOp {
            video_id: video_id.to_string(),
            now_liked,
        })
    }

    /// Double-tap semantics: ensure the video is liked. Returns the
    /// persistence call only when the flag actually flipped; an already
    /// liked video is left untouched.
    pub fn ensure_liked(&mut self, video_id: &str) -> Result<Option<LikeOp>, StoreError> {
        let already = self
            .get(video_id)
            .ok_or(StoreError::UnknownVideo)?
            .is_liked;
        if already {
            return Ok(None);
        }
        self.toggle_like(video_id).map(Some)
    }

    /// Local-only flip; save state has no backend persistence path.
    /// Returns the new flag.
    pub fn toggle_save(&mut self, video_id: &str) -> Result<bool, StoreError> {
        let video = self
            .items
            .iter_mut()
            .find(|video| video.id == video_id)
            .ok_or(StoreError::UnknownVideo)?;
        video.is_saved = !video.is_saved;
        Ok(video.is_saved)
    }

    pub fn saved_videos(&self) -> impl Iterator<Item = &Video> {
        self.items.iter().filter(|video| video.is_saved)
    }

    /// Optimistic removal ahead of the backend delete. On backend failure
    /// the caller reloads the whole feed instead of patching this back.
    pub fn remove(&mut self, video_id: &str) -> Result<Video, StoreError> {
        let index = self
            .index_of(video_id)
            .ok_or(StoreError::UnknownVideo)?;
        self.mark_pending(video_id, MutationKind::Delete);
        Ok(self.items.remove(index))
    }

    /// Applies one change-feed event. Events that match a pending local
    /// mutation (same video, same kind, inside the echo window) are
    /// dropped without touching state; the entry stays until it expires
    /// so at-least-once duplicates of the same echo are absorbed too.
    pub fn apply_change(&mut self, event: &ChangeEvent) -> Applied {
        self.apply_change_at(event, Instant::now())
    }

    pub fn apply_change_at(&mut self, event: &ChangeEvent, now: Instant) -> Applied {
        self.expire_pending(now);

        let kind = match event.kind {
            ChangeKind::Insert => None,
            ChangeKind::Update => Some(MutationKind::Like),
            ChangeKind::Delete => Some(MutationKind::Delete),
        };
        if let Some(kind) = kind {
            if self.pending.contains_key(&(event.record.id.clone(), kind)) {
                return Applied::DroppedEcho;
            }
        }

        match event.kind {
            ChangeKind::Insert => {
                if self.index_of(&event.record.id).is_some() {
                    return Applied::Ignored;
                }
                // Server order is newest-first; fresh rows go on top.
                self.items.insert(0, Video::from_record(event.record.clone()));
                Applied::Inserted
            }
            ChangeKind::Update => {
                match self
                    .items
                    .iter_mut()
                    .find(|video| video.id == event.record.id)
                {
                    Some(video) => {
                        video.merge_record(&event.record);
                        Applied::Merged
                    }
                    None => Applied::Ignored,
                }
            }
            ChangeKind::Delete => match self.index_of(&event.record.id) {
                Some(index) => {
                    self.items.remove(index);
                    Applied::Removed
                }
                None => Applied::Ignored,
            },
        }
    }

    fn mark_pending(&mut self, video_id: &str, kind: MutationKind) {
        self.pending
            .insert((video_id.to_string(), kind), Instant::now());
    }

    fn expire_pending(&mut self, now: Instant) {
        let window = self.echo_window;
        self.pending
            .retain(|_, marked| now.duration_since(*marked) < window);
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, like_count: i64) -> VideoRecord {
        VideoRecord {
            id: id.to_string(),
            media_url: format!("https://cdn.test/{id}.mp4"),
            poster_url: Some(format!("https://cdn.test/{id}.jpg")),
            caption: Some(format!("clip {id}")),
            like_count,
            comment_count: 3,
            created_at: Utc::now(),
            published: true,
            creator: Some(CreatorRecord {
                id: "creator-1".into(),
                username: Some("ana".into()),
                display_name: Some("Ana".into()),
                avatar_url: None,
            }),
        }
    }

    fn store_with(ids: &[(&str, i64)]) -> Store {
        let mut store = Store::new(DEFAULT_ECHO_WINDOW);
        let records = ids.iter().map(|(id, count)| record(id, *count)).collect();
        store.replace_all(records, &HashSet::new());
        store
    }

    #[test]
    fn load_merges_viewer_likes() {
        let mut store = Store::new(DEFAULT_ECHO_WINDOW);
        let liked: HashSet<String> = ["b".to_string()].into_iter().collect();
        store.replace_all(vec![record("a", 10), record("b", 2)], &liked);
        assert!(!store.get("a").unwrap().is_liked);
        assert!(store.get("b").unwrap().is_liked);
    }

    #[test]
    fn toggle_like_is_optimistic_and_immediate() {
        let mut store = store_with(&[("a", 10)]);
        let op = store.toggle_like("a").unwrap();
        assert_eq!(
            op,
            LikeOp {
                video_id: "a".into(),
                now_liked: true
            }
        );
        let video = store.get("a").unwrap();
        assert!(video.is_liked);
        assert_eq!(video.like_count, 11);
    }

    #[test]
    fn toggle_like_twice_restores_original_pair() {
        let mut store = store_with(&[("a", 10)]);
        store.toggle_like("a").unwrap();
        store.toggle_like("a").unwrap();
        let video = store.get("a").unwrap();
        assert!(!video.is_liked);
        assert_eq!(video.like_count, 10);
    }

    #[test]
    fn unlike_never_drops_count_below_zero() {
        let mut store = Store::new(DEFAULT_ECHO_WINDOW);
        let liked: HashSet<String> = ["a".to_string()].into_iter().collect();
        store.replace_all(vec![record("a", 0)], &liked);
        store.toggle_like("a").unwrap();
        assert_eq!(store.get("a").unwrap().like_count, 0);
    }

    #[test]
    fn ensure_liked_does_not_double_increment() {
        let mut store = store_with(&[("a", 10)]);
        let first = store.ensure_liked("a").unwrap();
        assert!(first.is_some());
        let second = store.ensure_liked("a").unwrap();
        assert!(second.is_none());
        let video = store.get("a").unwrap();
        assert!(video.is_liked);
        assert_eq!(video.like_count, 11);
    }

    #[test]
    fn toggle_like_unknown_video_fails() {
        let mut store = store_with(&[("a", 1)]);
        assert!(matches!(
            store.toggle_like("nope"),
            Err(StoreError::UnknownVideo)
        ));
    }

    #[test]
    fn toggle_save_is_local_only() {
        let mut store = store_with(&[("a", 1)]);
        assert!(store.toggle_save("a").unwrap());
        assert_eq!(store.saved_videos().count(), 1);
        assert!(!store.toggle_save("a").unwrap());
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn saved_flags_survive_reload() {
        let mut store = store_with(&[("a", 1), ("b", 1)]);
        store.toggle_save("b").unwrap();
        store.replace_all(vec![record("a", 1), record("b", 5)], &HashSet::new());
        assert!(store.get("b").unwrap().is_saved);
        assert!(!store.get("a").unwrap().is_saved);
    }

    #[test]
    fn echo_of_local_like_is_dropped() {
        let mut store = store_with(&[("a", 10)]);
        store.toggle_like("a").unwrap();

        // Realtime echo arrives shortly after with the server's view.
        let echo = ChangeEvent {
            kind: ChangeKind::Update,
            record: record("a", 11),
        };
        let applied = store.apply_change_at(&echo, Instant::now());
        assert_eq!(applied, Applied::DroppedEcho);
        assert_eq!(store.get("a").unwrap().like_count, 11);
    }

    #[test]
    fn duplicate_echo_within_window_is_also_dropped() {
        let mut store = store_with(&[("a", 10)]);
        store.toggle_like("a").unwrap();
        let echo = ChangeEvent {
            kind: ChangeKind::Update,
            record: record("a", 11),
        };
        assert_eq!(store.apply_change_at(&echo, Instant::now()), Applied::DroppedEcho);
        assert_eq!(store.apply_change_at(&echo, Instant::now()), Applied::DroppedEcho);
    }

    #[test]
    fn expired_pending_entry_no_longer_suppresses() {
        let mut store = store_with(&[("a", 10)]);
        store.toggle_like("a").unwrap();
        let echo = ChangeEvent {
            kind: ChangeKind::Update,
            record: record("a", 42),
        };
        let later = Instant::now() + DEFAULT_ECHO_WINDOW + Duration::from_millis(50);
        assert_eq!(store.apply_change_at(&echo, later), Applied::Merged);
        assert_eq!(store.get("a").unwrap().like_count, 42);
    }

    #[test]
    fn remote_update_from_another_viewer_merges() {
        let mut store = store_with(&[("a", 10)]);
        store.toggle_like("a").unwrap();
        // A different video's update is unrelated to our pending like.
        let mut other = record("b", 7);
        other.caption = Some("fresh caption".into());
        store.replace_all(
            vec![record("a", 10), record("b", 1)],
            &HashSet::new(),
        );
        let event = ChangeEvent {
            kind: ChangeKind::Update,
            record: other,
        };
        assert_eq!(store.apply_change_at(&event, Instant::now()), Applied::Merged);
        let video = store.get("b").unwrap();
        assert_eq!(video.like_count, 7);
        assert_eq!(video.caption, "fresh caption");
    }

    #[test]
    fn update_keeps_viewer_local_flags() {
        let mut store = store_with(&[("a", 10), ("b", 1)]);
        store.toggle_save("b").unwrap();
        let event = ChangeEvent {
            kind: ChangeKind::Update,
            record: record("b", 9),
        };
        store.apply_change_at(&event, Instant::now());
        let video = store.get("b").unwrap();
        assert!(video.is_saved);
        assert_eq!(video.like_count, 9);
    }

    #[test]
    fn remote_insert_lands_on_top_once() {
        let mut store = store_with(&[("a", 1)]);
        let event = ChangeEvent {
            kind: ChangeKind::Insert,
            record: record("new", 0),
        };
        assert_eq!(store.apply_change_at(&event, Instant::now()), Applied::Inserted);
        assert_eq!(store.items()[0].id, "new");
        assert_eq!(store.apply_change_at(&event, Instant::now()), Applied::Ignored);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn remote_delete_removes_item() {
        let mut store = store_with(&[("a", 1), ("b", 1)]);
        let event = ChangeEvent {
            kind: ChangeKind::Delete,
            record: record("a", 1),
        };
        assert_eq!(store.apply_change_at(&event, Instant::now()), Applied::Removed);
        assert_eq!(store.len(), 1);
        assert!(store.get("a").is_none());
    }

    #[test]
    fn echo_of_local_delete_is_dropped() {
        let mut store = store_with(&[("a", 1), ("b", 1)]);
        store.remove("a").unwrap();
        let event = ChangeEvent {
            kind: ChangeKind::Delete,
            record: record("a", 1),
        };
        assert_eq!(store.apply_change_at(&event, Instant::now()), Applied::DroppedEcho);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn order_is_preserved_from_server() {
        let store = store_with(&[("c", 1), ("b", 1), ("a", 1)]);
        let ids: Vec<&str> = store.items().iter().map(|video| video.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }
}
