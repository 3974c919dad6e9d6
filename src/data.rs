use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};

use crate::backend::{self, CreatorRecord, VideoRecord};

/// One full feed fetch: the ordered records plus, when a viewer identity
/// exists, the set of video ids that viewer has liked.
#[derive(Debug, Default)]
pub struct FeedBatch {
    pub records: Vec<VideoRecord>,
    pub liked: HashSet<String>,
}

pub trait FeedService: Send + Sync {
    fn load_feed(&self, viewer_id: Option<&str>) -> Result<FeedBatch>;
}

pub trait EngagementService: Send + Sync {
    fn insert_like(&self, viewer_id: &str, video_id: &str) -> Result<()>;
    fn delete_like(&self, viewer_id: &str, video_id: &str) -> Result<()>;
}

pub trait ModerationService: Send + Sync {
    fn delete_video(&self, video_id: &str) -> Result<()>;
}

pub struct BackendFeedService {
    client: Arc<backend::Client>,
}

impl BackendFeedService {
    pub fn new(client: Arc<backend::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for BackendFeedService {
    fn load_feed(&self, viewer_id: Option<&str>) -> Result<FeedBatch> {
        let records = self
            .client
            .published_videos()
            .context("fetch published videos")?;
        let liked = match viewer_id {
            Some(viewer_id) => self
                .client
                .viewer_likes(viewer_id)
                .context("fetch viewer likes")?,
            None => HashSet::new(),
        };
        Ok(FeedBatch { records, liked })
    }
}

pub struct BackendEngagementService {
    client: Arc<backend::Client>,
}

impl BackendEngagementService {
    pub fn new(client: Arc<backend::Client>) -> Self {
        Self { client }
    }
}

impl EngagementService for BackendEngagementService {
    fn insert_like(&self, viewer_id: &str, video_id: &str) -> Result<()> {
        self.client
            .insert_like(viewer_id, video_id)
            .context("persist like")
    }

    fn delete_like(&self, viewer_id: &str, video_id: &str) -> Result<()> {
        self.client
            .delete_like(viewer_id, video_id)
            .context("remove like")
    }
}

pub struct BackendModerationService {
    client: Arc<backend::Client>,
}

impl BackendModerationService {
    pub fn new(client: Arc<backend::Client>) -> Self {
        Self { client }
    }
}

impl ModerationService for BackendModerationService {
    fn delete_video(&self, video_id: &str) -> Result<()> {
        self.client.delete_video(video_id).map_err(Into::into)
    }
}

#[derive(Default)]
pub struct MockFeedService;

impl FeedService for MockFeedService {
    fn load_feed(&self, _viewer_id: Option<&str>) -> Result<FeedBatch> {
        Ok(FeedBatch {
            records: mock_records(),
            liked: HashSet::new(),
        })
    }
}

#[derive(Default)]
pub struct MockEngagementService;

impl EngagementService for MockEngagementService {
    fn insert_like(&self, _viewer_id: &str, _video_id: &str) -> Result<()> {
        Ok(())
    }

    fn delete_like(&self, _viewer_id: &str, _video_id: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MockModerationService;

impl ModerationService for MockModerationService {
    fn delete_video(&self, _video_id: &str) -> Result<()> {
        Ok(())
    }
}

fn mock_records() -> Vec<VideoRecord> {
    let captions = [
        "Welcome to Reelix #firstpost",
        "Scroll with j/k or drag, tap to pause",
        "Hold the right edge for 2x speed",
    ];
    captions
        .iter()
        .enumerate()
        .map(|(index, caption)| VideoRecord {
            id: format!("sample-{index}"),
            media_url: format!("https://samples.reelix.dev/clip-{index}.mp4"),
            poster_url: None,
            caption: Some((*caption).to_string()),
            like_count: (captions.len() - index) as i64 * 12,
            comment_count: 4,
            created_at: Utc::now() - ChronoDuration::minutes(index as i64 * 30),
            published: true,
            creator: Some(CreatorRecord {
                id: "reelix".into(),
                username: Some("reelix".into()),
                display_name: Some("Reelix Team".into()),
                avatar_url: None,
            }),
        })
        .collect()
}
