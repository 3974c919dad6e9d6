use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result as AnyResult};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::logging::debug_log;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),
    #[error("not authorized")]
    Unauthorized,
    #[error("backend returned status {0}")]
    Status(StatusCode),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub user_agent: String,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatorRecord {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoRecord {
    pub id: String,
    pub media_url: String,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub creator: Option<CreatorRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-level change pushed from the video collection. Delivery is
/// at-least-once; consumers must tolerate duplicates.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: VideoRecord,
}

#[derive(Serialize)]
struct LikeRow<'a> {
    viewer_id: &'a str,
    video_id: &'a str,
}

/// Blocking client for the hosted video store. The wire protocol is the
/// store's own row-CRUD REST surface; nothing here is specific to any
/// one deployment beyond the table names.
pub struct Client {
    http: HttpClient,
    base_url: Url,
    api_key: String,
    user_agent: String,
}

impl Client {
    pub fn new(config: ClientConfig) -> AnyResult<Self> {
        if config.base_url.trim().is_empty() {
            bail!("backend base url required");
        }
        if config.user_agent.trim().is_empty() {
            bail!("backend client user agent required");
        }
        let base_url = Url::parse(config.base_url.trim())
            .with_context(|| format!("parse backend base url {}", config.base_url))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
        };

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key,
            user_agent: config.user_agent,
        })
    }

    fn rest_url(&self, table: &str) -> Result<Url> {
        self.base_url
            .join(&format!("rest/v1/{table}"))
            .map_err(|_| Error::Status(StatusCode::BAD_REQUEST))
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(agent) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, agent);
        }
        if !self.api_key.is_empty() {
            if let Ok(key) = HeaderValue::from_str(&self.api_key) {
                headers.insert("apikey", key.clone());
            }
            if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
                headers.insert(AUTHORIZATION, bearer);
            }
        }
        headers
    }

    fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            return Err(Error::Status(status));
        }
        Ok(response)
    }

    /// Full published feed, newest first. Ordering is server-assigned and
    /// kept as delivered.
    pub fn published_videos(&self) -> Result<Vec<VideoRecord>> {
        let mut url = self.rest_url("videos")?;
        url.query_pairs_mut()
            .append_pair(
                "select",
                "id,media_url,poster_url,caption,like_count,comment_count,created_at,published,creator:profiles(id,username,display_name,avatar_url)",
            )
            .append_pair("published", "eq.true")
            .append_pair("order", "created_at.desc");
        let response = self.http.get(url).headers(self.headers()).send()?;
        let records: Vec<VideoRecord> = Self::check(response)?.json()?;
        Ok(records)
    }

    /// Ids of the videos this viewer has liked.
    pub fn viewer_likes(&self, viewer_id: &str) -> Result<HashSet<String>> {
        #[derive(Deserialize)]
        struct Row {
            video_id: String,
        }
        let mut url = self.rest_url("video_likes")?;
        url.query_pairs_mut()
            .append_pair("select", "video_id")
            .append_pair("viewer_id", &format!("eq.{viewer_id}"));
        let response = self.http.get(url).headers(self.headers()).send()?;
        let rows: Vec<Row> = Self::check(response)?.json()?;
        Ok(rows.into_iter().map(|row| row.video_id).collect())
    }

    /// Idempotent from the caller's view: a duplicate insert conflict is
    /// treated as success so a retried like never breaks the UI.
    pub fn insert_like(&self, viewer_id: &str, video_id: &str) -> Result<()> {
        let url = self.rest_url("video_likes")?;
        let response = self
            .http
            .post(url)
            .headers(self.headers())
            .header("Prefer", "resolution=ignore-duplicates")
            .json(&LikeRow { viewer_id, video_id })
            .send()?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        Self::check(response)?;
        Ok(())
    }

    pub fn delete_like(&self, viewer_id: &str, video_id: &str) -> Result<()> {
        let mut url = self.rest_url("video_likes")?;
        url.query_pairs_mut()
            .append_pair("viewer_id", &format!("eq.{viewer_id}"))
            .append_pair("video_id", &format!("eq.{video_id}"));
        let response = self.http.delete(url).headers(self.headers()).send()?;
        Self::check(response)?;
        Ok(())
    }

    /// Authorization is enforced server-side; a forbidden response maps
    /// to [`Error::Unauthorized`] rather than a generic status error.
    pub fn delete_video(&self, video_id: &str) -> Result<()> {
        let mut url = self.rest_url("videos")?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{video_id}"));
        let response = self.http.delete(url).headers(self.headers()).send()?;
        Self::check(response)?;
        Ok(())
    }
}

/// Handle on the change-notification channel. One subscription exists per
/// mounted feed; dropping it (or calling [`Subscription::close`]) stops
/// the worker.
pub struct Subscription {
    events: Receiver<ChangeEvent>,
    stop: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Subscription {
    pub fn events(&self) -> Receiver<ChangeEvent> {
        self.events.clone()
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

/// Watches the published collection and emits row changes. The hosted
/// store's push channel is not exposed to plain HTTP clients, so this
/// polls on an interval and diffs snapshots; delivery semantics for the
/// consumer are the same (at-least-once, duplicates possible).
pub fn subscribe_to_video_changes(client: Arc<Client>, interval: Duration) -> Subscription {
    let (event_tx, event_rx) = unbounded();
    let (stop_tx, stop_rx) = bounded::<()>(1);

    let handle = thread::spawn(move || {
        let mut known: Option<HashMap<String, VideoRecord>> = None;
        loop {
            match stop_rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            }

            let records = match client.published_videos() {
                Ok(records) => records,
                Err(err) => {
                    debug_log(format!("change feed poll failed: {err}"));
                    continue;
                }
            };

            let snapshot: HashMap<String, VideoRecord> = records
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect();

            if let Some(previous) = &known {
                for event in diff_snapshots(previous, &snapshot) {
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
            }
            known = Some(snapshot);
        }
    });

    Subscription {
        events: event_rx,
        stop: stop_tx,
        handle: Some(handle),
    }
}

fn diff_snapshots(
    previous: &HashMap<String, VideoRecord>,
    current: &HashMap<String, VideoRecord>,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for (id, record) in current {
        match previous.get(id) {
            None => events.push(ChangeEvent {
                kind: ChangeKind::Insert,
                record: record.clone(),
            }),
            Some(old) if old != record => events.push(ChangeEvent {
                kind: ChangeKind::Update,
                record: record.clone(),
            }),
            Some(_) => {}
        }
    }
    for (id, record) in previous {
        if !current.contains_key(id) {
            events.push(ChangeEvent {
                kind: ChangeKind::Delete,
                record: record.clone(),
            });
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, like_count: i64) -> VideoRecord {
        VideoRecord {
            id: id.to_string(),
            media_url: format!("https://cdn.test/{id}.mp4"),
            poster_url: None,
            caption: None,
            like_count,
            comment_count: 0,
            created_at: Utc::now(),
            published: true,
            creator: None,
        }
    }

    fn snapshot(records: &[VideoRecord]) -> HashMap<String, VideoRecord> {
        records
            .iter()
            .map(|record| (record.id.clone(), record.clone()))
            .collect()
    }

    #[test]
    fn diff_reports_inserts_updates_and_deletes() {
        let old_b = record("b", 1);
        let previous = snapshot(&[record("a", 5), old_b.clone()]);
        let mut new_b = old_b;
        new_b.like_count = 2;
        let current = snapshot(&[new_b, record("c", 0)]);

        let events = diff_snapshots(&previous, &current);
        let mut kinds: Vec<(ChangeKind, String)> = events
            .into_iter()
            .map(|event| (event.kind, event.record.id))
            .collect();
        kinds.sort_by(|left, right| left.1.cmp(&right.1));
        assert_eq!(
            kinds,
            vec![
                (ChangeKind::Delete, "a".to_string()),
                (ChangeKind::Update, "b".to_string()),
                (ChangeKind::Insert, "c".to_string()),
            ]
        );
    }

    #[test]
    fn diff_is_quiet_when_nothing_changed() {
        let previous = snapshot(&[record("a", 5)]);
        let current = previous.clone();
        assert!(diff_snapshots(&previous, &current).is_empty());
    }

    #[test]
    fn client_rejects_missing_base_url() {
        let err = Client::new(ClientConfig {
            user_agent: "reelix-test".into(),
            ..ClientConfig::default()
        });
        assert!(err.is_err());
    }
}
