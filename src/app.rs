use std::sync::Arc;

use anyhow::{Context, Result};

use crate::backend;
use crate::config;
use crate::data::{self, EngagementService, FeedService, ModerationService};
use crate::session;
use crate::storage;
use crate::ui;

#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    /// Skip the backend and show a small built-in sample feed.
    pub offline: bool,
    /// Jump straight to this video id after the first load.
    pub video_id: Option<String>,
}

pub fn run(run_options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let config_path = config::default_path();
    let display_path = friendly_path(config_path.as_ref());

    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);

    let session_manager = Arc::new(session::Manager::new(store.clone()));
    session_manager
        .load_existing()
        .context("restore viewer session")?;
    if session_manager.active().is_none() && !cfg.backend.viewer_id.is_empty() {
        let now = chrono::Utc::now();
        let viewer = storage::Viewer {
            id: cfg.backend.viewer_id.clone(),
            display_name: cfg.backend.viewer_name.clone(),
            created_at: now,
            updated_at: now,
        };
        session_manager
            .sign_in(viewer)
            .context("sign in configured viewer")?;
    }

    let mut feed_service: Option<Arc<dyn FeedService>> = None;
    let mut engagement_service: Option<Arc<dyn EngagementService>> = None;
    let mut moderation_service: Option<Arc<dyn ModerationService>> = None;
    let mut subscription: Option<backend::Subscription> = None;
    let status: String;

    if run_options.offline {
        feed_service = Some(Arc::new(data::MockFeedService));
        engagement_service = Some(Arc::new(data::MockEngagementService));
        moderation_service = Some(Arc::new(data::MockModerationService));
        status = "Offline mode: showing sample clips. Press q to quit.".to_string();
    } else if cfg.backend.base_url.trim().is_empty() {
        status = format!(
            "No backend configured. Set backend.base_url in {display_path} or run with --offline."
        );
    } else {
        let client = backend::Client::new(backend::ClientConfig {
            base_url: cfg.backend.base_url.clone(),
            api_key: cfg.backend.api_key.clone(),
            user_agent: cfg.backend.user_agent.clone(),
            http_client: None,
        })
        .context("create backend client")?;
        let client = Arc::new(client);

        feed_service = Some(Arc::new(data::BackendFeedService::new(client.clone())));
        engagement_service = Some(Arc::new(data::BackendEngagementService::new(
            client.clone(),
        )));
        moderation_service = Some(Arc::new(data::BackendModerationService::new(
            client.clone(),
        )));
        subscription = Some(backend::subscribe_to_video_changes(
            client,
            cfg.feed.poll_interval,
        ));
        status = "Loading your feed. j/k to scroll, space to pause, q to quit.".to_string();
    }

    let options = ui::Options {
        status_message: status,
        feed_service,
        engagement_service,
        moderation_service,
        change_events: subscription.as_ref().map(|sub| sub.events()),
        session_manager: Some(session_manager),
        deep_link: run_options.video_id,
        echo_window: cfg.feed.echo_window,
        mpv_path: cfg.player.mpv_path.clone(),
        start_muted: cfg.player.start_muted,
        config_path: display_path,
        check_updates_on_start: !run_options.offline,
    };

    let mut model = ui::Model::new(options);
    let result = model.run();

    if let Some(subscription) = subscription {
        subscription.close();
    }

    result
}

fn friendly_path(path: Option<&std::path::PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/reelix/config.yaml".to_string()
    }
}
