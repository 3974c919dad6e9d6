use std::collections::HashSet;
use std::io::{self, Stdout};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use arboard::Clipboard;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, window_size, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use once_cell::sync::Lazy;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use regex::Regex;
use semver::Version;
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;

use crate::backend::ChangeEvent;
use crate::data::{EngagementService, FeedBatch, FeedService, ModerationService};
use crate::feed::{self, Applied, LikeOp};
use crate::gesture::{self, Touch};
use crate::logging::debug_log;
use crate::playback::{self, Command, MediaElement, MediaError, Rate};
use crate::player;
use crate::session;
use crate::tracker::{Tracker, Transition};
use crate::update;

const COLOR_BG: Color = Color::Rgb(17, 17, 27);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(147, 153, 178);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_LIKE: Color = Color::Rgb(243, 139, 168);
const COLOR_SAVE: Color = Color::Rgb(249, 226, 175);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const TICK_RATE: Duration = Duration::from_millis(120);

/// Transient overlay lifetimes, matching the touch app this mirrors.
const HEART_OVERLAY: Duration = Duration::from_millis(600);
const LIKE_PULSE: Duration = Duration::from_millis(300);

// Terminal cells are coarse; gesture thresholds are tuned in logical
// pixels, so cell coordinates are scaled up before classification.
// These are fallbacks for terminals that do not report pixel size;
// `refresh_cell_pixels` replaces them with measured values.
const CELL_PX_W: f32 = 8.0;
const CELL_PX_H: f32 = 16.0;

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#@][A-Za-z0-9_]+").expect("compile tag regex"));

pub struct Options {
    pub status_message: String,
    pub feed_service: Option<Arc<dyn FeedService>>,
    pub engagement_service: Option<Arc<dyn EngagementService>>,
    pub moderation_service: Option<Arc<dyn ModerationService>>,
    pub change_events: Option<Receiver<ChangeEvent>>,
    pub session_manager: Option<Arc<session::Manager>>,
    pub deep_link: Option<String>,
    pub echo_window: Duration,
    pub mpv_path: String,
    pub start_muted: bool,
    pub config_path: String,
    pub check_updates_on_start: bool,
}

enum AsyncResponse {
    Feed {
        request_id: u64,
        result: Result<FeedBatch>,
    },
    LikeResult {
        video_id: String,
        now_liked: bool,
        error: Option<String>,
    },
    DeleteResult {
        video_id: String,
        error: Option<String>,
    },
    Update {
        result: Result<Option<update::UpdateInfo>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedPhase {
    Loading,
    Ready,
    Empty,
    Failed,
}

struct Spinner {
    frame: usize,
    last: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            frame: 0,
            last: Instant::now(),
        }
    }

    fn advance(&mut self) -> bool {
        if self.last.elapsed() >= Duration::from_millis(80) {
            self.frame = (self.frame + 1) % SPINNER_FRAMES.len();
            self.last = Instant::now();
            return true;
        }
        false
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.frame]
    }

    fn reset(&mut self) {
        self.frame = 0;
    }
}

struct ActivePlayer {
    video_id: String,
    element: player::Element,
}

struct MouseDrag {
    target_id: String,
    start_row: u16,
    scroll_at_start: f64,
}

struct LikeJob {
    viewer: String,
    op: LikeOp,
}

/// All like mutations go through one worker so rapid toggles on the
/// same video reach the backend in the order they were made. The
/// thread exits when the sender side is dropped with the model.
fn spawn_like_worker(
    service: Arc<dyn EngagementService>,
    tx: Sender<AsyncResponse>,
) -> Sender<LikeJob> {
    let (job_tx, job_rx) = unbounded::<LikeJob>();
    thread::spawn(move || {
        while let Ok(LikeJob { viewer, op }) = job_rx.recv() {
            let result = if op.now_liked {
                service.insert_like(&viewer, &op.video_id)
            } else {
                service.delete_like(&viewer, &op.video_id)
            };
            let sent = tx.send(AsyncResponse::LikeResult {
                video_id: op.video_id,
                now_liked: op.now_liked,
                error: result.err().map(|err| format!("{err:#}")),
            });
            if sent.is_err() {
                return;
            }
        }
    });
    job_tx
}

pub struct Model {
    store: feed::Store,
    tracker: Tracker,
    window: playback::Window,
    detector: gesture::Detector,
    player: Option<ActivePlayer>,

    feed_service: Option<Arc<dyn FeedService>>,
    like_jobs: Option<Sender<LikeJob>>,
    moderation_service: Option<Arc<dyn ModerationService>>,
    session_manager: Option<Arc<session::Manager>>,

    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    change_events: Option<Receiver<ChangeEvent>>,

    phase: FeedPhase,
    scroll_offset: f64,
    feed_area: Rect,
    cell_pixels: (f32, f32),
    drag: Option<MouseDrag>,

    heart_until: Option<(String, Instant)>,
    like_pulse_until: Option<(String, Instant)>,
    revealed_meta: Option<String>,
    swipe_offset: Option<(String, f32)>,

    status_message: String,
    update_notice: Option<String>,
    spinner: Spinner,
    needs_redraw: bool,
    request_counter: u64,
    pending_feed: Option<u64>,
    mpv_path: String,
    muted: bool,
    config_path: String,
    check_updates_on_start: bool,
}

impl Model {
    pub fn new(options: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let like_jobs = options
            .engagement_service
            .map(|service| spawn_like_worker(service, response_tx.clone()));
        let mut tracker = Tracker::new(1.0);
        if let Some(target) = options.deep_link {
            tracker.arm_deep_link(target);
        }
        Self {
            store: feed::Store::new(options.echo_window),
            tracker,
            window: playback::Window::new(options.start_muted),
            detector: gesture::Detector::default(),
            player: None,
            feed_service: options.feed_service,
            like_jobs,
            moderation_service: options.moderation_service,
            session_manager: options.session_manager,
            response_tx,
            response_rx,
            change_events: options.change_events,
            phase: FeedPhase::Loading,
            scroll_offset: 0.0,
            feed_area: Rect::new(0, 0, 80, 24),
            cell_pixels: (CELL_PX_W, CELL_PX_H),
            drag: None,
            heart_until: None,
            like_pulse_until: None,
            revealed_meta: None,
            swipe_offset: None,
            status_message: options.status_message,
            update_notice: None,
            spinner: Spinner::new(),
            needs_redraw: true,
            request_counter: 0,
            pending_feed: None,
            mpv_path: options.mpv_path,
            muted: options.start_muted,
            config_path: options.config_path,
            check_updates_on_start: options.check_updates_on_start,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        self.teardown_player();
        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        self.refresh_cell_pixels();
        self.reload_feed();
        if self.check_updates_on_start {
            self.queue_update_check();
        }

        let mut last_tick = Instant::now();
        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = TICK_RATE
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                                self.mark_dirty();
                            }
                        }
                    }
                    Event::Mouse(mouse) => {
                        if let Err(err) = self.handle_mouse(mouse) {
                            self.status_message = format!("Error: {}", err);
                            self.mark_dirty();
                        }
                    }
                    Event::Resize(_, _) => {
                        self.refresh_cell_pixels();
                        self.snap_to_active();
                        let viewport = self.player_viewport();
                        if let Some(active) = self.player.as_mut() {
                            active.element.set_viewport(viewport);
                        }
                        self.mark_dirty();
                    }
                    _ => {}
                }
            }

            if self.poll_async() {
                self.mark_dirty();
            }

            if last_tick.elapsed() >= TICK_RATE {
                last_tick = Instant::now();
                self.on_tick();
            }
        }

        Ok(())
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        let gestures = self.detector.tick(now);
        for (target, event) in gestures {
            self.route_gesture(&target, event);
        }

        if let Some((_, until)) = &self.heart_until {
            if now >= *until {
                self.heart_until = None;
                self.mark_dirty();
            }
        }
        if let Some((_, until)) = &self.like_pulse_until {
            if now >= *until {
                self.like_pulse_until = None;
                self.mark_dirty();
            }
        }

        if let Some(active) = self.player.as_mut() {
            active.element.poll();
        }

        if self.phase == FeedPhase::Loading {
            if self.spinner.advance() {
                self.mark_dirty();
            }
        } else {
            self.spinner.reset();
        }
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn viewer_id(&self) -> Option<String> {
        self.session_manager
            .as_ref()
            .and_then(|manager| manager.active_viewer_id())
    }

    fn active_video_id(&self) -> Option<String> {
        let index = self.tracker.active()?;
        self.store.items().get(index).map(|video| video.id.clone())
    }

    // --- async plumbing -------------------------------------------------

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        let mut events = Vec::new();
        if let Some(rx) = &self.change_events {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        for event in events {
            self.handle_change_event(event);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Feed { request_id, result } => {
                if self.pending_feed != Some(request_id) {
                    return;
                }
                self.pending_feed = None;
                match result {
                    Ok(batch) => self.install_feed(batch),
                    Err(err) => {
                        self.phase = FeedPhase::Failed;
                        self.status_message = format!("Could not load the feed: {err:#}");
                    }
                }
            }
            AsyncResponse::LikeResult {
                video_id,
                now_liked,
                error,
            } => {
                // The optimistic value stands either way; failures only
                // surface a notice and the viewer may retry.
                if let Some(err) = error {
                    let verb = if now_liked { "like" } else { "unlike" };
                    self.status_message = format!("Could not {verb} that video: {err}");
                } else if self.store.get(&video_id).is_some() {
                    self.status_message = if now_liked {
                        "Liked.".to_string()
                    } else {
                        "Like removed.".to_string()
                    };
                }
            }
            AsyncResponse::DeleteResult { video_id, error } => {
                if let Some(err) = error {
                    // A failed delete may have half-applied server side;
                    // a full refetch is the only safe reconciliation.
                    debug_log(format!("delete of {video_id} failed: {err}"));
                    self.status_message =
                        format!("Delete failed ({err}); reloading the feed.");
                    self.reload_feed();
                } else {
                    self.status_message = "Video deleted.".to_string();
                }
            }
            AsyncResponse::Update { result } => {
                if let Ok(Some(info)) = result {
                    self.update_notice = Some(format!(
                        "Reelix {} is available: {}",
                        info.version, info.release_url
                    ));
                }
            }
        }
        self.mark_dirty();
    }

    fn reload_feed(&mut self) {
        let Some(service) = self.feed_service.clone() else {
            self.phase = FeedPhase::Failed;
            self.status_message =
                format!("No backend configured. Set backend.base_url in {}.", self.config_path);
            return;
        };
        self.request_counter += 1;
        let request_id = self.request_counter;
        self.pending_feed = Some(request_id);
        self.phase = FeedPhase::Loading;
        self.mark_dirty();

        let viewer = self.viewer_id();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.load_feed(viewer.as_deref());
            let _ = tx.send(AsyncResponse::Feed { request_id, result });
        });
    }

    fn install_feed(&mut self, batch: FeedBatch) {
        self.teardown_player();
        self.window = playback::Window::new(self.muted);
        self.store.replace_all(batch.records, &batch.liked);

        if self.store.is_empty() {
            self.phase = FeedPhase::Empty;
            self.tracker.set_len(0);
            self.status_message = "The feed is empty. Press r to refresh.".to_string();
            return;
        }

        self.phase = FeedPhase::Ready;
        let transition = self.tracker.set_len(self.store.len());

        let jump = {
            let store = &self.store;
            self.tracker.take_deep_link(|id| store.index_of(id))
        };
        if let Some(jump) = jump {
            // One programmatic, non-animated jump; after this scrolling
            // is in charge again.
            self.scroll_offset = jump.offset;
            self.activate_index(jump.index);
        } else if let Some(transition) = transition {
            self.snap_to_active();
            self.activate_index(transition.to);
        } else if let Some(active) = self.tracker.active() {
            self.snap_to_active();
            self.activate_index(active);
        }
        self.status_message = format!("Loaded {} videos.", self.store.len());
    }

    fn queue_update_check(&self) {
        if std::env::var(update::SKIP_UPDATE_ENV).is_ok() {
            return;
        }
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let current = match Version::parse(crate::VERSION) {
                Ok(version) => version,
                Err(_) => return,
            };
            let result = update::check_for_update(&current);
            let _ = tx.send(AsyncResponse::Update { result });
        });
    }

    // --- change feed ----------------------------------------------------

    fn handle_change_event(&mut self, event: ChangeEvent) {
        let was_active = self.active_video_id();
        match self.store.apply_change(&event) {
            Applied::DroppedEcho => {
                debug_log(format!("dropped change echo for {}", event.record.id));
            }
            Applied::Ignored => {}
            Applied::Merged => {}
            Applied::Inserted | Applied::Removed => {
                self.sync_after_length_change(was_active);
                if self.store.is_empty() {
                    self.phase = FeedPhase::Empty;
                } else if self.phase == FeedPhase::Empty {
                    self.phase = FeedPhase::Ready;
                }
            }
        }
    }

    fn sync_after_length_change(&mut self, previously_active: Option<String>) {
        let mounted: HashSet<String> = self
            .store
            .items()
            .iter()
            .map(|video| video.id.clone())
            .collect();
        self.window.retain(|id| mounted.contains(id));
        for overlay in [&mut self.heart_until, &mut self.like_pulse_until] {
            if let Some((id, _)) = overlay {
                if !mounted.contains(id.as_str()) {
                    *overlay = None;
                }
            }
        }

        // Keep the same video active when it survived the change and its
        // position merely shifted.
        if let Some(previous) = previously_active.as_deref() {
            if let Some(index) = self.store.index_of(previous) {
                self.tracker.set_len(self.store.len());
                self.scroll_offset = index as f64 * self.tracker.item_height();
                if let Some(transition) = self.tracker.on_scroll(self.scroll_offset) {
                    self.apply_transition(transition);
                }
                return;
            }
            self.detector.forget(previous);
        }

        if let Some(transition) = self.tracker.set_len(self.store.len()) {
            self.snap_to_active();
            self.apply_transition(transition);
        } else if self.store.is_empty() {
            self.teardown_player();
        } else {
            // The index did not move, but the item occupying it did: the
            // removed video's successor takes over playback.
            self.snap_to_active();
            if let Some(active) = self.tracker.active() {
                self.activate_index(active);
            }
        }
    }

    // --- scrolling / activation ------------------------------------------

    fn snap_to_active(&mut self) {
        self.tracker
            .set_item_height(self.feed_area.height.max(1) as f64);
        if let Some(active) = self.tracker.active() {
            self.scroll_offset = active as f64 * self.tracker.item_height();
        } else {
            self.scroll_offset = 0.0;
        }
    }

    fn scroll_by(&mut self, rows: f64) {
        let max = self.tracker.max_offset();
        self.scroll_offset = (self.scroll_offset + rows).clamp(0.0, max);
        if let Some(transition) = self.tracker.on_scroll(self.scroll_offset) {
            self.apply_transition(transition);
        }
        self.mark_dirty();
    }

    fn scroll_whole_item(&mut self, direction: i64) {
        let height = self.tracker.item_height();
        self.scroll_by(direction as f64 * height);
        self.snap_to_active();
    }

    fn apply_transition(&mut self, transition: Transition) {
        self.revealed_meta = None;
        self.swipe_offset = None;
        self.activate_index(transition.to);
    }

    fn activate_index(&mut self, index: usize) {
        let target = self
            .store
            .items()
            .get(index)
            .map(|video| video.id.clone());
        // Register the controller before the window walks its entries.
        if let Some(id) = &target {
            self.window.controller(id);
        }
        let batches = self.window.set_active(target.as_deref());
        for (video_id, commands) in batches {
            self.execute_commands(&video_id, commands);
        }
        self.mark_dirty();
    }

    fn execute_commands(&mut self, video_id: &str, commands: Vec<Command>) {
        if commands.is_empty() {
            return;
        }
        let is_active = self
            .window
            .get(video_id)
            .map(|controller| controller.is_active())
            .unwrap_or(false);

        if is_active {
            let mut rejected = false;
            let mut failure: Option<String> = None;
            if self.ensure_element(video_id) {
                if let Some(active) = self.player.as_mut() {
                    for command in commands {
                        match active.element.apply(command) {
                            Ok(()) => {}
                            Err(MediaError::AutoplayRejected) => rejected = true,
                            Err(MediaError::Other(err)) => {
                                failure = Some(format!("{err:#}"));
                            }
                        }
                    }
                }
            } else {
                rejected = true;
            }
            if rejected {
                self.window.controller(video_id).autoplay_rejected();
            }
            if let Some(detail) = failure {
                self.note_playback_failure(video_id, detail);
            }
        } else if let Some(mut active) = self.player.take() {
            if active.video_id == video_id {
                for command in commands {
                    if let Err(err) = active.element.apply(command) {
                        debug_log(format!("player teardown command failed: {err}"));
                    }
                }
                active.element.shutdown();
            } else {
                self.player = Some(active);
            }
        }
    }

    fn ensure_element(&mut self, video_id: &str) -> bool {
        let matches = self
            .player
            .as_ref()
            .map(|active| active.video_id == video_id)
            .unwrap_or(false);
        if matches {
            return true;
        }
        if let Some(mut old) = self.player.take() {
            old.element.shutdown();
        }
        let Some(video) = self.store.get(video_id) else {
            return false;
        };
        let options = player::LaunchOptions {
            mpv_path: self.mpv_path.clone(),
            media_url: video.media_url.clone(),
            title: video.caption.clone(),
            viewport: self.player_viewport(),
            muted: self.muted,
        };
        self.player = Some(ActivePlayer {
            video_id: video_id.to_string(),
            element: player::Element::new(options),
        });
        true
    }

    fn teardown_player(&mut self) {
        if let Some(mut active) = self.player.take() {
            active.element.shutdown();
        }
    }

    /// A player command failed outright (mpv missing, spawn error). The
    /// controller must not keep reading as playing with nothing on
    /// screen, so it drops to the same paused affordance as a blocked
    /// autoplay and the dead element is discarded for a clean respawn.
    fn note_playback_failure(&mut self, video_id: &str, detail: String) {
        debug_log(format!("player command failed for {video_id}: {detail}"));
        self.window.controller(video_id).autoplay_rejected();
        self.teardown_player();
        self.status_message = format!("Playback unavailable: {detail}");
        self.mark_dirty();
    }

    fn refresh_cell_pixels(&mut self) {
        if let Ok(size) = window_size() {
            if size.columns > 0 && size.rows > 0 && size.width > 0 && size.height > 0 {
                self.cell_pixels = (
                    size.width as f32 / size.columns as f32,
                    size.height as f32 / size.rows as f32,
                );
            }
        }
    }

    fn player_viewport(&self) -> player::Viewport {
        let area = self.feed_area;
        player::Viewport {
            col: area.x,
            row: area.y,
            cols: area.width,
            rows: area.height,
            pixel_width: (area.width as f32 * self.cell_pixels.0) as i32,
            pixel_height: (area.height as f32 * self.cell_pixels.1) as i32,
        }
    }

    // --- input ------------------------------------------------------------

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.scroll_whole_item(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_whole_item(-1),
            KeyCode::Char('g') => {
                self.scroll_offset = 0.0;
                if let Some(transition) = self.tracker.on_scroll(0.0) {
                    self.apply_transition(transition);
                }
                self.mark_dirty();
            }
            KeyCode::Char('G') => {
                let max = self.tracker.max_offset();
                self.scroll_offset = max;
                if let Some(transition) = self.tracker.on_scroll(max) {
                    self.apply_transition(transition);
                }
                self.mark_dirty();
            }
            KeyCode::Char(' ') => {
                if let Some(id) = self.active_video_id() {
                    self.route_gesture(&id, gesture::Event::Tap { x: 0.0, y: 0.0 });
                }
            }
            KeyCode::Char('l') => self.toggle_like_selected(),
            KeyCode::Char('s') => self.toggle_save_selected(),
            KeyCode::Char('y') => self.share_selected(false),
            KeyCode::Char('o') => self.share_selected(true),
            KeyCode::Char('d') => self.delete_selected(),
            KeyCode::Char('m') => self.toggle_mute(),
            KeyCode::Char('r') => self.reload_feed(),
            _ => {}
        }
        Ok(false)
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) -> Result<()> {
        let now = Instant::now();
        let touch = Touch {
            x: mouse.column as f32 * self.cell_pixels.0,
            y: mouse.row as f32 * self.cell_pixels.1,
            at: now,
        };
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if let Some(target) = self.active_video_id() {
                    self.detector.touch_start(&target, touch);
                    self.drag = Some(MouseDrag {
                        target_id: target,
                        start_row: mouse.row,
                        scroll_at_start: self.scroll_offset,
                    });
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                let (target, scrolled) = match &self.drag {
                    Some(drag) => {
                        let delta = drag.start_row as f64 - mouse.row as f64;
                        (drag.target_id.clone(), drag.scroll_at_start + delta)
                    }
                    None => return Ok(()),
                };
                let events = self.detector.touch_move(&target, touch);
                for event in events {
                    self.route_gesture(&target, event);
                }
                let max = self.tracker.max_offset();
                self.scroll_offset = scrolled.clamp(0.0, max);
                if let Some(transition) = self.tracker.on_scroll(self.scroll_offset) {
                    self.apply_transition(transition);
                }
                self.mark_dirty();
            }
            MouseEventKind::Up(MouseButton::Left) => {
                if let Some(drag) = self.drag.take() {
                    let events = self.detector.touch_end(&drag.target_id, touch);
                    for event in events {
                        self.route_gesture(&drag.target_id, event);
                    }
                    self.snap_to_active();
                    self.mark_dirty();
                }
            }
            MouseEventKind::ScrollDown => {
                self.scroll_by(self.tracker.item_height() / 3.0);
            }
            MouseEventKind::ScrollUp => {
                self.scroll_by(-self.tracker.item_height() / 3.0);
            }
            _ => {}
        }
        Ok(())
    }

    fn route_gesture(&mut self, target: &str, event: gesture::Event) {
        match &event {
            gesture::Event::SwipeMove { offset } => {
                self.swipe_offset = Some((target.to_string(), *offset));
                self.mark_dirty();
                return;
            }
            gesture::Event::SwipeCancel => {
                self.swipe_offset = None;
                self.mark_dirty();
                return;
            }
            gesture::Event::SwipeCommit => {
                self.swipe_offset = None;
                self.revealed_meta = Some(target.to_string());
                self.mark_dirty();
                return;
            }
            gesture::Event::RevealExpired => {
                if self.revealed_meta.as_deref() == Some(target) {
                    self.revealed_meta = None;
                    self.mark_dirty();
                }
                return;
            }
            _ => {}
        }

        let item_width = self.feed_area.width as f32 * self.cell_pixels.0;
        let (commands, effect) = self
            .window
            .controller(target)
            .handle_gesture(&event, item_width);
        self.execute_commands(target, commands);
        if let Some(playback::Effect::EnsureLiked) = effect {
            self.ensure_liked(target);
        }
        self.mark_dirty();
    }

    // --- engagement -------------------------------------------------------

    fn toggle_like_selected(&mut self) {
        let Some(video_id) = self.active_video_id() else {
            return;
        };
        let Some(viewer) = self.viewer_id() else {
            self.status_message =
                "Liking needs a viewer identity (set backend.viewer_id in config).".to_string();
            self.mark_dirty();
            return;
        };
        match self.store.toggle_like(&video_id) {
            Ok(op) => {
                self.like_pulse_until = Some((video_id, Instant::now() + LIKE_PULSE));
                self.queue_like(viewer, op);
            }
            Err(err) => self.status_message = format!("Error: {err}"),
        }
        self.mark_dirty();
    }

    /// Double-tap semantics: never unlikes, heart overlay plays whether or
    /// not the flag flipped.
    fn ensure_liked(&mut self, video_id: &str) {
        self.heart_until = Some((video_id.to_string(), Instant::now() + HEART_OVERLAY));
        let Some(viewer) = self.viewer_id() else {
            self.status_message =
                "Liking needs a viewer identity (set backend.viewer_id in config).".to_string();
            return;
        };
        match self.store.ensure_liked(video_id) {
            Ok(Some(op)) => self.queue_like(viewer, op),
            Ok(None) => {}
            Err(err) => self.status_message = format!("Error: {err}"),
        }
    }

    fn queue_like(&mut self, viewer: String, op: LikeOp) {
        if let Some(jobs) = &self.like_jobs {
            let _ = jobs.send(LikeJob { viewer, op });
        }
    }

    fn toggle_save_selected(&mut self) {
        let Some(video_id) = self.active_video_id() else {
            return;
        };
        match self.store.toggle_save(&video_id) {
            Ok(saved) => {
                self.like_pulse_until = Some((video_id, Instant::now() + LIKE_PULSE));
                self.status_message = if saved {
                    "Saved for later.".to_string()
                } else {
                    "Removed from saved.".to_string()
                };
            }
            Err(err) => self.status_message = format!("Error: {err}"),
        }
        self.mark_dirty();
    }

    fn share_selected(&mut self, open: bool) {
        let Some(video) = self
            .active_video_id()
            .and_then(|id| self.store.get(&id).cloned())
        else {
            return;
        };
        if open {
            self.status_message = match webbrowser::open(&video.media_url) {
                Ok(()) => "Opened in your browser.".to_string(),
                Err(err) => format!("Could not open browser: {err}"),
            };
        } else {
            self.status_message = match Clipboard::new()
                .and_then(|mut clipboard| clipboard.set_text(video.media_url.clone()))
            {
                Ok(()) => "Link copied to clipboard.".to_string(),
                Err(err) => format!("Could not copy link: {err}"),
            };
        }
        self.mark_dirty();
    }

    fn delete_selected(&mut self) {
        let Some(video_id) = self.active_video_id() else {
            return;
        };
        let Some(viewer) = self.viewer_id() else {
            self.status_message = "Deleting needs a viewer identity.".to_string();
            self.mark_dirty();
            return;
        };
        let creator = self
            .store
            .get(&video_id)
            .and_then(|video| video.creator.as_ref().map(|creator| creator.id.clone()));
        if creator.as_deref() != Some(viewer.as_str()) {
            self.status_message = "Only the creator can delete this video.".to_string();
            self.mark_dirty();
            return;
        }
        let Some(service) = self.moderation_service.clone() else {
            return;
        };

        let was_active = self.active_video_id();
        if self.store.remove(&video_id).is_err() {
            return;
        }
        self.sync_after_length_change(was_active.filter(|id| *id != video_id));
        if self.store.is_empty() {
            self.phase = FeedPhase::Empty;
        }
        self.status_message = "Deleting video…".to_string();
        self.mark_dirty();

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let error = service
                .delete_video(&video_id)
                .err()
                .map(|err| format!("{err:#}"));
            let _ = tx.send(AsyncResponse::DeleteResult { video_id, error });
        });
    }

    fn toggle_mute(&mut self) {
        self.muted = !self.muted;
        self.window.set_muted(self.muted);
        if let Some(id) = self.window.active_id().map(str::to_string) {
            self.execute_commands(&id, vec![Command::SetMuted(self.muted)]);
        }
        self.status_message = if self.muted {
            "Muted.".to_string()
        } else {
            "Sound on.".to_string()
        };
        self.mark_dirty();
    }

    // --- drawing ----------------------------------------------------------

    fn draw(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(1)])
            .split(frame.size());
        self.feed_area = chunks[0];
        self.tracker
            .set_item_height(self.feed_area.height.max(1) as f64);

        frame.render_widget(
            Block::default().style(Style::default().bg(COLOR_BG)),
            frame.size(),
        );

        match self.phase {
            FeedPhase::Loading => self.draw_notice(
                frame,
                chunks[0],
                format!("{} Loading the feed…", self.spinner.frame()),
                COLOR_TEXT_SECONDARY,
            ),
            FeedPhase::Failed => self.draw_notice(
                frame,
                chunks[0],
                "Could not reach the feed.\n\nPress r to retry.".to_string(),
                COLOR_ERROR,
            ),
            FeedPhase::Empty => self.draw_notice(
                frame,
                chunks[0],
                "No videos yet.\n\nPress r to refresh.".to_string(),
                COLOR_TEXT_SECONDARY,
            ),
            FeedPhase::Ready => self.draw_feed_item(frame, chunks[0]),
        }

        self.draw_status_bar(frame, chunks[1]);
    }

    fn draw_notice(&self, frame: &mut Frame, area: Rect, message: String, color: Color) {
        let block = Paragraph::new(message)
            .style(Style::default().fg(color).bg(COLOR_BG))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(Block::default().padding(Padding::new(2, 2, area.height / 3, 0)));
        frame.render_widget(block, area);
    }

    fn draw_feed_item(&mut self, frame: &mut Frame, area: Rect) {
        let Some(index) = self.tracker.active() else {
            return;
        };
        let Some(video) = self.store.items().get(index).cloned() else {
            return;
        };
        let controller_playing = self
            .window
            .get(&video.id)
            .map(|controller| controller.is_playing())
            .unwrap_or(false);
        let awaiting_tap = self
            .window
            .get(&video.id)
            .map(|controller| controller.awaiting_tap())
            .unwrap_or(false);
        let boosted = self
            .window
            .get(&video.id)
            .map(|controller| controller.rate() == Rate::Double)
            .unwrap_or(false);

        // Header: position in the feed + update banner.
        let mut header_lines = vec![Line::from(vec![
            Span::styled(
                " Reelix ",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("{}/{}", index + 1, self.store.len()),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ),
        ])];
        if let Some(notice) = &self.update_notice {
            header_lines.push(Line::from(Span::styled(
                format!(" {} ", fit_to_width(notice, area.width.saturating_sub(2) as usize)),
                Style::default().fg(COLOR_SAVE),
            )));
        }
        frame.render_widget(
            Paragraph::new(header_lines),
            Rect::new(area.x, area.y, area.width, 2.min(area.height)),
        );

        // Center overlays.
        if let Some((id, _)) = &self.heart_until {
            if *id == video.id {
                self.draw_center_badge(frame, area, "♥", COLOR_LIKE);
            }
        } else if awaiting_tap || !controller_playing {
            self.draw_center_badge(frame, area, "▶", COLOR_TEXT_PRIMARY);
        }
        if boosted {
            let badge = Paragraph::new(" 2x ")
                .style(Style::default().fg(COLOR_BG).bg(COLOR_TEXT_PRIMARY))
                .alignment(Alignment::Center);
            let rect = Rect::new(
                area.x + area.width.saturating_sub(6) / 2,
                area.y + 2,
                6.min(area.width),
                1,
            );
            frame.render_widget(badge, rect);
        }

        self.draw_action_rail(frame, area, &video);
        self.draw_caption(frame, area, &video);
    }

    fn draw_center_badge(&self, frame: &mut Frame, area: Rect, symbol: &str, color: Color) {
        if area.height < 3 || area.width < 7 {
            return;
        }
        let rect = Rect::new(
            area.x + area.width / 2 - 3,
            area.y + area.height / 2 - 1,
            7,
            3,
        );
        frame.render_widget(Clear, rect);
        let badge = Paragraph::new(Text::from(vec![
            Line::default(),
            Line::from(Span::styled(
                symbol,
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            )),
        ]))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).style(Style::default().fg(color)));
        frame.render_widget(badge, rect);
    }

    fn draw_action_rail(&self, frame: &mut Frame, area: Rect, video: &feed::Video) {
        if area.width < 12 || area.height < 8 {
            return;
        }
        let pulsing = self
            .like_pulse_until
            .as_ref()
            .map(|(id, _)| *id == video.id)
            .unwrap_or(false);
        let like_style = if video.is_liked {
            Style::default().fg(COLOR_LIKE).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(COLOR_TEXT_PRIMARY)
        };
        let like_style = if pulsing {
            like_style.add_modifier(Modifier::REVERSED)
        } else {
            like_style
        };
        let save_style = if video.is_saved {
            Style::default().fg(COLOR_SAVE).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(COLOR_TEXT_PRIMARY)
        };

        let lines = vec![
            Line::from(Span::styled(
                format!("♥ {:>5}", format_count(video.like_count)),
                like_style,
            )),
            Line::from(Span::styled(
                format!("◆ {:>5}", format_count(video.comment_count)),
                Style::default().fg(COLOR_TEXT_PRIMARY),
            )),
            Line::from(Span::styled(
                if video.is_saved { "■ saved" } else { "□ save " }.to_string(),
                save_style,
            )),
            Line::from(Span::styled(
                "↗ share".to_string(),
                Style::default().fg(COLOR_TEXT_PRIMARY),
            )),
        ];
        let rail_height = lines.len() as u16;
        let rect = Rect::new(
            area.x + area.width.saturating_sub(10),
            area.y + area.height.saturating_sub(rail_height + 5),
            9,
            rail_height,
        );
        frame.render_widget(Paragraph::new(lines).alignment(Alignment::Left), rect);
    }

    fn draw_caption(&self, frame: &mut Frame, area: Rect, video: &feed::Video) {
        if area.height < 6 {
            return;
        }
        let width = area.width.saturating_sub(14).max(10) as usize;
        let mut lines: Vec<Line> = Vec::new();

        let creator = video
            .creator
            .as_ref()
            .map(|creator| {
                if creator.username.is_empty() {
                    creator.display_name.clone()
                } else {
                    format!("@{}", creator.username)
                }
            })
            .unwrap_or_else(|| "unknown".to_string());
        lines.push(Line::from(Span::styled(
            creator,
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD),
        )));

        // Swiping a bubble left reveals the absolute timestamp, else the
        // relative age rides along with the creator line.
        let meta = if self.revealed_meta.as_deref() == Some(video.id.as_str()) {
            video.created_at.format("%Y-%m-%d %H:%M UTC").to_string()
        } else {
            relative_time(video.created_at, Utc::now())
        };
        let swipe_pad = self
            .swipe_offset
            .as_ref()
            .filter(|(id, _)| *id == video.id)
            .map(|(_, offset)| (offset.abs() / self.cell_pixels.0) as usize)
            .unwrap_or(0);
        lines.push(Line::from(Span::styled(
            format!("{}{}", " ".repeat(swipe_pad.min(width)), meta),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )));

        if !video.caption.is_empty() {
            for wrapped in wrap(&video.caption, WrapOptions::new(width)).into_iter().take(3) {
                lines.push(highlight_tags(&wrapped));
            }
        }

        let caption_height = lines.len() as u16;
        let rect = Rect::new(
            area.x + 1,
            area.y + area.height.saturating_sub(caption_height + 1),
            area.width.saturating_sub(14).max(10),
            caption_height,
        );
        frame.render_widget(Paragraph::new(lines), rect);
    }

    fn draw_status_bar(&self, frame: &mut Frame, area: Rect) {
        let viewer = self
            .session_manager
            .as_ref()
            .and_then(|manager| manager.active())
            .map(|viewer| {
                if viewer.display_name.is_empty() {
                    viewer.id
                } else {
                    viewer.display_name
                }
            })
            .unwrap_or_else(|| "anonymous".to_string());
        let hints = "j/k scroll · space pause · l like · s save · y share · q quit";
        let left = format!(" {} ", self.status_message);
        let right = format!(" {hints} · {viewer} ");
        let pad = (area.width as usize)
            .saturating_sub(UnicodeWidthStr::width(left.as_str()))
            .saturating_sub(UnicodeWidthStr::width(right.as_str()));
        let line = Line::from(vec![
            Span::styled(left, Style::default().fg(COLOR_TEXT_PRIMARY)),
            Span::raw(" ".repeat(pad)),
            Span::styled(right, Style::default().fg(COLOR_TEXT_SECONDARY)),
        ]);
        frame.render_widget(
            Paragraph::new(line).style(Style::default().bg(COLOR_BG)),
            area,
        );
    }
}

fn highlight_tags(text: &str) -> Line<'static> {
    let mut spans = Vec::new();
    let mut cursor = 0;
    for found in TAG_RE.find_iter(text) {
        if found.start() > cursor {
            spans.push(Span::styled(
                text[cursor..found.start()].to_string(),
                Style::default().fg(COLOR_TEXT_PRIMARY),
            ));
        }
        spans.push(Span::styled(
            found.as_str().to_string(),
            Style::default().fg(COLOR_ACCENT),
        ));
        cursor = found.end();
    }
    if cursor < text.len() {
        spans.push(Span::styled(
            text[cursor..].to_string(),
            Style::default().fg(COLOR_TEXT_PRIMARY),
        ));
    }
    Line::from(spans)
}

fn format_count(count: u64) -> String {
    if count >= 1_000_000 {
        let value = count as f64 / 1_000_000.0;
        let formatted = format!("{value:.1}");
        format!("{}M", formatted.trim_end_matches(".0"))
    } else if count >= 1_000 {
        let value = count as f64 / 1_000.0;
        let formatted = format!("{value:.1}");
        format!("{}K", formatted.trim_end_matches(".0"))
    } else {
        count.to_string()
    }
}

fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(then);
    let seconds = delta.num_seconds().max(0);
    if seconds < 60 {
        "just now".to_string()
    } else if seconds < 3600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h ago", seconds / 3600)
    } else if seconds < 7 * 86_400 {
        format!("{}d ago", seconds / 86_400)
    } else {
        then.format("%b %e, %Y").to_string()
    }
}

fn fit_to_width(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = UnicodeWidthStr::width(ch.to_string().as_str());
        if used + w + 1 > width {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    use crate::backend::{ChangeKind, VideoRecord};

    fn test_options() -> Options {
        Options {
            status_message: String::new(),
            feed_service: None,
            engagement_service: None,
            moderation_service: None,
            change_events: None,
            session_manager: None,
            deep_link: None,
            echo_window: Duration::from_secs(5),
            mpv_path: "mpv".to_string(),
            start_muted: true,
            config_path: "config.yaml".to_string(),
            check_updates_on_start: false,
        }
    }

    fn record(id: &str) -> VideoRecord {
        VideoRecord {
            id: id.to_string(),
            media_url: format!("https://cdn.test/{id}.mp4"),
            poster_url: None,
            caption: None,
            like_count: 0,
            comment_count: 0,
            created_at: Utc::now(),
            published: true,
            creator: None,
        }
    }

    fn model_with_feed(options: Options, ids: &[&str]) -> Model {
        let mut model = Model::new(options);
        let records = ids.iter().map(|id| record(id)).collect();
        model.install_feed(FeedBatch {
            records,
            liked: HashSet::new(),
        });
        model
    }

    #[derive(Default)]
    struct RecordingEngagement {
        calls: Mutex<Vec<String>>,
    }

    impl EngagementService for RecordingEngagement {
        fn insert_like(&self, _viewer_id: &str, video_id: &str) -> Result<()> {
            self.calls.lock().push(format!("insert {video_id}"));
            Ok(())
        }

        fn delete_like(&self, _viewer_id: &str, video_id: &str) -> Result<()> {
            self.calls.lock().push(format!("delete {video_id}"));
            Ok(())
        }
    }

    #[test]
    fn deleting_the_active_video_hands_playback_to_its_successor() {
        let mut model = model_with_feed(test_options(), &["a", "b", "c"]);
        assert_eq!(model.window.active_id(), Some("a"));

        model.handle_change_event(ChangeEvent {
            kind: ChangeKind::Delete,
            record: record("a"),
        });

        assert_eq!(model.tracker.active(), Some(0));
        assert_eq!(model.window.active_id(), Some("b"));
        assert_eq!(model.window.active_count(), 1);
    }

    #[test]
    fn local_delete_of_the_last_item_activates_the_one_before() {
        let mut model = model_with_feed(test_options(), &["a", "b"]);
        model.scroll_whole_item(1);
        assert_eq!(model.window.active_id(), Some("b"));

        model.handle_change_event(ChangeEvent {
            kind: ChangeKind::Delete,
            record: record("b"),
        });

        assert_eq!(model.tracker.active(), Some(0));
        assert_eq!(model.window.active_id(), Some("a"));
    }

    #[test]
    fn rapid_like_toggles_reach_the_backend_in_order() {
        let service = Arc::new(RecordingEngagement::default());
        let mut options = test_options();
        options.engagement_service = Some(service.clone() as Arc<dyn EngagementService>);
        let mut model = model_with_feed(options, &["a"]);

        for now_liked in [true, false, true] {
            model.queue_like(
                "viewer-1".to_string(),
                LikeOp {
                    video_id: "a".to_string(),
                    now_liked,
                },
            );
        }
        for _ in 0..3 {
            model
                .response_rx
                .recv_timeout(Duration::from_secs(2))
                .expect("like result");
        }

        assert_eq!(
            *service.calls.lock(),
            vec!["insert a", "delete a", "insert a"]
        );
    }

    #[test]
    fn speed_band_geometry_follows_measured_cell_width() {
        // 80 columns at 10px per cell: the right 30% starts at x = 560.
        let mut inside = Model::new(test_options());
        inside.cell_pixels = (10.0, 20.0);
        inside.window.controller("v");
        inside.window.set_active(Some("v"));
        inside.route_gesture("v", gesture::Event::HoldStart { x: 700.0, y: 0.0 });
        assert_eq!(inside.window.get("v").unwrap().rate(), Rate::Double);

        let mut outside = Model::new(test_options());
        outside.cell_pixels = (10.0, 20.0);
        outside.window.controller("v");
        outside.window.set_active(Some("v"));
        outside.route_gesture("v", gesture::Event::HoldStart { x: 500.0, y: 0.0 });
        assert_eq!(outside.window.get("v").unwrap().rate(), Rate::Normal);
    }

    #[test]
    fn a_failed_player_spawn_pauses_with_a_play_affordance() {
        let mut model = Model::new(test_options());
        model.window.controller("a");
        model.window.set_active(Some("a"));
        assert!(model.window.get("a").unwrap().is_playing());

        model.note_playback_failure("a", "mpv exited unexpectedly".to_string());

        let controller = model.window.get("a").unwrap();
        assert!(!controller.is_playing());
        assert!(controller.awaiting_tap());
        assert!(model.player.is_none());
        assert!(model.status_message.contains("Playback unavailable"));
    }

    #[test]
    fn count_formatting_matches_feed_labels() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1K");
        assert_eq!(format_count(1_300), "1.3K");
        assert_eq!(format_count(1_000_000), "1M");
        assert_eq!(format_count(2_400_000), "2.4M");
    }

    #[test]
    fn relative_time_buckets() {
        let now = Utc.with_ymd_and_hms(2026, 8, 27, 12, 0, 0).unwrap();
        let minute = Utc.with_ymd_and_hms(2026, 8, 27, 11, 58, 0).unwrap();
        let hour = Utc.with_ymd_and_hms(2026, 8, 27, 9, 0, 0).unwrap();
        let day = Utc.with_ymd_and_hms(2026, 8, 25, 12, 0, 0).unwrap();
        assert_eq!(relative_time(now, now), "just now");
        assert_eq!(relative_time(minute, now), "2m ago");
        assert_eq!(relative_time(hour, now), "3h ago");
        assert_eq!(relative_time(day, now), "2d ago");
    }

    #[test]
    fn fit_to_width_truncates_with_ellipsis() {
        assert_eq!(fit_to_width("short", 10), "short");
        let long = fit_to_width("a very long update banner", 10);
        assert!(long.ends_with('…'));
        assert!(UnicodeWidthStr::width(long.as_str()) <= 10);
    }

    #[test]
    fn hashtags_and_mentions_get_their_own_spans() {
        let line = highlight_tags("watch #sunset with @ana now");
        assert_eq!(line.spans.len(), 5);
        assert_eq!(line.spans[1].content, "#sunset");
        assert_eq!(line.spans[3].content, "@ana");
    }
}
