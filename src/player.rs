use std::process::{Command as ProcessCommand, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use serde_json::json;

#[cfg(any(unix, target_os = "windows"))]
use rand::{distributions::Alphanumeric, Rng};
#[cfg(unix)]
use std::io::Write;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::logging::debug_log;
use crate::playback::{Command, MediaElement, MediaError, Rate};

/// Where on the terminal the video is drawn, in cells plus the pixel size
/// of that region.
#[derive(Debug, Clone, Copy, Default)]
pub struct Viewport {
    pub col: u16,
    pub row: u16,
    pub cols: u16,
    pub rows: u16,
    pub pixel_width: i32,
    pub pixel_height: i32,
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub mpv_path: String,
    pub media_url: String,
    pub title: String,
    pub viewport: Viewport,
    pub muted: bool,
}

/// One running inline mpv process, drawing into the terminal with the
/// kitty graphics protocol and controlled over its JSON IPC socket.
pub struct Session {
    kill_tx: Sender<()>,
    status_rx: Receiver<Result<ExitStatus>>,
    handle: Option<thread::JoinHandle<()>>,
    ipc_path: Option<String>,
}

impl Session {
    fn finalize(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Non-blocking exit check; `Some` once mpv has gone away.
    pub fn try_status(&mut self) -> Option<Result<ExitStatus>> {
        match self.status_rx.try_recv() {
            Ok(res) => {
                self.finalize();
                Some(res)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finalize();
                Some(Err(anyhow!("player session closed unexpectedly")))
            }
        }
    }

    pub fn stop_blocking(mut self) -> Option<Result<ExitStatus>> {
        let _ = self.kill_tx.send(());
        let res = self.status_rx.recv().ok();
        self.finalize();
        res
    }

    fn send(&self, payload: serde_json::Value) -> Result<()> {
        let Some(path) = &self.ipc_path else {
            return Err(anyhow!("player controls are not supported on this platform"));
        };
        let serialized = serde_json::to_string(&payload).context("serialize player command")?;
        send_ipc_line(path, &serialized)
    }

    fn set_property(&self, name: &str, value: serde_json::Value) -> Result<()> {
        self.send(json!({ "command": ["set_property", name, value] }))
    }

    fn seek_to_start(&self) -> Result<()> {
        self.send(json!({ "command": ["seek", 0, "absolute"] }))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.kill_tx.send(());
            let _ = self.status_rx.recv().ok();
            self.finalize();
        }
    }
}

/// Kitty graphics support is what autoplay hinges on in a terminal: when
/// the host terminal cannot draw inline video, playback cannot start
/// without the user choosing an action, mirroring platform autoplay
/// policy.
pub fn inline_video_supported() -> bool {
    if std::env::var("KITTY_WINDOW_ID").is_ok() {
        return true;
    }
    std::env::var("TERM")
        .map(|term| term.contains("kitty"))
        .unwrap_or(false)
}

/// [`MediaElement`] backed by an inline mpv session. The process is
/// spawned lazily on the first play; pause/rate/mute/seek go over IPC.
pub struct Element {
    options: LaunchOptions,
    session: Option<Session>,
}

impl Element {
    pub fn new(options: LaunchOptions) -> Self {
        Self {
            options,
            session: None,
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.options.viewport = viewport;
    }

    /// Reap a finished session so the next play respawns.
    pub fn poll(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if session.try_status().is_some() {
                self.session = None;
            }
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.stop_blocking();
        }
    }

    fn ensure_session(&mut self) -> Result<&Session, MediaError> {
        if self.session.is_none() {
            if !inline_video_supported() {
                return Err(MediaError::AutoplayRejected);
            }
            let session = spawn_inline(&self.options).map_err(MediaError::Other)?;
            self.session = Some(session);
        }
        Ok(self.session.as_ref().unwrap())
    }
}

impl MediaElement for Element {
    fn apply(&mut self, command: Command) -> Result<(), MediaError> {
        match command {
            Command::Play => {
                let spawned = self.session.is_none();
                let session = self.ensure_session()?;
                if !spawned {
                    session
                        .set_property("pause", json!(false))
                        .map_err(MediaError::Other)?;
                }
                Ok(())
            }
            Command::Pause => match &self.session {
                Some(session) => session
                    .set_property("pause", json!(true))
                    .map_err(MediaError::Other),
                None => Ok(()),
            },
            Command::SeekToStart => match &self.session {
                Some(session) => session.seek_to_start().map_err(MediaError::Other),
                None => Ok(()),
            },
            Command::SetRate(rate) => match &self.session {
                Some(session) => {
                    let speed = match rate {
                        Rate::Normal => 1.0,
                        Rate::Double => 2.0,
                    };
                    session
                        .set_property("speed", json!(speed))
                        .map_err(MediaError::Other)
                }
                None => Ok(()),
            },
            Command::SetMuted(muted) => match &self.session {
                Some(session) => session
                    .set_property("mute", json!(muted))
                    .map_err(MediaError::Other),
                None => {
                    self.options.muted = muted;
                    Ok(())
                }
            },
        }
    }
}

fn spawn_inline(options: &LaunchOptions) -> Result<Session> {
    if options.media_url.trim().is_empty() {
        return Err(anyhow!("video URL missing"));
    }

    let (kill_tx, kill_rx) = bounded::<()>(1);
    let (status_tx, status_rx) = bounded::<Result<ExitStatus>>(1);

    let mpv_path = options.mpv_path.clone();
    let media_url = options.media_url.clone();
    let title = options.title.clone();
    let viewport = options.viewport;
    let muted = options.muted;
    let ipc_path = unique_ipc_path();
    let ipc_path_for_session = ipc_path.clone();

    debug_log(format!(
        "spawning inline mpv at {},{} {}x{} url={} ipc={}",
        viewport.col,
        viewport.row,
        viewport.cols,
        viewport.rows,
        media_url,
        ipc_path.as_deref().unwrap_or("n/a")
    ));
    #[cfg(unix)]
    if let Some(path) = &ipc_path {
        let _ = std::fs::remove_file(path);
    }

    let handle = thread::spawn(move || {
        let ipc_cleanup = ipc_path.clone();
        let result = (|| -> Result<ExitStatus> {
            let mut args = vec![
                media_url.clone(),
                "--vo=kitty".to_string(),
                format!("--vo-kitty-cols={}", viewport.cols.max(1)),
                format!("--vo-kitty-rows={}", viewport.rows.max(1)),
                format!("--vo-kitty-left={}", u32::from(viewport.col).saturating_add(1)),
                format!("--vo-kitty-top={}", u32::from(viewport.row).saturating_add(1)),
                format!("--vo-kitty-width={}", viewport.pixel_width.max(1)),
                format!("--vo-kitty-height={}", viewport.pixel_height.max(1)),
                "--vo-kitty-config-clear=no".to_string(),
                "--force-window=no".to_string(),
                "--keep-open=no".to_string(),
                "--loop-file=inf".to_string(),
                "--really-quiet".to_string(),
                "--idle=no".to_string(),
                "--terminal=no".to_string(),
                "--input-terminal=no".to_string(),
                "--no-config".to_string(),
                "--ytdl=no".to_string(),
                "--osc=no".to_string(),
                "--osd-level=0".to_string(),
            ];
            if muted {
                args.push("--mute=yes".to_string());
            }
            if let Some(path) = &ipc_path {
                args.push(format!("--input-ipc-server={path}"));
            }
            if !title.is_empty() {
                args.push(format!("--force-media-title={title}"));
            }

            let mut command = ProcessCommand::new(&mpv_path);
            for arg in &args {
                command.arg(arg);
            }
            command.stdin(Stdio::null());
            command.stderr(Stdio::null());
            #[cfg(unix)]
            {
                use std::os::unix::io::{AsRawFd, FromRawFd};

                let stdout = std::io::stdout();
                let fd = stdout.as_raw_fd();
                let dup_fd = unsafe { libc::dup(fd) };
                if dup_fd >= 0 {
                    let stdio = unsafe { Stdio::from_raw_fd(dup_fd) };
                    command.stdout(stdio);
                } else {
                    command.stdout(Stdio::inherit());
                }
            }
            #[cfg(not(unix))]
            {
                command.stdout(Stdio::inherit());
            }

            let mut child = command
                .spawn()
                .with_context(|| format!("launch mpv to play {media_url}"))?;

            loop {
                if kill_rx.try_recv().is_ok() {
                    let _ = child.kill();
                    return child.wait().context("wait for mpv after stop request");
                }
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug_log(format!("mpv exited with status {:?}", status.code()));
                        return Ok(status);
                    }
                    Ok(None) => thread::sleep(Duration::from_millis(30)),
                    Err(err) => return Err(anyhow!(err)).context("poll mpv status"),
                }
            }
        })();
        #[cfg(unix)]
        if let Some(path) = ipc_cleanup {
            let _ = std::fs::remove_file(path);
        }
        #[cfg(not(unix))]
        let _ = ipc_cleanup;

        let _ = status_tx.send(result);
    });

    Ok(Session {
        kill_tx,
        status_rx,
        handle: Some(handle),
        ipc_path: ipc_path_for_session,
    })
}

#[cfg(unix)]
fn send_ipc_line(path: &str, serialized: &str) -> Result<()> {
    let mut stream = UnixStream::connect(path)
        .with_context(|| format!("connect to mpv IPC socket {path}"))?;
    stream
        .write_all(serialized.as_bytes())
        .context("write mpv IPC command")?;
    stream
        .write_all(b"\n")
        .context("write mpv IPC command terminator")?;
    Ok(())
}

#[cfg(target_os = "windows")]
fn send_ipc_line(path: &str, serialized: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::{ErrorKind, Write};

    const PIPE_RETRIES: usize = 5;
    const PIPE_RETRY_DELAY: Duration = Duration::from_millis(100);

    for attempt in 0..PIPE_RETRIES {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(mut pipe) => {
                pipe.write_all(serialized.as_bytes())
                    .with_context(|| format!("write mpv IPC command to {path}"))?;
                pipe.write_all(b"\n")
                    .with_context(|| format!("write mpv IPC terminator to {path}"))?;
                pipe.flush().ok();
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::NotFound && attempt + 1 < PIPE_RETRIES => {
                thread::sleep(PIPE_RETRY_DELAY);
            }
            Err(err) => {
                return Err(anyhow!(err)).context(format!("connect to mpv IPC pipe {path}"));
            }
        }
    }

    Err(anyhow!("connect to mpv IPC pipe {}", path))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn send_ipc_line(_path: &str, _serialized: &str) -> Result<()> {
    Err(anyhow!("player controls are not supported on this platform"))
}

#[cfg(unix)]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    let mut path = std::env::temp_dir();
    path.push(format!("reelix-mpv-{}-{suffix}.sock", std::process::id()));
    Some(path.to_string_lossy().to_string())
}

#[cfg(target_os = "windows")]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    Some(format!(
        r"\\.\pipe\reelix-mpv-{}-{suffix}",
        std::process::id()
    ))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn unique_ipc_path() -> Option<String> {
    None
}
