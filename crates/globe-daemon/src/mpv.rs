/// mpv IPC driver and the `MediaElement` backed by it.
///
/// Architecture:
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → SignalTagger, then matched oneshot
///                                └── event                     → SignalTagger → CoreEvent::Media
/// ```
///
/// mpv knows nothing about playback tokens.  `SignalTagger` binds every
/// `loadfile` to the token it was issued for (via the `playlist_entry_id` in
/// the reply) and attributes `file-loaded` / `end-file` events to that token.
/// The reader task is the only place events are translated, so replies and
/// events are seen in socket order.
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use globe_core::error::MediaError;
use globe_core::playback::MediaElement;
use globe_core::protocol::{MediaSignal, PlaybackToken};

use crate::core::CoreEvent;

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

fn next_req_id() -> u64 {
    NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed)
}

// ── internal channel types ────────────────────────────────────────────────────

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    /// `None` for fire-and-forget commands.
    reply: Option<oneshot::Sender<anyhow::Result<Value>>>,
}

fn encode(req_id: u64, command: &Value) -> anyhow::Result<String> {
    let msg = json!({ "command": command, "request_id": req_id });
    let mut raw = serde_json::to_string(&msg)?;
    raw.push('\n');
    Ok(raw)
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
    connected: Arc<AtomicBool>,
}

impl MpvHandle {
    /// Send a command and wait for mpv's reply.
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = next_req_id();
        let payload = encode(req_id, &command)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Queue a command without waiting.  Never blocks.
    fn post_with_id(&self, req_id: u64, command: Value) -> Result<(), MediaError> {
        if !self.is_connected() {
            return Err(MediaError::Unavailable);
        }
        let payload = encode(req_id, &command).map_err(|e| MediaError::Rejected(e.to_string()))?;
        debug!("mpv: post req={} {}", req_id, command);
        self.tx
            .try_send(PendingRequest {
                req_id,
                payload,
                reply: None,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    MediaError::Rejected("mpv command queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => MediaError::Unavailable,
            })
    }

    fn post(&self, command: Value) -> Result<(), MediaError> {
        self.post_with_id(next_req_id(), command)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

// ── signal tagging ────────────────────────────────────────────────────────────

/// Maps mpv replies/events back to the playback token they belong to.
#[derive(Debug, Default)]
pub struct SignalTagger {
    /// loadfile request id → token, until the reply arrives.
    loads: HashMap<u64, PlaybackToken>,
    /// playlist entry id → token.
    entries: HashMap<i64, PlaybackToken>,
    /// Token of a loadfile whose reply carried no entry id (mpv < 0.34);
    /// bound to the next unknown `start-file`.
    unbound: Option<PlaybackToken>,
    /// Entry announced by the latest `start-file`.
    playing_entry: Option<i64>,
}

impl SignalTagger {
    pub fn expect_load(&mut self, req_id: u64, token: PlaybackToken) {
        self.loads.insert(req_id, token);
    }

    /// Inspect a command reply.  A failed loadfile becomes an error signal.
    pub fn on_response(&mut self, req_id: u64, reply: &Value) -> Option<MediaSignal> {
        let token = self.loads.remove(&req_id)?;
        if reply["error"].as_str() != Some("success") {
            let err = reply["error"].as_str().unwrap_or("unknown error");
            return Some(MediaSignal::Error(token, format!("loadfile failed: {}", err)));
        }
        match reply["data"]["playlist_entry_id"].as_i64() {
            Some(entry) => {
                self.entries.insert(entry, token);
                if self.unbound.is_some_and(|t| t < token) {
                    self.unbound = None;
                }
            }
            None => self.unbound = Some(token),
        }
        // A replaced entry mpv never started gets no end-file; drop it here.
        self.entries.retain(|_, t| *t >= token);
        self.loads.retain(|_, t| *t >= token);
        None
    }

    pub fn on_event(&mut self, event: &Value) -> Option<MediaSignal> {
        let entry = event["playlist_entry_id"].as_i64();
        match event["event"].as_str()? {
            "start-file" => {
                if let Some(entry) = entry {
                    if !self.entries.contains_key(&entry) {
                        if let Some(token) = self.unbound.take() {
                            self.entries.insert(entry, token);
                        }
                    }
                }
                self.playing_entry = entry;
                None
            }
            "file-loaded" => {
                let token = self.playing_entry.and_then(|e| self.entries.get(&e))?;
                Some(MediaSignal::ReadyToPlay(*token))
            }
            "end-file" => {
                if entry.is_some() && entry == self.playing_entry {
                    self.playing_entry = None;
                }
                let token = self.entries.remove(&entry?)?;
                match event["reason"].as_str() {
                    Some("eof") => Some(MediaSignal::Ended(token)),
                    Some("error") => {
                        let reason = event["file_error"].as_str().unwrap_or("playback error");
                        Some(MediaSignal::Error(token, reason.to_string()))
                    }
                    _ => None, // stop / quit / redirect
                }
            }
            _ => None,
        }
    }

    /// The IPC link dropped: whatever was newest fails.
    pub fn on_disconnect(&mut self) -> Option<MediaSignal> {
        let newest = self
            .entries
            .values()
            .chain(self.loads.values())
            .chain(self.unbound.iter())
            .max()
            .copied();
        *self = Self::default();
        newest.map(|t| MediaSignal::Error(t, "mpv IPC connection closed".to_string()))
    }
}

type SharedTagger = Arc<std::sync::Mutex<SignalTagger>>;

fn lock(tagger: &SharedTagger) -> std::sync::MutexGuard<'_, SignalTagger> {
    tagger.lock().unwrap_or_else(|e| e.into_inner())
}

// ── MediaElement implementation ───────────────────────────────────────────────

/// mpv as the playback controller's media element.  All calls are queued
/// on the writer task; mpv's answers come back through the core event loop.
pub struct MpvMedia {
    handle: Option<MpvHandle>,
    tagger: SharedTagger,
    source: Option<(PlaybackToken, String)>,
}

impl MpvMedia {
    /// A media element with no mpv behind it; every request is rejected.
    pub fn unavailable() -> Self {
        Self {
            handle: None,
            tagger: SharedTagger::default(),
            source: None,
        }
    }

    fn handle(&self) -> Result<&MpvHandle, MediaError> {
        self.handle.as_ref().ok_or(MediaError::Unavailable)
    }

    /// Ask mpv for its version string (round-trip check after connecting).
    pub async fn version(&self) -> anyhow::Result<String> {
        let handle = self.handle()?;
        let reply = handle.send(json!(["get_property", "mpv-version"])).await?;
        Ok(reply["data"].as_str().unwrap_or("unknown").to_string())
    }
}

impl MediaElement for MpvMedia {
    fn set_source(&mut self, token: PlaybackToken, url: &str) -> Result<(), MediaError> {
        // Loaded files must wait for an explicit play.
        self.handle()?.post(json!(["set_property", "pause", true]))?;
        self.source = Some((token, url.to_string()));
        Ok(())
    }

    fn load(&mut self, token: PlaybackToken) -> Result<(), MediaError> {
        let url = match self.source.as_ref() {
            Some((t, url)) if *t == token => url.clone(),
            _ => return Err(MediaError::Rejected("no source set for this token".to_string())),
        };
        let handle = self.handle()?;
        let req_id = next_req_id();
        lock(&self.tagger).expect_load(req_id, token);
        info!("mpv: loadfile token={} url={}", token.0, url);
        handle
            .post_with_id(req_id, json!(["loadfile", url, "replace"]))
            .inspect_err(|_| {
                lock(&self.tagger).loads.remove(&req_id);
            })
    }

    fn play(&mut self) -> Result<(), MediaError> {
        self.handle()?.post(json!(["set_property", "pause", false]))
    }

    fn pause(&mut self) -> Result<(), MediaError> {
        self.handle()?.post(json!(["set_property", "pause", true]))
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), MediaError> {
        let pct = (volume * 100.0).clamp(0.0, 100.0);
        self.handle()?.post(json!(["set_property", "volume", pct]))
    }

    fn release(&mut self) {
        self.source = None;
        if let Ok(handle) = self.handle() {
            if let Err(e) = handle.post(json!(["stop"])) {
                debug!("mpv: stop not sent: {}", e);
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    pub socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new() -> Self {
        Self {
            socket_name: globe_core::platform::mpv_socket_name(),
            process: None,
        }
    }

    /// Kill the process if running.
    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self, volume: f32) -> anyhow::Result<()> {
        let mpv_binary = globe_core::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (volume * 100.0).clamp(0.0, 100.0).round() as i64
        );

        let stderr_path = globe_core::platform::data_dir().join("mpv-stderr.log");
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_path)?;
        info!("mpv: logging stderr to {:?}", stderr_path);

        let child = tokio::process::Command::new(&mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(globe_core::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(stderr_file)
            .kill_on_drop(true)
            .spawn()?;
        info!("mpv: spawned process with pid {:?}", child.id());
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        volume: f32,
        event_tx: mpsc::Sender<CoreEvent>,
    ) -> anyhow::Result<MpvMedia> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process(volume)?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        volume: f32,
        event_tx: mpsc::Sender<CoreEvent>,
    ) -> anyhow::Result<MpvMedia> {
        self.kill().await;
        self.spawn_process(volume)?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<CoreEvent>) -> MpvMedia
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Shared between writer (inserts) and reader (resolves).
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let tagger = SharedTagger::default();
    let connected = Arc::new(AtomicBool::new(true));

    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(
        BufReader::new(read_half),
        pending,
        tagger.clone(),
        connected.clone(),
        event_tx,
    ));

    MpvMedia {
        handle: Some(MpvHandle {
            tx: cmd_tx,
            connected,
        }),
        tagger,
        source: None,
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn forward(event_tx: &mpsc::Sender<CoreEvent>, signal: Option<MediaSignal>) {
    if let Some(signal) = signal {
        debug!("mpv: signal {:?}", signal);
        let _ = event_tx.send(CoreEvent::Media(signal)).await;
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    tagger: SharedTagger,
    connected: Arc<AtomicBool>,
    event_tx: mpsc::Sender<CoreEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let signal = lock(&tagger).on_response(req_id, &val);
                    forward(&event_tx, signal).await;

                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else if val["error"].as_str() != Some("success") {
                        debug!("mpv reader: req={} failed: {}", req_id, val["error"]);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    let signal = lock(&tagger).on_event(&val);
                    forward(&event_tx, signal).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                break;
            }
        }
    }

    connected.store(false, Ordering::Relaxed);
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
    }
    drop(map);
    let signal = lock(&tagger).on_disconnect();
    forward(&event_tx, signal).await;
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        if let Some(reply) = req.reply {
            pending.lock().await.insert(req.req_id, reply);
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}
