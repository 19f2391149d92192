//! Terminal Session (spec §4.B): owns a detached `tmux` session, its PTY,
//! and the attach/detach protocol.
//!
//! Grounded on `ccm-daemon/src/pty.rs`'s spawn/kill/resize shape and
//! `pmbrull-claustre/src/pty/mod.rs`'s `portable-pty` reader-thread idiom,
//! retargeted at a `tmux attach-session` child instead of the agent process
//! itself (the multiplexer owns the agent; we only ever attach to it).

use crate::error::TerminalError;
use crate::monitor::StatusMonitor;
use crate::providers::{self, ProgramFamily};
use crate::tmux;
use crossterm::event;
use futures_util::stream::StreamExt;
use portable_pty::{native_pty_system, Child, MasterPty, PtySize};
use signal_hook::consts::signal::SIGWINCH;
use signal_hook_tokio::Signals;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::warn;

/// Byte sent by the input pump to request detach (Ctrl+Q).
const DETACH_BYTE: u8 = 0x11;
/// Window during which post-attach stdin bytes are discarded as
/// terminal-identification noise (spec §4.B, an acknowledged-imperfect
/// heuristic — see DESIGN.md Open Questions).
const STDIN_NOISE_WINDOW: Duration = Duration::from_millis(50);
/// How long the input pump waits for stdin readiness before re-checking
/// whether the attach should wind down, so it never blocks past the
/// background session's own exit (spec §4.B: the output pump terminating on
/// PTY EOF must not leave the attach wedged on a keystroke that never comes).
const STDIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Debounce window for coalescing a SIGWINCH burst into one size sample
/// (spec §4.B "debounce bursts to 50 ms").
const RESIZE_DEBOUNCE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    New,
    Running,
    Attached,
    Closed,
}

struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Box<dyn Child + Send + Sync>,
}

/// A handle to a detached terminal-multiplexer session.
pub struct TerminalSession {
    name: String,
    state: TerminalState,
    pty: Option<PtyHandle>,
    monitor: StatusMonitor,
    cols: u16,
    rows: u16,
    family: ProgramFamily,
    /// No real host terminal will ever attach (spec §4.B "no-TTY" mode,
    /// used by the web-only driver): `Attach()` forces fixed 80x24 and
    /// skips SIGWINCH subscription.
    headless: bool,
}

impl TerminalSession {
    pub fn new(name: String, program: &str) -> Self {
        Self::new_with_mode(name, program, false)
    }

    /// Construct a Terminal Session for an Instance that is only ever
    /// driven through the Web Session Gateway (spec §4.B platform note).
    pub fn new_headless(name: String, program: &str) -> Self {
        Self::new_with_mode(name, program, true)
    }

    fn new_with_mode(name: String, program: &str, headless: bool) -> Self {
        Self {
            name,
            state: TerminalState::New,
            pty: None,
            monitor: StatusMonitor::new(),
            cols: 80,
            rows: 24,
            family: providers::resolve(program),
            headless,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TerminalState {
        self.state
    }

    pub fn is_headless(&self) -> bool {
        self.headless
    }

    /// Launch `new-session -d`, poll for its existence, then `Restore()`.
    /// Applies the program family's startup heuristic best-effort.
    pub async fn start(
        &mut self,
        program: &str,
        work_dir: &Path,
        auto_yes: bool,
    ) -> Result<(), TerminalError> {
        if tmux::has_session(&self.name).await? {
            return Err(TerminalError::SessionAlreadyExists(self.name.clone()));
        }

        tmux::new_session(&self.name, work_dir, program).await?;

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if tmux::has_session(&self.name).await? {
                break;
            }
            if Instant::now() >= deadline {
                return Err(TerminalError::StartTimeout(self.name.clone()));
            }
            sleep(Duration::from_millis(10)).await;
        }

        self.restore()?;
        self.state = TerminalState::Running;

        self.apply_startup_heuristic(auto_yes).await;

        Ok(())
    }

    /// Best-effort: failure to match the sentinel is not an error.
    async fn apply_startup_heuristic(&mut self, auto_yes: bool) {
        let Some(sentinel) = self.family.startup_sentinel else {
            return;
        };
        for _ in 0..self.family.startup_poll_attempts {
            sleep(self.family.startup_poll_interval).await;
            let capture = match self.capture_pane_content().await {
                Ok(c) => c,
                Err(_) => continue,
            };
            if capture.contains(sentinel) {
                let _ = self.send_keys(self.family.startup_reply);
                if auto_yes && self.family.name == "claude" {
                    for _ in 0..3 {
                        if self.send_keys(b"\x1b[Z").is_ok() {
                            break;
                        }
                    }
                }
                return;
            }
        }
    }

    /// (Re-)acquire a PTY by launching `attach-session` into a fresh master
    /// PTY. Post-condition: a PTY handle exists.
    pub fn restore(&mut self) -> Result<(), TerminalError> {
        // Replacing an existing attach PTY: best-effort kill the old client
        // process first so it doesn't linger as an orphaned tmux client.
        let _ = self.close_pty_handle();

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: self.rows,
                cols: self.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::Composite(e.to_string()))?;

        let cmd = tmux::attach_command(&self.name);
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::Composite(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::Composite(e.to_string()))?;

        self.pty = Some(PtyHandle {
            master: pair.master,
            writer: Arc::new(Mutex::new(writer)),
            child,
        });
        self.monitor = StatusMonitor::new();
        Ok(())
    }

    /// Put the controlling terminal into raw mode, spawn output/input
    /// pumps, and block (asynchronously) until detach completes — the
    /// equivalent of the spec's "returns a channel that closes when detach
    /// completes": here, the `await` resolving *is* that signal.
    pub async fn attach(&mut self) -> Result<(), TerminalError> {
        if self.state != TerminalState::Running {
            return Err(TerminalError::NotRunning);
        }

        // A fresh attach PTY replaces the background one.
        self.restore()?;
        self.state = TerminalState::Attached;

        let handle = self.pty.as_ref().expect("restored above");
        let reader = handle
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::Composite(e.to_string()))?;
        let writer = Arc::clone(&handle.writer);

        crossterm::terminal::enable_raw_mode()
            .map_err(|e| TerminalError::Composite(e.to_string()))?;

        let detach_requested = Arc::new(AtomicBool::new(false));
        let output_done = Arc::new(AtomicBool::new(false));

        let output_flag = Arc::clone(&output_done);
        let output_thread = std::thread::spawn(move || {
            output_pump(reader);
            output_flag.store(true, Ordering::SeqCst);
        });

        let input_flag = Arc::clone(&detach_requested);
        let input_done = Arc::clone(&output_done);
        let input_thread = std::thread::spawn(move || {
            input_pump(writer, input_flag, input_done);
        });

        // Host terminal resizes arrive as SIGWINCH; forward the new size to
        // the background PTY so the multiplexer's notion of geometry stays
        // correct while attached (spec §5: "at most two [tasks] for
        // window-size handling" per attached session — this is the one we
        // need, since applying the resize happens back on this task). A
        // headless Instance (no real host terminal, spec §4.B platform note)
        // skips this subscription entirely and keeps its fixed geometry.
        let mut resize_rx: Option<tokio::sync::mpsc::UnboundedReceiver<(u16, u16)>> = None;
        let mut signals_handle = None;
        let mut resize_task = None;
        if !self.headless {
            let (resize_tx, rx) = tokio::sync::mpsc::unbounded_channel::<(u16, u16)>();
            let mut signals = Signals::new([SIGWINCH])
                .map_err(|e| TerminalError::Composite(e.to_string()))?;
            let handle = signals.handle();
            let task = tokio::spawn(async move {
                loop {
                    if signals.next().await.is_none() {
                        break;
                    }
                    // Debounce: a burst of SIGWINCH collapses into a single
                    // size sample taken once 50 ms of quiet has passed.
                    loop {
                        tokio::select! {
                            _ = sleep(RESIZE_DEBOUNCE) => break,
                            next = signals.next() => {
                                if next.is_none() {
                                    break;
                                }
                            }
                        }
                    }
                    if let Ok((cols, rows)) = crossterm::terminal::size() {
                        let _ = resize_tx.send((cols, rows));
                    }
                }
            });
            resize_rx = Some(rx);
            signals_handle = Some(handle);
            resize_task = Some(task);
        }

        loop {
            tokio::select! {
                _ = sleep(Duration::from_millis(20)) => {
                    if detach_requested.load(Ordering::SeqCst) || output_done.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Some((cols, rows)) = async { resize_rx.as_mut().unwrap().recv().await }, if resize_rx.is_some() => {
                    let _ = self.set_detached_size(cols, rows);
                }
            }
        }

        if let Some(handle) = signals_handle {
            handle.close();
        }
        if let Some(task) = resize_task {
            task.abort();
        }

        crossterm::terminal::disable_raw_mode()
            .map_err(|e| TerminalError::Composite(e.to_string()))?;
        if let Err(e) = tmux::detach_client(&self.name).await {
            warn!(session = %self.name, error = %e, "detach-client failed");
        }

        let name = self.name.clone();
        let output_join = tokio::task::spawn_blocking(move || output_thread.join()).await;
        let input_join = tokio::task::spawn_blocking(move || input_thread.join()).await;
        let output_panicked = output_join.map(|r| r.is_err()).unwrap_or(true);
        let input_panicked = input_join.map(|r| r.is_err()).unwrap_or(true);
        if output_panicked || input_panicked {
            panic!("attach pump thread panicked for session {name}");
        }

        // Invariant violation territory: the controlling terminal was just
        // taken out of raw mode and there is no safe piecewise recovery if
        // a fresh background PTY cannot be acquired.
        self.state = TerminalState::Running;
        self.restore()
            .unwrap_or_else(|e| panic!("failed to restore background PTY after detach: {e}"));

        Ok(())
    }

    pub fn set_detached_size(&mut self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        self.cols = cols;
        self.rows = rows;
        if let Some(handle) = &self.pty {
            handle
                .master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| TerminalError::Composite(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn capture_pane_content(&self) -> Result<String, TerminalError> {
        tmux::capture_pane(&self.name).await
    }

    pub async fn capture_pane_content_range(
        &self,
        start: i64,
        end: i64,
    ) -> Result<String, TerminalError> {
        tmux::capture_pane_range(&self.name, start, end).await
    }

    pub fn send_keys(&self, bytes: &[u8]) -> Result<(), TerminalError> {
        let handle = self.pty.as_ref().ok_or(TerminalError::NotRunning)?;
        let mut writer = handle
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(bytes).map_err(TerminalError::from)
    }

    pub fn tap_enter(&self) -> Result<(), TerminalError> {
        self.send_keys(b"\r")
    }

    pub fn tap_d_and_enter(&self) -> Result<(), TerminalError> {
        self.send_keys(b"D\r")
    }

    pub fn tap_shift_tab(&self) -> Result<(), TerminalError> {
        self.send_keys(b"\x1b[Z")
    }

    /// Close just the local PTY handle, without killing the multiplexer
    /// session itself (used when swapping attach PTYs, not tearing down).
    fn close_pty_handle(&mut self) -> Result<(), TerminalError> {
        if let Some(mut handle) = self.pty.take() {
            handle.child.kill().map_err(|e| TerminalError::Composite(e.to_string()))?;
        }
        Ok(())
    }

    /// Close the PTY and kill the multiplexer session. Aggregates failures.
    pub async fn close(&mut self) -> Result<(), TerminalError> {
        let mut errors = Vec::new();

        if let Some(mut handle) = self.pty.take() {
            if let Err(e) = handle.child.kill() {
                errors.push(e.to_string());
            }
        }
        if let Err(e) = tmux::kill_session(&self.name).await {
            errors.push(e.to_string());
        }

        self.state = TerminalState::Closed;

        match errors.len() {
            0 => Ok(()),
            1 => Err(TerminalError::Composite(errors.remove(0))),
            _ => Err(TerminalError::Composite(errors.join("; "))),
        }
    }

    pub async fn tmux_alive(&self) -> bool {
        tmux::has_session(&self.name).await.unwrap_or(false)
    }

    /// Capture, delegate to the Status Monitor, and return
    /// `(updated, has_prompt)`; `has_prompt` only meaningful with `auto_yes`.
    pub async fn has_updated(&mut self, auto_yes: bool) -> Result<(bool, bool), TerminalError> {
        let capture = self.capture_pane_content().await?;
        Ok(self
            .monitor
            .observe(&capture, auto_yes, self.family.auto_yes_sentinel))
    }

    /// Whether `capture` contains this family's auto-yes sentinel, without
    /// touching the Status Monitor's own last-capture hash. Used by readers
    /// (the Web Gateway) that need prompt detection on a capture they
    /// already hold, independent of the Supervisor's own tick.
    pub fn prompt_sentinel_present(&self, capture: &str) -> bool {
        self.family
            .auto_yes_sentinel
            .is_some_and(|s| capture.contains(s))
    }
}

fn output_pump(mut reader: Box<dyn Read + Send>) {
    let mut stdout = std::io::stdout();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if stdout.write_all(&buf[..n]).is_err() {
                    break;
                }
                let _ = stdout.flush();
            }
            Err(_) => break,
        }
    }
}

/// Reads stdin for the duration of an attach. Polls readiness with a short
/// timeout rather than blocking on `read()` indefinitely, so it notices
/// `output_done` (the background PTY having exited first) and returns
/// promptly instead of waiting forever for a keystroke that may never come.
fn input_pump(
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    detach_requested: Arc<AtomicBool>,
    output_done: Arc<AtomicBool>,
) {
    let started = Instant::now();
    let mut stdin = std::io::stdin();
    let mut buf = [0u8; 1024];
    loop {
        if output_done.load(Ordering::SeqCst) {
            break;
        }
        match event::poll(STDIN_POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => break,
        }
        match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if started.elapsed() < STDIN_NOISE_WINDOW {
                    continue;
                }
                let chunk = &buf[..n];
                if chunk.contains(&DETACH_BYTE) {
                    detach_requested.store(true, Ordering::SeqCst);
                    break;
                }
                let mut w = writer.lock().unwrap_or_else(|p| p.into_inner());
                if w.write_all(chunk).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_in_new_state() {
        let session = TerminalSession::new("claudesquad_demo".to_string(), "claude");
        assert_eq!(session.state(), TerminalState::New);
        assert_eq!(session.name(), "claudesquad_demo");
    }

    #[test]
    fn send_keys_without_pty_is_not_running_error() {
        let session = TerminalSession::new("claudesquad_demo".to_string(), "/bin/sh");
        let err = session.send_keys(b"hi").unwrap_err();
        assert!(matches!(err, TerminalError::NotRunning));
    }
}
