use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Escape sequences a bracketed-paste terminal wraps around pasted text.
pub const PASTE_START: &str = "\x1b[200~";
pub const PASTE_END: &str = "\x1b[201~";

/// Quiet window for the debounce fallback strategy.
pub const PASTE_DEBOUNCE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// One submitted line, without its terminator. Pasted newlines synthesize
    /// these just like Enter presses.
    Line(String),
    PasteStart,
    PasteEnd,
    /// End of input: Ctrl-D or a closed stdin.
    Closed,
}

/// Incremental scanner turning raw terminal bytes into line and
/// paste-boundary events. Partial lines and split escape sequences stay
/// buffered until completed by later chunks.
#[derive(Debug, Default)]
pub struct InputScanner {
    buf: String,
}

enum Marker {
    Newline,
    Start,
    End,
}

impl InputScanner {
    pub fn feed(&mut self, chunk: &str) -> Vec<InputEvent> {
        self.buf.push_str(chunk);
        let mut events = Vec::new();

        loop {
            let candidates = [
                self.buf.find('\n').map(|at| (at, Marker::Newline)),
                self.buf.find(PASTE_START).map(|at| (at, Marker::Start)),
                self.buf.find(PASTE_END).map(|at| (at, Marker::End)),
            ];
            let next = candidates
                .into_iter()
                .flatten()
                .min_by_key(|(at, _)| *at);
            let Some((at, marker)) = next else {
                break;
            };

            match marker {
                Marker::Newline => {
                    let raw = &self.buf[..at];
                    let line = raw.strip_suffix('\r').unwrap_or(raw).to_string();
                    self.buf.drain(..at + 1);
                    events.push(InputEvent::Line(line));
                }
                Marker::Start => {
                    self.buf.replace_range(at..at + PASTE_START.len(), "");
                    events.push(InputEvent::PasteStart);
                }
                Marker::End => {
                    self.buf.replace_range(at..at + PASTE_END.len(), "");
                    events.push(InputEvent::PasteEnd);
                }
            }
        }

        events
    }
}

/// Assemble raw input events into discrete submissions.
///
/// Outside a paste, every line flushes immediately. During a paste, lines
/// accumulate; they stay held after the paste ends and flush together with
/// the next line the user submits, newline-joined in arrival order.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<String>,
    pasting: bool,
}

impl LineAssembler {
    /// Returns a flushed submission when this event completes one. An empty
    /// submission means "no-op, redisplay the prompt".
    pub fn feed(&mut self, event: &InputEvent) -> Option<String> {
        match event {
            InputEvent::PasteStart => {
                self.pasting = true;
                None
            }
            InputEvent::PasteEnd => {
                self.pasting = false;
                None
            }
            InputEvent::Line(line) => {
                self.pending.push(line.clone());
                if self.pasting {
                    return None;
                }
                let submission = self.pending.join("\n").trim().to_string();
                self.pending.clear();
                Some(submission)
            }
            InputEvent::Closed => None,
        }
    }

    pub fn is_pasting(&self) -> bool {
        self.pasting
    }
}

/// Session-side handle on the input event channel.
///
/// Pausing is the cooperative convention from the turn orchestrator: events
/// arriving while paused stay queued in the channel and are only read once
/// the turn's cleanup resumes input. Nothing here is a lock; the guarantee
/// holds because every read funnels through the session loop.
#[derive(Debug)]
pub struct InputReceiver {
    rx: mpsc::UnboundedReceiver<InputEvent>,
    paused: bool,
}

impl InputReceiver {
    pub fn new(rx: mpsc::UnboundedReceiver<InputEvent>) -> Self {
        Self { rx, paused: false }
    }

    pub fn from_stdin() -> Self {
        Self::new(spawn_stdin_reader())
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub async fn next(&mut self) -> InputEvent {
        debug_assert!(!self.paused, "input read while paused");
        self.rx.recv().await.unwrap_or(InputEvent::Closed)
    }
}

/// Read raw bytes from stdin on a background task, scan them into input
/// events, and deliver them over an unbounded channel. UTF-8 sequences split
/// across reads are reassembled before scanning.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<InputEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut scanner = InputScanner::default();
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    let valid = match std::str::from_utf8(&pending) {
                        Ok(s) => s.len(),
                        Err(err) => err.valid_up_to(),
                    };
                    if valid == 0 {
                        continue;
                    }
                    let chunk = String::from_utf8_lossy(&pending[..valid]).into_owned();
                    pending.drain(..valid);
                    for event in scanner.feed(&chunk) {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "stdin read failed");
                    break;
                }
            }
        }

        let _ = tx.send(InputEvent::Closed);
    });

    rx
}
