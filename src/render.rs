use std::io::Write;

use anyhow::Result;
use winnow::Partial;
use winnow::error::ErrMode;

use crate::api::IndexedSource;
use crate::config::RuntimeConfig;
use crate::markdown::{RenderState, render_markdown, write_sources};
use crate::theme::{BOLD_CYAN, DIM, RED, RESET};

pub const PROMPT: &str = "❯ ";
pub const ENABLE_BRACKETED_PASTE: &str = "\x1b[?2004h";
pub const DISABLE_BRACKETED_PASTE: &str = "\x1b[?2004l";

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub color: bool,
    pub markdown: bool,
    pub width: Option<usize>,
}

impl RenderOptions {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        let width = crossterm::terminal::size().ok().map(|(w, _)| w as usize);
        Self {
            color: cfg.color,
            // Markdown output carries ANSI styling, so it is only useful when
            // color output is.
            markdown: cfg.markdown && cfg.color,
            width,
        }
    }

    pub fn plain() -> Self {
        Self {
            color: false,
            markdown: false,
            width: None,
        }
    }
}

/// Terminal output sink for the session: streamed tokens, completed
/// responses, cited sources, errors, informational lines, and the prompt.
pub struct Renderer<W: Write> {
    out: W,
    color: bool,
    markdown: bool,
    width: Option<usize>,
    feed: MarkdownFeed,
    first_token: bool,
}

struct MarkdownFeed {
    buf: String,
    offset: usize,
    state: RenderState,
}

impl MarkdownFeed {
    fn new(width: Option<usize>) -> Self {
        Self {
            buf: String::new(),
            offset: 0,
            state: RenderState::new(width),
        }
    }
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, options: RenderOptions) -> Self {
        Self {
            out,
            color: options.color,
            markdown: options.markdown,
            width: options.width,
            feed: MarkdownFeed::new(options.width),
            first_token: true,
        }
    }

    /// Incremental token sink. The first token of a response is preceded by a
    /// blank line separating it from the echoed input.
    pub fn assistant_token(&mut self, token: &str) -> Result<()> {
        if self.first_token {
            self.out.write_all(b"\n")?;
            self.first_token = false;
        }

        if self.markdown {
            self.feed.buf.push_str(token);
            self.drain_markdown()?;
        } else {
            self.out.write_all(token.as_bytes())?;
        }
        self.out.flush()?;
        Ok(())
    }

    /// Signal end-of-response: complete any pending markdown constructs,
    /// terminate the line, and rearm for the next response.
    pub fn assistant_end(&mut self, response: &str) -> Result<()> {
        if self.markdown {
            // A trailing newline forces the parser to finish pending tokens.
            self.feed.buf.push('\n');
            self.drain_markdown()?;
        } else {
            self.out.write_all(b"\n")?;
        }
        if self.color {
            self.out.write_all(RESET.as_bytes())?;
        }
        self.out.flush()?;

        tracing::trace!(response_chars = response.chars().count(), "response complete");
        self.first_token = true;
        self.feed = MarkdownFeed::new(self.width);
        Ok(())
    }

    /// Render a complete historical response at once, e.g. during replay.
    pub fn assistant_complete(&mut self, text: &str) -> Result<()> {
        self.assistant_token(text)?;
        self.assistant_end(text)
    }

    pub fn sources(&mut self, sources: &[IndexedSource]) -> Result<()> {
        if self.color {
            write_sources(&mut self.out, sources)?;
        } else {
            let mut block = String::from("\nSources:\n");
            for source in sources {
                block.push_str(&format!(
                    "  [{}] {} ({})\n",
                    source.index, source.title, source.url
                ));
            }
            self.out.write_all(block.as_bytes())?;
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn error(&mut self, message: &str) -> Result<()> {
        if self.color {
            writeln!(self.out, "{RED}{message}{RESET}")?;
        } else {
            writeln!(self.out, "{message}")?;
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn info(&mut self, message: &str) -> Result<()> {
        if self.color {
            writeln!(self.out, "{DIM}{message}{RESET}")?;
        } else {
            writeln!(self.out, "{message}")?;
        }
        self.out.flush()?;
        Ok(())
    }

    /// Blank line then the prompt, redisplayed after every handled submission.
    pub fn prompt(&mut self) -> Result<()> {
        self.out.write_all(b"\n")?;
        self.prompt_bare()
    }

    /// The prompt alone, used once at session start.
    pub fn prompt_bare(&mut self) -> Result<()> {
        if self.color {
            write!(self.out, "{BOLD_CYAN}{PROMPT}{RESET}")?;
        } else {
            write!(self.out, "{PROMPT}")?;
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn newline(&mut self) -> Result<()> {
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    /// Echo a historical user message the way it looked when typed.
    pub fn replay_user(&mut self, content: &str) -> Result<()> {
        if self.color {
            writeln!(self.out, "{BOLD_CYAN}{PROMPT}{RESET}{content}")?;
        } else {
            writeln!(self.out, "{PROMPT}{content}")?;
        }
        self.out.flush()?;
        Ok(())
    }

    /// Write a raw escape sequence, bypassing styling.
    pub fn write_raw(&mut self, sequence: &str) -> Result<()> {
        self.out.write_all(sequence.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    fn drain_markdown(&mut self) -> Result<()> {
        loop {
            let input = Partial::new(&self.feed.buf[self.feed.offset..]);
            match render_markdown(input, &mut self.out, &mut self.feed.state) {
                Ok(rest) => {
                    self.feed.offset += winnow::stream::Offset::offset_from(&rest, &input);
                }
                Err(ErrMode::Incomplete(_)) => break,
                Err(_) => break,
            }
        }
        Ok(())
    }
}
