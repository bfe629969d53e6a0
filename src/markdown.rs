//! Streaming markdown-to-ANSI rendering for streamed answers.
//!
//! `render_markdown` consumes one token at a time from a `Partial<&str>`
//! buffer, writing styled output straight to a `Write` sink and returning
//! `Incomplete` when the buffer ends mid-construct, so callers can feed it
//! network chunks as they arrive. Only the constructs that show up in search
//! answers are parsed: emphasis, code, headings, lists, and citation markers
//! like `[3]`; other markup falls through as literal text. The styled
//! cited-sources block under a finished answer lives here too, so source
//! indices style the same way as the citation markers they match.

use std::io::Write;

use crossterm::Command;
use crossterm::style::{self, Attribute, Stylize};
use winnow::Partial;
use winnow::ascii::{self, digit1, space0, space1, till_line_ending};
use winnow::combinator::{alt, preceded, terminated};
use winnow::error::{ErrMode, ModalResult, ParserError};
use winnow::prelude::*;
use winnow::stream::{AsChar, Stream};
use winnow::token::{any, take_until, take_while};

use crate::api::IndexedSource;

#[derive(Debug)]
pub enum MarkdownError {
    Write(std::io::Error),
    Unmatched,
}

impl std::fmt::Display for MarkdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkdownError::Write(e) => write!(f, "markdown sink: {e}"),
            MarkdownError::Unmatched => write!(f, "no markdown construct matched"),
        }
    }
}

impl<I: Stream> ParserError<I> for MarkdownError {
    type Inner = Self;

    fn from_input(_input: &I) -> Self {
        Self::Unmatched
    }

    fn into_inner(self) -> Result<Self::Inner, Self> {
        Ok(self)
    }
}

/// Style and position state carried across the parse steps of one response.
pub struct RenderState {
    in_codeblock: bool,
    bold: bool,
    italic: bool,
    at_line_start: bool,
    line_break_parsed: bool,
    column: usize,
    width: Option<usize>,
}

impl RenderState {
    pub fn new(width: Option<usize>) -> Self {
        Self {
            in_codeblock: false,
            bold: false,
            italic: false,
            at_line_start: true,
            line_break_parsed: false,
            column: 0,
            width,
        }
    }
}

type Step<W> = fn(&mut Partial<&str>, &mut W, &mut RenderState) -> ModalResult<(), MarkdownError>;

/// Consume one markdown token from `input`, writing styled output to `out`.
/// Returns the unconsumed remainder on success; `Incomplete` asks the caller
/// to wait for more streamed data.
pub fn render_markdown<'a, W: Write>(
    mut input: Partial<&'a str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<Partial<&'a str>, MarkdownError> {
    let steps: &[Step<W>] = if state.in_codeblock {
        &[fence_close, fence_newline, fence_char]
    } else {
        &[
            plain_text,
            citation,
            fence_open,
            heading,
            bullet_item,
            numbered_item,
            inline_code,
            strong,
            emphasis,
            hard_newline,
            stray_char,
        ]
    };

    let start = input.checkpoint();
    for step in steps {
        input.reset(&start);
        match step(&mut input, out, state) {
            Err(ErrMode::Backtrack(_)) => continue,
            Err(other) => return Err(other),
            Ok(()) => {
                state.at_line_start = state.line_break_parsed;
                state.line_break_parsed = false;
                return Ok(input);
            }
        }
    }

    backtrack()
}

// ---------------------------------------------------------------------------
// Steps outside code fences
// ---------------------------------------------------------------------------

fn plain_text<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    let run = take_while(1.., |c| {
        AsChar::is_alphanum(c) || "+,.!?\"'/:;=@%&() ".contains(c)
    })
    .parse_next(i)?;
    wrap(out, state, run.len())?;
    emit(out, style::Print(run))
}

// `[N]` markers cross-reference the sources block; highlight them so they
// stand out from surrounding prose.
fn citation<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    let (_, digits, _) = ("[", digit1, "]").parse_next(i)?;
    let marker = format!("[{digits}]");
    wrap(out, state, marker.len())?;
    emit(out, style::SetForegroundColor(style::Color::Cyan))?;
    emit(out, style::Print(marker))?;
    emit(out, style::ResetColor)
}

// The `#` marks are consumed like emphasis markers; the heading text itself
// carries the styling until the line ends.
fn heading<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    if !state.at_line_start {
        return backtrack();
    }
    (take_while(1.., '#'), space1).parse_next(i)?;
    emit(out, style::SetForegroundColor(style::Color::Magenta))?;
    emit(out, style::SetAttribute(Attribute::Bold))
}

fn bullet_item<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    if !state.at_line_start {
        return backtrack();
    }
    let indent = (space0, alt(("-", "*")), space1).parse_next(i)?.0;
    let rendered = format!("{indent}• ");
    wrap(out, state, rendered.len())?;
    emit(out, style::Print(rendered))
}

fn numbered_item<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    if !state.at_line_start {
        return backtrack();
    }
    let (indent, number, _, _) = (space0, digit1, ".", space1).parse_next(i)?;
    let rendered = format!("{indent}{number}. ");
    wrap(out, state, rendered.len())?;
    emit(out, style::Print(rendered))
}

fn inline_code<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    _state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    "`".parse_next(i)?;
    let span = terminated(take_until(0.., "`"), "`").parse_next(i)?;
    emit(out, style::SetForegroundColor(style::Color::Green))?;
    emit(out, style::Print(span))?;
    emit(out, style::ResetColor)
}

fn strong<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    alt(("**", "__")).parse_next(i)?;
    state.bold = !state.bold;
    if state.bold {
        emit(out, style::SetAttribute(Attribute::Bold))
    } else {
        emit(out, style::SetAttribute(Attribute::NormalIntensity))
    }
}

fn emphasis<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    alt(("*", "_")).parse_next(i)?;
    state.italic = !state.italic;
    if state.italic {
        emit(out, style::SetAttribute(Attribute::Italic))
    } else {
        emit(out, style::SetAttribute(Attribute::NoItalic))
    }
}

fn hard_newline<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    ascii::line_ending.parse_next(i)?;
    state.column = 0;
    state.line_break_parsed = true;
    emit(out, style::ResetColor)?;
    emit(out, style::SetAttribute(Attribute::Reset))?;
    emit(out, style::Print("\n"))
}

fn stray_char<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    let c = any.parse_next(i)?;
    wrap(out, state, 1)?;
    if c == ' ' && state.column == 1 {
        // Drop the space a soft wrap just carried onto the fresh line.
        return Ok(());
    }
    emit(out, style::Print(c))
}

// ---------------------------------------------------------------------------
// Steps inside code fences
// ---------------------------------------------------------------------------

fn fence_open<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    if !state.at_line_start {
        return backtrack();
    }
    let language = preceded("```", till_line_ending).parse_next(i)?;
    ascii::line_ending.parse_next(i)?;
    state.in_codeblock = true;
    if !language.is_empty() {
        emit(out, style::Print(format!("{}\n", language.bold())))?;
    }
    emit(out, style::SetForegroundColor(style::Color::Green))
}

fn fence_close<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    "```".parse_next(i)?;
    state.in_codeblock = false;
    emit(out, style::ResetColor)
}

fn fence_newline<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    _state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    ascii::line_ending.parse_next(i)?;
    emit(out, style::Print("\n"))
}

fn fence_char<W: Write>(
    i: &mut Partial<&str>,
    out: &mut W,
    _state: &mut RenderState,
) -> ModalResult<(), MarkdownError> {
    let c = any.parse_next(i)?;
    emit(out, style::Print(c))
}

// ---------------------------------------------------------------------------
// Cited-sources block
// ---------------------------------------------------------------------------

/// Write the styled sources block shown under a finished answer: a dim
/// header plus one `[index] title (url)` line per source. Indices line up
/// with the citation markers highlighted in the answer text.
pub fn write_sources<W: Write>(out: &mut W, sources: &[IndexedSource]) -> std::io::Result<()> {
    use crossterm::QueueableCommand;

    out.queue(style::Print("\n"))?;
    out.queue(style::SetAttribute(Attribute::Dim))?;
    out.queue(style::Print("Sources:"))?;
    out.queue(style::SetAttribute(Attribute::Reset))?;
    out.queue(style::Print("\n"))?;

    for source in sources {
        out.queue(style::Print("  "))?;
        out.queue(style::SetForegroundColor(style::Color::Cyan))?;
        out.queue(style::Print(format!("[{}]", source.index)))?;
        out.queue(style::ResetColor)?;
        out.queue(style::Print(format!(" {} ", source.title)))?;
        out.queue(style::SetAttribute(Attribute::Dim))?;
        out.queue(style::Print(format!("({})", source.url)))?;
        out.queue(style::SetAttribute(Attribute::Reset))?;
        out.queue(style::Print("\n"))?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn backtrack<T>() -> ModalResult<T, MarkdownError> {
    Err(ErrMode::Backtrack(MarkdownError::Unmatched))
}

/// Bump the column count, breaking the line first when the pending write
/// would run past the terminal width.
fn wrap<W: Write>(
    out: &mut W,
    state: &mut RenderState,
    width: usize,
) -> ModalResult<(), MarkdownError> {
    if let Some(max) = state.width
        && state.column > 0
        && state.column + width > max
    {
        state.column = width;
        return emit(out, style::Print('\n'));
    }
    state.column += width;
    Ok(())
}

fn emit<W: Write>(out: &mut W, cmd: impl Command) -> ModalResult<(), MarkdownError> {
    use crossterm::QueueableCommand;
    out.queue(cmd)
        .map_err(|e| ErrMode::Cut(MarkdownError::Write(e)))?;
    Ok(())
}
