//! ANSI styling constants, the startup banner, and slash-command suggestions.

pub const RESET: &str = "\x1b[0m";
pub const DIM: &str = "\x1b[2m";
pub const RED: &str = "\x1b[31m";
pub const BOLD_CYAN: &str = "\x1b[1;36m";

/// Slash-command names, for "did you mean" matching against typos.
pub const COMMAND_NAMES: &[&str] = &["help", "list", "resume", "clear", "delete", "copy", "exit"];

pub fn intro_banner(model: &str) -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("sonar-cli v{version} · {model}\nType /help for commands. /exit or Ctrl-D to quit.")
}

/// Prefix-match an unknown command name against the palette and format a
/// "did you mean" line when something plausible exists.
pub fn suggest_command(input: &str) -> Option<String> {
    let needle = input.to_ascii_lowercase();
    if needle.is_empty() {
        return None;
    }

    let hits: Vec<&str> = COMMAND_NAMES
        .iter()
        .copied()
        .filter(|name| name.starts_with(&needle))
        .collect();

    match hits.as_slice() {
        [] => None,
        [only] => Some(format!("Did you mean /{only}?")),
        many => {
            let list = many
                .iter()
                .map(|name| format!("/{name}"))
                .collect::<Vec<String>>()
                .join(", ");
            Some(format!("Did you mean one of: {list}?"))
        }
    }
}
