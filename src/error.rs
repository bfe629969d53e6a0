#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Api,
    Storage,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Api => "API",
            ErrorCategory::Storage => "STORAGE",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Api => {
                "Check PERPLEXITY_API_KEY and your network connection, then retry."
            }
            ErrorCategory::Storage => {
                "Check that the data directory (--data-dir) is writable and its JSON files are intact."
            }
            ErrorCategory::Input => "Run sonar-cli --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Rerun with --log-filter debug and file an issue with the log output."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("api key")
        || msg.contains("api error")
        || msg.contains("rate limited")
        || msg.contains("server error")
        || msg.contains("connection")
        || msg.contains("stream")
    {
        return ErrorCategory::Api;
    }

    if msg.contains("conversation")
        || msg.contains("index")
        || msg.contains("data directory")
    {
        return ErrorCategory::Storage;
    }

    if msg.contains("no question")
        || msg.contains("invalid")
        || msg.contains("argument")
        || msg.contains("configuration")
    {
        return ErrorCategory::Input;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error) -> String {
    let category = categorize_error(err);
    format!("[{}] {}\nHint: {}", category.code(), err, category.hint())
}
