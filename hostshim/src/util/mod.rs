use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "warn";

/// Install a stderr subscriber honoring `RUST_LOG`.
///
/// Intended for binaries; the library never calls it. A second call, or a
/// call after another subscriber was installed, is a no-op.
pub fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init();
}

/// Quote `arg` for a POSIX shell.
///
/// Arguments made only of characters the shell never interprets are returned
/// as-is; anything else is wrapped in single quotes, with embedded single
/// quotes written as `'\''`.
pub fn shell_quote(arg: &str) -> String {
    let is_plain = |c: char| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c);
    if !arg.is_empty() && arg.chars().all(is_plain) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_arguments_are_untouched() {
        assert_eq!(shell_quote("/mnt/root/demo/config.json"), "/mnt/root/demo/config.json");
        assert_eq!(shell_quote("aGVsbG8="), "aGVsbG8=");
    }

    #[test]
    fn special_characters_are_single_quoted() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("my file"), "'my file'");
        assert_eq!(shell_quote("$(reboot)"), "'$(reboot)'");
        assert_eq!(
            shell_quote(r#""{\"test\":\"asdf\"}""#),
            r#"'"{\"test\":\"asdf\"}"'"#
        );
    }

    #[test]
    fn single_quotes_are_escaped() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("'"), r"''\'''");
    }
}
