use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};

/// Bring up the terminal logger at the requested level. A second call is a
/// no-op (the global logger can only be set once per process) and returns
/// false, so verbose solves in the same process keep logging through the
/// first configuration.
pub fn init_terminal_logger(level: &str) -> bool {
    let log_option = match level {
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    CombinedLogger::init(vec![TermLogger::new(
        log_option,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_initialization_is_tolerated() {
        // whichever call wins the race, the second must not panic
        let _ = init_terminal_logger("info");
        let second = init_terminal_logger("warn");
        assert!(!second);
    }
}
