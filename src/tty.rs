use crate::config::ColorMode;
use std::io::IsTerminal;

/// Check if stdout is connected to a TTY
pub fn is_stdout_tty() -> bool {
    std::io::stdout().is_terminal()
}

/// Determine if colors should be used based on CLI color mode and environment
pub fn should_use_colors_with_mode(color_mode: ColorMode) -> bool {
    match color_mode {
        ColorMode::Never => false,
        // Even with Always, respect NO_COLOR for accessibility
        ColorMode::Always => std::env::var_os("NO_COLOR").is_none(),
        ColorMode::Auto => should_use_colors_auto(),
    }
}

fn should_use_colors_auto() -> bool {
    if !is_stdout_tty() {
        return false;
    }

    // https://no-color.org/
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_disables_colors() {
        assert!(!should_use_colors_with_mode(ColorMode::Never));
    }
}
