/// ANSI color codes for terminal listings
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub id: &'static str,        // Dim for error ids
    pub count: &'static str,     // Bold for occurrence counts
    pub location: &'static str,  // Cyan for file:line
    pub timestamp: &'static str, // Dim for last-seen times
    pub heading: &'static str,   // Bold underline for severity groups
    pub fatal: &'static str,     // Bright red for fatal errors
    pub error: &'static str,     // Red for errors
    pub warning: &'static str,   // Bright yellow for warnings
    pub notice: &'static str,    // Bright cyan for notices and deprecations
    pub resolved: &'static str,  // Green for the resolved marker
    pub reset: &'static str,
}

impl ColorScheme {
    pub fn new(use_colors: bool) -> Self {
        if use_colors {
            Self {
                id: "\x1b[2m",
                count: "\x1b[1m",
                location: "\x1b[36m",
                timestamp: "\x1b[2m",
                heading: "\x1b[1;4m",
                fatal: "\x1b[91m",
                error: "\x1b[31m",
                warning: "\x1b[93m",
                notice: "\x1b[96m",
                resolved: "\x1b[32m",
                reset: "\x1b[0m",
            }
        } else {
            Self {
                id: "",
                count: "",
                location: "",
                timestamp: "",
                heading: "",
                fatal: "",
                error: "",
                warning: "",
                notice: "",
                resolved: "",
                reset: "",
            }
        }
    }

    /// Color for a severity label, matched loosely by keyword
    pub fn severity(&self, label: &str) -> &'static str {
        let label = label.to_ascii_lowercase();
        if label.contains("fatal") || label.contains("parse") || label.contains("core") {
            self.fatal
        } else if label.contains("warn") {
            self.warning
        } else if label.contains("notice") || label.contains("deprecat") || label.contains("strict") {
            self.notice
        } else {
            self.error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_scheme_is_empty() {
        let scheme = ColorScheme::new(false);
        assert_eq!(scheme.severity("Fatal error"), "");
        assert_eq!(scheme.reset, "");
    }

    #[test]
    fn test_severity_colors() {
        let scheme = ColorScheme::new(true);
        assert_eq!(scheme.severity("Fatal error"), scheme.fatal);
        assert_eq!(scheme.severity("Warning"), scheme.warning);
        assert_eq!(scheme.severity("Deprecated"), scheme.notice);
        assert_eq!(scheme.severity("Error"), scheme.error);
    }
}
