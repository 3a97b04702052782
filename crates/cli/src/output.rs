//! Terminal output formatting

use asba_lib::models::Venue;
use colored::Colorize;

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a section heading with an underline
pub fn print_heading(title: &str) {
    println!("\n{}", title.bold());
    println!("{}", "=".repeat(title.len()));
}

/// Format a signed number of seconds as a compact duration
pub fn format_signed_duration(secs: i64) -> String {
    let magnitude = secs.unsigned_abs();
    let hours = magnitude / 3600;
    let minutes = (magnitude % 3600) / 60;
    let body = if hours > 0 {
        format!("{hours}h{minutes:02}m")
    } else {
        format!("{minutes}m")
    };
    if secs < 0 {
        format!("-{body}")
    } else {
        body
    }
}

/// Format an unsigned number of seconds as a compact duration
pub fn format_duration_secs(secs: u64) -> String {
    format_signed_duration(secs as i64)
}

/// Format a dollar amount
pub fn format_currency(amount: f64) -> String {
    format!("${amount:.2}")
}

/// Format confidence as a percentage, colored by strength
pub fn color_confidence(confidence: f64) -> String {
    let formatted = format!("{:.0}%", confidence * 100.0);
    if confidence >= 0.7 {
        formatted.green().to_string()
    } else if confidence >= 0.4 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

/// Venue label with its conventional color
pub fn color_venue(venue: Venue) -> String {
    match venue {
        Venue::Local => "local cluster".cyan().to_string(),
        Venue::Cloud => "cloud burst".magenta().to_string(),
    }
}

/// Color an efficiency percentage: green is healthy, red is waste
pub fn color_efficiency(percent: f64) -> String {
    let formatted = format!("{percent:.1}%");
    if percent >= 70.0 {
        formatted.green().to_string()
    } else if percent >= 40.0 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_signed_duration() {
        assert_eq!(format_signed_duration(9900), "2h45m");
        assert_eq!(format_signed_duration(-1800), "-30m");
        assert_eq!(format_signed_duration(0), "0m");
        assert_eq!(format_duration_secs(3660), "1h01m");
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(44.13), "$44.13");
        assert_eq!(format_currency(0.0), "$0.00");
    }
}
