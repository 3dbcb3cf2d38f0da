// Terminal rendering of chat lines

use chrono::{DateTime, Local, Utc};
use colored::*;
use murmur_core::{ChatLine, Presence};

pub fn format_timestamp(timestamp_millis: u64) -> String {
    let dt = DateTime::from_timestamp((timestamp_millis / 1000) as i64, 0).unwrap_or_else(Utc::now);
    let local: DateTime<Local> = dt.into();

    local.format("%H:%M:%S").to_string()
}

/// Calendar date for records stamped in unix seconds
pub fn format_date(timestamp_secs: u64) -> String {
    let dt = DateTime::from_timestamp(timestamp_secs as i64, 0).unwrap_or_else(Utc::now);
    let local: DateTime<Local> = dt.into();

    local.format("%Y-%m-%d %H:%M").to_string()
}

/// `[time] sender (presence) @address: body`
pub fn chat_line(line: &ChatLine) -> String {
    format!(
        "{} {} {} {} {}",
        format!("[{}]", format_timestamp(line.timestamp)).dimmed(),
        line.sender.bright_cyan(),
        format!("({})", Presence::label_or_dash(line.presence)).dimmed(),
        format!("@{}:", line.origin_address).dimmed(),
        line.body
    )
}

pub fn prompt() {
    print!("> ");
    let _ = std::io::Write::flush(&mut std::io::stdout());
}
