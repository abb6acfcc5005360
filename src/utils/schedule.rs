use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Product intervals are written as 5-field cron (minute hour dom month dow); the
/// `cron` crate and the job scheduler both want a leading seconds field. Numeric
/// days of week use the usual 0-7 numbering (0 and 7 are Sunday) and are rewritten
/// as names, since the `cron` crate counts Sunday as 1. Six and seven field
/// expressions are passed through in the crate's own dialect.
pub fn to_six_field(expression: &str) -> Option<String> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    match parts.len() {
        5 => {
            let day_of_week = day_names(parts[4])?;
            Some(format!("0 {} {}", parts[..4].join(" "), day_of_week))
        }
        6 | 7 => Some(parts.join(" ")),
        _ => None,
    }
}

/// Rewrites a numeric day-of-week field ("1-5", "0,6", "*/2") into day names.
/// Non-numeric items are left for the parser to judge.
fn day_names(field: &str) -> Option<String> {
    let mut days: Vec<String> = Vec::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step.parse::<usize>().ok().filter(|s| *s > 0)?)),
            None => (item, None),
        };

        let bounds = match (range, step) {
            ("*", None) => {
                days.push("*".to_string());
                continue;
            }
            ("*", Some(_)) => Some((0, 6)),
            _ => match range.split_once('-') {
                Some((start, end)) => start.parse::<usize>().ok().zip(end.parse::<usize>().ok()),
                None => range.parse::<usize>().ok().map(|d| (d, if step.is_some() { 6 } else { d })),
            },
        };

        let Some((start, end)) = bounds else {
            days.push(item.to_string());
            continue;
        };
        if start > end || end > 7 {
            return None;
        }
        for day in (start..=end).step_by(step.unwrap_or(1)) {
            let name = DAY_NAMES[day % 7].to_string();
            if !days.contains(&name) {
                days.push(name);
            }
        }
    }

    Some(days.join(","))
}

pub fn parse_schedule(expression: &str) -> Option<Schedule> {
    let six_field = to_six_field(expression)?;
    Schedule::from_str(&six_field).ok()
}

pub fn is_valid_cron(expression: &str) -> bool {
    expression.split_whitespace().count() == 5 && parse_schedule(expression).is_some()
}

/// Next time the expression fires strictly after `after`, or `after + fallback` when the
/// expression is unusable.
pub fn next_check_after(expression: &str, after: DateTime<Utc>, fallback: Duration) -> DateTime<Utc> {
    parse_schedule(expression)
        .and_then(|schedule| schedule.after(&after).next())
        .unwrap_or(after + fallback)
}
