use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use num_format::{Locale, ToFormattedString};

/// Comma-grouped rendering for the card and the terminal report.
pub fn group_digits<N: ToFormattedString>(n: N) -> String {
    n.to_formatted_string(&Locale::en)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
            if leap { 29 } else { 28 }
        }
    }
}

fn pluralize(n: i32, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Account age as "X years, Y months, Z days", calendar arithmetic rather
/// than day counting, with a cake on the anniversary.
///
/// Whole months are measured by advancing the birthday month by month with
/// the day-of-month clamped to the target month's length, so a day-31
/// birthday still lands correctly next to February.
pub fn format_age(birthday: NaiveDate, today: NaiveDate) -> String {
    let mut whole_months = (today.year() - birthday.year()) * 12
        + (today.month() as i32 - birthday.month() as i32);
    if today.day() < birthday.day() {
        whole_months -= 1;
    }
    whole_months = whole_months.max(0);

    let anchor_months = birthday.year() * 12 + birthday.month() as i32 - 1 + whole_months;
    let anchor_year = anchor_months.div_euclid(12);
    let anchor_month = (anchor_months.rem_euclid(12) + 1) as u32;
    let anchor_day = birthday.day().min(days_in_month(anchor_year, anchor_month));
    let anchor = NaiveDate::from_ymd_opt(anchor_year, anchor_month, anchor_day)
        .unwrap_or(birthday);

    let years = whole_months / 12;
    let months = whole_months % 12;
    let days = (today - anchor).num_days().max(0) as i32;

    let cake = if months == 0 && days == 0 { " 🎂" } else { "" };
    format!(
        "{}, {}, {}{}",
        pluralize(years, "year"),
        pluralize(months, "month"),
        pluralize(days, "day"),
        cake
    )
}

/// One row of the timing report: left-justified label, right-justified
/// duration in seconds or milliseconds.
pub fn format_elapsed(label: &str, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let value = if secs > 1.0 {
        format!("{secs:.4} s ")
    } else {
        format!("{:.4} ms", secs * 1000.0)
    };
    format!("{:<23}{:>12}", format!("   {label}:"), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn groups_thousands_with_commas() {
        assert_eq!(group_digits(0u64), "0");
        assert_eq!(group_digits(999u64), "999");
        assert_eq!(group_digits(1_234u64), "1,234");
        assert_eq!(group_digits(1_234_567u64), "1,234,567");
        assert_eq!(group_digits(-30_000i64), "-30,000");
    }

    #[test]
    fn age_uses_calendar_months_and_days() {
        assert_eq!(
            format_age(date(2020, 8, 25), date(2025, 8, 27)),
            "5 years, 0 months, 2 days"
        );
        assert_eq!(
            format_age(date(2020, 8, 25), date(2025, 9, 24)),
            "5 years, 0 months, 30 days"
        );
        assert_eq!(
            format_age(date(2020, 8, 25), date(2021, 9, 26)),
            "1 year, 1 month, 1 day"
        );
    }

    #[test]
    fn age_borrows_days_from_the_previous_month() {
        // 2025-03-10 minus 2020-03-15: borrow from February (28 days).
        assert_eq!(
            format_age(date(2020, 3, 15), date(2025, 3, 10)),
            "4 years, 11 months, 23 days"
        );
        // Borrow across a leap-year February.
        assert_eq!(
            format_age(date(2023, 1, 31), date(2024, 3, 1)),
            "1 year, 1 month, 1 day"
        );
    }

    #[test]
    fn anniversary_gets_a_cake() {
        assert_eq!(
            format_age(date(2020, 8, 25), date(2025, 8, 25)),
            "5 years, 0 months, 0 days 🎂"
        );
    }

    #[test]
    fn elapsed_rows_switch_units_at_one_second() {
        let fast = format_elapsed("LOC (cached)", Duration::from_millis(12));
        assert!(fast.ends_with("12.0000 ms"));
        assert!(fast.starts_with("   LOC (cached):"));

        let slow = format_elapsed("LOC (no cache)", Duration::from_secs_f64(2.5));
        assert!(slow.ends_with("2.5000 s "));
    }
}
