//! Parsing and formatting of HTTP dates
//!
//! Formatting always produces the RFC 2616 preferred form
//! (`Sun, 06 Nov 1994 08:49:37 GMT`). Parsing accepts that form as well
//! as RFC 850, asctime and the netscape cookie variants (two-digit
//! years, dash separators, missing weekday, any case of the month name).

const MONTHS: &'static [&'static str] = &[
    "Jan", "Feb", "Mar", "Apr", "May", "Jun",
    "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const WEEKDAYS: &'static [&'static str] = &[
    "Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat",
];

fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let doy = (153 * (if month > 2 { month - 3 } else { month + 9 }) as i64
               + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719468;
    let era = (if z >= 0 { z } else { z - 146096 }) / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    (if m <= 2 { y + 1 } else { y }, m as u32, d as u32)
}

/// Format a POSIX timestamp as an HTTP date
pub fn format(timestamp: i64) -> String {
    let days = if timestamp >= 0 { timestamp / 86400 }
               else { (timestamp - 86399) / 86400 };
    let secs = timestamp - days * 86400;
    let (year, month, day) = civil_from_days(days);
    let wday = ((days % 7 + 7) + 4) % 7;
    format!("{}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
        WEEKDAYS[wday as usize], day, MONTHS[(month - 1) as usize], year,
        secs / 3600, secs / 60 % 60, secs % 60)
}

fn month_by_name(token: &str) -> Option<u32> {
    let prefix = match token.get(..3) {
        Some(prefix) => prefix,
        None => return None,
    };
    for (idx, name) in MONTHS.iter().enumerate() {
        if prefix.eq_ignore_ascii_case(name) {
            return Some(idx as u32 + 1);
        }
    }
    None
}

fn parse_time(token: &str) -> Option<(u32, u32, u32)> {
    let mut pieces = token.split(':');
    let hour = pieces.next().and_then(|x| x.parse().ok())?;
    let minute = pieces.next().and_then(|x| x.parse().ok())?;
    let second = pieces.next().and_then(|x| x.parse().ok())?;
    if pieces.next().is_some() || hour > 23 || minute > 59 || second > 60 {
        return None;
    }
    Some((hour, minute, second))
}

/// Parse an HTTP or netscape cookie date into a POSIX timestamp
///
/// All the accepted forms put the day of month before the year, which is
/// how the two are told apart when the year has two digits. Weekday and
/// timezone tokens are ignored (the formats are all nominally GMT).
pub fn parse(value: &str) -> Option<i64> {
    let mut time = None;
    let mut day = None;
    let mut month = None;
    let mut year = None;
    for token in value.split(|c: char| {
        !c.is_ascii_alphanumeric() && c != ':'
    }) {
        if token.is_empty() {
            continue;
        }
        if token.contains(':') {
            if time.is_none() {
                time = parse_time(token);
                if time.is_none() {
                    return None;
                }
            }
        } else if token.chars().all(|c| c.is_ascii_digit()) {
            if day.is_none() {
                day = token.parse::<u32>().ok();
            } else if year.is_none() {
                year = token.parse::<i64>().ok();
            }
        } else if month.is_none() {
            // a month name, or a weekday / "GMT" we skip over
            month = month_by_name(token);
        }
    }
    let (hour, minute, second) = time?;
    let day = day?;
    let month = month?;
    let mut year = year?;
    if day < 1 || day > 31 {
        return None;
    }
    if year < 100 {
        year += if year < 70 { 2000 } else { 1900 };
    }
    Some(days_from_civil(year, month, day) * 86400
        + hour as i64 * 3600 + minute as i64 * 60 + second as i64)
}

#[cfg(test)]
mod test {
    use super::{format, parse};

    const IETF_EPOCH: i64 = 784111777;

    #[test]
    fn rfc1123() {
        assert_eq!(parse("Sun, 06 Nov 1994 08:49:37 GMT"),
                   Some(IETF_EPOCH));
    }

    #[test]
    fn rfc850() {
        assert_eq!(parse("Sunday, 06-Nov-94 08:49:37 GMT"),
                   Some(IETF_EPOCH));
    }

    #[test]
    fn asctime() {
        assert_eq!(parse("Sun Nov  6 08:49:37 1994"), Some(IETF_EPOCH));
    }

    #[test]
    fn netscape_variants() {
        // no weekday, dash separators, four digit year
        assert_eq!(parse("06-Nov-1994 08:49:37 GMT"), Some(IETF_EPOCH));
        // month name case is irrelevant
        assert_eq!(parse("Sun, 06 NOV 1994 08:49:37 GMT"),
                   Some(IETF_EPOCH));
        assert_eq!(parse("06 nov 94 08:49:37"), Some(IETF_EPOCH));
    }

    #[test]
    fn two_digit_year_window() {
        // 70..99 are 19xx, 00..69 are 20xx
        assert_eq!(parse("01-Jan-70 00:00:00 GMT"), Some(0));
        assert_eq!(parse("01-Jan-00 00:00:00 GMT"), Some(946684800));
        assert_eq!(parse("01-Jan-69 00:00:00 GMT"), Some(3124224000));
    }

    #[test]
    fn formatting() {
        assert_eq!(format(IETF_EPOCH), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(format(0), "Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[test]
    fn round_trip() {
        for &ts in &[0, 1, 86399, 86400, IETF_EPOCH,
                     1500000000, 4102444799]
        {
            assert_eq!(parse(&format(ts)), Some(ts), "timestamp {}", ts);
        }
    }

    #[test]
    fn garbage() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("not a date"), None);
        assert_eq!(parse("Sun, 06 Nov 1994"), None);
        assert_eq!(parse("99:99:99 06 Nov 1994"), None);
        assert_eq!(parse("Sun, 99 Nov 1994 08:49:37 GMT"), None);
    }
}
