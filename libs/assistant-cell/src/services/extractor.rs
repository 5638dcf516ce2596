// libs/assistant-cell/src/services/extractor.rs
//
// Best-effort extraction of calendar dates, clock times and appointment
// identifiers from free French text. Each family of patterns is an ordered
// table of independent matcher functions; the first one to produce a value
// wins. A matcher that recognizes its shape but fails validation (month 13,
// February 30) yields None and the chain keeps going.
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

type DateMatcher = fn(&str, NaiveDate) -> Option<NaiveDate>;
type TimeMatcher = fn(&str) -> Option<NaiveTime>;

static DATE_MATCHERS: &[DateMatcher] = &[
    match_literal_words,
    match_relative_offset,
    match_weekday,
    match_ymd,
    match_dmy_slash,
    match_dmy_flexible,
    match_textual_month,
];

static TIME_MATCHERS: &[TimeMatcher] = &[match_named_period, match_spelled_hours, match_strict_time];

/// Resolve a date mentioned anywhere in `text`, relative to `today`.
pub fn extract_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = text.to_lowercase();
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    DATE_MATCHERS.iter().find_map(|matcher| matcher(text, today))
}

/// Resolve a clock time mentioned anywhere in `text`.
pub fn extract_time(text: &str) -> Option<NaiveTime> {
    let text = text.to_lowercase();
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    TIME_MATCHERS.iter().find_map(|matcher| matcher(text))
}

static INVALID_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2,})[h:](\d{2})?").unwrap());

/// True when the text carries something shaped like a time (2+ digit hour
/// followed by a separator) whose hour or minute is out of range. Distinct
/// from "no time token at all": this one is a user error to report back.
pub fn contains_invalid_time(text: &str) -> bool {
    let text = text.to_lowercase();
    let Some(caps) = INVALID_TIME_RE.captures(&text) else {
        return false;
    };
    let Ok(hour) = caps[1].parse::<u32>() else {
        // Too many digits to even parse: definitely not a valid hour.
        return true;
    };
    let minute = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(0);
    hour >= 24 || minute >= 60
}

static ID_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:rdv|rendez-vous|rendez vous|appointment|id|numéro|numero|n°|no|#)\s*(?:n°|no|numero|#)?\s*(\d+)")
        .unwrap()
});
static BARE_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").unwrap());

/// Extract an appointment reference number. A number following an explicit
/// marker wins; a bare integer is only accepted when the message is short
/// enough to plausibly be just the number.
pub fn extract_rdv_id(text: &str) -> Option<i64> {
    let text = text.to_lowercase();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(caps) = ID_MARKER_RE.captures(trimmed) {
        if let Ok(id) = caps[1].parse() {
            return Some(id);
        }
    }

    if trimmed.chars().count() < 20 {
        if let Some(caps) = BARE_NUMBER_RE.captures(trimmed) {
            return caps[1].parse().ok();
        }
    }

    None
}

// ==============================================================================
// DATE MATCHERS
// ==============================================================================

static APRES_DEMAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"apr[eè]s[-\s]demain").unwrap());

fn match_literal_words(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if text.contains("aujourd'hui") || text.contains("ce jour") || text.contains("maintenant") {
        return Some(today);
    }
    if APRES_DEMAIN_RE.is_match(text) {
        return Some(today + Duration::days(2));
    }
    if text.contains("demain") {
        return Some(today + Duration::days(1));
    }
    if text.contains("hier") {
        // Resolved but in the past; callers reject it downstream.
        return Some(today - Duration::days(1));
    }
    None
}

static IN_N_DAYS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"dans\s+(\d+)\s+jour").unwrap());

fn match_relative_offset(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = IN_N_DAYS_RE.captures(text)?;
    let days: i64 = caps[1].parse().ok()?;
    Some(today + Duration::days(days))
}

static WEEKDAYS: &[(&str, Weekday)] = &[
    ("lundi", Weekday::Mon),
    ("mardi", Weekday::Tue),
    ("mercredi", Weekday::Wed),
    ("jeudi", Weekday::Thu),
    ("vendredi", Weekday::Fri),
    ("samedi", Weekday::Sat),
    ("dimanche", Weekday::Sun),
];

fn match_weekday(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let next_week = text.contains("prochain") || text.contains("semaine prochaine");
    for (name, weekday) in WEEKDAYS {
        if text.contains(name) {
            return Some(if next_week {
                weekday_of_next_week(today, *weekday)
            } else {
                nearest_weekday(today, *weekday)
            });
        }
    }
    None
}

/// Nearest occurrence of `target` counting from `today` inclusive.
fn nearest_weekday(today: NaiveDate, target: Weekday) -> NaiveDate {
    let ahead = (target.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    today + Duration::days(ahead)
}

/// The `target` weekday inside the following calendar week.
fn weekday_of_next_week(today: NaiveDate, target: Weekday) -> NaiveDate {
    let days_to_next_monday = 7 - today.weekday().num_days_from_monday() as i64;
    let next_monday = today + Duration::days(days_to_next_monday);
    next_monday + Duration::days(target.num_days_from_monday() as i64)
}

static YMD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})[-/](\d{1,2})[-/](\d{1,2})").unwrap());

fn match_ymd(text: &str, _today: NaiveDate) -> Option<NaiveDate> {
    let caps = YMD_RE.captures(text)?;
    NaiveDate::from_ymd_opt(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    )
}

static DMY_SLASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[/-](\d{1,2})(?:[/-](\d{2,4}))?").unwrap());

fn match_dmy_slash(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = DMY_SLASH_RE.captures(text)?;
    build_day_month(
        &caps[1],
        &caps[2],
        caps.get(3).map(|m| m.as_str()),
        today,
    )
}

static DMY_FLEXIBLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[.\s](\d{1,2})(?:[.\s](\d{2,4}))?").unwrap());

fn match_dmy_flexible(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = DMY_FLEXIBLE_RE.captures(text)?;
    build_day_month(
        &caps[1],
        &caps[2],
        caps.get(3).map(|m| m.as_str()),
        today,
    )
}

static TEXTUAL_MONTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\d{1,2})\s+(janvier|fevrier|février|mars|avril|mai|juin|juillet|aout|août|septembre|octobre|novembre|decembre|décembre)(?:\s+(\d{2,4}))?",
    )
    .unwrap()
});

fn match_textual_month(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = TEXTUAL_MONTH_RE.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month = month_number(&caps[2])?;
    build_date(day, month, caps.get(3).map(|m| m.as_str()), today)
}

fn month_number(name: &str) -> Option<u32> {
    let folded: String = name
        .chars()
        .map(|c| match c {
            'é' | 'è' | 'ê' => 'e',
            'û' => 'u',
            other => other,
        })
        .collect();
    Some(match folded.as_str() {
        "janvier" => 1,
        "fevrier" => 2,
        "mars" => 3,
        "avril" => 4,
        "mai" => 5,
        "juin" => 6,
        "juillet" => 7,
        "aout" => 8,
        "septembre" => 9,
        "octobre" => 10,
        "novembre" => 11,
        "decembre" => 12,
        _ => return None,
    })
}

fn build_day_month(day: &str, month: &str, year: Option<&str>, today: NaiveDate) -> Option<NaiveDate> {
    build_date(day.parse().ok()?, month.parse().ok()?, year, today)
}

/// Assemble a date from day/month plus an optional textual year. Missing
/// years default to the current one and roll forward when already past.
fn build_date(day: u32, month: u32, year: Option<&str>, today: NaiveDate) -> Option<NaiveDate> {
    if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
        return None;
    }
    match year {
        Some(y) => {
            let mut year: i32 = y.parse().ok()?;
            if year < 100 {
                year += 2000;
            }
            NaiveDate::from_ymd_opt(year, month, day)
        }
        None => {
            let candidate = NaiveDate::from_ymd_opt(today.year(), month, day)?;
            if candidate < today {
                NaiveDate::from_ymd_opt(today.year() + 1, month, day)
            } else {
                Some(candidate)
            }
        }
    }
}

// ==============================================================================
// TIME MATCHERS
// ==============================================================================

fn match_named_period(text: &str) -> Option<NaiveTime> {
    // "après-midi" must be checked before "midi".
    if text.contains("après-midi") || text.contains("apres-midi") || text.contains("apres midi") {
        return NaiveTime::from_hms_opt(14, 0, 0);
    }
    if text.contains("matin") {
        return NaiveTime::from_hms_opt(9, 0, 0);
    }
    if text.contains("midi") {
        return NaiveTime::from_hms_opt(12, 0, 0);
    }
    if text.contains("soir") {
        return NaiveTime::from_hms_opt(16, 0, 0);
    }
    None
}

static SPELLED_HOURS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s+heures?(?:\s+(\d{2}))?").unwrap());

fn match_spelled_hours(text: &str) -> Option<NaiveTime> {
    let caps = SPELLED_HOURS_RE.captures(text)?;
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    NaiveTime::from_hms_opt(hour, minute, 0)
}

static STRICT_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})(?:[h:](\d{2})|h)").unwrap());

fn match_strict_time(text: &str) -> Option<NaiveTime> {
    let caps = STRICT_TIME_RE.captures(text)?;
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    NaiveTime::from_hms_opt(hour, minute, 0)
}
