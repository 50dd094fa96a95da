use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Weekdays are numbered from Sunday; the school week runs Sunday..Thursday.
pub const SCHOOL_DAYS: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("malformed time {0:?}, expected HH:MM")]
    MalformedTime(String),
    #[error("period {subject:?} must start before it ends ({start} >= {end})")]
    EmptyPeriod {
        subject: String,
        start: String,
        end: String,
    },
    #[error("weekday {weekday}: period {later:?} starts before {earlier:?} ends")]
    Overlap {
        weekday: u8,
        earlier: String,
        later: String,
    },
}

/// Wall-clock time of day with minute precision, as written in timetables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    minutes: u32,
}

impl ClockTime {
    /// Accepts `HH:MM` and the unpadded `H:MM` form; anything else is rejected.
    pub fn parse(raw: &str) -> Result<Self, ClockError> {
        let malformed = || ClockError::MalformedTime(raw.to_string());
        let (h, m) = raw.trim().split_once(':').ok_or_else(malformed)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(malformed());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let hours: u32 = h.parse().map_err(|_| malformed())?;
        let minutes: u32 = m.parse().map_err(|_| malformed())?;
        if hours > 23 || minutes > 59 {
            return Err(malformed());
        }
        Ok(Self {
            minutes: hours * 60 + minutes,
        })
    }

    pub fn seconds_from_midnight(self) -> u32 {
        self.minutes * 60
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes / 60, self.minutes % 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub subject: String,
    #[serde(default)]
    pub teacher: String,
    #[serde(default)]
    pub room: String,
    pub start: String,
    pub end: String,
}

impl Period {
    pub fn bounds(&self) -> Result<(ClockTime, ClockTime), ClockError> {
        let start = ClockTime::parse(&self.start)?;
        let end = ClockTime::parse(&self.end)?;
        if start >= end {
            return Err(ClockError::EmptyPeriod {
                subject: self.subject.clone(),
                start: self.start.clone(),
                end: self.end.clone(),
            });
        }
        Ok((start, end))
    }
}

pub type DailySchedule = Vec<Period>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyTimetable {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub schedules: BTreeMap<u8, DailySchedule>,
}

/// Class key (e.g. "12.CCP") to that class's week.
pub type Timetables = BTreeMap<String, WeeklyTimetable>;

/// Checks every period of one day and that the day ascends without overlap.
pub fn validate_day(weekday: u8, periods: &[Period]) -> Result<(), ClockError> {
    let mut prev: Option<(&Period, ClockTime)> = None;
    for p in periods {
        let (start, end) = p.bounds()?;
        if let Some((earlier, earlier_end)) = prev {
            if start < earlier_end {
                return Err(ClockError::Overlap {
                    weekday,
                    earlier: earlier.subject.clone(),
                    later: p.subject.clone(),
                });
            }
        }
        prev = Some((p, end));
    }
    Ok(())
}

pub fn day_schedule<'a>(timetables: &'a Timetables, class_key: &str, weekday: u8) -> &'a [Period] {
    timetables
        .get(class_key)
        .and_then(|t| t.schedules.get(&weekday))
        .map(|v| v.as_slice())
        .unwrap_or(&[])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    pub weekday: u8,
    pub live: bool,
    pub current_period: Option<Period>,
    pub next_period: Option<Period>,
    pub elapsed_seconds: u32,
    pub remaining_seconds: u32,
    pub percent_remaining: u32,
    pub periods: Vec<Period>,
}

impl ScheduleState {
    fn idle(weekday: u8, periods: &[Period], next: Option<Period>) -> Self {
        Self {
            weekday,
            live: true,
            current_period: None,
            next_period: next,
            elapsed_seconds: 0,
            remaining_seconds: 0,
            percent_remaining: 100,
            periods: periods.to_vec(),
        }
    }
}

/// Samples the timetable at `now`.
///
/// Periods are half-open: a period whose `end` equals `now` is already over.
/// Outside any period, `next_period` is the first period that has not started
/// yet (so `None` once the day is over).
pub fn tick(
    timetables: &Timetables,
    class_key: &str,
    weekday: u8,
    now: NaiveTime,
) -> Result<ScheduleState, ClockError> {
    let periods = day_schedule(timetables, class_key, weekday);
    let bounds = periods
        .iter()
        .map(|p| p.bounds())
        .collect::<Result<Vec<_>, _>>()?;
    let now_secs = now.num_seconds_from_midnight();

    for (i, (start, end)) in bounds.iter().enumerate() {
        let start = start.seconds_from_midnight();
        let end = end.seconds_from_midnight();
        if now_secs >= start && now_secs < end {
            let elapsed = now_secs - start;
            let remaining = end - now_secs;
            let percent = (100.0 * remaining as f64 / (end - start) as f64).round() as u32;
            return Ok(ScheduleState {
                weekday,
                live: true,
                current_period: Some(periods[i].clone()),
                next_period: periods.get(i + 1).cloned(),
                elapsed_seconds: elapsed,
                remaining_seconds: remaining,
                percent_remaining: percent,
                periods: periods.to_vec(),
            });
        }
    }

    let upcoming = bounds
        .iter()
        .position(|(start, _)| start.seconds_from_midnight() > now_secs)
        .map(|i| periods[i].clone());
    Ok(ScheduleState::idle(weekday, periods, upcoming))
}

/// A day shown for reference only, with the countdown suppressed.
pub fn preview(
    timetables: &Timetables,
    class_key: &str,
    weekday: u8,
) -> Result<ScheduleState, ClockError> {
    let periods = day_schedule(timetables, class_key, weekday);
    validate_day(weekday, periods)?;
    let mut state = ScheduleState::idle(weekday, periods, periods.first().cloned());
    state.live = false;
    Ok(state)
}

/// Renders a duration the way the schedule card shows it: `"12m 5s"`.
pub fn format_span(seconds: u32) -> String {
    format!("{}m {}s", seconds / 60, seconds % 60)
}

pub fn is_school_day(weekday: u8) -> bool {
    weekday < SCHOOL_DAYS
}

pub fn next_school_day(weekday: u8) -> u8 {
    if weekday + 1 >= SCHOOL_DAYS {
        0
    } else {
        weekday + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RolloverPolicy {
    /// After the last period, show the next school day and remember it.
    AutoAdvance,
    /// After the last period, show the first school day; nothing is remembered.
    AlwaysReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeekendPolicy {
    ShowFirstDay,
    Empty,
}

/// Remembered rollover decision, persisted by the caller under auto-advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorMemo {
    pub weekday: u8,
    pub advanced_on: NaiveDate,
}

impl CursorMemo {
    pub fn to_json(self) -> serde_json::Value {
        serde_json::json!({
            "weekday": self.weekday,
            "advancedOn": self.advanced_on.format("%Y-%m-%d").to_string(),
        })
    }

    pub fn from_json(v: &serde_json::Value) -> Option<Self> {
        let weekday = v.get("weekday")?.as_u64()?;
        let advanced_on = v.get("advancedOn")?.as_str()?;
        let advanced_on = NaiveDate::parse_from_str(advanced_on, "%Y-%m-%d").ok()?;
        if weekday >= SCHOOL_DAYS as u64 {
            return None;
        }
        Some(Self {
            weekday: weekday as u8,
            advanced_on,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorSample {
    pub state: ScheduleState,
    /// Set when the cursor moved and the policy wants the move remembered.
    pub persist: Option<CursorMemo>,
}

/// Caller-side state deciding which weekday the live view shows.
#[derive(Debug, Clone)]
pub struct DayCursor {
    rollover: RolloverPolicy,
    weekend: WeekendPolicy,
    memo: Option<CursorMemo>,
}

impl DayCursor {
    pub fn new(rollover: RolloverPolicy, weekend: WeekendPolicy, saved: Option<CursorMemo>) -> Self {
        let memo = match rollover {
            RolloverPolicy::AutoAdvance => saved,
            RolloverPolicy::AlwaysReset => None,
        };
        Self {
            rollover,
            weekend,
            memo,
        }
    }

    pub fn sample(
        &mut self,
        timetables: &Timetables,
        class_key: &str,
        now: NaiveDateTime,
    ) -> Result<CursorSample, ClockError> {
        let today = now.date();
        let weekday = now.weekday().num_days_from_sunday() as u8;

        if let Some(memo) = self.memo.filter(|m| m.advanced_on == today) {
            return Ok(CursorSample {
                state: preview(timetables, class_key, memo.weekday)?,
                persist: None,
            });
        }
        self.memo = None;

        if !is_school_day(weekday) {
            let state = match self.weekend {
                WeekendPolicy::ShowFirstDay => preview(timetables, class_key, 0)?,
                WeekendPolicy::Empty => {
                    let mut s = ScheduleState::idle(weekday, &[], None);
                    s.live = false;
                    s
                }
            };
            return Ok(CursorSample {
                state,
                persist: None,
            });
        }

        let state = tick(timetables, class_key, weekday, now.time())?;
        let periods = day_schedule(timetables, class_key, weekday);
        let day_over = match periods.last() {
            Some(last) => {
                let (_, end) = last.bounds()?;
                now.time().num_seconds_from_midnight() >= end.seconds_from_midnight()
            }
            None => false,
        };
        if !day_over {
            return Ok(CursorSample {
                state,
                persist: None,
            });
        }

        let (target, persist) = match self.rollover {
            RolloverPolicy::AutoAdvance => (next_school_day(weekday), true),
            RolloverPolicy::AlwaysReset => (0, false),
        };
        let memo = CursorMemo {
            weekday: target,
            advanced_on: today,
        };
        self.memo = Some(memo);
        Ok(CursorSample {
            state: preview(timetables, class_key, target)?,
            persist: persist.then_some(memo),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(subject: &str, start: &str, end: &str) -> Period {
        Period {
            subject: subject.to_string(),
            teacher: "T".to_string(),
            room: "R1".to_string(),
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    fn timetables(day: Vec<Period>) -> Timetables {
        let mut schedules = BTreeMap::new();
        schedules.insert(0, day.clone());
        schedules.insert(1, day.clone());
        schedules.insert(4, day);
        let mut t = Timetables::new();
        t.insert(
            "12.CCP".to_string(),
            WeeklyTimetable {
                label: "12.CCP".to_string(),
                schedules,
            },
        );
        t
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).expect("valid time")
    }

    fn morning() -> Vec<Period> {
        vec![
            period("Math", "08:00", "09:00"),
            period("Break 1", "09:00", "09:20"),
            period("English", "09:20", "10:05"),
        ]
    }

    #[test]
    fn clock_time_parses_padded_and_unpadded() {
        assert_eq!(ClockTime::parse("07:15").unwrap().to_string(), "07:15");
        assert_eq!(ClockTime::parse("7:15").unwrap().to_string(), "07:15");
        assert!(ClockTime::parse("24:00").is_err());
        assert!(ClockTime::parse("08:6").is_err());
        assert!(ClockTime::parse("0800").is_err());
        assert!(ClockTime::parse("ab:cd").is_err());
    }

    #[test]
    fn mid_period_reports_elapsed_and_remaining() {
        let t = timetables(vec![period("Math", "08:00", "09:00")]);
        let s = tick(&t, "12.CCP", 0, at(8, 30, 0)).unwrap();
        assert_eq!(s.current_period.as_ref().map(|p| p.subject.as_str()), Some("Math"));
        assert_eq!(s.elapsed_seconds, 1800);
        assert_eq!(s.remaining_seconds, 1800);
        assert_eq!(s.percent_remaining, 50);
        assert!(s.next_period.is_none());
    }

    #[test]
    fn elapsed_plus_remaining_is_period_length() {
        let t = timetables(morning());
        let s = tick(&t, "12.CCP", 1, at(9, 47, 13)).unwrap();
        assert_eq!(s.current_period.unwrap().subject, "English");
        assert_eq!(s.elapsed_seconds + s.remaining_seconds, 45 * 60);
    }

    #[test]
    fn period_end_is_exclusive() {
        let t = timetables(morning());
        let s = tick(&t, "12.CCP", 0, at(9, 0, 0)).unwrap();
        assert_eq!(s.current_period.unwrap().subject, "Break 1");
        assert_eq!(s.next_period.unwrap().subject, "English");

        let s = tick(&t, "12.CCP", 0, at(10, 5, 0)).unwrap();
        assert!(s.current_period.is_none());
    }

    #[test]
    fn before_first_period_points_at_first() {
        let t = timetables(morning());
        let s = tick(&t, "12.CCP", 0, at(6, 59, 59)).unwrap();
        assert!(s.current_period.is_none());
        assert_eq!(s.next_period.unwrap().subject, "Math");
        assert_eq!(s.elapsed_seconds, 0);
        assert_eq!(s.remaining_seconds, 0);
        assert_eq!(s.percent_remaining, 100);
    }

    #[test]
    fn after_last_period_has_nothing_next() {
        let t = timetables(morning());
        let s = tick(&t, "12.CCP", 0, at(14, 0, 0)).unwrap();
        assert!(s.current_period.is_none());
        assert!(s.next_period.is_none());
    }

    #[test]
    fn gap_between_periods_points_at_upcoming() {
        let t = timetables(vec![
            period("Chemistry", "10:35", "11:20"),
            period("English", "12:05", "12:45"),
        ]);
        let s = tick(&t, "12.CCP", 0, at(11, 40, 0)).unwrap();
        assert!(s.current_period.is_none());
        assert_eq!(s.next_period.unwrap().subject, "English");
    }

    #[test]
    fn unknown_class_or_day_is_empty() {
        let t = timetables(morning());
        let s = tick(&t, "11.AI", 0, at(8, 30, 0)).unwrap();
        assert!(s.periods.is_empty());
        assert!(s.next_period.is_none());
        let s = tick(&t, "12.CCP", 3, at(8, 30, 0)).unwrap();
        assert!(s.periods.is_empty());
    }

    #[test]
    fn malformed_time_fails_fast() {
        let t = timetables(vec![period("Math", "8h00", "09:00")]);
        let e = tick(&t, "12.CCP", 0, at(8, 30, 0)).unwrap_err();
        assert_eq!(e, ClockError::MalformedTime("8h00".to_string()));
    }

    #[test]
    fn validate_day_rejects_overlap() {
        let day = vec![period("A", "08:00", "09:00"), period("B", "08:30", "09:30")];
        assert!(matches!(
            validate_day(2, &day),
            Err(ClockError::Overlap { weekday: 2, .. })
        ));
        assert!(validate_day(0, &morning()).is_ok());
    }

    #[test]
    fn format_span_matches_card_text() {
        assert_eq!(format_span(0), "0m 0s");
        assert_eq!(format_span(3725), "62m 5s");
    }

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .and_then(|d| d.and_hms_opt(h, mi, 0))
            .expect("valid datetime")
    }

    // 2024-09-01 is a Sunday.
    #[test]
    fn auto_advance_moves_to_next_day_and_persists() {
        let t = timetables(morning());
        let mut c = DayCursor::new(RolloverPolicy::AutoAdvance, WeekendPolicy::ShowFirstDay, None);

        let s = c.sample(&t, "12.CCP", dt(2024, 9, 1, 8, 30)).unwrap();
        assert_eq!(s.state.weekday, 0);
        assert!(s.state.live);
        assert!(s.persist.is_none());

        let s = c.sample(&t, "12.CCP", dt(2024, 9, 1, 10, 5)).unwrap();
        assert_eq!(s.state.weekday, 1);
        assert!(!s.state.live);
        assert_eq!(s.persist.map(|m| m.weekday), Some(1));

        // Same day, later: stays advanced without re-persisting.
        let s = c.sample(&t, "12.CCP", dt(2024, 9, 1, 11, 0)).unwrap();
        assert_eq!(s.state.weekday, 1);
        assert!(s.persist.is_none());

        // Next morning the memo is stale and today is live again.
        let s = c.sample(&t, "12.CCP", dt(2024, 9, 2, 8, 10)).unwrap();
        assert_eq!(s.state.weekday, 1);
        assert!(s.state.live);
        assert_eq!(s.state.current_period.unwrap().subject, "Math");
    }

    #[test]
    fn auto_advance_wraps_thursday_to_sunday() {
        let t = timetables(morning());
        let mut c = DayCursor::new(RolloverPolicy::AutoAdvance, WeekendPolicy::ShowFirstDay, None);
        // 2024-09-05 is a Thursday.
        let s = c.sample(&t, "12.CCP", dt(2024, 9, 5, 12, 0)).unwrap();
        assert_eq!(s.state.weekday, 0);
        assert_eq!(s.persist.map(|m| m.weekday), Some(0));
    }

    #[test]
    fn always_reset_shows_first_day_without_persisting() {
        let t = timetables(morning());
        let saved = CursorMemo {
            weekday: 3,
            advanced_on: NaiveDate::from_ymd_opt(2024, 9, 2).unwrap(),
        };
        let mut c = DayCursor::new(RolloverPolicy::AlwaysReset, WeekendPolicy::ShowFirstDay, Some(saved));
        let s = c.sample(&t, "12.CCP", dt(2024, 9, 2, 8, 15)).unwrap();
        assert_eq!(s.state.weekday, 1);
        assert!(s.state.live);

        let s = c.sample(&t, "12.CCP", dt(2024, 9, 2, 13, 0)).unwrap();
        assert_eq!(s.state.weekday, 0);
        assert!(s.persist.is_none());
    }

    #[test]
    fn auto_advance_resumes_saved_memo_for_today() {
        let t = timetables(morning());
        let saved = CursorMemo {
            weekday: 1,
            advanced_on: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
        };
        let mut c = DayCursor::new(RolloverPolicy::AutoAdvance, WeekendPolicy::ShowFirstDay, Some(saved));
        let s = c.sample(&t, "12.CCP", dt(2024, 9, 1, 15, 0)).unwrap();
        assert_eq!(s.state.weekday, 1);
        assert!(!s.state.live);
    }

    #[test]
    fn weekend_policies() {
        let t = timetables(morning());
        // 2024-09-06 is a Friday.
        let mut c = DayCursor::new(RolloverPolicy::AutoAdvance, WeekendPolicy::ShowFirstDay, None);
        let s = c.sample(&t, "12.CCP", dt(2024, 9, 6, 8, 30)).unwrap();
        assert_eq!(s.state.weekday, 0);
        assert!(!s.state.live);
        assert!(s.state.current_period.is_none());
        assert_eq!(s.state.periods.len(), 3);

        let mut c = DayCursor::new(RolloverPolicy::AutoAdvance, WeekendPolicy::Empty, None);
        let s = c.sample(&t, "12.CCP", dt(2024, 9, 7, 8, 30)).unwrap();
        assert_eq!(s.state.weekday, 6);
        assert!(s.state.periods.is_empty());
    }

    #[test]
    fn memo_json_roundtrip_rejects_weekend() {
        let m = CursorMemo {
            weekday: 2,
            advanced_on: NaiveDate::from_ymd_opt(2024, 9, 3).unwrap(),
        };
        assert_eq!(CursorMemo::from_json(&m.to_json()), Some(m));
        let bad = serde_json::json!({ "weekday": 6, "advancedOn": "2024-09-03" });
        assert_eq!(CursorMemo::from_json(&bad), None);
    }
}
