use crate::config::DeadlineSettings;
use crate::store::Record;
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Major code that matches every specialty.
pub const GLOBAL_MAJOR: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadlineStatus {
    Expired,
    Safe,
    Caution,
    Danger,
}

impl DeadlineStatus {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "Expired" => Some(Self::Expired),
            "Safe" => Some(Self::Safe),
            "Caution" => Some(Self::Caution),
            "Danger" => Some(Self::Danger),
            _ => None,
        }
    }
}

pub fn status_at(due: DateTime<Utc>, now: DateTime<Utc>, settings: &DeadlineSettings) -> DeadlineStatus {
    let left = due - now;
    if left < Duration::zero() {
        DeadlineStatus::Expired
    } else if left > Duration::days(settings.safe_days) {
        DeadlineStatus::Safe
    } else if left > Duration::days(settings.caution_days) {
        DeadlineStatus::Caution
    } else {
        DeadlineStatus::Danger
    }
}

/// Accepts RFC 3339 and the `YYYY-MM-DDTHH:MM[:SS]` form of a datetime
/// picker; the latter is taken as UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
        .map(|n| n.and_utc())
}

/// Canonical stored form: UTC with millisecond precision and a `Z` suffix.
pub fn normalize_instant(raw: &str) -> Option<String> {
    parse_instant(raw).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Empty means every major.
    pub majors: Vec<String>,
    /// `None` means every grade; otherwise e.g. `"grade12"`.
    pub grade: Option<String>,
    pub status: Option<DeadlineStatus>,
}

impl EventFilter {
    fn matches_major(&self, major: &str) -> bool {
        self.majors.is_empty() || major == GLOBAL_MAJOR || self.majors.iter().any(|m| m == major)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Assignment,
    Quiz,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub kind: EventKind,
    pub id: String,
    pub name: String,
    pub date: String,
    pub major: String,
    pub grade: Option<String>,
    pub status: DeadlineStatus,
    #[serde(skip)]
    at: DateTime<Utc>,
}

fn text(r: &Record, key: &str) -> Option<String> {
    r.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn to_event(kind: EventKind, r: &Record, now: DateTime<Utc>, settings: &DeadlineSettings) -> Option<CalendarEvent> {
    let (date_key, major_key) = match kind {
        EventKind::Assignment => ("due_date", "major"),
        EventKind::Quiz => ("date", "class"),
    };
    let date = text(r, date_key)?;
    let at = parse_instant(&date)?;
    Some(CalendarEvent {
        kind,
        id: text(r, "id").unwrap_or_default(),
        name: text(r, "name").unwrap_or_default(),
        major: text(r, major_key).unwrap_or_default(),
        grade: text(r, "grade"),
        status: status_at(at, now, settings),
        date,
        at,
    })
}

/// Applies the filter to assignments. Rows with unreadable dates are dropped.
pub fn assignment_events(
    rows: &[Record],
    now: DateTime<Utc>,
    settings: &DeadlineSettings,
    filter: &EventFilter,
) -> Vec<CalendarEvent> {
    rows.iter()
        .filter_map(|r| to_event(EventKind::Assignment, r, now, settings))
        .filter(|e| filter.matches_major(&e.major))
        .filter(|e| filter.status.map(|s| s == e.status).unwrap_or(true))
        .filter(|e| match &filter.grade {
            Some(g) => e.grade.as_deref() == Some(g.as_str()),
            None => true,
        })
        .collect()
}

/// Quizzes are matched on their class code; the grade filter does not apply.
pub fn quiz_events(
    rows: &[Record],
    now: DateTime<Utc>,
    settings: &DeadlineSettings,
    filter: &EventFilter,
) -> Vec<CalendarEvent> {
    rows.iter()
        .filter_map(|r| to_event(EventKind::Quiz, r, now, settings))
        .filter(|e| filter.matches_major(&e.major))
        .filter(|e| filter.status.map(|s| s == e.status).unwrap_or(true))
        .collect()
}

/// Filtered assignments and quizzes, soonest first.
pub fn merged_events(
    assignments: &[Record],
    quizzes: &[Record],
    now: DateTime<Utc>,
    settings: &DeadlineSettings,
    filter: &EventFilter,
) -> Vec<CalendarEvent> {
    let mut events = assignment_events(assignments, now, settings, filter);
    events.extend(quiz_events(quizzes, now, settings, filter));
    events.sort_by_key(|e| e.at);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        parse_instant("2024-09-10T12:00:00Z").unwrap()
    }

    fn rec(v: serde_json::Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn status_thresholds() {
        let s = DeadlineSettings::default();
        let at = |raw: &str| status_at(parse_instant(raw).unwrap(), now(), &s);
        assert_eq!(at("2024-09-10T11:59:59Z"), DeadlineStatus::Expired);
        assert_eq!(at("2024-09-10T12:00:00Z"), DeadlineStatus::Danger);
        assert_eq!(at("2024-09-12T12:00:00Z"), DeadlineStatus::Danger);
        assert_eq!(at("2024-09-12T12:00:01Z"), DeadlineStatus::Caution);
        assert_eq!(at("2024-09-17T12:00:00Z"), DeadlineStatus::Caution);
        assert_eq!(at("2024-09-17T12:00:01Z"), DeadlineStatus::Safe);
    }

    #[test]
    fn instants_normalize_to_utc_millis() {
        assert_eq!(
            normalize_instant("2024-09-20T10:30").as_deref(),
            Some("2024-09-20T10:30:00.000Z")
        );
        assert_eq!(
            normalize_instant("2024-09-20T13:30:00+03:00").as_deref(),
            Some("2024-09-20T10:30:00.000Z")
        );
        assert!(normalize_instant("next tuesday").is_none());
    }

    #[test]
    fn filters_by_major_grade_and_status() {
        let rows = vec![
            rec(json!({ "id": "1", "name": "DB lab", "due_date": "2024-09-30T08:00:00Z", "major": "CCP", "grade": "grade12" })),
            rec(json!({ "id": "2", "name": "ML essay", "due_date": "2024-09-11T08:00:00Z", "major": "AI", "grade": "grade12" })),
            rec(json!({ "id": "3", "name": "Assembly", "due_date": "2024-09-13T08:00:00Z", "major": "global", "grade": "grade11" })),
            rec(json!({ "id": "4", "name": "Broken", "due_date": "soon", "major": "CCP", "grade": "grade12" })),
        ];
        let s = DeadlineSettings::default();

        let all = assignment_events(&rows, now(), &s, &EventFilter::default());
        assert_eq!(all.len(), 3);

        let ccp = EventFilter {
            majors: vec!["CCP".into()],
            ..Default::default()
        };
        let ids: Vec<_> = assignment_events(&rows, now(), &s, &ccp).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["1", "3"]);

        let g12_danger = EventFilter {
            grade: Some("grade12".into()),
            status: Some(DeadlineStatus::Danger),
            ..Default::default()
        };
        let ids: Vec<_> = assignment_events(&rows, now(), &s, &g12_danger).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["2"]);
    }

    #[test]
    fn merged_calendar_is_sorted() {
        let a = vec![rec(json!({ "id": "a", "name": "A", "due_date": "2024-09-20T08:00:00Z", "major": "SEC", "grade": "grade12" }))];
        let q = vec![
            rec(json!({ "id": "q1", "name": "Q1", "date": "2024-09-15T08:00:00Z", "class": "SEC" })),
            rec(json!({ "id": "q2", "name": "Q2", "date": "2024-09-25T08:00:00Z", "class": "AI" })),
        ];
        let filter = EventFilter {
            majors: vec!["SEC".into()],
            grade: Some("grade11".into()),
            ..Default::default()
        };
        let events = merged_events(&a, &q, now(), &DeadlineSettings::default(), &filter);
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        // The grade filter drops the grade-12 assignment but not the quiz.
        assert_eq!(ids, vec!["q1"]);

        let events = merged_events(&a, &q, now(), &DeadlineSettings::default(), &EventFilter::default());
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "a", "q2"]);
        assert_eq!(events[0].kind, EventKind::Quiz);
    }
}
