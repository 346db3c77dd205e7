use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{EventKind, Granularity, LearningEvent, TrendPoint};

/// Calendar boundary the given date falls into for this granularity.
/// An event exactly on a boundary belongs to the bucket it opens.
fn truncate(date: NaiveDate, granularity: Granularity) -> NaiveDate {
    match granularity {
        Granularity::Daily => date,
        Granularity::Monthly => date.with_day(1).unwrap_or(date),
    }
}

fn advance(date: NaiveDate, granularity: Granularity) -> NaiveDate {
    match granularity {
        Granularity::Daily => date + Duration::days(1),
        Granularity::Monthly => {
            let (year, month) = if date.month() == 12 {
                (date.year() + 1, 1)
            } else {
                (date.year(), date.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date + Duration::days(31))
        }
    }
}

fn label(date: NaiveDate, granularity: Granularity) -> String {
    match granularity {
        Granularity::Daily => date.format("%Y-%m-%d").to_string(),
        Granularity::Monthly => date.format("%Y-%m").to_string(),
    }
}

/// Group events into contiguous calendar buckets spanning `[start, end]`
/// inclusive. Every bucket in the span appears exactly once, zero-filled when
/// empty; each event lands in exactly one bucket by timestamp truncation.
pub fn bucketize(
    events: &[LearningEvent],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: Granularity,
) -> Vec<TrendPoint> {
    if end < start {
        return Vec::new();
    }

    let first = truncate(start.date_naive(), granularity);
    let last = truncate(end.date_naive(), granularity);

    let mut points = Vec::new();
    let mut index: HashMap<NaiveDate, usize> = HashMap::new();
    let mut cursor = first;
    while cursor <= last {
        index.insert(cursor, points.len());
        points.push(TrendPoint {
            bucket_label: label(cursor, granularity),
            bucket_start: cursor,
            enrollments: 0,
            completions: 0,
            active_students: 0,
            time_spent_secs: 0,
            revenue_cents: 0,
        });
        cursor = advance(cursor, granularity);
    }

    let mut active: Vec<HashSet<Uuid>> = vec![HashSet::new(); points.len()];

    for event in events {
        if event.timestamp < start || event.timestamp > end {
            continue;
        }
        let bucket = truncate(event.timestamp.date_naive(), granularity);
        let Some(&i) = index.get(&bucket) else {
            continue;
        };

        active[i].insert(event.subject_id);
        match &event.kind {
            EventKind::Enrollment { .. } => points[i].enrollments += 1,
            EventKind::LessonComplete { .. } => points[i].completions += 1,
            EventKind::Session { duration_secs, .. } => {
                points[i].time_spent_secs += duration_secs
            }
            EventKind::Payment { amount_cents } => points[i].revenue_cents += amount_cents,
            EventKind::Refund { amount_cents } => points[i].revenue_cents -= amount_cents,
            EventKind::QuizAttempt { .. } | EventKind::Other(_) => {}
        }
    }

    for (i, students) in active.into_iter().enumerate() {
        points[i].active_students = students.len() as u32;
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn session(day: DateTime<Utc>, secs: i64) -> LearningEvent {
        LearningEvent {
            subject_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            timestamp: day,
            kind: EventKind::Session {
                duration_secs: secs,
                lesson_id: None,
            },
        }
    }

    #[test]
    fn thirty_day_range_with_no_events_yields_thirty_zero_points() {
        let end = at(2026, 3, 30, 12);
        let start = end - Duration::days(29);
        let points = bucketize(&[], start, end, Granularity::Daily);

        assert_eq!(points.len(), 30);
        for window in points.windows(2) {
            assert_eq!(
                window[1].bucket_start,
                window[0].bucket_start + Duration::days(1)
            );
        }
        assert!(points.iter().all(|p| {
            p.enrollments == 0
                && p.completions == 0
                && p.active_students == 0
                && p.time_spent_secs == 0
                && p.revenue_cents == 0
        }));
    }

    #[test]
    fn bucketize_is_idempotent() {
        let end = at(2026, 3, 30, 12);
        let start = end - Duration::days(6);
        let events = vec![session(at(2026, 3, 25, 9), 300), session(at(2026, 3, 28, 20), 600)];

        let first = bucketize(&events, start, end, Granularity::Daily);
        let second = bucketize(&events, start, end, Granularity::Daily);
        assert_eq!(first, second);
    }

    #[test]
    fn midnight_event_opens_the_day_it_lands_on() {
        let start = at(2026, 3, 1, 0);
        let end = at(2026, 3, 7, 23);
        let boundary = at(2026, 3, 4, 0);
        let points = bucketize(&[session(boundary, 60)], start, end, Granularity::Daily);

        let march4 = points
            .iter()
            .find(|p| p.bucket_start == NaiveDate::from_ymd_opt(2026, 3, 4).unwrap())
            .unwrap();
        assert_eq!(march4.time_spent_secs, 60);
        let march3 = points
            .iter()
            .find(|p| p.bucket_start == NaiveDate::from_ymd_opt(2026, 3, 3).unwrap())
            .unwrap();
        assert_eq!(march3.time_spent_secs, 0);
    }

    #[test]
    fn monthly_buckets_cross_year_boundaries() {
        let start = at(2025, 11, 20, 0);
        let end = at(2026, 2, 3, 0);
        let points = bucketize(&[], start, end, Granularity::Monthly);

        let labels: Vec<&str> = points.iter().map(|p| p.bucket_label.as_str()).collect();
        assert_eq!(labels, vec!["2025-11", "2025-12", "2026-01", "2026-02"]);
    }

    #[test]
    fn events_outside_the_range_are_ignored() {
        let start = at(2026, 3, 10, 0);
        let end = at(2026, 3, 16, 23);
        let events = vec![
            session(at(2026, 3, 5, 9), 100),
            session(at(2026, 3, 12, 9), 200),
            session(at(2026, 3, 20, 9), 400),
        ];

        let points = bucketize(&events, start, end, Granularity::Daily);
        let total: i64 = points.iter().map(|p| p.time_spent_secs).sum();
        assert_eq!(total, 200);
    }

    #[test]
    fn active_students_are_distinct_per_bucket() {
        let start = at(2026, 3, 1, 0);
        let end = at(2026, 3, 7, 23);
        let student = Uuid::new_v4();
        let day = at(2026, 3, 2, 9);
        let mut one = session(day, 100);
        one.subject_id = student;
        let mut two = session(day, 200);
        two.subject_id = student;

        let points = bucketize(&[one, two], start, end, Granularity::Daily);
        let bucket = points
            .iter()
            .find(|p| p.bucket_start == NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
            .unwrap();
        assert_eq!(bucket.active_students, 1);
        assert_eq!(bucket.time_spent_secs, 300);
    }

    #[test]
    fn refunds_subtract_from_bucket_revenue() {
        let start = at(2026, 3, 1, 0);
        let end = at(2026, 3, 7, 23);
        let mut pay = session(at(2026, 3, 3, 9), 0);
        pay.kind = EventKind::Payment { amount_cents: 5_000 };
        let mut refund = session(at(2026, 3, 3, 15), 0);
        refund.kind = EventKind::Refund { amount_cents: 2_000 };

        let points = bucketize(&[pay, refund], start, end, Granularity::Daily);
        let total: i64 = points.iter().map(|p| p.revenue_cents).sum();
        assert_eq!(total, 3_000);
    }
}
