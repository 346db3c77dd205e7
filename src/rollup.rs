use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    CourseProgress, EnrollmentRecord, EventKind, LearningEvent, LessonCounter, RawCounters,
};

/// Which slice of the event set a rollup covers. `None` means "all".
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope {
    pub subject_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
}

impl Scope {
    pub fn all() -> Self {
        Scope::default()
    }

    pub fn student(id: Uuid) -> Self {
        Scope {
            subject_id: Some(id),
            course_id: None,
        }
    }

    pub fn course(id: Uuid) -> Self {
        Scope {
            subject_id: None,
            course_id: Some(id),
        }
    }

    pub fn with_course(mut self, course_id: Option<Uuid>) -> Self {
        self.course_id = course_id;
        self
    }

    pub fn matches(&self, event: &LearningEvent) -> bool {
        self.subject_id.map_or(true, |id| event.subject_id == id)
            && self.course_id.map_or(true, |id| event.course_id == id)
    }
}

/// Per-(student, course) accumulator. Everything in here is a monotonic
/// reduction (sums, maxes, set unions), so the fold result does not depend
/// on event order.
#[derive(Debug, Default)]
struct PairAcc {
    declared_total: u32,
    enroll_count: u32,
    first_enrollment: Option<DateTime<Utc>>,
    completed_lessons: HashSet<String>,
    quiz_attempts: u32,
    quizzes_passed: u32,
    quiz_score_sum: f64,
    time_spent_secs: i64,
    last_access: Option<DateTime<Utc>>,
}

impl PairAcc {
    /// Declared lesson totals can be stale; never report fewer total lessons
    /// than were actually completed.
    fn effective_total(&self) -> u32 {
        self.declared_total.max(self.completed_lessons.len() as u32)
    }

    fn is_completed(&self) -> bool {
        self.declared_total > 0 && self.completed_lessons.len() as u32 >= self.declared_total
    }

    fn average_quiz_score(&self) -> f64 {
        if self.quiz_attempts == 0 {
            0.0
        } else {
            self.quiz_score_sum / self.quiz_attempts as f64
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    pairs: HashMap<(Uuid, Uuid), PairAcc>,
    revenue_cents: i64,
    refund_cents: i64,
    lesson_starts: HashMap<String, HashSet<Uuid>>,
    lesson_finishes: HashMap<String, HashSet<Uuid>>,
}

fn max_ts(current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(match current {
        Some(existing) => existing.max(candidate),
        None => candidate,
    })
}

fn min_ts(current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(match current {
        Some(existing) => existing.min(candidate),
        None => candidate,
    })
}

impl Accumulator {
    fn fold(&mut self, event: &LearningEvent) {
        let pair = self
            .pairs
            .entry((event.subject_id, event.course_id))
            .or_default();

        match &event.kind {
            EventKind::Enrollment { total_lessons } => {
                pair.enroll_count += 1;
                pair.declared_total = pair.declared_total.max(*total_lessons);
                pair.first_enrollment = min_ts(pair.first_enrollment, event.timestamp);
                pair.last_access = max_ts(pair.last_access, event.timestamp);
            }
            EventKind::LessonComplete { lesson_id } => {
                pair.completed_lessons.insert(lesson_id.clone());
                pair.last_access = max_ts(pair.last_access, event.timestamp);
                self.lesson_finishes
                    .entry(lesson_id.clone())
                    .or_default()
                    .insert(event.subject_id);
            }
            EventKind::QuizAttempt { score, passed } => {
                pair.quiz_attempts += 1;
                pair.quiz_score_sum += score;
                if *passed {
                    pair.quizzes_passed += 1;
                }
                pair.last_access = max_ts(pair.last_access, event.timestamp);
            }
            EventKind::Session {
                duration_secs,
                lesson_id,
            } => {
                pair.time_spent_secs += duration_secs;
                pair.last_access = max_ts(pair.last_access, event.timestamp);
                if let Some(lesson) = lesson_id {
                    self.lesson_starts
                        .entry(lesson.clone())
                        .or_default()
                        .insert(event.subject_id);
                }
            }
            EventKind::Payment { amount_cents } => {
                self.revenue_cents += amount_cents;
            }
            EventKind::Refund { amount_cents } => {
                self.refund_cents += amount_cents;
            }
            // Unknown kinds carry no counters; they are kept upstream only so
            // normalization does not reject them.
            EventKind::Other(_) => {}
        }
    }

    fn finish(self) -> RawCounters {
        let mut counters = RawCounters {
            revenue_cents: self.revenue_cents,
            refund_cents: self.refund_cents,
            ..RawCounters::default()
        };

        for pair in self.pairs.values() {
            // A pair can show activity without an enrollment event inside the
            // window; it still contributes progress, just not an enrollment.
            counters.enrollments += pair.enroll_count.min(1);
            if pair.is_completed() {
                counters.completions += 1;
            }
            counters.lessons_completed += pair.completed_lessons.len() as u32;
            counters.total_lessons += pair.effective_total();
            counters.quiz_attempts += pair.quiz_attempts;
            counters.quizzes_passed += pair.quizzes_passed;
            counters.quiz_score_sum += pair.quiz_score_sum;
            counters.time_spent_secs += pair.time_spent_secs;
            if let Some(ts) = pair.last_access {
                counters.last_access = max_ts(counters.last_access, ts);
            }
        }

        for (lesson_id, started) in self.lesson_starts {
            let completed = self
                .lesson_finishes
                .get(&lesson_id)
                .map(|set| set.len() as u32)
                .unwrap_or(0);
            counters.lessons.insert(
                lesson_id,
                LessonCounter {
                    started: started.len() as u32,
                    completed,
                },
            );
        }

        counters
    }
}

/// Fold the events matching `scope` into summary counters. Order-independent:
/// shuffling the input produces identical counters.
pub fn rollup(events: &[LearningEvent], scope: &Scope) -> RawCounters {
    let mut acc = Accumulator::default();
    for event in events.iter().filter(|e| scope.matches(e)) {
        acc.fold(event);
    }
    acc.finish()
}

/// One `RawCounters` per student with any matching activity.
pub fn per_student(events: &[LearningEvent], scope: &Scope) -> HashMap<Uuid, RawCounters> {
    let mut groups: HashMap<Uuid, Accumulator> = HashMap::new();
    for event in events.iter().filter(|e| scope.matches(e)) {
        groups.entry(event.subject_id).or_default().fold(event);
    }
    groups.into_iter().map(|(id, acc)| (id, acc.finish())).collect()
}

/// One `RawCounters` per course with any matching activity.
pub fn per_course(events: &[LearningEvent], scope: &Scope) -> HashMap<Uuid, RawCounters> {
    let mut groups: HashMap<Uuid, Accumulator> = HashMap::new();
    for event in events.iter().filter(|e| scope.matches(e)) {
        groups.entry(event.course_id).or_default().fold(event);
    }
    groups.into_iter().map(|(id, acc)| (id, acc.finish())).collect()
}

/// Distinct students with any matching activity in the window.
pub fn active_students(events: &[LearningEvent], scope: &Scope) -> u32 {
    events
        .iter()
        .filter(|e| scope.matches(e))
        .map(|e| e.subject_id)
        .collect::<HashSet<_>>()
        .len() as u32
}

/// Recompute per-course progress summaries for one student, sorted by course
/// id for stable output.
pub fn course_progress(events: &[LearningEvent], student_id: Uuid) -> Vec<CourseProgress> {
    let mut acc = Accumulator::default();
    for event in events.iter().filter(|e| e.subject_id == student_id) {
        acc.fold(event);
    }

    let mut progress: Vec<CourseProgress> = acc
        .pairs
        .into_iter()
        .map(|((_, course_id), pair)| CourseProgress {
            student_id,
            course_id,
            lessons_completed: pair.completed_lessons.len() as u32,
            total_lessons: pair.effective_total(),
            quizzes_attempted: pair.quiz_attempts,
            quizzes_passed: pair.quizzes_passed.min(pair.quiz_attempts),
            average_quiz_score: pair.average_quiz_score(),
            total_time_spent_secs: pair.time_spent_secs,
            last_access_date: pair.last_access,
        })
        .collect();
    progress.sort_by_key(|p| p.course_id);
    progress
}

/// Reconstruct enrollment records for the matching scope, newest first.
pub fn enrollment_records(events: &[LearningEvent], scope: &Scope) -> Vec<EnrollmentRecord> {
    let mut acc = Accumulator::default();
    for event in events.iter().filter(|e| scope.matches(e)) {
        acc.fold(event);
    }

    let mut records: Vec<EnrollmentRecord> = acc
        .pairs
        .into_iter()
        .filter_map(|((student_id, course_id), pair)| {
            let enrolled_at = pair.first_enrollment?;
            let completed = pair.is_completed();
            Some(EnrollmentRecord {
                student_id,
                course_id,
                enrollment_date: enrolled_at,
                is_completed: completed,
                certificate_issued: completed,
            })
        })
        .collect();
    records.sort_by(|a, b| b.enrollment_date.cmp(&a.enrollment_date));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 10, 0, 0).unwrap()
    }

    fn event(subject: Uuid, course: Uuid, day: u32, kind: EventKind) -> LearningEvent {
        LearningEvent {
            subject_id: subject,
            course_id: course,
            timestamp: ts(day),
            kind,
        }
    }

    fn course_fixture(student: Uuid, course: Uuid) -> Vec<LearningEvent> {
        vec![
            event(student, course, 1, EventKind::Enrollment { total_lessons: 2 }),
            event(
                student,
                course,
                2,
                EventKind::LessonComplete {
                    lesson_id: "l1".into(),
                },
            ),
            event(
                student,
                course,
                3,
                EventKind::LessonComplete {
                    lesson_id: "l2".into(),
                },
            ),
            event(
                student,
                course,
                3,
                EventKind::QuizAttempt {
                    score: 80.0,
                    passed: true,
                },
            ),
            event(
                student,
                course,
                4,
                EventKind::Session {
                    duration_secs: 600,
                    lesson_id: Some("l1".into()),
                },
            ),
            event(student, course, 4, EventKind::Payment { amount_cents: 4_900 }),
        ]
    }

    #[test]
    fn folds_basic_counters() {
        let student = Uuid::new_v4();
        let course = Uuid::new_v4();
        let counters = rollup(&course_fixture(student, course), &Scope::all());

        assert_eq!(counters.enrollments, 1);
        assert_eq!(counters.completions, 1);
        assert_eq!(counters.lessons_completed, 2);
        assert_eq!(counters.total_lessons, 2);
        assert_eq!(counters.quiz_attempts, 1);
        assert_eq!(counters.quizzes_passed, 1);
        assert_eq!(counters.time_spent_secs, 600);
        assert_eq!(counters.revenue_cents, 4_900);
        assert_eq!(counters.last_access, Some(ts(4)));
    }

    #[test]
    fn fold_is_order_independent() {
        let student = Uuid::new_v4();
        let course = Uuid::new_v4();
        let mut events = course_fixture(student, course);

        let forward = rollup(&events, &Scope::all());
        events.reverse();
        let backward = rollup(&events, &Scope::all());
        events.swap(0, 3);
        events.swap(1, 4);
        let shuffled = rollup(&events, &Scope::all());

        assert_eq!(forward, backward);
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn progress_invariants_hold_with_stale_totals() {
        let student = Uuid::new_v4();
        let course = Uuid::new_v4();
        // Declared total is 1 but two distinct lessons complete.
        let events = vec![
            event(student, course, 1, EventKind::Enrollment { total_lessons: 1 }),
            event(
                student,
                course,
                2,
                EventKind::LessonComplete {
                    lesson_id: "l1".into(),
                },
            ),
            event(
                student,
                course,
                3,
                EventKind::LessonComplete {
                    lesson_id: "l2".into(),
                },
            ),
        ];

        let progress = course_progress(&events, student);
        assert_eq!(progress.len(), 1);
        assert!(progress[0].lessons_completed <= progress[0].total_lessons);
        assert!(progress[0].quizzes_passed <= progress[0].quizzes_attempted);
    }

    #[test]
    fn repeated_lesson_completions_count_once() {
        let student = Uuid::new_v4();
        let course = Uuid::new_v4();
        let events = vec![
            event(student, course, 1, EventKind::Enrollment { total_lessons: 3 }),
            event(
                student,
                course,
                2,
                EventKind::LessonComplete {
                    lesson_id: "l1".into(),
                },
            ),
            event(
                student,
                course,
                5,
                EventKind::LessonComplete {
                    lesson_id: "l1".into(),
                },
            ),
        ];

        let counters = rollup(&events, &Scope::all());
        assert_eq!(counters.lessons_completed, 1);
        assert_eq!(counters.completions, 0);
    }

    #[test]
    fn zero_events_yield_default_counters_and_sentinel_ratios() {
        let counters = rollup(&[], &Scope::all());
        assert_eq!(counters, RawCounters::default());
        assert_eq!(counters.completion_rate(), 0.0);
        assert_eq!(counters.average_quiz_score(), 0.0);
        assert_eq!(counters.average_progress(), 0.0);
        assert!(counters.worst_dropout().is_none());
    }

    #[test]
    fn scope_filters_by_student_and_course() {
        let (s1, s2) = (Uuid::new_v4(), Uuid::new_v4());
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());
        let mut events = course_fixture(s1, c1);
        events.extend(course_fixture(s2, c2));

        let all = rollup(&events, &Scope::all());
        assert_eq!(all.enrollments, 2);

        let only_s1 = rollup(&events, &Scope::student(s1));
        assert_eq!(only_s1.enrollments, 1);
        assert_eq!(only_s1.revenue_cents, 4_900);

        let only_c2 = rollup(&events, &Scope::course(c2));
        assert_eq!(only_c2.enrollments, 1);
    }

    #[test]
    fn dropout_counts_distinct_students_per_lesson() {
        let (s1, s2, s3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let course = Uuid::new_v4();
        let mut events = vec![];
        // Three students open lesson l1, one finishes it.
        for s in [s1, s2, s3] {
            events.push(event(
                s,
                course,
                1,
                EventKind::Session {
                    duration_secs: 300,
                    lesson_id: Some("l1".into()),
                },
            ));
        }
        events.push(event(
            s1,
            course,
            2,
            EventKind::LessonComplete {
                lesson_id: "l1".into(),
            },
        ));

        let counters = rollup(&events, &Scope::all());
        let (lesson, rate) = counters.worst_dropout().unwrap();
        assert_eq!(lesson, "l1");
        assert!((rate - 66.666).abs() < 0.01);
    }

    #[test]
    fn per_student_groups_match_individual_rollups() {
        let (s1, s2) = (Uuid::new_v4(), Uuid::new_v4());
        let course = Uuid::new_v4();
        let mut events = course_fixture(s1, course);
        events.extend(course_fixture(s2, course));

        let grouped = per_student(&events, &Scope::all());
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&s1], rollup(&events, &Scope::student(s1)));
        assert_eq!(grouped[&s2], rollup(&events, &Scope::student(s2)));
    }

    #[test]
    fn enrollment_records_use_earliest_enrollment_and_completion_state() {
        let student = Uuid::new_v4();
        let course = Uuid::new_v4();
        let mut events = course_fixture(student, course);
        // A duplicate later enrollment event must not move the date forward.
        events.push(event(student, course, 9, EventKind::Enrollment { total_lessons: 2 }));

        let records = enrollment_records(&events, &Scope::all());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].enrollment_date, ts(1));
        assert!(records[0].is_completed);
        assert!(records[0].certificate_issued);
    }

    #[test]
    fn last_access_is_max_timestamp_not_last_seen() {
        let student = Uuid::new_v4();
        let course = Uuid::new_v4();
        let events = vec![
            event(
                student,
                course,
                8,
                EventKind::Session {
                    duration_secs: 100,
                    lesson_id: None,
                },
            ),
            // Older event arrives after the newer one.
            event(
                student,
                course,
                2,
                EventKind::Session {
                    duration_secs: 100,
                    lesson_id: None,
                },
            ),
        ];

        let counters = rollup(&events, &Scope::all());
        assert_eq!(counters.last_access, Some(ts(8)));
    }
}
