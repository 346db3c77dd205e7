use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Canonical activity event, produced by the normalizer. Kind and payload are
/// one enum: a kind never travels without the fields that belong to it.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningEvent {
    pub subject_id: Uuid,
    pub course_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Enrollment { total_lessons: u32 },
    LessonComplete { lesson_id: String },
    QuizAttempt { score: f64, passed: bool },
    Session { duration_secs: i64, lesson_id: Option<String> },
    Payment { amount_cents: i64 },
    Refund { amount_cents: i64 },
    /// Unknown kinds are preserved verbatim so rules can ignore them
    /// instead of failing the whole rollup.
    Other(String),
}

/// Raw row shape read from the activity store. Columns are nullable because
/// the store accepts heterogeneous record types; the normalizer decides what
/// is required for each.
#[derive(Debug, Clone)]
pub struct RawActivityRecord {
    pub record_type: String,
    pub student_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub lesson_id: Option<String>,
    pub total_lessons: Option<i32>,
    pub score: Option<f64>,
    pub passed: Option<bool>,
    pub duration_secs: Option<i64>,
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub enrollment_date: DateTime<Utc>,
    pub is_completed: bool,
    pub certificate_issued: bool,
}

/// Per-(student, course) progress summary, recomputed from events on each
/// query. `lessons_completed <= total_lessons` and
/// `quizzes_passed <= quizzes_attempted` always hold.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub lessons_completed: u32,
    pub total_lessons: u32,
    pub quizzes_attempted: u32,
    pub quizzes_passed: u32,
    pub average_quiz_score: f64,
    pub total_time_spent_secs: i64,
    pub last_access_date: Option<DateTime<Utc>>,
}

/// Per-lesson started/completed tallies, kept for dropout detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LessonCounter {
    pub started: u32,
    pub completed: u32,
}

impl LessonCounter {
    /// Fraction of starts that never completed, as a percentage.
    pub fn dropout_rate(&self) -> f64 {
        if self.started == 0 {
            return 0.0;
        }
        let finished = self.completed.min(self.started);
        (self.started - finished) as f64 / self.started as f64 * 100.0
    }
}

/// Rollup output: summary counters for one scope. Ratios are derived through
/// the accessor methods, which guard every denominator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCounters {
    pub enrollments: u32,
    pub completions: u32,
    pub lessons_completed: u32,
    pub total_lessons: u32,
    pub quiz_attempts: u32,
    pub quizzes_passed: u32,
    pub quiz_score_sum: f64,
    pub time_spent_secs: i64,
    pub revenue_cents: i64,
    pub refund_cents: i64,
    pub last_access: Option<DateTime<Utc>>,
    pub lessons: HashMap<String, LessonCounter>,
}

impl RawCounters {
    /// Completed / enrolled as a percentage; 0.0 when nothing is enrolled.
    pub fn completion_rate(&self) -> f64 {
        if self.enrollments == 0 {
            return 0.0;
        }
        self.completions as f64 / self.enrollments as f64 * 100.0
    }

    /// Mean quiz score across attempts; 0.0 with no attempts.
    pub fn average_quiz_score(&self) -> f64 {
        if self.quiz_attempts == 0 {
            return 0.0;
        }
        self.quiz_score_sum / self.quiz_attempts as f64
    }

    /// Lessons completed over lessons available as a percentage.
    pub fn average_progress(&self) -> f64 {
        if self.total_lessons == 0 {
            return 0.0;
        }
        self.lessons_completed.min(self.total_lessons) as f64 / self.total_lessons as f64 * 100.0
    }

    /// Worst per-lesson dropout rate, with the lesson that produced it.
    pub fn worst_dropout(&self) -> Option<(String, f64)> {
        self.lessons
            .iter()
            .map(|(id, counter)| (id.clone(), counter.dropout_rate()))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn net_revenue_cents(&self) -> i64 {
        self.revenue_cents - self.refund_cents
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementLevel {
    High,
    Medium,
    Low,
}

/// Why a student was flagged as struggling. Kept alongside the flag so
/// instructors see the trigger, not just a boolean.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "trigger")]
pub enum StrugglingReason {
    LowQuizScore { average_score: f64 },
    LessonDropout { lesson_id: String, dropout_rate: f64 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub rule: String,
    pub message: String,
}

/// One time bucket in a trend series. Series are contiguous and zero-filled;
/// a bucket with no events still appears.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub bucket_label: String,
    pub bucket_start: NaiveDate,
    pub enrollments: u32,
    pub completions: u32,
    pub active_students: u32,
    pub time_spent_secs: i64,
    pub revenue_cents: i64,
}

/// Bucket widths the supported time ranges map onto: daily for the day-count
/// windows, monthly for the one-year window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Daily,
    Monthly,
}

/// Requested dashboard window. Parsing is strict: unknown strings are an
/// error, never a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeRange {
    #[serde(rename = "7days")]
    Last7Days,
    #[serde(rename = "30days")]
    Last30Days,
    #[serde(rename = "90days")]
    Last90Days,
    #[serde(rename = "1year")]
    LastYear,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Last7Days => "7days",
            TimeRange::Last30Days => "30days",
            TimeRange::Last90Days => "90days",
            TimeRange::LastYear => "1year",
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            TimeRange::Last7Days => 7,
            TimeRange::Last30Days => 30,
            TimeRange::Last90Days => 90,
            TimeRange::LastYear => 365,
        }
    }

    /// The façade chooses granularity from the range; the bucketing service
    /// never infers it.
    pub fn granularity(&self) -> Granularity {
        match self {
            TimeRange::Last7Days | TimeRange::Last30Days | TimeRange::Last90Days => {
                Granularity::Daily
            }
            TimeRange::LastYear => Granularity::Monthly,
        }
    }

    pub fn start_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(self.days() - 1)
    }
}

impl FromStr for TimeRange {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "7days" => Ok(TimeRange::Last7Days),
            "30days" => Ok(TimeRange::Last30Days),
            "90days" => Ok(TimeRange::Last90Days),
            "1year" => Ok(TimeRange::LastYear),
            other => Err(crate::error::EngineError::InvalidRange {
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Student,
    Instructor,
    Course,
    Admin,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Student => "student",
            SubjectKind::Instructor => "instructor",
            SubjectKind::Course => "course",
            SubjectKind::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrugglingStudent {
    pub student_id: Uuid,
    pub reason: StrugglingReason,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDropout {
    pub lesson_id: String,
    pub started: u32,
    pub completed: u32,
    pub dropout_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub subject_id: Uuid,
    pub metric: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentMetrics {
    pub student_id: Uuid,
    pub range: TimeRange,
    pub total_courses: u32,
    pub completed_courses: u32,
    pub completion_rate: f64,
    pub average_progress: f64,
    pub average_quiz_score: f64,
    pub total_time_spent_secs: i64,
    pub last_access_date: Option<DateTime<Utc>>,
    pub engagement_level: EngagementLevel,
    pub struggling: Option<StrugglingReason>,
    pub inactive: bool,
    pub courses: Vec<CourseProgress>,
    pub trend: Vec<TrendPoint>,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructorMetrics {
    pub instructor_id: Uuid,
    pub range: TimeRange,
    pub total_courses: u32,
    pub total_enrollments: u32,
    pub total_completions: u32,
    pub completion_rate: f64,
    pub average_quiz_score: f64,
    pub revenue_cents: i64,
    pub refunded_cents: i64,
    pub net_revenue_cents: i64,
    pub struggling_students: Vec<StrugglingStudent>,
    pub trend: Vec<TrendPoint>,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAnalytics {
    pub course_id: Uuid,
    pub range: TimeRange,
    pub enrollments: u32,
    pub completions: u32,
    pub completion_rate: f64,
    pub active_students: u32,
    pub average_quiz_score: f64,
    pub total_time_spent_secs: i64,
    pub revenue_cents: i64,
    pub lesson_dropout: Vec<LessonDropout>,
    pub recent_enrollments: Vec<EnrollmentRecord>,
    pub trend: Vec<TrendPoint>,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDashboardData {
    pub range: TimeRange,
    pub total_students: u32,
    pub total_enrollments: u32,
    pub total_completions: u32,
    pub completion_rate: f64,
    pub revenue_cents: i64,
    pub refunded_cents: i64,
    pub net_revenue_cents: i64,
    pub active_students: u32,
    pub top_students: Vec<LeaderboardEntry>,
    pub top_courses: Vec<LeaderboardEntry>,
    pub trend: Vec<TrendPoint>,
    pub insights: Vec<Insight>,
}

/// Dashboard-facing response, one variant per subject kind. The façade is the
/// only place that constructs these; field names are part of the wire
/// contract the dashboards bind to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "subjectKind", rename_all = "lowercase")]
pub enum AggregateView {
    Student(StudentMetrics),
    Instructor(InstructorMetrics),
    Course(CourseAnalytics),
    Admin(AdminDashboardData),
}
