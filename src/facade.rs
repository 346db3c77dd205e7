use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::classify;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::models::{
    AdminDashboardData, AggregateView, CourseAnalytics, InstructorMetrics, LeaderboardEntry,
    LearningEvent, LessonDropout, RawActivityRecord, StrugglingStudent, StudentMetrics,
    SubjectKind, TimeRange,
};
use crate::normalize;
use crate::rollup::{self, Scope};
use crate::trend;

/// Read-only boundary to the external activity store. The engine never
/// writes through this; the one suspension point per query lives behind it.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn fetch_activity(
        &self,
        scope: Scope,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawActivityRecord>>;

    async fn subject_exists(&self, kind: SubjectKind, id: Uuid) -> Result<bool>;

    /// Courses taught by the given instructor.
    async fn instructor_courses(&self, instructor_id: Uuid) -> Result<Vec<Uuid>>;

    /// Registered students overall, for the admin dashboard header.
    async fn count_students(&self) -> Result<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

/// Already-authenticated identity handed in by the identity provider.
/// The façade only scopes queries with it; it does not authenticate.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub role: Role,
    pub id: Uuid,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsRequest {
    pub kind: SubjectKind,
    pub subject_id: Option<Uuid>,
    pub range: TimeRange,
    pub course_id: Option<Uuid>,
}

/// Non-admin callers always see their own data, whatever id they ask for.
fn resolve_subject(caller: &Caller, requested: Option<Uuid>, own_role: Role) -> Result<Uuid> {
    match caller.role {
        Role::Admin => requested.ok_or_else(|| EngineError::NotFound {
            subject: "no subject id supplied".to_string(),
        }),
        role if role == own_role => Ok(caller.id),
        _ => Err(EngineError::NotFound {
            subject: "subject not visible to this caller".to_string(),
        }),
    }
}

async fn with_deadline<T, F>(timeout_secs: u64, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(Duration::from_secs(timeout_secs), fut)
        .await
        .map_err(|_| EngineError::UpstreamTimeout { timeout_secs })?
}

async fn ensure_exists<S: EventStore>(
    store: &S,
    timeout_secs: u64,
    kind: SubjectKind,
    id: Uuid,
) -> Result<()> {
    let exists = with_deadline(timeout_secs, store.subject_exists(kind, id)).await?;
    if exists {
        Ok(())
    } else {
        Err(EngineError::NotFound {
            subject: format!("{} {}", kind.as_str(), id),
        })
    }
}

/// Build the aggregate view for one dashboard query.
///
/// Orchestration is fixed: validate, read the store once under a deadline,
/// then run the pure pipeline (normalize, roll up, bucketize, classify) and
/// assemble the shape for the requested subject kind. Identical inputs over
/// an identical event set produce an identical, freshly built view.
pub async fn get_metrics<S: EventStore>(
    store: &S,
    caller: &Caller,
    request: &MetricsRequest,
    now: DateTime<Utc>,
    cfg: &EngineConfig,
) -> Result<AggregateView> {
    let timeout_secs = cfg.store.fetch_timeout_secs;
    let start = request.range.start_from(now);

    match request.kind {
        SubjectKind::Student => {
            let student_id = resolve_subject(caller, request.subject_id, Role::Student)?;
            ensure_exists(store, timeout_secs, SubjectKind::Student, student_id).await?;

            let scope = Scope::student(student_id).with_course(request.course_id);
            let raw = with_deadline(timeout_secs, store.fetch_activity(scope, start)).await?;
            let (events, _skipped) = normalize::normalize_all(&raw);
            let scoped: Vec<LearningEvent> =
                events.into_iter().filter(|e| scope.matches(e)).collect();

            Ok(AggregateView::Student(student_metrics(
                student_id, &scoped, request, start, now, cfg,
            )))
        }
        SubjectKind::Instructor => {
            let instructor_id = resolve_subject(caller, request.subject_id, Role::Instructor)?;
            ensure_exists(store, timeout_secs, SubjectKind::Instructor, instructor_id).await?;

            let (course_ids, raw) = with_deadline(timeout_secs, async {
                let courses = store.instructor_courses(instructor_id).await?;
                let raw = store
                    .fetch_activity(Scope::all().with_course(request.course_id), start)
                    .await?;
                Ok((courses, raw))
            })
            .await?;

            let taught: HashSet<Uuid> = course_ids.iter().copied().collect();
            if let Some(course) = request.course_id {
                if !taught.contains(&course) {
                    return Err(EngineError::NotFound {
                        subject: format!("course {course} for instructor {instructor_id}"),
                    });
                }
            }

            let (events, _skipped) = normalize::normalize_all(&raw);
            let scoped: Vec<LearningEvent> = events
                .into_iter()
                .filter(|e| taught.contains(&e.course_id))
                .collect();
            let course_count = match request.course_id {
                Some(_) => 1,
                None => taught.len() as u32,
            };

            Ok(AggregateView::Instructor(instructor_metrics(
                instructor_id,
                course_count,
                &scoped,
                request,
                start,
                now,
                cfg,
            )))
        }
        SubjectKind::Course => {
            let course_id = request
                .subject_id
                .or(request.course_id)
                .ok_or_else(|| EngineError::NotFound {
                    subject: "no course id supplied".to_string(),
                })?;

            match caller.role {
                Role::Admin => {}
                Role::Instructor => {
                    let taught =
                        with_deadline(timeout_secs, store.instructor_courses(caller.id)).await?;
                    if !taught.contains(&course_id) {
                        return Err(EngineError::NotFound {
                            subject: format!("course {course_id} for instructor {}", caller.id),
                        });
                    }
                }
                Role::Student => {
                    return Err(EngineError::NotFound {
                        subject: "subject not visible to this caller".to_string(),
                    })
                }
            }
            ensure_exists(store, timeout_secs, SubjectKind::Course, course_id).await?;

            let scope = Scope::course(course_id);
            let raw = with_deadline(timeout_secs, store.fetch_activity(scope, start)).await?;
            let (events, _skipped) = normalize::normalize_all(&raw);
            let scoped: Vec<LearningEvent> =
                events.into_iter().filter(|e| scope.matches(e)).collect();

            Ok(AggregateView::Course(course_analytics(
                course_id, &scoped, request, start, now, cfg,
            )))
        }
        SubjectKind::Admin => {
            if caller.role != Role::Admin {
                return Err(EngineError::NotFound {
                    subject: "admin dashboard".to_string(),
                });
            }

            let scope = Scope::all().with_course(request.course_id);
            let (total_students, raw) = with_deadline(timeout_secs, async {
                let count = store.count_students().await?;
                let raw = store.fetch_activity(scope, start).await?;
                Ok((count, raw))
            })
            .await?;

            let (events, _skipped) = normalize::normalize_all(&raw);
            let scoped: Vec<LearningEvent> =
                events.into_iter().filter(|e| scope.matches(e)).collect();

            Ok(AggregateView::Admin(admin_dashboard(
                total_students as u32,
                &scoped,
                request,
                start,
                now,
                cfg,
            )))
        }
    }
}

fn student_metrics(
    student_id: Uuid,
    events: &[LearningEvent],
    request: &MetricsRequest,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    cfg: &EngineConfig,
) -> StudentMetrics {
    let counters = rollup::rollup(events, &Scope::all());
    let rules = &cfg.thresholds;

    StudentMetrics {
        student_id,
        range: request.range,
        total_courses: counters.enrollments,
        completed_courses: counters.completions,
        completion_rate: counters.completion_rate(),
        average_progress: counters.average_progress(),
        average_quiz_score: counters.average_quiz_score(),
        total_time_spent_secs: counters.time_spent_secs,
        last_access_date: counters.last_access,
        engagement_level: classify::engagement_level(&counters, now, rules),
        struggling: classify::struggling(&counters, rules),
        inactive: classify::inactive(&counters, now, rules),
        courses: rollup::course_progress(events, student_id),
        trend: trend::bucketize(events, start, now, request.range.granularity()),
        insights: classify::insights(&counters, now, rules),
    }
}

fn instructor_metrics(
    instructor_id: Uuid,
    total_courses: u32,
    events: &[LearningEvent],
    request: &MetricsRequest,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    cfg: &EngineConfig,
) -> InstructorMetrics {
    let counters = rollup::rollup(events, &Scope::all());
    let rules = &cfg.thresholds;

    let mut struggling_students: Vec<StrugglingStudent> =
        rollup::per_student(events, &Scope::all())
            .into_iter()
            .filter_map(|(student_id, student_counters)| {
                classify::struggling(&student_counters, rules)
                    .map(|reason| StrugglingStudent { student_id, reason })
            })
            .collect();
    struggling_students.sort_by_key(|s| s.student_id);

    InstructorMetrics {
        instructor_id,
        range: request.range,
        total_courses,
        total_enrollments: counters.enrollments,
        total_completions: counters.completions,
        completion_rate: counters.completion_rate(),
        average_quiz_score: counters.average_quiz_score(),
        revenue_cents: counters.revenue_cents,
        refunded_cents: counters.refund_cents,
        net_revenue_cents: counters.net_revenue_cents(),
        struggling_students,
        trend: trend::bucketize(events, start, now, request.range.granularity()),
        insights: classify::insights(&counters, now, rules),
    }
}

fn course_analytics(
    course_id: Uuid,
    events: &[LearningEvent],
    request: &MetricsRequest,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    cfg: &EngineConfig,
) -> CourseAnalytics {
    let counters = rollup::rollup(events, &Scope::all());
    let rules = &cfg.thresholds;

    let mut lesson_dropout: Vec<LessonDropout> = counters
        .lessons
        .iter()
        .map(|(lesson_id, counter)| LessonDropout {
            lesson_id: lesson_id.clone(),
            started: counter.started,
            completed: counter.completed,
            dropout_rate: counter.dropout_rate(),
        })
        .collect();
    lesson_dropout.sort_by(|a, b| {
        b.dropout_rate
            .partial_cmp(&a.dropout_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.lesson_id.cmp(&b.lesson_id))
    });

    let mut recent_enrollments = rollup::enrollment_records(events, &Scope::all());
    recent_enrollments.truncate(10);

    CourseAnalytics {
        course_id,
        range: request.range,
        enrollments: counters.enrollments,
        completions: counters.completions,
        completion_rate: counters.completion_rate(),
        active_students: rollup::active_students(events, &Scope::all()),
        average_quiz_score: counters.average_quiz_score(),
        total_time_spent_secs: counters.time_spent_secs,
        revenue_cents: counters.revenue_cents,
        lesson_dropout,
        recent_enrollments,
        trend: trend::bucketize(events, start, now, request.range.granularity()),
        insights: classify::insights(&counters, now, rules),
    }
}

const LEADERBOARD_SIZE: usize = 5;

fn admin_dashboard(
    total_students: u32,
    events: &[LearningEvent],
    request: &MetricsRequest,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    cfg: &EngineConfig,
) -> AdminDashboardData {
    let counters = rollup::rollup(events, &Scope::all());
    let rules = &cfg.thresholds;

    let mut top_students: Vec<LeaderboardEntry> = rollup::per_student(events, &Scope::all())
        .into_iter()
        .map(|(id, c)| LeaderboardEntry {
            subject_id: id,
            metric: "completions".to_string(),
            value: c.completions as f64 + c.average_progress() / 100.0,
        })
        .collect();
    top_students.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.subject_id.cmp(&b.subject_id))
    });
    top_students.truncate(LEADERBOARD_SIZE);

    let mut top_courses: Vec<LeaderboardEntry> = rollup::per_course(events, &Scope::all())
        .into_iter()
        .map(|(id, c)| LeaderboardEntry {
            subject_id: id,
            metric: "enrollments".to_string(),
            value: c.enrollments as f64,
        })
        .collect();
    top_courses.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.subject_id.cmp(&b.subject_id))
    });
    top_courses.truncate(LEADERBOARD_SIZE);

    AdminDashboardData {
        range: request.range,
        total_students,
        total_enrollments: counters.enrollments,
        total_completions: counters.completions,
        completion_rate: counters.completion_rate(),
        revenue_cents: counters.revenue_cents,
        refunded_cents: counters.refund_cents,
        net_revenue_cents: counters.net_revenue_cents(),
        active_students: rollup::active_students(events, &Scope::all()),
        top_students,
        top_courses,
        trend: trend::bucketize(events, start, now, request.range.granularity()),
        insights: classify::insights(&counters, now, rules),
    }
}
