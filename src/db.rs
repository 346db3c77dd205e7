use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::facade::EventStore;
use crate::models::{RawActivityRecord, SubjectKind};
use crate::rollup::Scope;

/// Postgres-backed activity store. The engine only ever reads through the
/// `EventStore` trait; the write paths below (seed, import) exist for
/// operating the store itself.
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        PgEventStore { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn fetch_activity(
        &self,
        scope: Scope,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawActivityRecord>> {
        // Rows with a NULL timestamp are returned on purpose; the normalizer
        // owns the malformed-record decision, not the query.
        let mut query = String::from(
            "SELECT record_type, student_id, course_id, occurred_at, lesson_id, \
             total_lessons, score, passed, duration_secs, amount_cents \
             FROM learnmetrics.activity \
             WHERE (occurred_at >= $1 OR occurred_at IS NULL)",
        );

        let mut next_param = 2;
        if scope.subject_id.is_some() {
            query.push_str(&format!(" AND student_id = ${next_param}"));
            next_param += 1;
        }
        if scope.course_id.is_some() {
            query.push_str(&format!(" AND course_id = ${next_param}"));
        }

        let mut rows = sqlx::query(&query).bind(since);
        if let Some(student) = scope.subject_id {
            rows = rows.bind(student);
        }
        if let Some(course) = scope.course_id {
            rows = rows.bind(course);
        }

        let fetched = rows.fetch_all(&self.pool).await?;
        let mut records = Vec::with_capacity(fetched.len());
        for row in fetched {
            records.push(RawActivityRecord {
                record_type: row.get("record_type"),
                student_id: row.get("student_id"),
                course_id: row.get("course_id"),
                occurred_at: row.get("occurred_at"),
                lesson_id: row.get("lesson_id"),
                total_lessons: row.get("total_lessons"),
                score: row.get("score"),
                passed: row.get("passed"),
                duration_secs: row.get("duration_secs"),
                amount_cents: row.get("amount_cents"),
            });
        }

        Ok(records)
    }

    async fn subject_exists(&self, kind: SubjectKind, id: Uuid) -> Result<bool> {
        let query = match kind {
            SubjectKind::Student => {
                "SELECT EXISTS(SELECT 1 FROM learnmetrics.students WHERE id = $1)"
            }
            SubjectKind::Instructor => {
                "SELECT EXISTS(SELECT 1 FROM learnmetrics.instructors WHERE id = $1)"
            }
            SubjectKind::Course => {
                "SELECT EXISTS(SELECT 1 FROM learnmetrics.courses WHERE id = $1)"
            }
            SubjectKind::Admin => return Ok(true),
        };

        let row = sqlx::query(query).bind(id).fetch_one(&self.pool).await?;
        Ok(row.get::<bool, _>(0))
    }

    async fn instructor_courses(&self, instructor_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM learnmetrics.courses WHERE instructor_id = $1")
            .bind(instructor_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    async fn count_students(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM learnmetrics.students")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let instructor = Uuid::parse_str("7a1d2c3e-5b6f-4a8d-9c0e-1f2a3b4c5d6e")?;
    sqlx::query(
        r#"
        INSERT INTO learnmetrics.instructors (id, full_name, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
        "#,
    )
    .bind(instructor)
    .bind("Dana Whitfield")
    .bind("dana.whitfield@learnmetrics.dev")
    .execute(pool)
    .await?;

    let courses = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Rust Fundamentals",
            12,
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Applied Data Modeling",
            8,
        ),
    ];
    for (id, title, total_lessons) in &courses {
        sqlx::query(
            r#"
            INSERT INTO learnmetrics.courses (id, title, instructor_id, total_lessons)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(instructor)
        .bind(total_lessons)
        .execute(pool)
        .await?;
    }

    let students = vec![
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Avery Lee",
            "avery.lee@example.com",
        ),
        (
            Uuid::parse_str("9b8c7d6e-5f4a-3b2c-1d0e-f9a8b7c6d5e4")?,
            "Jules Moreno",
            "jules.moreno@example.com",
        ),
    ];
    for (id, name, email) in &students {
        sqlx::query(
            r#"
            INSERT INTO learnmetrics.students (id, full_name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .execute(pool)
        .await?;
    }

    let avery = students[0].0;
    let jules = students[1].0;
    let rust = courses[0].0;
    let modeling = courses[1].0;
    let day = |d: u32, h: u32| Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).single();

    struct SeedRow {
        source_key: &'static str,
        record_type: &'static str,
        student: Uuid,
        course: Uuid,
        occurred_at: Option<DateTime<Utc>>,
        lesson_id: Option<&'static str>,
        total_lessons: Option<i32>,
        score: Option<f64>,
        passed: Option<bool>,
        duration_secs: Option<i64>,
        amount_cents: Option<i64>,
    }

    let blank = |source_key, record_type, student, course, occurred_at| SeedRow {
        source_key,
        record_type,
        student,
        course,
        occurred_at,
        lesson_id: None,
        total_lessons: None,
        score: None,
        passed: None,
        duration_secs: None,
        amount_cents: None,
    };

    let mut rows = vec![
        SeedRow {
            total_lessons: Some(12),
            ..blank("seed-001", "enrollment", avery, rust, day(2, 9))
        },
        SeedRow {
            amount_cents: Some(14_900),
            ..blank("seed-002", "payment", avery, rust, day(2, 9))
        },
        SeedRow {
            lesson_id: Some("ownership-basics"),
            ..blank("seed-003", "lesson_complete", avery, rust, day(3, 18))
        },
        SeedRow {
            score: Some(82.0),
            passed: Some(true),
            ..blank("seed-004", "quiz_attempt", avery, rust, day(4, 19))
        },
        SeedRow {
            duration_secs: Some(2_700),
            lesson_id: Some("ownership-basics"),
            ..blank("seed-005", "session", avery, rust, day(4, 19))
        },
        SeedRow {
            total_lessons: Some(8),
            ..blank("seed-006", "enrollment", jules, modeling, day(5, 10))
        },
        SeedRow {
            amount_cents: Some(9_900),
            ..blank("seed-007", "payment", jules, modeling, day(5, 10))
        },
        SeedRow {
            score: Some(41.0),
            passed: Some(false),
            ..blank("seed-008", "quiz_attempt", jules, modeling, day(7, 21))
        },
        SeedRow {
            amount_cents: Some(9_900),
            ..blank("seed-009", "refund", jules, modeling, day(9, 8))
        },
    ];
    // One deliberately broken row so the skip path shows up in demos.
    rows.push(blank("seed-010", "session", jules, modeling, None));

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO learnmetrics.activity
            (id, record_type, student_id, course_id, occurred_at, lesson_id,
             total_lessons, score, passed, duration_secs, amount_cents, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.record_type)
        .bind(row.student)
        .bind(row.course)
        .bind(row.occurred_at)
        .bind(row.lesson_id)
        .bind(row.total_lessons)
        .bind(row.score)
        .bind(row.passed)
        .bind(row.duration_secs)
        .bind(row.amount_cents)
        .bind(row.source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        record_type: String,
        student_id: Option<Uuid>,
        course_id: Option<Uuid>,
        occurred_at: Option<DateTime<Utc>>,
        lesson_id: Option<String>,
        total_lessons: Option<i32>,
        score: Option<f64>,
        passed: Option<bool>,
        duration_secs: Option<i64>,
        amount_cents: Option<i64>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO learnmetrics.activity
            (id, record_type, student_id, course_id, occurred_at, lesson_id,
             total_lessons, score, passed, duration_secs, amount_cents, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.record_type)
        .bind(row.student_id)
        .bind(row.course_id)
        .bind(row.occurred_at)
        .bind(&row.lesson_id)
        .bind(row.total_lessons)
        .bind(row.score)
        .bind(row.passed)
        .bind(row.duration_secs)
        .bind(row.amount_cents)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
