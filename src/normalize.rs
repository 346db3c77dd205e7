use crate::error::{EngineError, Result};
use crate::models::{EventKind, LearningEvent, RawActivityRecord};

/// Convert one raw store row into the canonical event shape.
///
/// Every record type requires `student_id`, `course_id` and `occurred_at`;
/// anything else missing degrades to a sensible default rather than a
/// rejection. Unknown record types pass through as `EventKind::Other`.
pub fn normalize(raw: &RawActivityRecord) -> Result<LearningEvent> {
    let subject_id = raw
        .student_id
        .ok_or_else(|| EngineError::malformed(format!("{} row missing student id", raw.record_type)))?;
    let course_id = raw
        .course_id
        .ok_or_else(|| EngineError::malformed(format!("{} row missing course id", raw.record_type)))?;
    let timestamp = raw
        .occurred_at
        .ok_or_else(|| EngineError::malformed(format!("{} row missing timestamp", raw.record_type)))?;

    let kind = match raw.record_type.as_str() {
        "enrollment" => EventKind::Enrollment {
            total_lessons: raw.total_lessons.unwrap_or(0).max(0) as u32,
        },
        "lesson_complete" => EventKind::LessonComplete {
            lesson_id: raw
                .lesson_id
                .clone()
                .ok_or_else(|| EngineError::malformed("lesson_complete row missing lesson id"))?,
        },
        "quiz_attempt" => EventKind::QuizAttempt {
            score: raw.score.unwrap_or(0.0).clamp(0.0, 100.0),
            passed: raw.passed.unwrap_or(false),
        },
        "session" => EventKind::Session {
            duration_secs: raw.duration_secs.unwrap_or(0).max(0),
            lesson_id: raw.lesson_id.clone(),
        },
        "payment" => EventKind::Payment {
            amount_cents: raw.amount_cents.unwrap_or(0),
        },
        "refund" => EventKind::Refund {
            amount_cents: raw.amount_cents.unwrap_or(0),
        },
        other => EventKind::Other(other.to_string()),
    };

    Ok(LearningEvent {
        subject_id,
        course_id,
        timestamp,
        kind,
    })
}

/// Normalize a batch, isolating per-record failures. A bad row is skipped and
/// logged; it never aborts the surrounding rollup. Returns the events plus
/// the number of rows skipped.
pub fn normalize_all(raw: &[RawActivityRecord]) -> (Vec<LearningEvent>, usize) {
    let mut events = Vec::with_capacity(raw.len());
    let mut skipped = 0usize;

    for record in raw {
        match normalize(record) {
            Ok(event) => events.push(event),
            Err(err) => {
                skipped += 1;
                tracing::warn!(record_type = %record.record_type, error = %err, "skipping malformed activity record");
            }
        }
    }

    if skipped > 0 {
        tracing::warn!(skipped, total = raw.len(), "normalization skipped records");
    }

    (events, skipped)
}
