use std::fmt::Write;

use crate::models::{AggregateView, Insight, TrendPoint};

fn write_insights(output: &mut String, insights: &[Insight]) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Insights");
    if insights.is_empty() {
        let _ = writeln!(output, "Nothing to flag for this window.");
    } else {
        for insight in insights {
            let _ = writeln!(output, "- [{}] {}", insight.rule, insight.message);
        }
    }
}

fn write_trend(output: &mut String, trend: &[TrendPoint]) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Activity Trend");
    let active_buckets = trend.iter().filter(|p| p.active_students > 0).count();
    let _ = writeln!(
        output,
        "{} of {} buckets saw activity.",
        active_buckets,
        trend.len()
    );
    for point in trend.iter().filter(|p| p.active_students > 0).take(10) {
        let _ = writeln!(
            output,
            "- {}: {} active, {} completions, {} min",
            point.bucket_label,
            point.active_students,
            point.completions,
            point.time_spent_secs / 60
        );
    }
}

fn dollars(cents: i64) -> String {
    format!("${:.2}", cents as f64 / 100.0)
}

/// Render one aggregate view as a markdown summary.
pub fn build_report(view: &AggregateView) -> String {
    let mut output = String::new();

    match view {
        AggregateView::Student(m) => {
            let _ = writeln!(output, "# Student Report: {}", m.student_id);
            let _ = writeln!(output, "Window: {}", m.range.as_str());
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "- Courses: {} enrolled, {} completed ({:.0}% completion)",
                m.total_courses, m.completed_courses, m.completion_rate
            );
            let _ = writeln!(output, "- Average progress: {:.0}%", m.average_progress);
            let _ = writeln!(output, "- Average quiz score: {:.0}%", m.average_quiz_score);
            let _ = writeln!(
                output,
                "- Time spent: {} min",
                m.total_time_spent_secs / 60
            );
            let _ = writeln!(output, "- Engagement: {:?}", m.engagement_level);
            if let Some(reason) = &m.struggling {
                let _ = writeln!(output, "- Struggling: {:?}", reason);
            }
            if m.inactive {
                let _ = writeln!(output, "- Inactive in this window");
            }

            let _ = writeln!(output);
            let _ = writeln!(output, "## Course Progress");
            if m.courses.is_empty() {
                let _ = writeln!(output, "No course activity for this window.");
            }
            for course in &m.courses {
                let _ = writeln!(
                    output,
                    "- {}: {}/{} lessons, quizzes {}/{} passed",
                    course.course_id,
                    course.lessons_completed,
                    course.total_lessons,
                    course.quizzes_passed,
                    course.quizzes_attempted
                );
            }

            write_trend(&mut output, &m.trend);
            write_insights(&mut output, &m.insights);
        }
        AggregateView::Instructor(m) => {
            let _ = writeln!(output, "# Instructor Report: {}", m.instructor_id);
            let _ = writeln!(output, "Window: {}", m.range.as_str());
            let _ = writeln!(output);
            let _ = writeln!(output, "- Courses taught: {}", m.total_courses);
            let _ = writeln!(
                output,
                "- Enrollments: {} ({} completed, {:.0}% completion)",
                m.total_enrollments, m.total_completions, m.completion_rate
            );
            let _ = writeln!(
                output,
                "- Revenue: {} gross, {} refunded, {} net",
                dollars(m.revenue_cents),
                dollars(m.refunded_cents),
                dollars(m.net_revenue_cents)
            );

            let _ = writeln!(output);
            let _ = writeln!(output, "## Struggling Students");
            if m.struggling_students.is_empty() {
                let _ = writeln!(output, "No students currently flagged.");
            }
            for student in &m.struggling_students {
                let _ = writeln!(output, "- {}: {:?}", student.student_id, student.reason);
            }

            write_trend(&mut output, &m.trend);
            write_insights(&mut output, &m.insights);
        }
        AggregateView::Course(m) => {
            let _ = writeln!(output, "# Course Report: {}", m.course_id);
            let _ = writeln!(output, "Window: {}", m.range.as_str());
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "- Enrollments: {} ({} completed, {:.0}% completion)",
                m.enrollments, m.completions, m.completion_rate
            );
            let _ = writeln!(output, "- Active students: {}", m.active_students);
            let _ = writeln!(output, "- Average quiz score: {:.0}%", m.average_quiz_score);
            let _ = writeln!(output, "- Revenue: {}", dollars(m.revenue_cents));

            let _ = writeln!(output);
            let _ = writeln!(output, "## Lesson Dropout");
            if m.lesson_dropout.is_empty() {
                let _ = writeln!(output, "No lesson-level activity recorded.");
            }
            for lesson in m.lesson_dropout.iter().take(10) {
                let _ = writeln!(
                    output,
                    "- {}: {} started, {} completed ({:.0}% dropout)",
                    lesson.lesson_id, lesson.started, lesson.completed, lesson.dropout_rate
                );
            }

            write_trend(&mut output, &m.trend);
            write_insights(&mut output, &m.insights);
        }
        AggregateView::Admin(m) => {
            let _ = writeln!(output, "# Platform Report");
            let _ = writeln!(output, "Window: {}", m.range.as_str());
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "- Students: {} registered, {} active this window",
                m.total_students, m.active_students
            );
            let _ = writeln!(
                output,
                "- Enrollments: {} ({} completed, {:.0}% completion)",
                m.total_enrollments, m.total_completions, m.completion_rate
            );
            let _ = writeln!(
                output,
                "- Revenue: {} gross, {} refunded, {} net",
                dollars(m.revenue_cents),
                dollars(m.refunded_cents),
                dollars(m.net_revenue_cents)
            );

            let _ = writeln!(output);
            let _ = writeln!(output, "## Top Students");
            for entry in &m.top_students {
                let _ = writeln!(
                    output,
                    "- {} ({} {:.1})",
                    entry.subject_id, entry.metric, entry.value
                );
            }
            let _ = writeln!(output);
            let _ = writeln!(output, "## Top Courses");
            for entry in &m.top_courses {
                let _ = writeln!(
                    output,
                    "- {} ({} {:.0})",
                    entry.subject_id, entry.metric, entry.value
                );
            }

            write_trend(&mut output, &m.trend);
            write_insights(&mut output, &m.insights);
        }
    }

    output
}
