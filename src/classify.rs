use chrono::{DateTime, Duration, Utc};

use crate::config::RuleThresholds;
use crate::models::{EngagementLevel, Insight, RawCounters, StrugglingReason};

/// Time since the last recorded access. `None` means no activity at all,
/// which every rule treats as maximally stale. Staleness windows compare
/// full durations, not truncated day counts: 7 days and 20 hours ago is
/// more than 7 days ago.
fn time_since_access(counters: &RawCounters, now: DateTime<Utc>) -> Option<Duration> {
    counters.last_access.map(|ts| now - ts)
}

/// Three-way engagement classification. Pure: same counters and `now` always
/// produce the same level. A rollup with no events is `Low`.
pub fn engagement_level(
    counters: &RawCounters,
    now: DateTime<Utc>,
    cfg: &RuleThresholds,
) -> EngagementLevel {
    let progress = counters.average_progress();
    match time_since_access(counters, now) {
        Some(age)
            if progress >= cfg.high_progress_threshold
                && age <= Duration::days(cfg.stale_days_high) =>
        {
            EngagementLevel::High
        }
        Some(age)
            if age > Duration::days(cfg.stale_days_low)
                || progress < cfg.low_progress_threshold =>
        {
            EngagementLevel::Low
        }
        Some(_) => EngagementLevel::Medium,
        None => EngagementLevel::Low,
    }
}

/// Struggling detection: low quiz average or a lesson shedding too many
/// students. Any one trigger suffices; the reason travels with the flag.
pub fn struggling(counters: &RawCounters, cfg: &RuleThresholds) -> Option<StrugglingReason> {
    if counters.quiz_attempts > 0 {
        let average = counters.average_quiz_score();
        if average < cfg.struggling_quiz_threshold {
            return Some(StrugglingReason::LowQuizScore {
                average_score: average,
            });
        }
    }

    if let Some((lesson_id, rate)) = counters.worst_dropout() {
        if rate > cfg.dropout_rate_threshold {
            return Some(StrugglingReason::LessonDropout {
                lesson_id,
                dropout_rate: rate,
            });
        }
    }

    None
}

/// Inactivity is orthogonal to struggling: a student can be either, both,
/// or neither.
pub fn inactive(counters: &RawCounters, now: DateTime<Utc>, cfg: &RuleThresholds) -> bool {
    match time_since_access(counters, now) {
        Some(age) => age > Duration::days(cfg.inactive_days),
        None => true,
    }
}

/// Insight rules in priority order. The first `max_insights` matches are
/// surfaced; later rules are dropped rather than overwhelming the caller.
pub fn insights(
    counters: &RawCounters,
    now: DateTime<Utc>,
    cfg: &RuleThresholds,
) -> Vec<Insight> {
    let mut matched = Vec::new();

    if let Some(reason) = struggling(counters, cfg) {
        let message = match &reason {
            StrugglingReason::LowQuizScore { average_score } => format!(
                "Average quiz score {:.0}% is below the {:.0}% bar; targeted review recommended.",
                average_score, cfg.struggling_quiz_threshold
            ),
            StrugglingReason::LessonDropout {
                lesson_id,
                dropout_rate,
            } => format!(
                "Lesson {} loses {:.0}% of students who start it; consider revising it.",
                lesson_id, dropout_rate
            ),
        };
        matched.push(Insight {
            rule: "struggling".to_string(),
            message,
        });
    }

    if inactive(counters, now, cfg) {
        matched.push(Insight {
            rule: "inactive".to_string(),
            message: format!(
                "No activity in over {} days; a nudge or reminder may help.",
                cfg.inactive_days
            ),
        });
    }

    let completion = counters.completion_rate();
    if counters.enrollments > 0 && completion < cfg.low_completion_threshold {
        matched.push(Insight {
            rule: "needs-attention".to_string(),
            message: format!(
                "Completion rate {:.0}% is below the {:.0}% target.",
                completion, cfg.low_completion_threshold
            ),
        });
    }

    if counters.enrollments > 0 && completion >= cfg.top_performer_threshold {
        matched.push(Insight {
            rule: "top-performer".to_string(),
            message: format!(
                "Completion rate {:.0}% puts this subject among the top performers.",
                completion
            ),
        });
    }

    if engagement_level(counters, now, cfg) == EngagementLevel::High {
        matched.push(Insight {
            rule: "high-engagement".to_string(),
            message: "Consistently high engagement; a good moment to suggest the next course."
                .to_string(),
        });
    }

    matched.truncate(cfg.max_insights);
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LessonCounter;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 30, 12, 0, 0).unwrap()
    }

    fn counters(progress_pct: u32, days_ago: i64) -> RawCounters {
        RawCounters {
            enrollments: 1,
            lessons_completed: progress_pct,
            total_lessons: 100,
            last_access: Some(now() - Duration::days(days_ago)),
            ..RawCounters::default()
        }
    }

    #[test]
    fn high_requires_progress_and_recency() {
        let cfg = RuleThresholds::default();
        assert_eq!(
            engagement_level(&counters(85, 1), now(), &cfg),
            EngagementLevel::High
        );
        // Good progress but stale access is not high.
        assert_ne!(
            engagement_level(&counters(85, 5), now(), &cfg),
            EngagementLevel::High
        );
    }

    #[test]
    fn low_on_staleness_or_poor_progress() {
        let cfg = RuleThresholds::default();
        assert_eq!(
            engagement_level(&counters(85, 10), now(), &cfg),
            EngagementLevel::Low
        );
        assert_eq!(
            engagement_level(&counters(10, 1), now(), &cfg),
            EngagementLevel::Low
        );
    }

    #[test]
    fn medium_between_the_extremes() {
        let cfg = RuleThresholds::default();
        assert_eq!(
            engagement_level(&counters(50, 5), now(), &cfg),
            EngagementLevel::Medium
        );
    }

    #[test]
    fn staleness_boundaries_compare_full_durations() {
        let cfg = RuleThresholds::default();
        // 7 days and 20 hours ago is more than 7 days ago.
        let mut c = counters(50, 0);
        c.last_access = Some(now() - Duration::days(7) - Duration::hours(20));
        assert!(inactive(&c, now(), &cfg));
        assert_eq!(engagement_level(&c, now(), &cfg), EngagementLevel::Low);

        // Exactly 7 days is still within the window.
        c.last_access = Some(now() - Duration::days(7));
        assert!(!inactive(&c, now(), &cfg));
        assert_eq!(engagement_level(&c, now(), &cfg), EngagementLevel::Medium);
    }

    #[test]
    fn high_engagement_cuts_off_past_three_full_days() {
        let cfg = RuleThresholds::default();
        let mut c = counters(85, 0);
        c.last_access = Some(now() - Duration::days(3) - Duration::hours(23));
        assert_eq!(engagement_level(&c, now(), &cfg), EngagementLevel::Medium);

        c.last_access = Some(now() - Duration::days(3));
        assert_eq!(engagement_level(&c, now(), &cfg), EngagementLevel::High);
    }

    #[test]
    fn zero_event_rollup_defaults_to_low_and_inactive() {
        let cfg = RuleThresholds::default();
        let empty = RawCounters::default();
        assert_eq!(engagement_level(&empty, now(), &cfg), EngagementLevel::Low);
        assert!(inactive(&empty, now(), &cfg));
        assert!(struggling(&empty, &cfg).is_none());
    }

    #[test]
    fn low_quiz_average_flags_struggling_regardless_of_progress() {
        let cfg = RuleThresholds::default();
        let mut c = counters(90, 1);
        c.quiz_attempts = 4;
        c.quiz_score_sum = 140.0; // average 35%
        match struggling(&c, &cfg) {
            Some(StrugglingReason::LowQuizScore { average_score }) => {
                assert!((average_score - 35.0).abs() < 0.001)
            }
            other => panic!("expected low quiz score trigger, got {other:?}"),
        }
    }

    #[test]
    fn lesson_dropout_flags_struggling() {
        let cfg = RuleThresholds::default();
        let mut c = counters(50, 1);
        c.lessons.insert(
            "l3".to_string(),
            LessonCounter {
                started: 10,
                completed: 4,
            },
        );
        match struggling(&c, &cfg) {
            Some(StrugglingReason::LessonDropout {
                lesson_id,
                dropout_rate,
            }) => {
                assert_eq!(lesson_id, "l3");
                assert!((dropout_rate - 60.0).abs() < 0.001);
            }
            other => panic!("expected dropout trigger, got {other:?}"),
        }
    }

    #[test]
    fn passing_quiz_average_does_not_mask_dropout() {
        let cfg = RuleThresholds::default();
        let mut c = counters(50, 1);
        c.quiz_attempts = 2;
        c.quiz_score_sum = 160.0; // average 80%
        c.lessons.insert(
            "l1".to_string(),
            LessonCounter {
                started: 10,
                completed: 2,
            },
        );
        assert!(matches!(
            struggling(&c, &cfg),
            Some(StrugglingReason::LessonDropout { .. })
        ));
    }

    #[test]
    fn inactive_is_independent_of_struggling() {
        let cfg = RuleThresholds::default();
        let mut c = counters(90, 10);
        c.quiz_attempts = 1;
        c.quiz_score_sum = 95.0;
        assert!(inactive(&c, now(), &cfg));
        assert!(struggling(&c, &cfg).is_none());
    }

    #[test]
    fn classification_is_deterministic() {
        let cfg = RuleThresholds::default();
        let c = counters(64, 2);
        let first = engagement_level(&c, now(), &cfg);
        for _ in 0..10 {
            assert_eq!(engagement_level(&c, now(), &cfg), first);
        }
    }

    #[test]
    fn insights_respect_priority_and_cap() {
        let mut cfg = RuleThresholds::default();
        cfg.max_insights = 2;
        // Struggling, inactive and low completion all fire; only two surface.
        let mut c = counters(10, 20);
        c.quiz_attempts = 2;
        c.quiz_score_sum = 40.0;
        let insights = insights(&c, now(), &cfg);
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].rule, "struggling");
        assert_eq!(insights[1].rule, "inactive");
    }

    #[test]
    fn top_performer_insight_for_high_completion() {
        let cfg = RuleThresholds::default();
        let mut c = counters(90, 1);
        c.enrollments = 10;
        c.completions = 9;
        let insights = insights(&c, now(), &cfg);
        assert!(insights.iter().any(|i| i.rule == "top-performer"));
    }
}
