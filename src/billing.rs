use serde::Serialize;

pub const DEFAULT_LESSONS_PER_PERIOD: i64 = 8;

/// Ordinal month phrases as they appear in stored paid-month labels,
/// index 0 = first month.
const MONTH_ORDINALS: [&str; 12] = [
    "الأول",
    "الثاني",
    "الثالث",
    "الرابع",
    "الخامس",
    "السادس",
    "السابع",
    "الثامن",
    "التاسع",
    "العاشر",
    "الحادي عشر",
    "الثاني عشر",
];

/// Next sequential lesson number for a student, derived from the current
/// attendance history. Recomputed from the live max on every call: deleting
/// the highest-numbered record makes that number reusable.
pub fn next_lesson_number<I>(lesson_numbers: I) -> i64
where
    I: IntoIterator<Item = i64>,
{
    lesson_numbers
        .into_iter()
        .max()
        .map(|m| m + 1)
        .unwrap_or(1)
}

/// Cyclic 1..bucket label shown in the UI. Billing math always uses the raw
/// number, never this.
pub fn display_lesson_number(raw_lesson: i64, lessons_per_period: i64) -> i64 {
    let bucket = lessons_per_period.max(1);
    (raw_lesson.max(1) - 1) % bucket + 1
}

/// Billing period covering a raw lesson number: lessons 1..bucket map to
/// period 1, bucket+1..2*bucket to period 2, and so on. Non-positive input
/// is clamped to lesson 1 rather than rejected, so malformed upstream rows
/// cannot break the scan flow.
pub fn billing_period(raw_lesson: i64, lessons_per_period: i64) -> i64 {
    let bucket = lessons_per_period.max(1);
    let lesson = raw_lesson.max(1);
    (lesson + bucket - 1) / bucket
}

pub fn first_lesson_of(period: i64, lessons_per_period: i64) -> i64 {
    (period - 1) * lessons_per_period.max(1) + 1
}

pub fn last_lesson_of(period: i64, lessons_per_period: i64) -> i64 {
    period * lessons_per_period.max(1)
}

/// Resolve a free-text paid-month label to a billing-period number.
///
/// Labels were entered through several UI generations: bare numbers, ordinal
/// month phrases, and free text with an embedded number. Tried in that order;
/// anything unresolvable yields 0, which never equals a valid period (periods
/// start at 1) and therefore fails every eligibility comparison.
pub fn resolve_month_label(label: &str) -> i64 {
    let trimmed = label.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return n.max(0);
    }
    // Compound ordinals ("الثاني عشر") contain their single-word prefixes,
    // so scan from the twelfth month down.
    for (i, phrase) in MONTH_ORDINALS.iter().enumerate().rev() {
        if trimmed.contains(phrase) {
            return (i as i64) + 1;
        }
    }
    if let Some(n) = first_digit_run(trimmed) {
        return n;
    }
    0
}

fn first_digit_run(s: &str) -> Option<i64> {
    let digits: String = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// True iff any paid-month label resolves to the billing period that covers
/// `raw_lesson`. Informational: the scan flow records attendance regardless
/// and only annotates the result with this verdict.
pub fn has_paid_for_lesson<'a, I>(
    paid_month_labels: I,
    raw_lesson: i64,
    lessons_per_period: i64,
) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let required = billing_period(raw_lesson, lessons_per_period);
    paid_month_labels
        .into_iter()
        .any(|label| resolve_month_label(label) == required)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidPeriods {
    pub periods: Vec<i64>,
    pub unresolved: Vec<String>,
}

/// Collapse a student's full paid-month label history into the set of
/// resolved periods. Duplicate labels for the same period (say "3" and
/// "الشهر الثالث") collapse to one entry; labels that resolve to nothing are
/// reported as-is so the admin can clean them up.
pub fn resolved_paid_periods<'a, I>(paid_month_labels: I) -> PaidPeriods
where
    I: IntoIterator<Item = &'a str>,
{
    let mut periods: Vec<i64> = Vec::new();
    let mut unresolved: Vec<String> = Vec::new();
    for label in paid_month_labels {
        let period = resolve_month_label(label);
        if period == 0 {
            unresolved.push(label.to_string());
        } else if !periods.contains(&period) {
            periods.push(period);
        }
    }
    periods.sort_unstable();
    PaidPeriods {
        periods,
        unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_lesson_number_empty_history_is_one() {
        assert_eq!(next_lesson_number(Vec::new()), 1);
    }

    #[test]
    fn next_lesson_number_exceeds_current_max() {
        let history = vec![3, 1, 7, 2];
        let next = next_lesson_number(history.iter().copied());
        assert_eq!(next, 8);
        assert!(history.iter().all(|&n| next > n));
    }

    #[test]
    fn next_lesson_number_reuses_after_top_deletion() {
        // Deleting the highest-numbered record hands its number back.
        assert_eq!(next_lesson_number(vec![1, 2, 3]), 4);
        assert_eq!(next_lesson_number(vec![1, 2]), 3);
    }

    #[test]
    fn billing_period_bucket_boundaries() {
        assert_eq!(billing_period(1, 8), 1);
        assert_eq!(billing_period(8, 8), 1);
        assert_eq!(billing_period(9, 8), 2);
        assert_eq!(billing_period(16, 8), 2);
        assert_eq!(billing_period(17, 8), 3);
        for n in 1..100 {
            if n % 8 == 0 {
                assert_eq!(billing_period(n + 1, 8), billing_period(n, 8) + 1);
            } else {
                assert_eq!(billing_period(n + 1, 8), billing_period(n, 8));
            }
        }
    }

    #[test]
    fn billing_period_clamps_invalid_input() {
        assert_eq!(billing_period(0, 8), 1);
        assert_eq!(billing_period(-5, 8), 1);
        assert_eq!(billing_period(10, 0), 10);
    }

    #[test]
    fn period_round_trip_covers_lesson() {
        for n in 1..200 {
            let p = billing_period(n, 8);
            assert!(first_lesson_of(p, 8) <= n);
            assert!(n <= last_lesson_of(p, 8));
        }
    }

    #[test]
    fn display_number_cycles_within_bucket() {
        assert_eq!(display_lesson_number(1, 8), 1);
        assert_eq!(display_lesson_number(8, 8), 8);
        assert_eq!(display_lesson_number(9, 8), 1);
        assert_eq!(display_lesson_number(20, 8), 4);
        assert_eq!(display_lesson_number(0, 8), 1);
    }

    #[test]
    fn resolver_numeric_label_wins_over_phrase_scan() {
        assert_eq!(resolve_month_label("5"), 5);
        assert_eq!(resolve_month_label(" 12 "), 12);
    }

    #[test]
    fn resolver_maps_ordinal_phrases() {
        assert_eq!(resolve_month_label("الأول"), 1);
        assert_eq!(resolve_month_label("الشهر الثالث"), 3);
        assert_eq!(resolve_month_label("الشهر الحادي عشر"), 11);
        assert_eq!(resolve_month_label("الشهر الثاني عشر"), 12);
        assert_eq!(resolve_month_label("الشهر الثاني"), 2);
    }

    #[test]
    fn resolver_extracts_embedded_digits() {
        assert_eq!(resolve_month_label("الشهر 3"), 3);
        assert_eq!(resolve_month_label("شهر7"), 7);
        assert_eq!(resolve_month_label("month 10 paid"), 10);
    }

    #[test]
    fn resolver_is_total_over_garbage() {
        assert_eq!(resolve_month_label(""), 0);
        assert_eq!(resolve_month_label("   "), 0);
        assert_eq!(resolve_month_label("paid in full"), 0);
        assert_eq!(resolve_month_label("-3"), 0);
        assert_eq!(resolve_month_label("99999999999999999999999999"), 0);
    }

    #[test]
    fn eligibility_matches_arabic_label_against_period() {
        let labels = vec!["الشهر الثاني".to_string()];
        assert!(has_paid_for_lesson(
            labels.iter().map(|s| s.as_str()),
            10,
            8
        ));
    }

    #[test]
    fn eligibility_matches_numeric_label_against_period() {
        let labels = vec!["3".to_string()];
        assert!(has_paid_for_lesson(labels.iter().map(|s| s.as_str()), 17, 8));
        assert!(!has_paid_for_lesson(labels.iter().map(|s| s.as_str()), 10, 8));
    }

    #[test]
    fn eligibility_without_payments_is_false() {
        assert!(!has_paid_for_lesson(std::iter::empty(), 1, 8));
    }

    #[test]
    fn paid_periods_dedupe_by_resolved_period() {
        let labels = ["3", "الشهر الثالث", "الأول", "paid cash"];
        let report = resolved_paid_periods(labels.iter().copied());
        assert_eq!(report.periods, vec![1, 3]);
        assert_eq!(report.unresolved, vec!["paid cash".to_string()]);
    }
}
