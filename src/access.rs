use chrono::{Datelike, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct AbsencePolicy {
    pub max_absences_per_month: i64,
    pub window_days: i64,
    pub window_absences: i64,
}

impl Default for AbsencePolicy {
    fn default() -> Self {
        Self {
            max_absences_per_month: 3,
            window_days: 7,
            window_absences: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockReason {
    MonthlyLimit,
    RepeatedWithinWindow,
}

/// Video-library gate for one calendar month: blocked when the student's
/// absences in that month reach the monthly limit, or when enough of them
/// cluster inside one short window. A pair of absences counts as clustered
/// when their dates span fewer than `window_days` calendar days, so the 1st
/// and the 7th cluster while the 1st and the 8th do not.
pub fn video_block(
    absence_dates: &[NaiveDate],
    year: i32,
    month: u32,
    policy: &AbsencePolicy,
) -> Option<BlockReason> {
    let mut in_month: Vec<NaiveDate> = absence_dates
        .iter()
        .copied()
        .filter(|d| d.year() == year && d.month() == month)
        .collect();

    if in_month.len() as i64 >= policy.max_absences_per_month.max(1) {
        return Some(BlockReason::MonthlyLimit);
    }

    let run = policy.window_absences.max(2) as usize;
    if in_month.len() >= run {
        in_month.sort_unstable();
        for window in in_month.windows(run) {
            let span = (window[run - 1] - window[0]).num_days();
            if span < policy.window_days.max(1) {
                return Some(BlockReason::RepeatedWithinWindow);
            }
        }
    }

    None
}
