use std::cmp::Ordering;

/// 1-decimal rounding applied to every aggregate the UI displays.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn percent(raw: f64, out_of: f64) -> f64 {
    if out_of > 0.0 {
        100.0 * raw / out_of
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExamAverage {
    pub avg_raw: f64,
    pub avg_percent: f64,
    pub scored_count: usize,
    pub missing_count: usize,
}

/// Class average for one exam. Students without a score (absent or not yet
/// marked) are excluded from the denominator.
pub fn exam_average<I>(scores: I, out_of: f64) -> ExamAverage
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut sum_raw = 0.0_f64;
    let mut scored_count = 0_usize;
    let mut missing_count = 0_usize;

    for score in scores {
        match score {
            Some(v) => {
                scored_count += 1;
                sum_raw += v;
            }
            None => missing_count += 1,
        }
    }

    let avg_raw = if scored_count > 0 {
        sum_raw / scored_count as f64
    } else {
        0.0
    };

    ExamAverage {
        avg_raw,
        avg_percent: percent(avg_raw, out_of),
        scored_count,
        missing_count,
    }
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round1_half_up() {
        assert_eq!(round1(0.0), 0.0);
        assert_eq!(round1(3.54), 3.5);
        assert_eq!(round1(3.55), 3.6);
        assert_eq!(round1(35.6818), 35.7);
    }

    #[test]
    fn average_excludes_missing_scores() {
        let scores = vec![Some(8.0), None, Some(6.0), None, Some(10.0)];
        let avg = exam_average(scores, 10.0);
        assert_eq!(avg.scored_count, 3);
        assert_eq!(avg.missing_count, 2);
        assert!((avg.avg_raw - 8.0).abs() < 1e-9);
        assert!((avg.avg_percent - 80.0).abs() < 1e-9);
    }

    #[test]
    fn average_of_nothing_is_zero() {
        let avg = exam_average(std::iter::empty(), 10.0);
        assert_eq!(avg.scored_count, 0);
        assert_eq!(avg.avg_raw, 0.0);
        assert_eq!(avg.avg_percent, 0.0);
    }

    #[test]
    fn zero_out_of_yields_zero_percent() {
        let avg = exam_average(vec![Some(5.0)], 0.0);
        assert_eq!(avg.avg_percent, 0.0);
    }

    #[test]
    fn median_odd_even_empty() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[4.0]), 4.0);
        assert_eq!(median(&[1.0, 9.0, 5.0]), 5.0);
        assert_eq!(median(&[1.0, 3.0, 5.0, 9.0]), 4.0);
    }
}
