// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Pure aggregation helpers the two CLI front ends use to summarise a Task
//! Pool run: arithmetic mean, median, wall-clock time and throughput.

/// `sum(x) / len(x)`, or `0` for an empty slice (mirrors the reference
/// tool's `mean`, which treats the empty case the same way rather than
/// dividing by zero).
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// The middle value of a sorted copy of `values`, or the average of the two
/// middle values when `values` has even length. `0` for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("NaN in stats input"));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Wall-clock time for a Task Pool run: the slowest worker's own summed
/// durations, since workers run concurrently but each processes its items
/// serially.
pub fn wall_time_secs(per_worker_durations: &[Vec<f64>]) -> f64 {
    per_worker_durations
        .iter()
        .map(|worker| worker.iter().sum::<f64>())
        .fold(0.0_f64, f64::max)
}

/// `total_time / 60 : total_time % 60`, matching the reference tool's
/// minutes:seconds wall-time display.
pub fn format_minutes_seconds(total_secs: f64) -> String {
    let total = total_secs as i64;
    format!("{}:{}", total / 60, total % 60)
}

/// Rows processed per second of wall-clock time; `0` if `wall_time` is zero
/// (nothing ran, or ran too fast to measure).
pub fn rows_per_second(total_rows: usize, wall_time: f64) -> f64 {
    if wall_time > 0.0 {
        total_rows as f64 / wall_time
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_slice_is_zero() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn mean_matches_expectation() {
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
    }

    #[test]
    fn median_of_odd_length_is_middle_element() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
    }

    #[test]
    fn median_of_even_length_averages_middle_two() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn wall_time_is_max_over_workers_not_sum() {
        let per_worker = vec![vec![1.0, 1.0], vec![5.0]];
        assert_eq!(wall_time_secs(&per_worker), 5.0);
    }

    #[test]
    fn rows_per_second_guards_against_zero_wall_time() {
        assert_eq!(rows_per_second(100, 0.0), 0.0);
        assert_eq!(rows_per_second(100, 10.0), 10.0);
    }
}
