use crate::data::PriceSeries;
use crate::error::{EngineError, EngineResult};
use crate::models::{ExtremaKind, ExtremaPoint};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extrema {
    pub support: Vec<ExtremaPoint>,
    pub resistance: Vec<ExtremaPoint>,
}

impl Extrema {
    pub fn is_empty(&self) -> bool {
        self.support.is_empty() && self.resistance.is_empty()
    }

    /// Support and resistance merged into one ascending stream.
    pub fn merged(&self) -> Vec<&ExtremaPoint> {
        let mut merged: Vec<&ExtremaPoint> =
            self.support.iter().chain(self.resistance.iter()).collect();
        merged.sort_by_key(|point| point.index);
        merged
    }
}

/// Finds strict local minima and maxima of the close column.
///
/// With `order = past_window + trade_window`, bar `i` is a support when its
/// close is strictly below every other close in `[i - order, i + order]` and a
/// resistance when strictly above. Bars closer than `order` to either end of
/// the series never qualify.
pub struct ExtremaDetector;

impl ExtremaDetector {
    pub fn detect(
        series: &PriceSeries,
        past_window: usize,
        trade_window: usize,
    ) -> EngineResult<Extrema> {
        if past_window < 1 {
            return Err(EngineError::config(format!(
                "past_window must be >= 1 (value: {})",
                past_window
            )));
        }

        let order = past_window + trade_window;
        let closes = series.closes();
        let n = closes.len();
        let mut extrema = Extrema::default();

        if n < 2 * order + 1 {
            debug!(
                "Series of {} bars is too short for order {}; no extrema",
                n, order
            );
            return Ok(extrema);
        }

        // window_min[j] / window_max[j] cover closes[j..j + order].
        let window_min = sliding_extreme(&closes, order, |a, b| a <= b);
        let window_max = sliding_extreme(&closes, order, |a, b| a >= b);

        let bars = series.bars();
        for i in order..n - order {
            let close = closes[i];
            let left = i - order;
            let right = i + 1;

            if close < window_min[left] && close < window_min[right] {
                extrema.support.push(ExtremaPoint {
                    index: i,
                    date: bars[i].date,
                    price: close,
                    kind: ExtremaKind::Support,
                });
            } else if close > window_max[left] && close > window_max[right] {
                extrema.resistance.push(ExtremaPoint {
                    index: i,
                    date: bars[i].date,
                    price: close,
                    kind: ExtremaKind::Resistance,
                });
            }
        }

        debug!(
            "Detected {} support and {} resistance points (order {})",
            extrema.support.len(),
            extrema.resistance.len(),
            order
        );
        Ok(extrema)
    }
}

/// Monotonic-deque sliding window. `dominates(a, b)` is true when `a` should
/// evict `b` from the back of the deque.
fn sliding_extreme<F>(values: &[f64], width: usize, dominates: F) -> Vec<f64>
where
    F: Fn(f64, f64) -> bool,
{
    let mut result = Vec::with_capacity(values.len().saturating_sub(width) + 1);
    let mut deque: VecDeque<usize> = VecDeque::with_capacity(width + 1);

    for (index, &value) in values.iter().enumerate() {
        while let Some(&back) = deque.back() {
            if dominates(value, values[back]) {
                deque.pop_back();
            } else {
                break;
            }
        }
        deque.push_back(index);

        if let Some(&front) = deque.front() {
            if front + width <= index {
                deque.pop_front();
            }
        }

        if index + 1 >= width {
            if let Some(&front) = deque.front() {
                result.push(values[front]);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bar;
    use chrono::{Duration, TimeZone, Utc};

    fn series_from_closes(closes: &[f64]) -> PriceSeries {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                date: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 0.0,
            })
            .collect();
        PriceSeries::new("TEST", bars).unwrap()
    }

    fn brute_force(closes: &[f64], order: usize) -> (Vec<usize>, Vec<usize>) {
        let mut support = Vec::new();
        let mut resistance = Vec::new();
        if closes.len() < 2 * order + 1 {
            return (support, resistance);
        }
        for i in order..closes.len() - order {
            let neighbours = (i - order..=i + order).filter(|&j| j != i);
            let is_min = neighbours.clone().all(|j| closes[i] < closes[j]);
            let is_max = neighbours.clone().all(|j| closes[i] > closes[j]);
            if is_min {
                support.push(i);
            }
            if is_max {
                resistance.push(i);
            }
        }
        (support, resistance)
    }

    fn indices(points: &[ExtremaPoint]) -> Vec<usize> {
        points.iter().map(|p| p.index).collect()
    }

    #[test]
    fn finds_the_bottom_and_top_of_a_wave() {
        let closes = [5.0, 4.0, 3.0, 2.0, 3.0, 4.0, 5.0, 6.0, 5.0, 4.0, 3.0];
        let extrema = ExtremaDetector::detect(&series_from_closes(&closes), 2, 0).unwrap();
        assert_eq!(indices(&extrema.support), vec![3]);
        assert_eq!(indices(&extrema.resistance), vec![7]);
        assert_eq!(extrema.support[0].price, 2.0);
    }

    #[test]
    fn ties_never_qualify() {
        let closes = [5.0, 4.0, 2.0, 2.0, 4.0, 5.0];
        let extrema = ExtremaDetector::detect(&series_from_closes(&closes), 1, 0).unwrap();
        assert!(extrema.support.is_empty());
    }

    #[test]
    fn boundary_bars_are_excluded() {
        let closes = [1.0, 2.0, 3.0, 2.0, 1.0];
        let extrema = ExtremaDetector::detect(&series_from_closes(&closes), 1, 0).unwrap();
        assert!(extrema.support.is_empty());
        assert_eq!(indices(&extrema.resistance), vec![2]);
    }

    #[test]
    fn trade_window_widens_the_neighbourhood() {
        // Index 2 is a local minimum for order 1 but not for order 2.
        let closes = [3.0, 2.5, 2.0, 2.5, 1.0, 2.0, 3.0];
        let narrow = ExtremaDetector::detect(&series_from_closes(&closes), 1, 0).unwrap();
        assert_eq!(indices(&narrow.support), vec![2, 4]);

        let wide = ExtremaDetector::detect(&series_from_closes(&closes), 1, 1).unwrap();
        assert_eq!(indices(&wide.support), vec![4]);
    }

    #[test]
    fn rejects_zero_past_window() {
        let series = series_from_closes(&[1.0, 2.0, 3.0]);
        assert!(matches!(
            ExtremaDetector::detect(&series, 0, 3),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn short_series_yields_nothing() {
        let extrema = ExtremaDetector::detect(&series_from_closes(&[1.0, 0.5]), 3, 0).unwrap();
        assert!(extrema.is_empty());
    }

    #[test]
    fn matches_brute_force_on_random_series_with_ties() {
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..200 {
            let len = rng.usize(1..80);
            // Small value alphabet so ties are frequent.
            let closes: Vec<f64> = (0..len).map(|_| rng.u8(0..6) as f64).collect();
            let series = series_from_closes(&closes);
            let past_window = rng.usize(1..5);
            let trade_window = rng.usize(0..4);

            let extrema = ExtremaDetector::detect(&series, past_window, trade_window).unwrap();
            let (support, resistance) = brute_force(&closes, past_window + trade_window);
            assert_eq!(indices(&extrema.support), support, "closes: {:?}", closes);
            assert_eq!(indices(&extrema.resistance), resistance, "closes: {:?}", closes);
        }
    }

    #[test]
    fn no_bar_is_both_support_and_resistance() {
        let mut rng = fastrand::Rng::with_seed(11);
        let closes: Vec<f64> = (0..300).map(|_| 100.0 + rng.f64() * 10.0).collect();
        let extrema = ExtremaDetector::detect(&series_from_closes(&closes), 2, 1).unwrap();
        for support in &extrema.support {
            assert!(extrema.resistance.iter().all(|r| r.index != support.index));
        }
    }
}
