use crate::equity::EquityCurve;
use crate::models::*;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::cmp::Ordering;

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 60.0 * 60.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub open_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    /// Net PnL of closed trades.
    pub total_realized_pnl: f64,
    /// Net PnL of every trade, the open one included.
    pub net_pnl: f64,
    pub total_commission: f64,
    pub final_capital: f64,
    pub total_return_percent: f64,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub sharpe_ratio: f64,
    pub cagr: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub avg_trade_pnl: f64,
    pub median_trade_pnl: f64,
    pub avg_holding_days: f64,
    pub buy_and_hold_return_percent: f64,
}

struct DrawdownInfo {
    max_drawdown: f64,
    max_drawdown_percent: f64,
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate_performance(
        trades: &[MatchedTrade],
        curve: &EquityCurve,
        initial_capital: f64,
        bar_interval: Duration,
    ) -> PerformanceSummary {
        let total_trades = trades.len();
        let open_trades = trades.iter().filter(|trade| trade.is_open()).count();

        let trade_pnls: Vec<f64> = trades.iter().map(|trade| trade.net_pnl).collect();
        let winning_trades = trade_pnls.iter().filter(|pnl| **pnl > 0.0).count();
        let losing_trades = trade_pnls.iter().filter(|pnl| **pnl < 0.0).count();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };

        let total_realized_pnl: f64 = trades
            .iter()
            .filter(|trade| !trade.is_open())
            .map(|trade| trade.net_pnl)
            .sum();
        let net_pnl: f64 = trade_pnls.iter().sum();
        let total_commission: f64 = trades.iter().map(|trade| trade.commission).sum();

        let final_capital = curve
            .final_capital()
            .filter(|value| value.is_finite())
            .unwrap_or(initial_capital + net_pnl);
        let total_return_percent = Self::percent_change(initial_capital, final_capital);
        let buy_and_hold_return_percent = curve
            .buy_and_hold_final()
            .map(|value| Self::percent_change(initial_capital, value))
            .unwrap_or(0.0);

        let cagr = match (curve.points.first(), curve.points.last()) {
            (Some(first), Some(last)) => {
                Self::calculate_cagr(initial_capital, final_capital, first.date, last.date)
            }
            _ => 0.0,
        };
        let sharpe_ratio = Self::calculate_sharpe_ratio(&curve.values(), bar_interval);
        let drawdown_info = Self::calculate_max_drawdown(&curve.values());

        let best_trade = trade_pnls
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let worst_trade = trade_pnls.iter().copied().fold(f64::INFINITY, f64::min);

        let holding_days: Vec<f64> = trades.iter().map(|trade| trade.holding_days()).collect();

        PerformanceSummary {
            total_trades,
            open_trades,
            winning_trades,
            losing_trades,
            win_rate,
            total_realized_pnl,
            net_pnl,
            total_commission,
            final_capital,
            total_return_percent,
            max_drawdown: drawdown_info.max_drawdown,
            max_drawdown_percent: drawdown_info.max_drawdown_percent,
            sharpe_ratio,
            cagr,
            best_trade: if best_trade.is_finite() { best_trade } else { 0.0 },
            worst_trade: if worst_trade.is_finite() { worst_trade } else { 0.0 },
            avg_trade_pnl: Self::average(&trade_pnls),
            median_trade_pnl: Self::median(&trade_pnls),
            avg_holding_days: Self::average(&holding_days),
            buy_and_hold_return_percent,
        }
    }

    fn percent_change(initial: f64, value: f64) -> f64 {
        if initial > 0.0 && value.is_finite() {
            (value / initial - 1.0) * 100.0
        } else {
            0.0
        }
    }

    fn calculate_cagr(
        initial_capital: f64,
        final_capital: f64,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> f64 {
        if initial_capital <= 0.0 || !final_capital.is_finite() || end_date <= start_date {
            return 0.0;
        }

        let years = (end_date - start_date).num_seconds() as f64 / SECONDS_PER_YEAR;
        if years <= 0.0 {
            return 0.0;
        }

        let total_return_ratio = final_capital / initial_capital;
        if total_return_ratio <= 0.0 {
            return -1.0;
        }

        total_return_ratio.powf(1.0 / years) - 1.0
    }

    fn average(values: &[f64]) -> f64 {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            0.0
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        }
    }

    fn median(values: &[f64]) -> f64 {
        let mut filtered: Vec<f64> = values
            .iter()
            .copied()
            .filter(|value| value.is_finite())
            .collect();

        if filtered.is_empty() {
            return 0.0;
        }

        filtered.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let mid = filtered.len() / 2;

        if filtered.len() % 2 == 0 {
            (filtered[mid - 1] + filtered[mid]) / 2.0
        } else {
            filtered[mid]
        }
    }

    /// Annualised per-bar Sharpe ratio of the equity curve, zero risk-free rate.
    pub fn calculate_sharpe_ratio(equity: &[f64], bar_interval: Duration) -> f64 {
        if equity.len() < 3 {
            return 0.0;
        }

        let returns: Vec<f64> = equity
            .windows(2)
            .map(|window| {
                if window[0] > 0.0 {
                    (window[1] - window[0]) / window[0]
                } else {
                    0.0
                }
            })
            .collect();

        let mean_return = returns.clone().mean();
        let std_dev = returns.std_dev();
        if !std_dev.is_finite() || std_dev <= f64::EPSILON {
            return 0.0;
        }

        let interval_seconds = bar_interval.num_seconds().max(1) as f64;
        let periods_per_year = SECONDS_PER_YEAR / interval_seconds;
        mean_return / std_dev * periods_per_year.sqrt()
    }

    fn calculate_max_drawdown(equity: &[f64]) -> DrawdownInfo {
        let mut max_drawdown = 0.0;
        let mut max_drawdown_percent = 0.0;
        let Some(&first) = equity.first() else {
            return DrawdownInfo {
                max_drawdown,
                max_drawdown_percent,
            };
        };

        let mut peak_value = first;
        for &value in equity {
            if value > peak_value {
                peak_value = value;
                continue;
            }
            let drawdown = peak_value - value;
            let drawdown_percent = if peak_value > 0.0 {
                (drawdown / peak_value) * 100.0
            } else {
                0.0
            };
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
            if drawdown_percent > max_drawdown_percent {
                max_drawdown_percent = drawdown_percent;
            }
        }

        DrawdownInfo {
            max_drawdown,
            max_drawdown_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn curve(values: &[f64], start: DateTime<Utc>) -> EquityCurve {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &capital)| EquityPoint {
                date: start + Duration::days(i as i64),
                capital,
            })
            .collect();
        EquityCurve {
            points,
            buy_and_hold: Vec::new(),
        }
    }

    fn closed_trade(net_pnl: f64, days: i64) -> MatchedTrade {
        let entry_date = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        MatchedTrade {
            side: PositionSide::Long,
            entry_date,
            entry_price: 10.0,
            exit_date: entry_date + Duration::days(days),
            exit_price: 10.0,
            quantity: 1.0,
            gross_pnl: net_pnl,
            entry_commission: 0.0,
            exit_commission: 0.0,
            commission: 0.0,
            net_pnl,
            capital_after: 0.0,
            status: TradeStatus::Closed,
        }
    }

    #[test]
    fn calculates_drawdown_from_the_running_peak() {
        let start = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let equity = curve(&[100.0, 120.0, 90.0, 130.0, 117.0], start);
        let summary =
            PerformanceCalculator::calculate_performance(&[], &equity, 100.0, Duration::days(1));
        assert!((summary.max_drawdown - 30.0).abs() < 1e-9);
        assert!((summary.max_drawdown_percent - 25.0).abs() < 1e-9);
        assert!((summary.total_return_percent - 17.0).abs() < 1e-9);
    }

    #[test]
    fn summarises_trade_outcomes() {
        let start = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let mut open = closed_trade(5.0, 4);
        open.status = TradeStatus::Open;
        let trades = vec![
            closed_trade(10.0, 2),
            closed_trade(-4.0, 6),
            closed_trade(20.0, 1),
            open,
        ];
        let equity = curve(&[100.0, 131.0], start);
        let summary =
            PerformanceCalculator::calculate_performance(&trades, &equity, 100.0, Duration::days(1));

        assert_eq!(summary.total_trades, 4);
        assert_eq!(summary.open_trades, 1);
        assert_eq!(summary.winning_trades, 3);
        assert_eq!(summary.losing_trades, 1);
        assert!((summary.win_rate - 0.75).abs() < 1e-9);
        assert!((summary.total_realized_pnl - 26.0).abs() < 1e-9);
        assert!((summary.net_pnl - 31.0).abs() < 1e-9);
        assert_eq!(summary.best_trade, 20.0);
        assert_eq!(summary.worst_trade, -4.0);
        assert!((summary.median_trade_pnl - 7.5).abs() < 1e-9);
        assert!((summary.avg_holding_days - 3.25).abs() < 1e-9);
    }

    #[test]
    fn cagr_uses_curve_dates() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let equity = EquityCurve {
            points: vec![
                EquityPoint {
                    date: start,
                    capital: 100_000.0,
                },
                EquityPoint {
                    date: end,
                    capital: 121_000.0,
                },
            ],
            buy_and_hold: Vec::new(),
        };
        let summary = PerformanceCalculator::calculate_performance(
            &[],
            &equity,
            100_000.0,
            Duration::days(1),
        );
        let years = (end - start).num_seconds() as f64 / SECONDS_PER_YEAR;
        let expected = 1.21_f64.powf(1.0 / years) - 1.0;
        assert!((summary.cagr - expected).abs() < 1e-9);
    }

    #[test]
    fn flat_curve_has_zero_sharpe() {
        let values = vec![100.0; 30];
        assert_eq!(
            PerformanceCalculator::calculate_sharpe_ratio(&values, Duration::days(1)),
            0.0
        );
    }

    #[test]
    fn rising_noisy_curve_has_positive_sharpe() {
        let mut rng = fastrand::Rng::with_seed(3);
        let mut value = 100.0;
        let values: Vec<f64> = (0..200)
            .map(|_| {
                value *= 1.0 + 0.002 + (rng.f64() - 0.5) * 0.002;
                value
            })
            .collect();
        assert!(PerformanceCalculator::calculate_sharpe_ratio(&values, Duration::days(1)) > 0.0);
    }
}
