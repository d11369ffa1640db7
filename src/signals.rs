use crate::config::BacktestConfig;
use crate::data::PriceSeries;
use crate::extrema::Extrema;
use crate::models::{ExtremaKind, ExtremaPoint, SignalAction, SignalEvent};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PositionState {
    Flat,
    Long,
    Short,
}

/// Turns detected extrema into one chronological stream of signal events.
///
/// Support while flat buys and resistance while long sells. With short
/// selling enabled, resistance while flat shorts and support while short
/// covers. Every other extremum is kept as a `None` event.
pub struct SignalAssigner;

impl SignalAssigner {
    pub fn assign(
        extrema: &Extrema,
        series: &PriceSeries,
        trade_window: usize,
        config: &BacktestConfig,
    ) -> Vec<SignalEvent> {
        let bars = series.bars();
        let mut state = PositionState::Flat;
        let mut events = Vec::new();

        // Extrema indices are strictly increasing, so execution indices are too.
        for point in extrema.merged() {
            let action = Self::decide(state, point, config.allow_short_selling);

            let Some(execution_index) = point
                .index
                .checked_add(trade_window)
                .filter(|index| *index < bars.len())
            else {
                debug!(
                    "Dropping {} {} detected {}: no bar {} bars later",
                    point.kind.as_str(),
                    action.as_str(),
                    point.date.to_rfc3339(),
                    trade_window
                );
                continue;
            };

            if action.is_actionable() {
                state = Self::next_state(state, action);
            }

            let execution_bar = &bars[execution_index];
            events.push(SignalEvent {
                detected_date: point.date,
                detected_index: point.index,
                execution_date: execution_bar.date,
                execution_index,
                kind: point.kind,
                action,
                execution_price: config.trade_on.price(execution_bar),
            });
        }

        debug!(
            "Assigned {} signal events ({} actionable)",
            events.len(),
            events.iter().filter(|e| e.action.is_actionable()).count()
        );
        events
    }

    fn decide(state: PositionState, point: &ExtremaPoint, allow_short_selling: bool) -> SignalAction {
        match (state, point.kind) {
            (PositionState::Flat, ExtremaKind::Support) => SignalAction::Buy,
            (PositionState::Long, ExtremaKind::Resistance) => SignalAction::Sell,
            (PositionState::Flat, ExtremaKind::Resistance) if allow_short_selling => {
                SignalAction::Short
            }
            (PositionState::Short, ExtremaKind::Support) => SignalAction::Cover,
            _ => SignalAction::None,
        }
    }

    fn next_state(state: PositionState, action: SignalAction) -> PositionState {
        match action {
            SignalAction::Buy => PositionState::Long,
            SignalAction::Short => PositionState::Short,
            SignalAction::Sell | SignalAction::Cover => PositionState::Flat,
            SignalAction::None => state,
        }
    }
}
