//! Milestone scalp exit decisions
//!
//! Pure state machine over successive mcap readings; the async round in
//! `stairs` feeds it polls and executes whatever it decides. Keeping the
//! decisions synchronous makes the ladder/stop behavior testable without
//! a network.

use std::collections::VecDeque;

use crate::config::McapConfig;

/// Why a position is being fully exited
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitReason {
    /// Single poll-to-poll drop reached the instant-drop threshold
    InstantDrop { drop_pct: f64 },
    /// Armed stop-loss level reached from above
    StopLoss,
    /// Top of the ladder reached
    SellAllLevel,
    /// Ceiling for the open-ended ladder reached
    MaxMcap,
    /// Hold-time budget expired
    HoldExpired,
    /// No fresh flow within the idle window
    IdleFlow,
    /// Absolute duration cap reached
    MaxDuration,
}

/// One poll's decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitAction {
    Hold,
    /// Sell this fraction of the remaining bag and keep monitoring
    TakeProfit { level: f64, fraction: f64 },
    /// Sell everything and stop
    ExitAll(ExitReason),
}

/// Milestone scalp state: instant-drop stop, armed stop-loss, an ordered
/// take-profit ladder consumed one level per trigger, and a sell-all top.
#[derive(Debug)]
pub struct MilestoneState {
    levels: VecDeque<(f64, f64)>,
    sell_all_level: f64,
    arm_stop_after: f64,
    stop_loss: f64,
    instant_drop_stop_pct: f64,
    armed: bool,
    last_mcap: Option<f64>,
}

impl MilestoneState {
    pub fn new(config: &McapConfig) -> Self {
        let levels = config
            .tp_levels
            .iter()
            .copied()
            .zip(config.tp_fractions.iter().copied())
            .collect();
        Self {
            levels,
            sell_all_level: config.sell_all_level,
            arm_stop_after: config.arm_stop_after,
            stop_loss: config.stop_loss,
            instant_drop_stop_pct: config.instant_drop_stop_pct,
            armed: false,
            last_mcap: None,
        }
    }

    /// Feed one mcap reading. Zero/negative readings are quote gaps and
    /// decide nothing.
    pub fn observe(&mut self, mcap: f64) -> ExitAction {
        if mcap <= 0.0 {
            return ExitAction::Hold;
        }

        if let Some(last) = self.last_mcap {
            let drop_pct = 100.0 * (last - mcap) / last.max(1e-9);
            if drop_pct >= self.instant_drop_stop_pct {
                return ExitAction::ExitAll(ExitReason::InstantDrop { drop_pct });
            }
        }
        self.last_mcap = Some(mcap);

        if !self.armed && mcap >= self.arm_stop_after {
            self.armed = true;
        }
        if self.armed && mcap <= self.stop_loss {
            return ExitAction::ExitAll(ExitReason::StopLoss);
        }

        // the top level wins outright; no partial sell on the same poll
        if mcap >= self.sell_all_level {
            return ExitAction::ExitAll(ExitReason::SellAllLevel);
        }

        if let Some(&(level, fraction)) = self.levels.front() {
            if mcap >= level {
                self.levels.pop_front();
                return ExitAction::TakeProfit { level, fraction };
            }
        }

        ExitAction::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> McapConfig {
        McapConfig {
            tp_levels: vec![120_000.0, 130_000.0, 140_000.0],
            tp_fractions: vec![0.30, 0.25, 0.20],
            sell_all_level: 160_000.0,
            arm_stop_after: 115_000.0,
            stop_loss: 110_000.0,
            instant_drop_stop_pct: 3.5,
            ..McapConfig::default()
        }
    }

    #[test]
    fn test_ladder_fires_in_order_without_retrigger() {
        let mut state = MilestoneState::new(&config());

        assert_eq!(state.observe(100_000.0), ExitAction::Hold);
        assert_eq!(
            state.observe(121_000.0),
            ExitAction::TakeProfit {
                level: 120_000.0,
                fraction: 0.30
            }
        );
        assert_eq!(
            state.observe(131_000.0),
            ExitAction::TakeProfit {
                level: 130_000.0,
                fraction: 0.25
            }
        );
        // at the top level the remaining bag goes in one full exit
        assert_eq!(
            state.observe(161_000.0),
            ExitAction::ExitAll(ExitReason::SellAllLevel)
        );
    }

    #[test]
    fn test_consumed_level_never_fires_twice() {
        let mut state = MilestoneState::new(&config());
        state.observe(121_000.0);
        // dips back under and recrosses: next level is 130k, not 120k again
        assert_eq!(state.observe(121_500.0), ExitAction::Hold);
        assert_eq!(
            state.observe(130_500.0),
            ExitAction::TakeProfit {
                level: 130_000.0,
                fraction: 0.25
            }
        );
    }

    #[test]
    fn test_instant_drop_triggers_full_exit() {
        let mut state = MilestoneState::new(&config());
        assert_eq!(state.observe(100_000.0), ExitAction::Hold);
        // 7% poll-to-poll drop against a 3.5% threshold
        match state.observe(93_000.0) {
            ExitAction::ExitAll(ExitReason::InstantDrop { drop_pct }) => {
                assert!((drop_pct - 7.0).abs() < 1e-9);
            }
            other => panic!("expected instant drop, got {other:?}"),
        }
    }

    #[test]
    fn test_stop_loss_only_fires_after_arming() {
        let mut state = MilestoneState::new(&config());
        // below stop level but never armed: fine
        assert_eq!(state.observe(109_000.0), ExitAction::Hold);
        // arm above the threshold, then fall through the stop
        state.observe(116_000.0);
        // step down gently so the instant-drop stop stays quiet
        assert_eq!(state.observe(113_000.0), ExitAction::Hold);
        assert_eq!(state.observe(111_000.0), ExitAction::Hold);
        assert_eq!(
            state.observe(110_000.0),
            ExitAction::ExitAll(ExitReason::StopLoss)
        );
    }

    #[test]
    fn test_quote_gap_decides_nothing() {
        let mut state = MilestoneState::new(&config());
        state.observe(100_000.0);
        assert_eq!(state.observe(0.0), ExitAction::Hold);
        // the gap must not count as a 100% drop on the next real reading
        assert_eq!(state.observe(99_000.0), ExitAction::Hold);
    }
}
