//! Dynamic bag ladder decisions
//!
//! Same instant-drop and armed stop-loss logic as the milestone scalp,
//! but take-profit levels are generated on the fly: starting at a
//! configured USD threshold and stepping by a fixed increment with no
//! upper list. A hard mcap ceiling converts into a full exit.

use crate::config::{DynamicBagConfig, McapConfig};
use crate::engine::milestone::ExitReason;

/// One poll's decision for the dynamic ladder
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LadderAction {
    Hold,
    /// Sell `fraction` of the remaining bag once per crossed level
    LadderSteps { fraction: f64, steps: usize },
    ExitAll(ExitReason),
}

#[derive(Debug)]
pub struct DynamicLadderState {
    next_level: f64,
    step_usd: f64,
    sell_fraction: f64,
    max_usd: f64,
    arm_stop_after: f64,
    stop_loss: f64,
    instant_drop_stop_pct: f64,
    armed: bool,
    last_mcap: Option<f64>,
}

impl DynamicLadderState {
    pub fn new(bag: &DynamicBagConfig, mcap: &McapConfig) -> Self {
        Self {
            next_level: bag.start_usd,
            step_usd: bag.step_usd.max(1.0),
            sell_fraction: bag.sell_fraction,
            max_usd: bag.max_usd,
            arm_stop_after: mcap.arm_stop_after,
            stop_loss: mcap.stop_loss,
            instant_drop_stop_pct: mcap.instant_drop_stop_pct,
            armed: false,
            last_mcap: None,
        }
    }

    pub fn observe(&mut self, mcap: f64) -> LadderAction {
        if mcap <= 0.0 {
            return LadderAction::Hold;
        }

        if let Some(last) = self.last_mcap {
            let drop_pct = 100.0 * (last - mcap) / last.max(1e-9);
            if drop_pct >= self.instant_drop_stop_pct {
                return LadderAction::ExitAll(ExitReason::InstantDrop { drop_pct });
            }
        }
        self.last_mcap = Some(mcap);

        if !self.armed && mcap >= self.arm_stop_after {
            self.armed = true;
        }
        if self.armed && mcap <= self.stop_loss {
            return LadderAction::ExitAll(ExitReason::StopLoss);
        }

        if mcap >= self.max_usd {
            return LadderAction::ExitAll(ExitReason::MaxMcap);
        }

        // a fast move can cross several levels between polls
        let mut steps = 0usize;
        while mcap >= self.next_level {
            steps += 1;
            self.next_level += self.step_usd;
        }
        if steps > 0 {
            return LadderAction::LadderSteps {
                fraction: self.sell_fraction,
                steps,
            };
        }

        LadderAction::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states() -> DynamicLadderState {
        let bag = DynamicBagConfig {
            enabled: true,
            start_usd: 120_000.0,
            step_usd: 10_000.0,
            sell_fraction: 0.10,
            max_usd: 2_000_000.0,
            idle_timeout_seconds: 10.0,
            max_duration_seconds: 600.0,
        };
        let mcap = McapConfig {
            arm_stop_after: 115_000.0,
            stop_loss: 110_000.0,
            instant_drop_stop_pct: 3.5,
            ..McapConfig::default()
        };
        DynamicLadderState::new(&bag, &mcap)
    }

    #[test]
    fn test_levels_step_indefinitely() {
        let mut state = states();
        assert_eq!(state.observe(100_000.0), LadderAction::Hold);
        assert_eq!(
            state.observe(121_000.0),
            LadderAction::LadderSteps {
                fraction: 0.10,
                steps: 1
            }
        );
        // next level is now 130k; 125k does nothing
        assert_eq!(state.observe(123_000.0), LadderAction::Hold);
        assert_eq!(
            state.observe(126_000.0),
            LadderAction::Hold
        );
    }

    #[test]
    fn test_fast_move_crosses_multiple_levels() {
        let mut state = states();
        state.observe(119_000.0);
        // 119k -> 121k -> jump past 130k and 140k in one poll
        state.observe(121_000.0);
        assert_eq!(
            state.observe(142_000.0),
            LadderAction::LadderSteps {
                fraction: 0.10,
                steps: 2
            }
        );
    }

    #[test]
    fn test_ceiling_exits_everything() {
        let mut state = states();
        // a gentle climb first so the instant-drop logic is exercised too
        assert_eq!(
            state.observe(2_100_000.0),
            LadderAction::ExitAll(ExitReason::MaxMcap)
        );
    }

    #[test]
    fn test_armed_stop_loss() {
        let mut state = states();
        state.observe(116_000.0);
        state.observe(113_000.0);
        assert_eq!(
            state.observe(110_000.0),
            LadderAction::ExitAll(ExitReason::StopLoss)
        );
    }
}
