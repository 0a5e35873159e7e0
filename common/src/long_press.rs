//! Reset button long-press handling.
//!
//! Polled once per control-loop iteration with the debounced button level and
//! a monotonic timestamp; it never waits for the button itself.
//!
//! - release before `config_hold_ms`: nothing happens
//! - release between `config_hold_ms` and `reset_hold_ms`: enter config portal
//! - still held at `reset_hold_ms`: factory reset, fired without waiting for
//!   release

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressPhase {
    Idle,
    Pressed { start_ms: u64 },
    /// Held past the config threshold; releasing now opens the portal.
    ConfigTriggered { start_ms: u64 },
    /// Reset has fired; waits for the release before going idle again.
    ResetTriggered,
}

impl PressPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Pressed { .. } => "PRESSED",
            Self::ConfigTriggered { .. } => "CONFIG_TRIGGERED",
            Self::ResetTriggered => "RESET_TRIGGERED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressAction {
    EnterConfigPortal,
    FactoryReset,
}

#[derive(Debug, Clone)]
pub struct LongPress {
    config_hold_ms: u64,
    reset_hold_ms: u64,
    phase: PressPhase,
}

impl LongPress {
    pub fn new(config_hold_ms: u64, reset_hold_ms: u64) -> Self {
        Self {
            config_hold_ms,
            reset_hold_ms: reset_hold_ms.max(config_hold_ms),
            phase: PressPhase::Idle,
        }
    }

    pub fn phase(&self) -> PressPhase {
        self.phase
    }

    pub fn poll(&mut self, held: bool, now_ms: u64) -> Option<PressAction> {
        match (self.phase, held) {
            (PressPhase::Idle, false) => None,
            (PressPhase::Idle, true) => {
                self.phase = PressPhase::Pressed { start_ms: now_ms };
                self.check_hold(now_ms)
            }
            (PressPhase::Pressed { .. } | PressPhase::ConfigTriggered { .. }, true) => {
                self.check_hold(now_ms)
            }
            (PressPhase::Pressed { .. }, false) => {
                self.phase = PressPhase::Idle;
                None
            }
            // Reset only fires on a held poll, so a release seen here is
            // always a config hold even if it is observed late.
            (PressPhase::ConfigTriggered { .. }, false) => {
                self.phase = PressPhase::Idle;
                Some(PressAction::EnterConfigPortal)
            }
            (PressPhase::ResetTriggered, true) => None,
            (PressPhase::ResetTriggered, false) => {
                self.phase = PressPhase::Idle;
                None
            }
        }
    }

    fn check_hold(&mut self, now_ms: u64) -> Option<PressAction> {
        let start_ms = match self.phase {
            PressPhase::Pressed { start_ms } | PressPhase::ConfigTriggered { start_ms } => start_ms,
            _ => return None,
        };
        let elapsed = now_ms.saturating_sub(start_ms);

        if elapsed >= self.reset_hold_ms {
            self.phase = PressPhase::ResetTriggered;
            return Some(PressAction::FactoryReset);
        }
        if elapsed >= self.config_hold_ms {
            self.phase = PressPhase::ConfigTriggered { start_ms };
        }
        None
    }
}
