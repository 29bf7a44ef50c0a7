//! Probe FSM State Definitions
//!
//! ```text
//! TEMP ──► PENDING ──► COMPLETED | DELAYED | FAILED
//!   └────► SEND_FAILED
//! ```
//!
//! State IDs are stored in PostgreSQL as SMALLINT.

use std::fmt;

/// Probe record states.
/// Terminal: COMPLETED (30), DELAYED (31), FAILED (-10), SEND_FAILED (-20)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ProbeState {
    /// Created at cycle start, dispatch not finished
    Temp = 0,

    /// Submitted; waiting for the chain to report an outcome
    Pending = 10,

    /// Terminal: confirmed within the on-time threshold
    Completed = 30,

    /// Terminal: confirmed, but slower than the on-time threshold
    Delayed = 31,

    /// Terminal: rejected by the chain or stuck in staging
    Failed = -10,

    /// Terminal: could not be submitted
    SendFailed = -20,
}

impl ProbeState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProbeState::Temp | ProbeState::Pending)
    }

    /// Only forward moves along the FSM are legal
    pub fn can_transition_to(&self, next: ProbeState) -> bool {
        matches!(
            (self, next),
            (ProbeState::Temp, ProbeState::Pending)
                | (ProbeState::Temp, ProbeState::SendFailed)
                | (ProbeState::Pending, ProbeState::Completed)
                | (ProbeState::Pending, ProbeState::Delayed)
                | (ProbeState::Pending, ProbeState::Failed)
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ProbeState::Temp),
            10 => Some(ProbeState::Pending),
            30 => Some(ProbeState::Completed),
            31 => Some(ProbeState::Delayed),
            -10 => Some(ProbeState::Failed),
            -20 => Some(ProbeState::SendFailed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeState::Temp => "TEMP",
            ProbeState::Pending => "PENDING",
            ProbeState::Completed => "COMPLETED",
            ProbeState::Delayed => "DELAYED",
            ProbeState::Failed => "FAILED",
            ProbeState::SendFailed => "SEND_FAILED",
        }
    }
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for ProbeState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        ProbeState::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ProbeState; 6] = [
        ProbeState::Temp,
        ProbeState::Pending,
        ProbeState::Completed,
        ProbeState::Delayed,
        ProbeState::Failed,
        ProbeState::SendFailed,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(!ProbeState::Temp.is_terminal());
        assert!(!ProbeState::Pending.is_terminal());
        assert!(ProbeState::Completed.is_terminal());
        assert!(ProbeState::Delayed.is_terminal());
        assert!(ProbeState::Failed.is_terminal());
        assert!(ProbeState::SendFailed.is_terminal());
    }

    #[test]
    fn test_state_id_roundtrip() {
        for state in ALL {
            assert_eq!(ProbeState::from_id(state.id()), Some(state));
        }
        assert_eq!(ProbeState::try_from(99), Err(()));
    }

    #[test]
    fn test_terminal_states_never_transition() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_nothing_reenters_temp_or_pending() {
        for from in ALL {
            assert!(!from.can_transition_to(ProbeState::Temp));
        }
        assert!(!ProbeState::Pending.can_transition_to(ProbeState::Pending));
        assert!(!ProbeState::Temp.can_transition_to(ProbeState::Completed));
    }

    #[test]
    fn test_display() {
        assert_eq!(ProbeState::SendFailed.to_string(), "SEND_FAILED");
    }
}
