//! Transfer Saga State Definitions
//!
//! ```text
//! STARTED → CREDIT_DISPATCHED → COMPLETED
//!                  ↓
//!            COMPENSATING → COMPENSATED
//! ```
//!
//! State IDs are stored as SMALLINT. Terminal: COMPLETED (30), COMPENSATED (-20).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum SagaState {
    /// Debit observed, saga recorded
    Started = 0,

    /// Forward credit sent to the target (persist-before-call)
    /// Funds are IN-FLIGHT until COMPLETED or COMPENSATED
    CreditDispatched = 10,

    /// Terminal: target credited
    Completed = 30,

    /// Forward credit explicitly failed, refund of the source in progress
    Compensating = -10,

    /// Terminal: source refunded
    Compensated = -20,
}

impl SagaState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Compensated)
    }

    /// Source debited but neither credit nor refund confirmed
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SagaState::Started | SagaState::CreditDispatched | SagaState::Compensating
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SagaState::Started),
            10 => Some(SagaState::CreditDispatched),
            30 => Some(SagaState::Completed),
            -10 => Some(SagaState::Compensating),
            -20 => Some(SagaState::Compensated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Started => "STARTED",
            SagaState::CreditDispatched => "CREDIT_DISPATCHED",
            SagaState::Completed => "COMPLETED",
            SagaState::Compensating => "COMPENSATING",
            SagaState::Compensated => "COMPENSATED",
        }
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for SagaState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        SagaState::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SagaState::Completed.is_terminal());
        assert!(SagaState::Compensated.is_terminal());

        assert!(!SagaState::Started.is_terminal());
        assert!(!SagaState::CreditDispatched.is_terminal());
        assert!(!SagaState::Compensating.is_terminal());
    }

    #[test]
    fn test_in_flight_states() {
        assert!(SagaState::Started.is_in_flight());
        assert!(SagaState::CreditDispatched.is_in_flight());
        assert!(SagaState::Compensating.is_in_flight());

        assert!(!SagaState::Completed.is_in_flight());
        assert!(!SagaState::Compensated.is_in_flight());
    }

    #[test]
    fn test_state_id_roundtrip() {
        for state in [
            SagaState::Started,
            SagaState::CreditDispatched,
            SagaState::Completed,
            SagaState::Compensating,
            SagaState::Compensated,
        ] {
            assert_eq!(SagaState::try_from(state.id()), Ok(state));
        }
        assert!(SagaState::from_id(999).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(SagaState::CreditDispatched.to_string(), "CREDIT_DISPATCHED");
        assert_eq!(SagaState::Compensated.to_string(), "COMPENSATED");
    }
}
