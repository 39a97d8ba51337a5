//! Push-to-talk state machine states
//!
//! Idle → Transmitting → Releasing → Idle
//!
//! Transitions happen only inside the transmit callback; signal handlers
//! never touch this state directly.

/// Transmitter keying state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PttState {
    /// Keying line released, no transmit intent
    #[default]
    Idle,

    /// Transmit intent asserted, keying line held
    Transmitting,

    /// Intent dropped; keying line held until the hang timer expires
    Releasing {
        /// Drained periods still to wait before releasing the line
        remaining: u32,
    },
}

impl PttState {
    /// Create a new idle state
    pub fn new() -> Self {
        PttState::Idle
    }

    /// Check if in idle state
    pub fn is_idle(&self) -> bool {
        matches!(self, PttState::Idle)
    }

    /// Check if transmit intent is currently asserted
    pub fn is_transmitting(&self) -> bool {
        matches!(self, PttState::Transmitting)
    }

    /// Check if the hang timer is running
    pub fn is_releasing(&self) -> bool {
        matches!(self, PttState::Releasing { .. })
    }

    /// Whether the keying line should currently be asserted
    pub fn keyed(&self) -> bool {
        !self.is_idle()
    }
}

impl std::fmt::Display for PttState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PttState::Idle => write!(f, "Idle"),
            PttState::Transmitting => write!(f, "Transmitting"),
            PttState::Releasing { remaining } => {
                write!(f, "Releasing ({} periods left)", remaining)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_idle() {
        let state = PttState::new();
        assert!(state.is_idle());
        assert!(!state.keyed());
    }

    #[test]
    fn test_releasing_is_still_keyed() {
        let state = PttState::Releasing { remaining: 2 };
        assert!(state.is_releasing());
        assert!(!state.is_transmitting());
        assert!(state.keyed());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(format!("{}", PttState::Idle), "Idle");
        assert_eq!(format!("{}", PttState::Transmitting), "Transmitting");
        assert_eq!(
            format!("{}", PttState::Releasing { remaining: 3 }),
            "Releasing (3 periods left)"
        );
    }
}
