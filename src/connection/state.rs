//! Connection lifecycle states.

use super::error::InvalidTransition;

/// Lifecycle of a client connection.
///
/// `AwaitingConnect -> Connected -> Closing -> Closed`. A rejected handshake
/// goes straight from `AwaitingConnect` to `Closing`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    AwaitingConnect,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::AwaitingConnect | Self::Connected, Self::Closing)
                | (Self::AwaitingConnect, Self::Connected)
                | (Self::Closing, Self::Closed)
        )
    }

    /// Move to `next` if the lifecycle allows it.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] and leaves the state unchanged otherwise.
    pub fn advance(&mut self, next: Self) -> Result<(), InvalidTransition> {
        if !self.can_transition_to(next) {
            return Err(InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    #[must_use]
    pub fn is_terminal(self) -> bool { self == Self::Closed }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::ConnectionState::{self, AwaitingConnect, Closed, Closing, Connected};

    #[rstest]
    #[case(AwaitingConnect, Connected, true)]
    #[case(AwaitingConnect, Closing, true)]
    #[case(Connected, Closing, true)]
    #[case(Closing, Closed, true)]
    #[case(AwaitingConnect, Closed, false)]
    #[case(Connected, AwaitingConnect, false)]
    #[case(Closed, Connected, false)]
    #[case(Connected, Connected, false)]
    fn transitions(#[case] from: ConnectionState, #[case] to: ConnectionState, #[case] ok: bool) {
        let mut state = from;
        assert_eq!(state.advance(to).is_ok(), ok);
        assert_eq!(state, if ok { to } else { from });
    }

    #[rstest]
    fn only_closed_is_terminal() {
        assert!(Closed.is_terminal());
        assert!(!Closing.is_terminal());
    }
}
