//! Guardian verdict protocol.
//!
//! The first byte the guardian writes back on its socket is the verdict for
//! the whole connection:
//!
//! | Byte          | Decision                                   |
//! |---------------|--------------------------------------------|
//! | `0x70` (`p`)  | release the proxee's response stream       |
//! | `0x67` (`g`)  | release the guardian's own response stream |
//! | anything else | protocol violation, connection is dropped  |
//!
//! Early end-of-stream and read errors are treated exactly like an unknown
//! byte. Past this module the raw byte never travels further; everything
//! downstream works with [`GuardianDecision`].

use std::fmt;

/// Verdict byte selecting the proxee response stream.
pub const VERDICT_PASS_TO_PROXEE: u8 = b'p';

/// Verdict byte selecting the guardian response stream.
pub const VERDICT_PASS_TO_GUARDIAN: u8 = b'g';

/// One of the two backends dialed for every client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// The service being protected.
    Proxee,
    /// The policy service that inspects the client's traffic.
    Guardian,
}

impl Backend {
    /// The backend that loses when `self` is selected.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Proxee => Self::Guardian,
            Self::Guardian => Self::Proxee,
        }
    }

    /// Stable lowercase name used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proxee => "proxee",
            Self::Guardian => "guardian",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision taken by the guardian for a connection.
///
/// Set at most once per connection. `Error` is fail-closed: the connection is
/// torn down and nothing further reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianDecision {
    /// Unknown verdict byte, early EOF, or read failure.
    Error,
    /// Forward the proxee's response to the client.
    PassToProxee,
    /// Forward the guardian's response to the client.
    PassToGuardian,
}

impl GuardianDecision {
    /// Map a verdict byte to a decision.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chaperoned::decision::GuardianDecision;
    ///
    /// assert_eq!(GuardianDecision::from_verdict_byte(b'p'), GuardianDecision::PassToProxee);
    /// assert_eq!(GuardianDecision::from_verdict_byte(b'g'), GuardianDecision::PassToGuardian);
    /// assert_eq!(GuardianDecision::from_verdict_byte(b'P'), GuardianDecision::Error);
    /// ```
    #[must_use]
    pub fn from_verdict_byte(byte: u8) -> Self {
        match byte {
            VERDICT_PASS_TO_PROXEE => Self::PassToProxee,
            VERDICT_PASS_TO_GUARDIAN => Self::PassToGuardian,
            _ => Self::Error,
        }
    }

    /// The backend whose response stream reaches the client, if any.
    #[must_use]
    pub fn selected_backend(self) -> Option<Backend> {
        match self {
            Self::Error => None,
            Self::PassToProxee => Some(Backend::Proxee),
            Self::PassToGuardian => Some(Backend::Guardian),
        }
    }
}

impl fmt::Display for GuardianDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::PassToProxee => write!(f, "pass_to_proxee"),
            Self::PassToGuardian => write!(f, "pass_to_guardian"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_verdict_bytes() {
        assert_eq!(
            GuardianDecision::from_verdict_byte(0x70),
            GuardianDecision::PassToProxee
        );
        assert_eq!(
            GuardianDecision::from_verdict_byte(0x67),
            GuardianDecision::PassToGuardian
        );
    }

    /// Every byte other than `p` and `g` fails closed.
    #[test]
    fn test_every_other_byte_is_error() {
        let unknown = (0..=u8::MAX)
            .filter(|b| *b != VERDICT_PASS_TO_PROXEE && *b != VERDICT_PASS_TO_GUARDIAN)
            .filter(|b| GuardianDecision::from_verdict_byte(*b) != GuardianDecision::Error)
            .count();
        assert_eq!(unknown, 0);
    }

    #[test]
    fn test_selected_backend() {
        assert_eq!(GuardianDecision::Error.selected_backend(), None);
        assert_eq!(
            GuardianDecision::PassToProxee.selected_backend(),
            Some(Backend::Proxee)
        );
        assert_eq!(
            GuardianDecision::PassToGuardian.selected_backend(),
            Some(Backend::Guardian)
        );
    }

    #[test]
    fn test_backend_other_and_display() {
        assert_eq!(Backend::Proxee.other(), Backend::Guardian);
        assert_eq!(Backend::Guardian.other(), Backend::Proxee);
        assert_eq!(Backend::Proxee.to_string(), "proxee");
        assert_eq!(GuardianDecision::PassToGuardian.to_string(), "pass_to_guardian");
    }
}
