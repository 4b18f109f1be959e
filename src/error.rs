/// The single error type for all verification outcomes.
///
/// Every fallible `rehearse` API returns `rehearse::Result<T>` (alias for
/// `Result<T, rehearse::Error>`). Two kinds of failure are distinguished:
///
/// - [`Error::Expectations`] aggregates every script failure observed during
///   a verification run (mismatched values, missing values, timeouts,
///   failing consumers). The script keeps running after a failure so that
///   downstream failures surface in the same report.
/// - The remaining variants are usage errors: misuse of the verifier itself.
///   They are raised immediately and are never aggregated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Expectation failure(s):\n - {}", .0.join("\n - "))]
    Expectations(Vec<String>),

    #[error("verifier is not subscribed to a publisher")]
    NotSubscribed,

    #[error("verification already ran; a verifier can only be used once")]
    AlreadyVerified,

    #[error("virtual time is not enabled; call enable_virtual_time() before building the scenario")]
    VirtualTimeDisabled,
}

impl Error {
    /// Returns the individual failure messages when this is an aggregated
    /// expectation failure.
    pub fn failures(&self) -> Option<&[String]> {
        match self {
            Error::Expectations(failures) => Some(failures),
            _ => None,
        }
    }

    /// Returns true for usage errors (misuse of the verifier), as opposed to
    /// aggregated expectation failures.
    pub fn is_usage(&self) -> bool {
        !matches!(self, Error::Expectations(_))
    }
}
