/// Transport-level close signal as seen by a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseSignal {
    /// The transport is re-establishing the connection by itself.
    Reconnecting,
    /// The transport gave up and will not retry on its own.
    Terminal,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// The stream delivered its payload and then ended.
    GracefulCompletion,
    /// Closed before any payload. Expired credential, unknown task and
    /// server fault all look like this on the wire and are not told apart.
    AuthOrResourceFailure,
    /// Network blip handled by the transport.
    TransientIgnored,
}

/// Classifies a close signal given whether any payload event arrived.
pub fn classify(signal: CloseSignal, has_received_payload: bool) -> FailureClass {
    match (signal, has_received_payload) {
        (CloseSignal::Reconnecting, _) => FailureClass::TransientIgnored,
        (CloseSignal::Terminal, true) => FailureClass::GracefulCompletion,
        (CloseSignal::Terminal, false) => FailureClass::AuthOrResourceFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::{classify, CloseSignal, FailureClass};

    #[test]
    fn reconnecting_is_always_ignored() {
        assert_eq!(
            classify(CloseSignal::Reconnecting, false),
            FailureClass::TransientIgnored
        );
        assert_eq!(
            classify(CloseSignal::Reconnecting, true),
            FailureClass::TransientIgnored
        );
    }

    #[test]
    fn terminal_close_depends_on_payload() {
        assert_eq!(
            classify(CloseSignal::Terminal, true),
            FailureClass::GracefulCompletion
        );
        assert_eq!(
            classify(CloseSignal::Terminal, false),
            FailureClass::AuthOrResourceFailure
        );
    }
}
