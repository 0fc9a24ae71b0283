use std::sync::Arc;

use thiserror::Error;

use crate::auth::HandshakeStep;

/// Failure of a single HTTP exchange with the portal.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: Arc<reqwest::Error>,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Everything the authentication layer and the resource fetchers can report.
///
/// The type is `Clone` because a single handshake outcome is handed to every
/// caller that queued behind it.
#[derive(Debug, Clone, Error)]
pub enum PortalError {
    #[error("{}", invalid_credentials_message(.incorrect_count))]
    InvalidCredentials { incorrect_count: Option<u32> },

    #[error("로그인 상태를 확인해주세요. (session expired)")]
    SessionExpired,

    #[error("login step `{step}` failed: {reason}")]
    HandshakeStepFailed {
        step: HandshakeStep,
        reason: String,
        #[source]
        cause: Option<TransportError>,
    },

    #[error("expected content not found: {0}")]
    ExtractionFailed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PortalError {
    pub(crate) fn extraction(what: impl Into<String>) -> Self {
        PortalError::ExtractionFailed(what.into())
    }

    /// Whether the failure looks like the portal dropped our session: the page
    /// came back without the anchor the caller was looking for.
    pub fn indicates_logged_out(&self) -> bool {
        matches!(
            self,
            PortalError::SessionExpired | PortalError::ExtractionFailed(_)
        )
    }
}

fn invalid_credentials_message(incorrect_count: &Option<u32>) -> String {
    let mut message = "로그인에 실패하였습니다. 아이디와 패스워드를 확인해주세요.".to_string();
    if let Some(count) = incorrect_count {
        message.push_str(&format!(" 누적 실패 횟수: {count}"));
    }
    message
}

/// Concurrency-control signals from the fetchable store. These are never shown
/// to the user; they tell the caller its fetch was a duplicate or arrived late.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("a fetch for `{0}` is already in flight")]
    AlreadyPending(String),

    #[error("ticket for `{0}` was superseded")]
    StaleTicket(String),
}

/// Outcome of driving one fetch through the store.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Portal(#[from] PortalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_credentials_message_carries_counter_when_known() {
        let with_count = PortalError::InvalidCredentials {
            incorrect_count: Some(3),
        };
        assert!(with_count.to_string().ends_with("누적 실패 횟수: 3"));

        let without = PortalError::InvalidCredentials {
            incorrect_count: None,
        };
        assert!(!without.to_string().contains("누적"));
    }

    #[test]
    fn only_missing_markers_count_as_logged_out() {
        assert!(PortalError::SessionExpired.indicates_logged_out());
        assert!(PortalError::extraction("course table").indicates_logged_out());
        let status = PortalError::Transport(TransportError::Status {
            url: "https://door.deu.ac.kr/MyPage".into(),
            status: 500,
        });
        assert!(!status.indicates_logged_out());
    }
}
