use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const OAUTH_SUCCESS: &str = "OAUTH_SUCCESS";
pub const OAUTH_ERROR: &str = "OAUTH_ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMechanism {
    #[default]
    #[serde(alias = "oauth", alias = "delegated")]
    Oauth2,
    #[serde(alias = "static_secret")]
    ApiKey,
    BotToken,
    #[serde(other)]
    Other,
}

impl AuthMechanism {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Oauth2 => "oauth2",
            Self::ApiKey => "api_key",
            Self::BotToken => "bot_token",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OAuthRequirement {
    pub service_id: String,
    pub provider: String,
    #[serde(default)]
    pub auth_type: AuthMechanism,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl OAuthRequirement {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.provider)
    }
}

pub fn authorization_url(
    initiation_url: &str,
    requirement: &OAuthRequirement,
    conversation_id: &str,
    state: &str,
) -> String {
    let separator = if initiation_url.contains('?') { '&' } else { '?' };
    format!(
        "{initiation_url}{separator}service_id={}&conversation_id={}&auth_type={}&state={}",
        urlencoding::encode(&requirement.service_id),
        urlencoding::encode(conversation_id),
        requirement.auth_type.as_str(),
        urlencoding::encode(state),
    )
}

/// `scheme://host[:port]` of an absolute http(s) url.
pub fn origin_of(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if authority.is_empty() {
        return None;
    }
    Some(format!("{scheme}://{}", authority.to_ascii_lowercase()))
}

pub fn generate_state() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes)?;
    Ok(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
}

/// A detached authorization window owned by the host.
pub trait AuthWindow: Send + Sync {
    fn is_closed(&self) -> bool;
    fn close(&self);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("authorization window was blocked: {reason}")]
pub struct PopupBlocked {
    pub reason: String,
}

/// A message event delivered to the opener.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMessage {
    pub origin: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct OAuthPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Signal {
    Success { provider: Option<String> },
    Failure { reason: String },
    Closed,
}

impl Signal {
    fn into_outcome(self) -> AuthorizationOutcome {
        match self {
            Self::Success { provider } => AuthorizationOutcome::Succeeded { provider },
            Self::Failure { reason } => AuthorizationOutcome::Failed { reason },
            Self::Closed => AuthorizationOutcome::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDelivery {
    Accepted,
    UntrustedOrigin,
    Ignored,
    AlreadySettled,
}

/// Handle the host wires into its message-event listener for one window. Becomes inert
/// once the listener settles.
#[derive(Debug, Clone)]
pub struct MessagePort {
    sender: Sender<Signal>,
    settled: Arc<AtomicBool>,
    allowed_origins: Arc<Vec<String>>,
    expected_state: Arc<String>,
}

impl MessagePort {
    pub fn post(&self, message: WindowMessage) -> PortDelivery {
        if self.settled.load(Ordering::SeqCst) {
            return PortDelivery::AlreadySettled;
        }
        let origin = message.origin.trim_end_matches('/').to_ascii_lowercase();
        if !self
            .allowed_origins
            .iter()
            .any(|allowed| allowed == &origin)
        {
            return PortDelivery::UntrustedOrigin;
        }
        let Ok(payload) = serde_json::from_value::<OAuthPayload>(message.data) else {
            return PortDelivery::Ignored;
        };
        if payload.state.as_deref() != Some(self.expected_state.as_str()) {
            return PortDelivery::Ignored;
        }
        let signal = match payload.kind.as_str() {
            OAUTH_SUCCESS => Signal::Success {
                provider: payload.provider,
            },
            OAUTH_ERROR => Signal::Failure {
                reason: payload
                    .error
                    .unwrap_or_else(|| "authorization was denied".to_string()),
            },
            _ => return PortDelivery::Ignored,
        };
        if !settle(&self.settled) {
            return PortDelivery::AlreadySettled;
        }
        let _ = self.sender.send(signal);
        PortDelivery::Accepted
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    pub fn expected_state(&self) -> &str {
        &self.expected_state
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Succeeded { provider: Option<String> },
    Failed { reason: String },
    Closed,
    TimedOut,
}

/// Waits for exactly one completion signal for a window: a trusted message event or
/// the window being found closed. Whichever settles first wins; the other is torn down.
pub struct OAuthListener {
    receiver: Receiver<Signal>,
    port: MessagePort,
}

impl OAuthListener {
    pub fn new(allowed_origins: &[String], expected_state: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let allowed = allowed_origins
            .iter()
            .map(|origin| origin.trim_end_matches('/').to_ascii_lowercase())
            .collect::<Vec<_>>();
        Self {
            receiver,
            port: MessagePort {
                sender,
                settled: Arc::new(AtomicBool::new(false)),
                allowed_origins: Arc::new(allowed),
                expected_state: Arc::new(expected_state.into()),
            },
        }
    }

    pub fn port(&self) -> MessagePort {
        self.port.clone()
    }

    pub fn wait(
        self,
        window: Arc<dyn AuthWindow>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> AuthorizationOutcome {
        let poller = spawn_close_poller(
            Arc::clone(&window),
            self.port.sender.clone(),
            Arc::clone(&self.port.settled),
            poll_interval,
        );

        let outcome = match self.receiver.recv_timeout(timeout) {
            Ok(signal) => signal.into_outcome(),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                if settle(&self.port.settled) {
                    AuthorizationOutcome::TimedOut
                } else {
                    // Another source settled first and sends right after settling. The
                    // listener still owns a sender, so this cannot disconnect.
                    self.receiver
                        .recv()
                        .map(Signal::into_outcome)
                        .unwrap_or(AuthorizationOutcome::TimedOut)
                }
            }
        };

        self.port.settled.store(true, Ordering::SeqCst);
        let _ = poller.join();
        if !window.is_closed() {
            window.close();
        }
        outcome
    }
}

fn settle(flag: &AtomicBool) -> bool {
    flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

fn spawn_close_poller(
    window: Arc<dyn AuthWindow>,
    sender: Sender<Signal>,
    settled: Arc<AtomicBool>,
    poll_interval: Duration,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        if settled.load(Ordering::SeqCst) {
            return;
        }
        if window.is_closed() {
            if settle(&settled) {
                let _ = sender.send(Signal::Closed);
            }
            return;
        }
        if !sleep_with_stop(&settled, poll_interval) {
            return;
        }
    })
}

fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::from_millis(0) {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(Duration::from_millis(20));
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::SeqCst)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::AuthWindow;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    pub(crate) struct FakeWindow {
        pub(crate) closed: AtomicBool,
        pub(crate) close_calls: AtomicUsize,
    }

    impl AuthWindow for FakeWindow {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::FakeWindow;
    use super::*;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn origins() -> Vec<String> {
        vec!["https://auth.example.com".to_string()]
    }

    fn success(state: &str) -> WindowMessage {
        WindowMessage {
            origin: "https://auth.example.com".to_string(),
            data: json!({"type": OAUTH_SUCCESS, "state": state, "provider": "google"}),
        }
    }

    #[test]
    fn authorization_url_carries_service_and_conversation() {
        let requirement = OAuthRequirement {
            service_id: "gmail".to_string(),
            provider: "google".to_string(),
            auth_type: AuthMechanism::Oauth2,
            display_name: None,
        };
        let url = authorization_url("https://app.example.com/oauth/start", &requirement, "c 1", "abc");
        assert_eq!(
            url,
            "https://app.example.com/oauth/start?service_id=gmail&conversation_id=c%201&auth_type=oauth2&state=abc"
        );
    }

    #[test]
    fn origin_of_strips_path_and_lowercases_host() {
        assert_eq!(
            origin_of("https://Auth.Example.com:8443/cb?x=1").as_deref(),
            Some("https://auth.example.com:8443")
        );
        assert_eq!(origin_of("file:///tmp/x"), None);
    }

    #[test]
    fn untrusted_origin_and_wrong_state_are_not_accepted() {
        let listener = OAuthListener::new(&origins(), "s-1");
        let port = listener.port();
        let forged = WindowMessage {
            origin: "https://evil.example.com".to_string(),
            data: json!({"type": OAUTH_SUCCESS, "state": "s-1"}),
        };
        assert_eq!(port.post(forged), PortDelivery::UntrustedOrigin);
        assert_eq!(port.post(success("other")), PortDelivery::Ignored);
        assert!(!port.is_settled());
    }

    #[test]
    fn message_event_wins_and_closes_window() {
        let listener = OAuthListener::new(&origins(), "s-1");
        let port = listener.port();
        let window = Arc::new(FakeWindow::default());
        assert_eq!(port.post(success("s-1")), PortDelivery::Accepted);

        let outcome = listener.wait(
            window.clone(),
            Duration::from_millis(10),
            Duration::from_secs(2),
        );
        assert_eq!(
            outcome,
            AuthorizationOutcome::Succeeded {
                provider: Some("google".to_string())
            }
        );
        assert_eq!(window.close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(port.post(success("s-1")), PortDelivery::AlreadySettled);
    }

    #[test]
    fn closed_window_settles_once_and_late_message_is_dropped() {
        let listener = OAuthListener::new(&origins(), "s-1");
        let port = listener.port();
        let window = Arc::new(FakeWindow::default());
        window.closed.store(true, Ordering::SeqCst);

        let outcome = listener.wait(
            window.clone(),
            Duration::from_millis(10),
            Duration::from_secs(2),
        );
        assert_eq!(outcome, AuthorizationOutcome::Closed);
        assert_eq!(port.post(success("s-1")), PortDelivery::AlreadySettled);
        assert_eq!(window.close_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn error_message_reports_failure() {
        let listener = OAuthListener::new(&origins(), "s-1");
        let port = listener.port();
        port.post(WindowMessage {
            origin: "https://auth.example.com/".to_string(),
            data: json!({"type": OAUTH_ERROR, "state": "s-1", "error": "access_denied"}),
        });
        let outcome = listener.wait(
            Arc::new(FakeWindow::default()),
            Duration::from_millis(10),
            Duration::from_secs(2),
        );
        assert_eq!(
            outcome,
            AuthorizationOutcome::Failed {
                reason: "access_denied".to_string()
            }
        );
    }

    #[test]
    fn signal_settled_before_timeout_but_sent_after_still_wins() {
        let listener = OAuthListener::new(&origins(), "s-1");
        let port = listener.port();
        assert!(settle(&port.settled));
        let late = thread::spawn(move || {
            thread::sleep(Duration::from_millis(80));
            let _ = port.sender.send(Signal::Success {
                provider: Some("google".to_string()),
            });
        });

        let outcome = listener.wait(
            Arc::new(FakeWindow::default()),
            Duration::from_millis(5),
            Duration::from_millis(10),
        );
        late.join().expect("sender thread");
        assert_eq!(
            outcome,
            AuthorizationOutcome::Succeeded {
                provider: Some("google".to_string())
            }
        );
    }

    #[test]
    fn no_signal_times_out_and_tears_down_poller() {
        let listener = OAuthListener::new(&origins(), "s-1");
        let port = listener.port();
        let window = Arc::new(FakeWindow::default());
        let outcome = listener.wait(
            window.clone(),
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        assert_eq!(outcome, AuthorizationOutcome::TimedOut);
        assert!(port.is_settled());
        assert!(window.is_closed());
    }
}
