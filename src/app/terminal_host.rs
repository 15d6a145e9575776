use crate::interaction::oauth::{origin_of, OAUTH_ERROR, OAUTH_SUCCESS};
use crate::interaction::{
    AuthWindow, FieldError, FormOutcome, InteractionHost, MessagePort, OAuthRequirement,
    PopupBlocked, SmartFormSchema, WindowMessage,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stand-in for a browser window: the user reports the result at the prompt.
#[derive(Debug, Default)]
pub struct TerminalWindow {
    closed: AtomicBool,
}

impl AuthWindow for TerminalWindow {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Line-oriented interaction host for the CLI.
pub struct TerminalHost<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> TerminalHost<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn prompt(&mut self, text: &str) -> Option<String> {
        let _ = write!(self.output, "{text}");
        let _ = self.output.flush();
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    fn say(&mut self, text: &str) {
        let _ = writeln!(self.output, "{text}");
    }
}

impl<R: BufRead, W: Write> InteractionHost for TerminalHost<R, W> {
    fn open_authorization_window(
        &mut self,
        url: &str,
        requirement: &OAuthRequirement,
        port: MessagePort,
    ) -> Result<Arc<dyn AuthWindow>, PopupBlocked> {
        let Some(origin) = origin_of(url) else {
            return Err(PopupBlocked {
                reason: format!("cannot open `{url}`"),
            });
        };
        self.say(&format!(
            "Authorize {} ({}) by opening:\n  {url}",
            requirement.label(),
            requirement.auth_type.as_str()
        ));
        let window = Arc::new(TerminalWindow::default());
        let answer = self.prompt("Type y when finished, n if it failed, or press Enter to close: ");
        match answer.as_deref().map(str::trim) {
            Some("y") | Some("Y") => {
                port.post(WindowMessage {
                    origin,
                    data: json!({
                        "type": OAUTH_SUCCESS,
                        "state": port.expected_state(),
                        "provider": requirement.provider,
                    }),
                });
            }
            Some("n") | Some("N") => {
                port.post(WindowMessage {
                    origin,
                    data: json!({
                        "type": OAUTH_ERROR,
                        "state": port.expected_state(),
                        "error": "reported as failed",
                    }),
                });
            }
            _ => window.close(),
        }
        Ok(window)
    }

    fn present_form(&mut self, schema: &SmartFormSchema, errors: &[FieldError]) -> FormOutcome {
        self.say(&format!("\n{}", schema.title));
        if let Some(description) = schema.description.as_deref() {
            self.say(description);
        }
        for error in errors {
            self.say(&format!("  ! {error}"));
        }
        let mut values = BTreeMap::new();
        for field in schema.fields() {
            let mut label = field.display_label().to_string();
            if field.required {
                label.push('*');
            }
            if !field.options.is_empty() {
                label.push_str(&format!(" [{}]", field.options.join("/")));
            }
            let Some(value) = self.prompt(&format!("  {label}: ")) else {
                return FormOutcome::Cancelled;
            };
            if value.trim() == ":cancel" {
                return FormOutcome::Cancelled;
            }
            if !value.trim().is_empty() {
                values.insert(field.name.clone(), value);
            }
        }
        FormOutcome::Submitted(values)
    }
}
