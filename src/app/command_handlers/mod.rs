use crate::api::PlannerApi;
use crate::app::cli::{help_text, parse_cli_verb, CliVerb};
use crate::app::command_support::{load_settings, open_http_session};
use crate::app::terminal_host::TerminalHost;
use crate::interaction::InteractionHost;
use crate::orchestrator::WorkflowSession;
use std::io;

pub mod chat;
pub mod lifecycle;
pub mod status;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }
    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Help => return Ok(help_text()),
        CliVerb::Unknown => return Err(format!("unknown command `{}`", args[0])),
        _ => {}
    }
    let settings = load_settings()?;
    let mut session = open_http_session(&settings)?;
    let stdin = io::stdin();
    let mut host = TerminalHost::new(stdin.lock(), io::stdout());
    run_with_session(&mut session, &args, &mut host)
}

/// Dispatches a parsed command line against an already constructed session.
pub fn run_with_session<A: PlannerApi>(
    session: &mut WorkflowSession<A>,
    args: &[String],
    host: &mut dyn InteractionHost,
) -> Result<String, String> {
    let Some(verb) = args.first() else {
        return Ok(help_text());
    };
    let rest = &args[1..];
    match parse_cli_verb(verb) {
        CliVerb::Chat => chat::cmd_chat(session, rest, host),
        CliVerb::Retry => chat::cmd_retry(session, rest, host),
        CliVerb::Resume => chat::cmd_resume(session, rest, host),
        CliVerb::Status => status::cmd_status(session, rest),
        CliVerb::Save => lifecycle::cmd_save(session, rest),
        CliVerb::Activate => lifecycle::cmd_set_active(session, rest, true),
        CliVerb::Deactivate => lifecycle::cmd_set_active(session, rest, false),
        CliVerb::Execute => lifecycle::cmd_execute(session, rest),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{verb}`")),
    }
}
