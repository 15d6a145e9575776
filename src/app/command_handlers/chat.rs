use crate::api::PlannerApi;
use crate::app::command_support::{
    enter_target, map_session_err, parse_conversation, render_footer, render_message,
};
use crate::interaction::InteractionHost;
use crate::orchestrator::{DriveReport, WorkflowSession};

pub fn cmd_chat<A: PlannerApi>(
    session: &mut WorkflowSession<A>,
    args: &[String],
    host: &mut dyn InteractionHost,
) -> Result<String, String> {
    if args.len() < 2 {
        return Err("usage: chat <conversation|new> <message...>".to_string());
    }
    let mut lines = enter_target(session, &args[0])?;
    let seen = session.messages().len();
    let text = args[1..].join(" ");
    let sent = session.send_user_message(&text);
    if let Err(err) = sent {
        lines.extend(new_messages(session, seen));
        lines.push(format!("error: {}", map_session_err(err)));
        lines.extend(render_footer(session));
        return Ok(lines.join("\n"));
    }
    let report = session.drive_interactions(host);
    lines.extend(new_messages(session, seen));
    lines.extend(drive_summary(&report));
    lines.extend(render_footer(session));
    Ok(lines.join("\n"))
}

pub fn cmd_retry<A: PlannerApi>(
    session: &mut WorkflowSession<A>,
    args: &[String],
    host: &mut dyn InteractionHost,
) -> Result<String, String> {
    let [target] = args else {
        return Err("usage: retry <conversation>".to_string());
    };
    let conversation_id = parse_conversation(target)?;
    let mut lines = enter_target(session, conversation_id.as_str())?;
    let seen = session.messages().len();
    session.retry_last_turn().map_err(map_session_err)?;
    let report = session.drive_interactions(host);
    lines.extend(new_messages(session, seen));
    lines.extend(drive_summary(&report));
    lines.extend(render_footer(session));
    Ok(lines.join("\n"))
}

pub fn cmd_resume<A: PlannerApi>(
    session: &mut WorkflowSession<A>,
    args: &[String],
    host: &mut dyn InteractionHost,
) -> Result<String, String> {
    let [target] = args else {
        return Err("usage: resume <conversation>".to_string());
    };
    let conversation_id = parse_conversation(target)?;
    let mut lines = enter_target(session, conversation_id.as_str())?;
    let seen = session.messages().len();
    let observed = session.resume_pending_interaction();
    if observed.queued.is_empty() {
        lines.push("nothing is waiting for input".to_string());
        lines.extend(render_footer(session));
        return Ok(lines.join("\n"));
    }
    let report = session.drive_interactions(host);
    lines.extend(new_messages(session, seen));
    lines.extend(drive_summary(&report));
    lines.extend(render_footer(session));
    Ok(lines.join("\n"))
}

fn new_messages<A: PlannerApi>(session: &WorkflowSession<A>, seen: usize) -> Vec<String> {
    session
        .messages()
        .iter()
        .skip(seen)
        .filter_map(render_message)
        .collect()
}

fn drive_summary(report: &DriveReport) -> Vec<String> {
    match report.failed.as_ref() {
        Some(notice) if notice.retryable => {
            vec!["the conversation could not be resumed; use `retry` to resend".to_string()]
        }
        Some(_) => vec!["the conversation could not be resumed".to_string()],
        None => Vec::new(),
    }
}
