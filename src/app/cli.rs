#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Chat,
    Retry,
    Resume,
    Status,
    Save,
    Activate,
    Deactivate,
    Execute,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "chat" => CliVerb::Chat,
        "retry" => CliVerb::Retry,
        "resume" => CliVerb::Resume,
        "status" => CliVerb::Status,
        "save" => CliVerb::Save,
        "activate" => CliVerb::Activate,
        "deactivate" => CliVerb::Deactivate,
        "execute" | "run" => CliVerb::Execute,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  chat <conversation|new> <message...>  Send a message and handle any authorization or form"
            .to_string(),
        "  retry <conversation>                  Resend the last turn that failed".to_string(),
        "  resume <conversation>                 Reopen the authorization or form the plan waits on"
            .to_string(),
        "  status <conversation>                 Show phase, plan steps and flow state".to_string(),
        "  save <conversation>                   Save the current plan as a flow".to_string(),
        "  activate <conversation>               Turn the saved flow on".to_string(),
        "  deactivate <conversation>             Turn the saved flow off".to_string(),
        "  execute <conversation>                Run the current plan once, saved or not".to_string(),
        "  help                                  Show this help".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}
