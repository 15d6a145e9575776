use serde::{Deserialize, Deserializer, Serialize};

pub fn validate_identifier_value(kind: &str, value: &str) -> Result<(), String> {
    validate_with_extra(kind, value, &['-', '_'])
}

pub fn validate_capability_value(kind: &str, value: &str) -> Result<(), String> {
    validate_with_extra(kind, value, &['-', '_', '.', ':'])
}

fn validate_with_extra(kind: &str, value: &str, extra: &[char]) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || extra.contains(&ch))
    {
        return Ok(());
    }
    let allowed = extra
        .iter()
        .map(|ch| format!("'{ch}'"))
        .collect::<Vec<_>>()
        .join(", ");
    Err(format!(
        "{kind} must use only ASCII letters, digits or {allowed}"
    ))
}

macro_rules! define_id_type {
    ($name:ident, $kind:literal, $validate:path) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, String> {
                $validate($kind, raw)?;
                Ok(Self(raw.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                crate::shared::serde_ext::parse_via_string(deserializer, $kind, Self::parse)
            }
        }
    };
}

define_id_type!(ConversationId, "conversation id", validate_identifier_value);
define_id_type!(FlowId, "flow id", validate_identifier_value);
define_id_type!(NodeId, "node id", validate_capability_value);
define_id_type!(ActionId, "action id", validate_capability_value);
