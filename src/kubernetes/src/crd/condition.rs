use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CONDITION_READY: &str = "Ready";

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_update_time: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_transition_time: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(b: bool) -> Self {
        if b {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Sets the condition of `type` and reports whether anything changed.
/// An entry is rewritten only when its status or message differs.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    r#type: &str,
    status: bool,
    reason: &str,
    message: &str,
) -> bool {
    let status = ConditionStatus::from(status);
    match conditions.iter_mut().find(|c| c.r#type == r#type) {
        Some(c) => {
            if c.status == status && c.message == message {
                return false;
            }
            let ts = now();
            if c.status != status {
                c.last_transition_time = ts.clone();
            }
            c.status = status;
            c.reason = reason.to_string();
            c.message = message.to_string();
            c.last_update_time = ts;
            true
        }
        None => {
            let ts = now();
            conditions.push(Condition {
                r#type: r#type.to_string(),
                status,
                last_update_time: ts.clone(),
                last_transition_time: ts,
                reason: reason.to_string(),
                message: message.to_string(),
            });
            true
        }
    }
}

pub fn is_ready(conditions: &[Condition]) -> bool {
    conditions
        .iter()
        .any(|c| c.r#type == CONDITION_READY && c.status == ConditionStatus::True)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_set_condition() {
        let mut conds = Vec::new();
        assert!(set_condition(&mut conds, CONDITION_READY, false, "Waiting", "no backend"));
        assert!(!is_ready(&conds));
        let transition = conds[0].last_transition_time.clone();

        assert!(!set_condition(&mut conds, CONDITION_READY, false, "Waiting", "no backend"));

        assert!(set_condition(&mut conds, CONDITION_READY, false, "Waiting", "not healthy"));
        assert_eq!(transition, conds[0].last_transition_time);
        assert_eq!("not healthy", conds[0].message);

        assert!(set_condition(&mut conds, CONDITION_READY, true, "", ""));
        assert!(is_ready(&conds));
        assert_eq!(1, conds.len());
    }
}
