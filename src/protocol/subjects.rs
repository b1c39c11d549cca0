//! Subject parsing and construction
//!
//! Subjects are dot-delimited hierarchies such as
//! `dunebugger.starter.dunebugger_set`. The third segment selects the
//! command family and doubles as the reply subject.

use thiserror::Error;

/// Routing key handled by the switch command family
pub const SWITCH_ROUTING_KEY: &str = "dunebugger_set";

/// Routing keys the dispatcher accepts
pub const RECOGNIZED_ROUTING_KEYS: &[&str] = &[SWITCH_ROUTING_KEY];

/// Subject errors
#[derive(Debug, Error, PartialEq)]
pub enum SubjectError {
    #[error("Invalid subject format: '{0}' has fewer than 3 segments")]
    TooFewSegments(String),
}

/// Extract the routing key (segment index 2) from a subject
pub fn routing_key(subject: &str) -> Result<&str, SubjectError> {
    subject
        .split('.')
        .nth(2)
        .ok_or_else(|| SubjectError::TooFewSegments(subject.to_string()))
}

pub fn is_recognized_routing_key(key: &str) -> bool {
    RECOGNIZED_ROUTING_KEYS.contains(&key)
}

/// Build the bus subject for a reply: `{root}.{recipient}.{routing_key}`
pub fn reply_subject(root: &str, recipient: &str, routing_key: &str) -> String {
    format!("{root}.{recipient}.{routing_key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_routing_key_extraction() {
        assert_eq!(
            routing_key("dunebugger.starter.dunebugger_set"),
            Ok("dunebugger_set")
        );
        assert_eq!(routing_key("a.b.c.d"), Ok("c"));
        assert_eq!(routing_key("a.b."), Ok(""));
    }

    #[test]
    fn test_routing_key_too_few_segments() {
        assert!(matches!(
            routing_key("dunebugger.starter"),
            Err(SubjectError::TooFewSegments(_))
        ));
        assert!(routing_key("").is_err());
        assert!(routing_key("single").is_err());
    }

    #[test]
    fn test_recognized_routing_keys() {
        assert!(is_recognized_routing_key("dunebugger_set"));
        assert!(!is_recognized_routing_key("dunebugger_get"));
        assert!(!is_recognized_routing_key("DUNEBUGGER_SET"));
    }

    #[test]
    fn test_reply_subject() {
        assert_eq!(
            reply_subject("dunebugger", "remote", "dunebugger_set"),
            "dunebugger.remote.dunebugger_set"
        );
    }

    proptest! {
        #[test]
        fn prop_routing_key_is_third_segment(
            a in "[a-z_]{1,10}",
            b in "[a-z_]{1,10}",
            c in "[a-z_]{1,10}",
            rest in proptest::collection::vec("[a-z_]{1,10}", 0..3),
        ) {
            let mut subject = format!("{a}.{b}.{c}");
            for segment in &rest {
                subject.push('.');
                subject.push_str(segment);
            }
            prop_assert_eq!(routing_key(&subject), Ok(c.as_str()));
        }

        #[test]
        fn prop_short_subjects_rejected(a in "[a-z_]{0,10}", b in "[a-z_]{0,10}") {
            let subject = format!("{a}.{b}");
            prop_assert!(routing_key(&subject).is_err());
        }
    }
}
