//! Template-based reply text: the first-contact greeting, the HELP
//! response, and the STOP acknowledgement.
//!
//! These are the guaranteed fallback when no AI composer is configured,
//! or when the composer times out.

/// Default first-reply greeting when the tenant has not configured one.
pub fn default_greeting(business_name: &str) -> String {
    format!("Hi, this is {business_name}! Sorry we missed you. Reply here and we'll help you get booked in.")
}

/// Default HELP response.
pub fn default_help(business_name: &str, support_phone: &str) -> String {
    format!("{business_name}: for help, call {support_phone}. Reply STOP to stop receiving texts.")
}

/// Default STOP acknowledgement, sent once before the conversation
/// closes (carriers generally require a confirmation reply to STOP).
pub fn default_stop_ack(business_name: &str) -> String {
    format!("{business_name}: you have been unsubscribed and will not receive further messages.")
}

/// Case-insensitive, punctuation-trimmed match against the STOP keyword
/// set carriers require honoring.
pub fn is_stop_keyword(body: &str) -> bool {
    matches!(
        normalize(body).as_str(),
        "stop" | "stopall" | "unsubscribe" | "cancel" | "end" | "quit"
    )
}

/// Case-insensitive, punctuation-trimmed match against the HELP keyword.
pub fn is_help_keyword(body: &str) -> bool {
    matches!(normalize(body).as_str(), "help" | "info")
}

fn normalize(body: &str) -> String {
    body.trim()
    .trim_matches(|c: char| c.is_ascii_punctuation())
    .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_matches_regardless_of_case_and_punctuation() {
        for s in ["STOP", "stop", "Stop.", " STOP ", "STOP!"] {
            assert!(is_stop_keyword(s), "expected {s:?} to match STOP");
        }
    }

    #[test]
    fn help_matches_common_variants() {
        assert!(is_help_keyword("HELP"));
        assert!(is_help_keyword("help?"));
        assert!(is_help_keyword("Info"));
    }

    #[test]
    fn ordinary_messages_do_not_match_keywords() {
        assert!(!is_stop_keyword("I'd like to book a haircut"));
        assert!(!is_help_keyword("I'd like to book a haircut"));
    }
}
