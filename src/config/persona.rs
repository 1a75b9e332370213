//! Fixed, user-facing strings of the site owner's chat widget.

/// Synthetic first message shown in every conversation. Never sent to the gateway.
pub const GREETING: &str =
    "Hey! I'm Aarogya. Ask me anything about my work, skills, or background!";

/// Replaces the assistant reply of any turn that failed.
pub const FALLBACK_REPLY: &str =
    "Sorry, I'm having trouble connecting right now. Feel free to reach out via email at aarogya.rijal@gmail.com!";

pub const CONTACT_EMAIL: &str = "aarogya.rijal@gmail.com";

pub const SUGGESTED_QUESTIONS: [&str; 4] = [
    "What's your background?",
    "Tell me about your skills",
    "What startups are you in?",
    "How can I contact you?",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_reply_points_at_contact_email() {
        assert!(FALLBACK_REPLY.contains(CONTACT_EMAIL));
    }
}
