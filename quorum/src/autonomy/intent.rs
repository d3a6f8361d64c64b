//! Intent detection for the autonomy pipeline
//!
//! Deliberately permissive: almost any substantive message is treated as
//! actionable, and only near-empty or generic requests trigger a
//! clarifying question. The bias toward triggering follows the source
//! system's product behavior; `word_threshold` is the tunable knob.

use regex::Regex;

/// Phrases that mark a message as conversational rather than actionable
const GREETINGS: &[&str] = &["hello", "hi", "hey", "thanks", "thank you"];

/// Direct command words that trigger on their own
const COMMAND_WORDS: &[&str] = &[
    "poem", "write", "create", "make", "get", "find", "download", "save", "generate", "build",
    "send", "help",
];

/// Requests that are too generic to act on without clarification
const GENERIC_REQUESTS: &[&str] = &["help", "what can you do", "anything", "something"];

/// Tag for a missing essential parameter
pub const MISSING_SPECIFIC_REQUEST: &str = "specific_request";

/// Detection outcome for one request
#[derive(Debug, Clone)]
pub struct IntentReport {
    /// Whether autonomous action should be attempted
    pub actionable: bool,
    /// Missing-parameter tags requiring clarification
    pub missing_params: Vec<String>,
}

/// Heuristic classifier over request text
pub struct IntentDetector {
    patterns: Vec<Regex>,
    /// Messages longer than this many words trigger even without a
    /// matched pattern (unless they read as a greeting)
    word_threshold: usize,
}

impl IntentDetector {
    pub fn new() -> Self {
        let sources = [
            r"\b(write|create|save|download|fetch|generate|build|make|send|fill|get|find|search|open|run|execute|install|setup|configure|fix|update)\b",
            r"\b(to my desktop|to desktop|save to|download to|put on|place in)\b",
            r"\b(from the internet|online|web|website|url|github|stackoverflow)\b",
            r"\b(email|form|document|file|image|video|pdf|txt|json|csv|script|code|program)\b",
            r"\b(poem|story|joke|summary|report|analysis|calculation|formula)\b",
            r"\b(help me|can you|could you|please|i need|i want)\b",
        ];
        let patterns = sources
            .iter()
            .map(|s| Regex::new(s).expect("intent pattern compiles"))
            .collect();
        Self {
            patterns,
            word_threshold: 3,
        }
    }

    /// Detect whether a request needs autonomous action and which
    /// parameters are missing
    pub fn detect(&self, user_input: &str) -> IntentReport {
        let text = user_input.to_ascii_lowercase();

        let has_intent = self.patterns.iter().any(|p| p.is_match(&text));
        let is_direct_command = COMMAND_WORDS.iter().any(|w| text.contains(w));
        let is_greeting = GREETINGS.iter().any(|g| text.contains(g));
        let substantial = text.split_whitespace().count() > self.word_threshold && !is_greeting;

        let actionable = has_intent || is_direct_command || substantial;
        if !actionable {
            return IntentReport {
                actionable: false,
                missing_params: Vec::new(),
            };
        }

        // Only truly vague requests ask for clarification
        let trimmed = user_input.trim();
        let mut missing_params = Vec::new();
        if trimmed.len() < 10 || GENERIC_REQUESTS.contains(&trimmed.to_ascii_lowercase().as_str())
        {
            missing_params.push(MISSING_SPECIFIC_REQUEST.to_string());
        }

        IntentReport {
            actionable: true,
            missing_params,
        }
    }

    /// Clarifying question for the detected missing parameters
    pub fn clarifying_question(&self, missing_params: &[String]) -> String {
        if missing_params.iter().any(|p| p == MISSING_SPECIFIC_REQUEST) {
            return "I'm ready to help! What would you like me to do? I can write files, \
                    create content, download things, or build tools for you."
                .to_string();
        }
        "I can help with that! Could you be a bit more specific about what you'd like me to do?"
            .to_string()
    }
}

impl Default for IntentDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_verbs_trigger() {
        let detector = IntentDetector::new();
        let report = detector.detect("create a skill to add two numbers");
        assert!(report.actionable);
        assert!(report.missing_params.is_empty());
    }

    #[test]
    fn test_greeting_does_not_trigger() {
        let detector = IntentDetector::new();
        assert!(!detector.detect("hello there").actionable);
        assert!(!detector.detect("thanks!").actionable);
    }

    #[test]
    fn test_bare_help_needs_clarification() {
        let detector = IntentDetector::new();
        let report = detector.detect("help");
        assert!(report.actionable);
        assert_eq!(report.missing_params, vec![MISSING_SPECIFIC_REQUEST]);

        let question = detector.clarifying_question(&report.missing_params);
        assert!(question.contains("What would you like me to do"));
    }

    #[test]
    fn test_long_message_triggers_without_patterns() {
        let detector = IntentDetector::new();
        // No action verb, no command word, more than three words
        let report = detector.detect("the quarterly numbers look off in column three");
        assert!(report.actionable);
    }

    #[test]
    fn test_delivery_phrases_trigger() {
        let detector = IntentDetector::new();
        assert!(detector.detect("put a summary on my desktop please").actionable);
    }
}
