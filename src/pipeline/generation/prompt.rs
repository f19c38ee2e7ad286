//! Prompt templates for report drafting and case chat.

use crate::models::{render_findings, ChatTurn, Finding, SimilarCase};

/// Marker the report prompt ends with. Output up to and including an
/// echoed marker is discarded.
pub const REPORT_MARKER: &str = "**REPORT:**";

pub const REPORT_SYSTEM_PROMPT: &str =
    "You are an expert radiologist writing a professional chest X-ray report.";

pub const CHAT_SYSTEM_PROMPT: &str = "You are a medical AI assistant helping doctors understand radiology reports.
Answer questions clearly and professionally. Base your responses on medical knowledge and the current case.";

const NO_FINDINGS_TEXT: &str = "No significant abnormalities detected above threshold";
const NO_CASES_TEXT: &str = "No similar historical cases available.";

/// Build the report prompt from findings and retrieved cases.
///
/// Each case is cut to `case_chars` characters.
pub fn build_report_prompt(findings: &[Finding], cases: &[SimilarCase], case_chars: usize) -> String {
    let findings_text = if findings.is_empty() {
        NO_FINDINGS_TEXT.to_string()
    } else {
        render_findings(findings)
    };

    let cases_text = if cases.is_empty() {
        NO_CASES_TEXT.to_string()
    } else {
        cases
            .iter()
            .map(|case| {
                format!(
                    "Case {} (similarity {:.2}):\n{}",
                    case.rank,
                    case.similarity,
                    truncate_chars(&case.report_text, case_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        "**Detected Findings:**
{findings_text}

**Similar Historical Cases:**
{cases_text}

**Task:** Generate a structured radiology report with the following sections:

1. FINDINGS: Describe the observed pathologies in detail
2. IMPRESSION: Provide clinical interpretation
3. RECOMMENDATIONS: Suggest follow-up actions if needed

Write in professional medical language. Be concise but thorough.

{REPORT_MARKER}"
    )
}

/// Strip an echoed prompt: keep only what follows the last report marker.
pub fn extract_report(raw: &str) -> String {
    let body = match raw.rfind(REPORT_MARKER) {
        Some(pos) => &raw[pos + REPORT_MARKER.len()..],
        None => raw,
    };
    body.trim().to_string()
}

/// System prompt for chat, grounded in the case context when one is given.
pub fn build_chat_system(case_context: &str, max_chars: usize) -> String {
    let context = truncate_chars(case_context.trim(), max_chars);
    if context.is_empty() {
        CHAT_SYSTEM_PROMPT.to_string()
    } else {
        format!("{CHAT_SYSTEM_PROMPT}\n\n**Current Case:**\n{context}")
    }
}

/// Conversation prompt: the last `window` turns, then the new question.
pub fn build_chat_prompt(history: &[ChatTurn], message: &str, window: usize) -> String {
    let start = history.len().saturating_sub(window);
    let mut prompt = String::new();
    for turn in &history[start..] {
        prompt.push_str(turn.role.speaker());
        prompt.push_str(": ");
        prompt.push_str(turn.content.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("User: ");
    prompt.push_str(message.trim());
    prompt.push_str("\n\nAssistant:");
    prompt
}

/// Drop a leading speaker label the model may repeat.
pub fn clean_answer(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("Assistant:")
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// First `max_chars` characters, with `...` appended when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(rank: usize, similarity: f32, text: &str) -> SimilarCase {
        SimilarCase {
            rank,
            similarity,
            report_text: text.to_string(),
        }
    }

    #[test]
    fn report_prompt_lists_findings_and_cases() {
        let prompt = build_report_prompt(
            &[Finding::new("Cardiomegaly", 0.85), Finding::new("Edema", 0.72)],
            &[case(1, 0.81, "Findings: Enlarged heart.")],
            500,
        );
        assert!(prompt.contains("Cardiomegaly (85%), Edema (72%)"));
        assert!(prompt.contains("Case 1 (similarity 0.81):\nFindings: Enlarged heart."));
        assert!(prompt.contains("RECOMMENDATIONS"));
        assert!(prompt.ends_with(REPORT_MARKER));
    }

    #[test]
    fn report_prompt_without_findings_or_cases() {
        let prompt = build_report_prompt(&[], &[], 500);
        assert!(prompt.contains(NO_FINDINGS_TEXT));
        assert!(prompt.contains(NO_CASES_TEXT));
    }

    #[test]
    fn long_cases_are_truncated() {
        let long = "x".repeat(900);
        let prompt = build_report_prompt(&[], &[case(1, 0.5, &long)], 500);
        assert!(prompt.contains(&format!("{}...", "x".repeat(500))));
        assert!(!prompt.contains(&"x".repeat(501)));
    }

    #[test]
    fn extract_report_drops_echoed_prompt() {
        let raw = format!("prompt text\n{REPORT_MARKER}\n  FINDINGS: Clear lungs.  ");
        assert_eq!(extract_report(&raw), "FINDINGS: Clear lungs.");
        assert_eq!(extract_report("  IMPRESSION: Normal. "), "IMPRESSION: Normal.");
    }

    #[test]
    fn chat_system_includes_bounded_context() {
        let system = build_chat_system(&"c".repeat(50), 10);
        assert!(system.starts_with(CHAT_SYSTEM_PROMPT));
        assert!(system.ends_with(&format!("**Current Case:**\n{}...", "c".repeat(10))));
        assert_eq!(build_chat_system("   ", 10), CHAT_SYSTEM_PROMPT);
    }

    #[test]
    fn chat_prompt_keeps_last_window_turns() {
        let history: Vec<ChatTurn> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    ChatTurn::user(format!("question {i}"))
                } else {
                    ChatTurn::assistant(format!("answer {i}"))
                }
            })
            .collect();
        let prompt = build_chat_prompt(&history, "What next?", 6);

        assert!(!prompt.contains("question 2\n"));
        assert!(prompt.contains("User: question 4"));
        assert!(prompt.contains("Assistant: answer 9"));
        assert!(prompt.ends_with("User: What next?\n\nAssistant:"));
    }

    #[test]
    fn chat_prompt_with_empty_history() {
        assert_eq!(build_chat_prompt(&[], "Hi", 6), "User: Hi\n\nAssistant:");
    }

    #[test]
    fn clean_answer_strips_speaker_label() {
        assert_eq!(clean_answer(" Assistant: It is mild. "), "It is mild.");
        assert_eq!(clean_answer("Plain."), "Plain.");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("ééé", 2), "éé...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
