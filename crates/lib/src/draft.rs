//! Split a model-written email draft into subject and body.
//!
//! The model is asked to answer with `Betreff:` / `Nachricht:` labels but does not always
//! comply, so the labels are matched loosely (German or English, any case).

use regex::Regex;
use std::sync::OnceLock;

pub const NO_SUBJECT: &str = "No subject";

const SUBJECT_PATTERNS: &[&str] = &[
    r"(?is)Betreff[:\s]+(.+?)(?:\n\n|\nNachricht|$)",
    r"(?is)Subject[:\s]+(.+?)(?:\n\n|\nMessage|$)",
];

const MESSAGE_PATTERNS: &[&str] = &[
    r"(?is)Nachricht[:\s]+\n(.+)",
    r"(?is)Message[:\s]+\n(.+)",
    r"(?is)Inhalt[:\s]+\n(.+)",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub subject: String,
    pub message: String,
}

fn compiled(cell: &'static OnceLock<Vec<Regex>>, patterns: &[&str]) -> &'static [Regex] {
    cell.get_or_init(|| {
        patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::error!("bad draft pattern {}: {}", p, e);
                    None
                }
            })
            .collect()
    })
}

fn subject_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(&CELL, SUBJECT_PATTERNS)
}

fn message_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(&CELL, MESSAGE_PATTERNS)
}

/// Pull subject and message out of an assistant answer. Never fails: an unlabeled answer
/// becomes the message with [`NO_SUBJECT`].
pub fn extract_draft(answer: &str) -> Draft {
    // (subject text, byte offset where the whole subject match ends)
    let subject = subject_patterns().iter().find_map(|re| {
        let caps = re.captures(answer)?;
        let whole = caps.get(0)?;
        Some((caps.get(1)?.as_str().trim().to_string(), whole.end()))
    });
    let message = message_patterns().iter().find_map(|re| {
        re.captures(answer)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    });

    match (subject, message) {
        (Some((subject, _)), Some(message)) => Draft { subject, message },
        (Some((subject, end)), None) => {
            let rest = answer[end..].trim();
            let message = if rest.is_empty() { answer } else { rest };
            Draft {
                subject,
                message: message.to_string(),
            }
        }
        (None, Some(message)) => Draft {
            subject: NO_SUBJECT.to_string(),
            message,
        },
        (None, None) => Draft {
            subject: NO_SUBJECT.to_string(),
            message: answer.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn german_labels() {
        let d = extract_draft("Betreff: Test\n\nNachricht:\nHello world");
        assert_eq!(d.subject, "Test");
        assert_eq!(d.message, "Hello world");
    }

    #[test]
    fn english_labels_any_case() {
        let d = extract_draft("SUBJECT: Meeting next week\nmessage:\nHi Anna,\n\nsee you.\n");
        assert_eq!(d.subject, "Meeting next week");
        assert_eq!(d.message, "Hi Anna,\n\nsee you.");
    }

    #[test]
    fn inhalt_label() {
        let d = extract_draft("Betreff: Angebot\n\nInhalt:\nSehr geehrte Damen und Herren");
        assert_eq!(d.subject, "Angebot");
        assert_eq!(d.message, "Sehr geehrte Damen und Herren");
    }

    #[test]
    fn no_labels_keeps_whole_answer() {
        let answer = "Just some text without structure.";
        let d = extract_draft(answer);
        assert_eq!(d.subject, NO_SUBJECT);
        assert_eq!(d.message, answer);
    }

    #[test]
    fn subject_only_uses_remaining_text() {
        let d = extract_draft("Betreff: Hallo\n\nLiebe Grüße aus Berlin");
        assert_eq!(d.subject, "Hallo");
        assert_eq!(d.message, "Liebe Grüße aus Berlin");
    }

    #[test]
    fn subject_only_without_rest_uses_whole_answer() {
        let d = extract_draft("Betreff: Nur ein Betreff");
        assert_eq!(d.subject, "Nur ein Betreff");
        assert_eq!(d.message, "Betreff: Nur ein Betreff");
    }

    #[test]
    fn message_without_subject() {
        let d = extract_draft("Hier ist der Entwurf.\nNachricht:\nHallo Team");
        assert_eq!(d.subject, NO_SUBJECT);
        assert_eq!(d.message, "Hallo Team");
    }
}
