//! Email composition through the chat agent: a validated form becomes a drafting prompt,
//! the reply is split into subject and body, and an approved draft becomes a send prompt.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::api::{ApiError, ChatBackend, ChatRequest};
use crate::draft::{extract_draft, Draft};

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Formality {
    Formal,
    Informal,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Length {
    Short,
    #[default]
    Medium,
    Long,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Greeting {
    Formal,
    Informal,
    #[default]
    Standard,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StyleOptions {
    pub formality: Formality,
    pub length: Length,
    pub greeting: Greeting,
}

impl StyleOptions {
    /// Prompt lines for every option that differs from the default.
    fn instructions(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        match self.formality {
            Formality::Formal => out.push("Stil: formell und professionell"),
            Formality::Informal => out.push("Stil: informell und freundlich"),
            Formality::Neutral => {}
        }
        match self.length {
            Length::Short => out.push("Länge: kurz und prägnant"),
            Length::Long => out.push("Länge: ausführlich und detailliert"),
            Length::Medium => {}
        }
        match self.greeting {
            Greeting::Formal => out.push("Anredeform: formelle Anrede (z.B. \"Sehr geehrte/r\")"),
            Greeting::Informal => {
                out.push("Anredeform: informelle Anrede (z.B. \"Hallo\" oder \"Liebe/r\")")
            }
            Greeting::None => out.push("Anredeform: keine Anrede"),
            Greeting::Standard => {}
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    SenderEmail,
    RecipientEmail,
    Keywords,
    Cc,
    Bcc,
}

/// Validation messages keyed by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(pub BTreeMap<Field, &'static str>);

impl FieldErrors {
    pub fn get(&self, field: Field) -> Option<&'static str> {
        self.0.get(&field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, msg)| format!("{:?}: {}", field, msg))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("invalid form: {0}")]
    Invalid(FieldErrors),
    #[error("subject and message must not be empty")]
    EmptyDraft,
    #[error("an email request is already running")]
    Busy,
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailForm {
    pub sender_email: String,
    pub recipient_email: String,
    pub keywords: String,
    pub cc: String,
    pub bcc: String,
    pub style: StyleOptions,
}

fn email_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(EMAIL_PATTERN).ok()).as_ref()
}

/// Single address check.
pub fn validate_email(email: &str) -> bool {
    let email = email.trim();
    !email.is_empty() && email_regex().is_some_and(|re| re.is_match(email))
}

/// Comma-separated list. Empty (or only separators) is valid.
pub fn validate_email_list(emails: &str) -> bool {
    emails
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .all(validate_email)
}

/// Flatten user input onto one line so it cannot inject prompt structure.
fn sanitize(input: &str) -> String {
    input.replace(['\n', '\r'], " ").trim().to_string()
}

const INVALID_ADDRESS: &str = "Ungültige E-Mail-Adresse";
const INVALID_LIST: &str = "Ungültige E-Mail-Adresse(n). Trenne mehrere Adressen mit Komma.";

impl EmailForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = self.address_errors();
        if self.keywords.trim().is_empty() {
            errors.insert(Field::Keywords, "Stichworte sind erforderlich");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(FieldErrors(errors))
        }
    }

    /// Sender, recipient and copy checks. Keywords only matter for drafting.
    fn address_errors(&self) -> BTreeMap<Field, &'static str> {
        let mut errors = BTreeMap::new();
        if self.sender_email.trim().is_empty() {
            errors.insert(Field::SenderEmail, "Absender-E-Mail ist erforderlich");
        } else if !validate_email(&self.sender_email) {
            errors.insert(Field::SenderEmail, INVALID_ADDRESS);
        }
        if self.recipient_email.trim().is_empty() {
            errors.insert(Field::RecipientEmail, "Empfänger-E-Mail ist erforderlich");
        } else if !validate_email(&self.recipient_email) {
            errors.insert(Field::RecipientEmail, INVALID_ADDRESS);
        }
        if !validate_email_list(&self.cc) {
            errors.insert(Field::Cc, INVALID_LIST);
        }
        if !validate_email_list(&self.bcc) {
            errors.insert(Field::Bcc, INVALID_LIST);
        }
        errors
    }

    fn copy_lines(&self) -> String {
        let mut out = String::new();
        if !self.cc.is_empty() {
            out.push_str(&format!("\n- CC: {}", sanitize(&self.cc)));
        }
        if !self.bcc.is_empty() {
            out.push_str(&format!("\n- BCC: {}", sanitize(&self.bcc)));
        }
        out
    }

    /// Prompt asking the agent for a plain-text draft in `Betreff:` / `Nachricht:` form.
    pub fn draft_prompt(&self) -> String {
        let style = self.style.instructions();
        let style_text = if style.is_empty() {
            String::new()
        } else {
            let lines: Vec<String> = style.iter().map(|s| format!("- {}", s)).collect();
            format!("\n\nStil-Anforderungen:\n{}", lines.join("\n"))
        };
        format!(
            "Bitte generiere einen professionellen E-Mail-Entwurf mit folgenden Informationen:\n\
             - Absender: {}\n\
             - Empfänger: {}\n\
             - Stichworte/Thema: {}{}{}\n\n\
             Generiere basierend auf den Stichworten und den Stil-Anforderungen einen passenden Betreff und E-Mail-Inhalt. \
             WICHTIG: Die E-Mail-Nachricht muss als reiner Text formatiert werden (KEIN HTML, KEINE HTML-Tags). \
             Verwende normale Zeilenumbrüche für Absätze. Formatiere die Antwort so:\n\
             Betreff: [hier der generierte Betreff]\n\n\
             Nachricht:\n\
             [hier der generierte E-Mail-Inhalt als reiner Text]",
            sanitize(&self.sender_email),
            sanitize(&self.recipient_email),
            sanitize(&self.keywords),
            self.copy_lines(),
            style_text,
        )
    }

    /// Prompt instructing the agent to send `draft`. The addresses are re-checked since the
    /// form stays editable after drafting.
    pub fn send_prompt(&self, draft: &Draft) -> Result<String, EmailError> {
        let errors = self.address_errors();
        if !errors.is_empty() {
            return Err(EmailError::Invalid(FieldErrors(errors)));
        }
        if draft.subject.trim().is_empty() || draft.message.trim().is_empty() {
            return Err(EmailError::EmptyDraft);
        }
        Ok(format!(
            "Sende eine E-Mail mit folgenden Details:\n\
             - Absender: {}\n\
             - Empfänger: {}\n\
             - Betreff: {}\n\
             - Nachricht: {}{}",
            sanitize(&self.sender_email),
            sanitize(&self.recipient_email),
            sanitize(&draft.subject),
            sanitize(&draft.message),
            self.copy_lines(),
        ))
    }
}

/// Form plus a busy flag shared between clones, so a copy handed to a worker keeps
/// the original from starting a second request.
#[derive(Debug, Clone, Default)]
pub struct EmailComposer {
    pub form: EmailForm,
    busy: Arc<AtomicBool>,
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EmailComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn try_acquire(&self) -> Result<BusyGuard, EmailError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EmailError::Busy);
        }
        Ok(BusyGuard(self.busy.clone()))
    }

    /// Validate the form, ask the agent for a draft, and split the answer.
    pub async fn generate_draft<B: ChatBackend + ?Sized>(
        &self,
        backend: &B,
        thread_id: Option<String>,
    ) -> Result<Draft, EmailError> {
        self.form.validate().map_err(EmailError::Invalid)?;
        let _guard = self.try_acquire()?;
        let request = ChatRequest {
            message: self.form.draft_prompt(),
            thread_id,
            debug_mode: false,
        };
        let reply = backend.send_chat(&request).await?;
        let draft = extract_draft(&reply.answer);
        log::debug!("draft generated, subject {:?}", draft.subject);
        Ok(draft)
    }

    /// Ask the agent to send `draft`. The form is reset on success.
    pub async fn send<B: ChatBackend + ?Sized>(
        &mut self,
        backend: &B,
        thread_id: Option<String>,
        draft: &Draft,
    ) -> Result<(), EmailError> {
        let prompt = self.form.send_prompt(draft)?;
        {
            let _guard = self.try_acquire()?;
            let request = ChatRequest {
                message: prompt,
                thread_id,
                debug_mode: false,
            };
            backend.send_chat(&request).await?;
        }
        log::info!("email to {} handed to the agent", self.form.recipient_email.trim());
        self.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.form = EmailForm::default();
    }
}
