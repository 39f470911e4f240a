use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{
    error::{BlessingError, ValidationError},
    events::{normalize_name, NewBlessing, MAX_NAME_CHARS, MAX_TEXT_CHARS},
};

pub const SUBMIT_COOLDOWN: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlessingDraft {
    pub anonymous: bool,
    pub name: String,
    pub text: String,
}

impl Default for BlessingDraft {
    fn default() -> Self {
        Self {
            anonymous: true,
            name: String::new(),
            text: String::new(),
        }
    }
}

impl BlessingDraft {
    pub fn validate(&self, room: &str) -> Result<NewBlessing, ValidationError> {
        let text = clip_chars(self.text.trim(), MAX_TEXT_CHARS);
        if text.is_empty() {
            return Err(ValidationError::EmptyText);
        }
        let name = if self.anonymous {
            None
        } else {
            let name = normalize_name(Some(&self.name)).ok_or(ValidationError::MissingName)?;
            Some(clip_chars(&name, MAX_NAME_CHARS))
        };
        Ok(NewBlessing {
            room: room.to_owned(),
            name,
            text,
        })
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FormStatus {
    #[default]
    Idle,
    Success,
    Failed(BlessingError),
}

impl FormStatus {
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Idle => None,
            Self::Success => Some("Your blessing has been sent!".to_owned()),
            Self::Failed(err) => Some(err.user_message()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Form state: draft, status line, and the resubmission cooldown.
#[derive(Debug, Default)]
pub struct SubmissionForm {
    pub draft: BlessingDraft,
    status: FormStatus,
    in_flight: bool,
    cooldown_until: Option<Instant>,
}

impl SubmissionForm {
    /// Validates the draft and, if it may be sent, starts the cooldown and
    /// returns the insert payload. Rejections only update the status line.
    pub fn begin_submit(&mut self, room: &str, configured: bool, now: Instant) -> Option<NewBlessing> {
        if self.is_blocked(now) {
            return None;
        }
        if !configured {
            self.status = FormStatus::Failed(BlessingError::ConfigurationMissing);
            return None;
        }
        match self.draft.validate(room) {
            Ok(payload) => {
                self.in_flight = true;
                self.status = FormStatus::Idle;
                Some(payload)
            }
            Err(err) => {
                self.status = FormStatus::Failed(err.into());
                None
            }
        }
    }

    /// Applies the insert result; the cooldown runs from here either way.
    pub fn finish_submit(&mut self, result: Result<(), String>, now: Instant) {
        self.in_flight = false;
        self.cooldown_until = Some(now + SUBMIT_COOLDOWN);
        match result {
            Ok(()) => {
                info!("blessing submitted");
                self.draft.text.clear();
                self.status = FormStatus::Success;
            }
            Err(err) => {
                warn!(%err, "blessing submission failed");
                self.status = FormStatus::Failed(BlessingError::SubmissionFailure(err));
            }
        }
    }

    pub fn is_blocked(&self, now: Instant) -> bool {
        self.in_flight || self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Submit button caption, reflecting the in-flight and cooldown states.
    pub fn button_label(&self, now: Instant) -> &'static str {
        if self.in_flight {
            "Sending..."
        } else if self.is_blocked(now) {
            "Cooldown"
        } else {
            "Send"
        }
    }

    pub fn can_submit(&self, now: Instant) -> bool {
        !self.is_blocked(now) && self.draft.has_text()
    }

    pub fn status(&self) -> &FormStatus {
        &self.status
    }
}

fn clip_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{BlessingDraft, FormStatus, SubmissionForm, SUBMIT_COOLDOWN};
    use crate::error::{BlessingError, ValidationError};

    fn form(anonymous: bool, name: &str, text: &str) -> SubmissionForm {
        SubmissionForm {
            draft: BlessingDraft {
                anonymous,
                name: name.to_owned(),
                text: text.to_owned(),
            },
            ..SubmissionForm::default()
        }
    }

    #[test]
    fn whitespace_text_is_rejected_before_sending() {
        let now = Instant::now();
        let mut form = form(true, "", "   ");
        assert!(form.begin_submit("global", true, now).is_none());
        assert_eq!(
            form.status(),
            &FormStatus::Failed(BlessingError::Validation(ValidationError::EmptyText))
        );
        assert!(!form.is_blocked(now));
        assert_eq!(form.draft.text, "   ");
    }

    #[test]
    fn named_submission_requires_a_name() {
        let now = Instant::now();
        let mut form = form(false, "  ", "Happy new year");
        assert!(form.begin_submit("global", true, now).is_none());
        assert_eq!(
            form.status().message().as_deref(),
            Some("Please enter a nickname.")
        );
    }

    #[test]
    fn anonymous_payload_has_no_name() {
        let draft = BlessingDraft {
            anonymous: true,
            name: "ignored".to_owned(),
            text: "  be well  ".to_owned(),
        };
        let payload = draft.validate("global").expect("valid draft");
        assert_eq!(payload.name, None);
        assert_eq!(payload.text, "be well");
        assert_eq!(payload.room, "global");
    }

    #[test]
    fn overlong_fields_are_clipped() {
        let draft = BlessingDraft {
            anonymous: false,
            name: "abcdefghijklmnop".to_owned(),
            text: "x".repeat(40),
        };
        let payload = draft.validate("global").expect("valid draft");
        assert_eq!(payload.name.as_deref(), Some("abcdefghijkl"));
        assert_eq!(payload.text.chars().count(), 30);
    }

    #[test]
    fn success_clears_text_and_blocks_for_cooldown() {
        let now = Instant::now();
        let mut form = form(true, "", "hello");
        let payload = form.begin_submit("global", true, now).expect("payload");
        assert_eq!(payload.text, "hello");
        assert!(form.is_blocked(now));

        let done = now + Duration::from_millis(200);
        form.finish_submit(Ok(()), done);
        assert!(form.draft.text.is_empty());
        assert_eq!(form.status(), &FormStatus::Success);

        form.draft.text = "again".to_owned();
        assert!(form
            .begin_submit("global", true, done + Duration::from_secs(2))
            .is_none());
        assert!(form.can_submit(done + SUBMIT_COOLDOWN));
        assert!(form.begin_submit("global", true, done + SUBMIT_COOLDOWN).is_some());
    }

    #[test]
    fn button_label_tracks_sending_and_cooldown() {
        let now = Instant::now();
        let mut form = form(true, "", "hello");
        assert_eq!(form.button_label(now), "Send");

        form.begin_submit("global", true, now).expect("payload");
        assert_eq!(form.button_label(now), "Sending...");

        form.finish_submit(Ok(()), now);
        assert_eq!(form.button_label(now + Duration::from_secs(1)), "Cooldown");
        assert_eq!(form.button_label(now + SUBMIT_COOLDOWN), "Send");
    }

    #[test]
    fn failure_keeps_text_and_still_cools_down() {
        let now = Instant::now();
        let mut form = form(true, "", "hello");
        form.begin_submit("global", true, now).expect("payload");
        form.finish_submit(Err("HTTP 503".to_owned()), now);
        assert_eq!(form.draft.text, "hello");
        assert!(matches!(
            form.status(),
            FormStatus::Failed(BlessingError::SubmissionFailure(_))
        ));
        assert!(form.is_blocked(now + Duration::from_millis(2_999)));
        assert!(!form.is_blocked(now + SUBMIT_COOLDOWN));
    }

    #[test]
    fn missing_configuration_is_reported_without_cooldown() {
        let now = Instant::now();
        let mut form = form(true, "", "hello");
        assert!(form.begin_submit("global", false, now).is_none());
        assert_eq!(
            form.status(),
            &FormStatus::Failed(BlessingError::ConfigurationMissing)
        );
        assert!(!form.is_blocked(now));
    }
}
