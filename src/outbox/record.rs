use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Field values of the contact form as the user typed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

impl ContactForm {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Labels of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for (label, value) in [
            ("name", &self.name),
            ("email", &self.email),
            ("subject", &self.subject),
            ("message", &self.message),
        ] {
            if value.trim().is_empty() {
                missing.push(label);
            }
        }
        missing
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.email.is_empty()
            && self.subject.is_empty()
            && self.message.is_empty()
    }

    pub fn clear(&mut self) {
        self.name.clear();
        self.email.clear();
        self.subject.clear();
        self.message.clear();
    }

    pub fn payload(&self) -> ContactPayload {
        ContactPayload {
            name: self.name.clone(),
            email: self.email.clone(),
            subject: self.subject.clone(),
            message: self.message.clone(),
        }
    }
}

/// JSON body posted to the contact endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPayload {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

/// A submission that failed immediate delivery and waits in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
    pub id: String,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PendingSubmission {
    pub fn from_form(id: String, form: &ContactForm, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            name: form.name.clone(),
            email: form.email.clone(),
            subject: form.subject.clone(),
            message: form.message.clone(),
            created_at,
        }
    }

    pub fn payload(&self) -> ContactPayload {
        ContactPayload {
            name: self.name.clone(),
            email: self.email.clone(),
            subject: self.subject.clone(),
            message: self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn missing_fields_ignores_whitespace_only_values() {
        let form = ContactForm::new("Ada", "  ", "Hello", "");
        assert_eq!(form.missing_fields(), vec!["email", "message"]);
        assert!(ContactForm::new("a", "b", "c", "d").missing_fields().is_empty());
    }

    #[test]
    fn stored_layout_uses_camel_case_and_rfc3339() -> anyhow::Result<()> {
        let record = PendingSubmission::from_form(
            "1718000000000".into(),
            &ContactForm::new("Ada", "ada@example.com", "Hi", "Hello there"),
            datetime!(2024-06-10 06:13:20 UTC),
        );
        let json = serde_json::to_value(&record)?;
        assert_eq!(json["id"], "1718000000000");
        assert_eq!(json["createdAt"], "2024-06-10T06:13:20Z");
        assert!(json.get("created_at").is_none());
        Ok(())
    }

    #[test]
    fn payload_omits_queue_bookkeeping() -> anyhow::Result<()> {
        let record = PendingSubmission::from_form(
            "1".into(),
            &ContactForm::new("Ada", "ada@example.com", "Hi", "Hello"),
            OffsetDateTime::UNIX_EPOCH,
        );
        let json = serde_json::to_value(record.payload())?;
        let object = json.as_object().expect("payload is an object");
        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["email", "message", "name", "subject"]);
        Ok(())
    }
}
