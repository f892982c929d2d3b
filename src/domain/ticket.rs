//! Ticket records as scraped from the portal's list and detail views.
//!
//! A ticket is keyed by its digit-only `number`. The list view yields the base
//! columns; the detail view contributes the optional enrichment fields. All
//! persistence goes through [`TicketRecord::to_document`], which drops empty
//! fields so that merge upserts never overwrite good data with blanks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bogus value leaked into extraction by a hidden id field on the detail page.
/// Matched against the *entire* trimmed value, never as a substring.
pub const SENTINEL_VALUE: &str = "323";

/// Trim a raw extracted value; empty strings and the exact sentinel become `None`.
pub fn sanitize_field(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == SENTINEL_VALUE {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Enrichment fields from a ticket's detail page.
///
/// Every field is optional: a failed or partial detail fetch degrades to fewer
/// fields, never to a failed record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at_detail: Option<String>,
}

impl TicketDetails {
    /// Number of populated fields.
    pub fn field_count(&self) -> usize {
        [
            &self.detailed_service_type,
            &self.installation_location,
            &self.full_description,
            &self.asset_tag,
            &self.room,
            &self.extension,
            &self.mobile_phone,
            &self.email,
            &self.scheduled_datetime,
            &self.opened_at_detail,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }
}

/// One ticket as observed on the portal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    /// Digit-only ticket number, unique and stable for the ticket's lifetime.
    pub number: String,
    /// Status text as shown by the portal ("Nova" under the enforced filter).
    pub status: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub service_type: String,
    /// Open date column from the list view, verbatim ("DD/MM/YYYY HH:mm").
    #[serde(default)]
    pub opened_at_raw: String,
    #[serde(flatten)]
    pub details: TicketDetails,
}

impl TicketRecord {
    /// Best available description: detail-page text first, list column second.
    pub fn best_description(&self) -> Option<&str> {
        self.details
            .full_description
            .as_deref()
            .or_else(|| sanitize_ref(&self.service_type))
    }

    /// Best available location string.
    pub fn best_location(&self) -> Option<&str> {
        self.details
            .installation_location
            .as_deref()
            .or_else(|| sanitize_ref(&self.location))
    }

    /// Best available open-date string: detail header first, list column second.
    pub fn best_opened_at(&self) -> Option<&str> {
        self.details
            .opened_at_detail
            .as_deref()
            .or_else(|| sanitize_ref(&self.opened_at_raw))
    }

    /// Flatten the record into a document body for a merge upsert.
    ///
    /// `None` enrichment fields and blank base columns are omitted entirely, so
    /// a later partial write cannot null out previously persisted values.
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => {
                for (key, value) in fields {
                    match value {
                        Value::String(s) if s.trim().is_empty() => {}
                        Value::Null => {}
                        other => {
                            doc.insert(key, other);
                        }
                    }
                }
            }
            // A struct with only string fields always serializes to an object.
            _ => unreachable!("TicketRecord serializes to a JSON object"),
        }
        doc
    }

    /// Rebuild a record from a persisted document body, ignoring unknown fields.
    pub fn from_document(body: &Value) -> Option<Self> {
        serde_json::from_value(body.clone()).ok()
    }
}

fn sanitize_ref(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// A queued outbound message for one subscriber. Write-once: this worker never
/// mutates a work item after creation; a downstream delivery process owns the
/// status transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationWorkItem {
    /// Recipient contact address.
    pub to: String,
    pub message: String,
    /// Always `"pending"` at creation.
    pub status: String,
    pub kind: String,
    pub ticket_number: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}
