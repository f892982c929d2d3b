//! Notification composition and fan-out.
//!
//! Builds one human-readable message per newly discovered ticket and queues a
//! pending work item for every enabled subscriber. Runs strictly after the
//! ticket has been persisted and is best-effort: a composition or enqueue
//! failure never rolls back or blocks the ticket itself.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::domain::ports::DocumentStore;
use crate::domain::ticket::{NotificationWorkItem, TicketRecord};
use crate::infrastructure::config::collections;

/// Placeholder the portal shows for an unset scheduling field.
pub const NOT_INFORMED_PLACEHOLDER: &str = "Não informado";

const WORK_ITEM_KIND: &str = "service_desk_new_ticket";

// Fixed lookup tables: the process may run in a container without locale
// data, so no runtime locale is consulted.
const WEEKDAYS: [&str; 7] = [
    "domingo",
    "segunda-feira",
    "terça-feira",
    "quarta-feira",
    "quinta-feira",
    "sexta-feira",
    "sábado",
];
const MONTHS: [&str; 12] = [
    "jan.", "fev.", "mar.", "abr.", "mai.", "jun.", "jul.", "ago.", "set.", "out.", "nov.", "dez.",
];

/// Render a `DD/MM/YYYY HH:mm` source string as
/// `"sábado, 27 de dez. de 2025 às 17:31"`.
///
/// Anything unparseable comes back verbatim; this function never fails.
pub fn format_ticket_date(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut parts = trimmed.split_whitespace();
    let (Some(date_part), Some(time_part)) = (parts.next(), parts.next()) else {
        return trimmed.to_string();
    };

    let mut fields = date_part.split('/');
    let (Some(day), Some(month), Some(year)) = (fields.next(), fields.next(), fields.next())
    else {
        return trimmed.to_string();
    };

    let (Ok(day_num), Ok(month_num), Ok(year_num)) =
        (day.parse::<u32>(), month.parse::<u32>(), year.parse::<i32>())
    else {
        return trimmed.to_string();
    };

    let Some(date) = NaiveDate::from_ymd_opt(year_num, month_num, day_num) else {
        return trimmed.to_string();
    };

    let weekday = WEEKDAYS[date.weekday().num_days_from_sunday() as usize];
    let month_name = MONTHS[(month_num - 1) as usize];
    format!("{weekday}, {day} de {month_name} de {year} às {time_part}")
}

/// Build the outbound message body for a newly discovered ticket.
pub fn compose_message(ticket: &TicketRecord, ticket_url: &str) -> String {
    let requester = match ticket.requester.trim() {
        "" => "Desconhecido",
        name => name,
    };
    let description = ticket.best_description().unwrap_or("Sem descrição");
    let location = ticket.best_location();
    let room = ticket.details.room.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let mut message = String::from("Novo Chamado em *ServiceDesk* 📝\n\n");
    message.push_str(&format!("*Solicitante:* _{requester}_\n\n"));
    message.push_str(&format!("*Descrição:* {description}\n\n"));

    // Location line only when there is something to say.
    match (location, room) {
        (Some(location), Some(room)) => {
            message.push_str(&format!("*Local:* _{location}_ *Sala:* _{room}_\n\n"));
        }
        (Some(location), None) => {
            message.push_str(&format!("*Local:* _{location}_\n\n"));
        }
        (None, Some(room)) => {
            message.push_str(&format!("*Sala:* _{room}_\n\n"));
        }
        (None, None) => {}
    }

    if let Some(scheduled) = ticket.details.scheduled_datetime.as_deref() {
        let scheduled = scheduled.trim();
        if !scheduled.is_empty() && scheduled != NOT_INFORMED_PLACEHOLDER {
            message.push_str(&format!("*Agendado para:* _{scheduled}_\n\n"));
        }
    }

    message.push_str(&format!("*Ver no ServiceDesk:* {ticket_url}\n\n"));

    if let Some(opened_at) = ticket.best_opened_at() {
        message.push_str(&format!("📅 {}", format_ticket_date(opened_at)));
    }

    message
}

/// Fans newly discovered tickets out to the notification queue.
pub struct Notifier {
    store: Arc<dyn DocumentStore>,
}

impl Notifier {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Queue one pending work item per enabled subscriber.
    ///
    /// Returns how many items were queued. Subscribers without a contact
    /// address are skipped with a warning.
    pub async fn notify_new_ticket(
        &self,
        ticket: &TicketRecord,
        ticket_url: &str,
    ) -> Result<usize> {
        let subscribers = self
            .store
            .query_eq(collections::SUBSCRIBERS, "enabled", &Value::Bool(true))
            .await
            .context("Failed to load subscriber preferences")?;

        if subscribers.is_empty() {
            debug!("No enabled subscribers, nothing to queue");
            return Ok(0);
        }

        let message = compose_message(ticket, ticket_url);
        let mut queued = 0;

        for (subscriber_key, body) in subscribers {
            let Some(phone) = body.get("phone").and_then(Value::as_str) else {
                warn!("Subscriber {subscriber_key} is enabled but has no phone, skipping");
                continue;
            };

            let item = NotificationWorkItem {
                to: phone.to_string(),
                message: message.clone(),
                status: "pending".to_string(),
                kind: WORK_ITEM_KIND.to_string(),
                ticket_number: ticket.number.clone(),
                created_at: Utc::now().to_rfc3339(),
            };
            let fields = match serde_json::to_value(&item) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };

            self.store
                .insert(collections::NOTIFICATION_QUEUE, fields)
                .await
                .with_context(|| {
                    format!("Failed to queue notification for subscriber {subscriber_key}")
                })?;
            queued += 1;
        }

        if queued > 0 {
            info!(
                "Queued {queued} notification(s) for ticket #{}",
                ticket.number
            );
        }
        Ok(queued)
    }
}
