//! Ticket detail page enrichment.
//!
//! The portal's detail view is an external, unversioned UI, so no single
//! selector is trusted. Each field is located by its human label through an
//! ordered list of extraction strategies, tried until one yields a usable
//! value. Hidden inputs are ignored and the exact sentinel value `"323"` (a
//! hidden-id artifact) is treated as no data wherever it comes from.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace, warn};

use crate::domain::ports::RemoteSession;
use crate::domain::ticket::{sanitize_field, TicketDetails};
use crate::infrastructure::config::{PortalConfig, TimingConfig};
use crate::infrastructure::list_view::ListView;

/// "ABERTURA DD/MM/YYYY HH:mm" in the detail page header.
static OPENED_AT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ABERTURA\s+(\d{2}/\d{2}/\d{4}\s+\d{2}:\d{2})").expect("static regex")
});

fn sel(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector")
}

/// Value of a form or display element, sanitized.
///
/// Inputs and selects carry their value attribute, textareas and display
/// elements their text. Hidden inputs are skipped outright; they are the
/// source of the sentinel artifact.
fn element_value(element: &ElementRef) -> Option<String> {
    let tag = element.value().name();
    match tag {
        "input" | "select" => {
            if element.value().attr("type") == Some("hidden") {
                return None;
            }
            element.value().attr("value").and_then(sanitize_field)
        }
        "textarea" => sanitize_field(&element.text().collect::<String>()),
        _ => sanitize_field(&element.text().collect::<String>()),
    }
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// First label element whose text contains `label`, case-insensitively.
fn find_label<'a>(doc: &'a Html, label: &str) -> Option<ElementRef<'a>> {
    let needle = label.to_lowercase();
    doc.select(&sel("label"))
        .find(|el| element_text(el).to_lowercase().contains(&needle))
}

fn next_element_sibling<'a>(element: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    element.next_siblings().find_map(ElementRef::wrap)
}

/// Candidate value holders inside a container, in preference order.
fn container_value(container: &ElementRef) -> Option<String> {
    for candidate_selector in [
        "p[id^='readonly_']",
        "textarea",
        "input",
        "div.form-control",
        "span",
    ] {
        for candidate in container.select(&sel(candidate_selector)) {
            if let Some(value) = element_value(&candidate) {
                return Some(value);
            }
        }
    }
    None
}

/// One way of locating a labeled field's value on the detail page.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, doc: &Html, label: &str) -> Option<String>;
}

/// Strategy 1: a table cell whose `data-label` attribute matches the label
/// (common in the portal's responsive read-only views).
struct DataLabelCell;

impl ExtractionStrategy for DataLabelCell {
    fn name(&self) -> &'static str {
        "data-label-cell"
    }

    fn extract(&self, doc: &Html, label: &str) -> Option<String> {
        let needle = label.to_lowercase();
        doc.select(&sel("td[data-label]")).find_map(|td| {
            let data_label = td.value().attr("data-label")?;
            if data_label.to_lowercase().contains(&needle) {
                sanitize_field(&element_text(&td))
            } else {
                None
            }
        })
    }
}

/// Strategy 2: the element referenced by the label's `for` attribute.
struct LabelForTarget;

impl ExtractionStrategy for LabelForTarget {
    fn name(&self) -> &'static str {
        "label-for-target"
    }

    fn extract(&self, doc: &Html, label: &str) -> Option<String> {
        let label_el = find_label(doc, label)?;
        let id = label_el.value().attr("for")?;
        let target_selector = Selector::parse(&format!("[id='{id}']")).ok()?;
        doc.select(&target_selector)
            .next()
            .and_then(|el| element_value(&el))
    }
}

/// Strategy 3: the label's next sibling, or the first field inside the
/// label's parent's next sibling (column-based form layouts).
struct LabelSibling;

impl ExtractionStrategy for LabelSibling {
    fn name(&self) -> &'static str {
        "label-sibling"
    }

    fn extract(&self, doc: &Html, label: &str) -> Option<String> {
        let label_el = find_label(doc, label)?;

        if let Some(value) = next_element_sibling(&label_el).and_then(|el| element_value(&el)) {
            return Some(value);
        }

        let parent = label_el.parent().and_then(ElementRef::wrap)?;
        let container = next_element_sibling(&parent)?;
        container_value(&container)
    }
}

/// Strategy 4: the nearest enclosing field group's display element.
struct FieldGroupSearch;

impl ExtractionStrategy for FieldGroupSearch {
    fn name(&self) -> &'static str {
        "field-group"
    }

    fn extract(&self, doc: &Html, label: &str) -> Option<String> {
        let label_el = find_label(doc, label)?;
        let group = label_el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().classes().any(|class| class == "form-group"))
            .or_else(|| {
                label_el
                    .parent()
                    .and_then(|p| p.parent())
                    .and_then(ElementRef::wrap)
            })?;
        container_value(&group)
    }
}

/// Label-driven field extractor over the ordered strategy list.
pub struct DetailExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Default for DetailExtractor {
    fn default() -> Self {
        Self {
            strategies: vec![
                Box::new(DataLabelCell),
                Box::new(LabelForTarget),
                Box::new(LabelSibling),
                Box::new(FieldGroupSearch),
            ],
        }
    }
}

impl DetailExtractor {
    /// Try each label, and for each label every strategy in order, until one
    /// produces a non-empty, non-sentinel value.
    pub fn extract_field(&self, doc: &Html, labels: &[&str]) -> Option<String> {
        for label in labels {
            for strategy in &self.strategies {
                if let Some(value) = strategy.extract(doc, label) {
                    trace!("Field '{label}' extracted via {}", strategy.name());
                    return Some(value);
                }
            }
        }
        None
    }

    /// Extract the full enrichment field set from a detail page.
    pub fn extract_details(&self, html: &str) -> TicketDetails {
        let doc = Html::parse_document(html);

        let mobile_phone = self
            .extract_field(&doc, &["Celular"])
            .map(|raw| raw.chars().filter(char::is_ascii_digit).collect::<String>())
            .filter(|digits| !digits.is_empty());

        let opened_at_detail = OPENED_AT_RE
            .captures(&doc.root_element().text().collect::<String>())
            .map(|caps| caps[1].to_string());

        TicketDetails {
            detailed_service_type: self.extract_field(&doc, &["Tipo de Serviço"]),
            installation_location: self.extract_field(&doc, &["Local de Instalação", "Local"]),
            full_description: self.extract_field(&doc, &["Descrição do Serviço", "Descrição"]),
            asset_tag: self.extract_field(&doc, &["Patrimônio"]),
            room: self.extract_field(&doc, &["Sala"]),
            extension: self.extract_field(&doc, &["Ramal"]),
            mobile_phone,
            email: self.extract_field(&doc, &["E-mail"]),
            scheduled_datetime: self.extract_field(
                &doc,
                &[
                    "Data e Horário",
                    "Melhor data",
                    "horário para atendimento",
                    "Agendamento",
                ],
            ),
            opened_at_detail,
        }
    }
}

/// Navigates to detail pages and always steers the session back to the list.
pub struct DetailEnricher {
    portal: PortalConfig,
    timing: TimingConfig,
    extractor: DetailExtractor,
}

impl DetailEnricher {
    pub fn new(portal: PortalConfig, timing: TimingConfig) -> Self {
        Self {
            portal,
            timing,
            extractor: DetailExtractor::default(),
        }
    }

    /// Fetch and extract a ticket's detail fields.
    ///
    /// Never fails: a detail-fetch error degrades to an empty field set so the
    /// base record from the list scrape is still persisted. Whatever happened,
    /// the session is steered back to the configured list view afterwards,
    /// because the caller's next iteration starts from the list.
    pub async fn enrich(
        &self,
        session: &dyn RemoteSession,
        list_view: &ListView,
        number: &str,
    ) -> TicketDetails {
        let details = match self.fetch_details(session, number).await {
            Ok(details) => {
                debug!(
                    "Extracted {} detail fields for ticket #{number}",
                    details.field_count()
                );
                details
            }
            Err(e) => {
                warn!("Detail fetch for ticket #{number} failed: {e}");
                TicketDetails::default()
            }
        };

        self.return_to_list(session, list_view).await;
        details
    }

    async fn fetch_details(
        &self,
        session: &dyn RemoteSession,
        number: &str,
    ) -> anyhow::Result<TicketDetails> {
        let url = self.portal.ticket_url(number);
        debug!("Navigating to ticket detail: {url}");
        session
            .navigate(&url)
            .await
            .map_err(|e| anyhow::anyhow!("Detail navigation failed: {e}"))?;

        // The detail frame keeps loading content after DOM ready.
        session
            .wait(Duration::from_millis(self.timing.settle_wait_ms + 3000))
            .await;

        let html = session
            .page_html()
            .await
            .map_err(|e| anyhow::anyhow!("Could not read detail page: {e}"))?;
        Ok(self.extractor.extract_details(&html))
    }

    async fn return_to_list(&self, session: &dyn RemoteSession, list_view: &ListView) {
        if let Err(first) = list_view.ensure_list(session).await {
            warn!("List did not reappear after detail visit, retrying: {first}");
            if let Err(second) = list_view.ensure_list(session).await {
                warn!("Still not on the list view: {second}");
                return;
            }
        }
        // Idempotent; restores filters the detail round-trip may have reset.
        if let Err(e) = list_view.apply_filters(session).await {
            warn!("Filter reapply after detail visit failed: {e}");
        }
    }
}
