//! Ticket list view: filter configuration and row scraping.
//!
//! The configurator forces the portal's data table into a known shape
//! (pagination "show all", free-text filter on the new-status token, open-date
//! column sorted descending) so the scrape order and contents are predictable.
//! It probes the current control state first and only touches what is off, so
//! it is safe to re-invoke after every navigation. Each setting is applied
//! best effort: a missing control is logged and the cycle continues, with the
//! diff engine's filter-integrity guard as the downstream safety net.

use std::time::Duration;

use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::ports::RemoteSession;
use crate::domain::ticket::TicketRecord;
use crate::infrastructure::config::{PortalConfig, TimingConfig};

pub const TABLE_SELECTOR: &str = "#GridDatatable";
const ROW_SELECTOR: &str = "#GridDatatable tbody tr";
const FILTER_INPUT_SELECTORS: [&str; 2] = [".dataTables_filter input", "input[type='search']"];
const SHOW_ALL_OPTION_SELECTOR: &str = "select option[value='-1']";

fn sel(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector")
}

/// Observed state of the three list-view controls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterState {
    pub pagination_set: bool,
    pub filter_set: bool,
    pub sort_set: bool,
}

impl FilterState {
    pub fn all_set(&self) -> bool {
        self.pagination_set && self.filter_set && self.sort_set
    }
}

/// Drives the portal's list view through a [`RemoteSession`].
pub struct ListView {
    portal: PortalConfig,
    timing: TimingConfig,
}

impl ListView {
    pub fn new(portal: PortalConfig, timing: TimingConfig) -> Self {
        Self { portal, timing }
    }

    /// Navigate to the list view (if not already there) and wait for the
    /// ticket table to render. Failing to find the table is an error: it is
    /// the signal the worker loop uses to tear the session down.
    pub async fn ensure_list(&self, session: &dyn RemoteSession) -> Result<()> {
        let on_list = session
            .current_url()
            .await
            .map(|url| same_page(&url, &self.portal.list_url))
            .unwrap_or(false);

        if !on_list {
            debug!("Navigating to list view before scraping");
            session
                .navigate(&self.portal.list_url)
                .await
                .map_err(|e| anyhow!("List navigation failed: {e}"))?;
            session
                .wait(Duration::from_millis(self.timing.settle_wait_ms))
                .await;
        }

        session
            .wait_for_selector(
                TABLE_SELECTOR,
                Duration::from_secs(self.timing.selector_timeout_secs),
            )
            .await
            .map_err(|e| anyhow!("Ticket table did not appear: {e}"))?;
        Ok(())
    }

    /// Inspect the rendered page and report which controls are already set.
    pub fn probe_state(&self, html: &str) -> FilterState {
        let doc = Html::parse_document(html);

        let option_selector = sel("option[value='-1']");
        let pagination_set = doc
            .select(&sel("select"))
            .flat_map(|select| select.select(&option_selector))
            .any(|option| option.value().attr("selected").is_some());

        let filter_set = FILTER_INPUT_SELECTORS.iter().any(|input_selector| {
            doc.select(&sel(input_selector))
                .any(|input| input.value().attr("value") == Some(self.portal.filter_token.as_str()))
        });

        let sort_set = doc.select(&sel("th")).any(|th| {
            element_text(&th).contains(&self.portal.sort_column_label)
                && th
                    .value()
                    .classes()
                    .any(|class| class == "sorting_desc")
        });

        FilterState {
            pagination_set,
            filter_set,
            sort_set,
        }
    }

    /// Apply the three list settings, skipping the ones already in place.
    ///
    /// Always returns `Ok`; individual failures are logged and left to the
    /// filter-integrity guard to catch.
    pub async fn apply_filters(&self, session: &dyn RemoteSession) -> Result<FilterState> {
        let html = session
            .page_html()
            .await
            .map_err(|e| anyhow!("Could not read list page: {e}"))?;
        let state = self.probe_state(&html);
        if state.all_set() {
            return Ok(state);
        }

        info!("Configuring list view (current state: {state:?})");

        if !state.pagination_set {
            match session.click(SHOW_ALL_OPTION_SELECTOR).await {
                Ok(()) => {
                    debug!("Pagination set to show all rows");
                    session.wait(Duration::from_millis(1500)).await;
                }
                Err(e) => warn!("Show-all pagination option not found: {e}"),
            }
        }

        if !state.filter_set {
            let mut applied = false;
            for input_selector in FILTER_INPUT_SELECTORS {
                match session.fill(input_selector, &self.portal.filter_token).await {
                    Ok(()) => {
                        debug!("Status filter set to '{}'", self.portal.filter_token);
                        applied = true;
                        break;
                    }
                    Err(e) => debug!("Filter input {input_selector} not usable: {e}"),
                }
            }
            if applied {
                session.wait(Duration::from_millis(1500)).await;
            } else {
                warn!("No filter input found, list may show foreign statuses");
            }
        }

        if !state.sort_set {
            match self.sort_header_selector(&html) {
                Some(header_selector) => match session.click(&header_selector).await {
                    Ok(()) => {
                        debug!("Sorted by '{}' descending", self.portal.sort_column_label);
                        session.wait(Duration::from_millis(1000)).await;
                    }
                    Err(e) => warn!("Sort header click failed: {e}"),
                },
                None => warn!(
                    "Sort column '{}' not found in table header",
                    self.portal.sort_column_label
                ),
            }
        }

        let html = session
            .page_html()
            .await
            .map_err(|e| anyhow!("Could not re-read list page: {e}"))?;
        Ok(self.probe_state(&html))
    }

    /// Build an nth-child selector for the sortable open-date header.
    ///
    /// CSS cannot match on text, so the header position is located in the
    /// parsed markup and addressed positionally for the click.
    fn sort_header_selector(&self, html: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        for row in doc.select(&sel("thead tr")) {
            for (index, th) in row.select(&sel("th")).enumerate() {
                if element_text(&th).contains(&self.portal.sort_column_label) {
                    return Some(format!(
                        "{TABLE_SELECTOR} thead tr th:nth-child({})",
                        index + 1
                    ));
                }
            }
        }
        None
    }

    /// Scrape the visible rows into lightweight ticket records.
    pub async fn scrape(&self, session: &dyn RemoteSession) -> Result<Vec<TicketRecord>> {
        self.ensure_list(session).await?;

        // Rows render slightly after the table shell.
        if session
            .wait_for_selector(ROW_SELECTOR, Duration::from_secs(10))
            .await
            .is_err()
        {
            debug!("No rows present in the ticket table");
            return Ok(Vec::new());
        }
        session.wait(Duration::from_millis(1000)).await;

        let html = session
            .page_html()
            .await
            .map_err(|e| anyhow!("Could not read list page: {e}"))?;
        let tickets = parse_rows(&html);
        debug!("Extracted {} tickets from the list view", tickets.len());
        Ok(tickets)
    }
}

/// Parse `#GridDatatable` rows into ticket records.
///
/// Column mapping matches the portal's layout: number, priority, status,
/// (skipped), requester, location, service type (with one-column fallback),
/// and the open date in the last cell.
pub fn parse_rows(html: &str) -> Vec<TicketRecord> {
    let doc = Html::parse_document(html);
    let mut tickets = Vec::new();

    for row in doc.select(&sel(ROW_SELECTOR)) {
        let cells: Vec<String> = row.select(&sel("td")).map(|td| element_text(&td)).collect();
        if cells.len() < 3 {
            continue;
        }

        let number: String = cells[0].chars().filter(char::is_ascii_digit).collect();
        if number.is_empty() {
            continue;
        }

        let status = if cells[2].is_empty() {
            "Nova".to_string()
        } else {
            cells[2].clone()
        };

        tickets.push(TicketRecord {
            number,
            status,
            priority: cells.get(1).cloned().unwrap_or_default(),
            requester: cells.get(4).cloned().unwrap_or_default(),
            location: cells.get(5).cloned().unwrap_or_default(),
            service_type: cells
                .get(7)
                .filter(|s| !s.is_empty())
                .or_else(|| cells.get(6))
                .cloned()
                .unwrap_or_default(),
            opened_at_raw: cells.last().cloned().unwrap_or_default(),
            details: Default::default(),
        });
    }

    tickets
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Exact host-and-path comparison, ignoring query and fragment. Detail URLs
/// extend the list URL, so a prefix check would mistake one for the other.
fn same_page(current: &str, target: &str) -> bool {
    match (Url::parse(current), Url::parse(target)) {
        (Ok(a), Ok(b)) => {
            a.host_str() == b.host_str()
                && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
        }
        _ => current.trim_end_matches('/') == target.trim_end_matches('/'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_PAGE: &str = r##"
        <html><body>
        <div class="dataTables_filter"><input type="search" value="Nova"></div>
        <select><option value="10">10</option><option value="-1" selected>Não</option></select>
        <table id="GridDatatable">
          <thead><tr>
            <th>Número</th><th>Prioridade</th><th>Status</th><th>Categoria</th>
            <th>Solicitante</th><th>Local</th><th>Grupo</th><th>Serviço</th>
            <th class="sorting_desc">Abertura</th>
          </tr></thead>
          <tbody>
            <tr>
              <td>#104233</td><td>Normal</td><td>Nova</td><td>TI</td>
              <td>Maria Souza</td><td>Biblioteca</td><td>Suporte</td>
              <td>Troca de equipamento</td><td>27/12/2025 17:31</td>
            </tr>
            <tr>
              <td>104234</td><td>Alta</td><td></td><td>TI</td>
              <td>João Lima</td><td>Almoxarifado</td><td>Suporte</td>
              <td>Sem rede</td><td>27/12/2025 18:02</td>
            </tr>
            <tr><td>cabeçalho inválido</td><td>x</td></tr>
          </tbody>
        </table>
        </body></html>
    "##;

    #[test]
    fn parses_rows_with_portal_column_layout() {
        let tickets = parse_rows(LIST_PAGE);
        assert_eq!(tickets.len(), 2);

        assert_eq!(tickets[0].number, "104233");
        assert_eq!(tickets[0].status, "Nova");
        assert_eq!(tickets[0].requester, "Maria Souza");
        assert_eq!(tickets[0].location, "Biblioteca");
        assert_eq!(tickets[0].service_type, "Troca de equipamento");
        assert_eq!(tickets[0].opened_at_raw, "27/12/2025 17:31");

        // Blank status defaults to the filtered value.
        assert_eq!(tickets[1].status, "Nova");
        assert_eq!(tickets[1].priority, "Alta");
    }

    #[test]
    fn rows_without_a_number_are_dropped() {
        let html = r#"
            <table id="GridDatatable"><tbody>
              <tr><td>sem número</td><td>x</td><td>Nova</td></tr>
            </tbody></table>
        "#;
        assert!(parse_rows(html).is_empty());
    }

    #[test]
    fn probe_detects_fully_configured_view() {
        let view = ListView::new(PortalConfig::default(), TimingConfig::default());
        let state = view.probe_state(LIST_PAGE);
        assert!(state.pagination_set);
        assert!(state.filter_set);
        assert!(state.sort_set);
        assert!(state.all_set());
    }

    #[test]
    fn probe_detects_missing_filter_and_sort() {
        let html = r#"
            <select><option value="-1">Não</option></select>
            <input type="search" value="">
            <table id="GridDatatable"><thead><tr><th>Abertura</th></tr></thead></table>
        "#;
        let view = ListView::new(PortalConfig::default(), TimingConfig::default());
        let state = view.probe_state(html);
        assert!(!state.pagination_set);
        assert!(!state.filter_set);
        assert!(!state.sort_set);
    }

    #[test]
    fn detail_url_is_not_the_list_page() {
        let list = "https://servicedesk.unesp.br/atendimento";
        assert!(same_page("https://servicedesk.unesp.br/atendimento/", list));
        assert!(same_page("https://servicedesk.unesp.br/atendimento?draw=1", list));
        assert!(!same_page("https://servicedesk.unesp.br/atendimento/104233", list));
        assert!(!same_page("https://auth.unesp.br/atendimento", list));
    }

    #[test]
    fn sort_header_selector_is_positional() {
        let view = ListView::new(PortalConfig::default(), TimingConfig::default());
        let selector = view.sort_header_selector(LIST_PAGE).unwrap();
        assert_eq!(selector, "#GridDatatable thead tr th:nth-child(9)");
    }
}
