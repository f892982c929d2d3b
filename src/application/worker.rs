//! The long-running synchronization loop.
//!
//! One worker owns one browser session, the known/ignored ticket sets, and the
//! cycle counter. Each cycle it makes sure the session is authenticated and
//! the list view is configured, scrapes the visible tickets, plans the diff
//! against the known set, and applies the plan: deletions first, then
//! enrichment, persistence and notification per new ticket. Every failure is
//! handled by resetting state and backing off; the loop itself never exits.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::application::notifier::Notifier;
use crate::domain::ports::{DocumentStore, RemoteSession, SessionFactory};
use crate::domain::schedule::format_countdown;
use crate::domain::sync::{plan_cycle, CyclePlan, SyncPlan};
use crate::infrastructure::config::{collections, Credentials, WorkerConfig, TICKET_KEY_PREFIX};
use crate::infrastructure::detail::DetailEnricher;
use crate::infrastructure::list_view::ListView;
use crate::infrastructure::session_manager::SessionManager;

const COUNTDOWN_LOG_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Worker {
    config: WorkerConfig,
    store: Arc<dyn DocumentStore>,
    session_factory: Box<dyn SessionFactory>,
    session: Option<Box<dyn RemoteSession>>,
    session_manager: SessionManager,
    list_view: ListView,
    enricher: DetailEnricher,
    notifier: Notifier,
    known: HashSet<String>,
    ignored: HashSet<String>,
    cycle: u64,
    seeded: bool,
    last_countdown_log: Option<Instant>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        credentials: Credentials,
        store: Arc<dyn DocumentStore>,
        session_factory: Box<dyn SessionFactory>,
    ) -> Self {
        let session_manager = SessionManager::new(
            config.portal.clone(),
            config.timing.clone(),
            credentials,
        );
        let list_view = ListView::new(config.portal.clone(), config.timing.clone());
        let enricher = DetailEnricher::new(config.portal.clone(), config.timing.clone());
        let notifier = Notifier::new(store.clone());

        Self {
            config,
            store,
            session_factory,
            session: None,
            session_manager,
            list_view,
            enricher,
            notifier,
            known: HashSet::new(),
            ignored: HashSet::new(),
            cycle: 0,
            seeded: false,
            last_countdown_log: None,
        }
    }

    /// Ticket numbers currently admitted to the known set.
    pub fn known_tickets(&self) -> &HashSet<String> {
        &self.known
    }

    pub fn ignored_tickets(&self) -> &HashSet<String> {
        &self.ignored
    }

    /// Run forever. Failures reset the session and back off; the only way out
    /// is process termination.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Worker started, polling every {}s within working hours",
            self.config.timing.poll_interval_secs
        );

        loop {
            let now = Utc::now();
            if !self.config.schedule.contains(now) {
                self.log_off_hours(now);
                tokio::time::sleep(Duration::from_secs(self.config.timing.off_hours_poll_secs))
                    .await;
                continue;
            }
            self.last_countdown_log = None;

            if let Err(e) = self.prepare().await {
                warn!("Not ready to sync: {e:#}");
                self.teardown_session().await;
                tokio::time::sleep(Duration::from_secs(self.config.timing.login_retry_secs))
                    .await;
                continue;
            }

            match self.run_cycle().await {
                Ok(()) => {
                    tokio::time::sleep(Duration::from_secs(self.config.timing.poll_interval_secs))
                        .await;
                }
                Err(e) => {
                    error!("Cycle failed, resetting session: {e:#}");
                    self.teardown_session().await;
                    tokio::time::sleep(Duration::from_secs(
                        self.config.timing.error_backoff_secs,
                    ))
                    .await;
                }
            }
        }
    }

    /// Seed state from the store, create a session if none exists, and make
    /// sure it is authenticated.
    pub async fn prepare(&mut self) -> Result<()> {
        if !self.seeded {
            self.seed_from_store().await?;
        }

        if self.session.is_none() {
            info!("Creating a fresh browser session");
            let session = self
                .session_factory
                .create()
                .await
                .map_err(|e| anyhow!("Could not create browser session: {e}"))?;
            self.session = Some(session);
            self.session_manager.reset();
        }

        let session = self.session.take().context("No active session")?;
        let result = self.session_manager.ensure_authenticated(session.as_ref()).await;
        self.session = Some(session);
        result
    }

    /// Execute one synchronization cycle against the prepared session.
    pub async fn run_cycle(&mut self) -> Result<()> {
        let session = self
            .session
            .take()
            .context("No active session, call prepare first")?;
        let result = self.cycle_with(session.as_ref()).await;
        self.session = Some(session);
        result
    }

    async fn cycle_with(&mut self, session: &dyn RemoteSession) -> Result<()> {
        self.cycle += 1;
        let chatty = self.is_chatty_cycle();

        let refresh_every = self.config.timing.refresh_every_cycles.max(1);
        if self.cycle % refresh_every == 0 {
            self.list_view.ensure_list(session).await?;
            let state = self.list_view.apply_filters(session).await?;
            if !state.all_set() {
                warn!("List view not fully configured after reapply: {state:?}");
            }
        }

        let scraped = self.list_view.scrape(session).await?;

        match plan_cycle(&scraped, &self.known, &self.ignored) {
            SyncPlan::FilterBreach { offending } => {
                warn!(
                    "Scrape contains {} foreign-status row(s) ({:?}), skipping sync and \
                     reapplying filters",
                    offending.len(),
                    offending
                );
                self.list_view.apply_filters(session).await?;
            }
            SyncPlan::EmptyScrape => {
                debug!("Scrape came back empty, skipping comparison this cycle");
            }
            SyncPlan::Apply(plan) => {
                self.apply_plan(session, plan).await?;
            }
        }

        if chatty {
            info!(
                "Cycle {} complete: {} known, {} ignored tickets",
                self.cycle,
                self.known.len(),
                self.ignored.len()
            );
        } else {
            debug!("Cycle {} complete", self.cycle);
        }
        Ok(())
    }

    async fn apply_plan(&mut self, session: &dyn RemoteSession, plan: CyclePlan) -> Result<()> {
        if plan.suppressed_deletions > 0 {
            warn!(
                "{} of {} known tickets vanished at once, holding deletions until the next \
                 scrape confirms",
                plan.suppressed_deletions,
                self.known.len()
            );
        }

        for number in &plan.to_delete {
            let key = ticket_key(number);
            match self.store.delete(collections::TICKETS, &key).await {
                Ok(()) => {
                    self.known.remove(number);
                    info!("Ticket #{number} left the list, removed from the store");
                }
                // Still known, so the deletion is retried next cycle.
                Err(e) => warn!("Could not delete ticket #{number}: {e:#}"),
            }
        }

        for number in &plan.to_skip {
            debug!("Ticket #{number} is on the ignore list, not processing");
        }

        for mut ticket in plan.to_process {
            info!(
                "New ticket #{}: {} ({})",
                ticket.number, ticket.service_type, ticket.requester
            );

            ticket.details = self
                .enricher
                .enrich(session, &self.list_view, &ticket.number)
                .await;

            let mut doc = ticket.to_document();
            doc.insert(
                "scraped_at".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
            self.store
                .upsert(collections::TICKETS, &ticket_key(&ticket.number), doc)
                .await
                .with_context(|| format!("Failed to persist ticket #{}", ticket.number))?;
            self.known.insert(ticket.number.clone());

            let url = self.config.portal.ticket_url(&ticket.number);
            if let Err(e) = self.notifier.notify_new_ticket(&ticket, &url).await {
                warn!(
                    "Notification fan-out for ticket #{} failed: {e:#}",
                    ticket.number
                );
            }
        }

        Ok(())
    }

    /// Load the known and ignored ticket numbers from the store. Runs once,
    /// before the first cycle, so restarts never re-notify old tickets.
    async fn seed_from_store(&mut self) -> Result<()> {
        let tickets = self
            .store
            .get_all(collections::TICKETS)
            .await
            .context("Failed to load persisted tickets")?;
        for (key, body) in &tickets {
            self.known.insert(document_ticket_number(key, body));
        }

        let ignored = self
            .store
            .get_all(collections::IGNORED_TICKETS)
            .await
            .context("Failed to load the ignore list")?;
        for (key, body) in &ignored {
            self.ignored.insert(document_ticket_number(key, body));
        }

        info!(
            "Seeded {} known and {} ignored tickets from the store",
            self.known.len(),
            self.ignored.len()
        );
        self.seeded = true;
        Ok(())
    }

    async fn teardown_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.session_manager.reset();
    }

    /// Most cycles log at debug only; one cycle per status window gets the
    /// full info line so the log shows liveness without drowning in repeats.
    fn is_chatty_cycle(&self) -> bool {
        let every = self.config.timing.status_log_every_cycles;
        every <= 1 || self.cycle % every == 1
    }

    fn log_off_hours(&mut self, now: DateTime<Utc>) {
        let due = self
            .last_countdown_log
            .map_or(true, |at| at.elapsed() >= COUNTDOWN_LOG_INTERVAL);
        if due {
            let until = self.config.schedule.until_next_open(now);
            info!(
                "Outside working hours, next window opens in {}",
                format_countdown(until)
            );
            self.last_countdown_log = Some(Instant::now());
        }
    }
}

fn ticket_key(number: &str) -> String {
    format!("{TICKET_KEY_PREFIX}{number}")
}

/// A ticket document's number: the `number` field when present, otherwise
/// recovered from the document key.
fn document_ticket_number(key: &str, body: &Value) -> String {
    body.get("number")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| key.trim_start_matches(TICKET_KEY_PREFIX).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::SessionError;
    use crate::infrastructure::memory_store::MemoryStore;
    use async_trait::async_trait;
    use scraper::{Html, Selector};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted portal: a map of URL -> HTML plus a current-URL register.
    /// Selector waits are answered by actually matching against the current
    /// page, so the fixtures behave like rendered pages.
    struct ScriptedPortal {
        pages: HashMap<String, String>,
        current: Mutex<String>,
    }

    impl ScriptedPortal {
        fn new(pages: HashMap<String, String>) -> Self {
            Self {
                pages,
                current: Mutex::new(String::new()),
            }
        }

        fn current_page(&self) -> String {
            let url = self.current.lock().unwrap().clone();
            self.pages.get(&url).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl RemoteSession for ScriptedPortal {
        async fn navigate(&self, url: &str) -> Result<(), SessionError> {
            *self.current.lock().unwrap() = url.to_string();
            Ok(())
        }

        async fn current_url(&self) -> Result<String, SessionError> {
            Ok(self.current.lock().unwrap().clone())
        }

        async fn page_html(&self) -> Result<String, SessionError> {
            Ok(self.current_page())
        }

        async fn fill(&self, _selector: &str, _text: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn click(&self, _selector: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn wait_for_selector(
            &self,
            selector: &str,
            timeout: Duration,
        ) -> Result<(), SessionError> {
            let selector_parsed = Selector::parse(selector)
                .map_err(|e| SessionError::Protocol(format!("bad selector: {e}")))?;
            let doc = Html::parse_document(&self.current_page());
            if doc.select(&selector_parsed).next().is_some() {
                Ok(())
            } else {
                Err(SessionError::Timeout {
                    selector: selector.to_string(),
                    timeout,
                })
            }
        }

        async fn wait(&self, _duration: Duration) {}

        async fn close(&self) {}
    }

    struct ScriptedFactory {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl SessionFactory for ScriptedFactory {
        async fn create(&self) -> Result<Box<dyn RemoteSession>, SessionError> {
            Ok(Box::new(ScriptedPortal::new(self.pages.clone())))
        }
    }

    fn list_page(rows: &[(&str, &str)]) -> String {
        let body: String = rows
            .iter()
            .map(|(number, status)| {
                format!(
                    "<tr><td>{number}</td><td>Normal</td><td>{status}</td><td>TI</td>\
                     <td>Maria</td><td>Biblioteca</td><td>Suporte</td>\
                     <td>Impressora</td><td>27/12/2025 17:31</td></tr>"
                )
            })
            .collect();
        format!(
            r##"<html><body>
            <div class="dataTables_filter"><input type="search" value="Nova"></div>
            <select><option value="-1" selected>Não</option></select>
            <table id="GridDatatable">
              <thead><tr>
                <th>Número</th><th>Prioridade</th><th>Status</th><th>Categoria</th>
                <th>Solicitante</th><th>Local</th><th>Grupo</th><th>Serviço</th>
                <th class="sorting_desc">Abertura</th>
              </tr></thead>
              <tbody>{body}</tbody>
            </table>
            </body></html>"##
        )
    }

    fn fast_config() -> WorkerConfig {
        let mut config = WorkerConfig::default();
        config.timing.settle_wait_ms = 0;
        config.timing.post_login_wait_ms = 0;
        config.timing.navigation_timeout_secs = 1;
        config.timing.status_log_every_cycles = 1;
        config
    }

    fn worker_with(
        store: Arc<MemoryStore>,
        rows: &[(&str, &str)],
    ) -> Worker {
        let config = fast_config();
        let mut pages = HashMap::new();
        pages.insert(config.portal.list_url.clone(), list_page(rows));
        for (number, _) in rows {
            pages.insert(
                config.portal.ticket_url(number),
                "<html><body><div>detalhe</div></body></html>".to_string(),
            );
        }
        Worker::new(
            config,
            Credentials::new("user@example.com", "pw"),
            store,
            Box::new(ScriptedFactory { pages }),
        )
    }

    #[tokio::test]
    async fn first_cycle_persists_and_notifies_new_tickets() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            collections::SUBSCRIBERS,
            "alice",
            json!({"enabled": true, "phone": "111"}),
        );
        let mut worker = worker_with(store.clone(), &[("104233", "Nova")]);

        worker.prepare().await.unwrap();
        worker.run_cycle().await.unwrap();

        assert!(worker.known_tickets().contains("104233"));
        let body = store.get(collections::TICKETS, "ticket_104233").unwrap();
        assert_eq!(body["number"], "104233");
        assert!(body["scraped_at"].is_string());
        assert_eq!(store.len(collections::NOTIFICATION_QUEUE), 1);
    }

    #[tokio::test]
    async fn seeded_tickets_are_not_reprocessed() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            collections::TICKETS,
            "ticket_104233",
            json!({"number": "104233", "status": "Nova"}),
        );
        let mut worker = worker_with(store.clone(), &[("104233", "Nova")]);

        worker.prepare().await.unwrap();
        assert!(worker.known_tickets().contains("104233"));
        worker.run_cycle().await.unwrap();

        // No new upserts: the seeded ticket was recognized as already known.
        assert_eq!(store.op_counts().upserts, 0);
        assert!(store.is_empty(collections::NOTIFICATION_QUEUE));
    }

    #[tokio::test]
    async fn ignored_tickets_are_never_persisted_or_notified() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            collections::IGNORED_TICKETS,
            "ticket_104233",
            json!({"number": "104233"}),
        );
        store.seed(
            collections::SUBSCRIBERS,
            "alice",
            json!({"enabled": true, "phone": "111"}),
        );
        let mut worker = worker_with(store.clone(), &[("104233", "Nova")]);

        worker.prepare().await.unwrap();
        worker.run_cycle().await.unwrap();

        assert!(store.is_empty(collections::TICKETS));
        assert!(store.is_empty(collections::NOTIFICATION_QUEUE));
        assert!(!worker.known_tickets().contains("104233"));
    }

    #[tokio::test]
    async fn foreign_status_freezes_all_mutations() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            collections::TICKETS,
            "ticket_100",
            json!({"number": "100", "status": "Nova"}),
        );
        let mut worker = worker_with(
            store.clone(),
            &[("200", "Em atendimento"), ("201", "Nova")],
        );

        worker.prepare().await.unwrap();
        worker.run_cycle().await.unwrap();

        // Ticket 100 vanished from the scrape, but the breached filter means
        // nothing may be deleted or processed.
        assert_eq!(store.op_counts().deletes, 0);
        assert_eq!(store.op_counts().upserts, 0);
        assert!(worker.known_tickets().contains("100"));
        assert!(!worker.known_tickets().contains("201"));
    }

    #[tokio::test]
    async fn vanished_ticket_is_deleted_and_forgotten() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            collections::TICKETS,
            "ticket_100",
            json!({"number": "100", "status": "Nova"}),
        );
        let mut worker = worker_with(store.clone(), &[("101", "Nova")]);

        worker.prepare().await.unwrap();
        worker.run_cycle().await.unwrap();

        assert!(store.get(collections::TICKETS, "ticket_100").is_none());
        assert!(!worker.known_tickets().contains("100"));
        assert!(worker.known_tickets().contains("101"));
    }

    #[tokio::test]
    async fn second_cycle_with_same_rows_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let mut worker = worker_with(store.clone(), &[("104233", "Nova")]);

        worker.prepare().await.unwrap();
        worker.run_cycle().await.unwrap();
        let after_first = store.op_counts();

        worker.run_cycle().await.unwrap();
        assert_eq!(store.op_counts(), after_first);
    }

    #[test]
    fn document_number_falls_back_to_the_key() {
        assert_eq!(
            document_ticket_number("ticket_42", &json!({"status": "Nova"})),
            "42"
        );
        assert_eq!(
            document_ticket_number("ticket_42", &json!({"number": "99"})),
            "99"
        );
    }
}
