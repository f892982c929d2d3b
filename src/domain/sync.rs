//! Diff & Sync Engine: compares a fresh scrape against the known ticket set
//! and decides what to delete and what to treat as newly arrived.
//!
//! Planning is pure: [`plan_cycle`] performs no I/O, so the safety guards
//! (filter integrity, mass-deletion suppression) are unit-testable without a
//! session or a store. The worker loop applies the resulting plan.

use std::collections::HashSet;

use crate::domain::ticket::TicketRecord;

/// Status markers the enforced "Nova" filter should have excluded. Seeing any
/// of these in a scrape means the portal's filter silently broke.
const FOREIGN_STATUS_MARKERS: [&str; 3] = ["atendimento", "aguardando", "fechado"];

/// Disappearances above this count are candidates for the mass-deletion guard.
pub const MASS_DELETE_MIN_COUNT: usize = 5;
/// ...and only trip the guard when they also exceed this share of the known set.
pub const MASS_DELETE_MIN_RATIO: f64 = 0.2;

/// True when a scraped status belongs to a ticket the filter should have hidden.
pub fn is_foreign_status(status: &str) -> bool {
    let status = status.to_lowercase();
    FOREIGN_STATUS_MARKERS
        .iter()
        .any(|marker| status.contains(marker))
}

/// Outcome of planning one synchronization cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPlan {
    /// The scrape contains statuses the filter should have excluded. Nothing
    /// may be mutated this cycle; the filters must be reapplied instead.
    FilterBreach { offending: Vec<String> },
    /// The scrape came back empty. Indistinguishable from a transient render
    /// glitch, so the cycle is a no-op and the comparison reruns next cycle.
    EmptyScrape,
    /// Safe to apply.
    Apply(CyclePlan),
}

/// Concrete mutations for one cycle, in application order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CyclePlan {
    /// Known ticket numbers that vanished from the portal and should be
    /// deleted from the store. Empty when the mass-deletion guard tripped.
    pub to_delete: Vec<String>,
    /// Disappearances withheld by the mass-deletion guard this cycle.
    pub suppressed_deletions: usize,
    /// Genuinely new tickets, in scrape order.
    pub to_process: Vec<TicketRecord>,
    /// New ticket numbers skipped because an operator ignored them.
    pub to_skip: Vec<String>,
}

impl CyclePlan {
    pub fn is_noop(&self) -> bool {
        self.to_delete.is_empty() && self.to_process.is_empty() && self.to_skip.is_empty()
    }
}

/// Compute the sync plan for one cycle.
///
/// Guards, in order:
/// 1. Filter integrity: any foreign status aborts the whole sync step, because
///    a broken filter would make in-progress tickets look removed or new.
/// 2. Empty scrape: skipped entirely rather than interpreted as "all deleted".
/// 3. Mass deletion: a disappearance set that is both larger than
///    [`MASS_DELETE_MIN_COUNT`] and more than [`MASS_DELETE_MIN_RATIO`] of the
///    known set is treated as a probable partial render; deletions are skipped
///    and retried against a fresh scrape next cycle.
pub fn plan_cycle(
    scraped: &[TicketRecord],
    known: &HashSet<String>,
    ignored: &HashSet<String>,
) -> SyncPlan {
    let offending: Vec<String> = scraped
        .iter()
        .filter(|t| is_foreign_status(&t.status))
        .map(|t| t.number.clone())
        .collect();
    if !offending.is_empty() {
        return SyncPlan::FilterBreach { offending };
    }

    if scraped.is_empty() {
        return SyncPlan::EmptyScrape;
    }

    let scraped_numbers: HashSet<&str> = scraped.iter().map(|t| t.number.as_str()).collect();

    let disappeared: Vec<String> = known
        .iter()
        .filter(|number| !scraped_numbers.contains(number.as_str()))
        .cloned()
        .collect();

    let mass_deletion = disappeared.len() > MASS_DELETE_MIN_COUNT
        && (disappeared.len() as f64) > (known.len() as f64) * MASS_DELETE_MIN_RATIO;

    let (to_delete, suppressed_deletions) = if mass_deletion {
        (Vec::new(), disappeared.len())
    } else {
        (disappeared, 0)
    };

    let mut to_process = Vec::new();
    let mut to_skip = Vec::new();
    for ticket in scraped {
        if known.contains(&ticket.number) {
            continue;
        }
        if ignored.contains(&ticket.number) {
            to_skip.push(ticket.number.clone());
        } else {
            to_process.push(ticket.clone());
        }
    }

    SyncPlan::Apply(CyclePlan {
        to_delete,
        suppressed_deletions,
        to_process,
        to_skip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(number: &str) -> TicketRecord {
        TicketRecord {
            number: number.to_string(),
            status: "Nova".to_string(),
            ..TicketRecord::default()
        }
    }

    fn known(numbers: &[&str]) -> HashSet<String> {
        numbers.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn scenario_a_one_disappeared_one_arrived() {
        let scraped = vec![ticket("101"), ticket("102")];
        let plan = plan_cycle(&scraped, &known(&["100", "101"]), &HashSet::new());

        let SyncPlan::Apply(plan) = plan else {
            panic!("expected an applicable plan, got {plan:?}");
        };
        assert_eq!(plan.to_delete, vec!["100".to_string()]);
        assert_eq!(plan.suppressed_deletions, 0);
        assert_eq!(plan.to_process.len(), 1);
        assert_eq!(plan.to_process[0].number, "102");
        assert!(plan.to_skip.is_empty());
    }

    #[test]
    fn scenario_b_mass_disappearance_suppresses_deletions() {
        // 10 known, 8 disappeared: 8 > 5 and 80% > 20%.
        let known = known(&["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"]);
        let scraped = vec![ticket("1"), ticket("2")];

        let SyncPlan::Apply(plan) = plan_cycle(&scraped, &known, &HashSet::new()) else {
            panic!("guard must suppress deletions, not abort the cycle");
        };
        assert!(plan.to_delete.is_empty());
        assert_eq!(plan.suppressed_deletions, 8);
        assert!(plan.to_process.is_empty());
    }

    #[test]
    fn small_disappearance_below_count_threshold_is_applied() {
        // 5 disappeared out of 6 known: ratio trips but count does not (5 is not > 5).
        let known = known(&["1", "2", "3", "4", "5", "6"]);
        let scraped = vec![ticket("6")];

        let SyncPlan::Apply(plan) = plan_cycle(&scraped, &known, &HashSet::new()) else {
            panic!("expected an applicable plan");
        };
        assert_eq!(plan.to_delete.len(), 5);
        assert_eq!(plan.suppressed_deletions, 0);
    }

    #[test]
    fn large_disappearance_below_ratio_threshold_is_applied() {
        // 6 disappeared out of 100 known: count trips but 6% is under 20%.
        let known: HashSet<String> = (1..=100).map(|n| n.to_string()).collect();
        let scraped: Vec<TicketRecord> =
            (7..=100).map(|n| ticket(&n.to_string())).collect();

        let SyncPlan::Apply(plan) = plan_cycle(&scraped, &known, &HashSet::new()) else {
            panic!("expected an applicable plan");
        };
        assert_eq!(plan.to_delete.len(), 6);
    }

    #[test]
    fn scenario_c_foreign_status_aborts_cycle() {
        let mut scraped = vec![ticket("200"), ticket("201")];
        scraped[1].status = "Aguardando".to_string();

        let plan = plan_cycle(&scraped, &known(&["200"]), &HashSet::new());
        assert_eq!(
            plan,
            SyncPlan::FilterBreach {
                offending: vec!["201".to_string()]
            }
        );
    }

    #[test]
    fn foreign_status_detection_is_case_insensitive() {
        assert!(is_foreign_status("Em Atendimento"));
        assert!(is_foreign_status("AGUARDANDO"));
        assert!(is_foreign_status("Fechado"));
        assert!(!is_foreign_status("Nova"));
    }

    #[test]
    fn ignored_arrivals_are_skipped_not_processed() {
        let scraped = vec![ticket("300"), ticket("301")];
        let ignored: HashSet<String> = ["301".to_string()].into_iter().collect();

        let SyncPlan::Apply(plan) = plan_cycle(&scraped, &HashSet::new(), &ignored) else {
            panic!("expected an applicable plan");
        };
        assert_eq!(plan.to_process.len(), 1);
        assert_eq!(plan.to_process[0].number, "300");
        assert_eq!(plan.to_skip, vec!["301".to_string()]);
    }

    #[test]
    fn unchanged_scrape_plans_no_work_twice() {
        let scraped = vec![ticket("400"), ticket("401")];
        let known = known(&["400", "401"]);

        for _ in 0..2 {
            let SyncPlan::Apply(plan) = plan_cycle(&scraped, &known, &HashSet::new()) else {
                panic!("expected an applicable plan");
            };
            assert!(plan.is_noop());
        }
    }

    #[test]
    fn empty_scrape_is_a_noop_not_a_deletion() {
        let plan = plan_cycle(&[], &known(&["1", "2"]), &HashSet::new());
        assert_eq!(plan, SyncPlan::EmptyScrape);
    }

    #[test]
    fn arrivals_keep_scrape_order() {
        let scraped = vec![ticket("9"), ticket("3"), ticket("7")];
        let SyncPlan::Apply(plan) = plan_cycle(&scraped, &HashSet::new(), &HashSet::new())
        else {
            panic!("expected an applicable plan");
        };
        let order: Vec<&str> = plan.to_process.iter().map(|t| t.number.as_str()).collect();
        assert_eq!(order, vec!["9", "3", "7"]);
    }
}
