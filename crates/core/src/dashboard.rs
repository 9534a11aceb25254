//! Read-side dashboard aggregation.
//!
//! Every aggregate here is a pure fold over rows the caller already holds;
//! `now` is always an explicit input so the folds stay deterministic under
//! test. [`DashboardService`] is the thin query wrapper the CLI uses to feed
//! them.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use dpr_store::{from_document, Direction, FilterOp, QuerySpec, RecordStore, Subscription};
use dpr_types::{Gender, Instant};

use crate::config::ClinicConfig;
use crate::history::AgendaEntry;
use crate::history::HistoryGlobalEntry;
use crate::patient::Patient;
use crate::{paths, ClinicResult};

/// Dashboard reporting window, anchored at the start of "today".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Span {
    Day,
    Week,
    Month,
}

impl Span {
    fn days(self) -> i64 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
        }
    }
}

/// Half-open range `[start_of_day(now), start_of_day(now) + span)`.
pub fn span_range(span: Span, now: Instant) -> (Instant, Instant) {
    let start = now.start_of_day();
    (start, start.add_days(span.days()))
}

fn in_span(at: Option<Instant>, span: Span, now: Instant) -> bool {
    let (start, end) = span_range(span, now);
    at.is_some_and(|at| at >= start && at < end)
}

/// Positive recorded payments over non-deleted rows in the span. Unset
/// amounts contribute nothing, they do not read as zero.
pub fn revenue(rows: &[HistoryGlobalEntry], span: Span, now: Instant) -> f64 {
    rows.iter()
        .filter(|row| !row.deleted && in_span(row.appointment_at, span, now))
        .filter_map(|row| row.payment_amount.get())
        .filter(|amount| *amount > 0.0)
        .sum()
}

/// Appointments in the span that have already happened, i.e. strictly before
/// `now`. One scheduled exactly at `now` has not been realized yet.
pub fn visits_realized(rows: &[HistoryGlobalEntry], span: Span, now: Instant) -> usize {
    rows.iter()
        .filter(|row| !row.deleted && in_span(row.appointment_at, span, now))
        .filter(|row| row.appointment_at.is_some_and(|at| at < now))
        .count()
}

/// Patients registered within the span.
pub fn new_patients(patients: &[Patient], span: Span, now: Instant) -> usize {
    patients
        .iter()
        .filter(|p| !p.deleted && in_span(Some(p.created_at), span, now))
        .count()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenderDistribution {
    pub female: usize,
    pub male: usize,
    pub unspecified: usize,
    pub other: usize,
}

pub fn gender_distribution(patients: &[Patient]) -> GenderDistribution {
    patients
        .iter()
        .filter(|p| !p.deleted)
        .fold(GenderDistribution::default(), |mut dist, p| {
            match p.gender {
                Gender::Female => dist.female += 1,
                Gender::Male => dist.male += 1,
                Gender::Unspecified => dist.unspecified += 1,
                Gender::Other => dist.other += 1,
            }
            dist
        })
}

/// Future appointments, soonest first. Rows soft-flagged by a purge are
/// filtered exactly like physically deleted ones.
pub fn upcoming(agenda: &[AgendaEntry], now: Instant) -> Vec<AgendaEntry> {
    let mut rows: Vec<AgendaEntry> = agenda
        .iter()
        .filter(|row| !row.deleted && !row.patient_deleted)
        .filter(|row| row.next_appointment_at.is_some_and(|at| at > now))
        .cloned()
        .collect();
    rows.sort_by_key(|row| row.next_appointment_at);
    rows
}

/// Calendar fold: day → number of upcoming appointments that day.
pub fn occupancy_by_day(agenda: &[AgendaEntry], now: Instant) -> BTreeMap<NaiveDate, usize> {
    let mut days = BTreeMap::new();
    for row in upcoming(agenda, now) {
        if let Some(at) = row.next_appointment_at {
            *days.entry(at.date()).or_insert(0) += 1;
        }
    }
    days
}

/// Everything the dashboard screen shows for one span.
#[derive(Clone, Debug)]
pub struct DashboardMetrics {
    pub span: Span,
    pub revenue: f64,
    pub visits_realized: usize,
    pub new_patients: usize,
    pub genders: GenderDistribution,
    pub upcoming: Vec<AgendaEntry>,
    pub occupancy: BTreeMap<NaiveDate, usize>,
}

pub struct DashboardService {
    store: Arc<dyn RecordStore>,
    config: Arc<ClinicConfig>,
}

impl DashboardService {
    pub fn new(store: Arc<dyn RecordStore>, config: Arc<ClinicConfig>) -> Self {
        Self { store, config }
    }

    /// Live agenda feed, soonest first. The caller owns the handle and must
    /// close (or drop) it when the dashboard goes away.
    pub async fn watch_agenda(&self) -> ClinicResult<Subscription> {
        let spec = QuerySpec::new().order_by("next_appointment_at", Direction::Asc);
        let sub = self
            .store
            .subscribe_query(&paths::agenda(self.config.clinic_id()), spec)
            .await?;
        Ok(sub)
    }

    pub async fn metrics(&self, span: Span, now: Instant) -> ClinicResult<DashboardMetrics> {
        let clinic = self.config.clinic_id();

        let mut history = Vec::new();
        for (id, doc) in self
            .store
            .query(&paths::history_global(clinic), &QuerySpec::new())
            .await?
        {
            let mut row: HistoryGlobalEntry = from_document(&doc)?;
            row.id = id;
            history.push(row);
        }

        let mut agenda = Vec::new();
        for (id, doc) in self
            .store
            .query(&paths::agenda(clinic), &QuerySpec::new())
            .await?
        {
            let mut row: AgendaEntry = from_document(&doc)?;
            row.id = id;
            agenda.push(row);
        }

        let mut patients = Vec::new();
        let spec = QuerySpec::new().filter("deleted", FilterOp::Eq, json!(false));
        for (id, doc) in self.store.query(&paths::patients(clinic), &spec).await? {
            let mut patient: Patient = from_document(&doc)?;
            patient.id = id;
            patients.push(patient);
        }

        Ok(DashboardMetrics {
            span,
            revenue: revenue(&history, span, now),
            visits_realized: visits_realized(&history, span, now),
            new_patients: new_patients(&patients, span, now),
            genders: gender_distribution(&patients),
            upcoming: upcoming(&agenda, now),
            occupancy: occupancy_by_day(&agenda, now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpr_types::Amount;

    fn row(appointment: &str, amount: Amount, deleted: bool) -> HistoryGlobalEntry {
        HistoryGlobalEntry {
            appointment_at: Instant::parse(appointment),
            payment_amount: amount,
            deleted,
            ..Default::default()
        }
    }

    fn agenda_row(next: &str, deleted: bool, patient_deleted: bool) -> AgendaEntry {
        AgendaEntry {
            next_appointment_at: Instant::parse(next),
            deleted,
            patient_deleted,
            ..Default::default()
        }
    }

    fn noon() -> Instant {
        Instant::parse("2026-06-10T12:00:00Z").unwrap()
    }

    #[test]
    fn span_ranges_anchor_at_midnight() {
        let (start, end) = span_range(Span::Day, noon());
        assert_eq!(start.to_wire(), "2026-06-10T00:00:00.000Z");
        assert_eq!(end.to_wire(), "2026-06-11T00:00:00.000Z");

        let (_, end) = span_range(Span::Week, noon());
        assert_eq!(end.to_wire(), "2026-06-17T00:00:00.000Z");
        let (_, end) = span_range(Span::Month, noon());
        assert_eq!(end.to_wire(), "2026-07-10T00:00:00.000Z");
    }

    #[test]
    fn revenue_sums_positive_in_span_payments_only() {
        let rows = vec![
            row("2026-06-10T09:00:00Z", Amount::Value(5000.0), false),
            row("2026-06-10T11:00:00Z", Amount::Value(10000.0), false),
            row("2026-06-10T10:00:00Z", Amount::Unset, false),
            row("2026-06-10T10:30:00Z", Amount::Value(0.0), false),
            row("2026-06-09T10:00:00Z", Amount::Value(700.0), false),
            row("2026-06-10T08:00:00Z", Amount::Value(900.0), true),
        ];
        assert_eq!(revenue(&rows, Span::Day, noon()), 15000.0);
    }

    #[test]
    fn visits_count_past_appointments_in_span() {
        let rows = vec![
            row("2026-06-10T09:00:00Z", Amount::Unset, false),
            row("2026-06-10T12:00:00Z", Amount::Unset, false), // exactly now
            row("2026-06-10T15:00:00Z", Amount::Unset, false), // later today
            row("2026-06-09T09:00:00Z", Amount::Unset, false), // yesterday
        ];
        // An appointment scheduled exactly at `now` is not realized yet.
        assert_eq!(visits_realized(&rows, Span::Day, noon()), 1);
        // The week span still starts today; yesterday stays out.
        assert_eq!(visits_realized(&rows, Span::Week, noon()), 1);
    }

    #[test]
    fn upcoming_filters_flags_and_sorts_ascending() {
        let rows = vec![
            agenda_row("2026-06-12T10:00:00Z", false, false),
            agenda_row("2026-06-11T10:00:00Z", false, false),
            agenda_row("2026-06-11T09:00:00Z", true, false),
            agenda_row("2026-06-11T08:00:00Z", false, true),
            agenda_row("2026-06-01T08:00:00Z", false, false), // past
        ];
        let up = upcoming(&rows, noon());
        assert_eq!(up.len(), 2);
        assert!(up[0].next_appointment_at < up[1].next_appointment_at);
    }

    #[test]
    fn occupancy_buckets_by_calendar_day() {
        let rows = vec![
            agenda_row("2026-06-11T08:00:00Z", false, false),
            agenda_row("2026-06-11T16:00:00Z", false, false),
            agenda_row("2026-06-12T09:00:00Z", false, false),
        ];
        let days = occupancy_by_day(&rows, noon());
        assert_eq!(days.len(), 2);
        assert_eq!(days[&NaiveDate::from_ymd_opt(2026, 6, 11).unwrap()], 2);
        assert_eq!(days[&NaiveDate::from_ymd_opt(2026, 6, 12).unwrap()], 1);
    }

    #[tokio::test]
    async fn agenda_feed_delivers_snapshots_until_closed() {
        use dpr_store::{to_document, MemoryStore};

        let store = Arc::new(MemoryStore::new());
        let svc = DashboardService::new(store.clone(), Arc::new(crate::ClinicConfig::default()));

        let mut feed = svc.watch_agenda().await.unwrap();
        assert!(feed.next_snapshot().await.unwrap().is_empty());

        store
            .set_merge(
                "clinics/clinica-principal/agenda/p1_e1",
                to_document(&json!({
                    "title": "control",
                    "next_appointment_at": "2026-06-11T08:00:00.000Z",
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        let snap = feed.next_snapshot().await.unwrap();
        assert_eq!(snap.len(), 1);
        feed.close();
    }

    #[test]
    fn gender_distribution_skips_deleted_patients() {
        let mut a = Patient::default();
        a.gender = Gender::Female;
        let mut b = Patient::default();
        b.gender = Gender::Male;
        b.deleted = true;

        let dist = gender_distribution(&[a, b]);
        assert_eq!(dist.female, 1);
        assert_eq!(dist.male, 0);
    }
}
