//! Staff KPI scoring, bonuses, and per-period ranking.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::store::PosStore;
use crate::sync;
use crate::types::*;

/// Metric weights, in the field order of [`KpiMetrics`].
const WEIGHTS: [(f64, fn(&KpiMetrics) -> f64); 8] = [
    (15.0, |m| m.meal_prep_time),
    (20.0, |m| m.attendance),
    (10.0, |m| m.emergency_leave),
    (15.0, |m| m.upselling),
    (15.0, |m| m.customer_rating),
    (10.0, |m| m.waste_reduction),
    (5.0, |m| m.training_complete),
    (10.0, |m| m.ot_willingness),
];

/// Monthly bonus at a perfect score.
const FULL_BONUS: f64 = 200.0;

/// Weighted average of the 0-100 metrics, rounded to an integer.
pub fn overall_score(metrics: &KpiMetrics) -> i64 {
    let total_weight: f64 = WEIGHTS.iter().map(|(w, _)| w).sum();
    let weighted: f64 = WEIGHTS.iter().map(|(w, get)| w * get(metrics)).sum();
    (weighted / total_weight).round() as i64
}

pub fn bonus_for_score(score: i64) -> f64 {
    (FULL_BONUS * score as f64 / 100.0).round()
}

/// Record (or replace) a staff member's evaluation for a period, then
/// recompute the ranking of everyone scored in that period.
pub fn submit_kpi(
    store: &Arc<PosStore>,
    staff_id: &str,
    period: &str,
    metrics: KpiMetrics,
) -> StaffKpi {
    let score = overall_score(&metrics);

    let (entry, created, rank_changed) = {
        let mut state = store.state();
        let staff_name = state
            .staff
            .iter()
            .find(|s| s.id == staff_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| staff_id.to_string());

        let now = now_rfc3339();
        let mut created = false;
        let entry = match state
            .staff_kpi
            .iter_mut()
            .find(|k| k.staff_id == staff_id && k.period == period)
        {
            Some(existing) => {
                existing.metrics = metrics;
                existing.overall_score = score;
                existing.bonus_amount = bonus_for_score(score);
                existing.staff_name = staff_name;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let entry = StaffKpi {
                    id: Uuid::new_v4().to_string(),
                    staff_id: staff_id.to_string(),
                    staff_name,
                    period: period.to_string(),
                    metrics,
                    overall_score: score,
                    bonus_amount: bonus_for_score(score),
                    rank: 0,
                    updated_at: now,
                };
                state.staff_kpi.insert(0, entry.clone());
                created = true;
                entry
            }
        };

        // Recompute the period's ranking, best score first.
        let mut period_ids: Vec<(String, i64)> = state
            .staff_kpi
            .iter()
            .filter(|k| k.period == period)
            .map(|k| (k.id.clone(), k.overall_score))
            .collect();
        period_ids.sort_by(|a, b| b.1.cmp(&a.1));

        let mut rank_changed = Vec::new();
        for (position, (id, _)) in period_ids.iter().enumerate() {
            let kpi = state
                .staff_kpi
                .iter_mut()
                .find(|k| &k.id == id)
                .filter(|k| k.rank != (position + 1) as u32);
            if let Some(kpi) = kpi {
                kpi.rank = (position + 1) as u32;
                rank_changed.push(kpi.clone());
            }
        }

        store.persist_collection::<StaffKpi>(&state);
        let entry = state
            .staff_kpi
            .iter()
            .find(|k| k.id == entry.id)
            .cloned()
            .unwrap_or(entry);
        (entry, created, rank_changed)
    };

    info!(
        staff = entry.staff_name,
        period,
        score = entry.overall_score,
        rank = entry.rank,
        "kpi recorded"
    );

    // A first evaluation is a row the remote has never seen, so it must go
    // out as an insert (which also backfills a server-assigned id); only a
    // resubmission patches the existing remote row. Reshuffled peers always
    // exist remotely already.
    if created {
        sync::push_insert(store, entry.clone());
    } else {
        sync::push_update(store, entry.clone());
    }
    for changed in rank_changed {
        if changed.id != entry.id {
            sync::push_update(store, changed);
        }
    }
    entry
}

/// Evaluations for one `YYYY-MM` period, best rank first.
pub fn period_kpis(store: &Arc<PosStore>, period: &str) -> Vec<StaffKpi> {
    let mut kpis: Vec<StaffKpi> = store
        .state()
        .staff_kpi
        .iter()
        .filter(|k| k.period == period)
        .cloned()
        .collect();
    kpis.sort_by_key(|k| k.rank);
    kpis
}

// ===========================================================================
// Tests
// ===========================================================================
