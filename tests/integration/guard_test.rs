//! Query Guard Integration Tests
//!
//! Generated SQL shapes the guard must refuse or repair before a query
//! reaches the warehouse, checked against the default registry and profile.

use insight_cascade_core::{DatasetProfile, PeriodPair, SchemaRegistry, TableTarget};
use insight_cascade_tools::{GuardViolation, QueryGuard, TableQualifier};

fn guard() -> QueryGuard {
    QueryGuard::new(
        &SchemaRegistry::default(),
        &DatasetProfile::default(),
        Some(TableQualifier::new("proj", "velocity_ai_iis")),
    )
    .unwrap()
}

fn periods() -> PeriodPair {
    DatasetProfile::default().default_periods
}

fn correlation_target() -> TableTarget {
    let [a, b] = DatasetProfile::default().correlation_tables;
    TableTarget::MultiTable { sources: [a, b] }
}

#[test]
fn test_comma_join_on_vendor_is_refused() {
    let sql = "SELECT CORR(s.Total_Sales_Volume, a.CurrentQuarter_Sentiment_Shift) AS corr_vs \
               FROM agg_sales_tenure_performance s, agg_agent_performance a \
               WHERE s.Vendor_Name = a.Vendor_Name";
    let err = guard()
        .prepare(sql, &correlation_target(), &periods())
        .unwrap_err();
    assert!(matches!(err, GuardViolation::ImplicitJoin { .. }));
}

#[test]
fn test_period_filters_outside_the_pair_are_refused() {
    let g = guard();
    let target = TableTarget::single("agg_region_performance");
    for sql in [
        "SELECT Region FROM agg_region_performance WHERE Quarter = \"2024-07-01\"",
        "SELECT Region FROM agg_region_performance WHERE Quarter BETWEEN '2024-01-01' AND '2026-01-01'",
        "SELECT Region FROM agg_region_performance WHERE Quarter > '2024-01-01'",
    ] {
        let err = g.prepare(sql, &target, &periods()).unwrap_err();
        assert!(
            matches!(err, GuardViolation::ForeignPeriod { .. }),
            "{} -> {:?}",
            sql,
            err
        );
    }
}

#[test]
fn test_case_ratio_is_made_safe_and_qualified() {
    let sql = guard()
        .prepare(
            "SELECT Region, CASE WHEN SUM(b) > 0 THEN SUM(a) ELSE 0 END / SUM(b) AS ratio \
             FROM agg_region_performance WHERE Quarter = '2026-01-01' GROUP BY Region",
            &TableTarget::single("agg_region_performance"),
            &periods(),
        )
        .unwrap();
    assert!(sql.contains(
        "SAFE_DIVIDE(CASE WHEN SUM(b) > 0 THEN SUM(a) ELSE 0 END, SUM(b)) AS ratio"
    ));
    assert!(sql.contains("`proj.velocity_ai_iis.agg_region_performance`"));
    assert!(!sql.contains(" / "));
}
