use chrono::{Datelike, NaiveDate, Weekday};
use filingdesk_core::model::period::PeriodError;
use filingdesk_core::{DueDateError, Period, Periodicity, RuleCatalog};
use proptest::prelude::*;
use proptest::test_runner::Config;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn catalog() -> RuleCatalog {
    RuleCatalog::builtin().unwrap()
}

#[test]
fn gstr_3b_october_is_due_twentieth_of_november() {
    assert_eq!(catalog().due_date("GSTR-3B", "2025-10").unwrap(), date(2025, 11, 20));
}

#[test]
fn due_dates_on_weekends_roll_forward_to_monday() {
    let catalog = catalog();
    // 2025-12-20 is a Saturday.
    assert_eq!(catalog.due_date("GSTR-3B", "2025-11").unwrap(), date(2025, 12, 22));
    // 2025-10-11 is a Saturday.
    assert_eq!(catalog.due_date("GSTR-1", "2025-09").unwrap(), date(2025, 10, 13));
}

#[test]
fn due_dates_on_holidays_roll_to_next_business_day() {
    // 2025-10-20 is a listed holiday.
    assert_eq!(catalog().due_date("GSTR-3B", "2025-09").unwrap(), date(2025, 10, 21));
}

#[test]
fn day_of_following_month_clamps_to_month_end() {
    assert_eq!(catalog().due_date("PT-MH", "2025-01").unwrap(), date(2025, 2, 28));
}

#[test]
fn fiscal_periods_use_april_year_start() {
    let catalog = catalog();
    assert_eq!(catalog.due_date("TDS-24Q", "2025-Q1").unwrap(), date(2025, 7, 31));
    assert_eq!(catalog.due_date("GSTR-9", "2024").unwrap(), date(2025, 12, 31));
}

#[test]
fn periods_before_effective_date_are_rejected() {
    let err = catalog().due_date("GSTR-3B", "2017-06").unwrap_err();
    match err {
        DueDateError::InvalidPeriod {
            rule_code,
            period,
            effective_from,
        } => {
            assert_eq!(rule_code, "GSTR-3B");
            assert_eq!(period, "2017-06");
            assert_eq!(effective_from, date(2017, 7, 1));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn partially_effective_period_is_accepted() {
    // July 2017 starts on the effective date.
    assert_eq!(catalog().due_date("GSTR-3B", "2017-07").unwrap(), date(2017, 8, 21));
}

#[test]
fn unknown_rules_and_malformed_labels_fail() {
    let catalog = catalog();
    assert_eq!(
        catalog.due_date("GSTR-99", "2025-10").unwrap_err(),
        DueDateError::UnknownRule("GSTR-99".to_string())
    );
    assert!(matches!(
        catalog.due_date("GSTR-3B", "2025-13").unwrap_err(),
        DueDateError::Period(PeriodError::InvalidLabel { .. })
    ));
    assert!(matches!(
        catalog.due_date("GSTR-3B", "2025-Q1").unwrap_err(),
        DueDateError::Period(PeriodError::InvalidLabel { .. })
    ));
}

#[test]
fn retired_rules_reject_later_periods() {
    let catalog = RuleCatalog::from_json(
        r#"{
            "rules": [{
                "code": "OLD-RETURN",
                "name": "Retired return",
                "jurisdiction": "IN",
                "category": "other",
                "form_name": "OLD-1",
                "periodicity": "monthly",
                "due_rule": { "kind": "offset_days", "days": 10 },
                "effective_from": "2020-01-01",
                "effective_to": "2024-03-31"
            }]
        }"#,
    )
    .unwrap();

    assert!(catalog.due_date("OLD-RETURN", "2024-03").is_ok());
    assert!(matches!(
        catalog.due_date("OLD-RETURN", "2024-04").unwrap_err(),
        DueDateError::RuleRetired { .. }
    ));
}

proptest! {
    #![proptest_config(Config::with_cases(128))]
    #[test]
    fn due_date_is_deterministic_and_never_before_period_end(
        year in 2018_i32..2030_i32,
        month in 1_u32..=12_u32,
    ) {
        let catalog = catalog();
        let label = format!("{year:04}-{month:02}");
        for code in ["GSTR-3B", "GSTR-1", "TDS-PAYMENT", "PF-ECR"] {
            let first = catalog.due_date(code, &label).unwrap();
            let second = catalog.due_date(code, &label).unwrap();
            prop_assert_eq!(first, second);

            let rule = catalog.get(code).unwrap();
            let period = catalog.parse_period(rule, &label).unwrap();
            prop_assert!(first >= period.end());
            prop_assert!(!matches!(first.weekday(), Weekday::Sat | Weekday::Sun));
        }
    }

    #[test]
    fn containing_period_covers_the_date(
        days in 0_i64..4_000_i64,
        kind in 0_usize..4_usize,
    ) {
        let periodicity = [
            Periodicity::Monthly,
            Periodicity::Quarterly,
            Periodicity::HalfYearly,
            Periodicity::Annual,
        ][kind];
        let day = date(2018, 1, 1) + chrono::Duration::days(days);
        let period = Period::containing(day, periodicity, 4).unwrap();
        prop_assert!(period.start() <= day && day <= period.end());

        let next = period.next().unwrap();
        prop_assert_eq!(next.start(), period.end().succ_opt().unwrap());
        let reparsed = Period::parse(&period.label(), periodicity, 4).unwrap();
        prop_assert_eq!(reparsed, period);
    }
}
