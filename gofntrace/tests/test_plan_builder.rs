//! Command line → config → plan, over the fake binary

mod common;

use clap::Parser;
use common::FakeBinary;
use gofntrace::cli::Args;
use gofntrace::config::TracerConfig;
use gofntrace::domain::PlanError;
use gofntrace::plan::{self, InstrumentationPlan, ProbeKind};

fn binary() -> FakeBinary {
    FakeBinary::new(&[
        ("main.main", &[0x80]),
        ("main.add", &[0x20]),
        ("main.add1", &[0x18, 0x40]),
        ("main.add3", &[0x30]),
        ("main.minus", &[0x10]),
        ("main.(*Server).Handle", &[0x50]),
        ("github.com/app/vendor/github.com/lib.Do", &[0x8]),
    ])
}

fn plan_from(argv: &[&str]) -> Result<InstrumentationPlan, PlanError> {
    let mut full = vec!["gofntrace", "./app"];
    full.extend_from_slice(argv);
    let config = TracerConfig::from_args(&Args::try_parse_from(full).unwrap())?;
    plan::build(&binary(), &config.plan)
}

fn traced_functions(plan: &InstrumentationPlan) -> Vec<&str> {
    plan.points()
        .iter()
        .filter(|p| p.kind == ProbeKind::Entry)
        .map(|p| p.function_name.as_str())
        .collect()
}

#[test]
fn test_wildcard_selects_matching_functions() {
    let plan = plan_from(&["-u", "main.add*"]).unwrap();
    assert_eq!(traced_functions(&plan), vec!["main.add", "main.add1", "main.add3"]);
    // 3 entries + 4 returns + goexit1
    assert_eq!(plan.len(), 8);
    assert_eq!(plan.points().last().unwrap().kind, ProbeKind::ThreadExit);
    assert_eq!(plan.selected_count(), 3);
}

#[test]
fn test_targets_narrow_selection_not_probing() {
    let plan = plan_from(&["-u", "main.*", "main.add1(x=(%ax):s64)"]).unwrap();
    assert_eq!(plan.function_count(), 6);
    assert_eq!(plan.selected_count(), 1);

    let (_, entry) = plan.lookup("main.add1", 0).unwrap();
    assert!(entry.is_selected);
    assert_eq!(entry.argument_specs.len(), 1);
    assert_eq!(entry.argument_specs[0].name, "x");

    let (_, ret) = plan.lookup("main.add1", 0x40).unwrap();
    assert_eq!(ret.kind, ProbeKind::Return);
    assert!(ret.argument_specs.is_empty());
}

#[test]
fn test_method_target_with_arguments() {
    let plan = plan_from(&["-u", "main.(*Server).*", "main.(*Server).Handle(req=(+8(%bx)):u64)"]).unwrap();
    let (_, entry) = plan.lookup("main.(*Server).Handle", 0).unwrap();
    assert_eq!(entry.argument_specs[0].describe_rules(), "%bx -> +8");
}

#[test]
fn test_vendor_filtering_flags() {
    let plan = plan_from(&["-u", "*lib.Do"]);
    assert!(matches!(plan, Err(PlanError::NoMatch(_))));

    let plan = plan_from(&["-u", "*lib.Do", "--include-vendor"]).unwrap();
    assert_eq!(traced_functions(&plan), vec!["github.com/app/vendor/github.com/lib.Do"]);
}

#[test]
fn test_unknown_target_fails() {
    let err = plan_from(&["-u", "main.*", "main.nope"]).unwrap_err();
    assert!(matches!(err, PlanError::SymbolNotFound { ref name, .. } if name == "main.nope"));
}

#[test]
fn test_bad_fetch_statement_fails() {
    let err = plan_from(&["-u", "main.*", "main.add(x=(+16(%ax)):u99)"]).unwrap_err();
    assert!(matches!(err, PlanError::FetchArg(_)));
}

#[test]
fn test_plan_dump_json() {
    let plan = plan_from(&["-u", "main.add", "main.add(x=(+16(%ax)):u64)"]).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.json");
    plan.write_json(std::fs::File::create(&path).unwrap()).unwrap();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let points = json["points"].as_array().unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[0]["function_name"], "main.add");
    assert_eq!(points[0]["kind"], "entry");
    assert_eq!(points[0]["argument_specs"][0]["statement"], "(+16(%ax)):u64");
    assert_eq!(points[1]["kind"], "return");
    assert_eq!(points[1]["offset_from_entry"], 0x20);
    assert_eq!(points[2]["kind"], "thread_exit");
    assert!(points[1].get("argument_specs").is_none());
}
