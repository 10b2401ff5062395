use serde_json::json;

use form_spec::{
    FieldSpec, FieldType, FormSpec, ValueMap, VisibilityMode, resolve_visibility, validate,
};

fn fixture(name: &str) -> &'static str {
    match name {
        "intake_form" => include_str!("../tests/fixtures/intake_form.json"),
        "tabbed_form" => include_str!("../tests/fixtures/tabbed_form.json"),
        _ => panic!("unknown fixture {}", name),
    }
}

fn make_simple_form() -> FormSpec {
    FormSpec::new(
        "simple",
        "Simple",
        vec![
            FieldSpec::new("name", FieldType::Text, "Name").required(),
            FieldSpec::new("flag", FieldType::Boolean, "Flag"),
        ],
    )
}

#[test]
fn fixtures_pass_spec_check() {
    for name in ["intake_form", "tabbed_form"] {
        let spec: FormSpec = serde_json::from_str(fixture(name)).expect("deserialize");
        spec.check().expect("valid spec");
    }
}

#[test]
fn validation_reports_missing() {
    let spec = make_simple_form();
    let result = validate(&spec, &ValueMap::new());
    assert!(!result.valid);
    assert_eq!(result.missing_required, vec!["name"]);
}

#[test]
fn validation_reports_unknown_fields() {
    let spec = make_simple_form();
    let values = ValueMap::from_json(json!({ "name": "Ada", "extra": 1 }));
    let result = validate(&spec, &values);
    assert!(!result.valid);
    assert_eq!(result.unknown_fields, vec!["extra"]);
}

#[test]
fn hidden_page_fields_are_not_required() {
    let spec: FormSpec = serde_json::from_str(fixture("intake_form")).expect("deserialize");
    let values = ValueMap::from_json(json!({
        "country": "CA",
        "age": 40,
        "weight_kg": 70,
        "height_cm": 175
    }));
    let visibility = resolve_visibility(&spec, &values, VisibilityMode::Visible);
    assert_eq!(visibility.get("state"), Some(&false));
    assert_eq!(visibility.get("packs_per_day"), Some(&false));

    let result = validate(&spec, &values);
    assert!(result.valid, "unexpected result: {:?}", result);
}

#[test]
fn cross_field_failure_is_reported_for_each_field() {
    let spec: FormSpec = serde_json::from_str(fixture("intake_form")).expect("deserialize");
    let values = ValueMap::from_json(json!({
        "country": "CA",
        "age": 40,
        "weight_kg": 300,
        "height_cm": 175
    }));
    let result = validate(&spec, &values);
    assert!(!result.valid);
    let fields: Vec<_> = result
        .errors
        .iter()
        .filter(|error| error.code.as_deref() == Some("cross_field"))
        .filter_map(|error| error.field.clone())
        .collect();
    assert_eq!(fields, vec!["weight_kg", "height_cm"]);
}

#[test]
fn constraint_message_is_used_for_pattern() {
    let spec: FormSpec = serde_json::from_str(fixture("intake_form")).expect("deserialize");
    let values = ValueMap::from_json(json!({
        "country": "US",
        "age": 40,
        "state": "WA",
        "zip": "98",
        "weight_kg": 70,
        "height_cm": 175
    }));
    let result = validate(&spec, &values);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].message, "ZIP must be five digits");
    assert_eq!(result.errors[0].path.as_deref(), Some("/zip"));
}
