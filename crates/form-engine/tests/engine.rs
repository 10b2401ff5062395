use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Value, json};

use form_engine::form_spec::{FieldSpec, FieldType, FormSpec, TabSpec, ValueMap};
use form_engine::{
    BoxError, EngineError, FormEngine, FormEvent, NavOutcome, Screen, SubmitError, SubmitOutcome,
};

fn fixture(name: &str) -> &'static str {
    match name {
        "intake_form" => include_str!("../../form-spec/tests/fixtures/intake_form.json"),
        "tabbed_form" => include_str!("../../form-spec/tests/fixtures/tabbed_form.json"),
        _ => panic!("unknown fixture {}", name),
    }
}

fn spec(name: &str) -> FormSpec {
    serde_json::from_str(fixture(name)).expect("deserialize")
}

fn intake() -> FormEngine {
    FormEngine::new(spec("intake_form")).expect("engine")
}

#[test]
fn hidden_page_shrinks_total_and_snaps_back() {
    let mut engine = intake();
    assert_eq!(engine.total_pages(), 2);

    engine.set_value("country", "US");
    engine.set_value("age", 40);
    assert_eq!(engine.total_pages(), 3);

    assert!(engine.next_page().moved());
    engine.set_value("state", "NY");
    assert!(engine.next_page().moved());
    assert_eq!(engine.current_page(), 3);
    engine.set_value("weight_kg", 70);
    engine.set_value("height_cm", 180);

    assert!(engine.previous_page().moved());
    assert_eq!(engine.current_page(), 2);

    engine.set_value("country", "CA");
    assert_eq!(engine.total_pages(), 2);
    assert_eq!(engine.current_page(), 1);
    assert_eq!(engine.current_screen(), &Screen::Page(1));

    engine.set_value("country", "US");
    assert_eq!(engine.total_pages(), 3);
    assert_eq!(engine.get("weight_kg"), Some(&json!(70)));
    assert_eq!(engine.get("height_cm"), Some(&json!(180)));
}

#[test]
fn next_is_blocked_by_an_empty_required_field() {
    let mut engine = intake();
    engine.set_value("country", "CA");

    let outcome = engine.next_page();
    assert_eq!(
        outcome,
        NavOutcome::Blocked {
            fields: vec!["age".to_string()]
        }
    );
    assert_eq!(engine.current_page(), 1);
    assert!(engine.meta("age").touched);
    assert!(!engine.meta("country").touched);

    engine.set_value("age", 30);
    assert_eq!(
        engine.next_page(),
        NavOutcome::Moved {
            from: Screen::Page(1),
            to: Screen::Page(3)
        }
    );
}

#[test]
fn invisible_fields_never_block() {
    let mut engine = intake();
    engine.set_values([
        ("country", json!("CA")),
        ("age", json!(52)),
        ("weight_kg", json!(80)),
        ("height_cm", json!(175)),
        ("smoker", json!(false)),
    ]);
    // out of range, but hidden while smoker is false
    engine.set_value("packs_per_day", 9);

    assert!(!engine.visible_fields().contains(&"packs_per_day".to_string()));
    assert!(engine.can_submit());

    engine.set_value("smoker", true);
    assert!(engine.visible_fields().contains(&"packs_per_day".to_string()));
    assert!(!engine.can_submit());
}

#[test]
fn jump_forward_validates_every_page_in_between() {
    let mut engine = intake();
    engine.set_value("country", "US");
    engine.set_value("age", 30);

    assert_eq!(
        engine.jump_to_page(3),
        NavOutcome::Blocked {
            fields: vec!["state".to_string()]
        }
    );
    assert_eq!(engine.current_page(), 1);

    engine.set_value("state", "OR");
    assert!(engine.jump_to_page(3).moved());
    assert_eq!(engine.current_fields().first().map(String::as_str), Some("weight_kg"));

    // backwards is never gated
    engine.set_value("state", "");
    assert!(engine.jump_to_page(1).moved());
    assert_eq!(engine.jump_to_page(7), NavOutcome::Unchanged);
}

#[test]
fn cross_field_errors_appear_and_clear_on_both_fields() {
    let mut engine = intake();
    engine.set_value("weight_kg", 200);
    engine.set_value("height_cm", 180);

    let message = "weight cannot exceed height".to_string();
    assert!(engine.meta("weight_kg").errors.contains(&message));
    assert!(engine.meta("height_cm").errors.contains(&message));

    engine.set_value("height_cm", 250);
    assert!(engine.meta("weight_kg").errors.is_empty());
    assert!(engine.meta("height_cm").errors.is_empty());
}

#[test]
fn subscribers_see_values_and_meta_of_the_same_update() {
    let mut engine = intake();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    engine.subscribe(move |event, store| {
        if let FormEvent::ValuesChanged { fields } = event
            && fields.contains(&"age".to_string())
        {
            let age = store.get("age").cloned().unwrap_or(Value::Null);
            let errors = store.meta("age").map(|meta| meta.errors.clone());
            sink.borrow_mut().push((age, errors.unwrap_or_default()));
        }
    });

    engine.set_value("age", 200);
    engine.set_value("age", 60);

    assert_eq!(
        *seen.borrow(),
        vec![
            (json!(200), vec!["value above maximum".to_string()]),
            (json!(60), vec![]),
        ]
    );
}

#[test]
fn batched_updates_notify_once() {
    let mut engine = intake();
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    let id = engine.subscribe(move |event, _| {
        if let FormEvent::ValuesChanged { fields } = event {
            sink.borrow_mut().push(fields.clone());
        }
    });

    let changed = engine.set_values([("country", json!("UK")), ("age", json!(33))]);
    assert_eq!(changed, vec!["country", "age"]);
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(engine.change_count("age"), 1);

    assert!(engine.unsubscribe(id));
    engine.set_value("age", 34);
    assert_eq!(events.borrow().len(), 1);
}

#[test]
fn unknown_fields_are_ignored() {
    let mut engine = intake();
    assert!(!engine.set_value("bmi", 22));
    assert!(engine.get("bmi").is_none());
    assert_eq!(engine.change_count("bmi"), 0);
}

#[test]
fn custom_rules_and_predicates_plug_in() {
    let spec = FormSpec::new(
        "dosing",
        "Dosing",
        vec![
            FieldSpec::new("dose_mg", FieldType::Number, "Dose (mg)").required(),
            FieldSpec::new("weight_kg", FieldType::Number, "Weight (kg)"),
            FieldSpec::new("pediatric_note", FieldType::Text, "Pediatric note"),
        ],
    );
    let mut engine = FormEngine::builder(spec)
        .field_validator("dose_mg", |value, _| {
            (value.as_f64().unwrap_or_default() > 1_000.0).then(|| "dose too high".to_string())
        })
        .cross_field("per-kg", ["dose_mg", "weight_kg"], |values: &ValueMap| {
            let dose = values.get("dose_mg").and_then(Value::as_f64)?;
            let weight = values.get("weight_kg").and_then(Value::as_f64)?;
            (dose / weight > 15.0).then(|| "more than 15 mg/kg".to_string())
        })
        .visible_when_reading("pediatric_note", ["weight_kg"], |values: &ValueMap| {
            values
                .get("weight_kg")
                .and_then(Value::as_f64)
                .is_some_and(|weight| weight < 40.0)
        })
        .build()
        .expect("engine");

    engine.set_value("dose_mg", 1_500);
    assert_eq!(engine.meta("dose_mg").errors, vec!["dose too high"]);

    engine.set_values([("dose_mg", json!(600)), ("weight_kg", json!(30))]);
    assert_eq!(engine.meta("dose_mg").errors, vec!["more than 15 mg/kg"]);
    assert_eq!(engine.meta("weight_kg").errors, vec!["more than 15 mg/kg"]);
    assert!(engine.is_visible("pediatric_note"));

    engine.set_value("weight_kg", 60);
    assert!(engine.meta("dose_mg").errors.is_empty());
    assert!(!engine.is_visible("pediatric_note"));
}

#[test]
fn registering_rules_for_unknown_fields_fails() {
    let result = FormEngine::builder(spec("intake_form"))
        .field_validator("bmi", |_, _| None)
        .build();
    assert!(matches!(
        result,
        Err(EngineError::UnknownField { field, .. }) if field == "bmi"
    ));

    let result = FormEngine::builder(spec("intake_form"))
        .page_visible_when(9, |_| true)
        .build();
    assert!(matches!(result, Err(EngineError::UnknownPage(9))));
}

#[test]
fn builder_loads_config_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("engine.json");
    std::fs::write(&path, r#"{ "auto_submit_ms": 250, "blur_debounce_ms": 40 }"#)
        .expect("write config");
    let engine = FormEngine::builder(spec("intake_form"))
        .config_file(&path)
        .expect("config")
        .build()
        .expect("engine");
    assert_eq!(engine.config().auto_submit_ms, Some(250));
    assert_eq!(engine.config().blur_debounce_ms, 40);
    assert_eq!(engine.config().async_debounce_ms, 500);

    let missing =
        FormEngine::builder(spec("intake_form")).config_file(dir.path().join("nope.json"));
    assert!(matches!(missing, Err(EngineError::Config(_))));

    std::fs::write(&path, "{ not json").expect("write config");
    let broken = FormEngine::builder(spec("intake_form")).config_file(&path);
    assert!(matches!(broken, Err(EngineError::Config(_))));
}

#[test]
fn tabs_follow_their_conditionals() {
    let mut engine = FormEngine::new(spec("tabbed_form")).expect("engine");
    assert_eq!(engine.active_tab(), Some("design"));
    assert_eq!(engine.visible_tabs(), vec!["design", "power"]);
    assert_eq!(engine.visible_fields(), vec!["alpha", "show_advanced"]);
    assert_eq!(engine.get("alpha"), Some(&json!(0.05)));

    assert_eq!(
        engine.select_tab("advanced").expect("known tab"),
        NavOutcome::Unchanged
    );
    assert!(matches!(
        engine.select_tab("bogus"),
        Err(EngineError::UnknownTab(_))
    ));

    assert!(engine.select_tab("power").expect("known tab").moved());
    assert_eq!(engine.current_page(), 2);
    assert_eq!(
        engine.next_page(),
        NavOutcome::Unchanged,
        "advanced is hidden, power is the last tab"
    );

    engine.set_value("show_advanced", true);
    assert_eq!(engine.total_pages(), 3);
    assert_eq!(
        engine.next_page(),
        NavOutcome::Blocked {
            fields: vec!["power".to_string()]
        }
    );
    engine.set_value("power", 0.8);
    assert!(engine.next_page().moved());
    assert_eq!(engine.active_tab(), Some("advanced"));

    engine.set_value("show_advanced", false);
    assert_eq!(engine.active_tab(), Some("design"));
}

#[test]
fn render_exposes_the_current_page() {
    let mut engine = intake();
    engine.set_value("country", "CA");
    engine.set_value("age", 200);

    let payload = engine.render();
    assert_eq!(payload.page, 1);
    assert_eq!(payload.total_pages, 2);
    let names: Vec<_> = payload.fields.iter().map(|field| field.name.as_str()).collect();
    assert_eq!(names, vec!["country", "age"]);
    // errors stay hidden until the field is touched
    assert!(payload.fields[1].errors.is_empty());
    assert_eq!(payload.fields[0].widget["type"], "Input.ChoiceSet");

    engine.blur("age");
    let payload = engine.render();
    assert_eq!(payload.fields[1].errors, vec!["value above maximum"]);
    assert_eq!(payload.fields[1].widget["errorMessage"], "value above maximum");
}

#[test]
fn reset_restores_defaults_and_first_screen() {
    let mut engine = FormEngine::new(spec("tabbed_form")).expect("engine");
    engine.set_value("alpha", 0.1);
    engine.set_value("power", 0.9);
    engine.blur("alpha");
    assert!(engine.select_tab("power").expect("known tab").moved());

    let resets = Rc::new(RefCell::new(0));
    let counter = resets.clone();
    engine.subscribe(move |event, _| {
        if *event == FormEvent::Reset {
            *counter.borrow_mut() += 1;
        }
    });

    engine.reset();
    assert_eq!(*resets.borrow(), 1);
    assert_eq!(engine.get("alpha"), Some(&json!(0.05)));
    assert!(engine.get("power").is_none());
    assert!(!engine.meta("alpha").touched);
    assert_eq!(engine.active_tab(), Some("design"));
    assert_eq!(engine.change_count("alpha"), 0);
}

#[test]
fn built_specs_place_fields_on_tabs_with_defaults() {
    let mut spec = FormSpec::new(
        "dose",
        "Dose",
        vec![
            FieldSpec::new("units", FieldType::Select, "Units")
                .with_choices(["mg", "ml"])
                .with_default("mg")
                .on_tab("dosage"),
            FieldSpec::new("amount", FieldType::Number, "Amount")
                .required()
                .on_tab("dosage"),
            FieldSpec::new("notes", FieldType::TextArea, "Notes").on_tab("notes"),
        ],
    );
    spec.tabs = ["dosage", "notes"]
        .into_iter()
        .map(|id| TabSpec {
            id: id.to_string(),
            label: None,
            visible_when: None,
            dependencies: Vec::new(),
        })
        .collect();

    let mut engine = FormEngine::new(spec).expect("engine");
    assert_eq!(engine.get("units"), Some(&json!("mg")));
    assert_eq!(engine.current_fields(), vec!["units", "amount"]);
    assert_eq!(engine.total_pages(), 2);

    assert!(!engine.next_page().moved());
    assert!(engine.meta("amount").touched);
    engine.set_value("amount", 2.5);
    assert!(engine.next_page().moved());
    assert_eq!(engine.active_tab(), Some("notes"));
    assert_eq!(engine.current_page(), 2);
}

#[tokio::test]
async fn submit_is_gated_and_hands_over_values() {
    let received = Rc::new(RefCell::new(None));
    let sink = received.clone();
    let mut engine = FormEngine::builder(spec("intake_form"))
        .submit_handler(move |values: ValueMap| {
            *sink.borrow_mut() = Some(values);
            async { Ok::<(), BoxError>(()) }
        })
        .build()
        .expect("engine");

    engine.set_value("country", "CA");
    let outcome = engine.submit().await.expect("submit");
    assert_eq!(
        outcome,
        SubmitOutcome::Blocked {
            fields: vec![
                "age".to_string(),
                "weight_kg".to_string(),
                "height_cm".to_string()
            ]
        }
    );
    assert!(engine.meta("weight_kg").touched);
    assert!(received.borrow().is_none());

    engine.set_values([
        ("age", json!(61)),
        ("weight_kg", json!(72)),
        ("height_cm", json!(168)),
    ]);
    assert!(engine.can_submit());
    assert_eq!(engine.submit().await.expect("submit"), SubmitOutcome::Submitted);

    let status = engine.status();
    assert!(status.submitted);
    assert!(!status.is_submitting);
    assert_eq!(status.submit_count, 1);
    let values = received.borrow().clone().expect("handler called");
    assert_eq!(values.get("age"), Some(&json!(61)));
}

#[tokio::test]
async fn submit_errors_reach_the_caller() {
    let mut engine = FormEngine::builder(spec("tabbed_form"))
        .submit_handler(|_values: ValueMap| async {
            Err::<(), BoxError>("backend unavailable".into())
        })
        .build()
        .expect("engine");
    engine.set_value("power", 0.8);

    let result = engine.submit().await;
    assert!(matches!(result, Err(SubmitError::Handler(_))));
    let status = engine.status();
    assert!(!status.submitted);
    assert!(!status.is_submitting);
    assert_eq!(status.submit_count, 1);
}
