use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde_json::{Value, json};

use form_engine::form_spec::{FieldSpec, FieldType, FormSpec, ValueMap};
use form_engine::{
    ASYNC_FAILURE_MESSAGE, BoxError, CancellationToken, EngineBuilder, FormEngine, SubmitOutcome,
};

type Calls = Rc<RefCell<Vec<String>>>;
type Tokens = Rc<RefCell<Vec<CancellationToken>>>;

fn signup() -> FormSpec {
    FormSpec::new(
        "signup",
        "Sign up",
        vec![
            FieldSpec::new("username", FieldType::Text, "Username").required(),
            FieldSpec::new("email", FieldType::Email, "Email"),
        ],
    )
}

/// Username check: "first" answers slowly, everything else quickly;
/// "taken" is rejected.
fn availability_check(calls: &Calls, tokens: &Tokens) -> EngineBuilder {
    let calls = calls.clone();
    let tokens = tokens.clone();
    FormEngine::builder(signup()).async_validator(
        "username",
        move |value: Value, _values: ValueMap, cancel: CancellationToken| {
            let name = value.as_str().unwrap_or_default().to_string();
            calls.borrow_mut().push(name.clone());
            tokens.borrow_mut().push(cancel);
            async move {
                let latency = if name == "first" { 1_000 } else { 100 };
                tokio::time::sleep(Duration::from_millis(latency)).await;
                if name == "taken" {
                    Ok::<_, BoxError>(Some("username is taken".to_string()))
                } else {
                    Ok(None)
                }
            }
        },
    )
}

#[tokio::test(start_paused = true)]
async fn latest_value_wins_over_a_slower_earlier_check() {
    let calls = Calls::default();
    let tokens = Tokens::default();
    let mut engine = availability_check(&calls, &tokens)
        .build()
        .expect("engine");

    engine.set_value("username", "first");
    tokio::time::advance(Duration::from_millis(600)).await;
    engine.poll();
    assert!(engine.meta("username").is_validating);
    assert!(engine.has_pending_validation());

    engine.set_value("username", "taken");
    assert!(tokens.borrow()[0].is_cancelled());
    assert!(!engine.meta("username").is_validating);

    engine.settle().await;
    assert_eq!(*calls.borrow(), vec!["first", "taken"]);
    assert_eq!(engine.meta("username").errors, vec!["username is taken"]);
    assert!(!engine.meta("username").is_validating);
    assert!(!engine.has_pending_validation());
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_are_debounced_into_one_check() {
    let calls = Calls::default();
    let tokens = Tokens::default();
    let mut engine = availability_check(&calls, &tokens)
        .build()
        .expect("engine");

    engine.set_value("username", "ta");
    tokio::time::advance(Duration::from_millis(200)).await;
    engine.poll();
    engine.set_value("username", "tak");
    tokio::time::advance(Duration::from_millis(200)).await;
    engine.poll();
    engine.set_value("username", "taken");
    engine.settle().await;

    assert_eq!(*calls.borrow(), vec!["taken"]);
    assert_eq!(engine.meta("username").errors, vec!["username is taken"]);

    engine.set_value("username", "free");
    assert!(
        engine.meta("username").errors.is_empty(),
        "async error is dropped as soon as the value changes"
    );
    engine.settle().await;
    assert!(engine.meta("username").errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn per_field_debounce_overrides_the_default() {
    let calls = Calls::default();
    let recorded = calls.clone();
    let mut engine = FormEngine::builder(signup())
        .async_validator_with_debounce(
            "email",
            Duration::from_millis(50),
            move |value: Value, _values: ValueMap, _cancel: CancellationToken| {
                recorded
                    .borrow_mut()
                    .push(value.as_str().unwrap_or_default().to_string());
                async move { Ok::<Option<String>, BoxError>(None) }
            },
        )
        .build()
        .expect("engine");

    engine.set_value("email", "ada@example.org");
    tokio::time::advance(Duration::from_millis(60)).await;
    engine.poll();
    assert_eq!(*calls.borrow(), vec!["ada@example.org"]);

    engine.settle().await;
    assert!(engine.meta("email").errors.is_empty());
    assert!(!engine.has_pending_validation());
}

#[tokio::test(start_paused = true)]
async fn failing_validators_degrade_to_a_generic_message() {
    let mut engine = FormEngine::builder(signup())
        .async_validator(
            "username",
            |value: Value, _values: ValueMap, _cancel: CancellationToken| async move {
                match value.as_str() {
                    Some("boom") => panic!("validator exploded"),
                    Some("offline") => Err::<Option<String>, BoxError>("network down".into()),
                    _ => Ok(None),
                }
            },
        )
        .build()
        .expect("engine");

    engine.set_value("username", "offline");
    engine.settle().await;
    assert_eq!(engine.meta("username").errors, vec![ASYNC_FAILURE_MESSAGE]);

    engine.set_value("username", "boom");
    engine.settle().await;
    assert_eq!(engine.meta("username").errors, vec![ASYNC_FAILURE_MESSAGE]);
    assert!(!engine.meta("username").is_validating);

    engine.set_value("username", "ok");
    engine.settle().await;
    assert!(engine.meta("username").errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn async_rules_wait_for_sync_rules_to_pass() {
    let calls = Calls::default();
    let tokens = Tokens::default();
    let mut engine = availability_check(&calls, &tokens)
        .field_validator("username", |value, _| {
            value
                .as_str()
                .is_some_and(|name| name.len() < 3)
                .then(|| "at least three characters".to_string())
        })
        .build()
        .expect("engine");

    engine.set_value("username", "ab");
    assert!(!engine.has_pending_validation());
    engine.settle().await;
    assert!(calls.borrow().is_empty());
    assert_eq!(engine.meta("username").errors, vec!["at least three characters"]);

    engine.set_value("username", "");
    engine.settle().await;
    assert!(calls.borrow().is_empty(), "empty values are never sent");
}

#[tokio::test(start_paused = true)]
async fn submit_waits_for_pending_checks() {
    let calls = Calls::default();
    let tokens = Tokens::default();
    let submitted = Rc::new(RefCell::new(false));
    let flag = submitted.clone();
    let mut engine = availability_check(&calls, &tokens)
        .submit_handler(move |_values: ValueMap| {
            *flag.borrow_mut() = true;
            async { Ok::<(), BoxError>(()) }
        })
        .build()
        .expect("engine");

    engine.set_value("username", "taken");
    assert!(!engine.can_submit());

    let outcome = engine.submit().await.expect("submit");
    assert_eq!(
        outcome,
        SubmitOutcome::Blocked {
            fields: vec!["username".to_string()]
        }
    );
    assert_eq!(*calls.borrow(), vec!["taken"]);
    assert!(!*submitted.borrow());

    engine.set_value("username", "available");
    assert_eq!(engine.submit().await.expect("submit"), SubmitOutcome::Submitted);
    assert!(*submitted.borrow());
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_in_flight_checks() {
    let calls = Calls::default();
    let tokens = Tokens::default();
    let mut engine = availability_check(&calls, &tokens)
        .build()
        .expect("engine");

    engine.set_value("username", "first");
    tokio::time::advance(Duration::from_millis(600)).await;
    engine.poll();
    assert_eq!(tokens.borrow().len(), 1);

    engine.teardown();
    assert!(engine.is_torn_down());
    assert!(tokens.borrow()[0].is_cancelled());
    assert!(!engine.has_pending_validation());
    assert!(!engine.set_value("username", "second"));
    assert_eq!(engine.get("username"), Some(&json!("first")));
    assert_eq!(engine.submit().await.expect("submit"), SubmitOutcome::Closed);
}
