//! # Dialogue Tests
//!
//! End-to-end walks through the cost estimation form, driving the pure
//! transition table the same way the Telegram handlers do.

use course_cost_bot::catalog::{CatalogSnapshot, Category, Course, Nosology};
use course_cost_bot::crm::Lead;
use course_cost_bot::dialogue::{FormState, FormStep};
use course_cost_bot::form::{handle_input, Effect, FormSettings, Input, Next, Outcome, Prompt};
use course_cost_bot::pricing::{body_surface_area, course_price};

fn catalog() -> CatalogSnapshot {
    CatalogSnapshot::new(
        vec![
            Category {
                id: "1".to_string(),
                name: "Онкология".to_string(),
            },
            Category {
                id: "2".to_string(),
                name: "Сопроводительная терапия".to_string(),
            },
        ],
        vec![Nosology {
            id: "7".to_string(),
            name: "Рак лёгкого".to_string(),
            category_id: "1".to_string(),
        }],
        vec![
            Course {
                id: "100".to_string(),
                name: "Курс А".to_string(),
                coefficient: 10_000.0,
                category_id: "1".to_string(),
                nosology_ids: vec!["7".to_string()],
                fixed_price: false,
            },
            Course {
                id: "200".to_string(),
                name: "Поддержка".to_string(),
                coefficient: 5_000.0,
                category_id: "2".to_string(),
                nosology_ids: vec![],
                fixed_price: true,
            },
        ],
    )
}

fn text(value: &str) -> Input {
    Input::Text(value.to_string())
}

fn cb(value: &str) -> Input {
    Input::Callback(value.to_string())
}

/// Feed an input and return the outcome together with the state to continue from
fn step(state: &FormState, input: Input, catalog: &CatalogSnapshot) -> (Outcome, FormState) {
    let outcome = handle_input(state, &input, catalog, &FormSettings::default());
    let next = match &outcome.next {
        Next::Update(next) => next.clone(),
        Next::Stay => state.clone(),
        Next::Finish => FormState::default(),
    };
    (outcome, next)
}

fn submitted_lead(outcome: &Outcome) -> Option<&Lead> {
    outcome.effects.iter().find_map(|effect| match effect {
        Effect::SubmitLead(lead) => Some(lead),
        _ => None,
    })
}

/// Full path from the welcome screen to a submitted lead
#[test]
fn test_full_form_submits_lead() {
    let catalog = catalog();
    let state = FormState::default();

    let (_, state) = step(&state, cb("yes"), &catalog);
    assert_eq!(state.step, FormStep::Height);
    let (_, state) = step(&state, text("180"), &catalog);
    let (outcome, state) = step(&state, text("80"), &catalog);
    assert!(matches!(outcome.prompt, Prompt::ChooseCategory(ref c) if c.len() == 2));

    let (outcome, state) = step(&state, cb("category_1"), &catalog);
    assert_eq!(state.step, FormStep::Nosology);
    assert!(matches!(outcome.prompt, Prompt::ChooseNosology(ref n) if n.len() == 1));

    let (_, state) = step(&state, cb("nosology_7"), &catalog);
    assert_eq!(state.step, FormStep::Course);

    let (outcome, state) = step(&state, cb("course_100"), &catalog);
    assert_eq!(state.step, FormStep::DataConfirmation);
    let Prompt::ConfirmData(summary) = outcome.prompt else {
        panic!("expected confirmation, got {:?}", outcome.prompt);
    };
    assert_eq!(summary.nosology_name.as_deref(), Some("Рак лёгкого"));

    let (outcome, state) = step(&state, cb("yes"), &catalog);
    assert_eq!(state.step, FormStep::ContactsInput);
    let Prompt::ShowPrice(summary) = outcome.prompt else {
        panic!("expected price, got {:?}", outcome.prompt);
    };
    let expected = course_price(&catalog.courses[0], body_surface_area(180, 80), 0.6);
    assert!((summary.price.unwrap_or_default() - expected).abs() < 1e-6);

    let (_, state) = step(&state, cb("contacts_input"), &catalog);
    let (_, state) = step(&state, text("Иван"), &catalog);
    let (_, state) = step(&state, cb("skip"), &catalog);
    let (_, state) = step(&state, text("ivan@example.com"), &catalog);
    let (outcome, state) = step(&state, text("+7 (900) 123-45-67"), &catalog);
    assert_eq!(state.step, FormStep::LeadConfirmation);
    assert!(matches!(outcome.prompt, Prompt::ConfirmLead(_)));

    let (outcome, _) = step(&state, cb("yes"), &catalog);
    assert_eq!(outcome.next, Next::Finish);
    assert_eq!(outcome.prompt, Prompt::Final);

    let lead = submitted_lead(&outcome).expect("lead effect");
    assert_eq!(lead.first_name.as_deref(), Some("Иван"));
    assert_eq!(lead.last_name, None);
    assert_eq!(lead.email.as_deref(), Some("ivan@example.com"));
    assert!(lead.comments.contains("Курс: Курс А"));
    assert!(lead.comments.contains("Рост: 180"));
}

/// A fixed-price course ignores the patient's body measures
#[test]
fn test_accompanying_therapy_fixed_price() {
    let catalog = catalog();
    let mut state = FormState::default();
    for input in [cb("yes"), text("150"), text("50"), cb("category_2")] {
        state = step(&state, input, &catalog).1;
    }
    assert_eq!(state.step, FormStep::Course);
    assert_eq!(state.data.nosology_id, None);

    let (_, state) = step(&state, cb("course_200"), &catalog);
    let (outcome, _) = step(&state, cb("yes"), &catalog);
    let Prompt::ShowPrice(summary) = outcome.prompt else {
        panic!("expected price, got {:?}", outcome.prompt);
    };
    assert_eq!(summary.price, Some(5_000.0));
    assert_eq!(summary.nosology_name, None);
}

/// A course typed by the user has no price
#[test]
fn test_custom_course_has_no_price() {
    let catalog = catalog();
    let mut state = FormState::default();
    for input in [cb("yes"), text("170"), text("70"), cb("category_1"), cb("nosology_7")] {
        state = step(&state, input, &catalog).1;
    }

    let (outcome, state) = step(&state, cb("custom_course"), &catalog);
    assert_eq!(outcome.prompt, Prompt::AskCustomCourse);
    assert_eq!(state.step, FormStep::CustomCourse);

    let (_, state) = step(&state, text("Мой курс"), &catalog);
    assert!(state.data.is_custom_course);
    let (outcome, _) = step(&state, cb("yes"), &catalog);
    let Prompt::ShowPrice(summary) = outcome.prompt else {
        panic!("expected price, got {:?}", outcome.prompt);
    };
    assert_eq!(summary.course_name, "Мой курс");
    assert_eq!(summary.price, None);
}

/// Sharing a contact fills the phone and any names left empty
#[test]
fn test_shared_contact_fills_missing_names() {
    let catalog = catalog();
    let mut state = FormState::default();
    for input in [
        cb("yes"),
        text("170"),
        text("70"),
        cb("category_2"),
        cb("course_200"),
        cb("yes"),
        cb("contacts_input"),
        cb("skip"),
        cb("skip"),
        cb("skip"),
    ] {
        state = step(&state, input, &catalog).1;
    }
    assert_eq!(state.step, FormStep::PhoneNumber);

    let contact = Input::Contact {
        phone_number: "79001234567".to_string(),
        first_name: Some("Анна".to_string()),
        last_name: Some("Петрова".to_string()),
    };
    let (_, state) = step(&state, contact, &catalog);
    assert_eq!(state.step, FormStep::LeadConfirmation);
    assert_eq!(state.data.phone_number.as_deref(), Some("79001234567"));
    assert_eq!(state.data.first_name.as_deref(), Some("Анна"));
    assert_eq!(state.data.last_name.as_deref(), Some("Петрова"));
}

/// Invalid answers keep the step and re-ask
#[test]
fn test_invalid_answers_are_reprompted() {
    let catalog = catalog();
    let state = FormState::at(FormStep::Email, Default::default());
    let (outcome, _) = step(&state, text("not-an-email"), &catalog);
    assert_eq!(outcome.next, Next::Stay);
    assert_eq!(outcome.prompt, Prompt::EmailInvalid);

    let state = FormState::at(FormStep::PhoneNumber, Default::default());
    let (outcome, _) = step(&state, text("12"), &catalog);
    assert_eq!(outcome.prompt, Prompt::PhoneNumberInvalid);

    let state = FormState::at(FormStep::Weight, Default::default());
    let (outcome, _) = step(&state, text("0"), &catalog);
    assert_eq!(outcome.prompt, Prompt::WeightInvalid);
}

/// Correcting contacts clears them and starts over at the first name
#[test]
fn test_lead_correction_clears_contacts() {
    let catalog = catalog();
    let mut state = FormState::at(FormStep::LeadConfirmation, Default::default());
    state.data.first_name = Some("Иван".to_string());
    state.data.email = Some("ivan@example.com".to_string());

    let (outcome, state) = step(&state, cb("need_correction"), &catalog);
    assert_eq!(outcome.prompt, Prompt::AskFirstName);
    assert_eq!(state.step, FormStep::FirstName);
    assert_eq!(state.data.first_name, None);
    assert_eq!(state.data.email, None);
}

/// Every meaningful action leaves an analytics record
#[test]
fn test_actions_are_logged() {
    let catalog = catalog();
    let (outcome, _) = step(&FormState::default(), text("/start"), &catalog);
    assert!(outcome
        .effects
        .iter()
        .any(|effect| matches!(effect, Effect::LogAction(message) if message.contains("меню"))));

    let state = FormState::at(FormStep::Category, Default::default());
    let (outcome, _) = step(&state, cb("category_1"), &catalog);
    assert!(outcome
        .effects
        .iter()
        .any(|effect| {
            matches!(effect, Effect::LogAction(message) if message.contains("Онкология"))
        }));
}
