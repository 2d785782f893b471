//! # Form Module
//!
//! The step transition table of the cost estimation form. `handle_input`
//! is pure: it takes the current state, one user input and the catalog
//! snapshot, and returns what to store, what to show and which side effects
//! to run. The Telegram layer only translates updates into [`Input`] and
//! carries out the returned [`Outcome`].

use crate::catalog::{CatalogSnapshot, Category, Course, Nosology};
use crate::config::{Settings, DEFAULT_LEAD_TITLE, DEFAULT_PRICE_MULTIPLIER};
use crate::crm::Lead;
use crate::dialogue::{
    validate_body_measure, validate_email, validate_name, validate_phone_number, FormData,
    FormState, FormStep,
};
use crate::pricing::course_price;

/// Callback payloads shared by the keyboards and the transition table
pub mod callback {
    pub const CATEGORY_PREFIX: &str = "category_";
    pub const NOSOLOGY_PREFIX: &str = "nosology_";
    pub const COURSE_PREFIX: &str = "course_";

    pub const YES: &str = "yes";
    pub const NEED_CORRECTION: &str = "need_correction";
    pub const CUSTOM_COURSE: &str = "custom_course";
    pub const CONTACTS_INPUT: &str = "contacts_input";
    pub const SKIP: &str = "skip";
    pub const BACK: &str = "back";
    pub const MENU: &str = "menu";
    pub const START: &str = "start";
    pub const HELP: &str = "help";
    pub const STOP: &str = "stop";
}

/// Pricing and CRM settings the transition table needs
#[derive(Debug, Clone, PartialEq)]
pub struct FormSettings {
    pub price_multiplier: f64,
    pub lead_title: String,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            price_multiplier: DEFAULT_PRICE_MULTIPLIER,
            lead_title: DEFAULT_LEAD_TITLE.to_string(),
        }
    }
}

impl From<&Settings> for FormSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            price_multiplier: settings.price_multiplier,
            lead_title: settings
                .bitrix
                .as_ref()
                .map(|b| b.lead_title.clone())
                .unwrap_or_else(|| DEFAULT_LEAD_TITLE.to_string()),
        }
    }
}

/// One user action, already extracted from the Telegram update
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Text(String),
    Callback(String),
    Contact {
        phone_number: String,
        first_name: Option<String>,
        last_name: Option<String>,
    },
}

/// What happens to the stored dialogue
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Stay,
    Update(FormState),
    Finish,
}

/// Data shown on the confirmation and price screens
#[derive(Debug, Clone, PartialEq)]
pub struct DataSummary {
    pub height: u32,
    pub weight: u32,
    pub category_name: String,
    pub nosology_name: Option<String>,
    pub course_name: String,
    /// `None` for a course typed in by the user
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactSummary {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

/// Message to show the user next
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Welcome { greeting: bool },
    AskHeight,
    HeightInvalid,
    AskWeight,
    WeightInvalid,
    ChooseCategory(Vec<Category>),
    CategoryInvalid(Vec<Category>),
    ChooseNosology(Vec<Nosology>),
    NosologyInvalid(Vec<Nosology>),
    ChooseCourse(Vec<Course>),
    CourseInvalid(Vec<Course>),
    AskCustomCourse,
    ConfirmData(DataSummary),
    ShowPrice(DataSummary),
    AskFirstName,
    AskLastName,
    AskEmail,
    EmailInvalid,
    AskPhoneNumber,
    PhoneNumberInvalid,
    ConfirmLead(ContactSummary),
    Final,
    LeadFailed,
    Goodbye,
    UnsupportedMessage,
    CatalogUnavailable,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    SubmitLead(Lead),
    /// Analytics record for the action log
    LogAction(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub next: Next,
    pub prompt: Prompt,
    pub effects: Vec<Effect>,
}

impl Outcome {
    pub fn stay(prompt: Prompt) -> Self {
        Self {
            next: Next::Stay,
            prompt,
            effects: Vec::new(),
        }
    }

    pub fn update(state: FormState, prompt: Prompt) -> Self {
        Self {
            next: Next::Update(state),
            prompt,
            effects: Vec::new(),
        }
    }

    pub fn finish(prompt: Prompt) -> Self {
        Self {
            next: Next::Finish,
            prompt,
            effects: Vec::new(),
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    fn log(self, message: impl Into<String>) -> Self {
        self.with_effect(Effect::LogAction(message.into()))
    }
}

enum Global {
    Restart,
    Stop,
    Back,
}

/// Commands and buttons that work in every step
fn global_action(input: &Input) -> Option<Global> {
    let word = match input {
        Input::Text(text) => {
            let text = text.trim();
            match text.strip_prefix('/') {
                // `/start@my_bot payload` -> `start`
                Some(command) => command
                    .split(|c: char| c == '@' || c.is_whitespace())
                    .next()
                    .unwrap_or_default()
                    .to_lowercase(),
                // multi-word texts are answers, never commands
                None if text.split_whitespace().count() == 1 => text.to_lowercase(),
                None => return None,
            }
        }
        Input::Callback(data) => data.trim().to_lowercase(),
        Input::Contact { .. } => return None,
    };
    match word.as_str() {
        callback::START | callback::HELP | callback::MENU => Some(Global::Restart),
        callback::STOP => Some(Global::Stop),
        callback::BACK => Some(Global::Back),
        _ => None,
    }
}

/// Restart and stop, which need neither the state nor the catalog
pub fn handle_command(input: &Input) -> Option<Outcome> {
    match global_action(input)? {
        Global::Restart => Some(
            Outcome::update(FormState::default(), Prompt::Welcome { greeting: true })
                .log("Пользователь открыл меню"),
        ),
        Global::Stop => {
            Some(Outcome::finish(Prompt::Goodbye).log("Пользователь завершил диалог"))
        }
        Global::Back => None,
    }
}

/// Advance the form by one input
pub fn handle_input(
    state: &FormState,
    input: &Input,
    catalog: &CatalogSnapshot,
    settings: &FormSettings,
) -> Outcome {
    if let Some(outcome) = handle_command(input) {
        return outcome;
    }
    if matches!(global_action(input), Some(Global::Back)) {
        return go_back(state, catalog, settings);
    }

    let data = &state.data;
    match state.step {
        FormStep::Initial => match callback_data(input) {
            Some(callback::YES) => Outcome::update(
                FormState::at(FormStep::Height, data.clone()),
                Prompt::AskHeight,
            )
            .log("Пользователь нажал 'Да'"),
            _ => Outcome::stay(Prompt::Welcome { greeting: true }),
        },

        FormStep::Height => match text(input).map(validate_body_measure) {
            Some(Ok(height)) => {
                let data = FormData {
                    height: Some(height),
                    ..data.clone()
                };
                Outcome::update(FormState::at(FormStep::Weight, data), Prompt::AskWeight)
            }
            _ => Outcome::stay(Prompt::HeightInvalid),
        },

        FormStep::Weight => match text(input).map(validate_body_measure) {
            Some(Ok(weight)) => {
                let data = FormData {
                    weight: Some(weight),
                    ..data.clone()
                };
                Outcome::update(
                    FormState::at(FormStep::Category, data),
                    Prompt::ChooseCategory(catalog.categories.clone()),
                )
            }
            _ => Outcome::stay(Prompt::WeightInvalid),
        },

        FormStep::Category => {
            let chosen = callback_data(input)
                .and_then(|d| d.strip_prefix(callback::CATEGORY_PREFIX))
                .and_then(|id| catalog.find_category(id));
            let Some(category) = chosen else {
                return Outcome::stay(Prompt::CategoryInvalid(catalog.categories.clone()))
                    .log("Пользователь неправильно выбрал категорию");
            };

            let mut data = data.clone();
            data.category_id = Some(category.id.clone());
            data.nosology_id = None;
            data.clear_course();
            let log = format!("Пользователь выбрал категорию '{}'", category.name);

            if catalog.is_accompanying_therapy(&category.id) {
                let courses = owned(&catalog.find_courses(&category.id, None));
                Outcome::update(
                    FormState::at(FormStep::Course, data),
                    Prompt::ChooseCourse(courses),
                )
                .log(log)
            } else {
                let nosologies = owned(&catalog.nosologies_for_category(&category.id));
                Outcome::update(
                    FormState::at(FormStep::Nosology, data),
                    Prompt::ChooseNosology(nosologies),
                )
                .log(log)
            }
        }

        FormStep::Nosology => {
            let category_id = data.category_id.as_deref().unwrap_or_default();
            let chosen = callback_data(input)
                .and_then(|d| d.strip_prefix(callback::NOSOLOGY_PREFIX))
                .and_then(|id| catalog.find_nosology(category_id, id));
            let Some(nosology) = chosen else {
                let nosologies = owned(&catalog.nosologies_for_category(category_id));
                return Outcome::stay(Prompt::NosologyInvalid(nosologies))
                    .log("Пользователь неправильно выбрал нозологию");
            };

            let mut data = data.clone();
            data.nosology_id = Some(nosology.id.clone());
            data.clear_course();
            let courses = owned(&catalog.find_courses(category_id, Some(&nosology.id)));
            Outcome::update(
                FormState::at(FormStep::Course, data),
                Prompt::ChooseCourse(courses),
            )
            .log(format!("Пользователь выбрал нозологию '{}'", nosology.name))
        }

        FormStep::Course => {
            let category_id = data.category_id.as_deref().unwrap_or_default();
            let offered = catalog.find_courses(category_id, data.nosology_id.as_deref());

            match callback_data(input) {
                Some(callback::CUSTOM_COURSE) => {
                    let mut data = data.clone();
                    data.clear_course();
                    data.is_custom_course = true;
                    Outcome::update(
                        FormState::at(FormStep::CustomCourse, data),
                        Prompt::AskCustomCourse,
                    )
                }
                Some(d) => {
                    let chosen = d
                        .strip_prefix(callback::COURSE_PREFIX)
                        .and_then(|id| offered.iter().find(|c| c.id == id));
                    match chosen {
                        Some(course) => {
                            let mut data = data.clone();
                            data.course_id = Some(course.id.clone());
                            data.course_name = Some(course.name.clone());
                            data.is_custom_course = false;
                            let log = format!("Пользователь выбрал курс '{}'", course.name);
                            let next = FormState::at(FormStep::DataConfirmation, data);
                            show(next, catalog, settings).log(log)
                        }
                        None => Outcome::stay(Prompt::CourseInvalid(owned(&offered))),
                    }
                }
                None => Outcome::stay(Prompt::CourseInvalid(owned(&offered))),
            }
        }

        FormStep::CustomCourse => match text(input).map(str::trim).filter(|t| !t.is_empty()) {
            Some(name) => {
                let mut data = data.clone();
                data.course_id = None;
                data.course_name = Some(name.to_string());
                data.is_custom_course = true;
                let log = format!("Пользователь ввёл свой курс '{name}'");
                let next = FormState::at(FormStep::DataConfirmation, data);
                show(next, catalog, settings).log(log)
            }
            None => Outcome::stay(Prompt::AskCustomCourse),
        },

        FormStep::DataConfirmation => match callback_data(input) {
            Some(callback::YES) => {
                let next = FormState::at(FormStep::ContactsInput, data.clone());
                show(next, catalog, settings).log("Пользователь подтвердил данные")
            }
            Some(callback::NEED_CORRECTION) => Outcome::update(
                FormState::at(FormStep::Height, data.clone()),
                Prompt::AskHeight,
            ),
            _ => reprompt(state, catalog, settings),
        },

        FormStep::ContactsInput => match callback_data(input) {
            Some(callback::CONTACTS_INPUT) => Outcome::update(
                FormState::at(FormStep::FirstName, data.clone()),
                Prompt::AskFirstName,
            ),
            _ => reprompt(state, catalog, settings),
        },

        FormStep::FirstName => match optional_text(input, validate_name) {
            Some(first_name) => {
                let data = FormData {
                    first_name,
                    ..data.clone()
                };
                Outcome::update(FormState::at(FormStep::LastName, data), Prompt::AskLastName)
            }
            None => Outcome::stay(Prompt::AskFirstName),
        },

        FormStep::LastName => match optional_text(input, validate_name) {
            Some(last_name) => {
                let data = FormData {
                    last_name,
                    ..data.clone()
                };
                Outcome::update(FormState::at(FormStep::Email, data), Prompt::AskEmail)
            }
            None => Outcome::stay(Prompt::AskLastName),
        },

        FormStep::Email => match optional_text(input, validate_email) {
            Some(email) => {
                let data = FormData {
                    email,
                    ..data.clone()
                };
                Outcome::update(
                    FormState::at(FormStep::PhoneNumber, data),
                    Prompt::AskPhoneNumber,
                )
            }
            None => Outcome::stay(Prompt::EmailInvalid),
        },

        FormStep::PhoneNumber => {
            let mut data = data.clone();
            match input {
                Input::Contact {
                    phone_number,
                    first_name,
                    last_name,
                } => {
                    data.phone_number = Some(phone_number.clone());
                    if data.first_name.is_none() {
                        data.first_name = first_name.clone();
                    }
                    if data.last_name.is_none() {
                        data.last_name = last_name.clone();
                    }
                }
                _ => match optional_text(input, validate_phone_number) {
                    Some(phone_number) => data.phone_number = phone_number,
                    None => return Outcome::stay(Prompt::PhoneNumberInvalid),
                },
            }
            let summary = contact_summary(&data);
            Outcome::update(
                FormState::at(FormStep::LeadConfirmation, data),
                Prompt::ConfirmLead(summary),
            )
        }

        FormStep::LeadConfirmation => match callback_data(input) {
            Some(callback::YES) => {
                if data_summary(data, catalog, settings).is_none() {
                    return restart_at_category(data, catalog);
                }
                let lead = Lead::from_form(data, catalog, settings);
                Outcome::finish(Prompt::Final)
                    .with_effect(Effect::SubmitLead(lead))
                    .log("Пользователь отправил заявку")
            }
            Some(callback::NEED_CORRECTION) => {
                let mut data = data.clone();
                data.clear_contacts();
                Outcome::update(FormState::at(FormStep::FirstName, data), Prompt::AskFirstName)
            }
            _ => reprompt(state, catalog, settings),
        },
    }
}

/// Step back to the previous question, forgetting its answer
pub fn go_back(
    state: &FormState,
    catalog: &CatalogSnapshot,
    settings: &FormSettings,
) -> Outcome {
    let mut data = state.data.clone();
    let previous = match state.step {
        FormStep::Initial => return Outcome::stay(Prompt::Welcome { greeting: false }),
        FormStep::Height => FormStep::Initial,
        FormStep::Weight => {
            data.height = None;
            FormStep::Height
        }
        FormStep::Category => {
            data.weight = None;
            FormStep::Weight
        }
        FormStep::Nosology => {
            data.category_id = None;
            FormStep::Category
        }
        FormStep::Course => {
            data.nosology_id = None;
            let category_id = data.category_id.as_deref().unwrap_or_default();
            if catalog.is_accompanying_therapy(category_id) {
                data.category_id = None;
                FormStep::Category
            } else {
                FormStep::Nosology
            }
        }
        FormStep::CustomCourse | FormStep::DataConfirmation => {
            data.clear_course();
            FormStep::Course
        }
        FormStep::ContactsInput => FormStep::DataConfirmation,
        FormStep::FirstName => FormStep::ContactsInput,
        FormStep::LastName => {
            data.first_name = None;
            FormStep::FirstName
        }
        FormStep::Email => {
            data.last_name = None;
            FormStep::LastName
        }
        FormStep::PhoneNumber => {
            data.email = None;
            FormStep::Email
        }
        FormStep::LeadConfirmation => {
            data.phone_number = None;
            FormStep::PhoneNumber
        }
    };
    show(FormState::at(previous, data), catalog, settings).log("Пользователь нажал 'Назад'")
}

/// Move to `state` and show its question
fn show(state: FormState, catalog: &CatalogSnapshot, settings: &FormSettings) -> Outcome {
    match prompt_for(&state, catalog, settings) {
        Some(prompt) => Outcome::update(state, prompt),
        None => restart_at_category(&state.data, catalog),
    }
}

/// Repeat the current question without changing the state
fn reprompt(state: &FormState, catalog: &CatalogSnapshot, settings: &FormSettings) -> Outcome {
    match prompt_for(state, catalog, settings) {
        Some(prompt) => Outcome::stay(prompt),
        None => restart_at_category(&state.data, catalog),
    }
}

/// The selection no longer matches the catalog (it was reloaded meanwhile)
fn restart_at_category(data: &FormData, catalog: &CatalogSnapshot) -> Outcome {
    let mut data = data.clone();
    data.category_id = None;
    data.nosology_id = None;
    data.clear_course();
    Outcome::update(
        FormState::at(FormStep::Category, data),
        Prompt::ChooseCategory(catalog.categories.clone()),
    )
}

/// The question asked at a step; `None` when the stored selection is stale
pub fn prompt_for(
    state: &FormState,
    catalog: &CatalogSnapshot,
    settings: &FormSettings,
) -> Option<Prompt> {
    let data = &state.data;
    let category_id = data.category_id.as_deref().unwrap_or_default();
    let prompt = match state.step {
        FormStep::Initial => Prompt::Welcome { greeting: false },
        FormStep::Height => Prompt::AskHeight,
        FormStep::Weight => Prompt::AskWeight,
        FormStep::Category => Prompt::ChooseCategory(catalog.categories.clone()),
        FormStep::Nosology => {
            catalog.find_category(category_id)?;
            Prompt::ChooseNosology(owned(&catalog.nosologies_for_category(category_id)))
        }
        FormStep::Course => {
            catalog.find_category(category_id)?;
            Prompt::ChooseCourse(owned(
                &catalog.find_courses(category_id, data.nosology_id.as_deref()),
            ))
        }
        FormStep::CustomCourse => Prompt::AskCustomCourse,
        FormStep::DataConfirmation => {
            Prompt::ConfirmData(data_summary(data, catalog, settings)?)
        }
        FormStep::ContactsInput => Prompt::ShowPrice(data_summary(data, catalog, settings)?),
        FormStep::FirstName => Prompt::AskFirstName,
        FormStep::LastName => Prompt::AskLastName,
        FormStep::Email => Prompt::AskEmail,
        FormStep::PhoneNumber => Prompt::AskPhoneNumber,
        FormStep::LeadConfirmation => Prompt::ConfirmLead(contact_summary(data)),
    };
    Some(prompt)
}

/// Selected values with their display names and the estimated price.
///
/// `None` when the stored selection no longer resolves to a consistent set of
/// catalog records, e.g. the course id now names a different course.
pub fn data_summary(
    data: &FormData,
    catalog: &CatalogSnapshot,
    settings: &FormSettings,
) -> Option<DataSummary> {
    let category = catalog.find_category(data.category_id.as_deref()?)?;
    let nosology_name = match data.nosology_id.as_deref() {
        Some(id) => Some(catalog.find_nosology(&category.id, id)?.name.clone()),
        None => None,
    };

    let (course_name, price) = if data.is_custom_course {
        (data.course_name.clone()?, None)
    } else {
        let course = catalog.find_course(data.course_id.as_deref()?)?;
        let consistent = course.category_id == category.id
            && data
                .course_name
                .as_ref()
                .is_none_or(|name| *name == course.name)
            && data.nosology_id.as_ref().is_none_or(|id| {
                course.nosology_ids.is_empty() || course.nosology_ids.contains(id)
            });
        if !consistent {
            return None;
        }
        let price = data
            .bsa()
            .map(|bsa| course_price(course, bsa, settings.price_multiplier));
        (course.name.clone(), price)
    };

    Some(DataSummary {
        height: data.height?,
        weight: data.weight?,
        category_name: category.name.clone(),
        nosology_name,
        course_name,
        price,
    })
}

fn contact_summary(data: &FormData) -> ContactSummary {
    ContactSummary {
        first_name: data.first_name.clone(),
        last_name: data.last_name.clone(),
        email: data.email.clone(),
        phone_number: data.phone_number.clone(),
    }
}

fn callback_data(input: &Input) -> Option<&str> {
    match input {
        Input::Callback(data) => Some(data.as_str()),
        _ => None,
    }
}

fn text(input: &Input) -> Option<&str> {
    match input {
        Input::Text(text) => Some(text.as_str()),
        _ => None,
    }
}

/// `Some(None)` for a skip, `Some(Some(value))` for valid text, `None` otherwise
fn optional_text<T>(
    input: &Input,
    validate: impl Fn(&str) -> Result<T, &'static str>,
) -> Option<Option<T>> {
    match input {
        Input::Callback(data) if data == callback::SKIP => Some(None),
        Input::Text(text) => validate(text).ok().map(Some),
        _ => None,
    }
}

fn owned<T: Clone>(items: &[&T]) -> Vec<T> {
    items.iter().map(|item| (*item).clone()).collect()
}
