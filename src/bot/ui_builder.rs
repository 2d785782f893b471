//! UI Builder module for creating keyboards and formatting messages

use teloxide::types::{
    ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
    KeyboardRemove, ReplyMarkup,
};
use teloxide::utils::html::{bold, escape};

// Import localization
use crate::localization::{t_args_lang, t_lang};

// Import form types
use crate::catalog::{Category, Course, Nosology};
use crate::form::{callback, ContactSummary, DataSummary, Prompt};
use crate::pricing::format_price;

/// A prompt ready to send: HTML text plus optional keyboard
#[derive(Debug, Clone)]
pub struct Rendered {
    pub text: String,
    pub markup: Option<ReplyMarkup>,
}

/// Render a prompt for a user
pub fn render_prompt(prompt: &Prompt, user_name: &str, language_code: Option<&str>) -> Rendered {
    let lang = language_code;
    let t = |key: &str| t_lang(key, lang);

    match prompt {
        Prompt::Welcome { greeting } => {
            let mut text = String::new();
            if *greeting {
                let name = escape(user_name);
                text.push_str(&t_args_lang("welcome-greeting", &[("name", &name)], lang));
                text.push('\n');
            }
            text.push_str(&t("welcome-prompt"));
            let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                t("button-yes"),
                callback::YES,
            )]]);
            inline(text, keyboard)
        }
        Prompt::AskHeight => with_navigation(t("ask-height"), vec![], lang),
        Prompt::HeightInvalid => with_navigation(t("height-invalid"), vec![], lang),
        Prompt::AskWeight => with_navigation(t("ask-weight"), vec![], lang),
        Prompt::WeightInvalid => with_navigation(t("weight-invalid"), vec![], lang),
        Prompt::ChooseCategory(categories) => {
            with_navigation(t("choose-category"), category_rows(categories), lang)
        }
        Prompt::CategoryInvalid(categories) => {
            with_navigation(t("category-invalid"), category_rows(categories), lang)
        }
        Prompt::ChooseNosology(nosologies) => {
            with_navigation(t("choose-nosology"), nosology_rows(nosologies), lang)
        }
        Prompt::NosologyInvalid(nosologies) => {
            with_navigation(t("nosology-invalid"), nosology_rows(nosologies), lang)
        }
        Prompt::ChooseCourse(courses) => {
            let key = if courses.is_empty() { "no-courses" } else { "choose-course" };
            with_navigation(t(key), course_rows(courses, lang), lang)
        }
        Prompt::CourseInvalid(courses) => {
            with_navigation(t("course-invalid"), course_rows(courses, lang), lang)
        }
        Prompt::AskCustomCourse => with_navigation(t("ask-custom-course"), vec![], lang),
        Prompt::ConfirmData(summary) => {
            let text = format!(
                "{}\n\n{}\n\n{}",
                t("confirm-data-header"),
                summary_lines(summary, lang),
                t("confirm-data-question")
            );
            let rows = vec![
                vec![InlineKeyboardButton::callback(t("button-yes"), callback::YES)],
                vec![InlineKeyboardButton::callback(
                    t("button-need-correction"),
                    callback::NEED_CORRECTION,
                )],
            ];
            with_navigation(text, rows, lang)
        }
        Prompt::ShowPrice(summary) => {
            let price_line = match summary.price {
                Some(price) => {
                    let price = bold(&format_price(price));
                    t_args_lang("price-estimate", &[("price", &price)], lang)
                }
                None => t("price-unknown"),
            };
            let text = format!(
                "{}\n\n{}\n\n{}\n{}",
                t("price-header"),
                summary_lines(summary, lang),
                price_line,
                t("price-contacts")
            );
            let rows = vec![vec![InlineKeyboardButton::callback(
                t("button-contacts-input"),
                callback::CONTACTS_INPUT,
            )]];
            with_navigation(text, rows, lang)
        }
        Prompt::AskFirstName => with_navigation(t("ask-first-name"), skip_row(lang), lang),
        Prompt::AskLastName => with_navigation(t("ask-last-name"), skip_row(lang), lang),
        Prompt::AskEmail => with_navigation(t("ask-email"), skip_row(lang), lang),
        Prompt::EmailInvalid => with_navigation(t("email-invalid"), skip_row(lang), lang),
        Prompt::AskPhoneNumber => phone_keyboard(t("ask-phone-number"), lang),
        Prompt::PhoneNumberInvalid => phone_keyboard(t("phone-number-invalid"), lang),
        Prompt::ConfirmLead(contacts) => {
            let text = format!("{}\n\n{}", t("confirm-lead-header"), contact_lines(contacts, lang));
            let rows = vec![
                vec![InlineKeyboardButton::callback(t("button-yes"), callback::YES)],
                vec![InlineKeyboardButton::callback(
                    t("button-need-correction"),
                    callback::NEED_CORRECTION,
                )],
            ];
            with_navigation(text, rows, lang)
        }
        Prompt::Final => menu_only(t("final-message"), lang),
        Prompt::LeadFailed => menu_only(t("lead-failed"), lang),
        Prompt::Goodbye => Rendered {
            text: t("goodbye"),
            markup: Some(ReplyMarkup::KeyboardRemove(KeyboardRemove::new())),
        },
        Prompt::UnsupportedMessage => with_navigation(t("unsupported-message"), vec![], lang),
        Prompt::CatalogUnavailable => menu_only(t("catalog-unavailable"), lang),
    }
}

/// Map a reply keyboard label back to its callback payload
pub fn reply_button_callback(text: &str, language_code: Option<&str>) -> Option<&'static str> {
    let text = text.trim();
    [
        ("button-back", callback::BACK),
        ("button-menu", callback::MENU),
        ("button-skip", callback::SKIP),
    ]
    .into_iter()
    .find(|(key, _)| t_lang(key, language_code) == text)
    .map(|(_, data)| data)
}

fn inline(text: String, keyboard: InlineKeyboardMarkup) -> Rendered {
    Rendered {
        text,
        markup: Some(ReplyMarkup::InlineKeyboard(keyboard)),
    }
}

/// Option rows followed by the Back/Menu row
fn with_navigation(
    text: String,
    mut rows: Vec<Vec<InlineKeyboardButton>>,
    language_code: Option<&str>,
) -> Rendered {
    rows.push(vec![
        InlineKeyboardButton::callback(t_lang("button-back", language_code), callback::BACK),
        InlineKeyboardButton::callback(t_lang("button-menu", language_code), callback::MENU),
    ]);
    inline(text, InlineKeyboardMarkup::new(rows))
}

fn menu_only(text: String, language_code: Option<&str>) -> Rendered {
    inline(
        text,
        InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
            t_lang("button-menu", language_code),
            callback::MENU,
        )]]),
    )
}

fn skip_row(language_code: Option<&str>) -> Vec<Vec<InlineKeyboardButton>> {
    vec![vec![InlineKeyboardButton::callback(
        t_lang("button-skip", language_code),
        callback::SKIP,
    )]]
}

/// Reply keyboard with a "share contact" button for the phone step
fn phone_keyboard(text: String, language_code: Option<&str>) -> Rendered {
    let t = |key: &str| t_lang(key, language_code);
    let keyboard = KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(t("button-share-contact")).request(ButtonRequest::Contact)],
        vec![KeyboardButton::new(t("button-skip"))],
        vec![KeyboardButton::new(t("button-back")), KeyboardButton::new(t("button-menu"))],
    ])
    .resize_keyboard()
    .one_time_keyboard();
    Rendered {
        text,
        markup: Some(ReplyMarkup::Keyboard(keyboard)),
    }
}

fn category_rows(categories: &[Category]) -> Vec<Vec<InlineKeyboardButton>> {
    categories
        .iter()
        .map(|c| {
            vec![InlineKeyboardButton::callback(
                c.name.clone(),
                format!("{}{}", callback::CATEGORY_PREFIX, c.id),
            )]
        })
        .collect()
}

fn nosology_rows(nosologies: &[Nosology]) -> Vec<Vec<InlineKeyboardButton>> {
    nosologies
        .iter()
        .map(|n| {
            vec![InlineKeyboardButton::callback(
                n.name.clone(),
                format!("{}{}", callback::NOSOLOGY_PREFIX, n.id),
            )]
        })
        .collect()
}

fn course_rows(courses: &[Course], language_code: Option<&str>) -> Vec<Vec<InlineKeyboardButton>> {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = courses
        .iter()
        .map(|c| {
            vec![InlineKeyboardButton::callback(
                c.name.clone(),
                format!("{}{}", callback::COURSE_PREFIX, c.id),
            )]
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        t_lang("button-custom-course", language_code),
        callback::CUSTOM_COURSE,
    )]);
    rows
}

/// `Label: <b>value</b>` lines of the data summary
pub fn summary_lines(summary: &DataSummary, language_code: Option<&str>) -> String {
    let line = |key: &str, value: &str| {
        format!("{}: {}", t_lang(key, language_code), bold(&escape(value)))
    };

    let mut lines = vec![
        line("label-height", &summary.height.to_string()),
        line("label-weight", &summary.weight.to_string()),
        line("label-category", &summary.category_name),
    ];
    if let Some(nosology) = &summary.nosology_name {
        lines.push(line("label-nosology", nosology));
    }
    lines.push(line("label-course", &summary.course_name));
    lines.join("\n")
}

fn contact_lines(contacts: &ContactSummary, language_code: Option<&str>) -> String {
    let missing = t_lang("value-not-provided", language_code);
    let line = |key: &str, value: &Option<String>| {
        let value = match value.as_deref() {
            Some(v) => bold(&escape(v)),
            None => escape(&missing),
        };
        format!("{}: {}", t_lang(key, language_code), value)
    };

    [
        line("label-first-name", &contacts.first_name),
        line("label-last-name", &contacts.last_name),
        line("label-email", &contacts.email),
        line("label-phone-number", &contacts.phone_number),
    ]
    .join("\n")
}
