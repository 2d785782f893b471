//! # Localization Module
//!
//! Fluent message bundles for the bot's user-facing texts. Resources are
//! embedded at compile time; Russian is the default language and English is
//! used for users whose Telegram language code starts with `en`.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use unic_langid::LanguageIdentifier;

pub const DEFAULT_LANGUAGE: &str = "ru";

const RESOURCES: &[(&str, &str)] = &[
    ("ru", include_str!("../locales/ru/main.ftl")),
    ("en", include_str!("../locales/en/main.ftl")),
];

/// Localization manager for the course cost bot
pub struct LocalizationManager {
    bundles: HashMap<&'static str, FluentBundle<FluentResource>>,
}

impl LocalizationManager {
    /// Create a new localization manager with every embedded language
    pub fn new() -> Result<Self> {
        let mut bundles = HashMap::new();
        for (language, source) in RESOURCES {
            bundles.insert(*language, Self::create_bundle(language, source)?);
        }
        Ok(Self { bundles })
    }

    /// Create a fluent bundle for a specific locale
    fn create_bundle(language: &str, source: &str) -> Result<FluentBundle<FluentResource>> {
        let locale: LanguageIdentifier = language.parse()?;
        let mut bundle = FluentBundle::new_concurrent(vec![locale]);
        // Telegram HTML does not need the bidi isolation marks
        bundle.set_use_isolating(false);

        let resource = FluentResource::try_new(source.to_string())
            .map_err(|(_, errors)| anyhow!("invalid {language} resource: {errors:?}"))?;
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow!("duplicate messages in {language} resource: {errors:?}"))?;
        Ok(bundle)
    }

    /// Pick the bundle language for a Telegram language code
    pub fn resolve_language(language_code: Option<&str>) -> &'static str {
        match language_code {
            Some(code) if code.to_lowercase().starts_with("en") => "en",
            _ => DEFAULT_LANGUAGE,
        }
    }

    /// Get a localized message in a specific language
    pub fn get_message_in_language(
        &self,
        key: &str,
        language: &str,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let bundle = match self
            .bundles
            .get(Self::resolve_language(Some(language)))
            .or_else(|| self.bundles.get(DEFAULT_LANGUAGE))
        {
            Some(bundle) => bundle,
            None => return format!("Missing translation: {key}"),
        };

        let Some(msg) = bundle.get_message(key) else {
            return format!("Missing translation: {key}");
        };
        let Some(pattern) = msg.value() else {
            return format!("Missing value for key: {key}");
        };

        let fluent_args = args.map(|args| {
            let mut fluent_args = FluentArgs::new();
            for (k, v) in args {
                fluent_args.set(*k, FluentValue::from(*v));
            }
            fluent_args
        });

        let mut errors = vec![];
        bundle
            .format_pattern(pattern, fluent_args.as_ref(), &mut errors)
            .into_owned()
    }

    /// Get a localized message with simple string arguments
    pub fn get_message_with_args(
        &self,
        key: &str,
        language: &str,
        args: &[(&str, &str)],
    ) -> String {
        let args_map: HashMap<&str, &str> = args.iter().cloned().collect();
        self.get_message_in_language(key, language, Some(&args_map))
    }
}

/// Global localization instance
static LOCALIZATION_MANAGER: OnceLock<LocalizationManager> = OnceLock::new();

/// Initialize the global localization manager
pub fn init_localization() -> Result<()> {
    if LOCALIZATION_MANAGER.get().is_none() {
        let manager = LocalizationManager::new()?;
        let _ = LOCALIZATION_MANAGER.set(manager);
    }
    Ok(())
}

/// Get the global localization manager, loading it on first use
pub fn get_localization_manager() -> Option<&'static LocalizationManager> {
    if LOCALIZATION_MANAGER.get().is_none() {
        if let Err(e) = init_localization() {
            tracing::error!(error = %e, "Failed to load localization resources");
        }
    }
    LOCALIZATION_MANAGER.get()
}

/// Localized message for a Telegram language code
pub fn t_lang(key: &str, language_code: Option<&str>) -> String {
    t_args_lang(key, &[], language_code)
}

/// Localized message with arguments for a Telegram language code
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language_code: Option<&str>) -> String {
    let language = LocalizationManager::resolve_language(language_code);
    match get_localization_manager() {
        Some(manager) if args.is_empty() => manager.get_message_in_language(key, language, None),
        Some(manager) => manager.get_message_with_args(key, language, args),
        None => key.to_string(),
    }
}
