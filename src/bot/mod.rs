//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `message_handler`: Handles incoming text and shared contacts
//! - `callback_handler`: Handles inline keyboard callback queries
//! - `ui_builder`: Creates keyboards and formats messages
//! - `dialogue_manager`: Runs form transitions and carries out their outcome

pub mod callback_handler;
pub mod dialogue_manager;
pub mod message_handler;
pub mod ui_builder;

use std::sync::Arc;

use teloxide::types::{BotCommand, User, UserId};

use crate::action_log::ActionLogger;
use crate::catalog::Catalog;
use crate::crm::BitrixClient;
use crate::form::FormSettings;
use crate::localization::t_lang;

// Re-export main handler functions for use in main.rs
pub use callback_handler::callback_handler;
pub use message_handler::message_handler;

/// Shared services injected into every handler
pub struct BotServices {
    pub catalog: Arc<Catalog>,
    pub form_settings: FormSettings,
    pub crm: Option<Arc<BitrixClient>>,
    pub action_log: Arc<ActionLogger>,
}

/// The Telegram user behind an update
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub id: i64,
    pub username: Option<String>,
    pub full_name: String,
    pub language_code: Option<String>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user_id_to_i64(user.id),
            username: user.username.clone(),
            full_name: user.full_name(),
            language_code: user.language_code.clone(),
        }
    }
}

/// Telegram user ids fit in 52 bits; anything larger saturates
fn user_id_to_i64(id: UserId) -> i64 {
    i64::try_from(id.0).unwrap_or(i64::MAX)
}

/// Command list shown in the Telegram menu
pub fn bot_commands(language_code: Option<&str>) -> Vec<BotCommand> {
    ["start", "menu", "help", "stop"]
        .into_iter()
        .map(|command| {
            let description = t_lang(&format!("command-{command}"), language_code);
            BotCommand::new(command, description)
        })
        .collect()
}
