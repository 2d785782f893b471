//! Message Handler module for processing incoming Telegram messages

use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use tracing::debug;

// Import dialogue and form types
use crate::dialogue::{FormDialogue, FormState};
use crate::form::{Input, Prompt};

// Import dialogue manager functions
use super::dialogue_manager::{process_input, send_prompt};
use super::ui_builder::reply_button_callback;
use super::{BotServices, UserInfo};

/// Translate a message into a form input; `None` for unsupported content
pub fn extract_input(msg: &Message, language_code: Option<&str>) -> Option<Input> {
    if let Some(contact) = msg.contact() {
        return Some(Input::Contact {
            phone_number: contact.phone_number.clone(),
            first_name: Some(contact.first_name.clone()).filter(|n| !n.trim().is_empty()),
            last_name: contact.last_name.clone(),
        });
    }

    let text = msg.text()?;
    // Reply keyboard buttons arrive as plain text in the user's language
    match reply_button_callback(text, language_code) {
        Some(data) => Some(Input::Callback(data.to_string())),
        None => Some(Input::Text(text.to_string())),
    }
}

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    dialogue: FormDialogue,
    state: FormState,
    services: Arc<BotServices>,
) -> Result<()> {
    let user = msg.from.as_ref().map(UserInfo::from).unwrap_or_default();
    debug!(user_id = %msg.chat.id, step = ?state.step, "Received message from user");

    match extract_input(&msg, user.language_code.as_deref()) {
        Some(input) => process_input(&bot, &dialogue, state, &user, input, &services).await,
        None => {
            debug!(user_id = %msg.chat.id, "Unsupported message type");
            send_prompt(&bot, msg.chat.id, &Prompt::UnsupportedMessage, &user).await
        }
    }
}
