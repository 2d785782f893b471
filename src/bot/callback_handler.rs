//! Callback Handler module for processing inline keyboard callback queries

use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use tracing::{debug, warn};

// Import dialogue and form types
use crate::dialogue::{FormDialogue, FormState};
use crate::form::Input;

// Import dialogue manager functions
use super::dialogue_manager::process_input;
use super::{BotServices, UserInfo};

/// Handle callback queries from inline keyboards
pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    dialogue: FormDialogue,
    state: FormState,
    services: Arc<BotServices>,
) -> Result<()> {
    debug!(user_id = %q.from.id, step = ?state.step, "Received callback query from user");

    // Always stop the button spinner, even when the payload is useless
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!(user_id = %q.from.id, error = %e, "Failed to answer callback query");
    }

    let Some(data) = q.data.clone() else {
        debug!(user_id = %q.from.id, "Callback query without data");
        return Ok(());
    };

    let user = UserInfo::from(&q.from);
    process_input(&bot, &dialogue, state, &user, Input::Callback(data), &services).await
}
