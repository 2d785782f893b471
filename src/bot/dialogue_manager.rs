//! Dialogue Manager module: runs form transitions and carries out their outcome

use anyhow::{anyhow, Result};
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{debug, error, info, warn};

// Import dialogue and form types
use crate::dialogue::{FormDialogue, FormState};
use crate::form::{handle_command, handle_input, Effect, Input, Next, Outcome, Prompt};

// Import UI builder functions
use super::ui_builder::render_prompt;
use super::{BotServices, UserInfo};

/// Feed one input through the form and apply the result
pub async fn process_input(
    bot: &Bot,
    dialogue: &FormDialogue,
    state: FormState,
    user: &UserInfo,
    input: Input,
    services: &BotServices,
) -> Result<()> {
    let chat_id = dialogue.chat_id();
    debug!(user_id = %chat_id, step = ?state.step, input = ?input, "Processing form input");

    // Restart and stop must work while the catalog is down
    if let Some(outcome) = handle_command(&input) {
        return apply_outcome(bot, dialogue, user, outcome, services).await;
    }

    let snapshot = match services.catalog.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(user_id = %chat_id, error = %e, "Catalog is unavailable");
            return send_prompt(bot, chat_id, &Prompt::CatalogUnavailable, user).await;
        }
    };

    let outcome = handle_input(&state, &input, &snapshot, &services.form_settings);
    apply_outcome(bot, dialogue, user, outcome, services).await
}

/// Persist the next state, run side effects and send the prompt
pub async fn apply_outcome(
    bot: &Bot,
    dialogue: &FormDialogue,
    user: &UserInfo,
    outcome: Outcome,
    services: &BotServices,
) -> Result<()> {
    let chat_id = dialogue.chat_id();
    let Outcome {
        next,
        mut prompt,
        effects,
    } = outcome;

    match next {
        Next::Stay => {}
        Next::Update(state) => {
            debug!(user_id = %chat_id, step = ?state.step, "Dialogue state updated");
            dialogue
                .update(state)
                .await
                .map_err(|e| anyhow!("Failed to store dialogue state: {e}"))?;
        }
        Next::Finish => {
            // Nothing is stored for a chat that never left the first step
            if let Err(e) = dialogue.exit().await {
                debug!(user_id = %chat_id, error = %e, "No dialogue to remove");
            }
        }
    }

    for effect in effects {
        match effect {
            Effect::SubmitLead(lead) => match &services.crm {
                Some(crm) => match crm.create_lead(&lead).await {
                    Ok(lead_id) => info!(user_id = %chat_id, lead_id, "Lead submitted"),
                    Err(e) => {
                        error!(user_id = %chat_id, error = %e, "Failed to submit lead");
                        prompt = Prompt::LeadFailed;
                    }
                },
                None => warn!(user_id = %chat_id, "CRM is not configured, lead dropped"),
            },
            Effect::LogAction(message) => {
                let logger = services.action_log.clone();
                let user = user.clone();
                tokio::spawn(async move {
                    let shipped = logger
                        .log(&message, user.id, &user.full_name, user.username.as_deref())
                        .await;
                    if let Err(e) = shipped {
                        warn!(user_id = user.id, error = %e, "Failed to ship action record");
                    }
                });
            }
        }
    }

    send_prompt(bot, chat_id, &prompt, user).await
}

/// Render a prompt and send it as an HTML message
pub async fn send_prompt(
    bot: &Bot,
    chat_id: ChatId,
    prompt: &Prompt,
    user: &UserInfo,
) -> Result<()> {
    let rendered = render_prompt(prompt, &user.full_name, user.language_code.as_deref());
    let request = bot
        .send_message(chat_id, rendered.text)
        .parse_mode(ParseMode::Html);
    match rendered.markup {
        Some(markup) => request.reply_markup(markup).await?,
        None => request.await?,
    };
    Ok(())
}
