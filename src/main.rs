use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use teloxide::dispatching::dialogue::ErasedStorage;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use course_cost_bot::action_log::{ActionLogger, DEFAULT_BUFFER_CAPACITY};
use course_cost_bot::admin::{self, AdminState};
use course_cost_bot::bot::{bot_commands, callback_handler, message_handler, BotServices};
use course_cost_bot::catalog::{Catalog, CatalogSource};
use course_cost_bot::catalog_api::RestCatalogSource;
use course_cost_bot::config::{BotMode, CatalogSourceKind, LogFormat, Settings};
use course_cost_bot::crm::BitrixClient;
use course_cost_bot::dialogue::FormState;
use course_cost_bot::form::FormSettings;
use course_cost_bot::localization::init_localization;
use course_cost_bot::recovery::RecoveryConfig;
use course_cost_bot::sheets::SheetCatalogSource;
use course_cost_bot::storage::open_storage;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let settings = Settings::from_env().context("Invalid configuration")?;
    init_logging(&settings)?;

    info!("Starting Course Cost Bot");

    init_localization().context("Failed to initialize localization")?;

    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let recovery = RecoveryConfig::default();

    let catalog = Arc::new(Catalog::new(
        catalog_source(&settings.catalog, client.clone(), recovery.clone()),
        settings.catalog_ttl,
    ));
    // The bot still starts without a catalog; the next read retries
    if let Err(e) = catalog.reload().await {
        error!(error = %e, "Initial catalog load failed");
    }

    let storage = open_storage(&settings.storage).await?;

    let crm = settings
        .bitrix
        .clone()
        .map(|bitrix| Arc::new(BitrixClient::new(client.clone(), bitrix, recovery.clone())));
    if crm.is_none() {
        warn!("BITRIX_WEBHOOK_URL is not set, leads will not be submitted");
    }

    let action_log = Arc::new(ActionLogger::new(
        client.clone(),
        settings.action_log.clone(),
        DEFAULT_BUFFER_CAPACITY,
    ));

    let services = Arc::new(BotServices {
        catalog: Arc::clone(&catalog),
        form_settings: FormSettings::from(&settings),
        crm: crm.clone(),
        action_log: Arc::clone(&action_log),
    });

    let bot = Bot::new(&settings.telegram_bot_token);

    if let Some(admin_settings) = settings.admin.clone() {
        let state = AdminState::new(&admin_settings, catalog, bot.clone(), crm, action_log);
        tokio::spawn(async move {
            if let Err(e) = admin::serve(&admin_settings, state).await {
                error!(error = %e, "Admin API stopped");
            }
        });
    }

    if settings.set_commands {
        register_commands(&bot).await;
    }

    info!("Bot initialized, starting dispatcher");

    let handler = dptree::entry()
        .enter_dialogue::<Update, ErasedStorage<FormState>, FormState>()
        .branch(Update::filter_message().endpoint(message_handler))
        .branch(Update::filter_callback_query().endpoint(callback_handler));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![storage, services])
        .enable_ctrlc_handler()
        .build();

    match (settings.bot_mode, settings.webhook.as_ref()) {
        (BotMode::Webhook, Some(webhook)) => {
            let url = reqwest::Url::parse(&webhook.webhook_url())
                .with_context(|| format!("Invalid webhook url {}", webhook.webhook_url()))?;
            info!(url = %url, bind = %webhook.bind, "Running in webhook mode");
            let options = webhooks::Options::new(webhook.bind, url);

            if webhook.set_webhook {
                let listener = webhooks::axum(bot, options)
                    .await
                    .context("Failed to set up webhook")?;
                dispatcher
                    .dispatch_with_listener(
                        listener,
                        LoggingErrorHandler::with_custom_text("An error from the update listener"),
                    )
                    .await;
            } else {
                // The webhook is registered elsewhere, only serve the endpoint
                let (listener, stop_flag, router) = webhooks::axum_no_setup(options);
                let tcp = TcpListener::bind(webhook.bind).await.with_context(|| {
                    format!("Failed to bind webhook listener on {}", webhook.bind)
                })?;
                tokio::spawn(async move {
                    let server = axum::serve(tcp, router).with_graceful_shutdown(stop_flag);
                    if let Err(e) = server.await {
                        error!(error = %e, "Webhook server error");
                    }
                });
                dispatcher
                    .dispatch_with_listener(
                        listener,
                        LoggingErrorHandler::with_custom_text("An error from the update listener"),
                    )
                    .await;
            }
        }
        _ => {
            info!("Running in polling mode");
            dispatcher.dispatch().await;
        }
    }

    Ok(())
}

fn init_logging(settings: &Settings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .map_err(|e| anyhow!("invalid log level '{}': {e}", settings.log_level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match settings.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| anyhow!("failed to set subscriber: {e}"))
}

fn catalog_source(
    kind: &CatalogSourceKind,
    client: reqwest::Client,
    recovery: RecoveryConfig,
) -> Box<dyn CatalogSource> {
    match kind {
        CatalogSourceKind::Api {
            base_url,
            login,
            password,
        } => Box::new(RestCatalogSource::new(
            client,
            base_url.clone(),
            login.clone(),
            password.clone(),
            recovery,
        )),
        CatalogSourceKind::Sheet {
            spreadsheet_id,
            range,
            api_key,
        } => Box::new(SheetCatalogSource::new(
            client,
            spreadsheet_id.clone(),
            range.clone(),
            api_key.clone(),
            recovery,
        )),
    }
}

async fn register_commands(bot: &Bot) {
    if let Err(e) = bot.set_my_commands(bot_commands(None)).await {
        warn!(error = %e, "Failed to register bot commands");
    }
    if let Err(e) = bot
        .set_my_commands(bot_commands(Some("en")))
        .language_code("en")
        .await
    {
        warn!(error = %e, "Failed to register English bot commands");
    }
}
