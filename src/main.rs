mod clinic;

use std::{sync::Arc, time::Duration};

use chatgpt::{client::ChatGPT, config::ChatGPTEngine};
use clinic::{
    controller::{Advance, GameController, GameState, LoadOutcome, RequestToken},
    provider::{read_api_key, CaseError, CaseGenerator, CaseProvider, CaseSource, FALLBACK_DELAY},
    sessions::Sessions,
    view,
};
use dotenv::dotenv;
use teloxide::{
    prelude::*,
    types::{KeyboardButton, KeyboardMarkup, KeyboardRemove, ParseMode},
};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const TIMEOUT_VAR: &str = "CHATGPT_TIMEOUT_SECS";
const FALLBACK_DELAY_VAR: &str = "FALLBACK_DELAY_MS";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    // .env is optional, the environment may already carry everything
    dotenv().ok();

    pretty_env_logger::init();
    log::info!("Starting clinic bot...");

    let bot = Bot::from_env();

    let fallback_delay = duration_from_env(FALLBACK_DELAY_VAR, Duration::from_millis)
        .unwrap_or(FALLBACK_DELAY);
    let provider = Arc::new(CaseProvider::new(case_source()).with_fallback_delay(fallback_delay));

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .branch(
                dptree::filter(|msg: Message| matches!(msg.text(), Some("/start" | "/menu")))
                    .endpoint(back_to_menu),
            )
            .branch(in_state(GameState::Menu).endpoint(menu))
            .branch(in_state(GameState::Loading).endpoint(loading))
            .branch(in_state(GameState::Playing).endpoint(playing))
            .branch(in_state(GameState::Feedback).endpoint(feedback))
            .branch(in_state(GameState::GameOver).endpoint(game_over)),
    )
    .dependencies(dptree::deps![Arc::new(Sessions::new()), provider])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;
}

fn case_source() -> Option<Box<dyn CaseSource>> {
    let api_key = read_api_key()?;

    let gpt = match ChatGPT::new(api_key) {
        Ok(mut gpt) => {
            gpt.config.engine = ChatGPTEngine::Gpt35Turbo;
            gpt.config.timeout =
                duration_from_env(TIMEOUT_VAR, Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);
            gpt
        }
        Err(err) => {
            log::error!("Unable to set up ChatGPT, using the fallback case: {}", err);
            return None;
        }
    };

    log::info!("Cases will be generated by {:?}", gpt.config.engine);
    Some(Box::new(CaseGenerator::new(gpt)))
}

fn duration_from_env(var: &str, unit: fn(u64) -> Duration) -> Option<Duration> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(unit(value)),
        Err(_) => {
            log::warn!("Ignoring {}={:?}, expected a whole number", var, raw);
            None
        }
    }
}

fn in_state(
    state: GameState,
) -> dptree::Handler<
    'static,
    dptree::di::DependencyMap,
    HandlerResult,
    teloxide::dispatching::DpHandlerDescription,
> {
    dptree::filter_async(move |msg: Message, sessions: Arc<Sessions>| async move {
        sessions.state(msg.chat.id).await == state
    })
}

fn single_button(text: &str) -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(text)]])
}

fn options_keyboard(options: &[String]) -> KeyboardMarkup {
    KeyboardMarkup::new(
        options
            .iter()
            .map(|o| vec![KeyboardButton::new(o.clone())])
            .collect::<Vec<_>>(),
    )
}

async fn show_menu(bot: &Bot, chat_id: ChatId) -> HandlerResult {
    bot.send_message(chat_id, view::MENU_TEXT)
        .parse_mode(ParseMode::Html)
        .reply_markup(single_button(view::START_BUTTON))
        .await?;
    Ok(())
}

async fn show_case(bot: &Bot, chat_id: ChatId, controller: &GameController) -> HandlerResult {
    if let Some(case) = controller.case() {
        bot.send_message(chat_id, view::case_card(controller.stats(), case))
            .parse_mode(ParseMode::Html)
            .reply_markup(options_keyboard(controller.options()))
            .await?;
    }
    Ok(())
}

async fn show_feedback(bot: &Bot, chat_id: ChatId, controller: &GameController) -> HandlerResult {
    if let Some(text) = view::feedback(controller) {
        bot.send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .reply_markup(single_button(view::next_button(controller.stats())))
            .await?;
    }
    Ok(())
}

async fn show_game_over(bot: &Bot, chat_id: ChatId, controller: &GameController) -> HandlerResult {
    bot.send_message(chat_id, view::game_over(controller.stats()))
        .parse_mode(ParseMode::Html)
        .reply_markup(single_button(view::RETRY_BUTTON))
        .await?;
    Ok(())
}

async fn back_to_menu(bot: Bot, sessions: Arc<Sessions>, msg: Message) -> HandlerResult {
    sessions.update(msg.chat.id, GameController::abandon).await;
    show_menu(&bot, msg.chat.id).await
}

async fn menu(
    bot: Bot,
    sessions: Arc<Sessions>,
    provider: Arc<CaseProvider>,
    msg: Message,
) -> HandlerResult {
    match msg.text() {
        Some(view::START_BUTTON) => start_game(bot, sessions, provider, msg.chat.id).await,
        _ => show_menu(&bot, msg.chat.id).await,
    }
}

async fn game_over(
    bot: Bot,
    sessions: Arc<Sessions>,
    provider: Arc<CaseProvider>,
    msg: Message,
) -> HandlerResult {
    match msg.text() {
        Some(view::RETRY_BUTTON | view::START_BUTTON) => {
            start_game(bot, sessions, provider, msg.chat.id).await
        }
        _ => {
            let controller = sessions.snapshot(msg.chat.id).await;
            show_game_over(&bot, msg.chat.id, &controller).await
        }
    }
}

async fn loading(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, view::WAIT_TEXT).await?;
    Ok(())
}

async fn playing(bot: Bot, sessions: Arc<Sessions>, msg: Message) -> HandlerResult {
    let (verdict, controller) = sessions
        .update(msg.chat.id, |controller| {
            let verdict = msg.text().and_then(|choice| controller.answer(choice));
            (verdict, controller.clone())
        })
        .await;

    if verdict.is_none() {
        bot.send_message(msg.chat.id, view::PICK_OPTION_TEXT)
            .reply_markup(options_keyboard(controller.options()))
            .await?;
        return Ok(());
    }

    log::debug!("Chat {:?} answered: {:?}", msg.chat.id, verdict);
    show_feedback(&bot, msg.chat.id, &controller).await
}

async fn feedback(
    bot: Bot,
    sessions: Arc<Sessions>,
    provider: Arc<CaseProvider>,
    msg: Message,
) -> HandlerResult {
    if !matches!(msg.text(), Some(view::NEXT_BUTTON | view::FINISH_BUTTON)) {
        let controller = sessions.snapshot(msg.chat.id).await;
        return show_feedback(&bot, msg.chat.id, &controller).await;
    }

    let (advance, controller) = sessions
        .update(msg.chat.id, |controller| (controller.next(), controller.clone()))
        .await;

    match advance {
        Some(Advance::Loading(token)) => {
            announce_loading(&bot, msg.chat.id).await?;
            spawn_case_fetch(bot, sessions, provider, msg.chat.id, token);
        }
        Some(Advance::GameOver) => {
            log::info!(
                "Chat {:?} finished with {} points",
                msg.chat.id,
                controller.stats().score
            );
            show_game_over(&bot, msg.chat.id, &controller).await?;
        }
        None => {
            log::debug!(
                "Chat {:?} pressed next outside feedback ({:?})",
                msg.chat.id,
                controller.state()
            );
        }
    }
    Ok(())
}

async fn start_game(
    bot: Bot,
    sessions: Arc<Sessions>,
    provider: Arc<CaseProvider>,
    chat_id: ChatId,
) -> HandlerResult {
    let token = match sessions.update(chat_id, |controller| controller.start()).await {
        Some(token) => token,
        None => return Ok(()),
    };

    announce_loading(&bot, chat_id).await?;
    spawn_case_fetch(bot, sessions, provider, chat_id, token);
    Ok(())
}

async fn announce_loading(bot: &Bot, chat_id: ChatId) -> HandlerResult {
    bot.send_message(chat_id, view::LOADING_TEXT)
        .reply_markup(KeyboardRemove::new())
        .await?;
    Ok(())
}

// The fetch runs off the dispatcher so the chat stays responsive (and
// /menu can abandon it) while the model is thinking.
fn spawn_case_fetch(
    bot: Bot,
    sessions: Arc<Sessions>,
    provider: Arc<CaseProvider>,
    chat_id: ChatId,
    token: RequestToken,
) {
    tokio::spawn(async move {
        if let Err(err) = receive_case(bot, sessions, provider, chat_id, token).await {
            log::error!("Failed to deliver a case to chat {:?}: {}", chat_id, err);
        }
    });
}

async fn receive_case(
    bot: Bot,
    sessions: Arc<Sessions>,
    provider: Arc<CaseProvider>,
    chat_id: ChatId,
    token: RequestToken,
) -> HandlerResult {
    let fetched = tokio::spawn(async move { provider.fetch_case().await })
        .await
        .map_err(CaseError::from);

    let (outcome, controller) = sessions
        .update(chat_id, |controller| {
            (controller.finish_loading(token, fetched), controller.clone())
        })
        .await;

    match outcome {
        LoadOutcome::Stale => {
            log::debug!("Dropping a stale case for chat {:?}", chat_id);
        }
        LoadOutcome::Aborted => show_menu(&bot, chat_id).await?,
        LoadOutcome::Adopted => show_case(&bot, chat_id, &controller).await?,
    }
    Ok(())
}
