use dotenv::dotenv;
use std::sync::Arc;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::*;
use teloxide::net::Download;
use teloxide::types::{ChatAction, ParseMode};
use teloxide::{prelude::*, utils::command::BotCommands};
use tokio::sync::oneshot;

mod config;
mod db;
mod format;
mod kitchen;
mod llm;
mod parser;
mod recipe;

use config::Config;
use db::RecipeStore;
use kitchen::{Kitchen, NO_INGREDIENTS};
use llm::CompletionClient;
use parser::Reply;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type MyDialogue = Dialogue<State, InMemStorage<State>>;

const WELCOME: &str = "Hi! Tell me what is in your fridge and I will suggest a recipe.\n\
Send /ingredients followed by a comma separated list, or send a photo of your ingredients \
(the caption is passed along as an extra wish).";

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "Display this text.")]
    Help,
    #[command(description = "Display the welcome message.")]
    Start,
    #[command(
        description = "Suggest a recipe from a comma separated list, or start listing ingredients one message at a time."
    )]
    Ingredients(String),
    #[command(description = "Cook with the ingredients listed so far.")]
    Cook,
    #[command(description = "List saved recipes.")]
    Recipes,
    #[command(description = "Show a saved recipe, e.g. /recipe 3.")]
    Recipe(String),
    #[command(description = "Delete a saved recipe, e.g. /delete 3.")]
    Delete(String),
    #[command(description = "Delete every saved recipe.")]
    Clear,
}

#[derive(Clone, Default)]
pub enum State {
    #[default]
    Start,
    Collecting(Vec<String>),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load all env variables from .env file.
    dotenv().ok();
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();
    log::info!("Starting bot...");

    let config = Config::from_env()?;

    log::info!("Loading database");
    let store = RecipeStore::open(&config.db_path)?;
    let kitchen = Kitchen::new(Arc::new(CompletionClient::new(config.llm)), store.clone());

    let bot = Bot::from_env();

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![kitchen, store, InMemStorage::<State>::new()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    let commands = dptree::entry()
        .filter_command::<Command>()
        .branch(dptree::case![Command::Help].endpoint(help))
        .branch(dptree::case![Command::Start].endpoint(welcome))
        .branch(dptree::case![Command::Ingredients(list)].endpoint(start_ingredients))
        .branch(dptree::case![Command::Cook].endpoint(cook))
        .branch(dptree::case![Command::Recipes].endpoint(list_recipes))
        .branch(dptree::case![Command::Recipe(id)].endpoint(show_recipe))
        .branch(dptree::case![Command::Delete(id)].endpoint(delete_recipe))
        .branch(dptree::case![Command::Clear].endpoint(clear_recipes));

    Update::filter_message()
        .enter_dialogue::<Message, InMemStorage<State>, State>()
        .branch(commands)
        .branch(dptree::filter(|msg: Message| msg.photo().is_some()).endpoint(cook_from_photo))
        .branch(dptree::case![State::Collecting(items)].endpoint(collect_ingredient))
        .branch(dptree::endpoint(unknown))
}

async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

async fn welcome(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        format!("{}\n\n{}", WELCOME, Command::descriptions()),
    )
    .await?;
    Ok(())
}

async fn unknown(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        "I did not get that. Send /help to see what I can do.",
    )
    .await?;
    Ok(())
}

fn split_ingredients(text: &str) -> Vec<String> {
    text.split([',', '\n'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

async fn start_ingredients(
    bot: Bot,
    dialogue: MyDialogue,
    kitchen: Kitchen,
    msg: Message,
    list: String,
) -> HandlerResult {
    let ingredients = split_ingredients(&list);
    if ingredients.is_empty() {
        dialogue.update(State::Collecting(Vec::new())).await?;
        bot.send_message(
            msg.chat.id,
            "Send me one ingredient per message, then /cook when you are done.",
        )
        .await?;
        return Ok(());
    }

    dialogue.update(State::Start).await?;
    serve(bot, msg.chat.id, kitchen.cook_from_ingredients(ingredients)).await
}

async fn collect_ingredient(
    bot: Bot,
    dialogue: MyDialogue,
    msg: Message,
    mut items: Vec<String>,
) -> HandlerResult {
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, "Send ingredients as text, then /cook.")
            .await?;
        return Ok(());
    };

    items.extend(split_ingredients(text));
    let count = items.len();
    dialogue.update(State::Collecting(items)).await?;
    bot.send_message(
        msg.chat.id,
        format!("Got it, {count} ingredient(s) so far. Send more or /cook."),
    )
    .await?;
    Ok(())
}

async fn cook(
    bot: Bot,
    dialogue: MyDialogue,
    kitchen: Kitchen,
    msg: Message,
    state: State,
) -> HandlerResult {
    let Some(ingredients) = collected_ingredients(state) else {
        bot.send_message(msg.chat.id, NO_INGREDIENTS).await?;
        return Ok(());
    };
    dialogue.update(State::Start).await?;
    serve(bot, msg.chat.id, kitchen.cook_from_ingredients(ingredients)).await
}

/// Ingredients gathered so far, or `None` when there is nothing to cook with.
fn collected_ingredients(state: State) -> Option<Vec<String>> {
    match state {
        State::Collecting(items) if !items.is_empty() => Some(items),
        _ => None,
    }
}

async fn cook_from_photo(bot: Bot, kitchen: Kitchen, msg: Message) -> HandlerResult {
    // Telegram lists photo sizes from smallest to largest.
    let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) else {
        return Ok(());
    };

    let file = bot.get_file(photo.file.id.clone()).await?;
    let mut jpeg = Vec::new();
    bot.download_file(&file.path, &mut jpeg).await?;
    log::debug!("Downloaded photo {} ({} bytes)", file.path, jpeg.len());

    let prompt = msg.caption().unwrap_or_default().to_string();
    serve(bot, msg.chat.id, kitchen.cook_from_photo(jpeg, prompt)).await
}

/// Tells the user we are working and sends the reply whenever the kitchen has it.
///
/// The reply is awaited in its own task so the chat keeps answering meanwhile.
async fn serve(bot: Bot, chat_id: ChatId, reply: oneshot::Receiver<Reply>) -> HandlerResult {
    bot.send_message(chat_id, "Generating recipe...").await?;
    bot.send_chat_action(chat_id, ChatAction::Typing).await?;

    tokio::spawn(async move {
        let reply = match reply.await {
            Ok(reply) => reply,
            Err(_) => {
                log::warn!("Recipe task for chat {} ended without a reply", chat_id.0);
                return;
            }
        };
        if let Err(e) = send_reply(&bot, chat_id, reply).await {
            log::error!("Failed to send reply to chat {}: {}", chat_id.0, e);
        }
    });
    Ok(())
}

async fn send_reply(bot: &Bot, chat_id: ChatId, reply: Reply) -> Result<(), teloxide::RequestError> {
    match reply {
        Reply::Recipe(html) => send_html(bot, chat_id, &html).await,
        Reply::Failure(text) => bot.send_message(chat_id, text).await.map(|_| ()),
    }
}

/// Sends HTML in as many messages as Telegram's length limit requires.
async fn send_html(bot: &Bot, chat_id: ChatId, html: &str) -> Result<(), teloxide::RequestError> {
    for chunk in format::split_message(html, format::MESSAGE_LIMIT) {
        bot.send_message(chat_id, chunk)
            .parse_mode(ParseMode::Html)
            .await?;
    }
    Ok(())
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.trim().trim_start_matches('#').parse().ok()
}

async fn list_recipes(bot: Bot, store: RecipeStore, msg: Message) -> HandlerResult {
    let recipes = store.get_all().await?;
    send_html(&bot, msg.chat.id, &format::format_recipe_list(&recipes)).await?;
    Ok(())
}

async fn show_recipe(bot: Bot, store: RecipeStore, msg: Message, id: String) -> HandlerResult {
    let Some(id) = parse_id(&id) else {
        bot.send_message(msg.chat.id, "Usage: /recipe <id>").await?;
        return Ok(());
    };

    match store.get_by_id(id).await? {
        Some(recipe) => {
            send_html(&bot, msg.chat.id, &format::format_stored_recipe(&recipe)).await?;
        }
        None => {
            bot.send_message(msg.chat.id, format!("No recipe with id {id}."))
                .await?;
        }
    }
    Ok(())
}

async fn delete_recipe(bot: Bot, store: RecipeStore, msg: Message, id: String) -> HandlerResult {
    let Some(id) = parse_id(&id) else {
        bot.send_message(msg.chat.id, "Usage: /delete <id>").await?;
        return Ok(());
    };

    let text = match store.delete_by_id(id).await? {
        0 => format!("No recipe with id {id}."),
        _ => format!("Deleted recipe {id}."),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn clear_recipes(bot: Bot, store: RecipeStore, msg: Message) -> HandlerResult {
    let removed = store.delete_all().await?;
    bot.send_message(msg.chat.id, format!("Deleted {removed} recipe(s)."))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingredients_split_on_commas_and_newlines() {
        assert_eq!(
            split_ingredients(" eggs, flour\nmilk ,, \n"),
            vec!["eggs", "flour", "milk"]
        );
        assert!(split_ingredients("  ").is_empty());
    }

    #[test]
    fn cooking_needs_collected_ingredients() {
        assert_eq!(collected_ingredients(State::Start), None);
        assert_eq!(collected_ingredients(State::Collecting(Vec::new())), None);
        assert_eq!(
            collected_ingredients(State::Collecting(vec!["eggs".to_string()])),
            Some(vec!["eggs".to_string()])
        );
    }

    #[test]
    fn ids_accept_a_leading_hash() {
        assert_eq!(parse_id(" 3 "), Some(3));
        assert_eq!(parse_id("#12"), Some(12));
        assert_eq!(parse_id("soup"), None);
        assert_eq!(parse_id(""), None);
    }

    #[test]
    fn commands_parse_their_arguments() {
        assert!(matches!(
            Command::parse("/ingredients eggs, milk", "bot"),
            Ok(Command::Ingredients(list)) if list == "eggs, milk"
        ));
        assert!(matches!(
            Command::parse("/recipe 4", "bot"),
            Ok(Command::Recipe(id)) if id == "4"
        ));
        assert!(matches!(Command::parse("/recipes", "bot"), Ok(Command::Recipes)));
        assert!(matches!(Command::parse("/cook", "bot"), Ok(Command::Cook)));
    }
}
