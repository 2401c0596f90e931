use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::db::RecipeStore;
use crate::llm::CompletionProvider;
use crate::parser::{process_response, Processed, Reply};

pub const NO_INGREDIENTS: &str = "Please add at least one ingredient";

/// Turns user input into recipe replies.
///
/// Each request runs as its own task and answers through a oneshot channel. If the
/// receiver is gone by the time the reply is ready, the reply is dropped.
#[derive(Clone)]
pub struct Kitchen {
    provider: Arc<dyn CompletionProvider>,
    store: RecipeStore,
}

impl Kitchen {
    pub fn new(provider: Arc<dyn CompletionProvider>, store: RecipeStore) -> Self {
        Self { provider, store }
    }

    pub fn cook_from_ingredients(&self, ingredients: Vec<String>) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        let ingredients: Vec<String> = ingredients
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();

        if ingredients.is_empty() {
            deliver(tx, Reply::Failure(NO_INGREDIENTS.to_string()));
            return rx;
        }

        let provider = Arc::clone(&self.provider);
        let store = self.store.clone();
        tokio::spawn(async move {
            log::info!("Cooking from {} ingredients", ingredients.len());
            let response = provider.ask_for_ingredients(&ingredients).await;
            deliver(tx, respond(response.as_deref(), &store));
        });
        rx
    }

    pub fn cook_from_photo(&self, jpeg: Vec<u8>, prompt: String) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        let provider = Arc::clone(&self.provider);
        let store = self.store.clone();
        tokio::spawn(async move {
            log::info!("Cooking from a {} byte photo", jpeg.len());
            let encoded = STANDARD.encode(&jpeg);
            let response = provider.ask_for_image(&encoded, &prompt).await;
            deliver(tx, respond(response.as_deref(), &store));
        });
        rx
    }
}

fn respond(response: Option<&str>, store: &RecipeStore) -> Reply {
    let Processed { reply, saving } = process_response(response, store);
    // detached: the reply never waits for the save
    drop(saving);
    reply
}

fn deliver(tx: oneshot::Sender<Reply>, reply: Reply) {
    if tx.send(reply).is_err() {
        log::debug!("Requester went away before the reply was ready, dropping it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    const SOUP: &str = r#"```json
{"Title":"Soup","Description":"","Ingredients":["Water","Salt"],"Instructions":["Boil","Add salt"]}
```"#;

    /// Replays a canned response and records what it was asked.
    #[derive(Default)]
    struct FakeProvider {
        response: Option<String>,
        ingredients: Mutex<Vec<Vec<String>>>,
        images: Mutex<Vec<(String, String)>>,
    }

    impl FakeProvider {
        fn answering(response: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                response: response.map(str::to_string),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for FakeProvider {
        async fn ask_for_ingredients(&self, ingredients: &[String]) -> Option<String> {
            self.ingredients.lock().unwrap().push(ingredients.to_vec());
            self.response.clone()
        }

        async fn ask_for_image(&self, base64_jpeg: &str, prompt: &str) -> Option<String> {
            self.images
                .lock()
                .unwrap()
                .push((base64_jpeg.to_string(), prompt.to_string()));
            self.response.clone()
        }
    }

    async fn wait_for_recipes(store: &RecipeStore, count: usize) -> usize {
        for _ in 0..100 {
            let saved = store.get_all().await.unwrap().len();
            if saved >= count {
                return saved;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        store.get_all().await.unwrap().len()
    }

    #[tokio::test]
    async fn ingredients_become_a_saved_recipe() {
        let provider = FakeProvider::answering(Some(SOUP));
        let store = RecipeStore::open_in_memory().unwrap();
        let kitchen = Kitchen::new(provider.clone(), store.clone());

        let reply = kitchen
            .cook_from_ingredients(vec![" water ".to_string(), "".to_string(), "salt".to_string()])
            .await
            .unwrap();

        assert!(matches!(reply, Reply::Recipe(ref html) if html.contains("<b>Soup</b>")));
        assert_eq!(
            *provider.ingredients.lock().unwrap(),
            vec![vec!["water".to_string(), "salt".to_string()]]
        );
        assert_eq!(wait_for_recipes(&store, 1).await, 1);
    }

    #[tokio::test]
    async fn no_ingredients_skips_the_model() {
        let provider = FakeProvider::answering(Some(SOUP));
        let kitchen = Kitchen::new(provider.clone(), RecipeStore::open_in_memory().unwrap());

        let reply = kitchen
            .cook_from_ingredients(vec!["  ".to_string()])
            .await
            .unwrap();

        assert_eq!(reply, Reply::Failure(NO_INGREDIENTS.to_string()));
        assert!(provider.ingredients.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_request_is_reported() {
        let provider = FakeProvider::answering(None);
        let store = RecipeStore::open_in_memory().unwrap();
        let kitchen = Kitchen::new(provider, store.clone());

        let reply = kitchen
            .cook_from_ingredients(vec!["salt".to_string()])
            .await
            .unwrap();

        assert_eq!(reply, Reply::Failure("Error getting reply.".to_string()));
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn photo_is_sent_base64_encoded() {
        let provider = FakeProvider::answering(Some(SOUP));
        let store = RecipeStore::open_in_memory().unwrap();
        let kitchen = Kitchen::new(provider.clone(), store.clone());

        let reply = kitchen
            .cook_from_photo(b"ABC".to_vec(), "no meat".to_string())
            .await
            .unwrap();

        assert!(matches!(reply, Reply::Recipe(_)));
        assert_eq!(
            *provider.images.lock().unwrap(),
            vec![("QUJD".to_string(), "no meat".to_string())]
        );
        assert_eq!(wait_for_recipes(&store, 1).await, 1);
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_stop_the_save() {
        let provider = FakeProvider::answering(Some(SOUP));
        let store = RecipeStore::open_in_memory().unwrap();
        let kitchen = Kitchen::new(provider, store.clone());

        drop(kitchen.cook_from_ingredients(vec!["salt".to_string()]));

        assert_eq!(wait_for_recipes(&store, 1).await, 1);
    }
}
