use rusqlite::{params, Connection, Row};
use std::fs::create_dir_all;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::recipe::Recipe;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Could not create the database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("The database connection lock is poisoned")]
    Poisoned,

    #[error("Database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

const CREATE_RECIPES: &str = "CREATE TABLE IF NOT EXISTS recipes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    ingredients TEXT NOT NULL,
    instructions TEXT NOT NULL
)";

const SELECT_RECIPE: &str = "SELECT id, title, description, ingredients, instructions FROM recipes";

/// Handle on the `recipes` table.
///
/// Cloning is cheap and every clone shares the same connection. SQLite calls run on
/// tokio's blocking pool so awaiting them never stalls the executor.
#[derive(Clone)]
pub struct RecipeStore {
    conn: Arc<Mutex<Connection>>,
}

impl RecipeStore {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                create_dir_all(dir)?;
            }
        }
        log::info!("Opening recipe database at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(CREATE_RECIPES, ())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<T, StoreError> {
            let db = conn.lock().map_err(|_| StoreError::Poisoned)?;
            Ok(f(&*db)?)
        })
        .await?
    }

    /// Inserts `recipe`, replacing any row that already has its id.
    ///
    /// A recipe with id 0 gets a fresh id. Returns the id the row is stored under.
    pub async fn insert(&self, recipe: Recipe) -> Result<i64, StoreError> {
        self.with_conn(move |db| {
            let id = (recipe.id != 0).then_some(recipe.id);
            db.execute(
                "INSERT OR REPLACE INTO recipes (id, title, description, ingredients, instructions)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    recipe.title,
                    recipe.description,
                    recipe.ingredients,
                    recipe.instructions
                ],
            )?;
            Ok(db.last_insert_rowid())
        })
        .await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Recipe>, StoreError> {
        self.with_conn(move |db| {
            let mut stmt = db.prepare(&format!("{SELECT_RECIPE} WHERE id = ?1"))?;
            match stmt.query_row((id,), row_to_recipe) {
                Ok(recipe) => Ok(Some(recipe)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    pub async fn get_all(&self) -> Result<Vec<Recipe>, StoreError> {
        self.with_conn(|db| {
            let mut stmt = db.prepare(&format!("{SELECT_RECIPE} ORDER BY id"))?;
            let recipes = stmt
                .query_map((), row_to_recipe)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(recipes)
        })
        .await
    }

    /// Returns the number of rows removed, 0 or 1.
    pub async fn delete_by_id(&self, id: i64) -> Result<usize, StoreError> {
        self.with_conn(move |db| db.execute("DELETE FROM recipes WHERE id = ?1", (id,)))
            .await
    }

    pub async fn delete_all(&self) -> Result<usize, StoreError> {
        self.with_conn(|db| db.execute("DELETE FROM recipes", ()))
            .await
    }

    /// Leaves the store without its table so every later call fails.
    #[cfg(test)]
    pub(crate) async fn drop_table(&self) {
        self.with_conn(|db| db.execute_batch("DROP TABLE recipes"))
            .await
            .unwrap();
    }
}

pub fn row_to_recipe(row: &Row) -> Result<Recipe, rusqlite::Error> {
    Ok(Recipe {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        ingredients: row.get(3)?,
        instructions: row.get(4)?,
    })
}
