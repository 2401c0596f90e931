/// A row of the `recipes` table. An `id` of 0 means the store has not assigned one yet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Recipe {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub ingredients: String,
    pub instructions: String,
}

impl Recipe {
    pub fn ingredient_lines(&self) -> Vec<String> {
        split_lines(&self.ingredients)
    }

    pub fn instruction_lines(&self) -> Vec<String> {
        split_lines(&self.instructions)
    }
}

fn split_lines(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split('\n').map(str::to_string).collect()
}
