use teloxide::utils::html::escape;

use crate::recipe::Recipe;

/// Renders a recipe as Telegram HTML. Every field is escaped before it is interpolated.
pub fn format_recipe(
    title: &str,
    description: &str,
    ingredients: &[String],
    instructions: &[String],
) -> String {
    let mut html = format!("🍽️ <b>{}</b>\n\n", escape(title));

    if !description.is_empty() {
        html.push_str(&format!("📝 {}\n\n", escape(description)));
    }

    html.push_str("<b>🧂 Ingredients:</b>\n");
    for ingredient in ingredients {
        html.push_str(&format!("- {}\n", escape(ingredient)));
    }

    html.push_str("\n<b>👩‍🍳 Instructions:</b>\n");
    for instruction in instructions {
        html.push_str(&format!("• {}\n\n", escape(instruction)));
    }
    html
}

pub fn format_stored_recipe(recipe: &Recipe) -> String {
    format_recipe(
        &recipe.title,
        &recipe.description,
        &recipe.ingredient_lines(),
        &recipe.instruction_lines(),
    )
}

pub fn format_recipe_list(recipes: &[Recipe]) -> String {
    if recipes.is_empty() {
        return "No recipes saved yet. Send me some ingredients or a photo!".to_string();
    }

    let mut html = String::from("<b>📚 Saved recipes:</b>\n");
    for recipe in recipes {
        html.push_str(&format!("\n#{} <b>{}</b>", recipe.id, escape(&recipe.title)));
        if !recipe.description.is_empty() {
            html.push_str(&format!("\n{}", escape(&recipe.description)));
        }
        html.push('\n');
    }
    html.push_str("\nOpen one with /recipe &lt;id&gt;");
    html
}

/// Longest text Telegram accepts in one message, in UTF-16 code units.
pub const MESSAGE_LIMIT: usize = 4096;

/// Cuts Telegram HTML into messages of at most `limit` UTF-16 units.
///
/// Cuts go at blank lines first, so a recipe section or a list entry stays whole, then
/// at line ends. A single line that is still too long is cut between characters, never
/// inside a tag or an entity, and an open `<b>` is closed and reopened around the cut.
pub fn split_message(html: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for block in html.split_inclusive("\n\n") {
        if fits(&current, block, limit) {
            current.push_str(block);
            continue;
        }
        flush(&mut chunks, &mut current);
        if fits(&current, block, limit) {
            current.push_str(block);
            continue;
        }

        for line in block.split_inclusive('\n') {
            if fits(&current, line, limit) {
                current.push_str(line);
                continue;
            }
            flush(&mut chunks, &mut current);
            if fits(&current, line, limit) {
                current.push_str(line);
            } else {
                chunks.extend(split_line(line, limit));
            }
        }
    }
    flush(&mut chunks, &mut current);
    chunks
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

fn fits(current: &str, next: &str, limit: usize) -> bool {
    utf16_len(current) + utf16_len(next) <= limit
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    if !current.trim().is_empty() {
        chunks.push(std::mem::take(current));
    }
    current.clear();
}

fn split_line(line: &str, limit: usize) -> Vec<String> {
    // room for a tag or an entity that straddles the budget, plus a closing </b>
    let budget = limit.saturating_sub(16).max(1);
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut units = 0;
    let mut tag_start = 0;
    let mut in_tag = false;
    let mut in_entity = false;
    let mut bold = false;

    for c in line.chars() {
        if !in_tag && !in_entity && units + c.len_utf16() > budget {
            if bold {
                piece.push_str("</b>");
            }
            pieces.push(std::mem::take(&mut piece));
            units = 0;
            if bold {
                piece.push_str("<b>");
                units = 3;
            }
        }

        piece.push(c);
        units += c.len_utf16();
        match c {
            '<' => {
                in_tag = true;
                tag_start = piece.len() - 1;
            }
            '>' if in_tag => {
                in_tag = false;
                match &piece[tag_start..] {
                    "<b>" => bold = true,
                    "</b>" => bold = false,
                    _ => {}
                }
            }
            '&' => in_entity = true,
            ';' => in_entity = false,
            _ => {}
        }
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}
