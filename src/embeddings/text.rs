//! Text preparation for embeddings and keyword queries.

use crate::model::WorkItem;

/// Prepare the text embedded for a work item.
///
/// Creates a searchable representation: `[type] title: description`.
#[must_use]
pub fn prepare_item_text(item: &WorkItem) -> String {
    let mut text = format!("[{}] {}", item.item_type, item.title);

    if !item.description.is_empty() {
        text.push_str(": ");
        text.push_str(&item.description);
    }

    text
}

/// Cut text to at most `max_chars` characters, backing up to a word boundary.
///
/// Never splits a UTF-8 sequence.
#[must_use]
pub fn truncate_for_model(text: &str, max_chars: usize) -> &str {
    if text.chars().count() <= max_chars {
        return text;
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(i, _)| i);
    let head = &text[..cut];

    // Search backward for a word boundary
    match head.rfind(|c: char| c.is_whitespace() || matches!(c, '.' | '!' | '?' | ';' | ',')) {
        Some(i) if i > 0 => &head[..i],
        _ => head,
    }
}

/// Split text into lowercase alphanumeric tokens.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemType;

    #[test]
    fn test_prepare_item_text() {
        let item = WorkItem::new(ItemType::Story, "Login form").with_description("Email and password");
        assert_eq!(prepare_item_text(&item), "[story] Login form: Email and password");

        let bare = WorkItem::new(ItemType::Epic, "Auth");
        assert_eq!(prepare_item_text(&bare), "[epic] Auth");
    }

    #[test]
    fn test_truncate_respects_word_boundary() {
        let text = "one two three four";
        assert_eq!(truncate_for_model(text, 100), text);
        assert_eq!(truncate_for_model(text, 10), "one two");
    }

    #[test]
    fn test_truncate_multibyte() {
        let text = "ééééé";
        assert_eq!(truncate_for_model(text, 3), "ééé");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("OAuth2-login, \"for\" users!"),
            vec!["oauth2", "login", "for", "users"]
        );
        assert!(tokenize("  ***  ").is_empty());
    }
}
