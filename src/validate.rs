//! Lenient parsing of entity, operation and priority names typed on the
//! command line.
//!
//! Each name is looked up case-insensitively among its canonical spellings
//! and a table of aliases. Unknown input gets the nearest known name as a
//! suggestion.

use crate::model::{ChangeKind, EntityKind, Priority};
use std::sync::LazyLock;

/// Largest edit distance still worth suggesting.
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Canonical names plus `(alias, canonical)` pairs for one argument.
pub struct Vocabulary<T: Copy + 'static> {
    canonical: &'static [(&'static str, T)],
    aliases: &'static [(&'static str, &'static str)],
}

/// A name that matched nothing: the raw input and the closest known name.
pub type Unrecognized = (String, Option<String>);

impl<T: Copy + 'static> Vocabulary<T> {
    fn lookup(&self, name: &str) -> Option<T> {
        self.canonical
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, value)| *value)
    }

    /// Resolve `input` to its value, or report the nearest spelling.
    ///
    /// # Errors
    ///
    /// Returns the original input and a suggestion when nothing matches.
    pub fn resolve(&self, input: &str) -> Result<T, Unrecognized> {
        let needle = input.trim().to_lowercase();
        let target = self
            .aliases
            .iter()
            .find(|(alias, _)| *alias == needle)
            .map_or(needle.as_str(), |(_, canonical)| *canonical);

        self.lookup(target)
            .ok_or_else(|| (input.to_string(), self.nearest(&needle)))
    }

    fn nearest(&self, needle: &str) -> Option<String> {
        let names = self.canonical.iter().map(|(name, _)| (*name, *name));
        let aliases = self.aliases.iter().copied();
        names
            .chain(aliases)
            .map(|(spelling, shown)| (levenshtein_distance(needle, spelling), shown))
            .filter(|(dist, _)| *dist <= MAX_SUGGESTION_DISTANCE)
            .min_by_key(|(dist, _)| *dist)
            .map(|(_, shown)| shown.to_string())
    }
}

pub static ENTITIES: LazyLock<Vocabulary<EntityKind>> = LazyLock::new(|| Vocabulary {
    canonical: &[
        ("product", EntityKind::Product),
        ("recipe", EntityKind::Recipe),
        ("shoppinglist", EntityKind::ShoppingList),
    ],
    aliases: &[
        ("products", "product"),
        ("item", "product"),
        ("food", "product"),
        ("grocery", "product"),
        ("recipes", "recipe"),
        ("dish", "recipe"),
        ("meal", "recipe"),
        ("list", "shoppinglist"),
        ("lists", "shoppinglist"),
        ("shopping", "shoppinglist"),
        ("shopping_list", "shoppinglist"),
        ("shopping-list", "shoppinglist"),
        ("shoppinglists", "shoppinglist"),
    ],
});

pub static OPERATIONS: LazyLock<Vocabulary<ChangeKind>> = LazyLock::new(|| Vocabulary {
    canonical: &[
        ("create", ChangeKind::Create),
        ("update", ChangeKind::Update),
        ("delete", ChangeKind::Delete),
    ],
    aliases: &[
        ("add", "create"),
        ("new", "create"),
        ("insert", "create"),
        ("edit", "update"),
        ("modify", "update"),
        ("change", "update"),
        ("put", "update"),
        ("restore", "update"),
        ("remove", "delete"),
        ("rm", "delete"),
        ("del", "delete"),
        ("destroy", "delete"),
    ],
});

pub static PRIORITIES: LazyLock<Vocabulary<Priority>> = LazyLock::new(|| Vocabulary {
    canonical: &[
        ("high", Priority::High),
        ("normal", Priority::Normal),
        ("low", Priority::Low),
    ],
    aliases: &[
        ("urgent", "high"),
        ("critical", "high"),
        ("asap", "high"),
        ("important", "high"),
        ("default", "normal"),
        ("medium", "normal"),
        ("regular", "normal"),
        ("minor", "low"),
        ("later", "low"),
        ("background", "low"),
    ],
});

/// Parse an entity name such as `product`, `list` or `recipes`.
///
/// # Errors
///
/// Returns the input and an optional suggestion when the name is unknown.
pub fn normalize_entity(input: &str) -> Result<EntityKind, Unrecognized> {
    ENTITIES.resolve(input)
}

/// Parse an operation name such as `create`, `edit` or `rm`.
///
/// # Errors
///
/// Returns the input and an optional suggestion when the name is unknown.
pub fn normalize_operation(input: &str) -> Result<ChangeKind, Unrecognized> {
    OPERATIONS.resolve(input)
}

/// Parse a priority such as `high`, `urgent` or `later`.
///
/// # Errors
///
/// Returns the input and an optional suggestion when the name is unknown.
pub fn normalize_priority(input: &str) -> Result<Priority, Unrecognized> {
    PRIORITIES.resolve(input)
}

/// Edit distance counting single-character inserts, deletes and swaps.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let target: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=target.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in target.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }

    row[target.len()]
}

/// Queued change ids within a few edits of `searched`, closest first.
#[must_use]
pub fn find_similar_ids(searched: &str, existing: &[String], max: usize) -> Vec<String> {
    let mut close: Vec<(usize, &String)> = existing
        .iter()
        .map(|id| (levenshtein_distance(searched, id), id))
        .filter(|(dist, _)| *dist <= MAX_SUGGESTION_DISTANCE)
        .collect();
    close.sort();
    close.into_iter().take(max).map(|(_, id)| id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_entity() {
        assert_eq!(normalize_entity("product"), Ok(EntityKind::Product));
        assert_eq!(normalize_entity("shoppingList"), Ok(EntityKind::ShoppingList));
        assert_eq!(normalize_entity("list"), Ok(EntityKind::ShoppingList));
        assert_eq!(normalize_entity("shopping"), Ok(EntityKind::ShoppingList));
        assert_eq!(normalize_entity("RECIPES"), Ok(EntityKind::Recipe));

        let (input, suggestion) = normalize_entity("prodcut").unwrap_err();
        assert_eq!(input, "prodcut");
        assert_eq!(suggestion.as_deref(), Some("product"));
    }

    #[test]
    fn test_normalize_operation() {
        assert_eq!(normalize_operation("create"), Ok(ChangeKind::Create));
        assert_eq!(normalize_operation("add"), Ok(ChangeKind::Create));
        assert_eq!(normalize_operation("new"), Ok(ChangeKind::Create));
        assert_eq!(normalize_operation("edit"), Ok(ChangeKind::Update));
        assert_eq!(normalize_operation("rm"), Ok(ChangeKind::Delete));
        assert_eq!(normalize_operation("remove"), Ok(ChangeKind::Delete));
        assert!(normalize_operation("explode").is_err());
    }

    #[test]
    fn test_normalize_priority() {
        assert_eq!(normalize_priority("high"), Ok(Priority::High));
        assert_eq!(normalize_priority("urgent"), Ok(Priority::High));
        assert_eq!(normalize_priority("Normal"), Ok(Priority::Normal));
        assert_eq!(normalize_priority("later"), Ok(Priority::Low));
        assert!(normalize_priority("whenever-ish").is_err());
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_find_similar_ids() {
        let ids = vec![
            "chg_a1b2c3d4e5f6".to_string(),
            "chg_a1b2c3d4e5f7".to_string(),
            "chg_ffffffffffff".to_string(),
        ];
        let result = find_similar_ids("chg_a1b2c3d4e5f0", &ids, 3);
        assert_eq!(result.len(), 2);
        assert!(result.contains(&"chg_a1b2c3d4e5f6".to_string()));
    }
}
