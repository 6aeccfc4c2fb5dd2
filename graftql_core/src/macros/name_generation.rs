use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Map each candidate name to a name that collides neither with the existing
/// names nor with any previously assigned name.
///
/// Names are kept unchanged when possible. A colliding name gets the suffix
/// `_macro_edge_<n>` with the smallest free `n`. Candidates are processed in
/// sorted order, so the assignment is deterministic.
pub(super) fn generate_disambiguations(
    existing_names: &BTreeSet<Arc<str>>,
    new_names: &BTreeSet<Arc<str>>,
) -> BTreeMap<Arc<str>, Arc<str>> {
    let mut name_mapping: BTreeMap<Arc<str>, Arc<str>> = Default::default();
    let mut assigned: BTreeSet<Arc<str>> = Default::default();

    for name in new_names {
        let mut disambiguation = name.clone();
        let mut index = 0usize;
        while existing_names.contains(&disambiguation) || assigned.contains(&disambiguation) {
            disambiguation = Arc::from(format!("{name}_macro_edge_{index}").as_str());
            index += 1;
        }
        assigned.insert(disambiguation.clone());
        name_mapping.insert(name.clone(), disambiguation);
    }

    name_mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_set(names: &[&str]) -> BTreeSet<Arc<str>> {
        names.iter().map(|name| Arc::from(*name)).collect()
    }

    #[test]
    fn unused_names_are_kept() {
        let result = generate_disambiguations(&name_set(&["a"]), &name_set(&["b", "c"]));
        assert_eq!(result[&Arc::from("b")], Arc::from("b"));
        assert_eq!(result[&Arc::from("c")], Arc::from("c"));
    }

    #[test]
    fn collisions_get_the_smallest_free_suffix() {
        let existing = name_set(&["tag", "tag_macro_edge_0"]);
        let result = generate_disambiguations(&existing, &name_set(&["tag"]));
        assert_eq!(result[&Arc::from("tag")], Arc::from("tag_macro_edge_1"));
    }

    #[test]
    fn assignment_is_deterministic() {
        let existing = name_set(&["x"]);
        let candidates = name_set(&["x", "y"]);
        let first = generate_disambiguations(&existing, &candidates);
        let second = generate_disambiguations(&existing, &candidates);
        assert_eq!(first, second);
        assert_eq!(first[&Arc::from("x")], Arc::from("x_macro_edge_0"));
    }
}
