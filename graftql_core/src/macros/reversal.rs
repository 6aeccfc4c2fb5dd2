use std::sync::Arc;

/// The name of the macro edge pointing the other way: `out_` and `in_`
/// prefixes toggle, the rest of the name is preserved.
pub(super) fn make_reverse_macro_edge_name(macro_edge_name: &str) -> Arc<str> {
    if let Some(raw_edge_name) = macro_edge_name.strip_prefix("in_") {
        Arc::from(format!("out_{raw_edge_name}").as_str())
    } else if let Some(raw_edge_name) = macro_edge_name.strip_prefix("out_") {
        Arc::from(format!("in_{raw_edge_name}").as_str())
    } else {
        unreachable!("macro edge name lacks a direction prefix: {macro_edge_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::make_reverse_macro_edge_name;

    #[test]
    fn prefixes_toggle() {
        assert_eq!("in_Animal_GrandparentOf", &*make_reverse_macro_edge_name("out_Animal_GrandparentOf"));
        assert_eq!("out_Animal_GrandparentOf", &*make_reverse_macro_edge_name("in_Animal_GrandparentOf"));
    }
}
