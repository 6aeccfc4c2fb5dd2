//! Typed readers for the directives the compiler understands, plus the
//! `{unique, filters}` grouping used at each AST node. `@filter` is the only
//! directive that may legally repeat on a node.
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_graphql_parser::types::Directive;
use async_graphql_parser::Positioned;
use async_graphql_value::Value;
use smallvec::SmallVec;

use crate::error::CompilationError;

pub(crate) const FILTER_DIRECTIVE: &str = "filter";
pub(crate) const TAG_DIRECTIVE: &str = "tag";
pub(crate) const OUTPUT_DIRECTIVE: &str = "output";
pub(crate) const OPTIONAL_DIRECTIVE: &str = "optional";
pub(crate) const FOLD_DIRECTIVE: &str = "fold";
pub(crate) const RECURSE_DIRECTIVE: &str = "recurse";
pub(crate) const OUTPUT_SOURCE_DIRECTIVE: &str = "output_source";

pub(crate) const MACRO_EDGE_DIRECTIVE: &str = "macro_edge";
pub(crate) const MACRO_EDGE_DEFINITION_DIRECTIVE: &str = "macro_edge_definition";
pub(crate) const MACRO_EDGE_TARGET_DIRECTIVE: &str = "macro_edge_target";

/// The directives that may appear in queries and that the compiler gives
/// semantics to. All of these must be declared in the schema.
pub(crate) const QUERY_DIRECTIVES: [&str; 7] = [
    FILTER_DIRECTIVE,
    TAG_DIRECTIVE,
    OUTPUT_DIRECTIVE,
    OPTIONAL_DIRECTIVE,
    FOLD_DIRECTIVE,
    RECURSE_DIRECTIVE,
    OUTPUT_SOURCE_DIRECTIVE,
];

/// Default GraphQL directives that must not appear in queries: supporting
/// them would let query shape vary at runtime.
pub(crate) const UNSUPPORTED_DEFAULT_DIRECTIVES: [&str; 2] = ["include", "skip"];

/// Directives on AST nodes, grouped by repeatability: every directive other
/// than `@filter` may appear at most once per node.
#[derive(Debug)]
pub(crate) struct UniqueDirectives<'q> {
    pub(crate) unique: BTreeMap<&'q str, &'q Positioned<Directive>>,
    pub(crate) filters: SmallVec<[&'q Positioned<Directive>; 1]>,
}

impl<'q> UniqueDirectives<'q> {
    pub(crate) fn gather(
        directives: &'q [Positioned<Directive>],
    ) -> Result<Self, CompilationError> {
        let mut unique: BTreeMap<&'q str, &'q Positioned<Directive>> = Default::default();
        let mut filters: SmallVec<[&'q Positioned<Directive>; 1]> = Default::default();

        for directive in directives {
            let name = directive.node.name.node.as_str();
            if name == FILTER_DIRECTIVE {
                filters.push(directive);
            } else if unique.insert(name, directive).is_some() {
                return Err(CompilationError::DuplicatedDirective(name.to_string()));
            }
        }

        Ok(Self { unique, filters })
    }

    pub(crate) fn get(&self, name: &str) -> Option<&'q Positioned<Directive>> {
        self.unique.get(name).copied()
    }
}

fn ensure_exact_arguments(
    directive: &Positioned<Directive>,
    directive_name: &str,
    allowed: &[&str],
) -> Result<(), CompilationError> {
    let mut seen: SmallVec<[&str; 2]> = Default::default();
    for (arg_name, _) in &directive.node.arguments {
        let arg = arg_name.node.as_str();
        if !allowed.contains(&arg) {
            return Err(CompilationError::UnrecognizedDirectiveArgument(
                directive_name.to_string(),
                arg.to_string(),
            ));
        }
        if seen.contains(&arg) {
            return Err(CompilationError::DuplicatedDirectiveArgument(
                directive_name.to_string(),
                arg.to_string(),
            ));
        }
        seen.push(arg);
    }
    Ok(())
}

fn get_required_string_argument(
    directive: &Positioned<Directive>,
    directive_name: &str,
    argument_name: &str,
) -> Result<Arc<str>, CompilationError> {
    let argument = directive.node.get_argument(argument_name).ok_or_else(|| {
        CompilationError::MissingRequiredDirectiveArgument(
            directive_name.to_string(),
            argument_name.to_string(),
        )
    })?;

    match &argument.node {
        Value::String(s) => Ok(s.as_str().into()),
        _ => Err(CompilationError::InappropriateTypeForDirectiveArgument(
            directive_name.to_string(),
            argument_name.to_string(),
        )),
    }
}

/// A parsed `@filter(op_name: "...", value: [...])` directive. The operand
/// strings keep their `$` / `%` prefixes; they are classified later by the
/// filter operator processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FilterDirective {
    pub(crate) op_name: Arc<str>,
    pub(crate) args: Vec<Arc<str>>,
}

impl TryFrom<&Positioned<Directive>> for FilterDirective {
    type Error = CompilationError;

    fn try_from(directive: &Positioned<Directive>) -> Result<Self, Self::Error> {
        ensure_exact_arguments(directive, FILTER_DIRECTIVE, &["op_name", "value"])?;
        let op_name = get_required_string_argument(directive, FILTER_DIRECTIVE, "op_name")?;

        let args = match directive.node.get_argument("value") {
            None => vec![],
            Some(value_argument) => match &value_argument.node {
                Value::List(list) => list
                    .iter()
                    .map(|value| match value {
                        Value::String(s) => Ok(Arc::from(s.as_str())),
                        _ => Err(CompilationError::InappropriateTypeForDirectiveArgument(
                            FILTER_DIRECTIVE.to_string(),
                            "value".to_string(),
                        )),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Value::String(s) => {
                    return Err(CompilationError::FilterExpectsListNotString(
                        op_name.to_string(),
                        s.clone(),
                    ))
                }
                _ => {
                    return Err(CompilationError::InappropriateTypeForDirectiveArgument(
                        FILTER_DIRECTIVE.to_string(),
                        "value".to_string(),
                    ))
                }
            },
        };

        Ok(Self { op_name, args })
    }
}

/// A parsed `@tag(tag_name: "...")` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TagDirective {
    pub(crate) name: Arc<str>,
}

impl TryFrom<&Positioned<Directive>> for TagDirective {
    type Error = CompilationError;

    fn try_from(directive: &Positioned<Directive>) -> Result<Self, Self::Error> {
        ensure_exact_arguments(directive, TAG_DIRECTIVE, &["tag_name"])?;
        let name = get_required_string_argument(directive, TAG_DIRECTIVE, "tag_name")?;
        Ok(Self { name })
    }
}

/// A parsed `@output(out_name: "...")` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutputDirective {
    pub(crate) name: Arc<str>,
}

impl TryFrom<&Positioned<Directive>> for OutputDirective {
    type Error = CompilationError;

    fn try_from(directive: &Positioned<Directive>) -> Result<Self, Self::Error> {
        ensure_exact_arguments(directive, OUTPUT_DIRECTIVE, &["out_name"])?;
        let name = get_required_string_argument(directive, OUTPUT_DIRECTIVE, "out_name")?;
        Ok(Self { name })
    }
}

/// A parsed `@recurse(depth: N)` directive. The depth must be at least 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecurseDirective {
    pub(crate) depth: NonZeroUsize,
}

impl TryFrom<&Positioned<Directive>> for RecurseDirective {
    type Error = CompilationError;

    fn try_from(directive: &Positioned<Directive>) -> Result<Self, Self::Error> {
        ensure_exact_arguments(directive, RECURSE_DIRECTIVE, &["depth"])?;

        let depth_argument = directive.node.get_argument("depth").ok_or_else(|| {
            CompilationError::MissingRequiredDirectiveArgument(
                RECURSE_DIRECTIVE.to_string(),
                "depth".to_string(),
            )
        })?;

        let depth = match &depth_argument.node {
            Value::Number(n) => n.as_u64().ok_or_else(|| {
                CompilationError::InappropriateTypeForDirectiveArgument(
                    RECURSE_DIRECTIVE.to_string(),
                    "depth".to_string(),
                )
            })?,
            _ => {
                return Err(CompilationError::InappropriateTypeForDirectiveArgument(
                    RECURSE_DIRECTIVE.to_string(),
                    "depth".to_string(),
                ))
            }
        };

        let depth = NonZeroUsize::new(depth as usize)
            .ok_or(CompilationError::RecurseDepthTooShallow(depth))?;

        Ok(Self { depth })
    }
}

macro_rules! argument_free_directive {
    ($DirectiveType: ident, $directive_name: expr) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub(crate) struct $DirectiveType;

        impl TryFrom<&Positioned<Directive>> for $DirectiveType {
            type Error = CompilationError;

            fn try_from(directive: &Positioned<Directive>) -> Result<Self, Self::Error> {
                ensure_exact_arguments(directive, $directive_name, &[])?;
                Ok(Self)
            }
        }
    };
}

argument_free_directive!(OptionalDirective, OPTIONAL_DIRECTIVE);
argument_free_directive!(FoldDirective, FOLD_DIRECTIVE);
argument_free_directive!(OutputSourceDirective, OUTPUT_SOURCE_DIRECTIVE);

#[cfg(test)]
mod tests {
    use async_graphql_parser::parse_query;
    use async_graphql_parser::types::{DocumentOperations, Selection};

    use super::*;

    fn directives_of(query: &str) -> Vec<Positioned<Directive>> {
        let doc = parse_query(query).unwrap();
        let op = match &doc.operations {
            DocumentOperations::Single(op) => op,
            DocumentOperations::Multiple(_) => unreachable!(),
        };
        let root = match &op.node.selection_set.node.items[0].node {
            Selection::Field(f) => f,
            _ => unreachable!(),
        };
        match &root.node.selection_set.node.items[0].node {
            Selection::Field(f) => f.node.directives.clone(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn filter_directive_parsing() {
        let directives =
            directives_of("{ Animal { name @filter(op_name: \">=\", value: [\"$lower\"]) } }");
        let parsed = FilterDirective::try_from(&directives[0]).unwrap();
        assert_eq!(parsed.op_name.as_ref(), ">=");
        assert_eq!(parsed.args, vec![Arc::from("$lower")]);
    }

    #[test]
    fn filter_value_must_be_a_list() {
        let directives =
            directives_of("{ Animal { name @filter(op_name: \"=\", value: \"$wanted\") } }");
        let err = FilterDirective::try_from(&directives[0]).unwrap_err();
        assert_eq!(
            err,
            CompilationError::FilterExpectsListNotString("=".into(), "$wanted".into())
        );
    }

    #[test]
    fn recurse_depth_zero_is_rejected() {
        let directives = directives_of("{ Animal { out_Animal_ParentOf @recurse(depth: 0) { name } } }");
        let err = RecurseDirective::try_from(&directives[0]).unwrap_err();
        assert_eq!(err, CompilationError::RecurseDepthTooShallow(0));
    }

    #[test]
    fn unique_directives_allow_repeated_filters_only() {
        let directives = directives_of(
            "{ Animal { name \
                @filter(op_name: \">=\", value: [\"$lower\"]) \
                @filter(op_name: \"<=\", value: [\"$upper\"]) \
                @output(out_name: \"name\") } }",
        );
        let grouped = UniqueDirectives::gather(&directives).unwrap();
        assert_eq!(grouped.filters.len(), 2);
        assert!(grouped.get(OUTPUT_DIRECTIVE).is_some());

        let directives = directives_of("{ Animal { name @optional @optional } }");
        let err = UniqueDirectives::gather(&directives).unwrap_err();
        assert_eq!(err, CompilationError::DuplicatedDirective("optional".into()));
    }

    #[test]
    fn argument_free_directives_reject_arguments() {
        let directives = directives_of("{ Animal { out_Animal_ParentOf @fold(x: 1) { name } } }");
        let err = FoldDirective::try_from(&directives[0]).unwrap_err();
        assert_eq!(
            err,
            CompilationError::UnrecognizedDirectiveArgument("fold".into(), "x".into())
        );
    }
}
