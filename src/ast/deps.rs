//! Static dependency extraction from expression trees
//!
//! Walks an expression and collects the `formValue` member chains it reads,
//! so logic bindings can subscribe to exactly the paths they depend on.

use super::ExpressionNode;
use rustc_hash::FxHashSet;

/// Collect the form paths an expression statically reads.
///
/// Returns `None` when the expression reads the form dynamically (whole-form
/// access, computed indexing, or a bare `formValue` reference), in which case
/// the caller must treat every change as a dependency.
pub fn collect_form_dependencies(expr: &ExpressionNode) -> Option<FxHashSet<String>> {
    let mut collector = DependencyCollector {
        paths: FxHashSet::default(),
        dynamic: false,
    };
    collector.walk(expr, false);
    if collector.dynamic {
        None
    } else {
        Some(collector.paths)
    }
}

struct DependencyCollector {
    paths: FxHashSet<String>,
    dynamic: bool,
}

impl DependencyCollector {
    /// `in_chain` is true while the parent node already consumed this node as
    /// the base of a member chain.
    fn walk(&mut self, expr: &ExpressionNode, in_chain: bool) {
        match expr {
            ExpressionNode::Identifier(name) => {
                if name == "formValue" && !in_chain {
                    // Whole-form read, cannot narrow the dependency set
                    self.dynamic = true;
                }
            }
            ExpressionNode::Member { .. } => {
                if let Some(path) = member_chain_path(expr) {
                    self.paths.insert(path);
                } else {
                    // Chain not rooted at formValue: fieldValue/fieldPath
                    // reads resolve through the binding's own field
                    self.walk_member_base(expr);
                }
            }
            ExpressionNode::Index { base, index } => {
                if let Some(path) = member_chain_path(expr) {
                    self.paths.insert(path);
                } else {
                    self.walk(base, false);
                    self.walk(index, false);
                }
            }
            ExpressionNode::MethodCall { base, args, .. } => {
                // The base chain is a read even though the call result isn't a path
                if let Some(path) = member_chain_path(base) {
                    self.paths.insert(path);
                } else {
                    self.walk(base, false);
                }
                for arg in args {
                    self.walk(arg, false);
                }
            }
            ExpressionNode::BinaryOp { left, right, .. } => {
                self.walk(left, false);
                self.walk(right, false);
            }
            ExpressionNode::UnaryOp { operand, .. } => self.walk(operand, false),
            ExpressionNode::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                self.walk(condition, false);
                self.walk(then_expr, false);
                self.walk(else_expr, false);
            }
            ExpressionNode::Literal(_) => {}
        }
    }

    fn walk_member_base(&mut self, expr: &ExpressionNode) {
        if let ExpressionNode::Member { base, .. } = expr {
            self.walk(base, true);
        }
    }
}

/// Render a member/index chain rooted at `formValue` as a dot path.
/// Returns `None` for chains rooted elsewhere or with computed indices.
fn member_chain_path(expr: &ExpressionNode) -> Option<String> {
    let mut segments = Vec::new();
    let mut current = expr;
    loop {
        match current {
            ExpressionNode::Member { base, property } => {
                segments.push(property.clone());
                current = base;
            }
            ExpressionNode::Index { base, index } => {
                match index.as_ref() {
                    ExpressionNode::Literal(super::LiteralValue::Number(n))
                        if n.fract() == 0.0 && *n >= 0.0 =>
                    {
                        segments.push(format!("{}", *n as u64));
                    }
                    ExpressionNode::Literal(super::LiteralValue::String(s)) => {
                        segments.push(s.clone());
                    }
                    _ => return None,
                }
                current = base;
            }
            ExpressionNode::Identifier(name) if name == "formValue" => {
                segments.reverse();
                return Some(segments.join("."));
            }
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    fn deps(src: &str) -> Option<Vec<String>> {
        let expr = parse_expression(src).unwrap();
        collect_form_dependencies(&expr).map(|set| {
            let mut v: Vec<String> = set.into_iter().collect();
            v.sort();
            v
        })
    }

    #[test]
    fn member_chains_become_paths() {
        assert_eq!(
            deps("formValue.price * formValue.quantity"),
            Some(vec!["price".to_string(), "quantity".to_string()])
        );
        assert_eq!(
            deps("formValue.user.address.city == 'Berlin'"),
            Some(vec!["user.address.city".to_string()])
        );
    }

    #[test]
    fn literal_indices_are_static() {
        assert_eq!(
            deps("formValue.items[0].name"),
            Some(vec!["items.0.name".to_string()])
        );
    }

    #[test]
    fn dynamic_reads_widen_to_everything() {
        assert_eq!(deps("formValue"), None);
        assert_eq!(deps("formValue.length == 0 || formValue"), None);
    }

    #[test]
    fn computed_indices_fall_back_to_the_container() {
        assert_eq!(
            deps("formValue.items[formValue.index]"),
            Some(vec!["index".to_string(), "items".to_string()])
        );
    }

    #[test]
    fn field_value_reads_do_not_add_form_paths() {
        assert_eq!(deps("fieldValue > 3 && fieldValue < 10"), Some(vec![]));
        assert_eq!(deps("fieldValue.length >= 2"), Some(vec![]));
    }

    #[test]
    fn method_bases_count_as_reads() {
        assert_eq!(
            deps("formValue.tags.includes('beta')"),
            Some(vec!["tags".to_string()])
        );
    }
}
