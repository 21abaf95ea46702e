use std::path::Path;

use tree_sitter::Node;

use crate::mutants::{BinaryOp, BoolOp, InferredType, Mutant, NodeKind, Replacement, UnaryOp};
use crate::parser::{self, Site, node_text, operands};

/// Result of applying one mutant to a module's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutatedSource {
    pub source: String,
    /// False when no node matched the mutant, in which case `source` is the
    /// input unchanged.
    pub applied: bool,
}

impl MutatedSource {
    fn unchanged(source: &str) -> Self {
        MutatedSource {
            source: source.to_string(),
            applied: false,
        }
    }
}

/// Re-parses `source`, finds the node at the mutant's (line, column, kind,
/// shape) and rewrites it. Lines after the mutation keep their numbers.
pub fn apply_mutation(source: &str, mutant: &Mutant) -> MutatedSource {
    let Ok(tree) = parser::parse_python(source, Path::new("<mutant>")) else {
        return MutatedSource::unchanged(source);
    };
    let point = &mutant.point;
    let Some(site) = parser::find_site(
        tree.root_node(),
        source,
        point.line,
        point.column,
        point.kind,
        point.shape,
    ) else {
        return MutatedSource::unchanged(source);
    };
    let Some(edits) = plan(&site, mutant, source) else {
        return MutatedSource::unchanged(source);
    };

    let mutated = splice(source, edits);
    if let Err(e) = parser::parse_python(&mutated, &point.file_path) {
        tracing::debug!(mutant = mutant.id, error = %e, "mutation produced invalid source, skipping");
        return MutatedSource::unchanged(source);
    }
    MutatedSource {
        source: mutated,
        applied: true,
    }
}

pub fn generate_diff(original: &str, mutated: &str) -> String {
    use similar::TextDiff;
    let diff = TextDiff::from_lines(original, mutated);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => {
                output.push_str(&format!("- {}", change));
            }
            similar::ChangeTag::Insert => {
                output.push_str(&format!("+ {}", change));
            }
            _ => {}
        }
    }
    output
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

impl Edit {
    fn replace(node: Node, text: impl Into<String>) -> Edit {
        Edit {
            start: node.start_byte(),
            end: node.end_byte(),
            text: text.into(),
        }
    }

    /// Like `replace`, but pads with newlines so the line count is unchanged.
    fn replace_keeping_lines(node: Node, text: impl Into<String>, source: &str) -> Edit {
        let mut text = text.into();
        let old_lines = node_text(node, source).matches('\n').count();
        let new_lines = text.matches('\n').count();
        for _ in new_lines..old_lines {
            text.push('\n');
        }
        Edit::replace(node, text)
    }

    fn insert(at: usize, text: &str) -> Edit {
        Edit {
            start: at,
            end: at,
            text: text.to_string(),
        }
    }
}

fn wrap(node: Node, edits: &mut Vec<Edit>) {
    edits.push(Edit::insert(node.start_byte(), "("));
    edits.push(Edit::insert(node.end_byte(), ")"));
}

fn parenthesized(text: &str, wrap: bool) -> String {
    if wrap { format!("({text})") } else { text.to_string() }
}

fn splice(source: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.start, e.end));
    let mut out = String::with_capacity(source.len() + 16);
    let mut cursor = 0;
    for edit in edits {
        if edit.start < cursor {
            continue;
        }
        out.push_str(&source[cursor..edit.start]);
        out.push_str(&edit.text);
        cursor = edit.end;
    }
    out.push_str(&source[cursor..]);
    out
}

fn plan(site: &Site, mutant: &Mutant, source: &str) -> Option<Vec<Edit>> {
    let node = site.node;
    let mut edits = Vec::new();
    match (site.kind, mutant.replacement) {
        (NodeKind::BinOp, Replacement::Binary(op)) => {
            let prec = binary_precedence(op);
            operator_chain(node, op.symbol(), prec, Slot::Binary(prec), &mut edits);
        }
        (NodeKind::AugAssign, Replacement::Binary(op)) => {
            let token = node.child_by_field_name("operator")?;
            edits.push(Edit::replace(token, format!("{}=", op.symbol())));
        }
        (NodeKind::Compare, Replacement::Compare(op)) => {
            for (token, _) in parser::compare_ops(node) {
                edits.push(Edit::replace(token, op.symbol()));
            }
        }
        (NodeKind::BoolOp, Replacement::Bool(op)) => {
            let prec = bool_precedence(op);
            operator_chain(node, op.symbol(), prec, Slot::Bool(prec), &mut edits);
        }
        (NodeKind::UnaryOp, Replacement::Unary(op @ (UnaryOp::UAdd | UnaryOp::USub)))
            if node.kind() == "unary_operator" =>
        {
            let token = node.child_by_field_name("operator")?;
            edits.push(Edit::replace(token, op.symbol()));
        }
        (NodeKind::UnaryOp, Replacement::RemoveNot) if node.kind() == "not_operator" => {
            let operand = node.child_by_field_name("argument")?;
            let wrap = parent_needs_parens(node, precedence(operand));
            let text = parenthesized(node_text(operand, source), wrap);
            edits.push(Edit::replace_keeping_lines(node, text, source));
        }
        (NodeKind::IfExp, r @ (Replacement::SwapBranches | Replacement::AlwaysTrue | Replacement::AlwaysFalse)) => {
            let parts = operands(node);
            let [body, _condition, orelse] = parts.as_slice() else {
                return None;
            };
            match r {
                Replacement::SwapBranches => {
                    // The body slot cannot hold another unparenthesized conditional.
                    let into_body = parenthesized(node_text(*orelse, source), precedence(*orelse) <= 1);
                    edits.push(Edit::replace(*body, into_body));
                    edits.push(Edit::replace(*orelse, node_text(*body, source)));
                }
                _ => {
                    let branch = if r == Replacement::AlwaysTrue { *body } else { *orelse };
                    let wrap = parent_needs_parens(node, precedence(branch));
                    let text = parenthesized(node_text(branch, source), wrap);
                    edits.push(Edit::replace_keeping_lines(node, text, source));
                }
            }
        }
        (NodeKind::Break, Replacement::Continue) => edits.push(Edit::replace(node, "continue")),
        (NodeKind::Continue, Replacement::Break) => edits.push(Edit::replace(node, "break")),
        (NodeKind::ExceptHandler, Replacement::Broaden) => {
            let filter = parser::handler_filter(node)?;
            edits.push(Edit::replace_keeping_lines(filter, "Exception", source));
        }
        (NodeKind::ExceptHandler, Replacement::RaiseBody) => {
            let body = parser::handler_body(node)?;
            edits.push(Edit::replace_keeping_lines(body, "raise", source));
        }
        (NodeKind::Return, r) => {
            let value = parser::return_value(node)?;
            edits.push(return_edit(value, r, mutant, source)?);
        }
        _ => return None,
    }
    Some(edits)
}

fn return_edit(value: Node, replacement: Replacement, mutant: &Mutant, source: &str) -> Option<Edit> {
    let text = node_text(value, source);
    let new_text = match replacement {
        Replacement::ReturnTrue => "True".to_string(),
        Replacement::ReturnFalse => "False".to_string(),
        Replacement::ReturnNone => "None".to_string(),
        Replacement::EmptyStr => "\"\"".to_string(),
        Replacement::ReturnValue => non_none_value(mutant.point.inferred_type.as_ref()).to_string(),
        Replacement::Negate => {
            if precedence(value) >= PREC_UNARY {
                format!("-{text}")
            } else {
                format!("-({text})")
            }
        }
        Replacement::NegateExpr => {
            if precedence(value) >= PREC_NOT {
                format!("not {text}")
            } else {
                format!("not ({text})")
            }
        }
        Replacement::RemoveNegation => {
            let negation = parser::unwrap_parens(value);
            if negation.kind() != "unary_operator" {
                return None;
            }
            let operator = negation.child_by_field_name("operator")?;
            if operator.kind() != "-" {
                return None;
            }
            let operand = negation.child_by_field_name("argument")?;
            return Some(Edit::replace_keeping_lines(negation, node_text(operand, source), source));
        }
        _ => return None,
    };
    Some(Edit::replace_keeping_lines(value, new_text, source))
}

/// A value distinct from `None`, matched to the declared type when known.
fn non_none_value(ty: Option<&InferredType>) -> &'static str {
    let inner = match ty {
        Some(InferredType::Optional(inner)) => Some(inner.as_ref()),
        other => other,
    };
    match inner {
        Some(InferredType::Int) => "0",
        Some(InferredType::Float) => "0.0",
        Some(InferredType::Str) => "\"\"",
        Some(InferredType::Bool) => "False",
        _ => "object()",
    }
}

/// Rewrites every operator token of a same-operator chain and parenthesizes
/// operands whose binding would otherwise change.
fn operator_chain(outer: Node, symbol: &str, prec: u8, slot: Slot, edits: &mut Vec<Edit>) {
    let links = parser::chain_links(outer);
    for link in &links {
        if let Some(token) = link.child_by_field_name("operator") {
            edits.push(Edit::replace(token, symbol));
        }
        if let Some(right) = link.child_by_field_name("right") {
            if slot.needs_parens(false, precedence(right)) {
                wrap(right, edits);
            }
        }
    }
    if let Some(innermost) = links.last() {
        if let Some(left) = innermost.child_by_field_name("left") {
            if slot.needs_parens(true, precedence(left)) {
                wrap(left, edits);
            }
        }
    }
    if parent_needs_parens(outer, prec) {
        wrap(outer, edits);
    }
}

const PREC_TERNARY: u8 = 1;
const PREC_NOT: u8 = 4;
const PREC_COMPARE: u8 = 5;
const PREC_UNARY: u8 = 12;
const PREC_POW: u8 = 13;
const PREC_AWAIT: u8 = 14;
const PREC_PRIMARY: u8 = 15;

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::BitOr => 6,
        BinaryOp::BitXor => 7,
        BinaryOp::BitAnd => 8,
        BinaryOp::LShift | BinaryOp::RShift => 9,
        BinaryOp::Add | BinaryOp::Sub => 10,
        BinaryOp::Mult | BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod => 11,
        BinaryOp::Pow => PREC_POW,
    }
}

fn bool_precedence(op: BoolOp) -> u8 {
    match op {
        BoolOp::Or => 2,
        BoolOp::And => 3,
    }
}

fn precedence(node: Node) -> u8 {
    match node.kind() {
        "lambda" | "named_expression" | "expression_list" | "yield" => 0,
        "conditional_expression" => PREC_TERNARY,
        "boolean_operator" => parser::bool_op(node).map_or(2, bool_precedence),
        "not_operator" => PREC_NOT,
        "comparison_operator" => PREC_COMPARE,
        "binary_operator" => match parser::binary_op(node) {
            Some(op) => binary_precedence(op),
            // `@` is the only operator without a mutation entry.
            None => 11,
        },
        "unary_operator" => PREC_UNARY,
        "await" => PREC_AWAIT,
        _ => PREC_PRIMARY,
    }
}

/// The syntactic slot an expression sits in.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Binary(u8),
    Bool(u8),
    Compare,
    Not,
    Unary,
    Ternary,
    Await,
    Other,
}

impl Slot {
    fn of_parent(parent: Node) -> Slot {
        match parent.kind() {
            "binary_operator" => Slot::Binary(precedence(parent)),
            "boolean_operator" => Slot::Bool(precedence(parent)),
            "comparison_operator" => Slot::Compare,
            "not_operator" => Slot::Not,
            "unary_operator" => Slot::Unary,
            "conditional_expression" => Slot::Ternary,
            "await" => Slot::Await,
            _ => Slot::Other,
        }
    }

    fn needs_parens(self, is_left: bool, child: u8) -> bool {
        match self {
            Slot::Binary(PREC_POW) if is_left => child < PREC_AWAIT,
            Slot::Binary(PREC_POW) => child < PREC_UNARY,
            Slot::Binary(p) | Slot::Bool(p) if is_left => child < p,
            Slot::Binary(p) | Slot::Bool(p) => child <= p,
            Slot::Compare => child <= PREC_COMPARE,
            Slot::Not => child < PREC_NOT,
            Slot::Unary => child < PREC_UNARY,
            Slot::Ternary => child <= PREC_TERNARY,
            Slot::Await => child < PREC_PRIMARY,
            Slot::Other => false,
        }
    }
}

fn parent_needs_parens(node: Node, new_prec: u8) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    let is_left = match parent.kind() {
        "binary_operator" | "boolean_operator" => parent.child_by_field_name("left") == Some(node),
        "comparison_operator" => false,
        _ => true,
    };
    Slot::of_parent(parent).needs_parens(is_left, new_prec)
}
