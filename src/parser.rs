use std::path::Path;

use tree_sitter::{Node, Parser, Tree};

use crate::error::ParseError;
use crate::mutants::{
    BinaryOp, BoolOp, CompareOp, HandlerShape, MutationPoint, NodeKind, ReturnShape, Shape,
    UnaryOp,
};

/// Scans `source` and returns every mutation point, in pre-order.
pub fn scan(
    source: &str,
    file_path: &Path,
    module_name: &str,
) -> Result<Vec<MutationPoint>, ParseError> {
    let tree = parse_python(source, file_path)?;
    let points = collect_sites(tree.root_node(), source)
        .into_iter()
        .map(|site| MutationPoint {
            file_path: file_path.to_path_buf(),
            module_name: module_name.to_string(),
            line: site.line,
            column: site.column,
            kind: site.kind,
            shape: site.shape,
            inferred_type: None,
        })
        .collect();
    Ok(points)
}

/// Parses Python source, treating any error or missing node as fatal.
pub fn parse_python(source: &str, path: &Path) -> Result<Tree, ParseError> {
    let fail = |line, column, message: String| ParseError {
        path: path.to_path_buf(),
        line,
        column,
        message,
    };

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| fail(0, 0, format!("failed to load Python grammar: {e}")))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| fail(0, 0, "parser produced no tree".to_string()))?;

    let root = tree.root_node();
    if root.has_error() {
        let bad = first_error(root).unwrap_or(root);
        let pos = bad.start_position();
        let message = if bad.is_missing() {
            format!("missing `{}`", bad.kind())
        } else {
            "invalid syntax".to_string()
        };
        return Err(fail(pos.row + 1, pos.column, message));
    }
    Ok(tree)
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let count = node.child_count();
    for i in 0..count {
        if let Some(child) = node.child(i) {
            if child.has_error() || child.is_missing() {
                if let Some(found) = first_error(child) {
                    return Some(found);
                }
            }
        }
    }
    None
}

/// A classified syntax node. Scanner, enricher and applier all walk the tree
/// through this one classifier so their notion of "the node at (line, column,
/// kind, shape)" can never drift apart.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Site<'t> {
    pub node: Node<'t>,
    pub kind: NodeKind,
    pub shape: Shape,
    pub line: usize,
    pub column: usize,
}

pub(crate) fn collect_sites<'t>(root: Node<'t>, source: &str) -> Vec<Site<'t>> {
    let mut sites = Vec::new();
    visit(root, source, &mut sites);
    sites
}

/// First site matching the given identity.
pub(crate) fn find_site<'t>(
    root: Node<'t>,
    source: &str,
    line: usize,
    column: usize,
    kind: NodeKind,
    shape: Shape,
) -> Option<Site<'t>> {
    collect_sites(root, source)
        .into_iter()
        .find(|s| s.line == line && s.column == column && s.kind == kind && s.shape == shape)
}

fn visit<'t>(node: Node<'t>, source: &str, sites: &mut Vec<Site<'t>>) {
    // Annotations are never executed as mutable code.
    if node.kind() == "type" {
        return;
    }

    classify(node, source, sites);

    let count = node.child_count();
    for i in 0..count {
        if let Some(child) = node.child(i) {
            visit(child, source, sites);
        }
    }
}

fn classify<'t>(node: Node<'t>, source: &str, sites: &mut Vec<Site<'t>>) {
    let mut push = |kind, shape| {
        let pos = node.start_position();
        sites.push(Site {
            node,
            kind,
            shape,
            line: pos.row + 1,
            column: pos.column,
        });
    };

    match node.kind() {
        "binary_operator" => {
            if let Some(op) = binary_op(node) {
                if !continues_chain(node) {
                    push(NodeKind::BinOp, Shape::Binary(op));
                }
            }
        }
        "augmented_assignment" => {
            if let Some(op) = augmented_op(node) {
                push(NodeKind::AugAssign, Shape::Binary(op));
            }
        }
        "comparison_operator" => {
            for (_, op) in compare_ops(node) {
                push(NodeKind::Compare, Shape::Compare(op));
            }
        }
        "boolean_operator" => {
            if let Some(op) = bool_op(node) {
                if !continues_chain(node) {
                    push(NodeKind::BoolOp, Shape::Bool(op));
                }
            }
        }
        "not_operator" => push(NodeKind::UnaryOp, Shape::Unary(UnaryOp::Not)),
        "unary_operator" => {
            if let Some(op) = unary_op(node) {
                push(NodeKind::UnaryOp, Shape::Unary(op));
            }
        }
        "conditional_expression" => push(NodeKind::IfExp, Shape::Ternary),
        "break_statement" => push(NodeKind::Break, Shape::Break),
        "continue_statement" => push(NodeKind::Continue, Shape::Continue),
        "except_clause" => {
            if let Some(shape) = classify_handler(node, source) {
                push(NodeKind::ExceptHandler, Shape::Handler(shape));
            }
        }
        "return_statement" => {
            if let Some(value) = return_value(node) {
                push(NodeKind::Return, Shape::Return(classify_return(value, source)));
            }
        }
        _ => {}
    }
}

pub(crate) fn node_text<'a>(node: Node<'a>, source: &'a str) -> &'a str {
    &source[node.start_byte()..node.end_byte()]
}

/// Named children, skipping comments.
pub(crate) fn operands<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut out = Vec::new();
    let count = node.named_child_count();
    for i in 0..count {
        if let Some(child) = node.named_child(i) {
            if child.kind() != "comment" {
                out.push(child);
            }
        }
    }
    out
}

pub(crate) fn binary_op(node: Node) -> Option<BinaryOp> {
    let op = node.child_by_field_name("operator")?;
    BinaryOp::from_symbol(op.kind())
}

fn augmented_op(node: Node) -> Option<BinaryOp> {
    let op = node.child_by_field_name("operator")?;
    BinaryOp::from_symbol(op.kind().strip_suffix('=')?)
}

pub(crate) fn bool_op(node: Node) -> Option<BoolOp> {
    let op = node.child_by_field_name("operator")?;
    match op.kind() {
        "and" => Some(BoolOp::And),
        "or" => Some(BoolOp::Or),
        _ => None,
    }
}

fn unary_op(node: Node) -> Option<UnaryOp> {
    let op = node.child_by_field_name("operator")?;
    match op.kind() {
        "-" => Some(UnaryOp::USub),
        "+" => Some(UnaryOp::UAdd),
        _ => None,
    }
}

/// Operator tokens of a comparison chain, left to right.
pub(crate) fn compare_ops(node: Node) -> Vec<(Node, CompareOp)> {
    let mut ops = Vec::new();
    let count = node.child_count();
    for i in 0..count {
        if let Some(child) = node.child(i) {
            if child.is_named() {
                continue;
            }
            if let Some(op) = CompareOp::from_symbol(child.kind()) {
                ops.push((child, op));
            }
        }
    }
    ops
}

fn same_operator(a: Node, b: Node) -> bool {
    match (a.kind(), b.kind()) {
        ("binary_operator", "binary_operator") => binary_op(a).is_some() && binary_op(a) == binary_op(b),
        ("boolean_operator", "boolean_operator") => bool_op(a).is_some() && bool_op(a) == bool_op(b),
        _ => false,
    }
}

/// True when `node` is the left operand of a parent applying the same
/// operator, i.e. an inner link of `a + b + c`.
fn continues_chain(node: Node) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    same_operator(node, parent) && parent.child_by_field_name("left") == Some(node)
}

/// The outermost node of a same-operator chain followed by its left-spine
/// links, outermost first.
pub(crate) fn chain_links(outer: Node) -> Vec<Node> {
    let mut links = vec![outer];
    let mut current = outer;
    while let Some(left) = current.child_by_field_name("left") {
        if !same_operator(left, current) {
            break;
        }
        links.push(left);
        current = left;
    }
    links
}

pub(crate) fn return_value(node: Node) -> Option<Node> {
    operands(node).into_iter().next()
}

pub(crate) fn unwrap_parens(mut node: Node) -> Node {
    while node.kind() == "parenthesized_expression" {
        match operands(node).into_iter().next() {
            Some(inner) => node = inner,
            None => break,
        }
    }
    node
}

pub(crate) fn handler_filter(node: Node) -> Option<Node> {
    let filter = operands(node).into_iter().find(|c| c.kind() != "block")?;
    if filter.kind() == "as_pattern" {
        return operands(filter).into_iter().next();
    }
    Some(filter)
}

pub(crate) fn handler_body(node: Node) -> Option<Node> {
    operands(node).into_iter().find(|c| c.kind() == "block")
}

fn is_bare_raise(block: Node) -> bool {
    let statements = operands(block);
    statements.len() == 1
        && statements[0].kind() == "raise_statement"
        && operands(statements[0]).is_empty()
}

fn classify_handler(node: Node, source: &str) -> Option<HandlerShape> {
    let raise_body = handler_body(node).is_some_and(is_bare_raise);
    match handler_filter(node) {
        Some(filter) => {
            let broadest = matches!(node_text(filter, source).trim(), "Exception" | "BaseException");
            match (broadest, raise_body) {
                (true, true) => None,
                (true, false) => Some(HandlerShape::TypedBroadest),
                (false, true) => Some(HandlerShape::TypedRaiseBody),
                (false, false) => Some(HandlerShape::Typed),
            }
        }
        // A bare handler is already maximally broad.
        None if raise_body => None,
        None => Some(HandlerShape::Bare),
    }
}

fn classify_return(value: Node, source: &str) -> ReturnShape {
    let value = unwrap_parens(value);
    let text = node_text(value, source);
    match value.kind() {
        "true" => ReturnShape::True,
        "false" => ReturnShape::False,
        "none" => ReturnShape::None,
        "integer" if is_imaginary(text) => ReturnShape::Expr,
        "integer" if is_zero_int(text) => ReturnShape::ZeroIntLiteral,
        "integer" => ReturnShape::IntLiteral,
        "float" if is_imaginary(text) => ReturnShape::Expr,
        "float" if is_zero_float(text) => ReturnShape::ZeroFloatLiteral,
        "float" => ReturnShape::FloatLiteral,
        "string" => classify_str(text),
        "concatenated_string" => {
            let parts: Vec<ReturnShape> =
                operands(value).into_iter().map(|part| classify_str(node_text(part, source))).collect();
            if parts.iter().any(|p| *p == ReturnShape::Expr) {
                ReturnShape::Expr
            } else if parts.iter().all(|p| *p == ReturnShape::EmptyStrLiteral) {
                ReturnShape::EmptyStrLiteral
            } else {
                ReturnShape::StrLiteral
            }
        }
        "unary_operator" if unary_op(value) == Some(UnaryOp::USub) => ReturnShape::Negation,
        _ => ReturnShape::Expr,
    }
}

fn is_imaginary(text: &str) -> bool {
    text.ends_with('j') || text.ends_with('J')
}

pub(crate) fn is_zero_int(text: &str) -> bool {
    let t = text.replace('_', "").to_ascii_lowercase();
    let digits = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0o"))
        .or_else(|| t.strip_prefix("0b"))
        .unwrap_or(t.as_str());
    !digits.is_empty() && digits.chars().all(|c| c == '0')
}

pub(crate) fn is_zero_float(text: &str) -> bool {
    let t = text.replace('_', "").to_ascii_lowercase();
    let mantissa = t.split('e').next().unwrap_or("");
    let mut digits = mantissa.chars().filter(|c| c.is_ascii_digit()).peekable();
    digits.peek().is_some() && digits.all(|c| c == '0')
}

/// Bytes and f-strings are not plain string constants.
fn classify_str(text: &str) -> ReturnShape {
    let quote_at = text.find(['"', '\'']).unwrap_or(0);
    let prefix = &text[..quote_at];
    if prefix.chars().any(|c| matches!(c, 'b' | 'B' | 'f' | 'F' | 't' | 'T')) {
        return ReturnShape::Expr;
    }
    let body = &text[quote_at..];
    let quote_len = if body.starts_with("\"\"\"") || body.starts_with("'''") { 3 } else { 1 };
    if body.len() <= quote_len * 2 {
        ReturnShape::EmptyStrLiteral
    } else {
        ReturnShape::StrLiteral
    }
}
