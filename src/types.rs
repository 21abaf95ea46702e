//! Shallow, annotation-driven type inference.
//!
//! Only function signatures and literal operands are consulted. A wrong or
//! missing inference just means the operator registry falls back to its
//! untyped table.

use std::collections::HashMap;
use std::path::Path;

use tree_sitter::Node;

use crate::mutants::{InferredType, MutationPoint, NodeKind};
use crate::parser::{self, node_text, operands};

/// Signature metadata for one `def` / `async def`.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncInfo {
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub param_types: HashMap<String, InferredType>,
    pub return_type: Option<InferredType>,
}

impl FuncInfo {
    fn encloses(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// Collects every function definition at any nesting depth.
pub fn collect_functions(source: &str) -> Vec<FuncInfo> {
    let Ok(tree) = parser::parse_python(source, Path::new("<enricher>")) else {
        return Vec::new();
    };
    functions_in(tree.root_node(), source)
}

fn functions_in(root: Node, source: &str) -> Vec<FuncInfo> {
    let mut funcs = Vec::new();
    walk_functions(root, source, &mut funcs);
    funcs
}

fn walk_functions(node: Node, source: &str, funcs: &mut Vec<FuncInfo>) {
    if node.kind() == "function_definition" {
        funcs.push(func_info(node, source));
    }
    let count = node.child_count();
    for i in 0..count {
        if let Some(child) = node.child(i) {
            walk_functions(child, source, funcs);
        }
    }
}

fn func_info(node: Node, source: &str) -> FuncInfo {
    let start_line = node.start_position().row + 1;
    let mut end_line = node.end_position().row + 1;
    if end_line < start_line {
        end_line = start_line + 100;
    }

    let mut param_types = HashMap::new();
    if let Some(params) = node.child_by_field_name("parameters") {
        for param in operands(params) {
            if let Some((name, ty)) = typed_param(param, source) {
                param_types.insert(name, ty);
            }
        }
    }

    FuncInfo {
        name: node
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string())
            .unwrap_or_default(),
        start_line,
        end_line,
        param_types,
        return_type: node
            .child_by_field_name("return_type")
            .map(|t| InferredType::from_annotation(node_text(t, source))),
    }
}

fn typed_param(param: Node, source: &str) -> Option<(String, InferredType)> {
    let name = match param.kind() {
        "typed_parameter" => operands(param).into_iter().next()?,
        "typed_default_parameter" => param.child_by_field_name("name")?,
        _ => return None,
    };
    // `*args: int` annotates the elements, not `args` itself.
    if name.kind() != "identifier" {
        return None;
    }
    let ty = param.child_by_field_name("type")?;
    Some((
        node_text(name, source).to_string(),
        InferredType::from_annotation(node_text(ty, source)),
    ))
}

/// Returns `points` with `inferred_type` filled in where a type can be read
/// off the enclosing function's signature or the operands themselves.
pub fn enrich(source: &str, points: Vec<MutationPoint>) -> Vec<MutationPoint> {
    if points.is_empty() {
        return points;
    }
    let Ok(tree) = parser::parse_python(source, Path::new("<enricher>")) else {
        return points;
    };
    let root = tree.root_node();
    let funcs = functions_in(root, source);

    points
        .into_iter()
        .map(|point| {
            let Some(func) = innermost_enclosing(&funcs, point.line) else {
                return point;
            };
            let inferred = match point.kind {
                NodeKind::Return => func.return_type.clone(),
                NodeKind::BoolOp => Some(InferredType::Bool),
                NodeKind::BinOp | NodeKind::Compare | NodeKind::UnaryOp => {
                    parser::find_site(root, source, point.line, point.column, point.kind, point.shape)
                        .and_then(|site| infer_site(site.node, point.kind, &func.param_types, source))
                }
                _ => None,
            };
            match inferred {
                Some(ty) => MutationPoint {
                    inferred_type: Some(ty),
                    ..point
                },
                None => point,
            }
        })
        .collect()
}

/// Nested functions shadow their parents.
fn innermost_enclosing(funcs: &[FuncInfo], line: usize) -> Option<&FuncInfo> {
    funcs
        .iter()
        .filter(|f| f.encloses(line))
        .min_by_key(|f| f.end_line - f.start_line)
}

fn infer_site(
    node: Node,
    kind: NodeKind,
    params: &HashMap<String, InferredType>,
    source: &str,
) -> Option<InferredType> {
    match kind {
        NodeKind::BinOp => {
            let left = node.child_by_field_name("left");
            let right = node.child_by_field_name("right");
            left.and_then(|n| infer_operand(n, params, source))
                .or_else(|| right.and_then(|n| infer_operand(n, params, source)))
        }
        NodeKind::Compare => {
            let mut sides = operands(node).into_iter();
            let left = sides.next()?;
            infer_operand(left, params, source)
                .or_else(|| sides.find_map(|n| infer_operand(n, params, source)))
        }
        NodeKind::UnaryOp => {
            let operand = node.child_by_field_name("argument")?;
            infer_operand(operand, params, source)
        }
        _ => None,
    }
}

fn infer_operand(
    node: Node,
    params: &HashMap<String, InferredType>,
    source: &str,
) -> Option<InferredType> {
    let text = node_text(node, source);
    match node.kind() {
        "identifier" => params.get(text).cloned(),
        "true" | "false" => Some(InferredType::Bool),
        "integer" if !text.ends_with(['j', 'J']) => Some(InferredType::Int),
        "float" if !text.ends_with(['j', 'J']) => Some(InferredType::Float),
        "string" | "concatenated_string" => {
            let quote_at = text.find(['"', '\'']).unwrap_or(0);
            if text[..quote_at].contains(['b', 'B']) {
                None
            } else {
                Some(InferredType::Str)
            }
        }
        "call" => {
            let function = node.child_by_field_name("function")?;
            (node_text(function, source) == "len").then_some(InferredType::Int)
        }
        "parenthesized_expression" => {
            let inner = operands(node).into_iter().next()?;
            infer_operand(inner, params, source)
        }
        _ => None,
    }
}
