use std::path::Path;

use leela::mutants::{
    BinaryOp, BoolOp, CompareOp, HandlerShape, MutationPoint, NodeKind, ReturnShape, Shape,
    UnaryOp,
};
use leela::parser;

fn scan(source: &str) -> Vec<MutationPoint> {
    parser::scan(source, Path::new("/proj/app.py"), "app").unwrap()
}

fn sites(source: &str) -> Vec<(usize, usize, NodeKind, Shape)> {
    scan(source)
        .into_iter()
        .map(|p| (p.line, p.column, p.kind, p.shape))
        .collect()
}

fn shapes_of(source: &str, kind: NodeKind) -> Vec<Shape> {
    scan(source)
        .into_iter()
        .filter(|p| p.kind == kind)
        .map(|p| p.shape)
        .collect()
}

#[test]
fn comparison_and_returns_in_source_order() {
    let source = "def check(x):\n    if x > 0:\n        return True\n    return False\n";
    assert_eq!(
        sites(source),
        vec![
            (2, 7, NodeKind::Compare, Shape::Compare(CompareOp::Gt)),
            (3, 8, NodeKind::Return, Shape::Return(ReturnShape::True)),
            (4, 4, NodeKind::Return, Shape::Return(ReturnShape::False)),
        ]
    );
}

#[test]
fn points_carry_file_and_module() {
    let points = scan("x = a or b\n");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].file_path, Path::new("/proj/app.py"));
    assert_eq!(points[0].module_name, "app");
    assert_eq!(points[0].inferred_type, None);
    assert_eq!(points[0].shape, Shape::Bool(BoolOp::Or));
    assert_eq!((points[0].line, points[0].column), (1, 4));
}

#[test]
fn comparison_chain_yields_one_point_per_operator() {
    let points = sites("ok = 0 <= i < n\n");
    assert_eq!(
        points,
        vec![
            (1, 5, NodeKind::Compare, Shape::Compare(CompareOp::LtE)),
            (1, 5, NodeKind::Compare, Shape::Compare(CompareOp::Lt)),
        ]
    );
}

#[test]
fn multi_word_comparisons() {
    let shapes = shapes_of("a = x is not None\nb = k not in d\nc = k in d\n", NodeKind::Compare);
    assert_eq!(
        shapes,
        vec![
            Shape::Compare(CompareOp::IsNot),
            Shape::Compare(CompareOp::NotIn),
            Shape::Compare(CompareOp::In),
        ]
    );
}

#[test]
fn same_operator_chain_is_one_point() {
    let points = sites("total = a + b + c\n");
    assert_eq!(points, vec![(1, 8, NodeKind::BinOp, Shape::Binary(BinaryOp::Add))]);

    let bools = shapes_of("ok = a and b and c\n", NodeKind::BoolOp);
    assert_eq!(bools, vec![Shape::Bool(BoolOp::And)]);
}

#[test]
fn mixed_operators_are_separate_points() {
    let shapes = shapes_of("y = a + b - c\n", NodeKind::BinOp);
    assert_eq!(shapes, vec![Shape::Binary(BinaryOp::Sub), Shape::Binary(BinaryOp::Add)]);

    // The right operand of a same-operator parent is its own chain.
    let shapes = shapes_of("y = a - (b - c)\n", NodeKind::BinOp);
    assert_eq!(shapes.len(), 2);
}

#[test]
fn every_binary_operator_is_recognized() {
    let source = "r = [a + b, a - b, a * b, a / b, a // b, a % b, a ** b, a & b, a | b, a ^ b, a << b, a >> b]\n";
    let shapes = shapes_of(source, NodeKind::BinOp);
    let expected: Vec<Shape> = BinaryOp::ALL.into_iter().map(Shape::Binary).collect();
    assert_eq!(shapes, expected);
}

#[test]
fn augmented_assignment() {
    assert_eq!(
        sites("def f(x):\n    x += 1\n    x //= 2\n"),
        vec![
            (2, 4, NodeKind::AugAssign, Shape::Binary(BinaryOp::Add)),
            (3, 4, NodeKind::AugAssign, Shape::Binary(BinaryOp::FloorDiv)),
        ]
    );
}

#[test]
fn unary_operators() {
    let shapes = shapes_of("a = -x\nb = +x\nc = not x\nd = ~x\n", NodeKind::UnaryOp);
    assert_eq!(
        shapes,
        vec![
            Shape::Unary(UnaryOp::USub),
            Shape::Unary(UnaryOp::UAdd),
            Shape::Unary(UnaryOp::Not),
        ]
    );
}

#[test]
fn ternary_and_loop_control() {
    let source = "for x in xs:\n    if x:\n        break\n    else:\n        continue\ny = a if c else b\n";
    assert_eq!(
        sites(source),
        vec![
            (3, 8, NodeKind::Break, Shape::Break),
            (5, 8, NodeKind::Continue, Shape::Continue),
            (6, 4, NodeKind::IfExp, Shape::Ternary),
        ]
    );
}

#[test]
fn handler_shapes() {
    let source = "\
try:
    f()
except ValueError:
    pass
try:
    f()
except Exception:
    log()
try:
    f()
except (KeyError, IndexError) as e:
    raise
try:
    f()
except Exception:
    raise
try:
    f()
except:
    cleanup()
try:
    f()
except:
    raise
";
    let handlers: Vec<(usize, Shape)> = scan(source)
        .into_iter()
        .filter(|p| p.kind == NodeKind::ExceptHandler)
        .map(|p| (p.line, p.shape))
        .collect();
    assert_eq!(
        handlers,
        vec![
            (3, Shape::Handler(HandlerShape::Typed)),
            (7, Shape::Handler(HandlerShape::TypedBroadest)),
            (11, Shape::Handler(HandlerShape::TypedRaiseBody)),
            (19, Shape::Handler(HandlerShape::Bare)),
        ]
    );
}

#[test]
fn base_exception_counts_as_broadest() {
    let source = "try:\n    f()\nexcept BaseException as e:\n    log(e)\n";
    assert_eq!(
        shapes_of(source, NodeKind::ExceptHandler),
        vec![Shape::Handler(HandlerShape::TypedBroadest)]
    );
}

#[test]
fn return_shapes() {
    let source = "\
def f(x):
    return 0
    return 7
    return 0.0
    return 2.5
    return ''
    return 'hi'
    return -x
    return None
    return g(x)
    return 2j
    return (True)
    return
";
    let shapes = shapes_of(source, NodeKind::Return);
    assert_eq!(
        shapes,
        vec![
            Shape::Return(ReturnShape::ZeroIntLiteral),
            Shape::Return(ReturnShape::IntLiteral),
            Shape::Return(ReturnShape::ZeroFloatLiteral),
            Shape::Return(ReturnShape::FloatLiteral),
            Shape::Return(ReturnShape::EmptyStrLiteral),
            Shape::Return(ReturnShape::StrLiteral),
            Shape::Return(ReturnShape::Negation),
            Shape::Return(ReturnShape::None),
            Shape::Return(ReturnShape::Expr),
            Shape::Return(ReturnShape::Expr),
            Shape::Return(ReturnShape::True),
        ]
    );
}

#[test]
fn annotations_are_not_mutated() {
    let source = "def f(x: int | None, y: 'a' = 1 + 1) -> int | None:\n    z: int | None = x\n    return z\n";
    let kinds: Vec<NodeKind> = scan(source).into_iter().map(|p| p.kind).collect();
    // Only the default value and the return remain.
    assert_eq!(kinds, vec![NodeKind::BinOp, NodeKind::Return]);
}

#[test]
fn nested_and_async_functions_are_scanned() {
    let source = "async def outer(a):\n    def inner(b):\n        return b - 1\n    return await inner(a)\n";
    let shapes = shapes_of(source, NodeKind::BinOp);
    assert_eq!(shapes, vec![Shape::Binary(BinaryOp::Sub)]);
    assert_eq!(shapes_of(source, NodeKind::Return).len(), 2);
}

#[test]
fn scanning_is_deterministic() {
    let source = "def f(a, b):\n    if a and not b:\n        return a * 2 if b else -a\n    return None\n";
    assert_eq!(scan(source), scan(source));
}

#[test]
fn syntax_error_is_reported_with_location() {
    let err = parser::scan("def ok():\n    return 1\n\ndef broken(:\n    pass\n", Path::new("/proj/bad.py"), "bad")
        .unwrap_err();
    assert_eq!(err.path, Path::new("/proj/bad.py"));
    assert_eq!(err.line, 4);
    assert!(err.to_string().starts_with("/proj/bad.py:4:"));
}

#[test]
fn empty_source_has_no_points() {
    assert!(scan("").is_empty());
    assert!(scan("# nothing here\nimport os\n").is_empty());
}
