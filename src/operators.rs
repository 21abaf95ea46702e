/// Mutation operator tables for Python.
/// Maps (node kind, original shape, optional inferred type) to the
/// replacements worth trying there.
use crate::mutants::{
    BinaryOp, BoolOp, CompareOp, HandlerShape, InferredType, MutationPoint, NodeKind,
    Replacement, ReturnShape, Shape, UnaryOp,
};

use BinaryOp::*;
use Replacement as R;

const NONE: &[Replacement] = &[];

/// Replacements for `point`. With `use_types`, a typed entry wins even when
/// it is empty; an unknown type falls through to the untyped table.
pub fn mutations_for(point: &MutationPoint, use_types: bool) -> &'static [Replacement] {
    if use_types {
        if let Some(ty) = &point.inferred_type {
            if let Some(typed) = typed_mutations(point.kind, point.shape, ty) {
                return typed;
            }
        }
    }
    untyped_mutations(point.kind, point.shape)
}

/// Sum of `len(untyped) - len(chosen)` over all points. Negative when typing
/// widened the candidate set.
pub fn count_pruned(points: &[MutationPoint], use_types: bool) -> i64 {
    points
        .iter()
        .map(|p| {
            let untyped = untyped_mutations(p.kind, p.shape).len() as i64;
            let chosen = mutations_for(p, use_types).len() as i64;
            untyped - chosen
        })
        .sum()
}

pub fn untyped_mutations(kind: NodeKind, shape: Shape) -> &'static [Replacement] {
    match (kind, shape) {
        (NodeKind::BinOp | NodeKind::AugAssign, Shape::Binary(op)) => untyped_binary(op),
        (NodeKind::Compare, Shape::Compare(op)) => compare_mutations(op),
        (NodeKind::BoolOp, Shape::Bool(BoolOp::And)) => &[R::Bool(BoolOp::Or)],
        (NodeKind::BoolOp, Shape::Bool(BoolOp::Or)) => &[R::Bool(BoolOp::And)],
        (NodeKind::UnaryOp, Shape::Unary(UnaryOp::USub)) => &[R::Unary(UnaryOp::UAdd)],
        (NodeKind::UnaryOp, Shape::Unary(UnaryOp::UAdd)) => &[R::Unary(UnaryOp::USub)],
        (NodeKind::UnaryOp, Shape::Unary(UnaryOp::Not)) => &[R::RemoveNot],
        (NodeKind::IfExp, Shape::Ternary) => &[R::SwapBranches, R::AlwaysTrue, R::AlwaysFalse],
        (NodeKind::Break, Shape::Break) => &[R::Continue],
        (NodeKind::Continue, Shape::Continue) => &[R::Break],
        (NodeKind::ExceptHandler, Shape::Handler(h)) => handler_mutations(h),
        (NodeKind::Return, Shape::Return(r)) => untyped_return(r),
        _ => NONE,
    }
}

fn untyped_binary(op: BinaryOp) -> &'static [Replacement] {
    match op {
        Add => &[R::Binary(Sub), R::Binary(Mult)],
        Sub => &[R::Binary(Add), R::Binary(Mult)],
        Mult => &[R::Binary(Add), R::Binary(FloorDiv)],
        Div => &[R::Binary(Mult), R::Binary(FloorDiv)],
        FloorDiv => &[R::Binary(Div), R::Binary(Mult)],
        Mod => &[R::Binary(FloorDiv), R::Binary(Mult)],
        Pow => &[R::Binary(Mult)],
        BitAnd => &[R::Binary(BitOr), R::Binary(BitXor)],
        BitOr => &[R::Binary(BitAnd), R::Binary(BitXor)],
        BitXor => &[R::Binary(BitAnd), R::Binary(BitOr)],
        LShift => &[R::Binary(RShift)],
        RShift => &[R::Binary(LShift)],
    }
}

/// Boundary flips first, then the negated relation.
fn compare_mutations(op: CompareOp) -> &'static [Replacement] {
    use CompareOp as C;
    match op {
        C::Eq => &[R::Compare(C::NotEq)],
        C::NotEq => &[R::Compare(C::Eq)],
        C::Lt => &[R::Compare(C::LtE), R::Compare(C::GtE)],
        C::LtE => &[R::Compare(C::Lt), R::Compare(C::Gt)],
        C::Gt => &[R::Compare(C::GtE), R::Compare(C::LtE)],
        C::GtE => &[R::Compare(C::Gt), R::Compare(C::Lt)],
        C::Is => &[R::Compare(C::IsNot)],
        C::IsNot => &[R::Compare(C::Is)],
        C::In => &[R::Compare(C::NotIn)],
        C::NotIn => &[R::Compare(C::In)],
    }
}

fn handler_mutations(shape: HandlerShape) -> &'static [Replacement] {
    match shape {
        HandlerShape::Typed => &[R::Broaden, R::RaiseBody],
        HandlerShape::TypedBroadest => &[R::RaiseBody],
        HandlerShape::TypedRaiseBody => &[R::Broaden],
        HandlerShape::Bare => &[R::RaiseBody],
    }
}

/// Negating zero yields an equal value, so zero literals get nothing.
fn untyped_return(shape: ReturnShape) -> &'static [Replacement] {
    match shape {
        ReturnShape::True => &[R::ReturnFalse],
        ReturnShape::False => &[R::ReturnTrue],
        ReturnShape::None => &[R::ReturnValue],
        ReturnShape::Expr => &[R::ReturnNone],
        ReturnShape::IntLiteral | ReturnShape::FloatLiteral => &[R::Negate],
        ReturnShape::StrLiteral => &[R::EmptyStr],
        ReturnShape::Negation => &[R::RemoveNegation],
        ReturnShape::ZeroIntLiteral | ReturnShape::ZeroFloatLiteral | ReturnShape::EmptyStrLiteral => {
            NONE
        }
    }
}

/// `None` means "no typed opinion", which is different from `Some(&[])`.
pub fn typed_mutations(
    kind: NodeKind,
    shape: Shape,
    ty: &InferredType,
) -> Option<&'static [Replacement]> {
    match (kind, shape) {
        (NodeKind::BinOp, Shape::Binary(op)) => typed_binary(op, ty),
        (NodeKind::Compare, Shape::Compare(op)) => typed_compare(op, ty),
        (NodeKind::BoolOp, Shape::Bool(op)) if *ty == InferredType::Bool => Some(match op {
            BoolOp::And => &[R::Bool(BoolOp::Or)],
            BoolOp::Or => &[R::Bool(BoolOp::And)],
        }),
        (NodeKind::UnaryOp, Shape::Unary(op)) => typed_unary(op, ty),
        (NodeKind::Return, Shape::Return(r)) => typed_return(r, ty),
        _ => None,
    }
}

fn typed_binary(op: BinaryOp, ty: &InferredType) -> Option<&'static [Replacement]> {
    let list: &'static [Replacement] = match (ty, op) {
        (InferredType::Int, Add) => &[R::Binary(Sub), R::Binary(Mult), R::Binary(FloorDiv)],
        (InferredType::Int, Sub) => &[R::Binary(Add), R::Binary(Mult)],
        (InferredType::Int, Mult) => &[R::Binary(Add), R::Binary(FloorDiv)],
        (InferredType::Int, Div) => &[R::Binary(Mult), R::Binary(FloorDiv)],
        (InferredType::Int, FloorDiv) => &[R::Binary(Mult), R::Binary(Add)],
        (InferredType::Int, Mod) => &[R::Binary(FloorDiv)],
        (InferredType::Int, Pow) => &[R::Binary(Mult)],
        (InferredType::Int, BitAnd | BitOr | BitXor | LShift | RShift) => untyped_binary(op),

        (InferredType::Float, Add) => &[R::Binary(Sub), R::Binary(Mult), R::Binary(Div)],
        (InferredType::Float, Sub) => &[R::Binary(Add), R::Binary(Mult)],
        (InferredType::Float, Mult) => &[R::Binary(Add), R::Binary(Div)],
        (InferredType::Float, Div) => &[R::Binary(Mult), R::Binary(Sub)],
        (InferredType::Float, Pow) => &[R::Binary(Mult)],

        // Concatenation and repetition have no sensible sibling operator.
        (InferredType::Str, Add | Mult) => NONE,

        (InferredType::Bool, BitAnd) => &[R::Binary(BitOr)],
        (InferredType::Bool, BitOr) => &[R::Binary(BitAnd)],
        (InferredType::Bool, BitXor) => &[R::Binary(BitAnd), R::Binary(BitOr)],

        _ => return None,
    };
    Some(list)
}

fn typed_compare(op: CompareOp, ty: &InferredType) -> Option<&'static [Replacement]> {
    use CompareOp as C;
    match (ty, op) {
        (
            InferredType::Int | InferredType::Float,
            C::Lt | C::LtE | C::Gt | C::GtE | C::Eq | C::NotEq,
        ) => Some(compare_mutations(op)),
        (InferredType::Str, C::In | C::NotIn) => Some(compare_mutations(op)),
        _ => None,
    }
}

fn typed_unary(op: UnaryOp, ty: &InferredType) -> Option<&'static [Replacement]> {
    match (ty, op) {
        (InferredType::Int | InferredType::Float, UnaryOp::USub) => Some(&[R::Unary(UnaryOp::UAdd)]),
        (InferredType::Int | InferredType::Float, UnaryOp::UAdd) => Some(&[R::Unary(UnaryOp::USub)]),
        (InferredType::Bool, UnaryOp::Not) => Some(&[R::RemoveNot]),
        _ => None,
    }
}

fn typed_return(shape: ReturnShape, ty: &InferredType) -> Option<&'static [Replacement]> {
    let numeric = matches!(ty, InferredType::Int | InferredType::Float);
    let list: &'static [Replacement] = match (ty, shape) {
        (InferredType::Bool, ReturnShape::True) => &[R::ReturnFalse],
        (InferredType::Bool, ReturnShape::False) => &[R::ReturnTrue],
        (InferredType::Bool, ReturnShape::Expr) => &[R::NegateExpr],

        (InferredType::Optional(_), ReturnShape::None) => &[R::ReturnValue],
        (InferredType::Optional(_), ReturnShape::Expr) => &[R::ReturnNone],

        (InferredType::Int, ReturnShape::IntLiteral) => &[R::Negate],
        (InferredType::Float, ReturnShape::FloatLiteral) => &[R::Negate],
        (_, ReturnShape::Expr) if numeric => &[R::Negate],
        (_, ReturnShape::Negation) if numeric => &[R::RemoveNegation],

        (InferredType::Str, ReturnShape::StrLiteral) => &[R::EmptyStr],

        _ => return None,
    };
    Some(list)
}
