use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Killing-test marker recorded when the harness itself blows up.
pub const CRASHED: &str = "<crashed>";
/// Killing-test marker recorded when a mutant exceeds its time budget.
pub const TIMED_OUT: &str = "<timeout>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    BinOp,
    AugAssign,
    Compare,
    BoolOp,
    UnaryOp,
    IfExp,
    Break,
    Continue,
    ExceptHandler,
    Return,
}

impl NodeKind {
    pub fn tag(self) -> &'static str {
        match self {
            NodeKind::BinOp => "BinOp",
            NodeKind::AugAssign => "AugAssign",
            NodeKind::Compare => "Compare",
            NodeKind::BoolOp => "BoolOp",
            NodeKind::UnaryOp => "UnaryOp",
            NodeKind::IfExp => "IfExp",
            NodeKind::Break => "Break",
            NodeKind::Continue => "Continue",
            NodeKind::ExceptHandler => "ExceptHandler",
            NodeKind::Return => "Return",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 12] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mult,
        BinaryOp::Div,
        BinaryOp::FloorDiv,
        BinaryOp::Mod,
        BinaryOp::Pow,
        BinaryOp::BitAnd,
        BinaryOp::BitOr,
        BinaryOp::BitXor,
        BinaryOp::LShift,
        BinaryOp::RShift,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Sub",
            BinaryOp::Mult => "Mult",
            BinaryOp::Div => "Div",
            BinaryOp::FloorDiv => "FloorDiv",
            BinaryOp::Mod => "Mod",
            BinaryOp::Pow => "Pow",
            BinaryOp::BitAnd => "BitAnd",
            BinaryOp::BitOr => "BitOr",
            BinaryOp::BitXor => "BitXor",
            BinaryOp::LShift => "LShift",
            BinaryOp::RShift => "RShift",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mult => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::LShift => "<<",
            BinaryOp::RShift => ">>",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<BinaryOp> {
        BinaryOp::ALL.into_iter().find(|op| op.symbol() == symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CompareOp {
    pub const ALL: [CompareOp; 10] = [
        CompareOp::Eq,
        CompareOp::NotEq,
        CompareOp::Lt,
        CompareOp::LtE,
        CompareOp::Gt,
        CompareOp::GtE,
        CompareOp::Is,
        CompareOp::IsNot,
        CompareOp::In,
        CompareOp::NotIn,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            CompareOp::Eq => "Eq",
            CompareOp::NotEq => "NotEq",
            CompareOp::Lt => "Lt",
            CompareOp::LtE => "LtE",
            CompareOp::Gt => "Gt",
            CompareOp::GtE => "GtE",
            CompareOp::Is => "Is",
            CompareOp::IsNot => "IsNot",
            CompareOp::In => "In",
            CompareOp::NotIn => "NotIn",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtE => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtE => ">=",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }

    /// Maps a comparison token to its operator. Multi-word tokens may carry
    /// arbitrary inner whitespace (`is   not`).
    pub fn from_symbol(symbol: &str) -> Option<CompareOp> {
        let normalized = symbol.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.as_str() {
            "<>" => Some(CompareOp::NotEq),
            other => CompareOp::ALL.into_iter().find(|op| op.symbol() == other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn tag(self) -> &'static str {
        match self {
            BoolOp::And => "And",
            BoolOp::Or => "Or",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    UAdd,
    USub,
    Not,
}

impl UnaryOp {
    pub fn tag(self) -> &'static str {
        match self {
            UnaryOp::UAdd => "UAdd",
            UnaryOp::USub => "USub",
            UnaryOp::Not => "Not",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::UAdd => "+",
            UnaryOp::USub => "-",
            UnaryOp::Not => "not",
        }
    }
}

/// Exception handler classification: explicit filter or not, crossed with
/// whether the body is already a bare re-raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerShape {
    Typed,
    TypedBroadest,
    TypedRaiseBody,
    Bare,
}

impl HandlerShape {
    pub fn tag(self) -> &'static str {
        match self {
            HandlerShape::Typed => "typed",
            HandlerShape::TypedBroadest => "typed_broadest",
            HandlerShape::TypedRaiseBody => "typed_raise_body",
            HandlerShape::Bare => "bare",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnShape {
    True,
    False,
    None,
    ZeroIntLiteral,
    IntLiteral,
    ZeroFloatLiteral,
    FloatLiteral,
    EmptyStrLiteral,
    StrLiteral,
    Negation,
    Expr,
}

impl ReturnShape {
    pub fn tag(self) -> &'static str {
        match self {
            ReturnShape::True => "True",
            ReturnShape::False => "False",
            ReturnShape::None => "None",
            ReturnShape::ZeroIntLiteral => "zero_int_literal",
            ReturnShape::IntLiteral => "int_literal",
            ReturnShape::ZeroFloatLiteral => "zero_float_literal",
            ReturnShape::FloatLiteral => "float_literal",
            ReturnShape::EmptyStrLiteral => "empty_str_literal",
            ReturnShape::StrLiteral => "str_literal",
            ReturnShape::Negation => "negation",
            ReturnShape::Expr => "expr",
        }
    }

    const ALL: [ReturnShape; 11] = [
        ReturnShape::True,
        ReturnShape::False,
        ReturnShape::None,
        ReturnShape::ZeroIntLiteral,
        ReturnShape::IntLiteral,
        ReturnShape::ZeroFloatLiteral,
        ReturnShape::FloatLiteral,
        ReturnShape::EmptyStrLiteral,
        ReturnShape::StrLiteral,
        ReturnShape::Negation,
        ReturnShape::Expr,
    ];
}

/// What sits at a mutation point today. Serialized as its tag (`"Add"`,
/// `"typed_broadest"`, `"zero_int_literal"`, ...); every tag is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Shape {
    Binary(BinaryOp),
    Compare(CompareOp),
    Bool(BoolOp),
    Unary(UnaryOp),
    Ternary,
    Break,
    Continue,
    Handler(HandlerShape),
    Return(ReturnShape),
}

impl Shape {
    pub fn tag(self) -> &'static str {
        match self {
            Shape::Binary(op) => op.tag(),
            Shape::Compare(op) => op.tag(),
            Shape::Bool(op) => op.tag(),
            Shape::Unary(op) => op.tag(),
            Shape::Ternary => "ternary",
            Shape::Break => "break",
            Shape::Continue => "continue",
            Shape::Handler(h) => h.tag(),
            Shape::Return(r) => r.tag(),
        }
    }

    pub fn from_tag(tag: &str) -> Option<Shape> {
        if let Some(op) = BinaryOp::ALL.into_iter().find(|op| op.tag() == tag) {
            return Some(Shape::Binary(op));
        }
        if let Some(op) = CompareOp::ALL.into_iter().find(|op| op.tag() == tag) {
            return Some(Shape::Compare(op));
        }
        let shape = match tag {
            "And" => Shape::Bool(BoolOp::And),
            "Or" => Shape::Bool(BoolOp::Or),
            "UAdd" => Shape::Unary(UnaryOp::UAdd),
            "USub" => Shape::Unary(UnaryOp::USub),
            "Not" => Shape::Unary(UnaryOp::Not),
            "ternary" => Shape::Ternary,
            "break" => Shape::Break,
            "continue" => Shape::Continue,
            "typed" => Shape::Handler(HandlerShape::Typed),
            "typed_broadest" => Shape::Handler(HandlerShape::TypedBroadest),
            "typed_raise_body" => Shape::Handler(HandlerShape::TypedRaiseBody),
            "bare" => Shape::Handler(HandlerShape::Bare),
            other => {
                return ReturnShape::ALL
                    .into_iter()
                    .find(|r| r.tag() == other)
                    .map(Shape::Return);
            }
        };
        Some(shape)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl From<Shape> for String {
    fn from(shape: Shape) -> String {
        shape.tag().to_string()
    }
}

impl TryFrom<String> for Shape {
    type Error = String;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        Shape::from_tag(&tag).ok_or_else(|| format!("unknown shape tag: {tag}"))
    }
}

/// A concrete change to make at a mutation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Replacement {
    Binary(BinaryOp),
    Compare(CompareOp),
    Bool(BoolOp),
    Unary(UnaryOp),
    /// Drop a logical `not`, keeping its operand.
    RemoveNot,
    SwapBranches,
    AlwaysTrue,
    AlwaysFalse,
    Break,
    Continue,
    Broaden,
    RaiseBody,
    ReturnTrue,
    ReturnFalse,
    ReturnNone,
    /// Return some non-`None` value instead of `None`.
    ReturnValue,
    Negate,
    NegateExpr,
    RemoveNegation,
    EmptyStr,
}

impl Replacement {
    const SIMPLE: [Replacement; 16] = [
        Replacement::RemoveNot,
        Replacement::SwapBranches,
        Replacement::AlwaysTrue,
        Replacement::AlwaysFalse,
        Replacement::Break,
        Replacement::Continue,
        Replacement::Broaden,
        Replacement::RaiseBody,
        Replacement::ReturnTrue,
        Replacement::ReturnFalse,
        Replacement::ReturnNone,
        Replacement::ReturnValue,
        Replacement::Negate,
        Replacement::NegateExpr,
        Replacement::RemoveNegation,
        Replacement::EmptyStr,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Replacement::Binary(op) => op.tag(),
            Replacement::Compare(op) => op.tag(),
            Replacement::Bool(op) => op.tag(),
            Replacement::Unary(op) => op.tag(),
            Replacement::RemoveNot => "_remove",
            Replacement::SwapBranches => "swap_branches",
            Replacement::AlwaysTrue => "always_true",
            Replacement::AlwaysFalse => "always_false",
            Replacement::Break => "break",
            Replacement::Continue => "continue",
            Replacement::Broaden => "broaden",
            Replacement::RaiseBody => "body_to_raise",
            Replacement::ReturnTrue => "True",
            Replacement::ReturnFalse => "False",
            Replacement::ReturnNone => "None",
            Replacement::ReturnValue => "expr",
            Replacement::Negate => "negate",
            Replacement::NegateExpr => "negate_expr",
            Replacement::RemoveNegation => "remove_negation",
            Replacement::EmptyStr => "empty_str",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Replacement> {
        if let Some(r) = Replacement::SIMPLE.into_iter().find(|r| r.tag() == tag) {
            return Some(r);
        }
        match Shape::from_tag(tag)? {
            Shape::Binary(op) => Some(Replacement::Binary(op)),
            Shape::Compare(op) => Some(Replacement::Compare(op)),
            Shape::Bool(op) => Some(Replacement::Bool(op)),
            Shape::Unary(op) => Some(Replacement::Unary(op)),
            _ => None,
        }
    }

    /// Human-readable form of the replacement, used in reports.
    pub fn display(self) -> String {
        match self {
            Replacement::Binary(op) => op.symbol().to_string(),
            Replacement::Compare(op) => op.symbol().to_string(),
            Replacement::Bool(op) => op.symbol().to_string(),
            Replacement::Unary(op) => op.symbol().to_string(),
            Replacement::RemoveNot => "(remove not)".to_string(),
            Replacement::SwapBranches => "(swap branches)".to_string(),
            Replacement::AlwaysTrue => "(always true branch)".to_string(),
            Replacement::AlwaysFalse => "(always false branch)".to_string(),
            Replacement::Break => "break".to_string(),
            Replacement::Continue => "continue".to_string(),
            Replacement::Broaden => "except Exception".to_string(),
            Replacement::RaiseBody => "raise".to_string(),
            Replacement::ReturnTrue => "return True".to_string(),
            Replacement::ReturnFalse => "return False".to_string(),
            Replacement::ReturnNone => "return None".to_string(),
            Replacement::ReturnValue => "return <value>".to_string(),
            Replacement::Negate => "return -(...)".to_string(),
            Replacement::NegateExpr => "return not (...)".to_string(),
            Replacement::RemoveNegation => "(remove negation)".to_string(),
            Replacement::EmptyStr => "return \"\"".to_string(),
        }
    }
}

impl fmt::Display for Replacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl From<Replacement> for String {
    fn from(r: Replacement) -> String {
        r.tag().to_string()
    }
}

impl TryFrom<String> for Replacement {
    type Error = String;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        Replacement::from_tag(&tag).ok_or_else(|| format!("unknown replacement tag: {tag}"))
    }
}

/// Shallow semantic type attached by the enricher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InferredType {
    Int,
    Float,
    Str,
    Bool,
    Optional(Box<InferredType>),
    Other(String),
}

impl InferredType {
    /// Normalizes an annotation's source text. `Optional[T]`,
    /// `typing.Optional[T]`, `Union[T, None]` and `T | None` all become
    /// `Optional(T)`.
    pub fn from_annotation(text: &str) -> InferredType {
        let text = text.trim();
        let text = strip_quotes(text).trim();

        for prefix in ["Optional[", "typing.Optional["] {
            if let Some(inner) = text.strip_prefix(prefix).and_then(|t| t.strip_suffix(']')) {
                return InferredType::Optional(Box::new(InferredType::from_annotation(inner)));
            }
        }
        for prefix in ["Union[", "typing.Union["] {
            if let Some(inner) = text.strip_prefix(prefix).and_then(|t| t.strip_suffix(']')) {
                if let Some(optional) = optional_of(&split_top_level(inner, ',')) {
                    return optional;
                }
                return InferredType::Other(text.to_string());
            }
        }
        let members = split_top_level(text, '|');
        if members.len() > 1 {
            if let Some(optional) = optional_of(&members) {
                return optional;
            }
            return InferredType::Other(text.to_string());
        }

        match text {
            "int" => InferredType::Int,
            "float" => InferredType::Float,
            "str" => InferredType::Str,
            "bool" => InferredType::Bool,
            other => InferredType::Other(other.to_string()),
        }
    }
}

fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = text.strip_prefix(quote).and_then(|t| t.strip_suffix(quote)) {
            return inner;
        }
    }
    text
}

fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// `[T, None]` in any order becomes `Optional(T)`.
fn optional_of(members: &[&str]) -> Option<InferredType> {
    if members.len() != 2 {
        return None;
    }
    let is_none = |m: &str| m == "None" || m == "NoneType";
    match (is_none(members[0]), is_none(members[1])) {
        (false, true) => Some(InferredType::Optional(Box::new(InferredType::from_annotation(
            members[0],
        )))),
        (true, false) => Some(InferredType::Optional(Box::new(InferredType::from_annotation(
            members[1],
        )))),
        _ => None,
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferredType::Int => f.write_str("int"),
            InferredType::Float => f.write_str("float"),
            InferredType::Str => f.write_str("str"),
            InferredType::Bool => f.write_str("bool"),
            InferredType::Optional(inner) => write!(f, "Optional[{inner}]"),
            InferredType::Other(s) => f.write_str(s),
        }
    }
}

impl From<InferredType> for String {
    fn from(t: InferredType) -> String {
        t.to_string()
    }
}

impl From<String> for InferredType {
    fn from(s: String) -> InferredType {
        InferredType::from_annotation(&s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationPoint {
    pub file_path: PathBuf,
    pub module_name: String,
    pub line: usize,
    pub column: usize,
    pub kind: NodeKind,
    #[serde(rename = "original_op")]
    pub shape: Shape,
    pub inferred_type: Option<InferredType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutant {
    pub id: usize,
    pub point: MutationPoint,
    pub replacement: Replacement,
}

impl Mutant {
    /// One-line description of the change: `+ → -`, `return True → return False`.
    pub fn describe(&self) -> String {
        let original = match self.point.shape {
            Shape::Binary(op) => op.symbol().to_string(),
            Shape::Compare(op) => op.symbol().to_string(),
            Shape::Bool(op) => op.symbol().to_string(),
            Shape::Unary(op) => op.symbol().to_string(),
            Shape::Ternary => "x if c else y".to_string(),
            Shape::Break => "break".to_string(),
            Shape::Continue => "continue".to_string(),
            Shape::Handler(h) => format!("except ({})", h.tag()),
            Shape::Return(r) => format!("return ({})", r.tag()),
        };
        format!("{original} → {}", self.replacement.display())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutantResult {
    pub mutant: Mutant,
    pub killed: bool,
    pub tests_run: usize,
    /// First failing or erroring test.
    pub killing_test: Option<String>,
    pub killing_tests: Vec<String>,
    pub test_ids_run: Vec<String>,
    pub time_seconds: f64,
    pub applied: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub diff: String,
}
