//! Opcode definitions and static classification tables.
//!
//! Bytecode is a flat byte stream. Opcodes below [`HAVE_ARGUMENT`] occupy one
//! byte; the rest carry a 16-bit little-endian operand. Which operand pool an
//! opcode indexes, and whether it jumps, is fixed metadata expressed by the
//! `const fn` tables on [`Opcode`].

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};

/// First opcode value that carries an operand.
pub const HAVE_ARGUMENT: u8 = 90;

/// Opcode discriminant for the classic stack instruction set.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    StopCode = 0,
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    RotFour = 5,
    Nop = 9,
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryConvert = 13,
    UnaryInvert = 15,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryDivide = 21,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    #[strum(serialize = "SLICE+0")]
    Slice0 = 30,
    #[strum(serialize = "SLICE+1")]
    Slice1 = 31,
    #[strum(serialize = "SLICE+2")]
    Slice2 = 32,
    #[strum(serialize = "SLICE+3")]
    Slice3 = 33,
    #[strum(serialize = "STORE_SLICE+0")]
    StoreSlice0 = 40,
    #[strum(serialize = "STORE_SLICE+1")]
    StoreSlice1 = 41,
    #[strum(serialize = "STORE_SLICE+2")]
    StoreSlice2 = 42,
    #[strum(serialize = "STORE_SLICE+3")]
    StoreSlice3 = 43,
    #[strum(serialize = "DELETE_SLICE+0")]
    DeleteSlice0 = 50,
    #[strum(serialize = "DELETE_SLICE+1")]
    DeleteSlice1 = 51,
    #[strum(serialize = "DELETE_SLICE+2")]
    DeleteSlice2 = 52,
    #[strum(serialize = "DELETE_SLICE+3")]
    DeleteSlice3 = 53,
    StoreMap = 54,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceDivide = 58,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    PrintExpr = 70,
    PrintItem = 71,
    PrintNewline = 72,
    PrintItemTo = 73,
    PrintNewlineTo = 74,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    BreakLoop = 80,
    WithCleanup = 81,
    LoadLocals = 82,
    ReturnValue = 83,
    ImportStar = 84,
    ExecStmt = 85,
    YieldValue = 86,
    PopBlock = 87,
    EndFinally = 88,
    BuildClass = 89,
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    ListAppend = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    DupTopx = 99,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildSet = 104,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    ImportName = 108,
    ImportFrom = 109,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    MakeClosure = 134,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    CallFunctionVar = 140,
    CallFunctionKw = 141,
    CallFunctionVarKw = 142,
    SetupWith = 143,
    ExtendedArg = 145,
    SetAdd = 146,
    MapAdd = 147,
}

/// Which table an opcode's raw operand indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandPool {
    /// No operand at all.
    None,
    /// Referenced-name pool.
    Name,
    /// Local-variable-name pool.
    Local,
    /// Constant pool.
    Const,
    /// Fixed comparison-operator table.
    Compare,
    /// Cell and free variable names.
    Free,
    /// The operand is a plain count or offset.
    Raw,
}

/// How an opcode's operand relates to a jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    None,
    /// Target is the post-decode offset plus the operand.
    Relative,
    /// Target is the operand itself.
    Absolute,
}

impl Opcode {
    /// Returns the opcode byte value.
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Parses an opcode from its byte value.
    pub fn from_byte(b: u8) -> Option<Self> {
        Self::from_repr(b)
    }

    /// Whether a 16-bit operand follows the opcode byte.
    pub const fn has_argument(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    pub const fn operand_pool(self) -> OperandPool {
        use Opcode::*;
        match self {
            StoreName | DeleteName | StoreAttr | DeleteAttr | StoreGlobal | DeleteGlobal
            | LoadName | LoadAttr | ImportName | ImportFrom | LoadGlobal => OperandPool::Name,
            LoadFast | StoreFast | DeleteFast => OperandPool::Local,
            LoadConst => OperandPool::Const,
            CompareOp => OperandPool::Compare,
            LoadClosure | LoadDeref | StoreDeref => OperandPool::Free,
            op if op.has_argument() => OperandPool::Raw,
            _ => OperandPool::None,
        }
    }

    pub const fn jump_kind(self) -> JumpKind {
        use Opcode::*;
        match self {
            ForIter | JumpForward | SetupLoop | SetupExcept | SetupFinally | SetupWith => {
                JumpKind::Relative
            }
            JumpIfFalseOrPop | JumpIfTrueOrPop | JumpAbsolute | PopJumpIfFalse
            | PopJumpIfTrue | ContinueLoop => JumpKind::Absolute,
            _ => JumpKind::None,
        }
    }

    /// Instructions after which control never falls through.
    pub const fn ends_flow(self) -> bool {
        matches!(self, Opcode::ReturnValue | Opcode::RaiseVarargs)
    }

    /// Call opcodes and the number of extra stack items (`*args`, `**kw`)
    /// they consume in addition to the packed argument counts.
    pub const fn call_extra_items(self) -> Option<usize> {
        match self {
            Opcode::CallFunction => Some(0),
            Opcode::CallFunctionVar | Opcode::CallFunctionKw => Some(1),
            Opcode::CallFunctionVarKw => Some(2),
            _ => None,
        }
    }
}

/// Comparison operators, indexed by the `COMPARE_OP` operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
    ExceptionMatch,
    Bad,
}

/// The fixed comparison-operator table.
pub const COMPARE_OPS: [CompareOp; 12] = [
    CompareOp::Lt,
    CompareOp::Le,
    CompareOp::Eq,
    CompareOp::Ne,
    CompareOp::Gt,
    CompareOp::Ge,
    CompareOp::In,
    CompareOp::NotIn,
    CompareOp::Is,
    CompareOp::IsNot,
    CompareOp::ExceptionMatch,
    CompareOp::Bad,
];

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
            CompareOp::ExceptionMatch => "exception match",
            CompareOp::Bad => "BAD",
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        COMPARE_OPS.get(index as usize).copied()
    }

    /// Position of this operator in [`COMPARE_OPS`].
    pub fn index(&self) -> u32 {
        COMPARE_OPS
            .iter()
            .position(|op| op == self)
            .unwrap_or(COMPARE_OPS.len() - 1) as u32
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_are_stable() {
        assert_eq!(Opcode::PopTop.byte(), 1);
        assert_eq!(Opcode::ReturnValue.byte(), 83);
        assert_eq!(Opcode::StoreName.byte(), HAVE_ARGUMENT);
        assert_eq!(Opcode::LoadFast.byte(), 124);
        assert_eq!(Opcode::CallFunction.byte(), 131);
        assert_eq!(Opcode::ExtendedArg.byte(), 145);
        assert_eq!(Opcode::from_byte(100), Some(Opcode::LoadConst));
        assert_eq!(Opcode::from_byte(6), None);
    }

    #[test]
    fn operand_pools() {
        assert_eq!(Opcode::LoadAttr.operand_pool(), OperandPool::Name);
        assert_eq!(Opcode::StoreFast.operand_pool(), OperandPool::Local);
        assert_eq!(Opcode::LoadConst.operand_pool(), OperandPool::Const);
        assert_eq!(Opcode::CompareOp.operand_pool(), OperandPool::Compare);
        assert_eq!(Opcode::LoadDeref.operand_pool(), OperandPool::Free);
        assert_eq!(Opcode::CallFunction.operand_pool(), OperandPool::Raw);
        assert_eq!(Opcode::BinaryAdd.operand_pool(), OperandPool::None);
    }

    #[test]
    fn jump_classification() {
        assert_eq!(Opcode::JumpForward.jump_kind(), JumpKind::Relative);
        assert_eq!(Opcode::SetupLoop.jump_kind(), JumpKind::Relative);
        assert_eq!(Opcode::PopJumpIfFalse.jump_kind(), JumpKind::Absolute);
        assert_eq!(Opcode::LoadFast.jump_kind(), JumpKind::None);
    }

    #[test]
    fn display_names() {
        assert_eq!(Opcode::LoadFast.to_string(), "LOAD_FAST");
        assert_eq!(Opcode::Slice2.to_string(), "SLICE+2");
        assert_eq!(CompareOp::from_index(7), Some(CompareOp::NotIn));
        assert_eq!(CompareOp::IsNot.index(), 9);
        assert_eq!(CompareOp::from_index(12), None);
    }
}
