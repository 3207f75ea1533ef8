//! Symbolic values and the operand stack they live on.

use crate::bytecode::{CompareOp, Constant};
use crate::symbols::ValueType;

/// What a stack item was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Constant,
    LocalRef,
    GlobalRef,
    AttributeChain,
    Comparison,
    CallReturn,
    ExceptionMarker,
    Unknown,
}

/// The payload of a stack item.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Literal(Constant),
    Name(String),
    /// `receiver.attr1.attr2`; `root` and `root_type` describe the receiver.
    Chain {
        root: Kind,
        root_type: Option<ValueType>,
        names: Vec<String>,
    },
    Comparison(Box<(StackItem, CompareOp, StackItem)>),
    Nothing,
}

/// What is known about one value.
#[derive(Debug, Clone, PartialEq)]
pub struct StackItem {
    pub data: Datum,
    pub kind: Kind,
    pub value_type: Option<ValueType>,
    pub is_constant: bool,
    /// Element count of literal sequences, 0 otherwise.
    pub length: u32,
}

impl StackItem {
    pub fn constant(value: Constant) -> Self {
        let value_type = Some(value.value_type());
        let length = value.len().unwrap_or(0) as u32;
        Self {
            data: Datum::Literal(value),
            kind: Kind::Constant,
            value_type,
            is_constant: true,
            length,
        }
    }

    /// A built tuple/list/set/dict of `length` elements.
    pub fn aggregate(value_type: ValueType, length: u32, literal: Option<Constant>) -> Self {
        let is_constant = literal.is_some();
        Self {
            data: literal.map(Datum::Literal).unwrap_or(Datum::Nothing),
            kind: Kind::Constant,
            value_type: Some(value_type),
            is_constant,
            length,
        }
    }

    pub fn local(name: &str, value_type: Option<ValueType>) -> Self {
        Self {
            data: Datum::Name(name.to_string()),
            kind: Kind::LocalRef,
            value_type,
            is_constant: false,
            length: 0,
        }
    }

    pub fn global(name: &str, value_type: Option<ValueType>) -> Self {
        Self {
            data: Datum::Name(name.to_string()),
            kind: Kind::GlobalRef,
            value_type,
            is_constant: false,
            length: 0,
        }
    }

    pub fn comparison(left: StackItem, op: CompareOp, right: StackItem) -> Self {
        Self {
            data: Datum::Comparison(Box::new((left, op, right))),
            kind: Kind::Comparison,
            value_type: Some(ValueType::Bool),
            is_constant: false,
            length: 0,
        }
    }

    /// Result of calling `callee`.
    pub fn call_return(callee: Option<String>, value_type: Option<ValueType>) -> Self {
        Self {
            data: callee.map(Datum::Name).unwrap_or(Datum::Nothing),
            kind: Kind::CallReturn,
            value_type,
            is_constant: false,
            length: 0,
        }
    }

    pub fn exception() -> Self {
        Self {
            data: Datum::Nothing,
            kind: Kind::ExceptionMarker,
            value_type: None,
            is_constant: false,
            length: 0,
        }
    }

    pub fn unknown() -> Self {
        Self::typed(None)
    }

    /// Unknown value of a known type.
    pub fn typed(value_type: Option<ValueType>) -> Self {
        Self {
            data: Datum::Nothing,
            kind: Kind::Unknown,
            value_type,
            is_constant: false,
            length: 0,
        }
    }

    /// Extend (or start) an attribute chain with `attr`.
    pub fn with_attribute(&self, attr: &str) -> StackItem {
        let (root, root_type, mut names) = match &self.data {
            Datum::Chain { root, root_type, names } => (*root, *root_type, names.clone()),
            Datum::Name(name) => (self.kind, self.value_type, vec![name.clone()]),
            _ => (self.kind, self.value_type, vec![self.display_name()]),
        };
        names.push(attr.to_string());
        StackItem {
            data: Datum::Chain { root, root_type, names },
            kind: Kind::AttributeChain,
            value_type: None,
            is_constant: false,
            length: 0,
        }
    }

    pub fn literal(&self) -> Option<&Constant> {
        match &self.data {
            Datum::Literal(c) => Some(c),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.data {
            Datum::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn chain(&self) -> Option<(Kind, &[String])> {
        match &self.data {
            Datum::Chain { root, names, .. } => Some((*root, names)),
            _ => None,
        }
    }

    /// Literal string payload.
    pub fn str_literal(&self) -> Option<&str> {
        self.literal().and_then(Constant::as_str)
    }

    pub fn is_none_literal(&self) -> bool {
        matches!(self.literal(), Some(Constant::None))
    }

    /// A local reference to `name`.
    pub fn is_local(&self, name: &str) -> bool {
        self.kind == Kind::LocalRef && self.name() == Some(name)
    }

    /// Dotted rendering used in messages and call records.
    pub fn display_name(&self) -> String {
        match &self.data {
            Datum::Literal(c) => c.to_string(),
            Datum::Name(n) => n.clone(),
            Datum::Chain { names, .. } => names.join("."),
            Datum::Comparison(cmp) => {
                let (left, op, right) = cmp.as_ref();
                format!("{} {} {}", left.display_name(), op, right.display_name())
            }
            Datum::Nothing => match self.value_type {
                Some(t) => t.name().to_string(),
                None => "?".to_string(),
            },
        }
    }
}

/// The operand stack. Popping an empty stack yields nothing instead of failing.
#[derive(Debug, Clone, Default)]
pub struct OperandStack {
    items: Vec<StackItem>,
}

impl OperandStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: StackItem) {
        self.items.push(item);
    }

    pub fn pop(&mut self) -> Option<StackItem> {
        self.items.pop()
    }

    /// Pop up to `n` items, returned bottom-first.
    pub fn pop_n(&mut self, n: usize) -> Vec<StackItem> {
        let at = self.items.len().saturating_sub(n);
        self.items.split_off(at)
    }

    pub fn discard(&mut self, n: usize) {
        let at = self.items.len().saturating_sub(n);
        self.items.truncate(at);
    }

    pub fn top(&self) -> Option<&StackItem> {
        self.items.last()
    }

    /// Item `depth` positions below the top (0 is the top).
    pub fn peek(&self, depth: usize) -> Option<&StackItem> {
        self.items.len().checked_sub(depth + 1).map(|i| &self.items[i])
    }

    /// Duplicate the top `n` items in order.
    pub fn dup(&mut self, n: usize) {
        let at = self.items.len().saturating_sub(n);
        let copies: Vec<StackItem> = self.items[at..].to_vec();
        self.items.extend(copies);
    }

    /// Move the top item `depth` positions down (`ROT_TWO` is depth 1).
    pub fn rotate(&mut self, depth: usize) {
        let len = self.items.len();
        if len > depth {
            let top = self.items.remove(len - 1);
            self.items.insert(len - 1 - depth, top);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pops_are_no_ops() {
        let mut stack = OperandStack::new();
        assert!(stack.pop().is_none());
        assert!(stack.pop_n(3).is_empty());
        stack.discard(2);
        stack.rotate(2);
        stack.dup(1);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_rotate_and_dup() {
        let mut stack = OperandStack::new();
        for name in ["a", "b", "c"] {
            stack.push(StackItem::global(name, None));
        }
        stack.rotate(2);
        let names: Vec<String> = stack.pop_n(3).iter().map(|i| i.display_name()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);

        stack.push(StackItem::global("x", None));
        stack.push(StackItem::global("y", None));
        stack.dup(2);
        assert_eq!(stack.len(), 4);
        assert_eq!(stack.peek(1).unwrap().display_name(), "x");
    }

    #[test]
    fn test_attribute_chains() {
        let this = StackItem::local("self", None);
        let chain = this.with_attribute("conn").with_attribute("close");
        assert_eq!(chain.kind, Kind::AttributeChain);
        let (root, names) = chain.chain().unwrap();
        assert_eq!(root, Kind::LocalRef);
        assert_eq!(names, &["self", "conn", "close"]);
        assert_eq!(chain.display_name(), "self.conn.close");
    }

    #[test]
    fn test_constant_items() {
        let item = StackItem::constant(Constant::Tuple(vec![Constant::Int(1), Constant::Int(2)]));
        assert_eq!(item.length, 2);
        assert_eq!(item.value_type, Some(ValueType::Tuple));
        assert!(item.is_constant);
        assert!(StackItem::constant(Constant::None).is_none_literal());
    }
}
