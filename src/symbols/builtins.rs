//! Static tables describing the builtin namespace and builtin types.

use phf::{phf_map, phf_set};

use super::ValueType;

/// Argument bounds and result type of a builtin callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    pub min_args: usize,
    /// `None` means unbounded.
    pub max_args: Option<usize>,
    /// `Some(ValueType::None)` marks callables that always return `None`.
    pub returns: Option<ValueType>,
}

const fn sig(min_args: usize, max_args: usize, returns: Option<ValueType>) -> Builtin {
    Builtin {
        min_args,
        max_args: Some(max_args),
        returns,
    }
}

const fn var(min_args: usize, returns: Option<ValueType>) -> Builtin {
    Builtin {
        min_args,
        max_args: None,
        returns,
    }
}

use ValueType as T;

/// Builtin functions and type constructors.
pub static BUILTIN_FUNCTIONS: phf::Map<&'static str, Builtin> = phf_map! {
    "__import__" => sig(1, 5, Some(T::Module)),
    "abs" => sig(1, 1, None),
    "all" => sig(1, 1, Some(T::Bool)),
    "any" => sig(1, 1, Some(T::Bool)),
    "apply" => sig(1, 3, None),
    "bin" => sig(1, 1, Some(T::Str)),
    "bool" => sig(0, 1, Some(T::Bool)),
    "bytearray" => sig(0, 3, None),
    "callable" => sig(1, 1, Some(T::Bool)),
    "chr" => sig(1, 1, Some(T::Str)),
    "classmethod" => sig(1, 1, None),
    "cmp" => sig(2, 2, Some(T::Int)),
    "coerce" => sig(2, 2, Some(T::Tuple)),
    "compile" => sig(3, 5, Some(T::Code)),
    "complex" => sig(0, 2, Some(T::Complex)),
    "delattr" => sig(2, 2, Some(T::None)),
    "dict" => var(0, Some(T::Dict)),
    "dir" => sig(0, 1, Some(T::List)),
    "divmod" => sig(2, 2, Some(T::Tuple)),
    "enumerate" => sig(1, 2, None),
    "eval" => sig(1, 3, None),
    "execfile" => sig(1, 3, Some(T::None)),
    "file" => sig(1, 3, Some(T::File)),
    "filter" => sig(2, 2, None),
    "float" => sig(0, 1, Some(T::Float)),
    "format" => sig(1, 2, Some(T::Str)),
    "frozenset" => sig(0, 1, Some(T::Set)),
    "getattr" => sig(2, 3, None),
    "globals" => sig(0, 0, Some(T::Dict)),
    "hasattr" => sig(2, 2, Some(T::Bool)),
    "hash" => sig(1, 1, Some(T::Int)),
    "hex" => sig(1, 1, Some(T::Str)),
    "id" => sig(1, 1, Some(T::Int)),
    "input" => sig(0, 1, None),
    "int" => sig(0, 2, Some(T::Int)),
    "intern" => sig(1, 1, Some(T::Str)),
    "isinstance" => sig(2, 2, Some(T::Bool)),
    "issubclass" => sig(2, 2, Some(T::Bool)),
    "iter" => sig(1, 2, None),
    "len" => sig(1, 1, Some(T::Int)),
    "list" => sig(0, 1, Some(T::List)),
    "locals" => sig(0, 0, Some(T::Dict)),
    "long" => sig(0, 2, Some(T::Long)),
    "map" => var(2, Some(T::List)),
    "max" => var(1, None),
    "memoryview" => sig(1, 1, None),
    "min" => var(1, None),
    "next" => sig(1, 2, None),
    "object" => sig(0, 0, None),
    "oct" => sig(1, 1, Some(T::Str)),
    "open" => sig(1, 3, Some(T::File)),
    "ord" => sig(1, 1, Some(T::Int)),
    "pow" => sig(2, 3, None),
    "property" => sig(0, 4, None),
    "range" => sig(1, 3, Some(T::List)),
    "raw_input" => sig(0, 1, Some(T::Str)),
    "reduce" => sig(2, 3, None),
    "reload" => sig(1, 1, Some(T::Module)),
    "repr" => sig(1, 1, Some(T::Str)),
    "reversed" => sig(1, 1, None),
    "round" => sig(1, 2, Some(T::Float)),
    "set" => sig(0, 1, Some(T::Set)),
    "setattr" => sig(3, 3, Some(T::None)),
    "slice" => sig(1, 3, Some(T::Slice)),
    "sorted" => sig(1, 4, Some(T::List)),
    "staticmethod" => sig(1, 1, None),
    "str" => sig(0, 1, Some(T::Str)),
    "sum" => sig(1, 2, None),
    "super" => sig(1, 2, None),
    "tuple" => sig(0, 1, Some(T::Tuple)),
    "type" => sig(1, 3, None),
    "unichr" => sig(1, 1, Some(T::Unicode)),
    "unicode" => sig(0, 3, Some(T::Unicode)),
    "vars" => sig(0, 1, Some(T::Dict)),
    "xrange" => sig(1, 3, None),
    "zip" => var(0, Some(T::List)),
};

/// Methods of builtin types, keyed `type.method`. Bounds exclude the receiver.
pub static BUILTIN_METHODS: phf::Map<&'static str, Builtin> = phf_map! {
    "list.append" => sig(1, 1, Some(T::None)),
    "list.count" => sig(1, 1, Some(T::Int)),
    "list.extend" => sig(1, 1, Some(T::None)),
    "list.index" => sig(1, 3, Some(T::Int)),
    "list.insert" => sig(2, 2, Some(T::None)),
    "list.pop" => sig(0, 1, None),
    "list.remove" => sig(1, 1, Some(T::None)),
    "list.reverse" => sig(0, 0, Some(T::None)),
    "list.sort" => sig(0, 3, Some(T::None)),
    "dict.clear" => sig(0, 0, Some(T::None)),
    "dict.copy" => sig(0, 0, Some(T::Dict)),
    "dict.get" => sig(1, 2, None),
    "dict.has_key" => sig(1, 1, Some(T::Bool)),
    "dict.items" => sig(0, 0, Some(T::List)),
    "dict.iteritems" => sig(0, 0, None),
    "dict.iterkeys" => sig(0, 0, None),
    "dict.itervalues" => sig(0, 0, None),
    "dict.keys" => sig(0, 0, Some(T::List)),
    "dict.pop" => sig(1, 2, None),
    "dict.popitem" => sig(0, 0, Some(T::Tuple)),
    "dict.setdefault" => sig(1, 2, None),
    "dict.update" => var(0, Some(T::None)),
    "dict.values" => sig(0, 0, Some(T::List)),
    "set.add" => sig(1, 1, Some(T::None)),
    "set.clear" => sig(0, 0, Some(T::None)),
    "set.discard" => sig(1, 1, Some(T::None)),
    "set.remove" => sig(1, 1, Some(T::None)),
    "set.update" => var(0, Some(T::None)),
    "set.union" => var(0, Some(T::Set)),
    "set.intersection" => var(0, Some(T::Set)),
    "set.difference" => var(0, Some(T::Set)),
    "str.count" => sig(1, 3, Some(T::Int)),
    "str.decode" => sig(0, 2, Some(T::Unicode)),
    "str.encode" => sig(0, 2, Some(T::Str)),
    "str.endswith" => sig(1, 3, Some(T::Bool)),
    "str.find" => sig(1, 3, Some(T::Int)),
    "str.format" => var(0, Some(T::Str)),
    "str.index" => sig(1, 3, Some(T::Int)),
    "str.join" => sig(1, 1, Some(T::Str)),
    "str.lower" => sig(0, 0, Some(T::Str)),
    "str.lstrip" => sig(0, 1, Some(T::Str)),
    "str.replace" => sig(2, 3, Some(T::Str)),
    "str.rfind" => sig(1, 3, Some(T::Int)),
    "str.rstrip" => sig(0, 1, Some(T::Str)),
    "str.split" => sig(0, 2, Some(T::List)),
    "str.splitlines" => sig(0, 1, Some(T::List)),
    "str.startswith" => sig(1, 3, Some(T::Bool)),
    "str.strip" => sig(0, 1, Some(T::Str)),
    "str.upper" => sig(0, 0, Some(T::Str)),
    "file.close" => sig(0, 0, Some(T::None)),
    "file.flush" => sig(0, 0, Some(T::None)),
    "file.read" => sig(0, 1, Some(T::Str)),
    "file.readline" => sig(0, 1, Some(T::Str)),
    "file.readlines" => sig(0, 1, Some(T::List)),
    "file.seek" => sig(1, 2, Some(T::None)),
    "file.tell" => sig(0, 0, Some(T::Long)),
    "file.write" => sig(1, 1, Some(T::None)),
    "file.writelines" => sig(1, 1, Some(T::None)),
};

/// Names that live in the builtin namespace.
pub static BUILTIN_NAMES: phf::Set<&'static str> = phf_set! {
    "None", "True", "False", "Ellipsis", "NotImplemented", "__debug__",
    "__name__", "__file__", "__doc__", "__builtins__", "__import__",
    "abs", "all", "any", "apply", "basestring", "bin", "bool", "buffer",
    "bytearray", "bytes", "callable", "chr", "classmethod", "cmp", "coerce",
    "compile", "complex", "copyright", "credits", "delattr", "dict", "dir",
    "divmod", "enumerate", "eval", "execfile", "exit", "file", "filter",
    "float", "format", "frozenset", "getattr", "globals", "hasattr", "hash",
    "help", "hex", "id", "input", "int", "intern", "isinstance", "issubclass",
    "iter", "len", "license", "list", "locals", "long", "map", "max",
    "memoryview", "min", "next", "object", "oct", "open", "ord", "pow",
    "print", "property", "quit", "range", "raw_input", "reduce", "reload",
    "repr", "reversed", "round", "set", "setattr", "slice", "sorted",
    "staticmethod", "str", "sum", "super", "tuple", "type", "unichr",
    "unicode", "vars", "xrange", "zip",
    "ArithmeticError", "AssertionError", "AttributeError", "BaseException",
    "BufferError", "BytesWarning", "DeprecationWarning", "EOFError",
    "EnvironmentError", "Exception", "FloatingPointError", "FutureWarning",
    "GeneratorExit", "IOError", "ImportError", "ImportWarning",
    "IndentationError", "IndexError", "KeyError", "KeyboardInterrupt",
    "LookupError", "MemoryError", "NameError", "NotImplementedError",
    "OSError", "OverflowError", "PendingDeprecationWarning", "ReferenceError",
    "RuntimeError", "RuntimeWarning", "StandardError", "StopIteration",
    "SyntaxError", "SyntaxWarning", "SystemError", "SystemExit", "TabError",
    "TypeError", "UnboundLocalError", "UnicodeDecodeError",
    "UnicodeEncodeError", "UnicodeError", "UnicodeTranslateError",
    "UnicodeWarning", "UserWarning", "ValueError", "Warning",
    "ZeroDivisionError",
};

/// Builtin exception classes; constructing them with arguments is fine.
pub static STANDARD_EXCEPTIONS: phf::Set<&'static str> = phf_set! {
    "ArithmeticError", "AssertionError", "AttributeError", "BaseException",
    "BufferError", "EOFError", "EnvironmentError", "Exception",
    "FloatingPointError", "GeneratorExit", "IOError", "ImportError",
    "IndentationError", "IndexError", "KeyError", "KeyboardInterrupt",
    "LookupError", "MemoryError", "NameError", "NotImplementedError",
    "OSError", "OverflowError", "ReferenceError", "RuntimeError",
    "StandardError", "StopIteration", "SyntaxError", "SystemError",
    "SystemExit", "TabError", "TypeError", "UnboundLocalError",
    "UnicodeDecodeError", "UnicodeEncodeError", "UnicodeError",
    "UnicodeTranslateError", "ValueError", "ZeroDivisionError",
    "Warning", "UserWarning", "DeprecationWarning", "RuntimeWarning",
};

const STR_ATTRIBUTES: &[&str] = &[
    "capitalize", "center", "count", "decode", "encode", "endswith", "expandtabs", "find",
    "format", "index", "isalnum", "isalpha", "isdigit", "islower", "isspace", "istitle",
    "isupper", "join", "ljust", "lower", "lstrip", "partition", "replace", "rfind", "rindex",
    "rjust", "rpartition", "rsplit", "rstrip", "split", "splitlines", "startswith", "strip",
    "swapcase", "title", "translate", "upper", "zfill",
];
const UNICODE_ATTRIBUTES: &[&str] = &["isdecimal", "isnumeric"];
const LIST_ATTRIBUTES: &[&str] = &[
    "append", "count", "extend", "index", "insert", "pop", "remove", "reverse", "sort",
];
const TUPLE_ATTRIBUTES: &[&str] = &["count", "index"];
const DICT_ATTRIBUTES: &[&str] = &[
    "clear", "copy", "fromkeys", "get", "has_key", "items", "iteritems", "iterkeys",
    "itervalues", "keys", "pop", "popitem", "setdefault", "update", "values", "viewitems",
    "viewkeys", "viewvalues",
];
const SET_ATTRIBUTES: &[&str] = &[
    "add", "clear", "copy", "difference", "difference_update", "discard", "intersection",
    "intersection_update", "isdisjoint", "issubset", "issuperset", "pop", "remove",
    "symmetric_difference", "symmetric_difference_update", "union", "update",
];
const INT_ATTRIBUTES: &[&str] = &["bit_length", "conjugate", "denominator", "imag", "numerator", "real"];
const FLOAT_ATTRIBUTES: &[&str] = &["as_integer_ratio", "conjugate", "fromhex", "hex", "imag", "is_integer", "real"];
const COMPLEX_ATTRIBUTES: &[&str] = &["conjugate", "imag", "real"];
const FILE_ATTRIBUTES: &[&str] = &[
    "close", "closed", "encoding", "fileno", "flush", "isatty", "mode", "name", "next", "read",
    "readline", "readlines", "seek", "tell", "truncate", "write", "writelines",
];
const SLICE_ATTRIBUTES: &[&str] = &["indices", "start", "step", "stop"];
const NONE_ATTRIBUTES: &[&str] = &[];
const OBJECT_ATTRIBUTES: &[&str] = &["__class__", "__doc__", "__hash__", "__repr__", "__str__"];

/// Attribute names of a builtin type, or `None` when the type is not one
/// whose attributes are known.
pub fn type_attributes(value_type: ValueType) -> Option<&'static [&'static str]> {
    let attrs = match value_type {
        ValueType::None => NONE_ATTRIBUTES,
        ValueType::Str => STR_ATTRIBUTES,
        ValueType::Unicode => STR_ATTRIBUTES,
        ValueType::List => LIST_ATTRIBUTES,
        ValueType::Tuple => TUPLE_ATTRIBUTES,
        ValueType::Dict => DICT_ATTRIBUTES,
        ValueType::Set => SET_ATTRIBUTES,
        ValueType::Bool | ValueType::Int | ValueType::Long => INT_ATTRIBUTES,
        ValueType::Float => FLOAT_ATTRIBUTES,
        ValueType::Complex => COMPLEX_ATTRIBUTES,
        ValueType::File => FILE_ATTRIBUTES,
        ValueType::Slice => SLICE_ATTRIBUTES,
        _ => return None,
    };
    Some(attrs)
}

/// Whether `attr` exists on values of `value_type`. Unknown types answer yes.
pub fn has_type_attribute(value_type: ValueType, attr: &str) -> bool {
    match type_attributes(value_type) {
        Some(attrs) => {
            attrs.contains(&attr)
                || OBJECT_ATTRIBUTES.contains(&attr)
                || (value_type == ValueType::Unicode && UNICODE_ATTRIBUTES.contains(&attr))
        }
        None => true,
    }
}

/// Signature of `value_type.method`, if tabulated.
pub fn method_signature(value_type: ValueType, method: &str) -> Option<&'static Builtin> {
    let owner = match value_type {
        ValueType::Unicode => "str",
        other => other.name(),
    };
    BUILTIN_METHODS.get(format!("{}.{}", owner, method).as_str())
}

pub fn function_signature(name: &str) -> Option<&'static Builtin> {
    BUILTIN_FUNCTIONS.get(name)
}

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(name)
}

pub fn is_standard_exception(name: &str) -> bool {
    STANDARD_EXCEPTIONS.contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_signatures() {
        let len = function_signature("len").unwrap();
        assert_eq!((len.min_args, len.max_args), (1, Some(1)));
        assert_eq!(function_signature("max").unwrap().max_args, None);
        assert!(function_signature("nonexistent").is_none());
    }

    #[test]
    fn test_type_attributes() {
        assert!(has_type_attribute(ValueType::List, "append"));
        assert!(!has_type_attribute(ValueType::List, "apend"));
        assert!(has_type_attribute(ValueType::Unicode, "isnumeric"));
        assert!(!has_type_attribute(ValueType::Str, "isnumeric"));
        // no table for functions: anything goes
        assert!(has_type_attribute(ValueType::Function, "whatever"));
    }

    #[test]
    fn test_method_signatures() {
        let append = method_signature(ValueType::List, "append").unwrap();
        assert_eq!(append.returns, Some(ValueType::None));
        assert!(method_signature(ValueType::Unicode, "join").is_some());
        assert!(method_signature(ValueType::Int, "append").is_none());
    }

    #[test]
    fn test_name_tables() {
        assert!(is_builtin("len"));
        assert!(is_builtin("ValueError"));
        assert!(!is_builtin("my_helper"));
        assert!(is_standard_exception("KeyError"));
        assert!(!is_standard_exception("len"));
    }
}
