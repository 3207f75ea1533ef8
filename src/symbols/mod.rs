//! The program symbol table consulted while checking.
//!
//! The table is built outside the checker (a dumper walks the live program
//! and writes JSON). After loading, [`ProgramSymbolTable::finalize`] fills in
//! names from map keys, derives function signatures from their code units and
//! flattens every class's inherited methods and members so attribute lookups
//! never re-walk the inheritance graph.

pub mod builtins;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::bytecode::{decode_all, CodeUnit, Constant, Opcode, Params};

/// Best-known type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    None,
    Bool,
    Int,
    Long,
    Float,
    Complex,
    Str,
    Unicode,
    Tuple,
    List,
    Dict,
    Set,
    Slice,
    Function,
    Class,
    Module,
    Code,
    File,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::None => "None",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Float => "float",
            ValueType::Complex => "complex",
            ValueType::Str => "str",
            ValueType::Unicode => "unicode",
            ValueType::Tuple => "tuple",
            ValueType::List => "list",
            ValueType::Dict => "dict",
            ValueType::Set => "set",
            ValueType::Slice => "slice",
            ValueType::Function => "function",
            ValueType::Class => "class",
            ValueType::Module => "module",
            ValueType::Code => "code",
            ValueType::File => "file",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::Bool | ValueType::Int | ValueType::Long | ValueType::Float | ValueType::Complex
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ValueType::Str | ValueType::Unicode)
    }

    /// Whether values of this type can be unpacked into several targets.
    pub fn is_sequence(&self) -> bool {
        matches!(
            self,
            ValueType::Str
                | ValueType::Unicode
                | ValueType::Tuple
                | ValueType::List
                | ValueType::Dict
                | ValueType::Set
                | ValueType::File
        )
    }

    fn numeric_rank(&self) -> Option<u8> {
        match self {
            ValueType::Bool => Some(0),
            ValueType::Int => Some(1),
            ValueType::Long => Some(2),
            ValueType::Float => Some(3),
            ValueType::Complex => Some(4),
            _ => None,
        }
    }

    /// Result type of an arithmetic operator applied to two operands.
    ///
    /// Numbers widen to the richer operand type (bool behaves as int). Equal
    /// non-numeric types keep their type; anything else is indeterminate.
    pub fn coerce(a: ValueType, b: ValueType) -> Option<ValueType> {
        match (a.numeric_rank(), b.numeric_rank()) {
            (Some(ra), Some(rb)) => {
                let wider = if ra >= rb { a } else { b };
                Some(if wider == ValueType::Bool { ValueType::Int } else { wider })
            }
            (None, None) if a == b => Some(a),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a function is bound when looked up through its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    #[default]
    Function,
    Method,
    StaticMethod,
    ClassMethod,
}

/// A function or method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Function {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub kind: FunctionKind,
    /// Declared parameters; taken from `code` when left empty.
    #[serde(default)]
    pub params: Params,
    /// Declared or inferred return type.
    #[serde(default)]
    pub returns: Option<ValueType>,
    #[serde(default)]
    pub always_returns_none: bool,
    #[serde(default)]
    pub code: Option<CodeUnit>,
}

impl Function {
    /// A function described entirely by its code unit.
    pub fn from_code(code: CodeUnit) -> Self {
        let mut function = Function {
            name: code.name.clone(),
            line: code.first_line,
            ..Default::default()
        };
        function.code = Some(code);
        function.derive_from_code();
        function
    }

    pub fn min_args(&self) -> usize {
        self.params.min_args()
    }

    /// `None` means unbounded.
    pub fn max_args(&self) -> Option<usize> {
        self.params.max_args()
    }

    pub fn supports_kwargs(&self) -> bool {
        self.params.var_kwargs
    }

    /// Copy without the code unit, used for inherited method tables.
    pub fn signature(&self) -> Function {
        Function {
            code: None,
            ..self.clone()
        }
    }

    fn derive_from_code(&mut self) {
        let Some(code) = &self.code else { return };
        if self.params == Params::default() {
            self.params = code.params.clone();
        }
        if self.line == 0 {
            self.line = code.first_line;
        }
        if !self.always_returns_none {
            self.always_returns_none = returns_only_none(code);
        }
    }
}

/// True when every return in `code` returns the constant `None`, nothing is
/// yielded and nothing is raised.
fn returns_only_none(code: &CodeUnit) -> bool {
    let Ok(instructions) = decode_all(code) else {
        return false;
    };
    let mut returns = 0;
    for (i, ins) in instructions.iter().enumerate() {
        match ins.opcode {
            Opcode::YieldValue | Opcode::RaiseVarargs => return false,
            Opcode::ReturnValue => {
                let loads_none = i > 0
                    && instructions[i - 1].opcode == Opcode::LoadConst
                    && instructions[i - 1].constant().map_or(false, Constant::is_none);
                if !loads_none {
                    return false;
                }
                returns += 1;
            }
            _ => {}
        }
    }
    returns > 0
}

/// A class and its flattened attribute tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Class {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub line: u32,
    /// Base classes as `Name` (same module) or `module.Name`.
    #[serde(default)]
    pub bases: Vec<String>,
    #[serde(default)]
    pub methods: BTreeMap<String, Function>,
    /// Data members and their best-known types.
    #[serde(default)]
    pub members: BTreeMap<String, Option<ValueType>>,
    /// Skip attribute checks entirely for this class.
    #[serde(default)]
    pub ignore_attrs: bool,
    #[serde(default)]
    pub body: Option<CodeUnit>,

    /// Own and inherited methods, code stripped from inherited ones.
    #[serde(skip)]
    pub effective_methods: BTreeMap<String, Function>,
    #[serde(skip)]
    pub effective_members: BTreeSet<String>,
    /// Some ancestor is a builtin exception type.
    #[serde(skip)]
    pub is_exception: bool,
}

/// Attributes every class object and instance has.
const CLASS_ATTRIBUTES: &[&str] = &[
    "__class__", "__dict__", "__doc__", "__module__", "__name__", "__bases__", "__init__",
    "__repr__", "__str__", "__hash__", "__setattr__", "__getattribute__", "__delattr__",
    "__new__", "__reduce__", "__reduce_ex__", "__weakref__", "__subclasshook__",
];

impl Class {
    pub fn has_attribute(&self, name: &str) -> bool {
        self.effective_methods.contains_key(name)
            || self.effective_members.contains(name)
            || CLASS_ATTRIBUTES.contains(&name)
    }

    pub fn method(&self, name: &str) -> Option<&Function> {
        self.effective_methods.get(name)
    }

    /// Classes with `__getattr__` answer any attribute.
    pub fn checks_attributes(&self) -> bool {
        !self.ignore_attrs
            && !self.effective_methods.contains_key("__getattr__")
            && !self.effective_methods.contains_key("__getattribute__")
    }

    pub fn constructor(&self) -> Option<&Function> {
        self.effective_methods.get("__init__")
    }
}

/// A module-level variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    #[serde(default, rename = "type")]
    pub value_type: Option<ValueType>,
    #[serde(default)]
    pub line: u32,
}

/// One module of the checked program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub functions: BTreeMap<String, Function>,
    #[serde(default)]
    pub classes: BTreeMap<String, Class>,
    #[serde(default)]
    pub variables: BTreeMap<String, Variable>,
    /// Imported modules: local alias to full module name.
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
    /// Other names the module exports.
    #[serde(default)]
    pub attributes: BTreeSet<String>,
    #[serde(default)]
    pub body: Option<CodeUnit>,
}

const MODULE_ATTRIBUTES: &[&str] = &["__name__", "__file__", "__doc__", "__dict__", "__path__", "__builtins__", "__package__", "__all__"];

impl Module {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            filename: format!("{}.py", name.replace('.', "/")),
            ..Default::default()
        }
    }

    /// Whether `name` is bound at module level.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.functions.contains_key(name)
            || self.classes.contains_key(name)
            || self.variables.contains_key(name)
            || self.modules.contains_key(name)
            || self.attributes.contains(name)
            || MODULE_ATTRIBUTES.contains(&name)
    }

    pub fn display_file(&self) -> &str {
        if self.filename.is_empty() {
            &self.name
        } else {
            &self.filename
        }
    }
}

/// Every module of the checked program, by full name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramSymbolTable {
    #[serde(default)]
    pub modules: BTreeMap<String, Module>,
}

impl ProgramSymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a program model written by the dumper.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
        Self::from_json_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid program model {}: {}", path.display(), e))
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        let mut table: ProgramSymbolTable = serde_json::from_str(content)?;
        table.finalize();
        Ok(table)
    }

    pub fn insert(&mut self, module: Module) {
        self.modules.insert(module.name.clone(), module);
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// Resolve a class reference as written in a base list or call site.
    pub fn find_class<'a>(&'a self, from_module: &str, reference: &str) -> Option<(&'a str, &'a Class)> {
        if let Some(module) = self.modules.get(from_module) {
            if let Some(class) = module.classes.get(reference) {
                return Some((module.name.as_str(), class));
            }
        }
        let (module_part, class_name) = reference.rsplit_once('.')?;
        let module = self.modules.get(module_part).or_else(|| {
            // `alias.Class` through an import inside `from_module`
            let target = self.modules.get(from_module)?.modules.get(module_part)?;
            self.modules.get(target)
        })?;
        module
            .classes
            .get(class_name)
            .map(|class| (module.name.as_str(), class))
    }

    /// Fill in derived data. Must run after the table is fully populated.
    pub fn finalize(&mut self) {
        for (module_name, module) in self.modules.iter_mut() {
            if module.name.is_empty() {
                module.name = module_name.clone();
            }
            for (name, function) in module.functions.iter_mut() {
                if function.name.is_empty() {
                    function.name = name.clone();
                }
                function.derive_from_code();
            }
            for (name, class) in module.classes.iter_mut() {
                if class.name.is_empty() {
                    class.name = name.clone();
                }
                for (method_name, method) in class.methods.iter_mut() {
                    if method.name.is_empty() {
                        method.name = method_name.clone();
                    }
                    if method.kind == FunctionKind::Function {
                        method.kind = FunctionKind::Method;
                    }
                    method.derive_from_code();
                }
            }
        }

        let mut resolved = Vec::new();
        for (module_name, module) in &self.modules {
            for class_name in module.classes.keys() {
                let mut flat = Flattened::default();
                let mut visiting = BTreeSet::new();
                self.flatten(module_name, class_name, &mut visiting, &mut flat);
                resolved.push((module_name.clone(), class_name.clone(), flat));
            }
        }
        for (module_name, class_name, flat) in resolved {
            if let Some(class) = self
                .modules
                .get_mut(&module_name)
                .and_then(|m| m.classes.get_mut(&class_name))
            {
                class.effective_methods = flat.methods;
                class.effective_members = flat.members;
                class.is_exception = flat.is_exception;
                if flat.unresolved_base {
                    class.ignore_attrs = true;
                }
            }
        }
    }

    fn flatten(&self, module_name: &str, class_name: &str, visiting: &mut BTreeSet<(String, String)>, flat: &mut Flattened) {
        if !visiting.insert((module_name.to_string(), class_name.to_string())) {
            return;
        }
        let Some(class) = self.modules.get(module_name).and_then(|m| m.classes.get(class_name)) else {
            return;
        };
        // own definitions win over inherited ones
        for (name, method) in &class.methods {
            flat.methods.entry(name.clone()).or_insert_with(|| method.signature());
        }
        flat.members.extend(class.members.keys().cloned());

        for base in &class.bases {
            let base_name = base.rsplit('.').next().unwrap_or(base);
            if base_name == "object" {
                continue;
            }
            match self.find_class(module_name, base) {
                Some((base_module, base_class)) => {
                    self.flatten(base_module, &base_class.name, visiting, flat);
                }
                None if builtins::is_standard_exception(base_name) => flat.is_exception = true,
                None => flat.unresolved_base = true,
            }
        }
    }
}

#[derive(Debug, Default)]
struct Flattened {
    methods: BTreeMap<String, Function>,
    members: BTreeSet<String>,
    is_exception: bool,
    unresolved_base: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Assembler, UnitKind};

    fn method(params: &[&str]) -> Function {
        Function {
            params: Params::positional(params),
            ..Default::default()
        }
    }

    fn sample_table() -> ProgramSymbolTable {
        let mut base = Class::default();
        base.methods.insert("__init__".into(), method(&["self"]));
        base.methods.insert("run".into(), method(&["self", "n"]));
        base.members.insert("count".into(), Some(ValueType::Int));

        let mut derived = Class {
            bases: vec!["Base".into()],
            ..Default::default()
        };
        derived.methods.insert("run".into(), method(&["self"]));

        let mut error = Class {
            bases: vec!["ValueError".into()],
            ..Default::default()
        };
        error.members.insert("code".into(), None);

        let foreign = Class {
            bases: vec!["somewhere.Unknown".into()],
            ..Default::default()
        };

        let mut module = Module::new("pkg");
        module.classes.insert("Base".into(), base);
        module.classes.insert("Derived".into(), derived);
        module.classes.insert("AppError".into(), error);
        module.classes.insert("Foreign".into(), foreign);

        let mut table = ProgramSymbolTable::new();
        table.insert(module);
        table.finalize();
        table
    }

    #[test]
    fn test_flattened_members() {
        let table = sample_table();
        let module = table.module("pkg").unwrap();
        let derived = &module.classes["Derived"];
        assert!(derived.has_attribute("count"));
        assert!(derived.has_attribute("__init__"));
        assert!(!derived.has_attribute("missing"));
        // the override is kept, not the base signature
        assert_eq!(derived.method("run").unwrap().max_args(), Some(1));
        assert_eq!(derived.method("run").unwrap().kind, FunctionKind::Method);
    }

    #[test]
    fn test_exception_and_unresolved_bases() {
        let table = sample_table();
        let module = table.module("pkg").unwrap();
        assert!(module.classes["AppError"].is_exception);
        assert!(module.classes["AppError"].checks_attributes());
        assert!(!module.classes["Foreign"].checks_attributes());
    }

    #[test]
    fn test_function_from_code() {
        let mut asm = Assembler::new("noop", UnitKind::Function);
        asm.params(Params::positional(&["a"])).ret_none();
        let function = Function::from_code(asm.finish().unwrap());
        assert_eq!(function.min_args(), 1);
        assert!(function.always_returns_none);

        let mut asm = Assembler::new("ident", UnitKind::Function);
        asm.params(Params::positional(&["a"])).load_fast("a").ret();
        let function = Function::from_code(asm.finish().unwrap());
        assert!(!function.always_returns_none);
    }

    #[test]
    fn test_coercion() {
        assert_eq!(ValueType::coerce(ValueType::Int, ValueType::Float), Some(ValueType::Float));
        assert_eq!(ValueType::coerce(ValueType::Bool, ValueType::Bool), Some(ValueType::Int));
        assert_eq!(ValueType::coerce(ValueType::Str, ValueType::Str), Some(ValueType::Str));
        assert_eq!(ValueType::coerce(ValueType::Str, ValueType::Int), None);
    }

    #[test]
    fn test_json_model() {
        let json = r#"{
            "modules": {
                "app": {
                    "filename": "app.py",
                    "functions": {"f": {"params": {"names": ["a", "b"], "defaults": 1}}},
                    "variables": {"LIMIT": {"type": "int", "line": 3}},
                    "modules": {"os": "os"}
                }
            }
        }"#;
        let table = ProgramSymbolTable::from_json_str(json).unwrap();
        let app = table.module("app").unwrap();
        assert_eq!(app.name, "app");
        assert_eq!(app.functions["f"].name, "f");
        assert_eq!(app.functions["f"].min_args(), 1);
        assert!(app.has_attribute("LIMIT"));
        assert!(app.has_attribute("os"));
        assert!(!app.has_attribute("nothing"));
    }
}
