//! Integration tests for the abstract interpreter, driven through the
//! public `Runner` with code units built by the assembler.

use bytelint::bytecode::{decode_all, Assembler, CompareOp, Constant, Opcode, Params, UnitKind};
use bytelint::config::Config;
use bytelint::detect::{CheckResult, DiagnosticKind, Runner};
use bytelint::symbols::{Class, Function, FunctionKind, Module, ProgramSymbolTable, ValueType, Variable};

fn function(name: &str, params: &[&str]) -> Assembler {
    let mut asm = Assembler::new(name, UnitKind::Function);
    asm.first_line(1).params(Params::positional(params)).line(2);
    asm
}

fn method(name: &str, params: &[&str]) -> Assembler {
    let mut asm = Assembler::new(name, UnitKind::Method);
    asm.first_line(10).params(Params::positional(params)).line(11);
    asm
}

fn table_with(module: Module) -> ProgramSymbolTable {
    let mut table = ProgramSymbolTable::new();
    table.insert(module);
    table.finalize();
    table
}

fn check(table: &ProgramSymbolTable) -> CheckResult {
    Runner::new(table, &Config::default()).run().expect("run should succeed")
}

fn check_with(table: &ProgramSymbolTable, config: &Config) -> CheckResult {
    Runner::new(table, config).run().expect("run should succeed")
}

/// Module `m` holding the function built by `asm`.
fn module_with(asm: Assembler) -> Module {
    let unit = asm.finish().unwrap();
    let mut module = Module::new("m");
    module.functions.insert(unit.name.clone(), Function::from_code(unit));
    module
}

fn class_with(name: &str, methods: Vec<Assembler>) -> Class {
    let mut class = Class {
        name: name.into(),
        line: 9,
        ..Default::default()
    };
    for asm in methods {
        let unit = asm.finish().unwrap();
        class.methods.insert(unit.name.clone(), Function::from_code(unit));
    }
    class
}

fn scale() -> Function {
    Function {
        name: "scale".into(),
        line: 1,
        params: Params {
            names: vec!["value".into(), "factor".into()],
            defaults: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn messages(result: &CheckResult, kind: DiagnosticKind) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|d| d.kind == kind)
        .map(|d| d.message())
        .collect()
}

#[test]
fn test_extended_operand_round_trip() {
    let mut asm = function("wide", &[]);
    asm.emit_arg(Opcode::BuildTuple, 70_000).ret();
    let unit = asm.finish().unwrap();

    let instructions = decode_all(&unit).unwrap();
    assert_eq!(instructions.len(), 2);
    assert_eq!(instructions[0].opcode, Opcode::BuildTuple);
    assert_eq!(instructions[0].arg, 70_000);
    assert_eq!(instructions[0].next_offset, 6);
    assert_eq!(instructions[1].opcode, Opcode::ReturnValue);
}

#[test]
fn test_argument_count_law() {
    let target = scale();

    for (count, bad) in [(0, true), (1, false), (2, false), (3, true)] {
        let mut asm = function("caller", &[]);
        asm.load_global("scale");
        for _ in 0..count {
            asm.load_int(1);
        }
        asm.call(count, 0).pop().ret_none();

        let mut module = Module::new("m");
        module.functions.insert("scale".into(), target.clone());
        module
            .functions
            .insert("caller".into(), Function::from_code(asm.finish().unwrap()));
        let result = check(&table_with(module));

        let found = messages(&result, DiagnosticKind::InvalidArgCount);
        if bad {
            assert_eq!(
                found,
                vec![format!("Invalid arguments to (scale), got {}, expected between 1 and 2", count)]
            );
        } else {
            assert!(found.is_empty(), "{} args: {:?}", count, found);
        }
    }
}

#[test]
fn test_format_count_law() {
    let mut asm = function("show", &["x"]);
    asm.load_str("%s %s").load_fast("x").build_tuple(1).emit(Opcode::BinaryModulo).ret();
    let mut module = Module::new("m");
    module
        .functions
        .insert("show".into(), Function::from_code(asm.finish().unwrap()));
    let result = check(&table_with(module));

    assert_eq!(
        messages(&result, DiagnosticKind::FormatArgCount),
        vec!["Format string argument count (2) doesn't match arguments (1)"]
    );
}

#[test]
fn test_unreachable_reported_once() {
    let mut asm = function("early", &[]);
    asm.load_int(1).ret();
    asm.line(3).load_int(2).store_fast("x");
    asm.line(4).load_int(3).store_fast("y");
    asm.ret_none();
    let mut module = Module::new("m");
    module
        .functions
        .insert("early".into(), Function::from_code(asm.finish().unwrap()));
    let result = check(&table_with(module));

    let unreachable: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::Unreachable)
        .collect();
    assert_eq!(unreachable.len(), 1);
    assert_eq!(unreachable[0].line, 3);
}

#[test]
fn test_trailing_epilogue_is_not_unreachable() {
    let mut asm = function("plain", &[]);
    asm.load_int(1).ret();
    asm.ret_none();
    let mut module = Module::new("m");
    module
        .functions
        .insert("plain".into(), Function::from_code(asm.finish().unwrap()));
    let result = check(&table_with(module));

    assert_eq!(result.count(DiagnosticKind::Unreachable), 0);
}

#[test]
fn test_comparison_discarded_has_no_effect() {
    let mut asm = function("cmp", &["a"]);
    asm.load_fast("a").load_int(3).compare(CompareOp::Gt).pop().ret_none();
    let mut module = Module::new("m");
    module
        .functions
        .insert("cmp".into(), Function::from_code(asm.finish().unwrap()));
    let result = check(&table_with(module));

    assert_eq!(result.count(DiagnosticKind::NoEffect), 1);
}

fn base_and_child(calls_base: bool) -> ProgramSymbolTable {
    let mut base_init = method("__init__", &["self"]);
    base_init.ret_none();
    let mut base = Class {
        name: "Base".into(),
        line: 1,
        ..Default::default()
    };
    base.methods
        .insert("__init__".into(), Function::from_code(base_init.finish().unwrap()));

    let mut child_init = method("__init__", &["self"]);
    if calls_base {
        child_init
            .load_global("Base")
            .load_attr("__init__")
            .load_fast("self")
            .call(1, 0)
            .pop();
    }
    child_init.ret_none();
    let mut child = Class {
        name: "Child".into(),
        line: 20,
        bases: vec!["Base".into()],
        ..Default::default()
    };
    child
        .methods
        .insert("__init__".into(), Function::from_code(child_init.finish().unwrap()));

    let mut module = Module::new("m");
    module.classes.insert("Base".into(), base);
    module.classes.insert("Child".into(), child);
    table_with(module)
}

#[test]
fn test_base_init_not_called() {
    let result = check(&base_and_child(false));
    assert_eq!(
        messages(&result, DiagnosticKind::BaseInitNotCalled),
        vec!["Base class (Base) __init__() not called"]
    );
    let d = result
        .diagnostics
        .iter()
        .find(|d| d.kind == DiagnosticKind::BaseInitNotCalled)
        .unwrap();
    assert_eq!(d.unit, "m.Child.__init__");

    let result = check(&base_and_child(true));
    assert_eq!(result.count(DiagnosticKind::BaseInitNotCalled), 0);
}

#[test]
fn test_classmethod_first_argument() {
    let mut body = method("make", &["self"]);
    body.ret_none();
    let mut make = Function::from_code(body.finish().unwrap());
    make.kind = FunctionKind::ClassMethod;

    let mut class = Class {
        name: "Factory".into(),
        line: 9,
        ..Default::default()
    };
    class.methods.insert("make".into(), make);
    let mut module = Module::new("m");
    module.classes.insert("Factory".into(), class);
    let result = check(&table_with(module));

    assert_eq!(
        messages(&result, DiagnosticKind::NotFirstArgument),
        vec!["cls is not first class method argument"]
    );
}

#[test]
fn test_unused_import_in_module_body() {
    let mut body = Assembler::new("<module>", UnitKind::Module);
    body.load_int(-1).load_none().import("os").store_name("os");
    body.line(2).load_int(-1).load_none().import("sys").store_name("sys");
    body.line(3).load_name("sys").load_attr("argv").pop();
    body.ret_none();

    let mut module = Module::new("m");
    module.body = Some(body.finish().unwrap());
    let result = check(&table_with(module));

    assert_eq!(messages(&result, DiagnosticKind::UnusedImport), vec!["Imported module (os) not used"]);
}

#[test]
fn test_malformed_unit_does_not_stop_the_run() {
    let mut broken = function("broken", &[]);
    broken.emit_arg(Opcode::LoadConst, 9).ret();
    let mut fine = function("fine", &["a", "b"]);
    fine.load_fast("a").ret();

    let mut module = Module::new("m");
    module
        .functions
        .insert("broken".into(), Function::from_code(broken.finish().unwrap()));
    module
        .functions
        .insert("fine".into(), Function::from_code(fine.finish().unwrap()));
    let result = check(&table_with(module));

    assert_eq!(result.count(DiagnosticKind::InternalError), 1);
    assert_eq!(messages(&result, DiagnosticKind::UnusedParameter), vec!["Parameter (b) not used"]);
}

#[test]
fn test_runs_are_idempotent() {
    let table = base_and_child(false);
    let config = Config::default();
    let first = Runner::new(&table, &config).run().unwrap();
    let second = Runner::new(&table, &config).run().unwrap();
    assert_eq!(first.diagnostics, second.diagnostics);
    assert_eq!(first.units, second.units);
}

#[test]
fn test_unpack_into_attribute_keeps_later_locals_checked() {
    let mut update = method("update", &["self", "pair"]);
    update
        .load_fast("pair")
        .unpack(2)
        .load_fast("self")
        .store_attr("x")
        .store_fast("y");
    update.line(12).load_int(1).store_fast("z");
    update.ret_none();

    let mut module = Module::new("m");
    module.classes.insert("Cart".into(), class_with("Cart", vec![update]));
    let result = check(&table_with(module));

    assert_eq!(messages(&result, DiagnosticKind::UnusedLocal), vec!["Local variable (z) not used"]);
    let unused = result
        .diagnostics
        .iter()
        .find(|d| d.kind == DiagnosticKind::UnusedLocal)
        .unwrap();
    assert_eq!(unused.line, 12);
}

#[test]
fn test_unknown_attribute_on_builtin_type() {
    let mut asm = function("f", &[]);
    asm.build_list(0).store_fast("x");
    asm.line(3).load_fast("x").load_attr("apend").pop();
    asm.line(4).load_fast("x").load_attr("append").pop();
    asm.ret_none();
    let result = check(&table_with(module_with(asm)));

    assert_eq!(
        messages(&result, DiagnosticKind::NoObjectAttribute),
        vec!["Object (x) has no attribute (apend)"]
    );
}

#[test]
fn test_unknown_class_attribute() {
    let mut asm = function("f", &[]);
    asm.load_global("Point").load_attr("x").pop();
    asm.line(3).load_global("Point").load_attr("z").pop();
    asm.ret_none();
    let mut module = module_with(asm);
    let mut point = class_with("Point", Vec::new());
    point.members.insert("x".into(), Some(ValueType::Int));
    module.classes.insert("Point".into(), point);
    let result = check(&table_with(module));

    assert_eq!(messages(&result, DiagnosticKind::NoClassAttribute), vec!["No class attribute (z) found"]);
}

#[test]
fn test_unknown_module_attribute() {
    let mut helper = function("helper", &[]);
    helper.ret_none();
    let util = Module {
        name: "util".into(),
        filename: "util.py".into(),
        ..module_with(helper)
    };

    let mut asm = function("f", &[]);
    asm.load_global("util").load_attr("helper").pop();
    asm.line(3).load_global("util").load_attr("helpr").pop();
    asm.ret_none();
    let mut module = module_with(asm);
    module.modules.insert("util".into(), "util".into());

    let mut table = ProgramSymbolTable::new();
    table.insert(util);
    table.insert(module);
    table.finalize();
    let result = check(&table);

    assert_eq!(messages(&result, DiagnosticKind::NoModuleAttribute), vec!["No module attribute (helpr) found"]);
    assert_eq!(result.count(DiagnosticKind::NoGlobal), 0);
}

#[test]
fn test_too_many_references() {
    let mut asm = function("f", &["obj"]);
    asm.load_fast("obj");
    for attr in ["a", "b", "c", "d", "e"] {
        asm.load_attr(attr);
    }
    asm.pop().ret_none();
    let result = check(&table_with(module_with(asm)));
    assert_eq!(
        messages(&result, DiagnosticKind::TooManyReferences),
        vec!["Too many attribute references (6 > 5)"]
    );

    // the receiver gets one extra reference
    let mut walk = method("walk", &["self"]);
    walk.load_fast("self");
    for attr in ["a", "b", "c", "d", "e", "f"] {
        walk.load_attr(attr);
    }
    walk.pop().ret_none();
    let mut tree = class_with("Tree", vec![walk]);
    tree.ignore_attrs = true;
    let mut module = Module::new("m");
    module.classes.insert("Tree".into(), tree);
    let result = check(&table_with(module));
    assert_eq!(
        messages(&result, DiagnosticKind::TooManyReferences),
        vec!["Too many attribute references (7 > 6)"]
    );
}

#[test]
fn test_attribute_set_outside_constructor() {
    let mut init = method("__init__", &["self"]);
    init.load_int(0).load_fast("self").store_attr("a").ret_none();
    let mut reset = method("reset", &["self"]);
    reset.load_int(1).load_fast("self").store_attr("a");
    reset.line(12).load_int(2).load_fast("self").store_attr("b");
    reset.ret_none();

    let mut module = Module::new("m");
    module.classes.insert("Counter".into(), class_with("Counter", vec![init, reset]));
    let table = table_with(module);

    assert_eq!(check(&table).count(DiagnosticKind::AttributeOutsideInit), 0);

    let config = Config {
        init_attrs: true,
        ..Default::default()
    };
    let result = check_with(&table, &config);
    assert_eq!(
        messages(&result, DiagnosticKind::AttributeOutsideInit),
        vec!["Attribute (b) set outside constructor"]
    );
}

#[test]
fn test_method_used_as_attribute_before_branch() {
    let mut ready = method("ready", &["self"]);
    ready.load_int(1).ret();
    let mut run = method("run", &["self"]);
    let done = run.label();
    run.load_fast("self").load_attr("ready").jump(Opcode::PopJumpIfFalse, done);
    run.bind(done).ret_none();

    let mut module = Module::new("m");
    module.classes.insert("Job".into(), class_with("Job", vec![ready, run]));
    let result = check(&table_with(module));

    assert_eq!(
        messages(&result, DiagnosticKind::MethodAsAttribute),
        vec!["Using method (ready) as an attribute (not invoked)"]
    );
}

#[test]
fn test_arguments_without_constructor() {
    let mut asm = function("f", &[]);
    asm.load_global("Plain").call(0, 0).pop();
    asm.line(3).load_global("Plain").load_int(1).call(1, 0).pop();
    asm.ret_none();
    let mut module = module_with(asm);
    module.classes.insert("Plain".into(), class_with("Plain", Vec::new()));
    let result = check(&table_with(module));

    assert_eq!(
        messages(&result, DiagnosticKind::NoConstructor),
        vec!["Instantiating an object with arguments, but no constructor"]
    );
    let d = result
        .diagnostics
        .iter()
        .find(|d| d.kind == DiagnosticKind::NoConstructor)
        .unwrap();
    assert_eq!(d.line, 3);
}

#[test]
fn test_always_none_return_value_used() {
    let mut log = function("log", &["msg"]);
    log.load_fast("msg").pop().ret_none();
    let mut asm = function("f", &[]);
    asm.load_global("log").load_str("a").call(1, 0).pop();
    asm.line(3).load_global("log").load_str("b").call(1, 0).store_fast("result");
    asm.line(4).load_fast("result").ret();

    let mut module = module_with(asm);
    module
        .functions
        .insert("log".into(), Function::from_code(log.finish().unwrap()));
    let result = check(&table_with(module));

    assert_eq!(
        messages(&result, DiagnosticKind::NoneReturnValue),
        vec!["Using the return value from (log) which is always None"]
    );
}

#[test]
fn test_local_shadows_global() {
    let mut total = function("total", &[]);
    total.load_int(0).ret();
    let mut asm = function("f", &[]);
    asm.load_int(0).store_fast("total");
    asm.line(3).load_fast("total").ret();

    let mut module = module_with(asm);
    module
        .functions
        .insert("total".into(), Function::from_code(total.finish().unwrap()));
    let result = check(&table_with(module));

    assert_eq!(
        messages(&result, DiagnosticKind::ShadowsGlobal),
        vec!["Local variable (total) shadows global defined on line 1"]
    );
}

#[test]
fn test_no_global_found() {
    let mut asm = function("f", &[]);
    asm.load_global("missing").pop();
    asm.line(3).load_global("len").pop();
    asm.ret_none();
    let result = check(&table_with(module_with(asm)));

    assert_eq!(messages(&result, DiagnosticKind::NoGlobal), vec!["No global (missing) found"]);
}

#[test]
fn test_global_not_declared() {
    let mut asm = function("f", &[]);
    asm.load_int(1).store_global("counter");
    asm.line(3).load_int(2).store_global("limit");
    asm.ret_none();
    let mut module = module_with(asm);
    module.variables.insert(
        "limit".into(),
        Variable {
            value_type: Some(ValueType::Int),
            line: 1,
        },
    );
    let result = check(&table_with(module));

    assert_eq!(
        messages(&result, DiagnosticKind::GlobalNotDeclared),
        vec!["Global variable (counter) not defined in module scope"]
    );
}

#[test]
fn test_unary_plus_advisory() {
    let mut asm = function("f", &["x"]);
    asm.load_fast("x").emit(Opcode::UnaryPositive).pop();
    asm.line(3).load_int(1).emit(Opcode::UnaryPositive).pop();
    asm.ret_none();
    let result = check(&table_with(module_with(asm)));

    assert_eq!(messages(&result, DiagnosticKind::UnaryPlus), vec!["Operator (+) normally has no effect"]);
}

#[test]
fn test_unknown_keyword_argument() {
    let mut asm = function("caller", &[]);
    asm.load_global("scale").load_int(1).load_str("factr").load_int(2).call(1, 1).pop();
    asm.line(3).load_global("scale").load_int(1).load_str("factor").load_int(2).call(1, 1).pop();
    asm.ret_none();
    let mut module = module_with(asm);
    module.functions.insert("scale".into(), scale());
    let result = check(&table_with(module));

    assert_eq!(
        messages(&result, DiagnosticKind::UnknownKeyword),
        vec!["Function (scale) has no keyword argument (factr)"]
    );
    assert_eq!(result.count(DiagnosticKind::InvalidArgCount), 0);
}

#[test]
fn test_redefined_function() {
    let mut first = Assembler::new("helper", UnitKind::Function);
    first.first_line(1).line(2).ret_none();
    let mut second = Assembler::new("helper", UnitKind::Function);
    second.first_line(5).line(6).load_int(1).ret();

    let mut body = Assembler::new("<module>", UnitKind::Module);
    body.load_const(Constant::Code(Box::new(first.finish().unwrap())))
        .emit_arg(Opcode::MakeFunction, 0)
        .store_name("helper");
    body.line(5)
        .load_const(Constant::Code(Box::new(second.finish().unwrap())))
        .emit_arg(Opcode::MakeFunction, 0)
        .store_name("helper");
    body.ret_none();

    let mut module = Module::new("m");
    module.body = Some(body.finish().unwrap());
    let result = check(&table_with(module));

    assert_eq!(
        messages(&result, DiagnosticKind::Redefined),
        vec!["Redefining function (helper) that was defined on line 1"]
    );
}

#[test]
fn test_init_returns_value() {
    let mut init = method("__init__", &["self"]);
    init.load_int(1).ret();
    let mut module = Module::new("m");
    module.classes.insert("Widget".into(), class_with("Widget", vec![init]));
    let result = check(&table_with(module));

    assert_eq!(messages(&result, DiagnosticKind::InitReturnsValue), vec!["__init__() should not return a value"]);
}

#[test]
fn test_too_many_returns() {
    let mut asm = function("pick", &["a", "b"]);
    let second = asm.label();
    let third = asm.label();
    asm.load_fast("a").jump(Opcode::PopJumpIfFalse, second);
    asm.line(3).load_int(1).ret();
    asm.bind(second).line(4).load_fast("b").jump(Opcode::PopJumpIfFalse, third);
    asm.line(5).load_int(2).ret();
    asm.bind(third).line(6).load_int(3).ret();
    let table = table_with(module_with(asm));

    assert_eq!(check(&table).count(DiagnosticKind::TooManyReturns), 0);

    let config = Config {
        max_returns: 2,
        ..Default::default()
    };
    let result = check_with(&table, &config);
    assert_eq!(
        messages(&result, DiagnosticKind::TooManyReturns),
        vec!["Function (pick) has too many returns (3)"]
    );
    assert_eq!(result.count(DiagnosticKind::Unreachable), 0);
}

#[test]
fn test_stub_body_parameters_are_not_reported() {
    let mut stub = function("area", &["shape", "scale"]);
    stub.load_global("NotImplementedError").raise(1);
    let result = check(&table_with(module_with(stub)));
    assert_eq!(result.count(DiagnosticKind::UnusedParameter), 0);

    let mut real = function("area", &["shape", "scale"]);
    real.load_fast("shape").ret();
    let result = check(&table_with(module_with(real)));
    assert_eq!(messages(&result, DiagnosticKind::UnusedParameter), vec!["Parameter (scale) not used"]);
}
