//! The Alchemist facade: one entry point over the whole pipeline.
//!
//! `compile` runs lexing, parsing, type checking, and code generation
//! in sequence, short-circuiting on the first failure. Stage failures
//! come back as data (`CoreError::Syntax` / `CoreError::Type`), never
//! as panics; a compile call either completes or fails atomically.

use crate::codegen_wasm::{self, MemoryLayout};
use crate::diagnostic::Diagnostic;
use crate::error::CoreError;
use crate::parser;
use crate::typecheck;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Pages the emitted module's memory import starts with.
    pub initial_pages: u32,
    /// Page ceiling the memory import declares.
    pub max_pages: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            initial_pages: 2,
            max_pages: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompilationArtifact {
    /// The emitted module, binary form.
    pub wasm: Vec<u8>,
    /// The emitted module, text form; what the command surface writes
    /// to the `.wat` sibling artifact.
    pub module_text: String,
    /// First byte past the module's static data; runtime heaps must
    /// start at or above this.
    pub data_end: u32,
}

pub fn compile(source: &str, options: &CompileOptions) -> Result<CompilationArtifact, CoreError> {
    let module = parser::parse(source).map_err(|d| syntax_error(source, d))?;
    let hir = typecheck::check(&module).map_err(|d| type_error(source, d))?;
    let generated = codegen_wasm::generate(
        &hir,
        &MemoryLayout {
            initial_pages: options.initial_pages,
            max_pages: options.max_pages,
        },
    );
    // A freshly encoded module always renders; failure here is a
    // codegen defect, not an input error.
    let module_text = wasmprinter::print_bytes(&generated.wasm)
        .expect("emitted module renders as text");
    Ok(CompilationArtifact {
        wasm: generated.wasm,
        module_text,
        data_end: generated.data_end,
    })
}

fn syntax_error(source: &str, diagnostic: Diagnostic) -> CoreError {
    let (line, col) = diagnostic.position(source);
    CoreError::Syntax {
        line,
        col,
        message: diagnostic.message,
    }
}

fn type_error(source: &str, diagnostic: Diagnostic) -> CoreError {
    let (line, col) = diagnostic.position(source);
    CoreError::Type {
        line,
        col,
        message: diagnostic.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmi::{Engine, Instance, Linker, Memory, MemoryType, Module, Store};

    fn compile_default(source: &str) -> CompilationArtifact {
        compile(source, &CompileOptions::default()).expect("compile should succeed")
    }

    /// Minimal host: the imported memory plus no-op AetherLink
    /// callbacks, enough to execute pure compiled code.
    fn instantiate(artifact: &CompilationArtifact) -> (Store<()>, Memory, Instance) {
        let engine = Engine::default();
        let module = Module::new(&engine, &artifact.wasm).expect("module");
        let mut store = Store::new(&engine, ());
        let memory = Memory::new(&mut store, MemoryType::new(2, Some(64))).expect("memory");
        let mut linker = Linker::new(&engine);
        linker.define("env", "memory", memory).expect("define memory");
        linker
            .func_wrap("host", "log", |_: i32, _: i32| {})
            .expect("define log");
        linker
            .func_wrap("host", "write_file", |_: i32, _: i32, _: i32, _: i32| {})
            .expect("define write_file");
        linker
            .func_wrap("env", "abort", |_: i32| {})
            .expect("define abort");
        let instance = linker
            .instantiate(&mut store, &module)
            .expect("instantiate")
            .start(&mut store)
            .expect("start");
        (store, memory, instance)
    }

    #[test]
    fn emitted_module_is_valid_wasm() {
        let artifact = compile_default(
            "export fn add(a: i32, b: i32) -> i32 { return a + b; }",
        );
        wasmparser::Validator::new()
            .validate_all(&artifact.wasm)
            .expect("emitted module validates");
        assert!(artifact.module_text.contains("(module"));
        assert!(artifact.module_text.contains("add"));
    }

    #[test]
    fn add_round_trip() {
        let artifact = compile_default(
            "export fn add(a: i32, b: i32) -> i32 { return a + b; }",
        );
        let (mut store, _, instance) = instantiate(&artifact);
        let add = instance
            .get_typed_func::<(i32, i32), i32>(&store, "add")
            .expect("exported add");
        assert_eq!(add.call(&mut store, (40, 2)).expect("call"), 42);
        assert_eq!(add.call(&mut store, (-5, 5)).expect("call"), 0);
    }

    #[test]
    fn division_and_shift_follow_operand_signedness() {
        let artifact = compile_default(
            "export fn sdiv(a: i32, b: i32) -> i32 { return a / b; }\n\
             export fn udiv(a: u32, b: u32) -> u32 { return a / b; }\n\
             export fn sshr(a: i32, b: i32) -> i32 { return a >> b; }\n\
             export fn ushr(a: u32, b: u32) -> u32 { return a >> b; }",
        );
        let (mut store, _, instance) = instantiate(&artifact);
        let sdiv = instance
            .get_typed_func::<(i32, i32), i32>(&store, "sdiv")
            .expect("sdiv");
        let udiv = instance
            .get_typed_func::<(i32, i32), i32>(&store, "udiv")
            .expect("udiv");
        let sshr = instance
            .get_typed_func::<(i32, i32), i32>(&store, "sshr")
            .expect("sshr");
        let ushr = instance
            .get_typed_func::<(i32, i32), i32>(&store, "ushr")
            .expect("ushr");
        assert_eq!(sdiv.call(&mut store, (-7, 2)).expect("call"), -3);
        // 0x8000_0000 / 2 unsigned
        assert_eq!(
            udiv.call(&mut store, (i32::MIN, 2)).expect("call"),
            0x4000_0000
        );
        assert_eq!(sshr.call(&mut store, (-8, 1)).expect("call"), -4);
        assert_eq!(
            ushr.call(&mut store, (i32::MIN, 1)).expect("call"),
            0x4000_0000
        );
    }

    #[test]
    fn bit_utilities_match_their_identities() {
        let artifact = compile_default(
            "export fn pc(x: u32) -> u32 { return popcount(x); }\n\
             export fn lz(x: u32) -> u32 { return clz(x); }\n\
             export fn tz(x: u32) -> u32 { return ctz(x); }\n\
             export fn rl(x: u32, n: u32) -> u32 { return rotl(x, n); }\n\
             export fn mk(s: u32, n: u32) -> u32 { return mask(s, n); }",
        );
        let (mut store, _, instance) = instantiate(&artifact);
        let pc = instance.get_typed_func::<i32, i32>(&store, "pc").expect("pc");
        let lz = instance.get_typed_func::<i32, i32>(&store, "lz").expect("lz");
        let tz = instance.get_typed_func::<i32, i32>(&store, "tz").expect("tz");
        let rl = instance
            .get_typed_func::<(i32, i32), i32>(&store, "rl")
            .expect("rl");
        let mk = instance
            .get_typed_func::<(i32, i32), i32>(&store, "mk")
            .expect("mk");

        assert_eq!(pc.call(&mut store, 0).expect("call"), 0);
        assert_eq!(pc.call(&mut store, -1).expect("call"), 32);
        assert_eq!(lz.call(&mut store, 0).expect("call"), 32);
        assert_eq!(tz.call(&mut store, 0).expect("call"), 32);
        for x in [0x1234_5678_u32 as i32, -1, 0, 42] {
            assert_eq!(rl.call(&mut store, (x, 0)).expect("call"), x);
            assert_eq!(rl.call(&mut store, (x, 32)).expect("call"), x);
        }
        assert_eq!(mk.call(&mut store, (0, 32)).expect("call"), -1);
        assert_eq!(mk.call(&mut store, (0, 0)).expect("call"), 0);
        assert_eq!(mk.call(&mut store, (4, 4)).expect("call"), 0xF0);
    }

    #[test]
    fn control_flow_loops_and_globals() {
        let artifact = compile_default(
            "let mut counter: i32 = 0;\n\
             export fn bump() -> i32 { counter = counter + 1; return counter; }\n\
             export fn sum_to(n: i32) -> i32 {\n\
                 let mut acc: i32 = 0;\n\
                 let mut i: i32 = 0;\n\
                 while i < n {\n\
                     i = i + 1;\n\
                     if i % 2 == 0 { continue; }\n\
                     acc = acc + i;\n\
                 }\n\
                 return acc;\n\
             }",
        );
        let (mut store, _, instance) = instantiate(&artifact);
        let bump = instance.get_typed_func::<(), i32>(&store, "bump").expect("bump");
        assert_eq!(bump.call(&mut store, ()).expect("call"), 1);
        assert_eq!(bump.call(&mut store, ()).expect("call"), 2);
        let sum_to = instance
            .get_typed_func::<i32, i32>(&store, "sum_to")
            .expect("sum_to");
        // 1 + 3 + 5 + 7 + 9
        assert_eq!(sum_to.call(&mut store, 10).expect("call"), 25);
    }

    #[test]
    fn indirect_calls_dispatch_through_the_table() {
        let artifact = compile_default(
            "fn double(x: i32) -> i32 { return x * 2; }\n\
             fn square(x: i32) -> i32 { return x * x; }\n\
             export fn apply(which: i32, x: i32) -> i32 {\n\
                 let mut f: fnref(i32) -> i32 = &double;\n\
                 if which == 1 { f = &square; }\n\
                 return f(x);\n\
             }",
        );
        let (mut store, _, instance) = instantiate(&artifact);
        let apply = instance
            .get_typed_func::<(i32, i32), i32>(&store, "apply")
            .expect("apply");
        assert_eq!(apply.call(&mut store, (0, 7)).expect("call"), 14);
        assert_eq!(apply.call(&mut store, (1, 7)).expect("call"), 49);
    }

    #[test]
    fn pointer_stores_land_in_linear_memory() {
        let artifact = compile_default(
            "export fn poke(p: ptr<i32>) { p[0] = 42; (p + 1)[0] = 7; }",
        );
        let (mut store, memory, instance) = instantiate(&artifact);
        let poke = instance.get_typed_func::<i32, ()>(&store, "poke").expect("poke");
        poke.call(&mut store, 2048).expect("call");
        let data = memory.data(&store);
        assert_eq!(i32::from_le_bytes(data[2048..2052].try_into().unwrap()), 42);
        assert_eq!(i32::from_le_bytes(data[2052..2056].try_into().unwrap()), 7);
    }

    #[test]
    fn casts_are_explicit_and_exact() {
        let artifact = compile_default(
            "export fn widen(x: i32) -> i64 { return x as i64; }\n\
             export fn narrow(x: f64) -> i32 { return x as i32; }\n\
             export fn bits(x: i32) -> i32 { return (x as u32 >> 31u) as i32; }",
        );
        let (mut store, _, instance) = instantiate(&artifact);
        let widen = instance
            .get_typed_func::<i32, i64>(&store, "widen")
            .expect("widen");
        assert_eq!(widen.call(&mut store, -1).expect("call"), -1i64);
        let narrow = instance
            .get_typed_func::<f64, i32>(&store, "narrow")
            .expect("narrow");
        assert_eq!(narrow.call(&mut store, 3.9).expect("call"), 3);
        let bits = instance
            .get_typed_func::<i32, i32>(&store, "bits")
            .expect("bits");
        assert_eq!(bits.call(&mut store, -1).expect("call"), 1);
        assert_eq!(bits.call(&mut store, 1).expect("call"), 0);
    }

    #[test]
    fn float_arithmetic_round_trips() {
        let artifact = compile_default(
            "export fn mean(a: f64, b: f64) -> f64 { return (a + b) / 2.0; }",
        );
        let (mut store, _, instance) = instantiate(&artifact);
        let mean = instance
            .get_typed_func::<(f64, f64), f64>(&store, "mean")
            .expect("mean");
        assert_eq!(mean.call(&mut store, (1.0, 2.0)).expect("call"), 1.5);
    }

    #[test]
    fn programs_with_strings_validate() {
        let artifact = compile_default(
            "export fn main() -> i32 { log(\"starting up\"); return 0; }",
        );
        wasmparser::Validator::new()
            .validate_all(&artifact.wasm)
            .expect("emitted module validates");
        assert!(artifact.data_end > 1024);
    }

    #[test]
    fn syntax_errors_carry_positions() {
        let err = compile("fn f( {", &CompileOptions::default()).unwrap_err();
        assert!(err.is_syntax());
        let rendered = err.to_string();
        assert!(rendered.contains("syntax error at 1:"), "{rendered}");
    }

    #[test]
    fn type_errors_short_circuit_before_codegen() {
        let err = compile(
            "fn f(a: i32, b: u32) -> i32 { return a + b; }",
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert!(err.is_type());
        assert!(err.to_string().contains("explicit cast"));
    }

    #[test]
    fn memory_import_is_sized_by_options() {
        let artifact = compile(
            "export fn id(x: i32) -> i32 { return x; }",
            &CompileOptions { initial_pages: 3, max_pages: 9 },
        )
        .expect("compile");
        assert!(artifact.module_text.contains("memory"));
        assert!(artifact.module_text.contains('3'));
        assert!(artifact.module_text.contains('9'));
    }

    #[test]
    fn two_compiles_share_no_state() {
        let a = compile_default("export fn f() -> i32 { return 1; }");
        let b = compile_default("export fn f() -> i32 { return 1; }");
        assert_eq!(a.wasm, b.wasm);
    }
}
