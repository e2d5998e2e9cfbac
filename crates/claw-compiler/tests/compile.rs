//! Structural tests on compiled chunks: opcode sequences, operand bytes,
//! pool limits and unrolling decisions.

use claw_compiler::{compile, CompileError};
use claw_runtime::bytecode::{Chunk, OpCode};
use claw_runtime::objects::function;
use claw_syntax::parser;

fn compile_src(source: &str) -> Chunk {
    let (program, diags) = parser::parse(source);
    assert!(!diags.has_errors(), "parse errors: {:?}", diags);
    compile(&program).expect("compile failed")
}

fn compile_err(source: &str) -> CompileError {
    let (program, diags) = parser::parse(source);
    assert!(!diags.has_errors(), "parse errors: {:?}", diags);
    compile(&program).expect_err("expected a compile error")
}

/// Walk a chunk's opcodes (none of these sources emit `Closure`, whose
/// operand width depends on the function constant).
fn opcodes(chunk: &Chunk) -> Vec<OpCode> {
    let code = chunk.code();
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let op = OpCode::try_from(code[offset]).expect("opcode boundary");
        assert_ne!(op, OpCode::Closure, "walker does not handle Closure");
        out.push(op);
        offset += 1 + op.operand_len();
    }
    out
}

#[test]
fn test_print_expression_bytes() {
    let chunk = compile_src("print 7;");
    assert_eq!(
        chunk.code(),
        &[
            u8::from(OpCode::Constant),
            0,
            u8::from(OpCode::Print),
            u8::from(OpCode::Return),
        ]
    );
    assert_eq!(chunk.constants().len(), 1);
    assert_eq!(chunk.constants()[0].as_number(), 7.0);
}

#[test]
fn test_if_else_jump_patching() {
    let chunk = compile_src("if (true) print 1; else print 2;");
    let c = u8::from;
    assert_eq!(
        chunk.code(),
        &[
            c(OpCode::True),
            c(OpCode::JumpIfFalse),
            0,
            7,
            c(OpCode::Pop),
            c(OpCode::Constant),
            0,
            c(OpCode::Print),
            c(OpCode::Jump),
            0,
            4,
            c(OpCode::Pop),
            c(OpCode::Constant),
            1,
            c(OpCode::Print),
            c(OpCode::Return),
        ]
    );
}

#[test]
fn test_while_loop_shape() {
    let chunk = compile_src("while (false) print 1;");
    let ops = opcodes(&chunk);
    assert_eq!(
        ops,
        vec![
            OpCode::False,
            OpCode::JumpIfFalse,
            OpCode::Pop,
            OpCode::Constant,
            OpCode::Print,
            OpCode::Loop,
            OpCode::Pop,
            OpCode::Return,
        ]
    );
    assert_eq!(chunk.loop_count(), 1);
}

#[test]
fn test_loop_offset_arithmetic() {
    // `Loop` subtracts from the pc after its operand; the recorded offset
    // must land exactly on the condition.
    let chunk = compile_src("while (false) print 1;");
    let code = chunk.code();
    let loop_pos = code
        .iter()
        .position(|&b| b == u8::from(OpCode::Loop))
        .expect("loop emitted");
    let offset = ((code[loop_pos + 1] as usize) << 8) | code[loop_pos + 2] as usize;
    assert_eq!(loop_pos + 3 - offset, 0, "back-edge must target offset 0");
}

#[test]
fn test_num_literal_call_folds() {
    let chunk = compile_src("print num(3);");
    assert_eq!(
        opcodes(&chunk),
        vec![OpCode::Constant, OpCode::Print, OpCode::Return]
    );
    // No Call, no GetGlobal: the fold elides the native dispatch.
    assert_eq!(chunk.constants().len(), 1);
}

#[test]
fn test_num_non_literal_still_calls() {
    let chunk = compile_src("print num(x);");
    assert!(opcodes(&chunk).contains(&OpCode::Call));
}

#[test]
fn test_local_scope_pops() {
    let chunk = compile_src("{ let x = 10; }");
    let ops = opcodes(&chunk);
    // Slot push, init store, scope-exit pop.
    assert_eq!(
        ops,
        vec![
            OpCode::Nil,
            OpCode::Constant,
            OpCode::SetLocal,
            OpCode::Pop,
            OpCode::Pop,
            OpCode::Return,
        ]
    );
}

#[test]
fn test_global_define() {
    let chunk = compile_src("let g = 1;");
    assert_eq!(
        opcodes(&chunk),
        vec![OpCode::Constant, OpCode::DefineGlobal, OpCode::Return]
    );
}

#[test]
fn test_compound_member_assign_lowering() {
    let chunk = compile_src("let o = nil; o.x += 1;");
    let ops = opcodes(&chunk);
    assert!(ops.contains(&OpCode::EnsurePropertyDefault));
    assert!(ops.contains(&OpCode::GetProperty));
    assert!(ops.contains(&OpCode::SetProperty));
    // The object expression is stashed once: exactly one load of `o` per
    // use site, no re-evaluation sequence.
    let ensure_pos = ops
        .iter()
        .position(|&o| o == OpCode::EnsurePropertyDefault)
        .unwrap();
    let get_pos = ops.iter().position(|&o| o == OpCode::GetProperty).unwrap();
    assert!(ensure_pos < get_pos, "default is seeded before the read");
}

#[test]
fn test_compound_index_assign_lowering() {
    let chunk = compile_src("let m = nil; m[\"k\"] <<= 2;");
    let ops = opcodes(&chunk);
    assert!(ops.contains(&OpCode::EnsureIndexDefault));
    assert!(ops.contains(&OpCode::GetIndex));
    assert!(ops.contains(&OpCode::SetIndex));

    // Operator kind 7 (<<) rides in the operand byte.
    let code = chunk.code();
    let pos = code
        .iter()
        .position(|&b| b == u8::from(OpCode::EnsureIndexDefault))
        .unwrap();
    assert_eq!(code[pos + 1], 7);
}

#[test]
fn test_unrolling_decisions() {
    // Trip count 3: unrolled, no back-edge.
    let chunk = compile_src("for (let i = 0; i < 3; i = i + 1) { print i; }");
    assert_eq!(chunk.loop_count(), 0);

    // Trip count 16 inclusive: still unrolled.
    let chunk = compile_src("for (let i = 1; i <= 16; ++i) { print i; }");
    assert_eq!(chunk.loop_count(), 0);

    // Trip count 17: a real loop.
    let chunk = compile_src("for (let i = 0; i < 17; i = i + 1) { print i; }");
    assert_eq!(chunk.loop_count(), 1);

    // Negative step: a real loop.
    let chunk = compile_src("for (let i = 10; i < 20; i = i + -1) { print i; }");
    assert_eq!(chunk.loop_count(), 1);

    // Dynamic bound: a real loop.
    let chunk = compile_src("let n = 3; for (let i = 0; i < n; i = i + 1) { print i; }");
    assert_eq!(chunk.loop_count(), 1);
}

#[test]
fn test_constant_pool_limit() {
    let mut source = String::new();
    for i in 0..300 {
        source.push_str(&format!("print {};\n", i));
    }
    assert!(matches!(
        compile_err(&source),
        CompileError::TooManyConstants { .. }
    ));
}

#[test]
fn test_duplicate_local_declaration() {
    assert!(matches!(
        compile_err("{ let a = 1; let a = 2; }"),
        CompileError::DuplicateDeclaration { .. }
    ));
}

#[test]
fn test_shadowing_in_inner_scope_is_fine() {
    compile_src("{ let a = 1; { let a = 2; print a; } }");
}

#[test]
fn test_argument_limit() {
    let args = vec!["0"; 256].join(", ");
    let source = format!("f({});", args);
    assert!(matches!(
        compile_err(&source),
        CompileError::TooManyArguments { .. }
    ));
}

#[test]
fn test_function_and_upvalue_metadata() {
    let chunk =
        compile_src("fn make() { let x = 1; fn inner() { return x; } return inner; }");
    let make_val = chunk
        .constants()
        .iter()
        .find(|c| c.is_vm_function())
        .expect("make constant in script chunk");
    let make = function::as_function(make_val.as_object());
    assert_eq!(make.name, "make");
    assert_eq!(make.arity, 0);
    assert_eq!(make.upvalue_count, 0);

    let inner_val = make
        .chunk
        .constants()
        .iter()
        .find(|c| c.is_vm_function())
        .expect("inner constant in make chunk");
    let inner = function::as_function(inner_val.as_object());
    assert_eq!(inner.name, "inner");
    assert_eq!(inner.upvalue_count, 1, "inner captures x");
}

#[test]
fn test_lambda_compiles_to_closure_value() {
    let chunk = compile_src("let f = fn (a, b) { return a + b; };");
    let lambda = chunk
        .constants()
        .iter()
        .find(|c| c.is_vm_function())
        .expect("lambda constant");
    let f = function::as_function(lambda.as_object());
    assert_eq!(f.name, "<lambda>");
    assert_eq!(f.arity, 2);
}

#[test]
fn test_script_always_ends_with_return() {
    for source in ["", "print 1;", "let a = 2;"] {
        let chunk = compile_src(source);
        assert_eq!(
            chunk.code().last().copied(),
            Some(u8::from(OpCode::Return)),
            "source: {:?}",
            source
        );
    }
}
