//! End-to-end evaluation tests: source text through tokenizer, parser,
//! prefix parser, primitives and operators.

use apl_runtime::{Cell, ErrorKind, Interpreter, Value};

fn eval(interp: &mut Interpreter, line: &str) -> Value {
    interp
        .eval_line(line)
        .unwrap_or_else(|e| panic!("{}: {}", line, e))
        .unwrap_or_else(|| panic!("{}: no value", line))
}

fn eval_new(line: &str) -> Value {
    eval(&mut Interpreter::new(), line)
}

fn display(interp: &mut Interpreter, line: &str) -> String {
    interp.eval_line(line).unwrap();
    interp.ws.take_output().join("\n")
}

#[test]
fn test_plus_reduce() {
    let z = eval_new("+/ 1 2 3 4 5");
    assert_eq!(z.ravel()[0], Cell::Int(15));
    assert!(z.is_scalar());
}

#[test]
fn test_reshape_iota() {
    let mut i = Interpreter::new();
    let z = eval(&mut i, "2 3 ⍴ ⍳6");
    assert_eq!(z.shape().items(), &[2, 3]);
    assert_eq!(
        z.ravel(),
        Value::int_vector(&[1, 2, 3, 4, 5, 6]).ravel()
    );
    assert_eq!(display(&mut i, "2 3 ⍴ ⍳6"), "1 2 3\n4 5 6");
}

#[test]
fn test_outer_product_table() {
    let z = eval_new("(⍳5) ∘.× ⍳5");
    assert_eq!(z.shape().items(), &[5, 5]);
    for i in 0..5i64 {
        for j in 0..5i64 {
            assert_eq!(
                z.ravel()[(i * 5 + j) as usize],
                Cell::Int((i + 1) * (j + 1))
            );
        }
    }
}

#[test]
fn test_lambda_power() {
    let z = eval_new("{⍵+1}⍣5 ⊢ 0");
    assert_eq!(z.ravel()[0], Cell::Int(5));
}

#[test]
fn test_catenate_strings() {
    let z = eval_new("'HELLO' , ' ' , 'WORLD'");
    assert_eq!(z.element_count(), 11);
    assert_eq!(z.as_string().unwrap(), "HELLO WORLD");
}

#[test]
fn test_tolerant_equality_with_ct() {
    let z = eval_new("⎕CT ← 1E¯10 ◇ 1 = 1 + 1E¯12");
    assert_eq!(z.ravel()[0], Cell::Int(1));
}

#[test]
fn test_reverse_matrix() {
    let mut i = Interpreter::new();
    assert_eq!(display(&mut i, "⌽ 2 3 ⍴ ⍳6"), "3 2 1\n6 5 4");
    assert_eq!(display(&mut i, "⊖ 2 3 ⍴ ⍳6"), "4 5 6\n1 2 3");
}

#[test]
fn test_assignment_is_silent() {
    let mut i = Interpreter::new();
    i.eval_line("X←41").unwrap();
    assert!(i.ws.take_output().is_empty());
    let z = eval(&mut i, "X+1");
    assert_eq!(z.ravel()[0], Cell::Int(42));
}

#[test]
fn test_multi_assignment() {
    let mut i = Interpreter::new();
    i.eval_line("(A B C)←10 20 30").unwrap();
    assert_eq!(eval(&mut i, "B").ravel()[0], Cell::Int(20));
}

#[test]
fn test_indexed_read_and_assign() {
    let mut i = Interpreter::new();
    i.eval_line("V←10 20 30 40").unwrap();
    assert_eq!(eval(&mut i, "V[2]").ravel()[0], Cell::Int(20));
    let z = eval(&mut i, "V[4 1]");
    assert_eq!(z.ravel(), Value::int_vector(&[40, 10]).ravel());
    i.eval_line("V[2]←99").unwrap();
    assert_eq!(
        eval(&mut i, "V").ravel(),
        Value::int_vector(&[10, 99, 30, 40]).ravel()
    );
}

#[test]
fn test_selective_assignment_with_parens() {
    let mut i = Interpreter::new();
    i.eval_line("A←1 2 3").unwrap();
    i.eval_line("(A[2])←7").unwrap();
    assert_eq!(
        eval(&mut i, "A").ravel(),
        Value::int_vector(&[1, 7, 3]).ravel()
    );
}

#[test]
fn test_matrix_indexing() {
    let mut i = Interpreter::new();
    i.eval_line("M←2 3⍴⍳6").unwrap();
    assert_eq!(eval(&mut i, "M[2;3]").ravel()[0], Cell::Int(6));
    let z = eval(&mut i, "M[1;]");
    assert_eq!(z.ravel(), Value::int_vector(&[1, 2, 3]).ravel());
}

#[test]
fn test_io_zero() {
    let mut i = Interpreter::new();
    i.eval_line("⎕IO←0").unwrap();
    let z = eval(&mut i, "⍳3");
    assert_eq!(z.ravel(), Value::int_vector(&[0, 1, 2]).ravel());
}

#[test]
fn test_defined_function_dyadic() {
    let mut i = Interpreter::new();
    i.eval_line("⎕FX 'Z←A PLUS B' 'Z←A+B'").unwrap();
    i.ws.take_output();
    let z = eval(&mut i, "3 PLUS 4");
    assert_eq!(z.ravel()[0], Cell::Int(7));
}

#[test]
fn test_defined_function_reduce_eoc() {
    // a user-defined operand forces the EOC continuation path
    let mut i = Interpreter::new();
    i.eval_line("⎕FX 'Z←A PLUS B' 'Z←A+B'").unwrap();
    let z = eval(&mut i, "PLUS/ 1 2 3 4");
    assert_eq!(z.ravel()[0], Cell::Int(10));
}

#[test]
fn test_defined_function_each_eoc() {
    let mut i = Interpreter::new();
    i.eval_line("⎕FX 'Z←DOUBLE B' 'Z←B+B'").unwrap();
    let z = eval(&mut i, "DOUBLE¨ 1 2 3");
    assert_eq!(z.ravel(), Value::int_vector(&[2, 4, 6]).ravel());
}

#[test]
fn test_nested_eoc_operators() {
    // both operators run their continuations: DOUBLE¨ inside +/
    let mut i = Interpreter::new();
    i.eval_line("⎕FX 'Z←DOUBLE B' 'Z←B+B'").unwrap();
    let z = eval(&mut i, "+/ DOUBLE¨ 1 2 3");
    assert_eq!(z.ravel()[0], Cell::Int(12));
}

#[test]
fn test_lambda_each() {
    let z = eval_new("{⍵×⍵}¨ 1 2 3 4");
    assert_eq!(z.ravel(), Value::int_vector(&[1, 4, 9, 16]).ravel());
}

#[test]
fn test_defined_outer_product() {
    let mut i = Interpreter::new();
    i.eval_line("⎕FX 'Z←A TIMES B' 'Z←A×B'").unwrap();
    let z = eval(&mut i, "(⍳3) ∘.TIMES ⍳3");
    assert_eq!(z.shape().items(), &[3, 3]);
    assert_eq!(z.ravel()[8], Cell::Int(9));
}

#[test]
fn test_inner_product() {
    let z = eval_new("1 2 3 +.× 4 5 6");
    assert_eq!(z.ravel()[0], Cell::Int(32));
}

#[test]
fn test_labels_and_branching() {
    let mut i = Interpreter::new();
    i.eval_line("⎕FX 'Z←COUNT N' 'Z←0' 'AGAIN: Z←Z+1' '→(Z<N)/AGAIN'")
        .unwrap();
    i.ws.take_output();
    let z = eval(&mut i, "COUNT 5");
    assert_eq!(z.ravel()[0], Cell::Int(5));
}

#[test]
fn test_branch_empty_continues() {
    let mut i = Interpreter::new();
    let z = eval(&mut i, "→⍬ ◇ 7");
    assert_eq!(z.ravel()[0], Cell::Int(7));
}

#[test]
fn test_error_suspends_and_si_resumes() {
    let mut i = Interpreter::new();
    i.eval_line("⎕FX 'Z←BAD B' 'Z←B÷0' 'Z←42'").unwrap();
    i.ws.take_output();
    let err = i.eval_line("BAD 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Domain);

    // the frame stays for )SI
    let si = i.si_lines();
    assert!(si.iter().any(|l| l.contains("BAD[1]")), "si: {:?}", si);

    // → LINE resumes past the failing line
    let z = eval(&mut i, "→2");
    assert_eq!(z.ravel()[0], Cell::Int(42));
    i.si_clear();
    assert_eq!(i.si_depth(), 0);
}

#[test]
fn test_si_clear_restores_shadows() {
    let mut i = Interpreter::new();
    i.eval_line("B←100").unwrap();
    i.eval_line("⎕FX 'Z←F B' 'Z←B÷0'").unwrap();
    let _ = i.eval_line("F 1");
    i.si_clear();
    // the global B shadowed by the argument is visible again
    assert_eq!(eval(&mut i, "B").ravel()[0], Cell::Int(100));
}

#[test]
fn test_execute() {
    let z = eval_new("⍎'1+2'");
    assert_eq!(z.ravel()[0], Cell::Int(3));
}

#[test]
fn test_quad_ea_catches() {
    let mut i = Interpreter::new();
    let z = eval(&mut i, "'99' ⎕EA '1÷0'");
    assert_eq!(z.ravel()[0], Cell::Int(99));
    let z = eval(&mut i, "'99' ⎕EA '1+1'");
    assert_eq!(z.ravel()[0], Cell::Int(2));
}

#[test]
fn test_quad_ec_reports() {
    let mut i = Interpreter::new();
    let z = eval(&mut i, "⎕EC '2×3'");
    assert_eq!(z.ravel()[0], Cell::Int(1)); // rc: value
    assert_eq!(z.ravel()[2], Cell::Int(6)); // the result, a simple scalar
    let z = eval(&mut i, "⎕EC '1÷0'");
    assert_eq!(z.ravel()[0], Cell::Int(0)); // rc: error
    match &z.ravel()[1] {
        Cell::Pointer(et) => {
            assert_eq!(et.ravel(), Value::int_vector(&[5, 4]).ravel())
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_quad_em_et_after_error() {
    let mut i = Interpreter::new();
    let _ = i.eval_line("1÷0");
    let et = eval(&mut i, "⎕ET");
    assert_eq!(et.ravel(), Value::int_vector(&[5, 4]).ravel());
    let em = eval(&mut i, "⎕EM");
    assert!(em.as_string().unwrap().contains("DOMAIN ERROR"));
}

#[test]
fn test_interrupt_unwinds() {
    let mut i = Interpreter::new();
    i.ws.request_interrupt();
    let err = i.eval_line("+/⍳100").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Interrupt);
    i.si_clear();
}

#[test]
fn test_scan_and_nwise() {
    let z = eval_new("+\\1 2 3 4");
    assert_eq!(z.ravel(), Value::int_vector(&[1, 3, 6, 10]).ravel());
    let z = eval_new("2 +/ 1 2 3 4 5");
    assert_eq!(z.ravel(), Value::int_vector(&[3, 5, 7, 9]).ravel());
}

#[test]
fn test_compress_expand() {
    let z = eval_new("1 0 1 / 7 8 9");
    assert_eq!(z.ravel(), Value::int_vector(&[7, 9]).ravel());
    let z = eval_new("1 0 1 \\ 7 9");
    assert_eq!(z.ravel(), Value::int_vector(&[7, 0, 9]).ravel());
}

#[test]
fn test_commute() {
    let z = eval_new("2 -⍨ 10");
    assert_eq!(z.ravel()[0], Cell::Int(8));
    let z = eval_new("-⍨ 3"); // 3-3
    assert_eq!(z.ravel()[0], Cell::Int(0));
}

#[test]
fn test_rank_operator() {
    let z = eval_new("+/⍤1 ⊢ 2 3⍴⍳6");
    assert_eq!(z.ravel(), Value::int_vector(&[6, 15]).ravel());
}

#[test]
fn test_power_inverse() {
    let z = eval_new("⌽⍣¯1 ⊢ ⌽ 1 2 3");
    assert_eq!(z.ravel(), Value::int_vector(&[1, 2, 3]).ravel());
}

#[test]
fn test_reduce_identity_on_empty() {
    assert_eq!(eval_new("+/⍳0").ravel()[0], Cell::Int(0));
    assert_eq!(eval_new("×/⍳0").ravel()[0], Cell::Int(1));
}

#[test]
fn test_empty_boundaries() {
    let z = eval_new("⍳0");
    assert!(z.is_empty());
    assert_eq!(z.prototype_cell(), Cell::Int(0));

    let z = eval_new("0⍴'AB'");
    assert!(z.is_empty());
    assert_eq!(z.prototype_cell(), Cell::Char(' '));

    let z = eval_new("0↑'AB'");
    assert!(z.is_empty());
    assert_eq!(z.prototype_cell(), Cell::Char(' '));
}

#[test]
fn test_grade_sorts() {
    let z = eval_new("⍋ 3 1 2");
    assert_eq!(z.ravel(), Value::int_vector(&[2, 3, 1]).ravel());
}

#[test]
fn test_enclose_disclose() {
    let z = eval_new("⊃⊂1 2 3");
    assert_eq!(z.ravel(), Value::int_vector(&[1, 2, 3]).ravel());
}

#[test]
fn test_transpose_round_trip() {
    let z = eval_new("⍉⍉ 2 3⍴⍳6");
    assert_eq!(
        z.ravel(),
        Value::int_vector(&[1, 2, 3, 4, 5, 6]).ravel()
    );
}

#[test]
fn test_stranding_variables() {
    let mut i = Interpreter::new();
    i.eval_line("A←1 ◇ B←2").unwrap();
    let z = eval(&mut i, "A B 3");
    assert_eq!(z.ravel(), Value::int_vector(&[1, 2, 3]).ravel());
}

#[test]
fn test_value_error_names_symbol() {
    let mut i = Interpreter::new();
    let err = i.eval_line("1+NOPE").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Value);
    assert_eq!(err.info.as_deref(), Some("NOPE"));
    i.si_clear();
}

#[test]
fn test_length_error_in_dyadic() {
    let mut i = Interpreter::new();
    let err = i.eval_line("1 2 + 1 2 3").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Length);
    i.si_clear();
}

#[test]
fn test_system_variable_shadowing_in_function() {
    let mut i = Interpreter::new();
    i.eval_line("⎕FX 'Z←F B;⎕IO' '⎕IO←0' 'Z←⍳B'").unwrap();
    i.ws.take_output();
    let z = eval(&mut i, "F 3");
    assert_eq!(z.ravel(), Value::int_vector(&[0, 1, 2]).ravel());
    // restored outside
    let z = eval(&mut i, "⍳3");
    assert_eq!(z.ravel(), Value::int_vector(&[1, 2, 3]).ravel());
}

#[test]
fn test_deal_and_roll_in_range() {
    let mut i = Interpreter::new();
    i.eval_line("⎕RL←7").unwrap();
    let z = eval(&mut i, "10?10");
    let mut got: Vec<i64> = z
        .ravel()
        .iter()
        .map(|c| match c {
            Cell::Int(n) => *n,
            _ => panic!("ints expected"),
        })
        .collect();
    got.sort();
    assert_eq!(got, (1..=10).collect::<Vec<i64>>());

    let z = eval(&mut i, "?1 1 1");
    assert_eq!(z.ravel(), Value::int_vector(&[1, 1, 1]).ravel());
}

#[test]
fn test_decode_encode() {
    assert_eq!(eval_new("2⊥1 0 1 1").ravel()[0], Cell::Int(11));
    let z = eval_new("24 60 60⊤3723");
    assert_eq!(z.ravel(), Value::int_vector(&[1, 2, 3]).ravel());
}

#[test]
fn test_format_monadic() {
    let z = eval_new("⍕ 2.5");
    assert_eq!(z.as_string().unwrap(), "2.5");
}

#[test]
fn test_stop_set_suspends() {
    let mut i = Interpreter::new();
    i.eval_line("⎕FX 'Z←F B' 'Z←B+1' 'Z←Z+1'").unwrap();
    i.eval_line("S∆F←2").unwrap();
    let err = i.eval_line("F 1").unwrap_err();
    assert!(err.info.as_deref().unwrap_or("").contains("F[2]"));
    // clearing the stop set allows completion
    i.si_clear();
    i.eval_line("S∆F←⍬").unwrap();
    let z = eval(&mut i, "F 1");
    assert_eq!(z.ravel()[0], Cell::Int(3));
}
