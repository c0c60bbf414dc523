//! Workspace persistence tests: the XML archive, the CDR wire format
//! through ⎕TF, the )DUMP text image, and the command-surface operations.

use apl_runtime::archive;
use apl_runtime::{Cell, Interpreter, Value};

fn eval(interp: &mut Interpreter, line: &str) -> Option<Value> {
    interp
        .eval_line(line)
        .unwrap_or_else(|e| panic!("{}: {}", line, e))
}

#[test]
fn test_save_load_through_interpreter() {
    let mut i = Interpreter::new();
    eval(&mut i, "N←2 3⍴⍳6");
    eval(&mut i, "S←'some text'");
    eval(&mut i, "NEST←(1 2)(3 4 5)");
    eval(&mut i, "⎕FX 'Z←A PLUS B' 'Z←A+B'");
    i.ws.wsid = "RT".to_string();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rt.xml");
    archive::save_file(&i.ws, &i.si_lines(), &path).unwrap();

    let mut j = Interpreter::new();
    let loaded = archive::load_file(&path).unwrap();
    archive::install(&mut j.ws, loaded).unwrap();

    assert_eq!(j.ws.wsid, "RT");
    for name in ["N", "S", "NEST"] {
        let a = i.ws.symbols.value_of(name).unwrap();
        let b = j.ws.symbols.value_of(name).unwrap();
        assert!(
            Value::tolerantly_equal(&a, &b, 0.0),
            "{} cell-by-cell after round trip",
            name
        );
    }

    // the reloaded function is usable
    let z = eval(&mut j, "2 PLUS 3").unwrap();
    assert_eq!(z.ravel()[0], Cell::Int(5));
}

#[test]
fn test_copy_and_pcopy() {
    let mut src = Interpreter::new();
    eval(&mut src, "A←1");
    eval(&mut src, "B←2");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("src.xml");
    archive::save_file(&src.ws, &[], &path).unwrap();

    let mut dst = Interpreter::new();
    eval(&mut dst, "A←99");
    let loaded = archive::load_file(&path).unwrap();
    archive::copy_names(&mut dst.ws, loaded, None, true).unwrap();
    // )PCOPY protects A, copies B
    assert_eq!(
        dst.ws.symbols.value_of("A").unwrap().ravel()[0],
        Cell::Int(99)
    );
    assert_eq!(
        dst.ws.symbols.value_of("B").unwrap().ravel()[0],
        Cell::Int(2)
    );

    let loaded = archive::load_file(&path).unwrap();
    archive::copy_names(&mut dst.ws, loaded, Some(&["A"]), false).unwrap();
    // )COPY overwrites
    assert_eq!(
        dst.ws.symbols.value_of("A").unwrap().ravel()[0],
        Cell::Int(1)
    );
}

#[test]
fn test_dump_reproduces_workspace() {
    let mut i = Interpreter::new();
    eval(&mut i, "N←1 2 3");
    eval(&mut i, "M←2 2⍴4 5 6 7");
    eval(&mut i, "T←'it''s'");
    eval(&mut i, "⎕FX 'Z←NEG B' 'Z←-B'");

    let lines = archive::dump_lines(&i.ws, &[]);

    // executing the dump in a clear workspace reproduces the source
    let mut j = Interpreter::new();
    for line in &lines {
        if line.starts_with('⍝') {
            continue;
        }
        j.eval_line(line).unwrap_or_else(|e| panic!("{}: {}", line, e));
    }
    for name in ["N", "M", "T"] {
        let a = i.ws.symbols.value_of(name).unwrap();
        let b = j.ws.symbols.value_of(name).unwrap();
        assert!(Value::tolerantly_equal(&a, &b, 0.0), "{} differs", name);
    }
    let z = eval(&mut j, "NEG 5").unwrap();
    assert_eq!(z.ravel()[0], Cell::Int(-5));
}

#[test]
fn test_quad_tf_cdr_round_trip() {
    let mut i = Interpreter::new();
    eval(&mut i, "V←3 5 7 9");
    let bytes_val = eval(&mut i, "3 ⎕TF 'V'").unwrap();
    let bytes: Vec<u8> = bytes_val
        .ravel()
        .iter()
        .map(|c| match c {
            Cell::Int(n) => *n as u8,
            _ => panic!("byte vector expected"),
        })
        .collect();
    let decoded = apl_runtime::cdr::decode(&bytes).unwrap();
    let v = i.ws.symbols.value_of("V").unwrap();
    assert!(Value::tolerantly_equal(&decoded, &v, 0.0));
}

#[test]
fn test_cdr_all_simple_types_round_trip() {
    use apl_runtime::cdr;
    let values = vec![
        Value::int_vector(&[0, 1, 1, 0]),                    // type 0
        Value::int_vector(&[5, -6, 1000]),                   // type 1
        Value::vector(vec![Cell::Float(1.5), Cell::Float(-0.25)]), // type 2
        Value::vector(vec![Cell::Complex(apl_core::Complex64::new(1.0, 2.0))]), // type 3
        Value::char_vector("plain"),                         // type 4
        Value::char_vector("⍺⍵"),                            // type 5
        Value::vector(vec![
            Cell::Pointer(std::sync::Arc::new(Value::int_vector(&[1, 2]))),
            Cell::Pointer(std::sync::Arc::new(Value::char_vector("x"))),
        ]), // type 7
    ];
    for v in values {
        let bytes = cdr::encode(&v).unwrap();
        let back = cdr::decode(&bytes).unwrap();
        assert!(
            Value::tolerantly_equal(&v, &back, 0.0),
            "round trip failed for {:?}",
            v
        );
    }
}

#[test]
fn test_command_listings() {
    let mut i = Interpreter::new();
    eval(&mut i, "X←1");
    eval(&mut i, "Y←2");
    eval(&mut i, "⎕FX 'Z←F B' 'Z←B'");
    assert_eq!(i.ws.vars(), vec!["X", "Y"]);
    assert_eq!(i.ws.fns(), vec!["F"]);

    let missed = i.ws.erase(&["X", "GONE"]);
    assert_eq!(missed, vec!["GONE"]);
    assert_eq!(i.ws.vars(), vec!["Y"]);
}

#[test]
fn test_wsid_and_clear() {
    let mut i = Interpreter::new();
    eval(&mut i, "X←1");
    let old = i.ws.set_wsid("MINE");
    assert_eq!(old, "CLEAR WS");
    i.ws.clear();
    assert_eq!(i.ws.wsid, "CLEAR WS");
    assert!(i.ws.symbols.value_of("X").is_none());
}

#[test]
fn test_latent_expression_runs() {
    let mut i = Interpreter::new();
    eval(&mut i, "⎕LX←'Z←6×7'");
    i.run_latent().unwrap();
    assert_eq!(
        i.ws.symbols.value_of("Z").unwrap().ravel()[0],
        Cell::Int(42)
    );
}

#[test]
fn test_quad_nc_and_ex() {
    let mut i = Interpreter::new();
    eval(&mut i, "X←1");
    assert_eq!(eval(&mut i, "⎕NC 'X'").unwrap().ravel()[0], Cell::Int(2));
    assert_eq!(eval(&mut i, "⎕NC 'ZZ'").unwrap().ravel()[0], Cell::Int(0));
    assert_eq!(eval(&mut i, "⎕EX 'X'").unwrap().ravel()[0], Cell::Int(1));
    assert_eq!(eval(&mut i, "⎕NC 'X'").unwrap().ravel()[0], Cell::Int(0));
}

#[test]
fn test_quad_cr_canonical_text() {
    let mut i = Interpreter::new();
    eval(&mut i, "⎕FX 'Z←A PLUS B' 'Z←A+B'");
    let cr = eval(&mut i, "⎕CR 'PLUS'").unwrap();
    assert_eq!(cr.rank(), 2);
    let first_row: String = (0..cr.shape()[1])
        .map(|c| match cr.cell(c) {
            Cell::Char(ch) => *ch,
            _ => ' ',
        })
        .collect();
    assert_eq!(first_row.trim_end(), "Z←A PLUS B");
}

#[test]
fn test_quad_ucs_round_trip() {
    let mut i = Interpreter::new();
    let codes = eval(&mut i, "⎕UCS 'AB'").unwrap();
    assert_eq!(codes.ravel(), Value::int_vector(&[65, 66]).ravel());
    let chars = eval(&mut i, "⎕UCS 65 66").unwrap();
    assert_eq!(chars.as_string().unwrap(), "AB");
}

#[test]
fn test_archive_si_is_textual() {
    let mut i = Interpreter::new();
    eval(&mut i, "⎕FX 'Z←BAD B' 'Z←B÷0'");
    let _ = i.eval_line("BAD 1");
    let xml = archive::save_xml(&i.ws, &i.si_lines());
    assert!(xml.contains("BAD[1]"));
    let loaded = archive::load_xml(&xml).unwrap();
    assert!(loaded.si.iter().any(|t| t.contains("BAD[1]")));
    i.si_clear();
}
