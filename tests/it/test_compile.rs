//! Compiler and disassembler tests

use eva::{
    vm::{
        code::{Op, OpCodeOperands},
        disasm,
        heap::Object,
    },
    Eva, EvaError,
};

#[test]
fn disassembly_listing() -> Result<(), EvaError> {
    let mut eva = Eva::new();
    let main = eva.compile("(var x 5) (set x (+ x 10)) x")?;

    // globals 0..=4 are the built-ins
    let expected = "\
---------------- Disassembly: main ----------------
0000    01 00       CONST               0 (5)
0002    0A 05       SET_GLOBAL          5 (x)
0004    0B          POP
0005    09 05       GET_GLOBAL          5 (x)
0007    01 01       CONST               1 (10)
0009    02          ADD
000A    0A 05       SET_GLOBAL          5 (x)
000C    0B          POP
000D    09 05       GET_GLOBAL          5 (x)
000F    00          HALT
";
    assert_eq!(eva.disassemble(main)?, expected);

    Ok(())
}

#[test]
fn nested_functions_are_listed() -> Result<(), EvaError> {
    let mut eva = Eva::new();
    let main = eva.compile("(def sq (x) (* x x)) (def cube (x) (* x (sq x)))")?;
    let s = eva.disassemble(main)?;

    let headers = s
        .lines()
        .filter(|ln| ln.contains("Disassembly:"))
        .collect::<Vec<_>>();
    assert_eq!(
        headers,
        vec![
            "---------------- Disassembly: main ----------------",
            "---------------- Disassembly: sq ----------------",
            "---------------- Disassembly: cube ----------------",
        ]
    );

    assert!(s.contains("GET_LOCAL           1 (x)"));
    assert!(s.contains("SCOPE_EXIT          2"));
    assert!(s.contains("CONST               0 (<fn sq/1>)"));

    Ok(())
}

/// The decoder and the VM share the opcode table, so every compiled code object must decode into
/// instructions that exactly cover its bytes, with jumps landing on instruction boundaries.
#[test]
fn decoded_stream_covers_bytecode() -> Result<(), EvaError> {
    let src = r#"
        (var total 0)
        (def make-adder (n) (lambda (x) (+ x n)))
        (var add5 (make-adder 5))
        (for (var i 0) (< i 10) (set i (+ i 1))
          (if (> i 4)
            (set total (add5 total))
            (set total (+ total i))))
        (begin
          (var s "a")
          (while (< s "aaa") (set s (+ s "a")))
          s)
    "#;

    let mut eva = Eva::new();
    let main = eva.compile(src)?;

    let mut n_code = 0;
    for (_id, co) in eva.heap().code_objects() {
        n_code += 1;
        let insts = disasm::decode(co)?;

        let covered = insts.iter().map(|i| i.len()).sum::<usize>();
        assert_eq!(covered, co.bytes().len(), "`{}`", co.name);

        for inst in &insts {
            assert_eq!(inst.op as u8, co.bytes()[inst.offset]);
            assert_eq!(inst.operands.len(), inst.op.operand_width());

            if let OpCodeOperands::Two = inst.op.operands() {
                let target = inst.address().unwrap() as usize;
                assert!(
                    insts.iter().any(|i| i.offset == target),
                    "jump into the middle of an instruction in `{}`",
                    co.name
                );
            }
        }

        let last = insts.last().map(|i| i.op);
        if co.name == "main" {
            assert_eq!(last, Some(Op::Halt));
        } else {
            assert_eq!(last, Some(Op::Return));
        }
    }

    // main, make-adder, lambda
    assert_eq!(n_code, 3);
    assert!(matches!(eva.heap()[main], Object::Code(_)));

    let value = eva.run(main)?;
    assert_eq!(eva.to_string_lossy(value), "aaa");
    assert_eq!(eva.display(eva.global("total").unwrap()), "35");

    Ok(())
}

#[test]
fn closure_cells_layout() -> Result<(), EvaError> {
    let src = r#"
        (def adder (x)
          (lambda (y)
            (lambda (z) (+ x (+ y z)))))
    "#;

    let mut eva = Eva::new();
    eva.compile(src)?;

    let cells = eva
        .heap()
        .code_objects()
        .map(|(_, co)| (co.name.clone(), co.cell_names().to_vec(), co.free_count()))
        .collect::<Vec<_>>();

    // inner functions are finished first
    assert_eq!(
        cells,
        vec![
            (
                "lambda".to_string(),
                vec!["x".to_string(), "y".to_string()],
                2
            ),
            (
                "lambda".to_string(),
                vec!["x".to_string(), "y".to_string()],
                1
            ),
            ("adder".to_string(), vec!["x".to_string()], 0),
            ("main".to_string(), vec![], 0),
        ]
    );

    Ok(())
}
