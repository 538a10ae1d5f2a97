//! Deterministic MIR pretty-printer.
//!
//! Pure with respect to its input: equal functions produce equal bytes. One
//! statement per line, one textual block per basic block; the caller picks
//! the base indentation.

use crate::mir::Function;
use std::fmt;

/// Write a readable listing of `fcn` to `w`, indented by `indent` spaces.
pub fn dump_function(w: &mut dyn fmt::Write, fcn: &Function, indent: usize) -> fmt::Result {
    let ind = " ".repeat(indent);
    for (id, ty) in fcn.locals.iter_enumerated() {
        writeln!(w, "{}let _{}: {};", ind, id.0, ty)?;
    }
    for (id, initial) in fcn.drop_flags.iter_enumerated() {
        writeln!(w, "{}let df{} = {};", ind, id.0, initial)?;
    }
    for (id, block) in fcn.blocks.iter_enumerated() {
        writeln!(w, "{}bb{}: {{", ind, id.0)?;
        for stmt in &block.statements {
            writeln!(w, "{}    {}", ind, stmt)?;
        }
        writeln!(w, "{}    {}", ind, block.terminator)?;
        writeln!(w, "{}}}", ind)?;
    }
    Ok(())
}

/// Convenience wrapper returning the dump as a string.
pub fn dump_to_string(fcn: &Function) -> String {
    let mut out = String::new();
    dump_function(&mut out, fcn, 0).expect("writing to a String cannot fail");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::*;
    use rillc_hir::{CoreType, TypeRef};

    #[test]
    fn dump_is_deterministic() {
        let mut fcn = Function::new();
        let l0 = fcn.new_local(TypeRef::primitive(CoreType::U32));
        let bb = fcn.new_block();
        fcn.blocks[bb].statements.push(Statement::Assign {
            dst: LValue::new_local(l0),
            src: RValue::Constant(Constant::Uint { v: 7, t: CoreType::U32 }),
        });
        fcn.blocks[bb].terminator = Terminator::Return;

        let a = dump_to_string(&fcn);
        let b = dump_to_string(&fcn.clone());
        assert_eq!(a, b);
        assert!(a.contains("bb0: {"));
        assert!(a.contains("let _0: u32;"));
    }
}
