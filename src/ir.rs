use crate::{
    driver::Dialect,
    error::Diagnostics,
    lex::Identifier,
    source::Located,
    symbol::{Census, SymbolId},
};
use std::{
    fmt::{self, Display},
    rc::Rc,
};

/// Cantidad de registros físicos de la máquina virtual.
pub const REG_FILE: u8 = 32;

/// Unidad de compilación: el resultado completo de una corrida fuente→IR.
#[derive(Debug)]
pub struct Unit {
    pub name: String,
    pub dialect: Dialect,
    pub subs: Vec<Subroutine>,
    pub census: Census,
    pub warnings: Diagnostics,
}

#[derive(Debug)]
pub struct Subroutine {
    /// `None` para la unidad implícita que agrupa sentencias top-level.
    pub name: Option<Identifier>,
    pub symbol: Option<SymbolId>,
    pub nodes: Vec<Located<Node>>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Inst {
        opcode: Identifier,
        operands: Vec<Located<Operand>>,
    },

    Label(SymbolId),

    Const {
        symbol: SymbolId,
        value: ConstValue,
    },

    Decl(SymbolId),
}

/// Los operandos refieren a símbolos por identidad, nunca por nombre.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Phys(PhysReg),
    Sym(SymbolId),
    Int(i64),
    Str(Rc<str>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Str(Rc<str>),
}

/// Un registro físico del archivo de registros.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PhysReg(pub u8);

impl Display for PhysReg {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "r{}", self.0)
    }
}
