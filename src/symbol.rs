//! Tabla de símbolos con scopes anidados.
//!
//! La tabla mantiene dos estructuras relacionadas pero de vida distinta:
//! una pila de scopes, cuyas asociaciones nombre→símbolo mueren al cerrar
//! el scope que las contiene, y un censo append-only que conserva el
//! registro de cada símbolo declarado durante toda la corrida. La IR
//! refiere a símbolos por [`SymbolId`], que indexa el censo, por lo cual
//! ninguna referencia queda colgante aunque su scope ya haya cerrado. El
//! censo es además el insumo del asignador de registros externo.
//!
//! La identidad de un símbolo es el par (nombre, clase): declarar una
//! etiqueta y un registro con el mismo nombre en el mismo scope no es
//! conflicto. Redeclarar el mismo par en el mismo scope sí lo es, mientras
//! que hacerlo en un scope anidado opaca a la declaración exterior.

use crate::{
    expand::MacroDef,
    ir::{ConstValue, PhysReg},
    lex::Identifier,
    source::Location,
};
use std::{
    collections::HashMap,
    fmt::{self, Display},
    rc::Rc,
};

use bitflags::bitflags;
use thiserror::Error;

/// Error de resolución de símbolos.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SymbolError {
    /// El par (nombre, clase) ya fue declarado en el scope actual.
    #[error("Redeclaration of {kind} `{name}`, previously declared at {previous}")]
    Redeclaration {
        name: Identifier,
        kind: SymbolKind,
        previous: Location,
    },

    /// Ningún scope visible declara este nombre.
    #[error("Symbol `{0}` is undeclared in this scope")]
    Undeclared(Identifier),
}

/// Clase de un símbolo.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// Registro simbólico, declarado implícitamente por primer uso.
    Register,

    /// Etiqueta, definida con `nombre:` o como nombre de subrutina.
    Label,

    /// Macro, definido con `.macro`.
    Macro,

    /// Declaración explícita, introducida con `.local` o `.const`.
    Local,
}

impl Display for SymbolKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Register => "register",
            SymbolKind::Label => "label",
            SymbolKind::Macro => "macro",
            SymbolKind::Local => "local declaration",
        };

        fmt.write_str(name)
    }
}

bitflags! {
    /// Atributos de uso registrados en el censo para el asignador.
    pub struct SymbolFlags: u8 {
        /// El símbolo fue referido por al menos un operando.
        const REFERENCED = 0x01;

        /// Declarado implícitamente por primer uso (dialecto simbólico).
        const IMPLICIT = 0x02;

        /// La declaración opaca a otra de igual identidad en un scope exterior.
        const SHADOWS = 0x04;
    }
}

/// Identidad de un símbolo dentro del censo de su unidad.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Registro de censo de un símbolo.
///
/// Los símbolos pertenecen a la tabla; el resto del front end los
/// observa a través de accessors y nunca retiene aliases mutables.
#[derive(Debug)]
pub struct Symbol {
    name: Identifier,
    kind: SymbolKind,
    declared_at: Location,
    scope_depth: u32,
    hint: Option<PhysReg>,
    constant: Option<ConstValue>,
    flags: SymbolFlags,
    def: Option<Rc<MacroDef>>,
}

impl Symbol {
    pub fn name(&self) -> &Identifier {
        &self.name
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn declared_at(&self) -> &Location {
        &self.declared_at
    }

    pub fn scope_depth(&self) -> u32 {
        self.scope_depth
    }

    /// Sugerencia de asignación física para el asignador externo.
    pub fn hint(&self) -> Option<PhysReg> {
        self.hint
    }

    pub fn constant(&self) -> Option<&ConstValue> {
        self.constant.as_ref()
    }

    pub fn flags(&self) -> SymbolFlags {
        self.flags
    }

    pub fn macro_def(&self) -> Option<&Rc<MacroDef>> {
        self.def.as_ref()
    }
}

/// Censo de símbolos de una unidad de compilación.
///
/// Es append-only: el cierre de un scope destruye sus asociaciones de
/// nombre, nunca los registros del censo.
#[derive(Debug, Default)]
pub struct Census {
    records: Vec<Symbol>,
}

impl Census {
    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.records[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, symbol)| (SymbolId(index as u32), symbol))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Asociaciones de un scope léxico.
#[derive(Default)]
struct Scope {
    names: HashMap<Identifier, Vec<SymbolId>>,
}

/// Tabla de símbolos de una unidad de compilación.
pub struct SymbolTable {
    scopes: Vec<Scope>,
    census: Census,
}

impl SymbolTable {
    /// Crea una tabla con solo el scope global abierto.
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope::default()],
            census: Census::default(),
        }
    }

    /// Profundidad actual de anidamiento; el scope global es 1.
    pub fn depth(&self) -> u32 {
        self.scopes.len() as u32
    }

    /// Abre un scope anidado.
    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Cierra el scope más interno, descartando sus asociaciones.
    ///
    /// El scope global nunca se cierra.
    pub fn exit_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "exit_scope() on the global scope");
        self.scopes.pop();
    }

    /// Declara un símbolo en el scope más interno.
    pub fn declare(
        &mut self,
        name: Identifier,
        kind: SymbolKind,
        at: Location,
    ) -> Result<SymbolId, SymbolError> {
        self.declare_in(self.scopes.len() - 1, name, kind, at)
    }

    /// Declara un símbolo directamente en el scope global.
    pub fn declare_global(
        &mut self,
        name: Identifier,
        kind: SymbolKind,
        at: Location,
    ) -> Result<SymbolId, SymbolError> {
        self.declare_in(0, name, kind, at)
    }

    fn declare_in(
        &mut self,
        scope: usize,
        name: Identifier,
        kind: SymbolKind,
        at: Location,
    ) -> Result<SymbolId, SymbolError> {
        if let Some(previous) = self.find_in_scope(scope, &name, kind) {
            return Err(SymbolError::Redeclaration {
                name,
                kind,
                previous: self.census.get(previous).declared_at.clone(),
            });
        }

        let shadows = (0..scope).any(|outer| self.find_in_scope(outer, &name, kind).is_some());

        let mut flags = SymbolFlags::empty();
        if shadows {
            flags |= SymbolFlags::SHADOWS;
        }

        let id = SymbolId(self.census.records.len() as u32);
        self.census.records.push(Symbol {
            name: name.clone(),
            kind,
            declared_at: at,
            scope_depth: scope as u32 + 1,
            hint: None,
            constant: None,
            flags,
            def: None,
        });

        self.scopes[scope].names.entry(name).or_default().push(id);
        Ok(id)
    }

    /// Busca un nombre del scope más interno hacia afuera.
    ///
    /// Retorna la primera coincidencia sin discriminar su clase; dentro
    /// de un mismo scope gana la declaración más reciente.
    pub fn lookup(&self, name: &Identifier) -> Result<SymbolId, SymbolError> {
        for scope in self.scopes.iter().rev() {
            if let Some(&id) = scope.names.get(name).and_then(|ids| ids.last()) {
                return Ok(id);
            }
        }

        Err(SymbolError::Undeclared(name.clone()))
    }

    /// Busca un nombre de una clase específica, de adentro hacia afuera.
    pub fn lookup_kind(&self, name: &Identifier, kind: SymbolKind) -> Option<SymbolId> {
        (0..self.scopes.len())
            .rev()
            .find_map(|scope| self.find_in_scope(scope, name, kind))
    }

    fn find_in_scope(&self, scope: usize, name: &Identifier, kind: SymbolKind) -> Option<SymbolId> {
        self.scopes[scope]
            .names
            .get(name)?
            .iter()
            .rev()
            .copied()
            .find(|&id| self.census.get(id).kind == kind)
    }

    pub fn census(&self) -> &Census {
        &self.census
    }

    /// Descompone la tabla entregando el censo terminado.
    pub fn into_census(self) -> Census {
        self.census
    }

    pub fn add_flags(&mut self, id: SymbolId, flags: SymbolFlags) {
        self.census.records[id.0 as usize].flags |= flags;
    }

    pub fn mark_referenced(&mut self, id: SymbolId) {
        self.add_flags(id, SymbolFlags::REFERENCED);
    }

    pub fn set_hint(&mut self, id: SymbolId, hint: PhysReg) {
        self.census.records[id.0 as usize].hint = Some(hint);
    }

    pub fn set_constant(&mut self, id: SymbolId, value: ConstValue) {
        self.census.records[id.0 as usize].constant = Some(value);
    }

    /// Liga un símbolo de clase macro con su definición vigente.
    pub fn attach_macro(&mut self, id: SymbolId, def: Rc<MacroDef>) {
        self.census.records[id.0 as usize].def = Some(def);
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;
    use std::io::Cursor;

    fn here() -> Location {
        let (start, _) = source::consume(Cursor::new(""), "<test>");
        start
    }

    fn id(name: &str) -> Identifier {
        Identifier::new(name)
    }

    #[test]
    fn declare_then_lookup() {
        let mut table = SymbolTable::new();
        let declared = table.declare(id("x"), SymbolKind::Register, here()).unwrap();

        assert_eq!(table.lookup(&id("x")).unwrap(), declared);
        assert_eq!(table.census().get(declared).kind(), SymbolKind::Register);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut table = SymbolTable::new();
        let declared = table.declare(id("Total"), SymbolKind::Register, here()).unwrap();

        assert_eq!(table.lookup(&id("TOTAL")).unwrap(), declared);
    }

    #[test]
    fn redeclaration_in_same_scope_fails() {
        let mut table = SymbolTable::new();
        table.declare(id("x"), SymbolKind::Register, here()).unwrap();

        assert!(matches!(
            table.declare(id("x"), SymbolKind::Register, here()),
            Err(SymbolError::Redeclaration { .. }),
        ));
    }

    #[test]
    fn same_name_different_kind_is_not_a_clash() {
        let mut table = SymbolTable::new();
        table.declare(id("x"), SymbolKind::Register, here()).unwrap();
        assert!(table.declare(id("x"), SymbolKind::Label, here()).is_ok());
    }

    #[test]
    fn nested_scope_shadows_and_is_flagged() {
        let mut table = SymbolTable::new();
        let outer = table.declare(id("x"), SymbolKind::Register, here()).unwrap();

        table.enter_scope();
        let inner = table.declare(id("x"), SymbolKind::Register, here()).unwrap();

        assert_ne!(outer, inner);
        assert!(table.census().get(inner).flags().contains(SymbolFlags::SHADOWS));
        assert_eq!(table.lookup(&id("x")).unwrap(), inner);

        table.exit_scope();
        assert_eq!(table.lookup(&id("x")).unwrap(), outer);
    }

    #[test]
    fn bindings_die_with_their_scope_but_census_remains() {
        let mut table = SymbolTable::new();

        table.enter_scope();
        let inner = table.declare(id("local"), SymbolKind::Local, here()).unwrap();
        table.exit_scope();

        assert!(matches!(
            table.lookup(&id("local")),
            Err(SymbolError::Undeclared(_)),
        ));

        // La IR sigue pudiendo resolver el id contra el censo
        assert_eq!(table.census().get(inner).name(), &id("local"));
        assert_eq!(table.census().len(), 1);
    }
}
