//! Análisis sintáctico.
//!
//! El parser consume el flujo de tokens sentencia por sentencia y
//! construye la IR, alimentando en el camino la tabla de símbolos y el
//! engine de macros. Las invocaciones de macro son transparentes para el
//! resto de la gramática: sus cuerpos expandidos se empalman en el flujo
//! mediante [`TokenStream::push_source`] y el despacho de sentencias
//! continúa como si el texto hubiera estado ahí desde el inicio.
//!
//! # Recuperación de errores
//! Un error léxico o sintáctico no aborta la corrida: se registra como
//! diagnóstico, se descartan tokens hasta la siguiente frontera de
//! sentencia y el parseo continúa, de manera que una sola ejecución
//! acumula todos los problemas del fuente. Los errores de símbolos y de
//! macros en una sentencia individual solo omiten el nodo de IR de esa
//! sentencia. Las únicas condiciones fatales son exceder la cota de
//! recursión de macros y llegar al fin de la entrada con subrutinas sin
//! cerrar, ya que en esos casos la IR no puede mantenerse
//! estructuralmente válida.

use crate::{
    driver::Dialect,
    error::{Diagnostic, Diagnostics, Severity},
    expand::{Frame, MacroEngine, MacroError},
    ir::{ConstValue, Node, Operand, PhysReg, Subroutine},
    lex::{Identifier, NoCase, Token},
    source::{InputStream, Located, Location},
    stream::{Sourced, TokenStream},
    symbol::{Census, SymbolFlags, SymbolId, SymbolKind, SymbolTable},
};
use std::{
    mem,
    rc::Rc,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use thiserror::Error;

/// Error de sintaxis o de estructura.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected {0}, found {1}")]
    Unexpected(&'static str, Token),

    #[error("Expected {0}, found end of input")]
    Missing(&'static str),

    #[error("Unknown directive `.{0}`")]
    UnknownDirective(Identifier),

    #[error("Directive `.{0}` is not available in the {1} dialect")]
    NotInDialect(Identifier, Dialect),

    #[error("Subroutines cannot nest in the {0} dialect")]
    NestedSubroutine(Dialect),

    #[error("`.end` outside of any subroutine")]
    StrayEnd,

    #[error("`.endm` outside of a macro definition")]
    StrayEndm,

    #[error("Subroutine `{0}` is missing its `.end`")]
    UnterminatedSubroutine(Identifier),

    #[error("Macro definition `{0}` is missing its `.endm`")]
    UnterminatedMacro(Identifier),

    #[error("This declaration of `{0}` shadows an outer one")]
    Shadowed(Identifier),
}

/// Directivas reconocidas por el parser.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DirectiveKind {
    Sub,
    End,
    Local,
    Const,
    Macro,
    Endm,
}

impl DirectiveKind {
    /// El conjunto de directivas disponibles depende del dialecto.
    fn available_in(self, dialect: Dialect) -> bool {
        match self {
            DirectiveKind::Local => dialect.local_declarations(),
            _ => true,
        }
    }
}

impl FromStr for DirectiveKind {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        use DirectiveKind::*;

        const DIRECTIVES: &[(NoCase<&str>, DirectiveKind)] = &[
            (NoCase::new("sub"), Sub),
            (NoCase::new("end"), End),
            (NoCase::new("local"), Local),
            (NoCase::new("const"), Const),
            (NoCase::new("macro"), Macro),
            (NoCase::new("endm"), Endm),
        ];

        DIRECTIVES
            .iter()
            .find(|&&(name, _)| name == NoCase::new(string))
            .map(|&(_, kind)| kind)
            .ok_or(())
    }
}

/// Falla al procesar una sentencia.
///
/// En ambos casos el diagnóstico ya fue registrado al construir la falla.
enum Failure {
    /// Descartar hasta la frontera de sentencia y continuar.
    Recover,

    /// La corrida no puede continuar produciendo IR válida.
    Fatal,
}

type Parse<T> = Result<T, Failure>;

/// Resultado crudo de una corrida del parser.
///
/// El driver decide si esto constituye una unidad terminada o una falla,
/// según la severidad de los diagnósticos acumulados.
pub struct Outcome {
    pub subs: Vec<Subroutine>,
    pub census: Census,
    pub diagnostics: Diagnostics,
    pub cancelled: bool,
}

/// Subrutina en construcción; la pila de estas es el estado del parser.
struct OpenSub {
    name: Identifier,
    symbol: Option<SymbolId>,
    opened_at: Location,
    nodes: Vec<Located<Node>>,
}

/// Máquina de estados de análisis sintáctico sobre un [`TokenStream`].
pub struct Parser<S: Iterator> {
    tokens: TokenStream<S>,
    symbols: SymbolTable,
    macros: MacroEngine,
    dialect: Dialect,
    diagnostics: Diagnostics,
    finished: Vec<Subroutine>,
    open: Vec<OpenSub>,
    toplevel: Vec<Located<Node>>,
    last_known: Location,
    cancel: Option<Arc<AtomicBool>>,
    cancelled: bool,
    fatal: bool,
}

impl<S: InputStream> Parser<S> {
    /// Crea un parser en estado inicial para una unidad.
    pub fn new(
        tokens: TokenStream<S>,
        start: Location,
        dialect: Dialect,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Self {
        Parser {
            tokens,
            symbols: SymbolTable::new(),
            macros: MacroEngine::new(),
            dialect,
            diagnostics: Diagnostics::default(),
            finished: Vec::new(),
            open: Vec::new(),
            toplevel: Vec::new(),
            last_known: start,
            cancel,
            cancelled: false,
            fatal: false,
        }
    }

    /// Corre el parser hasta el fin de la entrada, una falla fatal o la
    /// cancelación cooperativa.
    pub fn run(mut self) -> Outcome {
        loop {
            if self.is_cancelled() {
                self.cancelled = true;
                break;
            }

            match self.statement() {
                Ok(true) => (),
                Ok(false) => break,
                Err(Failure::Recover) => self.skip_to_boundary(),
                Err(Failure::Fatal) => {
                    self.fatal = true;
                    break;
                }
            }
        }

        // Fin de entrada con scopes sin resolver
        if !self.cancelled && !self.fatal {
            while let Some(open) = self.open.pop() {
                let error = ParserError::UnterminatedSubroutine(open.name.clone());
                let error = Located::at(error, open.opened_at.clone());
                self.diagnostics.push(Diagnostic::new(Severity::Error, error, None));
            }
        }

        // Las sentencias fuera de toda subrutina colapsan en una unidad
        // implícita
        if !self.toplevel.is_empty() {
            self.finished.push(Subroutine {
                name: None,
                symbol: None,
                nodes: mem::take(&mut self.toplevel),
            });
        }

        Outcome {
            subs: self.finished,
            census: self.symbols.into_census(),
            diagnostics: self.diagnostics,
            cancelled: self.cancelled,
        }
    }

    /// Procesa la siguiente sentencia; `false` señala fin de entrada.
    fn statement(&mut self) -> Parse<bool> {
        // Líneas en blanco
        while matches!(self.peek_token(), Some(Token::Eol)) {
            self.bump()?;
        }

        let next = match self.bump()? {
            None => return Ok(false),
            Some(sourced) => sourced,
        };

        let Sourced { token, frame } = next;
        let (location, token) = token.split();
        match token {
            Token::Directive(name) => self.directive(name, location, frame)?,
            Token::Id(id) => self.named(id, location, frame)?,
            token => {
                let error = ParserError::Unexpected("a statement", token);
                self.report(Severity::Error, Located::at(error, location), frame);
                return Err(Failure::Recover);
            }
        }

        Ok(true)
    }

    /// Despacha una sentencia que comienza con un identificador:
    /// definición de etiqueta, invocación de macro o instrucción.
    fn named(&mut self, id: Identifier, location: Location, frame: Option<Rc<Frame>>) -> Parse<()> {
        if matches!(self.peek_token(), Some(Token::Colon)) {
            self.bump()?;

            if let Some(symbol) = self.declare(id, SymbolKind::Label, location.clone(), frame) {
                self.push_node(Located::at(Node::Label(symbol), location));
            }

            // La etiqueta puede ir seguida de una sentencia en la misma línea
            return match self.bump()? {
                None => Ok(()),
                Some(Sourced { token, frame }) => {
                    let (location, token) = token.split();
                    match token {
                        Token::Eol => Ok(()),
                        Token::Id(id) => self.named(id, location, frame),
                        Token::Directive(name) => self.directive(name, location, frame),
                        token => {
                            let error =
                                ParserError::Unexpected("a statement or end of line", token);
                            self.report(Severity::Error, Located::at(error, location), frame);
                            Err(Failure::Recover)
                        }
                    }
                }
            };
        }

        // Un nombre de macro conocido, o cualquier nombre con paréntesis
        // de argumentos, se trata como invocación
        if self.macros.get(&id).is_some() || matches!(self.peek_token(), Some(Token::OpenParen)) {
            return self.invocation(id, location, frame);
        }

        self.instruction(id, location, frame)
    }

    /// Instrucción: opcode libre seguido de operandos separados por coma.
    fn instruction(
        &mut self,
        opcode: Identifier,
        location: Location,
        _frame: Option<Rc<Frame>>,
    ) -> Parse<()> {
        let mut operands = Vec::new();
        let mut poisoned = false;

        if !matches!(self.peek_token(), Some(Token::Eol) | None) {
            loop {
                match self.operand()? {
                    Some(operand) => operands.push(operand),
                    None => poisoned = true,
                }

                match self.peek_token() {
                    Some(Token::Comma) => {
                        self.bump()?;
                    }

                    _ => break,
                }
            }
        }

        self.expect_eol()?;

        // Una sentencia con errores de resolución no aporta nodo
        if !poisoned {
            self.push_node(Located::at(Node::Inst { opcode, operands }, location));
        }

        Ok(())
    }

    /// Un operando individual; `None` si la resolución de símbolos falló
    /// y el diagnóstico ya fue registrado.
    fn operand(&mut self) -> Parse<Option<Located<Operand>>> {
        let sourced = match self.bump()? {
            Some(sourced) => sourced,
            None => {
                self.report_missing("an operand");
                return Err(Failure::Recover);
            }
        };

        let Sourced { token, frame } = sourced;
        let (location, token) = token.split();
        let operand = match token {
            Token::Register(register) => Operand::Phys(register),
            Token::Int(value) => Operand::Int(value),
            Token::Str(text) => Operand::Str(text),
            Token::Id(name) => return Ok(self.resolve(name, location, frame)),
            token => {
                let error = ParserError::Unexpected("an operand", token);
                self.report(Severity::Error, Located::at(error, location), frame);
                return Err(Failure::Recover);
            }
        };

        Ok(Some(Located::at(operand, location)))
    }

    /// Resuelve un identificador usado como operando.
    ///
    /// En el dialecto simbólico, el primer uso de un nombre no declarado
    /// lo declara implícitamente como registro simbólico; en el dialecto
    /// raw es un error de resolución.
    fn resolve(
        &mut self,
        name: Identifier,
        location: Location,
        frame: Option<Rc<Frame>>,
    ) -> Option<Located<Operand>> {
        match self.symbols.lookup(&name) {
            Ok(symbol) => {
                self.symbols.mark_referenced(symbol);
                Some(Located::at(Operand::Sym(symbol), location))
            }

            Err(error) => {
                if self.dialect.implicit_declaration() {
                    let symbol = self.declare(name, SymbolKind::Register, location.clone(), frame)?;
                    self.symbols.add_flags(symbol, SymbolFlags::IMPLICIT);
                    self.symbols.mark_referenced(symbol);
                    Some(Located::at(Operand::Sym(symbol), location))
                } else {
                    self.report(Severity::Error, Located::at(error, location), frame);
                    None
                }
            }
        }
    }

    /// Despacho de directivas, validando el conjunto del dialecto.
    fn directive(
        &mut self,
        name: Identifier,
        location: Location,
        frame: Option<Rc<Frame>>,
    ) -> Parse<()> {
        let kind = match DirectiveKind::from_str(name.as_ref()) {
            Ok(kind) => kind,
            Err(()) => {
                let error = ParserError::UnknownDirective(name);
                self.report(Severity::Error, Located::at(error, location), frame);
                return Err(Failure::Recover);
            }
        };

        if !kind.available_in(self.dialect) {
            let error = ParserError::NotInDialect(name, self.dialect);
            self.report(Severity::Error, Located::at(error, location), frame);
            return Err(Failure::Recover);
        }

        match kind {
            DirectiveKind::Sub => self.subroutine(location, frame),
            DirectiveKind::End => self.end_subroutine(location, frame),
            DirectiveKind::Local => self.locals(),
            DirectiveKind::Const => self.constant(),
            DirectiveKind::Macro => self.definition(location),
            DirectiveKind::Endm => {
                self.report(Severity::Error, Located::at(ParserError::StrayEndm, location), frame);
                Err(Failure::Recover)
            }
        }
    }

    /// `.sub nombre`: abre una subrutina y su scope.
    fn subroutine(&mut self, location: Location, frame: Option<Rc<Frame>>) -> Parse<()> {
        let (name, name_location, name_frame) = self.expect_id("a subroutine name")?;

        if !self.open.is_empty() && !self.dialect.nested_subroutines() {
            let error = ParserError::NestedSubroutine(self.dialect);
            self.report(Severity::Error, Located::at(error, location), frame);
            return Err(Failure::Recover);
        }

        self.expect_eol()?;

        // El nombre es una etiqueta visible desde el scope que contiene
        // a la subrutina
        let symbol = self.declare(name.clone(), SymbolKind::Label, name_location, name_frame);

        self.symbols.enter_scope();
        self.open.push(OpenSub {
            name,
            symbol,
            opened_at: location,
            nodes: Vec::new(),
        });

        Ok(())
    }

    /// `.end`: cierra la subrutina abierta más interna.
    fn end_subroutine(&mut self, location: Location, frame: Option<Rc<Frame>>) -> Parse<()> {
        self.expect_eol()?;

        match self.open.pop() {
            Some(open) => {
                self.symbols.exit_scope();
                self.finished.push(Subroutine {
                    name: Some(open.name),
                    symbol: open.symbol,
                    nodes: open.nodes,
                });

                Ok(())
            }

            None => {
                self.report(Severity::Error, Located::at(ParserError::StrayEnd, location), frame);
                Ok(())
            }
        }
    }

    /// `.local nombre [: rN] [, ...]`: declaraciones explícitas.
    fn locals(&mut self) -> Parse<()> {
        loop {
            let (name, name_location, name_frame) = self.expect_id("a local name")?;

            // Sugerencia opcional de asignación física para el asignador
            let hint = if matches!(self.peek_token(), Some(Token::Colon)) {
                self.bump()?;
                Some(self.expect_register()?)
            } else {
                None
            };

            if let Some(symbol) =
                self.declare(name, SymbolKind::Local, name_location.clone(), name_frame)
            {
                if let Some(hint) = hint {
                    self.symbols.set_hint(symbol, hint);
                }

                self.push_node(Located::at(Node::Decl(symbol), name_location));
            }

            match self.peek_token() {
                Some(Token::Comma) => {
                    self.bump()?;
                }

                _ => break,
            }
        }

        self.expect_eol()
    }

    /// `.const nombre, literal`: entrada del pool de constantes.
    fn constant(&mut self) -> Parse<()> {
        let (name, name_location, name_frame) = self.expect_id("a constant name")?;
        self.expect_token(Token::Comma, "`,`")?;

        let sourced = match self.bump()? {
            Some(sourced) => sourced,
            None => {
                self.report_missing("a literal");
                return Err(Failure::Recover);
            }
        };

        let Sourced { token, frame } = sourced;
        let (value_location, token) = token.split();
        let value = match token {
            Token::Int(value) => ConstValue::Int(value),
            Token::Str(text) => ConstValue::Str(text),
            token => {
                let error = ParserError::Unexpected("a literal", token);
                self.report(Severity::Error, Located::at(error, value_location), frame);
                return Err(Failure::Recover);
            }
        };

        self.expect_eol()?;

        if let Some(symbol) = self.declare(name, SymbolKind::Local, name_location.clone(), name_frame)
        {
            self.symbols.set_constant(symbol, value.clone());
            self.push_node(Located::at(Node::Const { symbol, value }, name_location));
        }

        Ok(())
    }

    /// `.macro nombre(params)` ... `.endm`: captura el cuerpo sin validarlo.
    fn definition(&mut self, location: Location) -> Parse<()> {
        let (name, name_location, _) = self.expect_id("a macro name")?;

        let mut params = Vec::new();
        if matches!(self.peek_token(), Some(Token::OpenParen)) {
            self.bump()?;

            if matches!(self.peek_token(), Some(Token::CloseParen)) {
                self.bump()?;
            } else {
                loop {
                    let (param, _, _) = self.expect_id("a parameter name")?;
                    params.push(param);

                    match self.bump()? {
                        None => {
                            self.report_missing("`)`");
                            return Err(Failure::Recover);
                        }

                        Some(Sourced { token, frame }) => {
                            let (location, token) = token.split();
                            match token {
                                Token::Comma => (),
                                Token::CloseParen => break,
                                token => {
                                    let error = ParserError::Unexpected("`,` or `)`", token);
                                    self.report(
                                        Severity::Error,
                                        Located::at(error, location),
                                        frame,
                                    );
                                    return Err(Failure::Recover);
                                }
                            }
                        }
                    }
                }
            }
        }

        self.expect_eol()?;

        // Captura cruda del cuerpo hasta el `.endm` correspondiente;
        // definiciones anidadas llevan cuenta de profundidad
        let mut body = Vec::new();
        let mut nesting = 0usize;
        loop {
            match self.tokens.next() {
                None => {
                    let error = ParserError::UnterminatedMacro(name);
                    let error = Located::at(error, location);
                    self.diagnostics.push(Diagnostic::new(Severity::Error, error, None));
                    return Err(Failure::Recover);
                }

                Some(Err(error)) => {
                    self.diagnostics.push(Diagnostic::new(Severity::Error, error, None));
                }

                Some(Ok(Sourced { token, .. })) => {
                    let directive = match token.val() {
                        Token::Directive(name) => DirectiveKind::from_str(name.as_ref()).ok(),
                        _ => None,
                    };

                    match directive {
                        Some(DirectiveKind::Macro) => {
                            nesting += 1;
                            body.push(token);
                        }

                        Some(DirectiveKind::Endm) if nesting == 0 => break,
                        Some(DirectiveKind::Endm) => {
                            nesting -= 1;
                            body.push(token);
                        }

                        _ => body.push(token),
                    }
                }
            }
        }

        self.expect_eol()?;

        let def = self.macros.define(name.clone(), params, body, name_location.clone());

        // Censo: los macros viven en el scope global; una redefinición
        // actualiza el enlace a la definición vigente
        match self.symbols.lookup_kind(&name, SymbolKind::Macro) {
            Some(existing) => self.symbols.attach_macro(existing, def),
            None => {
                let declared = self.symbols.declare_global(name, SymbolKind::Macro, name_location);
                if let Ok(symbol) = declared {
                    self.symbols.attach_macro(symbol, def);
                }
            }
        }

        Ok(())
    }

    /// Invocación de macro: recolecta argumentos, expande y empalma el
    /// resultado en el flujo de tokens.
    fn invocation(
        &mut self,
        name: Identifier,
        location: Location,
        frame: Option<Rc<Frame>>,
    ) -> Parse<()> {
        let mut args = Vec::new();

        if matches!(self.peek_token(), Some(Token::OpenParen)) {
            self.bump()?;

            if matches!(self.peek_token(), Some(Token::CloseParen)) {
                self.bump()?;
            } else {
                let mut current = Vec::new();
                let mut nesting = 0usize;

                loop {
                    let sourced = match self.bump()? {
                        Some(sourced) => sourced,
                        None => {
                            self.report_missing("`)`");
                            return Err(Failure::Recover);
                        }
                    };

                    let Sourced { token, frame } = sourced;
                    let (token_location, token) = token.split();
                    match token {
                        // Los argumentos no cruzan líneas
                        Token::Eol => {
                            let error = ParserError::Unexpected("`)`", Token::Eol);
                            self.report(Severity::Error, Located::at(error, token_location), frame);
                            return Ok(());
                        }

                        Token::Comma if nesting == 0 => args.push(mem::take(&mut current)),

                        Token::CloseParen if nesting == 0 => {
                            args.push(mem::take(&mut current));
                            break;
                        }

                        Token::OpenParen => {
                            nesting += 1;
                            current.push(Located::at(Token::OpenParen, token_location));
                        }

                        Token::CloseParen => {
                            nesting -= 1;
                            current.push(Located::at(Token::CloseParen, token_location));
                        }

                        token => current.push(Located::at(token, token_location)),
                    }
                }
            }
        }

        self.expect_eol()?;

        match self.macros.expand(&name, args, location.clone(), frame.clone()) {
            Ok((expanded, new_frame)) => {
                self.tokens.push_source(expanded, new_frame);
                Ok(())
            }

            // La cota de recursión es la única condición fatal de macros
            Err(error @ MacroError::Recursion(_)) => {
                self.report(Severity::Error, Located::at(error, location), frame);
                Err(Failure::Fatal)
            }

            Err(error) => {
                // La sentencia ya llegó a su frontera; solo se omite
                self.report(Severity::Error, Located::at(error, location), frame);
                Ok(())
            }
        }
    }

    /// Declara reportando conflictos como error y sombras como warning.
    fn declare(
        &mut self,
        name: Identifier,
        kind: SymbolKind,
        location: Location,
        frame: Option<Rc<Frame>>,
    ) -> Option<SymbolId> {
        let reported = name.clone();
        match self.symbols.declare(name, kind, location.clone()) {
            Ok(symbol) => {
                let flags = self.symbols.census().get(symbol).flags();
                if flags.contains(SymbolFlags::SHADOWS) {
                    let warning = ParserError::Shadowed(reported);
                    self.report(Severity::Warning, Located::at(warning, location), frame);
                }

                Some(symbol)
            }

            Err(error) => {
                self.report(Severity::Error, Located::at(error, location), frame);
                None
            }
        }
    }

    fn expect_id(
        &mut self,
        what: &'static str,
    ) -> Parse<(Identifier, Location, Option<Rc<Frame>>)> {
        match self.bump()? {
            None => {
                self.report_missing(what);
                Err(Failure::Recover)
            }

            Some(Sourced { token, frame }) => {
                let (location, token) = token.split();
                match token {
                    Token::Id(id) => Ok((id, location, frame)),
                    token => {
                        let error = ParserError::Unexpected(what, token);
                        self.report(Severity::Error, Located::at(error, location), frame);
                        Err(Failure::Recover)
                    }
                }
            }
        }
    }

    fn expect_register(&mut self) -> Parse<PhysReg> {
        match self.bump()? {
            None => {
                self.report_missing("a physical register");
                Err(Failure::Recover)
            }

            Some(Sourced { token, frame }) => {
                let (location, token) = token.split();
                match token {
                    Token::Register(register) => Ok(register),
                    token => {
                        let error = ParserError::Unexpected("a physical register", token);
                        self.report(Severity::Error, Located::at(error, location), frame);
                        Err(Failure::Recover)
                    }
                }
            }
        }
    }

    fn expect_token(&mut self, expected: Token, what: &'static str) -> Parse<()> {
        match self.bump()? {
            None => {
                self.report_missing(what);
                Err(Failure::Recover)
            }

            Some(Sourced { token, frame }) => {
                let (location, token) = token.split();
                if token == expected {
                    Ok(())
                } else {
                    let error = ParserError::Unexpected(what, token);
                    self.report(Severity::Error, Located::at(error, location), frame);
                    Err(Failure::Recover)
                }
            }
        }
    }

    fn expect_eol(&mut self) -> Parse<()> {
        match self.bump()? {
            None => Ok(()),
            Some(Sourced { token, frame }) => {
                let (location, token) = token.split();
                match token {
                    Token::Eol => Ok(()),
                    token => {
                        let error = ParserError::Unexpected("end of line", token);
                        self.report(Severity::Error, Located::at(error, location), frame);
                        Err(Failure::Recover)
                    }
                }
            }
        }
    }

    /// Consume el siguiente token, reportando errores léxicos.
    fn bump(&mut self) -> Parse<Option<Sourced>> {
        match self.tokens.next() {
            None => Ok(None),

            Some(Ok(sourced)) => {
                self.last_known = sourced.token.location().clone();
                Ok(Some(sourced))
            }

            Some(Err(error)) => {
                self.last_known = error.location().clone();
                self.diagnostics.push(Diagnostic::new(Severity::Error, error, None));
                Err(Failure::Recover)
            }
        }
    }

    fn peek_token(&mut self) -> Option<&Token> {
        match self.tokens.peek() {
            Some(Ok(sourced)) => Some(sourced.token.val()),
            _ => None,
        }
    }

    /// Descarta tokens hasta la siguiente frontera de sentencia.
    fn skip_to_boundary(&mut self) {
        loop {
            match self.tokens.next() {
                None => break,
                Some(Ok(sourced)) if sourced.token.val() == &Token::Eol => break,
                Some(_) => (),
            }
        }
    }

    fn push_node(&mut self, node: Located<Node>) {
        match self.open.last_mut() {
            Some(open) => open.nodes.push(node),
            None => self.toplevel.push(node),
        }
    }

    fn report<E>(&mut self, severity: Severity, error: Located<E>, frame: Option<Rc<Frame>>)
    where
        E: std::error::Error + 'static,
    {
        self.diagnostics.push(Diagnostic::new(severity, error, frame));
    }

    fn report_missing(&mut self, what: &'static str) {
        let error = Located::at(ParserError::Missing(what), self.last_known.clone());
        self.diagnostics.push(Diagnostic::new(Severity::Error, error, None));
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};
    use std::io::Cursor;

    fn run(dialect: Dialect, text: &str) -> Outcome {
        let (start, chars) = source::consume(Cursor::new(text.to_owned()), "<test>");
        let tokens = TokenStream::new(Lexer::new(start.clone(), chars));
        Parser::new(tokens, start, dialect, None).run()
    }

    fn messages(outcome: &Outcome) -> Vec<String> {
        outcome.diagnostics.iter().map(|d| d.message()).collect()
    }

    #[test]
    fn unknown_directive_recovers_and_continues() {
        let outcome = run(Dialect::Symbolic, ".wat\nmov x, 1\n");

        assert_eq!(outcome.diagnostics.error_count(), 1);
        assert!(messages(&outcome)[0].contains("Unknown directive"));

        // La sentencia siguiente sí aporta IR
        assert_eq!(outcome.subs.len(), 1);
        assert_eq!(outcome.subs[0].nodes.len(), 1);
    }

    #[test]
    fn local_is_rejected_in_the_raw_dialect() {
        let outcome = run(Dialect::Raw, ".local x\n");
        assert!(messages(&outcome)[0].contains("not available in the raw dialect"));
    }

    #[test]
    fn subroutines_do_not_nest_in_the_raw_dialect() {
        let outcome = run(Dialect::Raw, ".sub a\n.sub b\n.end\n.end\n");

        assert!(messages(&outcome)
            .iter()
            .any(|m| m.contains("cannot nest")));
    }

    #[test]
    fn nested_subroutines_close_innermost_first() {
        let outcome = run(Dialect::Symbolic, ".sub outer\n.sub inner\nnop\n.end\n.end\n");

        assert!(!outcome.diagnostics.has_errors());
        let names: Vec<_> = outcome
            .subs
            .iter()
            .map(|sub| sub.name.clone().unwrap())
            .collect();

        assert_eq!(names, vec![Identifier::new("inner"), Identifier::new("outer")]);
    }

    #[test]
    fn stray_end_is_reported() {
        let outcome = run(Dialect::Symbolic, ".end\n");
        assert!(messages(&outcome)[0].contains("outside of any subroutine"));
    }

    #[test]
    fn unterminated_subroutine_is_an_error() {
        let outcome = run(Dialect::Symbolic, ".sub main\nnop\n");
        assert!(messages(&outcome)
            .iter()
            .any(|m| m.contains("missing its `.end`")));
    }

    #[test]
    fn macro_invocations_are_transparent_to_the_grammar() {
        let outcome = run(
            Dialect::Symbolic,
            ".macro pair(x)\nmov x, 1\nmov x, 2\n.endm\npair(total)\n",
        );

        assert!(!outcome.diagnostics.has_errors());
        assert_eq!(outcome.subs.len(), 1);
        assert_eq!(outcome.subs[0].nodes.len(), 2);
    }

    #[test]
    fn macro_expansion_can_open_and_close_subroutines() {
        let outcome = run(
            Dialect::Symbolic,
            ".macro shell(name)\n.sub name\nnop\n.end\n.endm\nshell(generated)\n",
        );

        assert!(!outcome.diagnostics.has_errors());
        assert_eq!(
            outcome.subs[0].name,
            Some(Identifier::new("generated")),
        );
    }

    #[test]
    fn label_can_share_a_line_with_an_instruction() {
        let outcome = run(Dialect::Symbolic, "top: jmp top\n");

        assert!(!outcome.diagnostics.has_errors());
        let nodes = &outcome.subs[0].nodes;
        assert!(matches!(nodes[0].val(), Node::Label(_)));
        assert!(matches!(nodes[1].val(), Node::Inst { .. }));
    }

    #[test]
    fn local_hints_reach_the_census() {
        let outcome = run(Dialect::Symbolic, ".local counter : r3\n");

        assert!(!outcome.diagnostics.has_errors());
        let (_, symbol) = outcome.census.iter().next().unwrap();
        assert_eq!(symbol.hint(), Some(PhysReg(3)));
        assert_eq!(symbol.kind(), SymbolKind::Local);
    }

    #[test]
    fn cancellation_yields_no_ir() {
        let cancel = Arc::new(AtomicBool::new(true));

        let (start, chars) = source::consume(Cursor::new("nop\n".to_owned()), "<test>");
        let tokens = TokenStream::new(Lexer::new(start.clone(), chars));
        let outcome = Parser::new(tokens, start, Dialect::Symbolic, Some(cancel)).run();

        assert!(outcome.cancelled);
        assert!(outcome.subs.is_empty());
    }
}
