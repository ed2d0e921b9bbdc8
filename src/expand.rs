//! Definición y expansión de macros.
//!
//! # Sustitución a nivel de tokens
//! Los cuerpos de macro se almacenan como secuencias de tokens sin
//! expandir y sin validar, ya que su forma final depende del contexto del
//! sitio de invocación. Al expandir, cada aparición de un parámetro formal
//! en el cuerpo se reemplaza por la *secuencia* de tokens suministrada
//! posicionalmente para ese parámetro: un argumento de varios tokens se
//! empalma, nunca se convierte a texto. Esto evita las ambigüedades de
//! re-parseo inherentes a la sustitución textual.
//!
//! # Marcos de expansión
//! Cada invocación crea un [`Frame`] con un back-link al marco que la
//! contiene, de manera que un diagnóstico dentro de un cuerpo expandido
//! puede imprimir la cadena completa de invocaciones. El marco vive
//! mientras su secuencia expandida no se haya consumido por completo; la
//! profundidad de la cadena viva está acotada por
//! [`MAX_EXPANSION_DEPTH`], con lo cual un macro auto-recursivo falla en
//! tiempo acotado en vez de expandirse por siempre.

use crate::{
    lex::{Identifier, Token},
    source::{Located, Location},
};
use std::{collections::HashMap, rc::Rc};

use thiserror::Error;

/// Cota práctica para la profundidad de marcos de expansión vivos.
pub const MAX_EXPANSION_DEPTH: usize = 64;

/// Error de definición o expansión de macros.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MacroError {
    /// Se invocó un macro que no ha sido definido.
    #[error("Unknown macro `{0}`")]
    Unknown(Identifier),

    /// La invocación no suple la cantidad de parámetros formales.
    #[error("Macro `{name}` expects {expected} arguments, {found} were given")]
    ArityMismatch {
        name: Identifier,
        expected: usize,
        found: usize,
    },

    /// La cadena de expansión excede la cota de profundidad.
    #[error("Expansion of macro `{0}` exceeds the live-frame depth bound")]
    Recursion(Identifier),
}

/// Definición de un macro: nombre, parámetros formales y cuerpo.
///
/// Inmutable luego de registrada. Una redefinición con el mismo nombre
/// reemplaza a la anterior solo para invocaciones posteriores.
#[derive(Debug)]
pub struct MacroDef {
    name: Identifier,
    params: Vec<Identifier>,
    body: Vec<Located<Token>>,
    defined_at: Location,
}

impl MacroDef {
    pub fn name(&self) -> &Identifier {
        &self.name
    }

    pub fn params(&self) -> &[Identifier] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn defined_at(&self) -> &Location {
        &self.defined_at
    }
}

/// Marco de expansión: registro en runtime de una invocación de macro.
#[derive(Debug)]
pub struct Frame {
    name: Identifier,
    invoked_at: Location,
    parent: Option<Rc<Frame>>,
    depth: usize,
}

impl Frame {
    pub fn name(&self) -> &Identifier {
        &self.name
    }

    pub fn invoked_at(&self) -> &Location {
        &self.invoked_at
    }

    pub fn parent(&self) -> Option<&Rc<Frame>> {
        self.parent.as_ref()
    }

    /// Cantidad de marcos en la cadena, este incluido.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Registro de macros de una unidad de compilación.
///
/// Cada unidad posee su propio engine; no existe un registro global de
/// macros, de manera que corridas concurrentes nunca compiten.
#[derive(Debug, Default)]
pub struct MacroEngine {
    defs: HashMap<Identifier, Rc<MacroDef>>,
}

impl MacroEngine {
    pub fn new() -> Self {
        MacroEngine::default()
    }

    /// Registra o reemplaza una definición. El cuerpo no se valida.
    pub fn define(
        &mut self,
        name: Identifier,
        params: Vec<Identifier>,
        body: Vec<Located<Token>>,
        defined_at: Location,
    ) -> Rc<MacroDef> {
        let def = Rc::new(MacroDef {
            name: name.clone(),
            params,
            body,
            defined_at,
        });

        self.defs.insert(name, Rc::clone(&def));
        def
    }

    /// Consulta si un nombre corresponde a un macro definido.
    pub fn get(&self, name: &Identifier) -> Option<&Rc<MacroDef>> {
        self.defs.get(name)
    }

    /// Expande una invocación, sustituyendo parámetros posicionalmente.
    ///
    /// `parent` es el marco del cual provienen los tokens de la
    /// invocación, o `None` si la invocación aparece directamente en el
    /// fuente. El marco retornado debe acompañar a los tokens expandidos
    /// hasta que se consuman.
    pub fn expand(
        &self,
        name: &Identifier,
        args: Vec<Vec<Located<Token>>>,
        invoked_at: Location,
        parent: Option<Rc<Frame>>,
    ) -> Result<(Vec<Located<Token>>, Rc<Frame>), MacroError> {
        let def = self
            .defs
            .get(name)
            .ok_or_else(|| MacroError::Unknown(name.clone()))?;

        if args.len() != def.params.len() {
            return Err(MacroError::ArityMismatch {
                name: name.clone(),
                expected: def.params.len(),
                found: args.len(),
            });
        }

        let depth = parent.as_ref().map_or(0, |frame| frame.depth) + 1;
        if depth > MAX_EXPANSION_DEPTH {
            return Err(MacroError::Recursion(name.clone()));
        }

        let mut expanded = Vec::with_capacity(def.body.len());
        for token in &def.body {
            match token.val() {
                Token::Id(id) => match def.params.iter().position(|param| param == id) {
                    Some(index) => expanded.extend(args[index].iter().cloned()),
                    None => expanded.push(token.clone()),
                },

                _ => expanded.push(token.clone()),
            }
        }

        let frame = Rc::new(Frame {
            name: def.name.clone(),
            invoked_at,
            parent,
            depth,
        });

        Ok((expanded, frame))
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

    fn tok(token: Token) -> Located<Token> {
        Located::at(token, here())
    }

    fn values(tokens: &[Located<Token>]) -> Vec<Token> {
        tokens.iter().map(|t| t.val().clone()).collect()
    }

    #[test]
    fn positional_substitution_splices_sequences() {
        let mut engine = MacroEngine::new();
        engine.define(
            id("m"),
            vec![id("a"), id("b")],
            vec![
                tok(Token::Id(id("op"))),
                tok(Token::Id(id("a"))),
                tok(Token::Comma),
                tok(Token::Id(id("b"))),
                tok(Token::Eol),
            ],
            here(),
        );

        // Un argumento de varios tokens se empalma sin aplanarse a texto
        let args = vec![
            vec![tok(Token::Int(1)), tok(Token::Comma), tok(Token::Int(2))],
            vec![tok(Token::Id(id("x")))],
        ];

        let (expanded, frame) = engine.expand(&id("m"), args, here(), None).unwrap();
        assert_eq!(
            values(&expanded),
            vec![
                Token::Id(id("op")),
                Token::Int(1),
                Token::Comma,
                Token::Int(2),
                Token::Comma,
                Token::Id(id("x")),
                Token::Eol,
            ],
        );

        assert_eq!(frame.depth(), 1);
        assert!(frame.parent().is_none());
    }

    #[test]
    fn unknown_macro_is_rejected() {
        let engine = MacroEngine::new();
        assert!(matches!(
            engine.expand(&id("nope"), vec![], here(), None),
            Err(MacroError::Unknown(_)),
        ));
    }

    #[test]
    fn arity_is_enforced() {
        let mut engine = MacroEngine::new();
        engine.define(id("m"), vec![id("a")], vec![], here());

        assert!(matches!(
            engine.expand(&id("m"), vec![], here(), None),
            Err(MacroError::ArityMismatch {
                expected: 1,
                found: 0,
                ..
            }),
        ));
    }

    #[test]
    fn redefinition_is_not_retroactive() {
        let mut engine = MacroEngine::new();
        let first = engine.define(id("m"), vec![], vec![tok(Token::Int(1))], here());
        engine.define(id("m"), vec![], vec![tok(Token::Int(2))], here());

        // La definición previa sigue viva para quien la retuvo
        assert_eq!(values(&first.body), vec![Token::Int(1)]);

        let (expanded, _) = engine.expand(&id("m"), vec![], here(), None).unwrap();
        assert_eq!(values(&expanded), vec![Token::Int(2)]);
    }

    #[test]
    fn expansion_depth_is_bounded() {
        let mut engine = MacroEngine::new();
        engine.define(id("m"), vec![], vec![], here());

        let mut frame = None;
        for _ in 0..MAX_EXPANSION_DEPTH {
            let (_, next) = engine.expand(&id("m"), vec![], here(), frame).unwrap();
            frame = Some(next);
        }

        assert!(matches!(
            engine.expand(&id("m"), vec![], here(), frame),
            Err(MacroError::Recursion(_)),
        ));
    }
}
