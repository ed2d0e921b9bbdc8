//! Pila de fuentes de tokens.
//!
//! El flujo de tokens que el parser consume es lógicamente una pila de
//! fuentes: en el fondo está el lexer sobre el fuente original, y encima
//! se apilan las secuencias producidas por expansión de macros mediante
//! [`TokenStream::push_source`]. Cuando la fuente superior se agota, se
//! desapila y el flujo continúa con la que está debajo, con lo cual un
//! cuerpo expandido se "reescanea" sin mutar el buffer original y sin
//! depender de profundidad de recursión implícita.
//!
//! Cada token empalmado viaja acompañado del [`Frame`] de la expansión
//! que lo produjo, de manera que los diagnósticos posteriores puedan
//! imprimir la cadena de invocaciones completa.

use crate::{
    expand::Frame,
    lex::{Lexer, LexerError, Token},
    source::{InputStream, Located},
};
use std::rc::Rc;

/// Un token junto con el marco de expansión del que proviene, si alguno.
#[derive(Debug, Clone)]
pub struct Sourced {
    pub token: Located<Token>,
    pub frame: Option<Rc<Frame>>,
}

/// Secuencia expandida en consumo, con su marco de origen.
struct Splice {
    tokens: std::vec::IntoIter<Located<Token>>,
    frame: Rc<Frame>,
}

/// Flujo de tokens con fuentes apilables.
pub struct TokenStream<S: Iterator> {
    base: Lexer<S>,
    spliced: Vec<Splice>,
    peeked: Option<Option<Result<Sourced, Located<LexerError>>>>,
}

impl<S: InputStream> TokenStream<S> {
    pub fn new(base: Lexer<S>) -> Self {
        TokenStream {
            base,
            spliced: Vec::new(),
            peeked: None,
        }
    }

    /// Empalma una secuencia expandida delante de la fuente actual.
    ///
    /// Solo es válido en fronteras de sentencia, cuando no hay lookahead
    /// pendiente; de lo contrario el empalme quedaría detrás del token ya
    /// observado.
    pub fn push_source(&mut self, tokens: Vec<Located<Token>>, frame: Rc<Frame>) {
        debug_assert!(self.peeked.is_none(), "push_source() with pending lookahead");

        self.spliced.push(Splice {
            tokens: tokens.into_iter(),
            frame,
        });
    }

    /// Observa el siguiente token sin consumirlo.
    pub fn peek(&mut self) -> Option<&Result<Sourced, Located<LexerError>>> {
        if self.peeked.is_none() {
            let pulled = self.pull();
            self.peeked = Some(pulled);
        }

        self.peeked.as_ref().unwrap().as_ref()
    }

    fn pull(&mut self) -> Option<Result<Sourced, Located<LexerError>>> {
        loop {
            match self.spliced.last_mut() {
                Some(top) => match top.tokens.next() {
                    Some(token) => {
                        let frame = Some(Rc::clone(&top.frame));
                        return Some(Ok(Sourced { token, frame }));
                    }

                    // Fuente agotada: se desapila y su marco muere aquí
                    None => {
                        self.spliced.pop();
                    }
                },

                None => {
                    return self
                        .base
                        .next()
                        .map(|result| result.map(|token| Sourced { token, frame: None }));
                }
            }
        }
    }
}

impl<S: InputStream> Iterator for TokenStream<S> {
    type Item = Result<Sourced, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.peeked.take() {
            Some(item) => item,
            None => self.pull(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{expand::MacroEngine, lex::Identifier, source};
    use std::io::Cursor;

    fn stream(text: &str) -> TokenStream<impl InputStream> {
        let (start, chars) = source::consume(Cursor::new(text.to_owned()), "<test>");
        TokenStream::new(Lexer::new(start, chars))
    }

    fn frame_for_test() -> Rc<Frame> {
        let (start, _) = source::consume(Cursor::new(""), "<test>");
        let mut engine = MacroEngine::new();
        engine.define(Identifier::new("m"), vec![], vec![], start.clone());

        let (_, frame) = engine
            .expand(&Identifier::new("m"), vec![], start, None)
            .unwrap();
        frame
    }

    fn token_of(item: Option<Result<Sourced, Located<LexerError>>>) -> Token {
        item.unwrap().unwrap().token.into_inner()
    }

    #[test]
    fn spliced_tokens_come_first_then_base_resumes() {
        let mut tokens = stream("nop");
        let frame = frame_for_test();

        let spliced = vec![Located::at(
            Token::Id(Identifier::new("inner")),
            frame.invoked_at().clone(),
        )];
        tokens.push_source(spliced, Rc::clone(&frame));

        let first = tokens.next().unwrap().unwrap();
        assert_eq!(first.token.val(), &Token::Id(Identifier::new("inner")));
        assert!(first.frame.is_some());

        let second = tokens.next().unwrap().unwrap();
        assert_eq!(second.token.val(), &Token::Id(Identifier::new("nop")));
        assert!(second.frame.is_none());
    }

    #[test]
    fn peek_does_not_consume() {
        let mut tokens = stream("nop");

        assert!(matches!(
            tokens.peek(),
            Some(Ok(Sourced { token, .. })) if token.val() == &Token::Id(Identifier::new("nop")),
        ));

        assert_eq!(token_of(tokens.next()), Token::Id(Identifier::new("nop")));
        assert_eq!(token_of(tokens.next()), Token::Eol);
        assert!(tokens.next().is_none());
    }

    #[test]
    fn empty_splice_pops_transparently() {
        let mut tokens = stream("nop");
        tokens.push_source(Vec::new(), frame_for_test());

        assert_eq!(token_of(tokens.next()), Token::Id(Identifier::new("nop")));
    }
}
