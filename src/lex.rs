//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del front end. Descompone un [`InputStream`]
//! (flujo de caracteres) en unidades léxicas denominadas tokens. Los espacios
//! en blanco y los comentarios (`#` hasta fin de línea) se descartan durante
//! esta operación, mientras que los finales de línea sí se emiten como
//! tokens, ya que delimitan sentencias. Cada token emitido está asociado a
//! una ubicación en el código fuente original, lo cual permite rastrear
//! errores en tanto los mismos como constructos más elevados de fases
//! posteriores.
//!
//! # Contenido de un token
//! Este lexer no produce lexemas para casos donde no son necesarios o
//! terminan siendo más complicados. La puntuación se identifica por el hecho
//! de lo que es y no incluye lexemas. Por su parte, los identificadores y los
//! nombres de directivas sí incluyen su lexema original. Las constantes
//! literales se resuelven a sus valores en vez de preservar sus lexemas; los
//! escapes de string y la continuación de línea (`\` al final de la línea)
//! se resuelven aquí y no en el parser.
//!
//! # Reglas importantes del lenguaje
//! - El lenguaje es case-insensitive, por lo cual tanto `r5` como `R5`
//!   nombran el mismo registro físico y `.SUB` equivale a `.sub`.
//! - Un término de la forma `r<n>` con `n` dentro del archivo de registros
//!   es un registro físico; cualquier otro término es un identificador.
//! - Las directivas comienzan con `.`; el lexer no valida el nombre, eso
//!   le corresponde al parser según el dialecto activo.
//!
//! # Errores
//! El lexer es capaz de recuperarse de condiciones de error descartando el
//! resto de la línea ofensiva, con lo cual una misma ejecución puede
//! reportar errores léxicos en varias líneas independientes.

use crate::{
    ir::{PhysReg, REG_FILE},
    source::{InputStream, Located, Location},
};
use std::{
    fmt::{self, Display},
    mem,
    rc::Rc,
};

use thiserror::Error;

// Case-insensitive
pub use unicase::Ascii as NoCase;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Error de E/S originado por el [`InputStream`].
    #[error("I/O error")]
    Input(#[from] std::io::Error),

    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Se esperaba otra cosa en esta posición.
    #[error("Expected {0}")]
    Expected(&'static str),

    /// Un literal de string no fue cerrado antes del fin de la línea.
    #[error("Unterminated string literal")]
    UnterminatedString,

    /// Secuencia de escape desconocida dentro de un string.
    #[error("Bad escape sequence `\\{0}`")]
    BadEscape(char),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow")]
    IntOverflow,

    /// Un registro físico fuera del archivo de registros.
    #[error("Register index out of range, the register file is r0-r{}", REG_FILE - 1)]
    BadRegister,
}

/// Un identificador.
///
/// Los identificadores se comparan sin distinguir mayúsculas de minúsculas.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<NoCase<String>>);

impl Identifier {
    /// Construye un identificador a partir de su lexema.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Identifier(Rc::new(NoCase::new(name.into())))
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(fmt)
    }
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir completamente
/// a una entidad léxica en el programa fuente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador: opcode, etiqueta, registro simbólico o macro.
    Id(Identifier),

    /// Registro físico, `r0` a `r31`.
    Register(PhysReg),

    /// Literal de entero con signo.
    Int(i64),

    /// Literal de string, con escapes ya resueltos.
    Str(Rc<str>),

    /// Nombre de directiva, sin el `.` inicial.
    Directive(Identifier),

    /// `,`
    Comma,

    /// `:`
    Colon,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// Fin de línea; delimita sentencias.
    Eol,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "identifier `{}`", id),
            Register(reg) => write!(fmt, "register `{}`", reg),
            Int(integer) => write!(fmt, "literal `{}`", integer),
            Str(string) => write!(fmt, "string {:?}", string),
            Directive(name) => write!(fmt, "directive `.{}`", name),
            Comma => fmt.write_str("`,`"),
            Colon => fmt.write_str("`:`"),
            OpenParen => fmt.write_str("`(`"),
            CloseParen => fmt.write_str("`)`"),
            Eol => fmt.write_str("end of line"),
        }
    }
}

/// Máquina de estados para análisis léxico.
///
/// Un lexer puede encontrarse en uno de diversos estados. La
/// salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en el flujo de entrada.
pub struct Lexer<S: Iterator> {
    source: std::iter::Peekable<S>,
    state: State,
    start: Location,
    next: Location,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado de error; descarta la línea ofensiva.
    Error,

    /// Estado de completitud; siempre emite el token incluido,
    /// consume la entrada actual y pasa a [`State::Start`].
    Complete(Token),

    /// Comentario de línea, `#` hasta el final de la línea.
    Comment,

    /// Se encontró `\`; debería seguir un fin de línea.
    Continuation,

    /// Se encontró `-`; debería seguir un dígito.
    Minus,

    /// Constante entera en acumulación dígito por dígito.
    Integer { value: i64, negative: bool },

    /// Interior de un literal de string.
    Text(String),

    /// Interior de un literal de string, luego de `\`.
    Escape(String),

    /// Nombre de directiva luego de `.`.
    Directive(String),

    /// Término que puede ser un identificador o un registro físico.
    Word(String),
}

impl<S: InputStream> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(start: Location, source: S) -> Self {
        let next = start.clone();
        Lexer {
            source: source.peekable(),
            state: State::Start,
            start,
            next,
        }
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<(Token, Location)>, LexerError> {
        use State::*;

        let mut last_accepted = self.start.clone();
        let token = loop {
            // Se espera un siguiente carácter, fallando si hay error de E/S
            let next_char = match self.source.peek() {
                None => None,
                Some(Ok((c, _))) => Some(*c),
                Some(Err(_)) => break Err(self.source.next().unwrap().err().unwrap().into()),
            };

            // La posición de origen se mueve junto a la posición
            // siguiente siempre que no se haya encontrado una
            // frontera de token
            if let Start = self.state {
                self.start = self.next.clone();
            }

            // Switch table principal, determina cambios de estado
            // y de salida del lexer a partir de combinaciones del
            // estado actual y el siguiente carácter
            match (&mut self.state, next_char) {
                // Condiciones de error: se descarta la línea donde
                // ocurrió el error. El fin de línea no se consume aquí,
                // de manera que el token `Eol` de la línea dañada sí se
                // emite y el parser encuentra su frontera de sentencia.
                (Error, None) => return Ok(None),
                (Error, Some('\n')) => {
                    self.state = Start;
                    continue;
                }
                (Error, Some(_)) => (),

                // Tokens triviales
                (Start, None) => return Ok(None),
                (Start, Some('\n')) => self.state = Complete(Token::Eol),
                (Start, Some(',')) => self.state = Complete(Token::Comma),
                (Start, Some(':')) => self.state = Complete(Token::Colon),
                (Start, Some('(')) => self.state = Complete(Token::OpenParen),
                (Start, Some(')')) => self.state = Complete(Token::CloseParen),
                (Start, Some('#')) => self.state = Comment,
                (Start, Some('\\')) => self.state = Continuation,
                (Start, Some('"')) => self.state = Text(String::new()),
                (Start, Some('.')) => self.state = Directive(String::new()),
                (Start, Some('-')) => self.state = Minus,

                // Inicio de una constante numérica. No se consume
                // el dígito, ya que esta lógica ya está implementada
                // en el respectivo caso para un estado de constante
                // entera. Por tanto, la constante es inicialmente cero.
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer {
                        value: 0,
                        negative: false,
                    };
                    continue;
                }

                // Identificadores y registros
                (Start, Some(c)) if is_word_start(c) => self.state = Word(c.to_string()),

                // Espacios en blanco y caracteres inesperados
                (Start, Some(c)) if c.is_ascii_whitespace() => (),
                (Start, Some(c)) => break Err(LexerError::BadChar(c)),

                // Emisión retardada de tokens cualesquiera
                (Complete(value), _) => break Ok(mem::replace(value, Token::Eol)),

                // Los comentarios descartan el resto de la línea, pero
                // no su fin de línea
                (Comment, Some('\n')) => {
                    self.state = Start;
                    continue;
                }
                (Comment, Some(_)) => (),
                (Comment, None) => self.state = Start,

                // `\` al final de la línea une la sentencia con la
                // siguiente línea; el `Eol` se consume sin emitirse
                (Continuation, Some('\n')) => self.state = Start,
                (Continuation, _) => break Err(LexerError::Expected("a line break after `\\`")),

                // `-` solo puede introducir una constante negativa
                (Minus, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer {
                        value: 0,
                        negative: true,
                    };
                    continue;
                }
                (Minus, _) => break Err(LexerError::Expected("a digit after `-`")),

                // Acumulación dígito por dígito de constantes enteras
                (Integer { value, negative }, Some(digit)) if digit.is_ascii_digit() => {
                    let digit = digit.to_digit(10).unwrap() as i64;

                    let accumulated = if *negative {
                        value.checked_mul(10).and_then(|n| n.checked_sub(digit))
                    } else {
                        value.checked_mul(10).and_then(|n| n.checked_add(digit))
                    };

                    match accumulated {
                        Some(result) => *value = result,
                        None => break Err(LexerError::IntOverflow),
                    }
                }

                // Si sigue algo que no es un dígito, la constante ha terminado
                (Integer { value, .. }, _) => break Ok(Token::Int(*value)),

                // Los strings terminan en la misma línea donde comienzan
                (Text(_), Some('\n')) | (Text(_), None) => {
                    break Err(LexerError::UnterminatedString)
                }
                (Text(text), Some('\\')) => {
                    let text = mem::take(text);
                    self.state = Escape(text);
                }
                (Text(text), Some('"')) => {
                    let text = mem::take(text);
                    self.state = Complete(Token::Str(Rc::from(text)));
                }
                (Text(text), Some(c)) => text.push(c),

                (Escape(_), Some('\n')) | (Escape(_), None) => {
                    break Err(LexerError::UnterminatedString)
                }
                (Escape(text), Some(c)) => match unescape(c) {
                    Some(resolved) => {
                        let mut text = mem::take(text);
                        text.push(resolved);
                        self.state = Text(text);
                    }
                    None => break Err(LexerError::BadEscape(c)),
                },

                // Nombre de directiva
                (Directive(name), Some(c)) if is_word_char(c) => name.push(c),
                (Directive(name), _) => {
                    if name.is_empty() {
                        break Err(LexerError::Expected("a directive name after `.`"));
                    }

                    let name = mem::take(name);
                    break Ok(Token::Directive(Identifier::new(name)));
                }

                // Extensión de términos
                (Word(word), Some(c)) if is_word_char(c) => word.push(c),

                // Si sigue algo que no puede formar parte del término, ha terminado
                (Word(word), _) => break classify_word(mem::take(word)),
            }

            // Si no hubo `continue`, aquí se consume el carácter que
            // se observó con lookahead anteriormente
            if let Some(Ok((_, next_position))) = self.source.next() {
                last_accepted = mem::replace(&mut self.next, next_position);
            }
        };

        token.map(|token| Some((token, last_accepted)))
    }
}

impl<S: InputStream> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some((token, last_accepted))) => {
                self.state = State::Start;

                let location = Location::span(self.start.clone(), &last_accepted);
                Some(Ok(Located::at(token, location)))
            }

            Err(error) => {
                self.state = State::Error;
                Some(Err(Located::at(error, self.next.clone())))
            }
        }
    }
}

/// Determina si un carácter puede iniciar un término.
fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Determina si un carácter puede pertenecer a un término.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c.is_ascii_digit() || c == '_'
}

/// Distingue registros físicos de identificadores.
fn classify_word(word: String) -> Result<Token, LexerError> {
    let mut chars = word.chars();
    match chars.next() {
        Some('r') | Some('R') if !word[1..].is_empty() && chars.all(|c| c.is_ascii_digit()) => {
            match word[1..].parse::<u32>() {
                Ok(index) if index < u32::from(REG_FILE) => {
                    Ok(Token::Register(PhysReg(index as u8)))
                }
                _ => Err(LexerError::BadRegister),
            }
        }

        _ => Ok(Token::Id(Identifier::new(word))),
    }
}

/// Resuelve una secuencia de escape de string.
fn unescape(c: char) -> Option<char> {
    match c {
        '\\' => Some('\\'),
        '"' => Some('"'),
        'n' => Some('\n'),
        't' => Some('\t'),
        'r' => Some('\r'),
        '0' => Some('\0'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;
    use std::io::Cursor;

    fn tokenize(text: &str) -> Vec<Result<Token, LexerError>> {
        let (start, chars) = source::consume(Cursor::new(text), "<test>");
        Lexer::new(start, chars)
            .map(|result| match result {
                Ok(token) => Ok(token.into_inner()),
                Err(error) => Err(error.into_inner()),
            })
            .collect()
    }

    fn ok_tokens(text: &str) -> Vec<Token> {
        tokenize(text).into_iter().map(Result::unwrap).collect()
    }

    #[test]
    fn instruction_line_tokenizes() {
        let tokens = ok_tokens("add r1, counter, -42");
        assert_eq!(
            tokens,
            vec![
                Token::Id(Identifier::new("add")),
                Token::Register(PhysReg(1)),
                Token::Comma,
                Token::Id(Identifier::new("counter")),
                Token::Comma,
                Token::Int(-42),
                Token::Eol,
            ],
        );
    }

    #[test]
    fn registers_are_case_insensitive_and_bounded() {
        assert_eq!(ok_tokens("R5")[0], Token::Register(PhysReg(5)));
        assert!(matches!(
            tokenize("r99")[0],
            Err(LexerError::BadRegister)
        ));
    }

    #[test]
    fn almost_registers_are_identifiers() {
        assert_eq!(ok_tokens("r1x")[0], Token::Id(Identifier::new("r1x")));
        assert_eq!(ok_tokens("r")[0], Token::Id(Identifier::new("r")));
    }

    #[test]
    fn comments_are_elided_but_eol_remains() {
        let tokens = ok_tokens("nop # descartado\nnop");
        assert_eq!(
            tokens,
            vec![
                Token::Id(Identifier::new("nop")),
                Token::Eol,
                Token::Id(Identifier::new("nop")),
                Token::Eol,
            ],
        );
    }

    #[test]
    fn continuation_joins_lines_without_eol() {
        let tokens = ok_tokens("mov r1, \\\n r2");
        assert_eq!(
            tokens,
            vec![
                Token::Id(Identifier::new("mov")),
                Token::Register(PhysReg(1)),
                Token::Comma,
                Token::Register(PhysReg(2)),
                Token::Eol,
            ],
        );
    }

    #[test]
    fn strings_resolve_escapes() {
        let tokens = ok_tokens("msg \"hola\\n\"");
        assert_eq!(tokens[1], Token::Str(Rc::from("hola\n")));
    }

    #[test]
    fn unterminated_string_recovers_at_eol() {
        let results = tokenize("msg \"sin cierre\nnop");
        assert!(matches!(results[1], Err(LexerError::UnterminatedString)));

        // La línea dañada aún delimita, y la siguiente se escanea normalmente
        assert!(matches!(results[2], Ok(Token::Eol)));
        assert!(matches!(results[3], Ok(Token::Id(ref id)) if id == &Identifier::new("nop")));
    }

    #[test]
    fn directives_carry_their_name() {
        let tokens = ok_tokens(".SUB main");
        assert_eq!(tokens[0], Token::Directive(Identifier::new("sub")));
        assert_eq!(tokens[1], Token::Id(Identifier::new("main")));
    }

    #[test]
    fn integer_overflow_is_reported() {
        assert!(matches!(
            tokenize("9223372036854775808")[0],
            Err(LexerError::IntOverflow)
        ));
        assert_eq!(ok_tokens("-9223372036854775808")[0], Token::Int(i64::MIN));
    }
}
