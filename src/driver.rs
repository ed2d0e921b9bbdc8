//! Orquestación de una corrida de compilación.
//!
//! Este módulo es el único que distingue "archivo" de "buffer" y el que
//! conoce el dialecto seleccionado. Un origen se adquiere, se envuelve
//! como flujo de caracteres y se entrega al parser; ambos tipos de origen
//! recorren exactamente el mismo camino de código a partir de ahí. El
//! handle de archivo es una adquisición con scope: se libera en todo
//! camino de salida, incluyendo fallas de parseo.
//!
//! Cada corrida posee sus propias instancias de flujo de tokens, tabla de
//! símbolos y engine de macros; no existe estado global alguno, por lo
//! cual varias unidades pueden compilarse concurrentemente sin contención
//! siempre que cada una viva en su propio hilo.

use crate::{error::Diagnostics, ir::Unit, lex::Lexer, parse::Parser, source, stream::TokenStream};
use std::{
    fmt::{self, Display},
    fs::File,
    io::{self, BufRead, BufReader, Cursor},
    path::PathBuf,
    str::FromStr,
    sync::{atomic::AtomicBool, Arc},
};

use thiserror::Error;

/// Dialecto de la gramática.
///
/// Los dialectos comparten tokenizador, tabla de símbolos y engine de
/// macros; difieren en su política de declaración y en su conjunto de
/// directivas disponibles.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// Forma de bajo nivel: solo registros físicos explícitos, sin
    /// declaraciones implícitas.
    Raw,

    /// Forma de alto nivel: registros simbólicos, declarados
    /// implícitamente en su primer uso y asignados a registros físicos
    /// por el asignador externo.
    Symbolic,
}

impl Dialect {
    /// El primer uso de un nombre no declarado lo declara como registro.
    pub fn implicit_declaration(self) -> bool {
        matches!(self, Dialect::Symbolic)
    }

    /// Las subrutinas pueden anidarse léxicamente.
    pub fn nested_subroutines(self) -> bool {
        matches!(self, Dialect::Symbolic)
    }

    /// La directiva `.local` forma parte del dialecto.
    pub fn local_declarations(self) -> bool {
        matches!(self, Dialect::Symbolic)
    }
}

impl Display for Dialect {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Raw => fmt.write_str("raw"),
            Dialect::Symbolic => fmt.write_str("symbolic"),
        }
    }
}

impl FromStr for Dialect {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "raw" => Ok(Dialect::Raw),
            "symbolic" => Ok(Dialect::Symbolic),
            _ => Err(()),
        }
    }
}

/// Origen de código fuente de una unidad.
///
/// Un origen es cualquier cosa legible como flujo de caracteres que
/// además tiene un nombre presentable en diagnósticos. Los dos casos
/// concretos se aceptan de manera uniforme.
#[derive(Debug, Clone)]
pub enum SourceOrigin {
    /// Archivo en disco, abierto al iniciar la corrida.
    File(PathBuf),

    /// Texto en memoria con un nombre sintético.
    Buffer { name: String, contents: String },
}

impl SourceOrigin {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        SourceOrigin::File(path.into())
    }

    pub fn buffer<N: Into<String>, C: Into<String>>(name: N, contents: C) -> Self {
        SourceOrigin::Buffer {
            name: name.into(),
            contents: contents.into(),
        }
    }

    /// Nombre con que el origen aparece en diagnósticos.
    pub fn display_name(&self) -> String {
        match self {
            SourceOrigin::File(path) => path.display().to_string(),
            SourceOrigin::Buffer { name, .. } => name.clone(),
        }
    }

    fn open(&self) -> io::Result<Box<dyn BufRead + '_>> {
        match self {
            SourceOrigin::File(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            SourceOrigin::Buffer { contents, .. } => Ok(Box::new(Cursor::new(contents.as_bytes()))),
        }
    }
}

/// Resumen de una corrida fallida.
///
/// Contiene la lista completa de diagnósticos acumulados hasta el punto
/// de falla. No expone IR parcial: una IR a medias no le sirve de nada
/// al asignador de registros.
#[derive(Debug)]
pub struct Failure {
    pub diagnostics: Diagnostics,
    pub cancelled: bool,
}

impl Display for Failure {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.diagnostics, fmt)?;

        if self.cancelled {
            writeln!(fmt, "Compilation was cancelled before completion")?;
        }

        Ok(())
    }
}

impl std::error::Error for Failure {}

/// Error de la operación de compilación completa.
#[derive(Error, Debug)]
pub enum CompileError {
    /// No se pudo adquirir el origen.
    #[error("Cannot open `{name}`")]
    Open {
        name: String,
        #[source]
        cause: io::Error,
    },

    /// La corrida acumuló diagnósticos de error o fue cancelada.
    #[error("{0}")]
    Failed(Failure),
}

/// Compila una unidad de principio a fin.
pub fn compile(origin: &SourceOrigin, dialect: Dialect) -> Result<Unit, CompileError> {
    compile_with(origin, dialect, None)
}

/// Compila con una bandera de cancelación cooperativa.
///
/// La bandera se consulta entre sentencias. Una corrida cancelada
/// entrega los diagnósticos recolectados hasta ese punto, nunca IR
/// parcial.
pub fn compile_with(
    origin: &SourceOrigin,
    dialect: Dialect,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<Unit, CompileError> {
    let name = origin.display_name();

    let reader = origin.open().map_err(|cause| CompileError::Open {
        name: name.clone(),
        cause,
    })?;

    let (start, chars) = source::consume(reader, name.clone());
    let tokens = TokenStream::new(Lexer::new(start.clone(), chars));

    let outcome = Parser::new(tokens, start, dialect, cancel).run();
    if outcome.cancelled || outcome.diagnostics.has_errors() {
        Err(CompileError::Failed(Failure {
            diagnostics: outcome.diagnostics,
            cancelled: outcome.cancelled,
        }))
    } else {
        Ok(Unit {
            name,
            dialect,
            subs: outcome.subs,
            census: outcome.census,
            warnings: outcome.diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialects_parse_from_cli_names() {
        assert_eq!(Dialect::from_str("raw"), Ok(Dialect::Raw));
        assert_eq!(Dialect::from_str("symbolic"), Ok(Dialect::Symbolic));
        assert!(Dialect::from_str("pasm").is_err());
    }

    #[test]
    fn missing_file_reports_its_name() {
        let origin = SourceOrigin::file("/definitely/not/here.rva");

        match compile(&origin, Dialect::Raw) {
            Err(CompileError::Open { name, .. }) => {
                assert!(name.contains("not/here.rva"));
            }

            _ => panic!("expected an open failure"),
        }
    }
}
