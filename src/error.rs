use crate::{
    expand::Frame,
    source::{Located, Location},
};
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    rc::Rc,
};

/// Severidad de un diagnóstico.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => fmt.write_str("warning"),
            Severity::Error => fmt.write_str("error"),
        }
    }
}

/// Un evento reportable, con su ubicación y cadena de expansión.
pub struct Diagnostic {
    severity: Severity,
    error: Box<dyn Error + 'static>,
    location: Location,
    expansion: Option<Rc<Frame>>,
}

impl Diagnostic {
    pub fn new<E>(severity: Severity, error: Located<E>, expansion: Option<Rc<Frame>>) -> Self
    where
        E: Error + 'static,
    {
        let (location, error) = error.split();
        Diagnostic {
            severity,
            error: Box::new(error),
            location,
            expansion,
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Mensaje del error subyacente, sin ubicación.
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    pub fn expansion(&self) -> Option<&Rc<Frame>> {
        self.expansion.as_ref()
    }
}

impl Debug for Diagnostic {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: {} at {}", self.severity, self.error, self.location)
    }
}

/// Secuencia ordenada de diagnósticos de una corrida.
#[derive(Debug, Default)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.records.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.records
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Diagnostics {
            records: vec![diagnostic],
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        for diagnostic in &self.records {
            writeln!(fmt, "{}: {}", diagnostic.severity, diagnostic.error)?;

            let location = &diagnostic.location;
            writeln!(fmt, " --> {}", location)?;

            let digits = location.end().line().to_string().chars().count();
            writeln!(fmt, "{:digits$} |", "", digits = digits)?;

            let mut excerpted = false;
            for line_number in location.start().line()..=location.end().line() {
                let shown = location.source().with_line(line_number, |line| {
                    writeln!(fmt, "{:>digits$} | {}", line_number, line, digits = digits)
                });

                if let Some(result) = shown {
                    result?;
                    excerpted = true;
                }
            }

            // El subrayado solo tiene sentido para rangos de una línea
            if excerpted && location.start().line() == location.end().line() {
                let from = location.start().column();
                let to = location.end().column().saturating_sub(1).max(from);
                let min = from.min(to);
                let max = from.max(to);

                let skip = (min - 1) as usize;
                let highlight = (max - min + 1) as usize;

                writeln!(
                    fmt,
                    "{:digits$} | {:skip$}{:^<highlight$}",
                    "",
                    "",
                    "",
                    digits = digits,
                    skip = skip,
                    highlight = highlight
                )?;
            }

            // Cadena de invocaciones si el token provino de un macro
            let mut frame = diagnostic.expansion.as_deref();
            while let Some(current) = frame {
                writeln!(
                    fmt,
                    " ... in expansion of `{}`, invoked at {}",
                    current.name(),
                    current.invoked_at()
                )?;

                frame = current.parent().map(Rc::as_ref);
            }

            writeln!(fmt)?;
        }

        let errors = self.error_count();
        if errors > 0 {
            let error_or_errors = if errors == 1 { "error" } else { "errors" };
            writeln!(fmt, "Build failed with {} {}", errors, error_or_errors)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;
    use std::io::Cursor;
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("something bad")]
    struct Bad;

    fn diagnostic(severity: Severity) -> Diagnostic {
        let (start, chars) = source::consume(Cursor::new("mov r1, r2"), "<test>");
        chars.for_each(drop);

        Diagnostic::new(severity, Located::at(Bad, start), None)
    }

    #[test]
    fn counts_distinguish_severities() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.push(diagnostic(Severity::Warning));
        assert!(!diagnostics.has_errors());

        diagnostics.push(diagnostic(Severity::Error));
        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn rendering_cites_the_offending_line() {
        let rendered = Diagnostics::from(diagnostic(Severity::Error)).to_string();

        assert!(rendered.contains("error: something bad"));
        assert!(rendered.contains(" --> <test>:"));
        assert!(rendered.contains("mov r1, r2"));
        assert!(rendered.contains("Build failed with 1 error"));
    }

    #[test]
    fn empty_diagnostics_render_to_nothing() {
        assert_eq!(Diagnostics::default().to_string(), "");
    }
}
