//! Front end del compilador de ensamblador para la máquina virtual de
//! registros.
//!
//! # Pipeline
//! Cada unidad de compilación deriva de un único origen de código fuente,
//! sea un archivo o un buffer en memoria ([`driver::SourceOrigin`]); ambos
//! se tratan de forma idéntica una vez envueltos como flujo de caracteres
//! en [`source`]. Ese flujo se somete a análisis léxico en [`lex`], de lo
//! cual se obtiene un flujo perezoso de tokens. [`stream`] apila fuentes
//! de tokens, lo que permite que los cuerpos de macro expandidos por
//! [`expand`] se reinyecten como si se reescanearan. El análisis
//! sintáctico en [`parse`] consume ese flujo, alimenta la tabla de
//! símbolos de [`symbol`] y construye la representación intermedia
//! descrita en [`ir`], agrupada en subrutinas y acompañada del censo de
//! símbolos. [`driver`] orquesta una corrida completa y selecciona el
//! dialecto ([`driver::Dialect`]).
//!
//! # Colaboradores externos
//! La asignación de registros físicos, la selección de instrucciones y la
//! emisión de bytecode consumen la unidad terminada ([`ir::Unit`]) y
//! quedan fuera de este crate; aquí solo se garantiza que la IR entregada
//! está completamente resuelta, expandida y estructuralmente válida, con
//! cada operando refiriendo a exactamente un símbolo vivo del censo.

pub mod driver;
pub mod error;
pub mod expand;
pub mod ir;
pub mod lex;
pub mod parse;
pub mod source;
pub mod stream;
pub mod symbol;
