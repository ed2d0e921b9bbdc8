//! Punto de entrada de línea de comandos.
//!
//! Este módulo expone una CLI mínima sobre [`rvasm::driver`]: selecciona
//! el origen (archivo o entrada estándar) y el dialecto, corre la
//! compilación y presenta diagnósticos o la IR resuelta.

use anyhow::Context;
use clap::{self, crate_version, Arg};
use rvasm::driver::{self, CompileError, Dialect, SourceOrigin};

use std::{io::Read, str::FromStr};

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = clap::App::new("rvasm frontend")
        .version(crate_version!())
        .arg(
            Arg::new("dialect")
                .short('d')
                .long("dialect")
                .value_name("DIALECT")
                .takes_value(true)
                .default_value("symbolic")
                .possible_values(["raw", "symbolic"])
                .help("Source dialect"),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .help("Dump the resolved IR on success"),
        )
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("FILE")
                .help("Source file ('-' for standard input)"),
        )
        .get_matches();

    // Se extraen argumentos necesarios
    let dialect = args.value_of("dialect").unwrap();
    let dialect = Dialect::from_str(dialect).expect("main.rs allowed a bad dialect");

    let origin = match args.value_of("input").unwrap() {
        // stdin no es seekable, se lee completo como buffer con nombre
        // sintético
        "-" => {
            let mut contents = String::new();
            std::io::stdin()
                .read_to_string(&mut contents)
                .context("Failed to read standard input")?;

            SourceOrigin::buffer("<stdin>", contents)
        }

        path => SourceOrigin::file(path),
    };

    match driver::compile(&origin, dialect) {
        Ok(unit) => {
            eprint!("{}", unit.warnings);
            if args.is_present("dump") {
                println!("{:#?}", unit);
            }

            Ok(())
        }

        Err(CompileError::Failed(failure)) => {
            eprint!("{}", failure);
            std::process::exit(1);
        }

        Err(CompileError::Open { name, cause }) => {
            let error = anyhow::Error::new(cause).context(format!("Cannot open `{}`", name));
            Err(error)
        }
    }
}
