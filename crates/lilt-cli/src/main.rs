use std::{env, path::Path, process::ExitCode};

use lilt::{Engine, EngineError};

const USAGE: &str = "usage: lilt <file.lt>\n       lilt -e <expression>\n       lilt --disasm <file.lt>";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [] => {
            eprintln!("{USAGE}");
            ExitCode::FAILURE
        }
        [flag, expr] if flag == "-e" => run_inline(expr),
        [flag, path] if flag == "--disasm" => disassemble(path),
        [path] => run_file(path),
        _ => {
            eprintln!("{USAGE}");
            ExitCode::FAILURE
        }
    }
}

fn run_inline(expr: &str) -> ExitCode {
    let mut engine = Engine::new();
    match engine.run(expr, "<inline>") {
        Ok(value) => {
            println!("{}", engine.render(value));
            ExitCode::SUCCESS
        }
        Err(error) => report(&engine, &error),
    }
}

fn run_file(path: &str) -> ExitCode {
    let mut engine = Engine::new();
    match engine.run_file(Path::new(path)) {
        Ok(value) => {
            println!("{}", engine.render(value));
            ExitCode::SUCCESS
        }
        Err(error) => report(&engine, &error),
    }
}

fn disassemble(path: &str) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("error: cannot read \"{path}\": {error}");
            return ExitCode::FAILURE;
        }
    };
    let mut engine = Engine::new();
    match engine.compile(&source, path) {
        Ok(program) => {
            print!("{}", program.disassemble_all());
            ExitCode::SUCCESS
        }
        Err(error) => report(&engine, &error),
    }
}

fn report(engine: &Engine, error: &EngineError) -> ExitCode {
    match error {
        EngineError::Runtime(runtime) => eprintln!("{}", engine.render_error(runtime)),
        other => eprintln!("{other}"),
    }
    ExitCode::FAILURE
}
