//! Runs an Eva program
//!
//! ```text
//! eva [--disasm] <file.eva>
//! eva [--disasm] -e '<source>'
//! ```

use std::{env, fs, process};

use camino::Utf8PathBuf;
use colored::Colorize;

use eva::Eva;

const USAGE: &str = "usage: eva [--disasm] <file.eva> | eva [--disasm] -e '<source>'";

#[derive(Debug)]
enum Input {
    File(Utf8PathBuf),
    Inline(String),
}

#[derive(Debug)]
struct Args {
    disasm: bool,
    input: Input,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut disasm = false;
    let mut input = None;

    while let Some(arg) = args.next() {
        let next = match arg.as_str() {
            "--disasm" => {
                disasm = true;
                continue;
            }
            "-e" => {
                let src = args.next().ok_or("`-e` requires source text")?;
                Input::Inline(src)
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ => Input::File(Utf8PathBuf::from(arg)),
        };

        if input.replace(next).is_some() {
            return Err(USAGE.to_string());
        }
    }

    let input = input.ok_or_else(|| USAGE.to_string())?;
    Ok(Args { disasm, input })
}

fn main() {
    env_logger::init();

    let args = match self::parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            process::exit(2);
        }
    };

    let (name, src) = match &args.input {
        Input::File(path) => match fs::read_to_string(path) {
            Ok(src) => (path.as_str().to_string(), src),
            Err(err) => {
                eprintln!("{}: can't open file {}: {}", "error".red().bold(), path, err);
                process::exit(1);
            }
        },
        Input::Inline(src) => ("<inline>".to_string(), src.clone()),
    };

    let mut eva = Eva::new();

    let result = eva.compile(&src).and_then(|main| {
        if args.disasm {
            println!("{}", eva.disassemble(main)?);
        }
        eva.run(main)
    });

    match result {
        Ok(value) => println!("{}", eva.display(value)),
        Err(err) => {
            eprint!("{}", err.render(&name, &src));
            process::exit(1);
        }
    }
}
