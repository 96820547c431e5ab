//! Entrypoint for CLI
use std::{env, error::Error, fs, path::PathBuf, process};

use log::{debug, error, info, LevelFilter};
use octoasm::{options::EmulationOptions, prep::Define, start_address_for_file, Compiler, IMPL_VERSION};

static USAGE: &str = r#"
usage: octoasm [options] FILE...

options:
    -o, --output FILE        name of the output ROM file (default a.out.ch8)
    -P, --preprocess         only preprocess and print the result
    -I, --include-path DIR   add a directory to the include search path
    -D, --define NAME        predefine a preprocessor symbol (NAME or NAME=VALUE)
        --start-address N    address the program is loaded to (default 512,
                             768 for .c8x files)
        --no-line-info       omit line-origin markers in preprocessed output
        --dump-options       print the default emulator options as JSON
    -q, --quiet              suppress progress output
    -v, --verbose            more verbose progress output
        --version            show version info and exit

examples:
    octoasm game.8o -o game.ch8
    octoasm -P -D DEBUG game.8o
    octoasm -I lib main.8o
"#;

struct Args {
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    preprocess_only: bool,
    include_paths: Vec<PathBuf>,
    defines: Vec<(String, Define)>,
    start_address: Option<usize>,
    no_line_info: bool,
    dump_options: bool,
    quiet: bool,
    verbose: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = match parse_args() {
        Some(args) => args,
        None => {
            print_usage();
            // FreeBSD EX_USAGE (64)
            process::exit(64)
        }
    };

    let level = if args.quiet {
        LevelFilter::Error
    } else if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .without_timestamps()
        .init()
        .unwrap();

    if args.dump_options {
        println!("{}", EmulationOptions::default().to_json());
        return Ok(());
    }
    if args.inputs.is_empty() {
        print_usage();
        process::exit(64)
    }

    let mut compiler = Compiler::new();
    compiler.set_include_paths(&args.include_paths);
    compiler.generate_line_infos(!args.no_line_info);
    for (name, value) in args.defines {
        compiler.define(name, value);
    }
    let start_address = args
        .start_address
        .unwrap_or_else(|| start_address_for_file(&args.inputs[0]));
    compiler.set_start_address(start_address);
    debug!("start address is 0x{start_address:X}");

    if args.preprocess_only {
        for input in &args.inputs {
            let result = compiler.preprocess_file(input);
            if result.is_error() {
                error!("{result}");
                process::exit(1)
            }
        }
        let flattened = compiler.dump_segments();
        match args.output {
            Some(path) => fs::write(path, flattened)?,
            None => print!("{flattened}"),
        }
        return Ok(());
    }

    let result = compiler.compile_files(&args.inputs).clone();
    if result.is_error() {
        error!("{result}");
        process::exit(1)
    }
    let output = args.output.unwrap_or_else(|| PathBuf::from("a.out.ch8"));
    fs::write(&output, compiler.code())?;
    info!(
        "wrote {} bytes to {} (sha1 {})",
        compiler.code_size(),
        output.display(),
        compiler.sha1_hex()
    );

    Ok(())
}

fn parse_args() -> Option<Args> {
    let mut args = Args {
        inputs: Vec::new(),
        output: None,
        preprocess_only: false,
        include_paths: Vec::new(),
        defines: Vec::new(),
        start_address: None,
        no_line_info: false,
        dump_options: false,
        quiet: false,
        verbose: false,
    };

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-o" | "--output" => args.output = Some(PathBuf::from(iter.next()?)),
            "-P" | "--preprocess" => args.preprocess_only = true,
            "-I" | "--include-path" => args.include_paths.push(PathBuf::from(iter.next()?)),
            "-D" | "--define" => {
                let define = iter.next()?;
                match define.split_once('=') {
                    Some((name, value)) => {
                        let value = value
                            .parse::<f64>()
                            .map(Define::Number)
                            .unwrap_or_else(|_| Define::Text(value.to_string()));
                        args.defines.push((name.to_string(), value));
                    }
                    None => args.defines.push((define, Define::Number(1.0))),
                }
            }
            "--start-address" => args.start_address = Some(parse_address(&iter.next()?)?),
            "--no-line-info" => args.no_line_info = true,
            "--dump-options" => args.dump_options = true,
            "-q" | "--quiet" => args.quiet = true,
            "-v" | "--verbose" => args.verbose = true,
            "--version" => {
                println!("octoasm v{IMPL_VERSION}");
                process::exit(0)
            }
            "-h" | "--help" => return None,
            _ if arg.starts_with('-') => return None,
            _ => args.inputs.push(PathBuf::from(arg)),
        }
    }
    Some(args)
}

fn parse_address(text: &str) -> Option<usize> {
    match text.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn print_usage() {
    println!("octoasm v{IMPL_VERSION}");
    println!("{USAGE}");
}
