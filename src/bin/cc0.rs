use c0_core::analyzer::C0_EBNF;
use c0_core::config::{Config, Emit};
use c0_core::vm::{disasm_object, run_object, Vm};
use c0_core::{assembly, compile_source, object, scanner, ObjectModule};
use std::env;
use std::io::{self, Write};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run(env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    let (config, args) = take_config(args)?;
    init_logging(&config.log_filter);
    if args.is_empty() {
        return Err(usage());
    }
    match args[0].as_str() {
        "tokens" => cmd_tokens(&args[1..]),
        "compile" => cmd_compile(&args[1..], &config),
        "run" => cmd_run(&args[1..], &config),
        "runo" => cmd_runo(&args[1..], &config),
        "disasm" => cmd_disasm(&args[1..]),
        "config" => cmd_config(&args[1..], &config),
        "grammar" => {
            print!("{}", C0_EBNF.trim_start());
            Ok(())
        }
        "help" | "--help" | "-h" => Err(usage()),
        other => Err(format!("unknown command '{}'\n\n{}", other, usage())),
    }
}

/// Removes `--config <file>` from anywhere in the argument list.
fn take_config(args: Vec<String>) -> Result<(Config, Vec<String>), String> {
    let mut rest = Vec::with_capacity(args.len());
    let mut config = None;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        if arg == "--config" {
            let path = it
                .next()
                .ok_or_else(|| "missing file after --config".to_string())?;
            let loaded = Config::load_from_file(&path)
                .map_err(|e| format!("failed to load config '{}': {}", path, e))?;
            config = Some(loaded);
        } else {
            rest.push(arg);
        }
    }
    Ok((config.unwrap_or_default(), rest))
}

fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn cmd_tokens(args: &[String]) -> Result<(), String> {
    let (input, json) = match args {
        [input] => (input, false),
        [input, flag] if flag == "--json" => (input, true),
        _ => return Err("usage: cc0 tokens <input.c0> [--json]".to_string()),
    };
    let src = read_source(input)?;
    let tokens = scanner::scan(&src).map_err(|e| e.to_string())?;
    if json {
        let text = serde_json::to_string_pretty(&tokens).map_err(|e| e.to_string())?;
        println!("{text}");
    } else {
        for t in &tokens {
            println!("{t}");
        }
    }
    Ok(())
}

fn cmd_compile(args: &[String], config: &Config) -> Result<(), String> {
    if args.is_empty() {
        return Err("usage: cc0 compile <input.c0> [-s | -c | --json] [-o <out>]".to_string());
    }
    let input = args[0].as_str();
    let mut emit = config.emit;
    let mut out = "-";
    let mut i = 1usize;
    while i < args.len() {
        match args[i].as_str() {
            "-s" => emit = Emit::Assembly,
            "-c" => emit = Emit::Object,
            "--json" => emit = Emit::Json,
            "-o" | "--output" => {
                i += 1;
                out = args
                    .get(i)
                    .map(|s| s.as_str())
                    .ok_or_else(|| "missing file after -o".to_string())?;
            }
            other => return Err(format!("unknown flag '{}'", other)),
        }
        i += 1;
    }

    let src = read_source(input)?;
    let program = compile_source(&src).map_err(|e| format!("{}: {}", input, e))?;
    let bytes = match emit {
        Emit::Json => program.to_json().map_err(|e| e.to_string())?.into_bytes(),
        Emit::Assembly | Emit::Object => {
            let module = ObjectModule::from_program(&program).map_err(|e| e.to_string())?;
            if emit == Emit::Object {
                object::encode(&module).map_err(|e| e.to_string())?
            } else {
                assembly::render(&module).into_bytes()
            }
        }
    };
    debug!(input, out, bytes = bytes.len(), ?emit, "compiled");
    write_output(out, &bytes)
}

fn cmd_run(args: &[String], config: &Config) -> Result<(), String> {
    if args.len() != 1 {
        return Err("usage: cc0 run <input.c0>".to_string());
    }
    let input = args[0].as_str();
    let src = read_source(input)?;
    let program = compile_source(&src).map_err(|e| format!("{}: {}", input, e))?;
    let module = ObjectModule::from_program(&program).map_err(|e| e.to_string())?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    Vm::new(&module, stdin.lock(), stdout.lock())
        .with_max_call_depth(config.vm.max_call_depth)
        .run()
        .map_err(|e| e.to_string())
}

fn cmd_runo(args: &[String], config: &Config) -> Result<(), String> {
    if args.len() != 1 {
        return Err("usage: cc0 runo <input.o0>".to_string());
    }
    let input = args[0].as_str();
    let bytes = std::fs::read(input).map_err(|e| format!("failed to read '{}': {}", input, e))?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_object(
        &bytes,
        stdin.lock(),
        stdout.lock(),
        config.vm.max_call_depth,
    )
    .map_err(|e| e.to_string())
}

fn cmd_disasm(args: &[String]) -> Result<(), String> {
    if args.len() != 1 {
        return Err("usage: cc0 disasm <input.o0>".to_string());
    }
    let input = args[0].as_str();
    let bytes = std::fs::read(input).map_err(|e| format!("failed to read '{}': {}", input, e))?;
    let text = disasm_object(&bytes).map_err(|e| e.to_string())?;
    print!("{text}");
    Ok(())
}

/// Prints the effective configuration, or writes it with `-o <file>`.
fn cmd_config(args: &[String], config: &Config) -> Result<(), String> {
    match args {
        [] => {
            println!("{}", config.to_json().map_err(|e| e.to_string())?);
            Ok(())
        }
        [flag, path] if flag == "-o" => config
            .save_to_file(path)
            .map_err(|e| format!("failed to write '{}': {}", path, e)),
        _ => Err("usage: cc0 config [-o <file.json>]".to_string()),
    }
}

fn read_source(path: &str) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("failed to read '{}': {}", path, e))
}

fn write_output(out: &str, bytes: &[u8]) -> Result<(), String> {
    if out == "-" {
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(bytes)
            .and_then(|_| stdout.flush())
            .map_err(|e| format!("failed to write stdout: {}", e))
    } else {
        std::fs::write(out, bytes).map_err(|e| format!("failed to write '{}': {}", out, e))
    }
}

fn usage() -> String {
    [
        "c0 toolchain",
        "  cc0 tokens <input.c0> [--json]",
        "  cc0 compile <input.c0> [-s | -c | --json] [-o <out>]",
        "  cc0 run <input.c0>",
        "  cc0 runo <input.o0>",
        "  cc0 disasm <input.o0>",
        "  cc0 config [-o <file.json>]",
        "  cc0 grammar",
        "global flags: --config <file.json>; RUST_LOG overrides the log filter",
    ]
    .join("\n")
}
