use std::fs;
use std::panic;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use cpscheme::disasm::disassemble_unit;
use cpscheme::{Config, Error, Interpreter, ParseErrorKind, Value};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "cpscheme")]
#[command(about = "Compile Scheme to continuation-passing bytecode and run it")]
struct Cli {
    /// Script to run instead of starting the REPL
    file: Option<PathBuf>,

    /// Evaluate an expression and exit
    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,

    /// Slots in the VM frame stack
    #[arg(long = "stack-size", default_value_t = cpscheme::DEFAULT_STACK_SIZE)]
    stack_size: usize,

    /// Print the CPS form of each input before running it
    #[arg(long)]
    cps: bool,

    /// Print the bytecode of each input before running it
    #[arg(long)]
    disassemble: bool,

    /// Print each compiled unit as JSON before running it
    #[cfg(feature = "json")]
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Options {
    show_cps: bool,
    disassemble: bool,
    json: bool,
}

impl Options {
    fn from_cli(cli: &Cli) -> Self {
        Options {
            show_cps: cli.cps,
            disassemble: cli.disassemble,
            #[cfg(feature = "json")]
            json: cli.json,
            #[cfg(not(feature = "json"))]
            json: false,
        }
    }
}

/// `RUST_LOG` overrides the default filter
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cpscheme=warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let options = Options::from_cli(&cli);
    let config = Config {
        stack_size: cli.stack_size,
        ..Config::default()
    };

    if let Some(source) = &cli.eval {
        process::exit(run_script(config, source, options));
    }
    if let Some(path) = &cli.file {
        match fs::read_to_string(path) {
            Ok(source) => process::exit(run_script(config, &source, options)),
            Err(err) => {
                eprintln!("Cannot read {}: {err}", path.display());
                process::exit(2);
            }
        }
    }

    let result = panic::catch_unwind(|| {
        run_repl(config, options);
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Evaluate one source text; returns the process exit code
fn run_script(config: Config, source: &str, options: Options) -> i32 {
    let interp = Interpreter::new(config);
    match evaluate(&interp, source, options) {
        Ok(value) => {
            print_value(&value);
            0
        }
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    }
}

fn evaluate(interp: &Interpreter, source: &str, options: Options) -> Result<Value, Error> {
    if options.show_cps {
        println!("→ {}", interp.cps_form(source)?);
    }
    let unit = interp.compile_source(source)?;
    if options.disassemble {
        print!("{}", disassemble_unit(&unit));
    }
    #[cfg(feature = "json")]
    if options.json {
        println!("{:#}", cpscheme::artifact::unit_to_json(&unit));
    }
    interp.run_unit(&unit)
}

fn print_value(value: &Value) {
    // Don't print Unspecified values (e.g., from define)
    if !matches!(value, Value::Unspecified) {
        println!("{value}");
    }
}

fn run_repl(config: Config, mut options: Options) {
    println!("cpscheme: Scheme on a continuation-passing bytecode VM");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            process::exit(1);
        }
    };
    let interp = Interpreter::new(config);
    // Lines of a datum that is still open
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "cpscheme> " } else { "      ... " };
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if pending.is_empty() {
                    if line.is_empty() {
                        continue;
                    }
                    match line {
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(&interp);
                            continue;
                        }
                        ":cps" => {
                            options.show_cps = !options.show_cps;
                            println!("CPS display {}", on_off(options.show_cps));
                            continue;
                        }
                        ":dis" => {
                            options.disassemble = !options.disassemble;
                            println!("Disassembly {}", on_off(options.disassemble));
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                pending.push_str(line);
                pending.push('\n');

                match evaluate(&interp, &pending, options) {
                    Err(Error::Parse(err)) if err.kind == ParseErrorKind::Incomplete => continue,
                    Ok(value) => print_value(&value),
                    Err(err) => println!("Error: {err}"),
                }
                let _ = rl.add_history_entry(pending.trim_end());
                pending.clear();
            }

            Err(ReadlineError::Interrupted) if !pending.is_empty() => {
                pending.clear();
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

fn print_help() {
    println!("Commands:");
    println!("  :help         show this message");
    println!("  :cps          toggle printing the CPS form of each input");
    println!("  :dis          toggle printing the bytecode of each input");
    println!("  :env          list global bindings");
    println!("  :quit, :exit  leave the REPL");
    println!();
    println!("Special forms: quote if define set! lambda begin let");
    println!("Builtins: {}", cpscheme::prelude::names().collect::<Vec<_>>().join(" "));
}

fn print_environment(interp: &Interpreter) {
    let bindings = interp.module().bindings();
    println!("Global bindings ({}):", bindings.len());
    for (name, value) in bindings {
        println!("  {name} = {value}");
    }
}
