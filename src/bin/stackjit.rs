//! Compile and run one function of a bytecode listing.
//!
//! ```text
//! stackjit tests/listings/basicmath.lst --function add --arg 3 --arg 4.0
//! stackjit tests/listings/loops.lst --function sum --arg 10 --emit-ir
//! stackjit tests/listings/calls.lst --function fib --arg 20 -O 2
//! ```

use bumpalo::Bump;
use clap::Parser;
use inkwell::context::Context;
use stackjit::{parse_listing, CompilationSession, CompileOptions, Compiler, Scalar};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "stackjit", about = "Compile stack bytecode listings with LLVM and run them")]
struct Args {
    /// Disassembly listing to compile
    listing: PathBuf,

    /// Function to compile (defaults to the first one in the listing)
    #[arg(long, short = 'f', value_name = "NAME")]
    function: Option<String>,

    /// Call argument: an integer, a float, True or False (repeatable)
    #[arg(
        long = "arg",
        short = 'a',
        value_name = "VALUE",
        value_parser = parse_scalar,
        allow_hyphen_values = true
    )]
    args: Vec<Scalar>,

    /// Print the LLVM IR instead of running the function
    #[arg(long, action = clap::ArgAction::SetTrue)]
    emit_ir: bool,

    /// LLVM optimisation level applied before execution
    #[arg(short = 'O', value_name = "LEVEL", default_value_t = 0)]
    opt_level: u8,

    /// Skip LLVM module verification
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_verify: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_scalar(text: &str) -> Result<Scalar, String> {
    match Scalar::parse(text) {
        Some(Scalar::None) => Err("None cannot be passed as an argument".to_string()),
        Some(value) => Ok(value),
        None => Err(format!("'{text}' is not a number or boolean")),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(&args.listing)
        .map_err(|e| format!("cannot read {}: {e}", args.listing.display()))?;
    let listing = parse_listing(&text)?;
    let entry = match &args.function {
        Some(name) => name.clone(),
        None => listing
            .functions
            .first()
            .map(|code| code.name().to_string())
            .ok_or_else(|| format!("{} defines no functions", args.listing.display()))?,
    };

    let options = CompileOptions::new()
        .with_opt_level(args.opt_level)
        .with_verify(!args.no_verify)
        .with_dump_ir(args.verbose >= 2);

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let context = Context::create();
    let compiler = Compiler::new(&context, &session, options);
    let compiled = compiler.compile(&listing, &entry, &args.args)?;

    if args.emit_ir {
        print!("{}", compiled.ir_text());
    } else {
        let jit = compiled.into_jit(options.opt_level)?;
        println!("{}", jit.run()?);
    }
    log::info!("{}", session.stats());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
