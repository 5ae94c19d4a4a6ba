//! Lux Effect-Script Compiler Driver
//!
//! Command-line interface: compile scripts to bytecode artifacts, or
//! compile-and-run them directly on the embedded VM.

use clap::{Parser, Subcommand};
use luxc_ir::PassConfig;
use luxvm::Vm;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "luxc")]
#[command(about = "Lux Effect-Script Compiler")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a script to a bytecode artifact
    Compile {
        /// Input script file
        input: PathBuf,

        /// Output bytecode file (JSON); defaults to the input with a
        /// .luxbc extension
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Passes to run: `all`, `none`, or a comma list of
        /// ssa,gvn,licm,lssched, optionally with `strict`
        #[arg(long, default_value = "all")]
        passes: String,

        /// Print the optimized IR to stdout
        #[arg(long)]
        print_ir: bool,

        /// Print a disassembly of the generated bytecode
        #[arg(long)]
        disasm: bool,
    },

    /// Compile a script and run a function on the VM
    Run {
        /// Input script file
        input: PathBuf,

        /// Function to call
        #[arg(short, long, default_value = "init")]
        entry: String,

        /// Integer arguments for the entry function
        args: Vec<i32>,

        /// Passes to run before executing
        #[arg(long, default_value = "all")]
        passes: String,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            passes,
            print_ir,
            disasm,
        } => compile_command(&input, output, &passes, print_ir, disasm),
        Commands::Run {
            input,
            entry,
            args,
            passes,
        } => run_command(&input, &entry, &args, &passes),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn parse_passes(passes: &str) -> Result<PassConfig, Box<dyn std::error::Error>> {
    passes.parse::<PassConfig>().map_err(|e| e.into())
}

fn compile_command(
    input: &PathBuf,
    output: Option<PathBuf>,
    passes: &str,
    print_ir: bool,
    disasm: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_passes(passes)?;
    let source = fs::read_to_string(input)?;
    let filename = input.to_string_lossy();

    let module = luxc_driver::compile_to_ir(&source, &filename, &config)?;
    if print_ir {
        println!("{}", module);
    }

    let program = luxc_codegen::generate(&module)?;
    if disasm {
        println!("{}", program);
    }

    let output = output.unwrap_or_else(|| {
        let mut path = input.clone();
        path.set_extension("luxbc");
        path
    });
    fs::write(&output, serde_json::to_string_pretty(&program)?)?;
    println!(
        "compiled {} (passes: {}) -> {}",
        input.display(),
        config,
        output.display()
    );
    Ok(())
}

fn run_command(
    input: &PathBuf,
    entry: &str,
    args: &[i32],
    passes: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_passes(passes)?;
    let program = luxc_driver::compile_file(input, &config)?;

    let mut vm = Vm::new(program);
    let result = vm.run(entry, args)?;
    println!("{}({:?}) = {}", entry, args, result);
    for (name, value) in vm.dump_globals() {
        println!("  {} = {}", name, value);
    }
    Ok(())
}
