use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result, miette};
use std::{fs, io::Read, path::PathBuf};
use thiserror::Error;
use tracing::info;
use veil::render_error;
use veil_core::{
    ObfuscatorOptions,
    driver::Virtualizer,
    eval::{self, EvalLimits, HostProfile},
    options::Dispatch,
    parser, printer,
    rng::VeilRng,
};

/// Veil - virtualize Lua functions behind a generated interpreter
#[derive(Parser, Debug)]
#[command(name = "veil")]
#[command(about = "Obfuscate Lua source by virtualization", long_about = None)]
struct Args {
    /// Input file (reads stdin if not provided)
    input: Option<PathBuf>,

    /// Write the result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON options file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    seed: Option<String>,

    #[arg(long, value_enum)]
    dispatch: Option<DispatchArg>,

    /// Repeat the pass this many times
    #[arg(long)]
    layers: Option<usize>,

    /// Only virtualize these functions (comma separated)
    #[arg(long, value_delimiter = ',')]
    functions: Option<Vec<String>>,

    /// Also virtualize runs of top-level statements
    #[arg(long)]
    chunk: bool,

    /// Run input and output with the reference evaluator and compare
    #[arg(long)]
    check: bool,

    /// Run the result with the reference evaluator and print what it
    /// printed; the source only goes to `--output`
    #[arg(long)]
    run: bool,

    /// Print what was virtualized and skipped to stderr
    #[arg(long)]
    debug: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DispatchArg {
    Linear,
    Block,
}

#[derive(Debug, Error)]
enum CheckError {
    #[error("output printed {actual:?}, input printed {expected:?}")]
    Output { expected: String, actual: String },
    #[error("output returned {actual}, input returned {expected}")]
    Values { expected: String, actual: String },
}

fn load_options(args: &Args) -> Result<ObfuscatorOptions> {
    let mut options = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).into_diagnostic()?;
            ObfuscatorOptions::from_json(&text).into_diagnostic()?
        }
        None => ObfuscatorOptions::default(),
    };
    if let Some(seed) = &args.seed {
        options.seed = seed.clone();
    }
    if let Some(dispatch) = args.dispatch {
        options.vm.dispatch = match dispatch {
            DispatchArg::Linear => Dispatch::Linear,
            DispatchArg::Block => Dispatch::Block,
        };
    }
    if let Some(layers) = args.layers {
        options.vm.layers = layers;
    }
    if let Some(functions) = &args.functions {
        options.vm.functions = Some(functions.clone());
    }
    options.vm.virtualize_chunk |= args.chunk;
    options.vm.debug |= args.debug;
    Ok(options)
}

fn read_input(input: &Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) => fs::read_to_string(path).into_diagnostic(),
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).into_diagnostic()?;
            Ok(text)
        }
    }
}

fn obfuscate(source: &str, options: &ObfuscatorOptions, debug: bool) -> veil_core::Result<String> {
    let mut chunk = parser::parse(source)?;
    let mut rng = VeilRng::from_seed_str(&options.seed);
    let report = Virtualizer::new(&options.vm, &mut rng).run(&mut chunk)?;
    info!(
        virtualized = report.virtualized.len(),
        skipped = report.skipped.len(),
        "virtualization finished"
    );
    if debug {
        for name in &report.virtualized {
            eprintln!("virtualized {}", name);
        }
        for skip in &report.skipped {
            eprintln!("skipped {}: {}", skip.name, skip.reason);
        }
    }
    Ok(printer::print_chunk(&chunk))
}

fn check(source: &str, output: &str) -> Result<()> {
    let run = |text: &str| -> Result<eval::Outcome> {
        let chunk = parser::parse(text).into_diagnostic()?;
        eval::run_chunk(&chunk, HostProfile::default(), EvalLimits::default()).into_diagnostic()
    };
    let expected = run(source)?;
    let actual = run(output)?;
    if expected.output != actual.output {
        return Err(CheckError::Output {
            expected: expected.output,
            actual: actual.output,
        })
        .into_diagnostic();
    }
    if expected.values != actual.values {
        return Err(CheckError::Values {
            expected: format!("{:?}", expected.values),
            actual: format!("{:?}", actual.values),
        })
        .into_diagnostic();
    }
    eprintln!("check passed");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging subscriber
    use tracing_subscriber::{EnvFilter, fmt};

    // Use RUST_LOG to control the log level; default to WARN, or DEBUG with --debug
    let default_level = if args.debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .into_diagnostic()?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let options = load_options(&args)?;
    let source = read_input(&args.input)?;

    let output = match obfuscate(&source, &options, args.debug) {
        Ok(output) => output,
        Err(e) => {
            render_error(&e, &source);
            return Err(miette!("obfuscation failed"));
        }
    };

    if args.check {
        check(&source, &output)?;
    }

    if let Some(path) = &args.output {
        fs::write(path, &output).into_diagnostic()?;
    }
    if args.run {
        let chunk = parser::parse(&output).into_diagnostic()?;
        let outcome =
            eval::run_chunk(&chunk, HostProfile::default(), EvalLimits::default()).into_diagnostic()?;
        print!("{}", outcome.output);
    } else if args.output.is_none() {
        print!("{}", output);
    }

    Ok(())
}
