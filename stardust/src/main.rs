use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// A language for declaring data-bound, GPU-instanced graphical marks
#[derive(Parser)]
#[clap(author, version, about)]
enum Cli {
    /// Parse and compile a source file, reporting any errors
    Check {
        /// Path to the source file, or `-` for stdin
        #[clap(name = "FILE")]
        file: PathOrStdin,
    },
    /// Compile a source file, printing the specification of each mark and
    /// shader
    Compile {
        /// Path to the source file, or `-` for stdin
        #[clap(name = "FILE")]
        file: PathOrStdin,
        /// Only print the mark or shader with this name
        #[clap(long = "mark", name = "NAME")]
        mark: Option<String>,
        /// Rewrite each specification so that one vertex index selects one
        /// emit
        #[clap(long = "flatten")]
        flatten: bool,
    },
    /// Evaluate a mark with its default inputs, printing each vertex
    Eval {
        /// Path to the source file, or `-` for stdin
        #[clap(name = "FILE")]
        file: PathOrStdin,
        /// The mark or shader to evaluate
        #[clap(long = "mark", name = "NAME")]
        mark: String,
    },
}

#[derive(Clone, Debug)]
enum PathOrStdin {
    StdIn,
    Path(PathBuf),
}

impl std::str::FromStr for PathOrStdin {
    type Err = std::convert::Infallible;

    fn from_str(src: &str) -> Result<PathOrStdin, std::convert::Infallible> {
        match src {
            "-" => Ok(PathOrStdin::StdIn),
            _ => Ok(PathOrStdin::Path(PathBuf::from(src))),
        }
    }
}

fn unwrap_or_exit<T>(option: Option<T>) -> T {
    option.unwrap_or_else(|| std::process::exit(stardust::Status::Error.exit_code()))
}

fn load_file_or_exit(driver: &mut stardust::Driver, file: PathOrStdin) -> stardust::source::FileId {
    unwrap_or_exit(match file {
        PathOrStdin::StdIn => driver.load_source("<stdin>".to_owned(), std::io::stdin()),
        PathOrStdin::Path(path) => driver.load_source_path(&path),
    })
}

const MAX_PRETTY_WIDTH: usize = 80;

fn get_pretty_width() -> usize {
    let term_width = termsize::get().map_or(usize::MAX, |size| usize::from(size.cols));
    std::cmp::min(term_width, MAX_PRETTY_WIDTH)
}

fn new_driver() -> stardust::Driver {
    let mut driver = stardust::Driver::new();
    driver.install_panic_hook();
    driver.set_emit_width(get_pretty_width());
    driver
}

fn main() -> ! {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let status = match Cli::parse() {
        Cli::Check { file } => {
            let mut driver = new_driver();
            let file_id = load_file_or_exit(&mut driver, file);
            driver.check(file_id)
        }
        Cli::Compile {
            file,
            mark,
            flatten,
        } => {
            let mut driver = new_driver();
            let file_id = load_file_or_exit(&mut driver, file);
            driver.compile_and_emit(file_id, mark.as_deref(), flatten)
        }
        Cli::Eval { file, mark } => {
            let mut driver = new_driver();
            let file_id = load_file_or_exit(&mut driver, file);
            driver.eval_and_emit(file_id, &mark)
        }
    };

    std::process::exit(status.exit_code());
}
