use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "js2sb3",
    about = "Compiles a restricted JavaScript subset into a Scratch 3 (.sb3) project."
)]
pub struct Args {
    /// A .js or .html file, a directory of sources, or a .zip bundle.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output path; the extension is forced to .sb3. Defaults to the
    /// input name next to the input.
    #[arg(short = 'o', long = "output", value_name = "OUTPUT")]
    pub output: Option<PathBuf>,
}
