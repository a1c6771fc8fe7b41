use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use cli::{
    handlers::{ConfigArgs, handle_convert, handle_inspect, handle_schema},
    logging::init_logging,
};

#[derive(Parser)]
#[command(name = "veritas-cli", version, about = "Convert saved-module exports into single-file checkpoints")]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a saved module and write it as one checkpoint file
    Convert {
        /// Folder with data.pkl and data/
        saved_module: PathBuf,
        /// Checkpoint file to create
        output: PathBuf,
        #[command(flatten)]
        config: ConfigArgs,
        /// Validate parameters against this schema before writing
        #[arg(long, value_name = "FILE")]
        schema: Option<PathBuf>,
        /// Classifier outputs expected by the schema's head
        #[arg(long, requires = "schema")]
        num_classes: Option<usize>,
    },
    /// List every parameter of a saved module or checkpoint
    Inspect {
        /// Saved module folder or checkpoint file
        path: PathBuf,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Write the parameter schema of a saved module or checkpoint as JSON
    Schema {
        /// Saved module folder or checkpoint file
        path: PathBuf,
        /// Schema file to create
        output: PathBuf,
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Convert {
            saved_module,
            output,
            config,
            schema,
            num_classes,
        }) => handle_convert(saved_module, output, config, schema, num_classes),
        Some(Commands::Inspect {
            path,
            config,
        }) => handle_inspect(path, config),
        Some(Commands::Schema {
            path,
            output,
            config,
        }) => handle_schema(path, output, config),
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            Ok(())
        },
    }
}
