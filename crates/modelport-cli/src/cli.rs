use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "modelport", version, about = "Uniform model-runtime CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve an artifact's backend and print its tensor signature
    Inspect {
        /// Path to the model artifact (file or directory)
        model_path: String,

        /// Device for inference (cpu, gpu:N or opencl:N)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Log level (RUST_LOG)
        #[arg(long, default_value = "info")]
        log: String,
    },

    /// Load an artifact, bind inputs from a JSON file, execute and print
    /// the outputs as JSON
    Run {
        /// Path to the model artifact (file or directory)
        model_path: String,

        /// JSON file mapping input names to {dtype, shape, values}
        #[arg(long)]
        inputs: String,

        /// Device for inference (cpu, gpu:N or opencl:N)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Enforce exact dtype matches on float32-declared inputs
        #[arg(long)]
        strict_dtypes: bool,

        /// Log level (RUST_LOG)
        #[arg(long, default_value = "info")]
        log: String,
    },
}
