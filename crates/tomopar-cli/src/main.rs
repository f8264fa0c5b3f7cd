//! tomopar CLI - parallel slice filters for tomographic volumes.

mod colors;
mod estimate;
mod filters;
mod raw;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tomopar")]
#[command(about = "Apply slice filters to tomographic volumes across worker processes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the memory needed to load a volume
    Estimate {
        /// Volume shape as SLICES,ROWS,COLUMNS
        #[arg(long, value_parser = raw::parse_shape)]
        shape: [usize; 3],

        /// Element type (f32 or f64)
        #[arg(long, default_value = "f32")]
        dtype: String,

        /// First slice index of the loaded range
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// End of the loaded range (defaults to the number of slices)
        #[arg(long)]
        end: Option<usize>,

        /// Load every STEP-th slice
        #[arg(long, default_value_t = 1)]
        step: usize,

        /// Print the estimates as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the available filters
    Filters,

    /// Run a filter over a raw little-endian volume file
    Run {
        /// Path to the raw volume
        input: PathBuf,

        /// Volume shape as SLICES,ROWS,COLUMNS
        #[arg(long, value_parser = raw::parse_shape)]
        shape: [usize; 3],

        /// Element type (f32 or f64)
        #[arg(long, default_value = "f32")]
        dtype: String,

        /// Filter to apply
        #[arg(short, long)]
        filter: String,

        /// Filter parameter as NAME=VALUE (VALUE is parsed as JSON, else taken as a string)
        #[arg(short, long = "param", value_parser = run::parse_param)]
        params: Vec<(String, serde_json::Value)>,

        /// Per-slice monitor counts for two-input filters
        #[arg(long)]
        counts: Option<PathBuf>,

        /// Worker processes (0 = one per core)
        #[arg(long, default_value_t = 0)]
        cores: usize,

        /// Slices per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Run in this process without workers
        #[arg(long)]
        sequential: bool,

        /// Write the result here instead of overwriting the input
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the execution report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Helper to format tomopar-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<tomopar_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Estimate {
            shape,
            dtype,
            start,
            end,
            step,
            json,
        } => {
            let range = estimate::Range {
                start,
                end: end.unwrap_or(shape[0]),
                step,
            };
            estimate::execute(shape, &dtype, range, json).map_err(format_error)?;
        }

        Commands::Filters => filters::execute(),

        Commands::Run {
            input,
            shape,
            dtype,
            filter,
            params,
            counts,
            cores,
            chunk_size,
            sequential,
            output,
            json,
        } => {
            let args = run::RunArgs {
                input,
                shape,
                dtype,
                filter,
                params,
                counts,
                cores,
                chunk_size,
                sequential,
                output,
                json,
            };
            run::execute(args).map_err(format_error)?;
        }
    }

    Ok(())
}
