//! Run command implementation for tomopar CLI.
//!
//! Loads a raw volume, applies one filter to every slice and writes it back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tomopar_core::{
    ElementType, ExecutionConfig, ExecutionReport, Executor, OperationDescriptor, ProgressSink,
    Volume, normalised_counts,
};

use crate::colors;
use crate::raw::{self, RawElement};

/// Options of `tomopar run`.
pub struct RunArgs {
    pub input: PathBuf,
    pub shape: [usize; 3],
    pub dtype: String,
    pub filter: String,
    pub params: Vec<(String, serde_json::Value)>,
    pub counts: Option<PathBuf>,
    pub cores: usize,
    pub chunk_size: Option<usize>,
    pub sequential: bool,
    pub output: Option<PathBuf>,
    pub json: bool,
}

/// Parse `NAME=VALUE`; the value is JSON when it parses as JSON, else a string.
pub fn parse_param(s: &str) -> Result<(String, serde_json::Value), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{}`", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in `{}`", s));
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| serde_json::Value::String(value.trim().to_string()));
    Ok((name.to_string(), value))
}

/// Execute a filter over a raw volume file.
pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    match args.dtype.parse::<ElementType>()? {
        ElementType::F32 => run_typed::<f32>(&args),
        ElementType::F64 => run_typed::<f64>(&args),
    }
}

fn run_typed<T: RawElement>(args: &RunArgs) -> anyhow::Result<()> {
    let start = Instant::now();
    let executor = Executor::new()?;

    let operation = args
        .params
        .iter()
        .fold(OperationDescriptor::builder(&args.filter), |builder, (name, value)| {
            builder.param_json(name, value)
        })
        .build(executor.registry())?;

    let data = raw::read_volume::<T>(&args.input, args.shape)?;
    let mut volume = Volume::from_array(data);

    if !args.json {
        println!(
            "{}Running{} {} over {} ({} slices, {})",
            colors::BOLD,
            colors::RESET,
            args.filter,
            args.input.display(),
            args.shape[0],
            T::TYPE
        );
    }

    let config = config_for(args);
    let report = match &args.counts {
        Some(path) => {
            let counts = raw::read_counts(path)?;
            let mut pair = normalised_counts(&counts)?;
            executor.execute_paired(&mut volume, &mut pair, &operation, &config)?
        }
        None => executor.execute(&mut volume, &operation, &config)?,
    };

    let output = args.output.as_ref().unwrap_or(&args.input);
    let data = volume.into_array()?;
    raw::write_volume(output, &data)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, start, output);
    }
    Ok(())
}

fn config_for(args: &RunArgs) -> ExecutionConfig {
    let mut config = if args.sequential {
        ExecutionConfig::sequential()
    } else {
        ExecutionConfig::default()
    };
    config = config.with_cores(args.cores);
    if let Some(chunk_size) = args.chunk_size {
        config = config.with_chunk_size(chunk_size);
    }
    if !args.json {
        config = config.with_progress(progress_line());
    }
    config
}

fn progress_line() -> Arc<dyn ProgressSink> {
    Arc::new(|current: u64, total: u64| {
        print!("\r  {}{}/{}{} slices", colors::CYAN, current, total, colors::RESET);
        if current == total {
            println!();
        }
        colors::flush_stdout();
    })
}

fn print_summary(report: &ExecutionReport, start: Instant, output: &Path) {
    let strategy = match report.workers {
        0 => "sequential".to_string(),
        workers => format!("{} workers, {} chunks", workers, report.chunks),
    };
    println!(
        "{}Completed{} {} slices in {:.2}s ({}) -> {}",
        colors::GREEN,
        colors::RESET,
        report.slices_processed,
        start.elapsed().as_secs_f64(),
        strategy,
        output.display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("sigma=1.5").unwrap(), ("sigma".to_string(), serde_json::json!(1.5)));
        assert_eq!(parse_param("mode=reflect").unwrap(), ("mode".to_string(), serde_json::json!("reflect")));
        assert_eq!(parse_param("mode=\"wrap\"").unwrap().1, serde_json::json!("wrap"));
        assert_eq!(parse_param("index = 3").unwrap(), ("index".to_string(), serde_json::json!(3)));
        assert!(parse_param("sigma").is_err());
        assert!(parse_param("=1").is_err());
    }
}
