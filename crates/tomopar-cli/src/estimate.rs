//! Estimate command implementation for tomopar CLI.
//!
//! Prints the memory a volume needs before anything is loaded.

use tomopar_core::{
    ElementType, MemoryEstimate, checked_volume_bytes, estimate_for_index_range,
    peak_execution_bytes, single_slice_bytes,
};

use crate::colors;

/// Slice range to be loaded.
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub start: usize,
    pub end: usize,
    pub step: usize,
}

/// Print slice, full-volume and ranged estimates.
pub fn execute(shape: [usize; 3], dtype: &str, range: Range, json: bool) -> anyhow::Result<()> {
    let element_type: ElementType = dtype.parse()?;

    let slice = MemoryEstimate::from_bytes(single_slice_bytes(shape, element_type));
    let full = MemoryEstimate::from_bytes(checked_volume_bytes(shape, element_type)?);
    let ranged = estimate_for_index_range(range.start, range.end, range.step, shape, element_type);
    let peak = MemoryEstimate::from_bytes(peak_execution_bytes(shape, element_type, true, true));

    if json {
        let value = serde_json::json!({
            "shape": shape,
            "dtype": element_type.name(),
            "slice": slice,
            "full": full,
            "range": {
                "start": range.start,
                "end": range.end,
                "step": range.step,
                "estimate": ranged,
            },
            "parallel_peak": peak,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!(
        "{}Volume{} {} x {} x {} ({})",
        colors::BOLD,
        colors::RESET,
        shape[0],
        shape[1],
        shape[2],
        element_type
    );
    print_line("Slice", &slice);
    print_line("Full volume", &full);
    print_line(
        &format!("Range {}..{} step {}", range.start, range.end, range.step),
        &ranged,
    );
    print_line("Parallel peak", &peak);

    Ok(())
}

fn print_line(label: &str, estimate: &MemoryEstimate) {
    println!(
        "  {:<24} {}{:.2} MB{} {}({} bytes){}",
        label,
        colors::CYAN,
        estimate.megabytes,
        colors::RESET,
        colors::DIM,
        estimate.bytes,
        colors::RESET
    );
}
