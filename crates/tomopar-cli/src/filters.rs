//! Filters command implementation for tomopar CLI.

use tomopar_core::FilterRegistry;

use crate::colors;

/// List the built-in filters.
pub fn execute() {
    let registry = FilterRegistry::builtin();
    println!("{}Filters:{}", colors::BOLD, colors::RESET);
    for filter in registry.iter() {
        println!(
            "  {}{:<18}{} {}{:<11}{} {}",
            colors::GREEN,
            filter.name(),
            colors::RESET,
            colors::DIM,
            filter.forwarding().name(),
            colors::RESET,
            filter.summary()
        );
    }
}
