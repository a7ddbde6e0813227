#![allow(clippy::collapsible_if)]

pub mod diagnostics;
pub mod language;
pub mod project;
pub mod reload;
pub mod runtime;

#[cfg(test)]
mod tests;
