mod errors;
pub use errors::*;

#[cfg(test)]
pub mod test;
