pub mod persona;
pub mod prompt;
