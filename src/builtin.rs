//! Builtin runtime functions
//!
//! These functions are provided by the generated runtime instead of being
//! declared in source code. They are called like any other function.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// Write the low byte of its argument to the console
    Putchar,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "putchar" => Some(Self::Putchar),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Putchar => "putchar",
        }
    }

    pub fn param_count(self) -> usize {
        match self {
            Self::Putchar => 1,
        }
    }

    pub fn return_count(self) -> usize {
        match self {
            Self::Putchar => 0,
        }
    }
}
