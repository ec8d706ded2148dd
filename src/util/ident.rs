use std::fmt;

/// An identifier string
///
/// It is really just a string slice.
/// The 'src lifetime refers to the source code string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident<'src>(&'src str);

impl<'src> Ident<'src> {
    pub fn new(name: &'src str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'src str {
        self.0
    }
}

impl fmt::Display for Ident<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'src> From<&'src str> for Ident<'src> {
    fn from(value: &'src str) -> Self {
        Self(value)
    }
}
