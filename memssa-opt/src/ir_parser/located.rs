use std::fmt;

use nom_locate::LocatedSpan;

pub type LocatedStr<'a> = LocatedSpan<&'a str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

pub fn to_pos(located: &LocatedStr) -> Pos {
    Pos {
        line: located.location_line() as usize,
        column: located.get_utf8_column(),
    }
}
