use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Tensor layout string such as `NCHW`, `HWOI` or `NCHW4c`.
///
/// Upper-case letters are primal axes, a lower-case letter with a numeric
/// prefix is a sub-block of the matching primal axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Layout {
    Nchw,
    Nhwc,
    Hwcn,
    /// `NCHW<n>c`: channels split into blocks of `n`.
    NchwC(usize),
    Oihw,
    Hwoi,
    Hwio,
    Ncdhw,
    Ndhwc,
    Other(String),
}

impl Layout {
    pub fn parse(s: &str) -> Layout {
        match s {
            "NCHW" => Layout::Nchw,
            "NHWC" => Layout::Nhwc,
            "HWCN" => Layout::Hwcn,
            "OIHW" => Layout::Oihw,
            "HWOI" => Layout::Hwoi,
            "HWIO" => Layout::Hwio,
            "NCDHW" => Layout::Ncdhw,
            "NDHWC" => Layout::Ndhwc,
            _ => s
                .strip_prefix("NCHW")
                .and_then(|rest| rest.strip_suffix('c'))
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|&n| n > 0)
                .map_or_else(|| Layout::Other(s.to_string()), Layout::NchwC),
        }
    }

    /// Position of axis `c` in a tensor of this layout. Digits are block
    /// sizes, not axes.
    pub fn axis_index(&self, c: char) -> Option<usize> {
        self.to_string()
            .chars()
            .filter(|ch| ch.is_ascii_alphabetic())
            .position(|ch| ch == c)
    }

    pub fn ndim(&self) -> usize {
        self.to_string()
            .chars()
            .filter(|ch| ch.is_ascii_alphabetic())
            .count()
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.to_string().starts_with(prefix)
    }
}

impl FromStr for Layout {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Layout::parse(s))
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Nchw => write!(f, "NCHW"),
            Layout::Nhwc => write!(f, "NHWC"),
            Layout::Hwcn => write!(f, "HWCN"),
            Layout::NchwC(n) => write!(f, "NCHW{}c", n),
            Layout::Oihw => write!(f, "OIHW"),
            Layout::Hwoi => write!(f, "HWOI"),
            Layout::Hwio => write!(f, "HWIO"),
            Layout::Ncdhw => write!(f, "NCDHW"),
            Layout::Ndhwc => write!(f, "NDHWC"),
            Layout::Other(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Layout::parse("NCHW"), Layout::Nchw);
        assert_eq!(Layout::parse("NCHW4c"), Layout::NchwC(4));
        assert_eq!(Layout::parse("NCHW16c").to_string(), "NCHW16c");
        assert_eq!(Layout::parse("NCHW0c"), Layout::Other("NCHW0c".to_string()));
        assert_eq!(Layout::parse("OIHW4i4o"), Layout::Other("OIHW4i4o".to_string()));
    }

    #[test]
    fn test_axis_index() {
        assert_eq!(Layout::Nhwc.axis_index('C'), Some(3));
        assert_eq!(Layout::NchwC(4).axis_index('c'), Some(4));
        assert_eq!(Layout::NchwC(4).ndim(), 5);
        assert_eq!(Layout::Hwoi.axis_index('O'), Some(2));
        assert_eq!(Layout::Ncdhw.axis_index('D'), Some(2));
        assert_eq!(Layout::Oihw.axis_index('N'), None);
    }
}
