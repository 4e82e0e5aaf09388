use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{IrError, Result};

/// Backend family named by the first word of a target string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// General-purpose CPU through LLVM.
    Llvm,
    Cuda,
    /// OpenCL devices; `-device` selects a GPU family such as Mali Bifrost.
    OpenCl,
    /// Fixed-function rasterizer pipelines.
    OpenGl,
    /// FPGA fabrics through high-level synthesis.
    SdAccel,
    Aocl,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Llvm => "llvm",
            TargetKind::Cuda => "cuda",
            TargetKind::OpenCl => "opencl",
            TargetKind::OpenGl => "opengl",
            TargetKind::SdAccel => "sdaccel",
            TargetKind::Aocl => "aocl",
        }
    }
}

impl FromStr for TargetKind {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "llvm" => Ok(TargetKind::Llvm),
            "cuda" => Ok(TargetKind::Cuda),
            "opencl" => Ok(TargetKind::OpenCl),
            "opengl" => Ok(TargetKind::OpenGl),
            "sdaccel" => Ok(TargetKind::SdAccel),
            "aocl" => Ok(TargetKind::Aocl),
            other => Err(IrError::UnknownTarget(other.to_string())),
        }
    }
}

/// CPU names that carry 512-bit vector units.
const AVX512_CPUS: &[&str] = &["skylake-avx512", "cascadelake", "icelake-client", "icelake-server"];

/// A parsed target identifier such as `"opencl -device=bifrost"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    kind: TargetKind,
    options: BTreeMap<String, String>,
}

impl Target {
    /// Parse `"<kind> -key=value -key=value"`.
    ///
    /// Recognised options: `-device`, `-model`, `-mcpu`, `-libs` and
    /// `-vector-width`. Unrecognised options are kept verbatim.
    pub fn parse(s: &str) -> Result<Target> {
        let mut words = s.split_whitespace();
        let kind: TargetKind = words
            .next()
            .ok_or_else(|| IrError::UnknownTarget(s.to_string()))?
            .parse()?;

        let mut options = BTreeMap::new();
        for word in words {
            let body = word.strip_prefix('-').ok_or_else(|| IrError::InvalidTargetOption {
                option: word.to_string(),
                reason: "options start with '-'".to_string(),
            })?;
            let (key, value) = body.split_once('=').unwrap_or((body, ""));
            if key.is_empty() {
                return Err(IrError::InvalidTargetOption {
                    option: word.to_string(),
                    reason: "empty option name".to_string(),
                });
            }
            options.insert(key.to_string(), value.to_string());
        }

        let target = Target { kind, options };
        if let Some(raw) = target.option("vector-width") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => {}
                _ => {
                    return Err(IrError::InvalidTargetOption {
                        option: format!("-vector-width={}", raw),
                        reason: "expected a positive integer".to_string(),
                    })
                }
            }
        }
        Ok(target)
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// The device family, from `-device` or else `-model`.
    pub fn device(&self) -> Option<&str> {
        self.option("device").or_else(|| self.option("model"))
    }

    /// External libraries enabled through `-libs=a,b`.
    pub fn libs(&self) -> Vec<&str> {
        self.option("libs")
            .map(|l| l.split(',').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Strategy lookup keys, most specific first.
    pub fn keys(&self) -> Vec<&'static str> {
        match self.kind {
            TargetKind::Llvm => vec!["cpu"],
            TargetKind::Cuda => vec!["cuda", "gpu"],
            TargetKind::OpenCl => match self.device() {
                Some("bifrost") => vec!["bifrost", "mali", "opencl", "gpu"],
                Some("mali") => vec!["mali", "opencl", "gpu"],
                _ => vec!["opencl", "gpu"],
            },
            TargetKind::OpenGl => vec!["opengl"],
            TargetKind::SdAccel => vec!["sdaccel", "hls"],
            TargetKind::Aocl => vec!["aocl", "hls"],
        }
    }

    /// Number of f32 lanes in one hardware vector register.
    pub fn fp32_lanes(&self) -> usize {
        if let Some(n) = self.option("vector-width").and_then(|v| v.parse().ok()) {
            return n;
        }
        match self.kind {
            TargetKind::Llvm => match self.option("mcpu") {
                Some(cpu) if AVX512_CPUS.contains(&cpu) => 16,
                _ => 8,
            },
            _ => 4,
        }
    }
}

impl FromStr for Target {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self> {
        Target::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        for (key, value) in &self.options {
            if value.is_empty() {
                write!(f, " -{}", key)?;
            } else {
                write!(f, " -{}={}", key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bifrost_keys() {
        let t = Target::parse("opencl -device=bifrost").unwrap();
        assert_eq!(t.kind(), TargetKind::OpenCl);
        assert_eq!(t.keys(), vec!["bifrost", "mali", "opencl", "gpu"]);
        assert_eq!(t.fp32_lanes(), 4);
    }

    #[test]
    fn test_model_option_selects_family() {
        let t = Target::parse("opencl -model=bifrost").unwrap();
        assert_eq!(t.keys()[0], "bifrost");
    }

    #[test]
    fn test_cpu_lanes() {
        assert_eq!(Target::parse("llvm").unwrap().fp32_lanes(), 8);
        assert_eq!(Target::parse("llvm -mcpu=skylake-avx512").unwrap().fp32_lanes(), 16);
        assert_eq!(Target::parse("llvm -vector-width=4").unwrap().fp32_lanes(), 4);
    }

    #[test]
    fn test_libs() {
        let t = Target::parse("llvm -libs=cblas,mkl").unwrap();
        assert_eq!(t.libs(), vec!["cblas", "mkl"]);
        assert!(Target::parse("llvm").unwrap().libs().is_empty());
    }

    #[test]
    fn test_hls_keys() {
        assert_eq!(Target::parse("sdaccel").unwrap().keys(), vec!["sdaccel", "hls"]);
        assert_eq!(Target::parse("opengl").unwrap().keys(), vec!["opengl"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Target::parse("vulkan"), Err(IrError::UnknownTarget(_))));
        assert!(matches!(Target::parse(""), Err(IrError::UnknownTarget(_))));
        assert!(matches!(
            Target::parse("llvm mcpu=core-avx2"),
            Err(IrError::InvalidTargetOption { .. })
        ));
        assert!(matches!(
            Target::parse("llvm -vector-width=0"),
            Err(IrError::InvalidTargetOption { .. })
        ));
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        let t = Target::parse("llvm -mcpu=cascadelake -libs=cblas").unwrap();
        assert_eq!(Target::parse(&t.to_string()).unwrap(), t);
    }
}
