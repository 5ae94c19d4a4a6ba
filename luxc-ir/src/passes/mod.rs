//! The optimization pipeline
//!
//! Passes run in a fixed order (SSA construction, global value
//! numbering, loop-invariant code motion, load/store scheduling), with
//! each one individually toggle-able. The pipeline re-verifies the IR
//! after every pass; a verification failure is reported as an internal
//! invariant violation carrying a full IR dump.

pub mod gvn;
pub mod licm;
pub mod lssched;
pub mod ssa;

use crate::ir::Module;
use luxc_common::CompilerError;
use std::fmt;
use std::str::FromStr;

/// Which passes to run. Order is fixed; the flags only enable or
/// disable each stage. With `strict` set, a pass that would silently
/// skip an unanalyzable construct reports it as an error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassConfig {
    pub ssa: bool,
    pub gvn: bool,
    pub licm: bool,
    pub lssched: bool,
    pub strict: bool,
}

impl PassConfig {
    /// Every pass enabled
    pub fn all() -> Self {
        Self {
            ssa: true,
            gvn: true,
            licm: true,
            lssched: true,
            strict: false,
        }
    }

    /// No optimization at all; the IR is code-generated as lowered
    pub fn none() -> Self {
        Self {
            ssa: false,
            gvn: false,
            licm: false,
            lssched: false,
            strict: false,
        }
    }

    /// SSA construction only
    pub fn ssa_only() -> Self {
        Self {
            ssa: true,
            ..Self::none()
        }
    }
}

impl Default for PassConfig {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for PassConfig {
    type Err = String;

    /// Parse a pass list: `all`, `none`, or a comma-separated subset of
    /// `ssa,gvn,licm,lssched`, optionally with `strict`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => return Ok(Self::all()),
            "none" => return Ok(Self::none()),
            _ => {}
        }
        let mut config = Self::none();
        for name in s.split(',') {
            match name.trim() {
                "ssa" => config.ssa = true,
                "gvn" => config.gvn = true,
                "licm" => config.licm = true,
                "lssched" => config.lssched = true,
                "strict" => config.strict = true,
                other => return Err(format!("unknown pass `{}`", other)),
            }
        }
        Ok(config)
    }
}

impl fmt::Display for PassConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.ssa {
            names.push("ssa");
        }
        if self.gvn {
            names.push("gvn");
        }
        if self.licm {
            names.push("licm");
        }
        if self.lssched {
            names.push("lssched");
        }
        if self.strict {
            names.push("strict");
        }
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(","))
        }
    }
}

/// Run the enabled passes over every function in the module
pub fn run_pipeline(module: &mut Module, config: &PassConfig) -> Result<(), CompilerError> {
    for func in &mut module.functions {
        if config.ssa {
            ssa::run(func)?;
            check(func, "ssa")?;
        }
        if config.gvn {
            gvn::run(func);
            check(func, "gvn")?;
        }
        if config.licm {
            if config.strict {
                licm::run_strict(func)?;
            } else {
                licm::run(func);
            }
            check(func, "licm")?;
        }
        if config.lssched {
            lssched::run(func);
            check(func, "lssched")?;
        }
    }
    Ok(())
}

fn check(func: &crate::ir::Function, pass: &str) -> Result<(), CompilerError> {
    func.verify().map_err(|message| {
        CompilerError::invariant(
            format!("after {} in `{}`: {}", pass, func.name, message),
            func.to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing() {
        assert_eq!("all".parse::<PassConfig>().unwrap(), PassConfig::all());
        assert_eq!("none".parse::<PassConfig>().unwrap(), PassConfig::none());
        let config: PassConfig = "ssa,gvn".parse().unwrap();
        assert!(config.ssa && config.gvn);
        assert!(!config.licm && !config.lssched && !config.strict);
        let config: PassConfig = "ssa,licm,strict".parse().unwrap();
        assert!(config.licm && config.strict);
        assert!("ssa,bogus".parse::<PassConfig>().is_err());
    }

    #[test]
    fn test_config_display_round_trip() {
        for s in ["ssa", "ssa,gvn", "ssa,gvn,licm,lssched", "ssa,licm,strict"] {
            let config: PassConfig = s.parse().unwrap();
            assert_eq!(config.to_string(), s);
        }
        assert_eq!(PassConfig::none().to_string(), "none");
    }
}
