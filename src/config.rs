//! Checker configuration.
//!
//! A [`Config`] is a flat snapshot of every warning toggle and threshold. It
//! is loaded from YAML, adjusted with option tokens from the command line and
//! adjusted again per unit by in-source directives. All three surfaces share
//! the option names listed in [`OPTIONS`].

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file names probed in the working directory, in order.
pub const DEFAULT_CONFIG_NAMES: &[&str] = &["bytelint.yaml", ".bytelint.yaml", "bytelint.yml"];

/// Invalid option tokens or values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown option {0:?}")]
    UnknownOption(String),
    #[error("option {0:?} needs a value")]
    MissingValue(String),
    #[error("option {0:?} is not a switch")]
    NotSwitch(String),
    #[error("invalid value {value:?} for option {option:?}")]
    InvalidValue { option: String, value: String },
    #[error("invalid blacklist pattern {pattern:?}: {message}")]
    InvalidGlob { pattern: String, message: String },
}

/// Value shape an option accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// `name` / `no-name`
    Switch,
    /// `name=N`
    Number,
    /// `name=text`
    Text,
    /// `name=a,b,c`
    List,
}

/// One entry of the option table.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub help: &'static str,
}

const fn opt(name: &'static str, kind: OptionKind, help: &'static str) -> OptionSpec {
    OptionSpec { name, kind, help }
}

/// Every option understood by directives and `--option`.
pub const OPTIONS: &[OptionSpec] = &[
    opt("unusedlocals", OptionKind::Switch, "unused local variables"),
    opt("unusedtuple", OptionKind::Switch, "unused variables from tuple unpacking"),
    opt("unusedparams", OptionKind::Switch, "unused function parameters"),
    opt("ignoreself", OptionKind::Switch, "never report an unused self parameter"),
    opt("unusednames", OptionKind::List, "names exempt from unused checks"),
    opt("shadows", OptionKind::Switch, "local variables shadowing module globals"),
    opt("shadowbuiltins", OptionKind::Switch, "variables shadowing builtins"),
    opt("unusedimports", OptionKind::Switch, "imports never used"),
    opt("unusedglobals", OptionKind::Switch, "module variables never used"),
    opt("objattrs", OptionKind::Switch, "attribute existence checks"),
    opt("initattrs", OptionKind::Switch, "attributes must be defined in the constructor"),
    opt("maxrefs", OptionKind::Number, "maximum attribute chain length (0 disables)"),
    opt("maxlines", OptionKind::Number, "maximum lines per function (0 disables)"),
    opt("maxbranches", OptionKind::Number, "maximum branches per function (0 disables)"),
    opt("maxreturns", OptionKind::Number, "maximum returns per function (0 disables)"),
    opt("maxargs", OptionKind::Number, "maximum parameters per function (0 disables)"),
    opt("maxlocals", OptionKind::Number, "maximum local variables per function (0 disables)"),
    opt("loopedges", OptionKind::Number, "branch edges charged per loop when counting branches"),
    opt("returnvalues", OptionKind::Switch, "inconsistent return types"),
    opt("implicitreturns", OptionKind::Switch, "value returns mixed with implicit None"),
    opt("initreturn", OptionKind::Switch, "constructor returning a value"),
    opt("baseinit", OptionKind::Switch, "base class constructor not called"),
    opt("namedargs", OptionKind::Switch, "keywords used for positional parameters"),
    opt("noneretval", OptionKind::Switch, "using a return value that is always None"),
    opt("constcond", OptionKind::Switch, "conditions on constants"),
    opt("constant1", OptionKind::Switch, "also report 1 and True used as conditions"),
    opt("noeffect", OptionKind::Switch, "statements with no effect"),
    opt("unaryplus", OptionKind::Switch, "unary plus advisory"),
    opt("formats", OptionKind::Switch, "format string checks"),
    opt("unreachable", OptionKind::Switch, "unreachable code"),
    opt("redefined", OptionKind::Switch, "functions redefined in the same scope"),
    opt("selfname", OptionKind::Text, "expected name of the first method parameter"),
    opt("clsnames", OptionKind::List, "accepted first parameter names of class methods"),
    opt("blacklist", OptionKind::List, "module name globs never checked"),
];

pub fn find_option(name: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|o| o.name == name)
}

/// A complete configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub unused_locals: bool,
    pub unused_tuple: bool,
    pub unused_params: bool,
    pub ignore_self: bool,
    pub unused_names: Vec<String>,
    pub shadows: bool,
    pub shadow_builtins: bool,
    pub unused_imports: bool,
    pub unused_globals: bool,
    pub obj_attrs: bool,
    pub init_attrs: bool,
    pub max_refs: usize,
    pub max_lines: usize,
    pub max_branches: usize,
    pub max_returns: usize,
    pub max_args: usize,
    pub max_locals: usize,
    pub loop_edges: usize,
    pub return_values: bool,
    pub implicit_returns: bool,
    pub init_return: bool,
    pub base_init: bool,
    pub named_args: bool,
    pub none_ret_val: bool,
    pub const_cond: bool,
    pub constant1: bool,
    pub no_effect: bool,
    pub unary_plus: bool,
    pub formats: bool,
    pub unreachable: bool,
    pub redefined: bool,
    pub self_name: String,
    pub cls_names: Vec<String>,
    pub blacklist: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unused_locals: true,
            unused_tuple: false,
            unused_params: true,
            ignore_self: true,
            unused_names: vec!["_".into(), "empty".into(), "unused".into(), "dummy".into()],
            shadows: true,
            shadow_builtins: true,
            unused_imports: true,
            unused_globals: false,
            obj_attrs: true,
            init_attrs: false,
            max_refs: 5,
            max_lines: 200,
            max_branches: 50,
            max_returns: 10,
            max_args: 10,
            max_locals: 40,
            loop_edges: 2,
            return_values: true,
            implicit_returns: false,
            init_return: true,
            base_init: true,
            named_args: false,
            none_ret_val: true,
            const_cond: true,
            constant1: false,
            no_effect: true,
            unary_plus: true,
            formats: true,
            unreachable: true,
            redefined: true,
            self_name: "self".into(),
            cls_names: vec!["cls".into(), "klass".into()],
            blacklist: Vec::new(),
        }
    }
}

impl Config {
    /// Parse a config from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// First default config file present in `dir`.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        DEFAULT_CONFIG_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// A copy of this config with every token of `text` applied.
    ///
    /// Tokens are whitespace separated; a leading `--` is optional. Nothing
    /// is applied unless every token is valid.
    pub fn with_tokens(&self, text: &str) -> Result<Config, ConfigError> {
        let mut child = self.clone();
        for token in text.split_whitespace() {
            child.apply_token(token)?;
        }
        Ok(child)
    }

    /// Apply a single `name`, `no-name` or `name=value` token in place.
    pub fn apply_token(&mut self, token: &str) -> Result<(), ConfigError> {
        let token = token.strip_prefix("--").unwrap_or(token);

        if let Some((name, value)) = token.split_once('=') {
            let spec = find_option(name).ok_or_else(|| ConfigError::UnknownOption(name.to_string()))?;
            return self.set(spec, value);
        }

        if let Some(spec) = find_option(token) {
            return match spec.kind {
                OptionKind::Switch => self.set(spec, "true"),
                _ => Err(ConfigError::MissingValue(token.to_string())),
            };
        }

        if let Some(name) = token.strip_prefix("no-") {
            let spec = find_option(name).ok_or_else(|| ConfigError::UnknownOption(name.to_string()))?;
            return match spec.kind {
                OptionKind::Switch => self.set(spec, "false"),
                _ => Err(ConfigError::NotSwitch(name.to_string())),
            };
        }

        Err(ConfigError::UnknownOption(token.to_string()))
    }

    fn set(&mut self, spec: &OptionSpec, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            option: spec.name.to_string(),
            value: value.to_string(),
        };

        match spec.kind {
            OptionKind::Switch => {
                let on = match value {
                    "true" | "yes" | "on" | "1" => true,
                    "false" | "no" | "off" | "0" => false,
                    _ => return Err(invalid()),
                };
                *self.switch_mut(spec.name).ok_or_else(invalid)? = on;
            }
            OptionKind::Number => {
                let n: usize = value.parse().map_err(|_| invalid())?;
                *self.number_mut(spec.name).ok_or_else(invalid)? = n;
            }
            OptionKind::Text => {
                if value.is_empty() {
                    return Err(invalid());
                }
                match spec.name {
                    "selfname" => self.self_name = value.to_string(),
                    _ => return Err(invalid()),
                }
            }
            OptionKind::List => {
                let items: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                match spec.name {
                    "unusednames" => self.unused_names = items,
                    "clsnames" => self.cls_names = items,
                    "blacklist" => self.blacklist = items,
                    _ => return Err(invalid()),
                }
            }
        }
        Ok(())
    }

    fn switch_mut(&mut self, name: &str) -> Option<&mut bool> {
        let field = match name {
            "unusedlocals" => &mut self.unused_locals,
            "unusedtuple" => &mut self.unused_tuple,
            "unusedparams" => &mut self.unused_params,
            "ignoreself" => &mut self.ignore_self,
            "shadows" => &mut self.shadows,
            "shadowbuiltins" => &mut self.shadow_builtins,
            "unusedimports" => &mut self.unused_imports,
            "unusedglobals" => &mut self.unused_globals,
            "objattrs" => &mut self.obj_attrs,
            "initattrs" => &mut self.init_attrs,
            "returnvalues" => &mut self.return_values,
            "implicitreturns" => &mut self.implicit_returns,
            "initreturn" => &mut self.init_return,
            "baseinit" => &mut self.base_init,
            "namedargs" => &mut self.named_args,
            "noneretval" => &mut self.none_ret_val,
            "constcond" => &mut self.const_cond,
            "constant1" => &mut self.constant1,
            "noeffect" => &mut self.no_effect,
            "unaryplus" => &mut self.unary_plus,
            "formats" => &mut self.formats,
            "unreachable" => &mut self.unreachable,
            "redefined" => &mut self.redefined,
            _ => return None,
        };
        Some(field)
    }

    fn number_mut(&mut self, name: &str) -> Option<&mut usize> {
        let field = match name {
            "maxrefs" => &mut self.max_refs,
            "maxlines" => &mut self.max_lines,
            "maxbranches" => &mut self.max_branches,
            "maxreturns" => &mut self.max_returns,
            "maxargs" => &mut self.max_args,
            "maxlocals" => &mut self.max_locals,
            "loopedges" => &mut self.loop_edges,
            _ => return None,
        };
        Some(field)
    }

    /// Current value of an option, rendered the way a token would spell it.
    pub fn value_of(&self, spec: &OptionSpec) -> String {
        let mut copy = self.clone();
        match spec.kind {
            OptionKind::Switch => copy.switch_mut(spec.name).map(|b| b.to_string()).unwrap_or_default(),
            OptionKind::Number => copy.number_mut(spec.name).map(|n| n.to_string()).unwrap_or_default(),
            OptionKind::Text => self.self_name.clone(),
            OptionKind::List => match spec.name {
                "unusednames" => self.unused_names.join(","),
                "clsnames" => self.cls_names.join(","),
                "blacklist" => self.blacklist.join(","),
                _ => String::new(),
            },
        }
    }

    /// Names never reported as unused.
    pub fn is_exempt_name(&self, name: &str) -> bool {
        self.unused_names.iter().any(|n| n == name)
    }

    /// Compile the module blacklist.
    pub fn blacklist_matcher(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.blacklist {
            let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidGlob {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|e| ConfigError::InvalidGlob {
            pattern: self.blacklist.join(","),
            message: e.to_string(),
        })
    }
}

/// Validate a loaded config.
pub fn validate(config: &Config) -> anyhow::Result<()> {
    if config.self_name.is_empty() {
        anyhow::bail!("self_name must not be empty");
    }
    if config.loop_edges > 8 {
        anyhow::bail!("loop_edges {} is implausibly large", config.loop_edges);
    }
    config
        .blacklist_matcher()
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.unused_locals);
        assert!(!config.unused_tuple);
        assert_eq!(config.max_refs, 5);
        assert_eq!(config.loop_edges, 2);
        assert_eq!(config.self_name, "self");
        assert!(config.is_exempt_name("dummy"));
        assert!(!config.is_exempt_name("total"));
    }

    #[test]
    fn test_tokens() {
        let base = Config::default();
        let child = base.with_tokens("no-objattrs --maxlines=0 unusedtuple clsnames=cls,mcs").unwrap();
        assert!(!child.obj_attrs);
        assert_eq!(child.max_lines, 0);
        assert!(child.unused_tuple);
        assert_eq!(child.cls_names, vec!["cls", "mcs"]);
        // the parent is untouched
        assert!(base.obj_attrs);
        assert_eq!(base.max_lines, 200);
    }

    #[test]
    fn test_invalid_tokens() {
        let base = Config::default();
        assert_eq!(
            base.with_tokens("frobnicate"),
            Err(ConfigError::UnknownOption("frobnicate".into()))
        );
        assert_eq!(
            base.with_tokens("maxlines"),
            Err(ConfigError::MissingValue("maxlines".into()))
        );
        assert_eq!(
            base.with_tokens("no-maxrefs"),
            Err(ConfigError::NotSwitch("maxrefs".into()))
        );
        assert!(matches!(
            base.with_tokens("objattrs maxrefs=lots"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_every_option_is_settable() {
        let mut config = Config::default();
        for spec in OPTIONS {
            let token = match spec.kind {
                OptionKind::Switch => format!("no-{}", spec.name),
                OptionKind::Number => format!("{}=3", spec.name),
                OptionKind::Text | OptionKind::List => format!("{}=x", spec.name),
            };
            config.apply_token(&token).unwrap();
            let expected = match spec.kind {
                OptionKind::Switch => "false",
                OptionKind::Number => "3",
                _ => "x",
            };
            assert_eq!(config.value_of(spec), expected, "option {}", spec.name);
        }
    }

    #[test]
    fn test_parse_file_and_validate() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_lines: 50\nunused_tuple: true\nblacklist:\n  - \"vendor.*\"").unwrap();
        let config = Config::parse_file(file.path()).unwrap();
        assert_eq!(config.max_lines, 50);
        assert!(config.unused_tuple);
        assert!(config.unused_locals);
        validate(&config).unwrap();
        assert!(config.blacklist_matcher().unwrap().is_match("vendor.six"));

        let bad = Config {
            blacklist: vec!["[".into()],
            ..Default::default()
        };
        assert!(validate(&bad).is_err());
    }
}
