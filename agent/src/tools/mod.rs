//! Tool declarations and the registry the dispatcher resolves actions against.
//!
//! Each tool declares its name, parameters and description up front as data;
//! the registry never inspects callables at call time.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use thiserror::Error;

use crate::core::history::History;
use crate::core::types::MessageId;

pub mod builtin;
pub mod shell;

/// One declared parameter. `kind` is only used when rendering signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: String,
}

impl Param {
    pub fn str(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: "str".to_string(),
        }
    }

    pub fn int(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: "int".to_string(),
        }
    }
}

/// Declared shape of a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub params: Vec<Param>,
    pub description: String,
}

impl ToolSpec {
    pub fn new(name: &str, params: Vec<Param>, description: &str) -> Self {
        Self {
            name: name.to_string(),
            params,
            description: description.trim().to_string(),
        }
    }

    /// `name(a: str, b: int)`
    pub fn signature(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.kind))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, params)
    }

    pub fn accepts(&self, argument: &str) -> bool {
        self.params.iter().any(|p| p.name == argument)
    }
}

/// Arguments after filtering to the declared parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolArgs {
    values: BTreeMap<String, String>,
}

impl ToolArgs {
    /// Keep only the arguments `spec` declares; extras are dropped.
    pub fn bind(spec: &ToolSpec, raw: &BTreeMap<String, String>) -> Self {
        let values = raw
            .iter()
            .filter(|(name, _)| spec.accepts(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| anyhow!("missing required argument '{name}'"))
    }

    pub fn require_int(&self, name: &str) -> Result<i64> {
        self.require(name)?
            .trim()
            .parse::<i64>()
            .map_err(|_| anyhow!("{name} must be an integer"))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

/// Run state a tool may act on during dispatch.
pub struct ToolContext<'a> {
    pub history: &'a mut History,
    /// Node holding the instructor text.
    pub instructions_id: MessageId,
}

/// A capability the model can invoke by name.
pub trait Tool {
    fn spec(&self) -> ToolSpec;

    fn call(&self, args: &ToolArgs, ctx: &mut ToolContext<'_>) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("tool name {0:?} is not a valid identifier")]
    InvalidName(String),
    #[error("tool {tool}: parameter name {param:?} is not a valid identifier")]
    InvalidParam { tool: String, param: String },
    #[error("tool {tool}: duplicate parameter {param:?}")]
    DuplicateParam { tool: String, param: String },
}

pub struct ToolEntry {
    pub spec: ToolSpec,
    tool: Box<dyn Tool>,
}

impl ToolEntry {
    pub fn call(&self, args: &ToolArgs, ctx: &mut ToolContext<'_>) -> Result<String> {
        self.tool.call(args, ctx)
    }
}

/// Registered tools, in registration order.
#[derive(Default)]
pub struct Registry {
    entries: Vec<ToolEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool`, replacing any previous entry with the same name in place.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), RegistryError> {
        let spec = tool.spec();
        validate_spec(&spec)?;
        let entry = ToolEntry { spec, tool };
        match self.position(&entry.spec.name) {
            Some(idx) => self.entries[idx] = entry,
            None => self.entries.push(entry),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.position(name).map(|idx| &self.entries[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.entries.iter().map(|entry| &entry.spec)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.spec.name == name)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_spec(spec: &ToolSpec) -> Result<(), RegistryError> {
    if !is_identifier(&spec.name) {
        return Err(RegistryError::InvalidName(spec.name.clone()));
    }
    for (idx, param) in spec.params.iter().enumerate() {
        if !is_identifier(&param.name) {
            return Err(RegistryError::InvalidParam {
                tool: spec.name.clone(),
                param: param.name.clone(),
            });
        }
        if spec.params[..idx].iter().any(|p| p.name == param.name) {
            return Err(RegistryError::DuplicateParam {
                tool: spec.name.clone(),
                param: param.name.clone(),
            });
        }
    }
    Ok(())
}
