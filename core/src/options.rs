//! Configuration options for an obfuscation run.
//!
//! Every field is optional in serialized form; missing fields take the
//! documented default.

use serde::Deserialize;

/// How the generated interpreter maps `pc` to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// One fetch loop over an instruction stream and a flat handler chain.
    Linear,
    /// Every instruction becomes an inline block reached by its random id.
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polymorphism {
    Off,
    /// Coin flip per program, weighted by `polymorphism_probability`.
    Random,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackProtocol {
    Random,
    /// `S[t] = v`
    Direct,
    /// `rawset(S, t, v)`
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchGraph {
    Random,
    /// Balanced binary search over block ids.
    Tree,
    /// `(pc + salt) % buckets` into a bucket chain.
    Sparse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPlacement {
    /// Decode the whole constant pool when the function is entered.
    Eager,
    /// Decode each constant the first time it is pushed.
    Lazy,
}

/// Options for the virtualization pass.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmOptions {
    /// Default: true
    pub enabled: bool,

    /// Only virtualize functions whose (dotted) name is listed. `None`
    /// selects every candidate. The chunk slice is named `<chunk>`.
    pub functions: Option<Vec<String>>,

    /// Also virtualize maximal runs of top-level statements.
    ///
    /// Default: false
    pub virtualize_chunk: bool,

    /// Skip functions with fewer top-level statements than this.
    ///
    /// Default: 1
    pub min_statements: usize,

    /// Number of times the whole pass is repeated.
    ///
    /// Default: 1
    pub layers: usize,

    /// Default: linear
    pub dispatch: Dispatch,

    /// Linear dispatch only. Default: true
    pub opcode_shuffle: bool,

    /// XOR every instruction with the per-instruction key schedule.
    ///
    /// Default: true
    pub runtime_key: bool,

    /// Linear dispatch only. Default: true
    pub stream_split: bool,

    /// Linear dispatch only: store the code as a byte string instead of
    /// number tables.
    ///
    /// Default: false
    pub stream_bytes: bool,

    /// Default: true
    pub fake_instructions: bool,

    /// Chance of inserting a one or two instruction filler before each
    /// real instruction.
    ///
    /// Default: 0.2
    pub fake_density: f64,

    /// Default: true
    pub const_encryption: bool,

    /// Default: false
    pub const_shards: bool,

    /// Chance that a decoy interpreter loop is emitted.
    ///
    /// Default: 0.3
    pub decoy_probability: f64,

    /// Number of strings the decoy loop walks over.
    ///
    /// Default: 8
    pub decoy_size: usize,

    /// Block dispatch only. Default: random
    pub polymorphism: Polymorphism,

    /// Default: 0.5
    pub polymorphism_probability: f64,

    /// Block dispatch only. Default: random
    pub stack_protocol: StackProtocol,

    /// Block dispatch only. Default: random
    pub dispatch_graph: DispatchGraph,

    /// Block dispatch only. Default: true
    pub fake_edges: bool,

    /// Default: eager
    pub pool_placement: PoolPlacement,

    /// Log disassembly of every compiled program at TRACE level and keep
    /// skip reasons at DEBUG.
    ///
    /// Default: false
    pub debug: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            functions: None,
            virtualize_chunk: false,
            min_statements: 1,
            layers: 1,
            dispatch: Dispatch::Linear,
            opcode_shuffle: true,
            runtime_key: true,
            stream_split: true,
            stream_bytes: false,
            fake_instructions: true,
            fake_density: 0.2,
            const_encryption: true,
            const_shards: false,
            decoy_probability: 0.3,
            decoy_size: 8,
            polymorphism: Polymorphism::Random,
            polymorphism_probability: 0.5,
            stack_protocol: StackProtocol::Random,
            dispatch_graph: DispatchGraph::Random,
            fake_edges: true,
            pool_placement: PoolPlacement::Eager,
            debug: false,
        }
    }
}

impl VmOptions {
    /// Whether it is allowed to virtualize the candidate called `name`.
    pub fn selects(&self, name: &str) -> bool {
        match &self.functions {
            None => true,
            Some(list) => list.iter().any(|n| n == name),
        }
    }
}

/// Options for the whole obfuscator.
///
/// # Example
///
/// ```
/// use veil_core::options::{Dispatch, ObfuscatorOptions};
///
/// let options = ObfuscatorOptions::from_json(r#"{ "seed": "t1", "vm": { "dispatch": "block" } }"#).unwrap();
/// assert_eq!(options.vm.dispatch, Dispatch::Block);
/// assert_eq!(options.vm.layers, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObfuscatorOptions {
    /// Seed of the PRNG; equal seeds give byte-identical output.
    ///
    /// Default: "veil"
    pub seed: String,
    pub vm: VmOptions,
}

impl Default for ObfuscatorOptions {
    fn default() -> Self {
        Self {
            seed: "veil".to_string(),
            vm: VmOptions::default(),
        }
    }
}

impl ObfuscatorOptions {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(ObfuscatorOptions::from_json("{}").unwrap(), ObfuscatorOptions::default());
    }

    #[test]
    fn test_partial_vm_options() {
        let options = ObfuscatorOptions::from_json(
            r#"{"vm": {"functions": ["demo"], "stack_protocol": "api", "layers": 2}}"#,
        )
        .unwrap();
        assert_eq!(options.vm.stack_protocol, StackProtocol::Api);
        assert_eq!(options.vm.layers, 2);
        assert!(options.vm.selects("demo"));
        assert!(!options.vm.selects("other"));
        assert_eq!(options.vm.dispatch, Dispatch::Linear);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ObfuscatorOptions::from_json(r#"{"vm": {"dispach": "block"}}"#).is_err());
    }
}
