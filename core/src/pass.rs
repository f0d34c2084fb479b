//! The obfuscation pipeline.
//!
//! An [`Obfuscator`] parses source, runs its passes over the chunk in order,
//! and prints the result. Every pass shares the run's random source so a
//! fixed seed reproduces the output byte for byte.
//!
//! # Example
//!
//! ```
//! use veil_core::{Obfuscator, ObfuscatorOptions};
//!
//! let options = ObfuscatorOptions::from_json(r#"{ "seed": "t1" }"#).unwrap();
//! let out = Obfuscator::new(options).obfuscate("local function f(a) return a + 1 end").unwrap();
//! assert!(out.starts_with("local function f(a)"));
//! ```

use tracing::debug;

use crate::{
    ast::Chunk,
    driver::{Report, Virtualizer},
    errors::Result,
    options::{ObfuscatorOptions, VmOptions},
    parser, printer,
    rng::VeilRng,
};

/// An AST to AST transform.
///
/// Passes that run after virtualization must leave statements with
/// `vm_owned` set (and everything below them) exactly as they are.
pub trait Pass {
    fn name(&self) -> &str;

    fn run(&mut self, chunk: &mut Chunk, rng: &mut VeilRng) -> Result<()>;
}

/// The virtualization pass as a pipeline stage.
#[derive(Debug, Clone)]
pub struct VirtualizePass {
    options: VmOptions,
    report: Report,
}

impl VirtualizePass {
    pub fn new(options: VmOptions) -> Self {
        Self {
            options,
            report: Report::default(),
        }
    }

    /// What the last run virtualized and skipped.
    pub fn report(&self) -> &Report {
        &self.report
    }
}

impl Pass for VirtualizePass {
    fn name(&self) -> &str {
        "virtualize"
    }

    fn run(&mut self, chunk: &mut Chunk, rng: &mut VeilRng) -> Result<()> {
        self.report = Virtualizer::new(&self.options, rng).run(chunk)?;
        Ok(())
    }
}

pub struct Obfuscator {
    seed: String,
    passes: Vec<Box<dyn Pass>>,
}

impl Obfuscator {
    /// A pipeline holding the virtualization pass.
    pub fn new(options: ObfuscatorOptions) -> Self {
        Self {
            seed: options.seed,
            passes: vec![Box::new(VirtualizePass::new(options.vm))],
        }
    }

    /// Append a pass; passes run in insertion order.
    pub fn with_pass(mut self, pass: impl Pass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn run(&mut self, chunk: &mut Chunk) -> Result<()> {
        let mut rng = VeilRng::from_seed_str(&self.seed);
        for pass in self.passes.iter_mut() {
            debug!(pass = pass.name(), "running pass");
            pass.run(chunk, &mut rng)?;
        }
        Ok(())
    }

    pub fn obfuscate(&mut self, source: &str) -> Result<String> {
        let mut chunk = parser::parse(source)?;
        self.run(&mut chunk)?;
        Ok(printer::print_chunk(&chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{StmtKind, walk};
    use std::{cell::Cell, rc::Rc};

    /// Counts the statements a later pass is allowed to touch.
    struct CountUnowned(Rc<Cell<usize>>);

    impl Pass for CountUnowned {
        fn name(&self) -> &str {
            "count"
        }

        fn run(&mut self, chunk: &mut Chunk, _rng: &mut VeilRng) -> Result<()> {
            walk::for_each_stmt_mut(&mut chunk.body, &mut |stmt| {
                if !stmt.vm_owned {
                    self.0.set(self.0.get() + 1);
                }
            });
            Ok(())
        }
    }

    #[test]
    fn test_same_seed_same_output() {
        let source = "local function f(a, b) local c = a * b return c - 1 end";
        let first = Obfuscator::new(ObfuscatorOptions::default())
            .obfuscate(source)
            .unwrap();
        let second = Obfuscator::new(ObfuscatorOptions::default())
            .obfuscate(source)
            .unwrap();
        assert_eq!(first, second);
        assert_ne!(first, crate::printer::print_chunk(&parser::parse(source).unwrap()));
    }

    #[test]
    fn test_later_pass_sees_owned_markers() {
        let mut chunk = parser::parse("local function f(a) return a end\nprint(f(1))").unwrap();
        let unowned = Rc::new(Cell::new(0));
        Obfuscator::new(ObfuscatorOptions::default())
            .with_pass(CountUnowned(unowned.clone()))
            .run(&mut chunk)
            .unwrap();
        assert_eq!(unowned.get(), 2);
        assert!(matches!(chunk.body[0].kind, StmtKind::LocalFunction { .. }));
        assert!(!chunk.body[0].vm_owned);
        assert!(!chunk.body[1].vm_owned);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = Obfuscator::new(ObfuscatorOptions::default())
            .obfuscate("local = 1")
            .unwrap_err();
        assert!(matches!(err, crate::Error::Parse(_)));
    }
}
