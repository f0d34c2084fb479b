//! The virtualization pass: finds candidates, runs them through lifting,
//! compilation, obfuscation and generation, and splices the interpreter in.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::{
    analysis::ScopeTracker,
    ast::{Block, Chunk, Expr, FunctionBody, Stmt, StmtKind, build, mark_owned, walk},
    codegen::{RenderContext, names::NameGen, render_source},
    errors::{Error, Result},
    lift::lift_callbacks,
    obfuscate::obfuscate,
    options::VmOptions,
    parser::{Frontend, PestFrontend},
    rng::VeilRng,
    vm::{Program, VmCompiler},
};

/// Name under which top-level statement runs are selected and reported.
pub const CHUNK_NAME: &str = "<chunk>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    pub name: String,
    pub reason: String,
}

/// What a run did, in visiting order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    pub virtualized: Vec<String>,
    pub skipped: Vec<Skip>,
}

pub struct Virtualizer<'a, F = PestFrontend> {
    options: &'a VmOptions,
    rng: &'a mut VeilRng,
    frontend: F,
}

impl<'a> Virtualizer<'a, PestFrontend> {
    pub fn new(options: &'a VmOptions, rng: &'a mut VeilRng) -> Self {
        Self::with_frontend(options, rng, PestFrontend)
    }
}

impl<'a, F: Frontend> Virtualizer<'a, F> {
    pub fn with_frontend(options: &'a VmOptions, rng: &'a mut VeilRng, frontend: F) -> Self {
        Self {
            options,
            rng,
            frontend,
        }
    }

    /// Virtualize `chunk` in place, `layers` times over.
    ///
    /// A candidate that fails to compile is left untouched and reported as
    /// skipped. Only generated code that does not parse back is an error.
    pub fn run(&mut self, chunk: &mut Chunk) -> Result<Report> {
        let mut report = Report::default();
        if !self.options.enabled {
            return Ok(report);
        }
        for layer in 1..=self.options.layers {
            let reserved: BTreeSet<String> =
                walk::collect_names(&chunk.body).into_iter().collect();
            let mut pass = LayerPass {
                options: self.options,
                rng: &mut *self.rng,
                frontend: &self.frontend,
                lift_names: NameGen::new(&reserved),
                reserved,
                scopes: ScopeTracker::new(),
                hoisted: Vec::new(),
                report: &mut report,
            };
            pass.stmts(&mut chunk.body)?;
            if self.options.virtualize_chunk {
                pass.chunk_slices(&mut chunk.body)?;
            }
            let hoisted = std::mem::take(&mut pass.hoisted);
            debug!(layer, hoisted = hoisted.len(), "layer finished");
            chunk.body.splice(0..0, hoisted);
        }
        Ok(report)
    }
}

/// State of one walk over the chunk.
struct LayerPass<'a, F> {
    options: &'a VmOptions,
    rng: &'a mut VeilRng,
    frontend: &'a F,
    lift_names: NameGen,
    /// Every name of the chunk at the start of the layer plus lifted names.
    reserved: BTreeSet<String>,
    scopes: ScopeTracker,
    hoisted: Vec<Stmt>,
    report: &'a mut Report,
}

/// A top-level statement that may sit inside a virtualized slice.
fn sliceable(stmt: &Stmt) -> bool {
    !matches!(
        stmt.kind,
        StmtKind::Local { .. }
            | StmtKind::LocalFunction { .. }
            | StmtKind::Function { .. }
            | StmtKind::Return(_)
    )
}

impl<F: Frontend> LayerPass<'_, F> {
    fn skip(&mut self, name: &str, reason: String) {
        debug!(function = %name, %reason, "not virtualized");
        self.report.skipped.push(Skip {
            name: name.to_string(),
            reason,
        });
    }

    fn block(&mut self, body: &mut Block) -> Result<()> {
        self.scopes.push();
        let result = self.stmts(body);
        self.scopes.pop();
        result
    }

    fn stmts(&mut self, body: &mut Block) -> Result<()> {
        for stmt in body.iter_mut() {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &mut Stmt) -> Result<()> {
        match &mut stmt.kind {
            StmtKind::LocalFunction { name, func } => {
                self.scopes.declare(name);
                let name = name.clone();
                self.candidate(&name, func, false)?;
            }
            StmtKind::Function { name, func } => {
                let display = name.display();
                self.candidate(&display, func, name.method.is_some())?;
            }
            StmtKind::Local { names, values } => {
                if let ([name], [Expr::Function(func)]) = (names.as_slice(), values.as_mut_slice())
                {
                    let name = name.clone();
                    self.candidate(&name, func, false)?;
                }
                for name in names.iter() {
                    self.scopes.declare(name);
                }
            }
            StmtKind::Do(body) | StmtKind::While { body, .. } => self.block(body)?,
            StmtKind::Repeat { body, .. } => self.block(body)?,
            StmtKind::If { clauses, else_body } => {
                for (_, body) in clauses.iter_mut() {
                    self.block(body)?;
                }
                if let Some(body) = else_body {
                    self.block(body)?;
                }
            }
            StmtKind::NumericFor { var, body, .. } => {
                self.scopes.push();
                self.scopes.declare(var);
                let result = self.block(body);
                self.scopes.pop();
                result?;
            }
            StmtKind::GenericFor { vars, body, .. } => {
                self.scopes.push();
                vars.iter().for_each(|v| self.scopes.declare(v));
                let result = self.block(body);
                self.scopes.pop();
                result?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Look for candidates inside a function that was not virtualized.
    fn descend(&mut self, func: &mut FunctionBody, method: bool) -> Result<()> {
        self.scopes.push();
        if method {
            self.scopes.declare("self");
        }
        func.params.iter().for_each(|p| self.scopes.declare(p));
        let result = self.stmts(&mut func.body);
        self.scopes.pop();
        result
    }

    fn candidate(&mut self, name: &str, func: &mut FunctionBody, method: bool) -> Result<()> {
        if !self.options.selects(name) {
            self.skip(name, "not selected".to_string());
            return self.descend(func, method);
        }
        if func.body.len() < self.options.min_statements {
            self.skip(
                name,
                format!(
                    "{} statements, fewer than {}",
                    func.body.len(),
                    self.options.min_statements
                ),
            );
            return self.descend(func, method);
        }

        let mut visible = self.scopes.visible();
        let mut subject = func.clone();
        if method {
            subject.params.insert(0, "self".to_string());
        }
        let mut inside = visible.clone();
        inside.extend(subject.params.iter().cloned());
        let lifted = lift_callbacks(&mut subject.body, &inside, &mut self.lift_names, self.rng);
        visible.extend(lifted.names().map(str::to_string));

        let program = match VmCompiler::compile_function(&subject, &visible) {
            Ok(program) => program,
            Err(error) => {
                self.skip(name, error.to_string());
                return self.descend(func, method);
            }
        };
        // Hoisted callbacks are reached by name from inside the interpreter.
        self.reserved.extend(lifted.names().map(str::to_string));
        func.body = self.generate(name, &program)?;
        self.hoisted.extend(lifted.functions);
        self.report.virtualized.push(name.to_string());
        Ok(())
    }

    /// Replace maximal runs of sliceable top-level statements by
    /// `do <interpreter> end`.
    fn chunk_slices(&mut self, body: &mut Block) -> Result<()> {
        if !self.options.selects(CHUNK_NAME) {
            return Ok(());
        }
        let mut runs = Vec::new();
        let mut start = None;
        for (at, stmt) in body.iter().enumerate() {
            match (sliceable(stmt), start) {
                (true, None) => start = Some(at),
                (false, Some(from)) => {
                    runs.push(from..at);
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(from) = start {
            runs.push(from..body.len());
        }

        // Back to front so earlier ranges stay valid.
        for range in runs.into_iter().rev() {
            let mut scopes = ScopeTracker::new();
            for stmt in &body[..range.start] {
                match &stmt.kind {
                    StmtKind::Local { names, .. } => names.iter().for_each(|n| scopes.declare(n)),
                    StmtKind::LocalFunction { name, .. } => scopes.declare(name),
                    _ => {}
                }
            }
            let mut visible = scopes.visible();
            let mut slice = body[range.clone()].to_vec();
            let lifted = lift_callbacks(&mut slice, &visible, &mut self.lift_names, self.rng);
            visible.extend(lifted.names().map(str::to_string));

            let program = match VmCompiler::compile_chunk(&slice, &visible) {
                Ok(program) => program,
                Err(error) => {
                    self.skip(CHUNK_NAME, error.to_string());
                    continue;
                }
            };
            self.reserved.extend(lifted.names().map(str::to_string));
            let inner = self.generate(CHUNK_NAME, &program)?;
            let mut replacement = vec![build::do_block(inner)];
            mark_owned(&mut replacement);
            body.splice(range, replacement);
            self.hoisted.extend(lifted.functions);
            self.report.virtualized.push(CHUNK_NAME.to_string());
        }
        Ok(())
    }

    fn generate(&mut self, name: &str, program: &Program) -> Result<Block> {
        if self.options.debug {
            trace!(function = %name, "compiled\n{:?}", program);
        }
        let obf = obfuscate(program, self.options, self.rng);
        let ctx = RenderContext::new(self.reserved.clone(), self.options);
        let generated = render_source(&obf, &ctx, self.rng);
        let mut block = self
            .frontend
            .parse_block(&generated)
            .map_err(|error| Error::Generator {
                function: name.to_string(),
                error,
                generated: generated.clone(),
            })?;
        mark_owned(&mut block);
        debug!(
            function = %name,
            instructions = obf.instruction_count(),
            bytes = generated.len(),
            "virtualized"
        );
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::parse, printer::print_chunk, test_utils};
    use pretty_assertions::assert_eq;

    fn run(source: &str, options: &VmOptions) -> (String, Report) {
        test_utils::init_test_logging();
        let mut chunk = parse(source).unwrap();
        let mut rng = VeilRng::from_seed_str("driver");
        let report = Virtualizer::new(options, &mut rng).run(&mut chunk).unwrap();
        (print_chunk(&chunk), report)
    }

    #[test]
    fn test_virtualizes_every_candidate_form() {
        let source = "local function a() return 1 end\nfunction b() return 2 end\nlocal c = function() return 3 end";
        let (_, report) = run(source, &VmOptions::default());
        assert_eq!(report.virtualized, vec!["a", "b", "c"]);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_vararg_function_is_untouched() {
        let source = "local function f(...)\n    return ...\nend\n";
        let before = print_chunk(&parse(source).unwrap());
        let (after, report) = run(source, &VmOptions::default());
        assert_eq!(after, before);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("vararg"));
    }

    #[test]
    fn test_nested_literal_is_untouched() {
        let source = "local function f(t)\n    table.sort(t, function(x, y) return x < y end)\nend\n";
        let before = print_chunk(&parse(source).unwrap());
        let (after, _) = run(source, &VmOptions::default());
        assert_eq!(after, before);
    }

    #[test]
    fn test_include_list_and_min_statements() {
        let source = "local function keep() return 1 end\nlocal function other() local x = 1 return x end";
        let options = VmOptions {
            functions: Some(vec!["other".to_string()]),
            min_statements: 2,
            ..VmOptions::default()
        };
        let (_, report) = run(source, &options);
        assert_eq!(report.virtualized, vec!["other"]);
        assert_eq!(report.skipped[0].name, "keep");
    }

    #[test]
    fn test_generated_statements_are_owned() {
        let mut chunk = parse("local function f(x) return x * 2 end").unwrap();
        let mut rng = VeilRng::from_seed_str("owned");
        Virtualizer::new(&VmOptions::default(), &mut rng)
            .run(&mut chunk)
            .unwrap();
        let StmtKind::LocalFunction { func, .. } = &chunk.body[0].kind else {
            panic!("expected the function to stay in place");
        };
        assert!(!func.body.is_empty());
        assert!(func.body.iter().all(|s| s.vm_owned));
        assert!(!chunk.body[0].vm_owned);
    }

    #[test]
    fn test_lifted_callback_is_hoisted() {
        let source = "local function f(n)\n    task.spawn(function() print(n) end)\nend";
        let (_, report) = run(source, &VmOptions::default());
        assert_eq!(report.virtualized, vec!["f"]);
        let mut chunk = parse(source).unwrap();
        let mut rng = VeilRng::from_seed_str("driver");
        Virtualizer::new(&VmOptions::default(), &mut rng)
            .run(&mut chunk)
            .unwrap();
        assert_eq!(chunk.body.len(), 2);
        assert!(matches!(chunk.body[0].kind, StmtKind::LocalFunction { .. }));
    }

    #[test]
    fn test_chunk_slices() {
        let source = "x = 1\nprint(x)\nlocal y = 2\ny = y + x\nreturn y";
        let options = VmOptions {
            virtualize_chunk: true,
            ..VmOptions::default()
        };
        let mut chunk = parse(source).unwrap();
        let mut rng = VeilRng::from_seed_str("slices");
        let report = Virtualizer::new(&options, &mut rng).run(&mut chunk).unwrap();
        assert_eq!(report.virtualized, vec![CHUNK_NAME, CHUNK_NAME]);
        let kinds: Vec<bool> = chunk
            .body
            .iter()
            .map(|s| matches!(s.kind, StmtKind::Do(_)) && s.vm_owned)
            .collect();
        assert_eq!(kinds, vec![true, false, true, false]);
    }

    #[test]
    fn test_disabled_pass_changes_nothing() {
        let options = VmOptions {
            enabled: false,
            ..VmOptions::default()
        };
        let (_, report) = run("local function f() return 1 end", &options);
        assert_eq!(report, Report::default());
    }
}
