//! VM source generator.
//!
//! Turns an [`Obfuscated`] program into the statements of an interpreter
//! that runs it. The interpreter is built as AST through [`crate::ast::build`]
//! and contains no function literals and no varargs, so a later layer can
//! virtualize it again.

mod bits;
mod block;
mod decoy;
mod handlers;
mod linear;
pub mod names;
mod prelude;
mod stack;

use std::collections::BTreeSet;

use crate::{
    ast::{Expr, Stmt, build},
    obfuscate::{Obfuscated, Protocol},
    options::{Dispatch, PoolPlacement, VmOptions},
    printer,
    rng::VeilRng,
};

use bits::XorNames;
use names::NameGen;

/// Per-run facts the generator needs beyond the program itself.
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// Every identifier of the chunk being rewritten.
    pub reserved: BTreeSet<String>,
    pub pool_placement: PoolPlacement,
    pub decoy_probability: f64,
    pub decoy_size: usize,
}

impl RenderContext {
    pub fn new(reserved: BTreeSet<String>, options: &VmOptions) -> Self {
        Self {
            reserved,
            pool_placement: options.pool_placement,
            decoy_probability: options.decoy_probability,
            decoy_size: options.decoy_size,
        }
    }
}

/// Build the interpreter for `obf`.
pub fn render(obf: &Obfuscated, ctx: &RenderContext, rng: &mut VeilRng) -> Vec<Stmt> {
    let mut names = NameGen::new(&ctx.reserved);
    let h = Helpers::new(&mut names, rng);
    let protocol = obf
        .isa
        .as_ref()
        .map_or(Protocol::Direct, |isa| isa.stack_protocol);
    let mut generator = Gen {
        obf,
        ctx,
        rng,
        names,
        h,
        protocol,
    };

    let mut out = generator.prelude();
    if generator.rng.chance(ctx.decoy_probability) {
        out.push(generator.decoy());
    }
    match obf.dispatch {
        Dispatch::Linear => out.extend(generator.linear()),
        Dispatch::Block => out.extend(generator.block()),
    }
    out
}

/// [`render`] followed by the printer.
pub fn render_source(obf: &Obfuscated, ctx: &RenderContext, rng: &mut VeilRng) -> String {
    printer::print_block(&render(obf, ctx, rng))
}

/// Identifiers of the interpreter's own state.
pub(crate) struct Helpers {
    pub env: String,
    pub chr: String,
    pub byte: String,
    pub table_lib: String,
    pub unpack: String,
    pub pack: String,
    pub rawget: String,
    pub rawset: String,
    pub tonumber: String,
    pub floor: String,
    pub pieces: String,
    pub seed: String,
    pub keys: String,
    pub isa_a: String,
    pub isa_b: String,
    pub pool: String,
    pub pool_done: String,
    pub entries: String,
    pub const_keys: String,
    pub op_map: String,
    pub chunks: String,
    pub order: String,
    pub stack: String,
    pub top: String,
    pub regs: String,
    pub vc: String,
    pub pc: String,
    pub op: String,
    pub a: String,
    pub b: String,
    pub value: String,
    pub scratch: String,
    pub results: String,
    pub count: String,
    pub base: String,
    pub index: String,
    pub xor: XorNames,
}

impl Helpers {
    fn new(names: &mut NameGen, rng: &mut VeilRng) -> Self {
        let mut fresh = || names.fresh(rng);
        Self {
            env: fresh(),
            chr: fresh(),
            byte: fresh(),
            table_lib: fresh(),
            unpack: fresh(),
            pack: fresh(),
            rawget: fresh(),
            rawset: fresh(),
            tonumber: fresh(),
            floor: fresh(),
            pieces: fresh(),
            seed: fresh(),
            keys: fresh(),
            isa_a: fresh(),
            isa_b: fresh(),
            pool: fresh(),
            pool_done: fresh(),
            entries: fresh(),
            const_keys: fresh(),
            op_map: fresh(),
            chunks: fresh(),
            order: fresh(),
            stack: fresh(),
            top: fresh(),
            regs: fresh(),
            vc: fresh(),
            pc: fresh(),
            op: fresh(),
            a: fresh(),
            b: fresh(),
            value: fresh(),
            scratch: fresh(),
            results: fresh(),
            count: fresh(),
            base: fresh(),
            index: fresh(),
            xor: XorNames {
                bxor: fresh(),
                x: fresh(),
                y: fresh(),
                result: fresh(),
                bit: fresh(),
                counter: fresh(),
                x_bit: fresh(),
                y_bit: fresh(),
            },
        }
    }
}

pub(crate) struct Gen<'a> {
    obf: &'a Obfuscated,
    ctx: &'a RenderContext,
    rng: &'a mut VeilRng,
    names: NameGen,
    h: Helpers,
    protocol: Protocol,
}

impl Gen<'_> {
    fn fresh(&mut self) -> String {
        self.names.fresh(self.rng)
    }

    fn id(&self, name: &str) -> Expr {
        build::ident(name)
    }

    fn xor_into(&self, target: Expr, x: Expr, y: Expr) -> Stmt {
        bits::xor_into(&self.h.xor, target, x, y)
    }

    /// `CH(98, 105, ...)`: a library name rebuilt from its bytes.
    fn lib_name(&self, name: &str) -> Expr {
        build::call(
            self.id(&self.h.chr),
            name.bytes().map(|b| build::int(b as i64)).collect(),
        )
    }

    /// The schedule key of logical instruction `pc`.
    fn key_at(&self, pc: Expr) -> Expr {
        let count = self.obf.keys.as_ref().map_or(1, |k| k.len()) as i64;
        build::index(
            self.id(&self.h.keys),
            build::add(
                build::modulo(build::add(pc, self.id(&self.h.seed)), build::int(count)),
                build::int(1),
            ),
        )
    }

    fn lazy_pool(&self) -> bool {
        self.ctx.pool_placement == PoolPlacement::Lazy
            && matches!(self.obf.pool, crate::obfuscate::ConstPool::Encrypted(_))
    }
}

#[cfg(test)]
mod codegen_test;
