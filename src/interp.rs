//! End-to-end interpreter: source text in, value out.
//!
//! An [`Interpreter`] owns one [`Module`] with the prelude installed. Each call to
//! [`Interpreter::eval`] compiles its text into a fresh [`CompiledUnit`] and runs it
//! in a fresh frame, so definitions made by one call are visible to the next
//! through the module. Closures stored in globals keep their own unit's proto
//! table and stay callable from later units.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use tracing::debug;

use crate::ast::Node;
use crate::code::CompiledUnit;
use crate::codegen;
use crate::cps::Rewriter;
use crate::module::Module;
use crate::prelude;
use crate::value::Value;
use crate::vm::{Frame, OutputSink, stdout_sink};
use crate::{DEFAULT_STACK_SIZE, MAX_PARSE_DEPTH, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Slots in the VM frame (locals, upvalues and temporaries together)
    pub stack_size: usize,
    pub max_parse_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stack_size: DEFAULT_STACK_SIZE,
            max_parse_depth: MAX_PARSE_DEPTH,
        }
    }
}

pub struct Interpreter {
    module: Module,
    config: Config,
    output: OutputSink,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Interpreter {
    pub fn new(config: Config) -> Self {
        let module = Module::new();
        prelude::install(&module);
        Interpreter {
            module,
            config,
            output: stdout_sink(),
        }
    }

    /// Send `display`/`newline` output to `output` instead of stdout
    pub fn with_output(mut self, output: Rc<RefCell<dyn Write>>) -> Self {
        self.output = output;
        self
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Rewrite and compile already-built forms as one unit
    pub fn compile_forms(&self, forms: &[Node]) -> Result<CompiledUnit> {
        let program = Rewriter::new().rewrite_program(forms)?;
        codegen::compile(&program, &self.module)
    }

    pub fn run_unit(&self, unit: &CompiledUnit) -> Result<Value> {
        let mut frame =
            Frame::new(&unit.entry, self.config.stack_size)?.with_output(Rc::clone(&self.output));
        let result = frame.run();
        debug!(
            entry = unit.entry.proto.display_name(),
            high_water = frame.high_water(),
            ok = result.is_ok(),
            "run finished"
        );
        result
    }
}

#[cfg(feature = "reader")]
impl Interpreter {
    fn read(&self, source: &str) -> Result<Vec<Node>> {
        let data = crate::reader::parse_with_depth(source, self.config.max_parse_depth)?;
        crate::builder::build_all(&data)
    }

    pub fn compile_source(&self, source: &str) -> Result<CompiledUnit> {
        let forms = self.read(source)?;
        self.compile_forms(&forms)
    }

    /// CPS form of `source`, rendered as an s-expression
    pub fn cps_form(&self, source: &str) -> Result<String> {
        let forms = self.read(source)?;
        let program = Rewriter::new().rewrite_program(&forms)?;
        Ok(program.to_string())
    }

    pub fn eval(&self, source: &str) -> Result<Value> {
        let unit = self.compile_source(source)?;
        self.run_unit(&unit)
    }
}
