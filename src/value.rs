//! Runtime values and interned symbols.
//!
//! [`Value`] is the closed set of things a program can compute with. Heap values
//! (pairs, prototypes, continuations, errors) are shared through `Rc`, so cloning a
//! `Value` is cheap and never copies structure. Pairs are mutable in place through
//! `set-car!`/`set-cdr!`.
//!
//! [`Symbol`] is a handle into a per-thread string interner: two symbols with the
//! same text are the same handle, which makes variable-name comparison a single
//! integer compare. Fresh compiler temporaries come from [`Symbol::gensym`].

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use string_interner::{DefaultBackend, DefaultSymbol, StringInterner};

use crate::code::{Continuation, Proto};
use crate::{Error, Result};

thread_local! {
    static INTERNER: RefCell<StringInterner<DefaultBackend>> = RefCell::new(StringInterner::default());
    static GENSYM_COUNTER: Cell<u64> = const { Cell::new(0) };
}

/// An interned identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(DefaultSymbol);

impl Symbol {
    pub fn intern(name: &str) -> Self {
        INTERNER.with(|interner| Symbol(interner.borrow_mut().get_or_intern(name)))
    }

    /// Look up a symbol without interning it
    pub fn lookup(name: &str) -> Option<Self> {
        INTERNER.with(|interner| interner.borrow().get(name).map(Symbol))
    }

    pub fn name(self) -> String {
        INTERNER.with(|interner| {
            interner
                .borrow()
                .resolve(self.0)
                .map(str::to_owned)
                .unwrap_or_default()
        })
    }

    /// Produce a symbol that has never been interned before.
    ///
    /// Candidates are `prefix` followed by a per-thread counter; a candidate that is
    /// already interned (the user wrote it, or an earlier compile produced it) is
    /// skipped.
    pub fn gensym(prefix: &str) -> Self {
        loop {
            let n = GENSYM_COUNTER.with(|counter| {
                let n = counter.get();
                counter.set(n + 1);
                n
            });
            let candidate = format!("{prefix}{n}");
            if Symbol::lookup(&candidate).is_none() {
                return Symbol::intern(&candidate);
            }
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.name())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A mutable cons cell
pub struct Pair {
    car: RefCell<Value>,
    cdr: RefCell<Value>,
}

impl Pair {
    pub fn new(car: Value, cdr: Value) -> Self {
        Pair {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }
    }

    pub fn car(&self) -> Value {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Value {
        self.cdr.borrow().clone()
    }
}

impl Drop for Pair {
    /// Unlink the cdr chain one cell at a time, so freeing a long list does not
    /// recurse once per element
    fn drop(&mut self) {
        let mut next = self.cdr.replace(Value::Nil);
        while let Value::Pair(rc) = next {
            match Rc::try_unwrap(rc) {
                Ok(pair) => next = pair.cdr.replace(Value::Nil),
                Err(_) => break,
            }
        }
    }
}

/// Pairs already entered by `equal?`, as (left, right) addresses
type Visited = HashSet<(*const Pair, *const Pair)>;

/// Runtime value
#[derive(Clone)]
pub enum Value {
    Integer(i64),
    Symbol(Symbol),
    Pair(Rc<Pair>),
    Nil,
    Boolean(bool),
    /// Result of forms evaluated for effect (`define`, `set!`, `display`)
    Unspecified,
    Proto(Rc<Proto>),
    Continuation(Rc<Continuation>),
    Error(Rc<Error>),
}

impl Value {
    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Pair(Rc::new(Pair::new(car, cdr)))
    }

    /// Build a proper list from a sequence of values
    pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
        let items: Vec<Value> = items.into_iter().collect();
        Self::improper_list(items, Value::Nil)
    }

    /// Build a list ending in `tail` instead of `()`
    pub fn improper_list(items: Vec<Value>, tail: Value) -> Value {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons(item, acc))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Symbol(_) => "symbol",
            Value::Pair(_) => "pair",
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Unspecified => "unspecified",
            Value::Proto(_) => "proto",
            Value::Continuation(_) => "continuation",
            Value::Error(_) => "error",
        }
    }

    pub fn to_int(&self, operation: &str) -> Result<i64> {
        match self {
            Value::Integer(n) => Ok(*n),
            other => Err(Error::type_error("integer", other, operation)),
        }
    }

    /// Only `#f` is false
    pub fn is_true(&self) -> bool {
        !matches!(self, Value::Boolean(false))
    }

    /// `eq?` semantics: immediate values compare by content, heap values by address
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Unspecified, Value::Unspecified) => true,
            (Value::Pair(a), Value::Pair(b)) => Rc::ptr_eq(a, b),
            (Value::Proto(a), Value::Proto(b)) => Rc::ptr_eq(a, b),
            (Value::Continuation(a), Value::Continuation(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `equal?` semantics: pairs compare structurally, everything else by identity.
    /// Circular structure is equal when no difference is found before the
    /// comparison revisits a pair it has already entered.
    pub fn is_equal(&self, other: &Value) -> bool {
        self.equal_within(other, &mut Visited::new())
    }

    fn equal_within(&self, other: &Value, visited: &mut Visited) -> bool {
        let (mut left, mut right) = (self.clone(), other.clone());
        loop {
            match (&left, &right) {
                (Value::Pair(a), Value::Pair(b)) => {
                    if Rc::ptr_eq(a, b) || !visited.insert((Rc::as_ptr(a), Rc::as_ptr(b))) {
                        return true;
                    }
                    if !a.car().equal_within(&b.car(), visited) {
                        return false;
                    }
                    let (next_left, next_right) = (a.cdr(), b.cdr());
                    left = next_left;
                    right = next_right;
                }
                (Value::Error(a), Value::Error(b)) => return a == b,
                _ => return left.is_identical(&right),
            }
        }
    }

    pub fn car(&self, operation: &str) -> Result<Value> {
        match self {
            Value::Pair(pair) => Ok(pair.car()),
            other => Err(Error::type_error("pair", other, operation)),
        }
    }

    pub fn cdr(&self, operation: &str) -> Result<Value> {
        match self {
            Value::Pair(pair) => Ok(pair.cdr()),
            other => Err(Error::type_error("pair", other, operation)),
        }
    }

    pub fn set_car(&self, value: Value, operation: &str) -> Result<()> {
        match self {
            Value::Pair(pair) => {
                *pair.car.borrow_mut() = value;
                Ok(())
            }
            other => Err(Error::type_error("pair", other, operation)),
        }
    }

    pub fn set_cdr(&self, value: Value, operation: &str) -> Result<()> {
        match self {
            Value::Pair(pair) => {
                *pair.cdr.borrow_mut() = value;
                Ok(())
            }
            other => Err(Error::type_error("pair", other, operation)),
        }
    }

    /// The pairs along the cdr chain, and the final tail (`Nil` for proper lists).
    /// The tail is `None` when the chain loops back to one of its own pairs.
    fn spine(&self) -> (Vec<Rc<Pair>>, Option<Value>) {
        let mut pairs = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.clone();
        while let Value::Pair(pair) = &cursor {
            if !seen.insert(Rc::as_ptr(pair)) {
                return (pairs, None);
            }
            pairs.push(Rc::clone(pair));
            let next = pair.cdr();
            cursor = next;
        }
        (pairs, Some(cursor))
    }

    /// Split a list into its elements and final tail. The tail is `Nil` for
    /// proper lists and `None` for circular ones, whose elements are listed once.
    pub fn list_parts(&self) -> (Vec<Value>, Option<Value>) {
        let (pairs, tail) = self.spine();
        (pairs.iter().map(|pair| pair.car()).collect(), tail)
    }

    /// Elements of a proper list, `None` for anything else
    pub fn to_vec(&self) -> Option<Vec<Value>> {
        match self.list_parts() {
            (items, Some(Value::Nil)) => Some(items),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Value::Symbol(sym) => Some(*sym),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Pair(_) => write!(f, "Pair({self})"),
            Value::Nil => write!(f, "Nil"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Unspecified => write!(f, "Unspecified"),
            Value::Proto(p) => write!(f, "Proto({})", p.display_name()),
            Value::Continuation(c) => write!(f, "Continuation({})", c.proto.display_name()),
            Value::Error(e) => write!(f, "Error({e})"),
        }
    }
}

/// Print a list, writing `...` where the output would re-enter a pair that is
/// still being printed
fn write_list(f: &mut fmt::Formatter<'_>, list: &Value, open: &mut Vec<*const Pair>) -> fmt::Result {
    let (pairs, tail) = list.spine();
    let depth = open.len();
    open.extend(pairs.iter().map(Rc::as_ptr));

    write!(f, "(")?;
    for (i, pair) in pairs.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write_item(f, &pair.car(), open)?;
    }
    match tail {
        None => write!(f, " ...")?,
        Some(Value::Nil) => {}
        Some(tail) => {
            write!(f, " . ")?;
            write_item(f, &tail, open)?;
        }
    }
    open.truncate(depth);
    write!(f, ")")
}

fn write_item(f: &mut fmt::Formatter<'_>, item: &Value, open: &mut Vec<*const Pair>) -> fmt::Result {
    match item {
        Value::Pair(pair) if open.contains(&Rc::as_ptr(pair)) => write!(f, "..."),
        Value::Pair(_) => write_list(f, item, open),
        other => write!(f, "{other}"),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Pair(_) => write_list(f, self, &mut Vec::new()),
            Value::Nil => write!(f, "()"),
            Value::Boolean(true) => write!(f, "#t"),
            Value::Boolean(false) => write!(f, "#f"),
            Value::Unspecified => write!(f, "#<unspecified>"),
            Value::Proto(p) => write!(f, "#<proto {}>", p.display_name()),
            Value::Continuation(c) => write!(f, "#<continuation {}>", c.proto.display_name()),
            Value::Error(e) => write!(f, "#<error {e}>"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

impl From<Error> for Value {
    fn from(e: Error) -> Self {
        Value::Error(Rc::new(e))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::list(items.into_iter().map(Into::into))
    }
}

/// Helper for building values in code and tests: `val(42)`, `val(vec![sym("a")])`
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

pub fn sym(name: &str) -> Value {
    Value::Symbol(Symbol::intern(name))
}

pub fn nil() -> Value {
    Value::Nil
}
