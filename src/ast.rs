//! Syntax tree shared by the builder, the CPS rewriter and the code generator.
//!
//! The same [`Node`] type describes both direct-style programs (builder output) and
//! their CPS form (rewriter output). In CPS form every `Apply` is a tail call whose
//! last argument is the continuation, and operands are restricted to atoms plus the
//! assignment forms.

use std::fmt;

use crate::value::{Symbol, Value};

/// Where a `define` binds its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefineScope {
    /// A slot in the enclosing compiled scope
    Local,
    /// The module's global table
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub formals: Vec<Symbol>,
    pub body: Vec<Node>,
    /// Debug name, taken from the `define` that introduced the lambda
    pub name: Option<Symbol>,
    /// Variables of this lambda that live in a shared mutable cell: its internal
    /// definitions and the parameters some `set!` assigns. Closures capture the
    /// cell, so they all see later assignments.
    pub cells: Vec<Symbol>,
}

impl Lambda {
    pub fn new(formals: Vec<Symbol>, body: Vec<Node>) -> Self {
        Lambda {
            formals,
            body,
            name: None,
            cells: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Const(Value),
    Var(Symbol),
    If {
        test: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    Seq(Vec<Node>),
    Apply {
        proc: Box<Node>,
        args: Vec<Node>,
    },
    Define {
        name: Symbol,
        value: Box<Node>,
        scope: DefineScope,
    },
    Set {
        name: Symbol,
        value: Box<Node>,
    },
    Lambda(Lambda),
}

impl Node {
    /// Literals, variables and lambdas have no control effect when evaluated.
    /// A single-element sequence of an atom is itself atomic.
    pub fn is_atom(&self) -> bool {
        match self {
            Node::Const(_) | Node::Var(_) | Node::Lambda(_) => true,
            Node::Seq(nodes) => matches!(nodes.as_slice(), [only] if only.is_atom()),
            _ => false,
        }
    }

    pub fn apply(proc: Node, args: Vec<Node>) -> Node {
        Node::Apply {
            proc: Box::new(proc),
            args,
        }
    }

    pub fn if_(test: Node, then: Node, otherwise: Node) -> Node {
        Node::If {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn var(name: &str) -> Node {
        Node::Var(Symbol::intern(name))
    }

    pub fn lambda(formals: Vec<Symbol>, body: Vec<Node>) -> Node {
        Node::Lambda(Lambda::new(formals, body))
    }

    /// Short description used in compiler errors
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Const(_) => "constant",
            Node::Var(_) => "variable",
            Node::If { .. } => "if",
            Node::Seq(_) => "sequence",
            Node::Apply { .. } => "application",
            Node::Define { .. } => "define",
            Node::Set { .. } => "set!",
            Node::Lambda(_) => "lambda",
        }
    }
}

fn write_body(f: &mut fmt::Formatter<'_>, nodes: &[Node]) -> fmt::Result {
    for node in nodes {
        write!(f, " {node}")?;
    }
    Ok(())
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Const(value @ (Value::Symbol(_) | Value::Pair(_) | Value::Nil)) => {
                write!(f, "'{value}")
            }
            Node::Const(value) => write!(f, "{value}"),
            Node::Var(name) => write!(f, "{name}"),
            Node::If {
                test,
                then,
                otherwise,
            } => write!(f, "(if {test} {then} {otherwise})"),
            Node::Seq(nodes) => {
                write!(f, "(begin")?;
                write_body(f, nodes)?;
                write!(f, ")")
            }
            Node::Apply { proc, args } => {
                write!(f, "({proc}")?;
                write_body(f, args)?;
                write!(f, ")")
            }
            Node::Define { name, value, .. } => write!(f, "(define {name} {value})"),
            Node::Set { name, value } => write!(f, "(set! {name} {value})"),
            Node::Lambda(lambda) => {
                write!(f, "(lambda (")?;
                for (i, formal) in lambda.formals.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{formal}")?;
                }
                write!(f, ")")?;
                write_body(f, &lambda.body)?;
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atoms() {
        let cases = vec![
            (Node::Const(Value::Integer(1)), true),
            (Node::var("x"), true),
            (Node::lambda(vec![], vec![Node::var("x")]), true),
            (Node::Seq(vec![Node::var("x")]), true),
            (Node::Seq(vec![Node::var("x"), Node::var("y")]), false),
            (Node::Seq(vec![Node::apply(Node::var("f"), vec![])]), false),
            (Node::apply(Node::var("f"), vec![]), false),
            (
                Node::if_(Node::var("a"), Node::var("b"), Node::var("c")),
                false,
            ),
        ];
        for (i, (node, expected)) in cases.iter().enumerate() {
            assert_eq!(node.is_atom(), *expected, "atom test #{}: {node}", i + 1);
        }
    }

    #[test]
    fn test_display() {
        let node = Node::apply(
            Node::lambda(
                vec![Symbol::intern("x")],
                vec![Node::Set {
                    name: Symbol::intern("y"),
                    value: Box::new(Node::Const(Value::Symbol(Symbol::intern("q")))),
                }],
            ),
            vec![Node::Const(Value::Integer(3))],
        );
        assert_eq!(node.to_string(), "((lambda (x) (set! y 'q)) 3)");
    }
}
