//! Continuation-passing style rewriter.
//!
//! [`Rewriter::rewrite`] takes a direct-style node and the continuation that should
//! receive its value, and produces a node in which:
//!
//! - every application is a tail call whose last argument is its continuation,
//! - every operand is an atom (constant, variable or lambda) or an assignment,
//! - every user lambda takes one extra trailing parameter: its own continuation.
//!
//! The continuation argument is either a plain variable, meaning it is already
//! bound to a name, or an arbitrary CPS expression (usually a lambda). Before a
//! general continuation is used by both arms of an `if`, it is bound to a fresh
//! local name once, so its code is never duplicated.

use tracing::trace;

use crate::ast::{DefineScope, Lambda, Node};
use crate::value::{Symbol, Value};
use crate::{Error, Result};

/// Global that receives the value of a whole program
pub const HALT: &str = "halt";

#[derive(Debug, Default)]
pub struct Rewriter {
    /// Number of user lambdas enclosing the node being rewritten
    lambda_depth: usize,
}

impl Rewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite a whole program; its value is handed to the global `halt`
    pub fn rewrite_program(&mut self, forms: &[Node]) -> Result<Node> {
        let halt = Node::Var(Symbol::intern(HALT));
        let program = self.rewrite_body(forms, halt)?;
        trace!(%program, "rewrote program");
        Ok(program)
    }

    /// Rewrite `node` so that its value is passed to `cont`
    pub fn rewrite(&mut self, node: &Node, cont: Node) -> Result<Node> {
        match node {
            Node::Const(_) | Node::Var(_) | Node::Lambda(_) => {
                let atom = self.to_atom(node)?;
                Ok(Node::apply(cont, vec![atom]))
            }
            Node::If {
                test,
                then,
                otherwise,
            } => self.rewrite_if(test, then, otherwise, cont),
            Node::Seq(nodes) => self.rewrite_body(nodes, cont),
            Node::Apply { proc, args } => self.rewrite_apply(proc, args, cont),
            Node::Define { name, value, .. } => {
                let scope = if self.lambda_depth == 0 {
                    DefineScope::Global
                } else {
                    DefineScope::Local
                };
                let name = *name;
                self.rewrite_assignment(value, cont, |rv| Node::Define {
                    name,
                    value: Box::new(rv),
                    scope,
                })
            }
            Node::Set { name, value } => {
                let name = *name;
                self.rewrite_assignment(value, cont, |rv| Node::Set {
                    name,
                    value: Box::new(rv),
                })
            }
        }
    }

    /// Rewrite a sequence right to left. Every element but the last hands its value
    /// to a continuation that ignores it and runs the rest.
    pub fn rewrite_body(&mut self, nodes: &[Node], cont: Node) -> Result<Node> {
        let Some((last, init)) = nodes.split_last() else {
            return Ok(Node::apply(cont, vec![Node::Const(Value::Unspecified)]));
        };

        let mut rest = self.rewrite(last, cont)?;
        for node in init.iter().rev() {
            let ignored = Symbol::gensym("%_");
            let next = Node::Lambda(Lambda::new(vec![ignored], vec![rest]));
            rest = self.rewrite(node, next)?;
        }
        Ok(rest)
    }

    /// Convert an atomic node to its CPS form
    pub fn to_atom(&mut self, node: &Node) -> Result<Node> {
        match node {
            Node::Const(_) | Node::Var(_) => Ok(node.clone()),
            Node::Lambda(lambda) => {
                let k = Symbol::gensym("%k");
                self.lambda_depth += 1;
                let body = self.rewrite_body(&lambda.body, Node::Var(k));
                self.lambda_depth -= 1;

                let mut formals = lambda.formals.clone();
                formals.push(k);
                Ok(Node::Lambda(Lambda {
                    formals,
                    body: vec![body?],
                    name: lambda.name,
                    cells: cell_variables(lambda),
                }))
            }
            Node::Seq(nodes) if nodes.len() == 1 && nodes[0].is_atom() => self.to_atom(&nodes[0]),
            other => Err(Error::Compile(format!(
                "{} is not atomic: {other}",
                other.kind()
            ))),
        }
    }

    fn rewrite_if(&mut self, test: &Node, then: &Node, otherwise: &Node, cont: Node) -> Result<Node> {
        if !test.is_atom() {
            // (lambda (%p) (if %p then otherwise)) receives the test's value
            let p = Symbol::gensym("%p");
            let retest = Node::if_(Node::Var(p), then.clone(), otherwise.clone());
            let body = self.rewrite(&retest, cont)?;
            let k = Node::Lambda(Lambda::new(vec![p], vec![body]));
            return self.rewrite(test, k);
        }

        let test = self.to_atom(test)?;
        match cont {
            Node::Var(_) => {
                let then = self.rewrite(then, cont.clone())?;
                let otherwise = self.rewrite(otherwise, cont)?;
                Ok(Node::if_(test, then, otherwise))
            }
            cont => {
                let k = Symbol::gensym("%k");
                let bind = Node::Define {
                    name: k,
                    value: Box::new(cont),
                    scope: DefineScope::Local,
                };
                let then = self.rewrite(then, Node::Var(k))?;
                let otherwise = self.rewrite(otherwise, Node::Var(k))?;
                Ok(Node::Seq(vec![bind, Node::if_(test, then, otherwise)]))
            }
        }
    }

    /// Atomize the procedure, then each argument left to right. The first
    /// non-atomic part is evaluated under a continuation that binds its value and
    /// re-issues the application with that part replaced by the bound name.
    fn rewrite_apply(&mut self, proc: &Node, args: &[Node], cont: Node) -> Result<Node> {
        let parts: Vec<&Node> = std::iter::once(proc).chain(args).collect();

        if let Some(pos) = parts.iter().position(|part| !part.is_atom()) {
            let a = Symbol::gensym("%a");
            let mut rebuilt: Vec<Node> = parts.iter().map(|&part| part.clone()).collect();
            rebuilt[pos] = Node::Var(a);
            let rebuilt_args = rebuilt.split_off(1);
            let rebuilt_proc = rebuilt.pop().ok_or_else(|| {
                Error::Compile("application lost its procedure".into())
            })?;

            let body = self.rewrite_apply(&rebuilt_proc, &rebuilt_args, cont)?;
            let k = Node::Lambda(Lambda::new(vec![a], vec![body]));
            return self.rewrite(parts[pos], k);
        }

        let proc = self.to_atom(proc)?;
        let mut cps_args = args
            .iter()
            .map(|arg| self.to_atom(arg))
            .collect::<Result<Vec<_>>>()?;
        cps_args.push(cont);
        Ok(Node::apply(proc, cps_args))
    }

    /// `(define name expr)` / `(set! name expr)`: evaluate `expr` under
    /// `(lambda (%v) (cont (define name %v)))`
    fn rewrite_assignment(
        &mut self,
        value: &Node,
        cont: Node,
        assign: impl FnOnce(Node) -> Node,
    ) -> Result<Node> {
        let rv = Symbol::gensym("%v");
        let assignment = assign(Node::Var(rv));
        let formcont = Node::Lambda(Lambda::new(
            vec![rv],
            vec![Node::apply(cont, vec![assignment])],
        ));
        self.rewrite(value, formcont)
    }
}

/// Internal definitions of `lambda`, then its parameters assigned anywhere in
/// its body, nested lambdas included
fn cell_variables(lambda: &Lambda) -> Vec<Symbol> {
    let mut cells = Vec::new();
    lambda.body.iter().for_each(|node| collect_defines(node, &mut cells));

    let mut assigned = Vec::new();
    lambda.body.iter().for_each(|node| collect_assigned(node, &mut assigned));
    for formal in &lambda.formals {
        if assigned.contains(formal) && !cells.contains(formal) {
            cells.push(*formal);
        }
    }
    cells
}

/// Names defined in `node` outside any nested lambda
fn collect_defines(node: &Node, out: &mut Vec<Symbol>) {
    match node {
        Node::Define { name, value, .. } => {
            if !out.contains(name) {
                out.push(*name);
            }
            collect_defines(value, out);
        }
        Node::Set { value, .. } => collect_defines(value, out),
        Node::If {
            test,
            then,
            otherwise,
        } => {
            collect_defines(test, out);
            collect_defines(then, out);
            collect_defines(otherwise, out);
        }
        Node::Seq(nodes) => nodes.iter().for_each(|node| collect_defines(node, out)),
        Node::Apply { proc, args } => {
            collect_defines(proc, out);
            args.iter().for_each(|arg| collect_defines(arg, out));
        }
        Node::Const(_) | Node::Var(_) | Node::Lambda(_) => {}
    }
}

/// Targets of every `set!` in `node`. Shadowing is ignored, which can only put an
/// extra variable in a cell.
fn collect_assigned(node: &Node, out: &mut Vec<Symbol>) {
    match node {
        Node::Set { name, value } => {
            if !out.contains(name) {
                out.push(*name);
            }
            collect_assigned(value, out);
        }
        Node::Define { value, .. } => collect_assigned(value, out),
        Node::If {
            test,
            then,
            otherwise,
        } => {
            collect_assigned(test, out);
            collect_assigned(then, out);
            collect_assigned(otherwise, out);
        }
        Node::Seq(nodes) => nodes.iter().for_each(|node| collect_assigned(node, out)),
        Node::Apply { proc, args } => {
            collect_assigned(proc, out);
            args.iter().for_each(|arg| collect_assigned(arg, out));
        }
        Node::Lambda(lambda) => lambda.body.iter().for_each(|node| collect_assigned(node, out)),
        Node::Const(_) | Node::Var(_) => {}
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    fn int(n: i64) -> Node {
        Node::Const(Value::Integer(n))
    }

    /// Every application in a CPS tree is in tail position and has atomic operands
    fn assert_cps(node: &Node) {
        match node {
            Node::Apply { proc, args } => {
                assert_operand(proc);
                args.iter().for_each(assert_operand);
            }
            Node::If {
                test,
                then,
                otherwise,
            } => {
                assert!(matches!(**test, Node::Const(_) | Node::Var(_)), "test {test}");
                assert_cps(then);
                assert_cps(otherwise);
            }
            Node::Seq(nodes) => {
                let (last, init) = nodes.split_last().unwrap();
                init.iter().for_each(assert_operand);
                assert_cps(last);
            }
            other => panic!("{other} is not a tail form"),
        }
    }

    fn assert_operand(node: &Node) {
        match node {
            Node::Const(_) | Node::Var(_) => {}
            Node::Lambda(lambda) => {
                assert_eq!(lambda.body.len(), 1, "lambda body should be one tail form");
                assert_cps(&lambda.body[0]);
            }
            Node::Define { value, .. } | Node::Set { value, .. } => assert_operand(value),
            other => panic!("{other} is not an operand"),
        }
    }

    fn lambda_formals(node: &Node) -> Vec<Symbol> {
        match node {
            Node::Lambda(lambda) => lambda.formals.clone(),
            other => panic!("expected lambda, got {other}"),
        }
    }

    #[test]
    fn test_atom_passes_to_continuation() {
        let mut rw = Rewriter::new();
        let k = Node::var("k");
        assert_eq!(
            rw.rewrite(&int(5), k.clone()).unwrap(),
            Node::apply(k.clone(), vec![int(5)])
        );
        assert_eq!(
            rw.rewrite(&Node::Seq(vec![int(5)]), k.clone()).unwrap(),
            Node::apply(k, vec![int(5)])
        );
    }

    #[test]
    fn test_atomic_application_gets_trailing_continuation() {
        let mut rw = Rewriter::new();
        let node = Node::apply(Node::var("f"), vec![Node::var("x"), int(1)]);
        let cps = rw.rewrite(&node, Node::var("k")).unwrap();
        assert_eq!(cps.to_string(), "(f x 1 k)");
    }

    #[test]
    fn test_nested_application_order() {
        // (f (g 1) (h 2)): g is called first, then h, then f
        let mut rw = Rewriter::new();
        let node = Node::apply(
            Node::var("f"),
            vec![
                Node::apply(Node::var("g"), vec![int(1)]),
                Node::apply(Node::var("h"), vec![int(2)]),
            ],
        );
        let cps = rw.rewrite(&node, Node::var("k")).unwrap();
        assert_cps(&cps);

        let Node::Apply { proc, args } = &cps else {
            panic!("expected application, got {cps}");
        };
        assert_eq!(**proc, Node::var("g"));
        assert_eq!(args[0], int(1));

        // g's continuation calls h, whose continuation calls f with both temporaries
        let g_formals = lambda_formals(&args[1]);
        let Node::Lambda(g_cont) = &args[1] else { unreachable!() };
        let Node::Apply { proc, args: h_args } = &g_cont.body[0] else {
            panic!("expected call to h");
        };
        assert_eq!(**proc, Node::var("h"));
        let h_formals = lambda_formals(&h_args[1]);
        let Node::Lambda(h_cont) = &h_args[1] else { unreachable!() };
        assert_eq!(
            h_cont.body[0],
            Node::apply(
                Node::var("f"),
                vec![
                    Node::Var(g_formals[0]),
                    Node::Var(h_formals[0]),
                    Node::var("k")
                ]
            )
        );
    }

    #[test]
    fn test_procedure_position_atomized_first() {
        let mut rw = Rewriter::new();
        let node = Node::apply(
            Node::apply(Node::var("make"), vec![]),
            vec![Node::apply(Node::var("arg"), vec![])],
        );
        let cps = rw.rewrite(&node, Node::var("k")).unwrap();
        assert_cps(&cps);
        let Node::Apply { proc, .. } = &cps else {
            panic!("expected application");
        };
        assert_eq!(**proc, Node::var("make"));
    }

    #[test]
    fn test_if_with_variable_continuation_shares_it() {
        let mut rw = Rewriter::new();
        let node = Node::if_(Node::var("t"), int(1), int(2));
        let cps = rw.rewrite(&node, Node::var("k")).unwrap();
        assert_eq!(cps.to_string(), "(if t (k 1) (k 2))");
    }

    #[test]
    fn test_if_with_general_continuation_binds_it_once() {
        let mut rw = Rewriter::new();
        let cont = Node::lambda(vec![Symbol::intern("r")], vec![Node::apply(Node::var("halt"), vec![Node::var("r")])]);
        let node = Node::if_(Node::var("t"), int(1), int(2));
        let cps = rw.rewrite(&node, cont.clone()).unwrap();
        assert_cps(&cps);

        let Node::Seq(parts) = &cps else {
            panic!("expected (begin (define %k ...) (if ...)), got {cps}");
        };
        let Node::Define { name, value, scope } = &parts[0] else {
            panic!("expected define");
        };
        assert_eq!(**value, cont);
        assert_eq!(*scope, DefineScope::Local);
        let k = Node::Var(*name);
        assert_eq!(
            parts[1],
            Node::if_(
                Node::var("t"),
                Node::apply(k.clone(), vec![int(1)]),
                Node::apply(k, vec![int(2)])
            )
        );
        // The continuation's code appears exactly once
        assert_eq!(cps.to_string().matches("(halt r)").count(), 1);
    }

    #[test]
    fn test_non_atomic_test_is_evaluated_first() {
        let mut rw = Rewriter::new();
        let node = Node::if_(
            Node::apply(Node::var("p"), vec![]),
            int(1),
            int(2),
        );
        let cps = rw.rewrite(&node, Node::var("k")).unwrap();
        assert_cps(&cps);
        let Node::Apply { proc, args } = &cps else {
            panic!("expected call to p");
        };
        assert_eq!(**proc, Node::var("p"));
        let formals = lambda_formals(&args[0]);
        let Node::Lambda(test_cont) = &args[0] else { unreachable!() };
        assert_eq!(
            test_cont.body[0],
            Node::if_(
                Node::Var(formals[0]),
                Node::apply(Node::var("k"), vec![int(1)]),
                Node::apply(Node::var("k"), vec![int(2)])
            )
        );
    }

    #[test]
    fn test_sequence_ignores_intermediate_values() {
        let mut rw = Rewriter::new();
        let node = Node::Seq(vec![
            Node::apply(Node::var("display"), vec![int(1)]),
            int(2),
        ]);
        let cps = rw.rewrite(&node, Node::var("k")).unwrap();
        let Node::Apply { proc, args } = &cps else {
            panic!("expected call to display");
        };
        assert_eq!(**proc, Node::var("display"));
        let Node::Lambda(rest) = &args[1] else {
            panic!("expected continuation lambda");
        };
        assert_eq!(rest.formals.len(), 1);
        assert_eq!(rest.body[0], Node::apply(Node::var("k"), vec![int(2)]));

        let empty = rw.rewrite(&Node::Seq(vec![]), Node::var("k")).unwrap();
        assert_eq!(
            empty,
            Node::apply(Node::var("k"), vec![Node::Const(Value::Unspecified)])
        );
    }

    #[test]
    fn test_lambda_gets_continuation_parameter() {
        let mut rw = Rewriter::new();
        let node = Node::lambda(
            vec![Symbol::intern("n")],
            vec![Node::apply(Node::var("g"), vec![Node::var("n")])],
        );
        let cps = rw.to_atom(&node).unwrap();
        let Node::Lambda(lambda) = &cps else {
            panic!("expected lambda");
        };
        assert_eq!(lambda.formals.len(), 2);
        let k = Node::Var(lambda.formals[1]);
        assert_eq!(
            lambda.body[0],
            Node::apply(Node::var("g"), vec![Node::var("n"), k])
        );
    }

    #[test]
    fn test_define_scope_follows_lambda_depth() {
        let mut rw = Rewriter::new();
        let top = Node::Define {
            name: Symbol::intern("x"),
            value: Box::new(int(1)),
            scope: DefineScope::Local,
        };
        let cps = rw.rewrite_program(&[top.clone()]).unwrap();
        assert!(cps.to_string().contains("(define x "), "{cps}");
        let Node::Apply { proc, .. } = &cps else { panic!() };
        let Node::Lambda(formcont) = &**proc else { panic!() };
        let Node::Apply { args, .. } = &formcont.body[0] else { panic!() };
        assert!(matches!(args[0], Node::Define { scope: DefineScope::Global, .. }));

        let inner = Node::lambda(vec![], vec![top, Node::var("x")]);
        let Node::Lambda(lambda) = rw.to_atom(&inner).unwrap() else {
            panic!()
        };
        assert!(format!("{:?}", lambda.body[0]).contains("scope: Local"));
        assert!(!format!("{:?}", lambda.body[0]).contains("scope: Global"));
    }

    #[test]
    fn test_cells_hold_internal_defines_and_assigned_parameters() {
        let s = Symbol::intern;
        let set = |name: &str, value: Node| Node::Set {
            name: s(name),
            value: Box::new(value),
        };
        let define = |name: &str, value: Node| Node::Define {
            name: s(name),
            value: Box::new(value),
            scope: DefineScope::Local,
        };
        // (lambda (a b c)
        //   (define d 1)
        //   (if t (begin (define e 2) (set! b 3)) #f)
        //   (lambda (x) (define f 4) (set! a x) (set! x 5))
        //   (set! global 6))
        let node = Node::lambda(
            vec![s("a"), s("b"), s("c")],
            vec![
                define("d", int(1)),
                Node::if_(
                    Node::var("t"),
                    Node::Seq(vec![define("e", int(2)), set("b", int(3))]),
                    Node::Const(Value::Boolean(false)),
                ),
                Node::lambda(
                    vec![s("x")],
                    vec![define("f", int(4)), set("a", Node::var("x")), set("x", int(5))],
                ),
                set("global", int(6)),
            ],
        );
        let Node::Lambda(lambda) = Rewriter::new().to_atom(&node).unwrap() else {
            panic!("expected lambda");
        };
        assert_eq!(lambda.cells, vec![s("d"), s("e"), s("a"), s("b")]);

        // Continuations introduced by the rewrite never hold cells
        let mut nested = Vec::new();
        fn continuations(node: &Node, out: &mut Vec<Lambda>) {
            match node {
                Node::Lambda(lambda) => {
                    out.push(lambda.clone());
                    lambda.body.iter().for_each(|n| continuations(n, out));
                }
                Node::Apply { proc, args } => {
                    continuations(proc, out);
                    args.iter().for_each(|n| continuations(n, out));
                }
                Node::If { then, otherwise, .. } => {
                    continuations(then, out);
                    continuations(otherwise, out);
                }
                Node::Seq(nodes) => nodes.iter().for_each(|n| continuations(n, out)),
                Node::Define { value, .. } | Node::Set { value, .. } => continuations(value, out),
                Node::Const(_) | Node::Var(_) => {}
            }
        }
        continuations(&lambda.body[0], &mut nested);
        let user: Vec<&Lambda> = nested.iter().filter(|l| l.formals.contains(&s("x"))).collect();
        assert_eq!(user.len(), 1);
        assert_eq!(user[0].cells, vec![s("f"), s("x")]);
        assert!(
            nested
                .iter()
                .filter(|l| !l.formals.contains(&s("x")))
                .all(|l| l.cells.is_empty())
        );
    }

    #[test]
    fn test_program_ends_in_halt() {
        let mut rw = Rewriter::new();
        let cps = rw.rewrite_program(&[int(1), int(2)]).unwrap();
        assert_cps(&cps);
        assert!(cps.to_string().contains("(halt 2)"), "{cps}");
    }

    #[test]
    fn test_gensyms_do_not_capture_user_names() {
        // A user variable that looks like a temporary is left alone
        let user = Symbol::intern("%a0");
        let mut rw = Rewriter::new();
        let node = Node::apply(
            Node::var("f"),
            vec![Node::apply(Node::var("g"), vec![]), Node::Var(user)],
        );
        let cps = rw.rewrite(&node, Node::var("k")).unwrap();
        let Node::Apply { args, .. } = &cps else { panic!() };
        let formals = lambda_formals(&args[0]);
        assert_ne!(formals[0], user);
    }
}
