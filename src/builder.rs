//! Builds direct-style [`Node`] trees from raw data.
//!
//! Recognized special forms: `quote`, `if`, `define`, `set!`, `lambda`, `begin`
//! and `let` (expanded to an immediately applied lambda). Any other list is an
//! application. Variadic lambda lists are rejected.

use std::collections::HashSet;

use crate::ast::{DefineScope, Lambda, Node};
use crate::value::{Symbol, Value};
use crate::{Error, Result};

/// Build one top-level form
pub fn build(form: &Value) -> Result<Node> {
    match form {
        Value::Symbol(name) => Ok(Node::Var(*name)),
        Value::Nil => Err(Error::syntax("illegal empty application", form)),
        Value::Pair(_) => build_list(form),
        Value::Integer(_) | Value::Boolean(_) | Value::Unspecified => Ok(Node::Const(form.clone())),
        Value::Proto(_) | Value::Continuation(_) | Value::Error(_) => {
            Err(Error::syntax("value cannot appear in source", form))
        }
    }
}

/// Build a sequence of top-level forms
pub fn build_all(forms: &[Value]) -> Result<Vec<Node>> {
    forms.iter().map(build).collect()
}

fn build_list(form: &Value) -> Result<Node> {
    let items = form
        .to_vec()
        .ok_or_else(|| Error::syntax("improper list in expression", form))?;
    let Some((head, operands)) = items.split_first() else {
        return Err(Error::syntax("illegal empty application", form));
    };

    if let Some(keyword) = head.as_symbol() {
        match keyword.name().as_str() {
            "quote" => return build_quote(form, operands),
            "if" => return build_if(form, operands),
            "define" => return build_define(form, operands),
            "set!" => return build_set(form, operands),
            "lambda" => return build_lambda(form, operands, None).map(Node::Lambda),
            "begin" => return build_body(operands).map(Node::Seq),
            "let" => return build_let(form, operands),
            _ => {}
        }
    }

    Ok(Node::Apply {
        proc: Box::new(build(head)?),
        args: operands.iter().map(build).collect::<Result<_>>()?,
    })
}

fn build_quote(form: &Value, operands: &[Value]) -> Result<Node> {
    match operands {
        [datum] => Ok(Node::Const(datum.clone())),
        _ => Err(Error::syntax("quote expects exactly one datum", form)),
    }
}

fn build_if(form: &Value, operands: &[Value]) -> Result<Node> {
    let (test, then, otherwise) = match operands {
        [test, then] => (test, then, None),
        [test, then, otherwise] => (test, then, Some(otherwise)),
        _ => return Err(Error::syntax("if expects 2 or 3 operands", form)),
    };
    let otherwise = match otherwise {
        Some(otherwise) => build(otherwise)?,
        None => Node::Const(Value::Unspecified),
    };
    Ok(Node::if_(build(test)?, build(then)?, otherwise))
}

fn build_define(form: &Value, operands: &[Value]) -> Result<Node> {
    let Some((target, rest)) = operands.split_first() else {
        return Err(Error::syntax("define expects a name", form));
    };

    let (name, value) = match target {
        // (define name expr)
        Value::Symbol(name) => {
            let [expr] = rest else {
                return Err(Error::syntax("define expects exactly one value", form));
            };
            let mut value = build(expr)?;
            if let Node::Lambda(lambda) = &mut value
                && lambda.name.is_none()
            {
                lambda.name = Some(*name);
            }
            (*name, value)
        }
        // (define (name formals...) body...)
        Value::Pair(pair) => {
            let name = pair
                .car()
                .as_symbol()
                .ok_or_else(|| Error::syntax("procedure name must be a symbol", form))?;
            let mut lambda_operands = vec![pair.cdr()];
            lambda_operands.extend_from_slice(rest);
            let lambda = build_lambda(form, &lambda_operands, Some(name))?;
            (name, Node::Lambda(lambda))
        }
        _ => return Err(Error::syntax("define expects a symbol or a procedure header", form)),
    };

    // The rewriter decides the final scope from the nesting depth
    Ok(Node::Define {
        name,
        value: Box::new(value),
        scope: DefineScope::Global,
    })
}

fn build_set(form: &Value, operands: &[Value]) -> Result<Node> {
    match operands {
        [Value::Symbol(name), expr] => Ok(Node::Set {
            name: *name,
            value: Box::new(build(expr)?),
        }),
        _ => Err(Error::syntax("set! expects a symbol and a value", form)),
    }
}

fn build_lambda(form: &Value, operands: &[Value], name: Option<Symbol>) -> Result<Lambda> {
    let Some((formals, body)) = operands.split_first() else {
        return Err(Error::syntax("lambda expects a parameter list", form));
    };
    if body.is_empty() {
        return Err(Error::syntax("lambda body cannot be empty", form));
    }

    let formals = match formals.to_vec() {
        Some(formals) => formals,
        None if matches!(formals, Value::Symbol(_) | Value::Pair(_)) => {
            return Err(Error::syntax("variadic arguments are not supported", form));
        }
        None => return Err(Error::syntax("parameter list must be a list", form)),
    };

    let mut seen = HashSet::new();
    let mut symbols = Vec::with_capacity(formals.len());
    for formal in &formals {
        let symbol = formal
            .as_symbol()
            .ok_or_else(|| Error::syntax("parameters must be symbols", form))?;
        if !seen.insert(symbol) {
            return Err(Error::syntax(format!("duplicate parameter '{symbol}'"), form));
        }
        symbols.push(symbol);
    }

    Ok(Lambda {
        name,
        ..Lambda::new(symbols, build_body(body)?)
    })
}

fn build_body(forms: &[Value]) -> Result<Vec<Node>> {
    forms.iter().map(build).collect()
}

/// `(let ((name init) ...) body ...)` is `((lambda (name ...) body ...) init ...)`
fn build_let(form: &Value, operands: &[Value]) -> Result<Node> {
    let Some((bindings, body)) = operands.split_first() else {
        return Err(Error::syntax("let expects a binding list", form));
    };
    let bindings = bindings
        .to_vec()
        .ok_or_else(|| Error::syntax("let bindings must be a list", form))?;

    let mut names = Vec::with_capacity(bindings.len());
    let mut inits = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        match binding.to_vec().as_deref() {
            Some([Value::Symbol(name), init]) => {
                names.push(Value::Symbol(*name));
                inits.push(build(init)?);
            }
            _ => return Err(Error::syntax("let binding must be (name value)", form)),
        }
    }

    let mut lambda_operands = vec![Value::list(names)];
    lambda_operands.extend_from_slice(body);
    let lambda = build_lambda(form, &lambda_operands, None)?;
    Ok(Node::apply(Node::Lambda(lambda), inits))
}
