//! Allow-list enforcement: browser and host APIs the target environment
//! cannot express abort compilation before any lowering happens.

use crate::ast::{Expr, Program, Stmt};
use std::error::Error;
use std::fmt::{Display, Formatter};

const BANNED_FEATURES: &[&str] = &[
    "window.location",
    "window.alert",
    "window.confirm",
    "window.prompt",
    "document.getElementById",
    "document.querySelector",
    "console.log",
    "localStorage",
    "sessionStorage",
    "fetch",
    "XMLHttpRequest",
    "setTimeout",
    "setInterval",
    "Promise",
];

#[derive(Debug, Clone)]
pub struct UnsupportedFeature {
    pub name: String,
    pub line: usize,
    pub column: usize,
}

impl Display for UnsupportedFeature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Unsupported feature '{}' (line {}, column {})",
            self.name, self.line, self.column
        )
    }
}

impl Error for UnsupportedFeature {}

/// Walks the program in lexical pre-order and reports the first banned
/// construct encountered.
pub fn check_program(program: &Program) -> Result<(), UnsupportedFeature> {
    check_statements(&program.body)
}

fn check_statements(statements: &[Stmt]) -> Result<(), UnsupportedFeature> {
    for stmt in statements {
        check_statement(stmt)?;
    }
    Ok(())
}

fn check_statement(stmt: &Stmt) -> Result<(), UnsupportedFeature> {
    match stmt {
        Stmt::VarDecl { init, .. } => {
            if let Some(expr) = init {
                check_expr(expr)?;
            }
            Ok(())
        }
        Stmt::Expr { expr, .. } => check_expr(expr),
        Stmt::If {
            test,
            consequent,
            alternate,
            ..
        } => {
            check_expr(test)?;
            check_statements(consequent)?;
            check_statements(alternate)
        }
        Stmt::While { test, body, .. } => {
            check_expr(test)?;
            check_statements(body)
        }
        Stmt::For {
            init,
            test,
            update,
            body,
            ..
        } => {
            if let Some(stmt) = init {
                check_statement(stmt)?;
            }
            if let Some(expr) = test {
                check_expr(expr)?;
            }
            if let Some(expr) = update {
                check_expr(expr)?;
            }
            check_statements(body)
        }
        Stmt::Block { body, .. } => check_statements(body),
        Stmt::FunctionDecl {
            pos, body, is_async, ..
        } => {
            if *is_async {
                return Err(unsupported("async", pos.line, pos.column));
            }
            check_statements(body)
        }
        Stmt::Return { value, .. } => {
            if let Some(expr) = value {
                check_expr(expr)?;
            }
            Ok(())
        }
        Stmt::Empty { .. } => Ok(()),
    }
}

fn check_expr(expr: &Expr) -> Result<(), UnsupportedFeature> {
    match expr {
        Expr::Member { .. } => {
            if let Some(path) = dotted_path(expr) {
                if let Some(feature) = banned_prefix(&path) {
                    let pos = expr.pos();
                    return Err(unsupported(feature, pos.line, pos.column));
                }
            }
            // A chain that is not itself banned may still hang off a
            // banned object, e.g. `fetch(url).then`.
            if let Expr::Member { object, .. } = expr {
                check_expr(object)?;
            }
            Ok(())
        }
        Expr::Ident { name, pos } => {
            if let Some(feature) = banned_bare_name(name) {
                return Err(unsupported(feature, pos.line, pos.column));
            }
            Ok(())
        }
        Expr::Array { elements, .. } => {
            for element in elements {
                check_expr(element)?;
            }
            Ok(())
        }
        Expr::Object { properties, .. } => {
            for property in properties {
                check_expr(&property.value)?;
            }
            Ok(())
        }
        Expr::Function {
            pos, body, is_async, ..
        } => {
            if *is_async {
                return Err(unsupported("async", pos.line, pos.column));
            }
            check_statements(body)
        }
        Expr::Unary { operand, .. } => check_expr(operand),
        Expr::Update { target, .. } => check_expr(target),
        Expr::Binary { left, right, .. } => {
            check_expr(left)?;
            check_expr(right)
        }
        Expr::Assign { target, value, .. } => {
            check_expr(target)?;
            check_expr(value)
        }
        Expr::Call { callee, args, .. } | Expr::New { callee, args, .. } => {
            check_expr(callee)?;
            for arg in args {
                check_expr(arg)?;
            }
            Ok(())
        }
        Expr::Index { object, index, .. } => {
            check_expr(object)?;
            check_expr(index)
        }
        Expr::Await { pos, .. } => Err(unsupported("await", pos.line, pos.column)),
        Expr::Number { .. } | Expr::Str { .. } | Expr::Bool { .. } | Expr::Null { .. } => Ok(()),
    }
}

fn unsupported(name: &str, line: usize, column: usize) -> UnsupportedFeature {
    UnsupportedFeature {
        name: name.to_string(),
        line,
        column,
    }
}

/// `window.location.href` → `Some("window.location.href")`; anything with
/// a non-identifier base yields `None`.
fn dotted_path(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident { name, .. } => Some(name.clone()),
        Expr::Member {
            object, property, ..
        } => Some(format!("{}.{}", dotted_path(object)?, property)),
        _ => None,
    }
}

fn banned_prefix(path: &str) -> Option<&'static str> {
    BANNED_FEATURES
        .iter()
        .find(|feature| {
            path == **feature
                || (path.len() > feature.len()
                    && path.starts_with(*feature)
                    && path.as_bytes()[feature.len()] == b'.')
        })
        .copied()
}

fn banned_bare_name(name: &str) -> Option<&'static str> {
    BANNED_FEATURES
        .iter()
        .find(|feature| !feature.contains('.') && **feature == name)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn gate(source: &str) -> Result<(), UnsupportedFeature> {
        let tokens = Lexer::new(source).tokenize().expect("lexing failed");
        let program = Parser::new(tokens).parse_program().expect("parsing failed");
        check_program(&program)
    }

    #[test]
    fn clean_program_passes() {
        assert!(gate("let x = 1; while (x < 5) { x = x + 1; }").is_ok());
    }

    #[test]
    fn reports_member_feature_with_location() {
        let err = gate("let a = 1;\nwindow.alert('hi');").unwrap_err();
        assert_eq!(err.name, "window.alert");
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 1);
    }

    #[test]
    fn longer_chain_matches_banned_prefix() {
        let err = gate("let u = window.location.href;").unwrap_err();
        assert_eq!(err.name, "window.location");
    }

    #[test]
    fn bare_identifier_features_are_flagged() {
        assert_eq!(gate("fetch('u');").unwrap_err().name, "fetch");
        assert_eq!(gate("let p = new Promise();").unwrap_err().name, "Promise");
        assert_eq!(
            gate("let x = new XMLHttpRequest();").unwrap_err().name,
            "XMLHttpRequest"
        );
        assert_eq!(
            gate("localStorage.setItem('k', 'v');").unwrap_err().name,
            "localStorage"
        );
    }

    #[test]
    fn similarly_named_identifiers_pass() {
        assert!(gate("let fetched = 1; let windowsill = 2;").is_ok());
        assert!(gate("let x = my.fetch;").is_ok());
    }

    #[test]
    fn async_and_await_are_flagged() {
        assert_eq!(gate("async function f() {}").unwrap_err().name, "async");
        let err = gate("function f() { return await g(); }").unwrap_err();
        assert_eq!(err.name, "await");
    }

    #[test]
    fn first_violation_in_preorder_wins() {
        let err = gate("console.log('a');\nwindow.alert('b');").unwrap_err();
        assert_eq!(err.name, "console.log");
        assert_eq!(err.line, 1);
    }
}
