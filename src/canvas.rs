//! Best-effort rewrite of canvas-2D drawing code into the private
//! `scratch_*` namespace understood by the lowerer. Programs that do not
//! bind a canvas, and programs that do not parse, pass through untouched.

use crate::ast::{Expr, Position, Stmt};
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::printer;
use std::collections::HashSet;

const PEN_COLOR_VAR: &str = "scratch_pen_color";
const STROKE_COLOR_VAR: &str = "scratch_stroke_color";
const LINE_WIDTH_VAR: &str = "scratch_line_width";
const TEXT_SIZE_VAR: &str = "scratch_text_size";
const SAY_CALL: &str = "scratch_say";

#[derive(Debug, Default)]
struct CanvasBindings {
    elements: HashSet<String>,
    contexts: HashSet<String>,
}

impl CanvasBindings {
    fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.contexts.is_empty()
    }

    fn is_binding(&self, name: &str) -> bool {
        self.elements.contains(name) || self.contexts.contains(name)
    }
}

pub fn preprocess(source: &str) -> String {
    let tokens = match Lexer::new(source).tokenize() {
        Ok(tokens) => tokens,
        Err(_) => return source.to_string(),
    };
    let mut program = match Parser::new(tokens).parse_program() {
        Ok(program) => program,
        Err(_) => return source.to_string(),
    };

    let bindings = collect_bindings(&program.body);
    if bindings.is_empty() {
        return source.to_string();
    }
    rewrite_statements(&mut program.body, &bindings);
    printer::print_program(&program)
}

fn collect_bindings(body: &[Stmt]) -> CanvasBindings {
    let mut bindings = CanvasBindings::default();
    collect_element_bindings(body, &mut bindings);
    collect_context_bindings(body, &mut bindings);
    bindings
}

fn collect_element_bindings(body: &[Stmt], bindings: &mut CanvasBindings) {
    walk_decls(body, &mut |name, init| {
        if is_call_to(init, "document", "getElementById") {
            bindings.elements.insert(name.to_string());
        }
    });
}

fn collect_context_bindings(body: &[Stmt], bindings: &mut CanvasBindings) {
    let elements = bindings.elements.clone();
    walk_decls(body, &mut |name, init| {
        if let Expr::Call { callee, .. } = init {
            if let Expr::Member {
                object, property, ..
            } = callee.as_ref()
            {
                if property == "getContext" {
                    if let Expr::Ident { name: receiver, .. } = object.as_ref() {
                        if elements.contains(receiver) || receiver == "canvas" {
                            bindings.contexts.insert(name.to_string());
                        }
                    }
                }
            }
        }
    });
}

fn walk_decls(body: &[Stmt], visit: &mut dyn FnMut(&str, &Expr)) {
    for stmt in body {
        match stmt {
            Stmt::VarDecl {
                name,
                init: Some(init),
                ..
            } => visit(name, init),
            Stmt::If {
                consequent,
                alternate,
                ..
            } => {
                walk_decls(consequent, visit);
                walk_decls(alternate, visit);
            }
            Stmt::While { body, .. }
            | Stmt::For { body, .. }
            | Stmt::Block { body, .. }
            | Stmt::FunctionDecl { body, .. } => walk_decls(body, visit),
            _ => {}
        }
    }
}

fn is_call_to(expr: &Expr, receiver: &str, method: &str) -> bool {
    let Expr::Call { callee, .. } = expr else {
        return false;
    };
    let Expr::Member {
        object, property, ..
    } = callee.as_ref()
    else {
        return false;
    };
    property == method && matches!(object.as_ref(), Expr::Ident { name, .. } if name == receiver)
}

fn rewrite_statements(body: &mut Vec<Stmt>, bindings: &CanvasBindings) {
    let mut rewritten = Vec::with_capacity(body.len());
    for stmt in body.drain(..) {
        if let Some(stmt) = rewrite_stmt(stmt, bindings) {
            rewritten.push(stmt);
        }
    }
    *body = rewritten;
}

fn rewrite_stmt(stmt: Stmt, bindings: &CanvasBindings) -> Option<Stmt> {
    match stmt {
        Stmt::VarDecl { ref name, .. } if bindings.is_binding(name) => None,
        Stmt::Expr { pos, expr } => rewrite_expr_stmt(pos, expr, bindings),
        Stmt::If {
            pos,
            test,
            mut consequent,
            mut alternate,
        } => {
            rewrite_statements(&mut consequent, bindings);
            rewrite_statements(&mut alternate, bindings);
            Some(Stmt::If {
                pos,
                test,
                consequent,
                alternate,
            })
        }
        Stmt::While { pos, test, mut body } => {
            rewrite_statements(&mut body, bindings);
            Some(Stmt::While { pos, test, body })
        }
        Stmt::For {
            pos,
            init,
            test,
            update,
            mut body,
        } => {
            rewrite_statements(&mut body, bindings);
            Some(Stmt::For {
                pos,
                init,
                test,
                update,
                body,
            })
        }
        Stmt::Block { pos, mut body } => {
            rewrite_statements(&mut body, bindings);
            Some(Stmt::Block { pos, body })
        }
        Stmt::FunctionDecl {
            pos,
            name,
            params,
            mut body,
            is_async,
        } => {
            rewrite_statements(&mut body, bindings);
            Some(Stmt::FunctionDecl {
                pos,
                name,
                params,
                body,
                is_async,
            })
        }
        other => Some(other),
    }
}

fn rewrite_expr_stmt(pos: Position, expr: Expr, bindings: &CanvasBindings) -> Option<Stmt> {
    match expr {
        Expr::Assign {
            pos: assign_pos,
            op,
            target,
            value,
        } => {
            if let Expr::Member {
                object, property, ..
            } = target.as_ref()
            {
                if let Expr::Ident { name, .. } = object.as_ref() {
                    if bindings.contexts.contains(name) {
                        return rewrite_context_property(pos, assign_pos, property, *value);
                    }
                }
            }
            Some(Stmt::Expr {
                pos,
                expr: Expr::Assign {
                    pos: assign_pos,
                    op,
                    target,
                    value,
                },
            })
        }
        Expr::Call {
            pos: call_pos,
            callee,
            args,
        } => {
            if let Expr::Member {
                object, property, ..
            } = callee.as_ref()
            {
                if let Expr::Ident { name, .. } = object.as_ref() {
                    if bindings.contexts.contains(name) {
                        return rewrite_context_call(pos, call_pos, property, args);
                    }
                }
            }
            Some(Stmt::Expr {
                pos,
                expr: Expr::Call {
                    pos: call_pos,
                    callee,
                    args,
                },
            })
        }
        other => Some(Stmt::Expr { pos, expr: other }),
    }
}

fn rewrite_context_property(
    pos: Position,
    assign_pos: Position,
    property: &str,
    value: Expr,
) -> Option<Stmt> {
    let replacement = match property {
        "fillStyle" => PEN_COLOR_VAR,
        "strokeStyle" => STROKE_COLOR_VAR,
        "lineWidth" => LINE_WIDTH_VAR,
        "font" => {
            let size = font_pixel_size(&value)?;
            return Some(assign_stmt(
                pos,
                assign_pos,
                TEXT_SIZE_VAR,
                Expr::Number {
                    pos: assign_pos,
                    value: size,
                },
            ));
        }
        _ => return None,
    };
    Some(assign_stmt(pos, assign_pos, replacement, value))
}

fn rewrite_context_call(
    pos: Position,
    call_pos: Position,
    property: &str,
    args: Vec<Expr>,
) -> Option<Stmt> {
    match property {
        "fillText" | "strokeText" => Some(Stmt::Expr {
            pos,
            expr: Expr::Call {
                pos: call_pos,
                callee: Box::new(Expr::Ident {
                    pos: call_pos,
                    name: SAY_CALL.to_string(),
                }),
                args,
            },
        }),
        _ => None,
    }
}

fn assign_stmt(pos: Position, assign_pos: Position, name: &str, value: Expr) -> Stmt {
    Stmt::Expr {
        pos,
        expr: Expr::Assign {
            pos: assign_pos,
            op: "=".to_string(),
            target: Box::new(Expr::Ident {
                pos: assign_pos,
                name: name.to_string(),
            }),
            value: Box::new(value),
        },
    }
}

/// `"30px Arial"` → `30`. Anything that is not a string literal with a
/// leading `<digits>px` run drops the assignment.
fn font_pixel_size(value: &Expr) -> Option<f64> {
    let Expr::Str { value: text, .. } = value else {
        return None;
    };
    let trimmed = text.trim_start();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || !trimmed[digits.len()..].starts_with("px") {
        return None;
    }
    digits.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_canvas_bindings_means_no_change() {
        let source = "let x = 1;\nsay(x);\n";
        assert_eq!(preprocess(source), source);
    }

    #[test]
    fn parse_failure_returns_input_unchanged() {
        let source = "let x = ;";
        assert_eq!(preprocess(source), source);
    }

    #[test]
    fn rewrites_fill_text_and_font() {
        let source = "let cv = document.getElementById('screen');\n\
                      let ctx = cv.getContext('2d');\n\
                      ctx.font = '30px Arial';\n\
                      ctx.fillText('Hi', 10, 20);\n";
        let out = preprocess(source);
        assert!(out.contains("scratch_text_size = 30"));
        assert!(out.contains(r#"scratch_say("Hi", 10, 20)"#));
        assert!(!out.contains("getElementById"));
        assert!(!out.contains("getContext"));
    }

    #[test]
    fn rewrites_style_properties() {
        let source = "let ctx = canvas.getContext('2d');\n\
                      ctx.fillStyle = 'red';\n\
                      ctx.strokeStyle = 'blue';\n\
                      ctx.lineWidth = 3;\n";
        let out = preprocess(source);
        assert!(out.contains(r#"scratch_pen_color = "red""#));
        assert!(out.contains(r#"scratch_stroke_color = "blue""#));
        assert!(out.contains("scratch_line_width = 3"));
    }

    #[test]
    fn drops_shape_and_alignment_statements() {
        let source = "let ctx = canvas.getContext('2d');\n\
                      ctx.textAlign = 'center';\n\
                      ctx.fillRect(0, 0, 10, 10);\n\
                      ctx.beginPath();\n\
                      ctx.arc(5, 5, 4, 0, 7);\n\
                      ctx.stroke();\n";
        let out = preprocess(source);
        assert!(!out.contains("ctx"));
        assert!(!out.contains("textAlign"));
        assert!(!out.contains("fillRect"));
    }

    #[test]
    fn rewrites_inside_nested_bodies() {
        let source = "let ctx = canvas.getContext('2d');\n\
                      if (ok) { ctx.fillText('deep', 1, 2); }\n";
        let out = preprocess(source);
        assert!(out.contains(r#"scratch_say("deep", 1, 2)"#));
    }

    #[test]
    fn non_matching_font_value_is_dropped() {
        let source = "let ctx = canvas.getContext('2d');\nctx.font = theme;\n";
        let out = preprocess(source);
        assert!(!out.contains("font"));
        assert!(!out.contains("scratch_text_size"));
    }
}
