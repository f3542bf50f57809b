//! Renders the AST back to JavaScript source. The canvas preprocessor
//! rewrites programs at the AST level but hands the rest of the pipeline
//! plain source text, so everything the parser accepts must round-trip.

use crate::ast::{Expr, Program, Stmt};

pub fn print_program(program: &Program) -> String {
    let mut out = String::new();
    for stmt in &program.body {
        print_stmt(stmt, 0, &mut out);
    }
    out
}

fn print_stmt(stmt: &Stmt, indent: usize, out: &mut String) {
    let pad = "    ".repeat(indent);
    match stmt {
        Stmt::VarDecl { kind, name, init, .. } => {
            out.push_str(&pad);
            out.push_str(kind);
            out.push(' ');
            out.push_str(name);
            if let Some(expr) = init {
                out.push_str(" = ");
                out.push_str(&print_expr(expr));
            }
            out.push_str(";\n");
        }
        Stmt::Expr { expr, .. } => {
            out.push_str(&pad);
            out.push_str(&print_expr(expr));
            out.push_str(";\n");
        }
        Stmt::If {
            test,
            consequent,
            alternate,
            ..
        } => {
            out.push_str(&pad);
            out.push_str("if (");
            out.push_str(&print_expr(test));
            out.push_str(") {\n");
            for inner in consequent {
                print_stmt(inner, indent + 1, out);
            }
            out.push_str(&pad);
            out.push('}');
            if !alternate.is_empty() {
                out.push_str(" else {\n");
                for inner in alternate {
                    print_stmt(inner, indent + 1, out);
                }
                out.push_str(&pad);
                out.push('}');
            }
            out.push('\n');
        }
        Stmt::While { test, body, .. } => {
            out.push_str(&pad);
            out.push_str("while (");
            out.push_str(&print_expr(test));
            out.push_str(") {\n");
            for inner in body {
                print_stmt(inner, indent + 1, out);
            }
            out.push_str(&pad);
            out.push_str("}\n");
        }
        Stmt::For {
            init,
            test,
            update,
            body,
            ..
        } => {
            out.push_str(&pad);
            out.push_str("for (");
            if let Some(stmt) = init {
                out.push_str(&print_for_init(stmt));
            }
            out.push_str("; ");
            if let Some(expr) = test {
                out.push_str(&print_expr(expr));
            }
            out.push_str("; ");
            if let Some(expr) = update {
                out.push_str(&print_expr(expr));
            }
            out.push_str(") {\n");
            for inner in body {
                print_stmt(inner, indent + 1, out);
            }
            out.push_str(&pad);
            out.push_str("}\n");
        }
        Stmt::Block { body, .. } => {
            out.push_str(&pad);
            out.push_str("{\n");
            for inner in body {
                print_stmt(inner, indent + 1, out);
            }
            out.push_str(&pad);
            out.push_str("}\n");
        }
        Stmt::FunctionDecl {
            name,
            params,
            body,
            is_async,
            ..
        } => {
            out.push_str(&pad);
            if *is_async {
                out.push_str("async ");
            }
            out.push_str("function ");
            out.push_str(name);
            out.push('(');
            out.push_str(&params.join(", "));
            out.push_str(") {\n");
            for inner in body {
                print_stmt(inner, indent + 1, out);
            }
            out.push_str(&pad);
            out.push_str("}\n");
        }
        Stmt::Return { value, .. } => {
            out.push_str(&pad);
            out.push_str("return");
            if let Some(expr) = value {
                out.push(' ');
                out.push_str(&print_expr(expr));
            }
            out.push_str(";\n");
        }
        Stmt::Empty { .. } => {
            out.push_str(&pad);
            out.push_str(";\n");
        }
    }
}

fn print_for_init(stmt: &Stmt) -> String {
    match stmt {
        Stmt::VarDecl { kind, name, init, .. } => {
            let mut text = format!("{} {}", kind, name);
            if let Some(expr) = init {
                text.push_str(" = ");
                text.push_str(&print_expr(expr));
            }
            text
        }
        Stmt::Expr { expr, .. } => print_expr(expr),
        other => print_expr_stmt_fallback(other),
    }
}

fn print_expr_stmt_fallback(stmt: &Stmt) -> String {
    let mut out = String::new();
    print_stmt(stmt, 0, &mut out);
    out.trim_end().trim_end_matches(';').to_string()
}

/// Nested expressions are printed fully parenthesized; precedence never
/// has to be reconstructed on the way back in.
pub fn print_expr(expr: &Expr) -> String {
    match expr {
        Expr::Number { value, .. } => number_text(*value),
        Expr::Str { value, .. } => quote(value),
        Expr::Bool { value, .. } => if *value { "true" } else { "false" }.to_string(),
        Expr::Null { .. } => "null".to_string(),
        Expr::Ident { name, .. } => name.clone(),
        Expr::Array { elements, .. } => {
            let items: Vec<String> = elements.iter().map(print_expr).collect();
            format!("[{}]", items.join(", "))
        }
        Expr::Object { properties, .. } => {
            let items: Vec<String> = properties
                .iter()
                .map(|p| format!("{}: {}", quote(&p.key), print_expr(&p.value)))
                .collect();
            format!("{{ {} }}", items.join(", "))
        }
        Expr::Function {
            params,
            body,
            is_async,
            ..
        } => {
            let mut out = String::new();
            out.push('(');
            if *is_async {
                out.push_str("async ");
            }
            out.push_str("function (");
            out.push_str(&params.join(", "));
            out.push_str(") {\n");
            for stmt in body {
                print_stmt(stmt, 1, &mut out);
            }
            out.push_str("})");
            out
        }
        Expr::Unary { op, operand, .. } => format!("({}{})", op, print_expr(operand)),
        Expr::Update {
            op,
            prefix,
            target,
            ..
        } => {
            if *prefix {
                format!("({}{})", op, print_expr(target))
            } else {
                format!("({}{})", print_expr(target), op)
            }
        }
        Expr::Binary { op, left, right, .. } => {
            format!("({} {} {})", print_expr(left), op, print_expr(right))
        }
        Expr::Assign {
            op, target, value, ..
        } => format!("({} {} {})", print_expr(target), op, print_expr(value)),
        Expr::Call { callee, args, .. } => {
            let rendered: Vec<String> = args.iter().map(print_expr).collect();
            format!("{}({})", print_expr(callee), rendered.join(", "))
        }
        Expr::New { callee, args, .. } => {
            let rendered: Vec<String> = args.iter().map(print_expr).collect();
            format!("new {}({})", print_expr(callee), rendered.join(", "))
        }
        Expr::Member {
            object, property, ..
        } => format!("{}.{}", member_base(object), property),
        Expr::Index { object, index, .. } => {
            format!("{}[{}]", member_base(object), print_expr(index))
        }
        Expr::Await { operand, .. } => format!("(await {})", print_expr(operand)),
    }
}

fn member_base(object: &Expr) -> String {
    match object {
        Expr::Ident { .. }
        | Expr::Member { .. }
        | Expr::Index { .. }
        | Expr::Call { .. }
        | Expr::Array { .. }
        | Expr::Str { .. } => print_expr(object),
        other => format!("({})", print_expr(other)),
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

fn number_text(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        let text = format!("{:.6}", value);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn parse(source: &str) -> Program {
        let tokens = Lexer::new(source).tokenize().expect("lexing failed");
        Parser::new(tokens).parse_program().expect("parsing failed")
    }

    fn roundtrips(source: &str) {
        let printed = print_program(&parse(source));
        // Printing the reparse of the printed text must be a fixpoint.
        let reprinted = print_program(&parse(&printed));
        assert_eq!(printed, reprinted, "printer does not round-trip: {source}");
    }

    #[test]
    fn roundtrips_declarations_and_loops() {
        roundtrips("let x = 10; const msg = 'hi';");
        roundtrips("while (x < 5) { x = x + 1; }");
        roundtrips("for (let i = 0; i <= 3; i++) say(i);");
    }

    #[test]
    fn roundtrips_functions() {
        roundtrips("const add = (a, b) => a + b; function f(n) { return n * 2; }");
        roundtrips("let obj = { hp: 10, mp: 5 }; obj.hp = obj.hp - 1;");
    }

    #[test]
    fn negative_literal_prints_as_number() {
        let program = parse("let x = -3;");
        let printed = print_program(&program);
        assert!(printed.contains("= -3;"));
    }

    #[test]
    fn string_quoting_escapes() {
        assert_eq!(quote("a\"b\\c"), r#""a\"b\\c""#);
    }
}
